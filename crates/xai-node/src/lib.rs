//! Node assembly: the single-writer scheduler, the collaborator-facing
//! handle, the P2P ingest pipeline, and cooperative shutdown. The `xai-node`
//! binary wires these together.

pub mod ingest;
pub mod node;
pub mod scheduler;
pub mod shutdown;

pub use ingest::Ingest;
pub use node::{EventSubscription, NodeHandle};
pub use scheduler::{now_ts, spawn_writer, ChainCommand, ReadView};
pub use shutdown::{shutdown_pair, ShutdownHandle, ShutdownSignal};
