//! Sink-agnostic event routing and pull-style metrics for the core engine.
//! Components publish typed events; any number of subscribers (loggers,
//! P2P advertisers, test harnesses) consume them without the core knowing.

pub mod metrics;
pub mod router;

pub use metrics::{Metrics, MetricsSnapshot};
pub use router::{CoreEvent, EventKind, EventRouter, MisbehaviorKind};
