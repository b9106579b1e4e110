//! BFT-style finality on top of PoW fork choice: validators vote on applied
//! blocks; once more than 2/3 of total stake agrees on a block, a finality
//! certificate pins it (and all its ancestors) against reorgs forever.

pub mod validator_set;
pub mod voter;

pub use validator_set::{ValidatorInfo, ValidatorSet};
pub use voter::{FinalityCertificate, FinalityVoter, Vote, VoteRecord};
