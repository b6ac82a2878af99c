//! Analysis modules.
//!
//! Consensus voting over agent signals and the Data Quality Index.

pub mod consensus;
pub mod dqi;

pub use consensus::ConsensusEngine;
pub use dqi::{DqiScorer, DqiWeights};
