//! TrialGuard - consensus risk engine for clinical trial studies
//!
//! Fuses independent, possibly failing or abstaining agent signals into
//! one risk decision per study, rolls per-dimension scores into a Data
//! Quality Index, serves results through a single-flight cache and audits
//! the pipeline with the Guardian integrity monitor.

pub mod agent;
pub mod analysis;
pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod guardian;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod source;

#[cfg(test)]
mod testing;

pub use cache::{ResultCache, Served};
pub use config::Config;
pub use engine::Engine;
pub use error::{ConfigError, EngineError, SourceError};
pub use models::{AnalysisResult, ConsensusDecision, DqiScore, RiskLevel, Signal, SignalOutcome};
