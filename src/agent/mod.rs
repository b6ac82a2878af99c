//! Agent modules.
//!
//! Signal producers feeding the consensus vote, and the optional
//! explanation summarizer.

pub mod producer;
pub mod summarizer;

pub use producer::{AgentReport, FeedProducer, Roster, RosterEntry, SignalProducer};
pub use summarizer::{OllamaSummarizer, Summarizer};
