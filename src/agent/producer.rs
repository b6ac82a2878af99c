//! Signal producer contract and roster.
//!
//! Agents are external analyzers. The engine only needs them to answer
//! `produce(study_id)` with a vote, an abstention or an error.

use crate::config::AgentSpec;
use crate::error::ConfigError;
use crate::models::{Evidence, RiskLevel, SignalOutcome};
use crate::source::FeedSource;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// What an agent reports for one study.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentReport {
    Vote {
        risk_level: RiskLevel,
        confidence: f64,
        evidence: Vec<Evidence>,
    },
    Abstain {
        reason: String,
    },
}

/// An independent analyzer producing a risk opinion for a study.
#[async_trait]
pub trait SignalProducer: Send + Sync {
    /// Stable, unique agent name.
    fn name(&self) -> &str;

    /// Produce a report for the study. Errors count as agent failures.
    async fn produce(&self, study_id: &str) -> Result<AgentReport>;
}

/// A producer together with its signed voting weight.
#[derive(Clone)]
pub struct RosterEntry {
    pub producer: Arc<dyn SignalProducer>,
    pub weight: f64,
}

impl RosterEntry {
    pub fn new(producer: Arc<dyn SignalProducer>, weight: f64) -> Self {
        Self { producer, weight }
    }

    pub fn name(&self) -> &str {
        self.producer.name()
    }
}

/// Fixed set of agents consulted on every cycle.
#[derive(Clone)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    /// Build a roster, rejecting empty, duplicate or non-finite entries.
    pub fn new(entries: Vec<RosterEntry>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();

        for entry in &entries {
            let name = entry.name();
            if name.trim().is_empty() {
                return Err(ConfigError::EmptyAgentName);
            }
            if !entry.weight.is_finite() {
                return Err(ConfigError::InvalidAgentWeight(name.to_string()));
            }
            if !seen.insert(name.to_string()) {
                return Err(ConfigError::DuplicateAgent(name.to_string()));
            }
        }

        Ok(Self { entries })
    }

    /// Build a roster of feed-backed producers from agent specs.
    pub fn from_feed(specs: &[AgentSpec], feed: Arc<FeedSource>) -> Result<Self, ConfigError> {
        let entries = specs
            .iter()
            .map(|spec| {
                let producer: Arc<dyn SignalProducer> =
                    Arc::new(FeedProducer::new(spec.name.clone(), Arc::clone(&feed)));
                RosterEntry::new(producer, spec.weight)
            })
            .collect();
        Self::new(entries)
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Producer that replays agent outcomes recorded in a study feed.
pub struct FeedProducer {
    name: String,
    feed: Arc<FeedSource>,
}

impl FeedProducer {
    pub fn new(name: impl Into<String>, feed: Arc<FeedSource>) -> Self {
        Self {
            name: name.into(),
            feed,
        }
    }
}

#[async_trait]
impl SignalProducer for FeedProducer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn produce(&self, study_id: &str) -> Result<AgentReport> {
        let Some(entry) = self.feed.agent_entry(study_id, &self.name).await else {
            return Ok(AgentReport::Abstain {
                reason: "no data in feed".to_string(),
            });
        };

        if entry.delay_ms > 0 {
            debug!("Agent {} simulating {}ms latency", self.name, entry.delay_ms);
            tokio::time::sleep(Duration::from_millis(entry.delay_ms)).await;
        }

        match entry.outcome {
            SignalOutcome::Voted {
                risk_level,
                confidence,
            } => Ok(AgentReport::Vote {
                risk_level,
                confidence,
                evidence: entry.evidence,
            }),
            SignalOutcome::Abstained { reason } => Ok(AgentReport::Abstain { reason }),
            SignalOutcome::Errored { reason } => Err(anyhow::anyhow!(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl SignalProducer for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn produce(&self, _study_id: &str) -> Result<AgentReport> {
            Ok(AgentReport::Abstain {
                reason: "test".to_string(),
            })
        }
    }

    fn entry(name: &'static str, weight: f64) -> RosterEntry {
        RosterEntry::new(Arc::new(Named(name)), weight)
    }

    #[test]
    fn test_roster_rejects_duplicates() {
        let result = Roster::new(vec![entry("safety", 3.0), entry("safety", 1.0)]);
        assert_eq!(
            result.err(),
            Some(ConfigError::DuplicateAgent("safety".to_string()))
        );
    }

    #[test]
    fn test_roster_rejects_empty_names_and_bad_weights() {
        assert_eq!(
            Roster::new(vec![entry("  ", 1.0)]).err(),
            Some(ConfigError::EmptyAgentName)
        );
        assert!(matches!(
            Roster::new(vec![entry("safety", f64::NAN)]),
            Err(ConfigError::InvalidAgentWeight(_))
        ));
    }

    #[test]
    fn test_roster_accepts_negative_weights() {
        let roster = Roster::new(vec![entry("safety", 3.0), entry("stability", -1.5)]).unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster.entries()[1].weight, -1.5);
    }
}
