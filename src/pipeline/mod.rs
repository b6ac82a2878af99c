//! Pipeline orchestrator.
//!
//! One cycle fans out to every agent in the roster concurrently, each
//! under its own deadline, then fuses the signals into a consensus
//! decision, scores data quality and assembles the [`AnalysisResult`].

pub mod fingerprint;

pub use fingerprint::{input_fingerprint, output_fingerprint};

use crate::agent::{AgentReport, Roster, RosterEntry, Summarizer};
use crate::analysis::{ConsensusEngine, DqiScorer};
use crate::clock::Clock;
use crate::error::EngineError;
use crate::models::{AnalysisResult, Signal, SignalSummary};
use crate::source::StudySource;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Reason recorded on a signal whose agent missed its deadline.
pub const TIMEOUT_REASON: &str = "timeout";

/// Cycle counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStats {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub agent_timeout_ms: u64,
    pub agents: Vec<AgentWeight>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentWeight {
    pub name: String,
    pub weight: f64,
}

/// Runs analysis cycles.
pub struct Orchestrator {
    roster: Roster,
    source: Arc<dyn StudySource>,
    consensus: ConsensusEngine,
    dqi: DqiScorer,
    summarizer: Option<Arc<dyn Summarizer>>,
    clock: Arc<dyn Clock>,
    agent_timeout: Duration,
    last_timestamps: Mutex<HashMap<String, DateTime<Utc>>>,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl Orchestrator {
    pub fn new(
        roster: Roster,
        source: Arc<dyn StudySource>,
        consensus: ConsensusEngine,
        dqi: DqiScorer,
        clock: Arc<dyn Clock>,
        agent_timeout: Duration,
    ) -> Self {
        Self {
            roster,
            source,
            consensus,
            dqi,
            summarizer: None,
            clock,
            agent_timeout,
            last_timestamps: Mutex::new(HashMap::new()),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Enrich explanations through an external summarizer.
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn source(&self) -> &Arc<dyn StudySource> {
        &self.source
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            cycles_completed: self.completed.load(Ordering::Relaxed),
            cycles_failed: self.failed.load(Ordering::Relaxed),
            agent_timeout_ms: self.agent_timeout.as_millis() as u64,
            agents: self.agent_weights(),
        }
    }

    fn agent_weights(&self) -> Vec<AgentWeight> {
        self.roster
            .entries()
            .iter()
            .map(|entry| AgentWeight {
                name: entry.name().to_string(),
                weight: entry.weight,
            })
            .collect()
    }

    /// Run one full analysis cycle for a study.
    pub async fn run_cycle(&self, study_id: &str) -> Result<AnalysisResult, EngineError> {
        let outcome = self.run_cycle_inner(study_id).await;
        match &outcome {
            Ok(_) => self.completed.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
        outcome
    }

    async fn run_cycle_inner(&self, study_id: &str) -> Result<AnalysisResult, EngineError> {
        let started = Instant::now();

        let snapshot = self
            .source
            .load_study(study_id)
            .await
            .map_err(|e| EngineError::Source {
                study_id: study_id.to_string(),
                message: e.to_string(),
            })?
            .ok_or_else(|| EngineError::StudyNotFound(study_id.to_string()))?;

        debug!(
            "Running {} agents for {} (timeout {}ms)",
            self.roster.len(),
            study_id,
            self.agent_timeout.as_millis()
        );
        let signals = self.collect_signals(study_id).await;
        let summary = SignalSummary::from_signals(&signals);

        let mut consensus = self.consensus.compute(&signals);
        if let Some(summarizer) = &self.summarizer {
            match summarizer.summarize(&consensus, &signals).await {
                Ok(text) => consensus.explanation = text,
                Err(e) => warn!(
                    "Summarizer failed for {}, keeping templated explanation: {}",
                    study_id, e
                ),
            }
        }

        let dqi = self.dqi.score(&snapshot.dimensions);
        let input_fingerprint = input_fingerprint(&self.agent_weights(), &snapshot);
        let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        info!(
            "Analyzed {}: {} {} risk ({:.1}), DQI {:.1} {}, {} voted / {} abstained / {} failed in {:.1}ms",
            study_id,
            consensus.risk_level.emoji(),
            consensus.risk_level,
            consensus.risk_score,
            dqi.overall_score,
            dqi.band,
            summary.succeeded,
            summary.abstained,
            summary.failed,
            processing_time_ms
        );

        Ok(AnalysisResult {
            study_id: study_id.to_string(),
            timestamp: self.next_timestamp(study_id),
            signals,
            consensus,
            dqi,
            agents_succeeded: summary.succeeded,
            agents_failed: summary.failed,
            agents_abstained: summary.abstained,
            processing_time_ms,
            input_fingerprint,
            source_updated_at: snapshot.last_updated,
        })
    }

    /// Query every agent concurrently. Always returns one signal per agent.
    async fn collect_signals(&self, study_id: &str) -> Vec<Signal> {
        let calls = self
            .roster
            .entries()
            .iter()
            .map(|entry| self.query_agent(entry, study_id));
        join_all(calls).await
    }

    async fn query_agent(&self, entry: &RosterEntry, study_id: &str) -> Signal {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.agent_timeout, entry.producer.produce(study_id)).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let signal = match outcome {
            Ok(Ok(AgentReport::Vote {
                risk_level,
                confidence,
                evidence,
            })) => {
                debug!(
                    "Agent {} voted {} ({:.2}) on {}",
                    entry.name(),
                    risk_level,
                    confidence,
                    study_id
                );
                Signal::voted(entry.name(), risk_level, confidence, entry.weight).with_evidence(evidence)
            }
            Ok(Ok(AgentReport::Abstain { reason })) => {
                debug!("Agent {} abstained on {}: {}", entry.name(), study_id, reason);
                Signal::abstained(entry.name(), entry.weight, reason)
            }
            Ok(Err(e)) => {
                warn!("Agent {} failed on {}: {}", entry.name(), study_id, e);
                Signal::errored(entry.name(), entry.weight, e.to_string())
            }
            Err(_) => {
                warn!(
                    "Agent {} timed out on {} after {}ms",
                    entry.name(),
                    study_id,
                    self.agent_timeout.as_millis()
                );
                Signal::errored(entry.name(), entry.weight, TIMEOUT_REASON)
            }
        };

        signal.with_processing_time(elapsed_ms)
    }

    /// Strictly increasing per study, even if the clock stalls or steps back.
    fn next_timestamp(&self, study_id: &str) -> DateTime<Utc> {
        let now = self.clock.now();
        let mut last = self
            .last_timestamps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let stamp = match last.get(study_id) {
            Some(previous) if now <= *previous => *previous + chrono::Duration::microseconds(1),
            _ => now,
        };
        last.insert(study_id.to_string(), stamp);
        stamp
    }
}
