//! Rolling per-agent performance.

use crate::models::{AnalysisResult, SignalOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Reported performance of one agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentPerformance {
    pub agent_name: String,
    pub signals_generated: u64,
    pub votes: u64,
    pub abstentions: u64,
    pub errors: u64,
    pub abstention_rate: f64,
    pub error_rate: f64,
    /// Mean confidence over votes only.
    pub average_confidence: f64,
    pub average_processing_time_ms: f64,
    pub last_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Tally {
    signals: u64,
    votes: u64,
    abstentions: u64,
    errors: u64,
    confidence_sum: f64,
    processing_time_sum: f64,
    last_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct AgentMetrics {
    tallies: BTreeMap<String, Tally>,
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold every signal of one run into the tallies.
    pub fn record_run(&mut self, result: &AnalysisResult) {
        for signal in &result.signals {
            let tally = self.tallies.entry(signal.agent_name.clone()).or_default();
            tally.signals += 1;
            tally.processing_time_sum += signal.processing_time_ms;
            tally.last_run = tally.last_run.max(Some(result.timestamp));

            match signal.outcome {
                SignalOutcome::Voted { confidence, .. } => {
                    tally.votes += 1;
                    tally.confidence_sum += confidence;
                }
                SignalOutcome::Abstained { .. } => tally.abstentions += 1,
                SignalOutcome::Errored { .. } => tally.errors += 1,
            }
        }
    }

    /// Performance per agent, sorted by name.
    pub fn performance(&self) -> Vec<AgentPerformance> {
        self.tallies
            .iter()
            .map(|(name, tally)| AgentPerformance {
                agent_name: name.clone(),
                signals_generated: tally.signals,
                votes: tally.votes,
                abstentions: tally.abstentions,
                errors: tally.errors,
                abstention_rate: ratio(tally.abstentions as f64, tally.signals as f64),
                error_rate: ratio(tally.errors as f64, tally.signals as f64),
                average_confidence: ratio(tally.confidence_sum, tally.votes as f64),
                average_processing_time_ms: ratio(tally.processing_time_sum, tally.signals as f64),
                last_run: tally.last_run,
            })
            .collect()
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RiskLevel, Signal};
    use crate::testing::{epoch, result_with_signals};
    use chrono::Duration;

    #[test]
    fn test_rates_and_confidence() {
        let mut metrics = AgentMetrics::new();
        metrics.record_run(&result_with_signals(
            "S1",
            epoch(),
            vec![
                Signal::voted("safety", RiskLevel::High, 0.8, 3.0).with_processing_time(10.0),
                Signal::abstained("coding", 1.2, "no terms"),
            ],
        ));
        metrics.record_run(&result_with_signals(
            "S2",
            epoch() + Duration::minutes(5),
            vec![
                Signal::voted("safety", RiskLevel::Low, 0.6, 3.0).with_processing_time(30.0),
                Signal::errored("coding", 1.2, "timeout"),
            ],
        ));

        let performance = metrics.performance();
        assert_eq!(performance.len(), 2);

        let coding = &performance[0];
        assert_eq!(coding.agent_name, "coding");
        assert_eq!(coding.abstention_rate, 0.5);
        assert_eq!(coding.error_rate, 0.5);
        assert_eq!(coding.average_confidence, 0.0);

        let safety = &performance[1];
        assert_eq!(safety.signals_generated, 2);
        assert!((safety.average_confidence - 0.7).abs() < 1e-9);
        assert_eq!(safety.average_processing_time_ms, 20.0);
        assert_eq!(safety.last_run, Some(epoch() + Duration::minutes(5)));
    }
}
