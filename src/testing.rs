//! Shared fixtures for unit tests.

use crate::analysis::{ConsensusEngine, DqiScorer, DqiWeights};
use crate::models::{AnalysisResult, DimensionInputs, Signal, SignalSummary};
use chrono::{DateTime, TimeZone, Utc};

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 8, 0, 0).unwrap()
}

/// A well-formed result built from the given signals.
pub fn result_with_signals(
    study_id: &str,
    timestamp: DateTime<Utc>,
    signals: Vec<Signal>,
) -> AnalysisResult {
    let consensus = ConsensusEngine::default().compute(&signals);
    let dqi = DqiScorer::new(DqiWeights::default())
        .unwrap()
        .score(&DimensionInputs::new());
    let summary = SignalSummary::from_signals(&signals);

    AnalysisResult {
        study_id: study_id.to_string(),
        timestamp,
        signals,
        consensus,
        dqi,
        agents_succeeded: summary.succeeded,
        agents_failed: summary.failed,
        agents_abstained: summary.abstained,
        processing_time_ms: 1.0,
        input_fingerprint: "fp".to_string(),
        source_updated_at: None,
    }
}

pub fn result_at(study_id: &str, timestamp: DateTime<Utc>) -> AnalysisResult {
    result_with_signals(study_id, timestamp, Vec::new())
}
