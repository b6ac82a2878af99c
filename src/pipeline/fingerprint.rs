//! Content digests for analysis inputs and outputs.

use super::AgentWeight;
use crate::models::AnalysisResult;
use crate::source::StudySnapshot;
use sha2::{Digest, Sha256};

/// Digest of the data a cycle reads: the roster (names and weights), the
/// DQI dimension inputs and the source update stamp.
///
/// Agent verdicts are not part of it: two runs with the same fingerprint
/// saw the same study data, whatever the agents answered.
pub fn input_fingerprint(agents: &[AgentWeight], snapshot: &StudySnapshot) -> String {
    let mut sorted: Vec<&AgentWeight> = agents.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut hasher = Sha256::new();
    for agent in sorted {
        hasher.update(agent.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(agent.weight.to_le_bytes());
    }
    if let Ok(json) = serde_json::to_string(&snapshot.dimensions) {
        hasher.update(json.as_bytes());
    }
    match snapshot.last_updated {
        Some(updated) => hasher.update(updated.to_rfc3339().as_bytes()),
        None => hasher.update(b"never"),
    }
    hex::encode(hasher.finalize())
}

/// Digest of the verdict a result carries.
///
/// Covers the consensus and DQI numbers, not the explanation text, which
/// an external summarizer may phrase differently each time.
pub fn output_fingerprint(result: &AnalysisResult) -> String {
    let consensus = &result.consensus;
    let dqi = &result.dqi;

    let mut hasher = Sha256::new();
    hasher.update(consensus.risk_level.to_string().as_bytes());
    hasher.update(format!("{:.6}", consensus.risk_score).as_bytes());
    hasher.update(format!("{:.6}", consensus.confidence).as_bytes());
    for contributor in &consensus.top_contributors {
        hasher.update(contributor.agent_name.as_bytes());
    }
    hasher.update(dqi.band.to_string().as_bytes());
    hasher.update(format!("{:.6}", dqi.overall_score).as_bytes());
    hex::encode(hasher.finalize())
}
