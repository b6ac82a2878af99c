//! Pipeline self-consistency checks over consecutive cached runs.

use super::events::Finding;
use crate::cache::CacheEntry;
use crate::clock::seconds_between;
use crate::models::{AnalysisResult, EventSeverity, IntegrityEventType};
use crate::pipeline::output_fingerprint;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// What Guardian remembers about the last run it saw for a study.
#[derive(Debug, Clone, PartialEq)]
struct RunRecord {
    stored_at: DateTime<Utc>,
    input_fingerprint: String,
    output_fingerprint: String,
    source_updated_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            stored_at: entry.stored_at,
            input_fingerprint: entry.value.input_fingerprint.clone(),
            output_fingerprint: output_fingerprint(&entry.value),
            source_updated_at: entry.value.source_updated_at,
        }
    }
}

/// Outcome of comparing a cache entry against the previous run.
#[derive(Debug, Default)]
pub struct RunAudit {
    /// True when the entry holds a run Guardian had not seen yet.
    pub new_run: bool,
    pub findings: Vec<Finding>,
}

#[derive(Debug)]
pub struct ConsistencyAuditor {
    stale_after_days: f64,
    failure_spike_ratio: f64,
    last_runs: HashMap<String, RunRecord>,
    stuck: HashSet<String>,
}

impl ConsistencyAuditor {
    pub fn new(stale_after_days: f64, failure_spike_ratio: f64) -> Self {
        Self {
            stale_after_days,
            failure_spike_ratio,
            last_runs: HashMap::new(),
            stuck: HashSet::new(),
        }
    }

    /// Compare a cache entry with the last run seen for the same study.
    pub fn observe(&mut self, entry: &CacheEntry, now: DateTime<Utc>) -> RunAudit {
        let current = RunRecord::from_entry(entry);
        let previous = self.last_runs.get(&entry.key).cloned();

        if previous.as_ref().map(|p| p.stored_at) == Some(current.stored_at) {
            return RunAudit::default();
        }

        let mut findings = Vec::new();

        if let Some(previous) = &previous {
            if previous.input_fingerprint == current.input_fingerprint
                && previous.output_fingerprint != current.output_fingerprint
            {
                findings.push(Finding {
                    event_type: IntegrityEventType::NonDeterministicOutput,
                    severity: EventSeverity::High,
                    entity_id: entry.key.clone(),
                    expected_behavior: "Unchanged study data produces an identical verdict".to_string(),
                    actual_behavior: format!(
                        "Study data {} unchanged but the verdict changed between runs at {} and {}",
                        short(&current.input_fingerprint),
                        previous.stored_at.format("%Y-%m-%d %H:%M:%S"),
                        current.stored_at.format("%Y-%m-%d %H:%M:%S")
                    ),
                    recommendation: "Check agents for non-deterministic verdicts on the same data"
                        .to_string(),
                });
            }

            if let Some(finding) = self.check_stuck(&entry.key, previous, &current, now) {
                findings.push(finding);
            }
        }

        if let Some(finding) = self.check_failures(&entry.value) {
            findings.push(finding);
        }

        self.last_runs.insert(entry.key.clone(), current);
        RunAudit {
            new_run: true,
            findings,
        }
    }

    /// A recomputation over source data that has not moved while the
    /// source is stale. Reported once per streak.
    fn check_stuck(
        &mut self,
        study_id: &str,
        previous: &RunRecord,
        current: &RunRecord,
        now: DateTime<Utc>,
    ) -> Option<Finding> {
        let (Some(before), Some(after)) = (previous.source_updated_at, current.source_updated_at) else {
            return None;
        };

        if after > before {
            self.stuck.remove(study_id);
            return None;
        }

        let days_stale = seconds_between(after, now) / SECONDS_PER_DAY;
        if days_stale < self.stale_after_days || !self.stuck.insert(study_id.to_string()) {
            return None;
        }

        Some(Finding {
            event_type: IntegrityEventType::StuckRecomputation,
            severity: EventSeverity::Warning,
            entity_id: study_id.to_string(),
            expected_behavior: "Recomputation reads newer source data".to_string(),
            actual_behavior: format!(
                "Recomputed at {} but source data is unchanged since {} ({:.1} days)",
                current.stored_at.format("%Y-%m-%d %H:%M:%S"),
                after.format("%Y-%m-%d %H:%M:%S"),
                days_stale
            ),
            recommendation: "Verify the pipeline is connected to the live study source".to_string(),
        })
    }

    fn check_failures(&self, result: &AnalysisResult) -> Option<Finding> {
        let total = result.agents_succeeded + result.agents_failed + result.agents_abstained;
        if total == 0 || result.agents_failed == 0 {
            return None;
        }

        let ratio = result.agents_failed as f64 / total as f64;
        if ratio < self.failure_spike_ratio {
            return None;
        }

        let failed: Vec<&str> = result
            .sorted_signals()
            .into_iter()
            .filter(|s| s.error().is_some())
            .map(|s| s.agent_name.as_str())
            .collect();

        Some(Finding {
            event_type: IntegrityEventType::AgentFailureSpike,
            severity: if result.agents_failed == total {
                EventSeverity::High
            } else {
                EventSeverity::Warning
            },
            entity_id: result.study_id.clone(),
            expected_behavior: format!(
                "Fewer than {:.0}% of agents fail in one run",
                self.failure_spike_ratio * 100.0
            ),
            actual_behavior: format!(
                "{} of {} agents failed: {}",
                result.agents_failed,
                total,
                failed.join(", ")
            ),
            recommendation: "Check agent health and upstream data availability".to_string(),
        })
    }

    /// Number of studies currently in a stuck streak.
    pub fn stuck_count(&self) -> usize {
        self.stuck.len()
    }
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RiskLevel, Signal};
    use crate::testing::{epoch, result_with_signals};
    use chrono::Duration;
    use std::sync::Arc;

    fn entry(result: AnalysisResult, stored_at: DateTime<Utc>) -> CacheEntry {
        CacheEntry {
            key: result.study_id.clone(),
            value: Arc::new(result),
            stored_at,
        }
    }

    fn run(stored_at: DateTime<Utc>, source_updated_at: Option<DateTime<Utc>>) -> CacheEntry {
        let mut result = result_with_signals(
            "S1",
            stored_at,
            vec![Signal::voted("safety", RiskLevel::High, 0.9, 3.0)],
        );
        result.source_updated_at = source_updated_at;
        entry(result, stored_at)
    }

    #[test]
    fn test_same_entry_is_not_a_new_run() {
        let mut auditor = ConsistencyAuditor::new(1.0, 0.5);
        let first = run(epoch(), Some(epoch()));

        assert!(auditor.observe(&first, epoch()).new_run);
        let again = auditor.observe(&first, epoch());
        assert!(!again.new_run);
        assert!(again.findings.is_empty());
    }

    #[test]
    fn test_divergent_output_for_same_input() {
        let mut auditor = ConsistencyAuditor::new(1.0, 0.5);
        auditor.observe(&run(epoch(), Some(epoch())), epoch());

        let mut changed = run(epoch() + Duration::minutes(1), Some(epoch()));
        Arc::make_mut(&mut changed.value).consensus.risk_score += 5.0;

        let audit = auditor.observe(&changed, epoch() + Duration::minutes(1));
        assert_eq!(audit.findings.len(), 1);
        assert_eq!(
            audit.findings[0].event_type,
            IntegrityEventType::NonDeterministicOutput
        );
        assert_eq!(audit.findings[0].severity, EventSeverity::High);
    }

    #[test]
    fn test_changed_input_with_changed_output_is_fine() {
        let mut auditor = ConsistencyAuditor::new(1.0, 0.5);
        auditor.observe(&run(epoch(), Some(epoch())), epoch());

        let mut changed = run(epoch() + Duration::minutes(1), Some(epoch()));
        let value = Arc::make_mut(&mut changed.value);
        value.consensus.risk_score += 5.0;
        value.input_fingerprint = "other".to_string();

        assert!(auditor
            .observe(&changed, epoch() + Duration::minutes(1))
            .findings
            .is_empty());
    }

    #[test]
    fn test_stuck_recomputation_reported_once_per_streak() {
        let mut auditor = ConsistencyAuditor::new(1.0, 0.5);
        let source = epoch();
        let day = Duration::days(1);

        auditor.observe(&run(source + day, Some(source)), source + day);

        let second = auditor.observe(&run(source + day * 2, Some(source)), source + day * 2);
        assert_eq!(second.findings.len(), 1);
        assert_eq!(
            second.findings[0].event_type,
            IntegrityEventType::StuckRecomputation
        );
        assert_eq!(auditor.stuck_count(), 1);

        let third = auditor.observe(&run(source + day * 3, Some(source)), source + day * 3);
        assert!(third.findings.is_empty());

        // Source moves: streak ends, a new stall reports again.
        let moved = source + day * 3;
        auditor.observe(&run(source + day * 4, Some(moved)), source + day * 4);
        assert_eq!(auditor.stuck_count(), 0);
        let again = auditor.observe(&run(source + day * 5, Some(moved)), source + day * 5);
        assert_eq!(again.findings.len(), 1);
    }

    #[test]
    fn test_unchanged_but_recent_source_is_not_stuck() {
        let mut auditor = ConsistencyAuditor::new(1.0, 0.5);
        let now = epoch() + Duration::hours(2);
        auditor.observe(&run(now, Some(epoch())), now);

        let later = now + Duration::minutes(1);
        assert!(auditor.observe(&run(later, Some(epoch())), later).findings.is_empty());
    }

    #[test]
    fn test_failure_spike() {
        let mut auditor = ConsistencyAuditor::new(1.0, 0.5);
        let result = result_with_signals(
            "S1",
            epoch(),
            vec![
                Signal::voted("safety", RiskLevel::High, 0.9, 3.0),
                Signal::errored("edc_quality", 1.2, "timeout"),
                Signal::errored("coding", 1.2, "boom"),
            ],
        );

        let audit = auditor.observe(&entry(result, epoch()), epoch());
        assert_eq!(audit.findings.len(), 1);
        let finding = &audit.findings[0];
        assert_eq!(finding.event_type, IntegrityEventType::AgentFailureSpike);
        assert_eq!(finding.severity, EventSeverity::Warning);
        assert!(finding.actual_behavior.contains("coding, edc_quality"));
    }
}
