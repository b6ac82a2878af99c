//! Markdown and JSON report generation.
//!
//! Renders analysis results, pipeline status and Guardian status for the
//! command line.

use crate::cache::Served;
use crate::engine::PipelineStatus;
use crate::guardian::GuardianStatus;
use crate::models::{AnalysisResult, ConsensusDecision, DqiScore, Signal, SignalOutcome};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

/// An analysis result together with how it was served.
#[derive(Serialize)]
struct ServedView<'a> {
    cached: bool,
    cache_age_seconds: f64,
    #[serde(flatten)]
    result: &'a AnalysisResult,
}

/// Generate a complete Markdown report for one study.
pub fn generate_analysis_markdown(served: &Served) -> String {
    let result = &served.result;
    let mut output = String::new();

    output.push_str(&format!("# TrialGuard Analysis: {}\n\n", result.study_id));
    output.push_str(&generate_metadata_section(served));
    output.push_str(&generate_consensus_section(&result.consensus));
    output.push_str(&generate_dqi_section(&result.dqi));
    output.push_str(&generate_signals_section(result));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(served: &Served) -> String {
    let result = &served.result;
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **Computed:** {}\n",
        result.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if served.cached {
        section.push_str(&format!(
            "- **Served From Cache:** yes ({:.0}s old)\n",
            served.cache_age_seconds
        ));
    } else {
        section.push_str("- **Served From Cache:** no (freshly computed)\n");
    }
    if let Some(updated) = result.source_updated_at {
        section.push_str(&format!(
            "- **Source Data Updated:** {}\n",
            updated.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    section.push_str(&format!(
        "- **Agents:** {} voted, {} abstained, {} failed\n",
        result.agents_succeeded, result.agents_abstained, result.agents_failed
    ));
    section.push_str(&format!(
        "- **Processing Time:** {:.1}ms\n",
        result.processing_time_ms
    ));
    section.push_str(&format!(
        "- **Input Fingerprint:** `{}`\n\n",
        result.input_fingerprint.get(..16).unwrap_or(&result.input_fingerprint)
    ));

    section
}

/// Generate the consensus section.
fn generate_consensus_section(consensus: &ConsensusDecision) -> String {
    let mut section = String::new();

    section.push_str("## Consensus\n\n");
    section.push_str(&format!(
        "| {} Risk | Score | Confidence | Voting Agents |\n",
        consensus.risk_level.emoji()
    ));
    section.push_str("|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| **{}** | {:.1} / 100 | {:.0}% | {} |\n\n",
        consensus.risk_level,
        consensus.risk_score,
        consensus.confidence * 100.0,
        consensus.voting_agents
    ));

    section.push_str(&format!("{}\n\n", consensus.explanation));
    section.push_str(&format!(
        "> 💡 **Recommended Action:** {}\n\n",
        consensus.recommended_action
    ));

    if !consensus.top_contributors.is_empty() {
        section.push_str("### Top Contributors\n\n");
        section.push_str("| Agent | Vote | Confidence | Contribution |\n");
        section.push_str("|:---|:---:|:---:|---:|\n");
        for contributor in &consensus.top_contributors {
            section.push_str(&format!(
                "| {} | {} {} | {:.0}% | {:+.2} |\n",
                contributor.agent_name,
                contributor.risk_level.emoji(),
                contributor.risk_level,
                contributor.confidence * 100.0,
                contributor.contribution
            ));
        }
        section.push('\n');
    }

    section
}

/// Generate the data quality section.
fn generate_dqi_section(dqi: &DqiScore) -> String {
    let mut section = String::new();

    section.push_str("## Data Quality Index\n\n");
    section.push_str(&format!(
        "**{:.1} / 100** ({} band, {} {} risk)\n\n",
        dqi.overall_score,
        dqi.band,
        dqi.risk_level.emoji(),
        dqi.risk_level
    ));

    section.push_str("| Dimension | Raw Score | Weight | Weighted |\n");
    section.push_str("|:---|:---:|:---:|:---:|\n");
    for (dimension, score) in &dqi.dimension_scores {
        section.push_str(&format!(
            "| {} | {:.1} | {:.0}% | {:.2} |\n",
            dimension, score.raw_score, score.weight, score.weighted_score
        ));
    }
    section.push('\n');

    if !dqi.missing_dimensions.is_empty() {
        let missing: Vec<String> = dqi.missing_dimensions.iter().map(|d| d.to_string()).collect();
        section.push_str(&format!(
            "⚠️ No input for {}; scored as 0.\n\n",
            missing.join(", ")
        ));
    }

    section
}

/// Generate the per-agent signal table.
fn generate_signals_section(result: &AnalysisResult) -> String {
    let mut section = String::new();

    section.push_str("## Agent Signals\n\n");
    section.push_str("| Agent | Weight | Outcome | Time |\n");
    section.push_str("|:---|---:|:---|---:|\n");
    for signal in result.sorted_signals() {
        section.push_str(&format!(
            "| {} | {:+.1} | {} | {:.0}ms |\n",
            signal.agent_name,
            signal.weight,
            describe_outcome(signal),
            signal.processing_time_ms
        ));
    }
    section.push('\n');

    let with_evidence: Vec<&Signal> = result
        .sorted_signals()
        .into_iter()
        .filter(|s| !s.evidence.is_empty())
        .collect();
    if !with_evidence.is_empty() {
        section.push_str("### Evidence\n\n");
        for signal in with_evidence {
            section.push_str(&format!("**{}**\n\n", signal.agent_name));
            for evidence in &signal.evidence {
                let threshold = evidence
                    .threshold
                    .map(|t| format!(" (threshold {})", t))
                    .unwrap_or_default();
                section.push_str(&format!(
                    "- {} {} = {}{}\n",
                    evidence.severity.emoji(),
                    evidence.feature,
                    evidence.value,
                    threshold
                ));
            }
            section.push('\n');
        }
    }

    section
}

fn describe_outcome(signal: &Signal) -> String {
    match &signal.outcome {
        SignalOutcome::Voted {
            risk_level,
            confidence,
        } => format!(
            "{} {} ({:.0}%)",
            risk_level.emoji(),
            risk_level,
            confidence * 100.0
        ),
        SignalOutcome::Abstained { reason } => format!("⏸️ abstained: {}", reason),
        SignalOutcome::Errored { reason } => format!("❌ failed: {}", reason),
    }
}

/// Generate a Markdown report of the pipeline and cache.
pub fn generate_status_markdown(status: &PipelineStatus) -> String {
    let mut output = String::new();

    output.push_str("# TrialGuard Pipeline Status\n\n");

    output.push_str("## Cache\n\n");
    output.push_str(&format!("- **TTL:** {}s\n", status.ttl_seconds));
    output.push_str(&format!("- **Entries:** {}\n", status.cache.entries_count));
    output.push_str(&format!(
        "- **Computations:** {}\n",
        status.cache.total_executions
    ));
    output.push_str(&format!(
        "- **Hit Rate:** {:.0}% ({} hits, {} misses)\n",
        status.cache.hit_rate * 100.0,
        status.cache.cache_hits,
        status.cache.cache_misses
    ));
    output.push_str(&format!(
        "- **Cycles:** {} completed, {} failed\n",
        status.pipeline.cycles_completed, status.pipeline.cycles_failed
    ));
    output.push_str(&format!(
        "- **Agent Timeout:** {}ms\n\n",
        status.pipeline.agent_timeout_ms
    ));

    output.push_str("## Studies\n\n");
    if status.studies.is_empty() {
        output.push_str("No studies have been analyzed yet.\n\n");
    } else {
        output.push_str("| Study | Risk | Score | DQI | Age | Fresh |\n");
        output.push_str("|:---|:---|:---:|:---:|---:|:---:|\n");
        for study in &status.studies {
            output.push_str(&format!(
                "| {} | {} {} | {:.1} | {:.1} | {:.0}s | {} |\n",
                study.study_id,
                study.risk_level.emoji(),
                study.risk_level,
                study.risk_score,
                study.dqi_score,
                study.cache_age_seconds,
                if study.fresh { "yes" } else { "no" }
            ));
        }
        output.push('\n');
    }

    output.push_str("## Agents\n\n");
    output.push_str("| Agent | Weight |\n");
    output.push_str("|:---|---:|\n");
    for agent in &status.pipeline.agents {
        output.push_str(&format!("| {} | {:+.1} |\n", agent.name, agent.weight));
    }
    output.push('\n');

    output.push_str(&generate_footer());
    output
}

/// Generate a Markdown report of Guardian findings.
pub fn generate_guardian_markdown(status: &GuardianStatus) -> String {
    let mut output = String::new();

    output.push_str("# TrialGuard Guardian Report\n\n");
    output.push_str(&format!(
        "**System Health:** {} {}\n\n",
        status.system_health.emoji(),
        status.system_health
    ));
    output.push_str(&format!(
        "- **Audit Rounds:** {}\n",
        status.rounds_completed
    ));
    if let Some(at) = status.last_audit_at {
        output.push_str(&format!(
            "- **Last Audit:** {}\n",
            at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    output.push_str(&format!(
        "- **Entities:** {} tracked, {} stale, {} critical\n",
        status.tracked_entities, status.stale_entities, status.critical_entities
    ));
    output.push_str(&format!(
        "- **Stuck Studies:** {}\n\n",
        status.stuck_studies
    ));

    output.push_str("## Integrity Alerts\n\n");
    if status.integrity_alerts.is_empty() {
        output.push_str("No integrity alerts. 🎉\n\n");
    } else {
        for event in &status.integrity_alerts {
            output.push_str(&format!(
                "### [{}] {}: {}\n\n",
                event.severity.to_string().to_uppercase(),
                event.event_type,
                event.entity_id
            ));
            output.push_str(&format!(
                "*{}*\n\n",
                event.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
            ));
            output.push_str(&format!("**Expected:** {}\n\n", event.expected_behavior));
            output.push_str(&format!("**Actual:** {}\n\n", event.actual_behavior));
            output.push_str(&format!(
                "> 💡 **Recommendation:** {}\n\n",
                event.recommendation
            ));
            output.push_str("---\n\n");
        }
    }

    output.push_str("## Agent Performance\n\n");
    if status.agent_performance.is_empty() {
        output.push_str("No agent runs observed yet.\n\n");
    } else {
        output.push_str("| Agent | Signals | Abstention Rate | Error Rate | Avg Confidence | Last Run |\n");
        output.push_str("|:---|:---:|:---:|:---:|:---:|:---|\n");
        for agent in &status.agent_performance {
            output.push_str(&format!(
                "| {} | {} | {:.0}% | {:.0}% | {:.0}% | {} |\n",
                agent.agent_name,
                agent.signals_generated,
                agent.abstention_rate * 100.0,
                agent.error_rate * 100.0,
                agent.average_confidence * 100.0,
                agent
                    .last_run
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string())
            ));
        }
        output.push('\n');
    }

    output.push_str(&generate_footer());
    output
}

/// Generate the report footer.
fn generate_footer() -> String {
    format!(
        "---\n\n*Report generated by TrialGuard v{}*\n",
        env!("CARGO_PKG_VERSION")
    )
}

/// Serialize any report payload as pretty JSON.
pub fn generate_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(Into::into)
}

/// JSON for one served analysis, including cache metadata.
pub fn generate_analysis_json(served: &Served) -> Result<String> {
    generate_json(&ServedView {
        cached: served.cached,
        cache_age_seconds: served.cache_age_seconds,
        result: &served.result,
    })
}

/// Write rendered output to a file.
pub fn write_output(content: &str, path: &Path) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Evidence, RiskLevel};
    use crate::testing::{epoch, result_with_signals};
    use std::sync::Arc;

    fn create_test_served() -> Served {
        let signals = vec![
            Signal::voted("safety", RiskLevel::Critical, 0.95, 3.0).with_evidence(vec![Evidence {
                feature: "sae_rate".to_string(),
                value: 0.12,
                threshold: Some(0.05),
                severity: RiskLevel::Critical,
            }]),
            Signal::abstained("coding", 1.2, "no coded terms"),
            Signal::errored("edc_quality", 1.2, "timeout"),
        ];

        Served {
            result: Arc::new(result_with_signals("STUDY-001", epoch(), signals)),
            cached: true,
            cache_age_seconds: 12.0,
        }
    }

    #[test]
    fn test_generate_analysis_markdown() {
        let markdown = generate_analysis_markdown(&create_test_served());

        assert!(markdown.contains("# TrialGuard Analysis: STUDY-001"));
        assert!(markdown.contains("## Consensus"));
        assert!(markdown.contains("## Data Quality Index"));
        assert!(markdown.contains("## Agent Signals"));
        assert!(markdown.contains("yes (12s old)"));
        assert!(markdown.contains("abstained: no coded terms"));
        assert!(markdown.contains("failed: timeout"));
        assert!(markdown.contains("sae_rate = 0.12 (threshold 0.05)"));
        assert!(markdown.contains("scored as 0"));
    }

    #[test]
    fn test_generate_analysis_json_carries_cache_metadata() {
        let json = generate_analysis_json(&create_test_served()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["cached"], true);
        assert_eq!(value["cache_age_seconds"], 12.0);
        assert_eq!(value["study_id"], "STUDY-001");
        assert_eq!(value["consensus"]["risk_level"], "Critical");
        assert_eq!(value["signals"][1]["status"], "abstained");
    }

    #[test]
    fn test_signal_outcome_descriptions() {
        let voted = Signal::voted("safety", RiskLevel::High, 0.5, 3.0);
        assert_eq!(describe_outcome(&voted), "🟠 High (50%)");
    }

    #[test]
    fn test_write_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.md");
        write_output("# Report\n", &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Report\n");
    }
}
