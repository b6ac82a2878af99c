//! Weighted, confidence-scaled consensus voting.
//!
//! Every voting signal contributes `severity * confidence * weight`; the
//! weighted average over `|weight|` is mapped onto a 0-100 risk score and
//! bucketed into a risk level. Abstained and failed signals never vote.

use crate::models::{Contribution, ConsensusDecision, RiskLevel, Signal, SignalOutcome, SignalSummary};
use std::cmp::Ordering;
use tracing::debug;

/// Score at or above which the decision is Critical.
pub const CRITICAL_THRESHOLD: f64 = 75.0;
/// Score at or above which the decision is High.
pub const HIGH_THRESHOLD: f64 = 50.0;
/// Score at or above which the decision is Medium.
pub const MEDIUM_THRESHOLD: f64 = 25.0;

/// Number of contributors kept on the decision.
const DEFAULT_TOP_CONTRIBUTORS: usize = 3;

/// Maps a raw weighted severity onto [0, 100].
///
/// Low (-1) maps to 0 and Critical (+2) to 100, so a unanimous vote at
/// full confidence lands every level inside its own band.
pub fn normalize_raw_score(raw: f64) -> f64 {
    ((raw + 1.0) / 3.0 * 100.0).clamp(0.0, 100.0)
}

/// Buckets a 0-100 risk score into a level.
pub fn level_for_score(score: f64) -> RiskLevel {
    if score >= CRITICAL_THRESHOLD {
        RiskLevel::Critical
    } else if score >= HIGH_THRESHOLD {
        RiskLevel::High
    } else if score >= MEDIUM_THRESHOLD {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Fuses agent signals into a single decision.
#[derive(Debug, Clone)]
pub struct ConsensusEngine {
    top_contributors: usize,
}

impl Default for ConsensusEngine {
    fn default() -> Self {
        Self {
            top_contributors: DEFAULT_TOP_CONTRIBUTORS,
        }
    }
}

impl ConsensusEngine {
    pub fn new(top_contributors: usize) -> Self {
        Self {
            top_contributors: top_contributors.max(1),
        }
    }

    /// Compute the consensus decision for a set of signals.
    pub fn compute(&self, signals: &[Signal]) -> ConsensusDecision {
        let mut contributions = Vec::new();
        let mut total_weight = 0.0;
        let mut weighted_confidence = 0.0;

        for signal in signals {
            let SignalOutcome::Voted {
                risk_level,
                confidence,
            } = signal.outcome
            else {
                continue;
            };
            let Some(severity) = risk_level.severity() else {
                debug!("Agent {} voted without a risk level, ignoring", signal.agent_name);
                continue;
            };
            if !signal.weight.is_finite() {
                continue;
            }

            let abs_weight = signal.weight.abs();
            total_weight += abs_weight;
            weighted_confidence += confidence * abs_weight;
            contributions.push(Contribution {
                agent_name: signal.agent_name.clone(),
                risk_level,
                confidence,
                contribution: severity * confidence * signal.weight,
            });
        }

        let summary = SignalSummary::from_signals(signals);

        if contributions.is_empty() || total_weight <= 0.0 {
            return no_quorum(&summary);
        }

        let raw: f64 = contributions.iter().map(|c| c.contribution).sum::<f64>() / total_weight;
        let risk_score = normalize_raw_score(raw);
        let risk_level = level_for_score(risk_score);
        let confidence = (weighted_confidence / total_weight).clamp(0.0, 1.0);
        let voting_agents = contributions.len();

        rank_contributions(&mut contributions);
        contributions.truncate(self.top_contributors);

        debug!(
            "Consensus: raw={:.3} score={:.1} level={} confidence={:.2}",
            raw, risk_score, risk_level, confidence
        );

        ConsensusDecision {
            risk_level,
            confidence,
            risk_score,
            recommended_action: recommended_action(risk_level, contributions.first()),
            explanation: explain(risk_level, risk_score, confidence, voting_agents, &contributions, &summary),
            voting_agents,
            top_contributors: contributions,
        }
    }
}

/// Sort contributions by absolute magnitude, then agent name.
pub fn rank_contributions(contributions: &mut [Contribution]) {
    contributions.sort_by(|a, b| {
        b.contribution
            .abs()
            .partial_cmp(&a.contribution.abs())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.agent_name.cmp(&b.agent_name))
    });
}

fn no_quorum(summary: &SignalSummary) -> ConsensusDecision {
    ConsensusDecision {
        risk_level: RiskLevel::Unknown,
        confidence: 0.0,
        risk_score: 0.0,
        recommended_action: "Collect more data before drawing a risk conclusion".to_string(),
        explanation: format!(
            "No agents voted: {} abstained, {} failed.",
            summary.abstained, summary.failed
        ),
        voting_agents: 0,
        top_contributors: Vec::new(),
    }
}

fn recommended_action(level: RiskLevel, top: Option<&Contribution>) -> String {
    let base = match level {
        RiskLevel::Critical => "Escalate to the study lead and open a corrective action plan",
        RiskLevel::High => "Schedule a targeted review with the site teams",
        RiskLevel::Medium => "Monitor closely at the next data review",
        RiskLevel::Low | RiskLevel::Unknown => "Continue routine monitoring",
    };

    match top {
        Some(c) if c.contribution != 0.0 && level != RiskLevel::Low => {
            format!("{}, starting with {} findings", base, c.agent_name)
        }
        _ => base.to_string(),
    }
}

fn explain(
    level: RiskLevel,
    score: f64,
    confidence: f64,
    voting_agents: usize,
    top: &[Contribution],
    summary: &SignalSummary,
) -> String {
    let mut text = format!(
        "{} risk (score {:.1}, confidence {:.0}%) from {} voting agent{}.",
        level,
        score,
        confidence * 100.0,
        voting_agents,
        if voting_agents == 1 { "" } else { "s" }
    );

    if !top.is_empty() {
        let drivers: Vec<String> = top
            .iter()
            .map(|c| {
                format!(
                    "{} ({}, {:.0}% confidence)",
                    c.agent_name,
                    c.risk_level,
                    c.confidence * 100.0
                )
            })
            .collect();
        text.push_str(&format!(" Strongest signals: {}.", drivers.join(", ")));
    }

    if summary.abstained > 0 || summary.failed > 0 {
        text.push_str(&format!(
            " {} abstained, {} failed.",
            summary.abstained, summary.failed
        ));
    }

    text
}
