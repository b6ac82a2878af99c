//! Data models for the risk engine.
//!
//! This module contains the core data structures shared by the consensus
//! engine, the DQI scorer, the result cache and the Guardian monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Risk level of a signal or decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    /// Low risk - study is on track
    Low,
    /// Medium risk - watch closely
    Medium,
    /// High risk - intervention recommended
    High,
    /// Critical risk - immediate escalation
    Critical,
    /// No agent was able to vote
    Unknown,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "Low"),
            RiskLevel::Medium => write!(f, "Medium"),
            RiskLevel::High => write!(f, "High"),
            RiskLevel::Critical => write!(f, "Critical"),
            RiskLevel::Unknown => write!(f, "Unknown"),
        }
    }
}

impl RiskLevel {
    /// Returns an emoji representation of the risk level.
    pub fn emoji(&self) -> &'static str {
        match self {
            RiskLevel::Low => "🟢",
            RiskLevel::Medium => "🟡",
            RiskLevel::High => "🟠",
            RiskLevel::Critical => "🔴",
            RiskLevel::Unknown => "⚪",
        }
    }

    /// Signed severity used for voting. `Unknown` cannot vote.
    ///
    /// Critical=+2, High=+1, Medium=0, Low=-1.
    pub fn severity(&self) -> Option<f64> {
        match self {
            RiskLevel::Critical => Some(2.0),
            RiskLevel::High => Some(1.0),
            RiskLevel::Medium => Some(0.0),
            RiskLevel::Low => Some(-1.0),
            RiskLevel::Unknown => None,
        }
    }
}

impl From<&str> for RiskLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "low" => RiskLevel::Low,
            "medium" => RiskLevel::Medium,
            "high" => RiskLevel::High,
            "critical" => RiskLevel::Critical,
            _ => RiskLevel::Unknown,
        }
    }
}

/// One piece of evidence behind a signal. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub feature: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    pub severity: RiskLevel,
}

/// What an agent said about a study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignalOutcome {
    /// The agent cast a vote.
    Voted { risk_level: RiskLevel, confidence: f64 },
    /// The agent declined to vote (insufficient data).
    Abstained { reason: String },
    /// The agent failed or timed out.
    Errored { reason: String },
}

/// A signal produced by one agent for one study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Unique, stable agent identifier.
    pub agent_name: String,
    /// Vote, abstention or failure.
    #[serde(flatten)]
    pub outcome: SignalOutcome,
    /// Signed voting power. Negative for stabilizing agents.
    pub weight: f64,
    /// Wall time spent producing the signal.
    pub processing_time_ms: f64,
    /// Evidence passed through from the agent.
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

impl Signal {
    /// Creates a voting signal. Confidence is clamped to [0, 1].
    pub fn voted(
        agent_name: impl Into<String>,
        risk_level: RiskLevel,
        confidence: f64,
        weight: f64,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            outcome: SignalOutcome::Voted {
                risk_level,
                confidence: clamp_unit(confidence),
            },
            weight,
            processing_time_ms: 0.0,
            evidence: Vec::new(),
        }
    }

    /// Creates an abstaining signal.
    pub fn abstained(agent_name: impl Into<String>, weight: f64, reason: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            outcome: SignalOutcome::Abstained {
                reason: reason.into(),
            },
            weight,
            processing_time_ms: 0.0,
            evidence: Vec::new(),
        }
    }

    /// Creates a failed signal.
    pub fn errored(agent_name: impl Into<String>, weight: f64, reason: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            outcome: SignalOutcome::Errored {
                reason: reason.into(),
            },
            weight,
            processing_time_ms: 0.0,
            evidence: Vec::new(),
        }
    }

    pub fn with_processing_time(mut self, ms: f64) -> Self {
        self.processing_time_ms = ms.max(0.0);
        self
    }

    pub fn with_evidence(mut self, evidence: Vec<Evidence>) -> Self {
        self.evidence = evidence;
        self
    }

    /// The voted risk level, if the agent voted.
    pub fn risk_level(&self) -> Option<RiskLevel> {
        match self.outcome {
            SignalOutcome::Voted { risk_level, .. } => Some(risk_level),
            _ => None,
        }
    }

    /// The vote confidence, if the agent voted.
    pub fn confidence(&self) -> Option<f64> {
        match self.outcome {
            SignalOutcome::Voted { confidence, .. } => Some(confidence),
            _ => None,
        }
    }

    pub fn abstained_flag(&self) -> bool {
        matches!(self.outcome, SignalOutcome::Abstained { .. })
    }

    /// Failure reason, if the agent failed.
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            SignalOutcome::Errored { reason } => Some(reason),
            _ => None,
        }
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Counts of agent outcomes in one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub abstained: usize,
}

impl SignalSummary {
    /// Creates a summary from a list of signals.
    pub fn from_signals(signals: &[Signal]) -> Self {
        let mut summary = Self::default();

        for signal in signals {
            match signal.outcome {
                SignalOutcome::Voted { .. } => summary.succeeded += 1,
                SignalOutcome::Abstained { .. } => summary.abstained += 1,
                SignalOutcome::Errored { .. } => summary.failed += 1,
            }
        }

        summary
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.abstained
    }
}

/// An agent's share of the final vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub agent_name: String,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub contribution: f64,
}

/// The fused risk verdict for a study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusDecision {
    pub risk_level: RiskLevel,
    /// 0.0 - 1.0
    pub confidence: f64,
    /// 0 - 100
    pub risk_score: f64,
    pub recommended_action: String,
    pub explanation: String,
    /// Number of signals that took part in the vote.
    pub voting_agents: usize,
    /// Strongest contributors, strongest first.
    pub top_contributors: Vec<Contribution>,
}

/// Data quality dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Safety,
    Compliance,
    Completeness,
    Operations,
    Timeliness,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Safety,
        Dimension::Compliance,
        Dimension::Completeness,
        Dimension::Operations,
        Dimension::Timeliness,
    ];
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Safety => write!(f, "Safety"),
            Dimension::Compliance => write!(f, "Compliance"),
            Dimension::Completeness => write!(f, "Completeness"),
            Dimension::Operations => write!(f, "Operations"),
            Dimension::Timeliness => write!(f, "Timeliness"),
        }
    }
}

/// Raw input for one DQI dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionInput {
    pub raw_score: f64,
    #[serde(default)]
    pub contributing_features: Vec<String>,
}

impl DimensionInput {
    pub fn new(raw_score: f64) -> Self {
        Self {
            raw_score,
            contributing_features: Vec::new(),
        }
    }
}

/// Per-dimension inputs for one study.
pub type DimensionInputs = BTreeMap<Dimension, DimensionInput>;

/// DQI band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DqiBand {
    Green,
    Amber,
    Orange,
    Red,
}

impl DqiBand {
    pub fn risk_level(&self) -> RiskLevel {
        match self {
            DqiBand::Green => RiskLevel::Low,
            DqiBand::Amber => RiskLevel::Medium,
            DqiBand::Orange => RiskLevel::High,
            DqiBand::Red => RiskLevel::Critical,
        }
    }
}

impl fmt::Display for DqiBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DqiBand::Green => write!(f, "Green"),
            DqiBand::Amber => write!(f, "Amber"),
            DqiBand::Orange => write!(f, "Orange"),
            DqiBand::Red => write!(f, "Red"),
        }
    }
}

/// Score breakdown for one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub raw_score: f64,
    pub weight: f64,
    pub weighted_score: f64,
    pub contributing_features: Vec<String>,
}

/// The Data Quality Index for a study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DqiScore {
    /// 0 - 100
    pub overall_score: f64,
    pub risk_level: RiskLevel,
    /// Band label the score reached.
    pub threshold_met: String,
    pub band: DqiBand,
    pub dimension_scores: BTreeMap<Dimension, DimensionScore>,
    /// Dimensions that had no input and were scored as 0.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_dimensions: Vec<Dimension>,
}

/// Immutable snapshot of one full analysis cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub study_id: String,
    pub timestamp: DateTime<Utc>,
    pub signals: Vec<Signal>,
    pub consensus: ConsensusDecision,
    pub dqi: DqiScore,
    pub agents_succeeded: usize,
    pub agents_failed: usize,
    pub agents_abstained: usize,
    pub processing_time_ms: f64,
    /// Digest of the study data and roster the cycle read.
    pub input_fingerprint: String,
    /// When the source data behind this result last changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_updated_at: Option<DateTime<Utc>>,
}

impl AnalysisResult {
    /// Look up one agent's signal.
    pub fn signal(&self, agent_name: &str) -> Option<&Signal> {
        self.signals.iter().find(|s| s.agent_name == agent_name)
    }

    /// Signals sorted by agent name.
    pub fn sorted_signals(&self) -> Vec<&Signal> {
        let mut signals: Vec<&Signal> = self.signals.iter().collect();
        signals.sort_by(|a, b| a.agent_name.cmp(&b.agent_name));
        signals
    }
}

/// Kind of integrity anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityEventType {
    /// Entity has not been updated recently.
    StaleData,
    /// Same inputs, different outputs across consecutive runs.
    NonDeterministicOutput,
    /// Recomputation keeps running on unchanged, stale source data.
    StuckRecomputation,
    /// Too many agents failed in one run.
    AgentFailureSpike,
}

impl fmt::Display for IntegrityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityEventType::StaleData => write!(f, "Stale Data"),
            IntegrityEventType::NonDeterministicOutput => write!(f, "Non-deterministic Output"),
            IntegrityEventType::StuckRecomputation => write!(f, "Stuck Recomputation"),
            IntegrityEventType::AgentFailureSpike => write!(f, "Agent Failure Spike"),
        }
    }
}

/// Severity of an integrity event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    High,
    Critical,
}

impl fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventSeverity::Info => write!(f, "info"),
            EventSeverity::Warning => write!(f, "warning"),
            EventSeverity::High => write!(f, "high"),
            EventSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// A Guardian-raised record of a detected anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityEvent {
    pub event_id: uuid::Uuid,
    pub event_type: IntegrityEventType,
    pub severity: EventSeverity,
    pub entity_id: String,
    pub expected_behavior: String,
    pub actual_behavior: String,
    pub recommendation: String,
    pub timestamp: DateTime<Utc>,
}
