//! Configuration file handling.
//!
//! This module handles loading, merging and validating configuration from
//! `.trialguard.toml` files.

use crate::analysis::DqiWeights;
use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".trialguard.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Result cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Agent roster.
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentSpec>,

    /// DQI settings.
    #[serde(default)]
    pub dqi: DqiConfig,

    /// Guardian monitor settings.
    #[serde(default)]
    pub guardian: GuardianConfig,

    /// Optional explanation summarizer.
    #[serde(default)]
    pub summarizer: SummarizerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            cache: CacheConfig::default(),
            pipeline: PipelineConfig::default(),
            agents: default_agents(),
            dqi: DqiConfig::default(),
            guardian: GuardianConfig::default(),
            summarizer: SummarizerConfig::default(),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Study feed file.
    #[serde(default = "default_feed")]
    pub feed: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            feed: default_feed(),
        }
    }
}

fn default_feed() -> PathBuf {
    PathBuf::from("study_feed.json")
}

/// Result cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a cached analysis is served without recomputation.
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
        }
    }
}

fn default_ttl() -> u64 {
    45
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Fan-out / fan-in settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Per-agent deadline.
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_ms: u64,

    /// Contributors quoted on each decision.
    #[serde(default = "default_top_contributors")]
    pub top_contributors: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            agent_timeout_ms: default_agent_timeout(),
            top_contributors: default_top_contributors(),
        }
    }
}

fn default_agent_timeout() -> u64 {
    5000
}

fn default_top_contributors() -> usize {
    3
}

impl PipelineConfig {
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }
}

/// One agent in the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    /// Signed voting weight. Negative for stabilizing agents.
    pub weight: f64,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

fn default_agents() -> Vec<AgentSpec> {
    vec![
        AgentSpec::new("safety", 3.0),
        AgentSpec::new("completeness", 1.5),
        AgentSpec::new("coding", 1.2),
        AgentSpec::new("query_quality", 1.5),
        AgentSpec::new("edc_quality", 1.2),
        AgentSpec::new("temporal_drift", 1.0),
        AgentSpec::new("stability", -1.5),
    ]
}

/// DQI settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DqiConfig {
    #[serde(default)]
    pub weights: DqiWeights,
}

/// Guardian monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianConfig {
    /// Seconds between audit rounds.
    #[serde(default = "default_guardian_interval")]
    pub interval_seconds: u64,

    /// Days without update after which an entity is stale.
    #[serde(default = "default_stale_after")]
    pub stale_after_days: f64,

    /// Days without update after which an entity is critical.
    #[serde(default = "default_critical_after")]
    pub critical_after_days: f64,

    /// Maximum events kept in the log.
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Events older than this are pruned.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Share of failed agents in one run that raises an alert.
    #[serde(default = "default_failure_spike_ratio")]
    pub failure_spike_ratio: f64,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_guardian_interval(),
            stale_after_days: default_stale_after(),
            critical_after_days: default_critical_after(),
            max_events: default_max_events(),
            retention_days: default_retention_days(),
            failure_spike_ratio: default_failure_spike_ratio(),
        }
    }
}

fn default_guardian_interval() -> u64 {
    60
}

fn default_stale_after() -> f64 {
    1.0
}

fn default_critical_after() -> f64 {
    7.0
}

fn default_max_events() -> usize {
    1000
}

fn default_retention_days() -> u32 {
    30
}

fn default_failure_spike_ratio() -> f64 {
    0.5
}

impl GuardianConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// Ollama-backed explanation summarizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_summarizer_timeout")]
    pub timeout_ms: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ollama_url: default_ollama_url(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_ms: default_summarizer_timeout(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_summarizer_timeout() -> u64 {
    10_000
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings when given.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref feed) = args.feed {
            self.general.feed = feed.clone();
        }

        if let Some(ttl) = args.ttl {
            self.cache.ttl_seconds = ttl;
        }

        if let Some(timeout) = args.agent_timeout_ms {
            self.pipeline.agent_timeout_ms = timeout;
        }

        if args.summarize {
            self.summarizer.enabled = true;
        }
    }

    /// Check every startup invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dqi.weights.validate()?;

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(ConfigError::EmptyAgentName);
            }
            if !agent.weight.is_finite() {
                return Err(ConfigError::InvalidAgentWeight(agent.name.clone()));
            }
            if !seen.insert(agent.name.as_str()) {
                return Err(ConfigError::DuplicateAgent(agent.name.clone()));
            }
        }

        if self.cache.ttl_seconds == 0 {
            return Err(ConfigError::setting("cache.ttl_seconds", "must be at least 1"));
        }
        if self.pipeline.agent_timeout_ms == 0 {
            return Err(ConfigError::setting(
                "pipeline.agent_timeout_ms",
                "must be at least 1",
            ));
        }
        if self.guardian.interval_seconds == 0 {
            return Err(ConfigError::setting(
                "guardian.interval_seconds",
                "must be at least 1",
            ));
        }
        if !(self.guardian.stale_after_days > 0.0
            && self.guardian.critical_after_days > self.guardian.stale_after_days)
        {
            return Err(ConfigError::setting(
                "guardian.critical_after_days",
                "must be greater than stale_after_days, which must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.guardian.failure_spike_ratio) {
            return Err(ConfigError::setting(
                "guardian.failure_spike_ratio",
                "must be between 0.0 and 1.0",
            ));
        }

        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache.ttl_seconds, 45);
        assert_eq!(config.agents.len(), 7);
        assert!(config.agents.iter().any(|a| a.name == "stability" && a.weight < 0.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[cache]
ttl_seconds = 30

[pipeline]
agent_timeout_ms = 250

[[agents]]
name = "safety"
weight = 3.0

[[agents]]
name = "stability"
weight = -1.5

[dqi.weights]
safety = 40
timeliness = 0

[guardian]
interval_seconds = 5
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.cache.ttl_seconds, 30);
        assert_eq!(config.pipeline.agent_timeout_ms, 250);
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.dqi.weights.safety, 40.0);
        assert_eq!(config.dqi.weights.compliance, 25.0);
        assert_eq!(config.guardian.interval_seconds, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_weights() {
        let mut config = Config::default();
        config.dqi.weights.safety = 50.0;
        assert_eq!(config.validate(), Err(ConfigError::WeightSum(115.0)));
    }

    #[test]
    fn test_validate_rejects_duplicate_agents() {
        let mut config = Config::default();
        config.agents.push(AgentSpec::new("safety", 1.0));
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateAgent("safety".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let mut config = Config::default();
        config.cache.ttl_seconds = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSetting { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[cache]\nttl_seconds = 12\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.cache.ttl_seconds, 12);
        assert_eq!(config.agents.len(), 7);
    }

    #[test]
    fn test_merge_with_args() {
        use clap::Parser;

        let args = crate::cli::Args::try_parse_from([
            "trialguard",
            "--ttl",
            "10",
            "--agent-timeout-ms",
            "750",
            "--summarize",
            "status",
        ])
        .unwrap();

        let mut config = Config::default();
        config.merge_with_args(&args);
        assert_eq!(config.cache.ttl_seconds, 10);
        assert_eq!(config.pipeline.agent_timeout_ms, 750);
        assert!(config.summarizer.enabled);
        assert_eq!(config.general.feed, default_feed());
    }

    #[test]
    fn test_general_section_only_carries_feed() {
        // Verbosity comes from --verbose only; an old `verbose` key is ignored.
        let config: Config =
            toml::from_str("[general]\nfeed = \"trial.json\"\nverbose = true\n").unwrap();
        assert_eq!(config.general.feed, PathBuf::from("trial.json"));

        let rendered = Config::default_toml();
        assert!(!rendered.contains("verbose"));
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[cache]"));
        assert!(toml_str.contains("[[agents]]"));
        assert!(toml_str.contains("safety = 35.0"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert!(parsed.validate().is_ok());
    }
}
