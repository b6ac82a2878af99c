//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::RiskLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// TrialGuard - consensus risk engine for clinical trial studies
///
/// Fuses independent agent signals into one risk decision per study,
/// scores data quality, and audits pipeline integrity.
///
/// Examples:
///   trialguard --feed study_feed.json analyze STUDY-001
///   trialguard --feed study_feed.json analyze STUDY-001 --format json
///   trialguard --feed study_feed.json refresh-all --fail-on high
///   trialguard --feed study_feed.json guardian --rounds 3
///   trialguard init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Study feed file (JSON)
    ///
    /// Overrides `general.feed` from the config file.
    #[arg(long, global = true, value_name = "FILE", env = "TRIALGUARD_FEED")]
    pub feed: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .trialguard.toml in the current directory
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Cache TTL in seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub ttl: Option<u64>,

    /// Per-agent timeout in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    pub agent_timeout_ms: Option<u64>,

    /// Enrich explanations through the Ollama summarizer
    #[arg(long, global = true)]
    pub summarize: bool,

    /// Output format (markdown, json)
    #[arg(long, global = true, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Write the report to a file instead of stdout
    #[arg(short, long, global = true, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Fail if a consensus risk at or above this level is found
    ///
    /// Useful for CI pipelines. Exit code 3 when threshold is reached.
    /// Values: critical, high, medium, low
    #[arg(long, global = true, value_name = "LEVEL")]
    pub fail_on: Option<FailOnLevel>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Analyze one study
    Analyze {
        /// Study identifier
        study_id: String,

        /// Recompute even if a fresh result is cached
        #[arg(long)]
        refresh: bool,
    },

    /// Recompute every study in the feed
    RefreshAll,

    /// Show pipeline, cache and Guardian status
    Status,

    /// Run Guardian integrity audits
    Guardian {
        /// Number of audit rounds, one per configured interval
        #[arg(long, default_value = "1", value_name = "COUNT")]
        rounds: u32,

        /// Keep auditing until interrupted (Ctrl-C)
        #[arg(long, conflicts_with = "rounds")]
        watch: bool,
    },

    /// Generate a default .trialguard.toml configuration file
    InitConfig,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Risk level for --fail-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum FailOnLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl FailOnLevel {
    /// True if a decision at `level` reaches this threshold. Unknown never does.
    pub fn is_reached_by(&self, level: RiskLevel) -> bool {
        let threshold = match self {
            FailOnLevel::Low => RiskLevel::Low,
            FailOnLevel::Medium => RiskLevel::Medium,
            FailOnLevel::High => RiskLevel::High,
            FailOnLevel::Critical => RiskLevel::Critical,
        };
        level != RiskLevel::Unknown && level >= threshold
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.command == Command::InitConfig {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.ttl == Some(0) {
            return Err("TTL must be at least 1 second".to_string());
        }

        if self.agent_timeout_ms == Some(0) {
            return Err("Agent timeout must be at least 1ms".to_string());
        }

        if let Command::Analyze { study_id, .. } = &self.command {
            if study_id.trim().is_empty() {
                return Err("Study identifier must not be empty".to_string());
            }
        }

        if let Command::Guardian { rounds: 0, watch: false } = self.command {
            return Err("Guardian rounds must be at least 1".to_string());
        }

        if let Some(ref feed) = self.feed {
            if !feed.exists() {
                return Err(format!("Feed file does not exist: {}", feed.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args(command: Command) -> Args {
        Args {
            command,
            feed: None,
            config: None,
            ttl: None,
            agent_timeout_ms: None,
            summarize: false,
            format: OutputFormat::Markdown,
            output: None,
            fail_on: None,
            verbose: false,
            quiet: false,
        }
    }

    fn analyze() -> Command {
        Command::Analyze {
            study_id: "STUDY-001".to_string(),
            refresh: false,
        }
    }

    #[test]
    fn test_parse_subcommands() {
        let args = Args::try_parse_from([
            "trialguard",
            "--feed",
            "feed.json",
            "analyze",
            "STUDY-001",
            "--refresh",
            "--format",
            "json",
        ])
        .unwrap();

        assert_eq!(
            args.command,
            Command::Analyze {
                study_id: "STUDY-001".to_string(),
                refresh: true
            }
        );
        assert_eq!(args.format, OutputFormat::Json);
        assert_eq!(args.feed, Some(PathBuf::from("feed.json")));

        let args = Args::try_parse_from(["trialguard", "guardian", "--rounds", "3"]).unwrap();
        assert_eq!(
            args.command,
            Command::Guardian {
                rounds: 3,
                watch: false
            }
        );
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args(analyze());
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_durations() {
        let mut args = make_args(analyze());
        args.ttl = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args(analyze());
        args.agent_timeout_ms = Some(0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_missing_feed() {
        let mut args = make_args(Command::Status);
        args.feed = Some(PathBuf::from("/definitely/not/here.json"));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_init_config_skips_validation() {
        let mut args = make_args(Command::InitConfig);
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_fail_on_threshold() {
        assert!(FailOnLevel::High.is_reached_by(RiskLevel::Critical));
        assert!(FailOnLevel::High.is_reached_by(RiskLevel::High));
        assert!(!FailOnLevel::High.is_reached_by(RiskLevel::Medium));
        assert!(!FailOnLevel::Low.is_reached_by(RiskLevel::Unknown));
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args(Command::Status);
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
