//! TrialGuard - consensus risk engine for clinical trial studies
//!
//! A CLI that analyzes studies from a JSON study feed, renders Markdown
//! or JSON reports and runs Guardian integrity audits.
//!
//! Exit codes:
//!   0 - Success (no risk above threshold, or no --fail-on set)
//!   1 - Runtime error (config, feed, source failure, etc.)
//!   2 - Study not found
//!   3 - Consensus risk at or above the --fail-on threshold

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use trialguard::cli::{Args, Command, OutputFormat};
use trialguard::config::{Config, CONFIG_FILE};
use trialguard::models::RiskLevel;
use trialguard::source::FeedSource;
use trialguard::{report, Engine};

const EXIT_NOT_FOUND: i32 = 2;
const EXIT_FAIL_ON: i32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if args.command == Command::InitConfig {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("TrialGuard v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle init-config: generate a default .trialguard.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to customize agents, weights, TTL and Guardian thresholds.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
///
/// `RUST_LOG` takes precedence when set. Logs go to stderr so reports on
/// stdout stay clean.
fn init_logging(args: &Args) {
    let level = args.log_level();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Build the engine and dispatch the subcommand. Returns the exit code.
async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let feed = FeedSource::load(&config.general.feed).with_context(|| {
        format!(
            "Failed to load study feed {}",
            config.general.feed.display()
        )
    })?;
    let feed = Arc::new(feed);
    let engine =
        Engine::from_feed(&config, Arc::clone(&feed)).context("Invalid configuration")?;

    match &args.command {
        Command::Analyze { study_id, refresh } => {
            handle_analyze(&engine, &args, study_id, *refresh).await
        }
        Command::RefreshAll => handle_refresh_all(&engine, &args).await,
        Command::Status => handle_status(&engine, &args).await,
        Command::Guardian { rounds, watch } => {
            handle_guardian(&engine, &feed, &args, &config, *rounds, *watch).await
        }
        Command::InitConfig => handle_init_config().map(|_| 0),
    }
}

async fn handle_analyze(engine: &Engine, args: &Args, study_id: &str, refresh: bool) -> Result<i32> {
    let served = if refresh {
        engine.refresh(study_id).await
    } else {
        engine.get(study_id).await
    };

    let served = match served {
        Ok(served) => served,
        Err(e) if e.is_not_found() => {
            eprintln!("❌ {}", e);
            return Ok(EXIT_NOT_FOUND);
        }
        Err(e) => return Err(e.into()),
    };

    let output = match args.format {
        OutputFormat::Json => report::generate_analysis_json(&served)?,
        OutputFormat::Markdown => report::generate_analysis_markdown(&served),
    };
    emit(args, &output)?;

    Ok(fail_on_exit_code(args, &[served.result.consensus.risk_level]))
}

async fn handle_refresh_all(engine: &Engine, args: &Args) -> Result<i32> {
    refresh_everything(engine, args).await?;

    let status = engine.status().await;
    let output = match args.format {
        OutputFormat::Json => report::generate_json(&status)?,
        OutputFormat::Markdown => report::generate_status_markdown(&status),
    };
    emit(args, &output)?;

    let levels: Vec<RiskLevel> = status.studies.iter().map(|s| s.risk_level).collect();
    Ok(fail_on_exit_code(args, &levels))
}

async fn handle_status(engine: &Engine, args: &Args) -> Result<i32> {
    refresh_everything(engine, args).await?;
    engine.guardian().audit_once().await;

    let status = engine.status().await;
    let guardian = engine.guardian_status().await;

    let output = match args.format {
        OutputFormat::Json => report::generate_json(&serde_json::json!({
            "pipeline": status,
            "guardian": guardian,
        }))?,
        OutputFormat::Markdown => format!(
            "{}\n{}",
            report::generate_status_markdown(&status),
            report::generate_guardian_markdown(&guardian)
        ),
    };
    emit(args, &output)?;

    let levels: Vec<RiskLevel> = status.studies.iter().map(|s| s.risk_level).collect();
    Ok(fail_on_exit_code(args, &levels))
}

async fn handle_guardian(
    engine: &Engine,
    feed: &FeedSource,
    args: &Args,
    config: &Config,
    rounds: u32,
    watch: bool,
) -> Result<i32> {
    refresh_everything(engine, args).await?;

    if watch {
        let handle = engine.start_guardian();
        println!(
            "🛡️  Guardian running every {}s. Press Ctrl-C to stop.",
            config.guardian.interval_seconds
        );
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        handle.stop().await;
    } else {
        for round in 1..=rounds {
            if round > 1 {
                tokio::time::sleep(config.guardian.interval()).await;
                feed.reload().await.context("Failed to reload study feed")?;
                refresh_everything(engine, args).await?;
            }
            engine.guardian().audit_once().await;
        }
    }

    let status = engine.guardian_status().await;
    let output = match args.format {
        OutputFormat::Json => report::generate_json(&status)?,
        OutputFormat::Markdown => report::generate_guardian_markdown(&status),
    };
    emit(args, &output)?;

    Ok(0)
}

/// Refresh every study in the feed, with a progress bar unless quiet.
async fn refresh_everything(engine: &Engine, args: &Args) -> Result<()> {
    let queued = engine.refresh_all().await?;

    let progress_bar = if args.quiet {
        None
    } else {
        let pb = ProgressBar::new(queued.queued_count as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} studies")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    };

    let summary = queued
        .wait_with(|_| {
            if let Some(ref pb) = progress_bar {
                pb.inc(1);
            }
        })
        .await;

    if let Some(pb) = progress_bar {
        pb.finish_with_message("Refresh complete");
    }

    if summary.failed > 0 {
        warn!(
            "{} of {} studies failed to refresh",
            summary.failed,
            summary.succeeded + summary.failed
        );
    }
    info!("Refreshed {} studies", summary.succeeded);
    Ok(())
}

/// Print the report, or save it when --output is given.
fn emit(args: &Args, content: &str) -> Result<()> {
    match args.output {
        Some(ref path) => {
            report::write_output(content, path)?;
            if !args.quiet {
                println!("✅ Report saved to: {}", path.display());
            }
        }
        None => println!("{}", content),
    }
    Ok(())
}

/// Exit code for --fail-on given the consensus levels found.
fn fail_on_exit_code(args: &Args, levels: &[RiskLevel]) -> i32 {
    let Some(threshold) = args.fail_on else {
        return 0;
    };

    if levels.iter().any(|level| threshold.is_reached_by(*level)) {
        eprintln!(
            "\n⛔ Consensus risk at or above {:?} found. Failing (exit code {}).",
            threshold, EXIT_FAIL_ON
        );
        EXIT_FAIL_ON
    } else {
        0
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
