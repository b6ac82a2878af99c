//! Engine facade.
//!
//! Wires the pipeline, the result cache and the Guardian together and
//! exposes the operations a transport layer needs.

use crate::agent::{OllamaSummarizer, Roster, Summarizer};
use crate::analysis::{ConsensusEngine, DqiScorer};
use crate::cache::{CacheStats, ResultCache, Served};
use crate::clock::{seconds_between, Clock, SystemClock};
use crate::config::Config;
use crate::error::{ConfigError, EngineError};
use crate::guardian::{Guardian, GuardianHandle, GuardianStatus};
use crate::models::RiskLevel;
use crate::pipeline::{Orchestrator, PipelineStats};
use crate::source::{FeedSource, StudySource};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Background refreshes started by [`Engine::refresh_all`].
#[derive(Debug, Serialize)]
pub struct RefreshQueued {
    pub queued_count: usize,
    #[serde(skip)]
    tasks: Vec<JoinHandle<Result<(), EngineError>>>,
}

/// Outcome of a batch of refreshes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RefreshSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl RefreshQueued {
    /// Wait for every queued refresh to finish.
    pub async fn wait(self) -> RefreshSummary {
        self.wait_with(|_| {}).await
    }

    /// Wait for every queued refresh, reporting each completion.
    pub async fn wait_with<F>(self, mut on_done: F) -> RefreshSummary
    where
        F: FnMut(bool),
    {
        let mut summary = RefreshSummary::default();
        for task in self.tasks {
            let ok = match task.await {
                Ok(outcome) => outcome.is_ok(),
                Err(e) => {
                    warn!("Refresh task did not complete: {}", e);
                    false
                }
            };
            if ok {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            on_done(ok);
        }
        summary
    }
}

/// Cache view of one study.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudyCacheStatus {
    pub study_id: String,
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    pub dqi_score: f64,
    pub timestamp: DateTime<Utc>,
    pub cache_age_seconds: f64,
    pub fresh: bool,
}

/// Pipeline status for external reporting.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub ttl_seconds: u64,
    pub cache: CacheStats,
    pub pipeline: PipelineStats,
    pub studies: Vec<StudyCacheStatus>,
}

/// The analysis engine.
#[derive(Clone)]
pub struct Engine {
    cache: ResultCache,
    pipeline: Arc<Orchestrator>,
    guardian: Guardian,
    source: Arc<dyn StudySource>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    /// Build an engine, validating the configuration first.
    pub fn new(
        config: &Config,
        roster: Roster,
        source: Arc<dyn StudySource>,
        summarizer: Option<Arc<dyn Summarizer>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if roster.is_empty() {
            return Err(ConfigError::setting("agents", "at least one agent is required"));
        }

        let mut pipeline = Orchestrator::new(
            roster,
            Arc::clone(&source),
            ConsensusEngine::new(config.pipeline.top_contributors),
            DqiScorer::new(config.dqi.weights.clone())?,
            Arc::clone(&clock),
            config.pipeline.agent_timeout(),
        );
        if let Some(summarizer) = summarizer {
            pipeline = pipeline.with_summarizer(summarizer);
        }

        let cache = ResultCache::new(config.cache.ttl(), Arc::clone(&clock));
        let guardian = Guardian::new(
            config.guardian.clone(),
            Arc::clone(&clock),
            cache.clone(),
            Arc::clone(&source),
        );

        info!(
            "Engine ready: {} agents, TTL {}s, agent timeout {}ms",
            pipeline.roster().len(),
            config.cache.ttl_seconds,
            config.pipeline.agent_timeout_ms
        );

        Ok(Self {
            cache,
            pipeline: Arc::new(pipeline),
            guardian,
            source,
            clock,
        })
    }

    /// Build an engine over a feed file, with feed-backed agents and the
    /// system clock.
    pub fn from_feed(config: &Config, feed: Arc<FeedSource>) -> anyhow::Result<Self> {
        let roster = Roster::from_feed(&config.agents, Arc::clone(&feed))?;

        let summarizer: Option<Arc<dyn Summarizer>> = if config.summarizer.enabled {
            Some(Arc::new(OllamaSummarizer::new(config.summarizer.clone())?))
        } else {
            None
        };

        Ok(Self::new(config, roster, feed, summarizer, Arc::new(SystemClock))?)
    }

    /// Serve a study, recomputing only if the cached result is missing or expired.
    pub async fn get(&self, study_id: &str) -> Result<Served, EngineError> {
        self.serve(study_id, false).await
    }

    /// Recompute a study now, joining a computation already in flight.
    pub async fn refresh(&self, study_id: &str) -> Result<Served, EngineError> {
        self.serve(study_id, true).await
    }

    /// Queue a forced refresh of every known study in the background.
    pub async fn refresh_all(&self) -> Result<RefreshQueued, EngineError> {
        let study_ids = self
            .source
            .study_ids()
            .await
            .map_err(|e| EngineError::Source {
                study_id: "*".to_string(),
                message: e.to_string(),
            })?;

        info!("Queueing refresh of {} studies", study_ids.len());
        let tasks = study_ids
            .into_iter()
            .map(|study_id| {
                let engine = self.clone();
                tokio::spawn(async move {
                    engine.refresh(&study_id).await.map(|_| ()).map_err(|e| {
                        warn!("Refresh of {} failed: {}", study_id, e);
                        e
                    })
                })
            })
            .collect::<Vec<_>>();

        Ok(RefreshQueued {
            queued_count: tasks.len(),
            tasks,
        })
    }

    pub async fn status(&self) -> PipelineStatus {
        let now = self.clock.now();
        let ttl = self.cache.ttl();

        let studies = self
            .cache
            .snapshot()
            .await
            .into_iter()
            .map(|entry| {
                let age = seconds_between(entry.stored_at, now);
                StudyCacheStatus {
                    study_id: entry.key,
                    risk_level: entry.value.consensus.risk_level,
                    risk_score: entry.value.consensus.risk_score,
                    dqi_score: entry.value.dqi.overall_score,
                    timestamp: entry.value.timestamp,
                    cache_age_seconds: age,
                    fresh: age < ttl.as_secs_f64(),
                }
            })
            .collect();

        PipelineStatus {
            ttl_seconds: ttl.as_secs(),
            cache: self.cache.stats().await,
            pipeline: self.pipeline.stats(),
            studies,
        }
    }

    pub async fn guardian_status(&self) -> GuardianStatus {
        self.guardian.status().await
    }

    /// Start the Guardian loop on a background task.
    pub fn start_guardian(&self) -> GuardianHandle {
        self.guardian.start()
    }

    pub fn guardian(&self) -> &Guardian {
        &self.guardian
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    async fn serve(&self, study_id: &str, force_refresh: bool) -> Result<Served, EngineError> {
        let pipeline = Arc::clone(&self.pipeline);
        let id = study_id.to_string();
        self.cache
            .get_or_compute(study_id, force_refresh, move || async move {
                pipeline.run_cycle(&id).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::agent::{AgentReport, RosterEntry, SignalProducer};
    use crate::config::AgentSpec;
    use crate::models::{Dimension, DimensionInput, IntegrityEventType, SignalOutcome};
    use crate::source::{FeedAgentEntry, FeedStudy, StudyFeed};
    use crate::testing::epoch;

    fn study(level: RiskLevel) -> FeedStudy {
        let mut study = FeedStudy {
            last_updated: Some(epoch()),
            ..FeedStudy::default()
        };
        for dimension in Dimension::ALL {
            study.dimensions.insert(dimension, DimensionInput::new(80.0));
        }
        study.agents.insert(
            "safety".to_string(),
            FeedAgentEntry::new(SignalOutcome::Voted {
                risk_level: level,
                confidence: 0.9,
            }),
        );
        study
    }

    fn engine() -> (Engine, Arc<ManualClock>) {
        let mut feed = StudyFeed::default();
        feed.studies.insert("S1".to_string(), study(RiskLevel::High));
        feed.studies.insert("S2".to_string(), study(RiskLevel::Low));
        let feed = Arc::new(FeedSource::from_feed(feed));

        let mut config = Config::default();
        config.agents = vec![AgentSpec::new("safety", 3.0), AgentSpec::new("coding", 1.2)];

        let clock = Arc::new(ManualClock::new(epoch()));
        let roster = Roster::from_feed(&config.agents, Arc::clone(&feed)).unwrap();
        let engine = Engine::new(&config, roster, feed, None, clock.clone()).unwrap();
        (engine, clock)
    }

    #[tokio::test]
    async fn test_get_then_cached() {
        let (engine, clock) = engine();

        let first = engine.get("S1").await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.result.consensus.risk_level, RiskLevel::High);
        assert_eq!(first.result.agents_abstained, 1);
        assert_eq!(first.result.dqi.overall_score, 80.0);

        clock.advance(chrono::Duration::seconds(10));
        let second = engine.get("S1").await.unwrap();
        assert!(second.cached);
        assert_eq!(second.cache_age_seconds, 10.0);
        assert_eq!(second.result.timestamp, first.result.timestamp);
    }

    #[tokio::test]
    async fn test_refresh_recomputes() {
        let (engine, _clock) = engine();

        let first = engine.get("S1").await.unwrap();
        let refreshed = engine.refresh("S1").await.unwrap();
        assert!(!refreshed.cached);
        assert!(refreshed.result.timestamp > first.result.timestamp);
    }

    #[tokio::test]
    async fn test_unknown_study_not_found_and_not_cached() {
        let (engine, _clock) = engine();

        let err = engine.get("NOPE").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(engine.cache().peek("NOPE").await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_all_queues_every_study() {
        let (engine, _clock) = engine();

        let queued = engine.refresh_all().await.unwrap();
        assert_eq!(queued.queued_count, 2);
        let summary = queued.wait().await;
        assert_eq!(summary, RefreshSummary { succeeded: 2, failed: 0 });

        let status = engine.status().await;
        let ids: Vec<_> = status.studies.iter().map(|s| s.study_id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "S2"]);
        assert!(status.studies.iter().all(|s| s.fresh));
        assert_eq!(status.pipeline.cycles_completed, 2);
        assert_eq!(status.cache.total_executions, 2);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_at_startup() {
        let feed = Arc::new(FeedSource::from_feed(StudyFeed::default()));
        let mut config = Config::default();
        config.dqi.weights.safety = 50.0;

        let roster = Roster::from_feed(&config.agents, Arc::clone(&feed)).unwrap();
        let result = Engine::new(&config, roster, feed, None, Arc::new(SystemClock));
        assert!(matches!(result, Err(ConfigError::WeightSum(_))));
    }

    /// Agent whose verdict flips on every call while the data stays put.
    struct Flapping {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SignalProducer for Flapping {
        fn name(&self) -> &str {
            "safety"
        }

        async fn produce(&self, _study_id: &str) -> anyhow::Result<AgentReport> {
            let call = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let risk_level = if call % 2 == 0 {
                RiskLevel::Low
            } else {
                RiskLevel::Critical
            };
            Ok(AgentReport::Vote {
                risk_level,
                confidence: 0.9,
                evidence: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_flapping_agent_on_unchanged_data_is_non_deterministic() {
        let mut feed = StudyFeed::default();
        feed.studies.insert("S1".to_string(), study(RiskLevel::High));
        let feed = Arc::new(FeedSource::from_feed(feed));

        let producer: Arc<dyn SignalProducer> = Arc::new(Flapping {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let roster = Roster::new(vec![RosterEntry::new(producer, 3.0)]).unwrap();
        let clock = Arc::new(ManualClock::new(epoch()));
        let engine = Engine::new(&Config::default(), roster, feed, None, clock.clone()).unwrap();

        let first = engine.refresh("S1").await.unwrap();
        engine.guardian().audit_once().await;

        clock.advance(chrono::Duration::minutes(1));
        let second = engine.refresh("S1").await.unwrap();
        let report = engine.guardian().audit_once().await;

        assert_eq!(first.result.consensus.risk_level, RiskLevel::Low);
        assert_eq!(second.result.consensus.risk_level, RiskLevel::Critical);
        assert_eq!(
            first.result.input_fingerprint,
            second.result.input_fingerprint
        );
        assert!(report
            .events
            .iter()
            .any(|e| e.event_type == IntegrityEventType::NonDeterministicOutput
                && e.entity_id == "S1"));
    }

    #[tokio::test]
    async fn test_guardian_sees_engine_results() {
        let (engine, _clock) = engine();
        engine.get("S1").await.unwrap();

        let report = engine.guardian().audit_once().await;
        assert_eq!(report.new_runs, 1);

        let status = engine.guardian_status().await;
        assert_eq!(status.agent_performance.len(), 2);
    }
}
