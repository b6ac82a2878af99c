//! Guardian integrity monitor.
//!
//! Runs on its own timer, independent of requests and cache TTLs. Each
//! round audits entity freshness through the [`StudySource`] and pipeline
//! self-consistency through read-only views of the [`ResultCache`], then
//! appends any findings to a bounded event log.

pub mod consistency;
pub mod events;
pub mod metrics;
pub mod staleness;

pub use consistency::ConsistencyAuditor;
pub use events::{EventLog, Finding};
pub use metrics::{AgentMetrics, AgentPerformance};
pub use staleness::{Freshness, StalenessTracker};

use crate::cache::ResultCache;
use crate::clock::Clock;
use crate::config::GuardianConfig;
use crate::models::{EventSeverity, IntegrityEvent};
use crate::source::StudySource;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Window of recent events that feeds into system health.
const HEALTH_WINDOW_HOURS: i64 = 24;

/// Overall integrity verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemHealth {
    Healthy,
    Degraded,
    Critical,
}

impl fmt::Display for SystemHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemHealth::Healthy => write!(f, "healthy"),
            SystemHealth::Degraded => write!(f, "degraded"),
            SystemHealth::Critical => write!(f, "critical"),
        }
    }
}

impl SystemHealth {
    pub fn emoji(&self) -> &'static str {
        match self {
            SystemHealth::Healthy => "✅",
            SystemHealth::Degraded => "⚠️",
            SystemHealth::Critical => "🚨",
        }
    }
}

/// Guardian status for external reporting.
#[derive(Debug, Clone, Serialize)]
pub struct GuardianStatus {
    pub system_health: SystemHealth,
    /// Newest first.
    pub integrity_alerts: Vec<IntegrityEvent>,
    pub agent_performance: Vec<AgentPerformance>,
    pub rounds_completed: u64,
    pub last_audit_at: Option<DateTime<Utc>>,
    pub tracked_entities: usize,
    pub stale_entities: usize,
    pub critical_entities: usize,
    pub stuck_studies: usize,
}

/// Summary of one audit round.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub round: u64,
    pub audited_at: DateTime<Utc>,
    pub entities_checked: usize,
    pub runs_checked: usize,
    pub new_runs: usize,
    pub events: Vec<IntegrityEvent>,
}

struct AuditState {
    staleness: StalenessTracker,
    consistency: ConsistencyAuditor,
    metrics: AgentMetrics,
    last_audit_at: Option<DateTime<Utc>>,
}

struct GuardianInner {
    config: GuardianConfig,
    clock: Arc<dyn Clock>,
    cache: ResultCache,
    source: Arc<dyn StudySource>,
    state: Mutex<AuditState>,
    events: RwLock<EventLog>,
    rounds: AtomicU64,
}

/// The integrity monitor. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Guardian {
    inner: Arc<GuardianInner>,
}

/// Running Guardian loop.
pub struct GuardianHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl GuardianHandle {
    /// Signal shutdown and wait for the current round to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("Guardian task ended abnormally: {}", e);
        }
    }
}

impl Guardian {
    pub fn new(
        config: GuardianConfig,
        clock: Arc<dyn Clock>,
        cache: ResultCache,
        source: Arc<dyn StudySource>,
    ) -> Self {
        let state = AuditState {
            staleness: StalenessTracker::new(config.stale_after_days, config.critical_after_days),
            consistency: ConsistencyAuditor::new(config.stale_after_days, config.failure_spike_ratio),
            metrics: AgentMetrics::new(),
            last_audit_at: None,
        };
        let events = EventLog::new(config.max_events, config.retention_days);

        Self {
            inner: Arc::new(GuardianInner {
                config,
                clock,
                cache,
                source,
                state: Mutex::new(state),
                events: RwLock::new(events),
                rounds: AtomicU64::new(0),
            }),
        }
    }

    /// Run one audit round.
    ///
    /// Rounds are serialized; a round always completes every entity it
    /// started.
    pub async fn audit_once(&self) -> AuditReport {
        let inner = &self.inner;

        let entities = match inner.source.entities().await {
            Ok(entities) => Some(entities),
            Err(e) => {
                warn!("Guardian could not list entities, skipping staleness audit: {}", e);
                None
            }
        };
        let entries = inner.cache.snapshot().await;

        let mut findings = Vec::new();
        let mut new_runs = 0;
        let now;
        {
            let mut state = inner.state.lock().await;
            now = inner.clock.now();

            if let Some(entities) = &entities {
                for entity in entities {
                    if let Some(finding) = state.staleness.observe(entity, now) {
                        findings.push(finding);
                    }
                }
                let live: HashSet<&str> = entities.iter().map(|e| e.entity_id.as_str()).collect();
                state.staleness.retain_only(&live);
            }

            for entry in &entries {
                let audit = state.consistency.observe(entry, now);
                if audit.new_run {
                    new_runs += 1;
                    state.metrics.record_run(&entry.value);
                }
                findings.extend(audit.findings);
            }

            state.last_audit_at = Some(now);
        }

        let events: Vec<IntegrityEvent> = findings.into_iter().map(|f| f.into_event(now)).collect();
        for event in &events {
            match event.severity {
                EventSeverity::Critical | EventSeverity::High => warn!(
                    "🚨 {} [{}] {}: {}",
                    event.event_type, event.severity, event.entity_id, event.actual_behavior
                ),
                _ => info!(
                    "{} [{}] {}: {}",
                    event.event_type, event.severity, event.entity_id, event.actual_behavior
                ),
            }
        }

        {
            let mut log = inner.events.write().await;
            for event in &events {
                log.push(event.clone());
            }
            let pruned = log.prune(now);
            if pruned > 0 {
                debug!("Pruned {} expired integrity events", pruned);
            }
        }

        let round = inner.rounds.fetch_add(1, Ordering::Relaxed) + 1;
        let report = AuditReport {
            round,
            audited_at: now,
            entities_checked: entities.as_ref().map_or(0, Vec::len),
            runs_checked: entries.len(),
            new_runs,
            events,
        };
        info!(
            "Guardian round {}: {} entities, {} cached runs ({} new), {} new alerts",
            report.round,
            report.entities_checked,
            report.runs_checked,
            report.new_runs,
            report.events.len()
        );
        report
    }

    pub async fn status(&self) -> GuardianStatus {
        let now = self.inner.clock.now();
        let state = self.inner.state.lock().await;
        let log = self.inner.events.read().await;

        let stale_entities = state.staleness.count(Freshness::Stale);
        let critical_entities = state.staleness.count(Freshness::Critical);
        let recent_worst = log
            .since(now - Duration::hours(HEALTH_WINDOW_HOURS))
            .map(|event| event.severity)
            .max();

        let system_health = if critical_entities > 0
            || matches!(recent_worst, Some(EventSeverity::High | EventSeverity::Critical))
        {
            SystemHealth::Critical
        } else if stale_entities > 0
            || state.consistency.stuck_count() > 0
            || recent_worst == Some(EventSeverity::Warning)
        {
            SystemHealth::Degraded
        } else {
            SystemHealth::Healthy
        };

        let mut integrity_alerts: Vec<IntegrityEvent> = log.iter().cloned().collect();
        integrity_alerts.reverse();

        GuardianStatus {
            system_health,
            integrity_alerts,
            agent_performance: state.metrics.performance(),
            rounds_completed: self.inner.rounds.load(Ordering::Relaxed),
            last_audit_at: state.last_audit_at,
            tracked_entities: state.staleness.tracked(),
            stale_entities,
            critical_entities,
            stuck_studies: state.consistency.stuck_count(),
        }
    }

    /// Audit on the configured interval until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.inner.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Guardian started, auditing every {}s",
            self.inner.config.interval_seconds
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.audit_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Guardian stopped");
    }

    /// Start the audit loop on a background task.
    pub fn start(&self) -> GuardianHandle {
        let (shutdown, receiver) = watch::channel(false);
        let guardian = self.clone();
        let task = tokio::spawn(async move { guardian.run(receiver).await });
        GuardianHandle { shutdown, task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::EngineError;
    use crate::models::{IntegrityEventType, RiskLevel, Signal};
    use crate::source::{FeedSource, FeedStudy, StudyFeed};
    use crate::testing::{epoch, result_with_signals};

    struct Fixture {
        guardian: Guardian,
        clock: Arc<ManualClock>,
        cache: ResultCache,
        source: Arc<FeedSource>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(epoch()));
        let cache = ResultCache::new(std::time::Duration::from_secs(45), clock.clone());

        let mut study = FeedStudy {
            last_updated: Some(epoch()),
            ..FeedStudy::default()
        };
        study.sites.insert("SITE-01".to_string(), epoch());
        study.sites.insert("SITE-02".to_string(), epoch());
        let mut feed = StudyFeed::default();
        feed.studies.insert("S1".to_string(), study);
        let source = Arc::new(FeedSource::from_feed(feed));

        let guardian = Guardian::new(
            GuardianConfig::default(),
            clock.clone(),
            cache.clone(),
            source.clone(),
        );

        Fixture {
            guardian,
            clock,
            cache,
            source,
        }
    }

    async fn store(cache: &ResultCache, signals: Vec<Signal>, at: DateTime<Utc>, risk_bump: f64) {
        cache
            .get_or_compute("S1", true, move || async move {
                let mut result = result_with_signals("S1", at, signals);
                result.consensus.risk_score += risk_bump;
                Ok::<_, EngineError>(result)
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stalled_site_raises_exactly_one_critical_event() {
        let f = fixture();

        for _ in 0..9 {
            f.clock.advance(Duration::days(1));
            let now = f.clock.now();
            f.source
                .update_study("S1", |study| {
                    study.last_updated = Some(now);
                    study.sites.insert("SITE-02".to_string(), now);
                })
                .await;
            f.guardian.audit_once().await;
        }

        let status = f.guardian.status().await;
        let critical: Vec<_> = status
            .integrity_alerts
            .iter()
            .filter(|e| e.severity == EventSeverity::Critical)
            .collect();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].entity_id, "S1/SITE-01");
        assert!(status
            .integrity_alerts
            .iter()
            .all(|e| e.entity_id == "S1/SITE-01"));
        assert_eq!(status.critical_entities, 1);
        assert_eq!(status.system_health, SystemHealth::Critical);
    }

    #[tokio::test]
    async fn test_healthy_when_everything_updates() {
        let f = fixture();
        let report = f.guardian.audit_once().await;

        assert_eq!(report.entities_checked, 3);
        assert!(report.events.is_empty());
        let status = f.guardian.status().await;
        assert_eq!(status.system_health, SystemHealth::Healthy);
        assert_eq!(status.rounds_completed, 1);
        assert_eq!(status.last_audit_at, Some(epoch()));
    }

    #[tokio::test]
    async fn test_non_deterministic_output_detected_from_cache() {
        let f = fixture();
        let signals = vec![Signal::voted("safety", RiskLevel::High, 0.9, 3.0)];

        store(&f.cache, signals.clone(), f.clock.now(), 0.0).await;
        f.guardian.audit_once().await;

        f.clock.advance(Duration::minutes(1));
        store(&f.cache, signals, f.clock.now(), 7.5).await;
        let report = f.guardian.audit_once().await;

        assert_eq!(report.new_runs, 1);
        assert_eq!(report.events.len(), 1);
        assert_eq!(
            report.events[0].event_type,
            IntegrityEventType::NonDeterministicOutput
        );
        assert_eq!(f.guardian.status().await.system_health, SystemHealth::Critical);
    }

    #[tokio::test]
    async fn test_metrics_count_each_run_once() {
        let f = fixture();
        let signals = vec![
            Signal::voted("safety", RiskLevel::High, 0.9, 3.0),
            Signal::abstained("coding", 1.2, "no terms"),
        ];
        store(&f.cache, signals, f.clock.now(), 0.0).await;

        f.guardian.audit_once().await;
        f.guardian.audit_once().await;

        let performance = f.guardian.status().await.agent_performance;
        assert_eq!(performance.len(), 2);
        assert!(performance.iter().all(|p| p.signals_generated == 1));
        assert_eq!(performance[0].abstention_rate, 1.0);
    }

    #[tokio::test]
    async fn test_failure_spike_degrades_health() {
        let f = fixture();
        let signals = vec![
            Signal::voted("safety", RiskLevel::Low, 0.9, 3.0),
            Signal::errored("coding", 1.2, "timeout"),
        ];
        store(&f.cache, signals, f.clock.now(), 0.0).await;

        let report = f.guardian.audit_once().await;
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].event_type, IntegrityEventType::AgentFailureSpike);
        assert_eq!(f.guardian.status().await.system_health, SystemHealth::Degraded);
    }

    #[tokio::test]
    async fn test_old_events_age_out() {
        let f = fixture();
        f.clock.advance(Duration::days(2));
        let report = f.guardian.audit_once().await;
        assert!(!report.events.is_empty());

        // Everything recovers, then the retention window passes.
        let now = f.clock.now() + Duration::days(31);
        f.clock.set(now);
        f.source
            .update_study("S1", |study| {
                study.last_updated = Some(now);
                study.sites.insert("SITE-01".to_string(), now);
                study.sites.insert("SITE-02".to_string(), now);
            })
            .await;
        f.guardian.audit_once().await;

        let status = f.guardian.status().await;
        assert!(status.integrity_alerts.is_empty());
        assert_eq!(status.system_health, SystemHealth::Healthy);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let f = fixture();
        let handle = f.guardian.start();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.stop().await;

        assert!(f.guardian.status().await.rounds_completed >= 1);
    }
}
