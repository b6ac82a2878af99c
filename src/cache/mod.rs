//! Result cache with single-flight recomputation.
//!
//! Holds the latest [`AnalysisResult`] per study. Concurrent requests for
//! a missing, stale or force-refreshed key share one computation: the
//! first caller launches it on a background task, later callers join the
//! same shared future until it completes.

use crate::clock::{seconds_between, Clock};
use crate::error::EngineError;
use crate::models::AnalysisResult;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

type FlightOutput = Result<Arc<AnalysisResult>, EngineError>;
type Flight = Shared<BoxFuture<'static, FlightOutput>>;

/// A stored analysis. Its age is always derived from `stored_at`.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Arc<AnalysisResult>,
    pub stored_at: DateTime<Utc>,
}

/// What a lookup returned.
#[derive(Debug, Clone)]
pub struct Served {
    pub result: Arc<AnalysisResult>,
    /// True when served from the cache without recomputation.
    pub cached: bool,
    pub cache_age_seconds: f64,
}

/// Aggregate cache counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_executions: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub entries_count: usize,
    pub in_flight: usize,
}

struct CacheInner {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<String, CacheEntry>>,
    in_flight: Mutex<HashMap<String, Flight>>,
    hits: AtomicU64,
    misses: AtomicU64,
    executions: AtomicU64,
}

/// Per-study analysis cache. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<CacheInner>,
}

impl ResultCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                ttl,
                clock,
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                executions: AtomicU64::new(0),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Serve a fresh cached result or run `compute` once for this key.
    ///
    /// `force_refresh` skips the freshness check but still joins a
    /// computation already in flight for the key.
    pub async fn get_or_compute<F, Fut>(
        &self,
        study_id: &str,
        force_refresh: bool,
        compute: F,
    ) -> Result<Served, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AnalysisResult, EngineError>> + Send + 'static,
    {
        if !force_refresh {
            if let Some(served) = self.fresh_hit(study_id).await {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(served);
            }
        }

        let flight = {
            let mut in_flight = self.inner.in_flight.lock().await;
            match in_flight.get(study_id) {
                Some(existing) => {
                    debug!("Joining in-flight analysis for {}", study_id);
                    existing.clone()
                }
                None => {
                    // A flight may have finished between the first check and
                    // taking the lock.
                    if !force_refresh {
                        if let Some(served) = self.fresh_hit(study_id).await {
                            self.inner.hits.fetch_add(1, Ordering::Relaxed);
                            return Ok(served);
                        }
                    }

                    let flight = self.launch(study_id, compute());
                    in_flight.insert(study_id.to_string(), flight.clone());
                    flight
                }
            }
        };

        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        let result = flight.await?;
        let cache_age_seconds = self.age_seconds(study_id).await.unwrap_or(0.0);

        Ok(Served {
            result,
            cached: false,
            cache_age_seconds,
        })
    }

    /// The current entry for a key, regardless of age.
    pub async fn peek(&self, study_id: &str) -> Option<CacheEntry> {
        self.inner.entries.read().await.get(study_id).cloned()
    }

    /// Seconds since the entry for `study_id` was stored.
    pub async fn age_seconds(&self, study_id: &str) -> Option<f64> {
        let entries = self.inner.entries.read().await;
        entries
            .get(study_id)
            .map(|entry| seconds_between(entry.stored_at, self.inner.clock.now()))
    }

    /// All entries, sorted by key.
    pub async fn snapshot(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.inner.entries.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    pub async fn is_in_flight(&self, study_id: &str) -> bool {
        self.inner.in_flight.lock().await.contains_key(study_id)
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.inner.hits.load(Ordering::Relaxed);
        let misses = self.inner.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let in_flight = self.inner.in_flight.lock().await.len();
        let entries_count = self.inner.entries.read().await.len();

        CacheStats {
            total_executions: self.inner.executions.load(Ordering::Relaxed),
            cache_hits: hits,
            cache_misses: misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            entries_count,
            in_flight,
        }
    }

    async fn fresh_hit(&self, study_id: &str) -> Option<Served> {
        let entries = self.inner.entries.read().await;
        let entry = entries.get(study_id)?;
        let age = seconds_between(entry.stored_at, self.inner.clock.now());

        if age < self.inner.ttl.as_secs_f64() {
            Some(Served {
                result: Arc::clone(&entry.value),
                cached: true,
                cache_age_seconds: age,
            })
        } else {
            None
        }
    }

    /// Start a computation on its own task so dropping a caller never
    /// cancels work other callers are waiting on.
    fn launch<Fut>(&self, study_id: &str, computation: Fut) -> Flight
    where
        Fut: Future<Output = Result<AnalysisResult, EngineError>> + Send + 'static,
    {
        self.inner.executions.fetch_add(1, Ordering::Relaxed);
        info!("Recomputing analysis for {}", study_id);

        let inner = Arc::clone(&self.inner);
        let key = study_id.to_string();
        let handle = tokio::spawn(async move {
            let outcome = computation.await;

            // Store and release the key under the in-flight lock so a caller
            // sees either the running flight or the stored entry.
            let mut in_flight = inner.in_flight.lock().await;
            let output = match outcome {
                Ok(result) => Ok(inner.store(&key, result).await),
                Err(e) => {
                    warn!("Analysis for {} failed: {}", key, e);
                    Err(e)
                }
            };
            in_flight.remove(&key);
            output
        });

        let inner = Arc::clone(&self.inner);
        let key = study_id.to_string();
        async move {
            match handle.await {
                Ok(output) => output,
                Err(e) => {
                    warn!("Analysis task for {} aborted: {}", key, e);
                    inner.in_flight.lock().await.remove(&key);
                    Err(EngineError::TaskAborted {
                        study_id: key,
                        message: e.to_string(),
                    })
                }
            }
        }
        .boxed()
        .shared()
    }
}

impl CacheInner {
    /// Replace the entry for `key`, keeping `stored_at` strictly increasing
    /// and never replacing a newer result with an older one.
    async fn store(&self, key: &str, result: AnalysisResult) -> Arc<AnalysisResult> {
        let mut entries = self.entries.write().await;
        let now = self.clock.now();

        let stored_at = match entries.get(key) {
            Some(existing) if result.timestamp < existing.value.timestamp => {
                warn!(
                    "Discarding analysis for {} older than the cached one ({} < {})",
                    key, result.timestamp, existing.value.timestamp
                );
                return Arc::clone(&existing.value);
            }
            Some(existing) if now <= existing.stored_at => {
                existing.stored_at + chrono::Duration::microseconds(1)
            }
            _ => now,
        };

        let value = Arc::new(result);
        entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                value: Arc::clone(&value),
                stored_at,
            },
        );
        debug!("Stored analysis for {} at {}", key, stored_at);
        value
    }
}
