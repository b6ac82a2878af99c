//! JSON study feed.
//!
//! The feed file carries, per study, the DQI dimension inputs, the
//! outcome every agent reported and the last update stamps of the study
//! and its sites. It backs the CLI and the test suite.

use super::{EntityKind, EntityObservation, StudySnapshot, StudySource};
use crate::error::SourceError;
use crate::models::{DimensionInputs, Evidence, SignalOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Root of the feed file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyFeed {
    #[serde(default)]
    pub studies: BTreeMap<String, FeedStudy>,
}

/// One study in the feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedStudy {
    /// Last genuine update of the study data.
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dimensions: DimensionInputs,
    /// Recorded outcome per agent name.
    #[serde(default)]
    pub agents: BTreeMap<String, FeedAgentEntry>,
    /// Last update per site.
    #[serde(default)]
    pub sites: BTreeMap<String, DateTime<Utc>>,
    /// Last update per sub-resource (forms, lab feeds, ...).
    #[serde(default)]
    pub resources: BTreeMap<String, DateTime<Utc>>,
}

/// Recorded agent outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedAgentEntry {
    #[serde(flatten)]
    pub outcome: SignalOutcome,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    /// Simulated agent latency.
    #[serde(default)]
    pub delay_ms: u64,
}

impl FeedAgentEntry {
    pub fn new(outcome: SignalOutcome) -> Self {
        Self {
            outcome,
            evidence: Vec::new(),
            delay_ms: 0,
        }
    }
}

impl StudyFeed {
    /// Parse a feed from JSON text.
    pub fn from_json(content: &str) -> Result<Self, SourceError> {
        Ok(serde_json::from_str(content)?)
    }
}

/// File- or memory-backed study source.
#[derive(Debug)]
pub struct FeedSource {
    path: Option<PathBuf>,
    feed: RwLock<StudyFeed>,
}

impl FeedSource {
    /// Wrap an in-memory feed.
    pub fn from_feed(feed: StudyFeed) -> Self {
        Self {
            path: None,
            feed: RwLock::new(feed),
        }
    }

    /// Load a feed file.
    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let content = std::fs::read_to_string(path)?;
        let feed = StudyFeed::from_json(&content)?;
        info!(
            "Loaded study feed {} ({} studies)",
            path.display(),
            feed.studies.len()
        );

        Ok(Self {
            path: Some(path.to_path_buf()),
            feed: RwLock::new(feed),
        })
    }

    /// Re-read the feed file, if this source was loaded from one.
    pub async fn reload(&self) -> Result<(), SourceError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let content = tokio::fs::read_to_string(path).await?;
        let feed = StudyFeed::from_json(&content)?;
        debug!("Reloaded study feed {}", path.display());
        *self.feed.write().await = feed;
        Ok(())
    }

    /// The recorded outcome of one agent for one study.
    pub async fn agent_entry(&self, study_id: &str, agent: &str) -> Option<FeedAgentEntry> {
        let feed = self.feed.read().await;
        feed.studies.get(study_id)?.agents.get(agent).cloned()
    }

    /// Insert or replace a study.
    pub async fn upsert_study(&self, study_id: impl Into<String>, study: FeedStudy) {
        self.feed.write().await.studies.insert(study_id.into(), study);
    }

    /// Apply a change to one study. Returns false if the study is unknown.
    pub async fn update_study<F>(&self, study_id: &str, change: F) -> bool
    where
        F: FnOnce(&mut FeedStudy),
    {
        let mut feed = self.feed.write().await;
        match feed.studies.get_mut(study_id) {
            Some(study) => {
                change(study);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl StudySource for FeedSource {
    async fn study_ids(&self) -> Result<Vec<String>, SourceError> {
        Ok(self.feed.read().await.studies.keys().cloned().collect())
    }

    async fn load_study(&self, study_id: &str) -> Result<Option<StudySnapshot>, SourceError> {
        let feed = self.feed.read().await;
        Ok(feed.studies.get(study_id).map(|study| StudySnapshot {
            dimensions: study.dimensions.clone(),
            last_updated: study.last_updated,
        }))
    }

    async fn entities(&self) -> Result<Vec<EntityObservation>, SourceError> {
        let feed = self.feed.read().await;
        let mut entities = Vec::new();

        for (study_id, study) in &feed.studies {
            if let Some(updated) = study.last_updated {
                entities.push(EntityObservation {
                    entity_id: study_id.clone(),
                    kind: EntityKind::Study,
                    last_observed_update: updated,
                });
            }
            for (site, updated) in &study.sites {
                entities.push(EntityObservation {
                    entity_id: format!("{}/{}", study_id, site),
                    kind: EntityKind::Site,
                    last_observed_update: *updated,
                });
            }
            for (resource, updated) in &study.resources {
                entities.push(EntityObservation {
                    entity_id: format!("{}/{}", study_id, resource),
                    kind: EntityKind::Resource,
                    last_observed_update: *updated,
                });
            }
        }

        Ok(entities)
    }
}
