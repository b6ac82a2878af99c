//! Study data sources.
//!
//! A [`StudySource`] knows which studies exist, supplies the DQI dimension
//! inputs for each and reports when tracked entities last changed.

pub mod feed;

pub use feed::{FeedAgentEntry, FeedSource, FeedStudy, StudyFeed};

use crate::error::SourceError;
use crate::models::DimensionInputs;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a tracked entity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Study,
    Site,
    Resource,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Study => write!(f, "study"),
            EntityKind::Site => write!(f, "site"),
            EntityKind::Resource => write!(f, "resource"),
        }
    }
}

/// Last genuine data update seen for an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityObservation {
    pub entity_id: String,
    pub kind: EntityKind,
    pub last_observed_update: DateTime<Utc>,
}

/// Inputs for one study at the time of loading.
#[derive(Debug, Clone, PartialEq)]
pub struct StudySnapshot {
    pub dimensions: DimensionInputs,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Read access to study data.
#[async_trait]
pub trait StudySource: Send + Sync {
    /// All known study identifiers.
    async fn study_ids(&self) -> Result<Vec<String>, SourceError>;

    /// Inputs for one study, or `None` if the study does not exist.
    async fn load_study(&self, study_id: &str) -> Result<Option<StudySnapshot>, SourceError>;

    /// Every entity whose freshness should be audited.
    async fn entities(&self) -> Result<Vec<EntityObservation>, SourceError>;
}
