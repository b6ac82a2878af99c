//! Entity freshness state machine.

use super::events::Finding;
use crate::clock::seconds_between;
use crate::models::{EventSeverity, IntegrityEventType};
use crate::source::EntityObservation;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Fresh,
    Stale,
    Critical,
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Freshness::Fresh => write!(f, "fresh"),
            Freshness::Stale => write!(f, "stale"),
            Freshness::Critical => write!(f, "critical"),
        }
    }
}

/// Tracks the last classified state of every entity.
///
/// Only upward moves (fresh to stale, stale to critical, fresh to
/// critical) produce a finding. Falling back resets the state silently.
#[derive(Debug)]
pub struct StalenessTracker {
    stale_after_days: f64,
    critical_after_days: f64,
    states: HashMap<String, Freshness>,
}

impl StalenessTracker {
    pub fn new(stale_after_days: f64, critical_after_days: f64) -> Self {
        Self {
            stale_after_days,
            critical_after_days,
            states: HashMap::new(),
        }
    }

    pub fn classify(&self, days_stale: f64) -> Freshness {
        if days_stale > self.critical_after_days {
            Freshness::Critical
        } else if days_stale >= self.stale_after_days {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }

    /// Classify one entity and record its new state.
    pub fn observe(&mut self, entity: &EntityObservation, now: DateTime<Utc>) -> Option<Finding> {
        let days_stale = seconds_between(entity.last_observed_update, now) / SECONDS_PER_DAY;
        let current = self.classify(days_stale);
        let previous = self
            .states
            .insert(entity.entity_id.clone(), current)
            .unwrap_or(Freshness::Fresh);

        if current <= previous {
            return None;
        }

        let severity = match current {
            Freshness::Critical => EventSeverity::Critical,
            _ => EventSeverity::Warning,
        };

        Some(Finding {
            event_type: IntegrityEventType::StaleData,
            severity,
            entity_id: entity.entity_id.clone(),
            expected_behavior: format!(
                "{} data updated within {} day(s)",
                entity.kind, self.stale_after_days
            ),
            actual_behavior: format!(
                "No update for {:.1} days (last update {}), now {}",
                days_stale,
                entity.last_observed_update.format("%Y-%m-%d %H:%M UTC"),
                current
            ),
            recommendation: match current {
                Freshness::Critical => format!(
                    "Escalate: confirm the {} is still transmitting data and chase the data manager",
                    entity.kind
                ),
                _ => format!("Check the data feed for this {}", entity.kind),
            },
        })
    }

    pub fn state(&self, entity_id: &str) -> Option<Freshness> {
        self.states.get(entity_id).copied()
    }

    /// Number of entities currently in `state`.
    pub fn count(&self, state: Freshness) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }

    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    /// Forget entities the source no longer reports.
    pub fn retain_only(&mut self, live: &HashSet<&str>) {
        self.states.retain(|id, _| live.contains(id.as_str()));
    }
}
