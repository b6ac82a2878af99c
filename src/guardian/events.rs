//! Integrity event log.

use crate::models::{EventSeverity, IntegrityEvent, IntegrityEventType};
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use uuid::Uuid;

/// An audit rule that fired, before it is stamped and logged.
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub event_type: IntegrityEventType,
    pub severity: EventSeverity,
    pub entity_id: String,
    pub expected_behavior: String,
    pub actual_behavior: String,
    pub recommendation: String,
}

impl Finding {
    pub fn into_event(self, timestamp: DateTime<Utc>) -> IntegrityEvent {
        IntegrityEvent {
            event_id: Uuid::new_v4(),
            event_type: self.event_type,
            severity: self.severity,
            entity_id: self.entity_id,
            expected_behavior: self.expected_behavior,
            actual_behavior: self.actual_behavior,
            recommendation: self.recommendation,
            timestamp,
        }
    }
}

/// Append-only event log bounded by count and age.
#[derive(Debug)]
pub struct EventLog {
    events: VecDeque<IntegrityEvent>,
    max_events: usize,
    retention: Duration,
}

impl EventLog {
    pub fn new(max_events: usize, retention_days: u32) -> Self {
        Self {
            events: VecDeque::new(),
            max_events: max_events.max(1),
            retention: Duration::days(i64::from(retention_days)),
        }
    }

    pub fn push(&mut self, event: IntegrityEvent) {
        self.events.push_back(event);
        while self.events.len() > self.max_events {
            self.events.pop_front();
        }
    }

    /// Drop events older than the retention window.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let before = self.events.len();
        self.events.retain(|event| event.timestamp >= cutoff);
        before - self.events.len()
    }

    /// Events in the order they were raised.
    pub fn iter(&self) -> impl Iterator<Item = &IntegrityEvent> {
        self.events.iter()
    }

    /// Events raised at or after `since`.
    pub fn since(&self, since: DateTime<Utc>) -> impl Iterator<Item = &IntegrityEvent> {
        self.events.iter().filter(move |event| event.timestamp >= since)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::epoch;

    fn finding(entity: &str) -> Finding {
        Finding {
            event_type: IntegrityEventType::StaleData,
            severity: EventSeverity::Warning,
            entity_id: entity.to_string(),
            expected_behavior: "updated daily".to_string(),
            actual_behavior: "no update for 2 days".to_string(),
            recommendation: "check the site feed".to_string(),
        }
    }

    #[test]
    fn test_log_is_bounded_by_count() {
        let mut log = EventLog::new(2, 30);
        for entity in ["a", "b", "c"] {
            log.push(finding(entity).into_event(epoch()));
        }

        let ids: Vec<_> = log.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_prune_drops_expired_events() {
        let mut log = EventLog::new(10, 30);
        log.push(finding("old").into_event(epoch()));
        log.push(finding("new").into_event(epoch() + Duration::days(20)));

        let removed = log.prune(epoch() + Duration::days(40));
        assert_eq!(removed, 1);
        assert_eq!(log.len(), 1);
        assert_eq!(log.iter().next().unwrap().entity_id, "new");
    }

    #[test]
    fn test_events_get_unique_ids() {
        let a = finding("a").into_event(epoch());
        let b = finding("a").into_event(epoch());
        assert_ne!(a.event_id, b.event_id);
    }
}
