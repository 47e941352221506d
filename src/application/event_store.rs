//! In-memory append-only event log.
//!
//! The bus appends every published event here before dispatch, so the log
//! is the ground truth for what was published regardless of handler
//! outcomes. Intended for audit queries and tests; durable storage is a
//! concern of a persistence adapter, not of this core.

use crate::domain::event::DomainEvent;
use std::sync::Mutex;

/// Query filter for [`EventStore::get_events`].
///
/// All criteria are conjunctive; an empty filter returns everything.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub aggregate_id: Option<String>,
    pub event_type: Option<String>,
    /// Only events with a timestamp at or after this Unix second.
    pub since: Option<chrono::DateTime<chrono::Utc>>,
    /// Cap on the number of returned events, applied after sorting.
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn aggregate(id: impl Into<String>) -> Self {
        Self {
            aggregate_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn of_type(event_type: impl Into<String>) -> Self {
        Self {
            event_type: Some(event_type.into()),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Append-only store of published events.
#[derive(Debug, Default)]
pub struct EventStore {
    events: Mutex<Vec<DomainEvent>>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event.
    pub fn append(&self, event: DomainEvent) {
        self.lock_events().push(event);
    }

    /// Events matching the filter, sorted by timestamp ascending.
    ///
    /// The sort is stable, so events sharing a timestamp keep publish order.
    pub fn get_events(&self, filter: &EventFilter) -> Vec<DomainEvent> {
        let events = self.lock_events();
        let mut matched: Vec<DomainEvent> = events
            .iter()
            .filter(|event| {
                filter
                    .aggregate_id
                    .as_deref()
                    .is_none_or(|id| event.aggregate_id == id)
                    && filter
                        .event_type
                        .as_deref()
                        .is_none_or(|t| event.event_type == t)
                    && filter.since.is_none_or(|since| event.timestamp >= since)
            })
            .cloned()
            .collect();
        matched.sort_by_key(|event| event.timestamp);
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        matched
    }

    /// Total number of stored events.
    pub fn event_count(&self) -> usize {
        self.lock_events().len()
    }

    /// Drop all stored events.
    pub fn clear(&self) {
        self.lock_events().clear();
    }

    fn lock_events(&self) -> std::sync::MutexGuard<'_, Vec<DomainEvent>> {
        match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
