//! Domain events shared across the plant-care modules.
//!
//! Events are immutable records of something that happened in the domain.
//! They decouple the module that produced a fact from the modules that react
//! to it. Each event carries identity, aggregate coordinates, a timestamp,
//! a priority tag and a free-form metadata map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Priority tag attached to an event itself.
///
/// Distinct from the *subscription* priority used for dispatch ordering:
/// this value travels with the event and is available to handlers and
/// downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for EventPriority {
    fn default() -> Self {
        EventPriority::Normal
    }
}

/// Error returned when a typed event constructor is missing a required field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// A required field was empty.
    #[error("required field `{0}` is missing or empty")]
    MissingField(&'static str),
}

/// A domain event.
///
/// Immutable once published: the bus and the store only ever read it.
/// Correlation ids for tracing are carried in the metadata map so that the
/// core does not need to know about any particular tracing scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique id assigned at construction.
    pub event_id: Uuid,
    /// String tag, e.g. `"user.registered"`. Dispatch key on the bus.
    pub event_type: String,
    /// Id of the aggregate the event belongs to.
    pub aggregate_id: String,
    /// Kind of aggregate, e.g. `"user"` or `"plant"`.
    pub aggregate_type: String,
    /// User on whose behalf the event occurred, if any.
    pub user_id: Option<String>,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Schema version of the event payload.
    pub version: u32,
    /// Priority tag.
    pub priority: EventPriority,
    /// Free-form payload and tracing data.
    pub metadata: BTreeMap<String, Value>,
}

impl DomainEvent {
    /// Create an event with a fresh id, the current time, version 1 and
    /// normal priority.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            user_id: None,
            timestamp: Utc::now(),
            version: 1,
            priority: EventPriority::Normal,
            metadata: BTreeMap::new(),
        }
    }

    /// Set the acting user.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the priority tag.
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Insert a metadata entry on an existing event.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Correlation id for tracing, if one has been set.
    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.get("correlation_id").and_then(Value::as_str)
    }

    /// Set the correlation id for tracing.
    pub fn set_correlation_id(&mut self, correlation_id: &str) {
        self.add_metadata("correlation_id", Value::String(correlation_id.to_string()));
    }

    fn require(field: &'static str, value: &str) -> Result<(), EventError> {
        if value.trim().is_empty() {
            Err(EventError::MissingField(field))
        } else {
            Ok(())
        }
    }

    /// A new user registered.
    pub fn user_registered(user_id: &str, email: &str) -> Result<Self, EventError> {
        Self::require("user_id", user_id)?;
        Self::require("email", email)?;
        Ok(Self::new("user.registered", user_id, "user")
            .with_user(user_id)
            .with_metadata("email", Value::String(email.to_string())))
    }

    /// A user's profile or account data changed.
    pub fn user_updated(
        user_id: &str,
        changes: BTreeMap<String, Value>,
    ) -> Result<Self, EventError> {
        Self::require("user_id", user_id)?;
        if changes.is_empty() {
            return Err(EventError::MissingField("changes"));
        }
        Ok(Self::new("user.updated", user_id, "user")
            .with_user(user_id)
            .with_metadata("changes", Value::Object(changes.into_iter().collect())))
    }

    /// A plant was added to a user's collection.
    pub fn plant_added(
        plant_id: &str,
        user_id: &str,
        plant_name: &str,
        plant_species: &str,
    ) -> Result<Self, EventError> {
        Self::require("plant_id", plant_id)?;
        Self::require("plant_species", plant_species)?;
        Ok(Self::new("plant.added", plant_id, "plant")
            .with_user(user_id)
            .with_metadata("plant_name", Value::String(plant_name.to_string()))
            .with_metadata("plant_species", Value::String(plant_species.to_string())))
    }

    /// A care task (watering, fertilizing, ...) was completed for a plant.
    pub fn plant_care_completed(
        plant_id: &str,
        user_id: &str,
        care_type: &str,
        care_notes: Option<&str>,
    ) -> Result<Self, EventError> {
        Self::require("plant_id", plant_id)?;
        Self::require("care_type", care_type)?;
        let mut event = Self::new("plant.care_completed", plant_id, "plant")
            .with_user(user_id)
            .with_metadata("care_type", Value::String(care_type.to_string()));
        if let Some(notes) = care_notes {
            event.add_metadata("care_notes", Value::String(notes.to_string()));
        }
        Ok(event)
    }

    /// A plant's health assessment changed.
    pub fn plant_health_changed(
        plant_id: &str,
        user_id: &str,
        old_status: &str,
        new_status: &str,
    ) -> Result<Self, EventError> {
        Self::require("plant_id", plant_id)?;
        Self::require("old_health_status", old_status)?;
        Self::require("new_health_status", new_status)?;
        Ok(Self::new("plant.health_changed", plant_id, "plant")
            .with_user(user_id)
            .with_metadata("old_health_status", Value::String(old_status.to_string()))
            .with_metadata("new_health_status", Value::String(new_status.to_string())))
    }

    /// A plant reached a growth milestone.
    pub fn plant_milestone(
        plant_id: &str,
        user_id: &str,
        milestone_type: &str,
        description: &str,
    ) -> Result<Self, EventError> {
        Self::require("plant_id", plant_id)?;
        Self::require("milestone_type", milestone_type)?;
        Self::require("milestone_description", description)?;
        Ok(Self::new("plant.milestone_reached", plant_id, "plant")
            .with_user(user_id)
            .with_metadata("milestone_type", Value::String(milestone_type.to_string()))
            .with_metadata(
                "milestone_description",
                Value::String(description.to_string()),
            ))
    }
}
