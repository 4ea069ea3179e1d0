//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`DomainEvent`]s emitted
//! by the engines. It is designed to be shared via `Arc<EventBus>`; the
//! notification collaborator subscribes and reacts to completion and
//! lifecycle transitions. Delivery cadence and formatting live outside
//! this workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use ramp_core::types::EntityId;

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

pub const EVENT_VERSION_CREATED: &str = "version.created";
pub const EVENT_VERSION_ACTIVATED: &str = "version.activated";

pub const EVENT_ASSIGNMENT_CREATED: &str = "assignment.created";
pub const EVENT_ASSIGNMENT_STARTED: &str = "assignment.started";
pub const EVENT_ASSIGNMENT_PAUSED: &str = "assignment.paused";
pub const EVENT_ASSIGNMENT_RESUMED: &str = "assignment.resumed";
pub const EVENT_ASSIGNMENT_COMPLETED: &str = "assignment.completed";
pub const EVENT_ASSIGNMENT_CANCELLED: &str = "assignment.cancelled";

pub const EVENT_COMPONENT_COMPLETED: &str = "progress.component_completed";
pub const EVENT_STEP_COMPLETED: &str = "progress.step_completed";
pub const EVENT_STEP_UNLOCKED: &str = "progress.step_unlocked";
pub const EVENT_FLOW_COMPLETED: &str = "progress.flow_completed";

// ---------------------------------------------------------------------------
// DomainEvent
// ---------------------------------------------------------------------------

/// A domain event emitted by an engine after its write was persisted.
///
/// Constructed via [`DomainEvent::new`] and enriched with the builder
/// methods [`with_source`](DomainEvent::with_source),
/// [`with_user`](DomainEvent::with_user), and
/// [`with_payload`](DomainEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Dot-separated event name, e.g. `"progress.step_unlocked"`.
    pub event_type: String,

    /// Source entity kind (e.g. `"assignment"`, `"flow_version"`).
    pub source_entity_type: Option<String>,

    /// Source entity id.
    pub source_entity_id: Option<EntityId>,

    /// The user the event concerns, when there is one.
    pub user_id: Option<EntityId>,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    /// Create a new event with only the required `event_type`.
    pub fn new(event_type: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type: event_type.into(),
            source_entity_type: None,
            source_entity_id: None,
            user_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp,
        }
    }

    /// Attach the source entity.
    pub fn with_source(mut self, entity_type: impl Into<String>, entity_id: EntityId) -> Self {
        self.source_entity_type = Some(entity_type.into());
        self.source_entity_id = Some(entity_id);
        self
    }

    /// Attach the concerned user.
    pub fn with_user(mut self, user_id: EntityId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Set the JSON payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default broadcast channel capacity. Slow subscribers that fall more
/// than this many events behind start seeing `Lagged` errors.
pub const DEFAULT_CAPACITY: usize = 256;

/// Publish/subscribe hub for [`DomainEvent`]s.
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers. An event published
    /// with no subscribers is dropped silently; the engines do not depend
    /// on anyone listening.
    pub fn publish(&self, event: DomainEvent) {
        let receivers = self.sender.receiver_count();
        if receivers > 0 {
            if let Err(e) = self.sender.send(event) {
                tracing::warn!(error = %e, "Failed to publish domain event");
            }
        } else {
            tracing::trace!(event_type = %event.event_type, "No subscribers for domain event");
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
