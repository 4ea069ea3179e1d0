//! Assignment lifecycle engine.
//!
//! Creates the record linking a user to a flow, pinned to whichever
//! version is active at assignment time, and drives it through its
//! status machine. The progress tree itself belongs to the progress
//! engine; this layer owns the outer record and its queries.

use std::sync::Arc;

use chrono::Duration;

use ramp_core::error::CoreError;
use ramp_core::progress::{Assignment, AssignmentStatus};
use ramp_core::store::{AssignmentStore, Clock, VersionStore};
use ramp_core::types::{new_entity_id, EntityId, Timestamp};
use ramp_events::bus::{
    EVENT_ASSIGNMENT_CANCELLED, EVENT_ASSIGNMENT_CREATED, EVENT_ASSIGNMENT_COMPLETED,
    EVENT_ASSIGNMENT_PAUSED, EVENT_ASSIGNMENT_RESUMED, EVENT_ASSIGNMENT_STARTED,
};
use ramp_events::{DomainEvent, EventBus};

/// Input for assigning a user to a flow.
#[derive(Debug, Clone)]
pub struct AssignRequest {
    pub user_id: EntityId,
    pub flow_id: EntityId,
    pub assigned_by: EntityId,
    pub buddy_id: Option<EntityId>,
    pub mentor_id: Option<EntityId>,
    /// Explicit deadline; when absent it is computed from the active
    /// version's deadline allowance.
    pub due_at: Option<Timestamp>,
}

pub struct AssignmentEngine {
    versions: Arc<dyn VersionStore>,
    assignments: Arc<dyn AssignmentStore>,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,
}

impl AssignmentEngine {
    pub fn new(
        versions: Arc<dyn VersionStore>,
        assignments: Arc<dyn AssignmentStore>,
        clock: Arc<dyn Clock>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            versions,
            assignments,
            clock,
            bus,
        }
    }

    /// Assign a user to a flow, pinning the currently active version.
    ///
    /// Fails with `InvalidState` when the flow has no active version: an
    /// assignment must reference a concrete frozen tree.
    pub async fn assign_user(&self, request: AssignRequest) -> Result<Assignment, CoreError> {
        let active = self
            .versions
            .find_active_version(request.flow_id)
            .await?
            .ok_or_else(|| {
                CoreError::InvalidState(format!(
                    "Flow {} has no active version to assign",
                    request.flow_id
                ))
            })?;

        let now = self.clock.now();
        let due_at = request.due_at.or_else(|| {
            active
                .deadline_days
                .map(|days| now + Duration::days(i64::from(days)))
        });

        let assignment = Assignment {
            id: new_entity_id(),
            user_id: request.user_id,
            flow_id: request.flow_id,
            flow_version_id: active.id,
            assigned_by: request.assigned_by,
            buddy_id: request.buddy_id,
            mentor_id: request.mentor_id,
            status: AssignmentStatus::Assigned,
            assigned_at: now,
            started_at: None,
            completed_at: None,
            due_at,
        };
        self.assignments.insert_assignment(&assignment).await?;

        tracing::info!(
            assignment_id = %assignment.id,
            user_id = %assignment.user_id,
            flow_id = %assignment.flow_id,
            version = active.version,
            "Assigned user to flow"
        );
        self.publish(EVENT_ASSIGNMENT_CREATED, &assignment, now);
        Ok(assignment)
    }

    /// `Assigned → InProgress`, stamping the start time.
    pub async fn start(&self, assignment_id: EntityId) -> Result<Assignment, CoreError> {
        self.transition(assignment_id, EVENT_ASSIGNMENT_STARTED, |a, now| {
            a.start(now)
        })
        .await
    }

    /// `InProgress → Paused`.
    pub async fn pause(&self, assignment_id: EntityId) -> Result<Assignment, CoreError> {
        self.transition(assignment_id, EVENT_ASSIGNMENT_PAUSED, |a, _| a.pause())
            .await
    }

    /// `Paused → InProgress`.
    pub async fn resume(&self, assignment_id: EntityId) -> Result<Assignment, CoreError> {
        self.transition(assignment_id, EVENT_ASSIGNMENT_RESUMED, |a, _| a.resume())
            .await
    }

    /// `InProgress → Completed`, stamping the completion time.
    pub async fn complete(&self, assignment_id: EntityId) -> Result<Assignment, CoreError> {
        self.transition(assignment_id, EVENT_ASSIGNMENT_COMPLETED, |a, now| {
            a.complete(now)
        })
        .await
    }

    /// Any non-terminal status `→ Cancelled`.
    pub async fn cancel(&self, assignment_id: EntityId) -> Result<Assignment, CoreError> {
        self.transition(assignment_id, EVENT_ASSIGNMENT_CANCELLED, |a, _| a.cancel())
            .await
    }

    pub async fn get_assignment(&self, assignment_id: EntityId) -> Result<Assignment, CoreError> {
        self.require(assignment_id).await
    }

    pub async fn list_for_user(&self, user_id: EntityId) -> Result<Vec<Assignment>, CoreError> {
        self.assignments.list_by_user(user_id).await
    }

    pub async fn list_for_flow(&self, flow_id: EntityId) -> Result<Vec<Assignment>, CoreError> {
        self.assignments.list_by_flow(flow_id).await
    }

    /// Open assignments past their due date, for the reminder collaborator.
    pub async fn list_overdue(&self) -> Result<Vec<Assignment>, CoreError> {
        self.assignments.list_overdue(self.clock.now()).await
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn require(&self, id: EntityId) -> Result<Assignment, CoreError> {
        self.assignments
            .find_assignment(id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Assignment",
                id,
            })
    }

    async fn transition<F>(
        &self,
        assignment_id: EntityId,
        event_type: &'static str,
        apply: F,
    ) -> Result<Assignment, CoreError>
    where
        F: FnOnce(&mut Assignment, Timestamp) -> Result<(), CoreError>,
    {
        let mut assignment = self.require(assignment_id).await?;
        let now = self.clock.now();
        apply(&mut assignment, now)?;
        self.assignments.update_assignment(&assignment).await?;

        tracing::info!(
            assignment_id = %assignment.id,
            status = assignment.status.as_str(),
            "Assignment transitioned"
        );
        self.publish(event_type, &assignment, now);
        Ok(assignment)
    }

    fn publish(&self, event_type: &str, assignment: &Assignment, now: Timestamp) {
        self.bus.publish(
            DomainEvent::new(event_type, now)
                .with_source("assignment", assignment.id)
                .with_user(assignment.user_id)
                .with_payload(serde_json::json!({
                    "flow_id": assignment.flow_id,
                    "status": assignment.status.as_str(),
                })),
        );
    }
}
