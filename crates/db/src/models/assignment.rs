//! Row model for the `assignments` table.

use serde::Serialize;
use sqlx::FromRow;

use ramp_core::error::CoreError;
use ramp_core::progress::{Assignment, AssignmentStatus};
use ramp_core::types::{EntityId, Timestamp};

/// A row from the `assignments` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AssignmentRow {
    pub id: EntityId,
    pub user_id: EntityId,
    pub flow_id: EntityId,
    pub flow_version_id: EntityId,
    pub assigned_by: EntityId,
    pub buddy_id: Option<EntityId>,
    pub mentor_id: Option<EntityId>,
    pub status: String,
    pub assigned_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub due_at: Option<Timestamp>,
}

impl AssignmentRow {
    pub fn into_domain(self) -> Result<Assignment, CoreError> {
        Ok(Assignment {
            id: self.id,
            user_id: self.user_id,
            flow_id: self.flow_id,
            flow_version_id: self.flow_version_id,
            assigned_by: self.assigned_by,
            buddy_id: self.buddy_id,
            mentor_id: self.mentor_id,
            status: AssignmentStatus::from_str_db(&self.status)?,
            assigned_at: self.assigned_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            due_at: self.due_at,
        })
    }
}
