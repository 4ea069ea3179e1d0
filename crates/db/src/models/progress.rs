//! Row models for the progress tables.

use serde::Serialize;
use sqlx::FromRow;

use ramp_core::error::CoreError;
use ramp_core::progress::{
    ComponentProgress, ComponentState, FlowProgress, StepProgress, UserProgress,
};
use ramp_core::types::{EntityId, Timestamp};

/// A row from the `flow_progress` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FlowProgressRow {
    pub id: EntityId,
    pub assignment_id: EntityId,
    pub user_id: EntityId,
    pub percent: f64,
    pub steps_completed: i32,
    pub steps_total: i32,
    pub components_completed: i32,
    pub components_total: i32,
    pub time_spent_secs: i64,
    pub current_step_id: Option<EntityId>,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

/// A row from the `step_progress` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StepProgressRow {
    pub id: EntityId,
    pub flow_progress_id: EntityId,
    pub step_version_id: EntityId,
    pub order_index: i32,
    pub percent: f64,
    pub unlocked: bool,
    pub components_completed: i32,
    pub components_total: i32,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

/// A row from the `component_progress` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ComponentProgressRow {
    pub id: EntityId,
    pub step_progress_id: EntityId,
    pub component_version_id: EntityId,
    pub order_index: i32,
    pub required: bool,
    pub state: String,
    pub attempts: i32,
    pub best_score: Option<f64>,
    pub last_score: Option<f64>,
    pub time_spent_secs: i64,
    pub payload: serde_json::Value,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

/// A row from the `user_progress` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UserProgressRow {
    pub id: EntityId,
    pub user_id: EntityId,
    pub assigned_count: i32,
    pub active_count: i32,
    pub completed_count: i32,
    pub overdue_count: i32,
    pub total_time_secs: i64,
    pub achievements_count: i32,
    pub updated_at: Timestamp,
}

impl FlowProgressRow {
    pub fn into_domain(self, steps: Vec<StepProgress>) -> FlowProgress {
        FlowProgress {
            id: self.id,
            assignment_id: self.assignment_id,
            user_id: self.user_id,
            percent: self.percent,
            steps_completed: self.steps_completed,
            steps_total: self.steps_total,
            components_completed: self.components_completed,
            components_total: self.components_total,
            time_spent_secs: self.time_spent_secs,
            current_step_id: self.current_step_id,
            created_at: self.created_at,
            completed_at: self.completed_at,
            steps,
        }
    }
}

impl StepProgressRow {
    pub fn into_domain(self, components: Vec<ComponentProgress>) -> StepProgress {
        StepProgress {
            id: self.id,
            flow_progress_id: self.flow_progress_id,
            step_version_id: self.step_version_id,
            order_index: self.order_index,
            percent: self.percent,
            unlocked: self.unlocked,
            components_completed: self.components_completed,
            components_total: self.components_total,
            started_at: self.started_at,
            completed_at: self.completed_at,
            components,
        }
    }
}

impl ComponentProgressRow {
    pub fn into_domain(self) -> Result<ComponentProgress, CoreError> {
        Ok(ComponentProgress {
            id: self.id,
            step_progress_id: self.step_progress_id,
            component_version_id: self.component_version_id,
            order_index: self.order_index,
            required: self.required,
            state: ComponentState::from_str_db(&self.state)?,
            attempts: self.attempts,
            best_score: self.best_score,
            last_score: self.last_score,
            time_spent_secs: self.time_spent_secs,
            payload: self.payload,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

impl UserProgressRow {
    pub fn into_domain(self) -> UserProgress {
        UserProgress {
            id: self.id,
            user_id: self.user_id,
            assigned_count: self.assigned_count,
            active_count: self.active_count,
            completed_count: self.completed_count,
            overdue_count: self.overdue_count,
            total_time_secs: self.total_time_secs,
            achievements_count: self.achievements_count,
            updated_at: self.updated_at,
        }
    }
}
