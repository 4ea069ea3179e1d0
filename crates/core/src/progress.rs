//! Per-assignment progress tree and its bottom-up roll-up.
//!
//! The progress tree mirrors the shape of the version an assignment was
//! created against: one [`StepProgress`] per step version, one
//! [`ComponentProgress`] per component version. It is instantiated once at
//! assignment time and mutated in place by completion events until the
//! assignment reaches a terminal status. Later content versions never
//! touch an existing tree.
//!
//! All roll-up state is derived by recounting the current tree, never by
//! applying deltas, so repeated or out-of-order recalculation converges to
//! the same result. Percentages always come from counts and lie in
//! [0, 100].

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::flow::FlowVersion;
use crate::types::{new_entity_id, EntityId, Timestamp};

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Lifecycle status of an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    InProgress,
    Paused,
    Completed,
    Cancelled,
}

impl AssignmentStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn from_str_db(s: &str) -> Result<Self, CoreError> {
        match s {
            "assigned" => Ok(Self::Assigned),
            "in_progress" => Ok(Self::InProgress),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(CoreError::Validation(format!(
                "Invalid assignment status '{s}'. Must be one of: assigned, in_progress, paused, completed, cancelled"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Working state of a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    NotStarted,
    InProgress,
    Completed,
    Paused,
}

impl ComponentState {
    pub fn from_str_db(s: &str) -> Result<Self, CoreError> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "paused" => Ok(Self::Paused),
            _ => Err(CoreError::Validation(format!(
                "Invalid component state '{s}'. Must be one of: not_started, in_progress, completed, paused"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Paused => "paused",
        }
    }
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// The record linking one user to one flow, pinned to the version that was
/// active at assignment time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: EntityId,
    pub user_id: EntityId,
    /// Original flow id (stable across versions).
    pub flow_id: EntityId,
    /// The specific version this user consumes.
    pub flow_version_id: EntityId,
    pub assigned_by: EntityId,
    pub buddy_id: Option<EntityId>,
    pub mentor_id: Option<EntityId>,
    pub status: AssignmentStatus,
    pub assigned_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    /// Computed from the version's deadline allowance at assignment time.
    pub due_at: Option<Timestamp>,
}

impl Assignment {
    pub fn start(&mut self, now: Timestamp) -> Result<(), CoreError> {
        match self.status {
            AssignmentStatus::Assigned => {
                self.status = AssignmentStatus::InProgress;
                self.started_at = Some(now);
                Ok(())
            }
            status => Err(invalid_transition("start", status)),
        }
    }

    pub fn pause(&mut self) -> Result<(), CoreError> {
        match self.status {
            AssignmentStatus::InProgress => {
                self.status = AssignmentStatus::Paused;
                Ok(())
            }
            status => Err(invalid_transition("pause", status)),
        }
    }

    pub fn resume(&mut self) -> Result<(), CoreError> {
        match self.status {
            AssignmentStatus::Paused => {
                self.status = AssignmentStatus::InProgress;
                Ok(())
            }
            status => Err(invalid_transition("resume", status)),
        }
    }

    pub fn complete(&mut self, now: Timestamp) -> Result<(), CoreError> {
        match self.status {
            AssignmentStatus::InProgress => {
                self.status = AssignmentStatus::Completed;
                self.completed_at = Some(now);
                Ok(())
            }
            status => Err(invalid_transition("complete", status)),
        }
    }

    pub fn cancel(&mut self) -> Result<(), CoreError> {
        match self.status {
            status if status.is_terminal() => Err(invalid_transition("cancel", status)),
            _ => {
                self.status = AssignmentStatus::Cancelled;
                Ok(())
            }
        }
    }

    /// Whether the assignment is past its due date and still open.
    pub fn is_overdue(&self, now: Timestamp) -> bool {
        !self.status.is_terminal() && self.due_at.is_some_and(|due| due < now)
    }
}

fn invalid_transition(action: &str, status: AssignmentStatus) -> CoreError {
    CoreError::InvalidState(format!(
        "Cannot {action} an assignment in status '{}'",
        status.as_str()
    ))
}

// ---------------------------------------------------------------------------
// Progress tree
// ---------------------------------------------------------------------------

/// Progress against one component version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentProgress {
    pub id: EntityId,
    pub step_progress_id: EntityId,
    pub component_version_id: EntityId,
    /// 0-based position within the step, frozen from the version's rank
    /// order at instantiation time.
    pub order_index: i32,
    pub required: bool,
    pub state: ComponentState,
    pub attempts: i32,
    pub best_score: Option<f64>,
    pub last_score: Option<f64>,
    pub time_spent_secs: i64,
    /// Free-form component-kind-specific progress data (quiz answers,
    /// submission references, scroll position).
    pub payload: serde_json::Value,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl ComponentProgress {
    pub fn is_completed(&self) -> bool {
        self.state == ComponentState::Completed
    }

    /// Record activity without completing: accumulates time, optionally
    /// replaces the payload blob, and moves a fresh component to
    /// `InProgress`.
    pub fn record_activity(
        &mut self,
        delta_secs: i64,
        payload: Option<serde_json::Value>,
        now: Timestamp,
    ) -> Result<(), CoreError> {
        if delta_secs < 0 {
            return Err(CoreError::Validation(format!(
                "Time delta must be non-negative, got {delta_secs}"
            )));
        }
        self.time_spent_secs += delta_secs;
        if let Some(payload) = payload {
            self.payload = payload;
        }
        if self.state == ComponentState::NotStarted {
            self.state = ComponentState::InProgress;
            self.started_at = Some(now);
        }
        Ok(())
    }

    fn mark_completed(&mut self, score: Option<f64>, now: Timestamp) {
        self.attempts += 1;
        self.state = ComponentState::Completed;
        self.started_at.get_or_insert(now);
        self.completed_at = Some(now);
        if let Some(score) = score {
            self.last_score = Some(score);
            self.best_score = Some(self.best_score.map_or(score, |best| best.max(score)));
        }
    }
}

/// Progress against one step version, owning its component records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepProgress {
    pub id: EntityId,
    pub flow_progress_id: EntityId,
    pub step_version_id: EntityId,
    /// 0-based sequential position, frozen from the version's rank order.
    pub order_index: i32,
    pub percent: f64,
    pub unlocked: bool,
    pub components_completed: i32,
    pub components_total: i32,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub components: Vec<ComponentProgress>,
}

impl StepProgress {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Make the step eligible to be worked on. Idempotent.
    pub fn unlock(&mut self) {
        self.unlocked = true;
    }

    /// Explicit admin override; the completion path never locks a step.
    pub fn lock(&mut self) {
        self.unlocked = false;
    }

    /// Every required component is complete. Vacuously true for a step
    /// whose components are all optional; only evaluated on completion
    /// events, so a step is never completed before any work happened.
    pub fn required_components_complete(&self) -> bool {
        self.components
            .iter()
            .filter(|c| c.required)
            .all(ComponentProgress::is_completed)
    }

    /// Recount completion state from the component records.
    pub fn recalculate(&mut self) {
        self.components_total = self.components.len() as i32;
        self.components_completed =
            self.components.iter().filter(|c| c.is_completed()).count() as i32;
        self.percent = if self.components_total == 0 {
            0.0
        } else {
            f64::from(self.components_completed) / f64::from(self.components_total) * 100.0
        };
    }
}

/// Per-assignment aggregate over the whole step/component tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowProgress {
    pub id: EntityId,
    pub assignment_id: EntityId,
    pub user_id: EntityId,
    pub percent: f64,
    pub steps_completed: i32,
    pub steps_total: i32,
    pub components_completed: i32,
    pub components_total: i32,
    pub time_spent_secs: i64,
    /// First unlocked, not-yet-completed step, if any.
    pub current_step_id: Option<EntityId>,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub steps: Vec<StepProgress>,
}

/// Which records a completion call transitioned, so callers (and the
/// notification collaborator behind them) can react per transition.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionOutcome {
    /// The component was already complete; nothing changed.
    pub already_completed: bool,
    pub component_completed: bool,
    /// Step progress id of the step this call completed, if any.
    pub completed_step_id: Option<EntityId>,
    /// Step progress id of the next sequential step this call unlocked.
    pub unlocked_step_id: Option<EntityId>,
    pub flow_completed: bool,
    pub flow_percent: f64,
}

impl CompletionOutcome {
    fn already_completed(percent: f64) -> Self {
        Self {
            already_completed: true,
            component_completed: false,
            completed_step_id: None,
            unlocked_step_id: None,
            flow_completed: false,
            flow_percent: percent,
        }
    }
}

impl FlowProgress {
    /// Instantiate the shadow tree for an assignment from the version's
    /// shape. Steps and components are laid out in rank order; only the
    /// first step starts unlocked.
    pub fn from_version(
        assignment_id: EntityId,
        user_id: EntityId,
        version: &FlowVersion,
        now: Timestamp,
    ) -> FlowProgress {
        let flow_progress_id = new_entity_id();
        let steps: Vec<StepProgress> = version
            .steps_in_order()
            .into_iter()
            .enumerate()
            .map(|(step_index, step_version)| {
                let step_progress_id = new_entity_id();
                let components = step_version
                    .components_in_order()
                    .into_iter()
                    .enumerate()
                    .map(|(component_index, component_version)| ComponentProgress {
                        id: new_entity_id(),
                        step_progress_id,
                        component_version_id: component_version.id,
                        order_index: component_index as i32,
                        required: component_version.required,
                        state: ComponentState::NotStarted,
                        attempts: 0,
                        best_score: None,
                        last_score: None,
                        time_spent_secs: 0,
                        payload: serde_json::Value::Object(Default::default()),
                        started_at: None,
                        completed_at: None,
                    })
                    .collect::<Vec<_>>();
                StepProgress {
                    id: step_progress_id,
                    flow_progress_id,
                    step_version_id: step_version.id,
                    order_index: step_index as i32,
                    percent: 0.0,
                    unlocked: step_index == 0,
                    components_completed: 0,
                    components_total: components.len() as i32,
                    started_at: None,
                    completed_at: None,
                    components,
                }
            })
            .collect();

        let components_total = steps.iter().map(|s| s.components_total).sum();
        let current_step_id = steps.first().map(|s| s.id);
        FlowProgress {
            id: flow_progress_id,
            assignment_id,
            user_id,
            percent: 0.0,
            steps_completed: 0,
            steps_total: steps.len() as i32,
            components_completed: 0,
            components_total,
            time_spent_secs: 0,
            current_step_id,
            created_at: now,
            completed_at: None,
            steps,
        }
    }

    /// Apply a component completion event and roll the result up through
    /// step and flow. Returns which records transitioned.
    ///
    /// Completing an already-complete component is a flagged no-op, not an
    /// error. Completing a component under a locked step is rejected.
    pub fn apply_component_completion(
        &mut self,
        component_progress_id: EntityId,
        score: Option<f64>,
        now: Timestamp,
    ) -> Result<CompletionOutcome, CoreError> {
        let step_index = self
            .steps
            .iter()
            .position(|s| s.components.iter().any(|c| c.id == component_progress_id))
            .ok_or(CoreError::NotFound {
                entity: "ComponentProgress",
                id: component_progress_id,
            })?;

        let step = &mut self.steps[step_index];
        if !step.unlocked {
            return Err(CoreError::InvalidState(format!(
                "Step {} is locked; its components cannot be completed",
                step.id
            )));
        }

        let component = step
            .components
            .iter_mut()
            .find(|c| c.id == component_progress_id)
            .ok_or(CoreError::NotFound {
                entity: "ComponentProgress",
                id: component_progress_id,
            })?;

        if component.is_completed() {
            return Ok(CompletionOutcome::already_completed(self.percent));
        }

        component.mark_completed(score, now);
        step.started_at.get_or_insert(now);
        step.recalculate();

        let mut completed_step_id = None;
        if !step.is_completed() && step.required_components_complete() {
            step.completed_at = Some(now);
            completed_step_id = Some(step.id);
        }

        // Unlock the next sequential step once this one completes.
        let mut unlocked_step_id = None;
        if completed_step_id.is_some() {
            let next_order = self.steps[step_index].order_index + 1;
            if let Some(next) = self
                .steps
                .iter_mut()
                .find(|s| s.order_index == next_order && !s.unlocked)
            {
                next.unlock();
                unlocked_step_id = Some(next.id);
            }
        }

        let was_flow_completed = self.completed_at.is_some();
        self.recalculate(now);

        Ok(CompletionOutcome {
            already_completed: false,
            component_completed: true,
            completed_step_id,
            unlocked_step_id,
            flow_completed: !was_flow_completed && self.completed_at.is_some(),
            flow_percent: self.percent,
        })
    }

    /// Recount the flow aggregate from the step records. Idempotent: the
    /// result depends only on the current tree, and the completion
    /// timestamp is stamped once, the first time 100% is reached.
    pub fn recalculate(&mut self, now: Timestamp) {
        for step in &mut self.steps {
            step.recalculate();
        }
        self.steps_total = self.steps.len() as i32;
        self.steps_completed = self.steps.iter().filter(|s| s.is_completed()).count() as i32;
        self.components_total = self.steps.iter().map(|s| s.components_total).sum();
        self.components_completed = self.steps.iter().map(|s| s.components_completed).sum();
        self.time_spent_secs = self
            .steps
            .iter()
            .flat_map(|s| &s.components)
            .map(|c| c.time_spent_secs)
            .sum();

        // Flow percentage is the plain average of step percentages, not a
        // component-weighted one. Steps with many components weigh the same
        // as steps with few; kept for compatibility with recorded history.
        self.percent = if self.steps.is_empty() {
            0.0
        } else {
            self.steps.iter().map(|s| s.percent).sum::<f64>() / self.steps.len() as f64
        };

        let mut ordered: Vec<&StepProgress> = self.steps.iter().collect();
        ordered.sort_by_key(|s| s.order_index);
        self.current_step_id = ordered
            .iter()
            .find(|s| s.unlocked && !s.is_completed())
            .map(|s| s.id);

        if self.percent >= 100.0 && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
    }

    /// Find a step progress record by id.
    pub fn step_mut(&mut self, step_progress_id: EntityId) -> Result<&mut StepProgress, CoreError> {
        self.steps
            .iter_mut()
            .find(|s| s.id == step_progress_id)
            .ok_or(CoreError::NotFound {
                entity: "StepProgress",
                id: step_progress_id,
            })
    }

    /// Find a component progress record by id.
    pub fn component_mut(
        &mut self,
        component_progress_id: EntityId,
    ) -> Result<&mut ComponentProgress, CoreError> {
        self.steps
            .iter_mut()
            .flat_map(|s| s.components.iter_mut())
            .find(|c| c.id == component_progress_id)
            .ok_or(CoreError::NotFound {
                entity: "ComponentProgress",
                id: component_progress_id,
            })
    }
}

// ---------------------------------------------------------------------------
// User aggregate
// ---------------------------------------------------------------------------

/// Per-user roll-up across all assignments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProgress {
    pub id: EntityId,
    pub user_id: EntityId,
    /// Assignments not yet started.
    pub assigned_count: i32,
    /// Assignments in progress or paused.
    pub active_count: i32,
    pub completed_count: i32,
    pub overdue_count: i32,
    pub total_time_secs: i64,
    pub achievements_count: i32,
    pub updated_at: Timestamp,
}

impl UserProgress {
    /// Recount the aggregate from the user's assignments. `existing`
    /// preserves the record id and achievements across recalculations.
    pub fn compute(
        user_id: EntityId,
        assignments: &[Assignment],
        total_time_secs: i64,
        existing: Option<&UserProgress>,
        now: Timestamp,
    ) -> UserProgress {
        let assigned_count = assignments
            .iter()
            .filter(|a| a.status == AssignmentStatus::Assigned)
            .count() as i32;
        let active_count = assignments
            .iter()
            .filter(|a| {
                matches!(
                    a.status,
                    AssignmentStatus::InProgress | AssignmentStatus::Paused
                )
            })
            .count() as i32;
        let completed_count = assignments
            .iter()
            .filter(|a| a.status == AssignmentStatus::Completed)
            .count() as i32;
        let overdue_count = assignments.iter().filter(|a| a.is_overdue(now)).count() as i32;

        UserProgress {
            id: existing.map_or_else(new_entity_id, |e| e.id),
            user_id,
            assigned_count,
            active_count,
            completed_count,
            overdue_count,
            total_time_secs,
            achievements_count: existing.map_or(0, |e| e.achievements_count),
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
