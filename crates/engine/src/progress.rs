//! Progress engine.
//!
//! Owns every mutation of a user's progress tree: instantiation from the
//! assignment's frozen version, completion cascades with their unlock side
//! effects, explicit step lock overrides, and the flow/user roll-ups. Each
//! entry point loads the full tree, applies the pure roll-up from
//! `ramp-core`, persists the result as one unit, and only then publishes
//! the transition events.

use std::sync::Arc;

use ramp_core::error::CoreError;
use ramp_core::progress::{
    Assignment, AssignmentStatus, CompletionOutcome, FlowProgress, UserProgress,
};
use ramp_core::store::{AssignmentStore, Clock, ProgressStore, VersionStore};
use ramp_core::types::EntityId;
use ramp_events::bus::{
    EVENT_ASSIGNMENT_COMPLETED, EVENT_COMPONENT_COMPLETED, EVENT_FLOW_COMPLETED,
    EVENT_STEP_COMPLETED, EVENT_STEP_UNLOCKED,
};
use ramp_events::{DomainEvent, EventBus};

pub struct ProgressEngine {
    versions: Arc<dyn VersionStore>,
    assignments: Arc<dyn AssignmentStore>,
    progress: Arc<dyn ProgressStore>,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,
}

impl ProgressEngine {
    pub fn new(
        versions: Arc<dyn VersionStore>,
        assignments: Arc<dyn AssignmentStore>,
        progress: Arc<dyn ProgressStore>,
        clock: Arc<dyn Clock>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            versions,
            assignments,
            progress,
            clock,
            bus,
        }
    }

    /// Build and persist the shadow progress tree for an assignment from
    /// the version it was pinned to: one step record per step version in
    /// rank order (only the first unlocked), one component record per
    /// component version.
    ///
    /// Fails with `InvalidState` if the pinned version no longer resolves
    /// and with `Conflict` if the assignment already has a tree.
    pub async fn create_initial_progress(
        &self,
        assignment_id: EntityId,
    ) -> Result<FlowProgress, CoreError> {
        let assignment = self.require_assignment(assignment_id).await?;
        let version = self
            .versions
            .find_version(assignment.flow_version_id)
            .await?
            .ok_or_else(|| {
                CoreError::InvalidState(format!(
                    "Assignment {} references flow version {} which no longer exists",
                    assignment.id, assignment.flow_version_id
                ))
            })?;

        let tree = FlowProgress::from_version(
            assignment.id,
            assignment.user_id,
            &version,
            self.clock.now(),
        );
        self.progress.insert_progress_tree(&tree).await?;

        tracing::info!(
            assignment_id = %assignment.id,
            user_id = %assignment.user_id,
            steps = tree.steps_total,
            components = tree.components_total,
            "Created initial progress tree"
        );
        Ok(tree)
    }

    /// Apply a completion event to a component and roll it up.
    ///
    /// Already-completed components return a normal result flagged
    /// `already_completed`. On a real transition the mutated tree is
    /// persisted as one unit; when the flow reaches 100% the owning
    /// assignment (if `InProgress`) is completed in the same call and the
    /// user aggregate refreshed. Events for every transition are published
    /// after the writes so the notification collaborator can react.
    pub async fn complete_component(
        &self,
        component_progress_id: EntityId,
        score: Option<f64>,
    ) -> Result<CompletionOutcome, CoreError> {
        let mut tree = self
            .progress
            .find_by_component(component_progress_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "ComponentProgress",
                id: component_progress_id,
            })?;

        let now = self.clock.now();
        let outcome = tree.apply_component_completion(component_progress_id, score, now)?;
        if outcome.already_completed {
            tracing::debug!(
                component_progress_id = %component_progress_id,
                "Component already completed; nothing to do"
            );
            return Ok(outcome);
        }

        self.progress.save_progress_tree(&tree).await?;
        tracing::debug!(
            assignment_id = %tree.assignment_id,
            flow_percent = tree.percent,
            steps_completed = tree.steps_completed,
            "Rolled up completion cascade"
        );

        if outcome.flow_completed {
            self.complete_owning_assignment(&tree, now).await?;
            self.recalculate_user_progress(tree.user_id).await?;
        }

        self.publish_completion_events(&tree, component_progress_id, score, &outcome, now);
        Ok(outcome)
    }

    /// Recount the flow aggregate from the persisted tree. Safe to call
    /// redundantly; the completion timestamp is only ever stamped once.
    pub async fn recalculate_flow_progress(
        &self,
        assignment_id: EntityId,
    ) -> Result<FlowProgress, CoreError> {
        let mut tree = self
            .progress
            .find_by_assignment(assignment_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "FlowProgress",
                id: assignment_id,
            })?;
        tree.recalculate(self.clock.now());
        self.progress.save_progress_tree(&tree).await?;
        Ok(tree)
    }

    /// Recount the user's cross-assignment aggregate, creating the record
    /// on first call.
    pub async fn recalculate_user_progress(
        &self,
        user_id: EntityId,
    ) -> Result<UserProgress, CoreError> {
        let assignments = self.assignments.list_by_user(user_id).await?;
        let mut total_time_secs = 0;
        for assignment in &assignments {
            if let Some(tree) = self.progress.find_by_assignment(assignment.id).await? {
                total_time_secs += tree.time_spent_secs;
            }
        }

        let existing = self.progress.find_user_progress(user_id).await?;
        let aggregate = UserProgress::compute(
            user_id,
            &assignments,
            total_time_secs,
            existing.as_ref(),
            self.clock.now(),
        );
        self.progress.save_user_progress(&aggregate).await?;
        Ok(aggregate)
    }

    /// The stored per-user aggregate, computed first if absent.
    pub async fn get_user_progress_statistics(
        &self,
        user_id: EntityId,
    ) -> Result<UserProgress, CoreError> {
        match self.progress.find_user_progress(user_id).await? {
            Some(aggregate) => Ok(aggregate),
            None => self.recalculate_user_progress(user_id).await,
        }
    }

    /// Admin override: make a step workable regardless of the sequential
    /// unlock path. Idempotent.
    pub async fn unlock_step(&self, step_progress_id: EntityId) -> Result<(), CoreError> {
        let mut tree = self.require_tree_by_step(step_progress_id).await?;
        let now = self.clock.now();
        let step = tree.step_mut(step_progress_id)?;
        if step.unlocked {
            return Ok(());
        }
        step.unlock();
        let user_id = tree.user_id;
        tree.recalculate(now);
        self.progress.save_progress_tree(&tree).await?;
        tracing::info!(step_progress_id = %step_progress_id, "Step unlocked by override");
        self.bus.publish(
            DomainEvent::new(EVENT_STEP_UNLOCKED, now)
                .with_source("step_progress", step_progress_id)
                .with_user(user_id),
        );
        Ok(())
    }

    /// Admin override: take a step out of play again. Idempotent. The
    /// completion path never locks a step; this is the only place the
    /// unlocked flag is ever reset.
    pub async fn lock_step(&self, step_progress_id: EntityId) -> Result<(), CoreError> {
        let mut tree = self.require_tree_by_step(step_progress_id).await?;
        let now = self.clock.now();
        let step = tree.step_mut(step_progress_id)?;
        if !step.unlocked {
            return Ok(());
        }
        step.lock();
        tree.recalculate(now);
        self.progress.save_progress_tree(&tree).await?;
        tracing::info!(step_progress_id = %step_progress_id, "Step locked by override");
        Ok(())
    }

    /// Record non-completing activity against a component: accumulated
    /// time and the component-kind-specific payload blob.
    pub async fn record_component_activity(
        &self,
        component_progress_id: EntityId,
        delta_secs: i64,
        payload: Option<serde_json::Value>,
    ) -> Result<(), CoreError> {
        let mut tree = self
            .progress
            .find_by_component(component_progress_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "ComponentProgress",
                id: component_progress_id,
            })?;
        let now = self.clock.now();
        tree.component_mut(component_progress_id)?
            .record_activity(delta_secs, payload, now)?;
        tree.recalculate(now);
        self.progress.save_progress_tree(&tree).await?;
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn require_assignment(&self, id: EntityId) -> Result<Assignment, CoreError> {
        self.assignments
            .find_assignment(id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Assignment",
                id,
            })
    }

    async fn require_tree_by_step(
        &self,
        step_progress_id: EntityId,
    ) -> Result<FlowProgress, CoreError> {
        self.progress
            .find_by_step(step_progress_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "StepProgress",
                id: step_progress_id,
            })
    }

    async fn complete_owning_assignment(
        &self,
        tree: &FlowProgress,
        now: ramp_core::types::Timestamp,
    ) -> Result<(), CoreError> {
        let Some(mut assignment) = self.assignments.find_assignment(tree.assignment_id).await?
        else {
            tracing::warn!(
                assignment_id = %tree.assignment_id,
                "Flow completed but owning assignment is missing"
            );
            return Ok(());
        };
        if assignment.status != AssignmentStatus::InProgress {
            return Ok(());
        }
        assignment.complete(now)?;
        self.assignments.update_assignment(&assignment).await?;
        tracing::info!(
            assignment_id = %assignment.id,
            user_id = %assignment.user_id,
            "Assignment completed via flow completion"
        );
        self.bus.publish(
            DomainEvent::new(EVENT_ASSIGNMENT_COMPLETED, now)
                .with_source("assignment", assignment.id)
                .with_user(assignment.user_id),
        );
        Ok(())
    }

    fn publish_completion_events(
        &self,
        tree: &FlowProgress,
        component_progress_id: EntityId,
        score: Option<f64>,
        outcome: &CompletionOutcome,
        now: ramp_core::types::Timestamp,
    ) {
        self.bus.publish(
            DomainEvent::new(EVENT_COMPONENT_COMPLETED, now)
                .with_source("component_progress", component_progress_id)
                .with_user(tree.user_id)
                .with_payload(serde_json::json!({
                    "assignment_id": tree.assignment_id,
                    "score": score,
                })),
        );
        if let Some(step_id) = outcome.completed_step_id {
            self.bus.publish(
                DomainEvent::new(EVENT_STEP_COMPLETED, now)
                    .with_source("step_progress", step_id)
                    .with_user(tree.user_id),
            );
        }
        if let Some(step_id) = outcome.unlocked_step_id {
            self.bus.publish(
                DomainEvent::new(EVENT_STEP_UNLOCKED, now)
                    .with_source("step_progress", step_id)
                    .with_user(tree.user_id),
            );
        }
        if outcome.flow_completed {
            self.bus.publish(
                DomainEvent::new(EVENT_FLOW_COMPLETED, now)
                    .with_source("flow_progress", tree.id)
                    .with_user(tree.user_id)
                    .with_payload(serde_json::json!({
                        "assignment_id": tree.assignment_id,
                        "percent": outcome.flow_percent,
                    })),
            );
        }
    }
}
