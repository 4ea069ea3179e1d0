//! Narrow storage and clock contracts the engines are written against.
//!
//! Implementations return fully-materialized graphs: a loaded version or
//! progress tree always carries its children, and a tree-level write
//! persists the whole unit atomically (one transaction, or an equivalent
//! guard). There is no lazy navigation and no partially-loaded entity.

use async_trait::async_trait;

use crate::error::CoreError;
use crate::flow::FlowVersion;
use crate::progress::{Assignment, FlowProgress, UserProgress};
use crate::types::{EntityId, Timestamp};

// ---------------------------------------------------------------------------
// Version storage
// ---------------------------------------------------------------------------

#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Load a version with its full step/component graph.
    async fn find_version(&self, id: EntityId) -> Result<Option<FlowVersion>, CoreError>;

    /// Load the active version for an original flow id, if any.
    async fn find_active_version(
        &self,
        flow_id: EntityId,
    ) -> Result<Option<FlowVersion>, CoreError>;

    /// All versions for an original flow id, full graphs, ascending by
    /// version number.
    async fn list_versions(&self, flow_id: EntityId) -> Result<Vec<FlowVersion>, CoreError>;

    /// Persist a new version tree as one unit.
    async fn insert_version(&self, version: &FlowVersion) -> Result<(), CoreError>;

    /// Atomically set `version_id` active and clear the active flag on any
    /// sibling version of the same flow. A crash can never leave zero or
    /// two active versions observable.
    async fn activate_version(
        &self,
        flow_id: EntityId,
        version_id: EntityId,
    ) -> Result<(), CoreError>;

    /// Delete a batch of versions (cascading to their trees). Returns the
    /// number of versions removed.
    async fn delete_versions(&self, ids: &[EntityId]) -> Result<u64, CoreError>;
}

// ---------------------------------------------------------------------------
// Assignment storage
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn find_assignment(&self, id: EntityId) -> Result<Option<Assignment>, CoreError>;

    async fn insert_assignment(&self, assignment: &Assignment) -> Result<(), CoreError>;

    async fn update_assignment(&self, assignment: &Assignment) -> Result<(), CoreError>;

    async fn list_by_user(&self, user_id: EntityId) -> Result<Vec<Assignment>, CoreError>;

    async fn list_by_flow(&self, flow_id: EntityId) -> Result<Vec<Assignment>, CoreError>;

    /// Assignments whose due date has passed and whose status is still
    /// open. Consumed by the external reminder collaborator.
    async fn list_overdue(&self, now: Timestamp) -> Result<Vec<Assignment>, CoreError>;

    /// Version ids still referenced by assignments in a non-terminal
    /// status. Cleanup must never delete these.
    async fn version_ids_in_use(&self, flow_id: EntityId) -> Result<Vec<EntityId>, CoreError>;
}

// ---------------------------------------------------------------------------
// Progress storage
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Persist a freshly built progress tree as one unit. Fails with
    /// `Conflict` if the assignment already has one.
    async fn insert_progress_tree(&self, tree: &FlowProgress) -> Result<(), CoreError>;

    /// Load the full tree owned by an assignment.
    async fn find_by_assignment(
        &self,
        assignment_id: EntityId,
    ) -> Result<Option<FlowProgress>, CoreError>;

    /// Load the full tree containing a given step progress record.
    async fn find_by_step(
        &self,
        step_progress_id: EntityId,
    ) -> Result<Option<FlowProgress>, CoreError>;

    /// Load the full tree containing a given component progress record.
    async fn find_by_component(
        &self,
        component_progress_id: EntityId,
    ) -> Result<Option<FlowProgress>, CoreError>;

    /// Persist every record of a mutated tree as one unit, so a completion
    /// cascade is never observable half-applied.
    async fn save_progress_tree(&self, tree: &FlowProgress) -> Result<(), CoreError>;

    async fn find_user_progress(
        &self,
        user_id: EntityId,
    ) -> Result<Option<UserProgress>, CoreError>;

    /// Insert-or-update the per-user aggregate.
    async fn save_user_progress(&self, progress: &UserProgress) -> Result<(), CoreError>;
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Single source of "current time" for every stamped timestamp, injectable
/// for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        chrono::Utc::now()
    }
}
