//! Shared test harness: in-memory implementations of the storage
//! contracts, a settable clock, and content fixtures.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};

use ramp_core::error::CoreError;
use ramp_core::flow::{
    ArticleBody, ComponentBody, ComponentVersion, ContentStatus, FlowPriority, FlowVersion,
    StepVersion,
};
use ramp_core::progress::{Assignment, FlowProgress, UserProgress};
use ramp_core::rank;
use ramp_core::store::{AssignmentStore, Clock, ProgressStore, VersionStore};
use ramp_core::types::{new_entity_id, EntityId, Timestamp};
use ramp_engine::{AssignmentEngine, ProgressEngine, VersioningEngine};
use ramp_events::EventBus;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Settable clock so deadline and timestamp behaviour is deterministic.
pub struct TestClock {
    now: Mutex<Timestamp>,
}

impl TestClock {
    pub fn new() -> Self {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, delta: Duration) {
        *self.now.lock().unwrap() += delta;
    }
}

impl Clock for TestClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// One store implementing all three contracts over mutex-guarded maps,
/// mirroring the atomicity the Postgres repositories get from
/// transactions.
#[derive(Default)]
pub struct MemoryStore {
    versions: Mutex<HashMap<EntityId, FlowVersion>>,
    assignments: Mutex<HashMap<EntityId, Assignment>>,
    trees: Mutex<HashMap<EntityId, FlowProgress>>,
    users: Mutex<HashMap<EntityId, UserProgress>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Count versions of a flow currently flagged active.
    pub fn active_count(&self, flow_id: EntityId) -> usize {
        self.versions
            .lock()
            .unwrap()
            .values()
            .filter(|v| v.flow_id == flow_id && v.active)
            .count()
    }

    /// Remaining version numbers for a flow, ascending.
    pub fn version_numbers(&self, flow_id: EntityId) -> Vec<i32> {
        let mut numbers: Vec<i32> = self
            .versions
            .lock()
            .unwrap()
            .values()
            .filter(|v| v.flow_id == flow_id)
            .map(|v| v.version)
            .collect();
        numbers.sort_unstable();
        numbers
    }
}

#[async_trait]
impl VersionStore for MemoryStore {
    async fn find_version(&self, id: EntityId) -> Result<Option<FlowVersion>, CoreError> {
        Ok(self.versions.lock().unwrap().get(&id).cloned())
    }

    async fn find_active_version(
        &self,
        flow_id: EntityId,
    ) -> Result<Option<FlowVersion>, CoreError> {
        Ok(self
            .versions
            .lock()
            .unwrap()
            .values()
            .find(|v| v.flow_id == flow_id && v.active)
            .cloned())
    }

    async fn list_versions(&self, flow_id: EntityId) -> Result<Vec<FlowVersion>, CoreError> {
        let mut versions: Vec<FlowVersion> = self
            .versions
            .lock()
            .unwrap()
            .values()
            .filter(|v| v.flow_id == flow_id)
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }

    async fn insert_version(&self, version: &FlowVersion) -> Result<(), CoreError> {
        let mut versions = self.versions.lock().unwrap();
        if versions
            .values()
            .any(|v| v.flow_id == version.flow_id && v.version == version.version)
        {
            return Err(CoreError::Conflict(format!(
                "Version {} already exists for flow {}",
                version.version, version.flow_id
            )));
        }
        versions.insert(version.id, version.clone());
        Ok(())
    }

    async fn activate_version(
        &self,
        flow_id: EntityId,
        version_id: EntityId,
    ) -> Result<(), CoreError> {
        let mut versions = self.versions.lock().unwrap();
        if !versions
            .get(&version_id)
            .is_some_and(|v| v.flow_id == flow_id)
        {
            return Err(CoreError::NotFound {
                entity: "FlowVersion",
                id: version_id,
            });
        }
        for version in versions.values_mut().filter(|v| v.flow_id == flow_id) {
            let active = version.id == version_id;
            version.active = active;
            for step in &mut version.steps {
                step.active = active;
                for component in &mut step.components {
                    component.active = active;
                }
            }
        }
        Ok(())
    }

    async fn delete_versions(&self, ids: &[EntityId]) -> Result<u64, CoreError> {
        let mut versions = self.versions.lock().unwrap();
        let mut deleted = 0;
        for id in ids {
            if versions.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[async_trait]
impl AssignmentStore for MemoryStore {
    async fn find_assignment(&self, id: EntityId) -> Result<Option<Assignment>, CoreError> {
        Ok(self.assignments.lock().unwrap().get(&id).cloned())
    }

    async fn insert_assignment(&self, assignment: &Assignment) -> Result<(), CoreError> {
        self.assignments
            .lock()
            .unwrap()
            .insert(assignment.id, assignment.clone());
        Ok(())
    }

    async fn update_assignment(&self, assignment: &Assignment) -> Result<(), CoreError> {
        let mut assignments = self.assignments.lock().unwrap();
        if !assignments.contains_key(&assignment.id) {
            return Err(CoreError::NotFound {
                entity: "Assignment",
                id: assignment.id,
            });
        }
        assignments.insert(assignment.id, assignment.clone());
        Ok(())
    }

    async fn list_by_user(&self, user_id: EntityId) -> Result<Vec<Assignment>, CoreError> {
        let mut list: Vec<Assignment> = self
            .assignments
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by_key(|a| a.assigned_at);
        Ok(list)
    }

    async fn list_by_flow(&self, flow_id: EntityId) -> Result<Vec<Assignment>, CoreError> {
        let mut list: Vec<Assignment> = self
            .assignments
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.flow_id == flow_id)
            .cloned()
            .collect();
        list.sort_by_key(|a| a.assigned_at);
        Ok(list)
    }

    async fn list_overdue(&self, now: Timestamp) -> Result<Vec<Assignment>, CoreError> {
        let mut list: Vec<Assignment> = self
            .assignments
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.is_overdue(now))
            .cloned()
            .collect();
        list.sort_by_key(|a| a.due_at);
        Ok(list)
    }

    async fn version_ids_in_use(&self, flow_id: EntityId) -> Result<Vec<EntityId>, CoreError> {
        let mut ids: Vec<EntityId> = self
            .assignments
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.flow_id == flow_id && !a.status.is_terminal())
            .map(|a| a.flow_version_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn insert_progress_tree(&self, tree: &FlowProgress) -> Result<(), CoreError> {
        let mut trees = self.trees.lock().unwrap();
        if trees
            .values()
            .any(|t| t.assignment_id == tree.assignment_id)
        {
            return Err(CoreError::Conflict(format!(
                "Assignment {} already has a progress tree",
                tree.assignment_id
            )));
        }
        trees.insert(tree.id, tree.clone());
        Ok(())
    }

    async fn find_by_assignment(
        &self,
        assignment_id: EntityId,
    ) -> Result<Option<FlowProgress>, CoreError> {
        Ok(self
            .trees
            .lock()
            .unwrap()
            .values()
            .find(|t| t.assignment_id == assignment_id)
            .cloned())
    }

    async fn find_by_step(
        &self,
        step_progress_id: EntityId,
    ) -> Result<Option<FlowProgress>, CoreError> {
        Ok(self
            .trees
            .lock()
            .unwrap()
            .values()
            .find(|t| t.steps.iter().any(|s| s.id == step_progress_id))
            .cloned())
    }

    async fn find_by_component(
        &self,
        component_progress_id: EntityId,
    ) -> Result<Option<FlowProgress>, CoreError> {
        Ok(self
            .trees
            .lock()
            .unwrap()
            .values()
            .find(|t| {
                t.steps
                    .iter()
                    .flat_map(|s| &s.components)
                    .any(|c| c.id == component_progress_id)
            })
            .cloned())
    }

    async fn save_progress_tree(&self, tree: &FlowProgress) -> Result<(), CoreError> {
        let mut trees = self.trees.lock().unwrap();
        if !trees.contains_key(&tree.id) {
            return Err(CoreError::NotFound {
                entity: "FlowProgress",
                id: tree.id,
            });
        }
        trees.insert(tree.id, tree.clone());
        Ok(())
    }

    async fn find_user_progress(
        &self,
        user_id: EntityId,
    ) -> Result<Option<UserProgress>, CoreError> {
        Ok(self.users.lock().unwrap().get(&user_id).cloned())
    }

    async fn save_user_progress(&self, progress: &UserProgress) -> Result<(), CoreError> {
        self.users
            .lock()
            .unwrap()
            .insert(progress.user_id, progress.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A published, inactive version tree: `steps[i]` components per step, all
/// required, article bodies.
pub fn version_fixture(flow_id: EntityId, version: i32, steps: &[usize]) -> FlowVersion {
    let flow_version_id = new_entity_id();
    let step_ranks = rank::generate_default_ranks(steps.len());
    let steps = steps
        .iter()
        .zip(&step_ranks)
        .enumerate()
        .map(|(step_index, (&component_count, step_rank))| {
            let step_version_id = new_entity_id();
            let component_ranks = rank::generate_default_ranks(component_count);
            let components = component_ranks
                .iter()
                .enumerate()
                .map(|(i, component_rank)| ComponentVersion {
                    id: new_entity_id(),
                    component_id: new_entity_id(),
                    step_version_id,
                    version,
                    active: false,
                    title: format!("Component {i}"),
                    rank: component_rank.clone(),
                    required: true,
                    max_attempts: None,
                    min_passing_score: None,
                    body: ComponentBody::Article(ArticleBody {
                        content_md: format!("# Component {i}"),
                        reading_minutes: Some(5),
                    }),
                })
                .collect();
            StepVersion {
                id: step_version_id,
                step_id: new_entity_id(),
                flow_version_id,
                version,
                active: false,
                title: format!("Step {step_index}"),
                description: None,
                rank: step_rank.clone(),
                required: true,
                estimated_minutes: Some(30),
                status: ContentStatus::Published,
                components,
            }
        })
        .collect();
    FlowVersion {
        id: flow_version_id,
        flow_id,
        version,
        active: false,
        title: "Backend onboarding".into(),
        description: Some("Ramp-up for new backend engineers".into()),
        tags: vec!["backend".into()],
        status: ContentStatus::Published,
        priority: FlowPriority::Medium,
        required: true,
        deadline_days: Some(30),
        created_at: Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap(),
        steps,
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<TestClock>,
    pub bus: Arc<EventBus>,
    pub versioning: VersioningEngine,
    pub progress: ProgressEngine,
    pub assignments: AssignmentEngine,
}

pub fn harness() -> Harness {
    let store = MemoryStore::new();
    let clock = Arc::new(TestClock::new());
    let bus = Arc::new(EventBus::default());
    Harness {
        versioning: VersioningEngine::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            bus.clone(),
        ),
        progress: ProgressEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            clock.clone(),
            bus.clone(),
        ),
        assignments: AssignmentEngine::new(
            store.clone(),
            store.clone(),
            clock.clone(),
            bus.clone(),
        ),
        store,
        clock,
        bus,
    }
}

/// Seed an active version for a fresh flow and return (flow_id, version).
pub async fn seed_active_flow(h: &Harness, steps: &[usize]) -> (EntityId, FlowVersion) {
    let flow_id = new_entity_id();
    let version = version_fixture(flow_id, 1, steps);
    h.store.insert_version(&version).await.unwrap();
    let activated = h.versioning.activate_version(version.id).await.unwrap();
    (flow_id, activated)
}
