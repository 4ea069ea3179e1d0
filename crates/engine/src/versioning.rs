//! Content versioning engine.
//!
//! Freezes an immutable copy of a flow's step/component tree whenever
//! content changes, maintains the single-active-version invariant per
//! original flow, and garbage-collects versions no open assignment needs
//! any more. Version trees are read-only once written; an edit always
//! produces the next version.

use std::sync::Arc;

use ramp_core::error::CoreError;
use ramp_core::flow::FlowVersion;
use ramp_core::store::{AssignmentStore, Clock, VersionStore};
use ramp_core::types::EntityId;
use ramp_core::validation;
use ramp_events::bus::{EVENT_VERSION_ACTIVATED, EVENT_VERSION_CREATED};
use ramp_events::{DomainEvent, EventBus};

pub struct VersioningEngine {
    versions: Arc<dyn VersionStore>,
    assignments: Arc<dyn AssignmentStore>,
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,
}

impl VersioningEngine {
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

    /// Deep-clone the tree reachable from `source_version_id` into a new
    /// inactive version with the next version number for that flow.
    ///
    /// Original ids are preserved on every cloned node; node ids and the
    /// version id are fresh; rank keys are copied verbatim.
    pub async fn create_new_version(
        &self,
        source_version_id: EntityId,
    ) -> Result<FlowVersion, CoreError> {
        let source = self
            .versions
            .find_version(source_version_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "FlowVersion",
                id: source_version_id,
            })?;

        let existing = self.versions.list_versions(source.flow_id).await?;
        let next_number = existing.iter().map(|v| v.version).max().unwrap_or(0) + 1;

        let now = self.clock.now();
        let clone = source.clone_as_version(next_number, now);
        validation::validate_flow_version(&clone)?;
        self.versions.insert_version(&clone).await?;

        tracing::info!(
            flow_id = %clone.flow_id,
            version = clone.version,
            version_id = %clone.id,
            "Created new flow version"
        );
        self.bus.publish(
            DomainEvent::new(EVENT_VERSION_CREATED, now)
                .with_source("flow_version", clone.id)
                .with_payload(serde_json::json!({
                    "flow_id": clone.flow_id,
                    "version": clone.version,
                })),
        );
        Ok(clone)
    }

    /// Make `version_id` the active version for its flow, deactivating the
    /// previously active sibling in the same unit of work. Idempotent when
    /// the version is already active; a no-op deactivation when no sibling
    /// was active.
    pub async fn activate_version(&self, version_id: EntityId) -> Result<FlowVersion, CoreError> {
        let version = self
            .versions
            .find_version(version_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "FlowVersion",
                id: version_id,
            })?;

        if version.active {
            return Ok(version);
        }

        self.versions
            .activate_version(version.flow_id, version_id)
            .await?;

        let now = self.clock.now();
        tracing::info!(
            flow_id = %version.flow_id,
            version = version.version,
            version_id = %version_id,
            "Activated flow version"
        );
        self.bus.publish(
            DomainEvent::new(EVENT_VERSION_ACTIVATED, now)
                .with_source("flow_version", version_id)
                .with_payload(serde_json::json!({
                    "flow_id": version.flow_id,
                    "version": version.version,
                })),
        );

        // Reload so the returned tree carries the persisted flags on every
        // node, not just the root.
        self.versions
            .find_version(version_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "FlowVersion",
                id: version_id,
            })
    }

    /// The active version for an original flow id, if any.
    pub async fn get_active_version(
        &self,
        flow_id: EntityId,
    ) -> Result<Option<FlowVersion>, CoreError> {
        self.versions.find_active_version(flow_id).await
    }

    /// All versions of a flow, ascending by version number.
    pub async fn get_all_versions(&self, flow_id: EntityId) -> Result<Vec<FlowVersion>, CoreError> {
        self.versions.list_versions(flow_id).await
    }

    /// Delete old versions nothing references any more.
    ///
    /// Walks versions oldest-first and deletes those that are neither
    /// active nor referenced by an open assignment, stopping once only
    /// `keep_minimum` versions would remain. Returns the number deleted.
    pub async fn cleanup_unused_versions(
        &self,
        flow_id: EntityId,
        keep_minimum: usize,
    ) -> Result<u64, CoreError> {
        let versions = self.versions.list_versions(flow_id).await?;
        let in_use = self.assignments.version_ids_in_use(flow_id).await?;

        let mut remaining = versions.len();
        let mut to_delete = Vec::new();
        for version in &versions {
            if remaining <= keep_minimum {
                break;
            }
            if version.active || in_use.contains(&version.id) {
                continue;
            }
            to_delete.push(version.id);
            remaining -= 1;
        }

        if to_delete.is_empty() {
            return Ok(0);
        }

        let deleted = self.versions.delete_versions(&to_delete).await?;
        tracing::info!(
            flow_id = %flow_id,
            deleted,
            kept = remaining,
            "Cleaned up unused flow versions"
        );
        Ok(deleted)
    }
}
