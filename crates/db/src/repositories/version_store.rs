//! sqlx implementation of the version storage contract.

use std::collections::HashMap;

use async_trait::async_trait;

use ramp_core::error::CoreError;
use ramp_core::flow::{ComponentBody, FlowVersion};
use ramp_core::store::VersionStore;
use ramp_core::types::EntityId;

use crate::models::flow_version::{
    ComponentVersionRow, FlowVersionRow, PayloadColumns, QuizOptionRow, StepVersionRow,
};
use crate::repositories::map_db_err;
use crate::DbPool;

/// Column lists shared across queries to avoid repetition.
const FLOW_COLUMNS: &str = "id, flow_id, version, active, title, description, tags, \
    status, priority, required, deadline_days, created_at";
const STEP_COLUMNS: &str = "id, step_id, flow_version_id, version, active, title, \
    description, rank, required, estimated_minutes, status";
const COMPONENT_COLUMNS: &str = "id, component_id, step_version_id, version, active, title, \
    rank, required, max_attempts, min_passing_score, kind, \
    article_content_md, article_reading_minutes, \
    quiz_passing_score_pct, quiz_time_limit_minutes, quiz_shuffle_options, \
    task_instructions_md, task_submission, task_allowed_file_types, \
    task_max_file_size_mb, task_approval";
const OPTION_COLUMNS: &str = "id, component_version_id, text, correct, points, rank";

/// Version storage backed by PostgreSQL.
pub struct PgVersionStore {
    pool: DbPool,
}

impl PgVersionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Materialize full trees for a batch of version rows.
    async fn load_trees(
        &self,
        version_rows: Vec<FlowVersionRow>,
    ) -> Result<Vec<FlowVersion>, CoreError> {
        if version_rows.is_empty() {
            return Ok(Vec::new());
        }
        let version_ids: Vec<EntityId> = version_rows.iter().map(|r| r.id).collect();

        let query = format!(
            "SELECT {STEP_COLUMNS} FROM flow_step_versions \
             WHERE flow_version_id = ANY($1) ORDER BY rank"
        );
        let step_rows: Vec<StepVersionRow> = sqlx::query_as(&query)
            .bind(&version_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;

        let step_ids: Vec<EntityId> = step_rows.iter().map(|r| r.id).collect();
        let query = format!(
            "SELECT {COMPONENT_COLUMNS} FROM component_versions \
             WHERE step_version_id = ANY($1) ORDER BY rank"
        );
        let component_rows: Vec<ComponentVersionRow> = sqlx::query_as(&query)
            .bind(&step_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;

        let component_ids: Vec<EntityId> = component_rows.iter().map(|r| r.id).collect();
        let query = format!(
            "SELECT {OPTION_COLUMNS} FROM quiz_options \
             WHERE component_version_id = ANY($1) ORDER BY rank"
        );
        let option_rows: Vec<QuizOptionRow> = sqlx::query_as(&query)
            .bind(&component_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;

        let mut options_by_component: HashMap<EntityId, Vec<QuizOptionRow>> = HashMap::new();
        for option in option_rows {
            options_by_component
                .entry(option.component_version_id)
                .or_default()
                .push(option);
        }

        let mut components_by_step: HashMap<EntityId, Vec<_>> = HashMap::new();
        for row in component_rows {
            let options = options_by_component.remove(&row.id).unwrap_or_default();
            let step_version_id = row.step_version_id;
            let component = row.into_domain(options)?;
            components_by_step
                .entry(step_version_id)
                .or_default()
                .push(component);
        }

        let mut steps_by_version: HashMap<EntityId, Vec<_>> = HashMap::new();
        for row in step_rows {
            let components = components_by_step.remove(&row.id).unwrap_or_default();
            let flow_version_id = row.flow_version_id;
            let step = row.into_domain(components)?;
            steps_by_version
                .entry(flow_version_id)
                .or_default()
                .push(step);
        }

        version_rows
            .into_iter()
            .map(|row| {
                let steps = steps_by_version.remove(&row.id).unwrap_or_default();
                row.into_domain(steps)
            })
            .collect()
    }
}

#[async_trait]
impl VersionStore for PgVersionStore {
    async fn find_version(&self, id: EntityId) -> Result<Option<FlowVersion>, CoreError> {
        let query = format!("SELECT {FLOW_COLUMNS} FROM flow_versions WHERE id = $1");
        let row: Option<FlowVersionRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        match row {
            Some(row) => Ok(self.load_trees(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_active_version(
        &self,
        flow_id: EntityId,
    ) -> Result<Option<FlowVersion>, CoreError> {
        let query = format!("SELECT {FLOW_COLUMNS} FROM flow_versions WHERE flow_id = $1 AND active");
        let row: Option<FlowVersionRow> = sqlx::query_as(&query)
            .bind(flow_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        match row {
            Some(row) => Ok(self.load_trees(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_versions(&self, flow_id: EntityId) -> Result<Vec<FlowVersion>, CoreError> {
        let query = format!(
            "SELECT {FLOW_COLUMNS} FROM flow_versions WHERE flow_id = $1 ORDER BY version"
        );
        let rows: Vec<FlowVersionRow> = sqlx::query_as(&query)
            .bind(flow_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        self.load_trees(rows).await
    }

    async fn insert_version(&self, version: &FlowVersion) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        sqlx::query(
            "INSERT INTO flow_versions \
                (id, flow_id, version, active, title, description, tags, status, priority, \
                 required, deadline_days, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(version.id)
        .bind(version.flow_id)
        .bind(version.version)
        .bind(version.active)
        .bind(&version.title)
        .bind(&version.description)
        .bind(&version.tags)
        .bind(version.status.as_str())
        .bind(version.priority.as_str())
        .bind(version.required)
        .bind(version.deadline_days)
        .bind(version.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        for step in &version.steps {
            sqlx::query(
                "INSERT INTO flow_step_versions \
                    (id, step_id, flow_version_id, version, active, title, description, rank, \
                     required, estimated_minutes, status) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(step.id)
            .bind(step.step_id)
            .bind(step.flow_version_id)
            .bind(step.version)
            .bind(step.active)
            .bind(&step.title)
            .bind(&step.description)
            .bind(&step.rank)
            .bind(step.required)
            .bind(step.estimated_minutes)
            .bind(step.status.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

            for component in &step.components {
                let payload = PayloadColumns::from_body(&component.body);
                sqlx::query(
                    "INSERT INTO component_versions \
                        (id, component_id, step_version_id, version, active, title, rank, \
                         required, max_attempts, min_passing_score, kind, \
                         article_content_md, article_reading_minutes, \
                         quiz_passing_score_pct, quiz_time_limit_minutes, quiz_shuffle_options, \
                         task_instructions_md, task_submission, task_allowed_file_types, \
                         task_max_file_size_mb, task_approval) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, \
                             $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)",
                )
                .bind(component.id)
                .bind(component.component_id)
                .bind(component.step_version_id)
                .bind(component.version)
                .bind(component.active)
                .bind(&component.title)
                .bind(&component.rank)
                .bind(component.required)
                .bind(component.max_attempts)
                .bind(component.min_passing_score)
                .bind(component.body.kind().as_str())
                .bind(&payload.article_content_md)
                .bind(payload.article_reading_minutes)
                .bind(payload.quiz_passing_score_pct)
                .bind(payload.quiz_time_limit_minutes)
                .bind(payload.quiz_shuffle_options)
                .bind(&payload.task_instructions_md)
                .bind(&payload.task_submission)
                .bind(&payload.task_allowed_file_types)
                .bind(payload.task_max_file_size_mb)
                .bind(&payload.task_approval)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;

                if let ComponentBody::Quiz(quiz) = &component.body {
                    for option in &quiz.options {
                        sqlx::query(
                            "INSERT INTO quiz_options \
                                (id, component_version_id, text, correct, points, rank) \
                             VALUES ($1, $2, $3, $4, $5, $6)",
                        )
                        .bind(option.id)
                        .bind(component.id)
                        .bind(&option.text)
                        .bind(option.correct)
                        .bind(option.points)
                        .bind(&option.rank)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_db_err)?;
                    }
                }
            }
        }

        tx.commit().await.map_err(map_db_err)
    }

    async fn activate_version(
        &self,
        flow_id: EntityId,
        version_id: EntityId,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        // Deactivate the whole previously-active tree (no-op when nothing
        // was active).
        sqlx::query(
            "UPDATE component_versions c SET active = false \
             FROM flow_step_versions s, flow_versions v \
             WHERE c.step_version_id = s.id AND s.flow_version_id = v.id \
               AND v.flow_id = $1 AND c.active",
        )
        .bind(flow_id)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        sqlx::query(
            "UPDATE flow_step_versions s SET active = false \
             FROM flow_versions v \
             WHERE s.flow_version_id = v.id AND v.flow_id = $1 AND s.active",
        )
        .bind(flow_id)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        sqlx::query("UPDATE flow_versions SET active = false WHERE flow_id = $1 AND active")
            .bind(flow_id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

        // Activate the target tree.
        let result = sqlx::query(
            "UPDATE flow_versions SET active = true WHERE id = $1 AND flow_id = $2",
        )
        .bind(version_id)
        .bind(flow_id)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound {
                entity: "FlowVersion",
                id: version_id,
            });
        }

        sqlx::query("UPDATE flow_step_versions SET active = true WHERE flow_version_id = $1")
            .bind(version_id)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

        sqlx::query(
            "UPDATE component_versions SET active = true WHERE step_version_id IN \
             (SELECT id FROM flow_step_versions WHERE flow_version_id = $1)",
        )
        .bind(version_id)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)
    }

    async fn delete_versions(&self, ids: &[EntityId]) -> Result<u64, CoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        // Step, component, and option rows cascade with the version row.
        let result = sqlx::query("DELETE FROM flow_versions WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(result.rows_affected())
    }
}
