//! sqlx implementation of the progress storage contract.
//!
//! A progress tree is owned exclusively by its assignment; every mutation
//! arrives here as a whole-tree save so a completion cascade is never
//! observable half-applied.

use std::collections::HashMap;

use async_trait::async_trait;

use ramp_core::error::CoreError;
use ramp_core::progress::{FlowProgress, UserProgress};
use ramp_core::store::ProgressStore;
use ramp_core::types::EntityId;

use crate::models::progress::{
    ComponentProgressRow, FlowProgressRow, StepProgressRow, UserProgressRow,
};
use crate::repositories::map_db_err;
use crate::DbPool;

/// Column lists shared across queries to avoid repetition.
const FLOW_COLUMNS: &str = "id, assignment_id, user_id, percent, steps_completed, steps_total, \
    components_completed, components_total, time_spent_secs, current_step_id, created_at, \
    completed_at";
const STEP_COLUMNS: &str = "id, flow_progress_id, step_version_id, order_index, percent, \
    unlocked, components_completed, components_total, started_at, completed_at";
const COMPONENT_COLUMNS: &str = "id, step_progress_id, component_version_id, order_index, \
    required, state, attempts, best_score, last_score, time_spent_secs, payload, started_at, \
    completed_at";
const USER_COLUMNS: &str = "id, user_id, assigned_count, active_count, completed_count, \
    overdue_count, total_time_secs, achievements_count, updated_at";

/// Progress storage backed by PostgreSQL.
pub struct PgProgressStore {
    pool: DbPool,
}

impl PgProgressStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Materialize the full tree for a loaded `flow_progress` row.
    async fn load_tree(&self, row: FlowProgressRow) -> Result<FlowProgress, CoreError> {
        let query = format!(
            "SELECT {STEP_COLUMNS} FROM step_progress \
             WHERE flow_progress_id = $1 ORDER BY order_index"
        );
        let step_rows: Vec<StepProgressRow> = sqlx::query_as(&query)
            .bind(row.id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;

        let step_ids: Vec<EntityId> = step_rows.iter().map(|r| r.id).collect();
        let query = format!(
            "SELECT {COMPONENT_COLUMNS} FROM component_progress \
             WHERE step_progress_id = ANY($1) ORDER BY order_index"
        );
        let component_rows: Vec<ComponentProgressRow> = sqlx::query_as(&query)
            .bind(&step_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;

        let mut components_by_step: HashMap<EntityId, Vec<_>> = HashMap::new();
        for component_row in component_rows {
            let step_progress_id = component_row.step_progress_id;
            components_by_step
                .entry(step_progress_id)
                .or_default()
                .push(component_row.into_domain()?);
        }

        let steps = step_rows
            .into_iter()
            .map(|step_row| {
                let components = components_by_step.remove(&step_row.id).unwrap_or_default();
                step_row.into_domain(components)
            })
            .collect();
        Ok(row.into_domain(steps))
    }

    async fn find_tree_where(
        &self,
        filter_sql: &str,
        id: EntityId,
    ) -> Result<Option<FlowProgress>, CoreError> {
        let query = format!("SELECT {FLOW_COLUMNS} FROM flow_progress WHERE {filter_sql}");
        let row: Option<FlowProgressRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        match row {
            Some(row) => Ok(Some(self.load_tree(row).await?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ProgressStore for PgProgressStore {
    async fn insert_progress_tree(&self, tree: &FlowProgress) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        sqlx::query(
            "INSERT INTO flow_progress \
                (id, assignment_id, user_id, percent, steps_completed, steps_total, \
                 components_completed, components_total, time_spent_secs, current_step_id, \
                 created_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(tree.id)
        .bind(tree.assignment_id)
        .bind(tree.user_id)
        .bind(tree.percent)
        .bind(tree.steps_completed)
        .bind(tree.steps_total)
        .bind(tree.components_completed)
        .bind(tree.components_total)
        .bind(tree.time_spent_secs)
        .bind(tree.current_step_id)
        .bind(tree.created_at)
        .bind(tree.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        for step in &tree.steps {
            sqlx::query(
                "INSERT INTO step_progress \
                    (id, flow_progress_id, step_version_id, order_index, percent, unlocked, \
                     components_completed, components_total, started_at, completed_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(step.id)
            .bind(step.flow_progress_id)
            .bind(step.step_version_id)
            .bind(step.order_index)
            .bind(step.percent)
            .bind(step.unlocked)
            .bind(step.components_completed)
            .bind(step.components_total)
            .bind(step.started_at)
            .bind(step.completed_at)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

            for component in &step.components {
                sqlx::query(
                    "INSERT INTO component_progress \
                        (id, step_progress_id, component_version_id, order_index, required, \
                         state, attempts, best_score, last_score, time_spent_secs, payload, \
                         started_at, completed_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
                )
                .bind(component.id)
                .bind(component.step_progress_id)
                .bind(component.component_version_id)
                .bind(component.order_index)
                .bind(component.required)
                .bind(component.state.as_str())
                .bind(component.attempts)
                .bind(component.best_score)
                .bind(component.last_score)
                .bind(component.time_spent_secs)
                .bind(&component.payload)
                .bind(component.started_at)
                .bind(component.completed_at)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
            }
        }

        tx.commit().await.map_err(map_db_err)
    }

    async fn find_by_assignment(
        &self,
        assignment_id: EntityId,
    ) -> Result<Option<FlowProgress>, CoreError> {
        self.find_tree_where("assignment_id = $1", assignment_id)
            .await
    }

    async fn find_by_step(
        &self,
        step_progress_id: EntityId,
    ) -> Result<Option<FlowProgress>, CoreError> {
        self.find_tree_where(
            "id = (SELECT flow_progress_id FROM step_progress WHERE id = $1)",
            step_progress_id,
        )
        .await
    }

    async fn find_by_component(
        &self,
        component_progress_id: EntityId,
    ) -> Result<Option<FlowProgress>, CoreError> {
        self.find_tree_where(
            "id = (SELECT s.flow_progress_id FROM step_progress s \
                   JOIN component_progress c ON c.step_progress_id = s.id \
                   WHERE c.id = $1)",
            component_progress_id,
        )
        .await
    }

    async fn save_progress_tree(&self, tree: &FlowProgress) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let result = sqlx::query(
            "UPDATE flow_progress SET \
                percent = $2, steps_completed = $3, steps_total = $4, \
                components_completed = $5, components_total = $6, time_spent_secs = $7, \
                current_step_id = $8, completed_at = $9 \
             WHERE id = $1",
        )
        .bind(tree.id)
        .bind(tree.percent)
        .bind(tree.steps_completed)
        .bind(tree.steps_total)
        .bind(tree.components_completed)
        .bind(tree.components_total)
        .bind(tree.time_spent_secs)
        .bind(tree.current_step_id)
        .bind(tree.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound {
                entity: "FlowProgress",
                id: tree.id,
            });
        }

        for step in &tree.steps {
            sqlx::query(
                "UPDATE step_progress SET \
                    percent = $2, unlocked = $3, components_completed = $4, \
                    components_total = $5, started_at = $6, completed_at = $7 \
                 WHERE id = $1",
            )
            .bind(step.id)
            .bind(step.percent)
            .bind(step.unlocked)
            .bind(step.components_completed)
            .bind(step.components_total)
            .bind(step.started_at)
            .bind(step.completed_at)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

            for component in &step.components {
                sqlx::query(
                    "UPDATE component_progress SET \
                        state = $2, attempts = $3, best_score = $4, last_score = $5, \
                        time_spent_secs = $6, payload = $7, started_at = $8, completed_at = $9 \
                     WHERE id = $1",
                )
                .bind(component.id)
                .bind(component.state.as_str())
                .bind(component.attempts)
                .bind(component.best_score)
                .bind(component.last_score)
                .bind(component.time_spent_secs)
                .bind(&component.payload)
                .bind(component.started_at)
                .bind(component.completed_at)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
            }
        }

        tx.commit().await.map_err(map_db_err)
    }

    async fn find_user_progress(
        &self,
        user_id: EntityId,
    ) -> Result<Option<UserProgress>, CoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM user_progress WHERE user_id = $1");
        let row: Option<UserProgressRow> = sqlx::query_as(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(row.map(UserProgressRow::into_domain))
    }

    async fn save_user_progress(&self, progress: &UserProgress) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO user_progress \
                (id, user_id, assigned_count, active_count, completed_count, overdue_count, \
                 total_time_secs, achievements_count, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (user_id) DO UPDATE SET \
                assigned_count = EXCLUDED.assigned_count, \
                active_count = EXCLUDED.active_count, \
                completed_count = EXCLUDED.completed_count, \
                overdue_count = EXCLUDED.overdue_count, \
                total_time_secs = EXCLUDED.total_time_secs, \
                achievements_count = EXCLUDED.achievements_count, \
                updated_at = EXCLUDED.updated_at",
        )
        .bind(progress.id)
        .bind(progress.user_id)
        .bind(progress.assigned_count)
        .bind(progress.active_count)
        .bind(progress.completed_count)
        .bind(progress.overdue_count)
        .bind(progress.total_time_secs)
        .bind(progress.achievements_count)
        .bind(progress.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }
}
