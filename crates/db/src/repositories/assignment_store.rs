//! sqlx implementation of the assignment storage contract.

use async_trait::async_trait;

use ramp_core::error::CoreError;
use ramp_core::progress::Assignment;
use ramp_core::store::AssignmentStore;
use ramp_core::types::{EntityId, Timestamp};

use crate::models::assignment::AssignmentRow;
use crate::repositories::map_db_err;
use crate::DbPool;

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, user_id, flow_id, flow_version_id, assigned_by, buddy_id, \
    mentor_id, status, assigned_at, started_at, completed_at, due_at";

/// Terminal statuses, excluded from "in use" and overdue queries.
const TERMINAL: &str = "('completed', 'cancelled')";

/// Assignment storage backed by PostgreSQL.
pub struct PgAssignmentStore {
    pool: DbPool,
}

impl PgAssignmentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn into_domain(rows: Vec<AssignmentRow>) -> Result<Vec<Assignment>, CoreError> {
    rows.into_iter().map(AssignmentRow::into_domain).collect()
}

#[async_trait]
impl AssignmentStore for PgAssignmentStore {
    async fn find_assignment(&self, id: EntityId) -> Result<Option<Assignment>, CoreError> {
        let query = format!("SELECT {COLUMNS} FROM assignments WHERE id = $1");
        let row: Option<AssignmentRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
        row.map(AssignmentRow::into_domain).transpose()
    }

    async fn insert_assignment(&self, assignment: &Assignment) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO assignments \
                (id, user_id, flow_id, flow_version_id, assigned_by, buddy_id, mentor_id, \
                 status, assigned_at, started_at, completed_at, due_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(assignment.id)
        .bind(assignment.user_id)
        .bind(assignment.flow_id)
        .bind(assignment.flow_version_id)
        .bind(assignment.assigned_by)
        .bind(assignment.buddy_id)
        .bind(assignment.mentor_id)
        .bind(assignment.status.as_str())
        .bind(assignment.assigned_at)
        .bind(assignment.started_at)
        .bind(assignment.completed_at)
        .bind(assignment.due_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn update_assignment(&self, assignment: &Assignment) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE assignments SET \
                status = $2, started_at = $3, completed_at = $4, due_at = $5, \
                buddy_id = $6, mentor_id = $7 \
             WHERE id = $1",
        )
        .bind(assignment.id)
        .bind(assignment.status.as_str())
        .bind(assignment.started_at)
        .bind(assignment.completed_at)
        .bind(assignment.due_at)
        .bind(assignment.buddy_id)
        .bind(assignment.mentor_id)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound {
                entity: "Assignment",
                id: assignment.id,
            });
        }
        Ok(())
    }

    async fn list_by_user(&self, user_id: EntityId) -> Result<Vec<Assignment>, CoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM assignments WHERE user_id = $1 ORDER BY assigned_at"
        );
        let rows: Vec<AssignmentRow> = sqlx::query_as(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        into_domain(rows)
    }

    async fn list_by_flow(&self, flow_id: EntityId) -> Result<Vec<Assignment>, CoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM assignments WHERE flow_id = $1 ORDER BY assigned_at"
        );
        let rows: Vec<AssignmentRow> = sqlx::query_as(&query)
            .bind(flow_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        into_domain(rows)
    }

    async fn list_overdue(&self, now: Timestamp) -> Result<Vec<Assignment>, CoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM assignments \
             WHERE due_at IS NOT NULL AND due_at < $1 AND status NOT IN {TERMINAL} \
             ORDER BY due_at"
        );
        let rows: Vec<AssignmentRow> = sqlx::query_as(&query)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        into_domain(rows)
    }

    async fn version_ids_in_use(&self, flow_id: EntityId) -> Result<Vec<EntityId>, CoreError> {
        let query = format!(
            "SELECT DISTINCT flow_version_id FROM assignments \
             WHERE flow_id = $1 AND status NOT IN {TERMINAL}"
        );
        let rows: Vec<(EntityId,)> = sqlx::query_as(&query)
            .bind(flow_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}
