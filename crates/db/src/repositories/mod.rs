//! Repository layer.
//!
//! Each store wraps a [`DbPool`](crate::DbPool) and implements one of the
//! `ramp_core::store` contracts. Tree reads materialize the full graph;
//! tree writes and the active-version swap run in a single transaction.

pub mod assignment_store;
pub mod progress_store;
pub mod version_store;

pub use assignment_store::PgAssignmentStore;
pub use progress_store::PgProgressStore;
pub use version_store::PgVersionStore;

use ramp_core::error::CoreError;

/// Map a sqlx error onto the domain taxonomy: unique violations surface as
/// `Conflict` (two writers raced on the same slot), everything else is an
/// `Internal` storage fault.
pub(crate) fn map_db_err(e: sqlx::Error) -> CoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return CoreError::Conflict(db.message().to_string());
        }
    }
    tracing::error!(error = %e, "Database operation failed");
    CoreError::Internal(e.to_string())
}
