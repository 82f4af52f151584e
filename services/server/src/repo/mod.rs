//! Database operations, one module per concern.
//!
//! All queries are runtime-checked `sqlx::query` with binds against tables
//! owned by the management API (schema and migrations live there). Batch
//! writes use multi-row UNNEST inserts so one handled batch costs one round
//! trip.

pub mod configurations;
pub mod telemetry;

use thiserror::Error;

/// SQLSTATE class for foreign-key violations.
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, Error)]
pub enum RepoError {
    /// The batch references a sensor the database does not know.
    #[error("foreign key violation")]
    ForeignKey,
    #[error("database: {0}")]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) {
                return RepoError::ForeignKey;
            }
        }
        RepoError::Sqlx(e)
    }
}
