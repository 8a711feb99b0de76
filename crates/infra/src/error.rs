//! Store error model.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `UniqueViolation` | Duplicate purchase number |
//! | Database (foreign key violation) | `23503` | `ForeignKeyViolation` | Line item for a missing purchase or package |
//! | Database (check constraint violation) | `23514` | `CheckViolation` | Negative quantity, blank purchase number |
//! | Database (numeric overflow) | `22003` | `CheckViolation` | Value exceeds declared precision |
//! | Database (other) | Any other | `Storage` | Other database errors |
//! | PoolClosed / Io / other | N/A | `Storage` | Connectivity failures |

use thiserror::Error;

use checkout_core::DomainError;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Validation or invariant failure detected before touching storage.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("foreign key violated: {0}")]
    ForeignKeyViolation(String),

    #[error("check constraint violated: {0}")]
    CheckViolation(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn foreign_key(msg: impl Into<String>) -> Self {
        Self::ForeignKeyViolation(msg.into())
    }

    pub fn unique(msg: impl Into<String>) -> Self {
        Self::UniqueViolation(msg.into())
    }
}

/// Map SQLx errors to `StoreError`.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation(msg),
                Some("23503") => StoreError::ForeignKeyViolation(msg),
                Some("23514") | Some("22003") => StoreError::CheckViolation(msg),
                _ => StoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
