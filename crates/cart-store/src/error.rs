use common::UserId;
use domain::CartError;
use thiserror::Error;

/// PostgreSQL SQLSTATE for a violated CHECK constraint.
const CHECK_VIOLATION: &str = "23514";
/// PostgreSQL SQLSTATE raised when `lock_timeout` expires.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Errors that can occur when interacting with the cart store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A stock counter would have gone below zero, or a row it needed is gone.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// A row lock could not be acquired within the configured timeout.
    #[error("Timed out waiting for a row lock")]
    LockTimeout,

    /// A persisted cart no longer satisfies the cart rules.
    #[error("Stored cart for user {user_id} is invalid: {source}")]
    CorruptCart {
        user_id: UserId,
        #[source]
        source: CartError,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            match db_err.code().as_deref() {
                Some(CHECK_VIOLATION) => {
                    return StoreError::ConstraintViolation(db_err.message().to_string());
                }
                Some(LOCK_NOT_AVAILABLE) => return StoreError::LockTimeout,
                _ => {}
            }
        }
        StoreError::Database(err)
    }
}

/// Result type for cart store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
