//! Error types for persistence database operations

use crate::{db::ConnError, snapshots::Checksum};

/// Errors that can occur when interacting with the persistence database
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to establish connection to the persistence database
    ///
    /// This occurs during the initial connection phase when the database
    /// client fails to connect to PostgreSQL. Considered retryable, see
    /// `is_connection_error()`.
    #[error("Error connecting to persistence db: {0}")]
    Connection(sqlx::Error),

    /// Failed to run database migrations
    ///
    /// Migration failures are usually fatal and require manual intervention.
    #[error("Error running migrations: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Database query execution failed
    ///
    /// The most common error variant; covers all database operation failures.
    /// Use `is_retryable()` to determine if the error should be retried.
    #[error("Error executing database query: {0}")]
    Database(#[source] sqlx::Error),

    /// A snapshot write carried a checksum that does not match its state blob
    ///
    /// The write is rejected; nothing is stored. This is a caller fault
    /// (corrupted payload or a checksum computed over different bytes) and is
    /// never retryable.
    #[error("snapshot checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        /// The checksum the caller supplied
        expected: Checksum,
        /// The checksum computed over the actual state blob
        computed: Checksum,
    },
}

impl Error {
    /// Returns `true` if the error is likely to be a transient connection issue.
    ///
    /// This is used to determine if an operation should be retried.
    ///
    /// The following errors are considered retryable:
    /// - `Error::Connection`: the initial connection to the database failed.
    /// - `sqlx::Error::Io`: an I/O error, often a network issue or closed socket.
    /// - `sqlx::Error::Tls`: an error during the TLS handshake.
    /// - `sqlx::Error::PoolTimedOut`: the pool timed out waiting for a free connection.
    /// - `sqlx::Error::PoolClosed`: the pool was closed while an operation was pending.
    ///
    /// Other database errors, such as constraint violations, are not
    /// considered transient and will not be retried.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(_) => true,
            Error::Database(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }

    /// Returns `true` if the error is retryable.
    ///
    /// This includes both connection errors and transaction-specific errors
    /// that are commonly encountered with concurrent transactions and
    /// row-level locking:
    ///
    /// - **Connection errors**: checked via [`Error::is_connection_error`]
    /// - **Serialization failures**: two transactions conflicted and one must
    ///   be retried
    /// - **Deadlock detected**: one transaction was aborted and should be
    ///   retried from the beginning
    pub fn is_retryable(&self) -> bool {
        if self.is_connection_error() {
            return true;
        }

        matches!(
            self,
            Error::Database(sqlx::Error::Database(err))
                if err.code().is_some_and(|code| matches!(
                    code.as_ref(),
                    pg_error_codes::SERIALIZATION_FAILURE | pg_error_codes::DEADLOCK_DETECTED
                ))
        )
    }
}

impl From<ConnError> for Error {
    fn from(err: ConnError) -> Self {
        match err {
            ConnError::ConnectionError(err) => Error::Connection(err),
            ConnError::MigrationFailed(err) => Error::Migration(err),
        }
    }
}

/// PostgreSQL error codes for transaction-related errors.
///
/// For reference: <https://www.postgresql.org/docs/current/errcodes-appendix.html>
mod pg_error_codes {
    /// Serialization failure - occurs when two transactions conflict and one needs to be retried.
    pub const SERIALIZATION_FAILURE: &str = "40001";

    /// Deadlock detected - two or more transactions are waiting for each other to release locks.
    pub const DEADLOCK_DETECTED: &str = "40P01";
}
