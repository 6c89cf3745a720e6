//! Classification of database errors worth retrying.

/// PostgreSQL SQLSTATE codes that indicate a retryable condition.
///
/// - `40001` serialization_failure
/// - `40P01` deadlock_detected
/// - `57P01` admin_shutdown, `57P02` crash_shutdown, `57P03` cannot_connect_now
const TRANSIENT_SQLSTATES: [&str; 5] = ["40001", "40P01", "57P01", "57P02", "57P03"];

/// SQLSTATE class `08` covers all connection exceptions.
const CONNECTION_EXCEPTION_CLASS: &str = "08";

/// PostgreSQL unique constraint violation.
pub const UNIQUE_VIOLATION: &str = "23505";

/// Whether retrying the same statement could reasonably succeed.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::Protocol(_)
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| {
            TRANSIENT_SQLSTATES.contains(&&*code)
                || code.starts_with(CONNECTION_EXCEPTION_CLASS)
        }),
        _ => false,
    }
}

/// Whether `err` is a unique constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}
