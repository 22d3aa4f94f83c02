//! `DbErr` → `StorageError` mapping

use sea_orm::{DbErr, SqlErr};

use wallet_storage_core::utils::log_sanitizer::truncate_for_log;
use wallet_storage_core::StorageError;

/// SQLSTATE codes and driver phrases that mean the server refused the login.
const AUTH_FAILURE_MARKERS: [&str; 4] = [
    "28P01",
    "28000",
    "password authentication failed",
    "authentication failed",
];

/// Map a database error into exactly one storage error kind.
pub(crate) fn map_db_err(action: &str, err: &DbErr) -> StorageError {
    let message = truncate_for_log(&err.to_string());

    if AUTH_FAILURE_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
    {
        return StorageError::Credentials(format!("Failed to {action}: {message}"));
    }

    if let Some(SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() {
        return StorageError::DuplicateId(truncate_for_log(&detail));
    }

    match err {
        DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => {
            StorageError::Connection(format!("Failed to {action}: {message}"))
        }
        _ => StorageError::Io(format!("Failed to {action}: {message}")),
    }
}

/// Inside a transaction a lost connection leaves nothing committed, which
/// callers see as an I/O failure of the batch.
pub(crate) fn in_transaction(err: StorageError) -> StorageError {
    match err {
        StorageError::Connection(message) => StorageError::Io(message),
        other => other,
    }
}

/// Map a failure to open, commit or release a transaction.
pub(crate) fn transaction_err(action: &str, err: &DbErr) -> StorageError {
    in_transaction(map_db_err(action, err))
}

#[cfg(test)]
mod tests {
    use sea_orm::{ConnAcquireErr, RuntimeErr};

    use super::*;

    #[test]
    fn auth_failure_is_credentials() {
        let err = DbErr::Conn(RuntimeErr::Internal(
            "error returned from database: password authentication failed for user \"wallet\""
                .to_string(),
        ));
        assert!(matches!(
            map_db_err("connect", &err),
            StorageError::Credentials(_)
        ));
    }

    #[test]
    fn unreachable_server_is_connection() {
        let err = DbErr::Conn(RuntimeErr::Internal("Connection refused (os error 111)".into()));
        assert!(matches!(
            map_db_err("connect", &err),
            StorageError::Connection(_)
        ));
        assert!(matches!(
            in_transaction(map_db_err("connect", &err)),
            StorageError::Io(_)
        ));
    }

    #[test]
    fn lost_connection_at_begin_is_io() {
        let refused = DbErr::Conn(RuntimeErr::Internal("Connection refused (os error 111)".into()));
        assert!(matches!(
            transaction_err("begin transaction", &refused),
            StorageError::Io(m) if m.contains("begin transaction")
        ));
        let exhausted = DbErr::ConnectionAcquire(ConnAcquireErr::Timeout);
        assert!(matches!(
            transaction_err("begin transaction", &exhausted),
            StorageError::Io(_)
        ));

        let denied = DbErr::Conn(RuntimeErr::Internal("password authentication failed".into()));
        assert!(matches!(
            transaction_err("begin transaction", &denied),
            StorageError::Credentials(_)
        ));
    }

    #[test]
    fn other_failures_are_io() {
        let err = DbErr::Custom("disk I/O error".into());
        assert!(matches!(map_db_err("insert item", &err), StorageError::Io(m) if m.contains("insert item")));
    }
}
