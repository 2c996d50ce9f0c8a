//! Error types for pgsail

use thiserror::Error;

/// Result type alias for pgsail operations
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Unified error type for all pgsail operations
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    /// Schema definition problem (bad primary-key set, dangling association target).
    /// Fatal, never retried.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Malformed criteria, invalid identifier or placeholder/parameter mismatch.
    /// Fatal for the call that produced it.
    #[error("Compilation error: {0}")]
    Compilation(String),

    /// Unknown or duplicate datastore name in a registry
    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // Driver errors classified by SQLSTATE

    /// 23505 unique_violation or 23P01 exclusion_violation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// 23503
    #[error("Foreign key constraint violation: {0}")]
    ForeignKey(String),

    /// 40P01
    #[error("Deadlock detected: {0}")]
    Deadlock(String),

    /// Connection or pool timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Class 40 rollbacks and 57P0x server shutdowns
    #[error("Transient error: {0}")]
    Transient(String),
}

impl AdapterError {
    /// Returns true if the caller may reasonably retry the operation.
    ///
    /// pgsail never retries by itself; this only classifies.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdapterError::Deadlock(_) | AdapterError::Timeout(_) | AdapterError::Transient(_)
        )
    }

    /// Unique or foreign key violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, AdapterError::Conflict(_) | AdapterError::ForeignKey(_))
    }

    /// Returns true for errors raised while compiling, before anything reached the driver.
    pub fn is_compile_time(&self) -> bool {
        matches!(self, AdapterError::Schema(_) | AdapterError::Compilation(_))
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::Serialization(err.to_string())
    }
}

/// Maps a SQLSTATE code to the matching error variant, if it has one.
///
/// Codes are listed in the PostgreSQL manual, appendix A.
#[cfg(feature = "postgres-errors")]
fn sqlstate_variant(code: &str) -> Option<fn(String) -> AdapterError> {
    let variant: fn(String) -> AdapterError = match code {
        "23505" | "23P01" => AdapterError::Conflict,
        "23503" => AdapterError::ForeignKey,
        "23502" | "23514" => AdapterError::Validation,
        "40P01" => AdapterError::Deadlock,
        "57P01" | "57P02" | "57P03" => AdapterError::Transient,
        _ if code.starts_with("40") => AdapterError::Transient,
        _ if code.starts_with("08") => AdapterError::Connection,
        _ => return None,
    };
    Some(variant)
}

#[cfg(feature = "postgres-errors")]
impl From<sqlx::Error> for AdapterError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as E;
        let message = err.to_string();
        match &err {
            E::Database(db_err) => db_err
                .code()
                .and_then(|code| sqlstate_variant(&code))
                .map_or(AdapterError::Database(message.clone()), |variant| variant(message)),
            E::Configuration(_) | E::Io(_) | E::Tls(_) | E::Protocol(_) => {
                AdapterError::Connection(message)
            }
            E::TypeNotFound { .. } | E::ColumnDecode { .. } | E::Decode(_) => {
                AdapterError::Deserialization(message)
            }
            E::RowNotFound => AdapterError::Database("Row not found".to_string()),
            E::PoolTimedOut => AdapterError::Timeout("Connection pool timed out".to_string()),
            E::PoolClosed => AdapterError::Connection("Connection pool closed".to_string()),
            E::WorkerCrashed => AdapterError::Internal("Worker thread crashed".to_string()),
            _ => AdapterError::Database(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        let cases = [
            (
                AdapterError::Schema("primary key on virtual attribute".to_string()),
                "Schema error: primary key on virtual attribute",
            ),
            (
                AdapterError::Compilation("2 placeholders, 3 values".to_string()),
                "Compilation error: 2 placeholders, 3 values",
            ),
            (
                AdapterError::Registry("unknown datastore 'main'".to_string()),
                "Registry error: unknown datastore 'main'",
            ),
            (
                AdapterError::Conflict("duplicate key".to_string()),
                "Conflict: duplicate key",
            ),
        ];
        for (err, shown) in cases {
            assert_eq!(err.to_string(), shown);
        }
    }

    #[test]
    fn test_bad_json_is_serialization_error() {
        let err: AdapterError = serde_json::from_str::<String>("{").unwrap_err().into();
        assert!(matches!(err, AdapterError::Serialization(_)));
    }

    #[cfg(feature = "postgres-errors")]
    #[test]
    fn test_sqlstate_classes() {
        let kind = |code: &str| sqlstate_variant(code).map(|v| v(String::new()));

        assert!(matches!(kind("23505"), Some(AdapterError::Conflict(_))));
        assert!(matches!(kind("23503"), Some(AdapterError::ForeignKey(_))));
        assert!(matches!(kind("23502"), Some(AdapterError::Validation(_))));
        assert!(matches!(kind("40P01"), Some(AdapterError::Deadlock(_))));
        assert!(matches!(kind("40001"), Some(AdapterError::Transient(_))));
        assert!(matches!(kind("08006"), Some(AdapterError::Connection(_))));
        assert!(matches!(kind("57P01"), Some(AdapterError::Transient(_))));
        assert!(kind("42P01").is_none());
    }

    #[cfg(feature = "postgres-errors")]
    #[test]
    fn test_pool_errors() {
        assert!(AdapterError::from(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(matches!(
            AdapterError::from(sqlx::Error::PoolClosed),
            AdapterError::Connection(_)
        ));
    }

    #[test]
    fn test_is_retryable() {
        assert!(AdapterError::Deadlock("test".to_string()).is_retryable());
        assert!(AdapterError::Timeout("test".to_string()).is_retryable());
        assert!(AdapterError::Transient("test".to_string()).is_retryable());
        assert!(!AdapterError::Conflict("test".to_string()).is_retryable());
        assert!(!AdapterError::Compilation("test".to_string()).is_retryable());
    }

    #[test]
    fn test_is_constraint_violation() {
        assert!(AdapterError::Conflict("test".to_string()).is_constraint_violation());
        assert!(AdapterError::ForeignKey("test".to_string()).is_constraint_violation());
        assert!(!AdapterError::Deadlock("test".to_string()).is_constraint_violation());
    }

    #[test]
    fn test_is_compile_time() {
        assert!(AdapterError::Schema("x".to_string()).is_compile_time());
        assert!(AdapterError::Compilation("x".to_string()).is_compile_time());
        assert!(!AdapterError::Database("x".to_string()).is_compile_time());
    }
}
