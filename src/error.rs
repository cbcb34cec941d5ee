//! Error types for the data engine.
//!
//! All failures surface as [`DataError`]. Variants fall into three categories
//! (see [`ErrorCategory`]): configuration problems and session-state violations
//! are always fatal, while driver errors are first offered to the driver's
//! translator and then to the registered error hook, either of which may
//! replace or absorb them.

use thiserror::Error;

/// Broad classification used by the provider to decide how an error is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing source, missing driver, immutable entity, bad settings.
    Configuration,
    /// Raised by the native connection/command.
    Driver,
    /// Operation on a completed session, or a missing driver feature.
    SessionState,
}

#[derive(Error, Debug)]
pub enum DataError {
    #[error("No data source found: {name}")]
    NoSource { name: String },

    #[error("No driver registered for data source '{source_name}': {driver}")]
    NoDriver { source_name: String, driver: String },

    #[error("Entity '{entity}' is immutable: {operation} is not allowed")]
    ImmutableEntity { entity: String, operation: String },

    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Session {session_id} already completed: {operation} rejected")]
    SessionCompleted {
        session_id: String,
        operation: String,
    },

    #[error("Feature '{feature}' is not supported by driver '{driver}'")]
    UnsupportedFeature { feature: String, driver: String },

    #[error("Cannot convert {from} to {to}")]
    Conversion { from: String, to: String },

    #[error("Statement error: {message}")]
    Statement { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DataError {
    /// Create a missing data source error.
    pub fn no_source(name: impl Into<String>) -> Self {
        Self::NoSource { name: name.into() }
    }

    /// Create a missing driver error.
    pub fn no_driver(source_name: impl Into<String>, driver: impl Into<String>) -> Self {
        Self::NoDriver {
            source_name: source_name.into(),
            driver: driver.into(),
        }
    }

    /// Create an immutable entity error.
    pub fn immutable_entity(entity: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::ImmutableEntity {
            entity: entity.into(),
            operation: operation.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a completed-session error.
    pub fn session_completed(session_id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::SessionCompleted {
            session_id: session_id.into(),
            operation: operation.into(),
        }
    }

    /// Create an unsupported feature error.
    pub fn unsupported_feature(feature: impl Into<String>, driver: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            feature: feature.into(),
            driver: driver.into(),
        }
    }

    /// Create a value conversion error.
    pub fn conversion(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::Conversion {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Create a statement error.
    pub fn statement(message: impl Into<String>) -> Self {
        Self::Statement {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoSource { .. }
            | Self::NoDriver { .. }
            | Self::ImmutableEntity { .. }
            | Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::SessionCompleted { .. } | Self::UnsupportedFeature { .. } => {
                ErrorCategory::SessionState
            }
            _ => ErrorCategory::Driver,
        }
    }

    /// Configuration and session-state errors bypass the translator and hook.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.category(), ErrorCategory::Driver)
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }
}

/// Outcome of offering an error to a translator or error hook.
#[derive(Debug)]
pub enum ErrorDisposition {
    /// The error was absorbed; the operation ends as a handled failure.
    Handled,
    /// Propagate this error (the original or a replacement).
    Raise(DataError),
}

/// Convert sqlx errors to DataError.
impl From<sqlx::Error> for DataError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DataError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DataError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DataError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DataError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                DataError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DataError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DataError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DataError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DataError::statement(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DataError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DataError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DataError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DataError::internal("Database worker crashed"),
            _ => DataError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for engine operations.
pub type DataResult<T> = Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DataError::no_source("orders");
        assert_eq!(err.to_string(), "No data source found: orders");
    }

    #[test]
    fn test_error_suggestion() {
        let err = DataError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(DataError::internal("x").suggestion(), None);
    }

    #[test]
    fn test_configuration_errors_are_fatal() {
        assert!(DataError::no_source("a").is_fatal());
        assert!(DataError::no_driver("a", "sqlite").is_fatal());
        assert!(DataError::immutable_entity("Log", "delete").is_fatal());
        assert_eq!(
            DataError::configuration("bad").category(),
            ErrorCategory::Configuration
        );
    }

    #[test]
    fn test_session_state_errors_are_fatal() {
        let err = DataError::session_completed("s1", "bind");
        assert_eq!(err.category(), ErrorCategory::SessionState);
        assert!(err.is_fatal());
        assert!(DataError::unsupported_feature("MultipleActiveResultSets", "sqlite").is_fatal());
    }

    #[test]
    fn test_driver_errors_are_not_fatal() {
        let err = DataError::database("duplicate key", Some("23505".into()), "check keys");
        assert_eq!(err.category(), ErrorCategory::Driver);
        assert!(!err.is_fatal());
        assert!(!DataError::timeout("query", 30).is_fatal());
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_database_error() {
        let err: DataError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, DataError::Database { .. }));
    }

    #[test]
    fn test_sqlx_pool_timeout_maps_to_timeout() {
        let err: DataError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DataError::Timeout { .. }));
    }
}
