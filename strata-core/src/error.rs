//! Error types for STRATA operations

use thiserror::Error;

/// Configuration errors.
///
/// Raised while resolving properties, query templates or dialect presets.
/// These are fatal and never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("No query template configured for {query}")]
    MissingTemplate { query: String },

    #[error("Unknown dialect: {name}")]
    UnknownDialect { name: String },

    #[error("Failed to parse query configuration: {reason}")]
    Parse { reason: String },
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Error in {operation}: {reason}")]
    Driver { operation: String, reason: String },

    #[error("Connection unavailable: {reason}")]
    ConnectionUnavailable { reason: String },

    #[error("Record count not available for {table}")]
    RecordCountUnavailable { table: String },
}

/// Record value codec errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Failed to encode record values: {reason}")]
    Encode { reason: String },

    #[error("Failed to decode record values: {reason}")]
    Decode { reason: String },
}

/// Validation errors for caller-supplied arguments.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Master error type for all STRATA errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrataError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// The physical table backing `[tenant_id:table_name]` does not exist.
    /// Callers branch on this to create the table and retry.
    #[error("Table not available: [{tenant_id}:{table_name}]")]
    TableNotAvailable { tenant_id: i32, table_name: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl StrataError {
    /// Build a `TableNotAvailable` error.
    pub fn table_not_available(tenant_id: i32, table_name: impl Into<String>) -> Self {
        StrataError::TableNotAvailable {
            tenant_id,
            table_name: table_name.into(),
        }
    }

    /// Whether this error reports a missing table.
    pub fn is_table_not_available(&self) -> bool {
        matches!(self, StrataError::TableNotAvailable { .. })
    }
}

/// Result type alias for STRATA operations.
pub type StrataResult<T> = Result<T, StrataError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display_missing_required() {
        let err = ConfigError::MissingRequired {
            field: "datasource".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Missing required"));
        assert!(msg.contains("datasource"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "partitionCount".to_string(),
            value: "zero".to_string(),
            reason: "must be a positive integer".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("partitionCount"));
        assert!(msg.contains("zero"));
        assert!(msg.contains("positive integer"));
    }

    #[test]
    fn test_table_not_available_display() {
        let err = StrataError::table_not_available(7, "events");
        assert_eq!(format!("{}", err), "Table not available: [7:events]");
        assert!(err.is_table_not_available());
    }

    #[test]
    fn test_storage_error_display_driver() {
        let err = StorageError::Driver {
            operation: "adding records".to_string(),
            reason: "connection reset".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("adding records"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_strata_error_from_variants() {
        let config = StrataError::from(ConfigError::UnknownDialect {
            name: "db2".to_string(),
        });
        assert!(matches!(config, StrataError::Config(_)));
        assert!(!config.is_table_not_available());

        let storage = StrataError::from(StorageError::ConnectionUnavailable {
            reason: "pool closed".to_string(),
        });
        assert!(matches!(storage, StrataError::Storage(_)));

        let codec = StrataError::from(CodecError::Decode {
            reason: "truncated".to_string(),
        });
        assert!(matches!(codec, StrataError::Codec(_)));

        let validation = StrataError::from(ValidationError::InvalidValue {
            field: "ids".to_string(),
            reason: "empty".to_string(),
        });
        assert!(matches!(validation, StrataError::Validation(_)));
    }
}
