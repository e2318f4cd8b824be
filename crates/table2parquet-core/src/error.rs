//! Error taxonomy for the export pipeline.

use crate::sink::PublishError;
use crate::source::CursorError;
use thiserror::Error;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E101: Table is not declared in the schema registry
    E101UnknownTable,
    /// E102: A value could not be converted to its declared logical type
    E102TypeCoercion,
    /// E103: A batch does not match the physical schema of its file
    E103SchemaMismatch,
    /// E104: Append or close on a finalized writer
    E104WriterClosed,
    /// E105: Publication to object storage failed
    E105PublishFailure,
    /// E106: The database cursor failed
    E106CursorFailure,
    /// E107: Local file or Parquet encoding failure
    E107WriteFailure,
    /// E108: Invalid table definition
    E108InvalidSchema,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E101UnknownTable => "E101",
            Self::E102TypeCoercion => "E102",
            Self::E103SchemaMismatch => "E103",
            Self::E104WriterClosed => "E104",
            Self::E105PublishFailure => "E105",
            Self::E106CursorFailure => "E106",
            Self::E107WriteFailure => "E107",
            Self::E108InvalidSchema => "E108",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while exporting a table
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("[E101] Unknown table '{table}': not present in the schema registry")]
    UnknownTable { table: String },

    #[error("[E102] Cannot coerce column '{column}' of table '{table}': {reason}")]
    TypeCoercion {
        table: String,
        column: String,
        reason: String,
    },

    #[error("[E103] Schema mismatch writing '{path}': {reason}")]
    SchemaMismatch { path: String, reason: String },

    #[error("[E104] Writer for '{path}' is already closed")]
    WriterClosed { path: String },

    #[error("[E105] {0}")]
    Publish(#[from] PublishError),

    #[error("[E106] {0}")]
    Cursor(#[from] CursorError),

    #[error("[E107] I/O failure on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("[E107] Parquet encoding failed for '{path}': {source}")]
    Parquet {
        path: String,
        #[source]
        source: parquet::errors::ParquetError,
    },

    #[error("[E108] Invalid definition for table '{table}': {reason}")]
    InvalidSchema { table: String, reason: String },
}

impl ExportError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownTable { .. } => ErrorCode::E101UnknownTable,
            Self::TypeCoercion { .. } => ErrorCode::E102TypeCoercion,
            Self::SchemaMismatch { .. } => ErrorCode::E103SchemaMismatch,
            Self::WriterClosed { .. } => ErrorCode::E104WriterClosed,
            Self::Publish(_) => ErrorCode::E105PublishFailure,
            Self::Cursor(_) => ErrorCode::E106CursorFailure,
            Self::Io { .. } | Self::Parquet { .. } => ErrorCode::E107WriteFailure,
            Self::InvalidSchema { .. } => ErrorCode::E108InvalidSchema,
        }
    }

    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable {
            table: table.into(),
        }
    }

    pub fn coercion(
        table: impl Into<String>,
        column: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::TypeCoercion {
            table: table.into(),
            column: column.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string(),
            source,
        }
    }

    pub fn parquet(path: impl std::fmt::Display, source: parquet::errors::ParquetError) -> Self {
        Self::Parquet {
            path: path.to_string(),
            source,
        }
    }

    pub fn invalid_schema(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSchema {
            table: table.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for ExportError
pub type Result<T> = std::result::Result<T, ExportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_match_messages() {
        let err = ExportError::unknown_table("nope");
        assert_eq!(err.code(), ErrorCode::E101UnknownTable);
        assert!(err.to_string().starts_with("[E101]"));

        let err = ExportError::coercion("t", "c", "bad");
        assert_eq!(err.code().as_str(), "E102");
        assert!(err.to_string().contains("column 'c'"));
    }
}
