//! Error types for the egresos transformation and loading pipeline.
//!
//! This module defines one error type per concern:
//!
//! - [`SourceError`] - Reading spreadsheet / CSV source files
//! - [`SchemaError`] - Missing or malformed columns
//! - [`DateParseError`] - Row-level date failures (absorbed, never fatal)
//! - [`StorageError`] - Database connectivity and query failures
//! - [`RegistryError`] - Upload registry lookups and persistence
//! - [`ExportError`] - Writing and reading transformed files
//! - [`PipelineError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use rusqlite::ErrorCode;
use thiserror::Error;

// =============================================================================
// Source Errors
// =============================================================================

/// Errors while reading a source file.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Failed to read file.
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    /// Extension is not one of the supported formats.
    #[error("Unsupported file format '{0}' (use .xls, .xlsx, .xlsm, .ods or .csv)")]
    UnsupportedFormat(String),

    /// The spreadsheet could not be decoded.
    #[error("Invalid spreadsheet: {0}")]
    Spreadsheet(String),

    /// The CSV content could not be decoded.
    #[error("Invalid CSV format: {0}")]
    Csv(String),

    /// Empty file or empty first sheet.
    #[error("Source file is empty")]
    Empty,

    /// No headers found.
    #[error("No headers found in source file")]
    NoHeaders,
}

// =============================================================================
// Schema Errors
// =============================================================================

/// A table does not match the expected layout.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Required columns are absent.
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    /// A cell holds a value the column cannot accept.
    #[error("Invalid value for column '{column}' at row {row}: '{value}'")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
    },

    /// Records break normalized-table invariants.
    #[error("{count} records are invalid (first at row {first_row}: {message})")]
    InvalidRecords {
        count: usize,
        first_row: usize,
        message: String,
    },
}

// =============================================================================
// Date Parse Errors
// =============================================================================

/// A discharge date could not be turned into a year and month.
///
/// Row-level: the reshaper counts these and leaves year/month empty.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unparseable discharge date '{value}'")]
pub struct DateParseError {
    pub value: String,
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Errors from the persistent storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database could not be reached or opened.
    #[error("Storage connectivity error: {0}")]
    Connectivity(String),

    /// A statement failed.
    #[error("Storage query error: {0}")]
    Query(String),

    /// A versioned schema step failed.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: i64, reason: String },
}

impl StorageError {
    /// Whether the failure means storage was unreachable.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StorageError::Connectivity(_))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::PermissionDenied,
            ) => StorageError::Connectivity(err.to_string()),
            _ => StorageError::Query(err.to_string()),
        }
    }
}

// =============================================================================
// Registry Errors
// =============================================================================

/// Errors from the upload registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Filename was never registered.
    #[error("No registered upload named '{0}'")]
    NotFound(String),

    /// IO error.
    #[error("Registry IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("Registry JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Export Errors
// =============================================================================

/// Errors while writing or reading a transformed file.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Export IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("XLSX write error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("Cannot read transformed file: {0}")]
    Source(#[from] SourceError),

    #[error("Transformed file does not match the egresos layout: {0}")]
    Schema(#[from] SchemaError),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level pipeline orchestration errors.
///
/// This is the error type returned by the functions in
/// [`crate::transform::pipeline`] and by [`crate::storage::delete_upload`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether the failure came from unreachable storage rather than bad input.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, PipelineError::Storage(e) if e.is_connectivity())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for source reading.
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type for export operations.
pub type ExportResult<T> = Result<T, ExportError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
