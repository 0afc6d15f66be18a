//! # Egresos - hospital discharge reshaping and loading
//!
//! Turns a wide discharge spreadsheet (up to four diagnosis, two morbidity
//! and four procedure codes per encounter) into a long table with one row
//! per diagnosis, and loads it into SQLite without inserting the same
//! discharges twice.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ XLSX / CSV  │────▶│   Parser    │────▶│   Reshape   │────▶│   Export    │
//! │  (wide)     │     │ (auto-enc)  │     │ (per diag)  │     │ (CSV/XLSX)  │
//! └─────────────┘     └─────────────┘     └─────────────┘     └──────┬──────┘
//!                                                                    │
//!                     ┌─────────────┐     ┌─────────────┐            │
//!                     │  Registry   │◀────│   Loader    │◀───────────┘
//!                     │ (JSON file) │     │ (dup guard) │────▶ SQLite
//!                     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use egresos::{load_file, transform_and_export, LoadOptions, SqliteStore, TransformOptions, UploadRegistry};
//!
//! let outcome = transform_and_export("egresos_enero.xlsx".as_ref(), &TransformOptions::default())?;
//! let mut store = SqliteStore::connect("egresos.db")?;
//! let mut registry = UploadRegistry::load(".egresos/registry.json")?;
//! let report = load_file(&mut store, &outcome.output_path, &mut registry, &LoadOptions::default())?;
//! registry.save()?;
//! println!("{}", report.summary());
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`config`] - Constants and environment configuration
//! - [`models`] - Source and normalized records
//! - [`parser`] - Spreadsheet and CSV reading with auto-detection
//! - [`transform`] - Reshaping and pipeline helpers
//! - [`export`] - CSV / XLSX output
//! - [`validation`] - Column and record checks
//! - [`registry`] - Upload registry and fingerprints
//! - [`storage`] - Duplicate-guarded SQLite loading
//! - [`logs`] - Progress logging

// Core modules
pub mod config;
pub mod error;
pub mod models;

// Reading
pub mod parser;

// Transformation
pub mod transform;

// Output
pub mod export;

// Validation
pub mod validation;

// Loading
pub mod registry;
pub mod storage;

// Logging
pub mod logs;

pub use transform::pipeline;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    DateParseError, ExportError, PipelineError, PipelineResult, RegistryError, SchemaError,
    SourceError, StorageError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    month_name, AgeBracket, Cell, NormalizedRecord, NormalizedTable, Period, RecordKey,
    SourceRecord, SourceTable, NORMALIZED_COLUMNS,
};

// =============================================================================
// Re-exports - Parser, transform, export
// =============================================================================

pub use config::Config;
pub use export::{read_table, write_table, OutputFormat};
pub use parser::read_source;
pub use transform::pipeline::{
    fingerprint_file, load_file, read_transformed, transform_and_export, transform_file,
    SourceInfo, TransformOptions, TransformOutcome, Transformed,
};
pub use transform::reshape::{reshape, ReshapeStats, Reshaped};

// =============================================================================
// Re-exports - Registry and storage
// =============================================================================

pub use registry::{fingerprint, Fingerprint, RegistryEntry, UploadRegistry};
pub use storage::{
    delete_upload, load_and_register, load_into, load_table, DeleteOutcome, DeleteReport,
    DuplicatePolicy, LoadOptions, LoadOutcome, LoadReport, Provisioning, SqliteStore, Store,
};
