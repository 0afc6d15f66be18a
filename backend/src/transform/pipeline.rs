//! High-level pipeline API for egresos files.
//!
//! Combines the steps behind each CLI command: reading, reshaping and
//! exporting a source file, and loading a transformed file into storage.
//!
//! # Example
//!
//! ```rust,ignore
//! use egresos::pipeline::{transform_and_export, TransformOptions};
//! use std::path::Path;
//!
//! let options = TransformOptions::default();
//! let outcome = transform_and_export(Path::new("egresos_enero.xlsx"), &options)?;
//! println!("{} rows written to {}", outcome.stats.output_rows, outcome.output_path.display());
//! ```

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use super::reshape::{reshape, ReshapeStats};
use crate::error::{PipelineResult, SourceError};
use crate::export::{output_path, read_table, write_table, OutputFormat};
use crate::logs::{log_info, log_info_indent, log_success, log_success_indent, log_warning};
use crate::models::{NormalizedTable, SourceOrigin, SourceTable};
use crate::parser::read_source;
use crate::registry::{fingerprint, Fingerprint, UploadRegistry};
use crate::storage::{load_and_register, LoadOptions, LoadReport, Store};
use crate::validation::validate_table;

/// Options for [`transform_and_export`]
#[derive(Debug, Clone)]
pub struct TransformOptions {
    pub format: OutputFormat,
    /// Directory receiving the transformed file
    pub output_dir: PathBuf,
    /// Output file name; the format's default name when absent
    pub file_name: Option<String>,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            output_dir: PathBuf::from("transformed"),
            file_name: None,
        }
    }
}

/// Source file information
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub origin: SourceOrigin,
    pub headers: Vec<String>,
    pub row_count: usize,
}

impl From<&SourceTable> for SourceInfo {
    fn from(table: &SourceTable) -> Self {
        Self {
            origin: table.origin.clone(),
            headers: table.headers.clone(),
            row_count: table.rows.len(),
        }
    }
}

/// A reshaped source file, not yet written anywhere.
#[derive(Debug, Clone)]
pub struct Transformed {
    pub source: SourceInfo,
    pub table: NormalizedTable,
    pub stats: ReshapeStats,
}

/// Result of [`transform_and_export`]
#[derive(Debug, Clone, Serialize)]
pub struct TransformOutcome {
    pub source: SourceInfo,
    pub stats: ReshapeStats,
    pub format: OutputFormat,
    pub output_path: PathBuf,
}

/// Read a source file and reshape it. Reads only.
pub fn transform_file(path: &Path) -> PipelineResult<Transformed> {
    log_info(format!("📖 Reading {}...", path.display()));
    let source = read_source(path)?;
    log_source(&source);

    let reshaped = reshape(&source)?;
    let stats = reshaped.stats;
    log_success(format!(
        "Reshaped {} encounters into {} diagnosis rows",
        stats.source_rows, stats.output_rows
    ));
    if stats.rows_without_diagnosis > 0 {
        log_info_indent(
            format!("{} encounters had no diagnosis code", stats.rows_without_diagnosis),
            1,
        );
    }
    if stats.unparsed_dates > 0 {
        log_warning(format!(
            "{} discharge dates could not be parsed; year and month left empty",
            stats.unparsed_dates
        ));
    }

    Ok(Transformed {
        source: SourceInfo::from(&source),
        table: reshaped.table,
        stats,
    })
}

fn log_source(source: &SourceTable) {
    match &source.origin {
        SourceOrigin::Spreadsheet { sheet } => {
            log_success_indent(format!("Sheet: {sheet}"), 1);
        }
        SourceOrigin::Csv { encoding, delimiter } => {
            log_success_indent(format!("Detected encoding: {encoding}"), 1);
            let separator = format_delimiter(*delimiter);
            log_success_indent(format!("Detected separator: '{separator}'"), 1);
        }
    }
    log_success_indent(format!("Read {} rows", source.rows.len()), 1);
}

/// Reshape `path` and write the normalized table under `options.output_dir`.
pub fn transform_and_export(
    path: &Path,
    options: &TransformOptions,
) -> PipelineResult<TransformOutcome> {
    let transformed = transform_file(path)?;

    let name = options
        .file_name
        .as_deref()
        .unwrap_or(options.format.default_file_name());
    let output_path = output_path(&options.output_dir, name);
    write_table(&transformed.table, &output_path, options.format)?;
    log_success(format!("💾 Saved to {}", output_path.display()));

    Ok(TransformOutcome {
        source: transformed.source,
        stats: transformed.stats,
        format: options.format,
        output_path,
    })
}

/// Read back a transformed file and check it before loading.
pub fn read_transformed(path: &Path) -> PipelineResult<NormalizedTable> {
    let table = read_table(path)?;
    validate_table(&table)?;
    Ok(table)
}

/// Load a transformed file into `store`, registering it under its file name.
pub fn load_file<S: Store + ?Sized>(
    store: &mut S,
    path: &Path,
    registry: &mut UploadRegistry,
    options: &LoadOptions,
) -> PipelineResult<LoadReport> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| SourceError::UnsupportedFormat(path.display().to_string()))?;

    log_info(format!("📥 Loading {filename}..."));
    let table = read_transformed(path)?;
    log_info_indent(format!("{} rows", table.len()), 1);

    let location = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    load_and_register(store, &table, filename, Some(&location), registry, options)
}

/// Fingerprint of a transformed file's content.
pub fn fingerprint_file(path: &Path) -> PipelineResult<Fingerprint> {
    Ok(fingerprint(&read_transformed(path)?))
}

fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "\\t (tab)".to_string(),
        ';' => "; (semicolon)".to_string(),
        ',' => ", (comma)".to_string(),
        '|' => "| (pipe)".to_string(),
        _ => d.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LoadOutcome, SqliteStore};
    use tempfile::tempdir;

    const HEADER: &str = "fecegr;numhc;doc_iden;etnia;sexo;edad;tipoedad;ups;totalest;nomb;apell;ubigeo;condicion;coddiag1;coddiag2;coddiag3;coddiag4;cemorb1;cemorb2;codcpt1;codcpt2;codcpt3;codcpt4";

    fn write_source(dir: &Path) -> PathBuf {
        let path = dir.join("egresos_marzo.csv");
        let content = format!(
            "{HEADER}\n\
             03/15/25;77;4455;80;F;34;A;301;3;ANA;QUISPE;150101;1;A10;;B20;;M1;M2;P1;P2;;\n\
             03/20/25;78;4456;80;M;8;A;302;1;LUIS;ROJAS;150101;1;J18;;;;;;;;;\n\
             fecha mala;79;4457;80;M;40;A;302;2;ZOE;ZAPATA;150101;1;;;;;;;;;;\n"
        );
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_transform_file_reads_only() {
        let dir = tempdir().unwrap();
        let source = write_source(dir.path());

        let transformed = transform_file(&source).unwrap();
        assert_eq!(transformed.stats.source_rows, 3);
        assert_eq!(transformed.stats.output_rows, 3);
        assert_eq!(transformed.stats.rows_without_diagnosis, 1);
        assert_eq!(transformed.stats.unparsed_dates, 1);
        assert!(matches!(transformed.source.origin, SourceOrigin::Csv { delimiter: ';', .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_transform_export_and_load() {
        let dir = tempdir().unwrap();
        let source = write_source(dir.path());
        let options = TransformOptions {
            output_dir: dir.path().join("out"),
            ..TransformOptions::default()
        };

        let outcome = transform_and_export(&source, &options).unwrap();
        assert!(outcome.output_path.ends_with("egresos_transformado.csv"));

        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut registry = UploadRegistry::new();
        let options = LoadOptions::default();
        let report = load_file(&mut store, &outcome.output_path, &mut registry, &options).unwrap();
        assert_eq!(report.outcome, LoadOutcome::FreshInsert { inserted: 3 });
        let entry = registry.get("egresos_transformado.csv").unwrap();
        let recorded = entry.path.as_deref().unwrap();
        assert_eq!(recorded, fs::canonicalize(&outcome.output_path).unwrap());
        assert_eq!(fingerprint_file(&outcome.output_path).unwrap(), report.fingerprint);
    }

    #[test]
    fn test_missing_columns_fail_transform() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "fecegr,numhc\n03/15/25,77\n").unwrap();
        let err = transform_file(&path).unwrap_err();
        assert!(err.to_string().contains("coddiag1"));
    }
}
