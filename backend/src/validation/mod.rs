//! Layout and invariant checks for egresos tables.
//!
//! # Checks
//!
//! ## Column resolution
//! - [`require_columns`] maps required column names to header positions,
//!   trimming and ignoring case, and lists every missing name at once.
//!
//! ## Record invariants
//! - [`validate_record`] checks a normalized row before it is written:
//!   non-empty diagnosis, slot indices in range, consistent empty codes,
//!   and an age-bracket code between 1 and 4.
//!
//! # Example
//!
//! ```rust,ignore
//! use egresos::validation::require_columns;
//!
//! let headers = vec!["NUMHC".to_string(), "edad ".to_string()];
//! let idx = require_columns(&headers, &["edad", "numhc"]).unwrap();
//! assert_eq!(idx, vec![1, 0]);
//! ```

use crate::error::SchemaError;
use crate::models::{AgeBracket, NormalizedRecord, NormalizedTable};

/// Resolve each required column to its index in `headers`.
///
/// Returns indices in the order of `required`.
pub fn require_columns(headers: &[String], required: &[&str]) -> Result<Vec<usize>, SchemaError> {
    let normalized: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();

    let mut indices = Vec::with_capacity(required.len());
    let mut missing = Vec::new();

    for name in required {
        match normalized.iter().position(|h| h == &name.to_lowercase()) {
            Some(idx) => indices.push(idx),
            None => missing.push(name.to_string()),
        }
    }

    if missing.is_empty() {
        Ok(indices)
    } else {
        Err(SchemaError::MissingColumns(missing))
    }
}

/// Check a single normalized record.
///
/// # Returns
/// * `Ok(())` if valid
/// * `Err(Vec<String>)` with every broken rule
pub fn validate_record(record: &NormalizedRecord) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if record.diag.trim().is_empty() {
        errors.push("diag is empty".to_string());
    }
    if !(1..=4).contains(&record.numdiag) {
        errors.push(format!("numdiag {} outside 1..=4", record.numdiag));
    }
    check_slot(&mut errors, "cemorb", &record.cemorb, record.numcemorb, 2);
    check_slot(&mut errors, "codcpt", &record.codcpt, record.numcodcpt, 4);
    if AgeBracket::from_code(record.idetareo).is_none() {
        errors.push(format!("idetareo {} is not a bracket code", record.idetareo));
    }
    if let Some(month) = record.mes {
        if !(1..=12).contains(&month) {
            errors.push(format!("mes {month} outside 1..=12"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_slot(errors: &mut Vec<String>, name: &str, code: &str, slot: u8, max: u8) {
    if code.is_empty() && slot != 0 {
        errors.push(format!("{name} is empty but its slot is {slot}"));
    } else if !code.is_empty() && !(1..=max).contains(&slot) {
        errors.push(format!("{name} slot {slot} outside 1..={max}"));
    }
}

/// Quick check of one record.
pub fn is_valid_record(record: &NormalizedRecord) -> bool {
    validate_record(record).is_ok()
}

/// Check every record of a table, failing on the first broken row.
///
/// Rows are reported as 1-based record positions.
pub fn validate_table(table: &NormalizedTable) -> Result<(), SchemaError> {
    let invalid: Vec<(usize, Vec<String>)> = table
        .iter()
        .enumerate()
        .filter_map(|(i, r)| validate_record(r).err().map(|e| (i + 1, e)))
        .collect();

    match invalid.first() {
        None => Ok(()),
        Some((row, errors)) => Err(SchemaError::InvalidRecords {
            count: invalid.len(),
            first_row: *row,
            message: errors.join(", "),
        }),
    }
}
