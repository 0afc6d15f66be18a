//! Persistent storage of normalized records, guarded against duplicate loads.
//!
//! - [`Store`] - the storage seam (key lookup, insert, period delete)
//! - [`sqlite::SqliteStore`] - the rusqlite implementation
//! - [`loader`] - duplicate detection, insertion policy and deletion

pub mod loader;
pub mod sqlite;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::StorageResult;
use crate::models::{NormalizedRecord, Period, RecordKey};

pub use loader::{
    delete_upload, load_and_register, load_into, load_table, DeleteOutcome, DeleteReport,
    LoadOptions, LoadOutcome, LoadReport,
};
pub use sqlite::SqliteStore;

/// Tabular storage holding the `egresos` table.
pub trait Store {
    /// The subset of `keys` already present in storage.
    fn existing_keys(&self, keys: &[RecordKey]) -> StorageResult<HashSet<RecordKey>>;

    /// Insert `records` in order as one transaction, preparing the table per
    /// `provisioning` first. Nothing is written if any row fails.
    fn insert_records(
        &mut self,
        provisioning: Provisioning,
        records: &[&NormalizedRecord],
    ) -> StorageResult<usize>;

    /// Delete every row of `period`, returning how many were removed.
    fn delete_period(&mut self, period: Period) -> StorageResult<usize>;

    /// Number of stored rows.
    fn row_count(&self) -> StorageResult<usize>;
}

// =============================================================================
// Policies
// =============================================================================

/// What to insert when only some rows are already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Insert only rows whose key is not stored yet
    #[default]
    SkipDuplicates,
    /// Insert every row regardless of matches
    InsertAll,
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DuplicatePolicy::SkipDuplicates => "skip-duplicates",
            DuplicatePolicy::InsertAll => "insert-all",
        })
    }
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip-duplicates" | "skip" => Ok(DuplicatePolicy::SkipDuplicates),
            "insert-all" | "all" => Ok(DuplicatePolicy::InsertAll),
            other => Err(format!("Unknown duplicate policy '{other}'")),
        }
    }
}

/// How the destination table is prepared before a load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provisioning {
    /// Keep existing rows; schema migrations are applied at connect time
    #[default]
    CreateIfAbsent,
    /// Drop and recreate the table, discarding every stored row
    Recreate,
}

impl fmt::Display for Provisioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Provisioning::CreateIfAbsent => "create-if-absent",
            Provisioning::Recreate => "recreate",
        })
    }
}

impl FromStr for Provisioning {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create-if-absent" | "create" => Ok(Provisioning::CreateIfAbsent),
            "recreate" => Ok(Provisioning::Recreate),
            other => Err(format!("Unknown provisioning mode '{other}'")),
        }
    }
}
