//! Duplicate-guarded loading and deletion of normalized tables.

use chrono::{Datelike, Local};
use serde::Serialize;
use std::fs;
use std::path::Path;

use super::{DuplicatePolicy, Provisioning, SqliteStore, Store};
use crate::error::{PipelineResult, StorageResult};
use crate::logs::{log_info, log_success, log_warning};
use crate::models::{NormalizedRecord, NormalizedTable, Period, RecordKey};
use crate::registry::{fingerprint, Fingerprint, RegistryEntry, UploadRegistry};

/// Knobs for a single load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    pub policy: DuplicatePolicy,
    pub provisioning: Provisioning,
}

/// What a load did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadOutcome {
    /// Every row was already stored; nothing written
    FullyDuplicateSkip { matched: usize },
    /// Some rows were already stored; `inserted` rows written per policy
    PartialDuplicateInserted { inserted: usize, duplicates: usize },
    /// No row was stored before
    FreshInsert { inserted: usize },
}

impl LoadOutcome {
    pub fn inserted(&self) -> usize {
        match *self {
            LoadOutcome::FullyDuplicateSkip { .. } => 0,
            LoadOutcome::PartialDuplicateInserted { inserted, .. }
            | LoadOutcome::FreshInsert { inserted } => inserted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub outcome: LoadOutcome,
    pub total_rows: usize,
    /// First row's year and month
    pub period: Period,
    pub fingerprint: Fingerprint,
}

impl LoadReport {
    /// One-line summary for the user.
    pub fn summary(&self) -> String {
        match self.outcome {
            LoadOutcome::FullyDuplicateSkip { .. } => {
                format!("Records for {} are already loaded; nothing inserted", self.period)
            }
            LoadOutcome::PartialDuplicateInserted { inserted, duplicates } => format!(
                "Inserted {inserted} of {} records for {} ({duplicates} already stored)",
                self.total_rows, self.period
            ),
            LoadOutcome::FreshInsert { inserted } => {
                format!("Inserted {inserted} records for {}", self.period)
            }
        }
    }
}

/// Check `table` against `store` and insert according to `options`.
pub fn load_table<S: Store + ?Sized>(
    store: &mut S,
    table: &NormalizedTable,
    options: &LoadOptions,
) -> StorageResult<LoadReport> {
    let total_rows = table.len();
    let period = table.representative_period(Local::now().year());
    let fingerprint = fingerprint(table);

    if table.is_empty() {
        return Ok(LoadReport {
            outcome: LoadOutcome::FreshInsert { inserted: 0 },
            total_rows,
            period,
            fingerprint,
        });
    }

    let keys: Vec<RecordKey> = table.iter().map(NormalizedRecord::key).collect();
    let existing = store.existing_keys(&keys)?;
    let matched = keys.iter().filter(|k| existing.contains(*k)).count();

    let outcome = if matched == total_rows {
        log_warning(format!("All {matched} records for {period} are already stored"));
        LoadOutcome::FullyDuplicateSkip { matched }
    } else if matched > 0 {
        // Recreate discards the stored copies, so every row goes back in.
        let rows: Vec<&NormalizedRecord> = match (options.provisioning, options.policy) {
            (Provisioning::Recreate, _) | (_, DuplicatePolicy::InsertAll) => {
                table.iter().collect()
            }
            (Provisioning::CreateIfAbsent, DuplicatePolicy::SkipDuplicates) => table
                .iter()
                .filter(|r| !existing.contains(&r.key()))
                .collect(),
        };
        log_warning(format!(
            "{matched} of {total_rows} records are already stored ({})",
            options.policy
        ));
        let inserted = store.insert_records(options.provisioning, &rows)?;
        LoadOutcome::PartialDuplicateInserted {
            inserted,
            duplicates: matched,
        }
    } else {
        let rows: Vec<&NormalizedRecord> = table.iter().collect();
        let inserted = store.insert_records(options.provisioning, &rows)?;
        LoadOutcome::FreshInsert { inserted }
    };

    Ok(LoadReport {
        outcome,
        total_rows,
        period,
        fingerprint,
    })
}

/// Open the SQLite store at `connection_string` and [`load_table`] into it.
pub fn load_into(
    connection_string: &str,
    table: &NormalizedTable,
    options: &LoadOptions,
) -> StorageResult<LoadReport> {
    let mut store = SqliteStore::connect(connection_string)?;
    load_table(&mut store, table, options)
}

/// [`load_table`], then record the load under `filename` when rows were written.
///
/// `file` is where the transformed file lives; [`delete_upload`] removes it
/// from there.
pub fn load_and_register<S: Store + ?Sized>(
    store: &mut S,
    table: &NormalizedTable,
    filename: &str,
    file: Option<&Path>,
    registry: &mut UploadRegistry,
    options: &LoadOptions,
) -> PipelineResult<LoadReport> {
    let report = load_table(store, table, options)?;

    let inserted = report.outcome.inserted();
    if inserted > 0 {
        if let Some((previous, _)) = registry.find_by_fingerprint(&report.fingerprint) {
            if previous != filename {
                log_warning(format!("Same content was loaded before as {previous}"));
            }
        }
        let mut entry = RegistryEntry::new(report.fingerprint.clone(), report.period, inserted);
        entry.path = file.map(Path::to_path_buf);
        if let Some(replaced) = registry.insert(filename, entry) {
            if replaced.path.as_deref() != file {
                log_warning(format!("Replaced the earlier load registered as {filename}"));
            }
        }
        log_success(report.summary());
    } else {
        log_info(report.summary());
    }

    Ok(report)
}

// =============================================================================
// Deletion
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted { rows: usize },
    /// The query ran but no stored row had the registered period
    NothingMatched,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteReport {
    pub outcome: DeleteOutcome,
    pub period: Period,
    /// Whether the transformed file existed and was removed
    pub file_removed: bool,
}

/// Remove the stored rows, the transformed file and the registry entry of `filename`.
///
/// The file is taken from the path recorded at load time; entries without
/// one fall back to `output_dir/filename`. Storage goes first: if the
/// delete fails, file and registry stay as they were.
pub fn delete_upload<S: Store + ?Sized>(
    store: &mut S,
    registry: &mut UploadRegistry,
    filename: &str,
    output_dir: &Path,
) -> PipelineResult<DeleteReport> {
    let entry = registry.require(filename)?;
    let period = entry.period();
    let path = entry
        .path
        .clone()
        .unwrap_or_else(|| output_dir.join(filename));

    let rows = store.delete_period(period)?;
    let outcome = if rows == 0 {
        log_warning(format!("No stored records matched {period}"));
        DeleteOutcome::NothingMatched
    } else {
        log_success(format!("Deleted {rows} records for {period}"));
        DeleteOutcome::Deleted { rows }
    };

    let file_removed = if path.is_file() {
        fs::remove_file(&path)?;
        true
    } else {
        false
    };

    registry.remove(filename);

    Ok(DeleteReport {
        outcome,
        period,
        file_removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, RegistryError, StorageError};
    use crate::models::fixtures::record;
    use tempfile::tempdir;

    fn march() -> NormalizedTable {
        NormalizedTable::new(vec![
            record("1", 2025, 3, "A10", 1),
            record("1", 2025, 3, "B20", 2),
            record("2", 2025, 3, "C30", 1),
        ])
    }

    fn single(numhc: &str, year: i32, month: u32) -> NormalizedTable {
        NormalizedTable::new(vec![record(numhc, year, month, "A10", 1)])
    }

    fn seeded(tables: &[NormalizedTable]) -> SqliteStore {
        let mut store = SqliteStore::open_in_memory().unwrap();
        for table in tables {
            load_table(&mut store, table, &LoadOptions::default()).unwrap();
        }
        store
    }

    #[test]
    fn test_fresh_then_fully_duplicate() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let options = LoadOptions::default();

        let first = load_table(&mut store, &march(), &options).unwrap();
        assert_eq!(first.outcome, LoadOutcome::FreshInsert { inserted: 3 });
        assert_eq!(first.period, Period::new(2025, 3));

        let second = load_table(&mut store, &march(), &options).unwrap();
        assert_eq!(second.outcome, LoadOutcome::FullyDuplicateSkip { matched: 3 });
        assert_eq!(store.row_count().unwrap(), 3);
        assert_eq!(first.fingerprint, second.fingerprint);
    }

    #[test]
    fn test_partial_overlap_skip_duplicates() {
        let mut store = seeded(&[single("1", 2025, 3)]);

        let report = load_table(&mut store, &march(), &LoadOptions::default()).unwrap();
        assert_eq!(
            report.outcome,
            LoadOutcome::PartialDuplicateInserted {
                inserted: 1,
                duplicates: 2
            }
        );
        assert_eq!(store.row_count().unwrap(), 2);
    }

    #[test]
    fn test_partial_overlap_insert_all() {
        let mut store = seeded(&[single("2", 2025, 3)]);
        let options = LoadOptions {
            policy: DuplicatePolicy::InsertAll,
            ..LoadOptions::default()
        };

        let report = load_table(&mut store, &march(), &options).unwrap();
        assert_eq!(
            report.outcome,
            LoadOutcome::PartialDuplicateInserted {
                inserted: 3,
                duplicates: 1
            }
        );
        assert_eq!(store.row_count().unwrap(), 4);
    }

    #[test]
    fn test_recreate_on_partial_overlap() {
        let mut store = seeded(&[single("9", 2024, 12), single("1", 2025, 3)]);
        let options = LoadOptions {
            policy: DuplicatePolicy::InsertAll,
            provisioning: Provisioning::Recreate,
        };

        load_table(&mut store, &march(), &options).unwrap();
        assert_eq!(store.row_count().unwrap(), 3);
    }

    #[test]
    fn test_recreate_with_skip_duplicates_keeps_whole_table() {
        let mut store = seeded(&[single("1", 2025, 3)]);
        let options = LoadOptions {
            policy: DuplicatePolicy::SkipDuplicates,
            provisioning: Provisioning::Recreate,
        };

        let report = load_table(&mut store, &march(), &options).unwrap();
        assert_eq!(
            report.outcome,
            LoadOutcome::PartialDuplicateInserted {
                inserted: 3,
                duplicates: 2
            }
        );
        assert_eq!(store.row_count().unwrap(), 3);
    }

    #[test]
    fn test_load_into_connection_string() {
        let dir = tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("egresos.db").display());
        let first = load_into(&url, &march(), &LoadOptions::default()).unwrap();
        let second = load_into(&url, &march(), &LoadOptions::default()).unwrap();
        assert_eq!(first.outcome, LoadOutcome::FreshInsert { inserted: 3 });
        assert_eq!(second.outcome, LoadOutcome::FullyDuplicateSkip { matched: 3 });
    }

    #[test]
    fn test_empty_table_is_fresh_noop() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let empty = NormalizedTable::default();
        let report = load_table(&mut store, &empty, &LoadOptions::default()).unwrap();
        assert_eq!(report.outcome, LoadOutcome::FreshInsert { inserted: 0 });
        assert_eq!(report.total_rows, 0);
    }

    #[test]
    fn test_empty_table_with_recreate_keeps_stored_rows() {
        let mut store = seeded(&[single("9", 2024, 12)]);
        let options = LoadOptions {
            policy: DuplicatePolicy::SkipDuplicates,
            provisioning: Provisioning::Recreate,
        };

        let report = load_table(&mut store, &NormalizedTable::default(), &options).unwrap();
        assert_eq!(report.outcome, LoadOutcome::FreshInsert { inserted: 0 });
        assert_eq!(store.row_count().unwrap(), 1);
    }

    #[test]
    fn test_missing_period_defaults() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut undated = record("1", 2025, 3, "A10", 1);
        undated.anio = None;
        undated.mes = None;
        let table = NormalizedTable::new(vec![undated]);

        let report = load_table(&mut store, &table, &LoadOptions::default()).unwrap();
        assert_eq!(report.period.month, 1);
        assert_eq!(report.period.year, Local::now().year());
    }

    #[test]
    fn test_registration_only_after_insert() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut registry = UploadRegistry::new();
        let options = LoadOptions::default();

        load_and_register(&mut store, &march(), "marzo.csv", None, &mut registry, &options)
            .unwrap();
        let entry = registry.get("marzo.csv").unwrap().clone();
        assert_eq!(entry.rows, 3);
        assert_eq!(entry.period(), Period::new(2025, 3));

        load_and_register(&mut store, &march(), "marzo-bis.csv", None, &mut registry, &options)
            .unwrap();
        assert!(registry.get("marzo-bis.csv").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_delete_registered_upload() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("marzo.csv");
        fs::write(&file, "x").unwrap();

        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut registry = UploadRegistry::new();
        let options = LoadOptions::default();
        load_and_register(&mut store, &march(), "marzo.csv", None, &mut registry, &options)
            .unwrap();

        let report = delete_upload(&mut store, &mut registry, "marzo.csv", dir.path()).unwrap();
        assert_eq!(report.outcome, DeleteOutcome::Deleted { rows: 3 });
        assert!(report.file_removed);
        assert!(!file.exists());
        assert!(registry.is_empty());
        assert_eq!(store.row_count().unwrap(), 0);
    }

    #[test]
    fn test_delete_removes_file_where_it_was_loaded() {
        let dir = tempdir().unwrap();
        let elsewhere = dir.path().join("elsewhere");
        let transformed = dir.path().join("transformed");
        fs::create_dir_all(&elsewhere).unwrap();
        fs::create_dir_all(&transformed).unwrap();
        let loaded = elsewhere.join("marzo.csv");
        let unrelated = transformed.join("marzo.csv");
        fs::write(&loaded, "x").unwrap();
        fs::write(&unrelated, "y").unwrap();

        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut registry = UploadRegistry::new();
        let options = LoadOptions::default();
        load_and_register(
            &mut store,
            &march(),
            "marzo.csv",
            Some(&loaded),
            &mut registry,
            &options,
        )
        .unwrap();
        assert_eq!(registry.get("marzo.csv").unwrap().path.as_deref(), Some(loaded.as_path()));

        let report = delete_upload(&mut store, &mut registry, "marzo.csv", &transformed).unwrap();
        assert!(report.file_removed);
        assert!(!loaded.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_delete_nothing_matched() {
        let dir = tempdir().unwrap();
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut registry = UploadRegistry::new();
        registry.insert(
            "abril.csv",
            RegistryEntry::new(fingerprint(&march()), Period::new(2025, 4), 3),
        );

        let report = delete_upload(&mut store, &mut registry, "abril.csv", dir.path()).unwrap();
        assert_eq!(report.outcome, DeleteOutcome::NothingMatched);
        assert!(!report.file_removed);
        assert!(registry.get("abril.csv").is_none());
    }

    #[test]
    fn test_delete_unknown_filename() {
        let dir = tempdir().unwrap();
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut registry = UploadRegistry::new();
        let err = delete_upload(&mut store, &mut registry, "nada.csv", dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Registry(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_storage_failure_leaves_file_and_registry() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("marzo.csv");
        fs::write(&file, "x").unwrap();

        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut registry = UploadRegistry::new();
        let options = LoadOptions::default();
        load_and_register(&mut store, &march(), "marzo.csv", Some(&file), &mut registry, &options)
            .unwrap();
        store
            .connection()
            .execute_batch(
                "CREATE TRIGGER keep_rows BEFORE DELETE ON egresos
                 BEGIN SELECT RAISE(ABORT, 'locked'); END;",
            )
            .unwrap();

        let err = delete_upload(&mut store, &mut registry, "marzo.csv", dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Storage(StorageError::Query(_))));
        assert!(file.exists());
        assert!(registry.get("marzo.csv").is_some());
    }
}
