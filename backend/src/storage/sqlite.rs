//! SQLite implementation of [`Store`].
//!
//! The schema is versioned: each entry of [`migrations`] is applied once and
//! recorded in the schema version table.

use rusqlite::{params, params_from_iter, Connection};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use super::{Provisioning, Store};
use crate::config::{BUSY_TIMEOUT_SECS, SCHEMA_VERSION_TABLE, TABLE_NAME};
use crate::error::{StorageError, StorageResult};
use crate::models::{columns, NormalizedRecord, Period, RecordKey, NORMALIZED_COLUMNS};

/// Keys per lookup query (three bound parameters each).
const KEY_CHUNK: usize = 300;

const KEY_INDEX: &str = "idx_egresos_anio_mes_numhc";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a store from a file path, `sqlite://path`, `sqlite:path` or `:memory:`.
    pub fn connect(connection_string: &str) -> StorageResult<Self> {
        let target = connection_string
            .strip_prefix("sqlite://")
            .or_else(|| connection_string.strip_prefix("sqlite:"))
            .unwrap_or(connection_string);

        let conn = if target == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(Path::new(target))
        }
        .map_err(|e| StorageError::Connectivity(format!("{connection_string}: {e}")))?;

        Self::from_connection(conn)
    }

    /// In-memory store with the schema applied.
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::connect(":memory:")
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        conn.busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))?;
        // Opening is lazy; the first read tells whether the file is usable.
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
            .map_err(|e| StorageError::Connectivity(e.to_string()))?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Store for SqliteStore {
    fn existing_keys(&self, keys: &[RecordKey]) -> StorageResult<HashSet<RecordKey>> {
        let mut found = HashSet::new();
        let distinct: Vec<&RecordKey> = keys.iter().collect::<HashSet<_>>().into_iter().collect();

        for chunk in distinct.chunks(KEY_CHUNK) {
            let sql = key_lookup_sql(chunk.len());
            let mut stmt = self.conn.prepare(&sql)?;
            let bound = chunk
                .iter()
                .flat_map(|k| [nullable(&k.year), nullable(&k.month), Some(k.numhc.as_str())]);
            let rows = stmt.query_map(params_from_iter(bound), |row| {
                Ok(RecordKey {
                    year: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    month: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    numhc: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            })?;
            for key in rows {
                found.insert(key?);
            }
        }

        Ok(found)
    }

    fn insert_records(
        &mut self,
        provisioning: Provisioning,
        records: &[&NormalizedRecord],
    ) -> StorageResult<usize> {
        let tx = self.conn.transaction()?;

        if provisioning == Provisioning::Recreate {
            log::warn!("Recreating table {TABLE_NAME}; stored rows are discarded");
            tx.execute_batch(&format!(
                "DROP TABLE IF EXISTS {TABLE_NAME};\n{}\n{}",
                create_table_sql(),
                create_index_sql()
            ))?;
        }

        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&insert_sql())?;
            for record in records {
                let values = record.values();
                let bound = values.iter().enumerate().map(|(i, v)| {
                    if i < 2 {
                        nullable(v)
                    } else {
                        Some(v.as_str())
                    }
                });
                inserted += stmt.execute(params_from_iter(bound))?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    fn delete_period(&mut self, period: Period) -> StorageResult<usize> {
        let deleted = self.conn.execute(
            &format!(
                "DELETE FROM {TABLE_NAME} WHERE {} = ?1 AND {} = ?2",
                columns::ANIO,
                columns::MES
            ),
            params![period.year.to_string(), period.month.to_string()],
        )?;
        Ok(deleted)
    }

    fn row_count(&self) -> StorageResult<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {TABLE_NAME}"),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn nullable(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

// =============================================================================
// Schema
// =============================================================================

/// Versioned schema steps, in order.
fn migrations() -> Vec<(i64, String)> {
    vec![(1, create_table_sql()), (2, create_index_sql())]
}

/// Apply every migration newer than the recorded schema version.
pub fn run_migrations(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {SCHEMA_VERSION_TABLE} (
             version INTEGER PRIMARY KEY,
             applied_at TEXT NOT NULL
         );"
    ))?;

    let current = current_version(conn)?;

    for (version, sql) in migrations() {
        if version > current {
            log::debug!("Running migration v{version}");
            conn.execute_batch(&sql)
                .and_then(|_| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {SCHEMA_VERSION_TABLE} (version, applied_at) \
                             VALUES (?1, datetime('now'))"
                        ),
                        params![version],
                    )
                })
                .map_err(|e| StorageError::Migration {
                    version,
                    reason: e.to_string(),
                })?;
        }
    }

    Ok(())
}

/// Highest applied schema version, 0 on a fresh database.
pub fn current_version(conn: &Connection) -> StorageResult<i64> {
    let version: Option<i64> = conn.query_row(
        &format!("SELECT MAX(version) FROM {SCHEMA_VERSION_TABLE}"),
        [],
        |row| row.get(0),
    )?;
    Ok(version.unwrap_or(0))
}

fn create_table_sql() -> String {
    let definitions: Vec<String> = NORMALIZED_COLUMNS
        .iter()
        .map(|name| {
            let width = if *name == columns::TOTALEST { 100 } else { 255 };
            format!("    {name} NVARCHAR({width})")
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {TABLE_NAME} (\n{}\n);",
        definitions.join(",\n")
    )
}

fn create_index_sql() -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {KEY_INDEX} ON {TABLE_NAME} ({}, {}, {});",
        columns::ANIO,
        columns::MES,
        columns::NUMHC
    )
}

fn insert_sql() -> String {
    let placeholders: Vec<String> =
        (1..=NORMALIZED_COLUMNS.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO {TABLE_NAME} ({}) VALUES ({})",
        NORMALIZED_COLUMNS.join(", "),
        placeholders.join(", ")
    )
}

/// Set-membership query for `n` keys.
fn key_lookup_sql(n: usize) -> String {
    let values: Vec<String> = (0..n)
        .map(|i| format!("(?{}, ?{}, ?{})", 3 * i + 1, 3 * i + 2, 3 * i + 3))
        .collect();
    format!(
        "WITH wanted(anio, mes, numhc) AS (VALUES {})
         SELECT DISTINCT e.{a}, e.{m}, e.{n}
         FROM {TABLE_NAME} e
         JOIN wanted w ON e.{a} IS w.anio AND e.{m} IS w.mes AND e.{n} = w.numhc",
        values.join(", "),
        a = columns::ANIO,
        m = columns::MES,
        n = columns::NUMHC,
    )
}
