//! Upload registry - which transformed files have been loaded into storage.
//!
//! An explicit state object owned by the caller: load and delete operations
//! take it by `&mut`, nothing here is global. It can be kept in memory for a
//! single session or persisted as JSON between runs.

pub mod fingerprint;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{RegistryError, RegistryResult};
use crate::models::Period;

pub use fingerprint::{fingerprint, Fingerprint};

/// One successful load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Content fingerprint of the loaded table
    pub fingerprint: Fingerprint,
    /// Representative year; deleting the upload removes this year/month
    pub year: i32,
    /// Representative month (1-12)
    pub month: u32,
    /// Rows written by the load
    pub rows: usize,
    /// Unique identifier of the load
    pub load_id: Uuid,
    /// RFC 3339 timestamp
    pub loaded_at: String,
    /// Location of the loaded file, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl RegistryEntry {
    pub fn new(fingerprint: Fingerprint, period: Period, rows: usize) -> Self {
        Self {
            fingerprint,
            year: period.year,
            month: period.month,
            rows,
            load_id: Uuid::new_v4(),
            loaded_at: Utc::now().to_rfc3339(),
            path: None,
        }
    }

    pub fn period(&self) -> Period {
        Period::new(self.year, self.month)
    }
}

/// Mapping from output filename to its latest load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadRegistry {
    /// Backing file, if persisted
    #[serde(skip)]
    path: Option<PathBuf>,
    entries: BTreeMap<String, RegistryEntry>,
}

impl UploadRegistry {
    /// An empty, in-memory registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a registry persisted at `path`; a missing file is an empty registry.
    pub fn load(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut registry = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str::<UploadRegistry>(&content)?
        } else {
            Self::default()
        };
        registry.path = Some(path);
        Ok(registry)
    }

    /// Write the registry back to the file it was loaded from.
    ///
    /// In-memory registries have nowhere to go and are left as they are.
    pub fn save(&self) -> RegistryResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Record a load, replacing any previous entry for `filename`.
    pub fn insert(
        &mut self,
        filename: impl Into<String>,
        entry: RegistryEntry,
    ) -> Option<RegistryEntry> {
        self.entries.insert(filename.into(), entry)
    }

    pub fn get(&self, filename: &str) -> Option<&RegistryEntry> {
        self.entries.get(filename)
    }

    /// Entry for `filename`, or [`RegistryError::NotFound`].
    pub fn require(&self, filename: &str) -> RegistryResult<&RegistryEntry> {
        self.get(filename)
            .ok_or_else(|| RegistryError::NotFound(filename.to_string()))
    }

    pub fn remove(&mut self, filename: &str) -> Option<RegistryEntry> {
        self.entries.remove(filename)
    }

    /// First filename whose load had this fingerprint.
    pub fn find_by_fingerprint(&self, fingerprint: &Fingerprint) -> Option<(&str, &RegistryEntry)> {
        self.entries
            .iter()
            .find(|(_, e)| &e.fingerprint == fingerprint)
            .map(|(name, e)| (name.as_str(), e))
    }

    /// Entries ordered by filename.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RegistryEntry)> {
        self.entries.iter().map(|(name, e)| (name.as_str(), e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::record;
    use crate::models::NormalizedTable;
    use tempfile::tempdir;

    fn entry(diag: &str) -> RegistryEntry {
        let table = NormalizedTable::new(vec![record("1", 2025, 1, diag, 1)]);
        RegistryEntry::new(fingerprint(&table), Period::new(2025, 1), table.len())
    }

    #[test]
    fn test_insert_get_remove() {
        let mut registry = UploadRegistry::new();
        assert!(registry.is_empty());

        registry.insert("enero.csv", entry("A10"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("enero.csv").unwrap().rows, 1);
        assert!(matches!(registry.require("febrero.csv"), Err(RegistryError::NotFound(_))));

        assert!(registry.remove("enero.csv").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_find_by_fingerprint() {
        let mut registry = UploadRegistry::new();
        let e = entry("A10");
        let fp = e.fingerprint.clone();
        registry.insert("enero.csv", e);
        registry.insert("febrero.csv", entry("B20"));

        let (name, _) = registry.find_by_fingerprint(&fp).unwrap();
        assert_eq!(name, "enero.csv");
        assert!(registry.find_by_fingerprint(&entry("C30").fingerprint).is_none());
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("registry.json");

        let mut registry = UploadRegistry::load(&path).unwrap();
        assert!(registry.is_empty());
        let e = entry("A10");
        let mut located = entry("B20");
        located.path = Some(dir.path().join("febrero.csv"));
        registry.insert("enero.csv", e.clone());
        registry.insert("febrero.csv", located.clone());
        registry.save().unwrap();

        let reopened = UploadRegistry::load(&path).unwrap();
        assert_eq!(reopened.get("enero.csv"), Some(&e));
        assert_eq!(reopened.get("febrero.csv"), Some(&located));
    }

    #[test]
    fn test_corrupt_registry_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(UploadRegistry::load(&path), Err(RegistryError::Json(_))));
    }
}
