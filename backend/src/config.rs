//! Application configuration.
//!
//! Compile-time constants for the egresos layout, plus a [`Config`] loaded
//! from the environment (and an optional `.env` file).

use std::env;
use std::path::PathBuf;

use crate::storage::{DuplicatePolicy, Provisioning};

/// Destination table for normalized discharge records.
pub const TABLE_NAME: &str = "egresos";

/// Table holding applied schema versions.
pub const SCHEMA_VERSION_TABLE: &str = "egresos_schema_version";

/// Default name of a transformed CSV export.
pub const DEFAULT_CSV_NAME: &str = "egresos_transformado.csv";

/// Default name of a transformed XLSX export.
pub const DEFAULT_XLSX_NAME: &str = "egresos_transformado.xlsx";

/// Extensions accepted as source files.
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["xls", "xlsx", "xlsm", "ods", "csv"];

/// Seconds SQLite waits on a locked database before failing.
pub const BUSY_TIMEOUT_SECS: u64 = 5;

const DEFAULT_DATABASE_URL: &str = "egresos.db";
const DEFAULT_TRANSFORMED_DIR: &str = "transformed";
const DEFAULT_REGISTRY_PATH: &str = ".egresos/registry.json";

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite path or `sqlite://` URL.
    pub database_url: String,
    /// Directory where transformed files are written.
    pub transformed_dir: PathBuf,
    /// JSON file persisting the upload registry between runs.
    pub registry_path: PathBuf,
    /// What to do when some rows are already stored.
    pub duplicate_policy: DuplicatePolicy,
    /// How the destination table is prepared before inserting.
    pub provisioning: Provisioning,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            transformed_dir: PathBuf::from(DEFAULT_TRANSFORMED_DIR),
            registry_path: PathBuf::from(DEFAULT_REGISTRY_PATH),
            duplicate_policy: DuplicatePolicy::default(),
            provisioning: Provisioning::default(),
        }
    }
}

impl Config {
    /// Build the configuration from `EGRESOS_*` environment variables.
    ///
    /// Unknown policy values fall back to the defaults with a warning.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let mut config = Self::default();

        if let Ok(url) = env::var("EGRESOS_DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(dir) = env::var("EGRESOS_TRANSFORMED_DIR") {
            config.transformed_dir = PathBuf::from(dir);
        }
        if let Ok(path) = env::var("EGRESOS_REGISTRY_PATH") {
            config.registry_path = PathBuf::from(path);
        }
        if let Ok(value) = env::var("EGRESOS_DUPLICATE_POLICY") {
            match value.parse() {
                Ok(policy) => config.duplicate_policy = policy,
                Err(e) => log::warn!("{e}; using {}", config.duplicate_policy),
            }
        }
        if let Ok(value) = env::var("EGRESOS_PROVISIONING") {
            match value.parse() {
                Ok(mode) => config.provisioning = mode,
                Err(e) => log::warn!("{e}; using {}", config.provisioning),
            }
        }

        config
    }
}
