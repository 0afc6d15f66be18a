//! Content fingerprint of a normalized table.
//!
//! SHA-256 over the column list and every value, row by row. Fields are
//! separated by 0x1F and rows by 0x1E, so moving a value between fields or
//! reordering rows changes the digest.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::models::{NormalizedTable, NORMALIZED_COLUMNS};

const FIELD_SEP: u8 = 0x1F;
const ROW_SEP: u8 = 0x1E;

/// Hex-encoded SHA-256 digest of a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for listings.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Order- and value-sensitive hash of `table`.
pub fn fingerprint(table: &NormalizedTable) -> Fingerprint {
    let mut hasher = Sha256::new();

    for column in NORMALIZED_COLUMNS {
        hasher.update(column.as_bytes());
        hasher.update([FIELD_SEP]);
    }
    hasher.update([ROW_SEP]);

    for record in table {
        for value in record.values() {
            hasher.update(value.as_bytes());
            hasher.update([FIELD_SEP]);
        }
        hasher.update([ROW_SEP]);
    }

    Fingerprint(hex::encode(hasher.finalize()))
}
