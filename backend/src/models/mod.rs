//! Domain models for the egresos pipeline.
//!
//! This module contains the data structures shared by every stage:
//!
//! - [`Cell`] / [`SourceTable`] - Raw typed cells read from a source file
//! - [`SourceRecord`] - One wide discharge row with fixed fields
//! - [`NormalizedRecord`] / [`NormalizedTable`] - One row per diagnosis
//! - [`AgeBracket`] - Coarse age category (`idetareo`)
//! - [`Period`] / [`RecordKey`] - Identity used for duplicate detection

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

// =============================================================================
// Column names
// =============================================================================

/// Source and destination column names.
pub mod columns {
    pub const FECEGR: &str = "fecegr";
    pub const ANIO: &str = "anio";
    pub const MES: &str = "mes";
    pub const NUMHC: &str = "numhc";
    pub const DOC_IDEN: &str = "doc_iden";
    pub const ETNIA: &str = "etnia";
    pub const SEXO: &str = "sexo";
    pub const EDAD: &str = "edad";
    pub const TIPOEDAD: &str = "tipoedad";
    pub const IDETAREO: &str = "idetareo";
    pub const UPS: &str = "ups";
    pub const DIAG: &str = "diag";
    pub const NUMDIAG: &str = "numdiag";
    pub const CEMORB: &str = "cemorb";
    pub const NUMCEMORB: &str = "numcemorb";
    pub const CODCPT: &str = "codcpt";
    pub const NUMCODCPT: &str = "numcodcpt";
    pub const TOTALEST: &str = "totalest";
    pub const NOMB: &str = "nomb";
    pub const APELL: &str = "apell";
    pub const UBIGEO: &str = "ubigeo";
    pub const CONDICION: &str = "condicion";

    /// Diagnosis code columns, slot 1 first.
    pub const DIAGNOSIS: [&str; 4] = ["coddiag1", "coddiag2", "coddiag3", "coddiag4"];
    /// Morbidity code columns, slot 1 first.
    pub const MORBIDITY: [&str; 2] = ["cemorb1", "cemorb2"];
    /// Procedure (CPT) code columns, slot 1 first.
    pub const PROCEDURE: [&str; 4] = ["codcpt1", "codcpt2", "codcpt3", "codcpt4"];
}

/// Columns of the normalized table, in persisted order.
pub const NORMALIZED_COLUMNS: [&str; 21] = [
    columns::ANIO,
    columns::MES,
    columns::NUMHC,
    columns::DOC_IDEN,
    columns::ETNIA,
    columns::SEXO,
    columns::EDAD,
    columns::TIPOEDAD,
    columns::IDETAREO,
    columns::UPS,
    columns::DIAG,
    columns::NUMDIAG,
    columns::CEMORB,
    columns::NUMCEMORB,
    columns::CODCPT,
    columns::NUMCODCPT,
    columns::TOTALEST,
    columns::NOMB,
    columns::APELL,
    columns::UBIGEO,
    columns::CONDICION,
];

// =============================================================================
// Raw cells
// =============================================================================

/// A typed cell as read from a spreadsheet or CSV file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDateTime),
}

impl Cell {
    /// Build a cell from text, mapping blank strings to [`Cell::Empty`].
    pub fn from_text(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(trimmed.to_string())
        }
    }

    /// True for empty cells and whitespace-only text.
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Text rendering used when a value is carried through unchanged.
    ///
    /// Whole numbers render without a fractional part (`45.0` → `45`).
    pub fn to_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.trim().to_string(),
            Cell::Number(f) if f.is_nan() => String::new(),
            Cell::Number(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
            Cell::Number(f) => f.to_string(),
            Cell::Bool(b) => b.to_string(),
            Cell::Date(dt) if dt.num_seconds_from_midnight() == 0 => {
                dt.format("%Y-%m-%d").to_string()
            }
            Cell::Date(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Numeric view of the cell, parsing text when needed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(f) if !f.is_nan() => Some(*f),
            Cell::Text(s) => s.trim().replace(',', ".").parse().ok(),
            _ => None,
        }
    }
}

/// Where a [`SourceTable`] came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceOrigin {
    Spreadsheet { sheet: String },
    Csv { encoding: String, delimiter: char },
}

static EMPTY_CELL: Cell = Cell::Empty;

/// A header row plus data rows of typed cells.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    pub origin: SourceOrigin,
}

impl SourceTable {
    /// Cell at (`row`, `col`), treating short rows as empty-padded.
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY_CELL)
    }

    /// Rows as JSON objects keyed by header, for inspection output.
    pub fn to_json_records(&self) -> Vec<serde_json::Value> {
        (0..self.rows.len())
            .map(|row| {
                let obj: serde_json::Map<String, serde_json::Value> = self
                    .headers
                    .iter()
                    .enumerate()
                    .map(|(col, h)| {
                        let value = match self.cell(row, col) {
                            Cell::Empty => serde_json::Value::Null,
                            cell => serde_json::json!(cell.to_text()),
                        };
                        (h.clone(), value)
                    })
                    .collect();
                serde_json::Value::Object(obj)
            })
            .collect()
    }
}

// =============================================================================
// Age bracket
// =============================================================================

/// Coarse age category stored as `idetareo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgeBracket {
    /// 0-11 years.
    Child = 1,
    /// 12-17 years.
    Adolescent = 2,
    /// 18-29 years.
    YoungAdult = 3,
    /// 30+ years, or age unknown.
    Adult = 4,
}

impl AgeBracket {
    /// Bracket for an age in whole years.
    pub fn from_years(age: i64) -> Self {
        match age {
            i64::MIN..=11 => AgeBracket::Child,
            12..=17 => AgeBracket::Adolescent,
            18..=29 => AgeBracket::YoungAdult,
            _ => AgeBracket::Adult,
        }
    }

    /// Bracket for a possibly missing, possibly fractional age.
    ///
    /// Fractions are floored; a missing age lands in [`AgeBracket::Adult`].
    pub fn from_age(age: Option<f64>) -> Self {
        match age {
            Some(a) if a.is_finite() => Self::from_years(a.floor() as i64),
            _ => AgeBracket::Adult,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(AgeBracket::Child),
            2 => Some(AgeBracket::Adolescent),
            3 => Some(AgeBracket::YoungAdult),
            4 => Some(AgeBracket::Adult),
            _ => None,
        }
    }
}

// =============================================================================
// Periods and keys
// =============================================================================

/// Year and month of a discharge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// Spanish month name, as shown in load reports.
    pub fn month_name(&self) -> &'static str {
        month_name(self.month)
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.month_name(), self.year)
    }
}

/// Spanish name of a month number (1-12).
pub fn month_name(month: u32) -> &'static str {
    match month {
        1 => "Enero",
        2 => "Febrero",
        3 => "Marzo",
        4 => "Abril",
        5 => "Mayo",
        6 => "Junio",
        7 => "Julio",
        8 => "Agosto",
        9 => "Septiembre",
        10 => "Octubre",
        11 => "Noviembre",
        12 => "Diciembre",
        _ => "Desconocido",
    }
}

/// Identity of a stored discharge: (year, month, patient record number),
/// in the text form persisted in the table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub year: String,
    pub month: String,
    pub numhc: String,
}

// =============================================================================
// Wide source record
// =============================================================================

/// One encounter from the source sheet, fields resolved by column.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub discharge_date: Cell,
    pub numhc: String,
    pub doc_iden: String,
    pub etnia: String,
    pub sexo: String,
    pub edad: String,
    pub age: Option<f64>,
    pub tipoedad: String,
    pub ups: String,
    pub totalest: String,
    pub nomb: String,
    pub apell: String,
    pub ubigeo: String,
    pub condicion: String,
    /// Diagnosis codes; empty string when absent.
    pub diagnoses: [String; 4],
    pub morbidities: [String; 2],
    pub procedures: [String; 4],
}

// =============================================================================
// Long normalized record
// =============================================================================

/// One (encounter, diagnosis slot) row of the normalized table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub anio: Option<i32>,
    pub mes: Option<u32>,
    pub numhc: String,
    pub doc_iden: String,
    pub etnia: String,
    pub sexo: String,
    pub edad: String,
    pub tipoedad: String,
    pub idetareo: u8,
    pub ups: String,
    pub diag: String,
    pub numdiag: u8,
    pub cemorb: String,
    pub numcemorb: u8,
    pub codcpt: String,
    pub numcodcpt: u8,
    pub totalest: String,
    pub nomb: String,
    pub apell: String,
    pub ubigeo: String,
    pub condicion: String,
}

impl NormalizedRecord {
    /// Values as text, in [`NORMALIZED_COLUMNS`] order.
    pub fn values(&self) -> [String; 21] {
        [
            opt_text(self.anio),
            opt_text(self.mes),
            self.numhc.clone(),
            self.doc_iden.clone(),
            self.etnia.clone(),
            self.sexo.clone(),
            self.edad.clone(),
            self.tipoedad.clone(),
            self.idetareo.to_string(),
            self.ups.clone(),
            self.diag.clone(),
            self.numdiag.to_string(),
            self.cemorb.clone(),
            self.numcemorb.to_string(),
            self.codcpt.clone(),
            self.numcodcpt.to_string(),
            self.totalest.clone(),
            self.nomb.clone(),
            self.apell.clone(),
            self.ubigeo.clone(),
            self.condicion.clone(),
        ]
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            year: opt_text(self.anio),
            month: opt_text(self.mes),
            numhc: self.numhc.clone(),
        }
    }

    pub fn period(&self) -> Option<Period> {
        Some(Period::new(self.anio?, self.mes?))
    }
}

fn opt_text<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// The long table produced by the reshaper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTable {
    pub records: Vec<NormalizedRecord>,
}

impl NormalizedTable {
    pub fn new(records: Vec<NormalizedRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NormalizedRecord> {
        self.records.iter()
    }

    /// Period reported for a whole load: the first row's year and month,
    /// with month 1 and `fallback_year` standing in for missing values.
    pub fn representative_period(&self, fallback_year: i32) -> Period {
        let first = self.records.first();
        Period::new(
            first.and_then(|r| r.anio).unwrap_or(fallback_year),
            first.and_then(|r| r.mes).unwrap_or(1),
        )
    }
}

impl<'a> IntoIterator for &'a NormalizedTable {
    type Item = &'a NormalizedRecord;
    type IntoIter = std::slice::Iter<'a, NormalizedRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A normalized record with every text field filled in.
    pub fn record(
        numhc: &str,
        year: i32,
        month: u32,
        diag: &str,
        numdiag: u8,
    ) -> NormalizedRecord {
        NormalizedRecord {
            anio: Some(year),
            mes: Some(month),
            numhc: numhc.to_string(),
            doc_iden: "1".to_string(),
            etnia: "80".to_string(),
            sexo: "F".to_string(),
            edad: "34".to_string(),
            tipoedad: "A".to_string(),
            idetareo: 4,
            ups: "301".to_string(),
            diag: diag.to_string(),
            numdiag,
            cemorb: String::new(),
            numcemorb: 0,
            codcpt: String::new(),
            numcodcpt: 0,
            totalest: "3".to_string(),
            nomb: format!("NOMB{numhc}"),
            apell: format!("APELL{numhc}"),
            ubigeo: "150101".to_string(),
            condicion: "1".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_bracket_boundaries() {
        let cases = [(0, 1), (11, 1), (12, 2), (17, 2), (18, 3), (29, 3), (30, 4), (200, 4)];
        for (age, code) in cases {
            assert_eq!(AgeBracket::from_years(age).code(), code, "age {age}");
            assert_eq!(AgeBracket::from_age(Some(age as f64)).code(), code, "age {age}");
        }
    }

    #[test]
    fn test_age_bracket_missing_or_fractional() {
        assert_eq!(AgeBracket::from_age(None), AgeBracket::Adult);
        assert_eq!(AgeBracket::from_age(Some(f64::NAN)), AgeBracket::Adult);
        assert_eq!(AgeBracket::from_age(Some(11.5)), AgeBracket::Child);
        assert_eq!(AgeBracket::from_age(Some(17.9)), AgeBracket::Adolescent);
    }

    #[test]
    fn test_month_names() {
        assert_eq!(month_name(1), "Enero");
        assert_eq!(month_name(12), "Diciembre");
        assert_eq!(month_name(0), "Desconocido");
        assert_eq!(Period::new(2025, 3).to_string(), "Marzo 2025");
    }

    #[test]
    fn test_cell_text_rendering() {
        assert_eq!(Cell::Number(45.0).to_text(), "45");
        assert_eq!(Cell::Number(2.5).to_text(), "2.5");
        assert_eq!(Cell::Text("  A10 ".into()).to_text(), "A10");
        assert_eq!(Cell::Empty.to_text(), "");
        assert!(Cell::Text("   ".into()).is_blank());
        assert!(Cell::from_text(" ").is_blank());
    }

    #[test]
    fn test_record_key_and_values() {
        let mut record = fixtures::record("77", 2025, 1, "A10", 1);
        assert_eq!(
            record.key(),
            RecordKey { year: "2025".into(), month: "1".into(), numhc: "77".into() }
        );
        assert_eq!(record.values().len(), NORMALIZED_COLUMNS.len());
        assert_eq!(record.values()[10], "A10");

        record.anio = None;
        assert_eq!(record.values()[0], "");
        assert_eq!(record.period(), None);
    }

    #[test]
    fn test_representative_period_defaults() {
        let empty = NormalizedTable::default();
        assert_eq!(empty.representative_period(2030), Period::new(2030, 1));

        let mut record = fixtures::record("1", 2024, 6, "A10", 1);
        record.mes = None;
        let table = NormalizedTable::new(vec![record]);
        assert_eq!(table.representative_period(2030), Period::new(2024, 1));
    }
}
