//! Reshape wide discharge rows into one row per diagnosis.
//!
//! # Architecture
//!
//! ```text
//! Source (wide)                                Normalized (long)
//! ┌──────────────────────────────────┐        ┌──────────────────────────────┐
//! │ numhc: 77                        │        │ 77 | A10 | 1 | M1 | 1 | P1 | 1│
//! │ coddiag1..4: A10, -, B20, -      │   →    │ 77 | B20 | 3 |    | 0 |    | 0│
//! │ cemorb1..2:  M1, M2              │        └──────────────────────────────┘
//! │ codcpt1..4:  P1, P2, -, -        │
//! └──────────────────────────────────┘
//! ```
//!
//! # Rules
//!
//! - Only non-empty diagnosis slots produce rows.
//! - Diagnosis slots 1 and 2 carry morbidity slots 1 and 2; later slots
//!   carry no morbidity.
//! - Diagnosis slot `i` carries procedure slot `i`.
//! - Slot indices are 0 whenever their code is empty.
//! - Year/month come from `fecegr` (`%m/%d/%y` text or a native date cell);
//!   an unparseable date leaves them empty without failing the row.
//! - Output is sorted by (nomb, apell, numdiag, numcemorb, numcodcpt).

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::error::{DateParseError, SchemaError};
use crate::models::{
    columns, AgeBracket, Cell, NormalizedRecord, NormalizedTable, Period, SourceRecord,
    SourceTable,
};
use crate::validation::require_columns;

/// Two-digit-year month/day/year, as exported by the discharge system.
pub const DATE_FORMAT: &str = "%m/%d/%y";

/// Counters describing one reshaping run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReshapeStats {
    /// Wide rows read.
    pub source_rows: usize,
    /// Long rows emitted.
    pub output_rows: usize,
    /// Rows whose discharge date could not be parsed.
    pub unparsed_dates: usize,
    /// Rows that had no diagnosis code at all.
    pub rows_without_diagnosis: usize,
}

/// Output of [`reshape`].
#[derive(Debug, Clone)]
pub struct Reshaped {
    pub table: NormalizedTable,
    pub stats: ReshapeStats,
}

/// Positions of every required source column.
#[derive(Debug, Clone)]
pub struct SourceColumns {
    fecegr: usize,
    numhc: usize,
    doc_iden: usize,
    etnia: usize,
    sexo: usize,
    edad: usize,
    tipoedad: usize,
    ups: usize,
    totalest: usize,
    nomb: usize,
    apell: usize,
    ubigeo: usize,
    condicion: usize,
    diagnoses: [usize; 4],
    morbidities: [usize; 2],
    procedures: [usize; 4],
}

impl SourceColumns {
    /// Every column the reshaper reads.
    pub fn required() -> Vec<&'static str> {
        let mut names = vec![
            columns::FECEGR,
            columns::NUMHC,
            columns::DOC_IDEN,
            columns::ETNIA,
            columns::SEXO,
            columns::EDAD,
            columns::TIPOEDAD,
            columns::UPS,
            columns::TOTALEST,
            columns::NOMB,
            columns::APELL,
            columns::UBIGEO,
            columns::CONDICION,
        ];
        names.extend(columns::DIAGNOSIS);
        names.extend(columns::MORBIDITY);
        names.extend(columns::PROCEDURE);
        names
    }

    /// Resolve positions from a header row, listing all missing columns.
    pub fn resolve(headers: &[String]) -> Result<Self, SchemaError> {
        let idx = require_columns(headers, &Self::required())?;
        Ok(Self {
            fecegr: idx[0],
            numhc: idx[1],
            doc_iden: idx[2],
            etnia: idx[3],
            sexo: idx[4],
            edad: idx[5],
            tipoedad: idx[6],
            ups: idx[7],
            totalest: idx[8],
            nomb: idx[9],
            apell: idx[10],
            ubigeo: idx[11],
            condicion: idx[12],
            diagnoses: [idx[13], idx[14], idx[15], idx[16]],
            morbidities: [idx[17], idx[18]],
            procedures: [idx[19], idx[20], idx[21], idx[22]],
        })
    }

    /// Build the typed record for one data row.
    pub fn record(&self, table: &SourceTable, row: usize) -> SourceRecord {
        let text = |col: usize| table.cell(row, col).to_text();
        let edad = table.cell(row, self.edad);

        SourceRecord {
            discharge_date: table.cell(row, self.fecegr).clone(),
            numhc: text(self.numhc),
            doc_iden: text(self.doc_iden),
            etnia: text(self.etnia),
            sexo: text(self.sexo),
            edad: edad.to_text(),
            age: edad.as_f64(),
            tipoedad: text(self.tipoedad),
            ups: text(self.ups),
            totalest: text(self.totalest),
            nomb: text(self.nomb),
            apell: text(self.apell),
            ubigeo: text(self.ubigeo),
            condicion: text(self.condicion),
            diagnoses: self.diagnoses.map(text),
            morbidities: self.morbidities.map(text),
            procedures: self.procedures.map(text),
        }
    }
}

/// Derive year and month from a discharge date cell.
pub fn parse_discharge_date(cell: &Cell) -> Result<Period, DateParseError> {
    let date = match cell {
        Cell::Date(dt) => Some(dt.date()),
        Cell::Text(s) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok(),
        _ => None,
    };

    date.map(|d| Period::new(d.year(), d.month()))
        .ok_or_else(|| DateParseError { value: cell.to_text() })
}

/// Reshape a wide table into the normalized long table.
///
/// Fails only when required columns are missing; bad dates and empty
/// diagnosis slots are absorbed row by row.
pub fn reshape(table: &SourceTable) -> Result<Reshaped, SchemaError> {
    let cols = SourceColumns::resolve(&table.headers)?;
    let mut stats = ReshapeStats {
        source_rows: table.rows.len(),
        ..ReshapeStats::default()
    };

    let mut records = Vec::new();

    for row in 0..table.rows.len() {
        let source = cols.record(table, row);

        let period = match parse_discharge_date(&source.discharge_date) {
            Ok(p) => Some(p),
            Err(e) => {
                stats.unparsed_dates += 1;
                log::debug!("row {}: {}", row + 2, e);
                None
            }
        };

        let expanded = expand_record(&source, period);
        if expanded.is_empty() {
            stats.rows_without_diagnosis += 1;
        }
        records.extend(expanded);
    }

    sort_records(&mut records);
    stats.output_rows = records.len();

    Ok(Reshaped {
        table: NormalizedTable::new(records),
        stats,
    })
}

/// Emit one normalized row per non-empty diagnosis slot of `source`.
pub fn expand_record(source: &SourceRecord, period: Option<Period>) -> Vec<NormalizedRecord> {
    let idetareo = AgeBracket::from_age(source.age).code();

    source
        .diagnoses
        .iter()
        .enumerate()
        .filter(|(_, diag)| !diag.trim().is_empty())
        .map(|(i, diag)| {
            let slot = i + 1;
            let (cemorb, numcemorb) = companion(&source.morbidities, slot);
            let (codcpt, numcodcpt) = companion(&source.procedures, slot);

            NormalizedRecord {
                anio: period.map(|p| p.year),
                mes: period.map(|p| p.month),
                numhc: source.numhc.clone(),
                doc_iden: source.doc_iden.clone(),
                etnia: source.etnia.clone(),
                sexo: source.sexo.clone(),
                edad: source.edad.clone(),
                tipoedad: source.tipoedad.clone(),
                idetareo,
                ups: source.ups.clone(),
                diag: diag.trim().to_string(),
                numdiag: slot as u8,
                cemorb,
                numcemorb,
                codcpt,
                numcodcpt,
                totalest: source.totalest.clone(),
                nomb: source.nomb.clone(),
                apell: source.apell.clone(),
                ubigeo: source.ubigeo.clone(),
                condicion: source.condicion.clone(),
            }
        })
        .collect()
}

/// Code at 1-based `slot` of `codes` with its index, or `("", 0)` when the
/// slot is past the end or empty.
fn companion(codes: &[String], slot: usize) -> (String, u8) {
    match codes.get(slot - 1).map(|c| c.trim()) {
        Some(code) if !code.is_empty() => (code.to_string(), slot as u8),
        _ => (String::new(), 0),
    }
}

/// Stable sort on (nomb, apell, numdiag, numcemorb, numcodcpt).
pub fn sort_records(records: &mut [NormalizedRecord]) {
    records.sort_by(|a, b| {
        (a.nomb.as_str(), a.apell.as_str(), a.numdiag, a.numcemorb, a.numcodcpt).cmp(&(
            b.nomb.as_str(),
            b.apell.as_str(),
            b.numdiag,
            b.numcemorb,
            b.numcodcpt,
        ))
    });
}
