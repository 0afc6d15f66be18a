//! Write the normalized table to CSV or XLSX, and read such files back.
//!
//! Text columns are written as strings so codes like `ubigeo = 010101` keep
//! their leading zeros; year, month, bracket and slot columns are written
//! as numbers in XLSX output.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_xlsxwriter::Workbook;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::{DEFAULT_CSV_NAME, DEFAULT_XLSX_NAME, TABLE_NAME};
use crate::error::{ExportResult, SchemaError};
use crate::models::{
    columns, Cell, NormalizedRecord, NormalizedTable, SourceTable, NORMALIZED_COLUMNS,
};
use crate::parser::read_source;
use crate::validation::require_columns;

const NUMERIC_COLUMNS: [&str; 6] = [
    columns::ANIO,
    columns::MES,
    columns::IDETAREO,
    columns::NUMDIAG,
    columns::NUMCEMORB,
    columns::NUMCODCPT,
];

static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid filename regex"));

/// Output file format for a transformed table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Xlsx,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Xlsx => "xlsx",
        }
    }

    /// File name used when the caller does not pick one.
    pub fn default_file_name(self) -> &'static str {
        match self {
            OutputFormat::Csv => DEFAULT_CSV_NAME,
            OutputFormat::Xlsx => DEFAULT_XLSX_NAME,
        }
    }

    /// Format implied by a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()?.to_str()?.parse().ok()
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "xlsx" => Ok(OutputFormat::Xlsx),
            other => Err(format!("Unknown output format '{other}' (expected csv or xlsx)")),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Reduce a user-supplied name to a plain file name safe to join to a
/// directory: path components are dropped and unusual characters replaced.
pub fn secure_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(base, "_");
    let cleaned = cleaned.trim_start_matches(['.', '_']);
    if cleaned.is_empty() {
        TABLE_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Path inside `dir` where `name` is stored.
pub fn output_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(secure_filename(name))
}

// =============================================================================
// Writing
// =============================================================================

/// Write `table` to `path`, creating parent directories.
pub fn write_table(table: &NormalizedTable, path: &Path, format: OutputFormat) -> ExportResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    match format {
        OutputFormat::Csv => write_csv(table, path),
        OutputFormat::Xlsx => write_xlsx(table, path),
    }
}

/// UTF-8, comma-separated, header row first.
pub fn write_csv(table: &NormalizedTable, path: &Path) -> ExportResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(NORMALIZED_COLUMNS)?;
    for record in table {
        writer.write_record(&record.values())?;
    }
    writer.flush()?;
    Ok(())
}

/// Single worksheet named after the destination table.
pub fn write_xlsx(table: &NormalizedTable, path: &Path) -> ExportResult<()> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(TABLE_NAME)?;

    for (col, name) in NORMALIZED_COLUMNS.iter().enumerate() {
        sheet.write_string(0, col as u16, *name)?;
    }

    for (i, record) in table.iter().enumerate() {
        let row = (i + 1) as u32;
        for (col, value) in record.values().iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            let numeric = NUMERIC_COLUMNS.contains(&NORMALIZED_COLUMNS[col]);
            match value.parse::<f64>() {
                Ok(n) if numeric => sheet.write_number(row, col as u16, n)?,
                _ => sheet.write_string(row, col as u16, value.as_str())?,
            };
        }
    }

    workbook.save(path)?;
    Ok(())
}

// =============================================================================
// Reading
// =============================================================================

/// Read an exported CSV/XLSX file back into a normalized table.
pub fn read_table(path: &Path) -> ExportResult<NormalizedTable> {
    let source = read_source(path)?;
    Ok(table_from_source(&source)?)
}

/// Interpret a raw table laid out as [`NORMALIZED_COLUMNS`].
pub fn table_from_source(source: &SourceTable) -> Result<NormalizedTable, SchemaError> {
    let idx = require_columns(&source.headers, &NORMALIZED_COLUMNS)?;

    let mut records = Vec::with_capacity(source.rows.len());
    for row in 0..source.rows.len() {
        let cell = |i: usize| source.cell(row, idx[i]);
        let text = |i: usize| cell(i).to_text();
        // 1-based data row plus the header line
        let line = row + 2;
        let int = |i: usize| parse_int::<u8>(cell(i), NORMALIZED_COLUMNS[i], line);

        records.push(NormalizedRecord {
            anio: parse_int::<i32>(cell(0), NORMALIZED_COLUMNS[0], line)?,
            mes: parse_int::<u32>(cell(1), NORMALIZED_COLUMNS[1], line)?,
            numhc: text(2),
            doc_iden: text(3),
            etnia: text(4),
            sexo: text(5),
            edad: text(6),
            tipoedad: text(7),
            idetareo: int(8)?.unwrap_or(0),
            ups: text(9),
            diag: text(10),
            numdiag: int(11)?.unwrap_or(0),
            cemorb: text(12),
            numcemorb: int(13)?.unwrap_or(0),
            codcpt: text(14),
            numcodcpt: int(15)?.unwrap_or(0),
            totalest: text(16),
            nomb: text(17),
            apell: text(18),
            ubigeo: text(19),
            condicion: text(20),
        });
    }

    Ok(NormalizedTable::new(records))
}

/// Whole number in a cell; blank cells are `None`.
fn parse_int<T: TryFrom<i64>>(
    cell: &Cell,
    column: &str,
    row: usize,
) -> Result<Option<T>, SchemaError> {
    if cell.is_blank() {
        return Ok(None);
    }
    cell.as_f64()
        .filter(|f| f.fract() == 0.0)
        .and_then(|f| T::try_from(f as i64).ok())
        .map(Some)
        .ok_or_else(|| SchemaError::InvalidValue {
            column: column.to_string(),
            row,
            value: cell.to_text(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExportError;
    use crate::models::fixtures::record;
    use tempfile::tempdir;

    fn sample() -> NormalizedTable {
        let mut first = record("00123", 2025, 2, "A10", 1);
        first.cemorb = "M1".into();
        first.numcemorb = 1;
        first.ubigeo = "010101".into();
        let mut second = record("456", 2025, 2, "B20", 3);
        second.anio = None;
        second.mes = None;
        NormalizedTable::new(vec![first, second])
    }

    #[test]
    fn test_csv_export_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join(DEFAULT_CSV_NAME);
        write_table(&sample(), &path, OutputFormat::Csv).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("anio,mes,numhc,doc_iden"));
        assert_eq!(read_table(&path).unwrap(), sample());
    }

    #[test]
    fn test_xlsx_export_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(DEFAULT_XLSX_NAME);
        write_table(&sample(), &path, OutputFormat::Xlsx).unwrap();
        assert_eq!(read_table(&path).unwrap(), sample());
    }

    #[test]
    fn test_read_rejects_bad_slot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        let mut content = NORMALIZED_COLUMNS.join(",");
        content.push_str("\n2025,1,77,1,80,F,34,A,4,301,A10,first,,0,,0,3,ANA,QUISPE,150101,1\n");
        std::fs::write(&path, content).unwrap();

        match read_table(&path) {
            Err(ExportError::Schema(SchemaError::InvalidValue { column, row, .. })) => {
                assert_eq!(column, "numdiag");
                assert_eq!(row, 2);
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("egresos_transformado.csv"), "egresos_transformado.csv");
        assert_eq!(secure_filename("../../etc/passwd"), "passwd");
        assert_eq!(secure_filename("C:\\tmp\\enero 2025.xlsx"), "enero_2025.xlsx");
        assert_eq!(secure_filename(".."), "egresos");
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("XLSX".parse::<OutputFormat>().unwrap(), OutputFormat::Xlsx);
        assert!("pdf".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::from_path(Path::new("a.csv")), Some(OutputFormat::Csv));
        assert_eq!(OutputFormat::Xlsx.default_file_name(), "egresos_transformado.xlsx");
    }
}
