//! Source file reader with format, encoding and delimiter auto-detection.
//!
//! Spreadsheets (`.xls`, `.xlsx`, `.xlsm`, `.ods`) are read with calamine
//! from their first worksheet; CSV files are decoded (chardet + encoding_rs)
//! and parsed with the `csv` crate. Both produce a [`SourceTable`] of typed
//! cells. No egresos-specific logic here.

use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::path::Path;

use crate::config::ALLOWED_EXTENSIONS;
use crate::error::{SourceError, SourceResult};
use crate::models::{Cell, SourceOrigin, SourceTable};

/// How a file is read, decided from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Spreadsheet,
    Csv,
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Pick the reader for a path.
pub fn source_format(path: &Path) -> SourceResult<SourceFormat> {
    match extension_of(path).as_deref() {
        Some("csv") => Ok(SourceFormat::Csv),
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext) => Ok(SourceFormat::Spreadsheet),
        other => Err(SourceError::UnsupportedFormat(
            other.unwrap_or("").to_string(),
        )),
    }
}

/// Read any supported source file into a table.
///
/// # Example
/// ```ignore
/// let table = read_source("egresos_enero.xlsx")?;
/// println!("{} rows, columns: {}", table.rows.len(), table.headers.join(", "));
/// ```
pub fn read_source<P: AsRef<Path>>(path: P) -> SourceResult<SourceTable> {
    let path = path.as_ref();
    match source_format(path)? {
        SourceFormat::Spreadsheet => read_spreadsheet(path),
        SourceFormat::Csv => {
            let bytes = std::fs::read(path)?;
            parse_csv_bytes(&bytes)
        }
    }
}

// =============================================================================
// Spreadsheets
// =============================================================================

/// Read the first worksheet of a spreadsheet; the first row is the header.
pub fn read_spreadsheet(path: &Path) -> SourceResult<SourceTable> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| SourceError::Spreadsheet(e.to_string()))?;

    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(SourceError::Empty)?;

    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| SourceError::Spreadsheet(e.to_string()))?;

    let mut rows = range.rows();
    let header_row = rows.next().ok_or(SourceError::Empty)?;
    let headers: Vec<String> = header_row.iter().map(|c| data_to_cell(c).to_text()).collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(SourceError::NoHeaders);
    }

    let rows: Vec<Vec<Cell>> = rows
        .map(|r| r.iter().map(data_to_cell).collect::<Vec<_>>())
        .filter(|r| !r.iter().all(Cell::is_blank))
        .collect();

    Ok(SourceTable {
        headers,
        rows,
        origin: SourceOrigin::Spreadsheet { sheet },
    })
}

/// Convert a calamine cell into a [`Cell`].
fn data_to_cell(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::String(s) => Cell::from_text(s),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(dt) => excel_serial_to_datetime(dt.as_f64())
            .map(Cell::Date)
            .unwrap_or(Cell::Empty),
        Data::DateTimeIso(s) => parse_iso_datetime(s)
            .map(Cell::Date)
            .unwrap_or_else(|| Cell::from_text(s)),
        Data::DurationIso(s) => Cell::from_text(s),
    }
}

/// Excel stores dates as days since 1899-12-30 (1900 date system).
fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let days = serial.trunc() as i64;
    let seconds = ((serial - serial.trunc()) * 86_400.0).round() as i64;
    epoch
        .checked_add_signed(Duration::days(days))?
        .checked_add_signed(Duration::seconds(seconds))
}

fn parse_iso_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

// =============================================================================
// CSV
// =============================================================================

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "" => "utf-8".to_string(),
        "iso-8859-1" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "iso-8859-15" | "latin-9" => "iso-8859-15".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to string using the specified encoding
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    let decoded = match encoding.to_lowercase().as_str() {
        // Latin-1 labels decode as windows-1252, a superset of ISO-8859-1 for printable bytes
        "iso-8859-1" | "latin-1" | "latin1" | "windows-1252" | "cp1252" => {
            encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned()
        }
        "iso-8859-15" | "latin-9" => encoding_rs::ISO_8859_15.decode(bytes).0.into_owned(),
        // UTF-8, ASCII and anything unknown: lossy UTF-8
        _ => String::from_utf8_lossy(bytes).into_owned(),
    };
    decoded.trim_start_matches('\u{feff}').to_string()
}

/// Detect the delimiter by counting occurrences in the first line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Parse CSV bytes with auto-detection of encoding and delimiter.
pub fn parse_csv_bytes(bytes: &[u8]) -> SourceResult<SourceTable> {
    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    let delimiter = detect_delimiter(&content);
    parse_csv_str(&content, delimiter, encoding)
}

/// Parse CSV text with an explicit delimiter.
pub fn parse_csv_str(
    content: &str,
    delimiter: char,
    encoding: String,
) -> SourceResult<SourceTable> {
    if content.trim().is_empty() {
        return Err(SourceError::Empty);
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| SourceError::Csv(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(SourceError::NoHeaders);
    }

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        // +2: 1-based, after the header line
        let record = record.map_err(|e| SourceError::Csv(format!("line {}: {}", idx + 2, e)))?;
        let row: Vec<Cell> = record.iter().map(Cell::from_text).collect();
        if !row.iter().all(Cell::is_blank) {
            rows.push(row);
        }
    }

    Ok(SourceTable {
        headers,
        rows,
        origin: SourceOrigin::Csv { encoding, delimiter },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(csv: &str) -> SourceTable {
        parse_csv_bytes(csv.as_bytes()).unwrap()
    }

    #[test]
    fn test_simple_csv() {
        let table = parse("numhc;edad\n100;30\n200;25");

        assert_eq!(table.headers, vec!["numhc", "edad"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.cell(0, 0), &Cell::Text("100".into()));
        assert_eq!(table.cell(1, 1), &Cell::Text("25".into()));
        assert_eq!(
            table.origin,
            SourceOrigin::Csv { encoding: "utf-8".into(), delimiter: ';' }
        );
    }

    #[test]
    fn test_quoted_values_keep_delimiters() {
        let table = parse("nomb,apell\n\"ANA, MARIA\",\"PEREZ\"");
        assert_eq!(table.cell(0, 0), &Cell::Text("ANA, MARIA".into()));
        assert_eq!(table.cell(0, 1), &Cell::Text("PEREZ".into()));
    }

    #[test]
    fn test_empty_lines_and_blank_rows_skipped() {
        let table = parse("a;b\n1;2\n\n;\n3;4\n");
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn test_missing_values_are_empty() {
        let table = parse("a;b;c\n1;;3\n4");
        assert_eq!(table.cell(0, 1), &Cell::Empty);
        assert_eq!(table.cell(1, 2), &Cell::Empty);
    }

    #[test]
    fn test_empty_csv_error() {
        assert!(matches!(parse_csv_bytes(b""), Err(SourceError::Empty)));
        assert!(matches!(parse_csv_bytes(b"  \n"), Err(SourceError::Empty)));
    }

    #[test]
    fn test_bom_is_stripped() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"numhc,edad\n1,2");
        let table = parse_csv_bytes(&bytes).unwrap();
        assert_eq!(table.headers[0], "numhc");
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(detect_delimiter("a,b,c\n1,2,3"), ',');
        assert_eq!(detect_delimiter("a\tb\tc\n1\t2\t3"), '\t');
        assert_eq!(detect_delimiter("a|b|c\n1|2|3"), '|');
        assert_eq!(detect_delimiter("single"), ',');
    }

    #[test]
    fn test_latin1_decoding() {
        // "Ñaña" in ISO-8859-1
        let bytes: &[u8] = &[0xD1, 0x61, 0xF1, 0x61];
        assert_eq!(decode_content(bytes, "iso-8859-1"), "Ñaña");
    }

    #[test]
    fn test_latin1_currency_sign() {
        assert_eq!(decode_content(&[0x41, 0xA4], "iso-8859-1"), "A¤");
        assert_eq!(decode_content(&[0x41, 0xA4], "latin1"), "A¤");
        assert_eq!(decode_content(&[0x41, 0xA4], "iso-8859-15"), "A€");
    }

    #[test]
    fn test_format_by_extension() {
        assert_eq!(source_format(Path::new("a.CSV")).unwrap(), SourceFormat::Csv);
        assert_eq!(source_format(Path::new("a.xlsx")).unwrap(), SourceFormat::Spreadsheet);
        assert!(matches!(
            source_format(Path::new("a.pdf")),
            Err(SourceError::UnsupportedFormat(ext)) if ext == "pdf"
        ));
        assert_eq!(source_format(Path::new("egresos.ods")).unwrap(), SourceFormat::Spreadsheet);
        assert!(source_format(Path::new("egresos")).is_err());
    }

    #[test]
    fn test_excel_serial_dates() {
        let dt = excel_serial_to_datetime(45672.0).unwrap();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());

        let dt = excel_serial_to_datetime(45672.5).unwrap();
        assert_eq!(dt.format("%H:%M").to_string(), "12:00");

        assert!(excel_serial_to_datetime(-1.0).is_none());
    }
}
