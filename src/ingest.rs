// 📥 Ingest - CSV upload parsing
// Turns an uploaded CSV file into loosely-typed transaction documents

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Number, Value};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Upload CSV file")]
    UnsupportedFile,

    #[error("Failed to parse CSV: {0}")]
    Parse(String),
}

impl From<csv::Error> for IngestError {
    fn from(err: csv::Error) -> Self {
        IngestError::Parse(err.to_string())
    }
}

// ============================================================================
// COLUMN TYPES
// ============================================================================

/// Inferred type of a CSV column (all non-empty cells must agree)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Integer,
    Float,
    Text,
}

impl ColumnKind {
    fn widen(self, cell: &str) -> Self {
        if cell.is_empty() {
            return self;
        }
        match self {
            ColumnKind::Integer if cell.parse::<i64>().is_ok() => ColumnKind::Integer,
            ColumnKind::Integer | ColumnKind::Float if is_float(cell) => ColumnKind::Float,
            _ => ColumnKind::Text,
        }
    }

    fn convert(self, cell: &str) -> Value {
        if cell.is_empty() {
            return Value::String(String::new());
        }
        match self {
            ColumnKind::Integer => cell
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(cell.to_string())),
            ColumnKind::Float => cell
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(cell.to_string())),
            ColumnKind::Text => Value::String(cell.to_string()),
        }
    }
}

fn is_float(cell: &str) -> bool {
    cell.parse::<f64>().map(|v| v.is_finite()).unwrap_or(false)
}

// ============================================================================
// PARSING
// ============================================================================

/// Check the upload file name (only .csv / .txt are accepted)
pub fn check_file_name(file_name: &str) -> Result<(), IngestError> {
    let lower = file_name.to_lowercase();
    if lower.ends_with(".csv") || lower.ends_with(".txt") {
        Ok(())
    } else {
        Err(IngestError::UnsupportedFile)
    }
}

/// Parse an uploaded file into documents, one per data row.
///
/// Headers are trimmed, empty cells become `""`, and every column whose
/// non-empty cells are all numeric is emitted as JSON numbers.
pub fn parse_upload(file_name: &str, contents: &[u8]) -> Result<Vec<Map<String, Value>>, IngestError> {
    check_file_name(file_name)?;
    parse_csv_bytes(contents)
}

pub fn parse_csv_bytes(contents: &[u8]) -> Result<Vec<Map<String, Value>>, IngestError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::None)
        .from_reader(contents);

    let headers = dedupe_headers(
        rdr.headers()?
            .iter()
            .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
            .collect(),
    );

    if headers.iter().all(|h| h.is_empty()) {
        return Err(IngestError::Parse("No columns to parse from file".to_string()));
    }

    let mut rows: Vec<Vec<String>> = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result?;
        if record.len() > headers.len() {
            return Err(IngestError::Parse(format!(
                "Expected {} fields in line {}, saw {}",
                headers.len(),
                idx + 2,
                record.len()
            )));
        }
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        row.resize(headers.len(), String::new());
        rows.push(row);
    }

    let kinds: Vec<ColumnKind> = (0..headers.len())
        .map(|col| {
            rows.iter()
                .fold(ColumnKind::Integer, |kind, row| kind.widen(row[col].trim()))
        })
        .collect();

    let documents = rows
        .into_iter()
        .map(|row| {
            let mut doc = Map::new();
            for ((header, kind), cell) in headers.iter().zip(&kinds).zip(row) {
                let value = match kind {
                    ColumnKind::Text => kind.convert(&cell),
                    _ => kind.convert(cell.trim()),
                };
                doc.insert(header.clone(), value);
            }
            doc
        })
        .collect();

    Ok(documents)
}

/// Repeated header names get a `.N` suffix (`amount`, `amount.1`, ...)
/// so no column overwrites another in the document
fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    headers
        .into_iter()
        .map(|header| {
            let mut name = header.clone();
            let mut n = 0;
            while seen.contains(&name) {
                n += 1;
                name = format!("{}.{}", header, n);
            }
            seen.insert(name.clone());
            name
        })
        .collect()
}

/// Load a CSV file from disk (CLI import path)
pub fn load_csv_file(path: &Path) -> Result<Vec<Map<String, Value>>> {
    let contents = std::fs::read(path)
        .with_context(|| format!("Failed to read CSV file {}", path.display()))?;
    let documents = parse_csv_bytes(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(documents)
}

// ============================================================================
// TIMESTAMPS
// ============================================================================

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

/// Lenient timestamp parsing. Offsets are normalized to UTC and dropped.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt.naive_utc());
    }
    if let Some(stripped) = s.strip_suffix('Z') {
        if let Ok(dt) = NaiveDateTime::parse_from_str(stripped, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(dt);
        }
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date.and_hms_opt(0, 0, 0);
        }
    }

    None
}

/// ISO-8601 rendering used in API payloads and report files
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S").to_string()
}

// ============================================================================
// TESTS
// ============================================================================
