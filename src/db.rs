use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info};

use crate::ingest::parse_timestamp;

/// Transaction document with an open-ended field set.
/// Identity and ingestion time are assigned here; everything else is
/// whatever the uploader sent.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TransactionRecord {
    // ========================================================================
    // IDENTITY (assigned at insert, never changes)
    // ========================================================================
    #[serde(default = "default_uuid")]
    pub id: String,

    #[serde(rename = "_ingested_at", default = "Utc::now")]
    pub ingested_at: DateTime<Utc>,

    // ========================================================================
    // DOCUMENT FIELDS (amount, timestamp, merchant, category, ...)
    // ========================================================================
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

fn default_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl TransactionRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self::ingested(fields, Utc::now())
    }

    pub fn ingested(mut fields: Map<String, Value>, ingested_at: DateTime<Utc>) -> Self {
        // Reserved keys belong to the envelope, not the document
        fields.remove("id");
        fields.remove("_id");
        fields.remove("_ingested_at");

        Self {
            id: default_uuid(),
            ingested_at,
            fields,
        }
    }

    /// Field value, treating absent / null / "" as missing
    pub fn field(&self, key: &str) -> Option<&Value> {
        match self.fields.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(v) => Some(v),
        }
    }

    pub fn is_missing(&self, key: &str) -> bool {
        self.field(key).is_none()
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// String form of a scalar field
    pub fn text(&self, key: &str) -> Option<String> {
        match self.field(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Numeric amount (numbers as-is, numeric strings parsed)
    pub fn amount(&self) -> Option<f64> {
        match self.field("amount")? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        match self.field("timestamp")? {
            Value::String(s) => parse_timestamp(s),
            _ => None,
        }
    }

    /// Flattened JSON document: `id`, fields, `_ingested_at`
    pub fn to_document(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert("id".to_string(), Value::String(self.id.clone()));
        for (k, v) in &self.fields {
            doc.insert(k.clone(), v.clone());
        }
        doc.insert(
            "_ingested_at".to_string(),
            Value::String(ingested_stamp(&self.ingested_at)),
        );
        doc
    }
}

/// Fixed-width RFC 3339 so lexical order matches chronological order
fn ingested_stamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ============================================================================
// REPORTS
// ============================================================================

/// Report summary (everything except the CSV body)
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ReportSummary {
    pub id: String,
    pub report_type: String,
    pub generated_at: DateTime<Utc>,
    pub transactions: i64,
    pub amount: f64,
    pub start: String,
    pub end: String,
    pub checksum: String,
}

/// Generated report: summary metadata plus the CSV blob
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRecord {
    pub summary: ReportSummary,
    pub csv: String,
}

impl ReportRecord {
    pub fn new(
        report_type: &str,
        transactions: i64,
        amount: f64,
        start: String,
        end: String,
        csv: String,
    ) -> Self {
        Self {
            summary: ReportSummary {
                id: default_uuid(),
                report_type: report_type.to_string(),
                generated_at: Utc::now(),
                transactions,
                amount,
                start,
                end,
                checksum: compute_checksum(&csv),
            },
            csv,
        }
    }
}

pub fn compute_checksum(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Open (or create) the database file and make sure the schema exists
pub fn open_database(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    setup_database(&conn)?;
    info!(path = %path.display(), "database ready");
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Transactions Table (schemaless document column)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tx_uuid TEXT UNIQUE NOT NULL,
            ingested_at TEXT NOT NULL,
            data TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Reports Table
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS reports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            report_uuid TEXT UNIQUE NOT NULL,
            report_type TEXT NOT NULL,
            generated_at TEXT NOT NULL,
            transactions INTEGER NOT NULL,
            amount REAL NOT NULL,
            start_ts TEXT NOT NULL,
            end_ts TEXT NOT NULL,
            checksum TEXT NOT NULL,
            csv TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ingested_at ON transactions(ingested_at)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_reports_generated ON reports(generated_at)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// TRANSACTIONS
// ============================================================================

/// Insert documents in one SQLite transaction. Returns the inserted count.
pub fn insert_transactions(conn: &Connection, records: &[TransactionRecord]) -> Result<usize> {
    if records.is_empty() {
        return Ok(0);
    }

    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO transactions (tx_uuid, ingested_at, data) VALUES (?1, ?2, ?3)",
        )?;
        for record in records {
            let data = serde_json::to_string(&record.fields)?;
            stmt.execute(params![record.id, ingested_stamp(&record.ingested_at), data])?;
        }
    }
    tx.commit().context("Failed to commit transaction batch")?;

    debug!(count = records.len(), "inserted transactions");
    Ok(records.len())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn decode_record((id, ingested_at, data): (String, String, String)) -> Result<TransactionRecord> {
    let fields: Map<String, Value> = serde_json::from_str(&data)
        .with_context(|| format!("Corrupt document for transaction {}", id))?;
    let ingested_at = DateTime::parse_from_rfc3339(&ingested_at)
        .with_context(|| format!("Corrupt ingestion time for transaction {}", id))?
        .with_timezone(&Utc);
    Ok(TransactionRecord {
        id,
        ingested_at,
        fields,
    })
}

fn query_records(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<TransactionRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, row_to_record)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(decode_record).collect()
}

/// Newest first (by ingestion time, then insertion order)
pub fn list_transactions(conn: &Connection, limit: usize, skip: usize) -> Result<Vec<TransactionRecord>> {
    query_records(
        conn,
        "SELECT tx_uuid, ingested_at, data FROM transactions
         ORDER BY ingested_at DESC, id DESC
         LIMIT ?1 OFFSET ?2",
        params![limit as i64, skip as i64],
    )
}

pub fn recent_transactions(conn: &Connection, limit: usize) -> Result<Vec<TransactionRecord>> {
    list_transactions(conn, limit, 0)
}

/// Every stored document, in insertion order
pub fn all_transactions(conn: &Connection) -> Result<Vec<TransactionRecord>> {
    query_records(
        conn,
        "SELECT tx_uuid, ingested_at, data FROM transactions ORDER BY id",
        [],
    )
}

pub fn count_transactions(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;

    Ok(count)
}

fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', "\\\""))
}

/// Documents where `field` is absent, null or ""
pub fn count_missing(conn: &Connection, field: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transactions
         WHERE json_extract(data, ?1) IS NULL OR json_extract(data, ?1) = ''",
        params![json_path(field)],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Number of distinct non-empty values of `field` that occur more than once
pub fn count_duplicate_values(conn: &Connection, field: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM (
            SELECT json_extract(data, ?1) AS value
            FROM transactions
            WHERE json_extract(data, ?1) IS NOT NULL AND json_extract(data, ?1) != ''
            GROUP BY value
            HAVING COUNT(*) > 1
         )",
        params![json_path(field)],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============================================================================
// REPORT STORAGE
// ============================================================================

pub fn insert_report(conn: &Connection, report: &ReportRecord) -> Result<()> {
    let s = &report.summary;
    conn.execute(
        "INSERT INTO reports (
            report_uuid, report_type, generated_at, transactions, amount,
            start_ts, end_ts, checksum, csv
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            s.id,
            s.report_type,
            ingested_stamp(&s.generated_at),
            s.transactions,
            s.amount,
            s.start,
            s.end,
            s.checksum,
            report.csv,
        ],
    )?;
    Ok(())
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<(ReportSummaryRow, String)> {
    Ok((
        ReportSummaryRow {
            id: row.get(0)?,
            report_type: row.get(1)?,
            generated_at: row.get(2)?,
            transactions: row.get(3)?,
            amount: row.get(4)?,
            start: row.get(5)?,
            end: row.get(6)?,
            checksum: row.get(7)?,
        },
        row.get(8)?,
    ))
}

struct ReportSummaryRow {
    id: String,
    report_type: String,
    generated_at: String,
    transactions: i64,
    amount: f64,
    start: String,
    end: String,
    checksum: String,
}

impl ReportSummaryRow {
    fn decode(self) -> Result<ReportSummary> {
        let generated_at = DateTime::parse_from_rfc3339(&self.generated_at)
            .with_context(|| format!("Corrupt generated_at for report {}", self.id))?
            .with_timezone(&Utc);
        Ok(ReportSummary {
            id: self.id,
            report_type: self.report_type,
            generated_at,
            transactions: self.transactions,
            amount: self.amount,
            start: self.start,
            end: self.end,
            checksum: self.checksum,
        })
    }
}

/// Newest first, without CSV bodies
pub fn list_reports(conn: &Connection) -> Result<Vec<ReportSummary>> {
    let mut stmt = conn.prepare(
        "SELECT report_uuid, report_type, generated_at, transactions, amount,
                start_ts, end_ts, checksum, ''
         FROM reports
         ORDER BY generated_at DESC, id DESC",
    )?;
    let rows = stmt
        .query_map([], row_to_summary)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(|(row, _)| row.decode()).collect()
}

pub fn get_report(conn: &Connection, report_id: &str) -> Result<Option<ReportRecord>> {
    let row = conn
        .query_row(
            "SELECT report_uuid, report_type, generated_at, transactions, amount,
                    start_ts, end_ts, checksum, csv
             FROM reports
             WHERE report_uuid = ?1",
            params![report_id],
            row_to_summary,
        )
        .optional()?;

    match row {
        Some((row, csv)) => Ok(Some(ReportRecord {
            summary: row.decode()?,
            csv,
        })),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    /// Helper to build a document from a JSON literal
    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_upload_round_trip() {
        let conn = test_conn();
        let records = vec![
            TransactionRecord::new(doc(json!({
                "transaction_id": "T1", "amount": 45.99, "merchant": "STARBUCKS",
                "notes": "free-form"
            }))),
            TransactionRecord::new(doc(json!({"transaction_id": "T2", "amount": "120.50"}))),
        ];

        let inserted = insert_transactions(&conn, &records).unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(count_transactions(&conn).unwrap(), 2);

        let stored = all_transactions(&conn).unwrap();
        assert_eq!(stored[0].fields, records[0].fields);
        assert_eq!(stored[0].id, records[0].id);
        assert_eq!(stored[1].amount(), Some(120.5));
    }

    #[test]
    fn test_list_newest_first_with_paging() {
        let conn = test_conn();
        let base = Utc::now();
        let records: Vec<_> = (0..5)
            .map(|i| {
                TransactionRecord::ingested(
                    doc(json!({"transaction_id": format!("T{}", i)})),
                    base + Duration::seconds(i),
                )
            })
            .collect();
        insert_transactions(&conn, &records).unwrap();

        let page = list_transactions(&conn, 2, 1).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].text("transaction_id").as_deref(), Some("T3"));
        assert_eq!(page[1].text("transaction_id").as_deref(), Some("T2"));
    }

    #[test]
    fn test_missing_and_duplicate_counts() {
        let conn = test_conn();
        let records = vec![
            TransactionRecord::new(doc(json!({"transaction_id": "A", "amount": 1}))),
            TransactionRecord::new(doc(json!({"transaction_id": "A", "amount": ""}))),
            TransactionRecord::new(doc(json!({"transaction_id": "B", "amount": null}))),
            TransactionRecord::new(doc(json!({"transaction_id": "B"}))),
            TransactionRecord::new(doc(json!({"transaction_id": "", "amount": 0}))),
            TransactionRecord::new(doc(json!({"transaction_id": ""}))),
        ];
        insert_transactions(&conn, &records).unwrap();

        assert_eq!(count_missing(&conn, "amount").unwrap(), 4);
        assert_eq!(count_missing(&conn, "merchant").unwrap(), 6);
        assert_eq!(count_duplicate_values(&conn, "transaction_id").unwrap(), 2);
    }

    #[test]
    fn test_reserved_keys_stripped_from_document() {
        let record = TransactionRecord::new(doc(json!({"id": "x", "_ingested_at": "y", "amount": 3})));
        assert!(!record.has_key("id"));
        assert!(!record.has_key("_ingested_at"));

        let flat = record.to_document();
        assert_eq!(flat["id"], Value::String(record.id.clone()));
        assert!(flat.contains_key("_ingested_at"));
    }

    #[test]
    fn test_report_storage() {
        let conn = test_conn();
        let report = ReportRecord::new(
            "Monthly Report",
            2,
            30.5,
            "2026-01-01T00:00:00".to_string(),
            "2026-01-31T23:59:59".to_string(),
            "id,amount\n1,10\n".to_string(),
        );
        insert_report(&conn, &report).unwrap();

        let listed = list_reports(&conn).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].report_type, "Monthly Report");
        assert_eq!(listed[0].checksum, compute_checksum("id,amount\n1,10\n"));

        let fetched = get_report(&conn, &report.summary.id).unwrap().unwrap();
        assert_eq!(fetched.csv, report.csv);
        assert!(get_report(&conn, "missing").unwrap().is_none());
    }
}
