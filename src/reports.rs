// 📄 Report Generation - date-filtered CSV exports
// Reports are generated once, stored whole, and served back verbatim

use crate::analytics::round2;
use crate::db::{all_transactions, insert_report, ReportRecord, TransactionRecord};
use crate::ingest::{format_timestamp, parse_timestamp};
use anyhow::Result;
use chrono::{Duration, NaiveDateTime, Utc};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

pub const DEFAULT_REPORT_TYPE: &str = "Custom Report";
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Header used when the window holds no rows
pub const DEFAULT_COLUMNS: &[&str] = &[
    "transaction_id",
    "timestamp",
    "amount",
    "merchant",
    "category",
    "location",
    "account_id",
];

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Body of a generate request; both bounds must be set to take effect
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportRequest {
    pub report_type: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl ReportRequest {
    /// Inclusive window; the last 30 days when either bound is absent
    pub fn window(&self, now: NaiveDateTime) -> Result<(NaiveDateTime, NaiveDateTime), ReportError> {
        let start = self.start.as_deref().filter(|s| !s.trim().is_empty());
        let end = self.end.as_deref().filter(|s| !s.trim().is_empty());

        match (start, end) {
            (Some(start), Some(end)) => {
                let start_dt = parse_timestamp(start)
                    .ok_or_else(|| ReportError::InvalidRange(format!("bad start '{}'", start)))?;
                let end_dt = parse_timestamp(end)
                    .ok_or_else(|| ReportError::InvalidRange(format!("bad end '{}'", end)))?;
                if end_dt < start_dt {
                    return Err(ReportError::InvalidRange("end precedes start".to_string()));
                }
                Ok((start_dt, end_dt))
            }
            _ => Ok((now - Duration::days(DEFAULT_WINDOW_DAYS), now)),
        }
    }

    pub fn report_type(&self) -> &str {
        self.report_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_REPORT_TYPE)
    }
}

/// Records whose timestamp parses and falls inside `[start, end]`
pub fn filter_window(
    records: Vec<TransactionRecord>,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Vec<TransactionRecord> {
    records
        .into_iter()
        .filter(|r| matches!(r.timestamp(), Some(ts) if ts >= start && ts <= end))
        .collect()
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render rows as CSV. Columns: `id`, the union of field keys in
/// first-seen order, `_ingested_at`.
pub fn render_csv(records: &[TransactionRecord]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());

    if records.is_empty() {
        wtr.write_record(DEFAULT_COLUMNS)?;
    } else {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            for key in record.fields.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let mut header = vec!["id".to_string()];
        header.extend(columns.iter().cloned());
        header.push("_ingested_at".to_string());
        wtr.write_record(&header)?;

        for record in records {
            let mut row = vec![record.id.clone()];
            for column in &columns {
                let value = if column == "timestamp" {
                    record
                        .timestamp()
                        .map(|ts| format_timestamp(&ts))
                        .unwrap_or_default()
                } else {
                    record.fields.get(column).map(cell).unwrap_or_default()
                };
                row.push(value);
            }
            row.push(record.ingested_at.to_rfc3339());
            wtr.write_record(&row)?;
        }
    }

    let bytes = wtr.into_inner().map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(String::from_utf8(bytes)?)
}

/// Filter, render and persist a report
pub fn generate_report(conn: &Connection, request: &ReportRequest) -> Result<ReportRecord, ReportError> {
    let now = Utc::now().naive_utc();
    let (start, end) = request.window(now)?;

    let rows = filter_window(all_transactions(conn)?, start, end);
    let amount: f64 = rows.iter().filter_map(|r| r.amount()).sum();
    let csv = render_csv(&rows)?;

    let report = ReportRecord::new(
        request.report_type(),
        rows.len() as i64,
        round2(amount),
        format_timestamp(&start),
        format_timestamp(&end),
        csv,
    );
    insert_report(conn, &report)?;

    info!(
        report_id = %report.summary.id,
        rows = rows.len(),
        start = %report.summary.start,
        end = %report.summary.end,
        "report generated"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_report, insert_transactions, list_reports, setup_database};
    use serde_json::json;

    fn record(value: Value) -> TransactionRecord {
        TransactionRecord::new(value.as_object().cloned().unwrap())
    }

    fn seeded_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let records = vec![
            record(json!({"transaction_id": "T1", "timestamp": "2026-01-01 00:00:00", "amount": 10.5})),
            record(json!({"transaction_id": "T2", "timestamp": "2026-01-15T12:00:00", "amount": "4.5"})),
            record(json!({"transaction_id": "T3", "timestamp": "2026-01-31 23:59:59", "amount": 1})),
            record(json!({"transaction_id": "T4", "timestamp": "2026-02-01 00:00:00", "amount": 100})),
            record(json!({"transaction_id": "T5", "timestamp": "", "amount": 100, "note": "x"})),
        ];
        insert_transactions(&conn, &records).unwrap();
        conn
    }

    fn january() -> ReportRequest {
        ReportRequest {
            report_type: Some("Monthly Report".to_string()),
            start: Some("2026-01-01T00:00:00".to_string()),
            end: Some("2026-01-31T23:59:59".to_string()),
        }
    }

    #[test]
    fn test_date_filter_is_inclusive() {
        let conn = seeded_conn();
        let report = generate_report(&conn, &january()).unwrap();

        assert_eq!(report.summary.transactions, 3);
        assert_eq!(report.summary.amount, 16.0);
        assert_eq!(report.summary.report_type, "Monthly Report");
        assert_eq!(report.summary.start, "2026-01-01T00:00:00");

        let mut rdr = csv::Reader::from_reader(report.csv.as_bytes());
        let headers = rdr.headers().unwrap().clone();
        assert_eq!(&headers[0], "id");
        assert_eq!(&headers[1], "transaction_id");
        assert_eq!(headers.iter().last(), Some("_ingested_at"));
        let ids: Vec<String> = rdr
            .records()
            .map(|r| r.unwrap()[1].to_string())
            .collect();
        assert_eq!(ids, vec!["T1", "T2", "T3"]);
    }

    #[test]
    fn test_report_persisted() {
        let conn = seeded_conn();
        let report = generate_report(&conn, &january()).unwrap();

        let listed = list_reports(&conn).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, report.summary.id);

        let stored = get_report(&conn, &report.summary.id).unwrap().unwrap();
        assert_eq!(stored.csv, report.csv);
    }

    #[test]
    fn test_default_window_is_last_30_days() {
        let now = parse_timestamp("2026-03-31 12:00:00").unwrap();
        let (start, end) = ReportRequest::default().window(now).unwrap();
        assert_eq!(end, now);
        assert_eq!(format_timestamp(&start), "2026-03-01T12:00:00");

        // One bound alone falls back to the default window
        let partial = ReportRequest {
            start: Some("2020-01-01".to_string()),
            ..Default::default()
        };
        assert_eq!(partial.window(now).unwrap().1, now);
        assert_eq!(partial.report_type(), "Custom Report");
    }

    #[test]
    fn test_invalid_range() {
        let bad = ReportRequest {
            start: Some("yesterday".to_string()),
            end: Some("2026-01-01".to_string()),
            ..Default::default()
        };
        let err = bad.window(Utc::now().naive_utc()).unwrap_err();
        assert!(err.to_string().starts_with("Invalid date range"));

        let reversed = ReportRequest {
            start: Some("2026-02-01".to_string()),
            end: Some("2026-01-01".to_string()),
            ..Default::default()
        };
        assert!(reversed.window(Utc::now().naive_utc()).is_err());
    }

    #[test]
    fn test_empty_window_uses_default_header() {
        let csv = render_csv(&[]).unwrap();
        assert_eq!(
            csv.trim_end(),
            "transaction_id,timestamp,amount,merchant,category,location,account_id"
        );
    }
}
