// 🧮 Feature Derivation - documents → numeric matrix
// Time encodings plus frequency encodings of categorical fields

use crate::db::TransactionRecord;
use chrono::{Datelike, Timelike};
use serde_json::Value;
use std::collections::HashMap;

/// Categorical fields that get a `<field>_freq` column when present
pub const FREQUENCY_FIELDS: &[&str] = &["merchant", "category", "account_id", "user_id"];

pub const BASE_FEATURES: &[&str] = &["amount", "hour", "day", "month_index"];

/// Named feature matrix (row-major)
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|row| row[idx]).collect())
    }

    /// Project onto `columns`, filling unknown columns with 0.0
    pub fn reindex(&self, columns: &[String]) -> FeatureMatrix {
        let positions: Vec<Option<usize>> = columns
            .iter()
            .map(|name| self.columns.iter().position(|c| c == name))
            .collect();

        let rows = self
            .rows
            .iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|pos| pos.map(|i| row[i]).unwrap_or(0.0))
                    .collect()
            })
            .collect();

        FeatureMatrix {
            columns: columns.to_vec(),
            rows,
        }
    }
}

/// Hashable view of a categorical value (numbers and strings alike)
fn category_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(format!("s:{}", s)),
        other => Some(format!("v:{}", other)),
    }
}

/// Build the feature matrix for a batch of documents.
///
/// Frequencies are relative to this batch, so the same document can
/// encode differently in a different batch.
pub fn prepare_features(records: &[TransactionRecord]) -> FeatureMatrix {
    let has_timestamp = records.iter().any(|r| r.has_key("timestamp"));

    let freq_fields: Vec<&str> = FREQUENCY_FIELDS
        .iter()
        .copied()
        .filter(|f| records.iter().any(|r| r.has_key(f)))
        .collect();

    let frequencies: Vec<HashMap<String, f64>> = freq_fields
        .iter()
        .map(|field| value_frequencies(records, field))
        .collect();

    let mut columns: Vec<String> = BASE_FEATURES.iter().map(|s| s.to_string()).collect();
    columns.extend(freq_fields.iter().map(|f| format!("{}_freq", f)));

    let rows = records
        .iter()
        .map(|record| {
            let mut row = Vec::with_capacity(columns.len());
            row.push(record.amount().unwrap_or(0.0));

            let ts = if has_timestamp { record.timestamp() } else { None };
            match ts {
                Some(ts) => {
                    row.push(ts.hour() as f64);
                    row.push(ts.day() as f64);
                    row.push(ts.month() as f64);
                }
                None => row.extend_from_slice(&[0.0, 0.0, 0.0]),
            }

            for (field, freq) in freq_fields.iter().zip(&frequencies) {
                let value = record
                    .fields
                    .get(*field)
                    .and_then(category_key)
                    .and_then(|key| freq.get(&key).copied())
                    .unwrap_or(0.0);
                row.push(value);
            }
            row
        })
        .collect();

    FeatureMatrix { columns, rows }
}

/// Relative frequency of each non-null value of `field`
fn value_frequencies(records: &[TransactionRecord], field: &str) -> HashMap<String, f64> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut total = 0usize;
    for key in records
        .iter()
        .filter_map(|r| r.fields.get(field))
        .filter_map(category_key)
    {
        *counts.entry(key).or_insert(0) += 1;
        total += 1;
    }

    counts
        .into_iter()
        .map(|(k, c)| (k, c as f64 / total as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> TransactionRecord {
        match value {
            Value::Object(map) => TransactionRecord::new(map),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_time_and_frequency_columns() {
        let records = vec![
            record(json!({"amount": 10, "timestamp": "2026-03-14 09:30:00", "merchant": "A"})),
            record(json!({"amount": "20.5", "timestamp": "garbage", "merchant": "A"})),
            record(json!({"amount": "n/a", "merchant": "B", "category": "Food"})),
            record(json!({"amount": 5})),
        ];

        let m = prepare_features(&records);
        assert_eq!(
            m.columns,
            vec!["amount", "hour", "day", "month_index", "merchant_freq", "category_freq"]
        );
        assert_eq!(m.rows[0][..4], [10.0, 9.0, 14.0, 3.0]);
        assert_eq!(m.rows[1][..4], [20.5, 0.0, 0.0, 0.0]);
        assert_eq!(m.rows[2][0], 0.0);

        // merchant: A appears 2/3 of the non-null values
        assert!((m.rows[0][4] - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.rows[2][4] - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(m.rows[3][4], 0.0);
        assert_eq!(m.rows[2][5], 1.0);
    }

    #[test]
    fn test_no_timestamp_key_gives_zero_time_columns() {
        let m = prepare_features(&[record(json!({"amount": 3}))]);
        assert_eq!(m.columns.len(), 4);
        assert_eq!(m.rows[0], vec![3.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_empty_string_is_a_frequency_value() {
        let records = vec![
            record(json!({"category": ""})),
            record(json!({"category": ""})),
            record(json!({"category": "Travel"})),
            record(json!({"category": null})),
        ];
        let m = prepare_features(&records);
        let freq = m.column("category_freq").unwrap();
        assert!((freq[0] - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(freq[3], 0.0);
    }

    #[test]
    fn test_reindex_fills_missing_columns() {
        let m = prepare_features(&[record(json!({"amount": 7, "merchant": "X"}))]);
        let cols: Vec<String> = ["amount", "user_id_freq", "merchant_freq"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let r = m.reindex(&cols);
        assert_eq!(r.rows[0], vec![7.0, 0.0, 1.0]);
    }
}
