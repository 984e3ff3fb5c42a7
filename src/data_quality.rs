// ✅ Data Quality Engine - completeness and duplicate checks
// Runs over the whole transactions table on every call

use crate::db::{count_duplicate_values, count_missing, count_transactions};
use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields every transaction document is expected to carry
pub const REQUIRED_FIELDS: &[&str] = &[
    "transaction_id",
    "amount",
    "timestamp",
    "merchant",
    "category",
    "location",
];

// ============================================================================
// QUALITY REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical, // Field is missing from most documents
    Warning,  // Some documents lack the field
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityIssue {
    pub severity: Severity,
    pub field: String,
    pub issue: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub total_records: i64,
    /// Missing count per required field, in `REQUIRED_FIELDS` order
    pub missing_values: Map<String, Value>,
    pub duplicate_records: i64,
    pub completeness_pct: f64,
    pub issues: Vec<QualityIssue>,
}

impl QualityReport {
    pub fn empty() -> Self {
        QualityReport {
            total_records: 0,
            missing_values: Map::new(),
            duplicate_records: 0,
            completeness_pct: 0.0,
            issues: Vec::new(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Completeness: {:.1}%, Duplicates: {}, Issues: {} ({} critical)",
            self.completeness_pct,
            self.duplicate_records,
            self.issues.len(),
            self.issues
                .iter()
                .filter(|i| i.severity == Severity::Critical)
                .count()
        )
    }

    pub fn has_critical_issues(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity == Severity::Critical)
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ============================================================================
// DATA QUALITY ENGINE
// ============================================================================

pub struct DataQualityEngine {
    /// Fields checked for completeness
    required_fields: Vec<String>,

    /// Field used to detect duplicated records
    identity_field: String,

    /// Missing share above which an issue becomes critical
    critical_threshold: f64,
}

impl DataQualityEngine {
    pub fn new() -> Self {
        DataQualityEngine {
            required_fields: REQUIRED_FIELDS.iter().map(|f| f.to_string()).collect(),
            identity_field: "transaction_id".to_string(),
            critical_threshold: 0.5,
        }
    }

    /// Completeness, duplicate and per-field issue report for the table
    pub fn assess(&self, conn: &Connection) -> Result<QualityReport> {
        let total = count_transactions(conn)?;
        if total == 0 {
            return Ok(QualityReport::empty());
        }

        let counts = self
            .required_fields
            .iter()
            .map(|field| Ok((field, count_missing(conn, field)?)))
            .collect::<Result<Vec<_>>>()?;
        let duplicate_records = count_duplicate_values(conn, &self.identity_field)?;

        let total_missing: i64 = counts.iter().map(|(_, n)| n).sum();
        let cells = (self.required_fields.len() as i64 * total) as f64;
        let completeness_pct = (100.0 - total_missing as f64 / cells * 100.0).max(0.0);

        let mut issues: Vec<QualityIssue> = counts
            .iter()
            .filter_map(|(field, missing)| self.missing_issue(field, *missing, total))
            .collect();

        if duplicate_records > 0 {
            issues.push(QualityIssue {
                severity: Severity::Warning,
                field: self.identity_field.clone(),
                issue: format!("{} identifiers appear more than once", duplicate_records),
                recommendation: "Check for re-uploaded files before training".to_string(),
            });
        }

        let missing_values = counts
            .into_iter()
            .map(|(field, missing)| (field.clone(), Value::from(missing)))
            .collect();

        Ok(QualityReport {
            total_records: total,
            missing_values,
            duplicate_records,
            completeness_pct: round1(completeness_pct),
            issues,
        })
    }

    fn missing_issue(&self, field: &str, missing: i64, total: i64) -> Option<QualityIssue> {
        if missing == 0 {
            return None;
        }
        let share = missing as f64 / total as f64;
        let severity = if share > self.critical_threshold {
            Severity::Critical
        } else {
            Severity::Warning
        };
        Some(QualityIssue {
            severity,
            field: field.to_string(),
            issue: format!("{} of {} records have no {}", missing, total, field),
            recommendation: format!("Populate the '{}' column in the source file", field),
        })
    }

    /// Score used by the stats endpoint: penalizes missing amount/timestamp
    pub fn quality_score(&self, conn: &Connection) -> Result<f64> {
        let total = count_transactions(conn)?;
        let missing_amount = count_missing(conn, "amount")?;
        let missing_timestamp = count_missing(conn, "timestamp")?;
        let score =
            100.0 - (missing_amount + missing_timestamp) as f64 / total.max(1) as f64 * 100.0;
        Ok(round1(score.max(0.0)))
    }
}

impl Default for DataQualityEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
