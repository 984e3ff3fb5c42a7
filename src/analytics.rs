// 📊 Dashboard Aggregation - executive and analyst views
// Recomputed from the full record set on every request

use crate::db::TransactionRecord;
use crate::ingest::format_timestamp;
use crate::model::{AnomalyModel, AnomalyScore, RiskBand};
use chrono::Timelike;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

pub const TOP_CATEGORIES: usize = 8;
pub const TOP_MERCHANTS: usize = 12;
pub const RECENT_TRANSACTIONS: usize = 100;

// ============================================================================
// VIEW TYPES
// ============================================================================

/// Serializes as `{}` when there is nothing to show
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Panel<T> {
    #[serde(flatten)]
    pub view: Option<T>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Dashboard {
    pub executive: Panel<ExecutiveView>,
    pub analyst: Panel<AnalystView>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecutiveView {
    pub total_transactions: usize,
    pub total_revenue: f64,
    pub avg_transaction: f64,
    pub fraud_rate: f64,
    pub revenue_trend: Vec<MonthAmount>,
    pub top_categories: Vec<CategoryAmount>,
    pub high_risk_count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnalystView {
    pub category_breakdown: Vec<CategoryShare>,
    pub hourly_distribution: Vec<HourCount>,
    pub top_merchants: Vec<MerchantAmount>,
    pub risk_distribution: Vec<RiskBucket>,
    pub recent_transactions: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MonthAmount {
    pub month: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CategoryAmount {
    pub category: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MerchantAmount {
    pub merchant: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CategoryShare {
    pub category: String,
    pub pct: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HourCount {
    pub hour: u32,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RiskBucket {
    pub label: String,
    pub value: usize,
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ============================================================================
// AGGREGATION
// ============================================================================

/// Build both dashboard views. Scores are included only when a model is
/// available.
pub fn build_dashboard(records: &[TransactionRecord], model: Option<&AnomalyModel>) -> Dashboard {
    if records.is_empty() {
        return Dashboard {
            executive: Panel { view: None },
            analyst: Panel { view: None },
        };
    }

    let scores: Option<Vec<AnomalyScore>> = model.map(|m| m.score(records));
    let amounts: Vec<f64> = records.iter().map(|r| r.amount().unwrap_or(0.0)).collect();

    let total_tx = records.len();
    let total_revenue: f64 = amounts.iter().sum();
    let avg_tx = total_revenue / total_tx as f64;

    let mut anomaly_count = 0;
    let mut risk_counts: HashMap<RiskBand, usize> = HashMap::new();
    if let Some(scores) = &scores {
        for s in scores {
            if s.is_anomaly() {
                anomaly_count += 1;
            }
            *risk_counts.entry(s.band()).or_insert(0) += 1;
        }
    }
    let fraud_rate = if scores.is_some() {
        round2(anomaly_count as f64 / total_tx.max(1) as f64 * 100.0)
    } else {
        0.0
    };

    let executive = ExecutiveView {
        total_transactions: total_tx,
        total_revenue: round2(total_revenue),
        avg_transaction: round2(avg_tx),
        fraud_rate,
        revenue_trend: revenue_trend(records, &amounts),
        top_categories: top_by_amount(records, &amounts, "category", TOP_CATEGORIES)
            .into_iter()
            .map(|(category, amount)| CategoryAmount { category, amount })
            .collect(),
        high_risk_count: anomaly_count,
    };

    let risk_distribution = [RiskBand::Low, RiskBand::Medium, RiskBand::High]
        .iter()
        .map(|band| RiskBucket {
            label: band.label().to_string(),
            value: risk_counts.get(band).copied().unwrap_or(0),
        })
        .collect();

    let analyst = AnalystView {
        category_breakdown: category_breakdown(records),
        hourly_distribution: hourly_distribution(records),
        top_merchants: top_by_amount(records, &amounts, "merchant", TOP_MERCHANTS)
            .into_iter()
            .map(|(merchant, amount)| MerchantAmount { merchant, amount })
            .collect(),
        risk_distribution,
        recent_transactions: recent_documents(records, scores.as_deref()),
    };

    Dashboard {
        executive: Panel {
            view: Some(executive),
        },
        analyst: Panel {
            view: Some(analyst),
        },
    }
}

/// Monthly amount totals, ascending by month
fn revenue_trend(records: &[TransactionRecord], amounts: &[f64]) -> Vec<MonthAmount> {
    let mut months: BTreeMap<String, f64> = BTreeMap::new();
    for (record, amount) in records.iter().zip(amounts) {
        if let Some(ts) = record.timestamp() {
            *months.entry(ts.format("%Y-%m").to_string()).or_insert(0.0) += amount;
        }
    }
    months
        .into_iter()
        .map(|(month, amount)| MonthAmount {
            month,
            amount: round2(amount),
        })
        .collect()
}

/// Groups by `field` text (missing values excluded), sorted by amount desc
fn top_by_amount(
    records: &[TransactionRecord],
    amounts: &[f64],
    field: &str,
    limit: usize,
) -> Vec<(String, f64)> {
    let mut groups: BTreeMap<String, f64> = BTreeMap::new();
    for (record, amount) in records.iter().zip(amounts) {
        if let Some(key) = group_key(record, field) {
            *groups.entry(key).or_insert(0.0) += amount;
        }
    }
    let mut sorted: Vec<(String, f64)> = groups.into_iter().collect();
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1));
    sorted.truncate(limit);
    sorted
        .into_iter()
        .map(|(k, v)| (k, round2(v)))
        .collect()
}

/// Group key: present non-null values, including the empty string
fn group_key(record: &TransactionRecord, field: &str) -> Option<String> {
    match record.fields.get(field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn category_breakdown(records: &[TransactionRecord]) -> Vec<CategoryShare> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for key in records.iter().filter_map(|r| group_key(r, "category")) {
        *counts.entry(key).or_insert(0) += 1;
    }
    let total: usize = counts.values().sum();
    let mut shares: Vec<(String, usize)> = counts.into_iter().collect();
    shares.sort_by(|a, b| b.1.cmp(&a.1));
    shares
        .into_iter()
        .map(|(category, count)| CategoryShare {
            category,
            pct: count as f64 / total as f64,
        })
        .collect()
}

fn hourly_distribution(records: &[TransactionRecord]) -> Vec<HourCount> {
    let mut hours: BTreeMap<u32, usize> = BTreeMap::new();
    for ts in records.iter().filter_map(|r| r.timestamp()) {
        *hours.entry(ts.hour()).or_insert(0) += 1;
    }
    hours
        .into_iter()
        .map(|(hour, count)| HourCount { hour, count })
        .collect()
}

/// Newest documents by ingestion time, with normalized timestamps and
/// score columns when scored
fn recent_documents(
    records: &[TransactionRecord],
    scores: Option<&[AnomalyScore]>,
) -> Vec<Map<String, Value>> {
    let mut order: Vec<usize> = (0..records.len()).collect();
    // Records arrive in insertion order; later inserts win ties
    order.sort_by(|&a, &b| {
        records[b]
            .ingested_at
            .cmp(&records[a].ingested_at)
            .then(b.cmp(&a))
    });
    order.truncate(RECENT_TRANSACTIONS);

    order
        .into_iter()
        .map(|i| {
            let record = &records[i];
            let mut doc = record.to_document();
            let ts = record
                .timestamp()
                .map(|ts| format_timestamp(&ts))
                .unwrap_or_default();
            doc.insert("timestamp".to_string(), Value::String(ts));
            if let Some(scores) = scores {
                scores[i].annotate(&mut doc);
            }
            doc
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelSettings;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn record_at(value: Value, offset_secs: i64) -> TransactionRecord {
        let fields = value.as_object().cloned().unwrap();
        TransactionRecord::ingested(fields, Utc::now() + Duration::seconds(offset_secs))
    }

    fn sample() -> Vec<TransactionRecord> {
        vec![
            record_at(json!({"amount": 100, "timestamp": "2026-01-05 10:00:00", "category": "Travel", "merchant": "Air"}), 0),
            record_at(json!({"amount": "50.25", "timestamp": "2026-01-20 10:30:00", "category": "Food", "merchant": "Cafe"}), 1),
            record_at(json!({"amount": 25, "timestamp": "2026-02-01 22:00:00", "category": "Food", "merchant": "Cafe"}), 2),
            record_at(json!({"amount": "oops", "timestamp": "", "merchant": "Cafe"}), 3),
        ]
    }

    #[test]
    fn test_empty_dashboard_serializes_to_empty_panels() {
        let dash = build_dashboard(&[], None);
        assert_eq!(
            serde_json::to_value(&dash).unwrap(),
            json!({"executive": {}, "analyst": {}})
        );
    }

    #[test]
    fn test_executive_totals_without_model() {
        let dash = build_dashboard(&sample(), None);
        let exec = dash.executive.view.unwrap();

        assert_eq!(exec.total_transactions, 4);
        assert_eq!(exec.total_revenue, 175.25);
        assert_eq!(exec.avg_transaction, 43.81);
        assert_eq!(exec.fraud_rate, 0.0);
        assert_eq!(exec.high_risk_count, 0);
        assert_eq!(
            exec.revenue_trend,
            vec![
                MonthAmount { month: "2026-01".into(), amount: 150.25 },
                MonthAmount { month: "2026-02".into(), amount: 25.0 },
            ]
        );
        assert_eq!(exec.top_categories[0].category, "Travel");
        assert_eq!(exec.top_categories[1].amount, 75.25);
    }

    #[test]
    fn test_analyst_views() {
        let dash = build_dashboard(&sample(), None);
        let analyst = dash.analyst.view.unwrap();

        assert_eq!(analyst.category_breakdown[0].category, "Food");
        assert!((analyst.category_breakdown[0].pct - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(
            analyst.hourly_distribution,
            vec![HourCount { hour: 10, count: 2 }, HourCount { hour: 22, count: 1 }]
        );
        assert_eq!(analyst.top_merchants[0].merchant, "Air");
        assert!(analyst.risk_distribution.iter().all(|b| b.value == 0));

        // Newest ingestion first; unparseable timestamp rendered empty
        let recent = &analyst.recent_transactions;
        assert_eq!(recent.len(), 4);
        assert_eq!(recent[0]["timestamp"], json!(""));
        assert_eq!(recent[3]["timestamp"], json!("2026-01-05T10:00:00"));
        assert!(!recent[0].contains_key("risk_score"));
    }

    #[test]
    fn test_scored_dashboard() {
        let mut data = sample();
        for i in 0..60 {
            data.push(record_at(
                json!({"amount": 30 + i % 5, "timestamp": "2026-02-10 12:00:00", "category": "Food", "merchant": "Cafe"}),
                10 + i,
            ));
        }
        let model = AnomalyModel::fit(&data, &ModelSettings::default()).unwrap();
        let dash = build_dashboard(&data, Some(&model));
        let exec = dash.executive.view.unwrap();
        let analyst = dash.analyst.view.unwrap();

        let bucket_total: usize = analyst.risk_distribution.iter().map(|b| b.value).sum();
        assert_eq!(bucket_total, data.len());
        assert!(exec.high_risk_count >= 1);
        assert!(exec.fraud_rate > 0.0);
        assert!(analyst.recent_transactions[0].contains_key("risk_score"));
    }

    #[test]
    fn test_recent_transactions_break_ties_by_insertion() {
        let now = Utc::now();
        let records: Vec<TransactionRecord> = (0..150)
            .map(|i| {
                let fields = json!({"transaction_id": format!("T{}", i), "amount": 10})
                    .as_object()
                    .cloned()
                    .unwrap();
                TransactionRecord::ingested(fields, now)
            })
            .collect();

        let recent = recent_documents(&records, None);
        assert_eq!(recent.len(), RECENT_TRANSACTIONS);
        assert_eq!(recent[0]["transaction_id"], "T149");
        assert_eq!(recent[RECENT_TRANSACTIONS - 1]["transaction_id"], "T50");
    }
}
