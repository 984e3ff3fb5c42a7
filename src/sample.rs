// 🎲 Sample Data - synthetic transactions for demos and smoke tests

use crate::db::TransactionRecord;
use chrono::{Duration, NaiveDateTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};

pub const MAX_SAMPLE_SIZE: usize = 50_000;

/// Merchant catalogue: (merchant, category, typical amount)
const MERCHANTS: &[(&str, &str, f64)] = &[
    ("FreshMart", "Groceries", 65.0),
    ("Corner Grocer", "Groceries", 28.0),
    ("Bean There Cafe", "Food & Dining", 9.0),
    ("Luigi's Trattoria", "Food & Dining", 48.0),
    ("ShopHub", "Online Shopping", 75.0),
    ("GadgetWorld", "Retail", 180.0),
    ("City Power", "Utilities", 120.0),
    ("AquaWorks", "Utilities", 45.0),
    ("CarePlus Pharmacy", "Healthcare", 32.0),
    ("StreamFlix", "Entertainment", 15.0),
    ("Cineplex 9", "Entertainment", 24.0),
    ("SkyJet Airlines", "Travel", 420.0),
    ("StayInn Hotels", "Travel", 210.0),
];

const LOCATIONS: &[&str] = &[
    "New York", "Chicago", "San Francisco", "Austin", "Seattle", "Boston", "Miami", "Denver",
];

const ACCOUNTS: usize = 200;
const WINDOW_DAYS: i64 = 90;

pub struct SampleGenerator {
    rng: StdRng,
    counter: u64,
}

impl SampleGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng, counter: 0 }
    }

    pub fn generate(&mut self, n: usize, now: NaiveDateTime) -> Vec<TransactionRecord> {
        (0..n).map(|_| self.next_record(now)).collect()
    }

    fn next_record(&mut self, now: NaiveDateTime) -> TransactionRecord {
        self.counter += 1;
        let (merchant, category, typical) = MERCHANTS[self.rng.gen_range(0..MERCHANTS.len())];

        // Log-uniform spread around the typical ticket, with rare outliers
        let mut amount = typical * self.rng.gen_range(0.4f64..2.5).powf(1.3);
        let outlier = self.rng.gen_bool(0.02);
        if outlier {
            amount *= self.rng.gen_range(10.0..50.0);
        }

        let offset = Duration::seconds(self.rng.gen_range(0..WINDOW_DAYS * 86_400));
        let mut timestamp = now - offset;
        if outlier {
            // Outliers skew towards the small hours
            timestamp = timestamp
                .date()
                .and_hms_opt(self.rng.gen_range(1..5), self.rng.gen_range(0..60), 0)
                .filter(|t| *t <= now)
                .unwrap_or(timestamp);
        }

        let fields = json!({
            "transaction_id": format!("TX{:08}", self.counter),
            "account_id": format!("ACC{:04}", self.rng.gen_range(1..=ACCOUNTS)),
            "timestamp": timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            "amount": (amount * 100.0).round() / 100.0,
            "merchant": merchant,
            "category": category,
            "location": LOCATIONS[self.rng.gen_range(0..LOCATIONS.len())],
        });

        TransactionRecord::new(into_map(fields))
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub fn clamp_sample_size(n: usize) -> usize {
    n.clamp(1, MAX_SAMPLE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_quality::REQUIRED_FIELDS;
    use crate::ingest::parse_timestamp;

    #[test]
    fn test_generated_records_are_complete() {
        let now = parse_timestamp("2026-06-30 12:00:00").unwrap();
        let records = SampleGenerator::new(Some(7)).generate(300, now);
        assert_eq!(records.len(), 300);

        for record in &records {
            for field in REQUIRED_FIELDS {
                assert!(!record.is_missing(field), "missing {}", field);
            }
            let ts = record.timestamp().unwrap();
            assert!(ts <= now && ts >= now - Duration::days(WINDOW_DAYS + 1));
            assert!(record.amount().unwrap() > 0.0);
        }
        assert_eq!(records[0].text("transaction_id").as_deref(), Some("TX00000001"));
    }

    #[test]
    fn test_seed_reproducible() {
        let now = parse_timestamp("2026-06-30 12:00:00").unwrap();
        let a = SampleGenerator::new(Some(3)).generate(20, now);
        let b = SampleGenerator::new(Some(3)).generate(20, now);
        let fa: Vec<_> = a.iter().map(|r| r.fields.clone()).collect();
        let fb: Vec<_> = b.iter().map(|r| r.fields.clone()).collect();
        assert_eq!(fa, fb);
    }

    #[test]
    fn test_clamp() {
        assert_eq!(clamp_sample_size(0), 1);
        assert_eq!(clamp_sample_size(1_000_000), MAX_SAMPLE_SIZE);
    }
}
