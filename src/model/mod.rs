// 🚨 Anomaly Model - scaling, isolation forest, persistence
// Raw decision scores are normalized into [0, 1] risk

pub mod forest;
pub mod scaler;

use crate::db::TransactionRecord;
use crate::features::prepare_features;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub use forest::IsolationForest;
pub use scaler::StandardScaler;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model not trained")]
    NotTrained,

    #[error("No data to train on")]
    NoData,

    #[error("model file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model file {path} is not a valid model: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Training and persistence settings
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub n_estimators: usize,
    pub contamination: f64,
    pub seed: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./models/isolation_forest.json"),
            n_estimators: 100,
            contamination: 0.02,
            seed: 42,
        }
    }
}

// ============================================================================
// RISK BANDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    Low,
    Medium,
    High,
}

impl RiskBand {
    pub fn from_score(risk: f64) -> Self {
        if risk < 0.33 {
            RiskBand::Low
        } else if risk < 0.66 {
            RiskBand::Medium
        } else {
            RiskBand::High
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskBand::Low => "Low",
            RiskBand::Medium => "Medium",
            RiskBand::High => "High",
        }
    }
}

/// Per-record scoring output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyScore {
    /// 1 when the forest flags the record
    pub anomaly: u8,
    /// Decision function (higher = more normal)
    pub raw_score: f64,
    /// Normalized risk in [0, 1] (higher = riskier)
    pub risk_score: f64,
}

impl AnomalyScore {
    pub fn is_anomaly(&self) -> bool {
        self.anomaly == 1
    }

    pub fn band(&self) -> RiskBand {
        RiskBand::from_score(self.risk_score)
    }

    /// Append score columns to a flattened document
    pub fn annotate(&self, doc: &mut Map<String, Value>) {
        doc.insert("anomaly".to_string(), Value::from(self.anomaly));
        doc.insert("raw_score".to_string(), Value::from(self.raw_score));
        doc.insert("risk_score".to_string(), Value::from(self.risk_score));
    }
}

// ============================================================================
// PERSISTED MODEL
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalyModel {
    pub features: Vec<String>,
    pub scaler: StandardScaler,
    pub forest: IsolationForest,
    pub trained_at: DateTime<Utc>,
    pub n_samples: usize,
    /// Min/max decision score seen in training, for single-record risk
    pub score_range: (f64, f64),
}

impl AnomalyModel {
    pub fn fit(records: &[TransactionRecord], settings: &ModelSettings) -> Result<Self, ModelError> {
        if records.is_empty() {
            return Err(ModelError::NoData);
        }

        let matrix = prepare_features(records);
        let scaler = StandardScaler::fit(&matrix.rows, matrix.width());
        let scaled = scaler.transform(&matrix.rows);
        let forest = IsolationForest::fit(
            &scaled,
            settings.n_estimators,
            settings.contamination,
            settings.seed,
        );

        let raw = forest.decision_function(&scaled);
        let score_range = raw.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &s| {
            (lo.min(s), hi.max(s))
        });

        Ok(Self {
            features: matrix.columns,
            scaler,
            forest,
            trained_at: Utc::now(),
            n_samples: records.len(),
            score_range,
        })
    }

    fn raw_scores(&self, records: &[TransactionRecord]) -> Vec<f64> {
        let matrix = prepare_features(records).reindex(&self.features);
        let scaled = self.scaler.transform(&matrix.rows);
        self.forest.decision_function(&scaled)
    }

    /// Score a batch. Risk is min-max normalized across the batch and
    /// inverted; a batch with no spread scores 1.0 everywhere.
    pub fn score(&self, records: &[TransactionRecord]) -> Vec<AnomalyScore> {
        let raw = self.raw_scores(records);
        let (min, max) = raw.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &s| {
            (lo.min(s), hi.max(s))
        });
        let spread = max - min;

        raw.into_iter()
            .map(|s| {
                let norm = if spread > 0.0 { (s - min) / spread } else { 0.0 };
                AnomalyScore {
                    anomaly: u8::from(s < 0.0),
                    raw_score: s,
                    risk_score: 1.0 - norm,
                }
            })
            .collect()
    }

    /// Score one record against the training score range instead of a batch
    pub fn score_one(&self, record: &TransactionRecord) -> AnomalyScore {
        let raw = self
            .raw_scores(std::slice::from_ref(record))
            .into_iter()
            .next()
            .unwrap_or(0.0);
        let (min, max) = self.score_range;
        let spread = max - min;
        let norm = if spread > 0.0 {
            ((raw - min) / spread).clamp(0.0, 1.0)
        } else {
            0.0
        };
        AnomalyScore {
            anomaly: u8::from(raw < 0.0),
            raw_score: raw,
            risk_score: 1.0 - norm,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let io_err = |source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(io_err)?;
            }
        }
        let body = serde_json::to_vec(self).map_err(|source| ModelError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, body).map_err(io_err)
    }

    /// `Ok(None)` when no model has been trained yet
    pub fn load(path: &Path) -> Result<Option<Self>, ModelError> {
        let body = match std::fs::read(path) {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ModelError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let model = serde_json::from_slice(&body).map_err(|source| ModelError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(model))
    }
}

// ============================================================================
// OPERATIONS
// ============================================================================

/// Fit on every record and persist. Returns the model path.
pub fn train_model(records: &[TransactionRecord], settings: &ModelSettings) -> Result<PathBuf, ModelError> {
    let model = AnomalyModel::fit(records, settings)?;
    model.save(&settings.path)?;
    info!(
        path = %settings.path.display(),
        samples = model.n_samples,
        features = ?model.features,
        "model trained"
    );
    Ok(settings.path.clone())
}

pub fn load_model(settings: &ModelSettings) -> Result<Option<AnomalyModel>, ModelError> {
    AnomalyModel::load(&settings.path)
}

/// Score a batch with the persisted model
pub fn predict_with_scores(
    records: &[TransactionRecord],
    settings: &ModelSettings,
) -> Result<Vec<AnomalyScore>, ModelError> {
    let model = load_model(settings)?.ok_or(ModelError::NotTrained)?;
    if model.features.is_empty() {
        warn!("model has no features; scores will be constant");
    }
    Ok(model.score(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn records() -> Vec<TransactionRecord> {
        let merchants = ["Grocer", "Cafe", "Fuel", "Books"];
        let mut out: Vec<TransactionRecord> = (0..120)
            .map(|i| {
                let fields = json!({
                    "transaction_id": format!("T{}", i),
                    "amount": 20.0 + (i % 7) as f64 * 3.5,
                    "timestamp": format!("2026-02-{:02} {:02}:15:00", 1 + i % 27, 9 + i % 9),
                    "merchant": merchants[i % 4],
                    "account_id": format!("ACC{}", i % 10),
                });
                TransactionRecord::new(fields.as_object().cloned().unwrap())
            })
            .collect();
        let outlier = json!({
            "transaction_id": "BIG",
            "amount": 9_500.0,
            "timestamp": "2026-02-03 03:12:00",
            "merchant": "Offshore Wire",
            "account_id": "ACC999",
        });
        out.push(TransactionRecord::new(outlier.as_object().cloned().unwrap()));
        out
    }

    fn settings(dir: &Path) -> ModelSettings {
        ModelSettings {
            path: dir.join("nested").join("model.json"),
            ..ModelSettings::default()
        }
    }

    #[test]
    fn test_train_persist_and_score() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path());
        let data = records();

        let path = train_model(&data, &settings).unwrap();
        assert!(path.exists());

        let scores = predict_with_scores(&data, &settings).unwrap();
        assert_eq!(scores.len(), data.len());

        let outlier = scores.last().unwrap();
        assert!(outlier.is_anomaly());
        assert!((outlier.risk_score - 1.0).abs() < 1e-12);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(&s.risk_score)));
        assert!(scores.iter().any(|s| s.risk_score == 0.0));
    }

    #[test]
    fn test_predict_without_model() {
        let dir = tempdir().unwrap();
        let err = predict_with_scores(&records(), &settings(dir.path())).unwrap_err();
        assert!(matches!(err, ModelError::NotTrained));
        assert_eq!(err.to_string(), "Model not trained");
    }

    #[test]
    fn test_train_on_nothing() {
        let dir = tempdir().unwrap();
        let err = train_model(&[], &settings(dir.path())).unwrap_err();
        assert_eq!(err.to_string(), "No data to train on");
    }

    #[test]
    fn test_single_record_uses_training_range() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path());
        let data = records();
        train_model(&data, &settings).unwrap();
        let model = load_model(&settings).unwrap().unwrap();

        // A lone batch has no spread, so batch scoring pins risk to 1.0
        let typical = &data[3];
        assert_eq!(model.score(std::slice::from_ref(typical))[0].risk_score, 1.0);

        let single = model.score_one(typical);
        assert!((0.0..=1.0).contains(&single.risk_score));
    }

    #[test]
    fn test_risk_bands() {
        assert_eq!(RiskBand::from_score(0.1), RiskBand::Low);
        assert_eq!(RiskBand::from_score(0.33), RiskBand::Medium);
        assert_eq!(RiskBand::from_score(0.66), RiskBand::High);
        assert_eq!(RiskBand::High.label(), "High");
    }

    #[test]
    fn test_corrupt_model_file() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path());
        std::fs::create_dir_all(settings.path.parent().unwrap()).unwrap();
        std::fs::write(&settings.path, b"not json").unwrap();
        assert!(matches!(load_model(&settings), Err(ModelError::Format { .. })));
    }
}
