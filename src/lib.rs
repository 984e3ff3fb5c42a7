// FinSight - Transaction Analytics Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod db;
pub mod ingest;          // CSV upload parsing
pub mod features;        // Feature matrix for the anomaly model
pub mod model;           // Isolation forest + persistence
pub mod analytics;       // Dashboard aggregations
pub mod data_quality;    // Completeness and duplicate metrics
pub mod reports;         // CSV report generation
pub mod sample;          // Synthetic transactions
pub mod config;
pub mod logging;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use db::{
    TransactionRecord, ReportRecord, ReportSummary,
    open_database, setup_database, insert_transactions,
    list_transactions, all_transactions, count_transactions,
    insert_report, list_reports, get_report,
};
pub use ingest::{IngestError, parse_upload, load_csv_file};
pub use features::{FeatureMatrix, prepare_features};
pub use model::{
    AnomalyModel, AnomalyScore, ModelError, ModelSettings, RiskBand,
    train_model, load_model, predict_with_scores,
};
pub use analytics::{Dashboard, build_dashboard};
pub use data_quality::{DataQualityEngine, QualityReport, QualityIssue, Severity};
pub use reports::{ReportError, ReportRequest, generate_report};
pub use sample::SampleGenerator;
pub use config::AppConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
