// 🌐 REST API with Axum
// /api/data/* for transactions and the model, /api/reports/* for reports

pub mod data;
pub mod error;
pub mod reports;

use axum::{
    extract::DefaultBodyLimit,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::model::ModelSettings;
pub use error::ApiError;

/// Upload size cap for CSV files
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Connection>>,
    pub model: ModelSettings,
}

impl AppState {
    pub fn new(conn: Connection, model: ModelSettings) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            model,
        }
    }

    /// Exclusive handle on the store for the duration of one request
    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::Internal("database lock poisoned".to_string()))
    }
}

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": crate::VERSION }))
}

pub fn build_router(state: AppState) -> Router {
    let data_routes = Router::new()
        .route("/upload", post(data::upload_csv))
        .route("/transactions", get(data::list_transactions))
        .route("/stats", get(data::get_stats))
        .route("/train", post(data::train_model))
        .route("/anomalies", get(data::anomalies))
        .route("/dashboard", get(data::dashboard))
        .route("/predict", post(data::predict_transaction))
        .route("/quality", get(data::data_quality))
        .route("/generate-sample", post(data::generate_sample))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES));

    let report_routes = Router::new()
        .route("/generate", post(reports::generate_report))
        .route("/list", get(reports::list_reports))
        .route("/download", get(reports::download_report));

    Router::new()
        .route("/api/health", get(health_check))
        .nest("/api/data", data_routes)
        .nest("/api/reports", report_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
