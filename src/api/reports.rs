// /api/reports/* handlers

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::header,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, AppState};
use crate::db;
use crate::reports::{self, ReportRequest};

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    pub report_id: String,
}

/// POST /api/reports/generate - Build and store a CSV report
pub async fn generate_report(
    State(state): State<AppState>,
    request: Result<Json<ReportRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = request?;
    let conn = state.conn()?;
    let report = reports::generate_report(&conn, &request)?;

    Ok(Json(json!({
        "report_id": report.summary.id,
        "transactions": report.summary.transactions,
        "amount": report.summary.amount,
    })))
}

/// GET /api/reports/list - Stored reports, newest first, without bodies
pub async fn list_reports(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let conn = state.conn()?;
    let items = db::list_reports(&conn)?;
    Ok(Json(json!({ "items": items })))
}

/// GET /api/reports/download?report_id= - CSV attachment
pub async fn download_report(
    State(state): State<AppState>,
    params: Result<Query<DownloadParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params?;
    let report = {
        let conn = state.conn()?;
        db::get_report(&conn, &params.report_id)?
    }
    .ok_or_else(|| ApiError::NotFound("Report not found".to_string()))?;

    let disposition = format!(
        "attachment; filename=report_{}.csv",
        report.summary.id
    );
    let etag = format!("\"{}\"", report.summary.checksum);

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::ETAG, etag),
        ],
        report.csv,
    )
        .into_response())
}
