use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    routing::{get, post},
};
use ingest::IngestRequest;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::models::{DataPage, IngestResponse, PageParams};
use crate::services::AppError;
use crate::services::lakehouse::LakehouseService;

pub async fn ingest(
    State(service): State<Arc<LakehouseService>>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Json<IngestResponse>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::bad_request(e.body_text()))?;
    info!(start = %request.start_date, end = %request.end_date, "Ingest requested");

    let summary = service.ingest(request).await?;
    Ok(Json(IngestResponse::success(
        summary.total_records_saved,
        summary.skipped_resources.len(),
    )))
}

pub async fn query_data(
    State(service): State<Arc<LakehouseService>>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> Result<Json<DataPage>, AppError> {
    let Query(params) = params.map_err(|e| AppError::bad_request(e.body_text()))?;
    let page = service.data_page(params.page, params.size).await?;
    Ok(Json(page))
}

// Define all API routes
pub fn routes(service: Arc<LakehouseService>) -> Router {
    Router::new()
        .route("/ingest", post(ingest))
        .route("/data", get(query_data))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}
