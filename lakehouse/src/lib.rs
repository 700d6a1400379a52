pub mod api;
pub mod services;
pub mod storage;
pub mod utils;

use chrono::{DateTime, Days, FixedOffset, NaiveDate, Utc};
use common::Result;
use common::config::Settings;
use ingest::{IngestRequest, IngestSummary};
use services::lakehouse::LakehouseService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// The publisher stamps dates in Brasília time, which has no DST.
const PUBLISHER_UTC_OFFSET_SECS: i32 = -3 * 3600;

/// Serves `POST /ingest` and `GET /data` until the process is stopped.
pub async fn serve(settings: &Settings) -> Result<()> {
    let service = Arc::new(LakehouseService::new(settings).await?);
    let api_router = api::routes(Arc::clone(&service));

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.api_port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Lakehouse API server listening");
    axum::serve(listener, api_router).await?;

    Ok(())
}

/// A single ingestion run, as a scheduler would trigger it.
pub async fn ingest_once(settings: &Settings, request: IngestRequest) -> Result<IngestSummary> {
    let service = LakehouseService::new(settings).await?;
    service.ingest(request).await
}

/// The calendar day before `now`, as seen at the publisher's UTC offset.
pub fn publisher_yesterday(now: DateTime<Utc>) -> NaiveDate {
    let today = match FixedOffset::east_opt(PUBLISHER_UTC_OFFSET_SECS) {
        Some(offset) => now.with_timezone(&offset).date_naive(),
        None => now.date_naive(),
    };
    today.checked_sub_days(Days::new(1)).unwrap_or(today)
}
