use common::Result;
use common::config::Settings;
use datafusion::execution::context::SessionContext;
use ingest::{HttpSource, IngestRequest, IngestSummary, IngestionPipeline, ObjectStorage, PipelineConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::api::models::DataPage;
use crate::services::query::{DataGateway, session_config};
use crate::storage::{S3Manager, S3Storage};

/// The ingestion pipeline and the query gateway behind the HTTP surface.
pub struct LakehouseService {
    pipeline: IngestionPipeline,
    gateway: DataGateway,
}

impl LakehouseService {
    pub async fn new(settings: &Settings) -> Result<Self> {
        let manager = S3Manager::new(&settings.storage)?;
        manager.verify_bucket_exists().await?;

        let storage: Arc<dyn ObjectStorage> = Arc::new(S3Storage::new(&manager));
        let source = Arc::new(HttpSource::new(Duration::from_secs(settings.catalog.timeout_secs))?);
        let pipeline = IngestionPipeline::new(PipelineConfig::from_settings(settings), source, storage.clone())?;

        let ctx = SessionContext::new_with_config(session_config());
        manager.register_object_store(&ctx)?;
        let gateway = DataGateway::new(
            ctx,
            storage,
            manager.bucket_url()?,
            pipeline.facts_prefix(),
            pipeline.dimension_path(),
            settings.query.clone(),
        );

        info!(
            dataset = %settings.dataset.id,
            bucket = %manager.bucket(),
            "Lakehouse service ready"
        );
        Ok(Self::from_parts(pipeline, gateway))
    }

    pub fn from_parts(pipeline: IngestionPipeline, gateway: DataGateway) -> Self {
        Self { pipeline, gateway }
    }

    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestSummary> {
        self.pipeline.run(request).await
    }

    /// One page of data; raw parameters are validated against the query limits.
    pub async fn data_page(&self, page: Option<i64>, size: Option<i64>) -> Result<DataPage> {
        let (page, size) = self.gateway.page_bounds(page, size)?;
        self.gateway.page(page, size).await
    }
}
