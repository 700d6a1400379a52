//! Per-request orchestration: ensure dimension, resolve, then fetch, normalize,
//! filter and partition every resource.

use chrono::{Datelike, NaiveDate};
use common::config::{DatasetSettings, DimensionSettings, ResourceErrorPolicy, Settings};
use common::{Error, Result};
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::catalog::{CatalogQuery, CatalogResolver, ResourceDescriptor};
use crate::dimension::{DimensionCache, DimensionStatus};
use crate::normalize::RecordNormalizer;
use crate::partition::{PartitionWrite, PartitionWriter};
use crate::source::SourceClient;
use crate::storage::ObjectStorage;
use crate::table::RawTable;
use crate::utils::paths::PathBuilder;

/// Everything a pipeline needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub dataset: DatasetSettings,
    pub dimension: Option<DimensionSettings>,
    pub catalog_url: String,
    pub on_resource_error: ResourceErrorPolicy,
    pub resource_concurrency: usize,
    pub partition_concurrency: usize,
    pub storage_root: String,
    pub storage_timeout: Duration,
}

impl PipelineConfig {
    pub fn new(dataset: DatasetSettings, catalog_url: &str) -> Self {
        Self {
            dataset,
            dimension: None,
            catalog_url: catalog_url.to_string(),
            on_resource_error: ResourceErrorPolicy::AbortAll,
            resource_concurrency: 1,
            partition_concurrency: 4,
            storage_root: String::new(),
            storage_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            dataset: settings.dataset.clone(),
            dimension: settings.dimension.clone(),
            catalog_url: settings.catalog.base_url.clone(),
            on_resource_error: settings.pipeline.on_resource_error,
            resource_concurrency: settings.pipeline.resource_concurrency,
            partition_concurrency: settings.pipeline.partition_concurrency,
            storage_root: settings.storage.root.clone(),
            storage_timeout: Duration::from_secs(settings.pipeline.storage_timeout_secs),
        }
    }

    pub fn with_dimension(mut self, dimension: DimensionSettings) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn with_policy(mut self, policy: ResourceErrorPolicy) -> Self {
        self.on_resource_error = policy;
        self
    }

    pub fn with_resource_concurrency(mut self, concurrency: usize) -> Self {
        self.resource_concurrency = concurrency;
        self
    }

    pub fn with_storage_root(mut self, root: &str) -> Self {
        self.storage_root = root.to_string();
        self
    }
}

/// Inclusive calendar range to ingest. An inverted range is accepted and matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct IngestRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub total_records_saved: usize,
    pub resources_processed: usize,
    pub skipped_resources: Vec<String>,
    pub partitions: Vec<PartitionWrite>,
    pub dimension: Option<DimensionStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    EnsuringDimension,
    Resolving,
    Fetching,
    Normalizing,
    Filtering,
    Partitioning,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::EnsuringDimension => "ENSURING_DIMENSION",
            PipelineStage::Resolving => "RESOLVING",
            PipelineStage::Fetching => "FETCHING",
            PipelineStage::Normalizing => "NORMALIZING",
            PipelineStage::Filtering => "FILTERING",
            PipelineStage::Partitioning => "PARTITIONING",
            PipelineStage::Done => "DONE",
            PipelineStage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// A resource-level failure and the stage it happened in.
#[derive(Debug)]
struct StageError {
    stage: PipelineStage,
    error: Error,
}

trait AtStage<T> {
    fn at(self, stage: PipelineStage) -> std::result::Result<T, StageError>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: PipelineStage) -> std::result::Result<T, StageError> {
        self.map_err(|error| StageError { stage, error })
    }
}

pub struct IngestionPipeline {
    config: PipelineConfig,
    source: Arc<dyn SourceClient>,
    resolver: Arc<CatalogResolver>,
    dimensions: DimensionCache,
    normalizer: RecordNormalizer,
    writer: PartitionWriter,
    paths: PathBuilder,
}

impl IngestionPipeline {
    pub fn new(
        config: PipelineConfig,
        source: Arc<dyn SourceClient>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Result<Self> {
        let resolver = Arc::new(CatalogResolver::new(source.clone(), &config.catalog_url)?);
        let dimensions = DimensionCache::new(
            storage.clone(),
            resolver.clone(),
            source.clone(),
            &config.storage_root,
            config.storage_timeout,
        );
        let normalizer = RecordNormalizer::from_dataset(&config.dataset);
        let writer = PartitionWriter::new(storage, config.partition_concurrency, config.storage_timeout);
        let paths = PathBuilder::new(&config.dataset.path_template, config.dataset.partition_name())
            .with_root(&config.storage_root);

        Ok(Self {
            config,
            source,
            resolver,
            dimensions,
            normalizer,
            writer,
            paths,
        })
    }

    /// Key prefix holding every fact partition of this dataset.
    pub fn facts_prefix(&self) -> String {
        self.paths.build_dataset_prefix()
    }

    /// Object key of the configured dimension artifact, if any.
    pub fn dimension_path(&self) -> Option<String> {
        self.config
            .dimension
            .as_ref()
            .map(|dimension| self.dimensions.artifact_path(&dimension.artifact_name))
    }

    pub async fn run(&self, request: IngestRequest) -> Result<IngestSummary> {
        let span = info_span!(
            "ingest",
            dataset = %self.config.dataset.id,
            start = %request.start_date,
            end = %request.end_date,
        );
        let result = self.run_inner(request).instrument(span.clone()).await;
        let _guard = span.enter();
        match &result {
            Ok(summary) => info!(
                stage = %PipelineStage::Done,
                total_records_saved = summary.total_records_saved,
                resources = summary.resources_processed,
                skipped = summary.skipped_resources.len(),
                "Ingestion finished"
            ),
            Err(e) => error!(stage = %PipelineStage::Failed, error = %e, "Ingestion failed"),
        }
        result
    }

    async fn run_inner(&self, request: IngestRequest) -> Result<IngestSummary> {
        let mut summary = IngestSummary::default();

        if let Some(dimension) = &self.config.dimension {
            debug!(stage = %PipelineStage::EnsuringDimension, "Entering stage");
            summary.dimension = Some(self.dimensions.ensure(dimension).await.map_err(|e| {
                error!(stage = %PipelineStage::EnsuringDimension, error = %e, "Stage failed");
                e
            })?);
        }

        debug!(stage = %PipelineStage::Resolving, "Entering stage");
        let (first_year, last_year) = (request.start_date.year(), request.end_date.year());
        let query = CatalogQuery {
            dataset_id: self.config.dataset.id.clone(),
            format: self.config.dataset.format,
            start_year: first_year.min(last_year),
            end_year: first_year.max(last_year),
        };
        let resources = self.resolver.resolve(&query).await.map_err(|e| {
            error!(stage = %PipelineStage::Resolving, error = %e, "Stage failed");
            e
        })?;
        if resources.is_empty() {
            return Err(Error::NoSourceData(format!(
                "no {} resources of '{}' for years {}..={}",
                query.format, query.dataset_id, query.start_year, query.end_year
            )));
        }

        let request = &request;
        let outcomes = stream::iter(resources.clone())
            .map(move |resource| {
                let span = info_span!("resource", name = %resource.name);
                async move { self.ingest_resource(&resource, request).await }.instrument(span)
            })
            .buffered(self.config.resource_concurrency.max(1));
        let mut outcomes = std::pin::pin!(outcomes);

        let mut index = 0;
        while let Some(outcome) = outcomes.next().await {
            let resource = &resources[index];
            index += 1;

            match outcome {
                Ok(writes) => {
                    summary.resources_processed += 1;
                    summary.total_records_saved += writes.iter().map(|w| w.record_count).sum::<usize>();
                    summary.partitions.extend(writes);
                }
                Err(StageError { stage, error }) => {
                    error!(
                        resource = %resource.name,
                        stage = %stage,
                        error = %error,
                        "Resource failed"
                    );
                    match self.config.on_resource_error {
                        ResourceErrorPolicy::AbortAll => return Err(error),
                        ResourceErrorPolicy::SkipAndContinue => {
                            warn!(resource = %resource.name, "Skipping failed resource");
                            summary.skipped_resources.push(resource.name.clone());
                        }
                    }
                }
            }
        }

        Ok(summary)
    }

    async fn ingest_resource(
        &self,
        resource: &ResourceDescriptor,
        request: &IngestRequest,
    ) -> std::result::Result<Vec<PartitionWrite>, StageError> {
        debug!(stage = %PipelineStage::Fetching, url = %resource.url, "Entering stage");
        let payload = self.source.fetch(&resource.url).await.at(PipelineStage::Fetching)?;
        let delimiter = self.config.dataset.csv_delimiter as u8;
        let raw = RawTable::decode(payload, resource.format, delimiter).at(PipelineStage::Fetching)?;
        info!(rows = raw.num_rows(), "Resource downloaded");

        debug!(stage = %PipelineStage::Normalizing, "Entering stage");
        let normalized = self.normalizer.normalize(raw).at(PipelineStage::Normalizing)?;

        debug!(stage = %PipelineStage::Filtering, "Entering stage");
        let filtered = normalized
            .filter(request.start_date, request.end_date)
            .at(PipelineStage::Filtering)?;
        if filtered.is_empty() {
            info!("No rows in requested range");
            return Ok(Vec::new());
        }

        debug!(stage = %PipelineStage::Partitioning, rows = filtered.num_rows(), "Entering stage");
        self.writer
            .write(&filtered, &self.paths)
            .await
            .at(PipelineStage::Partitioning)
    }
}
