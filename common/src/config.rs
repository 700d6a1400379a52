use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::logging::LogFormat;

pub const DEFAULT_PATH_TEMPLATE: &str = "fatos/{dataset}/ano={year}/mes={month}/dia={day}/data.parquet";

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub storage: StorageSettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    pub dataset: DatasetSettings,
    #[serde(default)]
    pub dimension: Option<DimensionSettings>,
    #[serde(default)]
    pub query: QuerySettings,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    #[serde(default = "default_s3_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_s3_region")]
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    /// Key prefix every object is written under. Empty means bucket root.
    #[serde(default)]
    pub root: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogSettings {
    #[serde(default = "default_catalog_url")]
    pub base_url: String,
    #[serde(default = "default_catalog_timeout")]
    pub timeout_secs: u64,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            base_url: default_catalog_url(),
            timeout_secs: default_catalog_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineSettings {
    #[serde(default)]
    pub on_resource_error: ResourceErrorPolicy,
    #[serde(default = "default_resource_concurrency")]
    pub resource_concurrency: usize,
    #[serde(default = "default_partition_concurrency")]
    pub partition_concurrency: usize,
    #[serde(default = "default_storage_timeout")]
    pub storage_timeout_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            on_resource_error: ResourceErrorPolicy::default(),
            resource_concurrency: default_resource_concurrency(),
            partition_concurrency: default_partition_concurrency(),
            storage_timeout_secs: default_storage_timeout(),
        }
    }
}

/// What a run does when a single resource fails after resolution.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceErrorPolicy {
    #[default]
    AbortAll,
    SkipAndContinue,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Parquet,
    Csv,
}

impl SourceFormat {
    /// Matches a catalog `format` field, ignoring case and surrounding whitespace.
    pub fn from_catalog(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("parquet") {
            Some(SourceFormat::Parquet)
        } else if value.eq_ignore_ascii_case("csv") {
            Some(SourceFormat::Csv)
        } else {
            None
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceFormat::Parquet => write!(f, "PARQUET"),
            SourceFormat::Csv => write!(f, "CSV"),
        }
    }
}

/// A time-series dataset published in the catalog, described as data.
#[derive(Debug, Deserialize, Clone)]
pub struct DatasetSettings {
    pub id: String,
    #[serde(default)]
    pub partition_name: Option<String>,
    /// Column name after lowercasing and renames.
    pub date_column: String,
    #[serde(default = "default_format")]
    pub format: SourceFormat,
    #[serde(default = "default_path_template")]
    pub path_template: String,
    #[serde(default)]
    pub column_renames: BTreeMap<String, String>,
    #[serde(default = "default_csv_delimiter")]
    pub csv_delimiter: char,
}

impl DatasetSettings {
    pub fn new(id: &str, date_column: &str, format: SourceFormat) -> Self {
        Self {
            id: id.to_string(),
            partition_name: None,
            date_column: date_column.to_string(),
            format,
            path_template: default_path_template(),
            column_renames: BTreeMap::new(),
            csv_delimiter: default_csv_delimiter(),
        }
    }

    pub fn with_partition_name(mut self, name: &str) -> Self {
        self.partition_name = Some(name.to_string());
        self
    }

    pub fn with_rename(mut self, from: &str, to: &str) -> Self {
        self.column_renames.insert(from.to_string(), to.to_string());
        self
    }

    pub fn partition_name(&self) -> &str {
        self.partition_name.as_deref().unwrap_or(&self.id)
    }
}

/// Slowly-changing reference table cached once in storage.
#[derive(Debug, Deserialize, Clone)]
pub struct DimensionSettings {
    pub catalog_id: String,
    pub artifact_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuerySettings {
    #[serde(default = "default_join_key")]
    pub join_key: String,
    #[serde(default = "default_dimension_columns")]
    pub dimension_columns: Vec<String>,
    #[serde(default = "default_order_by")]
    pub order_by: String,
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            join_key: default_join_key(),
            dimension_columns: default_dimension_columns(),
            order_by: default_order_by(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

fn default_s3_endpoint() -> String {
    "http://localhost:9000".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_catalog_url() -> String {
    "https://dados.ons.org.br/api/3/action/package_show".to_string()
}

fn default_catalog_timeout() -> u64 {
    60
}

fn default_resource_concurrency() -> usize {
    1
}

fn default_partition_concurrency() -> usize {
    4
}

fn default_storage_timeout() -> u64 {
    30
}

fn default_format() -> SourceFormat {
    SourceFormat::Parquet
}

fn default_path_template() -> String {
    DEFAULT_PATH_TEMPLATE.to_string()
}

fn default_csv_delimiter() -> char {
    ';'
}

fn default_join_key() -> String {
    "nom_bacia".to_string()
}

fn default_dimension_columns() -> Vec<String> {
    vec!["id_reservatorio".to_string(), "nom_reservatorio".to_string()]
}

fn default_order_by() -> String {
    "measurement_date".to_string()
}

fn default_page_size() -> usize {
    50
}

fn default_max_page_size() -> usize {
    1000
}

fn default_api_port() -> u16 {
    3000
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let config = builder.build()?;
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;

        debug!(
            dataset = %settings.dataset.id,
            bucket = %settings.storage.bucket,
            "Loaded settings"
        );

        Ok(settings)
    }

    /// Rejects settings the pipeline cannot run with. Called once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let dataset = &self.dataset;
        if dataset.id.trim().is_empty() {
            return Err(invalid("dataset.id must not be empty"));
        }
        if dataset.date_column.trim().is_empty() {
            return Err(invalid("dataset.date_column must not be empty"));
        }
        for placeholder in ["{year}", "{month}", "{day}"] {
            if !dataset.path_template.contains(placeholder) {
                return Err(invalid(&format!(
                    "dataset.path_template '{}' is missing {}",
                    dataset.path_template, placeholder
                )));
            }
        }
        if !dataset.csv_delimiter.is_ascii() {
            return Err(invalid("dataset.csv_delimiter must be a single ASCII character"));
        }

        if let Some(dimension) = &self.dimension {
            if dimension.catalog_id.trim().is_empty() || dimension.artifact_name.trim().is_empty() {
                return Err(invalid("dimension.catalog_id and dimension.artifact_name are required"));
            }
        }

        if self.pipeline.resource_concurrency == 0 || self.pipeline.partition_concurrency == 0 {
            return Err(invalid("pipeline concurrency must be at least 1"));
        }
        if self.pipeline.storage_timeout_secs == 0 || self.catalog.timeout_secs == 0 {
            return Err(invalid("timeouts must be at least one second"));
        }

        url::Url::parse(&self.catalog.base_url)
            .map_err(|e| invalid(&format!("catalog.base_url: {}", e)))?;

        if self.storage.bucket.trim().is_empty() {
            return Err(invalid("storage.bucket must not be empty"));
        }

        let query = &self.query;
        if !(1..=1000).contains(&query.max_page_size)
            || !(1..=query.max_page_size).contains(&query.default_page_size)
        {
            return Err(invalid("query page sizes must satisfy 1 <= default <= max <= 1000"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Message(message.to_string())
}
