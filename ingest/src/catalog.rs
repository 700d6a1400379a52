use common::config::SourceFormat;
use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::source::SourceClient;

/// A downloadable file listed in the publisher's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceDescriptor {
    pub name: String,
    pub url: String,
    pub format: SourceFormat,
}

impl ResourceDescriptor {
    pub fn year(&self) -> Option<i32> {
        parse_resource_year(&self.name)
    }
}

/// Year carried by the last `-` separated token of a resource name
/// (`ena-diario-por-bacia-2023` -> 2023). Names without a separator or with a
/// non-numeric tail have no year.
pub fn parse_resource_year(name: &str) -> Option<i32> {
    let (_, tail) = name.rsplit_once('-')?;
    tail.trim().parse().ok()
}

#[derive(Debug, Clone)]
pub struct CatalogQuery {
    pub dataset_id: String,
    pub format: SourceFormat,
    pub start_year: i32,
    pub end_year: i32,
}

#[derive(Debug, Deserialize)]
struct CatalogEnvelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    result: Option<CatalogResult>,
}

#[derive(Debug, Deserialize)]
struct CatalogResult {
    #[serde(default)]
    resources: Option<Vec<CatalogResource>>,
}

#[derive(Debug, Deserialize)]
struct CatalogResource {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl CatalogResource {
    /// Descriptor for this entry if it has a name, a URL and the wanted format.
    fn descriptor(self, wanted: SourceFormat) -> Option<ResourceDescriptor> {
        let format = SourceFormat::from_catalog(self.format.as_deref()?)?;
        if format != wanted {
            return None;
        }
        Some(ResourceDescriptor {
            name: self.name?,
            url: self.url?,
            format,
        })
    }
}

/// Resolves a package id to the resources it publishes.
pub struct CatalogResolver {
    source: Arc<dyn SourceClient>,
    base_url: Url,
}

impl CatalogResolver {
    pub fn new(source: Arc<dyn SourceClient>, base_url: &str) -> Result<Self> {
        Ok(Self {
            source,
            base_url: Url::parse(base_url)?,
        })
    }

    pub fn package_url(&self, dataset_id: &str) -> Url {
        package_url(&self.base_url, dataset_id)
    }

    /// Resources of `query.format` whose name ends in a year inside
    /// `[start_year, end_year]`, in catalog order. Duplicates are kept.
    pub async fn resolve(&self, query: &CatalogQuery) -> Result<Vec<ResourceDescriptor>> {
        let resources = self.fetch_resources(&query.dataset_id).await?;
        let total = resources.len();

        let matched: Vec<ResourceDescriptor> = resources
            .into_iter()
            .filter_map(|resource| resource.descriptor(query.format))
            .filter(|descriptor| match descriptor.year() {
                Some(year) => query.start_year <= year && year <= query.end_year,
                None => {
                    debug!(resource = %descriptor.name, "Skipping resource without a year suffix");
                    false
                }
            })
            .collect();

        info!(
            dataset = %query.dataset_id,
            listed = total,
            matched = matched.len(),
            start_year = query.start_year,
            end_year = query.end_year,
            "Resolved catalog resources"
        );
        Ok(matched)
    }

    /// First resource named `name` (case-insensitive) in `format`.
    pub async fn find_named(
        &self,
        dataset_id: &str,
        name: &str,
        format: SourceFormat,
    ) -> Result<Option<ResourceDescriptor>> {
        let resources = self.fetch_resources(dataset_id).await?;
        Ok(resources
            .into_iter()
            .filter_map(|resource| resource.descriptor(format))
            .find(|descriptor| descriptor.name.trim().eq_ignore_ascii_case(name.trim())))
    }

    async fn fetch_resources(&self, dataset_id: &str) -> Result<Vec<CatalogResource>> {
        let url = self.package_url(dataset_id);
        let body = self.source.fetch(url.as_str()).await?;

        let envelope: CatalogEnvelope = serde_json::from_slice(&body).map_err(|e| {
            Error::SourceUnavailable(format!("malformed catalog response from {}: {}", url, e))
        })?;

        if envelope.success != Some(true) {
            info!(dataset = dataset_id, "Catalog reported no success; treating as no sources");
            return Ok(Vec::new());
        }

        Ok(envelope
            .result
            .and_then(|result| result.resources)
            .unwrap_or_default())
    }
}

/// `<base>?id=<dataset_id>`
pub fn package_url(base_url: &Url, dataset_id: &str) -> Url {
    let mut url = base_url.clone();
    url.query_pairs_mut().append_pair("id", dataset_id);
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CATALOG_URL, MemorySource, catalog_json};

    fn resolver(source: Arc<MemorySource>) -> CatalogResolver {
        CatalogResolver::new(source, CATALOG_URL).unwrap()
    }

    fn query(start_year: i32, end_year: i32) -> CatalogQuery {
        CatalogQuery {
            dataset_id: "ena-diario-por-bacia".to_string(),
            format: SourceFormat::Parquet,
            start_year,
            end_year,
        }
    }

    #[test]
    fn test_year_suffix_parsing() {
        assert_eq!(parse_resource_year("ena-diario-por-bacia-2023"), Some(2023));
        assert_eq!(parse_resource_year("reservatorio-xyz"), None);
        assert_eq!(parse_resource_year("2023"), None);
        assert_eq!(parse_resource_year("ena-"), None);
    }

    #[tokio::test]
    async fn test_filters_by_format_and_year() {
        let source = Arc::new(MemorySource::new());
        source.serve_catalog(
            "ena-diario-por-bacia",
            catalog_json(&[
                ("ena-diario-por-bacia-2022", "PARQUET", "https://files.test/2022.parquet"),
                ("ena-diario-por-bacia-2023", "parquet", "https://files.test/2023.parquet"),
                ("ena-diario-por-bacia-2023", "CSV", "https://files.test/2023.csv"),
                ("ena-diario-por-bacia-2024", "Parquet", "https://files.test/2024.parquet"),
                ("reservatorio-xyz", "PARQUET", "https://files.test/xyz.parquet"),
            ]),
        );

        let found = resolver(source).resolve(&query(2023, 2024)).await.unwrap();
        let urls: Vec<&str> = found.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://files.test/2023.parquet", "https://files.test/2024.parquet"]
        );
    }

    #[tokio::test]
    async fn test_duplicates_keep_catalog_order() {
        let source = Arc::new(MemorySource::new());
        source.serve_catalog(
            "ena-diario-por-bacia",
            catalog_json(&[
                ("ena-diario-por-bacia-2023", "PARQUET", "https://files.test/b.parquet"),
                ("ena-diario-por-bacia-2023", "PARQUET", "https://files.test/a.parquet"),
                ("ena-diario-por-bacia-2023", "PARQUET", "https://files.test/b.parquet"),
            ]),
        );

        let found = resolver(source).resolve(&query(2023, 2023)).await.unwrap();
        let urls: Vec<&str> = found.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://files.test/b.parquet",
                "https://files.test/a.parquet",
                "https://files.test/b.parquet"
            ]
        );
    }

    #[tokio::test]
    async fn test_unsuccessful_envelope_is_empty_not_error() {
        let source = Arc::new(MemorySource::new());
        source.serve_catalog(
            "ena-diario-por-bacia",
            bytes::Bytes::from_static(br#"{"success": false, "error": {"message": "Not found"}}"#),
        );
        let found = resolver(source.clone()).resolve(&query(2000, 2100)).await.unwrap();
        assert!(found.is_empty());

        source.serve_catalog("ena-diario-por-bacia", bytes::Bytes::from_static(b"{}"));
        let found = resolver(source).resolve(&query(2000, 2100)).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_entries_missing_fields_are_dropped() {
        let source = Arc::new(MemorySource::new());
        source.serve_catalog(
            "ena-diario-por-bacia",
            bytes::Bytes::from_static(
                br#"{"success": true, "result": {"resources": [
                    {"format": "PARQUET", "url": "https://files.test/anon.parquet"},
                    {"name": "ena-diario-por-bacia-2023", "format": "PARQUET"},
                    {"name": "ena-diario-por-bacia-2023", "url": "https://files.test/noformat"},
                    {"name": "ena-diario-por-bacia-2023", "format": "PARQUET", "url": "https://files.test/ok.parquet"}
                ]}}"#,
            ),
        );
        let found = resolver(source).resolve(&query(2023, 2023)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url, "https://files.test/ok.parquet");
    }

    #[tokio::test]
    async fn test_unreachable_catalog_is_source_unavailable() {
        let source = Arc::new(MemorySource::new());
        let err = resolver(source).resolve(&query(2023, 2023)).await.unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_non_json_body_is_source_unavailable() {
        let source = Arc::new(MemorySource::new());
        source.serve_catalog("ena-diario-por-bacia", bytes::Bytes::from_static(b"<html>"));
        let err = resolver(source).resolve(&query(2023, 2023)).await.unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_find_named_ignores_case() {
        let source = Arc::new(MemorySource::new());
        source.serve_catalog(
            "reservatorio",
            catalog_json(&[
                ("Reservatorios", "CSV", "https://files.test/res.csv"),
                ("Reservatorios", "PARQUET", "https://files.test/res.parquet"),
            ]),
        );
        let found = resolver(source)
            .find_named("reservatorio", "reservatorios", SourceFormat::Parquet)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.url, "https://files.test/res.parquet");
    }
}
