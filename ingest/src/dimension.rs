use common::Result;
use common::config::{DimensionSettings, SourceFormat};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::catalog::CatalogResolver;
use crate::source::SourceClient;
use crate::storage::ObjectStorage;
use crate::table::{RawTable, encode_parquet};
use crate::utils::paths::dimension_path;
use crate::utils::timeout::with_timeout;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DimensionStatus {
    pub already_present: bool,
    pub bytes_written: usize,
}

/// Keeps a reference table in storage, fetching it only when the object is absent.
///
/// This is check-then-act without a lock. Two runs racing on an empty store may
/// both download and write; both write the same source to the same key, so the
/// loser's overwrite leaves identical content.
pub struct DimensionCache {
    storage: Arc<dyn ObjectStorage>,
    resolver: Arc<CatalogResolver>,
    source: Arc<dyn SourceClient>,
    root: String,
    timeout: Duration,
}

impl DimensionCache {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        resolver: Arc<CatalogResolver>,
        source: Arc<dyn SourceClient>,
        root: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            storage,
            resolver,
            source,
            root: root.to_string(),
            timeout,
        }
    }

    pub fn artifact_path(&self, artifact_name: &str) -> String {
        dimension_path(&self.root, artifact_name)
    }

    pub async fn ensure(&self, dimension: &DimensionSettings) -> Result<DimensionStatus> {
        let path = self.artifact_path(&dimension.artifact_name);

        let exists = with_timeout(
            self.timeout,
            &format!("exists {}", path),
            self.storage.check_file_exists(&path),
        )
        .await?;
        if exists {
            info!(path = %path, "Dimension already present, skipping download");
            return Ok(DimensionStatus {
                already_present: true,
                bytes_written: 0,
            });
        }

        let resource = self
            .resolver
            .find_named(&dimension.catalog_id, &dimension.artifact_name, SourceFormat::Parquet)
            .await?;
        let Some(resource) = resource else {
            warn!(
                catalog_id = %dimension.catalog_id,
                artifact = %dimension.artifact_name,
                "Dimension resource not found in catalog; continuing without it"
            );
            return Ok(DimensionStatus::default());
        };

        info!(url = %resource.url, path = %path, "Downloading dimension");
        let payload = self.source.fetch(&resource.url).await?;
        let table = RawTable::decode(payload, SourceFormat::Parquet, b',')?;
        let encoded = encode_parquet(table.batch())?;

        with_timeout(
            self.timeout,
            &format!("write {}", path),
            self.storage.put_object(&path, &encoded),
        )
        .await?;

        info!(path = %path, rows = table.num_rows(), bytes = encoded.len(), "Dimension stored");
        Ok(DimensionStatus {
            already_present: false,
            bytes_written: encoded.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ObjectStoreStorage;
    use crate::testing::{CATALOG_URL, MemorySource, catalog_json, reservoirs_parquet};
    use common::Error;

    const RESERVOIR_URL: &str = "https://files.test/reservatorio.parquet";

    fn settings() -> DimensionSettings {
        DimensionSettings {
            catalog_id: "reservatorio".to_string(),
            artifact_name: "reservatorios".to_string(),
        }
    }

    fn cache(source: Arc<MemorySource>, storage: Arc<ObjectStoreStorage>) -> DimensionCache {
        let resolver = Arc::new(CatalogResolver::new(source.clone(), CATALOG_URL).unwrap());
        DimensionCache::new(storage, resolver, source, "", Duration::from_secs(5))
    }

    fn serve_reservoirs(source: &MemorySource) {
        source.serve_catalog(
            "reservatorio",
            catalog_json(&[("RESERVATORIOS", "PARQUET", RESERVOIR_URL)]),
        );
        source.serve(RESERVOIR_URL, reservoirs_parquet());
    }

    #[tokio::test]
    async fn test_fetches_once_then_hits_cache() {
        let source = Arc::new(MemorySource::new());
        serve_reservoirs(&source);
        let storage = Arc::new(ObjectStoreStorage::in_memory("ons"));
        let cache = cache(source.clone(), storage.clone());

        let first = cache.ensure(&settings()).await.unwrap();
        assert!(!first.already_present);
        assert!(first.bytes_written > 0);
        assert_eq!(source.call_count(), 2);
        assert!(
            storage
                .check_file_exists("dimensao/reservatorios/reservatorios.parquet")
                .await
                .unwrap()
        );

        let second = cache.ensure(&settings()).await.unwrap();
        assert_eq!(
            second,
            DimensionStatus {
                already_present: true,
                bytes_written: 0
            }
        );
        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test]
    async fn test_refetches_after_external_delete() {
        let source = Arc::new(MemorySource::new());
        serve_reservoirs(&source);
        let store = Arc::new(object_store::memory::InMemory::new());
        let storage = Arc::new(ObjectStoreStorage::new(store.clone(), "ons"));
        let cache = cache(source.clone(), storage);

        cache.ensure(&settings()).await.unwrap();
        object_store::ObjectStore::delete(
            store.as_ref(),
            &object_store::path::Path::from("dimensao/reservatorios/reservatorios.parquet"),
        )
        .await
        .unwrap();

        let again = cache.ensure(&settings()).await.unwrap();
        assert!(!again.already_present);
        assert_eq!(source.call_count(), 4);
    }

    #[tokio::test]
    async fn test_missing_catalog_entry_is_not_fatal() {
        let source = Arc::new(MemorySource::new());
        source.serve_catalog(
            "reservatorio",
            catalog_json(&[("reservatorios", "CSV", "https://files.test/res.csv")]),
        );
        let storage = Arc::new(ObjectStoreStorage::in_memory("ons"));

        let status = cache(source, storage.clone()).ensure(&settings()).await.unwrap();
        assert_eq!(status, DimensionStatus::default());
        assert!(storage.list_objects("dimensao").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_failure_propagates() {
        let source = Arc::new(MemorySource::new());
        source.serve_catalog(
            "reservatorio",
            catalog_json(&[("reservatorios", "PARQUET", RESERVOIR_URL)]),
        );
        let storage = Arc::new(ObjectStoreStorage::in_memory("ons"));

        let err = cache(source, storage).ensure(&settings()).await.unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable(_)));
    }
}
