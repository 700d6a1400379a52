use async_trait::async_trait;
use common::{Error, Result};
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;

/// Key/value object storage the pipeline writes partitions and dimensions into.
///
/// `put_object` is a full replace: writing an existing key overwrites it.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()>;
    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;
    async fn check_file_exists(&self, key: &str) -> Result<bool>;
    fn bucket(&self) -> &str;
}

/// `ObjectStorage` over any `object_store` backend (S3, local disk, memory).
pub struct ObjectStoreStorage {
    bucket: String,
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreStorage {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            store,
        }
    }

    pub fn in_memory(bucket: &str) -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()), bucket)
    }
}

#[async_trait]
impl ObjectStorage for ObjectStoreStorage {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
        let payload = PutPayload::from(data.to_vec());
        self.store.put(&Path::from(key), payload).await?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let result = self.store.get(&Path::from(key)).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => {
                Error::Storage(format!("Object {} not found in bucket {}", key, self.bucket))
            }
            other => other.into(),
        })?;

        Ok(result.bytes().await?.to_vec())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = Path::from(prefix);
        let mut keys: Vec<String> = self
            .store
            .list(Some(&prefix))
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await?;
        keys.sort();
        Ok(keys)
    }

    async fn check_file_exists(&self, key: &str) -> Result<bool> {
        match self.store.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_overwrites_existing_object() {
        let storage = ObjectStoreStorage::in_memory("ons");
        storage.put_object("fatos/ena/data.parquet", b"first").await.unwrap();
        storage.put_object("fatos/ena/data.parquet", b"second").await.unwrap();

        assert_eq!(storage.get_object("fatos/ena/data.parquet").await.unwrap(), b"second");
        assert_eq!(storage.list_objects("fatos").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exists_probe() {
        let storage = ObjectStoreStorage::in_memory("ons");
        assert!(!storage.check_file_exists("dimensao/x/x.parquet").await.unwrap());
        storage.put_object("dimensao/x/x.parquet", b"x").await.unwrap();
        assert!(storage.check_file_exists("dimensao/x/x.parquet").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_object_is_storage_error() {
        let storage = ObjectStoreStorage::in_memory("ons");
        let err = storage.get_object("nope").await.unwrap_err();
        assert!(matches!(err, Error::Storage(msg) if msg.contains("nope")));
    }
}
