use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::error::SdkError;
use bytes::Bytes;
use common::{Error, Result};
use ingest::ObjectStorage;
use std::sync::Arc;

use crate::storage::S3Manager;

/// `ObjectStorage` over the AWS SDK, for S3 and S3-compatible endpoints.
pub struct S3Storage {
    bucket: String,
    client: Arc<S3Client>,
}

impl S3Storage {
    pub fn new(manager: &S3Manager) -> Self {
        Self {
            client: manager.client(),
            bucket: manager.bucket().to_string(),
        }
    }
}

fn storage_error<E, R>(err: SdkError<E, R>) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    match err {
        SdkError::ServiceError(err) => Error::Storage(err.into_err().to_string()),
        other => Error::Storage(other.to_string()),
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<()> {
        let body = Bytes::copy_from_slice(data);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body.into())
            .send()
            .await
            .map_err(storage_error)?;

        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e {
                SdkError::ServiceError(err) if err.err().is_no_such_key() => {
                    Error::Storage(format!("Object {} not found in bucket {}", key, self.bucket))
                }
                other => storage_error(other),
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let mut objects = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(storage_error)?;

            objects.extend(
                response
                    .contents
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|object| object.key),
            );

            continuation_token = response.next_continuation_token;
            if continuation_token.is_none() {
                break;
            }
        }

        objects.sort();
        Ok(objects)
    }

    async fn check_file_exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(err)) if err.err().is_not_found() => Ok(false),
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}
