pub mod s3;

pub use s3::S3Storage;

use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use common::Result;
use common::config::StorageSettings;
use datafusion::execution::context::SessionContext;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Builds and hands out the S3 clients for the configured bucket: the AWS SDK
/// client for object I/O and an `object_store` handle for DataFusion scans.
#[derive(Clone)]
pub struct S3Manager {
    settings: StorageSettings,
    client: Arc<S3Client>,
    object_store: Arc<AmazonS3>,
}

impl S3Manager {
    pub fn new(settings: &StorageSettings) -> Result<Self> {
        let credentials = Credentials::new(
            &settings.access_key,
            &settings.secret_key,
            None,
            None,
            "static",
        );

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&settings.endpoint)
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        let object_store = AmazonS3Builder::new()
            .with_bucket_name(&settings.bucket)
            .with_region(&settings.region)
            .with_access_key_id(&settings.access_key)
            .with_secret_access_key(&settings.secret_key)
            .with_endpoint(&settings.endpoint)
            .with_allow_http(true)
            .build()?;

        Ok(Self {
            settings: settings.clone(),
            client: Arc::new(S3Client::from_conf(s3_config)),
            object_store: Arc::new(object_store),
        })
    }

    pub fn client(&self) -> Arc<S3Client> {
        self.client.clone()
    }

    pub fn bucket(&self) -> &str {
        &self.settings.bucket
    }

    /// `s3://<bucket>/`, the URL every table path is resolved against.
    pub fn bucket_url(&self) -> Result<Url> {
        Ok(Url::parse(&format!("s3://{}/", self.settings.bucket))?)
    }

    pub fn register_object_store(&self, ctx: &SessionContext) -> Result<()> {
        let url = self.bucket_url()?;
        ctx.runtime_env()
            .register_object_store(&url, self.object_store.clone());
        Ok(())
    }

    /// Verifies that the bucket exists and is accessible
    pub async fn verify_bucket_exists(&self) -> Result<()> {
        match self.client.head_bucket().bucket(self.bucket()).send().await {
            Ok(_) => {
                info!(bucket = %self.bucket(), endpoint = %self.settings.endpoint, "Bucket reachable");
                Ok(())
            }
            Err(e) => Err(common::Error::Storage(format!(
                "Cannot access bucket '{}': {}",
                self.bucket(),
                e
            ))),
        }
    }
}
