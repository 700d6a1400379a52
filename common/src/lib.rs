use arrow::error::ArrowError;
use aws_smithy_runtime_api::client::result::CreateUnhandledError;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_runtime_api::http::Response;
use parquet::errors::ParquetError;
use datafusion::error::DataFusionError;
use thiserror::Error;
use url::ParseError;

pub mod config;
pub mod logging;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Catalog or resource download failed at the network/HTTP level.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// The catalog has no resource for the requested range.
    #[error("No source data: {0}")]
    NoSourceData(String),

    /// Expected date column missing, unparseable, or colliding column names.
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("AWS SDK error: {0}")]
    AwsSdk(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("DataFusion error: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// True for failures the caller should report as "not found" rather than a crash.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NoSourceData(_))
    }
}

// Implement From for various SdkError types
impl<E: std::fmt::Debug + CreateUnhandledError> From<SdkError<E, Response>> for Error {
    fn from(err: SdkError<E, Response>) -> Self {
        Error::AwsSdk(format!("{:?}", err))
    }
}

impl From<rquest::Error> for Error {
    fn from(err: rquest::Error) -> Self {
        if err.is_timeout() {
            Error::SourceUnavailable(format!("request timed out: {}", err))
        } else {
            Error::SourceUnavailable(err.to_string())
        }
    }
}

impl From<object_store::Error> for Error {
    fn from(err: object_store::Error) -> Self {
        Error::Storage(format!("Object store error: {}", err))
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::InvalidInput(format!("URL parse error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_no_source_data_is_not_found() {
        assert!(Error::NoSourceData("none".into()).is_not_found());
        assert!(!Error::SourceUnavailable("down".into()).is_not_found());
        assert!(!Error::Schema("bad".into()).is_not_found());
    }

    #[test]
    fn test_object_store_errors_become_storage() {
        let err: Error = object_store::Error::NotFound {
            path: "fatos/ena".to_string(),
            source: "missing".into(),
        }
        .into();
        assert!(matches!(err, Error::Storage(_)));
    }
}
