pub mod catalog;
pub mod dimension;
pub mod normalize;
pub mod partition;
pub mod pipeline;
pub mod source;
pub mod storage;
pub mod table;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use catalog::{CatalogQuery, CatalogResolver, ResourceDescriptor};
pub use dimension::{DimensionCache, DimensionStatus};
pub use normalize::RecordNormalizer;
pub use partition::{PartitionKey, PartitionWrite, PartitionWriter};
pub use pipeline::{IngestRequest, IngestSummary, IngestionPipeline, PipelineConfig};
pub use source::{HttpSource, SourceClient};
pub use storage::{ObjectStorage, ObjectStoreStorage};
pub use table::{FilteredTable, NormalizedTable, RawTable};
