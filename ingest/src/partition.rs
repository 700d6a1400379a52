use arrow::array::UInt64Array;
use arrow::compute::take_record_batch;
use chrono::{Datelike, NaiveDate};
use common::Result;
use futures::{StreamExt, TryStreamExt, stream};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::storage::ObjectStorage;
use crate::table::{FilteredTable, encode_parquet};
use crate::utils::paths::PathBuilder;
use crate::utils::timeout::with_timeout;

/// Day-grained grouping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PartitionKey {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl From<NaiveDate> for PartitionKey {
    fn from(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
            day: date.day(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionWrite {
    pub path: String,
    pub record_count: usize,
}

/// Splits a filtered table into one Parquet object per calendar day.
pub struct PartitionWriter {
    storage: Arc<dyn ObjectStorage>,
    concurrency: usize,
    timeout: Duration,
}

impl PartitionWriter {
    pub fn new(storage: Arc<dyn ObjectStorage>, concurrency: usize, timeout: Duration) -> Self {
        Self {
            storage,
            concurrency: concurrency.max(1),
            timeout,
        }
    }

    /// Writes every day present in `table`, replacing whatever was at each path.
    ///
    /// Returns one entry per day in ascending date order; an empty table writes nothing.
    pub async fn write(&self, table: &FilteredTable, paths: &PathBuilder) -> Result<Vec<PartitionWrite>> {
        if table.is_empty() {
            return Ok(Vec::new());
        }

        let groups = group_rows(table);
        debug!(partitions = groups.len(), rows = table.num_rows(), "Grouped rows by day");

        stream::iter(groups)
            .map(|(key, rows)| async move {
                let indices = UInt64Array::from(rows);
                let slice = take_record_batch(table.batch(), &indices)?;
                let encoded = encode_parquet(&slice)?;
                let path = paths.build_partition_path(&key);

                with_timeout(
                    self.timeout,
                    &format!("write {}", path),
                    self.storage.put_object(&path, &encoded),
                )
                .await?;

                info!(path = %path, records = slice.num_rows(), "Partition written");
                Ok::<_, common::Error>(PartitionWrite {
                    path,
                    record_count: slice.num_rows(),
                })
            })
            .buffered(self.concurrency)
            .try_collect()
            .await
    }
}

/// Row indices per partition key. Rows without a date belong to no partition.
pub fn group_rows(table: &FilteredTable) -> BTreeMap<PartitionKey, Vec<u64>> {
    let mut groups: BTreeMap<PartitionKey, Vec<u64>> = BTreeMap::new();
    for (row, key) in table.partition_keys().into_iter().enumerate() {
        if let Some(key) = key {
            groups.entry(key).or_default().push(row as u64);
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::RecordNormalizer;
    use crate::storage::ObjectStoreStorage;
    use crate::table::RawTable;
    use crate::testing::measurements_parquet;
    use common::config::{DEFAULT_PATH_TEMPLATE, SourceFormat};

    fn filtered(dates: &[&str], start: &str, end: &str) -> FilteredTable {
        let raw = RawTable::decode(measurements_parquet("ena_data", dates), SourceFormat::Parquet, b';')
            .unwrap();
        let normalized = RecordNormalizer::new("ena_data").normalize(raw).unwrap();
        normalized
            .filter(
                NaiveDate::parse_from_str(start, "%Y-%m-%d").unwrap(),
                NaiveDate::parse_from_str(end, "%Y-%m-%d").unwrap(),
            )
            .unwrap()
    }

    fn writer(storage: Arc<ObjectStoreStorage>) -> PartitionWriter {
        PartitionWriter::new(storage, 4, Duration::from_secs(5))
    }

    #[test]
    fn test_group_counts_cover_every_row() {
        let table = filtered(
            &["2023-06-01", "2023-06-02", "2023-06-01", "2023-07-01", "2023-06-01"],
            "2023-01-01",
            "2023-12-31",
        );
        let groups = group_rows(&table);

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[&PartitionKey { year: 2023, month: 6, day: 1 }], vec![0, 2, 4]);
        let total: usize = groups.values().map(Vec::len).sum();
        assert_eq!(total, table.num_rows());
    }

    #[tokio::test]
    async fn test_writes_one_object_per_day() {
        let storage = Arc::new(ObjectStoreStorage::in_memory("ons"));
        let table = filtered(
            &["2023-06-01", "2023-06-02", "2023-06-01"],
            "2023-06-01",
            "2023-06-30",
        );
        let paths = PathBuilder::new(DEFAULT_PATH_TEMPLATE, "ena");

        let writes = writer(storage.clone()).write(&table, &paths).await.unwrap();

        assert_eq!(
            writes,
            vec![
                PartitionWrite {
                    path: "fatos/ena/ano=2023/mes=06/dia=01/data.parquet".to_string(),
                    record_count: 2,
                },
                PartitionWrite {
                    path: "fatos/ena/ano=2023/mes=06/dia=02/data.parquet".to_string(),
                    record_count: 1,
                },
            ]
        );
        assert_eq!(storage.list_objects("fatos/ena").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_partition_file_holds_exactly_its_rows() {
        let storage = Arc::new(ObjectStoreStorage::in_memory("ons"));
        let table = filtered(&["2023-06-01", "2023-06-02", "2023-06-01"], "2023-06-01", "2023-06-02");
        let paths = PathBuilder::new(DEFAULT_PATH_TEMPLATE, "ena");
        writer(storage.clone()).write(&table, &paths).await.unwrap();

        let bytes = storage
            .get_object("fatos/ena/ano=2023/mes=06/dia=01/data.parquet")
            .await
            .unwrap();
        let raw = RawTable::decode(bytes::Bytes::from(bytes), SourceFormat::Parquet, b';').unwrap();
        let normalized = RecordNormalizer::new("ena_data").normalize(raw).unwrap();
        assert_eq!(normalized.num_rows(), 2);
        assert!(
            normalized
                .dates()
                .iter()
                .all(|d| d == Some(arrow::datatypes::Date32Type::from_naive_date(
                    NaiveDate::from_ymd_opt(2023, 6, 1).unwrap()
                )))
        );
    }

    #[tokio::test]
    async fn test_rewriting_a_day_replaces_it() {
        let storage = Arc::new(ObjectStoreStorage::in_memory("ons"));
        let paths = PathBuilder::new(DEFAULT_PATH_TEMPLATE, "ena");

        let wide = filtered(&["2023-06-01", "2023-06-01", "2023-06-01"], "2023-06-01", "2023-06-01");
        writer(storage.clone()).write(&wide, &paths).await.unwrap();
        let narrow = filtered(&["2023-06-01"], "2023-06-01", "2023-06-01");
        let writes = writer(storage.clone()).write(&narrow, &paths).await.unwrap();

        assert_eq!(writes[0].record_count, 1);
        let keys = storage.list_objects("fatos").await.unwrap();
        assert_eq!(keys, vec!["fatos/ena/ano=2023/mes=06/dia=01/data.parquet".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_table_writes_nothing() {
        let storage = Arc::new(ObjectStoreStorage::in_memory("ons"));
        let table = filtered(&["2023-06-03"], "2023-06-01", "2023-06-02");
        let paths = PathBuilder::new(DEFAULT_PATH_TEMPLATE, "ena");

        let writes = writer(storage.clone()).write(&table, &paths).await.unwrap();
        assert!(writes.is_empty());
        assert!(storage.list_objects("fatos").await.unwrap().is_empty());
    }
}
