//! In-memory tabular stages of a resource: raw, normalized, filtered.
//!
//! All three wrap a single Arrow `RecordBatch`. Normalized and filtered tables
//! additionally guarantee that the date column is `Date32`.

use arrow::array::{Array, AsArray, BooleanArray, Date32Array};
use arrow::compute::{concat_batches, filter_record_batch};
use arrow::csv::reader::Format;
use arrow::datatypes::{Date32Type, SchemaRef};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::NaiveDate;
use common::config::SourceFormat;
use common::{Error, Result};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::io::{Cursor, Seek};
use std::sync::Arc;

use crate::partition::PartitionKey;

/// A downloaded payload with its original column set.
#[derive(Debug, Clone)]
pub struct RawTable {
    batch: RecordBatch,
}

impl RawTable {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    pub fn from_batches(schema: SchemaRef, batches: &[RecordBatch]) -> Result<Self> {
        Ok(Self::new(concat_batches(&schema, batches)?))
    }

    /// Decodes a Parquet or CSV payload. CSV is read with a header row and the given delimiter.
    pub fn decode(payload: Bytes, format: SourceFormat, csv_delimiter: u8) -> Result<Self> {
        match format {
            SourceFormat::Parquet => decode_parquet(payload),
            SourceFormat::Csv => decode_csv(payload, csv_delimiter),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }
}

fn decode_parquet(payload: Bytes) -> Result<RawTable> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(payload)?;
    let schema = builder.schema().clone();
    let batches = builder.build()?.collect::<std::result::Result<Vec<_>, _>>()?;
    RawTable::from_batches(schema, &batches)
}

fn decode_csv(payload: Bytes, delimiter: u8) -> Result<RawTable> {
    let mut cursor = Cursor::new(payload);
    let format = Format::default().with_header(true).with_delimiter(delimiter);
    let (schema, _) = format.infer_schema(&mut cursor, None)?;
    cursor.rewind()?;

    let schema = Arc::new(schema);
    let reader = arrow::csv::ReaderBuilder::new(schema.clone())
        .with_header(true)
        .with_delimiter(delimiter)
        .build(cursor)?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    RawTable::from_batches(schema, &batches)
}

/// Columns canonicalized, date column parsed to `Date32`.
#[derive(Debug, Clone)]
pub struct NormalizedTable {
    batch: RecordBatch,
    date_index: usize,
}

impl NormalizedTable {
    pub(crate) fn new(batch: RecordBatch, date_index: usize) -> Result<Self> {
        if batch.column(date_index).as_primitive_opt::<Date32Type>().is_none() {
            return Err(Error::Schema(format!(
                "column '{}' is not a date column",
                batch.schema().field(date_index).name()
            )));
        }
        Ok(Self { batch, date_index })
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn date_column(&self) -> String {
        self.batch.schema().field(self.date_index).name().clone()
    }

    pub fn dates(&self) -> &Date32Array {
        self.batch.column(self.date_index).as_primitive::<Date32Type>()
    }

    /// Rows whose calendar date lies in `[start, end]`, both inclusive.
    ///
    /// An inverted range matches nothing. Rows with a null date never match.
    pub fn filter(&self, start: NaiveDate, end: NaiveDate) -> Result<FilteredTable> {
        let lo = Date32Type::from_naive_date(start);
        let hi = Date32Type::from_naive_date(end);
        let mask: BooleanArray = self
            .dates()
            .iter()
            .map(|day| day.map(|day| lo <= day && day <= hi))
            .collect();
        let batch = filter_record_batch(&self.batch, &mask)?;
        Ok(FilteredTable {
            batch,
            date_index: self.date_index,
        })
    }
}

/// Normalized rows restricted to the requested date range. May be empty.
#[derive(Debug, Clone)]
pub struct FilteredTable {
    batch: RecordBatch,
    date_index: usize,
}

impl FilteredTable {
    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    /// Partition key of every row, in row order. Null dates yield `None`.
    pub fn partition_keys(&self) -> Vec<Option<PartitionKey>> {
        let dates = self.batch.column(self.date_index).as_primitive::<Date32Type>();
        (0..dates.len())
            .map(|row| {
                if dates.is_null(row) {
                    None
                } else {
                    dates.value_as_date(row).map(PartitionKey::from)
                }
            })
            .collect()
    }
}

/// Snappy-compressed Parquet encoding of `batch`.
pub fn encode_parquet(batch: &RecordBatch) -> Result<Vec<u8>> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut buffer: Vec<u8> = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::RecordNormalizer;
    use crate::testing::measurements_parquet;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn normalized(dates: &[&str]) -> NormalizedTable {
        let payload = measurements_parquet("ena_data", dates);
        let raw = RawTable::decode(payload, SourceFormat::Parquet, b';').unwrap();
        RecordNormalizer::new("ena_data").normalize(raw).unwrap()
    }

    #[test]
    fn test_decode_csv_with_semicolons() {
        let csv = "ID_SUBSISTEMA;EAR_DATA;ear_verif\nN;2023-06-01;10.5\nS;2023-06-02;11\n";
        let raw = RawTable::decode(Bytes::from(csv), SourceFormat::Csv, b';').unwrap();
        assert_eq!(raw.num_rows(), 2);
        assert_eq!(raw.batch().num_columns(), 3);
        assert_eq!(raw.batch().schema().field(1).name(), "EAR_DATA");
    }

    #[test]
    fn test_parquet_round_trips_through_encoder() {
        let payload = measurements_parquet("ena_data", &["2023-06-01", "2023-06-02"]);
        let raw = RawTable::decode(payload, SourceFormat::Parquet, b';').unwrap();
        let encoded = encode_parquet(raw.batch()).unwrap();
        let again = RawTable::decode(Bytes::from(encoded), SourceFormat::Parquet, b';').unwrap();
        assert_eq!(again.batch(), raw.batch());
    }

    #[test]
    fn test_filter_is_inclusive_on_both_ends() {
        let table = normalized(&["2023-05-31", "2023-06-01", "2023-06-02", "2023-06-03"]);
        let filtered = table.filter(date("2023-06-01"), date("2023-06-02")).unwrap();
        assert_eq!(filtered.num_rows(), 2);
    }

    #[test]
    fn test_inverted_range_matches_nothing() {
        let table = normalized(&["2023-06-01", "2023-06-02"]);
        let filtered = table.filter(date("2023-06-02"), date("2023-06-01")).unwrap();
        assert!(filtered.is_empty());
        assert!(filtered.partition_keys().is_empty());
    }

    #[test]
    fn test_partition_keys_follow_rows() {
        let table = normalized(&["2023-06-02", "2023-06-01"]);
        let filtered = table.filter(date("2023-01-01"), date("2023-12-31")).unwrap();
        assert_eq!(
            filtered.partition_keys(),
            vec![
                Some(PartitionKey { year: 2023, month: 6, day: 2 }),
                Some(PartitionKey { year: 2023, month: 6, day: 1 }),
            ]
        );
    }
}
