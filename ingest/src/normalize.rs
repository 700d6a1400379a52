use arrow::array::{Array, ArrayRef, AsArray, Date32Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Date32Type, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use common::config::DatasetSettings;
use common::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::table::{NormalizedTable, RawTable};

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Canonicalizes column names and parses the dataset's date column.
#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    date_column: String,
    renames: BTreeMap<String, String>,
}

impl RecordNormalizer {
    pub fn new(date_column: &str) -> Self {
        Self {
            date_column: canonical_name(date_column),
            renames: BTreeMap::new(),
        }
    }

    /// Renames are matched against canonical (trimmed, lowercased) names.
    pub fn with_renames(mut self, renames: &BTreeMap<String, String>) -> Self {
        self.renames = renames
            .iter()
            .map(|(from, to)| (canonical_name(from), canonical_name(to)))
            .collect();
        self
    }

    pub fn from_dataset(dataset: &DatasetSettings) -> Self {
        Self::new(&dataset.date_column).with_renames(&dataset.column_renames)
    }

    pub fn normalize(&self, raw: RawTable) -> Result<NormalizedTable> {
        let batch = raw.into_batch();
        let schema = batch.schema();

        let mut seen = HashSet::new();
        let mut date_index = None;
        let mut fields = Vec::with_capacity(schema.fields().len());
        let mut columns = Vec::with_capacity(schema.fields().len());

        for (idx, field) in schema.fields().iter().enumerate() {
            let mut name = canonical_name(field.name());
            if let Some(renamed) = self.renames.get(&name) {
                name = renamed.clone();
            }
            if !seen.insert(name.clone()) {
                return Err(Error::Schema(format!(
                    "column '{}' appears more than once after normalization",
                    name
                )));
            }

            if name == self.date_column {
                let dates = parse_date_column(batch.column(idx), &name)?;
                fields.push(Field::new(&name, DataType::Date32, true));
                columns.push(Arc::new(dates) as ArrayRef);
                date_index = Some(idx);
            } else {
                fields.push(
                    Field::new(&name, field.data_type().clone(), field.is_nullable())
                        .with_metadata(field.metadata().clone()),
                );
                columns.push(batch.column(idx).clone());
            }
        }

        let date_index = date_index.ok_or_else(|| {
            Error::Schema(format!(
                "date column '{}' not found in columns {:?}",
                self.date_column,
                seen.iter().collect::<Vec<_>>()
            ))
        })?;

        let schema = Schema::new_with_metadata(fields, schema.metadata().clone());
        let batch = RecordBatch::try_new(Arc::new(schema), columns)?;
        NormalizedTable::new(batch, date_index)
    }
}

fn canonical_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Parses a date-like column into calendar dates. Time of day is dropped; no
/// timezone shifting is done. Nulls and blank strings stay null.
pub fn parse_date_column(array: &ArrayRef, column: &str) -> Result<Date32Array> {
    match array.data_type() {
        DataType::Date32 => Ok(array.as_primitive::<Date32Type>().clone()),
        DataType::Date64 | DataType::Timestamp(_, _) => {
            let converted = cast(array, &DataType::Date32)?;
            Ok(converted.as_primitive::<Date32Type>().clone())
        }
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            let strings = cast(array, &DataType::Utf8)?;
            let strings = strings.as_string::<i32>();
            let mut dates = Vec::with_capacity(strings.len());
            for (row, value) in strings.iter().enumerate() {
                let value = value.map(str::trim).filter(|v| !v.is_empty());
                let parsed = match value {
                    None => None,
                    Some(text) => Some(parse_date(text).ok_or_else(|| {
                        Error::Schema(format!(
                            "column '{}' row {}: cannot parse '{}' as a date",
                            column, row, text
                        ))
                    })?),
                };
                dates.push(parsed.map(Date32Type::from_naive_date));
            }
            Ok(Date32Array::from(dates))
        }
        other => Err(Error::Schema(format!(
            "column '{}' has type {} which cannot hold dates",
            column, other
        ))),
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date);
    }
    for format in DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(text, format) {
            return Some(datetime.date());
        }
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        return Some(datetime.date_naive());
    }
    NaiveDate::parse_from_str(text, "%d/%m/%Y").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, StringArray, TimestampMillisecondArray};

    fn raw(columns: Vec<(&str, ArrayRef)>) -> RawTable {
        RawTable::new(RecordBatch::try_from_iter(columns).unwrap())
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_column_names_are_trimmed_and_lowercased() {
        let table = raw(vec![
            (" NOM_BACIA ", Arc::new(StringArray::from(vec!["Grande"])) as ArrayRef),
            ("Ena_Data", Arc::new(StringArray::from(vec!["2023-06-01"])) as ArrayRef),
        ]);
        let normalized = RecordNormalizer::new("ena_data").normalize(table).unwrap();
        let schema = normalized.batch().schema();
        assert_eq!(schema.field(0).name(), "nom_bacia");
        assert_eq!(schema.field(1).name(), "ena_data");
        assert_eq!(schema.field(1).data_type(), &DataType::Date32);
    }

    #[test]
    fn test_rename_table_applies_before_date_lookup() {
        let table = raw(vec![(
            "ENA_DATA",
            Arc::new(StringArray::from(vec!["2023-06-01"])) as ArrayRef,
        )]);
        let mut renames = BTreeMap::new();
        renames.insert("ena_data".to_string(), "measurement_date".to_string());

        let normalized = RecordNormalizer::new("measurement_date")
            .with_renames(&renames)
            .normalize(table)
            .unwrap();
        assert_eq!(normalized.date_column(), "measurement_date");
        assert_eq!(normalized.dates().value_as_date(0), Some(day("2023-06-01")));
    }

    #[test]
    fn test_missing_date_column_is_schema_error() {
        let table = raw(vec![(
            "val",
            Arc::new(Float64Array::from(vec![1.0])) as ArrayRef,
        )]);
        let err = RecordNormalizer::new("ena_data").normalize(table).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn test_unparseable_date_fails_whole_table() {
        let table = raw(vec![(
            "ena_data",
            Arc::new(StringArray::from(vec!["2023-06-01", "not a date"])) as ArrayRef,
        )]);
        let err = RecordNormalizer::new("ena_data").normalize(table).unwrap_err();
        assert!(matches!(err, Error::Schema(msg) if msg.contains("not a date")));
    }

    #[test]
    fn test_colliding_names_are_rejected() {
        let table = raw(vec![
            ("ena_data", Arc::new(StringArray::from(vec!["2023-06-01"])) as ArrayRef),
            ("ENA_DATA ", Arc::new(StringArray::from(vec!["2023-06-01"])) as ArrayRef),
        ]);
        let err = RecordNormalizer::new("ena_data").normalize(table).unwrap_err();
        assert!(matches!(err, Error::Schema(msg) if msg.contains("more than once")));
    }

    #[test]
    fn test_time_of_day_is_dropped() {
        let table = raw(vec![(
            "ena_data",
            Arc::new(StringArray::from(vec![
                Some("2023-06-01 23:59:59"),
                Some("2023-06-02T00:00:00.000"),
                Some("2023-06-03T10:00:00-03:00"),
                Some("04/06/2023"),
                Some(" "),
                None,
            ])) as ArrayRef,
        )]);
        let normalized = RecordNormalizer::new("ena_data").normalize(table).unwrap();
        let dates = normalized.dates();
        assert_eq!(dates.value_as_date(0), Some(day("2023-06-01")));
        assert_eq!(dates.value_as_date(1), Some(day("2023-06-02")));
        assert_eq!(dates.value_as_date(2), Some(day("2023-06-03")));
        assert_eq!(dates.value_as_date(3), Some(day("2023-06-04")));
        assert!(dates.is_null(4));
        assert!(dates.is_null(5));
    }

    #[test]
    fn test_timestamp_columns_become_dates() {
        // 2023-06-01T12:00:00Z
        let table = raw(vec![(
            "ena_data",
            Arc::new(TimestampMillisecondArray::from(vec![1_685_620_800_000])) as ArrayRef,
        )]);
        let normalized = RecordNormalizer::new("ena_data").normalize(table).unwrap();
        assert_eq!(normalized.dates().value_as_date(0), Some(day("2023-06-01")));
    }

    #[test]
    fn test_numeric_date_column_is_rejected() {
        let table = raw(vec![(
            "ena_data",
            Arc::new(Float64Array::from(vec![20230601.0])) as ArrayRef,
        )]);
        assert!(RecordNormalizer::new("ena_data").normalize(table).is_err());
    }
}
