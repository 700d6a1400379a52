//! In-memory fakes for exercising the pipeline without network access.

use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use bytes::Bytes;
use common::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use url::Url;

use crate::catalog::package_url;
use crate::source::SourceClient;
use crate::table::encode_parquet;

pub const CATALOG_URL: &str = "https://catalog.test/api/3/action/package_show";

/// Serves canned payloads by URL and records every fetch.
#[derive(Default)]
pub struct MemorySource {
    payloads: Mutex<HashMap<String, Bytes>>,
    calls: Mutex<Vec<String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, payload: Bytes) {
        self.payloads.lock().unwrap().insert(url.to_string(), payload);
    }

    pub fn serve_catalog(&self, dataset_id: &str, envelope: Bytes) {
        let base = Url::parse(CATALOG_URL).unwrap();
        self.serve(package_url(&base, dataset_id).as_str(), envelope);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SourceClient for MemorySource {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        self.calls.lock().unwrap().push(url.to_string());
        self.payloads
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::SourceUnavailable(format!("404 Not Found for {}", url)))
    }
}

/// Catalog envelope with `success: true` listing `(name, format, url)` entries.
pub fn catalog_json(resources: &[(&str, &str, &str)]) -> Bytes {
    let resources: Vec<serde_json::Value> = resources
        .iter()
        .map(|(name, format, url)| {
            serde_json::json!({ "name": name, "format": format, "url": url })
        })
        .collect();
    let envelope = serde_json::json!({
        "success": true,
        "result": { "resources": resources }
    });
    Bytes::from(serde_json::to_vec(&envelope).unwrap())
}

/// Parquet payload with one measurement row per entry of `dates`.
pub fn measurements_parquet(date_column: &str, dates: &[&str]) -> Bytes {
    let basins: Vec<&str> = dates
        .iter()
        .enumerate()
        .map(|(i, _)| if i % 2 == 0 { "GRANDE" } else { "PARANAIBA" })
        .collect();
    let values: Vec<f64> = (0..dates.len()).map(|i| 100.0 + i as f64).collect();

    let batch = RecordBatch::try_from_iter(vec![
        ("NOM_BACIA", Arc::new(StringArray::from(basins)) as ArrayRef),
        (date_column, Arc::new(StringArray::from(dates.to_vec())) as ArrayRef),
        ("ENA_BRUTA_BACIA_MWMED", Arc::new(Float64Array::from(values)) as ArrayRef),
    ])
    .unwrap();
    Bytes::from(encode_parquet(&batch).unwrap())
}

/// Small reservoir reference table.
pub fn reservoirs_parquet() -> Bytes {
    let batch = RecordBatch::try_from_iter(vec![
        (
            "id_reservatorio",
            Arc::new(StringArray::from(vec!["FURNAS", "EMBORCACAO"])) as ArrayRef,
        ),
        (
            "nom_reservatorio",
            Arc::new(StringArray::from(vec!["Furnas", "Emborcação"])) as ArrayRef,
        ),
        (
            "nom_bacia",
            Arc::new(StringArray::from(vec!["GRANDE", "PARANAIBA"])) as ArrayRef,
        ),
    ])
    .unwrap();
    Bytes::from(encode_parquet(&batch).unwrap())
}
