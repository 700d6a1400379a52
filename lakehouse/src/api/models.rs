use serde::{Deserialize, Serialize};
use serde_json::Value;

// Request models
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub size: Option<i64>,
}

// Response models
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub status: String,
    pub message: String,
    pub total_records_saved: usize,
}

impl IngestResponse {
    pub fn success(total_records_saved: usize, skipped: usize) -> Self {
        let message = if skipped == 0 {
            "Ingestion process completed.".to_string()
        } else {
            format!("Ingestion process completed; {} resource(s) skipped.", skipped)
        };
        Self {
            status: "success".to_string(),
            message,
            total_records_saved,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// One page of fact rows joined with the dimension.
#[derive(Debug, Serialize, PartialEq)]
pub struct DataPage {
    pub total_records: u64,
    pub total_pages: u64,
    pub current_page: u64,
    pub page_size: usize,
    pub data: Vec<Value>,
}

impl DataPage {
    pub fn empty(current_page: u64) -> Self {
        Self {
            total_records: 0,
            total_pages: 0,
            current_page,
            page_size: 0,
            data: Vec::new(),
        }
    }
}
