pub mod lakehouse;
pub mod query;
pub use lakehouse::LakehouseService;

use axum::{Json, http::StatusCode, response::IntoResponse};
use tracing::error;

use crate::api::models::ErrorResponse;

#[derive(Debug)]
pub struct AppError(pub common::Error);

impl AppError {
    pub fn bad_request(message: String) -> Self {
        AppError(common::Error::InvalidInput(message))
    }

    pub fn status_code(&self) -> StatusCode {
        match self.0 {
            common::Error::NoSourceData(_) => StatusCode::NOT_FOUND,
            common::Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status_code = self.status_code();
        if status_code.is_server_error() {
            error!(error = %self.0, "Request failed");
        }

        let body = Json(ErrorResponse {
            detail: self.0.to_string(),
        });
        (status_code, body).into_response()
    }
}

impl From<common::Error> for AppError {
    fn from(err: common::Error) -> Self {
        AppError(err)
    }
}
