use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record in '{table}' is missing key attribute '{key}'")]
    MissingKey { table: String, key: String },

    #[error("Unknown table '{0}'")]
    UnknownTable(String),

    #[error("Malformed item in '{table}': {reason}")]
    Malformed { table: String, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Missing expected column '{0}'")]
    MissingColumn(&'static str),

    #[error("Unexpected column '{column}': question index {index} is outside 1..=30")]
    QuestionOutOfRange { column: String, index: u32 },

    #[error("Unexpected column '{column}': question Q{index} already mapped from '{first}'")]
    DuplicateQuestion {
        column: String,
        index: u32,
        first: String,
    },

    #[error("Missing expected column: no question columns (Q1..Q30) found")]
    NoQuestionColumns,

    #[error("Unsupported file '{0}': only .csv uploads are accepted")]
    UnsupportedFile(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum NarrativeError {
    #[error("Text generator request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Text generator returned status {0}")]
    Status(u16),

    #[error("Text generator response had no text")]
    EmptyResponse,

    #[error("Text generator is disabled")]
    Disabled,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal server error")]
    Internal(#[source] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(err.into())
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Store(inner) => ApiError::from(inner),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            tracing::error!(error = ?detail, "request failed");
        }
        let status = self.status();
        let body = Json(json!({ "success": false, "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
