use std::time;

use record_common::error::StoreError;
use thiserror::Error;

/// Enumeration of errors returned when posting a rendered announcement.
#[derive(Error, Debug)]
pub enum NotifierError {
    #[error("error parsing webhook url")]
    ParseUrlError(#[from] url::ParseError),
    #[error("failed to build the HTTP client: {0}")]
    ClientError(reqwest::Error),
    #[error("webhook request failed: {0}")]
    RequestError(reqwest::Error),
    #[error("webhook responded with status {status}")]
    StatusError {
        status: http::StatusCode,
        retry_after: Option<time::Duration>,
    },
    #[error("webhook response did not carry a message id: {0}")]
    InvalidResponseError(reqwest::Error),
}

/// Enumeration of errors that end a delivery cycle.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("a database error occurred while delivering announcements: {0}")]
    StoreError(#[from] StoreError),
}
