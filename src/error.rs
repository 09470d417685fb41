use std::io;

use thiserror::Error;

use crate::http::response::StatusCode;

/// A failure that is answered with an HTTP error status.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("http error {status}")]
pub struct HttpError {
    pub status: StatusCode,
}

impl HttpError {
    pub fn new(status: StatusCode) -> Self {
        Self { status }
    }
}

impl From<StatusCode> for HttpError {
    fn from(status: StatusCode) -> Self {
        Self { status }
    }
}

impl From<io::Error> for HttpError {
    fn from(error: io::Error) -> Self {
        let status = match error.kind() {
            io::ErrorKind::NotFound => StatusCode::NOT_FOUND,
            io::ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status }
    }
}
