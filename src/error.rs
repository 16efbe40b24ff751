//! Crate-level error type and its HTTP rendering.

use thiserror::Error;

use crate::{
    api::ServiceError,
    cache::{CacheError, StoreError},
    config::ConfigError,
    formats::FormatError,
    http::{Response, StatusCode, headers::names},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Self::Cache(CacheError::Store(err))
    }
}

impl Error {
    /// Status code the error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Config(_) => StatusCode::InternalServerError,
            Self::Cache(CacheError::Range(_)) => StatusCode::RangeNotSatisfiable,
            Self::Cache(CacheError::Store(_)) => StatusCode::ServiceUnavailable,
            Self::Cache(CacheError::Compression(_)) => StatusCode::InternalServerError,
            Self::Format(FormatError::Unsupported { .. }) => StatusCode::UnsupportedMediaType,
            Self::Format(_) => StatusCode::InternalServerError,
            Self::Service(err) => err.status(),
        }
    }

    /// Plain-text response carrying the status and message.
    pub fn into_response(self) -> Response {
        Response::new(self.status())
            .content_type("text/plain; charset=utf-8")
            .header(names::CACHE_CONTROL, "no-store")
            .body(self.to_string())
    }
}
