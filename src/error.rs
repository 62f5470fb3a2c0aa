//! Error handler for signup.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use validator::ValidationErrors;

use crate::crypto::CryptoError;
use crate::database::DatabaseError;
use crate::storage::StorageError;

pub type Result<T> = std::result::Result<T, ServerError>;

const CLIENT_ERROR: &str = "Invalid registration";
const SERVER_ERROR: &str = "Server error";

/// Enum representing server-side errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("{0}")]
    Validation(#[from] ValidationErrors),

    #[error("error parsing form data: {0}")]
    ParsingForm(Box<dyn std::error::Error + Send + Sync>),

    #[error("request body is too large: {0}")]
    PayloadTooLarge(Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ServerError {
    /// Wrap a form parsing failure.
    pub fn parsing<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::ParsingForm(err.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            ServerError::Validation(_) | ServerError::ParsingForm(_) => {
                StatusCode::BAD_REQUEST
            },
            ServerError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Body returned on every failed request.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    #[serde(skip)]
    status: u16,
    message: String,
    error: String,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `message` field.
    pub fn message(mut self, message: &str) -> Self {
        self.message = message.into();
        self
    }

    /// Add underlying error text.
    pub fn error(mut self, description: &str) -> Self {
        self.error = description.into();
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(self) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            message: SERVER_ERROR.to_owned(),
            error: String::default(),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let response = ResponseError::default()
            .status(status)
            .error(&self.to_string());

        let response = if status.is_client_error() {
            tracing::debug!(error = %self, "rejected request");
            response.message(CLIENT_ERROR)
        } else {
            match &self {
                ServerError::Internal { details, source } => {
                    tracing::error!(err = ?source, %details, "server returned 500 status")
                },
                err => {
                    tracing::error!(error = %err, source = ?std::error::Error::source(err), "server returned 500 status")
                },
            }
            response
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "message": SERVER_ERROR,
                "error": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
