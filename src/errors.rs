use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::gemini_client::ExtractionError;

/// Message shown when an uploaded roster yields no usable client.
pub const NO_VALID_DATA_MESSAGE: &str =
    "O arquivo CSV não contém dados válidos ou a coluna ID_Cliente não foi encontrada.";

/// Message shown when an extraction attempt fails and the user should re-capture.
pub const EXTRACTION_FAILED_MESSAGE: &str =
    "Falha ao processar imagem. Tente novamente garantindo que a foto esteja focada e legível.";

/// Application-specific error types.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// The request conflicts with the current step of the session.
    Conflict(String),
    /// An uploaded roster produced zero usable client records.
    NoValidData,
    /// Required configuration is missing (e.g. the model credential).
    Configuration(String),
    /// The remote extraction failed (transport, empty response, bad payload).
    ExtractionFailed(String),
    /// Internal server error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::NoValidData => write!(f, "{}", NO_VALID_DATA_MESSAGE),
            AppError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ExtractionFailed(msg) => write!(f, "Extraction failed: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Maps each error variant to an HTTP status code and a JSON body.
    ///
    /// Server-side conditions are logged in full; the client only sees a
    /// generic message for them.
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::NoValidData => (
                StatusCode::UNPROCESSABLE_ENTITY,
                NO_VALID_DATA_MESSAGE.to_string(),
            ),
            AppError::Configuration(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Service is not configured for extraction".to_string(),
                )
            }
            AppError::ExtractionFailed(msg) => {
                tracing::error!("Extraction error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    EXTRACTION_FAILED_MESSAGE.to_string(),
                )
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
                return (**source).clone().into_response();
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<ExtractionError> for AppError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::MissingCredential => AppError::Configuration(err.to_string()),
            ExtractionError::InvalidImage(msg) => AppError::BadRequest(msg),
            other => AppError::ExtractionFailed(other.to_string()),
        }
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<AppError>,
{
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e.into()),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e.into()),
            context: f(),
        })
    }
}
