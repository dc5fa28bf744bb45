use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Field-keyed validation messages, rendered the way Laravel renders a failed
/// form request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, messages) in other.errors {
            self.errors.entry(field).or_default().extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    pub fn messages(&self, field: &str) -> &[String] {
        self.errors.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }

    /// Re-keys messages, e.g. from storage field names to form field names.
    pub fn renamed(self, rename: impl Fn(&str) -> &str) -> Self {
        let mut out = ValidationErrors::new();
        for (field, messages) in self.errors {
            let key = rename(field.as_str()).to_string();
            out.errors.entry(key).or_default().extend(messages);
        }
        out
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(TimetableError::Validation(self))
        }
    }
}

#[derive(Error, Debug)]
pub enum TimetableError {
    #[error("The given data was invalid.")]
    Validation(ValidationErrors),

    #[error("No {resource} found with id {id}")]
    NotFound { resource: &'static str, id: Uuid },

    /// An id in the URL that cannot name any record.
    #[error("No {resource} found with id {id}")]
    UnknownId { resource: &'static str, id: String },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TimetableError>;

impl TimetableError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(field, message);
        TimetableError::Validation(errors)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            TimetableError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            TimetableError::NotFound { .. } | TimetableError::UnknownId { .. } => {
                StatusCode::NOT_FOUND
            }
            TimetableError::Conflict(_) => StatusCode::CONFLICT,
            TimetableError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TimetableError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            TimetableError::Validation(errors) => serde_json::json!({
                "message": self.to_string(),
                "errors": errors.errors,
            }),
            _ if status.is_server_error() => {
                tracing::error!(error = %self, "request failed");
                serde_json::json!({ "message": "Server Error" })
            }
            _ => serde_json::json!({ "message": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
