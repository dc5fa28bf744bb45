//! Request extractors whose rejections render like every other API error.
//!
//! axum's own `Path`, `Json` and `Query` answer malformed input with plain
//! text 400/415 replies. These wrappers turn the same failures into
//! `TimetableError`, so clients always get the JSON error shape.

use crate::domain::Resource;
use crate::error::TimetableError;
use async_trait::async_trait;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Path, Query};
use axum::http::{request::Parts, Request};
use axum::Json;
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use tracing::debug;
use uuid::Uuid;

/// The `:id` segment of a `T` route. Anything that is not a UUID cannot
/// name a record, so it is a 404 for `T` rather than a bad request.
pub struct RecordId<T> {
    pub id: Uuid,
    resource: PhantomData<fn() -> T>,
}

#[async_trait]
impl<S, T> FromRequestParts<S> for RecordId<T>
where
    S: Send + Sync,
    T: Resource,
{
    type Rejection = TimetableError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let resource = T::TABLE.label();
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| TimetableError::UnknownId {
                resource,
                id: rejection.to_string(),
            })?;
        let id = Uuid::parse_str(&raw).map_err(|_| TimetableError::UnknownId {
            resource,
            id: raw.clone(),
        })?;
        Ok(Self {
            id,
            resource: PhantomData,
        })
    }
}

/// A JSON request body. Unreadable bodies fail validation on `payload`.
pub struct JsonBody(pub Value);

#[async_trait]
impl<S, B> FromRequest<S, B> for JsonBody
where
    Json<Value>: FromRequest<S, B, Rejection = JsonRejection>,
    S: Send + Sync,
    B: Send + 'static,
{
    type Rejection = TimetableError;

    async fn from_request(req: Request<B>, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<Value>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                debug!("Rejected request body: {}", rejection);
                let message = match rejection {
                    JsonRejection::MissingJsonContentType(_) => {
                        "The request body must be sent as application/json."
                    }
                    _ => "The request body must be a valid JSON document.",
                };
                Err(TimetableError::validation("payload", message))
            }
        }
    }
}

/// Raw query-string parameters.
pub struct QueryParams(pub HashMap<String, String>);

#[async_trait]
impl<S> FromRequestParts<S> for QueryParams
where
    S: Send + Sync,
{
    type Rejection = TimetableError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(params) = Query::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|rejection: QueryRejection| {
                TimetableError::validation("query", rejection.to_string())
            })?;
        Ok(Self(params))
    }
}

impl QueryParams {
    /// Optional UUID parameter; a malformed value fails validation on `key`.
    pub fn uuid(&self, key: &str) -> Result<Option<Uuid>, TimetableError> {
        self.0
            .get(key)
            .map(|raw| {
                Uuid::parse_str(raw.trim()).map_err(|_| {
                    TimetableError::validation(key, format!("The {key} must be a valid UUID."))
                })
            })
            .transpose()
    }
}
