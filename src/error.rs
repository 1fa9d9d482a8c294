//! HTTP error responses.
//!
//! Every failure leaves the API as `{"error": "<message>", "code": "<CODE>"}`,
//! optionally with extra fields.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::error;

use crate::registry::RegistryError;
use crate::service::ServiceError;
use crate::store::StoreError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    /// Merged into the body next to `error` and `code`.
    pub extra: Option<Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            extra: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    #[must_use]
    pub fn with_extra(mut self, extra: Value) -> Self {
        self.extra = Some(extra);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "error": self.message, "code": self.code });
        if let (Some(Value::Object(extra)), Some(obj)) = (self.extra, body.as_object_mut()) {
            for (k, v) in extra {
                obj.entry(k).or_insert(v);
            }
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => Self::new(StatusCode::CONFLICT, "CONFLICT", msg),
            other => {
                error!("Registry store failure: {other}");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    other.to_string(),
                )
            }
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        let message = e.to_string();
        match e {
            RegistryError::Validation(_) => Self::bad_request(message),
            RegistryError::Duplicate(_) => Self::new(StatusCode::CONFLICT, "DUPLICATE", message),
            RegistryError::NotFound(_) => Self::not_found(message),
            RegistryError::InUse { count, .. } => {
                Self::new(StatusCode::CONFLICT, "SERVER_IN_USE", message)
                    .with_extra(json!({ "transits": count }))
            }
            RegistryError::Unreachable { source, .. } => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, source.code(), message)
            }
            RegistryError::Credential(_) => {
                error!("{message}");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CREDENTIAL_ERROR",
                    message,
                )
            }
            RegistryError::Store(store) => store.into(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        let status = match e {
            ServiceError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::Spawn(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::NotFound(_) | ServiceError::Failed { .. } => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, e.code(), e.to_string())
    }
}
