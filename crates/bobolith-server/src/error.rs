//! RFC 9457 Problem Details error responses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::directory::PersistenceError;
use crate::routing::RoutingError;

const PROBLEM_JSON: &str = "application/problem+json";

/// RFC 9457 Problem Details response.
#[derive(Debug, Clone, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub error_type: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl ProblemDetails {
    fn new(kind: &str, title: &str, status: StatusCode, detail: Option<String>) -> Self {
        Self {
            error_type: format!("urn:bobolith:error:{}", kind),
            title: title.into(),
            status: status.as_u16(),
            detail,
            instance: None,
        }
    }

    /// Create a 404 Not Found error.
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new("not-found", "Not Found", StatusCode::NOT_FOUND, Some(detail.into()))
    }

    /// Create a 400 Bad Request error.
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(
            "bad-request",
            "Bad Request",
            StatusCode::BAD_REQUEST,
            Some(detail.into()),
        )
    }

    /// Create a 500 Internal Server Error.
    pub fn internal_error() -> Self {
        Self::new(
            "internal-error",
            "Internal Server Error",
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
        )
    }

    /// Create a 500 Internal Server Error with details.
    pub fn internal_error_with_detail(detail: impl Into<String>) -> Self {
        Self::new(
            "internal-error",
            "Internal Server Error",
            StatusCode::INTERNAL_SERVER_ERROR,
            Some(detail.into()),
        )
    }

    /// Create a 503 Service Unavailable error.
    pub fn service_unavailable(detail: impl Into<String>) -> Self {
        Self::new(
            "service-unavailable",
            "Service Unavailable",
            StatusCode::SERVICE_UNAVAILABLE,
            Some(detail.into()),
        )
    }

    /// Attach the request path the problem occurred on.
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }
}

impl IntoResponse for ProblemDetails {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = Json(&self).into_response();
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(PROBLEM_JSON));
        response
    }
}

impl From<PersistenceError> for ProblemDetails {
    fn from(err: PersistenceError) -> Self {
        tracing::error!(error = %err, "directory error");
        match err {
            PersistenceError::NotFound(id) => Self::not_found(format!("appliance {} not found", id)),
            PersistenceError::Database(_) => Self::service_unavailable("appliance directory unavailable"),
            PersistenceError::Corrupt(_) => Self::internal_error(),
        }
    }
}

impl From<RoutingError> for ProblemDetails {
    fn from(err: RoutingError) -> Self {
        match err {
            RoutingError::ApplianceNotFound(id) => {
                Self::not_found(format!("appliance {} not found", id))
            }
            RoutingError::UnknownHandler {
                appliance_id,
                behavior,
            } => Self::internal_error_with_detail(format!(
                "appliance {} is configured with unknown behavior '{}'",
                appliance_id, behavior
            )),
            RoutingError::Persistence(e) => {
                tracing::error!(error = %e, "directory error while routing");
                Self::service_unavailable("appliance directory unavailable")
            }
        }
    }
}
