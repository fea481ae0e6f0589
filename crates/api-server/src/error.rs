//! Error → HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_core::{ErrorKind, RelayError};
use serde::Serialize;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError(pub RelayError);

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        Self(e)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput
        | ErrorKind::BusinessRuleRejected
        | ErrorKind::AuthFailure
        | ErrorKind::UpstreamRejected => StatusCode::BAD_REQUEST,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::CatalogUnavailable
        | ErrorKind::IntegrationUnavailable
        | ErrorKind::Config
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        // Server-side failures never echo internal detail to the caller.
        let message = match kind {
            ErrorKind::CatalogUnavailable => "Product catalog is temporarily unavailable".to_string(),
            ErrorKind::IntegrationUnavailable | ErrorKind::Internal => {
                error!(error = %self.0, "Request failed");
                "Internal processing error".to_string()
            }
            ErrorKind::Config => {
                error!(error = %self.0, "Request hit missing configuration");
                "Service is missing required configuration".to_string()
            }
            ErrorKind::UpstreamRejected => match &self.0 {
                RelayError::UpstreamRejected(reason) => reason.clone(),
                other => other.to_string(),
            },
            _ => self.0.to_string(),
        };
        metrics::counter!("api.errors", "kind" => kind.as_str()).increment(1);

        (
            status,
            Json(ErrorResponse {
                error: kind.as_str().to_string(),
                message,
            }),
        )
            .into_response()
    }
}
