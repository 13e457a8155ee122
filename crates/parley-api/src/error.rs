use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use parley_types::DeliveryError;
use parley_types::api::ErrorBody;

/// Everything a handler can fail with. Rendered as `{ "error": "..." }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("username already taken")]
    UsernameTaken,

    #[error("invalid username or password")]
    InvalidCredentials,
}

impl ApiError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Delivery(DeliveryError::invalid(reason))
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Delivery(DeliveryError::Unauthorized) | Self::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            Self::Delivery(DeliveryError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            Self::Delivery(DeliveryError::Forbidden) => StatusCode::FORBIDDEN,
            Self::Delivery(DeliveryError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Delivery(DeliveryError::Storage(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UsernameTaken => StatusCode::CONFLICT,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::Delivery(DeliveryError::Storage(e))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::invalid(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::invalid(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            Self::Delivery(DeliveryError::Storage(e)) => {
                error!("Request failed in storage: {:#}", e);
                "internal error".to_string()
            }
            Self::Delivery(e) => e.public_message(),
            other => other.to_string(),
        };
        (self.status(), Json(ErrorBody { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_delivery_errors_to_statuses() {
        let cases = [
            (ApiError::from(DeliveryError::Unauthorized), StatusCode::UNAUTHORIZED),
            (ApiError::invalid("bad"), StatusCode::BAD_REQUEST),
            (ApiError::from(DeliveryError::Forbidden), StatusCode::FORBIDDEN),
            (ApiError::from(DeliveryError::NotFound("message")), StatusCode::NOT_FOUND),
            (ApiError::from(anyhow::anyhow!("disk")), StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::UsernameTaken, StatusCode::CONFLICT),
            (ApiError::InvalidCredentials, StatusCode::UNAUTHORIZED),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
