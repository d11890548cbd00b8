//! HTTP envelope, error-to-status mapping, and the gateway auth context.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::pagination::PageMetadata;
use crate::{AppError, ErrorKind};

/// Response envelope shared by every JSON endpoint.
///
/// `kind` is set only on errors so RPC clients can map the failure back into
/// the taxonomy without sniffing status codes.
#[derive(Debug, Serialize)]
pub struct WebResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paging: Option<PageMetadata>,
}

impl<T: Serialize> WebResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            kind: None,
            paging: None,
        }
    }

    pub fn ok_paged(data: T, paging: PageMetadata) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            kind: None,
            paging: Some(paging),
        }
    }

    pub fn empty() -> WebResponse<()> {
        WebResponse {
            success: true,
            data: None,
            message: None,
            kind: None,
            paging: None,
        }
    }
}

/// HTTP status for an error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthorized | ErrorKind::UserSignedOut | ErrorKind::InvalidCredentials => {
            StatusCode::UNAUTHORIZED
        }
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::UserNotFound | ErrorKind::ResourceNotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidArgument | ErrorKind::MissingField | ErrorKind::ValidationFailed => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::External => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal | ErrorKind::CacheFailure | ErrorKind::DatabaseFailure => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = status_for(self.kind);
        if status.is_server_error() {
            tracing::error!(kind = %self.kind, message = %self.message, "request failed");
        } else {
            tracing::warn!(kind = %self.kind, message = %self.message, "request rejected");
        }

        let body = WebResponse::<()> {
            success: false,
            data: None,
            message: Some(self.message),
            kind: Some(self.kind.as_str()),
            paging: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Authenticated caller, as established by the identity gateway.
///
/// Token verification happens upstream; by the time a request reaches a
/// service the gateway has replaced the bearer token with an `x-user-id`
/// header. A request without it is unauthenticated.
#[derive(Debug, Clone, Copy)]
pub struct UserContext {
    pub user_id: Uuid,
}

impl<S: Send + Sync> FromRequestParts<S> for UserContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::new(ErrorKind::Unauthorized, "missing user identity"))?;

        let user_id = Uuid::parse_str(header)
            .map_err(|_| AppError::new(ErrorKind::Unauthorized, "malformed user identity"))?;

        Ok(UserContext { user_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(status_for(ErrorKind::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(ErrorKind::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::AlreadyExists), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::ResourceNotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(ErrorKind::InvalidArgument),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(ErrorKind::TooManyRequests),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(status_for(ErrorKind::External), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_for(ErrorKind::DatabaseFailure),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn error_envelope_shape() {
        let body = WebResponse::<()> {
            success: false,
            data: None,
            message: Some("Product is out of stock, please check again".into()),
            kind: Some(ErrorKind::InvalidArgument.as_str()),
            paging: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["message"].as_str().unwrap().contains("out of stock"));
        assert!(json.get("data").is_none());
    }
}
