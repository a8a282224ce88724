use axum::http::{ header, HeaderValue, StatusCode };
use axum::response::{ IntoResponse, Response };
use thiserror::Error;

use crate::models::stream::{ ErrorCode, ERROR_CODE_HEADER };

/// Every non-streaming failure the gateway answers with. The display text is the plain-text
/// response body; the structured code travels in the `X-Chat-Error` header.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Invalid or expired chat token.")]
    CredentialInvalid,
    #[error("Rate limit exceeded. Please try again later.")]
    ClientThrottled,
    #[error("Service momentarily unavailable due to high traffic.")]
    ServiceThrottled,
    #[error("{0}")]
    BadRequest(String),
    #[error("Chat is temporarily unavailable.")]
    Unavailable,
    #[error("Server is busy.")]
    Busy,
    #[error("Human verification failed.")]
    VerificationFailed,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::CredentialInvalid => StatusCode::UNAUTHORIZED,
            GatewayError::ClientThrottled | GatewayError::ServiceThrottled => {
                StatusCode::TOO_MANY_REQUESTS
            }
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unavailable | GatewayError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::VerificationFailed => StatusCode::FORBIDDEN,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::CredentialInvalid => ErrorCode::CredentialInvalid,
            GatewayError::ClientThrottled => ErrorCode::ClientThrottled,
            GatewayError::ServiceThrottled => ErrorCode::ServiceThrottled,
            GatewayError::BadRequest(_) => ErrorCode::BadRequest,
            GatewayError::Unavailable | GatewayError::Busy => ErrorCode::Unavailable,
            GatewayError::VerificationFailed => ErrorCode::VerificationFailed,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), self.to_string()).into_response();
        let headers = response.headers_mut();
        headers.insert(ERROR_CODE_HEADER, HeaderValue::from_static(self.code().as_str()));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        response
    }
}
