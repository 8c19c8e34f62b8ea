//! API error type and manager error → HTTP status mapping.

use super::response::{json_response, Envelope};
use bytes::Bytes;
use faasmem_core::ErrorKind;
use http_body_util::Full;
use hyper::{Response, StatusCode};

/// Error answered as `{status: "Error", message}`.
#[derive(Debug)]
pub struct ApiError {
    pub message: String,
    pub status: StatusCode,
}

impl ApiError {
    pub fn new(message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }

    /// Malformed request or unknown path.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::BAD_REQUEST)
    }

    /// The manager, or the platform behind it, could not serve the request.
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(message, StatusCode::BAD_GATEWAY)
    }

    /// Convert to HTTP response.
    pub fn into_response(self) -> Response<Full<Bytes>> {
        json_response(
            self.status,
            &Envelope {
                status: "Error",
                message: self.message,
            },
        )
    }
}

impl From<faasmem_core::Error> for ApiError {
    fn from(err: faasmem_core::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidInput => Self::bad_request(err.to_string()),
            _ => Self::bad_gateway(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_errors_are_bad_gateway() {
        let err = ApiError::from(faasmem_core::Error::NotFound("a".into()));
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert!(err.message.contains("`a`"));

        let err = ApiError::from(faasmem_core::Error::Exhausted("keys".into()));
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_invalid_request_is_bad_request() {
        let err = ApiError::from(faasmem_core::Error::InvalidRequest("empty".into()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
