//! JSON response builders for the API.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Envelope every endpoint except `/ping` answers with
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub status: &'static str,
    pub message: T,
}

/// Build a JSON response with status code.
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|e| {
        serde_json::json!({
            "status": "Error",
            "message": format!("Serialization error: {}", e),
        })
        .to_string()
    });

    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

/// Build a 200 `{status: "OK", message}` response.
pub fn ok<T: Serialize>(message: T) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &Envelope {
            status: "OK",
            message,
        },
    )
}
