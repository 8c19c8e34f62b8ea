//! Request routing for the API.
//!
//! Routes requests to the manager based on method and path.

use super::error::ApiError;
use super::response;
use bytes::Bytes;
use faasmem_core::Manager;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Size {
    Number(u64),
    Text(String),
}

impl Size {
    fn bytes(&self) -> Result<u64, ApiError> {
        match self {
            Size::Number(n) => Ok(*n),
            Size::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| ApiError::bad_request(format!("size `{s}` is not a byte count"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateRequest {
    name: String,
    size: Size,
}

#[derive(Debug, Deserialize)]
struct NameRequest {
    name: String,
}

/// Route an incoming request to the manager.
pub async fn route(
    req: Request<Incoming>,
    manager: Arc<Manager>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "cannot read request body");
            return Ok(ApiError::bad_request(format!("cannot read body: {e}")).into_response());
        }
    };

    Ok(dispatch(method, &path, body, &manager).await)
}

/// Serve one request whose body has already been read.
pub async fn dispatch(
    method: Method,
    path: &str,
    body: Bytes,
    manager: &Manager,
) -> Response<Full<Bytes>> {
    tracing::debug!(method = %method, path = %path, "Routing request");

    let result = match (method.clone(), path) {
        (Method::GET | Method::POST, "/ping") => Ok(response::json_response(
            hyper::StatusCode::OK,
            &serde_json::json!({ "ok": true }),
        )),
        (Method::POST, "/create") => create(&body, manager).await,
        (Method::POST, "/get") => get(&body, manager),
        (Method::POST, "/destroy") => destroy(&body, manager).await,
        (Method::GET, "/stats") => Ok(stats(manager).await),
        _ => Err(ApiError::bad_request(format!("no endpoint {method} {path}"))),
    };

    result.unwrap_or_else(|e| {
        tracing::warn!(path = %path, status = e.status.as_u16(), error = %e.message, "request failed");
        e.into_response()
    })
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("malformed request: {e}")))
}

async fn create(body: &[u8], manager: &Manager) -> Result<Response<Full<Bytes>>, ApiError> {
    let request: CreateRequest = parse(body)?;
    let size = request.size.bytes()?;
    let key = manager.create_shm(&request.name, size).await?;
    Ok(response::ok(serde_json::json!({ "key": key.to_string() })))
}

fn get(body: &[u8], manager: &Manager) -> Result<Response<Full<Bytes>>, ApiError> {
    let request: NameRequest = parse(body)?;
    let key = manager.get_shm(&request.name)?;
    Ok(response::ok(serde_json::json!({ "key": key.to_string() })))
}

async fn destroy(body: &[u8], manager: &Manager) -> Result<Response<Full<Bytes>>, ApiError> {
    let request: NameRequest = parse(body)?;
    manager.destroy_shm(&request.name).await?;
    Ok(response::ok(format!("DestroySHM {} Success", request.name)))
}

async fn stats(manager: &Manager) -> Response<Full<Bytes>> {
    let stats = manager.stats().await;
    let shared: Vec<_> = stats
        .pool
        .shared
        .iter()
        .map(|s| serde_json::json!({ "name": s.name, "remaining": s.remaining }))
        .collect();

    response::ok(serde_json::json!({
        "objects": stats.objects,
        "keys_held": stats.keys_held,
        "key_capacity": stats.key_capacity,
        "idle_queued": stats.pool.idle_queued,
        "idle_in_flight": stats.pool.idle_in_flight,
        "shared": shared,
    }))
}
