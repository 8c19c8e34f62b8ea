//! HTTP front end over a [`faasmem_core::Manager`].
//!
//! | Method     | Path       | Body             | Answer                                   |
//! |------------|------------|------------------|------------------------------------------|
//! | GET, POST  | `/ping`    |                  | `{"ok": true}`                           |
//! | POST       | `/create`  | `{name, size}`   | `{status: "OK", message: {key}}`         |
//! | POST       | `/get`     | `{name}`         | `{status: "OK", message: {key}}`         |
//! | POST       | `/destroy` | `{name}`         | `{status: "OK", message: "DestroySHM …"}` |
//! | GET        | `/stats`   |                  | occupancy snapshot                       |
//!
//! Keys are rendered as decimal strings. Errors answer
//! `{status: "Error", message}` with 400 for malformed requests and 502 for
//! failures inside the manager.

mod error;
mod response;
pub mod router;
mod server;

pub use server::{ApiServer, ServerConfig};
