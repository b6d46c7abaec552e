//! HTTP adapter over the cascade orchestrator.
//!
//! `cascade_router()` returns a `Router` that can be mounted on any axum
//! server; `start_server_on()` binds and serves it in the background.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

pub use router::cascade_router;
pub use server::{start_server_on, CascadeServer, ServerError, ServerSession};
pub use types::ApiContext;
