//! ensemble-api: HTTP surface for the orchestration core
//!
//! One endpoint routes a conversation through the supervisor and its
//! workers, either streaming the produced text or returning the full
//! message list with a tool trace. Built with axum.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;

pub use error::{ApiError, ErrorResponse, Result};
pub use server::{start_server, AppState};
