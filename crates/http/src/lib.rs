//! Tally HTTP client
//!
//! [`ApiClient`] is the single entry point for backend calls. It attaches the
//! session's access token to every request, refreshes it when it expires or
//! the backend rejects it, and tears the session down once it cannot be
//! recovered.

#[macro_use]
extern crate tracing;

pub mod client;
pub mod types;

pub use client::error::ClientError;
pub use client::request::{ApiRequest, ApiResponse};
pub use client::{ApiClient, ApiClientBuilder};
