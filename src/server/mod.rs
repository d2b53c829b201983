//! HTTP surface of the object server
//!
//! Binds inbound requests to [`Exchange`]s, evaluates conditional headers,
//! and runs the dispatch pipeline behind an axum router with a bounded
//! in-flight admission gate.

pub mod conditional;
mod exchange;
mod http;

pub use exchange::{is_safe_method, Exchange};
pub use http::ObjectServer;
