//! Handler and advice traits
//!
//! Business logic plugs into the dispatcher as [`Handler`] implementations.
//! Cross-cutting behavior wraps invocation as an ordered list of [`Advice`]
//! decorators: `before` hooks run ahead of the handler, `after` hooks see
//! the assembled response parts.

use super::error::DispatchResult;
use super::operation::ResourceOperation;
use crate::codec::Payload;
use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use chrono::Utc;
use tracing::debug;

/// What a handler produced
#[derive(Debug)]
pub enum Outcome {
    /// A value to negotiate and encode
    Entity {
        /// The produced payload
        payload: Payload,
        /// Concrete media type of payloads that carry their own (stored
        /// representations); None for values the writer types itself
        native_type: Option<String>,
        /// Response status
        status: StatusCode,
    },
    /// Done, nothing to send
    NoContent,
    /// Send the client elsewhere
    Redirect {
        /// 302 or 303
        status: StatusCode,
        /// Target location
        location: String,
    },
}

/// Status and headers of a response being assembled
#[derive(Debug)]
pub struct ResponseParts {
    /// Response status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
}

impl ResponseParts {
    /// Parts with the given status and no headers yet
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }
}

/// Resource-specific business logic
#[async_trait]
pub trait Handler: Send + Sync {
    /// Check the operation before execution; the default accepts
    async fn verify(&self, _op: &ResourceOperation) -> DispatchResult<()> {
        Ok(())
    }

    /// Execute the operation
    async fn handle(&self, op: &mut ResourceOperation) -> DispatchResult<Outcome>;
}

/// A decorator around handler invocation
#[async_trait]
pub trait Advice: Send + Sync {
    /// Runs before the handler
    async fn before(&self, _op: &ResourceOperation) -> DispatchResult<()> {
        Ok(())
    }

    /// Runs after the handler, over the assembled response parts
    async fn after(
        &self,
        _op: &ResourceOperation,
        _parts: &mut ResponseParts,
    ) -> DispatchResult<()> {
        Ok(())
    }
}

/// Stamps the entry's declared Cache-Control onto the response
pub struct CacheControlAdvice;

#[async_trait]
impl Advice for CacheControlAdvice {
    async fn after(
        &self,
        op: &ResourceOperation,
        parts: &mut ResponseParts,
    ) -> DispatchResult<()> {
        if let Some(value) = op.entry().cache_control.as_deref() {
            if let Ok(value) = HeaderValue::from_str(value) {
                parts.headers.insert(header::CACHE_CONTROL, value);
            }
        }
        Ok(())
    }
}

/// Logs each completed invocation
pub struct AccessLogAdvice;

#[async_trait]
impl Advice for AccessLogAdvice {
    async fn after(
        &self,
        op: &ResourceOperation,
        parts: &mut ResponseParts,
    ) -> DispatchResult<()> {
        let elapsed_ms = (Utc::now() - op.exchange().received()).num_milliseconds();
        debug!(
            id = %op.exchange().id(),
            method = %op.exchange().method(),
            path = %op.exchange().path(),
            status = parts.status.as_u16(),
            elapsed_ms,
            "operation complete"
        );
        Ok(())
    }
}
