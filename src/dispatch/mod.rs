//! Operation dispatch
//!
//! `resolve` binds an exchange to a handler: it begins the transaction
//! envelope, resolves the addressed resource (longest prefix wins), matches
//! the registration table, and decodes the body parameter through the codec
//! registry. `invoke` executes the operation under the resource lock, runs
//! the advice chain, negotiates the response encoding, and hands the
//! envelope to the response pipeline.
//!
//! Failure taxonomy: no handler for the verb is 405 with an aggregated
//! Allow set; failed negotiation is 406 unless an alternate representation
//! can answer with a redirect; malformed parameters are 400; exhausted lock
//! retries are 409; anything else surfaces as 500.

mod content;
mod error;
mod handler;
mod operation;
mod table;

pub use content::{
    default_table, register_defaults, AnnotateResource, AppendContent, DeleteContent,
    DescribeResource, GetContent, PutContent, ResourceMetadata,
};
pub use error::{DispatchResult, ResponseError};
pub use handler::{AccessLogAdvice, Advice, CacheControlAdvice, Handler, Outcome, ResponseParts};
pub use operation::ResourceOperation;
pub use table::{AlternateRel, DispatchEntry, DispatchTable};

use crate::codec::{parse_accept, CodecError, CodecRegistry, EncodedBody};
use crate::lock::{LockManager, LockMode};
use crate::response::{ResponseEntity, StreamingPipeline};
use crate::server::{conditional, Exchange};
use crate::store::Store;
use crate::txn::TransactionEnvelope;
use axum::http::{header, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Headers clients may send on cross-origin requests
const ALLOWED_HEADERS: &str =
    "Content-Type, Accept, If-Match, If-None-Match, If-Modified-Since, If-Unmodified-Since";

/// What resolution produced
pub enum Resolution {
    /// A bound operation ready to invoke
    Operation(Box<ResourceOperation>),
    /// A response that needs no handler (OPTIONS)
    Immediate(ResponseParts),
}

enum Plan {
    NoContent,
    Redirect {
        status: StatusCode,
        location: String,
    },
    Entity {
        content_type: String,
        encoded: EncodedBody,
        status: StatusCode,
    },
}

/// Resolves exchanges to operations and executes them
pub struct OperationDispatcher {
    store: Arc<dyn Store>,
    registry: Arc<CodecRegistry>,
    locks: Arc<LockManager>,
    table: Arc<DispatchTable>,
    pipeline: StreamingPipeline,
}

impl OperationDispatcher {
    /// Assemble a dispatcher from its collaborators
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<CodecRegistry>,
        locks: Arc<LockManager>,
        table: Arc<DispatchTable>,
        pipeline: StreamingPipeline,
    ) -> Self {
        Self {
            store,
            registry,
            locks,
            table,
            pipeline,
        }
    }

    /// Bind an exchange to a handler, beginning its transaction
    pub fn resolve(&self, exchange: Exchange, body: Bytes) -> DispatchResult<Resolution> {
        let mut envelope = TransactionEnvelope::begin(self.store.as_ref(), exchange.is_safe())
            .map_err(ResponseError::from)?;

        if *exchange.method() == Method::OPTIONS {
            let parts = self.options_response(&exchange);
            if let Err(e) = envelope.finish(true, parts.status.as_u16()) {
                debug!(error = %e, "closing OPTIONS transaction failed");
            }
            return Ok(Resolution::Immediate(parts));
        }

        let entry = self
            .table
            .resolve(exchange.method(), exchange.selector(), exchange.path())
            .ok_or_else(|| ResponseError::MethodNotAllowed {
                allow: self.table.allowed_methods(exchange.path()),
            })?;

        let meta = if entry.exact_path {
            envelope
                .transaction()
                .map_err(ResponseError::from)?
                .resolve(exchange.path())
                .map_err(ResponseError::from)?
        } else {
            envelope.resolve(exchange.path()).map_err(ResponseError::from)?
        };
        if entry.requires_resource && meta.is_none() {
            return Err(ResponseError::NotFound(exchange.path().to_string()));
        }

        let payload = match entry.param_kind {
            Some(kind) => {
                let reader = self
                    .registry
                    .find_reader(kind, exchange.content_type())
                    .map_err(ResponseError::from)?;
                Some(reader.decode(body).map_err(ResponseError::from)?)
            }
            None => None,
        };

        debug!(
            id = %exchange.id(),
            path = %exchange.path(),
            selector = ?exchange.selector(),
            resolved = ?meta.as_ref().map(|m| m.path.as_str()),
            "operation resolved"
        );
        Ok(Resolution::Operation(Box::new(ResourceOperation::new(
            exchange, entry, envelope, meta, payload,
        ))))
    }

    /// Execute a resolved operation and decide response delivery
    ///
    /// The resource lock and the envelope release through drops on every
    /// error path; explicit finishing happens only on the success paths,
    /// where the commit/rollback decision is made.
    pub async fn invoke(
        &self,
        mut op: ResourceOperation,
    ) -> DispatchResult<(ResponseParts, ResponseEntity)> {
        let lock_path = op.lock_path().to_string();
        let _lock = if op.exchange().is_safe() {
            self.locks.lock(&lock_path, LockMode::Shared).await
        } else {
            self.locks
                .lock_with_retry(&lock_path, LockMode::Exclusive)
                .await?
        };

        for advice in self.table.advice() {
            advice.before(&op).await?;
        }
        let handler = op.handler();
        handler.verify(&op).await?;
        let outcome = handler.handle(&mut op).await?;

        let plan = match outcome {
            Outcome::NoContent => Plan::NoContent,
            Outcome::Redirect { status, location } => Plan::Redirect { status, location },
            Outcome::Entity {
                payload,
                native_type,
                status,
            } => {
                let accept = parse_accept(op.exchange().header(header::ACCEPT));
                match self
                    .registry
                    .find_writer(payload.kind(), native_type.as_deref(), &accept)
                {
                    Ok(negotiated) => {
                        let content_type = negotiated.content_type.clone();
                        let encoded = negotiated
                            .writer
                            .encode(&payload)
                            .map_err(ResponseError::from)?;
                        Plan::Entity {
                            content_type,
                            encoded,
                            status,
                        }
                    }
                    Err(CodecError::NotAcceptable) => match self.alternate_redirect(&op) {
                        Some(location) => Plan::Redirect {
                            status: StatusCode::SEE_OTHER,
                            location,
                        },
                        None => return Err(ResponseError::NotAcceptable),
                    },
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let status = match &plan {
            Plan::NoContent => StatusCode::NO_CONTENT,
            Plan::Redirect { status, .. } => *status,
            Plan::Entity { status, .. } => *status,
        };

        let mut parts = ResponseParts::new(status);
        if let Some(meta) = op.meta() {
            if let Ok(value) = HeaderValue::from_str(&conditional::etag_value(meta)) {
                parts.headers.insert(header::ETAG, value);
            }
            if let Ok(value) = HeaderValue::from_str(&conditional::http_date(&meta.modified)) {
                parts.headers.insert(header::LAST_MODIFIED, value);
            }
        }
        for advice in self.table.advice() {
            advice.after(&op, &mut parts).await?;
        }

        let head = *op.exchange().method() == Method::HEAD;
        let (_exchange, _entry, mut envelope, _meta) = op.into_delivery();

        let entity = match plan {
            Plan::NoContent => {
                envelope
                    .finish(true, status.as_u16())
                    .map_err(ResponseError::from)?;
                ResponseEntity::NoContent
            }
            Plan::Redirect { status, location } => {
                envelope
                    .finish(true, status.as_u16())
                    .map_err(ResponseError::from)?;
                ResponseEntity::Redirect {
                    status: status.as_u16(),
                    location,
                }
            }
            Plan::Entity {
                content_type,
                encoded,
                status,
            } => {
                if head {
                    // Headers only; no body machinery for HEAD
                    envelope
                        .finish(true, status.as_u16())
                        .map_err(ResponseError::from)?;
                    ResponseEntity::Buffered {
                        content_type,
                        body: Bytes::new(),
                    }
                } else {
                    self.pipeline
                        .deliver(content_type, encoded, envelope, true, status.as_u16())
                        .await
                        .map_err(ResponseError::from)?
                }
            }
        };
        Ok((parts, entity))
    }

    fn options_response(&self, exchange: &Exchange) -> ResponseParts {
        let allow = self.table.allowed_methods(exchange.path());
        let joined = allow
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let mut parts = ResponseParts::new(StatusCode::NO_CONTENT);
        if let Ok(value) = HeaderValue::from_str(&joined) {
            parts.headers.insert(header::ALLOW, value.clone());
            parts
                .headers
                .insert(header::ACCESS_CONTROL_ALLOW_METHODS, value);
        }
        parts.headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        );
        parts
    }

    /// Location of the first alternate representation, for failed GET/HEAD
    /// negotiation without an explicit operation
    fn alternate_redirect(&self, op: &ResourceOperation) -> Option<String> {
        if !op.exchange().is_safe() || op.exchange().selector().is_some() {
            return None;
        }
        let entry = self.table.alternates().into_iter().next()?;
        let selector = entry.selector.clone()?;
        Some(format!("{}?{}", op.exchange().path(), selector))
    }
}
