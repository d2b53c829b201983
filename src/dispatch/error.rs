//! Response error taxonomy
//!
//! Every failure in the pipeline converts into one of these before it
//! reaches the client, so the HTTP surface maps errors to status codes in
//! exactly one place.

use crate::codec::CodecError;
use crate::lock::LockError;
use crate::response::PipelineError;
use crate::store::StoreError;
use axum::http::{Method, StatusCode};
use thiserror::Error;

/// Typed response errors
#[derive(Error, Debug)]
pub enum ResponseError {
    /// No handler for this method on this resource
    #[error("Method not allowed")]
    MethodNotAllowed {
        /// Methods that do have handlers
        allow: Vec<Method>,
    },

    /// Negotiation found no acceptable writer
    #[error("No acceptable representation")]
    NotAcceptable,

    /// Malformed parameters or unreadable body
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A handler's verify step rejected the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// No resource at the requested path
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lock contention exhausted its retry budget
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A conditional header did not match the resource state
    #[error("Precondition failed")]
    PreconditionFailed,

    /// Anything unexpected
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type DispatchResult<T> = Result<T, ResponseError>;

impl ResponseError {
    /// The HTTP status this error surfaces as
    pub fn status(&self) -> StatusCode {
        match self {
            ResponseError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ResponseError::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            ResponseError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ResponseError::Forbidden(_) => StatusCode::FORBIDDEN,
            ResponseError::NotFound(_) => StatusCode::NOT_FOUND,
            ResponseError::Conflict(_) => StatusCode::CONFLICT,
            ResponseError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            ResponseError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ResponseError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(path) => ResponseError::NotFound(path),
            StoreError::InvalidAddress(msg) => ResponseError::BadRequest(msg),
            other => ResponseError::Internal(other.to_string()),
        }
    }
}

impl From<CodecError> for ResponseError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::NotAcceptable => ResponseError::NotAcceptable,
            CodecError::UnreadableBody(msg) | CodecError::Decode(msg) => {
                ResponseError::BadRequest(msg)
            }
            CodecError::Encode(msg) => ResponseError::Internal(msg),
        }
    }
}

impl From<LockError> for ResponseError {
    fn from(e: LockError) -> Self {
        ResponseError::Conflict(e.to_string())
    }
}

impl From<PipelineError> for ResponseError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Store(e) => e.into(),
            PipelineError::Encode(msg) => ResponseError::Internal(msg),
        }
    }
}
