//! Resource store abstraction
//!
//! The request pipeline consumes stores through the [`Store`] and
//! [`StoreTransaction`] traits: one transaction per HTTP exchange, begun
//! before the resource is resolved and finished (committed or rolled back)
//! exactly once. [`MemoryStore`] is the in-memory, triple-backed
//! implementation.

mod memory;

pub use memory::MemoryStore;

use crate::rdf::{NamedNode, Triple, TriplePattern};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Transaction already committed or rolled back
    #[error("Transaction already finished")]
    TransactionFinished,

    /// Invalid base IRI or resource path
    #[error("Invalid resource address: {0}")]
    InvalidAddress(String),

    /// Backend failure
    #[error("Store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Metadata of a stored resource
///
/// `modified` is truncated to whole seconds so it round-trips through the
/// HTTP `Last-Modified` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMeta {
    /// Store path (always with a leading slash)
    pub path: String,
    /// IRI the path resolves to under the store's base
    pub iri: NamedNode,
    /// Monotonic revision number, bumped on every committed mutation
    pub revision: u64,
    /// Media type of the stored representation
    pub media_type: String,
    /// Representation size in bytes
    pub length: u64,
    /// Last modification time, whole seconds
    pub modified: DateTime<Utc>,
}

/// Snapshot of store transaction counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    /// Transactions begun
    pub begun: u64,
    /// Transactions committed
    pub committed: u64,
    /// Transactions rolled back
    pub rolled_back: u64,
    /// Transactions currently open
    pub active: u64,
}

/// A store that can begin transactions
pub trait Store: Send + Sync {
    /// Begin a new transaction
    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    /// Snapshot of the transaction counters
    fn stats(&self) -> StoreStats;
}

/// One store transaction, bound to one HTTP exchange
///
/// Reads observe the transaction's own staged writes. Mutations stage until
/// `commit`; `rollback` discards them. Both finish the transaction; any call
/// after that fails with [`StoreError::TransactionFinished`].
pub trait StoreTransaction: Send + Sync {
    /// Look up a resource by exact path
    fn resolve(&self, path: &str) -> StoreResult<Option<ResourceMeta>>;

    /// Fetch a resource's metadata and content
    fn get(&self, path: &str) -> StoreResult<Option<(ResourceMeta, Bytes)>>;

    /// Create or replace a resource's representation
    fn put(&mut self, path: &str, media_type: &str, content: Bytes) -> StoreResult<ResourceMeta>;

    /// Append to an existing resource's representation
    fn append(&mut self, path: &str, content: Bytes) -> StoreResult<ResourceMeta>;

    /// Attach a free-text annotation to an existing resource
    fn annotate(&mut self, path: &str, note: &str) -> StoreResult<ResourceMeta>;

    /// Delete a resource
    fn delete(&mut self, path: &str) -> StoreResult<()>;

    /// RDF description of a resource
    fn describe(&self, path: &str) -> StoreResult<Vec<Triple>>;

    /// Pattern query over the committed description triples
    fn query(&self, pattern: &TriplePattern) -> StoreResult<Vec<Triple>>;

    /// Commit staged changes and finish the transaction
    fn commit(&mut self) -> StoreResult<()>;

    /// Discard staged changes and finish the transaction
    fn rollback(&mut self) -> StoreResult<()>;
}
