//! Sutra Object Server
//!
//! An object-to-RDF mapping layer atop a triple-backed resource store,
//! exposed through an HTTP server that turns stored resources into
//! REST-like endpoints with content negotiation, optimistic concurrency,
//! and transactional request handling.
//!
//! # Architecture
//!
//! Each inbound request becomes one [`server::Exchange`] bound to one store
//! transaction, carried by a [`txn::TransactionEnvelope`] through the whole
//! pipeline:
//!
//! - [`dispatch`] resolves the addressed resource (longest path prefix
//!   wins) and the handler entry in an explicit registration table, then
//!   invokes it under a per-resource lock with an advice chain around it.
//! - [`codec`] negotiates request decoding and response encoding against a
//!   registry frozen at startup; the most specific compatible codec wins,
//!   registration order breaks ties.
//! - [`lock`] serializes writers per resource path with bounded retries,
//!   surfacing exhausted contention as a conflict instead of blocking.
//! - [`response`] buffers small results (closing the transaction before the
//!   response leaves) and streams everything else, closing the transaction
//!   only when the stream is drained or aborted.
//! - [`store`] and [`rdf`] hold the resources themselves plus the triple
//!   descriptions the `?describe` operation serves.
//!
//! # Example
//!
//! ```rust
//! use sutra::codec::{parse_accept, CodecRegistry, PayloadKind};
//!
//! let registry = CodecRegistry::with_defaults();
//! let accept = parse_accept(Some("text/turtle"));
//! let negotiated = registry
//!     .find_writer(PayloadKind::Graph, None, &accept)
//!     .unwrap();
//! assert_eq!(negotiated.content_type, "text/turtle");
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod lock;
pub mod rdf;
pub mod response;
pub mod server;
pub mod store;
pub mod txn;

// Re-export main types for convenience
pub use codec::{CodecError, CodecRegistry, MediaRange, Payload, PayloadKind};

pub use config::ServerConfig;

pub use dispatch::{
    default_table, Advice, DispatchEntry, DispatchTable, Handler, OperationDispatcher, Outcome,
    ResourceOperation, ResponseError,
};

pub use lock::{LockManager, LockMode, LockStats};

pub use rdf::{Literal, NamedNode, Term, Triple, TripleStore};

pub use response::{ResponseEntity, StreamingPipeline};

pub use server::{Exchange, ObjectServer};

pub use store::{MemoryStore, ResourceMeta, Store, StoreError, StoreStats, StoreTransaction};

pub use txn::{TransactionEnvelope, TxnOutcome, TxnState};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}
