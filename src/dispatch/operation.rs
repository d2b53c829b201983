//! Resolved resource operations

use super::error::{DispatchResult, ResponseError};
use super::table::DispatchEntry;
use crate::codec::Payload;
use crate::server::Exchange;
use crate::store::{ResourceMeta, StoreTransaction};
use crate::txn::TransactionEnvelope;
use std::sync::Arc;
use tracing::debug;

/// The resolved binding of an exchange to a dispatch entry
///
/// Immutable once built, apart from the resource metadata handlers refresh
/// after a mutation. Owns the transaction envelope for its lifetime; the
/// dispatcher takes the envelope back when it decides response delivery.
pub struct ResourceOperation {
    exchange: Exchange,
    entry: Arc<DispatchEntry>,
    envelope: TransactionEnvelope,
    meta: Option<ResourceMeta>,
    body: Option<Payload>,
}

impl ResourceOperation {
    pub(crate) fn new(
        exchange: Exchange,
        entry: Arc<DispatchEntry>,
        envelope: TransactionEnvelope,
        meta: Option<ResourceMeta>,
        body: Option<Payload>,
    ) -> Self {
        Self {
            exchange,
            entry,
            envelope,
            meta,
            body,
        }
    }

    /// The bound exchange
    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }

    /// The matched dispatch entry
    pub fn entry(&self) -> &DispatchEntry {
        &self.entry
    }

    /// The matched entry's handler
    pub(crate) fn handler(&self) -> Arc<dyn super::handler::Handler> {
        Arc::clone(&self.entry.handler)
    }

    /// Metadata of the resolved resource, when one exists
    pub fn meta(&self) -> Option<&ResourceMeta> {
        self.meta.as_ref()
    }

    /// Record fresh metadata after a mutation
    pub fn set_meta(&mut self, meta: ResourceMeta) {
        self.meta = Some(meta);
    }

    /// Forget the resolved resource (after deletion)
    pub fn clear_meta(&mut self) {
        self.meta = None;
    }

    /// The decoded body parameter, when the entry declared one
    pub fn body(&self) -> Option<&Payload> {
        self.body.as_ref()
    }

    /// Take ownership of the decoded body parameter
    pub fn take_body(&mut self) -> Option<Payload> {
        self.body.take()
    }

    /// The path store operations should target: the resolved resource for
    /// prefix-addressed entries, the literal request path otherwise
    pub fn target_path(&self) -> &str {
        if self.entry.exact_path {
            self.exchange.path()
        } else {
            self.meta
                .as_ref()
                .map(|m| m.path.as_str())
                .unwrap_or_else(|| self.exchange.path())
        }
    }

    /// The path the resource lock is keyed by
    pub fn lock_path(&self) -> &str {
        self.target_path()
    }

    /// The open store transaction
    pub fn transaction(&mut self) -> DispatchResult<&mut (dyn StoreTransaction + 'static)> {
        self.envelope.transaction().map_err(ResponseError::from)
    }

    /// Finish early without invoking the handler (precondition responses);
    /// the transaction rolls back
    pub fn finish_early(mut self, status: u16) {
        if let Err(e) = self.envelope.finish(false, status) {
            debug!(error = %e, "early finish failed");
        }
    }

    /// Split into the pieces delivery needs, handing the envelope back
    pub(crate) fn into_delivery(
        self,
    ) -> (Exchange, Arc<DispatchEntry>, TransactionEnvelope, Option<ResourceMeta>) {
        (self.exchange, self.entry, self.envelope, self.meta)
    }
}
