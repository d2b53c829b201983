//! Transaction envelope: one store transaction per HTTP exchange
//!
//! The envelope owns the store transaction for the lifetime of an operation
//! and drives the state machine `Began -> {Committed | RolledBack} ->
//! Closed`. A safe method never commits; an unsafe one commits only when
//! the handler succeeded with a non-error status. Dropping an envelope that
//! is still open rolls the transaction back, which is what unwinds client
//! disconnects and error paths.

use crate::store::{ResourceMeta, Store, StoreError, StoreResult, StoreTransaction};
use tracing::{debug, error};

/// Envelope states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Transaction running
    Began,
    /// Commit succeeded
    Committed,
    /// Rolled back
    RolledBack,
    /// Store connection released
    Closed,
}

/// How the envelope finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOutcome {
    /// Changes were committed
    Committed,
    /// Changes were discarded
    RolledBack,
}

/// Wraps one HTTP exchange in one store transaction
pub struct TransactionEnvelope {
    txn: Option<Box<dyn StoreTransaction>>,
    state: TxnState,
    outcome: Option<TxnOutcome>,
    safe: bool,
}

impl TransactionEnvelope {
    /// Begin a transaction for an exchange; `safe` marks methods that must
    /// never commit
    pub fn begin(store: &dyn Store, safe: bool) -> StoreResult<Self> {
        let txn = store.begin()?;
        Ok(Self {
            txn: Some(txn),
            state: TxnState::Began,
            outcome: None,
            safe,
        })
    }

    /// Current state
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Whether this envelope belongs to a safe method
    pub fn is_safe(&self) -> bool {
        self.safe
    }

    /// How the envelope finished, if it has
    pub fn outcome(&self) -> Option<TxnOutcome> {
        self.outcome
    }

    /// Access the open transaction
    pub fn transaction(&mut self) -> StoreResult<&mut (dyn StoreTransaction + 'static)> {
        if self.state != TxnState::Began {
            return Err(StoreError::TransactionFinished);
        }
        self.txn
            .as_deref_mut()
            .ok_or(StoreError::TransactionFinished)
    }

    /// Resolve a resource by longest matching path prefix
    ///
    /// Tries the full path, then successively shorter `/`-prefixes down to
    /// the root, so a sub-resource URL addresses its closest stored parent.
    pub fn resolve(&self, path: &str) -> StoreResult<Option<ResourceMeta>> {
        if self.state != TxnState::Began {
            return Err(StoreError::TransactionFinished);
        }
        let txn = self
            .txn
            .as_deref()
            .ok_or(StoreError::TransactionFinished)?;
        for candidate in prefix_candidates(path) {
            if let Some(meta) = txn.resolve(&candidate)? {
                return Ok(Some(meta));
            }
        }
        Ok(None)
    }

    /// Commit or roll back per the safety/success/status rules, then close
    ///
    /// Commit failures surface as errors; rollback failures are logged and
    /// never mask the in-flight result. Finishing twice is a no-op.
    pub fn finish(&mut self, success: bool, status: u16) -> StoreResult<()> {
        if self.state != TxnState::Began {
            return Ok(());
        }
        let Some(mut txn) = self.txn.take() else {
            self.state = TxnState::Closed;
            return Ok(());
        };

        let result = if !self.safe && success && status < 400 {
            match txn.commit() {
                Ok(()) => {
                    self.record(TxnOutcome::Committed);
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, "commit failed");
                    if let Err(rb) = txn.rollback() {
                        debug!(error = %rb, "rollback after failed commit also failed");
                    }
                    self.record(TxnOutcome::RolledBack);
                    Err(e)
                }
            }
        } else {
            if let Err(e) = txn.rollback() {
                error!(error = %e, "rollback failed");
            }
            self.record(TxnOutcome::RolledBack);
            Ok(())
        };

        self.state = TxnState::Closed;
        result
    }

    fn record(&mut self, outcome: TxnOutcome) {
        self.outcome = Some(outcome);
        self.state = match outcome {
            TxnOutcome::Committed => TxnState::Committed,
            TxnOutcome::RolledBack => TxnState::RolledBack,
        };
    }
}

impl Drop for TransactionEnvelope {
    fn drop(&mut self) {
        if self.state == TxnState::Began {
            debug!("envelope dropped while open; rolling back");
            if let Some(mut txn) = self.txn.take() {
                if let Err(e) = txn.rollback() {
                    error!(error = %e, "rollback on drop failed");
                }
            }
            self.record(TxnOutcome::RolledBack);
            self.state = TxnState::Closed;
        }
    }
}

fn prefix_candidates(path: &str) -> Vec<String> {
    let normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    let mut candidates = vec![normalized.clone()];
    let mut current = normalized.as_str();
    while let Some(idx) = current.rfind('/') {
        if idx == 0 {
            if current != "/" {
                candidates.push("/".to_string());
            }
            break;
        }
        current = &current[..idx];
        candidates.push(current.to_string());
    }
    candidates
}
