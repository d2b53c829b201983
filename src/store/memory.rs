//! In-memory, triple-backed store implementation

use super::{ResourceMeta, Store, StoreError, StoreResult, StoreStats, StoreTransaction};
use crate::rdf::{vocab, Literal, NamedNode, Term, Triple, TriplePattern, TripleStore};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use oxiri::Iri;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A stored resource: metadata, representation bytes, and annotations
#[derive(Debug, Clone)]
struct StoredResource {
    meta: ResourceMeta,
    content: Bytes,
    notes: Vec<String>,
}

/// Committed state: resource table plus the description triples derived
/// from it
#[derive(Debug, Default)]
struct StoreInner {
    resources: HashMap<String, StoredResource>,
    triples: TripleStore,
    next_revision: u64,
}

#[derive(Debug, Default)]
struct StoreCounters {
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    active: AtomicI64,
}

/// In-memory store
///
/// Committed state lives behind one mutex; transactions stage their writes
/// locally and apply them in a single critical section at commit, so
/// concurrent transactions on independent resources never observe partial
/// writes. Higher-level write serialization per resource is the lock
/// manager's job, not the store's.
pub struct MemoryStore {
    base: Iri<String>,
    inner: Arc<Mutex<StoreInner>>,
    counters: Arc<StoreCounters>,
}

impl MemoryStore {
    /// Create a store resolving resource paths against the given base IRI
    pub fn new(base_iri: &str) -> StoreResult<Self> {
        let base = Iri::parse(base_iri.to_string())
            .map_err(|e| StoreError::InvalidAddress(format!("{}: {}", base_iri, e)))?;
        Ok(Self {
            base,
            inner: Arc::new(Mutex::new(StoreInner::default())),
            counters: Arc::new(StoreCounters::default()),
        })
    }
}

impl Store for MemoryStore {
    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        self.counters.begun.fetch_add(1, Ordering::Relaxed);
        self.counters.active.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryTransaction {
            base: self.base.clone(),
            inner: Arc::clone(&self.inner),
            counters: Arc::clone(&self.counters),
            staged: Vec::new(),
            finished: false,
        }))
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            begun: self.counters.begun.load(Ordering::Relaxed),
            committed: self.counters.committed.load(Ordering::Relaxed),
            rolled_back: self.counters.rolled_back.load(Ordering::Relaxed),
            active: self.counters.active.load(Ordering::Relaxed).max(0) as u64,
        }
    }
}

/// A staged change, applied at commit in order
#[derive(Debug)]
enum Change {
    Put(StoredResource),
    Delete(String),
}

/// Transaction over [`MemoryStore`]
pub struct MemoryTransaction {
    base: Iri<String>,
    inner: Arc<Mutex<StoreInner>>,
    counters: Arc<StoreCounters>,
    staged: Vec<Change>,
    finished: bool,
}

impl MemoryTransaction {
    fn check_open(&self) -> StoreResult<()> {
        if self.finished {
            return Err(StoreError::TransactionFinished);
        }
        Ok(())
    }

    fn lock_inner(&self) -> StoreResult<std::sync::MutexGuard<'_, StoreInner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("store mutex poisoned".to_string()))
    }

    fn resource_iri(&self, path: &str) -> StoreResult<NamedNode> {
        let resolved = self
            .base
            .resolve(path)
            .map_err(|e| StoreError::InvalidAddress(format!("{}: {}", path, e)))?;
        NamedNode::new(resolved.as_str())
            .map_err(|e| StoreError::InvalidAddress(e.to_string()))
    }

    /// Staged view of a path: Some(Some) = staged put, Some(None) = staged
    /// delete, None = untouched by this transaction
    fn staged_state(&self, path: &str) -> Option<Option<&StoredResource>> {
        for change in self.staged.iter().rev() {
            match change {
                Change::Put(resource) if resource.meta.path == path => {
                    return Some(Some(resource));
                }
                Change::Delete(deleted) if deleted == path => return Some(None),
                _ => {}
            }
        }
        None
    }

    fn lookup(&self, path: &str) -> StoreResult<Option<StoredResource>> {
        if let Some(staged) = self.staged_state(path) {
            return Ok(staged.cloned());
        }
        Ok(self.lock_inner()?.resources.get(path).cloned())
    }

    fn next_revision(&self) -> StoreResult<u64> {
        // Revision numbers are drawn eagerly; a rollback burns them, which
        // keeps them strictly monotonic across the store.
        let mut inner = self.lock_inner()?;
        inner.next_revision += 1;
        Ok(inner.next_revision)
    }

    fn finish(&mut self, committed: bool) {
        self.finished = true;
        self.counters.active.fetch_sub(1, Ordering::Relaxed);
        if committed {
            self.counters.committed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.rolled_back.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl StoreTransaction for MemoryTransaction {
    fn resolve(&self, path: &str) -> StoreResult<Option<ResourceMeta>> {
        self.check_open()?;
        Ok(self.lookup(path)?.map(|r| r.meta))
    }

    fn get(&self, path: &str) -> StoreResult<Option<(ResourceMeta, Bytes)>> {
        self.check_open()?;
        Ok(self.lookup(path)?.map(|r| (r.meta, r.content)))
    }

    fn put(&mut self, path: &str, media_type: &str, content: Bytes) -> StoreResult<ResourceMeta> {
        self.check_open()?;
        let notes = self.lookup(path)?.map(|r| r.notes).unwrap_or_default();
        let meta = ResourceMeta {
            path: path.to_string(),
            iri: self.resource_iri(path)?,
            revision: self.next_revision()?,
            media_type: media_type.to_string(),
            length: content.len() as u64,
            modified: whole_seconds(Utc::now()),
        };
        self.staged.push(Change::Put(StoredResource {
            meta: meta.clone(),
            content,
            notes,
        }));
        Ok(meta)
    }

    fn append(&mut self, path: &str, content: Bytes) -> StoreResult<ResourceMeta> {
        self.check_open()?;
        let existing = self
            .lookup(path)?
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        let mut combined = Vec::with_capacity(existing.content.len() + content.len());
        combined.extend_from_slice(&existing.content);
        combined.extend_from_slice(&content);
        let meta = ResourceMeta {
            revision: self.next_revision()?,
            length: combined.len() as u64,
            modified: whole_seconds(Utc::now()),
            ..existing.meta
        };
        self.staged.push(Change::Put(StoredResource {
            meta: meta.clone(),
            content: Bytes::from(combined),
            notes: existing.notes,
        }));
        Ok(meta)
    }

    fn annotate(&mut self, path: &str, note: &str) -> StoreResult<ResourceMeta> {
        self.check_open()?;
        let mut existing = self
            .lookup(path)?
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        existing.notes.push(note.to_string());
        let meta = ResourceMeta {
            revision: self.next_revision()?,
            modified: whole_seconds(Utc::now()),
            ..existing.meta
        };
        self.staged.push(Change::Put(StoredResource {
            meta: meta.clone(),
            content: existing.content,
            notes: existing.notes,
        }));
        Ok(meta)
    }

    fn delete(&mut self, path: &str) -> StoreResult<()> {
        self.check_open()?;
        if self.lookup(path)?.is_none() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        self.staged.push(Change::Delete(path.to_string()));
        Ok(())
    }

    fn describe(&self, path: &str) -> StoreResult<Vec<Triple>> {
        self.check_open()?;
        // Staged state first, so a transaction sees its own writes
        if let Some(staged) = self.staged_state(path) {
            return match staged {
                Some(resource) => description_triples(resource),
                None => Err(StoreError::NotFound(path.to_string())),
            };
        }
        let inner = self.lock_inner()?;
        let resource = inner
            .resources
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        Ok(inner.triples.triples_with_subject(&resource.meta.iri))
    }

    fn query(&self, pattern: &TriplePattern) -> StoreResult<Vec<Triple>> {
        self.check_open()?;
        Ok(self.lock_inner()?.triples.query(pattern))
    }

    fn commit(&mut self) -> StoreResult<()> {
        self.check_open()?;
        {
            let staged = std::mem::take(&mut self.staged);
            let mut inner = self.lock_inner()?;
            for change in staged {
                match change {
                    Change::Put(resource) => {
                        inner.triples.remove_subject(&resource.meta.iri);
                        for triple in description_triples(&resource)? {
                            inner.triples.insert(triple);
                        }
                        debug!(path = %resource.meta.path, revision = resource.meta.revision, "commit put");
                        inner
                            .resources
                            .insert(resource.meta.path.clone(), resource);
                    }
                    Change::Delete(path) => {
                        if let Some(resource) = inner.resources.remove(&path) {
                            inner.triples.remove_subject(&resource.meta.iri);
                        }
                        debug!(path = %path, "commit delete");
                    }
                }
            }
        }
        self.finish(true);
        Ok(())
    }

    fn rollback(&mut self) -> StoreResult<()> {
        self.check_open()?;
        self.staged.clear();
        self.finish(false);
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        // A transaction abandoned without an explicit finish counts as a
        // rollback so the counters stay balanced.
        if !self.finished {
            self.staged.clear();
            self.finish(false);
        }
    }
}

/// Truncate a timestamp to whole seconds
fn whole_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(dt.timestamp(), 0).unwrap_or(dt)
}

fn vocab_node(iri: &str) -> StoreResult<NamedNode> {
    NamedNode::new(iri).map_err(|e| StoreError::Backend(e.to_string()))
}

/// Description triples derived from a stored resource
fn description_triples(resource: &StoredResource) -> StoreResult<Vec<Triple>> {
    let subject = resource.meta.iri.clone();
    let xsd_date_time = vocab_node(vocab::XSD_DATE_TIME)?;
    let xsd_integer = vocab_node(vocab::XSD_INTEGER)?;

    let mut triples = vec![
        Triple::new(
            subject.clone(),
            vocab_node(vocab::RDF_TYPE)?,
            Term::Iri(vocab_node(vocab::SUTRA_RESOURCE)?),
        ),
        Triple::new(
            subject.clone(),
            vocab_node(vocab::DCTERMS_FORMAT)?,
            Literal::new_simple(resource.meta.media_type.as_str()),
        ),
        Triple::new(
            subject.clone(),
            vocab_node(vocab::DCTERMS_MODIFIED)?,
            Literal::new_typed(resource.meta.modified.to_rfc3339(), xsd_date_time),
        ),
        Triple::new(
            subject.clone(),
            vocab_node(vocab::SUTRA_REVISION)?,
            Literal::new_typed(resource.meta.revision.to_string(), xsd_integer.clone()),
        ),
        Triple::new(
            subject.clone(),
            vocab_node(vocab::SUTRA_BYTES)?,
            Literal::new_typed(resource.meta.length.to_string(), xsd_integer),
        ),
    ];
    for note in &resource.notes {
        triples.push(Triple::new(
            subject.clone(),
            vocab_node(vocab::DCTERMS_DESCRIPTION)?,
            Literal::new_simple(note.as_str()),
        ));
    }
    Ok(triples)
}
