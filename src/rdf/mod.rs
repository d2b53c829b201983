//! RDF (Resource Description Framework) support for the Sutra object server
//!
//! The resource store keeps one description per stored resource as a set of
//! triples; this module provides the data model those descriptions use:
//! - RDF triples (subject-predicate-object) over oxrdf primitives
//! - A triple store with subject/predicate indices
//! - Namespace prefixes and the description vocabulary
//!
//! # Example
//!
//! ```rust
//! use sutra::rdf::{TripleStore, Triple, NamedNode, Literal};
//!
//! let mut store = TripleStore::new();
//!
//! let subject = NamedNode::new("http://example.org/alice").unwrap();
//! let predicate = NamedNode::new("http://xmlns.com/foaf/0.1/name").unwrap();
//! let object = Literal::new_simple("Alice");
//!
//! store.insert(Triple::new(subject.clone(), predicate, object));
//!
//! let results = store.triples_with_subject(&subject);
//! assert_eq!(results.len(), 1);
//! ```

mod namespace;
mod store;
mod types;

pub use namespace::{vocab, NamespaceManager, PrefixError, PrefixResult};
pub use store::TripleStore;
pub use types::{Literal, NamedNode, RdfError, RdfResult, Term, Triple, TriplePattern};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rdf_module_exports() {
        let _store: TripleStore = TripleStore::new();
        let _ns_mgr = NamespaceManager::new();
    }
}
