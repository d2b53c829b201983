//! In-memory triple store backing the resource layer
//!
//! Keeps a primary set of triples plus subject and predicate indices so the
//! description of a single resource is an O(1) index lookup rather than a
//! scan.

use super::types::{NamedNode, Triple, TriplePattern};
use std::collections::{HashMap, HashSet};

/// Triple store with subject and predicate indices
#[derive(Debug, Clone, Default)]
pub struct TripleStore {
    /// All triples (primary storage)
    triples: HashSet<Triple>,

    /// Subject IRI -> triples with that subject
    subject_index: HashMap<String, HashSet<Triple>>,

    /// Predicate IRI -> subject IRIs using it
    predicate_index: HashMap<String, HashSet<String>>,
}

impl TripleStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a triple; returns false if it was already present
    pub fn insert(&mut self, triple: Triple) -> bool {
        if !self.triples.insert(triple.clone()) {
            return false;
        }
        self.subject_index
            .entry(triple.subject.as_str().to_string())
            .or_default()
            .insert(triple.clone());
        self.predicate_index
            .entry(triple.predicate.as_str().to_string())
            .or_default()
            .insert(triple.subject.as_str().to_string());
        true
    }

    /// Remove every triple with the given subject, returning how many were removed
    pub fn remove_subject(&mut self, subject: &NamedNode) -> usize {
        let Some(removed) = self.subject_index.remove(subject.as_str()) else {
            return 0;
        };
        for triple in &removed {
            self.triples.remove(triple);
            if let Some(subjects) = self.predicate_index.get_mut(triple.predicate.as_str()) {
                subjects.remove(subject.as_str());
                if subjects.is_empty() {
                    self.predicate_index.remove(triple.predicate.as_str());
                }
            }
        }
        removed.len()
    }

    /// All triples describing a subject
    pub fn triples_with_subject(&self, subject: &NamedNode) -> Vec<Triple> {
        self.subject_index
            .get(subject.as_str())
            .map(|set| {
                let mut triples: Vec<Triple> = set.iter().cloned().collect();
                // Deterministic output for serializers
                triples.sort_by(|a, b| {
                    a.predicate
                        .as_str()
                        .cmp(b.predicate.as_str())
                        .then_with(|| a.object.lexical_value().cmp(b.object.lexical_value()))
                });
                triples
            })
            .unwrap_or_default()
    }

    /// Subjects that use a predicate
    pub fn subjects_with_predicate(&self, predicate: &NamedNode) -> Vec<String> {
        self.predicate_index
            .get(predicate.as_str())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Query triples matching a pattern
    pub fn query(&self, pattern: &TriplePattern) -> Vec<Triple> {
        // Use the subject index when the subject is fixed
        if let Some(ref subject) = pattern.subject {
            return self
                .triples_with_subject(subject)
                .into_iter()
                .filter(|t| pattern.matches(t))
                .collect();
        }
        self.triples
            .iter()
            .filter(|t| pattern.matches(t))
            .cloned()
            .collect()
    }

    /// Total number of triples
    pub fn len(&self) -> usize {
        self.triples.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Clear all triples
    pub fn clear(&mut self) {
        self.triples.clear();
        self.subject_index.clear();
        self.predicate_index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdf::types::Literal;

    fn node(iri: &str) -> NamedNode {
        NamedNode::new(iri).unwrap()
    }

    fn name_triple(subject: &str, value: &str) -> Triple {
        Triple::new(
            node(subject),
            node("http://xmlns.com/foaf/0.1/name"),
            Literal::new_simple(value),
        )
    }

    #[test]
    fn test_insert_and_query() {
        let mut store = TripleStore::new();
        let triple = name_triple("http://example.org/alice", "Alice");

        assert!(store.insert(triple.clone()));
        assert!(!store.insert(triple.clone()));
        assert_eq!(store.len(), 1);

        let results = store.query(&TriplePattern::default());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0], triple);
    }

    #[test]
    fn test_subject_index() {
        let mut store = TripleStore::new();
        let alice = node("http://example.org/alice");
        store.insert(name_triple("http://example.org/alice", "Alice"));
        store.insert(Triple::new(
            alice.clone(),
            node("http://xmlns.com/foaf/0.1/age"),
            Literal::new_simple("30"),
        ));
        store.insert(name_triple("http://example.org/bob", "Bob"));

        assert_eq!(store.triples_with_subject(&alice).len(), 2);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_remove_subject() {
        let mut store = TripleStore::new();
        let alice = node("http://example.org/alice");
        store.insert(name_triple("http://example.org/alice", "Alice"));
        store.insert(name_triple("http://example.org/bob", "Bob"));

        assert_eq!(store.remove_subject(&alice), 1);
        assert_eq!(store.len(), 1);
        assert!(store.triples_with_subject(&alice).is_empty());

        // Bob still indexed under the shared predicate
        let pred = node("http://xmlns.com/foaf/0.1/name");
        assert_eq!(store.subjects_with_predicate(&pred).len(), 1);
    }

    #[test]
    fn test_query_by_subject_and_object() {
        let mut store = TripleStore::new();
        store.insert(name_triple("http://example.org/alice", "Alice"));

        let pattern = TriplePattern::new(
            Some(node("http://example.org/alice")),
            None,
            Some(Literal::new_simple("Alice").into()),
        );
        assert_eq!(store.query(&pattern).len(), 1);

        let pattern = TriplePattern::new(
            Some(node("http://example.org/alice")),
            None,
            Some(Literal::new_simple("Bob").into()),
        );
        assert!(store.query(&pattern).is_empty());
    }
}
