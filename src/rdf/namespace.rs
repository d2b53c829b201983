//! RDF namespace and prefix management
//!
//! Handles namespace prefixes for compact IRI notation and defines the
//! vocabulary the resource store uses for its description triples.

use indexmap::IndexMap;
use thiserror::Error;

/// Prefix errors
#[derive(Error, Debug)]
pub enum PrefixError {
    /// Unknown prefix
    #[error("Unknown prefix: {0}")]
    UnknownPrefix(String),

    /// Not a compact IRI
    #[error("Not a compact IRI: {0}")]
    NotCompact(String),
}

pub type PrefixResult<T> = Result<T, PrefixError>;

/// Vocabulary terms used in resource description triples
pub mod vocab {
    /// rdf:type
    pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
    /// dcterms:format (media type of the stored representation)
    pub const DCTERMS_FORMAT: &str = "http://purl.org/dc/terms/format";
    /// dcterms:modified
    pub const DCTERMS_MODIFIED: &str = "http://purl.org/dc/terms/modified";
    /// dcterms:description (free-text annotations)
    pub const DCTERMS_DESCRIPTION: &str = "http://purl.org/dc/terms/description";
    /// xsd:dateTime
    pub const XSD_DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";
    /// xsd:integer
    pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
    /// Class of stored resources
    pub const SUTRA_RESOURCE: &str = "http://sutra-server.org/ns#Resource";
    /// Revision number of the stored representation
    pub const SUTRA_REVISION: &str = "http://sutra-server.org/ns#revision";
    /// Size in bytes of the stored representation
    pub const SUTRA_BYTES: &str = "http://sutra-server.org/ns#bytes";
}

/// Namespace manager with common prefixes
///
/// Prefixes keep their registration order so serialized prefix headers are
/// deterministic.
pub struct NamespaceManager {
    /// Prefix → IRI mappings
    prefixes: IndexMap<String, String>,
}

impl NamespaceManager {
    /// Create a new namespace manager with common prefixes
    pub fn new() -> Self {
        let mut mgr = Self {
            prefixes: IndexMap::new(),
        };

        mgr.add_prefix("rdf", "http://www.w3.org/1999/02/22-rdf-syntax-ns#");
        mgr.add_prefix("rdfs", "http://www.w3.org/2000/01/rdf-schema#");
        mgr.add_prefix("xsd", "http://www.w3.org/2001/XMLSchema#");
        mgr.add_prefix("dcterms", "http://purl.org/dc/terms/");
        mgr.add_prefix("sutra", "http://sutra-server.org/ns#");

        mgr
    }

    /// Add a prefix
    pub fn add_prefix(&mut self, prefix: impl Into<String>, iri: impl Into<String>) {
        self.prefixes.insert(prefix.into(), iri.into());
    }

    /// Get IRI for a prefix
    pub fn get_iri(&self, prefix: &str) -> PrefixResult<&str> {
        self.prefixes
            .get(prefix)
            .map(|s| s.as_str())
            .ok_or_else(|| PrefixError::UnknownPrefix(prefix.to_string()))
    }

    /// Expand a compact IRI (prefix:local) to a full IRI
    pub fn expand(&self, compact_iri: &str) -> PrefixResult<String> {
        let (prefix, local) = compact_iri
            .split_once(':')
            .ok_or_else(|| PrefixError::NotCompact(compact_iri.to_string()))?;
        Ok(format!("{}{}", self.get_iri(prefix)?, local))
    }

    /// Compact a full IRI to prefix:local notation if a prefix matches
    pub fn compact(&self, iri: &str) -> Option<String> {
        for (prefix, ns) in &self.prefixes {
            if let Some(local) = iri.strip_prefix(ns.as_str()) {
                return Some(format!("{}:{}", prefix, local));
            }
        }
        None
    }

    /// Iterate over (prefix, IRI) pairs in registration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.prefixes.iter().map(|(p, i)| (p.as_str(), i.as_str()))
    }
}

impl Default for NamespaceManager {
    fn default() -> Self {
        Self::new()
    }
}
