//! Codec registry and bidirectional media type negotiation
//!
//! Readers decode request bodies into payloads; writers encode payloads
//! into response bodies. Both are registered once at startup and the
//! registry is read-only afterwards, so negotiation is a pure function over
//! immutable state. Registration order is the tie-break: the first
//! registered codec wins among equally specific matches.

use super::media_type::MediaRange;
use crate::rdf::{NamespaceManager, Triple};
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    /// No writer satisfies the Accept header
    #[error("No acceptable representation")]
    NotAcceptable,

    /// No reader understands the request body's media type
    #[error("Unreadable request body: {0}")]
    UnreadableBody(String),

    /// Body decoding failed
    #[error("Decode error: {0}")]
    Decode(String),

    /// Payload encoding failed
    #[error("Encode error: {0}")]
    Encode(String),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// The in-memory shape of a request or response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Raw bytes
    Bytes,
    /// UTF-8 text
    Text,
    /// JSON document
    Json,
    /// RDF triples
    Graph,
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayloadKind::Bytes => "bytes",
            PayloadKind::Text => "text",
            PayloadKind::Json => "json",
            PayloadKind::Graph => "graph",
        };
        write!(f, "{}", name)
    }
}

/// A decoded body or a produced value awaiting encoding
#[derive(Debug, Clone)]
pub enum Payload {
    /// Raw bytes
    Bytes(Bytes),
    /// UTF-8 text
    Text(String),
    /// JSON document
    Json(serde_json::Value),
    /// RDF triples
    Graph(Vec<Triple>),
}

impl Payload {
    /// The payload's kind tag
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Bytes(_) => PayloadKind::Bytes,
            Payload::Text(_) => PayloadKind::Text,
            Payload::Json(_) => PayloadKind::Json,
            Payload::Graph(_) => PayloadKind::Graph,
        }
    }
}

/// An encoded response body
///
/// Writers may produce the whole body up front or a lazily-produced chunk
/// stream with an optional known length; the response pipeline decides
/// buffering from this.
pub enum EncodedBody {
    /// Fully materialized body
    Full(Bytes),
    /// Lazily produced chunks
    Stream {
        /// Total length when known
        length: Option<u64>,
        /// Chunk stream
        stream: BoxStream<'static, CodecResult<Bytes>>,
    },
}

impl fmt::Debug for EncodedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodedBody::Full(b) => f.debug_tuple("Full").field(&b.len()).finish(),
            EncodedBody::Stream { length, .. } => {
                f.debug_struct("Stream").field("length", length).finish()
            }
        }
    }
}

type DecodeFn = Arc<dyn Fn(Bytes) -> CodecResult<Payload> + Send + Sync>;
type EncodeFn = Arc<dyn Fn(&Payload) -> CodecResult<EncodedBody> + Send + Sync>;

/// A registered reader: media ranges it consumes plus the decode function
pub struct Reader {
    kind: PayloadKind,
    ranges: Vec<MediaRange>,
    decode: DecodeFn,
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("kind", &self.kind)
            .field("ranges", &self.ranges)
            .finish_non_exhaustive()
    }
}

impl Reader {
    /// Decode a request body
    pub fn decode(&self, body: Bytes) -> CodecResult<Payload> {
        (self.decode)(body)
    }

    /// The payload kind this reader produces
    pub fn kind(&self) -> PayloadKind {
        self.kind
    }
}

/// A registered writer: media ranges it can answer, the concrete type it
/// produces (None = the payload's own native type), and the encode function
pub struct Writer {
    kind: PayloadKind,
    ranges: Vec<MediaRange>,
    content_type: Option<String>,
    encode: EncodeFn,
}

impl Writer {
    /// Encode a payload
    pub fn encode(&self, payload: &Payload) -> CodecResult<EncodedBody> {
        (self.encode)(payload)
    }
}

/// A writer selected by negotiation, with the concrete response content type
pub struct NegotiatedWriter<'a> {
    /// The selected writer
    pub writer: &'a Writer,
    /// Concrete content type of the response
    pub content_type: String,
}

impl std::fmt::Debug for NegotiatedWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiatedWriter")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Read-only codec registry
#[derive(Default)]
pub struct CodecRegistry {
    readers: Vec<Reader>,
    writers: Vec<Writer>,
}

impl CodecRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in codecs: identity bytes, UTF-8 text, JSON,
    /// and the RDF graph serializers (Turtle and JSON)
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register_reader(PayloadKind::Bytes, &["*/*"], |body| {
            Ok(Payload::Bytes(body))
        });
        registry.register_reader(PayloadKind::Text, &["text/*"], |body| {
            String::from_utf8(body.to_vec())
                .map(Payload::Text)
                .map_err(|e| CodecError::Decode(format!("invalid UTF-8: {}", e)))
        });
        registry.register_reader(PayloadKind::Json, &["application/json"], |body| {
            serde_json::from_slice(&body)
                .map(Payload::Json)
                .map_err(|e| CodecError::Decode(format!("invalid JSON: {}", e)))
        });

        registry.register_writer(PayloadKind::Bytes, &["*/*"], None, |payload| {
            match payload {
                Payload::Bytes(b) => Ok(EncodedBody::Full(b.clone())),
                other => Err(CodecError::Encode(format!(
                    "bytes writer got {} payload",
                    other.kind()
                ))),
            }
        });
        registry.register_writer(
            PayloadKind::Text,
            &["text/plain"],
            Some("text/plain"),
            |payload| match payload {
                Payload::Text(s) => Ok(EncodedBody::Full(Bytes::from(s.clone()))),
                other => Err(CodecError::Encode(format!(
                    "text writer got {} payload",
                    other.kind()
                ))),
            },
        );
        registry.register_writer(
            PayloadKind::Json,
            &["application/json"],
            Some("application/json"),
            |payload| match payload {
                Payload::Json(value) => serde_json::to_vec_pretty(value)
                    .map(|v| EncodedBody::Full(Bytes::from(v)))
                    .map_err(|e| CodecError::Encode(e.to_string())),
                other => Err(CodecError::Encode(format!(
                    "json writer got {} payload",
                    other.kind()
                ))),
            },
        );

        let namespaces = Arc::new(NamespaceManager::new());
        let ns = Arc::clone(&namespaces);
        registry.register_writer(
            PayloadKind::Graph,
            &["text/turtle"],
            Some("text/turtle"),
            move |payload| match payload {
                Payload::Graph(triples) => Ok(EncodedBody::Full(Bytes::from(
                    serialize_turtle(triples, &ns),
                ))),
                other => Err(CodecError::Encode(format!(
                    "turtle writer got {} payload",
                    other.kind()
                ))),
            },
        );
        let ns = namespaces;
        registry.register_writer(
            PayloadKind::Graph,
            &["application/json"],
            Some("application/json"),
            move |payload| match payload {
                Payload::Graph(triples) => {
                    let value = graph_to_json(triples, &ns);
                    serde_json::to_vec_pretty(&value)
                        .map(|v| EncodedBody::Full(Bytes::from(v)))
                        .map_err(|e| CodecError::Encode(e.to_string()))
                }
                other => Err(CodecError::Encode(format!(
                    "json graph writer got {} payload",
                    other.kind()
                ))),
            },
        );

        registry
    }

    /// Register a reader; later registrations lose ties to earlier ones
    pub fn register_reader(
        &mut self,
        kind: PayloadKind,
        ranges: &[&str],
        decode: impl Fn(Bytes) -> CodecResult<Payload> + Send + Sync + 'static,
    ) {
        self.readers.push(Reader {
            kind,
            ranges: parse_ranges(ranges),
            decode: Arc::new(decode),
        });
    }

    /// Register a writer; later registrations lose ties to earlier ones
    pub fn register_writer(
        &mut self,
        kind: PayloadKind,
        ranges: &[&str],
        content_type: Option<&str>,
        encode: impl Fn(&Payload) -> CodecResult<EncodedBody> + Send + Sync + 'static,
    ) {
        self.writers.push(Writer {
            kind,
            ranges: parse_ranges(ranges),
            content_type: content_type.map(|s| s.to_string()),
            encode: Arc::new(encode),
        });
    }

    /// Find the reader for a request body
    ///
    /// `content_type` is the request's declared Content-Type; None selects
    /// the first reader producing the wanted kind. A declared type no reader
    /// consumes is an unreadable body.
    pub fn find_reader(
        &self,
        kind: PayloadKind,
        content_type: Option<&str>,
    ) -> CodecResult<&Reader> {
        let concrete = match content_type {
            Some(ct) => Some(MediaRange::parse(ct).ok_or_else(|| {
                CodecError::UnreadableBody(format!("unparseable content type: {}", ct))
            })?),
            None => None,
        };

        let mut best: Option<(u8, &Reader)> = None;
        for reader in &self.readers {
            if reader.kind != kind {
                continue;
            }
            let score = match &concrete {
                None => Some(0),
                Some(ct) => reader
                    .ranges
                    .iter()
                    .filter(|r| r.matches(ct))
                    .map(|r| r.specificity())
                    .max(),
            };
            if let Some(score) = score {
                // Strictly-greater keeps the first registered on ties
                if best.map(|(s, _)| score > s).unwrap_or(true) {
                    best = Some((score, reader));
                }
            }
        }
        best.map(|(_, r)| r).ok_or_else(|| {
            CodecError::UnreadableBody(format!(
                "no {} reader for {}",
                kind,
                content_type.unwrap_or("unset content type"),
            ))
        })
    }

    /// Find the writer satisfying an Accept list for a produced payload
    ///
    /// `native_type` is the concrete media type of payloads that carry their
    /// own (stored representations); writers without a fixed content type
    /// produce it. An empty Accept list accepts anything.
    pub fn find_writer(
        &self,
        kind: PayloadKind,
        native_type: Option<&str>,
        accept: &[MediaRange],
    ) -> CodecResult<NegotiatedWriter<'_>> {
        let native = native_type.and_then(MediaRange::parse);

        let mut best: Option<(u8, NegotiatedWriter<'_>)> = None;
        for writer in &self.writers {
            if writer.kind != kind {
                continue;
            }
            let concrete = match &writer.content_type {
                Some(ct) => MediaRange::parse(ct),
                None => native.clone(),
            };
            let Some(concrete) = concrete else {
                continue;
            };
            // The writer's declared patterns bound what it may produce
            if !writer.ranges.iter().any(|r| r.matches(&concrete)) {
                continue;
            }
            let score = if accept.is_empty() {
                Some(0)
            } else {
                accept
                    .iter()
                    .filter(|r| r.matches(&concrete))
                    .map(|r| r.specificity())
                    .max()
            };
            if let Some(score) = score {
                if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                    best = Some((
                        score,
                        NegotiatedWriter {
                            writer,
                            content_type: concrete.essence().to_string(),
                        },
                    ));
                }
            }
        }
        best.map(|(_, w)| w).ok_or(CodecError::NotAcceptable)
    }
}

fn parse_ranges(ranges: &[&str]) -> Vec<MediaRange> {
    ranges.iter().filter_map(|r| MediaRange::parse(r)).collect()
}

/// Serialize triples as Turtle with the manager's prefix header
fn serialize_turtle(triples: &[Triple], ns: &NamespaceManager) -> String {
    let mut out = String::new();
    for (prefix, iri) in ns.iter() {
        out.push_str(&format!("@prefix {}: <{}> .\n", prefix, iri));
    }
    if !triples.is_empty() {
        out.push('\n');
    }
    for triple in triples {
        let predicate = ns
            .compact(triple.predicate.as_str())
            .unwrap_or_else(|| triple.predicate.to_string());
        out.push_str(&format!("{} {} {} .\n", triple.subject, predicate, triple.object));
    }
    out
}

/// JSON rendering of a triple list, with compacted predicates
fn graph_to_json(triples: &[Triple], ns: &NamespaceManager) -> serde_json::Value {
    let rendered: Vec<serde_json::Value> = triples
        .iter()
        .map(|t| {
            json!({
                "subject": t.subject.as_str(),
                "predicate": ns
                    .compact(t.predicate.as_str())
                    .unwrap_or_else(|| t.predicate.as_str().to_string()),
                "object": t.object.lexical_value(),
            })
        })
        .collect();
    json!({ "triples": rendered })
}
