//! Server configuration

use std::time::Duration;

/// Server configuration
///
/// Tuning constants that the request pipeline consumes (lock retry bound,
/// small-object buffering threshold) live here rather than being hardcoded
/// in the components that use them.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub address: String,
    /// Port
    pub port: u16,
    /// Base IRI that resource paths resolve against
    pub base_iri: String,
    /// Maximum number of in-flight exchanges; excess requests queue
    pub max_in_flight: usize,
    /// How many times the write path retries a contended lock before
    /// answering Conflict
    pub lock_retry_limit: u32,
    /// Pause between lock retries
    pub lock_retry_backoff: Duration,
    /// Responses with a known length at or below this are buffered and the
    /// transaction closed before the response is sent; larger ones stream
    pub buffer_threshold: usize,
    /// Chunk capacity of the streaming response channel
    pub stream_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8080,
            base_iri: "http://localhost:8080/".to_string(),
            max_in_flight: 256,
            lock_retry_limit: 10,
            lock_retry_backoff: Duration::from_millis(20),
            buffer_threshold: 1024,
            stream_channel_capacity: 8,
        }
    }
}
