//! HTTP server wiring
//!
//! Every request outside the status endpoint falls through to the exchange
//! handler, which runs the full pipeline: admission through the bounded
//! in-flight semaphore, exchange construction, dispatch resolution,
//! conditional-header evaluation, invocation, and response assembly.

use super::conditional;
use super::exchange::Exchange;
use crate::codec::CodecRegistry;
use crate::config::ServerConfig;
use crate::dispatch::{
    default_table, DispatchTable, OperationDispatcher, Resolution, ResponseError, ResponseParts,
};
use crate::lock::LockManager;
use crate::response::{ResponseEntity, StreamingPipeline};
use crate::store::{MemoryStore, Store, StoreResult};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Upper bound on buffered request bodies
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

struct AppState {
    config: ServerConfig,
    store: Arc<dyn Store>,
    locks: Arc<LockManager>,
    dispatcher: OperationDispatcher,
    semaphore: Arc<Semaphore>,
}

/// The object server: configuration plus the shared pipeline components
pub struct ObjectServer {
    state: Arc<AppState>,
}

impl ObjectServer {
    /// Assemble a server from explicit collaborators
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn Store>,
        registry: Arc<CodecRegistry>,
        locks: Arc<LockManager>,
        table: Arc<DispatchTable>,
    ) -> Self {
        let pipeline =
            StreamingPipeline::new(config.buffer_threshold, config.stream_channel_capacity);
        let dispatcher = OperationDispatcher::new(
            Arc::clone(&store),
            registry,
            Arc::clone(&locks),
            table,
            pipeline,
        );
        let semaphore = Arc::new(Semaphore::new(config.max_in_flight));
        Self {
            state: Arc::new(AppState {
                config,
                store,
                locks,
                dispatcher,
                semaphore,
            }),
        }
    }

    /// Server over a fresh in-memory store with the default codecs,
    /// handlers, and lock manager
    pub fn with_defaults(config: ServerConfig) -> StoreResult<Self> {
        let store = Arc::new(MemoryStore::new(&config.base_iri)?);
        let registry = Arc::new(CodecRegistry::with_defaults());
        let locks = Arc::new(LockManager::new(
            config.lock_retry_limit,
            config.lock_retry_backoff,
        ));
        let table = Arc::new(default_table());
        Ok(Self::new(config, store, registry, locks, table))
    }

    /// The axum router, usable directly in tests via `tower::oneshot`
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/status", get(status_handler))
            .fallback(handle_exchange)
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.state))
    }

    /// Bind and serve until shutdown
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error>> {
        let app = self.router();
        let addr = format!("{}:{}", self.state.config.address, self.state.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!("object server listening on {}", addr);

        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Handler for server status
async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let transactions = state.store.stats();
    let locks = state.locks.stats();
    Json(json!({
        "status": "healthy",
        "version": crate::VERSION,
        "transactions": {
            "begun": transactions.begun,
            "committed": transactions.committed,
            "rolledBack": transactions.rolled_back,
            "active": transactions.active,
        },
        "locks": {
            "acquired": locks.acquired,
            "released": locks.released,
        },
    }))
}

/// Handler for everything else: the resource pipeline
async fn handle_exchange(State(state): State<Arc<AppState>>, request: Request) -> Response {
    // Bounded admission: overload queues here instead of spawning further
    // work
    let _permit = match state.semaphore.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            return error_response(&ResponseError::Internal("server shutting down".to_string()))
        }
    };

    let (parts, body) = request.into_parts();
    let exchange = Exchange::new(parts.method, &parts.uri, parts.headers);
    debug!(
        id = %exchange.id(),
        method = %exchange.method(),
        path = %exchange.path(),
        "exchange received"
    );

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return error_response(&ResponseError::BadRequest(format!(
                "unreadable request body: {}",
                e
            )))
        }
    };

    match process(&state, exchange, body).await {
        Ok(response) => response,
        Err(e) => error_response(&e),
    }
}

async fn process(
    state: &AppState,
    exchange: Exchange,
    body: Bytes,
) -> Result<Response, ResponseError> {
    let resolution = state.dispatcher.resolve(exchange, body)?;
    let op = match resolution {
        Resolution::Immediate(parts) => return Ok(assemble(parts, ResponseEntity::NoContent)),
        Resolution::Operation(op) => *op,
    };

    // Conditional headers answer before the handler runs
    if let Some(status) = conditional::check(
        op.exchange().method(),
        op.exchange().headers(),
        op.meta(),
        op.exchange().is_safe(),
    ) {
        let mut parts = ResponseParts::new(status);
        if status == StatusCode::NOT_MODIFIED {
            if let Some(meta) = op.meta() {
                insert_header(
                    &mut parts.headers,
                    header::ETAG,
                    &conditional::etag_value(meta),
                );
                insert_header(
                    &mut parts.headers,
                    header::LAST_MODIFIED,
                    &conditional::http_date(&meta.modified),
                );
            }
        }
        op.finish_early(status.as_u16());
        return Ok(assemble(parts, ResponseEntity::NoContent));
    }

    let (parts, entity) = state.dispatcher.invoke(op).await?;
    Ok(assemble(parts, entity))
}

fn assemble(parts: ResponseParts, entity: ResponseEntity) -> Response {
    let ResponseParts { status, mut headers } = parts;
    let (status, body) = match entity {
        ResponseEntity::Buffered { content_type, body } => {
            insert_header(&mut headers, header::CONTENT_TYPE, &content_type);
            (status, Body::from(body))
        }
        ResponseEntity::Streamed {
            content_type,
            length,
            body,
        } => {
            insert_header(&mut headers, header::CONTENT_TYPE, &content_type);
            if let Some(length) = length {
                insert_header(&mut headers, header::CONTENT_LENGTH, &length.to_string());
            }
            (status, Body::from_stream(body))
        }
        ResponseEntity::NoContent => (status, Body::empty()),
        ResponseEntity::Redirect {
            status: redirect,
            location,
        } => {
            insert_header(&mut headers, header::LOCATION, &location);
            (
                StatusCode::from_u16(redirect).unwrap_or(StatusCode::SEE_OTHER),
                Body::empty(),
            )
        }
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn error_response(error: &ResponseError) -> Response {
    let status = error.status();
    let mut headers = HeaderMap::new();
    if let ResponseError::MethodNotAllowed { allow } = error {
        let joined = allow
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        insert_header(&mut headers, header::ALLOW, &joined);
    }
    (status, headers, Json(json!({ "error": error.to_string() }))).into_response()
}

fn insert_header(headers: &mut HeaderMap, name: header::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}
