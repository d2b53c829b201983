//! One HTTP request/response cycle

use axum::http::{header, HeaderMap, Method, Uri};
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use uuid::Uuid;

/// An inbound request bound to one store transaction
///
/// Created when the request arrives, destroyed when the response is fully
/// delivered or the connection aborts. Safe methods (GET/HEAD/OPTIONS)
/// never commit, so their transactions only ever roll back.
#[derive(Debug, Clone)]
pub struct Exchange {
    id: Uuid,
    method: Method,
    path: String,
    selector: Option<String>,
    headers: HeaderMap,
    received: DateTime<Utc>,
    safe: bool,
}

impl Exchange {
    /// Build an exchange from request parts
    pub fn new(method: Method, uri: &Uri, headers: HeaderMap) -> Self {
        let path = percent_decode_str(uri.path())
            .decode_utf8_lossy()
            .to_string();
        let selector = uri.query().and_then(first_query_name);
        let safe = is_safe_method(&method);
        Self {
            id: Uuid::new_v4(),
            method,
            path,
            selector,
            headers,
            received: Utc::now(),
            safe,
        }
    }

    /// Request id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// HTTP method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Percent-decoded request path
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Operation selector: the first query parameter name, when present
    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }

    /// Request headers
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A header as UTF-8, when present and valid
    pub fn header(&self, name: header::HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Declared Content-Type of the request body
    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE)
    }

    /// When the request arrived
    pub fn received(&self) -> DateTime<Utc> {
        self.received
    }

    /// Whether the method is safe (no mutation, never commits)
    pub fn is_safe(&self) -> bool {
        self.safe
    }
}

/// GET, HEAD, and OPTIONS are safe; everything else may mutate
pub fn is_safe_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS
}

fn first_query_name(query: &str) -> Option<String> {
    let name = query.split('&').next()?.split('=').next()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
