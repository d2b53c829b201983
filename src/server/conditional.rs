//! Conditional request evaluation and validator headers
//!
//! The entity tag is a hash of resource IRI, revision, and media type, so
//! it changes whenever the representation or its negotiated type does.
//! Last-Modified carries whole seconds, matching what the store records.

use crate::store::ResourceMeta;
use axum::http::{header, HeaderMap, Method, StatusCode};
use chrono::{DateTime, NaiveDateTime, Utc};
use sha2::{Digest, Sha256};

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Entity tag for a resource revision
pub fn etag_value(meta: &ResourceMeta) -> String {
    let material = format!(
        "{}|{}|{}",
        meta.iri.as_str(),
        meta.revision,
        meta.media_type
    );
    let digest = Sha256::digest(material.as_bytes());
    let hex = format!("{:x}", digest);
    format!("\"{}\"", &hex[..16])
}

/// Format a timestamp as an HTTP date
pub fn http_date(dt: &DateTime<Utc>) -> String {
    dt.format(HTTP_DATE_FORMAT).to_string()
}

/// Parse an HTTP date header value
pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), HTTP_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Evaluate the conditional headers of a request against resource state
///
/// Returns the early status to answer with (304 for safe methods whose
/// condition shows an unchanged resource, 412 for failed preconditions), or
/// None when the request should proceed.
pub fn check(
    method: &Method,
    headers: &HeaderMap,
    meta: Option<&ResourceMeta>,
    safe: bool,
) -> Option<StatusCode> {
    let Some(meta) = meta else {
        // If-Match against a missing resource can never match
        if headers.contains_key(header::IF_MATCH) {
            return Some(StatusCode::PRECONDITION_FAILED);
        }
        return None;
    };
    let etag = etag_value(meta);

    if let Some(value) = header_str(headers, header::IF_NONE_MATCH) {
        if etag_list_matches(value, &etag) {
            return Some(if safe {
                StatusCode::NOT_MODIFIED
            } else {
                StatusCode::PRECONDITION_FAILED
            });
        }
    }

    if let Some(value) = header_str(headers, header::IF_MATCH) {
        if !etag_list_matches(value, &etag) {
            return Some(StatusCode::PRECONDITION_FAILED);
        }
    }

    if safe && (*method == Method::GET || *method == Method::HEAD) {
        if let Some(since) = header_str(headers, header::IF_MODIFIED_SINCE)
            .and_then(parse_http_date)
        {
            if meta.modified <= since {
                return Some(StatusCode::NOT_MODIFIED);
            }
        }
    }

    if let Some(since) =
        header_str(headers, header::IF_UNMODIFIED_SINCE).and_then(parse_http_date)
    {
        if meta.modified > since {
            return Some(StatusCode::PRECONDITION_FAILED);
        }
    }

    None
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn etag_list_matches(value: &str, etag: &str) -> bool {
    value
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate == etag)
}
