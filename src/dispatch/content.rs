//! Built-in content handlers
//!
//! These give every stored resource its REST surface: GET/HEAD serve the
//! stored representation (doubling as the generic file-serving fallback),
//! PUT stores one, DELETE removes it, and the selector operations expose
//! the RDF description, JSON metadata, appends, and annotations.

use super::error::{DispatchResult, ResponseError};
use super::handler::{AccessLogAdvice, CacheControlAdvice, Handler, Outcome};
use super::operation::ResourceOperation;
use super::table::{AlternateRel, DispatchEntry, DispatchTable};
use crate::codec::{Payload, PayloadKind};
use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use serde_json::json;
use std::sync::Arc;

/// Fallback media type for requests that do not declare one
const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";

/// Serves the stored representation (GET and HEAD)
pub struct GetContent;

#[async_trait]
impl Handler for GetContent {
    async fn handle(&self, op: &mut ResourceOperation) -> DispatchResult<Outcome> {
        let path = op.target_path().to_string();
        let (meta, content) = op
            .transaction()?
            .get(&path)
            .map_err(ResponseError::from)?
            .ok_or(ResponseError::NotFound(path))?;
        let native_type = meta.media_type.clone();
        op.set_meta(meta);
        Ok(Outcome::Entity {
            payload: Payload::Bytes(content),
            native_type: Some(native_type),
            status: StatusCode::OK,
        })
    }
}

/// Stores the request body as the resource's representation
pub struct PutContent;

#[async_trait]
impl Handler for PutContent {
    async fn handle(&self, op: &mut ResourceOperation) -> DispatchResult<Outcome> {
        let path = op.target_path().to_string();
        let media_type = op
            .exchange()
            .content_type()
            .unwrap_or(DEFAULT_MEDIA_TYPE)
            .to_string();
        let Some(Payload::Bytes(content)) = op.take_body() else {
            return Err(ResponseError::BadRequest(
                "request body required".to_string(),
            ));
        };
        let meta = op
            .transaction()?
            .put(&path, &media_type, content)
            .map_err(ResponseError::from)?;
        op.set_meta(meta);
        Ok(Outcome::NoContent)
    }
}

/// Removes the resource
pub struct DeleteContent;

#[async_trait]
impl Handler for DeleteContent {
    async fn handle(&self, op: &mut ResourceOperation) -> DispatchResult<Outcome> {
        let path = op.target_path().to_string();
        op.transaction()?
            .delete(&path)
            .map_err(ResponseError::from)?;
        op.clear_meta();
        Ok(Outcome::NoContent)
    }
}

/// Appends the request body to the stored representation (POST ?append)
pub struct AppendContent;

#[async_trait]
impl Handler for AppendContent {
    async fn handle(&self, op: &mut ResourceOperation) -> DispatchResult<Outcome> {
        let path = op.target_path().to_string();
        let Some(Payload::Bytes(content)) = op.take_body() else {
            return Err(ResponseError::BadRequest(
                "request body required".to_string(),
            ));
        };
        let meta = op
            .transaction()?
            .append(&path, content)
            .map_err(ResponseError::from)?;
        op.set_meta(meta);
        Ok(Outcome::NoContent)
    }
}

/// Attaches a note to the resource description (POST ?annotate)
pub struct AnnotateResource;

#[async_trait]
impl Handler for AnnotateResource {
    async fn verify(&self, op: &ResourceOperation) -> DispatchResult<()> {
        match op.body() {
            Some(Payload::Json(value)) if value.is_object() => Ok(()),
            _ => Err(ResponseError::BadRequest(
                "annotation body must be a JSON object".to_string(),
            )),
        }
    }

    async fn handle(&self, op: &mut ResourceOperation) -> DispatchResult<Outcome> {
        let path = op.target_path().to_string();
        let Some(Payload::Json(value)) = op.take_body() else {
            return Err(ResponseError::BadRequest(
                "annotation body required".to_string(),
            ));
        };
        let note = value
            .get("note")
            .and_then(|n| n.as_str())
            .ok_or_else(|| ResponseError::BadRequest("missing \"note\" field".to_string()))?
            .to_string();
        let meta = op
            .transaction()?
            .annotate(&path, &note)
            .map_err(ResponseError::from)?;
        op.set_meta(meta);
        Ok(Outcome::NoContent)
    }
}

/// Serves the RDF description of the resource (GET ?describe)
pub struct DescribeResource;

#[async_trait]
impl Handler for DescribeResource {
    async fn handle(&self, op: &mut ResourceOperation) -> DispatchResult<Outcome> {
        let path = op.target_path().to_string();
        let triples = op
            .transaction()?
            .describe(&path)
            .map_err(ResponseError::from)?;
        Ok(Outcome::Entity {
            payload: Payload::Graph(triples),
            native_type: None,
            status: StatusCode::OK,
        })
    }
}

/// Serves JSON metadata of the resource (GET ?metadata)
pub struct ResourceMetadata;

#[async_trait]
impl Handler for ResourceMetadata {
    async fn handle(&self, op: &mut ResourceOperation) -> DispatchResult<Outcome> {
        let meta = op
            .meta()
            .ok_or_else(|| ResponseError::NotFound(op.exchange().path().to_string()))?;
        let value = json!({
            "path": meta.path,
            "iri": meta.iri.as_str(),
            "revision": meta.revision,
            "mediaType": meta.media_type,
            "bytes": meta.length,
            "modified": meta.modified.to_rfc3339(),
        });
        Ok(Outcome::Entity {
            payload: Payload::Json(value),
            native_type: None,
            status: StatusCode::OK,
        })
    }
}

/// Register the built-in operations on a table, in lookup priority order
pub fn register_defaults(table: &mut DispatchTable) {
    table.register(DispatchEntry::new(Method::GET, Arc::new(GetContent)).requires_resource());
    table.register(DispatchEntry::new(Method::HEAD, Arc::new(GetContent)).requires_resource());
    table.register(
        DispatchEntry::new(Method::PUT, Arc::new(PutContent))
            .param(PayloadKind::Bytes)
            .exact_path(),
    );
    table.register(DispatchEntry::new(Method::DELETE, Arc::new(DeleteContent)).requires_resource());
    table.register(
        DispatchEntry::new(Method::POST, Arc::new(AppendContent))
            .selector("append")
            .param(PayloadKind::Bytes)
            .requires_resource(),
    );
    table.register(
        DispatchEntry::new(Method::POST, Arc::new(AnnotateResource))
            .selector("annotate")
            .param(PayloadKind::Json)
            .requires_resource(),
    );
    table.register(
        DispatchEntry::new(Method::GET, Arc::new(DescribeResource))
            .selector("describe")
            .requires_resource()
            .alternate(AlternateRel::DescribedBy)
            .cache_control("no-cache"),
    );
    table.register(
        DispatchEntry::new(Method::GET, Arc::new(ResourceMetadata))
            .selector("metadata")
            .requires_resource()
            .cache_control("no-cache"),
    );
}

/// Table with the built-in operations and the standard advice chain
pub fn default_table() -> DispatchTable {
    let mut table = DispatchTable::new();
    register_defaults(&mut table);
    table.register_advice(Arc::new(CacheControlAdvice));
    table.register_advice(Arc::new(AccessLogAdvice));
    table
}
