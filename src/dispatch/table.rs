//! Explicit operation registration table
//!
//! Handlers are registered once at startup as `{method, selector, path
//! prefix} -> handler` entries and looked up with a linear scan in
//! registration order at request time. Entries carrying a selector match
//! requests whose first query parameter names them; requests with an
//! unknown or absent selector fall back to the entry without one.

use super::handler::{Advice, Handler};
use crate::codec::PayloadKind;
use axum::http::Method;
use std::sync::Arc;

/// Relation an alternate-representation entry advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlternateRel {
    /// A generic alternate representation
    Alternate,
    /// A description of the resource
    DescribedBy,
}

/// One registered operation
pub struct DispatchEntry {
    /// HTTP method this entry answers
    pub method: Method,
    /// Operation selector (first query parameter name), None for the
    /// generic content operation
    pub selector: Option<String>,
    /// Restrict the entry to paths under this prefix
    pub path_prefix: Option<String>,
    /// Payload kind of the request body parameter, when the handler takes one
    pub param_kind: Option<PayloadKind>,
    /// Whether the target resource must already exist
    pub requires_resource: bool,
    /// Resolve the exact request path only, skipping the prefix walk
    /// (creation semantics)
    pub exact_path: bool,
    /// Advertise this entry as a fallback representation
    pub alternate: Option<AlternateRel>,
    /// Cache-Control value stamped by the cache advice
    pub cache_control: Option<String>,
    /// The handler
    pub handler: Arc<dyn Handler>,
}

impl DispatchEntry {
    /// Entry for a method with a handler; everything else via the builder
    /// methods
    pub fn new(method: Method, handler: Arc<dyn Handler>) -> Self {
        Self {
            method,
            selector: None,
            path_prefix: None,
            param_kind: None,
            requires_resource: false,
            exact_path: false,
            alternate: None,
            cache_control: None,
            handler,
        }
    }

    /// Match only requests selecting this operation
    pub fn selector(mut self, selector: &str) -> Self {
        self.selector = Some(selector.to_string());
        self
    }

    /// Restrict to paths under a prefix
    pub fn path_prefix(mut self, prefix: &str) -> Self {
        self.path_prefix = Some(prefix.to_string());
        self
    }

    /// Declare a request body parameter
    pub fn param(mut self, kind: PayloadKind) -> Self {
        self.param_kind = Some(kind);
        self
    }

    /// Require the resource to exist
    pub fn requires_resource(mut self) -> Self {
        self.requires_resource = true;
        self
    }

    /// Address the exact request path (no prefix walk)
    pub fn exact_path(mut self) -> Self {
        self.exact_path = true;
        self
    }

    /// Advertise as an alternate representation
    pub fn alternate(mut self, rel: AlternateRel) -> Self {
        self.alternate = Some(rel);
        self
    }

    /// Stamp this Cache-Control on responses
    pub fn cache_control(mut self, value: &str) -> Self {
        self.cache_control = Some(value.to_string());
        self
    }

    fn matches(&self, method: &Method, path: &str) -> bool {
        if self.method != *method {
            return false;
        }
        self.path_prefix
            .as_deref()
            .map(|p| path.starts_with(p))
            .unwrap_or(true)
    }
}

/// The registration table plus the advice chain
#[derive(Default)]
pub struct DispatchTable {
    entries: Vec<Arc<DispatchEntry>>,
    advice: Vec<Arc<dyn Advice>>,
}

impl DispatchTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation; order decides lookup priority
    pub fn register(&mut self, entry: DispatchEntry) {
        self.entries.push(Arc::new(entry));
    }

    /// Append a decorator to the advice chain
    pub fn register_advice(&mut self, advice: Arc<dyn Advice>) {
        self.advice.push(advice);
    }

    /// The advice chain in registration order
    pub fn advice(&self) -> &[Arc<dyn Advice>] {
        &self.advice
    }

    /// Find the entry for a request
    ///
    /// A named selector is matched first; requests without one, or naming
    /// no registered operation, fall back to the method's generic entry.
    pub fn resolve(
        &self,
        method: &Method,
        selector: Option<&str>,
        path: &str,
    ) -> Option<Arc<DispatchEntry>> {
        if let Some(selector) = selector {
            let named = self
                .entries
                .iter()
                .find(|e| e.matches(method, path) && e.selector.as_deref() == Some(selector));
            if let Some(entry) = named {
                return Some(Arc::clone(entry));
            }
        }
        self.entries
            .iter()
            .find(|e| e.matches(method, path) && e.selector.is_none())
            .map(Arc::clone)
    }

    /// Distinct methods with handlers for a path, in registration order,
    /// plus OPTIONS
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let mut methods: Vec<Method> = Vec::new();
        for entry in &self.entries {
            if entry
                .path_prefix
                .as_deref()
                .map(|p| path.starts_with(p))
                .unwrap_or(true)
                && !methods.contains(&entry.method)
            {
                methods.push(entry.method.clone());
            }
        }
        if !methods.contains(&Method::OPTIONS) {
            methods.push(Method::OPTIONS);
        }
        methods
    }

    /// Alternate-flagged GET entries, in registration order
    pub fn alternates(&self) -> Vec<Arc<DispatchEntry>> {
        self.entries
            .iter()
            .filter(|e| e.alternate.is_some() && e.method == Method::GET)
            .map(Arc::clone)
            .collect()
    }
}
