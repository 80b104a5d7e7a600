//! Per-request operation context and the identity/authorization collaborators.

use async_trait::async_trait;
use axum::http::{HeaderMap, Method};
use std::collections::BTreeMap;

use crate::ApiError;

/// The authenticated caller, as established by an [`Identifier`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identity {
    pub subject: String,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl Identity {
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            attributes: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Everything one request brings to a pipeline.
///
/// Built by the serving layer (or directly in tests), handed by reference to every
/// hook and never shared between requests.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub method: Method,
    pub headers: HeaderMap,
    /// Resolved path parameters, e.g. `{"id": "7"}`
    pub path: BTreeMap<String, String>,
    /// Raw query parameters
    pub params: BTreeMap<String, String>,
    /// Decoded JSON body, if one was sent
    pub body: Option<serde_json::Value>,
    /// Set by the identification stage
    pub identity: Option<Identity>,
}

impl OperationContext {
    #[must_use]
    pub fn new(method: Method) -> Self {
        Self {
            method,
            headers: HeaderMap::new(),
            path: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
            identity: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// The body as a JSON object.
    ///
    /// # Errors
    /// `ValidationFailed` when the body is missing or not an object.
    pub fn body_object(&self) -> Result<&serde_json::Map<String, serde_json::Value>, ApiError> {
        match &self.body {
            Some(serde_json::Value::Object(map)) => Ok(map),
            Some(_) => Err(ApiError::invalid_body("Request body must be a JSON object")),
            None => Err(ApiError::invalid_body("A JSON request body is required")),
        }
    }
}

/// Establishes who is calling.
///
/// Returning `Err(ApiError::unauthorized(..))` stops the pipeline before any storage
/// access.
#[async_trait]
pub trait Identifier: Send + Sync {
    async fn identify(&self, ctx: &OperationContext) -> Result<Identity, ApiError>;
}

/// Decides whether the identified caller may perform the operation.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, ctx: &OperationContext) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn body_object_requires_an_object() {
        let ctx = OperationContext::new(Method::POST).with_body(json!([1, 2]));
        assert!(ctx.body_object().is_err());

        let ctx = OperationContext::new(Method::POST);
        assert!(ctx.body_object().is_err());

        let ctx = OperationContext::new(Method::POST).with_body(json!({"name": "Jim"}));
        assert_eq!(ctx.body_object().unwrap().len(), 1);
    }

    #[test]
    fn builder_collects_params_and_path() {
        let ctx = OperationContext::new(Method::GET)
            .with_path("id", "3")
            .with_param("name__contains", "John");
        assert_eq!(ctx.path.get("id").map(String::as_str), Some("3"));
        assert_eq!(ctx.param("name__contains"), Some("John"));
        assert_eq!(ctx.param("missing"), None);
    }
}
