//! Outgoing request descriptor and the middleware seam it flows through.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::error::{AuthError, Result};

/// Metadata key set once a request has triggered a refresh.
pub const TOKEN_REFRESHED_KEY: &str = "_token_refreshed";

/// A request before dispatch.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
    /// Arbitrary per-request annotations carried through the pipeline.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OutgoingRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            metadata: HashMap::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    /// Attach a JSON body.
    pub fn json<B: serde::Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Set a header, replacing any previous value.
    pub fn header(mut self, name: HeaderName, value: &str) -> Result<Self> {
        self.set_header(name, value)?;
        Ok(self)
    }

    pub fn set_header(&mut self, name: HeaderName, value: &str) -> Result<()> {
        let value = HeaderValue::from_str(value)
            .map_err(|_| AuthError::InvalidRequest(format!("invalid value for header {}", name)))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether this request already triggered a refresh in this pass.
    pub fn token_refreshed(&self) -> bool {
        self.metadata
            .get(TOKEN_REFRESHED_KEY)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    pub fn mark_token_refreshed(&mut self) {
        self.metadata
            .insert(TOKEN_REFRESHED_KEY.to_string(), serde_json::Value::Bool(true));
    }

    /// Lower into a reqwest request builder.
    pub(crate) fn into_builder(self, http: &reqwest::Client) -> reqwest::RequestBuilder {
        let mut builder = http.request(self.method, self.url).headers(self.headers);
        if let Some(body) = &self.body {
            builder = builder.json(body);
        }
        builder
    }
}

/// One stage of the request pipeline: pass the request on (possibly
/// modified) or fail it before dispatch.
#[async_trait]
pub trait RequestMiddleware: Send + Sync + std::fmt::Debug {
    async fn handle(&self, request: OutgoingRequest) -> Result<OutgoingRequest>;
}

pub type SharedMiddleware = Arc<dyn RequestMiddleware>;

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::AUTHORIZATION;

    fn url() -> Url {
        Url::parse("http://nvr.local/api/v1/cameras").unwrap()
    }

    #[test]
    fn test_refresh_marker() {
        let mut request = OutgoingRequest::get(url());
        assert!(!request.token_refreshed());
        request.mark_token_refreshed();
        assert!(request.token_refreshed());
    }

    #[test]
    fn test_unrelated_metadata_does_not_set_marker() {
        let request = OutgoingRequest::get(url())
            .with_metadata("trace", serde_json::json!("abc"))
            .with_metadata(TOKEN_REFRESHED_KEY, serde_json::json!("yes"));
        assert!(!request.token_refreshed());
        assert_eq!(request.metadata["trace"], "abc");
    }

    #[test]
    fn test_set_header_replaces() {
        let request = OutgoingRequest::get(url())
            .header(AUTHORIZATION, "Bearer old")
            .unwrap()
            .header(AUTHORIZATION, "Bearer new")
            .unwrap();
        assert_eq!(request.headers.get_all(AUTHORIZATION).iter().count(), 1);
        assert_eq!(request.headers[AUTHORIZATION], "Bearer new");
    }

    #[test]
    fn test_invalid_header_value_rejected() {
        let err = OutgoingRequest::get(url())
            .header(AUTHORIZATION, "bad\nvalue")
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest(_)));
    }
}
