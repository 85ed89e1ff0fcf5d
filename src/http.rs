//! Request/response seam between the client and the remote game service.
//!
//! [`HttpBackend`] is deliberately small: the client builds an [`HttpRequest`]
//! with a service-relative path, the backend resolves it against its base URL,
//! follows redirects, and reports the final URL so the gateway can tell when a
//! request was bounced to the login surface.
//!
//! The default `transport-http` feature provides
//! [`ReqwestBackend`](crate::transports::ReqwestBackend). Tests and custom
//! runtimes implement the trait directly.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ReversiError, Result};

/// HTTP verbs used by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

/// An outbound request with a service-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    /// Path beginning with `/`, without query string.
    pub path: String,
    /// Query parameters in insertion order, unencoded.
    pub query: Vec<(String, String)>,
    /// JSON body, if any.
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Append a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Attach `body` serialized as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ReversiError::Serialization`] if `body` cannot be encoded.
    pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.body = Some(serde_json::to_string(body)?);
        Ok(self)
    }

    /// The path with its percent-encoded query string.
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query}", self.path)
    }
}

/// A completed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Final URL when the backend followed one or more redirects.
    pub redirected_to: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            redirected_to: None,
            body: body.into(),
        }
    }

    /// Mark the response as the result of a redirect to `url`.
    #[must_use]
    pub fn redirected(mut self, url: impl Into<String>) -> Self {
        self.redirected_to = Some(url.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the service is asking for authentication: a 401/403 status or
    /// a redirect that landed on `login_path`.
    pub fn requires_auth(&self, login_path: &str) -> bool {
        matches!(self.status, 401 | 403)
            || self
                .redirected_to
                .as_deref()
                .is_some_and(|url| url.contains(login_path))
    }

    /// Fail with [`ReversiError::Http`] unless the status is 2xx.
    ///
    /// # Errors
    ///
    /// Returns [`ReversiError::Http`] carrying `context` for non-2xx statuses.
    pub fn ensure_success(self, context: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ReversiError::Http {
                status: self.status,
                context: context.to_string(),
            })
        }
    }

    /// Decode the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ReversiError::Serialization`] if the body is not valid JSON
    /// for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Executes requests against the remote service.
#[async_trait]
pub trait HttpBackend: Send + Sync + 'static {
    /// Perform `request` and return the response, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns [`ReversiError::Network`] when no response was obtained.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Percent-encode a URI component, leaving the same characters unescaped as
/// JavaScript's `encodeURIComponent`.
pub fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(char::from(byte)),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn encodes_like_encode_uri_component() {
        assert_eq!(encode_component("/play?x=1#top"), "%2Fplay%3Fx%3D1%23top");
        assert_eq!(encode_component("a b"), "a%20b");
        assert_eq!(encode_component("é"), "%C3%A9");
        assert_eq!(encode_component("keep-_.!~*'()"), "keep-_.!~*'()");
    }

    #[test]
    fn path_and_query_encodes_values() {
        let req = HttpRequest::post("/api/v1/sessions")
            .with_query("gameType", "PLAYER_VS_PLAYER")
            .with_query("color", "WHITE");
        assert_eq!(
            req.path_and_query(),
            "/api/v1/sessions?gameType=PLAYER_VS_PLAYER&color=WHITE"
        );
        assert_eq!(HttpRequest::get("/x").path_and_query(), "/x");
    }

    #[test]
    fn auth_detection() {
        assert!(HttpResponse::new(401, "").requires_auth("/login"));
        assert!(HttpResponse::new(403, "").requires_auth("/login"));
        assert!(HttpResponse::new(200, "<html>")
            .redirected("http://host/login?error")
            .requires_auth("/login"));
        assert!(!HttpResponse::new(200, "{}")
            .redirected("http://host/api/other")
            .requires_auth("/login"));
        assert!(!HttpResponse::new(500, "").requires_auth("/login"));
    }

    #[test]
    fn ensure_success_maps_status() {
        let err = HttpResponse::new(404, "")
            .ensure_success("join session")
            .unwrap_err();
        assert!(matches!(err, ReversiError::Http { status: 404, .. }));
        assert!(HttpResponse::new(204, "").ensure_success("cancel").is_ok());
    }
}
