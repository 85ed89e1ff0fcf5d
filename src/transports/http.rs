//! HTTP backend implementation using `reqwest`.
//!
//! [`ReqwestBackend`] resolves service-relative [`HttpRequest`]s against a
//! base URL, keeps session cookies between calls, follows redirects, and
//! reports the final URL when one was followed so the gateway can detect a
//! bounce to the login surface.
//!
//! # Feature gate
//!
//! This module is only available when the `transport-http` feature is enabled
//! (it is enabled by default).

use async_trait::async_trait;

use crate::error::ReversiError;
use crate::http::{HttpBackend, HttpRequest, HttpResponse, Method};

/// An [`HttpBackend`] backed by a cookie-keeping `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestBackend {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestBackend {
    /// Create a backend for the service at `base_url`, e.g. `http://localhost:8080`.
    ///
    /// # Errors
    ///
    /// Returns [`ReversiError::Network`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ReversiError> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| ReversiError::Network(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Use a preconfigured client (custom TLS, proxies, default headers).
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, request: &HttpRequest) -> String {
        format!("{}{}", self.base_url, request.path_and_query())
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ReversiError> {
        let url = self.url_for(&request);
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };
        tracing::trace!(%url, method = %method, "http request");

        let mut builder = self
            .client
            .request(method, &url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(body) = request.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ReversiError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| ReversiError::Network(e.to_string()))?;

        let mut result = HttpResponse::new(status, body);
        if final_url != url {
            result = result.redirected(final_url);
        }
        Ok(result)
    }
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
    fn base_url_is_normalised() {
        let backend = ReqwestBackend::new("http://localhost:8080/").unwrap();
        assert_eq!(backend.base_url(), "http://localhost:8080");
        let req = HttpRequest::get("/api/matchmaking/t1");
        assert_eq!(
            backend.url_for(&req),
            "http://localhost:8080/api/matchmaking/t1"
        );
    }

    #[tokio::test]
    async fn unreachable_host_is_a_network_error() {
        let backend = ReqwestBackend::new("http://127.0.0.1:1").unwrap();
        let err = backend
            .execute(HttpRequest::get("/api/matchmaking/auth-check"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReversiError::Network(_)));
    }
}
