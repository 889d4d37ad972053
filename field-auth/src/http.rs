//! HTTP transport used for discovery, token and userinfo requests.
//!
//! The coordinator talks to the identity provider only through
//! [`HttpTransport`], so tests can substitute a scripted transport and
//! deployments can add proxies or certificate pinning in one place.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
}

impl HttpMethod {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// Outgoing request.
#[derive(Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Method
    pub method: HttpMethod,
    /// Absolute URL
    pub url: String,
    /// Header name/value pairs
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Option<String>,
    /// Per-request timeout, overriding the transport default
    pub timeout: Option<Duration>,
}

impl std::fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Bodies and headers carry codes, verifiers and tokens.
        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers.len())
            .field("has_body", &self.body.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpRequest {
    /// GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            body: None,
            timeout: None,
        }
    }

    /// POST with an `application/x-www-form-urlencoded` body.
    pub fn post_form(url: impl Into<String>, params: &[(&str, &str)]) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();

        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: vec![
                (
                    "Content-Type".to_string(),
                    "application/x-www-form-urlencoded".to_string(),
                ),
                ("Accept".to_string(), "application/json".to_string()),
            ],
            body: Some(body),
            timeout: None,
        }
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add an `Authorization: Bearer` header.
    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Decoded form body, for inspecting requests in tests and fakes.
    pub fn form_params(&self) -> Vec<(String, String)> {
        self.body
            .as_deref()
            .map(|body| {
                url::form_urlencoded::parse(body.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Response status and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Response body
    pub body: String,
}

impl HttpResponse {
    /// Create a response.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Check for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Transport-level failures. HTTP error statuses are not errors here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Request timed out
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Connection could not be established
    #[error("Connection failed: {0}")]
    Connect(String),

    /// URL could not be used
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Any other request failure
    #[error("Request failed: {0}")]
    Request(String),
}

/// Sends requests to the identity provider.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request and return the status and body.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`HttpTransport`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl ReqwestTransport {
    /// Create a transport with the given default request timeout.
    pub fn new(default_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(default_timeout)
            .user_agent(concat!("field-auth/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(Self {
            client,
            default_timeout,
        })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client, default_timeout: Duration) -> Self {
        Self {
            client,
            default_timeout,
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_builder() {
        TransportError::InvalidUrl(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[instrument(skip(self, request), fields(method = request.method.as_str(), url = %request.url))]
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
        };
        builder = builder.timeout(request.timeout.unwrap_or(self.default_timeout));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_reqwest_error)?;

        debug!(status, "Received response");
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_post_form_encodes_body() {
        let request = HttpRequest::post_form(
            "https://id.example.com/token",
            &[("grant_type", "authorization_code"), ("redirect_uri", "app:/cb?x=1")],
        );

        assert_eq!(
            request.body.as_deref(),
            Some("grant_type=authorization_code&redirect_uri=app%3A%2Fcb%3Fx%3D1")
        );
        assert_eq!(
            request.form_params(),
            vec![
                ("grant_type".to_string(), "authorization_code".to_string()),
                ("redirect_uri".to_string(), "app:/cb?x=1".to_string()),
            ]
        );
    }

    #[test]
    fn test_debug_hides_body_and_headers() {
        let request = HttpRequest::post_form("https://id.example.com/token", &[("code", "secret-code")])
            .bearer("secret-token");
        let debug = format!("{:?}", request);
        assert!(!debug.contains("secret-code"));
        assert!(!debug.contains("secret-token"));
    }

    #[tokio::test]
    async fn test_reqwest_transport_returns_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let response = transport
            .send(HttpRequest::post_form(
                format!("{}/token", server.uri()),
                &[("grant_type", "refresh_token")],
            ))
            .await
            .unwrap();

        assert_eq!(response.status, 400);
        assert!(!response.is_success());
        assert_eq!(response.body, r#"{"error":"invalid_grant"}"#);
    }

    #[tokio::test]
    async fn test_reqwest_transport_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let result = transport
            .send(HttpRequest::get(format!("{}/slow", server.uri())).timeout(Duration::from_millis(50)))
            .await;

        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let result = transport.send(HttpRequest::get("not a url")).await;
        assert!(matches!(result, Err(TransportError::InvalidUrl(_))));
    }
}
