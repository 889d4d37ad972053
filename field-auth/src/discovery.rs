//! OpenID Connect discovery.
//!
//! Fetches `{issuer}/.well-known/openid-configuration`, checks that the
//! provider accepts S256 PKCE challenges and fills the endpoints of an
//! [`OidcConfiguration`]. Successful documents are cached in memory per
//! resolver for a configurable time-to-live.

use crate::config::OidcConfiguration;
use crate::error::{AuthError, AuthResult};
use crate::http::{HttpRequest, HttpTransport};
use crate::pkce::CODE_CHALLENGE_METHOD;
use crate::retry::{with_retry_if, RetryConfig};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

/// Default lifetime of a cached discovery document.
pub const DEFAULT_DISCOVERY_TTL: Duration = Duration::from_secs(3600);

/// Provider metadata (OpenID Connect Discovery 1.0, section 3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    /// Issuer identifier
    #[serde(default)]
    pub issuer: Option<String>,

    /// Authorization endpoint
    pub authorization_endpoint: String,

    /// Token endpoint
    pub token_endpoint: String,

    /// UserInfo endpoint
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,

    /// End-session endpoint
    #[serde(default)]
    pub end_session_endpoint: Option<String>,

    /// JWKS URI
    #[serde(default)]
    pub jwks_uri: Option<String>,

    /// Revocation endpoint
    #[serde(default)]
    pub revocation_endpoint: Option<String>,

    /// Supported PKCE challenge methods
    #[serde(default)]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    /// Supported scopes
    #[serde(default)]
    pub scopes_supported: Option<Vec<String>>,
}

impl DiscoveryDocument {
    /// Check S256 support. A provider that does not advertise its methods is
    /// assumed to support S256.
    pub fn supports_s256(&self) -> bool {
        self.code_challenge_methods_supported
            .as_ref()
            .map_or(true, |methods| {
                methods.iter().any(|method| method == CODE_CHALLENGE_METHOD)
            })
    }

    /// Fill the endpoints missing from `configuration`.
    pub fn apply_to(&self, configuration: &OidcConfiguration) -> OidcConfiguration {
        let mut merged = configuration.clone();
        merged
            .authorization_endpoint
            .get_or_insert_with(|| self.authorization_endpoint.clone());
        merged
            .token_endpoint
            .get_or_insert_with(|| self.token_endpoint.clone());
        merged.userinfo_endpoint = merged
            .userinfo_endpoint
            .take()
            .or_else(|| self.userinfo_endpoint.clone());
        merged.end_session_endpoint = merged
            .end_session_endpoint
            .take()
            .or_else(|| self.end_session_endpoint.clone());
        merged.jwks_uri = merged.jwks_uri.take().or_else(|| self.jwks_uri.clone());
        merged.revocation_endpoint = merged
            .revocation_endpoint
            .take()
            .or_else(|| self.revocation_endpoint.clone());
        merged
    }
}

#[derive(Debug, Clone)]
struct CachedDocument {
    url: String,
    document: DiscoveryDocument,
    fetched_at: Instant,
}

/// Resolves provider endpoints through discovery.
pub struct DiscoveryResolver {
    transport: Arc<dyn HttpTransport>,
    ttl: Duration,
    timeout: Option<Duration>,
    retry: RetryConfig,
    cache: RwLock<Option<CachedDocument>>,
}

impl std::fmt::Debug for DiscoveryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryResolver")
            .field("ttl", &self.ttl)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl DiscoveryResolver {
    /// Create a resolver with the default one hour cache.
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            ttl: DEFAULT_DISCOVERY_TTL,
            timeout: None,
            retry: RetryConfig::default(),
            cache: RwLock::new(None),
        }
    }

    /// Set the cache lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the backoff used for transient failures.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Return `configuration` with its endpoints populated.
    ///
    /// # Errors
    ///
    /// - `DiscoveryFailed` if the document cannot be fetched or decoded
    /// - `ConfigurationError` if the provider does not support S256
    #[instrument(skip(self, configuration), fields(issuer = %configuration.issuer))]
    pub async fn discover(&self, configuration: &OidcConfiguration) -> AuthResult<OidcConfiguration> {
        let url = configuration.discovery_url();

        if let Some(document) = self.cached(&url) {
            debug!("Using cached discovery document");
            return Ok(document.apply_to(configuration));
        }

        let document_url = url.as_str();
        let document = with_retry_if(&self.retry, move || self.fetch(document_url), AuthError::is_retryable)
            .await
            .map_err(|e| match e {
                AuthError::DiscoveryFailed(message) => AuthError::DiscoveryFailed(message),
                other => AuthError::DiscoveryFailed(other.to_string()),
            })?;

        if !document.supports_s256() {
            return Err(AuthError::ConfigurationError(format!(
                "Provider does not support {} PKCE challenges (supported: {})",
                CODE_CHALLENGE_METHOD,
                document
                    .code_challenge_methods_supported
                    .as_deref()
                    .unwrap_or_default()
                    .join(", ")
            )));
        }

        info!(
            authorization_endpoint = %document.authorization_endpoint,
            token_endpoint = %document.token_endpoint,
            "Discovered provider endpoints"
        );

        let merged = document.apply_to(configuration);
        self.store(url, document);
        Ok(merged)
    }

    /// Drop the cached document.
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.write() {
            *cache = None;
        }
    }

    /// Cached document, if one is still fresh.
    pub fn cached_document(&self) -> Option<DiscoveryDocument> {
        let cache = self.cache.read().ok()?;
        cache
            .as_ref()
            .filter(|cached| cached.fetched_at.elapsed() < self.ttl)
            .map(|cached| cached.document.clone())
    }

    fn cached(&self, url: &str) -> Option<DiscoveryDocument> {
        let cache = self.cache.read().ok()?;
        cache
            .as_ref()
            .filter(|cached| cached.url == url && cached.fetched_at.elapsed() < self.ttl)
            .map(|cached| cached.document.clone())
    }

    fn store(&self, url: String, document: DiscoveryDocument) {
        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(CachedDocument {
                url,
                document,
                fetched_at: Instant::now(),
            });
        }
    }

    // Transport failures and 5xx are `NetworkError` so the retry loop picks
    // them up; everything else fails immediately.
    async fn fetch(&self, url: &str) -> AuthResult<DiscoveryDocument> {
        let mut request = HttpRequest::get(url);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| AuthError::NetworkError(e.to_string()))?;

        if response.status >= 500 {
            return Err(AuthError::NetworkError(format!("HTTP {}", response.status)));
        }
        if !response.is_success() {
            return Err(AuthError::InvalidResponse(format!("HTTP {}", response.status)));
        }

        response
            .json::<DiscoveryDocument>()
            .map_err(|e| AuthError::InvalidResponse(format!("Invalid discovery document: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpResponse, TransportError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Transport that replays canned responses and records requested URLs.
    struct ScriptedTransport {
        responses: Mutex<Vec<Result<HttpResponse, TransportError>>>,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push(request.url);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(TransportError::Connect("no scripted response".to_string()));
            }
            responses.remove(0)
        }
    }

    fn document(methods: Option<&[&str]>) -> HttpResponse {
        let mut body = serde_json::json!({
            "issuer": "https://id.example.com",
            "authorization_endpoint": "https://id.example.com/authorize",
            "token_endpoint": "https://id.example.com/token",
            "userinfo_endpoint": "https://id.example.com/userinfo",
            "end_session_endpoint": "https://id.example.com/logout",
        });
        if let Some(methods) = methods {
            body["code_challenge_methods_supported"] = serde_json::json!(methods);
        }
        HttpResponse::new(200, body.to_string())
    }

    fn configuration() -> OidcConfiguration {
        OidcConfiguration::new(
            "https://id.example.com",
            "field-app",
            "com.example.field:/cb",
            vec!["openid".to_string()],
        )
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_discover_populates_endpoints() {
        let transport = ScriptedTransport::new(vec![Ok(document(Some(&["plain", "S256"])))]);
        let resolver = DiscoveryResolver::new(transport.clone());

        let config = resolver.discover(&configuration()).await.unwrap();

        assert!(config.is_discovered());
        assert_eq!(config.token_endpoint.as_deref(), Some("https://id.example.com/token"));
        assert_eq!(config.end_session_endpoint.as_deref(), Some("https://id.example.com/logout"));
        assert_eq!(config.client_id, "field-app");
        assert_eq!(
            transport.requests.lock().unwrap()[0],
            "https://id.example.com/.well-known/openid-configuration"
        );
    }

    #[tokio::test]
    async fn test_cache_skips_network_within_ttl() {
        let transport = ScriptedTransport::new(vec![Ok(document(None))]);
        let resolver = DiscoveryResolver::new(transport.clone());

        resolver.discover(&configuration()).await.unwrap();
        let second = resolver.discover(&configuration()).await.unwrap();

        assert!(second.is_discovered());
        assert_eq!(transport.request_count(), 1);
        assert!(resolver.cached_document().is_some());
    }

    #[tokio::test]
    async fn test_expired_or_invalidated_cache_refetches() {
        let transport = ScriptedTransport::new(vec![Ok(document(None)), Ok(document(None))]);
        let resolver = DiscoveryResolver::new(transport.clone()).with_ttl(Duration::ZERO);

        resolver.discover(&configuration()).await.unwrap();
        resolver.discover(&configuration()).await.unwrap();
        assert_eq!(transport.request_count(), 2);

        let transport = ScriptedTransport::new(vec![Ok(document(None)), Ok(document(None))]);
        let resolver = DiscoveryResolver::new(transport.clone());
        resolver.discover(&configuration()).await.unwrap();
        resolver.invalidate();
        resolver.discover(&configuration()).await.unwrap();
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test]
    async fn test_plain_only_provider_is_rejected() {
        let transport = ScriptedTransport::new(vec![Ok(document(Some(&["plain"])))]);
        let resolver = DiscoveryResolver::new(transport);

        let result = resolver.discover(&configuration()).await;
        assert!(matches!(result, Err(AuthError::ConfigurationError(_))));
        assert!(resolver.cached_document().is_none());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let transport = ScriptedTransport::new(vec![
            Err(TransportError::Connect("refused".to_string())),
            Ok(HttpResponse::new(503, "")),
            Ok(document(None)),
        ]);
        let resolver = DiscoveryResolver::new(transport.clone()).with_retry(fast_retry());

        assert!(resolver.discover(&configuration()).await.is_ok());
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn test_failures_map_to_discovery_failed() {
        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(404, "not found"))]);
        let resolver = DiscoveryResolver::new(transport.clone()).with_retry(fast_retry());
        let result = resolver.discover(&configuration()).await;
        assert!(matches!(result, Err(AuthError::DiscoveryFailed(_))));
        assert_eq!(transport.request_count(), 1);

        let transport = ScriptedTransport::new(vec![Ok(HttpResponse::new(200, "{\"issuer\":1}"))]);
        let resolver = DiscoveryResolver::new(transport);
        let result = resolver.discover(&configuration()).await;
        assert!(matches!(result, Err(AuthError::DiscoveryFailed(_))));

        let transport = ScriptedTransport::new(vec![]);
        let resolver = DiscoveryResolver::new(transport.clone()).with_retry(fast_retry());
        let result = resolver.discover(&configuration()).await;
        assert!(matches!(result, Err(AuthError::DiscoveryFailed(_))));
        assert_eq!(transport.request_count(), 3);
    }
}
