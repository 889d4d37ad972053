//! Client and provider configuration.
//!
//! [`AuthSettings`] is the deployment-level configuration, loaded from
//! environment variables with defaults suitable for local development.
//! [`OidcConfiguration`] is the per-session provider description: an
//! immutable client identity plus the endpoints filled in by discovery.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Scopes requested when none are configured.
pub const DEFAULT_SCOPES: &[&str] = &["openid", "profile", "email", "offline_access"];

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Missing required environment variable.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}

/// Deployment configuration for the authentication client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// OIDC issuer base URL (e.g., "https://id.example.com/realms/field").
    pub issuer: String,

    /// Public client identifier registered with the provider.
    pub client_id: String,

    /// Registered redirect URI (custom scheme or loopback).
    pub redirect_uri: String,

    /// Where the provider sends the browser after end-session.
    pub post_logout_redirect_uri: Option<String>,

    /// Scopes to request.
    pub scopes: Vec<String>,

    /// Service name under which credentials are stored.
    pub keychain_service: String,

    /// Timeout for token, discovery and userinfo requests in seconds.
    pub http_timeout_secs: u64,

    /// How long a fetched discovery document stays fresh in seconds.
    pub discovery_ttl_secs: u64,

    /// Whether to send an OIDC nonce with the authorization request.
    pub include_nonce: bool,
}

impl Default for AuthSettings {
    /// Returns default configuration suitable for local development.
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8180/realms/field".to_string(),
            client_id: "field-app".to_string(),
            redirect_uri: "http://127.0.0.1:8765/callback".to_string(),
            post_logout_redirect_uri: None,
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            keychain_service: "com.field.auth".to_string(),
            http_timeout_secs: 30,
            discovery_ttl_secs: 3600,
            include_nonce: true,
        }
    }
}

impl AuthSettings {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `FIELD_AUTH_ISSUER`: OIDC issuer URL
    /// - `FIELD_AUTH_CLIENT_ID`: OAuth client id
    /// - `FIELD_AUTH_REDIRECT_URI`: registered redirect URI
    /// - `FIELD_AUTH_POST_LOGOUT_REDIRECT_URI`: end-session redirect (default: redirect URI)
    /// - `FIELD_AUTH_SCOPES`: space separated scopes (default: openid profile email offline_access)
    /// - `FIELD_AUTH_KEYCHAIN_SERVICE`: credential service name (default: com.field.auth)
    /// - `FIELD_AUTH_HTTP_TIMEOUT_SECS`: request timeout in seconds (default: 30)
    /// - `FIELD_AUTH_DISCOVERY_TTL_SECS`: discovery cache lifetime (default: 3600)
    /// - `FIELD_AUTH_INCLUDE_NONCE`: send an OIDC nonce (default: true)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            issuer: std::env::var("FIELD_AUTH_ISSUER").unwrap_or(default.issuer),
            client_id: std::env::var("FIELD_AUTH_CLIENT_ID").unwrap_or(default.client_id),
            redirect_uri: std::env::var("FIELD_AUTH_REDIRECT_URI").unwrap_or(default.redirect_uri),
            post_logout_redirect_uri: std::env::var("FIELD_AUTH_POST_LOGOUT_REDIRECT_URI").ok(),
            scopes: std::env::var("FIELD_AUTH_SCOPES")
                .ok()
                .map(|s| s.split_whitespace().map(String::from).collect::<Vec<_>>())
                .filter(|scopes| !scopes.is_empty())
                .unwrap_or(default.scopes),
            keychain_service: std::env::var("FIELD_AUTH_KEYCHAIN_SERVICE")
                .unwrap_or(default.keychain_service),
            http_timeout_secs: std::env::var("FIELD_AUTH_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.http_timeout_secs),
            discovery_ttl_secs: std::env::var("FIELD_AUTH_DISCOVERY_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.discovery_ttl_secs),
            include_nonce: std::env::var("FIELD_AUTH_INCLUDE_NONCE")
                .map(|s| s != "false" && s != "0")
                .unwrap_or(default.include_nonce),
        }
    }

    /// Get the request timeout as a Duration.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Get the discovery cache lifetime as a Duration.
    pub fn discovery_ttl(&self) -> Duration {
        Duration::from_secs(self.discovery_ttl_secs)
    }

    /// Validate that the configuration can drive a login.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::MissingEnvVar("FIELD_AUTH_CLIENT_ID".to_string()));
        }
        Url::parse(&self.issuer).map_err(|e| ConfigError::InvalidValue {
            key: "issuer".to_string(),
            message: e.to_string(),
        })?;
        Url::parse(&self.redirect_uri).map_err(|e| ConfigError::InvalidValue {
            key: "redirect_uri".to_string(),
            message: e.to_string(),
        })?;
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "http_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Build the undiscovered provider configuration.
    pub fn oidc_configuration(&self) -> OidcConfiguration {
        let mut configuration = OidcConfiguration::new(
            self.issuer.clone(),
            self.client_id.clone(),
            self.redirect_uri.clone(),
            self.scopes.clone(),
        );
        configuration.post_logout_redirect_uri = self.post_logout_redirect_uri.clone();
        configuration
    }
}

/// OpenID Connect provider configuration for one session.
///
/// `issuer`, `client_id`, `redirect_uri` and `scopes` identify the client and
/// never change. The endpoint fields start empty and are populated by
/// discovery (or set explicitly for providers without discovery).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcConfiguration {
    /// Issuer base URL
    pub issuer: String,

    /// Client ID
    pub client_id: String,

    /// Redirect URI
    pub redirect_uri: String,

    /// Scopes to request
    pub scopes: Vec<String>,

    /// Post-logout redirect (defaults to the redirect URI)
    #[serde(default)]
    pub post_logout_redirect_uri: Option<String>,

    /// Authorization endpoint
    #[serde(default)]
    pub authorization_endpoint: Option<String>,

    /// Token endpoint
    #[serde(default)]
    pub token_endpoint: Option<String>,

    /// UserInfo endpoint
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,

    /// End-session (RP-initiated logout) endpoint
    #[serde(default)]
    pub end_session_endpoint: Option<String>,

    /// JWKS URI
    #[serde(default)]
    pub jwks_uri: Option<String>,

    /// Token revocation endpoint
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
}

impl OidcConfiguration {
    /// Create an undiscovered configuration.
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scopes,
            post_logout_redirect_uri: None,
            authorization_endpoint: None,
            token_endpoint: None,
            userinfo_endpoint: None,
            end_session_endpoint: None,
            jwks_uri: None,
            revocation_endpoint: None,
        }
    }

    /// Set the authorization and token endpoints explicitly.
    pub fn with_endpoints(
        mut self,
        authorization_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
    ) -> Self {
        self.authorization_endpoint = Some(authorization_endpoint.into());
        self.token_endpoint = Some(token_endpoint.into());
        self
    }

    /// Both endpoints needed for a login are known.
    pub fn is_discovered(&self) -> bool {
        self.authorization_endpoint.is_some() && self.token_endpoint.is_some()
    }

    /// Well-known discovery document URL for the issuer.
    pub fn discovery_url(&self) -> String {
        format!(
            "{}/.well-known/openid-configuration",
            self.issuer.trim_end_matches('/')
        )
    }

    /// Scheme of the redirect URI, matched against incoming redirects.
    pub fn callback_scheme(&self) -> Option<String> {
        Url::parse(&self.redirect_uri)
            .ok()
            .map(|url| url.scheme().to_string())
    }

    /// Post-logout redirect, falling back to the login redirect URI.
    pub fn post_logout_redirect(&self) -> &str {
        self.post_logout_redirect_uri
            .as_deref()
            .unwrap_or(&self.redirect_uri)
    }

    /// Space separated scope string for the authorization request.
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}
