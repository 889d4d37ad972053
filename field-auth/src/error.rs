//! Error types for authentication operations
//!
//! This module defines the error taxonomy for the login, refresh and logout
//! flows. Classification (`is_retryable`, `requires_reauthentication`) is
//! keyed only on the error kind so callers can dispatch without inspecting
//! messages.

use thiserror::Error;

/// Authentication error types.
///
/// Payloads are plain strings so errors can be cloned into published state
/// and compared in tests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No credentials are stored for the current session
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The user dismissed the interactive login
    #[error("Login was cancelled")]
    LoginCancelled,

    /// Redirect state did not match the state sent with the authorization request
    #[error("Invalid state parameter in authorization response")]
    InvalidState,

    /// Access token is stale and there is no refresh token to renew it
    #[error("No refresh token available")]
    NoRefreshToken,

    /// Refreshing the access token failed
    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(Box<AuthError>),

    /// OIDC discovery document could not be fetched or decoded
    #[error("OIDC discovery failed: {0}")]
    DiscoveryFailed(String),

    /// Transport-level failure talking to the identity provider
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Provider returned a response that could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// UserInfo endpoint rejected the request
    #[error("Failed to fetch user info: {0}")]
    UserInfoFailed(String),

    /// Authorization code exchange was rejected
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// Redirect carried no authorization code
    #[error("Missing or empty authorization code")]
    InvalidAuthorizationCode,

    /// Token endpoint answered 200 with a body that is not a token response
    #[error("Invalid token response: {0}")]
    InvalidTokenResponse(String),

    /// Session reached its expiry and must be re-established
    #[error("Session has expired")]
    SessionExpired,

    /// Provider or client configuration is unusable
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Secret store could not be opened
    #[error("Keychain error: {0}")]
    KeychainError(String),

    /// ID token could not be decoded into claims
    #[error("Failed to parse ID token: {0}")]
    IdTokenParsingFailed(String),

    /// Another login attempt is already running
    #[error("A login is already in progress")]
    LoginInProgress,
}

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    /// Check if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::NetworkError(_) | AuthError::DiscoveryFailed(_))
    }

    /// Check if the user has to log in again.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            AuthError::NotAuthenticated
                | AuthError::NoRefreshToken
                | AuthError::TokenRefreshFailed(_)
                | AuthError::SessionExpired
                | AuthError::InvalidState
        )
    }

    /// Innermost error, unwrapping `TokenRefreshFailed`.
    pub fn root_cause(&self) -> &AuthError {
        match self {
            AuthError::TokenRefreshFailed(inner) => inner.root_cause(),
            other => other,
        }
    }

    /// Cancellation is user intent and is never surfaced.
    pub fn is_silent(&self) -> bool {
        matches!(self, AuthError::LoginCancelled)
    }

    /// Message suitable for showing to the user, `None` when nothing should be shown.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            AuthError::LoginCancelled => None,
            AuthError::InvalidState | AuthError::InvalidAuthorizationCode => {
                Some("Sign-in could not be completed. Please try again.")
            }
            AuthError::NetworkError(_) | AuthError::DiscoveryFailed(_) => {
                Some("Unable to reach the sign-in service. Check your connection and try again.")
            }
            AuthError::SessionExpired
            | AuthError::NoRefreshToken
            | AuthError::NotAuthenticated
            | AuthError::TokenRefreshFailed(_) => Some("Your session has expired. Please sign in again."),
            AuthError::LoginInProgress => Some("Sign-in is already in progress."),
            _ => Some("Sign-in failed. Please try again."),
        }
    }

    /// Get error code for logs and API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::NotAuthenticated => "NOT_AUTHENTICATED",
            AuthError::LoginCancelled => "LOGIN_CANCELLED",
            AuthError::InvalidState => "INVALID_STATE",
            AuthError::NoRefreshToken => "NO_REFRESH_TOKEN",
            AuthError::TokenRefreshFailed(_) => "TOKEN_REFRESH_FAILED",
            AuthError::DiscoveryFailed(_) => "DISCOVERY_FAILED",
            AuthError::NetworkError(_) => "NETWORK_ERROR",
            AuthError::InvalidResponse(_) => "INVALID_RESPONSE",
            AuthError::UserInfoFailed(_) => "USER_INFO_FAILED",
            AuthError::TokenExchangeFailed(_) => "TOKEN_EXCHANGE_FAILED",
            AuthError::InvalidAuthorizationCode => "INVALID_AUTHORIZATION_CODE",
            AuthError::InvalidTokenResponse(_) => "INVALID_TOKEN_RESPONSE",
            AuthError::SessionExpired => "SESSION_EXPIRED",
            AuthError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            AuthError::KeychainError(_) => "KEYCHAIN_ERROR",
            AuthError::IdTokenParsingFailed(_) => "ID_TOKEN_PARSING_FAILED",
            AuthError::LoginInProgress => "LOGIN_IN_PROGRESS",
        }
    }
}
