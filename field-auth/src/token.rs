//! Token model and token endpoint wire types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Clock-skew buffer: a token counts as expired this long before its expiry.
pub const EXPIRY_BUFFER_SECS: i64 = 60;

/// Longest `expires_in` honoured; larger values are clamped so the expiry
/// stays representable as an RFC 3339 timestamp.
pub const MAX_EXPIRES_IN_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// Tokens held for the active session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSet {
    /// Access token
    pub access_token: String,

    /// Refresh token (if issued)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// ID token (for OIDC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Absolute access token expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("expiry", &self.expiry)
            .finish()
    }
}

impl TokenSet {
    /// Check if the access token is usable now.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Check if the access token is usable at `now`.
    ///
    /// No expiry means the token never expires; otherwise it is valid until
    /// [`EXPIRY_BUFFER_SECS`] before the expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        is_expiry_valid_at(self.expiry, now)
    }

    /// Time left before the access token expires (not counting the buffer).
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expiry.map(|expiry| expiry - now)
    }
}

/// Validity rule shared by the token set and the credential store.
pub fn is_expiry_valid_at(expiry: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expiry {
        None => true,
        Some(expiry) => expiry
            .checked_sub_signed(Duration::seconds(EXPIRY_BUFFER_SECS))
            .map_or(false, |deadline| now < deadline),
    }
}

/// Absolute expiry for a relative `expires_in`.
///
/// Provider values are clamped to [`MAX_EXPIRES_IN_SECS`] in either direction.
pub fn expiry_from_now(expires_in_seconds: Option<i64>) -> Option<DateTime<Utc>> {
    expires_in_seconds.map(|secs| expiry_after(Utc::now(), secs))
}

fn expiry_after(now: DateTime<Utc>, expires_in_seconds: i64) -> DateTime<Utc> {
    let secs = expires_in_seconds.clamp(-MAX_EXPIRES_IN_SECS, MAX_EXPIRES_IN_SECS);
    Duration::try_seconds(secs)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(now)
}

/// Token endpoint success response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Access token
    pub access_token: String,

    /// Token type (usually "Bearer")
    #[serde(default)]
    pub token_type: Option<String>,

    /// Expires in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,

    /// Refresh token (if provided)
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// ID token (for OIDC)
    #[serde(default)]
    pub id_token: Option<String>,

    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

/// OAuth error response body (RFC 6749 section 5.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenErrorResponse {
    /// Error code, e.g. "invalid_grant"
    pub error: String,

    /// Human-readable description
    #[serde(default)]
    pub error_description: Option<String>,

    /// Link to documentation
    #[serde(default)]
    pub error_uri: Option<String>,
}

impl TokenErrorResponse {
    /// Description if present, otherwise the error code.
    pub fn message(&self) -> String {
        match &self.error_description {
            Some(description) => format!("{}: {}", self.error, description),
            None => self.error.clone(),
        }
    }
}
