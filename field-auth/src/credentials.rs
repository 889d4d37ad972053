//! Persistent credential storage for the active session.
//!
//! All credentials are kept in one JSON record under a single `(service,
//! account)` entry of the underlying [`SecretStore`], so a token refresh can
//! never leave a new access token next to a stale expiry. Backend failures are
//! logged and read as "absent": a broken keychain looks like a signed-out
//! user, never like a crash.

use crate::claims::User;
use crate::store::SecretStore;
use crate::token::{expiry_from_now, is_expiry_valid_at, TokenSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Account under which the session record is stored.
pub const DEFAULT_ACCOUNT: &str = "session";

/// Individually addressable credential fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    /// Access token
    AccessToken,
    /// Refresh token
    RefreshToken,
    /// ID token
    IdToken,
    /// Access token expiry (RFC 3339)
    TokenExpiry,
    /// Cached user profile (JSON)
    UserProfile,
}

impl CredentialKey {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKey::AccessToken => "access_token",
            CredentialKey::RefreshToken => "refresh_token",
            CredentialKey::IdToken => "id_token",
            CredentialKey::TokenExpiry => "token_expiry",
            CredentialKey::UserProfile => "user_profile",
        }
    }
}

/// Persisted session record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<User>,
}

impl CredentialRecord {
    fn is_empty(&self) -> bool {
        self.access_token.is_none()
            && self.refresh_token.is_none()
            && self.id_token.is_none()
            && self.expiry.is_none()
            && self.user.is_none()
    }
}

/// Credential store for the single active session.
pub struct CredentialStore {
    backend: Arc<dyn SecretStore>,
    service: String,
    account: String,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("service", &self.service)
            .field("account", &self.account)
            .finish()
    }
}

impl CredentialStore {
    /// Create a store for `service` using the default account.
    pub fn new(backend: Arc<dyn SecretStore>, service: impl Into<String>) -> Self {
        Self::with_account(backend, service, DEFAULT_ACCOUNT)
    }

    /// Create a store for an explicit `(service, account)` pair.
    pub fn with_account(
        backend: Arc<dyn SecretStore>,
        service: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            service: service.into(),
            account: account.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Read a single credential field.
    pub fn get(&self, key: CredentialKey) -> Option<String> {
        let record = self.load_record();
        match key {
            CredentialKey::AccessToken => record.access_token,
            CredentialKey::RefreshToken => record.refresh_token,
            CredentialKey::IdToken => record.id_token,
            CredentialKey::TokenExpiry => record.expiry.map(|expiry| expiry.to_rfc3339()),
            CredentialKey::UserProfile => record
                .user
                .and_then(|user| serde_json::to_string(&user).ok()),
        }
    }

    /// Write a single credential field. Returns `false` if the value was
    /// rejected or could not be persisted.
    pub fn set(&self, key: CredentialKey, value: &str) -> bool {
        let value = value.to_string();
        match key {
            CredentialKey::AccessToken => self.update(|record| record.access_token = Some(value)),
            CredentialKey::RefreshToken => self.update(|record| record.refresh_token = Some(value)),
            CredentialKey::IdToken => self.update(|record| record.id_token = Some(value)),
            CredentialKey::TokenExpiry => match DateTime::parse_from_rfc3339(&value) {
                Ok(expiry) => self.update(|record| record.expiry = Some(expiry.with_timezone(&Utc))),
                Err(e) => {
                    warn!(key = key.as_str(), error = %e, "Rejected malformed expiry");
                    false
                }
            },
            CredentialKey::UserProfile => match serde_json::from_str::<User>(&value) {
                Ok(user) => self.update(|record| record.user = Some(user)),
                Err(e) => {
                    warn!(key = key.as_str(), error = %e, "Rejected malformed user profile");
                    false
                }
            },
        }
    }

    /// Remove a single credential field.
    pub fn delete(&self, key: CredentialKey) -> bool {
        self.update(|record| match key {
            CredentialKey::AccessToken => record.access_token = None,
            CredentialKey::RefreshToken => record.refresh_token = None,
            CredentialKey::IdToken => record.id_token = None,
            CredentialKey::TokenExpiry => record.expiry = None,
            CredentialKey::UserProfile => record.user = None,
        })
    }

    /// Replace all tokens in one write.
    ///
    /// The expiry is computed from `expires_in_seconds`. If the ID token
    /// decodes, the cached user is replaced as well; otherwise the previous
    /// user is kept.
    pub fn store_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        id_token: Option<&str>,
        expires_in_seconds: Option<i64>,
    ) -> bool {
        let user = id_token.and_then(|token| match User::from_id_token(token) {
            Ok(user) => Some(user),
            Err(e) => {
                debug!(error = %e, "ID token did not decode, keeping cached user");
                None
            }
        });
        let expiry = expiry_from_now(expires_in_seconds);

        self.update(|record| {
            record.access_token = Some(access_token.to_string());
            record.refresh_token = refresh_token.map(String::from);
            record.id_token = id_token.map(String::from);
            record.expiry = expiry;
            if let Some(user) = user {
                record.user = Some(user);
            }
        })
    }

    /// Store the result of a refresh grant.
    ///
    /// Providers may or may not rotate refresh tokens, and may omit the ID
    /// token on refresh: absent values keep the previously stored ones. The
    /// read and the write happen under one lock.
    pub fn store_refreshed_tokens(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
        id_token: Option<&str>,
        expires_in_seconds: Option<i64>,
    ) -> bool {
        let user = id_token.and_then(|token| User::from_id_token(token).ok());
        let expiry = expiry_from_now(expires_in_seconds);

        self.update(|record| {
            record.access_token = Some(access_token.to_string());
            if let Some(refresh_token) = refresh_token {
                record.refresh_token = Some(refresh_token.to_string());
            }
            if let Some(id_token) = id_token {
                record.id_token = Some(id_token.to_string());
            }
            record.expiry = expiry;
            if let Some(user) = user {
                record.user = Some(user);
            }
        })
    }

    /// Cache the user profile.
    pub fn store_user(&self, user: &User) -> bool {
        let user = user.clone();
        self.update(|record| record.user = Some(user))
    }

    /// Remove every stored credential. Safe to call repeatedly.
    pub fn clear_all(&self) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = self.backend.delete(&self.service, &self.account) {
            warn!(service = %self.service, error = %e, "Failed to clear credentials");
        }
    }

    /// Stored tokens, if an access token is present.
    pub fn token_set(&self) -> Option<TokenSet> {
        let record = self.load_record();
        record.access_token.map(|access_token| TokenSet {
            access_token,
            refresh_token: record.refresh_token,
            id_token: record.id_token,
            expiry: record.expiry,
        })
    }

    /// Stored access token.
    pub fn access_token(&self) -> Option<String> {
        self.load_record().access_token
    }

    /// Stored refresh token.
    pub fn refresh_token(&self) -> Option<String> {
        self.load_record().refresh_token
    }

    /// Stored ID token.
    pub fn id_token(&self) -> Option<String> {
        self.load_record().id_token
    }

    /// Stored access token expiry.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.load_record().expiry
    }

    /// Cached user profile.
    pub fn user(&self) -> Option<User> {
        self.load_record().user
    }

    /// Access token if present and outside the expiry buffer.
    pub fn valid_access_token(&self) -> Option<String> {
        let record = self.load_record();
        record
            .access_token
            .filter(|_| is_expiry_valid_at(record.expiry, Utc::now()))
    }

    /// Check if a usable access token is stored.
    pub fn has_valid_access_token(&self) -> bool {
        self.valid_access_token().is_some()
    }

    /// Check if a refresh token is stored.
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token().is_some()
    }

    fn load_record(&self) -> CredentialRecord {
        let raw = match self.backend.load(&self.service, &self.account) {
            Ok(Some(raw)) => raw,
            Ok(None) => return CredentialRecord::default(),
            Err(e) => {
                warn!(service = %self.service, error = %e, "Failed to load credentials");
                return CredentialRecord::default();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(service = %self.service, error = %e, "Stored credentials are corrupt");
            CredentialRecord::default()
        })
    }

    fn update<F>(&self, mutate: F) -> bool
    where
        F: FnOnce(&mut CredentialRecord),
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut record = self.load_record();
        mutate(&mut record);

        let result = if record.is_empty() {
            self.backend.delete(&self.service, &self.account)
        } else {
            match serde_json::to_string(&record) {
                Ok(raw) => self.backend.store(&self.service, &self.account, &raw),
                Err(e) => {
                    warn!(error = %e, "Failed to encode credentials");
                    return false;
                }
            }
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(service = %self.service, error = %e, "Failed to persist credentials");
                false
            }
        }
    }
}
