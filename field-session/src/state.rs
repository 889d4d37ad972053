//! Session state machine types.

use chrono::Duration;
use field_auth::User;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the signed-in session.
///
/// ```text
/// Unknown ──restore──> Authenticated | Expired | LoggedOut | Error
/// Authenticated ──threshold──> Refreshing ──> Authenticated | Expired | Error
/// Authenticated ──stale token, no refresh token──> Expired
/// any ──logout──> LoggedOut
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SessionState {
    /// Stored credentials not evaluated yet
    #[default]
    Unknown,
    /// Session established
    Authenticated(User),
    /// Renewal was rejected; the user must log in again
    Expired,
    /// No session
    LoggedOut,
    /// Silent refresh in progress
    Refreshing,
    /// Last refresh failed transiently; the session is kept with stale data
    Error(String),
}

impl SessionState {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Unknown => "unknown",
            SessionState::Authenticated(_) => "authenticated",
            SessionState::Expired => "expired",
            SessionState::LoggedOut => "logged_out",
            SessionState::Refreshing => "refreshing",
            SessionState::Error(_) => "error",
        }
    }

    /// User of an established session.
    pub fn user(&self) -> Option<&User> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    /// Check if the session is established.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    /// States in which the monitor keeps evaluating tokens.
    pub fn is_monitored(&self) -> bool {
        matches!(
            self,
            SessionState::Authenticated(_) | SessionState::Refreshing | SessionState::Error(_)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Error(message) => write!(f, "error: {}", message),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Published session status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionStatus {
    /// Current state
    pub state: SessionState,
    /// Time left before the access token expires (negative once expired)
    pub time_until_expiry: Option<Duration>,
}

/// Application lifecycle transitions relevant to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppLifecycle {
    /// App became visible
    Foreground,
    /// App moved to the background
    Background,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "u1".to_string(),
            email: None,
            name: None,
            preferred_username: None,
            roles: vec!["technician".to_string()],
        }
    }

    #[test]
    fn test_default_is_unknown() {
        assert_eq!(SessionState::default(), SessionState::Unknown);
        assert!(!SessionState::default().is_monitored());
    }

    #[test]
    fn test_user_only_when_authenticated() {
        let state = SessionState::Authenticated(user());
        assert_eq!(state.user().map(|u| u.id.as_str()), Some("u1"));
        assert!(state.is_authenticated());
        assert!(SessionState::Expired.user().is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionState::LoggedOut.to_string(), "logged_out");
        assert_eq!(
            SessionState::Error("Network error: reset".to_string()).to_string(),
            "error: Network error: reset"
        );
    }

    #[test]
    fn test_serialized_form() {
        let value = serde_json::to_value(SessionState::Error("offline".to_string())).unwrap();
        assert_eq!(value, serde_json::json!({ "status": "error", "detail": "offline" }));

        let value = serde_json::to_value(SessionState::Expired).unwrap();
        assert_eq!(value, serde_json::json!({ "status": "expired" }));
    }
}
