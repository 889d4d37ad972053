//! Role-based access control
//!
//! The application distinguishes two effective roles. Provider role names are
//! mapped onto them case-insensitively; anything unrecognized grants the
//! least-privileged role.

use serde::{Deserialize, Serialize};

/// Effective role of the signed-in user.
///
/// Roles are hierarchical: Viewer < Technician.
///
/// # Permission Model
///
/// - **Viewer**: Read-only access to assets and reports
/// - **Technician**: Can record inspections and modify asset data
///
/// # Examples
///
/// ```
/// use field_auth::UserRole;
///
/// let roles = vec!["offline_access".to_string(), "Technician".to_string()];
/// assert_eq!(UserRole::from_roles(&roles), UserRole::Technician);
/// assert!(UserRole::Technician.can_edit());
/// assert!(!UserRole::Viewer.can_edit());
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Read-only access
    Viewer = 1,

    /// Field technician (also granted to administrators)
    Technician = 2,
}

impl UserRole {
    /// Derive the effective role from a provider role set.
    ///
    /// Technician if any role is "technician" or "admin" (case-insensitive),
    /// otherwise Viewer.
    pub fn from_roles<S: AsRef<str>>(roles: &[S]) -> Self {
        roles
            .iter()
            .filter_map(|role| Self::parse(role.as_ref()))
            .max()
            .unwrap_or_default()
    }

    /// Parse a single provider role name.
    ///
    /// # Examples
    ///
    /// ```
    /// use field_auth::UserRole;
    ///
    /// assert_eq!(UserRole::parse("ADMIN"), Some(UserRole::Technician));
    /// assert_eq!(UserRole::parse("viewer"), Some(UserRole::Viewer));
    /// assert_eq!(UserRole::parse("auditor"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "technician" | "admin" => Some(Self::Technician),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }

    /// Check if this role can modify asset data.
    pub fn can_edit(&self) -> bool {
        *self >= UserRole::Technician
    }

    /// Get string representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Technician => "technician",
        }
    }

    /// Get a human-readable display name for the role.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Viewer => "Viewer",
            Self::Technician => "Technician",
        }
    }
}

impl Default for UserRole {
    fn default() -> Self {
        Self::Viewer
    }
}
