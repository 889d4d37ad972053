//! Identity claims and the signed-in user
//!
//! Claims are read from the ID token returned by the token endpoint, or from
//! the UserInfo endpoint when no usable ID token is available. The ID token
//! signature is not verified here: it was received directly from the token
//! endpoint over TLS and is only used to populate the user profile.

use crate::error::{AuthError, AuthResult};
use crate::roles::UserRole;
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Keycloak-style realm role container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealmAccess {
    /// Realm roles
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Identity claims carried by an ID token or a UserInfo response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileClaims {
    /// Subject (stable user ID)
    pub sub: String,

    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Expiration time (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Nonce echoed from the authorization request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// First name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,

    /// Last name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,

    /// Login name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    /// Application roles
    #[serde(default)]
    pub roles: Vec<String>,

    /// Group memberships (some providers carry roles here)
    #[serde(default)]
    pub groups: Vec<String>,

    /// Keycloak realm roles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm_access: Option<RealmAccess>,

    /// Remaining claims
    #[serde(default, flatten)]
    pub custom: HashMap<String, serde_json::Value>,
}

impl ProfileClaims {
    /// Decode the claims of an ID token without verifying its signature.
    pub fn from_id_token(id_token: &str) -> AuthResult<Self> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let token_data: TokenData<ProfileClaims> =
            decode(id_token, &DecodingKey::from_secret(&[]), &validation)
                .map_err(|e| AuthError::IdTokenParsingFailed(e.to_string()))?;

        Ok(token_data.claims)
    }

    /// All role names from `roles`, `groups` and `realm_access.roles`.
    ///
    /// Group paths such as `/technician` are reduced to their last segment.
    pub fn all_roles(&self) -> Vec<String> {
        let realm_roles = self
            .realm_access
            .iter()
            .flat_map(|access| access.roles.iter());

        let mut roles: Vec<String> = self
            .roles
            .iter()
            .chain(realm_roles)
            .cloned()
            .chain(
                self.groups
                    .iter()
                    .filter_map(|group| group.rsplit('/').next().map(String::from)),
            )
            .filter(|role| !role.is_empty())
            .collect();
        roles.sort();
        roles.dedup();
        roles
    }

    /// Display name, falling back to given + family name.
    pub fn display_name(&self) -> Option<String> {
        self.name.clone().or_else(|| {
            match (&self.given_name, &self.family_name) {
                (Some(given), Some(family)) => Some(format!("{} {}", given, family)),
                (Some(given), None) => Some(given.clone()),
                (None, Some(family)) => Some(family.clone()),
                (None, None) => None,
            }
        })
    }
}

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Subject identifier
    pub id: String,

    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Login name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    /// Provider role names
    #[serde(default)]
    pub roles: Vec<String>,
}

impl User {
    /// Build a user from identity claims.
    pub fn from_claims(claims: &ProfileClaims) -> Self {
        Self {
            id: claims.sub.clone(),
            email: claims.email.clone(),
            name: claims.display_name(),
            preferred_username: claims.preferred_username.clone(),
            roles: claims.all_roles(),
        }
    }

    /// Decode an ID token into a user.
    pub fn from_id_token(id_token: &str) -> AuthResult<Self> {
        ProfileClaims::from_id_token(id_token).map(|claims| Self::from_claims(&claims))
    }

    /// Effective role, always derived from the current role set.
    pub fn role(&self) -> UserRole {
        UserRole::from_roles(&self.roles)
    }

    /// Check if the user has the technician role.
    pub fn is_technician(&self) -> bool {
        self.role() == UserRole::Technician
    }

    /// Check if the user only has read access.
    pub fn is_viewer(&self) -> bool {
        self.role() == UserRole::Viewer
    }
}
