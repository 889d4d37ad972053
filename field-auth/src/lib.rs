//! # Field Authentication
//!
//! OAuth 2.0 Authorization Code + PKCE client for the field inspection
//! applications, with OpenID Connect discovery and secure token storage.
//!
//! ## Overview
//!
//! The field-auth crate handles:
//! - **PKCE**: Per-attempt verifier, S256 challenge, state and nonce
//! - **Discovery**: Cached OIDC provider metadata with S256 validation
//! - **Login**: Browser redirect, CSRF check, code exchange, user resolution
//! - **Tokens**: Refresh with rotation, 60 second expiry buffer
//! - **Storage**: Whole-record credential writes over a pluggable secret store
//!
//! ## Features
//!
//! - `loopback` (default): system browser + loopback listener `BrowserSession`
//! - `keyring`: OS keychain `SecretStore`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use field_auth::{
//!     AuthCoordinator, AuthSettings, CredentialStore, LoopbackBrowser, MemorySecretStore,
//!     ReqwestTransport,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = AuthSettings::from_env();
//! let transport = Arc::new(ReqwestTransport::new(settings.http_timeout())?);
//! let browser = Arc::new(LoopbackBrowser::new(&settings.redirect_uri)?);
//! let credentials = Arc::new(CredentialStore::new(
//!     Arc::new(MemorySecretStore::new()),
//!     settings.keychain_service.clone(),
//! ));
//!
//! let coordinator = AuthCoordinator::from_settings(&settings, transport, browser, credentials);
//! let user = coordinator.login().await?;
//! println!("Signed in as {} ({})", user.id, user.role().display_name());
//! # Ok(())
//! # }
//! ```
//!
//! Session monitoring and the application facade live in `field-session`.

pub mod browser;
pub mod claims;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod http;
pub mod pkce;
pub mod retry;
pub mod roles;
pub mod store;
pub mod token;

// Re-export main types
pub use browser::{BrowserError, BrowserSession};
pub use claims::{ProfileClaims, User};
pub use config::{AuthSettings, ConfigError, OidcConfiguration};
pub use coordinator::{AuthCoordinator, AuthSnapshot, LoginPhase, TokenProvider};
pub use credentials::{CredentialKey, CredentialStore};
pub use discovery::{DiscoveryDocument, DiscoveryResolver};
pub use error::{AuthError, AuthResult};
pub use http::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};
pub use pkce::PkceParameters;
pub use roles::UserRole;
pub use store::{FileSecretStore, MemorySecretStore, SecretStore, SecretStoreError};
pub use token::TokenSet;

#[cfg(feature = "loopback")]
pub use browser::LoopbackBrowser;

#[cfg(feature = "keyring")]
pub use store::KeyringSecretStore;
