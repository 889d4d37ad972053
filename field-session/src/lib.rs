//! # Field Session
//!
//! Session lifecycle and role-based authorization for the field inspection
//! applications, built on `field-auth`.
//!
//! ## Overview
//!
//! - **State**: `SessionState` machine published over a watch channel
//! - **Monitor**: periodic checks, proactive silent refresh, lifecycle hooks
//! - **Facade**: `AuthorizationService`, the single entry point for the app
//!
//! ## Usage
//!
//! ```rust,no_run
//! use field_auth::AuthSettings;
//! use field_session::{AppLifecycle, AuthorizationService, MonitorConfig, SessionState};
//!
//! # async fn example() -> Result<(), field_auth::AuthError> {
//! let service = AuthorizationService::builder(AuthSettings::from_env())
//!     .monitor_config(MonitorConfig::from_env())
//!     .secret_directory("/var/lib/field/credentials")
//!     .build()?;
//!
//! if service.restore_session().await == SessionState::LoggedOut {
//!     service.login().await?;
//! }
//! service.start_monitoring();
//!
//! if service.require_technician_role() {
//!     let token = service.get_access_token().await?;
//!     println!("Editing as {:?} with a {} byte token", service.role(), token.len());
//! }
//!
//! service.handle_lifecycle(AppLifecycle::Background).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod monitor;
pub mod service;
pub mod state;

// Re-export main types
pub use config::MonitorConfig;
pub use monitor::SessionMonitor;
pub use service::{AuthorizationService, AuthorizationServiceBuilder};
pub use state::{AppLifecycle, SessionState, SessionStatus};
