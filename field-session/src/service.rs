//! Authorization facade.
//!
//! [`AuthorizationService`] is the single entry point the application talks
//! to. It owns the coordinator and the session monitor, keeps them in step
//! across login and logout, and answers role-based permission queries.

use crate::config::MonitorConfig;
use crate::monitor::SessionMonitor;
use crate::state::{AppLifecycle, SessionState, SessionStatus};
use field_auth::retry::RetryConfig;
use field_auth::{
    AuthCoordinator, AuthError, AuthResult, AuthSettings, AuthSnapshot, BrowserSession,
    CredentialStore, FileSecretStore, HttpTransport, MemorySecretStore, OidcConfiguration,
    ReqwestTransport, SecretStore, TokenProvider, User, UserRole,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

/// Builder for [`AuthorizationService`].
///
/// Every collaborator can be injected; anything left unset is created from
/// the settings.
pub struct AuthorizationServiceBuilder {
    settings: AuthSettings,
    monitor_config: MonitorConfig,
    configuration: Option<OidcConfiguration>,
    transport: Option<Arc<dyn HttpTransport>>,
    browser: Option<Arc<dyn BrowserSession>>,
    secret_store: Option<Arc<dyn SecretStore>>,
    secret_directory: Option<PathBuf>,
    discovery_retry: Option<RetryConfig>,
}

impl AuthorizationServiceBuilder {
    fn new(settings: AuthSettings) -> Self {
        Self {
            settings,
            monitor_config: MonitorConfig::default(),
            configuration: None,
            transport: None,
            browser: None,
            secret_store: None,
            secret_directory: None,
            discovery_retry: None,
        }
    }

    /// Session monitor timing.
    pub fn monitor_config(mut self, config: MonitorConfig) -> Self {
        self.monitor_config = config;
        self
    }

    /// Provider configuration, e.g. with endpoints known in advance.
    pub fn configuration(mut self, configuration: OidcConfiguration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    /// HTTP transport for provider requests.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Browser used for the interactive login.
    pub fn browser(mut self, browser: Arc<dyn BrowserSession>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Backend for credential storage.
    pub fn secret_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.secret_store = Some(store);
        self
    }

    /// Store credentials as files under `directory`.
    pub fn secret_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.secret_directory = Some(directory.into());
        self
    }

    /// Backoff for discovery requests.
    pub fn discovery_retry(mut self, retry: RetryConfig) -> Self {
        self.discovery_retry = Some(retry);
        self
    }

    /// Build the service.
    ///
    /// # Errors
    ///
    /// - `ConfigurationError` for invalid settings, or when the default
    ///   transport or browser cannot be created
    /// - `KeychainError` when the secret directory cannot be opened
    pub fn build(self) -> AuthResult<AuthorizationService> {
        self.settings
            .validate()
            .map_err(|e| AuthError::ConfigurationError(e.to_string()))?;
        self.monitor_config
            .validate()
            .map_err(|e| AuthError::ConfigurationError(e.to_string()))?;

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::new(self.settings.http_timeout())
                    .map_err(|e| AuthError::ConfigurationError(e.to_string()))?,
            ),
        };

        let browser = match self.browser {
            Some(browser) => browser,
            None => default_browser(&self.settings)?,
        };

        let backend: Arc<dyn SecretStore> = match (self.secret_store, self.secret_directory) {
            (Some(store), _) => store,
            (None, Some(directory)) => Arc::new(
                FileSecretStore::open(directory).map_err(|e| AuthError::KeychainError(e.to_string()))?,
            ),
            (None, None) => {
                warn!("No secret store configured, credentials will not survive a restart");
                Arc::new(MemorySecretStore::new())
            }
        };
        let credentials = Arc::new(CredentialStore::new(
            backend,
            self.settings.keychain_service.clone(),
        ));

        let configuration = self
            .configuration
            .unwrap_or_else(|| self.settings.oidc_configuration());
        let mut coordinator = AuthCoordinator::new(configuration, transport, browser, credentials)
            .with_http_timeout(self.settings.http_timeout())
            .with_discovery_ttl(self.settings.discovery_ttl())
            .with_nonce(self.settings.include_nonce);
        if let Some(retry) = self.discovery_retry {
            coordinator = coordinator.with_discovery_retry(retry);
        }

        let coordinator = Arc::new(coordinator);
        let monitor = SessionMonitor::new(coordinator.clone(), self.monitor_config);

        Ok(AuthorizationService {
            coordinator,
            monitor,
        })
    }
}

#[cfg(feature = "loopback")]
fn default_browser(settings: &AuthSettings) -> AuthResult<Arc<dyn BrowserSession>> {
    let browser = field_auth::LoopbackBrowser::new(&settings.redirect_uri)
        .map_err(|e| AuthError::ConfigurationError(e.to_string()))?;
    Ok(Arc::new(browser))
}

#[cfg(not(feature = "loopback"))]
fn default_browser(_settings: &AuthSettings) -> AuthResult<Arc<dyn BrowserSession>> {
    Err(AuthError::ConfigurationError(
        "No browser session configured".to_string(),
    ))
}

/// Application entry point for authentication and authorization.
pub struct AuthorizationService {
    coordinator: Arc<AuthCoordinator>,
    monitor: Arc<SessionMonitor>,
}

impl std::fmt::Debug for AuthorizationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationService")
            .field("auth", &self.coordinator.snapshot())
            .field("session", &self.monitor.status())
            .finish()
    }
}

impl AuthorizationService {
    /// Start building a service for the given settings.
    pub fn builder(settings: AuthSettings) -> AuthorizationServiceBuilder {
        AuthorizationServiceBuilder::new(settings)
    }

    /// Underlying coordinator.
    pub fn coordinator(&self) -> &Arc<AuthCoordinator> {
        &self.coordinator
    }

    /// Underlying session monitor.
    pub fn monitor(&self) -> &Arc<SessionMonitor> {
        &self.monitor
    }

    // =========================================================================
    // Session operations
    // =========================================================================

    /// Run the interactive login and start tracking the session.
    #[instrument(skip(self))]
    pub async fn login(&self) -> AuthResult<User> {
        let user = self.coordinator.login().await?;
        self.monitor.on_login(user.clone());
        Ok(user)
    }

    /// Sign out. Safe to call repeatedly.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        self.coordinator.logout().await;
        self.monitor.on_logout();
    }

    /// Re-establish the session from stored credentials.
    pub async fn restore_session(&self) -> SessionState {
        self.monitor.restore().await
    }

    /// A usable access token, refreshing first if needed.
    ///
    /// # Errors
    ///
    /// - `SessionExpired` once the session has expired
    /// - `NotAuthenticated` when nothing is stored
    /// - refresh errors, which also update the session state
    pub async fn get_access_token(&self) -> AuthResult<String> {
        if self.monitor.state() == SessionState::Expired {
            return Err(AuthError::SessionExpired);
        }

        match self.coordinator.get_access_token().await {
            Ok(token) => Ok(token),
            Err(e) => {
                if matches!(e, AuthError::TokenRefreshFailed(_) | AuthError::NoRefreshToken) {
                    let state = self.monitor.handle_refresh_error(&e);
                    info!(state = state.as_str(), "Access token unavailable");
                }
                Err(e)
            }
        }
    }

    /// Check if stored credentials can re-establish a session.
    pub fn can_restore_session(&self) -> bool {
        self.coordinator.can_restore_session()
    }

    /// Synchronous access token source for request signing.
    pub fn token_provider(&self) -> TokenProvider {
        self.coordinator.token_provider()
    }

    /// React to an app lifecycle transition.
    pub async fn handle_lifecycle(&self, event: AppLifecycle) {
        self.monitor.handle_lifecycle(event).await;
    }

    /// Start periodic session checks.
    pub fn start_monitoring(&self) {
        self.monitor.start();
    }

    /// Stop periodic session checks.
    pub fn stop_monitoring(&self) {
        self.monitor.stop();
    }

    // =========================================================================
    // Observable state
    // =========================================================================

    /// Subscribe to login state changes.
    pub fn subscribe_auth(&self) -> watch::Receiver<AuthSnapshot> {
        self.coordinator.subscribe()
    }

    /// Subscribe to session state changes.
    pub fn subscribe_session(&self) -> watch::Receiver<SessionStatus> {
        self.monitor.subscribe()
    }

    /// Check if a session is established.
    pub fn is_authenticated(&self) -> bool {
        self.coordinator.is_authenticated()
    }

    /// The signed-in user.
    pub fn current_user(&self) -> Option<User> {
        self.coordinator.current_user()
    }

    /// Check if a login is in progress.
    pub fn is_loading(&self) -> bool {
        self.coordinator.snapshot().is_loading
    }

    /// Last error, cancellation included; check `is_silent` before showing it.
    pub fn error(&self) -> Option<AuthError> {
        self.coordinator.snapshot().error
    }

    /// Current session state.
    pub fn session_state(&self) -> SessionState {
        self.monitor.state()
    }

    /// Time left before the access token expires.
    pub fn time_until_expiry(&self) -> Option<chrono::Duration> {
        self.monitor.time_until_expiry()
    }

    // =========================================================================
    // Authorization queries
    // =========================================================================

    /// Effective role of the signed-in user.
    pub fn role(&self) -> Option<UserRole> {
        self.current_user().map(|user| user.role())
    }

    /// Check if the signed-in user is a technician.
    pub fn is_technician(&self) -> bool {
        self.role() == Some(UserRole::Technician)
    }

    /// Check if the signed-in user only has read access.
    pub fn is_viewer(&self) -> bool {
        self.role() == Some(UserRole::Viewer)
    }

    /// Check if there is a usable session.
    pub fn require_authentication(&self) -> bool {
        self.is_authenticated() && self.monitor.ensure_active().is_ok()
    }

    /// Check if there is a usable session with edit rights.
    pub fn require_technician_role(&self) -> bool {
        self.require_authentication() && self.is_technician()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use field_auth::{BrowserError, HttpRequest, HttpResponse, TransportError};
    use url::Url;

    struct Offline;

    #[async_trait]
    impl HttpTransport for Offline {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            Err(TransportError::Connect("offline".to_string()))
        }
    }

    struct Dismissing;

    #[async_trait]
    impl BrowserSession for Dismissing {
        async fn authorize(&self, _url: &Url, _scheme: &str) -> Result<Url, BrowserError> {
            Err(BrowserError::Cancelled)
        }
    }

    fn settings() -> AuthSettings {
        AuthSettings {
            issuer: "https://id.example.com/realms/field".to_string(),
            redirect_uri: "com.example.field:/cb".to_string(),
            ..Default::default()
        }
    }

    fn service() -> AuthorizationService {
        let configuration = settings()
            .oidc_configuration()
            .with_endpoints("https://id.example.com/authorize", "https://id.example.com/token");
        AuthorizationService::builder(settings())
            .configuration(configuration)
            .transport(Arc::new(Offline))
            .browser(Arc::new(Dismissing))
            .secret_store(Arc::new(MemorySecretStore::new()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_rejects_invalid_monitor_config() {
        let result = AuthorizationService::builder(settings())
            .transport(Arc::new(Offline))
            .browser(Arc::new(Dismissing))
            .monitor_config(MonitorConfig {
                check_interval_secs: 0,
                ..Default::default()
            })
            .build();

        assert!(matches!(result, Err(AuthError::ConfigurationError(_))));
    }

    #[test]
    fn test_initial_state() {
        let service = service();

        assert!(!service.is_authenticated());
        assert!(!service.is_loading());
        assert_eq!(service.session_state(), SessionState::Unknown);
        assert!(!service.require_authentication());
        assert!(!service.require_technician_role());
        assert!(!service.is_viewer());
        assert!(service.role().is_none());
        assert!(!service.can_restore_session());
        assert!((service.token_provider())().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_login_is_silent() {
        let service = service();

        let err = service.login().await.unwrap_err();

        assert_eq!(err, AuthError::LoginCancelled);
        assert!(service.error().map_or(false, |e| e.is_silent()));
        assert!(!service.is_authenticated());
        assert_eq!(service.session_state(), SessionState::Unknown);
    }

    #[tokio::test]
    async fn test_access_token_without_session() {
        let service = service();
        assert_eq!(service.restore_session().await, SessionState::LoggedOut);

        assert_eq!(service.get_access_token().await, Err(AuthError::NotAuthenticated));
        assert_eq!(service.session_state(), SessionState::LoggedOut);
    }

    #[tokio::test]
    async fn test_stale_token_without_refresh_token_expires() {
        let service = service();
        let credentials = service.coordinator().credentials();
        credentials.store_tokens("AT1", None, None, Some(30));

        let err = service.get_access_token().await.unwrap_err();

        assert_eq!(err, AuthError::NoRefreshToken);
        assert_eq!(service.session_state(), SessionState::Expired);
        assert_eq!(service.get_access_token().await, Err(AuthError::SessionExpired));
    }

    #[tokio::test]
    async fn test_offline_refresh_keeps_credentials() {
        let service = service();
        let credentials = service.coordinator().credentials();
        credentials.store_tokens("AT1", Some("RT1"), None, Some(30));

        let err = service.get_access_token().await.unwrap_err();

        assert!(err.root_cause().is_retryable());
        assert!(matches!(service.session_state(), SessionState::Error(_)));
        assert!(service.can_restore_session());
    }

    #[tokio::test]
    async fn test_logout_twice() {
        let service = service();

        service.logout().await;
        assert_eq!(service.session_state(), SessionState::LoggedOut);
        service.logout().await;
        assert_eq!(service.session_state(), SessionState::LoggedOut);
        assert!(!service.is_authenticated());
    }
}
