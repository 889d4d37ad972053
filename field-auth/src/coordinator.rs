//! Authentication coordinator.
//!
//! [`AuthCoordinator`] drives the Authorization Code + PKCE login end to end,
//! and owns refresh and logout. Its observable state ([`AuthSnapshot`]) is
//! published through a `tokio::sync::watch` channel.
//!
//! # Login
//!
//! ```text
//! Idle -> Discovering -> PkceGenerated -> AwaitingRedirect -> CodeReceived
//!      -> Exchanging -> TokensStored -> UserResolved -> Authenticated
//! ```
//!
//! Any step may fail; failure discards the attempt's PKCE parameters,
//! publishes the error and returns to `Idle`.

use crate::browser::{BrowserError, BrowserSession};
use crate::claims::{ProfileClaims, User};
use crate::config::{AuthSettings, OidcConfiguration};
use crate::credentials::CredentialStore;
use crate::discovery::DiscoveryResolver;
use crate::error::{AuthError, AuthResult};
use crate::http::{HttpRequest, HttpTransport};
use crate::pkce::PkceParameters;
use crate::retry::RetryConfig;
use crate::token::{TokenErrorResponse, TokenResponse, TokenSet};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

/// Default timeout for token and userinfo requests.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Synchronous access token source for request signing.
pub type TokenProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Progress of the current login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginPhase {
    /// No login running
    #[default]
    Idle,
    /// Fetching provider metadata
    Discovering,
    /// PKCE parameters created
    PkceGenerated,
    /// Browser presented, waiting for the redirect
    AwaitingRedirect,
    /// Redirect received and being validated
    CodeReceived,
    /// Exchanging the code at the token endpoint
    Exchanging,
    /// Tokens persisted
    TokensStored,
    /// User profile resolved
    UserResolved,
    /// Login completed
    Authenticated,
    /// Login failed
    Failed,
}

/// Observable authentication state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthSnapshot {
    /// A session is established
    pub is_authenticated: bool,
    /// The signed-in user
    pub current_user: Option<User>,
    /// A login is in progress
    pub is_loading: bool,
    /// Last failure, cleared by the next successful operation
    pub error: Option<AuthError>,
    /// Login progress
    pub phase: LoginPhase,
}

/// Releases the login slot however the attempt ends, including when the
/// login future is dropped mid-flight. Tokens persisted by an attempt that
/// never resolved its user are removed again.
struct LoginGuard<'a> {
    coordinator: &'a AuthCoordinator,
}

impl Drop for LoginGuard<'_> {
    fn drop(&mut self) {
        if self.coordinator.uncommitted_tokens.swap(false, Ordering::AcqRel) {
            warn!("Login abandoned after storing tokens, discarding them");
            self.coordinator.credentials.clear_all();
        }
        self.coordinator.login_active.store(false, Ordering::Release);
        self.coordinator.state.send_if_modified(|snapshot| {
            if snapshot.is_loading {
                snapshot.is_loading = false;
                snapshot.phase = LoginPhase::Idle;
                true
            } else {
                false
            }
        });
    }
}

/// Drives login, refresh and logout against one OpenID Connect provider.
pub struct AuthCoordinator {
    configuration: RwLock<OidcConfiguration>,
    transport: Arc<dyn HttpTransport>,
    browser: Arc<dyn BrowserSession>,
    resolver: DiscoveryResolver,
    credentials: Arc<CredentialStore>,
    http_timeout: Duration,
    include_nonce: bool,
    state: watch::Sender<AuthSnapshot>,
    login_active: AtomicBool,
    uncommitted_tokens: AtomicBool,
    refresh_gate: Mutex<()>,
}

impl std::fmt::Debug for AuthCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCoordinator")
            .field("configuration", &self.configuration())
            .field("http_timeout", &self.http_timeout)
            .field("include_nonce", &self.include_nonce)
            .field("snapshot", &*self.state.borrow())
            .finish()
    }
}

impl AuthCoordinator {
    /// Create a coordinator.
    pub fn new(
        configuration: OidcConfiguration,
        transport: Arc<dyn HttpTransport>,
        browser: Arc<dyn BrowserSession>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        let (state, _) = watch::channel(AuthSnapshot::default());

        Self {
            configuration: RwLock::new(configuration),
            resolver: DiscoveryResolver::new(transport.clone()).with_timeout(DEFAULT_HTTP_TIMEOUT),
            transport,
            browser,
            credentials,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            include_nonce: true,
            state,
            login_active: AtomicBool::new(false),
            uncommitted_tokens: AtomicBool::new(false),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Create a coordinator from deployment settings.
    pub fn from_settings(
        settings: &AuthSettings,
        transport: Arc<dyn HttpTransport>,
        browser: Arc<dyn BrowserSession>,
        credentials: Arc<CredentialStore>,
    ) -> Self {
        Self::new(settings.oidc_configuration(), transport, browser, credentials)
            .with_http_timeout(settings.http_timeout())
            .with_discovery_ttl(settings.discovery_ttl())
            .with_nonce(settings.include_nonce)
    }

    /// Set the timeout for provider requests.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self.resolver = self.resolver.with_timeout(timeout);
        self
    }

    /// Set how long discovery documents are cached.
    pub fn with_discovery_ttl(mut self, ttl: Duration) -> Self {
        self.resolver = self.resolver.with_ttl(ttl);
        self
    }

    /// Set the backoff for discovery requests.
    pub fn with_discovery_retry(mut self, retry: RetryConfig) -> Self {
        self.resolver = self.resolver.with_retry(retry);
        self
    }

    /// Choose whether to send an OIDC nonce.
    pub fn with_nonce(mut self, include_nonce: bool) -> Self {
        self.include_nonce = include_nonce;
        self
    }

    /// Current provider configuration.
    pub fn configuration(&self) -> OidcConfiguration {
        match self.configuration.read() {
            Ok(configuration) => configuration.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Credential store backing this coordinator.
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Discovery resolver used by this coordinator.
    pub fn resolver(&self) -> &DiscoveryResolver {
        &self.resolver
    }

    /// Current authentication state.
    pub fn snapshot(&self) -> AuthSnapshot {
        self.state.borrow().clone()
    }

    /// Subscribe to authentication state changes.
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.state.subscribe()
    }

    /// Check if a session is established.
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated
    }

    /// The signed-in user.
    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().current_user.clone()
    }

    // =========================================================================
    // Login
    // =========================================================================

    /// Run the interactive login.
    ///
    /// # Errors
    ///
    /// - `LoginInProgress` if another login is running
    /// - `LoginCancelled` if the user dismissed the browser
    /// - `InvalidState` / `InvalidAuthorizationCode` for a bad redirect
    /// - discovery, exchange and user resolution errors as they occur
    #[instrument(skip(self), fields(attempt_id = %Uuid::now_v7()))]
    pub async fn login(&self) -> AuthResult<User> {
        let _guard = self.begin_login()?;

        self.state.send_modify(|snapshot| {
            snapshot.is_loading = true;
            snapshot.error = None;
            snapshot.phase = LoginPhase::Idle;
        });

        match self.run_login().await {
            Ok(user) => {
                info!(user_id = %user.id, role = user.role().as_str(), "Login succeeded");
                self.state.send_modify(|snapshot| {
                    snapshot.is_authenticated = true;
                    snapshot.current_user = Some(user.clone());
                    snapshot.is_loading = false;
                    snapshot.error = None;
                    snapshot.phase = LoginPhase::Authenticated;
                });
                Ok(user)
            }
            Err(e) => {
                if e.is_silent() {
                    info!("Login cancelled by user");
                } else {
                    warn!(error = %e, code = e.error_code(), "Login failed");
                }
                self.state.send_modify(|snapshot| {
                    snapshot.is_authenticated = false;
                    snapshot.current_user = None;
                    snapshot.is_loading = false;
                    snapshot.error = Some(e.clone());
                    snapshot.phase = LoginPhase::Failed;
                });
                Err(e)
            }
        }
    }

    fn begin_login(&self) -> AuthResult<LoginGuard<'_>> {
        self.login_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AuthError::LoginInProgress)?;
        Ok(LoginGuard { coordinator: self })
    }

    fn set_phase(&self, phase: LoginPhase) {
        debug!(?phase, "Login phase");
        self.state.send_modify(|snapshot| snapshot.phase = phase);
    }

    async fn run_login(&self) -> AuthResult<User> {
        let configuration = if self.configuration().is_discovered() {
            self.configuration()
        } else {
            self.set_phase(LoginPhase::Discovering);
            self.ensure_discovered().await?
        };

        let pkce = if self.include_nonce {
            PkceParameters::generate()
        } else {
            PkceParameters::generate().without_nonce()
        };
        self.set_phase(LoginPhase::PkceGenerated);

        let authorization_url = build_authorization_url(&configuration, &pkce)?;
        let callback_scheme = configuration.callback_scheme().ok_or_else(|| {
            AuthError::ConfigurationError(format!(
                "Invalid redirect URI: {}",
                configuration.redirect_uri
            ))
        })?;

        self.set_phase(LoginPhase::AwaitingRedirect);
        let redirect = self
            .browser
            .authorize(&authorization_url, &callback_scheme)
            .await
            .map_err(|e| match e {
                BrowserError::Cancelled => AuthError::LoginCancelled,
                BrowserError::Presentation(message) => AuthError::ConfigurationError(message),
            })?;

        self.set_phase(LoginPhase::CodeReceived);
        let code = validate_redirect(&redirect, &pkce.state)?;

        self.set_phase(LoginPhase::Exchanging);
        let response = self.exchange_code(&configuration, &code, &pkce).await?;

        self.credentials.store_tokens(
            &response.access_token,
            response.refresh_token.as_deref(),
            response.id_token.as_deref(),
            response.expires_in,
        );
        self.uncommitted_tokens.store(true, Ordering::Release);
        self.set_phase(LoginPhase::TokensStored);

        let user = match self
            .resolve_user(
                &configuration,
                &response.access_token,
                response.id_token.as_deref(),
                pkce.nonce.as_deref(),
            )
            .await
        {
            Ok(user) => user,
            Err(e) => {
                self.credentials.clear_all();
                self.uncommitted_tokens.store(false, Ordering::Release);
                return Err(e);
            }
        };
        self.credentials.store_user(&user);
        self.uncommitted_tokens.store(false, Ordering::Release);
        self.set_phase(LoginPhase::UserResolved);

        Ok(user)
    }

    /// Configuration with endpoints, running discovery if needed.
    pub async fn ensure_discovered(&self) -> AuthResult<OidcConfiguration> {
        let configuration = self.configuration();
        if configuration.is_discovered() {
            return Ok(configuration);
        }

        let discovered = self.resolver.discover(&configuration).await?;
        match self.configuration.write() {
            Ok(mut current) => *current = discovered.clone(),
            Err(poisoned) => *poisoned.into_inner() = discovered.clone(),
        }
        Ok(discovered)
    }

    async fn exchange_code(
        &self,
        configuration: &OidcConfiguration,
        code: &str,
        pkce: &PkceParameters,
    ) -> AuthResult<TokenResponse> {
        let token_endpoint = token_endpoint(configuration)?;
        self.token_request(
            &token_endpoint,
            &[
                ("grant_type", "authorization_code"),
                ("client_id", configuration.client_id.as_str()),
                ("code", code),
                ("redirect_uri", configuration.redirect_uri.as_str()),
                ("code_verifier", pkce.code_verifier.as_str()),
            ],
        )
        .await
    }

    #[instrument(skip(self, params))]
    async fn token_request(&self, endpoint: &str, params: &[(&str, &str)]) -> AuthResult<TokenResponse> {
        let request = HttpRequest::post_form(endpoint, params).timeout(self.http_timeout);
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| AuthError::NetworkError(e.to_string()))?;

        if response.is_success() {
            return response
                .json::<TokenResponse>()
                .map_err(|e| AuthError::InvalidTokenResponse(e.to_string()));
        }

        match response.json::<TokenErrorResponse>() {
            Ok(error) => Err(AuthError::TokenExchangeFailed(error.message())),
            Err(_) => Err(AuthError::TokenExchangeFailed(format!("HTTP {}", response.status))),
        }
    }

    async fn resolve_user(
        &self,
        configuration: &OidcConfiguration,
        access_token: &str,
        id_token: Option<&str>,
        expected_nonce: Option<&str>,
    ) -> AuthResult<User> {
        let mut id_token_error = None;

        if let Some(id_token) = id_token {
            match ProfileClaims::from_id_token(id_token) {
                Ok(claims) => {
                    if let (Some(expected), Some(actual)) = (expected_nonce, claims.nonce.as_deref()) {
                        if !constant_time_eq(expected, actual) {
                            return Err(AuthError::InvalidState);
                        }
                    }
                    return Ok(User::from_claims(&claims));
                }
                Err(e) => {
                    debug!(error = %e, "ID token unusable, trying userinfo");
                    id_token_error = Some(e);
                }
            }
        }

        match configuration.userinfo_endpoint.as_deref() {
            Some(endpoint) => self.fetch_user_info(endpoint, access_token).await,
            None => Err(id_token_error.unwrap_or_else(|| {
                AuthError::UserInfoFailed("No ID token and no userinfo endpoint".to_string())
            })),
        }
    }

    #[instrument(skip(self, access_token))]
    async fn fetch_user_info(&self, endpoint: &str, access_token: &str) -> AuthResult<User> {
        let request = HttpRequest::get(endpoint)
            .bearer(access_token)
            .timeout(self.http_timeout);
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| AuthError::NetworkError(e.to_string()))?;

        if !response.is_success() {
            return Err(AuthError::UserInfoFailed(format!("HTTP {}", response.status)));
        }

        let claims: ProfileClaims = response
            .json()
            .map_err(|e| AuthError::InvalidResponse(format!("Invalid userinfo response: {}", e)))?;
        Ok(User::from_claims(&claims))
    }

    // =========================================================================
    // Tokens
    // =========================================================================

    /// Refresh the access token if it is missing or inside the expiry buffer.
    ///
    /// Concurrent callers share one refresh: whoever waits on the gate
    /// re-checks validity before sending another request.
    pub async fn refresh_token_if_needed(&self) -> AuthResult<()> {
        if self.credentials.has_valid_access_token() {
            return Ok(());
        }

        let _gate = self.refresh_gate.lock().await;
        if self.credentials.has_valid_access_token() {
            debug!("Token refreshed by a concurrent caller");
            return Ok(());
        }

        self.perform_refresh().await
    }

    /// Refresh the access token regardless of its remaining lifetime.
    ///
    /// If another refresh replaced the token while this call waited, that
    /// result is used instead.
    pub async fn refresh_token(&self) -> AuthResult<()> {
        let observed = self.credentials.access_token();

        let _gate = self.refresh_gate.lock().await;
        let current = self.credentials.access_token();
        if current.is_some() && current != observed && self.credentials.has_valid_access_token() {
            debug!("Token refreshed by a concurrent caller");
            return Ok(());
        }

        self.perform_refresh().await
    }

    #[instrument(skip(self))]
    async fn perform_refresh(&self) -> AuthResult<()> {
        let refresh_token = self
            .credentials
            .refresh_token()
            .ok_or(AuthError::NoRefreshToken)?;

        let result: AuthResult<TokenResponse> = async {
            let configuration = self.ensure_discovered().await?;
            let token_endpoint = token_endpoint(&configuration)?;
            self.token_request(
                &token_endpoint,
                &[
                    ("grant_type", "refresh_token"),
                    ("client_id", configuration.client_id.as_str()),
                    ("refresh_token", refresh_token.as_str()),
                ],
            )
            .await
        }
        .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                let error = AuthError::TokenRefreshFailed(Box::new(e));
                self.state
                    .send_modify(|snapshot| snapshot.error = Some(error.clone()));
                return Err(error);
            }
        };

        self.credentials.store_refreshed_tokens(
            &response.access_token,
            response.refresh_token.as_deref(),
            response.id_token.as_deref(),
            response.expires_in,
        );
        info!(
            rotated = response.refresh_token.is_some(),
            expires_in = response.expires_in,
            "Access token refreshed"
        );

        let user = self.credentials.user();
        self.state.send_modify(|snapshot| {
            snapshot.error = None;
            if snapshot.is_authenticated && user.is_some() {
                snapshot.current_user = user;
            }
        });
        Ok(())
    }

    /// A usable access token, refreshing first if needed.
    ///
    /// # Errors
    ///
    /// - `NotAuthenticated` if nothing is stored
    /// - `NoRefreshToken` / `TokenRefreshFailed` if the token is stale and
    ///   cannot be renewed
    pub async fn get_access_token(&self) -> AuthResult<String> {
        if let Some(token) = self.credentials.valid_access_token() {
            return Ok(token);
        }
        if self.credentials.access_token().is_none() && !self.credentials.has_refresh_token() {
            return Err(AuthError::NotAuthenticated);
        }

        self.refresh_token_if_needed().await?;
        self.credentials
            .access_token()
            .ok_or(AuthError::NotAuthenticated)
    }

    /// Synchronous provider of the stored access token while it is valid.
    pub fn token_provider(&self) -> TokenProvider {
        let credentials = self.credentials.clone();
        Arc::new(move || credentials.valid_access_token())
    }

    /// Stored tokens, if any.
    pub fn tokens(&self) -> Option<TokenSet> {
        self.credentials.token_set()
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Check if stored credentials can re-establish a session.
    pub fn can_restore_session(&self) -> bool {
        self.credentials.has_valid_access_token() || self.credentials.has_refresh_token()
    }

    /// Re-establish the session from stored credentials at startup.
    ///
    /// Returns `Ok(None)` when nothing is stored. A stale access token is
    /// refreshed first; the user comes from the cached profile, the stored
    /// ID token or the userinfo endpoint, in that order.
    #[instrument(skip(self))]
    pub async fn restore_session(&self) -> AuthResult<Option<User>> {
        if !self.can_restore_session() {
            debug!("No stored session");
            self.state.send_modify(|snapshot| {
                snapshot.is_authenticated = false;
                snapshot.current_user = None;
            });
            return Ok(None);
        }

        self.refresh_token_if_needed().await?;

        let user = match self.credentials.user() {
            Some(user) => user,
            None => {
                let access_token = self
                    .credentials
                    .access_token()
                    .ok_or(AuthError::NotAuthenticated)?;
                let configuration = self.configuration();
                let id_token = self.credentials.id_token();
                let user = self
                    .resolve_user(&configuration, &access_token, id_token.as_deref(), None)
                    .await?;
                self.credentials.store_user(&user);
                user
            }
        };

        info!(user_id = %user.id, "Session restored");
        self.state.send_modify(|snapshot| {
            snapshot.is_authenticated = true;
            snapshot.current_user = Some(user.clone());
            snapshot.error = None;
        });
        Ok(Some(user))
    }

    /// End the session after the provider rejected renewal.
    ///
    /// Stored tokens are dropped; the published state turns unauthenticated
    /// and keeps the error that caused it.
    pub fn expire_session(&self, cause: Option<AuthError>) {
        self.credentials.clear_all();
        self.state.send_modify(|snapshot| {
            snapshot.is_authenticated = false;
            snapshot.current_user = None;
            if cause.is_some() {
                snapshot.error = cause;
            }
        });
    }

    /// Sign out locally and notify the provider on a best-effort basis.
    ///
    /// Local state is always cleared; calling this repeatedly is harmless.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        let id_token = self.credentials.id_token();
        let had_session = id_token.is_some() || self.credentials.access_token().is_some();

        if had_session {
            let configuration = self.configuration();
            if let Some(endpoint) = configuration.end_session_endpoint.as_deref() {
                self.notify_end_session(endpoint, &configuration, id_token.as_deref())
                    .await;
            }
        }

        self.credentials.clear_all();
        self.state.send_modify(|snapshot| {
            snapshot.is_authenticated = false;
            snapshot.current_user = None;
            snapshot.is_loading = false;
            snapshot.error = None;
            snapshot.phase = LoginPhase::Idle;
        });
        info!(had_session, "Logged out");
    }

    async fn notify_end_session(
        &self,
        endpoint: &str,
        configuration: &OidcConfiguration,
        id_token: Option<&str>,
    ) {
        let mut url = match Url::parse(endpoint) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Invalid end-session endpoint");
                return;
            }
        };
        {
            let mut query = url.query_pairs_mut();
            if let Some(id_token) = id_token {
                query.append_pair("id_token_hint", id_token);
            }
            query.append_pair("post_logout_redirect_uri", configuration.post_logout_redirect());
            query.append_pair("client_id", configuration.client_id.as_str());
        }

        let request = HttpRequest::get(url.as_str()).timeout(self.http_timeout);
        match self.transport.send(request).await {
            Ok(response) if response.is_success() || (300..400).contains(&response.status) => {
                debug!(status = response.status, "Provider session ended");
            }
            Ok(response) => warn!(status = response.status, "End-session request rejected"),
            Err(e) => warn!(error = %e, "End-session request failed"),
        }
    }
}

fn token_endpoint(configuration: &OidcConfiguration) -> AuthResult<String> {
    configuration
        .token_endpoint
        .clone()
        .ok_or_else(|| AuthError::ConfigurationError("Token endpoint is not configured".to_string()))
}

/// Build the authorization request URL.
pub fn build_authorization_url(
    configuration: &OidcConfiguration,
    pkce: &PkceParameters,
) -> AuthResult<Url> {
    let endpoint = configuration.authorization_endpoint.as_deref().ok_or_else(|| {
        AuthError::ConfigurationError("Authorization endpoint is not configured".to_string())
    })?;

    let mut url = Url::parse(endpoint).map_err(|e| {
        AuthError::ConfigurationError(format!("Invalid authorization endpoint: {}", e))
    })?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", configuration.client_id.as_str())
            .append_pair("redirect_uri", configuration.redirect_uri.as_str())
            .append_pair("scope", &configuration.scope_string())
            .append_pair("state", &pkce.state)
            .append_pair("code_challenge", &pkce.code_challenge)
            .append_pair("code_challenge_method", pkce.code_challenge_method);
        if let Some(nonce) = &pkce.nonce {
            query.append_pair("nonce", nonce);
        }
    }
    Ok(url)
}

/// Extract the authorization code from a redirect, checking `state`.
pub fn validate_redirect(redirect: &Url, expected_state: &str) -> AuthResult<String> {
    let params: HashMap<String, String> = redirect.query_pairs().into_owned().collect();

    if let Some(error) = params.get("error") {
        let message = match params.get("error_description") {
            Some(description) => format!("{}: {}", error, description),
            None => error.clone(),
        };
        return Err(AuthError::TokenExchangeFailed(message));
    }

    let state = params.get("state").map(String::as_str).unwrap_or_default();
    if !constant_time_eq(state, expected_state) {
        return Err(AuthError::InvalidState);
    }

    params
        .get("code")
        .filter(|code| !code.is_empty())
        .cloned()
        .ok_or(AuthError::InvalidAuthorizationCode)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
