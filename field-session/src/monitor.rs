//! Session monitor.
//!
//! Watches the stored access token and keeps [`SessionState`] current:
//! - a periodic check refreshes silently once the token is inside the
//!   refresh threshold
//! - returning to the foreground re-checks immediately and restarts the timer
//! - going to the background suspends the timer
//!
//! Only errors that require re-authentication end the session; transient
//! failures leave it in `Error` and are retried on the next check.

use crate::config::MonitorConfig;
use crate::state::{AppLifecycle, SessionState, SessionStatus};
use chrono::Utc;
use field_auth::{AuthCoordinator, AuthError, AuthResult, User};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// Clears the in-flight flag when a refresh ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keeps the session state in step with the stored tokens.
pub struct SessionMonitor {
    coordinator: Arc<AuthCoordinator>,
    config: MonitorConfig,
    status: watch::Sender<SessionStatus>,
    refresh_in_flight: AtomicBool,
    enabled: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMonitor")
            .field("config", &self.config)
            .field("status", &*self.status.borrow())
            .field("enabled", &self.enabled.load(Ordering::Relaxed))
            .finish()
    }
}

impl SessionMonitor {
    /// Create a monitor in the `Unknown` state.
    pub fn new(coordinator: Arc<AuthCoordinator>, config: MonitorConfig) -> Arc<Self> {
        let (status, _) = watch::channel(SessionStatus::default());

        Arc::new(Self {
            coordinator,
            config,
            status,
            refresh_in_flight: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
            timer: Mutex::new(None),
        })
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.status.borrow().state.clone()
    }

    /// Current state and time to expiry.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Time left before the access token expires.
    pub fn time_until_expiry(&self) -> Option<chrono::Duration> {
        self.status.borrow().time_until_expiry
    }

    /// Subscribe to status changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Check if the periodic timer is wanted.
    pub fn is_monitoring(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Fail unless the session can be used.
    ///
    /// # Errors
    ///
    /// - `SessionExpired` once renewal was rejected
    /// - `NotAuthenticated` when logged out or not yet restored
    pub fn ensure_active(&self) -> AuthResult<()> {
        match self.status.borrow().state {
            SessionState::Expired => Err(AuthError::SessionExpired),
            SessionState::LoggedOut | SessionState::Unknown => Err(AuthError::NotAuthenticated),
            _ => Ok(()),
        }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Evaluate stored credentials at startup.
    #[instrument(skip(self))]
    pub async fn restore(&self) -> SessionState {
        let state = match self.coordinator.restore_session().await {
            Ok(Some(user)) => SessionState::Authenticated(user),
            Ok(None) => SessionState::LoggedOut,
            Err(e) => self.failure_state(e),
        };

        info!(state = state.as_str(), "Session restored");
        self.publish(state.clone());
        state
    }

    /// Record a completed login.
    pub fn on_login(&self, user: User) {
        self.publish(SessionState::Authenticated(user));
    }

    /// Record a logout.
    pub fn on_logout(&self) {
        self.status.send_replace(SessionStatus {
            state: SessionState::LoggedOut,
            time_until_expiry: None,
        });
    }

    /// End the session after the provider rejected renewal.
    pub fn expire(&self, cause: Option<AuthError>) {
        if let Some(cause) = &cause {
            info!(error = %cause, "Session expired");
        }
        self.coordinator.expire_session(cause);
        self.status.send_replace(SessionStatus {
            state: SessionState::Expired,
            time_until_expiry: None,
        });
    }

    /// Map a refresh or restore failure onto the session.
    ///
    /// Transient causes keep the session in `Error`; anything requiring a new
    /// login expires it.
    pub fn handle_refresh_error(&self, error: &AuthError) -> SessionState {
        let state = self.failure_state(error.clone());
        self.publish(state.clone());
        state
    }

    fn failure_state(&self, error: AuthError) -> SessionState {
        if error.root_cause().is_retryable() {
            warn!(error = %error, "Transient session failure, keeping session");
            SessionState::Error(error.to_string())
        } else if error.requires_reauthentication() {
            self.coordinator.expire_session(Some(error));
            SessionState::Expired
        } else {
            warn!(error = %error, "Session failure");
            SessionState::Error(error.to_string())
        }
    }

    /// Run one evaluation of the stored tokens.
    #[instrument(skip(self))]
    pub async fn check_session(&self) {
        let state = self.state();
        if !state.is_monitored() {
            self.publish_expiry();
            return;
        }

        if matches!(state, SessionState::Error(_)) && !self.coordinator.is_authenticated() {
            debug!("Retrying session restore");
            self.restore().await;
            return;
        }

        let Some(tokens) = self.coordinator.tokens() else {
            warn!("Session has no stored tokens");
            self.expire(None);
            return;
        };

        let now = Utc::now();
        let remaining = tokens.time_until_expiry(now);
        self.publish_expiry();

        if !tokens.is_valid_at(now) && tokens.refresh_token.is_none() {
            info!("Access token expired and no refresh token is stored");
            self.expire(None);
            return;
        }

        let inside_threshold = remaining.map_or(false, |left| left < self.config.refresh_threshold());
        let retrying = matches!(state, SessionState::Error(_));
        if inside_threshold || retrying || !tokens.is_valid_at(now) {
            self.refresh().await;
        }
    }

    /// Refresh now unless a refresh is already running.
    #[instrument(skip(self))]
    pub async fn refresh(&self) {
        if self.refresh_in_flight.swap(true, Ordering::AcqRel) {
            debug!("Refresh already in flight");
            return;
        }
        let _in_flight = InFlight(&self.refresh_in_flight);

        self.publish(SessionState::Refreshing);

        match self.coordinator.refresh_token().await {
            Ok(()) => {
                let user = self
                    .coordinator
                    .current_user()
                    .or_else(|| self.coordinator.credentials().user());
                match user {
                    Some(user) => self.publish(SessionState::Authenticated(user)),
                    None => self.publish(SessionState::Error("User profile unavailable".to_string())),
                }
            }
            Err(e) => {
                self.handle_refresh_error(&e);
            }
        }
    }

    /// React to an app lifecycle transition.
    pub async fn handle_lifecycle(self: &Arc<Self>, event: AppLifecycle) {
        debug!(?event, "Lifecycle transition");
        match event {
            AppLifecycle::Foreground => {
                self.check_session().await;
                if self.is_monitoring() {
                    self.spawn_timer();
                }
            }
            AppLifecycle::Background => self.abort_timer(),
        }
    }

    // =========================================================================
    // Timer
    // =========================================================================

    /// Start periodic checks.
    pub fn start(self: &Arc<Self>) {
        self.enabled.store(true, Ordering::Release);
        self.spawn_timer();
    }

    /// Stop periodic checks.
    pub fn stop(&self) {
        self.enabled.store(false, Ordering::Release);
        self.abort_timer();
    }

    /// Check if the periodic task is running.
    pub fn is_timer_running(&self) -> bool {
        self.timer
            .lock()
            .map(|timer| timer.as_ref().map_or(false, |handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    fn spawn_timer(self: &Arc<Self>) {
        let period = self.config.check_interval();
        let monitor: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                monitor.check_session().await;
            }
        });

        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = timer.replace(handle) {
            previous.abort();
        }
    }

    fn abort_timer(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = timer.take() {
            handle.abort();
        }
    }

    fn publish(&self, state: SessionState) {
        let time_until_expiry = self.current_expiry();
        self.status.send_replace(SessionStatus {
            state,
            time_until_expiry,
        });
    }

    fn publish_expiry(&self) {
        let time_until_expiry = self.current_expiry();
        self.status.send_if_modified(|status| {
            if status.time_until_expiry == time_until_expiry {
                false
            } else {
                status.time_until_expiry = time_until_expiry;
                true
            }
        });
    }

    fn current_expiry(&self) -> Option<chrono::Duration> {
        self.coordinator
            .tokens()
            .and_then(|tokens| tokens.time_until_expiry(Utc::now()))
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        if let Ok(mut timer) = self.timer.lock() {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use field_auth::{
        BrowserError, BrowserSession, CredentialStore, HttpRequest, HttpResponse, HttpTransport,
        MemorySecretStore, OidcConfiguration, TransportError,
    };
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use url::Url;

    /// Token endpoint that answers every request the same way.
    struct TokenEndpoint {
        response: Result<HttpResponse, TransportError>,
        calls: AtomicUsize,
    }

    impl TokenEndpoint {
        fn issuing(access_token: &str, expires_in: i64) -> Arc<Self> {
            Self::new(Ok(HttpResponse::new(
                200,
                serde_json::json!({ "access_token": access_token, "expires_in": expires_in })
                    .to_string(),
            )))
        }

        fn new(response: Result<HttpResponse, TransportError>) -> Arc<Self> {
            Arc::new(Self {
                response,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for TokenEndpoint {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone()
        }
    }

    struct NoBrowser;

    #[async_trait]
    impl BrowserSession for NoBrowser {
        async fn authorize(&self, _url: &Url, _scheme: &str) -> Result<Url, BrowserError> {
            Err(BrowserError::Cancelled)
        }
    }

    fn user() -> User {
        User {
            id: "u1".to_string(),
            email: None,
            name: None,
            preferred_username: None,
            roles: vec!["viewer".to_string()],
        }
    }

    fn monitor(transport: Arc<TokenEndpoint>) -> Arc<SessionMonitor> {
        let configuration = OidcConfiguration::new(
            "https://id.example.com",
            "field-app",
            "com.example.field:/cb",
            vec!["openid".to_string()],
        )
        .with_endpoints("https://id.example.com/authorize", "https://id.example.com/token");
        let credentials = Arc::new(CredentialStore::new(
            Arc::new(MemorySecretStore::new()),
            "com.field.test",
        ));
        let coordinator = Arc::new(AuthCoordinator::new(
            configuration,
            transport,
            Arc::new(NoBrowser),
            credentials,
        ));
        SessionMonitor::new(coordinator, MonitorConfig::default())
    }

    fn seed(monitor: &SessionMonitor, refresh_token: Option<&str>, expires_in: i64) {
        let credentials = monitor.coordinator.credentials();
        credentials.store_tokens("AT1", refresh_token, None, Some(expires_in));
        credentials.store_user(&user());
    }

    #[tokio::test]
    async fn test_restore_without_credentials_is_logged_out() {
        let monitor = monitor(TokenEndpoint::issuing("AT2", 3600));
        assert_eq!(monitor.state(), SessionState::Unknown);

        assert_eq!(monitor.restore().await, SessionState::LoggedOut);
        assert_eq!(monitor.ensure_active(), Err(AuthError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_restore_with_valid_token() {
        let monitor = monitor(TokenEndpoint::issuing("AT2", 3600));
        seed(&monitor, Some("RT1"), 3600);

        assert_eq!(monitor.restore().await, SessionState::Authenticated(user()));
        assert!(monitor.time_until_expiry().is_some());
        assert!(monitor.ensure_active().is_ok());
    }

    #[tokio::test]
    async fn test_restore_with_rejected_refresh_expires() {
        let transport = TokenEndpoint::new(Ok(HttpResponse::new(400, r#"{"error":"invalid_grant"}"#)));
        let monitor = monitor(transport);
        seed(&monitor, Some("RT1"), 10);

        assert_eq!(monitor.restore().await, SessionState::Expired);
        assert_eq!(monitor.ensure_active(), Err(AuthError::SessionExpired));
        assert!(monitor.coordinator.tokens().is_none());
    }

    #[tokio::test]
    async fn test_restore_offline_keeps_credentials() {
        let transport = TokenEndpoint::new(Err(TransportError::Connect("offline".to_string())));
        let monitor = monitor(transport);
        seed(&monitor, Some("RT1"), 10);

        assert!(matches!(monitor.restore().await, SessionState::Error(_)));
        assert!(monitor.coordinator.tokens().is_some());
    }

    #[tokio::test]
    async fn test_check_refreshes_inside_threshold() {
        let transport = TokenEndpoint::issuing("AT2", 3600);
        let monitor = monitor(transport.clone());
        seed(&monitor, Some("RT1"), 200);
        monitor.on_login(user());

        monitor.check_session().await;

        assert_eq!(transport.calls(), 1);
        assert_eq!(monitor.state(), SessionState::Authenticated(user()));
        let remaining = monitor.time_until_expiry().unwrap();
        assert!(remaining > chrono::Duration::seconds(3500));
    }

    #[tokio::test]
    async fn test_check_outside_threshold_does_nothing() {
        let transport = TokenEndpoint::issuing("AT2", 3600);
        let monitor = monitor(transport.clone());
        seed(&monitor, Some("RT1"), 1800);
        monitor.on_login(user());

        monitor.check_session().await;

        assert_eq!(transport.calls(), 0);
        assert!(monitor.state().is_authenticated());
    }

    #[tokio::test]
    async fn test_transient_refresh_failure_keeps_session() {
        let transport = TokenEndpoint::new(Err(TransportError::Timeout("30s".to_string())));
        let monitor = monitor(transport.clone());
        seed(&monitor, Some("RT1"), 200);
        assert!(monitor.restore().await.is_authenticated());
        assert_eq!(transport.calls(), 0);

        monitor.check_session().await;

        assert!(matches!(monitor.state(), SessionState::Error(_)));
        assert!(monitor.coordinator.tokens().is_some());
        assert!(monitor.ensure_active().is_ok());

        // Retried on the next check.
        monitor.check_session().await;
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_rejected_refresh_expires_session() {
        let transport = TokenEndpoint::new(Ok(HttpResponse::new(401, r#"{"error":"invalid_grant"}"#)));
        let monitor = monitor(transport);
        seed(&monitor, Some("RT1"), 200);
        assert!(monitor.restore().await.is_authenticated());
        assert!(monitor.coordinator.is_authenticated());

        monitor.check_session().await;

        assert_eq!(monitor.state(), SessionState::Expired);
        assert!(!monitor.coordinator.is_authenticated());
        assert!(monitor.coordinator.tokens().is_none());
    }

    #[tokio::test]
    async fn test_stale_token_without_refresh_token_expires() {
        let transport = TokenEndpoint::issuing("AT2", 3600);
        let monitor = monitor(transport.clone());
        seed(&monitor, None, 30);
        monitor.on_login(user());

        monitor.check_session().await;

        assert_eq!(monitor.state(), SessionState::Expired);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_is_not_started_twice() {
        let transport = TokenEndpoint::issuing("AT2", 3600);
        let monitor = monitor(transport.clone());
        seed(&monitor, Some("RT1"), 200);
        monitor.on_login(user());

        monitor.refresh_in_flight.store(true, Ordering::SeqCst);
        monitor.refresh().await;
        assert_eq!(transport.calls(), 0);

        monitor.refresh_in_flight.store(false, Ordering::SeqCst);
        monitor.refresh().await;
        assert_eq!(transport.calls(), 1);
        assert!(!monitor.refresh_in_flight.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_refreshes_periodically() {
        let transport = TokenEndpoint::issuing("AT2", 200);
        let monitor = monitor(transport.clone());
        seed(&monitor, Some("RT1"), 200);
        monitor.on_login(user());

        monitor.start();
        assert_eq!(transport.calls(), 0);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(transport.calls(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.calls(), 2);

        monitor.stop();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(transport.calls(), 2);
        assert!(!monitor.is_timer_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_suspends_and_foreground_resumes() {
        let transport = TokenEndpoint::issuing("AT2", 200);
        let monitor = monitor(transport.clone());
        seed(&monitor, Some("RT1"), 200);
        monitor.on_login(user());
        monitor.start();

        monitor.handle_lifecycle(AppLifecycle::Background).await;
        tokio::time::sleep(Duration::from_secs(180)).await;
        assert_eq!(transport.calls(), 0);
        assert!(monitor.is_monitoring());

        monitor.handle_lifecycle(AppLifecycle::Foreground).await;
        assert_eq!(transport.calls(), 1);
        assert!(monitor.is_timer_running());
    }

    #[tokio::test]
    async fn test_logout_state() {
        let monitor = monitor(TokenEndpoint::issuing("AT2", 3600));
        monitor.on_login(user());
        monitor.on_logout();
        monitor.on_logout();

        assert_eq!(monitor.state(), SessionState::LoggedOut);
        assert_eq!(monitor.time_until_expiry(), None);
    }
}
