//! Interactive authorization through a browser.
//!
//! The coordinator hands the authorization URL to a [`BrowserSession`] and
//! waits for the redirect back to the registered callback. Mobile and desktop
//! shells implement the trait over their native web-authentication sessions;
//! [`LoopbackBrowser`] (feature `loopback`) covers command-line and desktop
//! use with the system browser and a loopback listener (RFC 8252 section 7.3).

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Browser session errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrowserError {
    /// The user dismissed the login
    #[error("Authorization was cancelled")]
    Cancelled,

    /// The browser could not be presented
    #[error("Could not present browser: {0}")]
    Presentation(String),
}

/// Presents the authorization page and captures the redirect.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Open `url` and resolve with the first redirect whose scheme matches
    /// `callback_scheme`.
    async fn authorize(&self, url: &Url, callback_scheme: &str) -> Result<Url, BrowserError>;
}

#[cfg(feature = "loopback")]
pub use loopback::LoopbackBrowser;

#[cfg(feature = "loopback")]
mod loopback {
    use super::{BrowserError, BrowserSession};
    use async_trait::async_trait;
    use axum::extract::State;
    use axum::http::{StatusCode, Uri};
    use axum::response::{Html, IntoResponse, Response};
    use axum::Router;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;
    use tracing::{debug, info, instrument, warn};
    use url::Url;

    const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><head><title>Signed in</title></head>\
        <body><p>Sign-in complete. You can close this window.</p></body></html>";

    /// Time allowed for the success page to reach the browser after the redirect.
    const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

    type Opener = Arc<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

    /// System browser plus a one-shot HTTP listener on the redirect URI.
    ///
    /// The redirect URI must be `http://127.0.0.1:<port>/<path>` (or
    /// `localhost` / `[::1]`).
    #[derive(Clone)]
    pub struct LoopbackBrowser {
        redirect_uri: Url,
        opener: Opener,
        timeout: Option<Duration>,
    }

    impl std::fmt::Debug for LoopbackBrowser {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("LoopbackBrowser")
                .field("redirect_uri", &self.redirect_uri.as_str())
                .field("timeout", &self.timeout)
                .finish()
        }
    }

    /// Shared with the callback handler.
    #[derive(Clone)]
    struct CallbackState {
        redirect_uri: Url,
        sender: Arc<Mutex<Option<oneshot::Sender<Url>>>>,
    }

    /// Aborts the callback server if the login is abandoned.
    struct ServerTask(JoinHandle<()>);

    impl Drop for ServerTask {
        fn drop(&mut self) {
            self.0.abort();
        }
    }

    async fn receive_callback(State(state): State<CallbackState>, uri: Uri) -> Response {
        if uri.path() != state.redirect_uri.path() {
            debug!(path = uri.path(), "Ignoring loopback request");
            return StatusCode::NOT_FOUND.into_response();
        }

        let mut redirect = state.redirect_uri.clone();
        redirect.set_query(uri.query());

        let sender = match state.sender.lock() {
            Ok(mut sender) => sender.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(sender) => {
                // The receiver is gone only when the login was abandoned.
                let _ = sender.send(redirect);
                Html(SUCCESS_PAGE).into_response()
            }
            None => StatusCode::GONE.into_response(),
        }
    }

    impl LoopbackBrowser {
        /// Create a loopback browser for the given redirect URI.
        pub fn new(redirect_uri: &str) -> Result<Self, BrowserError> {
            let redirect_uri = Url::parse(redirect_uri)
                .map_err(|e| BrowserError::Presentation(format!("Invalid redirect URI: {}", e)))?;

            if redirect_uri.scheme() != "http" {
                return Err(BrowserError::Presentation(
                    "Loopback redirect URI must use http".to_string(),
                ));
            }
            match redirect_uri.host_str() {
                Some("127.0.0.1") | Some("localhost") | Some("[::1]") => {}
                _ => {
                    return Err(BrowserError::Presentation(
                        "Loopback redirect URI must point at a loopback host".to_string(),
                    ))
                }
            }
            if redirect_uri.port().is_none() {
                return Err(BrowserError::Presentation(
                    "Loopback redirect URI needs an explicit port".to_string(),
                ));
            }

            Ok(Self {
                redirect_uri,
                opener: Arc::new(|url: &str| open::that(url)),
                timeout: None,
            })
        }

        /// Replace the function that opens the URL.
        pub fn with_opener<F>(mut self, opener: F) -> Self
        where
            F: Fn(&str) -> std::io::Result<()> + Send + Sync + 'static,
        {
            self.opener = Arc::new(opener);
            self
        }

        /// Give up (as cancelled) when no redirect arrives in time.
        pub fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout = Some(timeout);
            self
        }

        fn bind_address(&self) -> String {
            let host = match self.redirect_uri.host_str() {
                Some("localhost") | None => "127.0.0.1",
                Some(host) => host,
            };
            format!("{}:{}", host, self.redirect_uri.port().unwrap_or(80))
        }
    }

    #[async_trait]
    impl BrowserSession for LoopbackBrowser {
        #[instrument(skip(self, url))]
        async fn authorize(&self, url: &Url, callback_scheme: &str) -> Result<Url, BrowserError> {
            if callback_scheme != self.redirect_uri.scheme() {
                return Err(BrowserError::Presentation(format!(
                    "Loopback listener cannot receive '{}' callbacks",
                    callback_scheme
                )));
            }

            let listener = TcpListener::bind(self.bind_address())
                .await
                .map_err(|e| BrowserError::Presentation(format!("Cannot listen for redirect: {}", e)))?;

            let (redirect_tx, redirect_rx) = oneshot::channel();
            let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
            let app = Router::new()
                .fallback(receive_callback)
                .with_state(CallbackState {
                    redirect_uri: self.redirect_uri.clone(),
                    sender: Arc::new(Mutex::new(Some(redirect_tx))),
                });

            let mut server = ServerTask(tokio::spawn(async move {
                let shutdown = async move {
                    let _ = shutdown_rx.await;
                };
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown)
                    .await
                {
                    warn!(error = %e, "Loopback listener failed");
                }
            }));

            (self.opener)(url.as_str())
                .map_err(|e| BrowserError::Presentation(format!("Cannot open browser: {}", e)))?;
            info!("Opened system browser for sign-in");

            let received = match self.timeout {
                Some(timeout) => tokio::time::timeout(timeout, redirect_rx)
                    .await
                    .map_err(|_| BrowserError::Cancelled)?,
                None => redirect_rx.await,
            };
            let redirect = received
                .map_err(|_| BrowserError::Presentation("Loopback listener stopped".to_string()))?;

            let _ = shutdown_tx.send(());
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut server.0).await.is_err() {
                debug!("Loopback listener still draining, aborting");
            }

            Ok(redirect)
        }
    }

}
