//! End-to-end tests for the authorization facade.
//!
//! A wiremock server plays the identity provider behind the real
//! `ReqwestTransport`; the browser approves every request.

use async_trait::async_trait;
use field_auth::{AuthError, AuthSettings, BrowserError, BrowserSession, ReqwestTransport};
use field_session::{AuthorizationService, SessionState};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REDIRECT_URI: &str = "com.example.field:/oauth2redirect";

struct ApprovingBrowser;

#[async_trait]
impl BrowserSession for ApprovingBrowser {
    async fn authorize(&self, url: &Url, _callback_scheme: &str) -> Result<Url, BrowserError> {
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let mut redirect = Url::parse(REDIRECT_URI).unwrap();
        redirect
            .query_pairs_mut()
            .append_pair("code", "C1")
            .append_pair("state", &params["state"]);
        Ok(redirect)
    }
}

fn id_token(sub: &str, roles: &[&str]) -> String {
    encode(
        &Header::default(),
        &json!({ "sub": sub, "name": "Field User", "roles": roles }),
        &EncodingKey::from_secret(b"provider-key"),
    )
    .unwrap()
}

fn settings(server: &MockServer) -> AuthSettings {
    AuthSettings {
        issuer: server.uri(),
        redirect_uri: REDIRECT_URI.to_string(),
        keychain_service: "com.field.test".to_string(),
        http_timeout_secs: 5,
        ..Default::default()
    }
}

fn service(server: &MockServer, secrets: &Path) -> AuthorizationService {
    AuthorizationService::builder(settings(server))
        .transport(Arc::new(ReqwestTransport::new(Duration::from_secs(5)).unwrap()))
        .browser(Arc::new(ApprovingBrowser))
        .secret_directory(secrets)
        .build()
        .unwrap()
}

async fn mount_discovery(server: &MockServer) {
    let uri = server.uri();
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": uri,
            "authorization_endpoint": format!("{}/authorize", uri),
            "token_endpoint": format!("{}/token", uri),
            "end_session_endpoint": format!("{}/logout", uri),
            "code_challenge_methods_supported": ["S256"],
        })))
        .mount(server)
        .await;
}

async fn mount_code_exchange(server: &MockServer, roles: &[&str], expires_in: i64) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "AT1",
            "token_type": "Bearer",
            "expires_in": expires_in,
            "refresh_token": "RT1",
            "id_token": id_token("u1", roles),
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_technician_login_and_logout() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_code_exchange(&server, &["technician"], 3600).await;
    Mock::given(method("GET"))
        .and(path("/logout"))
        .respond_with(ResponseTemplate::new(302))
        .expect(1)
        .mount(&server)
        .await;

    let secrets = tempfile::tempdir().unwrap();
    let service = service(&server, secrets.path());
    let session = service.subscribe_session();

    let user = service.login().await.unwrap();

    assert_eq!(user.id, "u1");
    assert!(session.has_changed().unwrap());
    assert_eq!(service.session_state(), SessionState::Authenticated(user));
    assert!(service.is_technician());
    assert!(!service.is_viewer());
    assert!(service.require_authentication());
    assert!(service.require_technician_role());
    assert_eq!(service.get_access_token().await.unwrap(), "AT1");
    assert_eq!((service.token_provider())().as_deref(), Some("AT1"));
    assert!(service.time_until_expiry().unwrap() > chrono::Duration::seconds(3500));

    service.logout().await;
    service.logout().await;

    assert_eq!(service.session_state(), SessionState::LoggedOut);
    assert!(!service.require_authentication());
    assert_eq!(service.get_access_token().await, Err(AuthError::NotAuthenticated));
}

#[tokio::test]
async fn test_viewer_cannot_edit() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_code_exchange(&server, &["viewer"], 3600).await;

    let secrets = tempfile::tempdir().unwrap();
    let service = service(&server, secrets.path());

    service.login().await.unwrap();

    assert!(service.is_viewer());
    assert!(service.require_authentication());
    assert!(!service.require_technician_role());
}

#[tokio::test]
async fn test_session_survives_restart() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_code_exchange(&server, &["admin"], 3600).await;

    let secrets = tempfile::tempdir().unwrap();
    service(&server, secrets.path()).login().await.unwrap();

    let restarted = service(&server, secrets.path());
    assert!(restarted.can_restore_session());

    let state = restarted.restore_session().await;

    assert_eq!(state.user().map(|u| u.id.as_str()), Some("u1"));
    assert!(restarted.is_authenticated());
    assert!(restarted.require_technician_role());
}

#[tokio::test]
async fn test_rejected_refresh_requires_login() {
    let server = MockServer::start().await;
    mount_discovery(&server).await;
    mount_code_exchange(&server, &["technician"], 30).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "Token is not active",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let secrets = tempfile::tempdir().unwrap();
    let service = service(&server, secrets.path());
    service.login().await.unwrap();

    let err = service.get_access_token().await.unwrap_err();

    assert!(err.requires_reauthentication());
    assert_eq!(service.session_state(), SessionState::Expired);
    assert!(!service.require_authentication());
    assert!(!service.can_restore_session());
    assert_eq!(service.get_access_token().await, Err(AuthError::SessionExpired));
}
