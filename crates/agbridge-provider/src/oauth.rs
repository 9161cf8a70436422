//! Google OAuth 2.0 authorization-code flow with PKCE.
//!
//! Two entry points exist: a loopback flow that catches the browser redirect
//! on a local listener, and a headless flow that asks the user to paste the
//! redirect URL (or the bare code) back into the terminal. Both end in the
//! same token exchange, which persists the tokens through [`CredentialStore`].

use std::{
    net::{Ipv6Addr, SocketAddr},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use aes_gcm::aead::{rand_core::RngCore as _, OsRng};
use agbridge_core::{current_unix_timestamp, expires_within_unix};
use axum::{
    extract::{Query, State},
    response::Html,
    routing::get,
    Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::{
    net::TcpListener,
    sync::{oneshot, watch},
};
use zeroize::Zeroizing;

use crate::{credential_store::CredentialStore, types::OAuthCredentials};

pub const GOOGLE_AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_REVOKE_ENDPOINT: &str = "https://oauth2.googleapis.com/revoke";
pub const GOOGLE_USERINFO_ENDPOINT: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

pub const CALLBACK_BIND_ADDR: &str = "127.0.0.1:51121";
pub const CALLBACK_PATH: &str = "/oauth-callback";
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:51121/oauth-callback";
/// Redirect URIs registered for the desktop client. Anything else is refused.
pub const ALLOWED_REDIRECT_URIS: &[&str] = &[DEFAULT_REDIRECT_URI];

pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_OAUTH_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Tokens expiring inside this window are treated as already expired.
pub const EXPIRY_SKEW_SECS: u64 = 300;
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3_600;
const PKCE_VERIFIER_BYTES: usize = 32;
const STATE_BYTES: usize = 16;
const CODE_CHALLENGE_METHOD_S256: &str = "S256";

pub const DEFAULT_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/userinfo.email",
    "openid",
];

pub const AUTH_FAILED_MESSAGE: &str =
    "authentication failed; run 'agbridge login' to sign in again";

const CALLBACK_PAGE: &str = "<!doctype html><html><body>\
<p>agbridge sign-in received. You can close this window and return to the terminal.</p>\
</body></html>";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("timed out after {0:?} waiting for the authorization callback")]
    CallbackTimeout(Duration),
    #[error("redirect uri '{0}' is not registered for this client")]
    InvalidRedirectUri(String),
    #[error("authorization state did not match the pending request")]
    StateMismatch,
    #[error("authorization was denied: {0}")]
    AuthorizationDenied(String),
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
    #[error("token refresh failed: {0}")]
    Refresh(String),
    #[error("user info lookup failed: {0}")]
    UserInfo(String),
    #[error("credential storage failed: {0}")]
    Storage(String),
    #[error("cannot move auth state from {from:?} to {to:?}")]
    InvalidTransition { from: AuthState, to: AuthState },
    #[error("oauth setup failed: {0}")]
    Setup(String),
}

impl OAuthError {
    /// Message shown to the user. Details stay in the logs.
    pub fn user_message(&self) -> &'static str {
        AUTH_FAILED_MESSAGE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    AwaitingCallback,
    Exchanging,
    Authenticated,
    Refreshing,
    Expired,
}

impl AuthState {
    pub fn can_transition_to(self, next: AuthState) -> bool {
        use AuthState::*;
        matches!(
            (self, next),
            (Unauthenticated, AwaitingCallback)
                | (AwaitingCallback, Exchanging)
                | (AwaitingCallback, Unauthenticated)
                | (Exchanging, Authenticated)
                | (Exchanging, Unauthenticated)
                | (Authenticated, Refreshing)
                | (Authenticated, Expired)
                | (Authenticated, Unauthenticated)
                | (Refreshing, Authenticated)
                | (Refreshing, Expired)
                | (Expired, Unauthenticated)
        )
    }
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub auth_endpoint: String,
    pub token_endpoint: String,
    pub revoke_endpoint: String,
    pub userinfo_endpoint: String,
    pub redirect_uri: String,
    /// Local address the loopback listener binds. Port 0 picks a free port.
    pub callback_bind: String,
    pub scopes: Vec<String>,
    pub callback_timeout: Duration,
    pub request_timeout_ms: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            auth_endpoint: GOOGLE_AUTH_ENDPOINT.to_string(),
            token_endpoint: GOOGLE_TOKEN_ENDPOINT.to_string(),
            revoke_endpoint: GOOGLE_REVOKE_ENDPOINT.to_string(),
            userinfo_endpoint: GOOGLE_USERINFO_ENDPOINT.to_string(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_string(),
            callback_bind: CALLBACK_BIND_ADDR.to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|scope| scope.to_string()).collect(),
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            request_timeout_ms: DEFAULT_OAUTH_REQUEST_TIMEOUT_MS,
        }
    }
}

impl OAuthConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }
}

/// PKCE verifier and its S256 challenge.
pub struct PkcePair {
    verifier: Zeroizing<String>,
    challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; PKCE_VERIFIER_BYTES]);
        OsRng.fill_bytes(bytes.as_mut());
        Self::from_verifier(URL_SAFE_NO_PAD.encode(bytes.as_ref()))
    }

    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = Zeroizing::new(verifier.into());
        let challenge = pkce_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }
}

pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

pub fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn validate_redirect_uri(redirect_uri: &str) -> Result<(), OAuthError> {
    if ALLOWED_REDIRECT_URIS.contains(&redirect_uri) {
        Ok(())
    } else {
        Err(OAuthError::InvalidRedirectUri(redirect_uri.to_string()))
    }
}

pub fn build_authorization_url(
    config: &OAuthConfig,
    pkce: &PkcePair,
    state: &str,
) -> Result<String, OAuthError> {
    validate_redirect_uri(&config.redirect_uri)?;
    let mut url = Url::parse(&config.auth_endpoint).map_err(|error| {
        OAuthError::Setup(format!(
            "failed to parse authorization endpoint '{}': {error}",
            config.auth_endpoint
        ))
    })?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("response_type", "code");
        query.append_pair("client_id", &config.client_id);
        query.append_pair("redirect_uri", &config.redirect_uri);
        query.append_pair("code_challenge", pkce.challenge());
        query.append_pair("code_challenge_method", CODE_CHALLENGE_METHOD_S256);
        query.append_pair("state", state);
        if !config.scopes.is_empty() {
            query.append_pair("scope", &config.scopes.join(" "));
        }
        query.append_pair("access_type", "offline");
        query.append_pair("prompt", "consent");
    }
    Ok(url.to_string())
}

#[derive(Debug, Default, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

impl CallbackParams {
    fn into_code(self, expected_state: &str) -> Result<String, OAuthError> {
        if let Some(error) = self.error {
            return Err(OAuthError::AuthorizationDenied(error));
        }
        if self.state.as_deref() != Some(expected_state) {
            return Err(OAuthError::StateMismatch);
        }
        self.code
            .map(|code| code.trim().to_string())
            .filter(|code| !code.is_empty())
            .ok_or_else(|| {
                OAuthError::AuthorizationDenied("callback carried no authorization code".into())
            })
    }
}

/// True when `url` points at a registered redirect: same scheme, host, port
/// and path. The query is ignored.
fn is_registered_redirect(url: &Url) -> bool {
    ALLOWED_REDIRECT_URIS.iter().any(|allowed| {
        Url::parse(allowed).is_ok_and(|allowed| {
            allowed.scheme() == url.scheme()
                && allowed.host_str() == url.host_str()
                && allowed.port_or_known_default() == url.port_or_known_default()
                && allowed.path() == url.path()
        })
    })
}

/// Accepts either the full redirect URL or the bare authorization code.
///
/// A URL must point at a registered redirect and carry the expected `state`.
/// A bare code cannot be checked.
pub fn parse_callback_input(input: &str, expected_state: &str) -> Result<String, OAuthError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(OAuthError::AuthorizationDenied(
            "no authorization code was entered".into(),
        ));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Ok(trimmed.to_string());
    }
    let url = Url::parse(trimmed).map_err(|error| {
        OAuthError::AuthorizationDenied(format!("could not parse the pasted url: {error}"))
    })?;
    if !is_registered_redirect(&url) {
        let mut target = url.clone();
        target.set_query(None);
        target.set_fragment(None);
        return Err(OAuthError::InvalidRedirectUri(target.to_string()));
    }
    let mut params = CallbackParams::default();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => params.code = Some(value.into_owned()),
            "state" => params.state = Some(value.into_owned()),
            "error" => params.error = Some(value.into_owned()),
            _ => {}
        }
    }
    params.into_code(expected_state)
}

pub fn is_valid(credentials: &OAuthCredentials) -> bool {
    is_valid_at(credentials, current_unix_timestamp())
}

pub fn is_valid_at(credentials: &OAuthCredentials, now_unix: u64) -> bool {
    !credentials.access_token.trim().is_empty()
        && !expires_within_unix(credentials.expires_unix, now_unix, EXPIRY_SKEW_SECS)
}

/// Shown to the caller once the loopback listener is up.
#[derive(Debug, Clone)]
pub struct AuthorizationPrompt {
    pub url: String,
    pub listening_on: SocketAddr,
    /// The `[::1]` companion listener, when IPv6 loopback is available.
    pub ipv6_listening_on: Option<SocketAddr>,
}

/// `localhost` in the redirect may resolve to `::1` first, so an IPv4
/// loopback listener gets an IPv6 companion on the same port.
async fn bind_ipv6_companion(primary: SocketAddr) -> Option<TcpListener> {
    if !(primary.is_ipv4() && primary.ip().is_loopback()) {
        return None;
    }
    let companion = SocketAddr::from((Ipv6Addr::LOCALHOST, primary.port()));
    match TcpListener::bind(companion).await {
        Ok(listener) => Some(listener),
        Err(error) => {
            tracing::debug!(%error, %companion, "ipv6 loopback callback listener unavailable");
            None
        }
    }
}

#[derive(Clone)]
struct CallbackSlot {
    sender: Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>,
}

async fn handle_callback(
    State(slot): State<CallbackSlot>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    let sender = slot
        .sender
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(sender) = sender {
        let _ = sender.send(params);
    }
    Html(CALLBACK_PAGE)
}

#[derive(Debug)]
struct TokenGrant {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: u64,
}

pub struct OAuthFlow {
    config: OAuthConfig,
    http: reqwest::Client,
    store: Arc<CredentialStore>,
    state: Mutex<AuthState>,
}

impl OAuthFlow {
    pub fn new(config: OAuthConfig, store: Arc<CredentialStore>) -> Result<Self, OAuthError> {
        validate_redirect_uri(&config.redirect_uri)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .map_err(|error| OAuthError::Setup(format!("failed to build http client: {error}")))?;
        Ok(Self {
            config,
            http,
            store,
            state: Mutex::new(AuthState::Unauthenticated),
        })
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn state(&self) -> AuthState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, next: AuthState) -> Result<(), OAuthError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.can_transition_to(next) {
            return Err(OAuthError::InvalidTransition {
                from: *state,
                to: next,
            });
        }
        tracing::debug!(from = ?*state, to = ?next, "auth state change");
        *state = next;
        Ok(())
    }

    fn set_state(&self, next: AuthState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Credentials loaded from disk put a fresh flow into the authenticated state.
    fn adopt_stored(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == AuthState::Unauthenticated {
            *state = AuthState::Authenticated;
        }
    }

    fn begin_flow(&self) -> Result<(), OAuthError> {
        if self.config.client_id.trim().is_empty() {
            return Err(OAuthError::Setup(
                "no oauth client id is configured".to_string(),
            ));
        }
        match self.state() {
            AuthState::Expired | AuthState::Authenticated => {
                self.transition(AuthState::Unauthenticated)?
            }
            _ => {}
        }
        self.transition(AuthState::AwaitingCallback)
    }

    fn finish_flow(
        &self,
        result: Result<OAuthCredentials, OAuthError>,
    ) -> Result<OAuthCredentials, OAuthError> {
        if let Err(error) = &result {
            tracing::warn!(error = %error, "oauth sign-in failed");
            self.set_state(AuthState::Unauthenticated);
        }
        result
    }

    /// Runs the browser flow: binds the loopback listener, hands the
    /// authorization URL to `on_prompt`, and waits for the redirect.
    pub async fn start_auth_flow<F>(&self, on_prompt: F) -> Result<OAuthCredentials, OAuthError>
    where
        F: FnOnce(&AuthorizationPrompt),
    {
        self.begin_flow()?;
        let result = self.run_loopback(on_prompt).await;
        self.finish_flow(result)
    }

    async fn run_loopback<F>(&self, on_prompt: F) -> Result<OAuthCredentials, OAuthError>
    where
        F: FnOnce(&AuthorizationPrompt),
    {
        let pkce = PkcePair::generate();
        let state = generate_state();
        let url = build_authorization_url(&self.config, &pkce, &state)?;

        let listener = TcpListener::bind(&self.config.callback_bind)
            .await
            .map_err(|error| {
                OAuthError::Setup(format!(
                    "failed to bind oauth callback listener {}: {error}",
                    self.config.callback_bind
                ))
            })?;
        let listening_on = listener.local_addr().map_err(|error| {
            OAuthError::Setup(format!("failed to read callback listener address: {error}"))
        })?;

        let companion = bind_ipv6_companion(listening_on).await;
        let ipv6_listening_on = companion
            .as_ref()
            .and_then(|listener| listener.local_addr().ok());

        let (callback_tx, callback_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let app = Router::new()
            .route(CALLBACK_PATH, get(handle_callback))
            .with_state(CallbackSlot {
                sender: Arc::new(Mutex::new(Some(callback_tx))),
            });
        let servers = std::iter::once(listener)
            .chain(companion)
            .map(|listener| {
                let app = app.clone();
                let mut shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    axum::serve(listener, app)
                        .with_graceful_shutdown(async move {
                            let _ = shutdown_rx.wait_for(|stop| *stop).await;
                        })
                        .await
                })
            })
            .collect::<Vec<_>>();
        tracing::debug!(%listening_on, ?ipv6_listening_on, "oauth callback listener ready");

        on_prompt(&AuthorizationPrompt {
            url,
            listening_on,
            ipv6_listening_on,
        });

        let outcome = tokio::time::timeout(self.config.callback_timeout, callback_rx).await;
        let _ = shutdown_tx.send(true);
        for server in servers {
            if tokio::time::timeout(Duration::from_secs(2), server)
                .await
                .is_err()
            {
                tracing::debug!("oauth callback listener did not stop within 2s");
            }
        }

        let params = match outcome {
            Err(_) => return Err(OAuthError::CallbackTimeout(self.config.callback_timeout)),
            Ok(Err(_)) => {
                return Err(OAuthError::Setup(
                    "callback listener stopped before a redirect arrived".to_string(),
                ))
            }
            Ok(Ok(params)) => params,
        };
        let code = params.into_code(&state)?;
        self.exchange_code(&code, &pkce).await
    }

    /// Runs the paste-back flow for machines without a local browser.
    ///
    /// `read_input` receives the authorization URL and returns whatever the
    /// user pasted. It runs on the blocking pool.
    pub async fn start_headless_auth_flow<F>(
        &self,
        read_input: F,
    ) -> Result<OAuthCredentials, OAuthError>
    where
        F: FnOnce(&str) -> std::io::Result<String> + Send + 'static,
    {
        self.begin_flow()?;
        let result = self.run_headless(read_input).await;
        self.finish_flow(result)
    }

    async fn run_headless<F>(&self, read_input: F) -> Result<OAuthCredentials, OAuthError>
    where
        F: FnOnce(&str) -> std::io::Result<String> + Send + 'static,
    {
        let pkce = PkcePair::generate();
        let state = generate_state();
        let url = build_authorization_url(&self.config, &pkce, &state)?;
        let input = tokio::task::spawn_blocking(move || read_input(&url))
            .await
            .map_err(|error| OAuthError::Setup(format!("input reader panicked: {error}")))?
            .map_err(|error| OAuthError::Setup(format!("failed to read pasted input: {error}")))?;
        let code = parse_callback_input(&input, &state)?;
        self.exchange_code(&code, &pkce).await
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce: &PkcePair,
    ) -> Result<OAuthCredentials, OAuthError> {
        self.transition(AuthState::Exchanging)?;
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", pkce.verifier()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
        let grant = self
            .request_token(&form)
            .await
            .map_err(OAuthError::TokenExchange)?;
        let email = self.fetch_email(&grant.access_token).await?;
        let credentials = OAuthCredentials {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_unix: current_unix_timestamp().saturating_add(grant.expires_in),
            email,
        };
        self.persist(&credentials)?;
        self.store
            .set_active_account(&credentials.email)
            .map_err(|error| OAuthError::Storage(format!("{error:#}")))?;
        self.transition(AuthState::Authenticated)?;
        tracing::info!(email = %credentials.email, "signed in");
        Ok(credentials)
    }

    /// Trades the refresh token for a new access token and persists the result.
    ///
    /// A response without a new refresh token keeps the old one.
    pub async fn refresh_token(
        &self,
        credentials: &OAuthCredentials,
    ) -> Result<OAuthCredentials, OAuthError> {
        self.adopt_stored();
        let Some(refresh_token) = credentials
            .refresh_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
        else {
            self.expire();
            return Err(OAuthError::Refresh("no refresh token is stored".to_string()));
        };
        self.transition(AuthState::Refreshing)?;

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
        let grant = match self.request_token(&form).await {
            Ok(grant) => grant,
            Err(error) => {
                self.expire();
                return Err(OAuthError::Refresh(error));
            }
        };
        let refreshed = OAuthCredentials {
            access_token: grant.access_token,
            refresh_token: grant
                .refresh_token
                .or_else(|| credentials.refresh_token.clone()),
            expires_unix: current_unix_timestamp().saturating_add(grant.expires_in),
            email: credentials.email.clone(),
        };
        if let Err(error) = self.persist(&refreshed) {
            self.expire();
            return Err(error);
        }
        self.transition(AuthState::Authenticated)?;
        tracing::debug!(email = %refreshed.email, "access token refreshed");
        Ok(refreshed)
    }

    /// Returns usable credentials, refreshing first when they expire within
    /// [`EXPIRY_SKEW_SECS`].
    pub async fn ensure_valid(
        &self,
        credentials: &OAuthCredentials,
    ) -> Result<OAuthCredentials, OAuthError> {
        self.adopt_stored();
        if is_valid(credentials) {
            return Ok(credentials.clone());
        }
        tracing::debug!(email = %credentials.email, "access token near expiry; refreshing");
        self.refresh_token(credentials).await
    }

    /// Revokes the token remotely and always removes the local copy.
    ///
    /// Returns whether the remote revocation succeeded.
    pub async fn revoke_token(&self, credentials: &OAuthCredentials) -> Result<bool, OAuthError> {
        let token = credentials
            .refresh_token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .unwrap_or(credentials.access_token.as_str());
        let revoked = match self
            .http
            .post(&self.config.revoke_endpoint)
            .form(&[("token", token)])
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(status = %response.status(), "token revocation was rejected");
                false
            }
            Err(error) => {
                tracing::warn!(error = %error, "token revocation request failed");
                false
            }
        };
        self.store
            .delete(&credentials.email)
            .map_err(|error| OAuthError::Storage(format!("{error:#}")))?;
        self.set_state(AuthState::Unauthenticated);
        Ok(revoked)
    }

    fn expire(&self) {
        let current = self.state();
        if current.can_transition_to(AuthState::Expired) {
            self.set_state(AuthState::Expired);
        }
    }

    fn persist(&self, credentials: &OAuthCredentials) -> Result<(), OAuthError> {
        self.store
            .store(&credentials.email, credentials)
            .map_err(|error| OAuthError::Storage(format!("{error:#}")))
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenGrant, String> {
        let response = self
            .http
            .post(&self.config.token_endpoint)
            .form(form)
            .send()
            .await
            .map_err(|error| format!("token request failed: {error}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable response body>".to_string());
            return Err(format!(
                "token endpoint returned status {status} body {body}"
            ));
        }
        let payload = response
            .json::<Value>()
            .await
            .map_err(|error| format!("failed to decode token response: {error}"))?;
        let access_token = payload
            .get("access_token")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| "token response missing access_token".to_string())?
            .to_string();
        Ok(TokenGrant {
            access_token,
            refresh_token: payload
                .get("refresh_token")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string),
            expires_in: payload
                .get("expires_in")
                .and_then(Value::as_u64)
                .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS),
        })
    }

    async fn fetch_email(&self, access_token: &str) -> Result<String, OAuthError> {
        let response = self
            .http
            .get(&self.config.userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| OAuthError::UserInfo(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(OAuthError::UserInfo(format!(
                "userinfo endpoint returned status {status}"
            )));
        }
        let payload = response
            .json::<Value>()
            .await
            .map_err(|error| OAuthError::UserInfo(error.to_string()))?;
        payload
            .get("email")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .map(ToString::to_string)
            .ok_or_else(|| OAuthError::UserInfo("userinfo response has no email".to_string()))
    }
}
