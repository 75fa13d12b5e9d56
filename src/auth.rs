//! OAuth2 credential lifecycle for the Gmail API
//!
//! [`CredentialManager`] is the only owner of the persisted credential. It
//! loads it lazily, refreshes it when fewer than `refresh_skew_secs`
//! seconds of lifetime remain, and writes the refreshed credential to disk
//! before anyone uses it. Refreshes are serialized behind one async mutex,
//! so concurrent callers share a single network refresh.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::AuthConfig;
use crate::error::{provider_message, GmailError, Result};
use crate::retry::{with_retry, RetryPolicy};

/// Gmail API scopes requested during authorization
///
/// These scopes provide:
/// - gmail.readonly: reading messages
/// - gmail.send / gmail.compose: sending and replying
/// - gmail.modify: label changes (read/unread, archive, star, trash)
pub const GMAIL_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
    "https://www.googleapis.com/auth/gmail.compose",
    "https://www.googleapis.com/auth/gmail.modify",
];

pub const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_REVOKE_URI: &str = "https://oauth2.googleapis.com/revoke";

/// How many ports after the configured one to try for the loopback listener
const PORT_FALLBACK_RANGE: u16 = 10;
const CONSENT_TIMEOUT: Duration = Duration::from_secs(300);

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// OAuth client registration, as downloaded from Google Cloud Console
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

/// Google wraps the registration in `installed` (desktop) or `web`
#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    /// Load OAuth2 client credentials from a `credentials.json` file
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GmailError::AuthError(format!(
                "Credentials file not found at {:?}. Enable the Gmail API in Google Cloud \
                 Console, create OAuth 2.0 credentials (Desktop app), and save the downloaded \
                 JSON at that path.",
                path
            )));
        }

        let content = tokio::fs::read_to_string(path).await?;
        let file: ClientSecretFile = serde_json::from_str(&content).map_err(|e| {
            GmailError::AuthError(format!("Invalid JSON in credentials file {:?}: {}", path, e))
        })?;

        file.installed.or(file.web).ok_or_else(|| {
            GmailError::AuthError(format!(
                "Credentials file {:?} has neither an 'installed' nor a 'web' section",
                path
            ))
        })
    }

    /// Load OAuth2 client credentials from environment variables
    ///
    /// # Environment Variables
    /// - `GMAIL_CLIENT_ID`: OAuth2 client ID
    /// - `GMAIL_CLIENT_SECRET`: OAuth2 client secret
    pub fn from_env() -> Result<Self> {
        let client_id = env::var("GMAIL_CLIENT_ID")
            .map_err(|_| GmailError::ConfigError("GMAIL_CLIENT_ID not set".to_string()))?;
        let client_secret = env::var("GMAIL_CLIENT_SECRET")
            .map_err(|_| GmailError::ConfigError("GMAIL_CLIENT_SECRET not set".to_string()))?;

        Ok(Self {
            client_id,
            client_secret,
            project_id: None,
            auth_uri: default_auth_uri(),
            token_uri: default_token_uri(),
            redirect_uris: vec!["http://localhost".to_string()],
        })
    }

    /// The file when it exists, otherwise the environment
    pub async fn discover(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path).await;
        }
        match Self::from_env() {
            Ok(secret) => {
                debug!("Using OAuth client from GMAIL_CLIENT_ID/GMAIL_CLIENT_SECRET");
                Ok(secret)
            }
            // Report the missing file; it is the documented setup
            Err(_) => Self::load(path).await,
        }
    }
}

/// A persisted OAuth2 credential
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl Credential {
    /// Usable at `now` with at least `skew` of lifetime left
    pub fn is_fresh(&self, now: DateTime<Utc>, skew: ChronoDuration) -> bool {
        self.expires_at - skew > now
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Token endpoint response for both code exchange and refresh
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

impl TokenResponse {
    /// Merge into a credential. Google omits `refresh_token` (and sometimes
    /// `scope`) on refresh, so those fall back to the previous credential.
    fn into_credential(self, previous: Option<&Credential>, now: DateTime<Utc>) -> Result<Credential> {
        let refresh_token = self
            .refresh_token
            .or_else(|| previous.map(|p| p.refresh_token.clone()))
            .ok_or_else(|| {
                GmailError::AuthError(
                    "Token response carried no refresh token. Remove this app's access at \
                     https://myaccount.google.com/permissions and authorize again."
                        .to_string(),
                )
            })?;

        let scopes = match self.scope {
            Some(scope) => scope.split_whitespace().map(str::to_string).collect(),
            None => previous.map(|p| p.scopes.clone()).unwrap_or_default(),
        };

        Ok(Credential {
            access_token: self.access_token,
            refresh_token,
            expires_at: now + ChronoDuration::seconds(self.expires_in.unwrap_or(3600)),
            scopes,
            token_type: self.token_type.unwrap_or_else(default_token_type),
        })
    }
}

/// File-backed credential storage with atomic replacement
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when nothing is stored; a corrupt file is an
    /// authentication error because only re-authorization can fix it
    pub async fn load(&self) -> Result<Option<Credential>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&content) {
            Ok(credential) => {
                debug!("Loaded credential from {:?}", self.path);
                Ok(Some(credential))
            }
            Err(e) => {
                warn!("Could not parse credential file {:?}: {}", self.path, e);
                Err(GmailError::AuthError(format!(
                    "Credential file {:?} is corrupt ({}); run `gmail-mcp auth` to re-authorize",
                    self.path, e
                )))
            }
        }
    }

    /// Write to a temp file in the same directory, fsync, restrict to the
    /// owner, then rename over the target.
    pub async fn save(&self, credential: &Credential) -> Result<()> {
        let contents = serde_json::to_vec_pretty(credential)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&path, &contents))
            .await
            .map_err(std::io::Error::other)??;

        info!("Saved credential to {:?}", self.path);
        Ok(())
    }

    /// Returns whether a file was removed
    pub async fn remove(&self) -> Result<bool> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Snapshot of the stored credential, without touching the network
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub path: PathBuf,
    pub stored: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub fresh: bool,
    pub scopes: Vec<String>,
}

pub struct CredentialManager {
    secret: ClientSecret,
    store: CredentialStore,
    http: reqwest::Client,
    retry: RetryPolicy,
    skew: ChronoDuration,
    scopes: Vec<String>,
    oauth_port: u16,
    revoke_uri: String,
    current: Mutex<Option<Credential>>,
}

impl CredentialManager {
    pub fn new(
        secret: ClientSecret,
        config: &AuthConfig,
        retry: RetryPolicy,
        http: reqwest::Client,
    ) -> Self {
        Self {
            secret,
            store: CredentialStore::new(&config.token_path),
            http,
            retry,
            skew: ChronoDuration::seconds(config.refresh_skew_secs as i64),
            scopes: config.scopes.clone(),
            oauth_port: config.oauth_port,
            revoke_uri: DEFAULT_REVOKE_URI.to_string(),
            current: Mutex::new(None),
        }
    }

    pub fn with_revoke_uri(mut self, uri: impl Into<String>) -> Self {
        self.revoke_uri = uri.into();
        self
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Return a credential with at least the skew of lifetime left,
    /// refreshing and persisting first if needed.
    pub async fn ensure_valid(&self) -> Result<Credential> {
        let mut slot = self.current.lock().await;
        let credential = self.loaded(&mut slot).await?;

        if credential.is_fresh(Utc::now(), self.skew) {
            return Ok(credential);
        }

        info!(
            "Access token expires at {}, refreshing",
            credential.expires_at.to_rfc3339()
        );
        self.refresh_into(&mut slot, &credential).await
    }

    pub async fn access_token(&self) -> Result<String> {
        Ok(self.ensure_valid().await?.access_token)
    }

    /// Refresh after the provider rejected `stale_access_token`, unless
    /// another caller already replaced it.
    pub async fn refresh_if_current(&self, stale_access_token: &str) -> Result<Credential> {
        let mut slot = self.current.lock().await;
        let credential = self.loaded(&mut slot).await?;

        if credential.access_token != stale_access_token {
            debug!("Access token already replaced by a concurrent refresh");
            return Ok(credential);
        }

        warn!("Provider rejected an unexpired access token, forcing refresh");
        self.refresh_into(&mut slot, &credential).await
    }

    /// Persist atomically and make `credential` the current one
    pub async fn persist(&self, credential: &Credential) -> Result<()> {
        let mut slot = self.current.lock().await;
        self.store.save(credential).await?;
        *slot = Some(credential.clone());
        Ok(())
    }

    pub async fn status(&self) -> Result<CredentialStatus> {
        let stored = self.store.load().await?;
        let now = Utc::now();
        Ok(CredentialStatus {
            path: self.store.path().to_path_buf(),
            stored: stored.is_some(),
            expires_at: stored.as_ref().map(|c| c.expires_at),
            fresh: stored
                .as_ref()
                .map(|c| c.is_fresh(now, self.skew))
                .unwrap_or(false),
            scopes: stored.map(|c| c.scopes).unwrap_or_default(),
        })
    }

    async fn loaded(&self, slot: &mut Option<Credential>) -> Result<Credential> {
        if slot.is_none() {
            *slot = self.store.load().await?;
        }
        slot.clone().ok_or_else(|| {
            GmailError::AuthError(format!(
                "No stored credential at {:?}; run `gmail-mcp auth` to authorize",
                self.store.path()
            ))
        })
    }

    /// Refresh, persist, then publish. Caller holds the lock.
    async fn refresh_into(
        &self,
        slot: &mut Option<Credential>,
        credential: &Credential,
    ) -> Result<Credential> {
        let response = self
            .request_token(
                "refresh access token",
                &[
                    ("client_id", self.secret.client_id.as_str()),
                    ("client_secret", self.secret.client_secret.as_str()),
                    ("refresh_token", credential.refresh_token.as_str()),
                    ("grant_type", "refresh_token"),
                ],
            )
            .await?;

        let refreshed = response.into_credential(Some(credential), Utc::now())?;
        self.store.save(&refreshed).await?;
        *slot = Some(refreshed.clone());

        info!(
            "Access token refreshed, valid until {}",
            refreshed.expires_at.to_rfc3339()
        );
        Ok(refreshed)
    }

    /// POST to the token endpoint. Network errors, 5xx and 429 are retried;
    /// any other rejection (`invalid_grant`, `invalid_client`, ...) is a
    /// terminal authentication error.
    async fn request_token(&self, operation: &str, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let http = &self.http;
        let token_uri = self.secret.token_uri.as_str();

        with_retry(operation, &self.retry, || async move {
            let response = http.post(token_uri).form(form).send().await?;
            let status = response.status();
            if status.is_success() {
                return response.json::<TokenResponse>().await.map_err(GmailError::from);
            }

            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.text().await.unwrap_or_default();
            let code = status.as_u16();

            if code == 429 || status.is_server_error() {
                return Err(GmailError::from_status(
                    operation,
                    code,
                    retry_after.as_deref(),
                    &body,
                ));
            }

            let reason = provider_message(&body).unwrap_or_else(|| format!("HTTP {}", code));
            Err(GmailError::AuthError(format!(
                "Token endpoint rejected the request ({}); re-authorization required",
                reason
            )))
        })
        .await
    }

    /// Build the consent URL for the authorization-code flow
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> Result<reqwest::Url> {
        let scope = self.scopes.join(" ");
        reqwest::Url::parse_with_params(
            &self.secret.auth_uri,
            &[
                ("client_id", self.secret.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .map_err(|e| GmailError::ConfigError(format!("Invalid auth_uri: {}", e)))
    }

    /// Interactive consent: open the browser, wait for the loopback
    /// redirect, exchange the code, persist the credential.
    pub async fn authorize(&self) -> Result<Credential> {
        let (listener, port) = bind_loopback(self.oauth_port).await?;
        let redirect_uri = format!("http://localhost:{}", port);
        let state = uuid::Uuid::new_v4().to_string();
        let url = self.authorization_url(&redirect_uri, &state)?;

        info!("Starting OAuth consent flow on port {}", port);
        eprintln!("Opening browser for Gmail authorization...");
        eprintln!("If the browser doesn't open, visit:\n\n  {}\n", url);
        if let Err(e) = open::that(url.as_str()) {
            warn!("Failed to open browser: {}", e);
        }

        let code = tokio::time::timeout(CONSENT_TIMEOUT, wait_for_code(&listener, &state))
            .await
            .map_err(|_| {
                GmailError::AuthError("Timed out waiting for browser authorization".to_string())
            })??;

        let credential = self.exchange_code(&code, &redirect_uri).await?;
        self.persist(&credential).await?;
        info!("Authorization complete; granted scopes: {}", credential.scopes.join(" "));
        Ok(credential)
    }

    /// Exchange an authorization code for a credential (not persisted)
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<Credential> {
        let response = self
            .request_token(
                "exchange authorization code",
                &[
                    ("client_id", self.secret.client_id.as_str()),
                    ("client_secret", self.secret.client_secret.as_str()),
                    ("code", code),
                    ("grant_type", "authorization_code"),
                    ("redirect_uri", redirect_uri),
                ],
            )
            .await?;
        response.into_credential(None, Utc::now())
    }

    /// Revoke the refresh token (best effort) and delete the stored
    /// credential. Returns whether anything was stored.
    pub async fn revoke(&self) -> Result<bool> {
        let mut slot = self.current.lock().await;
        let credential = match slot.take() {
            Some(credential) => Some(credential),
            None => self.store.load().await.ok().flatten(),
        };

        if let Some(credential) = &credential {
            let result = self
                .http
                .post(&self.revoke_uri)
                .form(&[("token", credential.refresh_token.as_str())])
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {
                    info!("Refresh token revoked")
                }
                Ok(response) => warn!(
                    "Token revocation returned HTTP {}; deleting local credential anyway",
                    response.status()
                ),
                Err(e) => warn!("Token revocation failed: {}; deleting local credential anyway", e),
            }
        }

        let removed = self.store.remove().await?;
        Ok(removed || credential.is_some())
    }
}

async fn bind_loopback(port: u16) -> Result<(TcpListener, u16)> {
    let last = port.saturating_add(PORT_FALLBACK_RANGE);
    for candidate in port..=last {
        if let Ok(listener) = TcpListener::bind(("127.0.0.1", candidate)).await {
            return Ok((listener, candidate));
        }
    }
    Err(GmailError::AuthError(format!(
        "Could not bind a loopback port in range {}-{} for the OAuth callback",
        port, last
    )))
}

/// Serve loopback requests until one carries `code` or `error`
async fn wait_for_code(listener: &TcpListener, expected_state: &str) -> Result<String> {
    loop {
        let (mut stream, _) = listener.accept().await?;
        let mut request_line = String::new();
        BufReader::new(&mut stream).read_line(&mut request_line).await?;

        let target = request_line.split_whitespace().nth(1).unwrap_or("/");
        let Some(outcome) = parse_callback(target, expected_state) else {
            let _ = stream
                .write_all(b"HTTP/1.1 404 Not Found\r\nConnection: close\r\n\r\n")
                .await;
            continue;
        };

        let (status, message) = match &outcome {
            Ok(_) => ("200 OK", "Authentication successful! You can close this window."),
            Err(_) => ("400 Bad Request", "Authentication failed. Please try again."),
        };
        let page = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nConnection: close\r\n\r\n\
             <html><body><h1>{}</h1></body></html>",
            status, message
        );
        let _ = stream.write_all(page.as_bytes()).await;
        return outcome;
    }
}

/// Interpret the redirect target (`/?code=...&state=...`).
///
/// `None` means the request is unrelated (a favicon fetch, say).
pub fn parse_callback(target: &str, expected_state: &str) -> Option<Result<String>> {
    let url = reqwest::Url::parse(&format!("http://localhost{}", target)).ok()?;

    let mut code = None;
    let mut error = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Some(Err(GmailError::AuthError(format!(
            "Authorization was not granted: {}",
            error
        ))));
    }
    let code = code?;
    if state.as_deref() != Some(expected_state) {
        return Some(Err(GmailError::AuthError(
            "OAuth state mismatch in callback; possible forged redirect".to_string(),
        )));
    }
    Some(Ok(code))
}
