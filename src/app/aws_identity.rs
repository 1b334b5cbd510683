//! # AWS Identity Center device authorization
//!
//! Exchanges an Identity Center start URL for an SSO access token using the
//! OAuth 2.0 Device Authorization Grant (RFC 8628) against AWS SSO OIDC.
//!
//! ## Flow
//!
//! ```text
//! Unstarted -> ClientRegistered -> DeviceCodeIssued -> Polling -> Authenticated
//!                   |                    |               |
//!                   v                    v               v
//!                 Failed               Failed     TimedOut / Cancelled / Failed
//! ```
//!
//! 1. **Register** a public OIDC client for this tool.
//! 2. **Start device authorization** for the start URL, receiving a device code,
//!    a user code, the verification URI, the window (`expiresIn`) and the
//!    minimum poll `interval`.
//! 3. **Present** the URI and code on the console and try to open a browser.
//!    A browser that fails to open is not an error.
//! 4. **Poll** `CreateToken` every `interval` seconds until it succeeds, fails
//!    fatally, or `expiresIn` seconds of wall-clock time have passed.
//!    `authorization_pending` and `slow_down` keep the loop going; `slow_down`
//!    additionally widens the interval by five seconds.
//! 5. **Persist** the token in the [`TokenCache`] keyed by start URL.
//!
//! The OIDC service sits behind [`OidcProvider`] and time behind [`Clock`], so
//! the whole state machine runs in tests without network or real delays.
//! Cancellation is observed before each poll and during each sleep and is
//! reported as [`AwscError::AuthCancelled`], distinct from
//! [`AwscError::AuthTimedOut`].

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ssooidc::Client as SsoOidcClient;
use aws_types::region::Region;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::clock::Clock;
use crate::app::error::{from_sdk_error, AwscError, Result};
use crate::app::token_cache::{TokenCache, TokenCacheEntry};

pub const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Seconds added to the poll interval on every `slow_down` response.
const SLOW_DOWN_INCREMENT_SECS: u64 = 5;

/// OIDC client registration returned by `RegisterClient`.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientRegistration {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistration")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Device authorization issued by `StartDeviceAuthorization`.
///
/// `device_code` is the secret used for polling and is never displayed; users
/// only ever see `user_code` and the verification URI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceAuthorizationData {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    /// Verification URL with the user code embedded, when the service sends one.
    pub verification_uri_complete: Option<String>,
    /// Authorization window in seconds.
    pub expires_in: i64,
    /// Minimum seconds between polls.
    pub interval: i64,
}

impl DeviceAuthorizationData {
    /// URL to send the user to, preferring the one with the code pre-filled.
    pub fn browser_url(&self) -> &str {
        self.verification_uri_complete
            .as_deref()
            .filter(|uri| !uri.is_empty())
            .unwrap_or(&self.verification_uri)
    }
}

/// Access token returned by a successful `CreateToken`.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: i64,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

/// Why a single `CreateToken` attempt did not produce a token.
#[derive(Debug)]
pub enum TokenPollError {
    AuthorizationPending,
    SlowDown,
    Failed(AwscError),
}

#[async_trait]
pub trait OidcProvider: Send + Sync {
    async fn register_client(&self, client_name: &str) -> Result<ClientRegistration>;

    async fn start_device_authorization(
        &self,
        registration: &ClientRegistration,
        start_url: &str,
    ) -> Result<DeviceAuthorizationData>;

    async fn create_token(
        &self,
        registration: &ClientRegistration,
        device_code: &str,
    ) -> std::result::Result<TokenGrant, TokenPollError>;
}

/// Where the device flow currently stands.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DeviceFlowState {
    #[default]
    Unstarted,
    ClientRegistered,
    DeviceCodeIssued(DeviceAuthorizationData),
    Polling { attempts: u32 },
    Authenticated { expires_at: DateTime<Utc> },
    TimedOut,
    Cancelled,
    Failed(String),
}

pub struct DeviceAuthorizationClient {
    oidc: Arc<dyn OidcProvider>,
    token_cache: TokenCache,
    clock: Arc<dyn Clock>,
    client_name: String,
    open_browser: bool,
    show_progress: bool,
    state: DeviceFlowState,
}

impl DeviceAuthorizationClient {
    pub fn new(
        oidc: Arc<dyn OidcProvider>,
        token_cache: TokenCache,
        clock: Arc<dyn Clock>,
        client_name: impl Into<String>,
    ) -> Self {
        Self {
            oidc,
            token_cache,
            clock,
            client_name: client_name.into(),
            open_browser: true,
            show_progress: true,
            state: DeviceFlowState::Unstarted,
        }
    }

    /// Skip launching the system browser; the URL is still printed.
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    /// Suppress console output (prompts, polling dots).
    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn state(&self) -> &DeviceFlowState {
        &self.state
    }

    /// Run the whole device flow for `start_url` and cache the resulting token.
    pub async fn authenticate(
        &mut self,
        start_url: &str,
        sso_region: &str,
        cancel: &CancellationToken,
    ) -> Result<TokenCacheEntry> {
        info!("Starting device authorization for {}", start_url);
        let result = self.run_flow(start_url, sso_region, cancel).await;

        match &result {
            Ok(entry) => {
                self.state = DeviceFlowState::Authenticated {
                    expires_at: entry.expires_at,
                };
            }
            Err(AwscError::AuthTimedOut) => self.state = DeviceFlowState::TimedOut,
            Err(AwscError::AuthCancelled) => self.state = DeviceFlowState::Cancelled,
            Err(e) => {
                error!("Device authorization failed: {}", e);
                self.state = DeviceFlowState::Failed(e.to_string());
            }
        }
        result
    }

    async fn run_flow(
        &mut self,
        start_url: &str,
        sso_region: &str,
        cancel: &CancellationToken,
    ) -> Result<TokenCacheEntry> {
        let registration = self.register().await?;
        ensure_not_cancelled(cancel)?;

        let auth = self
            .start_device_authorization(&registration, start_url)
            .await?;
        ensure_not_cancelled(cancel)?;

        self.present(&auth);

        let grant = self.poll_for_token(&registration, &auth, cancel).await?;
        if self.show_progress {
            println!("\nAuthentication successful!");
        }

        let expires_at = self.clock.now() + Duration::seconds(grant.expires_in);
        self.token_cache
            .put(start_url, &grant.access_token, expires_at, sso_region)
    }

    pub async fn register(&mut self) -> Result<ClientRegistration> {
        let registration = self
            .oidc
            .register_client(&self.client_name)
            .await
            .map_err(device_auth_failure("register client"))?;
        debug!("Registered OIDC client {}", registration.client_id);
        self.state = DeviceFlowState::ClientRegistered;
        Ok(registration)
    }

    pub async fn start_device_authorization(
        &mut self,
        registration: &ClientRegistration,
        start_url: &str,
    ) -> Result<DeviceAuthorizationData> {
        let auth = self
            .oidc
            .start_device_authorization(registration, start_url)
            .await
            .map_err(device_auth_failure("start device authorization"))?;
        debug!(
            "Device authorization issued: expires_in={}s interval={}s",
            auth.expires_in, auth.interval
        );
        self.state = DeviceFlowState::DeviceCodeIssued(auth.clone());
        Ok(auth)
    }

    /// Console lines telling the user where to sign in.
    pub fn prompt_lines(&self, auth: &DeviceAuthorizationData) -> Vec<String> {
        let url = auth.browser_url();
        let mut lines = Vec::with_capacity(3);
        if self.open_browser {
            lines.push(format!("Opening browser to: {}", url));
            lines.push(format!("If browser doesn't open, visit: {}", url));
        } else {
            lines.push(format!("Visit: {}", url));
        }
        lines.push(format!("And enter code: {}", auth.user_code));
        lines
    }

    /// Print the verification URL and user code and try to open a browser.
    pub fn present(&self, auth: &DeviceAuthorizationData) {
        if self.show_progress {
            for line in self.prompt_lines(auth) {
                println!("{}", line);
            }
        }

        if !self.open_browser {
            return;
        }
        let url = auth.browser_url();
        if let Err(e) = open::that(url) {
            warn!("Failed to open browser: {}", e);
            if url != auth.verification_uri {
                if let Err(e) = open::that(&auth.verification_uri) {
                    warn!("Failed to open browser with regular URI: {}", e);
                }
            }
        }
    }

    /// Poll `CreateToken` until success, a fatal error, cancellation, or the
    /// device code's `expires_in` window has elapsed.
    pub async fn poll_for_token(
        &mut self,
        registration: &ClientRegistration,
        auth: &DeviceAuthorizationData,
        cancel: &CancellationToken,
    ) -> Result<TokenGrant> {
        let deadline = self.clock.now() + Duration::seconds(auth.expires_in.max(0));
        let mut interval = std::time::Duration::from_secs(auth.interval.max(1) as u64);
        let mut attempts: u32 = 0;

        if self.show_progress {
            println!(
                "Waiting for authentication (timeout in {} minutes)...",
                auth.expires_in / 60
            );
        }

        loop {
            ensure_not_cancelled(cancel)?;
            if self.clock.now() >= deadline {
                warn!("Device authorization expired after {} attempts", attempts);
                return Err(AwscError::AuthTimedOut);
            }

            attempts += 1;
            self.state = DeviceFlowState::Polling { attempts };

            match self.oidc.create_token(registration, &auth.device_code).await {
                Ok(grant) => {
                    info!("Device authorization completed after {} attempts", attempts);
                    return Ok(grant);
                }
                Err(TokenPollError::AuthorizationPending) => {
                    debug!("Authorization pending (attempt {})", attempts);
                }
                Err(TokenPollError::SlowDown) => {
                    interval += std::time::Duration::from_secs(SLOW_DOWN_INCREMENT_SECS);
                    debug!("Slow down requested, polling every {:?}", interval);
                }
                Err(TokenPollError::Failed(e)) => {
                    return Err(AwscError::DeviceAuthFailed(format!(
                        "failed to create token: {}",
                        e
                    )));
                }
            }

            if self.show_progress {
                print!(".");
                let _ = std::io::stdout().flush();
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(AwscError::AuthCancelled),
                _ = self.clock.sleep(interval) => {}
            }
        }
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(AwscError::AuthCancelled)
    } else {
        Ok(())
    }
}

fn device_auth_failure(step: &'static str) -> impl Fn(AwscError) -> AwscError {
    move |e| match e {
        AwscError::AuthCancelled => AwscError::AuthCancelled,
        other => AwscError::DeviceAuthFailed(format!("failed to {}: {}", step, other)),
    }
}

/// [`OidcProvider`] backed by `aws-sdk-ssooidc`.
#[derive(Debug, Clone)]
pub struct SdkOidcProvider {
    client: SsoOidcClient,
}

impl SdkOidcProvider {
    /// OIDC calls are unauthenticated, so no credential chain is loaded.
    pub async fn new(sso_region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(sso_region.to_string()))
            .no_credentials()
            .load()
            .await;
        Self {
            client: SsoOidcClient::new(&config),
        }
    }
}

#[async_trait]
impl OidcProvider for SdkOidcProvider {
    async fn register_client(&self, client_name: &str) -> Result<ClientRegistration> {
        let resp = self
            .client
            .register_client()
            .client_name(client_name)
            .client_type("public")
            .send()
            .await
            .map_err(|e| from_sdk_error("register client", e))?;

        Ok(ClientRegistration {
            client_id: resp.client_id.unwrap_or_default(),
            client_secret: resp.client_secret.unwrap_or_default(),
        })
    }

    async fn start_device_authorization(
        &self,
        registration: &ClientRegistration,
        start_url: &str,
    ) -> Result<DeviceAuthorizationData> {
        let resp = self
            .client
            .start_device_authorization()
            .client_id(&registration.client_id)
            .client_secret(&registration.client_secret)
            .start_url(start_url)
            .send()
            .await
            .map_err(|e| from_sdk_error("start device authorization", e))?;

        Ok(DeviceAuthorizationData {
            device_code: resp.device_code.unwrap_or_default(),
            user_code: resp.user_code.unwrap_or_default(),
            verification_uri: resp.verification_uri.unwrap_or_default(),
            verification_uri_complete: resp.verification_uri_complete,
            expires_in: resp.expires_in as i64,
            interval: resp.interval as i64,
        })
    }

    async fn create_token(
        &self,
        registration: &ClientRegistration,
        device_code: &str,
    ) -> std::result::Result<TokenGrant, TokenPollError> {
        let result = self
            .client
            .create_token()
            .client_id(&registration.client_id)
            .client_secret(&registration.client_secret)
            .device_code(device_code)
            .grant_type(DEVICE_CODE_GRANT_TYPE)
            .send()
            .await;

        match result {
            Ok(resp) => Ok(TokenGrant {
                access_token: resp.access_token.unwrap_or_default(),
                expires_in: resp.expires_in as i64,
            }),
            Err(err) => {
                if let Some(service_err) = err.as_service_error() {
                    if service_err.is_authorization_pending_exception() {
                        return Err(TokenPollError::AuthorizationPending);
                    }
                    if service_err.is_slow_down_exception() {
                        return Err(TokenPollError::SlowDown);
                    }
                }
                let converted = from_sdk_error("create token", err);
                Err(classify_poll_message(converted))
            }
        }
    }
}

/// Fallback for poll errors whose type did not survive the SDK boundary.
fn classify_poll_message(err: AwscError) -> TokenPollError {
    let message = err.to_string();
    if message.contains("AuthorizationPendingException")
        || message.contains("authorization_pending")
    {
        TokenPollError::AuthorizationPending
    } else if message.contains("SlowDownException") || message.contains("slow_down") {
        TokenPollError::SlowDown
    } else {
        TokenPollError::Failed(err)
    }
}
