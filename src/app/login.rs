//! # Login and account switching
//!
//! [`LoginFlow::run`] takes a terminal from "nothing selected" to a resolvable
//! profile:
//!
//! 1. List accounts with the cached SSO token. If there is no token, or the
//!    portal rejects it, run the device flow and list again.
//! 2. Pick an account, then a role (both sorted by name). `--account` and
//!    `--role` answer the picker up front.
//! 3. Fetch role credentials through the credential cache.
//! 4. Write them to `[profile awsc-<account>]` in the shared config file.
//! 5. Register the profile as this terminal's session and sweep sessions of
//!    terminals that have closed.
//!
//! [`LoginReauthenticator`] wraps the same flow behind the confirmation prompt
//! used by the reauthentication protocol.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::aws_identity::{DeviceAuthorizationClient, OidcProvider, SdkOidcProvider};
use crate::app::error::{AwscError, Result};
use crate::app::picker::Picker;
use crate::app::reauth::{is_auth_error, Reauthenticator};
use crate::app::session_registry::{current_ppid, SessionInfo};
use crate::app::settings::{self, SsoSettings};
use crate::app::sso_portal::{AccountInfo, SdkSsoPortal, SsoPortal};
use crate::app::token_cache::{TokenCache, TokenCacheEntry};
use crate::app::AppContext;

/// Name the OIDC client registers under.
pub const CLIENT_NAME: &str = "awsc";

/// Builds the AWS-facing services once the SSO region is known.
#[async_trait]
pub trait AwsBackend: Send + Sync {
    async fn oidc(&self, sso_region: &str) -> Arc<dyn OidcProvider>;

    async fn portal(&self, sso_region: &str) -> Arc<dyn SsoPortal>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SdkBackend;

#[async_trait]
impl AwsBackend for SdkBackend {
    async fn oidc(&self, sso_region: &str) -> Arc<dyn OidcProvider> {
        Arc::new(SdkOidcProvider::new(sso_region).await)
    }

    async fn portal(&self, sso_region: &str) -> Arc<dyn SsoPortal> {
        Arc::new(SdkSsoPortal::new(sso_region).await)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginOptions {
    /// Drop cached tokens and credentials and go through the device flow.
    pub force: bool,
    /// Account id or name to select without prompting.
    pub account: Option<String>,
    /// Role name to select without prompting.
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    LoggedIn(SessionInfo),
    /// The user quit a picker; nothing was changed.
    Cancelled,
}

pub struct LoginFlow {
    ctx: AppContext,
    backend: Arc<dyn AwsBackend>,
    picker: Arc<dyn Picker>,
    ppid: u32,
    open_browser: bool,
    quiet: bool,
}

impl LoginFlow {
    pub fn new(ctx: AppContext, backend: Arc<dyn AwsBackend>, picker: Arc<dyn Picker>) -> Self {
        Self {
            ctx,
            backend,
            picker,
            ppid: current_ppid(),
            open_browser: true,
            quiet: false,
        }
    }

    /// Register the session for `ppid` instead of the invoking shell.
    pub fn for_ppid(mut self, ppid: u32) -> Self {
        self.ppid = ppid;
        self
    }

    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    fn say(&self, message: &str) {
        if !self.quiet {
            println!("{}", message);
        }
    }

    pub async fn run(
        &self,
        options: &LoginOptions,
        cancel: &CancellationToken,
    ) -> Result<LoginOutcome> {
        let sso = self.ctx.settings.require_sso()?.clone();
        self.ctx.settings.validate()?;
        let token_cache = self.ctx.token_cache();
        let portal = self.backend.portal(&sso.region).await;

        if options.force {
            if let Err(e) = token_cache.clear(&sso.start_url) {
                warn!("Failed to clear SSO token cache: {}", e);
            }
            if let Err(e) = self.ctx.credential_cache().clear() {
                warn!("Failed to clear credential cache: {}", e);
            }
            self.say("Forcing re-authentication...");
        }

        let cached = if options.force {
            None
        } else {
            self.list_with_cached_token(&token_cache, portal.as_ref(), &sso.start_url)
                .await?
        };

        let (access_token, mut accounts) = match cached {
            Some(found) => found,
            None => {
                if !options.force {
                    self.say("Starting SSO authentication...");
                }
                let entry = self.authenticate(&token_cache, &sso, cancel).await?;
                self.say("Authentication completed!");
                let accounts = portal.list_accounts(&entry.access_token).await?;
                (entry.access_token, accounts)
            }
        };

        if accounts.is_empty() {
            return Err(AwscError::Provider(
                "no accounts found, make sure you're authenticated with AWS SSO".to_string(),
            ));
        }
        accounts.sort_by(|a, b| a.account_name.cmp(&b.account_name));
        if let Err(e) = self.ctx.account_names().save(&accounts) {
            warn!("Failed to save account names: {}", e);
        }

        let Some(account) = self.choose_account(&accounts, options.account.as_deref())? else {
            return Ok(LoginOutcome::Cancelled);
        };

        let mut roles = portal
            .list_account_roles(&access_token, &account.account_id)
            .await?;
        if roles.is_empty() {
            return Err(AwscError::Provider(format!(
                "no roles found for account {}",
                account.label()
            )));
        }
        roles.sort();

        let Some(role) = self.choose_role(&account, &roles, options.role.as_deref())? else {
            return Ok(LoginOutcome::Cancelled);
        };

        let credentials = self
            .ctx
            .credential_cache()
            .get_or_fetch(portal.as_ref(), &access_token, &account.account_id, &role)
            .await?;

        let profiles = self.ctx.profile_file();
        let profile_name = profiles.write_profile(
            &account.account_name,
            &account.account_id,
            &role,
            &credentials,
        )?;

        let registry = self.ctx.session_registry();
        let session = registry.save(
            self.ppid,
            &profile_name,
            &account.account_id,
            &account.account_name,
            &role,
        )?;
        let swept = registry.sweep();
        if swept > 0 {
            debug!("Removed {} stale sessions", swept);
        }

        info!(
            "Logged in to {} as {} (profile {})",
            account.label(),
            role,
            profile_name
        );
        self.say(&format!("Assumed role {} in account {}", role, account.account_name));
        self.say(&format!(
            "Credentials saved to {} (profile {})",
            profiles.path().display(),
            profile_name
        ));
        Ok(LoginOutcome::LoggedIn(session))
    }

    /// Forget the profile override and log in again without forcing the device flow.
    pub async fn switch_account(&mut self, cancel: &CancellationToken) -> Result<LoginOutcome> {
        self.ctx.profile_override = None;
        self.run(&LoginOptions::default(), cancel).await
    }

    /// Accounts listed with the cached token, or `None` when a fresh login is needed.
    async fn list_with_cached_token(
        &self,
        token_cache: &TokenCache,
        portal: &dyn SsoPortal,
        start_url: &str,
    ) -> Result<Option<(String, Vec<AccountInfo>)>> {
        let entry = match token_cache.get(start_url) {
            Ok(entry) => entry,
            Err(e) if is_auth_error(&e) => return Ok(None),
            Err(e) => return Err(e),
        };
        if entry.is_expired_at(self.ctx.clock.now()) {
            debug!("Cached SSO token expired at {}, trying it anyway", entry.expires_at);
        }

        match portal.list_accounts(&entry.access_token).await {
            Ok(accounts) => Ok(Some((entry.access_token, accounts))),
            Err(e) if is_auth_error(&e) => {
                debug!("Cached SSO token rejected: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn authenticate(
        &self,
        token_cache: &TokenCache,
        sso: &SsoSettings,
        cancel: &CancellationToken,
    ) -> Result<TokenCacheEntry> {
        let oidc = self.backend.oidc(&sso.region).await;
        let mut client = DeviceAuthorizationClient::new(
            oidc,
            token_cache.clone(),
            self.ctx.clock.clone(),
            CLIENT_NAME,
        );
        if !self.open_browser {
            client = client.without_browser();
        }
        if self.quiet {
            client = client.quiet();
        }
        client.authenticate(&sso.start_url, &sso.region, cancel).await
    }

    fn choose_account(
        &self,
        accounts: &[AccountInfo],
        hint: Option<&str>,
    ) -> Result<Option<AccountInfo>> {
        if let Some(hint) = hint {
            return accounts
                .iter()
                .find(|a| a.account_id == hint || a.account_name.eq_ignore_ascii_case(hint))
                .cloned()
                .map(Some)
                .ok_or_else(|| AwscError::Provider(format!("account '{}' not found", hint)));
        }

        let labels: Vec<String> = accounts.iter().map(AccountInfo::label).collect();
        Ok(self
            .picker
            .pick("Select AWS Account:", &labels)?
            .and_then(|i| accounts.get(i).cloned()))
    }

    fn choose_role(
        &self,
        account: &AccountInfo,
        roles: &[String],
        hint: Option<&str>,
    ) -> Result<Option<String>> {
        if let Some(hint) = hint {
            return roles
                .iter()
                .find(|r| r.as_str() == hint)
                .cloned()
                .map(Some)
                .ok_or_else(|| {
                    AwscError::Provider(format!(
                        "role '{}' not available in account {}",
                        hint,
                        account.label()
                    ))
                });
        }

        let title = format!("Select role for {}:", account.account_name);
        Ok(self
            .picker
            .pick(&title, roles)?
            .and_then(|i| roles.get(i).cloned()))
    }
}

/// Reauthentication through an interactive login.
///
/// Without SSO configuration the user is first offered `config init`. With
/// `assume_yes` the confirmation prompts are skipped.
pub struct LoginReauthenticator {
    ctx: AppContext,
    backend: Arc<dyn AwsBackend>,
    picker: Arc<dyn Picker>,
    cancel: CancellationToken,
    assume_yes: bool,
    open_browser: bool,
    quiet: bool,
}

impl LoginReauthenticator {
    pub fn new(
        ctx: AppContext,
        backend: Arc<dyn AwsBackend>,
        picker: Arc<dyn Picker>,
        cancel: CancellationToken,
        assume_yes: bool,
    ) -> Self {
        Self {
            ctx,
            backend,
            picker,
            cancel,
            assume_yes,
            open_browser: true,
            quiet: false,
        }
    }

    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    fn confirm(&self, prompt: &str) -> Result<bool> {
        if self.assume_yes {
            return Ok(true);
        }
        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        settings::confirm(&mut input, &mut std::io::stderr(), prompt)
    }
}

#[async_trait]
impl Reauthenticator for LoginReauthenticator {
    async fn reauthenticate(&self, cause: &AwscError) -> Result<bool> {
        debug!("Reauthentication requested: {}", cause);
        let mut ctx = self.ctx.clone();

        if !ctx.settings.is_configured() {
            if !self.confirm("No SSO configuration found. Set up configuration? (y/n): ")? {
                return Ok(false);
            }
            let initialized = {
                let stdin = std::io::stdin();
                let mut input = stdin.lock();
                settings::init_interactive(&ctx.paths, &mut input, &mut std::io::stderr())?
            };
            match initialized {
                Some(configured) => ctx.settings = configured,
                None => return Ok(false),
            }
            if !self.quiet {
                eprintln!("Configuration complete. Now authenticating...");
            }
        } else if !self.confirm("Credentials expired. Re-authenticate? (y/n): ")? {
            return Ok(false);
        }

        let mut flow = LoginFlow::new(ctx, self.backend.clone(), self.picker.clone());
        if !self.open_browser {
            flow = flow.without_browser();
        }
        if self.quiet {
            flow = flow.quiet();
        }
        match flow.run(&LoginOptions::default(), &self.cancel).await {
            Ok(LoginOutcome::LoggedIn(_)) => {
                if !self.quiet {
                    eprintln!("Authentication successful. Retrying operation...");
                }
                Ok(true)
            }
            Ok(LoginOutcome::Cancelled) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
