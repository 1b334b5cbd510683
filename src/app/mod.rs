//! Core modules for the `awsc` SSO companion.
//!
//! # Module Organization
//!
//! ## Storage
//! - [`disk_store`] - owner-only JSON documents with atomic replace
//! - [`token_cache`] - SSO access tokens keyed by start URL
//! - [`credential_cache`] - role credentials keyed by account and role
//! - [`session_registry`] - per-terminal account/role selection
//! - [`account_names`] - account id to name lookup
//! - [`aws_profile`] - `[profile awsc-*]` sections in `~/.aws/config`
//!
//! ## AWS Integration
//! - [`aws_identity`] - Identity Center device authorization
//! - [`sso_portal`] - accounts, roles and role credentials
//! - [`aws_context`] - STS caller identity
//!
//! ## Orchestration
//! - [`resolver`] - which profile and region AWS clients use
//! - [`reauth`] - auth error classification and the login-once-and-retry contract
//! - [`login`] - the `login` and `switch-account` flows
//!
//! # Architecture
//!
//! Nothing reads configuration from global state. `main` builds one
//! [`AppContext`] and every component is constructed from it.

pub mod account_names;
pub mod aws_context;
pub mod aws_identity;
pub mod aws_profile;
pub mod clock;
pub mod credential_cache;
pub mod disk_store;
pub mod error;
pub mod login;
pub mod picker;
pub mod reauth;
pub mod resolver;
pub mod session_registry;
pub mod settings;
pub mod sso_portal;
pub mod token_cache;

use std::sync::Arc;

use crate::app::account_names::AccountNameCache;
use crate::app::aws_profile::AwsProfileFile;
use crate::app::clock::{Clock, SystemClock};
use crate::app::credential_cache::CredentialCache;
use crate::app::disk_store::DiskStore;
use crate::app::error::Result;
use crate::app::resolver::CredentialResolver;
use crate::app::session_registry::{OsProcessProbe, ProcessProbe, SessionRegistry};
use crate::app::settings::{AwscPaths, AwscSettings, PROFILE_ENV};
use crate::app::token_cache::TokenCache;

/// Configuration and locations shared by every component of one invocation.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub paths: AwscPaths,
    pub settings: AwscSettings,
    /// `--region` / `AWSC_REGION`; takes precedence over `default_region`.
    pub region_override: Option<String>,
    /// `AWSC_PROFILE`; takes precedence over the terminal's session.
    pub profile_override: Option<String>,
    pub clock: Arc<dyn Clock>,
    /// Liveness check used when sweeping sessions of closed terminals.
    pub process_probe: Arc<dyn ProcessProbe>,
}

impl AppContext {
    pub fn new(paths: AwscPaths, settings: AwscSettings) -> Self {
        Self {
            paths,
            settings,
            region_override: None,
            profile_override: None,
            clock: Arc::new(SystemClock),
            process_probe: Arc::new(OsProcessProbe),
        }
    }

    /// Read the configuration file (absent means unconfigured) and the
    /// profile override from the environment.
    pub fn load(paths: AwscPaths, region_override: Option<String>) -> Result<Self> {
        let settings = AwscSettings::load_from_path(&paths.config_file)?.unwrap_or_default();
        let profile_override = std::env::var(PROFILE_ENV).ok();
        Ok(Self::new(paths, settings)
            .with_region_override(region_override)
            .with_profile_override(profile_override))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_process_probe(mut self, probe: Arc<dyn ProcessProbe>) -> Self {
        self.process_probe = probe;
        self
    }

    pub fn with_region_override(mut self, region: Option<String>) -> Self {
        self.region_override = region.filter(|r| !r.is_empty());
        self
    }

    pub fn with_profile_override(mut self, profile: Option<String>) -> Self {
        self.profile_override = profile.filter(|p| !p.is_empty());
        self
    }

    /// Region for AWS calls: the override, else the configured default.
    pub fn region(&self) -> Option<String> {
        self.region_override.clone().or_else(|| {
            Some(self.settings.default_region.clone()).filter(|r| !r.is_empty())
        })
    }

    pub fn token_cache(&self) -> TokenCache {
        TokenCache::new(DiskStore::new(self.paths.sso_cache_dir()))
    }

    pub fn credential_cache(&self) -> CredentialCache {
        CredentialCache::new(DiskStore::new(self.paths.sso_cache_dir()), self.clock.clone())
    }

    pub fn session_registry(&self) -> SessionRegistry {
        SessionRegistry::with_probe(DiskStore::new(self.paths.sessions_dir()), self.process_probe.clone())
    }

    pub fn account_names(&self) -> AccountNameCache {
        AccountNameCache::new(DiskStore::new(&self.paths.config_root))
    }

    pub fn profile_file(&self) -> AwsProfileFile {
        AwsProfileFile::new(self.paths.shared_config_file())
    }

    pub fn resolver(&self) -> CredentialResolver {
        CredentialResolver::new(
            self.session_registry(),
            self.profile_file(),
            self.profile_override.clone(),
            self.region(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_override_beats_default_region() {
        let paths = AwscPaths::new("/tmp/awsc", "/tmp/aws");
        let settings = AwscSettings::new("https://acme.awsapps.com/start", "us-east-1", "eu-west-1");
        let ctx = AppContext::new(paths, settings);
        assert_eq!(ctx.region().as_deref(), Some("eu-west-1"));

        let ctx = ctx.with_region_override(Some("ap-south-1".to_string()));
        assert_eq!(ctx.region().as_deref(), Some("ap-south-1"));
    }

    #[test]
    fn empty_values_are_not_overrides() {
        let ctx = AppContext::new(AwscPaths::new("/tmp/awsc", "/tmp/aws"), AwscSettings::default())
            .with_region_override(Some(String::new()))
            .with_profile_override(Some(String::new()));
        assert_eq!(ctx.region(), None);
        assert_eq!(ctx.profile_override, None);
    }
}
