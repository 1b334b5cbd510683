//! # Credential resolver
//!
//! Decides which named profile and region every AWS client is built with.
//!
//! Resolution order:
//! 1. `AWSC_PROFILE`, when set, always wins and skips the session lookup.
//! 2. The session registered for the invoking terminal.
//! 3. Otherwise [`AwscError::NoActiveSession`].
//!
//! A session whose profile has since disappeared from the shared config file
//! is reported as [`AwscError::MissingProfile`] rather than "no session", so the
//! user is told to log in again. The region comes from the tool configuration
//! (or an explicit override), never from the profile.

use aws_config::{BehaviorVersion, SdkConfig};
use aws_types::region::Region;
use tracing::debug;

use crate::app::aws_profile::AwsProfileFile;
use crate::app::error::{AwscError, Result};
use crate::app::session_registry::{current_ppid, SessionInfo, SessionRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileSource {
    EnvOverride,
    Session(SessionInfo),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub profile_name: String,
    pub region: Option<String>,
    pub source: ProfileSource,
}

#[derive(Debug, Clone)]
pub struct CredentialResolver {
    registry: SessionRegistry,
    profiles: AwsProfileFile,
    profile_override: Option<String>,
    region: Option<String>,
    ppid: u32,
}

impl CredentialResolver {
    pub fn new(
        registry: SessionRegistry,
        profiles: AwsProfileFile,
        profile_override: Option<String>,
        region: Option<String>,
    ) -> Self {
        Self {
            registry,
            profiles,
            profile_override: profile_override.filter(|p| !p.is_empty()),
            region: region.filter(|r| !r.is_empty()),
            ppid: current_ppid(),
        }
    }

    /// Resolve as if invoked from the shell with process id `ppid`.
    pub fn for_ppid(mut self, ppid: u32) -> Self {
        self.ppid = ppid;
        self
    }

    /// Forget the profile override so the next resolution uses the session.
    pub fn clear_profile_override(&mut self) {
        self.profile_override = None;
    }

    pub fn resolve(&self) -> Result<ResolvedIdentity> {
        if let Some(profile_name) = &self.profile_override {
            debug!("Using profile override {}", profile_name);
            return Ok(ResolvedIdentity {
                profile_name: profile_name.clone(),
                region: self.region.clone(),
                source: ProfileSource::EnvOverride,
            });
        }

        let session = self.registry.get(self.ppid)?;
        if !self.profiles.profile_exists(&session.profile_name)? {
            return Err(AwscError::MissingProfile(session.profile_name));
        }

        debug!(
            "Using session profile {} for terminal {}",
            session.profile_name, self.ppid
        );
        Ok(ResolvedIdentity {
            profile_name: session.profile_name.clone(),
            region: self.region.clone(),
            source: ProfileSource::Session(session),
        })
    }

    /// SDK configuration for the resolved profile and region.
    pub async fn load_sdk_config(&self) -> Result<SdkConfig> {
        let identity = self.resolve()?;
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .profile_name(&identity.profile_name);
        if let Some(region) = identity.region {
            loader = loader.region(Region::new(region));
        }
        Ok(loader.load().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::disk_store::DiskStore;
    use crate::app::sso_portal::RoleCredentials;
    use pretty_assertions::assert_eq;

    struct Fixture {
        _dir: tempfile::TempDir,
        registry: SessionRegistry,
        profiles: AwsProfileFile,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new(DiskStore::new(dir.path().join("sessions")));
        let profiles = AwsProfileFile::new(dir.path().join("config"));
        Fixture {
            _dir: dir,
            registry,
            profiles,
        }
    }

    fn write_prod_profile(profiles: &AwsProfileFile) {
        let creds = RoleCredentials {
            access_key_id: "ASIAEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: "token".to_string(),
            expiration: None,
        };
        profiles
            .write_profile("Prod", "111111111111", "Admin", &creds)
            .unwrap();
    }

    #[test]
    fn override_wins_over_session() {
        let f = fixture();
        f.registry.save(100, "awsc-Prod", "111111111111", "Prod", "Admin").unwrap();

        let resolver = CredentialResolver::new(
            f.registry.clone(),
            f.profiles.clone(),
            Some("X".to_string()),
            Some("eu-west-1".to_string()),
        )
        .for_ppid(100);

        let identity = resolver.resolve().unwrap();
        assert_eq!(identity.profile_name, "X");
        assert_eq!(identity.source, ProfileSource::EnvOverride);
        assert_eq!(identity.region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn session_is_used_without_override() {
        let f = fixture();
        write_prod_profile(&f.profiles);
        f.registry.save(100, "awsc-Prod", "111111111111", "Prod", "Admin").unwrap();

        let resolver = CredentialResolver::new(f.registry.clone(), f.profiles.clone(), None, None)
            .for_ppid(100);
        let identity = resolver.resolve().unwrap();
        assert_eq!(identity.profile_name, "awsc-Prod");
        assert!(matches!(identity.source, ProfileSource::Session(ref s) if s.role_name == "Admin"));
        assert_eq!(identity.region, None);
    }

    #[test]
    fn no_override_and_no_session() {
        let f = fixture();
        let resolver = CredentialResolver::new(
            f.registry.clone(),
            f.profiles.clone(),
            Some(String::new()),
            None,
        )
        .for_ppid(200);
        assert!(matches!(resolver.resolve(), Err(AwscError::NoActiveSession)));
    }

    #[test]
    fn removed_profile_is_reported_as_missing() {
        let f = fixture();
        f.registry.save(100, "awsc-Prod", "111111111111", "Prod", "Admin").unwrap();

        let resolver = CredentialResolver::new(f.registry.clone(), f.profiles.clone(), None, None)
            .for_ppid(100);
        assert!(matches!(
            resolver.resolve(),
            Err(AwscError::MissingProfile(ref name)) if name == "awsc-Prod"
        ));
    }

    #[test]
    fn clearing_override_falls_through_to_session() {
        let f = fixture();
        write_prod_profile(&f.profiles);
        f.registry.save(100, "awsc-Prod", "111111111111", "Prod", "Admin").unwrap();

        let mut resolver = CredentialResolver::new(
            f.registry.clone(),
            f.profiles.clone(),
            Some("awsc-Other".to_string()),
            None,
        )
        .for_ppid(100);
        resolver.clear_profile_override();

        assert_eq!(resolver.resolve().unwrap().profile_name, "awsc-Prod");
    }
}
