//! # Role credential cache
//!
//! Short-lived AWS credentials per `(accountId, roleName)`, one JSON file per
//! pair named `creds-<sha1>.json` next to the SSO token cache.
//!
//! Unlike the token cache this one checks expiry on every read and never
//! hands out a stale entry. The stored `expiresAt` is
//! `now + 0.9 × max session duration` of the role.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::app::clock::Clock;
use crate::app::disk_store::DiskStore;
use crate::app::error::{AwscError, Result};
use crate::app::sso_portal::{RoleCredentials, SsoPortal};

/// Used when the role's maximum session duration cannot be looked up.
pub const DEFAULT_MAX_SESSION_DURATION: Duration = Duration::from_secs(3600);

/// Share of the maximum session duration a cached credential is trusted for.
pub const CACHE_LIFETIME_RATIO: f64 = 0.9;

const FILE_PREFIX: &str = "creds-";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialCacheEntry {
    pub account_id: String,
    pub role_name: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for CredentialCacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCacheEntry")
            .field("account_id", &self.account_id)
            .field("role_name", &self.role_name)
            .field("access_key_id", &self.access_key_id)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl CredentialCacheEntry {
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn credentials(&self) -> RoleCredentials {
        RoleCredentials {
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            session_token: self.session_token.clone(),
            expiration: Some(self.expires_at),
        }
    }
}

/// Outcome of a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialLookup {
    Fresh(CredentialCacheEntry),
    Stale { expired_at: DateTime<Utc> },
    Missing,
}

impl CredentialLookup {
    /// Fresh credentials, or `CredentialsExpired` for anything else.
    pub fn require_fresh(self, account_id: &str, role_name: &str) -> Result<RoleCredentials> {
        match self {
            CredentialLookup::Fresh(entry) => Ok(entry.credentials()),
            CredentialLookup::Stale { .. } | CredentialLookup::Missing => Err(AwscError::CredentialsExpired {
                account_id: account_id.to_string(),
                role_name: role_name.to_string(),
            }),
        }
    }
}

/// Lifetime a credential is cached for, given the role's maximum session duration.
pub fn cache_lifetime(max_session_duration: Duration) -> chrono::Duration {
    let millis = (max_session_duration.as_millis() as f64 * CACHE_LIFETIME_RATIO) as i64;
    chrono::Duration::milliseconds(millis)
}

#[derive(Debug, Clone)]
pub struct CredentialCache {
    store: DiskStore,
    clock: Arc<dyn Clock>,
}

impl CredentialCache {
    pub fn new(store: DiskStore, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn cache_key(account_id: &str, role_name: &str) -> String {
        let digest = Sha1::digest(format!("{}-{}", account_id, role_name).as_bytes());
        format!("{}{}.json", FILE_PREFIX, hex::encode(digest))
    }

    pub fn get(&self, account_id: &str, role_name: &str) -> CredentialLookup {
        let key = Self::cache_key(account_id, role_name);
        let entry = match self.store.read_json::<CredentialCacheEntry>(&key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return CredentialLookup::Missing,
            Err(e) => {
                // Unreadable entries are refetched and overwritten
                warn!("Ignoring credential cache entry {}: {}", key, e);
                return CredentialLookup::Missing;
            }
        };

        if entry.is_fresh_at(self.clock.now()) {
            CredentialLookup::Fresh(entry)
        } else {
            CredentialLookup::Stale {
                expired_at: entry.expires_at,
            }
        }
    }

    pub fn put(
        &self,
        account_id: &str,
        role_name: &str,
        credentials: &RoleCredentials,
        max_session_duration: Duration,
    ) -> Result<CredentialCacheEntry> {
        let entry = CredentialCacheEntry {
            account_id: account_id.to_string(),
            role_name: role_name.to_string(),
            access_key_id: credentials.access_key_id.clone(),
            secret_access_key: credentials.secret_access_key.clone(),
            session_token: credentials.session_token.clone(),
            expires_at: self.clock.now() + cache_lifetime(max_session_duration),
        };
        self.store
            .write_json(&Self::cache_key(account_id, role_name), &entry)?;
        debug!(
            "Cached credentials for {}/{} until {}",
            account_id, role_name, entry.expires_at
        );
        Ok(entry)
    }

    /// Cached credentials when fresh, otherwise fetch from the portal and cache them.
    pub async fn get_or_fetch(
        &self,
        portal: &dyn SsoPortal,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<RoleCredentials> {
        let lookup = self.get(account_id, role_name);
        if let CredentialLookup::Stale { expired_at } = &lookup {
            debug!(
                "Cached credentials for {}/{} expired at {}",
                account_id, role_name, expired_at
            );
        }

        match lookup.require_fresh(account_id, role_name) {
            Ok(credentials) => {
                debug!("Using cached credentials for {}/{}", account_id, role_name);
                return Ok(credentials);
            }
            Err(AwscError::CredentialsExpired { .. }) => {}
            Err(e) => return Err(e),
        }

        info!("Requesting fresh credentials for {}/{}", account_id, role_name);
        let credentials = portal
            .get_role_credentials(access_token, account_id, role_name)
            .await?;

        let max_session_duration = match portal.max_session_duration(&credentials, role_name).await {
            Ok(duration) => duration,
            Err(e) => {
                debug!(
                    "Falling back to {}s session duration for {}: {}",
                    DEFAULT_MAX_SESSION_DURATION.as_secs(),
                    role_name,
                    e
                );
                DEFAULT_MAX_SESSION_DURATION
            }
        };

        // A failed cache write only costs a refetch next time
        if let Err(e) = self.put(account_id, role_name, &credentials, max_session_duration) {
            warn!("Failed to cache credentials for {}/{}: {}", account_id, role_name, e);
        }
        Ok(credentials)
    }

    /// Drop every cached role credential.
    pub fn clear(&self) -> Result<usize> {
        self.store.remove_matching(|name| name.starts_with(FILE_PREFIX))
    }
}
