//! # SSO access token cache
//!
//! One JSON document per SSO start URL, named by the SHA-1 of the URL so that
//! several organizations can be logged in side by side. The document layout
//! (`startUrl`, `accessToken`, `expiresAt`, `region`) matches the files the AWS
//! CLI keeps in `~/.aws/sso/cache`.
//!
//! ## Read policy
//!
//! [`TokenCache::get`] returns the cached token **without checking
//! `expiresAt`**. A stale token is discovered when the SSO portal rejects it,
//! which the reauthentication protocol turns into a fresh device login.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{debug, info};

use crate::app::disk_store::DiskStore;
use crate::app::error::{AwscError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCacheEntry {
    pub start_url: String,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub region: String,
}

impl TokenCacheEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct TokenCache {
    store: DiskStore,
}

impl TokenCache {
    pub fn new(store: DiskStore) -> Self {
        Self { store }
    }

    /// Cache file name for a start URL: lowercase hex SHA-1 plus `.json`.
    pub fn cache_key(start_url: &str) -> String {
        let digest = Sha1::digest(start_url.as_bytes());
        format!("{}.json", hex::encode(digest))
    }

    pub fn get(&self, start_url: &str) -> Result<TokenCacheEntry> {
        let key = Self::cache_key(start_url);
        match self.store.read_json::<TokenCacheEntry>(&key) {
            Ok(Some(entry)) => {
                debug!("Using cached SSO token for {}", start_url);
                Ok(entry)
            }
            Ok(None) => Err(AwscError::NoCachedToken {
                start_url: start_url.to_string(),
            }),
            // An unreadable document is as good as none: the user must log in again
            Err(AwscError::Serialization { .. }) => Err(AwscError::NoCachedToken {
                start_url: start_url.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    pub fn put(
        &self,
        start_url: &str,
        access_token: &str,
        expires_at: DateTime<Utc>,
        region: &str,
    ) -> Result<TokenCacheEntry> {
        let entry = TokenCacheEntry {
            start_url: start_url.to_string(),
            access_token: access_token.to_string(),
            expires_at,
            region: region.to_string(),
        };
        self.store.write_json(&Self::cache_key(start_url), &entry)?;
        info!("Cached SSO token for {} (expires {})", start_url, expires_at);
        Ok(entry)
    }

    /// Forget the token for `start_url`, forcing the next login through the device flow.
    pub fn clear(&self, start_url: &str) -> Result<bool> {
        self.store.remove(&Self::cache_key(start_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    const START_URL: &str = "https://acme.awsapps.com/start";

    fn cache(dir: &tempfile::TempDir) -> TokenCache {
        TokenCache::new(DiskStore::new(dir.path().join("sso").join("cache")))
    }

    #[test]
    fn put_then_get_returns_same_token() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let expires_at = Utc::now() + Duration::hours(8);

        cache.put(START_URL, "token-abc", expires_at, "us-east-1").unwrap();
        let entry = cache.get(START_URL).unwrap();

        assert_eq!(entry.access_token, "token-abc");
        assert_eq!(entry.region, "us-east-1");
        assert_eq!(entry.start_url, START_URL);
        assert_eq!(entry.expires_at, expires_at);
    }

    #[test]
    fn missing_entry_is_reported_as_no_cached_token() {
        let dir = tempfile::tempdir().unwrap();
        let err = cache(&dir).get(START_URL).unwrap_err();
        assert!(matches!(err, AwscError::NoCachedToken { ref start_url } if start_url == START_URL));
    }

    #[test]
    fn expired_token_is_still_returned() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let expires_at = Utc::now() - Duration::hours(1);
        cache.put(START_URL, "stale", expires_at, "us-east-1").unwrap();

        let entry = cache.get(START_URL).unwrap();
        assert_eq!(entry.access_token, "stale");
        assert!(entry.is_expired_at(Utc::now()));
    }

    #[test]
    fn start_urls_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        let expires_at = Utc::now() + Duration::hours(1);
        cache.put(START_URL, "acme", expires_at, "us-east-1").unwrap();
        cache
            .put("https://globex.awsapps.com/start", "globex", expires_at, "eu-west-1")
            .unwrap();

        assert_eq!(cache.get(START_URL).unwrap().access_token, "acme");
        assert_eq!(
            cache.get("https://globex.awsapps.com/start").unwrap().access_token,
            "globex"
        );
    }

    #[test]
    fn cache_key_is_sha1_of_start_url() {
        assert_eq!(
            TokenCache::cache_key("abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d.json"
        );
    }

    #[test]
    fn document_uses_aws_cli_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        cache
            .put(START_URL, "t", Utc::now() + Duration::hours(1), "us-east-1")
            .unwrap();
        let raw = std::fs::read_to_string(
            dir.path().join("sso").join("cache").join(TokenCache::cache_key(START_URL)),
        )
        .unwrap();
        assert!(raw.contains("\"accessToken\""));
        assert!(raw.contains("\"expiresAt\""));
        assert!(raw.contains("\"startUrl\""));
    }

    #[test]
    fn clear_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(&dir);
        cache
            .put(START_URL, "t", Utc::now() + Duration::hours(1), "us-east-1")
            .unwrap();
        assert!(cache.clear(START_URL).unwrap());
        assert!(cache.get(START_URL).is_err());
        assert!(!cache.clear(START_URL).unwrap());
    }
}
