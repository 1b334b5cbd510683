//! Account id to display name lookup, refreshed on every account listing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::app::disk_store::DiskStore;
use crate::app::error::Result;
use crate::app::sso_portal::AccountInfo;

pub const ACCOUNT_NAMES_FILE: &str = "accounts.json";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountNames {
    pub accounts: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct AccountNameCache {
    store: DiskStore,
}

impl AccountNameCache {
    pub fn new(store: DiskStore) -> Self {
        Self { store }
    }

    /// Replace the whole mapping with `accounts`.
    pub fn save(&self, accounts: &[AccountInfo]) -> Result<()> {
        let names = AccountNames {
            accounts: accounts
                .iter()
                .map(|a| (a.account_id.clone(), a.account_name.clone()))
                .collect(),
        };
        self.store.write_json(ACCOUNT_NAMES_FILE, &names)
    }

    /// Cached name for `account_id`, or the id itself.
    pub fn name_for(&self, account_id: &str) -> String {
        match self.store.read_json::<AccountNames>(ACCOUNT_NAMES_FILE) {
            Ok(Some(names)) => names
                .accounts
                .get(account_id)
                .cloned()
                .unwrap_or_else(|| account_id.to_string()),
            Ok(None) => account_id.to_string(),
            Err(e) => {
                debug!("Account name cache unreadable: {}", e);
                account_id.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str, name: &str) -> AccountInfo {
        AccountInfo {
            account_id: id.to_string(),
            account_name: name.to_string(),
            email_address: None,
        }
    }

    #[test]
    fn unknown_ids_fall_back_to_the_id() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AccountNameCache::new(DiskStore::new(dir.path()));
        assert_eq!(cache.name_for("111111111111"), "111111111111");

        cache.save(&[account("111111111111", "Prod")]).unwrap();
        assert_eq!(cache.name_for("111111111111"), "Prod");
        assert_eq!(cache.name_for("222222222222"), "222222222222");
    }

    #[test]
    fn save_replaces_previous_listing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AccountNameCache::new(DiskStore::new(dir.path()));
        cache.save(&[account("111111111111", "Prod")]).unwrap();
        cache.save(&[account("222222222222", "Dev")]).unwrap();

        assert_eq!(cache.name_for("111111111111"), "111111111111");
        assert_eq!(cache.name_for("222222222222"), "Dev");
    }
}
