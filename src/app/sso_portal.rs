//! # SSO portal access
//!
//! Accounts, roles and short-lived role credentials obtained with an SSO access
//! token. [`SsoPortal`] is the seam the rest of the crate depends on;
//! [`SdkSsoPortal`] implements it with `aws-sdk-sso`, plus `aws-sdk-iam` for
//! the maximum session duration of the IAM role that backs a permission set.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_iam::Client as IamClient;
use aws_sdk_sso::Client as SsoClient;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::app::error::{from_sdk_error, AwscError, Result};

/// IAM path under which Identity Center provisions permission-set roles.
const SSO_ROLE_PATH_PREFIX: &str = "/aws-reserved/sso.amazonaws.com/";

/// IAM is a global service; its endpoint lives in us-east-1.
const IAM_REGION: &str = "us-east-1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_id: String,
    pub account_name: String,
    pub email_address: Option<String>,
}

impl AccountInfo {
    /// Label shown in the account picker, e.g. `Prod (111111111111)`.
    pub fn label(&self) -> String {
        format!("{} ({})", self.account_name, self.account_id)
    }
}

/// Temporary AWS credentials for one account/role pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    /// Expiry reported by the provider, when it sent one.
    pub expiration: Option<DateTime<Utc>>,
}

impl RoleCredentials {
    pub fn to_aws_credentials(&self) -> Credentials {
        Credentials::from_keys(
            &self.access_key_id,
            &self.secret_access_key,
            Some(self.session_token.clone()),
        )
    }
}

// Secret material stays out of Debug output and therefore out of logs
impl fmt::Debug for RoleCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoleCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &"** redacted **")
            .field("expiration", &self.expiration)
            .finish()
    }
}

#[async_trait]
pub trait SsoPortal: Send + Sync {
    async fn list_accounts(&self, access_token: &str) -> Result<Vec<AccountInfo>>;

    async fn list_account_roles(&self, access_token: &str, account_id: &str) -> Result<Vec<String>>;

    async fn get_role_credentials(
        &self,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<RoleCredentials>;

    /// Maximum session duration of the role behind `role_name`, looked up with
    /// credentials for that role.
    async fn max_session_duration(&self, credentials: &RoleCredentials, role_name: &str) -> Result<Duration>;
}

#[derive(Debug, Clone)]
pub struct SdkSsoPortal {
    client: SsoClient,
}

impl SdkSsoPortal {
    /// Build a portal client for the Identity Center region. No ambient
    /// credentials are loaded: SSO calls are authorized by the access token.
    pub async fn new(sso_region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(sso_region.to_string()))
            .no_credentials()
            .load()
            .await;
        Self {
            client: SsoClient::new(&config),
        }
    }
}

#[async_trait]
impl SsoPortal for SdkSsoPortal {
    async fn list_accounts(&self, access_token: &str) -> Result<Vec<AccountInfo>> {
        let mut accounts = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_accounts()
                .access_token(access_token)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| from_sdk_error("list accounts", e))?;

            for account in resp.account_list.unwrap_or_default() {
                let Some(account_id) = account.account_id else {
                    continue;
                };
                accounts.push(AccountInfo {
                    account_name: account.account_name.unwrap_or_else(|| account_id.clone()),
                    account_id,
                    email_address: account.email_address,
                });
            }

            match resp.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        info!("Listed {} accounts from AWS SSO", accounts.len());
        Ok(accounts)
    }

    async fn list_account_roles(&self, access_token: &str, account_id: &str) -> Result<Vec<String>> {
        let mut roles = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_account_roles()
                .access_token(access_token)
                .account_id(account_id)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| from_sdk_error("list account roles", e))?;

            roles.extend(
                resp.role_list
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|role| role.role_name),
            );

            match resp.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        debug!("Account {} has {} roles", account_id, roles.len());
        Ok(roles)
    }

    async fn get_role_credentials(
        &self,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<RoleCredentials> {
        let resp = self
            .client
            .get_role_credentials()
            .access_token(access_token)
            .account_id(account_id)
            .role_name(role_name)
            .send()
            .await
            .map_err(|e| from_sdk_error("get role credentials", e))?;

        let creds = resp
            .role_credentials
            .ok_or_else(|| AwscError::Provider("No credentials in response".to_string()))?;

        // expiration is epoch milliseconds
        let expiration = if creds.expiration > 0 {
            DateTime::from_timestamp_millis(creds.expiration)
        } else {
            None
        };

        Ok(RoleCredentials {
            access_key_id: creds.access_key_id.unwrap_or_default(),
            secret_access_key: creds.secret_access_key.unwrap_or_default(),
            session_token: creds.session_token.unwrap_or_default(),
            expiration,
        })
    }

    async fn max_session_duration(&self, credentials: &RoleCredentials, role_name: &str) -> Result<Duration> {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(IAM_REGION))
            .credentials_provider(credentials.to_aws_credentials())
            .load()
            .await;
        let iam = IamClient::new(&config);
        let prefix = sso_role_name_prefix(role_name);

        let mut marker: Option<String> = None;
        loop {
            let resp = iam
                .list_roles()
                .path_prefix(SSO_ROLE_PATH_PREFIX)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|e| from_sdk_error("list IAM roles", e))?;

            for role in resp.roles() {
                if role.role_name().starts_with(&prefix) {
                    if let Some(seconds) = role.max_session_duration() {
                        debug!("Role {} allows {}s sessions", role.role_name(), seconds);
                        return Ok(Duration::from_secs(seconds.max(0) as u64));
                    }
                }
            }

            if resp.is_truncated() {
                match resp.marker() {
                    Some(next) => marker = Some(next.to_string()),
                    None => break,
                }
            } else {
                break;
            }
        }

        warn!("No IAM role found for permission set {}", role_name);
        Err(AwscError::Provider(format!(
            "no IAM role found for permission set {}",
            role_name
        )))
    }
}

/// Identity Center names permission-set roles `AWSReservedSSO_<PermissionSet>_<suffix>`.
pub fn sso_role_name_prefix(permission_set: &str) -> String {
    format!("AWSReservedSSO_{}_", permission_set)
}
