//! Caller identity line shown by `awsc whoami`.

use aws_config::SdkConfig;
use aws_sdk_sts::Client as StsClient;
use std::fmt;

use crate::app::error::{from_sdk_error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    pub account_id: String,
    /// Friendly name from the account name cache, when one is known.
    pub account_name: Option<String>,
    pub role: String,
    pub region: String,
}

impl fmt::Display for CallerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "| AccountID: {}", self.account_id)?;
        if let Some(name) = &self.account_name {
            write!(f, " ({})", name)?;
        }
        write!(f, " | Role: {} | Region: {} |", self.role, self.region)
    }
}

/// Role name from an STS assumed-role ARN
/// (`arn:aws:sts::123456789012:assumed-role/RoleName/SessionName`).
pub fn role_from_arn(arn: &str) -> Option<&str> {
    let (_, resource) = arn.split_once(":assumed-role/")?;
    resource.split('/').next().filter(|role| !role.is_empty())
}

impl CallerContext {
    pub fn new(account_id: Option<&str>, arn: Option<&str>, region: Option<&str>) -> Self {
        Self {
            account_id: account_id.unwrap_or("unknown").to_string(),
            account_name: None,
            role: arn.and_then(role_from_arn).unwrap_or("unknown").to_string(),
            region: region.filter(|r| !r.is_empty()).unwrap_or("default").to_string(),
        }
    }

    /// Attach the cached account name. The cache answers with the id itself
    /// for unknown accounts, which is not repeated.
    pub fn with_account_name(mut self, name: String) -> Self {
        self.account_name = Some(name).filter(|n| !n.is_empty() && *n != self.account_id);
        self
    }

    pub async fn fetch(config: &SdkConfig) -> Result<Self> {
        let identity = StsClient::new(config)
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| from_sdk_error("get caller identity", e))?;

        Ok(Self::new(
            identity.account(),
            identity.arn(),
            config.region().map(|r| r.as_ref()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assumed_role_arn_yields_role() {
        assert_eq!(
            role_from_arn("arn:aws:sts::111111111111:assumed-role/AWSReservedSSO_Admin_abc/jane"),
            Some("AWSReservedSSO_Admin_abc")
        );
        assert_eq!(role_from_arn("arn:aws:iam::111111111111:user/jane"), None);
    }

    #[test]
    fn display_line() {
        let ctx = CallerContext::new(
            Some("111111111111"),
            Some("arn:aws:iam::111111111111:user/jane"),
            None,
        );
        assert_eq!(
            ctx.to_string(),
            "| AccountID: 111111111111 | Role: unknown | Region: default |"
        );
    }

    #[test]
    fn display_line_with_account_name() {
        let ctx = CallerContext::new(
            Some("111111111111"),
            Some("arn:aws:sts::111111111111:assumed-role/Admin/jane"),
            Some("eu-west-1"),
        )
        .with_account_name("Prod".to_string());
        assert_eq!(
            ctx.to_string(),
            "| AccountID: 111111111111 (Prod) | Role: Admin | Region: eu-west-1 |"
        );
    }

    #[test]
    fn unknown_account_name_is_not_repeated() {
        let ctx = CallerContext::new(Some("222222222222"), None, None)
            .with_account_name("222222222222".to_string());
        assert_eq!(ctx.account_name, None);
        assert_eq!(
            ctx.to_string(),
            "| AccountID: 222222222222 | Role: unknown | Region: default |"
        );
    }
}
