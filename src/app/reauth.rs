//! # Reauthentication protocol
//!
//! Every command that calls AWS goes through [`run_with_reauth`]: when the call
//! fails with an auth-related error the user is taken through login once and
//! the call is retried exactly once. A second failure is returned as-is with a
//! hint to log in again; the protocol never loops.
//!
//! ## Classification
//!
//! [`is_auth_error`] classifies on the [`AwscError`] variant. Only errors that
//! reached the crate untyped (`Provider`) are matched against the message
//! fingerprints in [`is_auth_error_message`]. The fingerprint list is
//! heuristic and lives only here.
//!
//! Permission failures ("is not authorized to perform") are never auth-related,
//! even when their message also carries an auth fingerprint.

use async_trait::async_trait;
use std::future::Future;
use tracing::{info, warn};

use crate::app::error::{AwscError, Result};

const PERMISSION_FINGERPRINT: &str = "is not authorized to perform";

/// Endpoint resolution failure when neither the profile nor `--region` sets a region.
pub const MISSING_REGION_FINGERPRINT: &str = "Missing Region";

const AUTH_FINGERPRINTS: &[&str] = &[
    // aws-config credential chain and profile loading
    "no credentials found in chain",
    "the credential provider was not enabled",
    "was not defined",
    MISSING_REGION_FINGERPRINT,
    "AuthFailure",
    "SignatureDoesNotMatch",
    "TokenRefreshRequired",
    "ExpiredToken",
    "InvalidToken",
    "get credentials",
    "no EC2 IMDS role found",
    "failed to refresh cached credentials",
    // DNS failure when no region is configured
    "no such host",
    "failed to load AWS config",
    "no active session",
    "failed to get shared config profile",
];

pub fn is_permission_message(message: &str) -> bool {
    message.contains(PERMISSION_FINGERPRINT)
}

pub fn is_auth_error_message(message: &str) -> bool {
    if message.is_empty() || is_permission_message(message) {
        return false;
    }
    AUTH_FINGERPRINTS.iter().any(|fp| message.contains(fp))
}

pub fn is_auth_error(err: &AwscError) -> bool {
    match err {
        AwscError::Auth(message) => !is_permission_message(message),
        AwscError::NoActiveSession
        | AwscError::MissingProfile(_)
        | AwscError::NoCachedToken { .. }
        | AwscError::CredentialsExpired { .. } => true,
        AwscError::Provider(message) => is_auth_error_message(message),
        _ => false,
    }
}

/// Takes the user through login after an auth failure.
#[async_trait]
pub trait Reauthenticator: Send + Sync {
    /// Returns `Ok(false)` when the user declined.
    async fn reauthenticate(&self, cause: &AwscError) -> Result<bool>;
}

/// Handle a failed call: reauthenticate and run `retry` once if `err` is
/// auth-related, otherwise return `err` unchanged.
pub async fn handle_auth_failure_and_retry<T, F, Fut>(
    err: AwscError,
    reauthenticator: &dyn Reauthenticator,
    retry: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if !is_auth_error(&err) {
        return Err(err);
    }

    info!("Auth failure, reauthenticating: {}", err);
    if !reauthenticator.reauthenticate(&err).await? {
        return Err(err);
    }

    match retry().await {
        Ok(value) => Ok(value),
        Err(second) if is_auth_error(&second) => {
            warn!("Retry after reauthentication failed: {}", second);
            Err(AwscError::Auth(format!(
                "{} (still failing after re-authentication, run 'awsc login --force')",
                second
            )))
        }
        Err(second) => Err(second),
    }
}

/// Run `op`, going through [`handle_auth_failure_and_retry`] if it fails.
pub async fn run_with_reauth<T, F, Fut>(reauthenticator: &dyn Reauthenticator, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(err) => handle_auth_failure_and_retry(err, reauthenticator, op).await,
    }
}
