//! # Error taxonomy for authentication and credential management
//!
//! Every fallible operation in the crate returns [`AwscError`]. The variants
//! mirror the way failures are handled downstream:
//!
//! - [`AwscError::CredentialsExpired`] is internal. The credential cache raises it
//!   and the refresh path consumes it; it never reaches a command.
//! - [`AwscError::Auth`], [`AwscError::NoActiveSession`], [`AwscError::MissingProfile`]
//!   and [`AwscError::NoCachedToken`] are "auth-related" and feed the
//!   reauthentication protocol in [`crate::app::reauth`].
//! - [`AwscError::PermissionDenied`] is deliberately *not* auth-related.
//! - Everything else propagates with its original message.
//!
//! ## SDK boundary
//!
//! AWS SDK failures are converted exactly once, by [`from_sdk_error`]. The
//! typed service error code is inspected first; only when no code is available
//! (transport, dispatch and credential-provider failures) does the message
//! fingerprint heuristic from [`crate::app::reauth::is_auth_error_message`] decide.

use std::path::{Path, PathBuf};

use aws_credential_types::provider::error::CredentialsError;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;

use crate::app::reauth;

pub type Result<T> = std::result::Result<T, AwscError>;

#[derive(Debug, thiserror::Error)]
pub enum AwscError {
    #[error("no SSO configuration found, run 'awsc config init' first")]
    NoConfiguration,

    #[error("no active session")]
    NoActiveSession,

    #[error("failed to get shared config profile '{0}', run 'awsc login' again")]
    MissingProfile(String),

    #[error("no cached SSO session for {start_url}, please run 'awsc login'")]
    NoCachedToken { start_url: String },

    #[error("device authorization failed: {0}")]
    DeviceAuthFailed(String),

    #[error("authentication timed out - please try again")]
    AuthTimedOut,

    #[error("authentication cancelled")]
    AuthCancelled,

    #[error("cached credentials for {account_id}/{role_name} expired")]
    CredentialsExpired {
        account_id: String,
        role_name: String,
    },

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Provider(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", path.display())]
    Serialization { path: PathBuf, message: String },
}

impl AwscError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn serialization(path: impl AsRef<Path>, message: impl ToString) -> Self {
        Self::Serialization {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }

    /// Build an error from a message whose origin could not be typed.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if reauth::is_permission_message(&message) {
            Self::PermissionDenied(message)
        } else if reauth::is_auth_error_message(&message) {
            Self::Auth(message)
        } else {
            Self::Provider(message)
        }
    }
}

/// Service error codes that mean the caller's identity is no longer accepted.
const AUTH_ERROR_CODES: &[&str] = &[
    "UnauthorizedException",
    "ExpiredToken",
    "ExpiredTokenException",
    "InvalidToken",
    "InvalidClientTokenId",
    "InvalidGrantException",
    "InvalidClientException",
    "AuthFailure",
    "SignatureDoesNotMatch",
    "TokenRefreshRequired",
];

/// Service error codes that mean the identity is valid but lacks permission.
const PERMISSION_ERROR_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "UnauthorizedOperation",
];

/// Convert an AWS SDK error into the crate taxonomy.
///
/// `context` names the operation ("list accounts", "get role credentials") and
/// is prefixed to the message. Error messages from AWS never contain request
/// credentials, so the full error chain is kept for diagnostics.
pub fn from_sdk_error<E, R>(context: &str, err: SdkError<E, R>) -> AwscError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let code = err.code().map(str::to_string);
    let message = format!("failed to {}: {}", context, DisplayErrorContext(&err));

    match code.as_deref() {
        Some(code) if PERMISSION_ERROR_CODES.contains(&code) => {
            AwscError::PermissionDenied(message)
        }
        Some(code) if AUTH_ERROR_CODES.contains(&code) => AwscError::Auth(message),
        None if has_identity_cause(&err) => AwscError::Auth(message),
        _ => AwscError::from_message(message),
    }
}

/// Whether the request failed before reaching AWS because no identity could
/// be built: the credential chain produced nothing (undefined profile,
/// expired SSO session) or no region was configured.
fn has_identity_cause(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.downcast_ref::<CredentialsError>().is_some() {
            return true;
        }
        if e.to_string().contains(reauth::MISSING_REGION_FINGERPRINT) {
            return true;
        }
        current = e.source();
    }
    false
}
