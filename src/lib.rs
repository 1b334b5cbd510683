//! awsc - AWS SSO companion for the terminal
//!
//! `awsc` signs in to AWS IAM Identity Center with the device authorization
//! flow, lets the user pick an account and role, and makes that choice the
//! identity of the current terminal. Other terminals keep their own choice.
//!
//! # Core Features
//!
//! - **Device authorization**: browser-based sign in, token cached per start URL
//! - **Credential caching**: role credentials reused until 90% of the role's
//!   maximum session duration has passed
//! - **Per-terminal sessions**: the selected profile is keyed by the shell's
//!   process id and cleaned up once the shell exits
//! - **Reauthentication**: any AWS call that fails for auth reasons goes through
//!   login once and is retried once
//!
//! # Architecture Overview
//!
//! - **Storage** ([`app::disk_store`], [`app::token_cache`], [`app::credential_cache`],
//!   [`app::session_registry`]): owner-only JSON files under `~/.aws` and `~/.awsc`
//! - **AWS integration** ([`app::aws_identity`], [`app::sso_portal`]): trait seams
//!   over the AWS SDK so flows can be exercised without network access
//! - **Orchestration** ([`app::login`], [`app::resolver`], [`app::reauth`]): the
//!   commands' building blocks, all constructed from one [`app::AppContext`]
//!
//! # Getting Started
//!
//! Commands that call AWS obtain their configuration from
//! [`app::resolver::CredentialResolver::load_sdk_config`] and wrap the call in
//! [`app::reauth::run_with_reauth`].

#![warn(clippy::all, rust_2018_idioms)]

pub mod app;

pub use app::error::{AwscError, Result};
pub use app::AppContext;
