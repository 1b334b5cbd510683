//! Test doubles shared by the integration tests: a manual clock, scripted
//! OIDC and SSO portal services, and a picker that answers from a queue.

#![allow(dead_code)]

use async_trait::async_trait;
use awsc::app::aws_identity::{ClientRegistration, DeviceAuthorizationData, OidcProvider, TokenGrant, TokenPollError};
use awsc::app::clock::Clock;
use awsc::app::error::{AwscError, Result};
use awsc::app::login::AwsBackend;
use awsc::app::picker::Picker;
use awsc::app::session_registry::StaticProcessProbe;
use awsc::app::settings::{AwscPaths, AwscSettings};
use awsc::app::sso_portal::{AccountInfo, RoleCredentials, SsoPortal};
use awsc::app::AppContext;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const START_URL: &str = "https://acme.awsapps.com/start";
pub const SSO_REGION: &str = "us-east-1";
pub const TERMINAL_PPID: u32 = 4242;

#[derive(Debug)]
pub struct TestClock {
    now: Mutex<DateTime<Utc>>,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2026, 10, 15, 9, 0, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }
}

#[async_trait]
impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(chrono::Duration::from_std(duration).unwrap());
    }
}

/// Issues `token` after `pending` authorization_pending responses.
pub struct FakeOidc {
    token: String,
    pending: AtomicU32,
    pub registrations: AtomicU32,
}

impl FakeOidc {
    pub fn new(token: &str, pending: u32) -> Self {
        Self {
            token: token.to_string(),
            pending: AtomicU32::new(pending),
            registrations: AtomicU32::new(0),
        }
    }

    pub fn registrations(&self) -> u32 {
        self.registrations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OidcProvider for FakeOidc {
    async fn register_client(&self, client_name: &str) -> Result<ClientRegistration> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(ClientRegistration {
            client_id: format!("{}-client", client_name),
            client_secret: "client-secret".to_string(),
        })
    }

    async fn start_device_authorization(
        &self,
        _registration: &ClientRegistration,
        _start_url: &str,
    ) -> Result<DeviceAuthorizationData> {
        Ok(DeviceAuthorizationData {
            device_code: "device-code".to_string(),
            user_code: "WXYZ-1234".to_string(),
            verification_uri: "https://device.sso.us-east-1.amazonaws.com/".to_string(),
            verification_uri_complete: None,
            expires_in: 600,
            interval: 5,
        })
    }

    async fn create_token(
        &self,
        _registration: &ClientRegistration,
        _device_code: &str,
    ) -> std::result::Result<TokenGrant, TokenPollError> {
        let remaining = self.pending.load(Ordering::SeqCst);
        if remaining > 0 {
            self.pending.store(remaining - 1, Ordering::SeqCst);
            return Err(TokenPollError::AuthorizationPending);
        }
        Ok(TokenGrant {
            access_token: self.token.clone(),
            expires_in: 28800,
        })
    }
}

/// SSO portal that only accepts tokens in `valid_tokens`.
pub struct FakePortal {
    accounts: Vec<AccountInfo>,
    roles: HashMap<String, Vec<String>>,
    valid_tokens: HashSet<String>,
    max_session: Option<Duration>,
    pub credential_fetches: AtomicU32,
}

impl FakePortal {
    pub fn new(valid_tokens: &[&str]) -> Self {
        Self {
            accounts: Vec::new(),
            roles: HashMap::new(),
            valid_tokens: valid_tokens.iter().map(|t| t.to_string()).collect(),
            max_session: Some(Duration::from_secs(3600)),
            credential_fetches: AtomicU32::new(0),
        }
    }

    pub fn with_account(mut self, id: &str, name: &str, roles: &[&str]) -> Self {
        self.accounts.push(AccountInfo {
            account_id: id.to_string(),
            account_name: name.to_string(),
            email_address: None,
        });
        self.roles
            .insert(id.to_string(), roles.iter().map(|r| r.to_string()).collect());
        self
    }

    pub fn credential_fetches(&self) -> u32 {
        self.credential_fetches.load(Ordering::SeqCst)
    }

    fn check(&self, token: &str) -> Result<()> {
        if self.valid_tokens.contains(token) {
            Ok(())
        } else {
            Err(AwscError::Auth(
                "UnauthorizedException: Session token not found or invalid".to_string(),
            ))
        }
    }
}

#[async_trait]
impl SsoPortal for FakePortal {
    async fn list_accounts(&self, access_token: &str) -> Result<Vec<AccountInfo>> {
        self.check(access_token)?;
        Ok(self.accounts.clone())
    }

    async fn list_account_roles(&self, access_token: &str, account_id: &str) -> Result<Vec<String>> {
        self.check(access_token)?;
        Ok(self.roles.get(account_id).cloned().unwrap_or_default())
    }

    async fn get_role_credentials(
        &self,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<RoleCredentials> {
        self.check(access_token)?;
        let n = self.credential_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(RoleCredentials {
            access_key_id: format!("ASIA{}{}", account_id, n),
            secret_access_key: format!("secret-{}-{}", role_name, n),
            session_token: format!("session-{}", n),
            expiration: None,
        })
    }

    async fn max_session_duration(&self, _credentials: &RoleCredentials, role_name: &str) -> Result<Duration> {
        self.max_session
            .ok_or_else(|| AwscError::Provider(format!("no IAM role found for permission set {}", role_name)))
    }
}

pub struct FakeBackend {
    pub oidc: Arc<FakeOidc>,
    pub portal: Arc<FakePortal>,
}

#[async_trait]
impl AwsBackend for FakeBackend {
    async fn oidc(&self, _sso_region: &str) -> Arc<dyn OidcProvider> {
        self.oidc.clone()
    }

    async fn portal(&self, _sso_region: &str) -> Arc<dyn SsoPortal> {
        self.portal.clone()
    }
}

/// Answers picks from a queue; an empty queue quits.
#[derive(Default)]
pub struct QueuePicker {
    answers: Mutex<VecDeque<Option<usize>>>,
    pub titles: Mutex<Vec<String>>,
}

impl QueuePicker {
    pub fn answering(answers: &[Option<usize>]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            titles: Mutex::new(Vec::new()),
        }
    }

    pub fn titles(&self) -> Vec<String> {
        self.titles.lock().unwrap().clone()
    }
}

impl Picker for QueuePicker {
    fn pick(&self, title: &str, _items: &[String]) -> Result<Option<usize>> {
        self.titles.lock().unwrap().push(title.to_string());
        Ok(self.answers.lock().unwrap().pop_front().flatten())
    }
}

/// Temporary home directory with `~/.awsc` and `~/.aws`.
pub struct TestHome {
    pub dir: tempfile::TempDir,
    pub clock: Arc<TestClock>,
}

impl TestHome {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            clock: Arc::new(TestClock::new()),
        }
    }

    pub fn paths(&self) -> AwscPaths {
        AwscPaths::new(self.dir.path().join(".awsc"), self.dir.path().join(".aws"))
    }

    /// Configured context whose session sweep treats `alive` as running.
    pub fn context(&self, alive: &[u32]) -> AppContext {
        AppContext::new(
            self.paths(),
            AwscSettings::new(START_URL, SSO_REGION, "eu-west-1"),
        )
        .with_clock(self.clock.clone())
        .with_process_probe(Arc::new(StaticProcessProbe::new(alive.iter().copied())))
    }
}
