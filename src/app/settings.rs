//! # Tool configuration
//!
//! `~/.awsc/config.yaml` names the Identity Center instance and the default
//! region for AWS calls:
//!
//! ```yaml
//! sso:
//!   start_url: https://acme.awsapps.com/start
//!   region: us-east-1
//! default_region: eu-west-1
//! ```
//!
//! [`AwscPaths`] collects every on-disk location the tool uses so tests can
//! point the whole crate at a temporary directory.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::app::disk_store::write_private_file;
use crate::app::error::{AwscError, Result};

/// Profile override; when set it is used instead of the terminal's session.
pub const PROFILE_ENV: &str = "AWSC_PROFILE";

/// Region override for AWS calls.
pub const REGION_ENV: &str = "AWSC_REGION";

pub const CONFIG_FILE_NAME: &str = "config.yaml";

pub const AWS_REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "af-south-1",
    "ap-east-1",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ca-central-1",
    "ca-west-1",
    "eu-central-1",
    "eu-central-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-north-1",
    "eu-south-1",
    "eu-south-2",
    "il-central-1",
    "me-central-1",
    "me-south-1",
    "sa-east-1",
];

static START_URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://[a-zA-Z0-9-]+\.awsapps\.com/start/?$").expect("start URL pattern compiles"));

pub fn is_valid_start_url(url: &str) -> bool {
    START_URL_PATTERN.is_match(url)
}

pub fn is_valid_region(region: &str) -> bool {
    AWS_REGIONS.contains(&region)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsoSettings {
    #[serde(default)]
    pub start_url: String,
    #[serde(default)]
    pub region: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwscSettings {
    #[serde(default)]
    pub sso: SsoSettings,
    #[serde(default)]
    pub default_region: String,
}

impl AwscSettings {
    pub fn new(start_url: &str, sso_region: &str, default_region: &str) -> Self {
        Self {
            sso: SsoSettings {
                start_url: start_url.to_string(),
                region: sso_region.to_string(),
            },
            default_region: default_region.to_string(),
        }
    }

    /// Load settings from `path`. A missing file is `Ok(None)`.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No configuration at {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(AwscError::io(path, e)),
        };

        let settings: Self = serde_yaml::from_str(&contents).map_err(|e| AwscError::serialization(path, e))?;
        debug!(
            "Loaded configuration: start_url={}, sso_region={}, default_region={}",
            settings.sso.start_url, settings.sso.region, settings.default_region
        );
        Ok(Some(settings))
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).map_err(|e| AwscError::serialization(path, e))?;
        write_private_file(path, yaml.as_bytes())?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        !self.sso.start_url.is_empty()
    }

    /// The SSO section, or `NoConfiguration` when no start URL is set.
    pub fn require_sso(&self) -> Result<&SsoSettings> {
        if self.is_configured() {
            Ok(&self.sso)
        } else {
            Err(AwscError::NoConfiguration)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !is_valid_start_url(&self.sso.start_url) {
            return Err(AwscError::InvalidConfiguration(format!(
                "invalid SSO start URL '{}', expected https://your-org.awsapps.com/start",
                self.sso.start_url
            )));
        }
        if !is_valid_region(&self.sso.region) {
            return Err(AwscError::InvalidConfiguration(format!(
                "invalid SSO region '{}'",
                self.sso.region
            )));
        }
        if !self.default_region.is_empty() && !is_valid_region(&self.default_region) {
            return Err(AwscError::InvalidConfiguration(format!(
                "invalid default region '{}'",
                self.default_region
            )));
        }
        Ok(())
    }

    /// Organization part of the start URL.
    ///
    /// - "https://acme.awsapps.com/start" -> "acme"
    /// - "d-1234567890" -> "d-1234567890"
    pub fn short_name(&self) -> String {
        let url = &self.sso.start_url;
        let host = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .unwrap_or(url);
        match host.find('.') {
            Some(dot) => host[..dot].to_string(),
            None => host.to_string(),
        }
    }
}

/// Every file and directory the tool reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwscPaths {
    /// `~/.awsc`: configuration, sessions, account names.
    pub config_root: PathBuf,
    /// `~/.aws`: shared config file and the SSO caches.
    pub aws_dir: PathBuf,
    pub config_file: PathBuf,
}

impl AwscPaths {
    pub fn new(config_root: impl Into<PathBuf>, aws_dir: impl Into<PathBuf>) -> Self {
        let config_root = config_root.into();
        Self {
            config_file: config_root.join(CONFIG_FILE_NAME),
            config_root,
            aws_dir: aws_dir.into(),
        }
    }

    /// Paths under the current user's home directory.
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            AwscError::InvalidConfiguration("failed to determine home directory".to_string())
        })?;
        Ok(Self::new(home.join(".awsc"), home.join(".aws")))
    }

    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = path.into();
        self
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.config_root.join("sessions")
    }

    /// SSO tokens and role credentials, shared with the AWS CLI cache directory.
    pub fn sso_cache_dir(&self) -> PathBuf {
        self.aws_dir.join("sso").join("cache")
    }

    pub fn shared_config_file(&self) -> PathBuf {
        self.aws_dir.join("config")
    }
}

fn prompt_line<R: BufRead, W: Write>(input: &mut R, output: &mut W, prompt: &str) -> Result<String> {
    write!(output, "{}", prompt).map_err(|e| AwscError::io("<stdout>", e))?;
    output.flush().map_err(|e| AwscError::io("<stdout>", e))?;

    let mut line = String::new();
    let read = input.read_line(&mut line).map_err(|e| AwscError::io("<stdin>", e))?;
    if read == 0 {
        return Err(AwscError::InvalidConfiguration("input closed before configuration was complete".to_string()));
    }
    Ok(line.trim().to_string())
}

fn prompt_until_valid<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    prompt: &str,
    is_valid: impl Fn(&str) -> bool,
    hint: &str,
) -> Result<String> {
    loop {
        let value = prompt_line(input, output, prompt)?;
        if is_valid(&value) {
            return Ok(value);
        }
        writeln!(output, "{}", hint).map_err(|e| AwscError::io("<stdout>", e))?;
    }
}

/// Ask for the three settings, re-asking until each one is valid.
pub fn prompt_settings<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<AwscSettings> {
    let region_hint = "Invalid AWS region. Please enter a valid region like us-east-1, us-west-2, etc.";
    let start_url = prompt_until_valid(
        input,
        output,
        "SSO Start URL: ",
        is_valid_start_url,
        "Invalid SSO URL format. Expected: https://your-org.awsapps.com/start",
    )?;
    let sso_region = prompt_until_valid(input, output, "SSO Region (e.g., us-east-1): ", is_valid_region, region_hint)?;
    let default_region = prompt_until_valid(
        input,
        output,
        "Default AWS Region (e.g., us-east-1): ",
        is_valid_region,
        region_hint,
    )?;
    Ok(AwscSettings::new(&start_url, &sso_region, &default_region))
}

/// Read a yes/no answer; only `y` and `yes` (any case) count as yes.
pub fn confirm<R: BufRead, W: Write>(input: &mut R, output: &mut W, prompt: &str) -> Result<bool> {
    let answer = match prompt_line(input, output, prompt) {
        Ok(answer) => answer,
        Err(AwscError::InvalidConfiguration(_)) => return Ok(false),
        Err(e) => return Err(e),
    };
    let answer = answer.to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

/// Interactive `config init`. Returns the saved settings, or `None` when the
/// user declined to overwrite an existing file.
pub fn init_interactive<R: BufRead, W: Write>(
    paths: &AwscPaths,
    input: &mut R,
    output: &mut W,
) -> Result<Option<AwscSettings>> {
    if paths.config_file.exists() {
        writeln!(output, "Configuration file already exists at {}", paths.config_file.display())
            .map_err(|e| AwscError::io("<stdout>", e))?;
        if !confirm(input, output, "Do you want to overwrite it? (y/N): ")? {
            writeln!(output, "Configuration initialization cancelled.").map_err(|e| AwscError::io("<stdout>", e))?;
            return Ok(None);
        }
    }

    let settings = prompt_settings(input, output)?;
    settings.save_to_path(&paths.config_file)?;
    writeln!(output, "Configuration saved to {}", paths.config_file.display())
        .map_err(|e| AwscError::io("<stdout>", e))?;
    Ok(Some(settings))
}
