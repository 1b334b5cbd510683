//! Named profiles in the shared AWS config file (`~/.aws/config`).
//!
//! `awsc` writes one `[profile awsc-<account>]` section per selected account,
//! holding the role's temporary credentials, so that every SDK client and the
//! AWS CLI can use it by name. Sections owned by other tools are preserved.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::app::disk_store::write_private_file;
use crate::app::error::{AwscError, Result};
use crate::app::sso_portal::RoleCredentials;

pub const PROFILE_PREFIX: &str = "awsc-";

/// Profile name for an account: `awsc-<name>`, with characters the shared
/// config parser rejects replaced by `-`.
pub fn profile_name_for(account_name: &str) -> String {
    let sanitized: String = account_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("{}{}", PROFILE_PREFIX, sanitized)
}

#[derive(Debug, Clone)]
pub struct AwsProfileFile {
    path: PathBuf,
}

impl AwsProfileFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(AwscError::io(&self.path, e)),
        }
    }

    /// Replace (or add) the profile for `account_name` and return its name.
    pub fn write_profile(
        &self,
        account_name: &str,
        account_id: &str,
        role_name: &str,
        credentials: &RoleCredentials,
    ) -> Result<String> {
        let profile_name = profile_name_for(account_name);
        let mut content = remove_profile_section(&self.read()?, &profile_name);
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }

        content.push_str(&format!(
            "[profile {profile}]\n\
             # Account: {name} ({id})\n\
             # Role: {role}\n\
             aws_access_key_id = {key}\n\
             aws_secret_access_key = {secret}\n\
             aws_session_token = {token}\n\n",
            profile = profile_name,
            name = account_name,
            id = account_id,
            role = role_name,
            key = credentials.access_key_id,
            secret = credentials.secret_access_key,
            token = credentials.session_token,
        ));

        write_private_file(&self.path, content.as_bytes())?;
        info!("Wrote profile {} to {}", profile_name, self.path.display());
        Ok(profile_name)
    }

    /// Remove `[profile name]`; returns whether it was present.
    pub fn remove_profile(&self, profile_name: &str) -> Result<bool> {
        let content = self.read()?;
        let updated = remove_profile_section(&content, profile_name);
        if updated == content {
            return Ok(false);
        }
        write_private_file(&self.path, updated.as_bytes())?;
        debug!("Removed profile {}", profile_name);
        Ok(true)
    }

    pub fn profile_exists(&self, profile_name: &str) -> Result<bool> {
        let header = section_header(profile_name);
        Ok(self.read()?.lines().any(|line| line.trim() == header))
    }
}

fn section_header(profile_name: &str) -> String {
    format!("[profile {}]", profile_name)
}

/// Drop the `[profile name]` section, up to the next section header.
pub fn remove_profile_section(content: &str, profile_name: &str) -> String {
    let header = section_header(profile_name);
    let mut kept = Vec::new();
    let mut in_target = false;

    for line in content.split('\n') {
        let trimmed = line.trim();
        if trimmed == header {
            in_target = true;
            continue;
        }
        if trimmed.starts_with('[') {
            in_target = false;
        }
        if !in_target {
            kept.push(line);
        }
    }
    kept.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn creds(tag: &str) -> RoleCredentials {
        RoleCredentials {
            access_key_id: format!("ASIA{}", tag),
            secret_access_key: format!("secret-{}", tag),
            session_token: format!("token-{}", tag),
            expiration: None,
        }
    }

    #[test]
    fn profile_names_are_prefixed_and_sanitized() {
        assert_eq!(profile_name_for("Prod"), "awsc-Prod");
        assert_eq!(profile_name_for("Shared Services"), "awsc-Shared-Services");
    }

    #[test]
    fn rewrite_replaces_only_the_target_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".aws").join("config");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "[default]\nregion = eu-west-1\n\n[profile work]\nregion = us-west-2\n",
        )
        .unwrap();
        let file = AwsProfileFile::new(&path);

        file.write_profile("Prod", "111111111111", "Admin", &creds("ONE")).unwrap();
        let name = file.write_profile("Prod", "111111111111", "Admin", &creds("TWO")).unwrap();
        assert_eq!(name, "awsc-Prod");

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("[profile awsc-Prod]").count(), 1);
        assert!(content.contains("aws_access_key_id = ASIATWO"));
        assert!(!content.contains("ASIAONE"));
        assert!(content.contains("# Account: Prod (111111111111)"));
        assert!(content.contains("[default]\nregion = eu-west-1"));
        assert!(content.contains("[profile work]\nregion = us-west-2"));
    }

    #[test]
    fn exists_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let file = AwsProfileFile::new(dir.path().join("config"));
        assert!(!file.profile_exists("awsc-Prod").unwrap());

        file.write_profile("Prod", "111111111111", "Admin", &creds("X")).unwrap();
        assert!(file.profile_exists("awsc-Prod").unwrap());

        assert!(file.remove_profile("awsc-Prod").unwrap());
        assert!(!file.profile_exists("awsc-Prod").unwrap());
        assert!(!file.remove_profile("awsc-Prod").unwrap());
    }

    #[test]
    fn section_removal_stops_at_next_header() {
        let content = "[profile awsc-Prod]\nregion = x\n[profile other]\nregion = y\n";
        assert_eq!(
            remove_profile_section(content, "awsc-Prod"),
            "[profile other]\nregion = y\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn config_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        AwsProfileFile::new(&path)
            .write_profile("Prod", "111111111111", "Admin", &creds("X"))
            .unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
