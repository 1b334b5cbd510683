//! # Per-terminal session registry
//!
//! Each shell keeps its own selected account and role without colliding with
//! other terminals. The key is the parent process id of the `awsc` process,
//! which is the invoking shell and therefore stable for as long as the shell
//! lives and distinct per terminal.
//!
//! Sessions never expire by time. A session file is removed only by
//! [`SessionRegistry::sweep`], once the process it is keyed by has exited.
//! Two commands racing in the same shell are not serialized: the last writer
//! wins.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::app::disk_store::DiskStore;
use crate::app::error::{AwscError, Result};

const SESSION_FILE_PREFIX: &str = "session-";
const SESSION_FILE_SUFFIX: &str = ".json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub profile_name: String,
    pub account_id: String,
    pub account_name: String,
    pub role_name: String,
}

/// Answers whether a process id still names a running process.
pub trait ProcessProbe: Send + Sync + fmt::Debug {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Liveness via signal 0: permission and existence are checked, nothing is delivered.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessProbe;

impl ProcessProbe for OsProcessProbe {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            // Owned by another user but running
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    #[cfg(not(unix))]
    fn is_alive(&self, _pid: u32) -> bool {
        true
    }
}

/// Fixed set of live pids, for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct StaticProcessProbe {
    alive: HashSet<u32>,
}

impl StaticProcessProbe {
    pub fn new(alive: impl IntoIterator<Item = u32>) -> Self {
        Self {
            alive: alive.into_iter().collect(),
        }
    }
}

impl ProcessProbe for StaticProcessProbe {
    fn is_alive(&self, pid: u32) -> bool {
        self.alive.contains(&pid)
    }
}

/// Parent process id of the running command.
pub fn current_ppid() -> u32 {
    #[cfg(unix)]
    {
        std::os::unix::process::parent_id()
    }
    #[cfg(not(unix))]
    {
        std::process::id()
    }
}

#[derive(Debug, Clone)]
pub struct SessionRegistry {
    store: DiskStore,
    probe: Arc<dyn ProcessProbe>,
}

impl SessionRegistry {
    pub fn new(store: DiskStore) -> Self {
        Self::with_probe(store, Arc::new(OsProcessProbe))
    }

    pub fn with_probe(store: DiskStore, probe: Arc<dyn ProcessProbe>) -> Self {
        Self { store, probe }
    }

    pub fn session_key(ppid: u32) -> String {
        format!("{}{}{}", SESSION_FILE_PREFIX, ppid, SESSION_FILE_SUFFIX)
    }

    fn ppid_from_key(name: &str) -> Option<u32> {
        name.strip_prefix(SESSION_FILE_PREFIX)?
            .strip_suffix(SESSION_FILE_SUFFIX)?
            .parse()
            .ok()
    }

    pub fn save(
        &self,
        ppid: u32,
        profile_name: &str,
        account_id: &str,
        account_name: &str,
        role_name: &str,
    ) -> Result<SessionInfo> {
        let session = SessionInfo {
            profile_name: profile_name.to_string(),
            account_id: account_id.to_string(),
            account_name: account_name.to_string(),
            role_name: role_name.to_string(),
        };
        self.store.write_json(&Self::session_key(ppid), &session)?;
        info!(
            "Saved session for terminal {}: {} ({}) as {}",
            ppid, account_name, account_id, role_name
        );
        Ok(session)
    }

    /// Session for `ppid`. Absent and unreadable files are both `NoActiveSession`.
    pub fn get(&self, ppid: u32) -> Result<SessionInfo> {
        match self.store.read_json::<SessionInfo>(&Self::session_key(ppid)) {
            Ok(Some(session)) => Ok(session),
            Ok(None) => Err(AwscError::NoActiveSession),
            Err(e) => {
                debug!("Ignoring unreadable session for {}: {}", ppid, e);
                Err(AwscError::NoActiveSession)
            }
        }
    }

    /// Session for the shell that invoked this process.
    pub fn current(&self) -> Result<SessionInfo> {
        self.get(current_ppid())
    }

    /// Remove sessions whose process has exited. Never fails; returns the count removed.
    pub fn sweep(&self) -> usize {
        let names = match self.store.list_files() {
            Ok(names) => names,
            Err(e) => {
                debug!("Session sweep skipped: {}", e);
                return 0;
            }
        };

        let mut removed = 0;
        for name in names {
            let Some(ppid) = Self::ppid_from_key(&name) else {
                continue;
            };
            if self.probe.is_alive(ppid) {
                continue;
            }
            match self.store.remove(&name) {
                Ok(true) => {
                    debug!("Removed stale session for terminal {}", ppid);
                    removed += 1;
                }
                Ok(false) => {}
                Err(e) => warn!("Failed to remove stale session {}: {}", name, e),
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn registry(dir: &tempfile::TempDir, alive: &[u32]) -> SessionRegistry {
        SessionRegistry::with_probe(
            DiskStore::new(dir.path().join("sessions")),
            Arc::new(StaticProcessProbe::new(alive.iter().copied())),
        )
    }

    #[test]
    fn sessions_are_isolated_per_ppid() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir, &[]);

        registry
            .save(100, "awsc-Prod", "111111111111", "Prod", "Admin")
            .unwrap();

        let session = registry.get(100).unwrap();
        assert_eq!(session.profile_name, "awsc-Prod");
        assert_eq!(session.account_id, "111111111111");
        assert_eq!(session.role_name, "Admin");
        assert!(matches!(registry.get(200), Err(AwscError::NoActiveSession)));
    }

    #[test]
    fn save_replaces_existing_session() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir, &[]);
        registry.save(7, "awsc-Prod", "111111111111", "Prod", "Admin").unwrap();
        registry.save(7, "awsc-Dev", "222222222222", "Dev", "ReadOnly").unwrap();

        assert_eq!(registry.get(7).unwrap().account_name, "Dev");
    }

    #[test]
    fn unreadable_session_is_no_active_session() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir, &[]);
        std::fs::create_dir_all(dir.path().join("sessions")).unwrap();
        std::fs::write(dir.path().join("sessions").join("session-9.json"), "garbage").unwrap();

        assert!(matches!(registry.get(9), Err(AwscError::NoActiveSession)));
    }

    #[test]
    fn file_layout_uses_snake_case_fields() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir, &[]);
        registry.save(42, "awsc-Prod", "111111111111", "Prod", "Admin").unwrap();

        let raw = std::fs::read_to_string(dir.path().join("sessions").join("session-42.json")).unwrap();
        assert!(raw.contains("\"profile_name\""));
        assert!(raw.contains("\"account_name\""));
    }

    #[test]
    fn sweep_removes_only_dead_processes() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(&dir, &[100]);
        registry.save(100, "awsc-Prod", "111111111111", "Prod", "Admin").unwrap();
        registry.save(200, "awsc-Dev", "222222222222", "Dev", "Admin").unwrap();
        std::fs::write(dir.path().join("sessions").join("notes.txt"), "keep").unwrap();

        assert_eq!(registry.sweep(), 1);
        assert!(registry.get(100).is_ok());
        assert!(registry.get(200).is_err());
        assert!(dir.path().join("sessions").join("notes.txt").exists());
    }

    #[test]
    fn sweep_of_missing_directory_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(registry(&dir, &[]).sweep(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn os_probe_sees_own_process() {
        assert!(OsProcessProbe.is_alive(std::process::id()));
    }
}
