//! On-disk registry of live supervisor sessions.
//!
//! One JSON record per camp under `<campers-dir>/sessions/`, written
//! atomically (sibling temp file, fsync, rename) so readers never observe a
//! torn record. Records whose pid is gone are stale and self-purge on read.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SessionError;

/// Coordinates another tool needs to reach a live supervisor's instance.
/// All fields are required; a record missing any of them is corrupt and
/// treated as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub camp_name: String,
    pub pid: i32,
    pub instance_id: String,
    pub region: String,
    pub ssh_host: String,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub key_file: String,
}

#[derive(Clone)]
pub struct SessionRegistry {
    dir: PathBuf,
}

impl SessionRegistry {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Registry rooted at the standard campers state directory.
    pub fn default_location() -> Self {
        Self::new(campers_domain::paths::sessions_dir())
    }

    fn record_path(&self, camp_name: &str) -> PathBuf {
        self.dir.join(format!("{}.session.json", camp_name))
    }

    /// Atomic write: serialize to a sibling temp file, fsync, rename over
    /// the destination.
    pub fn create(&self, record: &SessionRecord) -> Result<(), SessionError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| SessionError::Io {
            path: self.dir.display().to_string(),
            source: e,
        })?;

        let path = self.record_path(&record.camp_name);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;

        let io_err = |p: &Path| {
            let p = p.display().to_string();
            move |e: std::io::Error| SessionError::Io { path: p.clone(), source: e }
        };

        let mut file = File::create(&tmp).map_err(io_err(&tmp))?;
        file.write_all(json.as_bytes()).map_err(io_err(&tmp))?;
        file.sync_all().map_err(io_err(&tmp))?;
        std::fs::rename(&tmp, &path).map_err(io_err(&path))?;

        debug!(camp = record.camp_name, path = %path.display(), "session record written");
        Ok(())
    }

    /// Read a record, tolerating absence and corruption: a missing file,
    /// malformed JSON, or missing fields all read as `None` (the malformed
    /// cases with a warning).
    pub fn read(&self, camp_name: &str) -> Option<SessionRecord> {
        let path = self.record_path(camp_name);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed session record, treating as absent");
                None
            }
        }
    }

    /// Idempotent delete; a racing unlink that already removed the file is
    /// success.
    pub fn delete(&self, camp_name: &str) -> Result<(), SessionError> {
        let path = self.record_path(camp_name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::Io { path: path.display().to_string(), source: e }),
        }
    }

    /// Is the recorded supervisor process still running? Dead records are
    /// deleted here, so a crashed run heals on the next probe.
    pub fn is_alive(&self, camp_name: &str) -> bool {
        let Some(record) = self.read(camp_name) else {
            return false;
        };
        if pid_alive(record.pid) {
            true
        } else {
            debug!(camp = camp_name, pid = record.pid, "stale session record, deleting");
            let _ = self.delete(camp_name);
            false
        }
    }

    /// The record, but only when its supervisor process is alive.
    pub fn get_alive(&self, camp_name: &str) -> Option<SessionRecord> {
        if self.is_alive(camp_name) {
            self.read(camp_name)
        } else {
            None
        }
    }
}

/// Null-signal probe. A pid owned by another uid answers EPERM — that still
/// means alive; only ESRCH means the process is gone.
fn pid_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(Errno::ESRCH) => false,
        Err(e) => {
            warn!(pid, error = %e, "unexpected error probing pid; assuming dead");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(camp: &str, pid: i32) -> SessionRecord {
        SessionRecord {
            camp_name: camp.to_string(),
            pid,
            instance_id: "i-0abc123def4567890".into(),
            region: "us-east-1".into(),
            ssh_host: "54.1.2.3".into(),
            ssh_port: 22,
            ssh_user: "ubuntu".into(),
            key_file: "/home/u/.campers/keys/1750000000.pem".into(),
        }
    }

    fn own_pid() -> i32 {
        std::process::id() as i32
    }

    // Far above any real pid_max, so the null signal reports ESRCH.
    const DEAD_PID: i32 = 999_999_999;

    #[test]
    fn create_then_read_round_trips_exactly() {
        let dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new(dir.path().to_path_buf());
        let rec = record("jupyter", own_pid());

        registry.create(&rec).unwrap();
        assert_eq!(registry.read("jupyter"), Some(rec));
    }

    #[test]
    fn read_missing_and_malformed_are_absent() {
        let dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new(dir.path().to_path_buf());
        assert_eq!(registry.read("ghost"), None);

        std::fs::write(dir.path().join("broken.session.json"), "{not json").unwrap();
        assert_eq!(registry.read("broken"), None);

        // Missing required fields is the same as malformed.
        std::fs::write(
            dir.path().join("partial.session.json"),
            r#"{"camp_name": "partial", "pid": 1}"#,
        )
        .unwrap();
        assert_eq!(registry.read("partial"), None);
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new(dir.path().to_path_buf());
        registry.create(&record("jupyter", own_pid())).unwrap();

        registry.delete("jupyter").unwrap();
        registry.delete("jupyter").unwrap();
        assert_eq!(registry.read("jupyter"), None);
    }

    #[test]
    fn live_pid_reads_as_alive() {
        let dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new(dir.path().to_path_buf());
        registry.create(&record("live", own_pid())).unwrap();

        assert!(registry.is_alive("live"));
        assert!(registry.get_alive("live").is_some());
    }

    #[test]
    fn dead_pid_purges_the_record() {
        let dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new(dir.path().to_path_buf());
        registry.create(&record("stale", DEAD_PID)).unwrap();

        assert!(!registry.is_alive("stale"));
        assert_eq!(registry.get_alive("stale"), None);
        // Self-healed: the file is gone from disk.
        assert!(!dir.path().join("stale.session.json").exists());
    }

    #[test]
    fn no_temp_file_left_behind_after_create() {
        let dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new(dir.path().to_path_buf());
        registry.create(&record("jupyter", own_pid())).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }
}
