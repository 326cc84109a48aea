//! Process-level wrapper over the Mutagen bidirectional file-sync daemon.
//!
//! campers never speaks the sync protocol itself; it drives the `mutagen`
//! binary (`version`, `sync create`, `sync list`, `sync terminate`) and
//! forces the daemon onto the supervisor's SSH key via
//! `MUTAGEN_SSH_COMMAND`.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::SyncError;

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const SHORT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_INITIAL_WAIT: Duration = Duration::from_secs(300);

const INSTALL_HINT: &str = "Mutagen is not installed locally.\n\
     Please install Mutagen to use campers file synchronization.\n\
     Visit: https://github.com/mutagen-io/mutagen";

/// Deterministic session name for one sync path of one supervisor
/// invocation; orphan cleanup after a crash relies on the determinism.
pub fn session_name(unique_id: &str, index: usize) -> String {
    if index == 0 {
        format!("campers-{}", unique_id)
    } else {
        format!("campers-{}-{}", unique_id, index)
    }
}

/// Everything `sync create` needs for one session.
#[derive(Debug, Clone)]
pub struct SyncSessionSpec {
    pub session_name: String,
    pub local_path: String,
    pub remote_path: String,
    pub host: String,
    pub key_file: String,
    pub username: String,
    pub ignore_patterns: Vec<String>,
    pub include_vcs: bool,
}

#[derive(Debug, Default)]
pub struct MutagenSync;

impl MutagenSync {
    pub fn new() -> Self {
        Self
    }

    /// Probe the daemon binary. `CAMPERS_MUTAGEN_NOT_INSTALLED=1` forces the
    /// absent branch for subprocess-level tests.
    pub async fn require_installed(&self) -> Result<(), SyncError> {
        if std::env::var("CAMPERS_MUTAGEN_NOT_INSTALLED").as_deref() == Ok("1") {
            return Err(SyncError::NotInstalled(INSTALL_HINT.into()));
        }

        match run_mutagen(&["version"], &[], SHORT_TIMEOUT).await {
            Ok(output) if output.code == 0 => Ok(()),
            Ok(_) => Err(SyncError::NotInstalled(
                "Mutagen is installed but returned an error. \
                 Please check your Mutagen installation.\n\
                 Visit: https://github.com/mutagen-io/mutagen"
                    .into(),
            )),
            Err(_) => Err(SyncError::NotInstalled(INSTALL_HINT.into())),
        }
    }

    /// Terminate any session left behind by a crashed previous run. Silent
    /// on "not found"; never fatal.
    pub async fn cleanup_orphan(&self, session_name: &str) {
        match run_mutagen(&["sync", "list", session_name], &[], SHORT_TIMEOUT).await {
            Ok(output) if output.code == 0 => {
                debug!(session_name, "terminating orphaned sync session");
                if let Err(e) =
                    run_mutagen(&["sync", "terminate", session_name], &[], PROBE_TIMEOUT).await
                {
                    warn!(session_name, error = %e, "failed to clean up orphaned session");
                }
            }
            Ok(_) => {} // no such session
            Err(e) => warn!(session_name, error = %e, "failed to clean up orphaned session"),
        }
    }

    /// Create a two-way-resolved session between `local_path` and
    /// `username@host:remote_path`, pinned to the supervisor's SSH key with
    /// first-contact host-key acceptance.
    pub async fn create(&self, spec: &SyncSessionSpec) -> Result<(), SyncError> {
        validate_username(&spec.username)?;
        validate_host(&spec.host)?;

        let local = expand_home(&spec.local_path);
        let remote = format!("{}@{}:{}", spec.username, spec.host, spec.remote_path);

        let mut args: Vec<String> = vec![
            "sync".into(),
            "create".into(),
            "--name".into(),
            spec.session_name.clone(),
            "--sync-mode".into(),
            "two-way-resolved".into(),
        ];
        for pattern in &spec.ignore_patterns {
            args.push("--ignore".into());
            args.push(pattern.clone());
        }
        if !spec.include_vcs {
            for vcs in [".git", ".gitignore", ".svn"] {
                args.push("--ignore".into());
                args.push(vcs.into());
            }
        }
        args.push(local);
        args.push(remote);

        let key_path = expand_home(&spec.key_file);
        let ssh_command = format!(
            "ssh -i '{}' -o StrictHostKeyChecking=accept-new",
            key_path.replace('\'', r"'\''")
        );
        let env = [("MUTAGEN_SSH_COMMAND", ssh_command.as_str())];

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = run_mutagen(&arg_refs, &env, Duration::from_secs(120)).await?;
        if output.code != 0 {
            return Err(SyncError::Create(output.stderr.trim().to_string()));
        }

        info!(session = spec.session_name, "sync session created");
        Ok(())
    }

    /// Poll the daemon's status list until the session reports it is
    /// watching for changes (the initial full-tree scan has completed) or
    /// the timeout expires. A failed status probe is fatal to the wait.
    ///
    /// On timeout the session is left running; whether to keep or terminate
    /// it is the caller's cleanup-policy decision.
    pub async fn wait_for_initial(
        &self,
        session_name: &str,
        timeout: Duration,
    ) -> Result<(), SyncError> {
        let timeout = env_timeout_override().unwrap_or(timeout);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let output =
                run_mutagen(&["sync", "list", session_name], &[], PROBE_TIMEOUT).await?;
            if output.code != 0 {
                return Err(SyncError::StatusProbe(output.stderr.trim().to_string()));
            }
            if output.stdout.to_lowercase().contains("watching") {
                info!(session = session_name, "initial sync complete");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SyncError::Timeout { seconds: timeout.as_secs() });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Idempotent, error-tolerant terminate.
    pub async fn terminate(&self, session_name: &str) {
        match run_mutagen(&["sync", "terminate", session_name], &[], PROBE_TIMEOUT).await {
            Ok(output) if output.code == 0 => {
                info!(session = session_name, "sync session terminated")
            }
            Ok(output) => {
                debug!(session = session_name, stderr = output.stderr.trim(), "sync terminate non-zero")
            }
            Err(e) => warn!(session = session_name, error = %e, "failed to terminate sync session"),
        }
    }
}

struct MutagenOutput {
    code: i32,
    stdout: String,
    stderr: String,
}

async fn run_mutagen(
    args: &[&str],
    env: &[(&str, &str)],
    timeout: Duration,
) -> Result<MutagenOutput, SyncError> {
    let mut cmd = Command::new("mutagen");
    cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
    for (k, v) in env {
        cmd.env(k, v);
    }

    let result = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| SyncError::StatusProbe(format!(
            "mutagen {} timed out after {}s",
            args.first().copied().unwrap_or(""),
            timeout.as_secs()
        )))?
        .map_err(|e| SyncError::Spawn { source: e })?;

    Ok(MutagenOutput {
        code: result.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&result.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
    })
}

fn env_timeout_override() -> Option<Duration> {
    std::env::var("CAMPERS_SYNC_TIMEOUT")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn validate_username(username: &str) -> Result<(), SyncError> {
    let ok = !username.is_empty()
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(SyncError::Validation(format!("invalid SSH username: {}", username)))
    }
}

fn validate_host(host: &str) -> Result<(), SyncError> {
    let ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(SyncError::Validation(format!("invalid host: {}", host)))
    }
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{}/{}", home.trim_end_matches('/'), rest);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_names_are_deterministic_per_path() {
        assert_eq!(session_name("1750000000", 0), "campers-1750000000");
        assert_eq!(session_name("1750000000", 1), "campers-1750000000-1");
    }

    #[test]
    fn username_validation_refuses_injection() {
        assert!(validate_username("ubuntu").is_ok());
        assert!(validate_username("deploy-user.2").is_ok());
        assert!(validate_username("user name").is_err());
        assert!(validate_username("user;rm -rf /").is_err());
        assert!(validate_username("").is_err());
    }

    #[test]
    fn host_validation_refuses_injection() {
        assert!(validate_host("203.0.113.10").is_ok());
        assert!(validate_host("ec2-host.amazonaws.com").is_ok());
        assert!(validate_host("host$(reboot)").is_err());
        assert!(validate_host("host with space").is_err());
    }

    #[test]
    fn home_expansion_only_touches_tilde_prefix() {
        std::env::set_var("HOME", "/home/dev");
        assert_eq!(expand_home("~/proj"), "/home/dev/proj");
        assert_eq!(expand_home("/abs/path"), "/abs/path");
        assert_eq!(expand_home("rel/path"), "rel/path");
    }

    #[tokio::test]
    async fn forced_not_installed_branch() {
        std::env::set_var("CAMPERS_MUTAGEN_NOT_INSTALLED", "1");
        let sync = MutagenSync::new();
        let err = sync.require_installed().await.unwrap_err();
        assert!(matches!(err, SyncError::NotInstalled(_)));
        std::env::remove_var("CAMPERS_MUTAGEN_NOT_INSTALLED");
    }
}
