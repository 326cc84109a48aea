//! The resource ledger: what this supervisor has actually acquired.
//!
//! Invariant: a slot is filled only after the acquisition fully succeeded,
//! and stays filled until the cleanup coordinator consumes it. The write
//! happens before the next acquisition begins, so whatever cleanup observes
//! is exactly the prefix of resources that exist.

use std::path::PathBuf;
use std::sync::Arc;

use campers_domain::InstanceHandle;
use campers_ssh::{ForwardManager, SshConnection};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct Ledger {
    instance: Option<InstanceHandle>,
    key_file: Option<PathBuf>,
    security_group_id: Option<String>,
    ssh: Option<Arc<SshConnection>>,
    sync_sessions: Vec<String>,
    forwards: Option<Arc<ForwardManager>>,
    cleanup_in_progress: bool,
}

/// Everything the coordinator drains out of the ledger in one atomic take.
/// Absent slots are normal — partial initialization is the expected state
/// whenever cleanup runs early.
#[derive(Default)]
pub struct LedgerContents {
    pub instance: Option<InstanceHandle>,
    pub key_file: Option<PathBuf>,
    pub security_group_id: Option<String>,
    pub ssh: Option<Arc<SshConnection>>,
    pub sync_sessions: Vec<String>,
    pub forwards: Option<Arc<ForwardManager>>,
}

#[derive(Clone, Default)]
pub struct SharedLedger {
    inner: Arc<Mutex<Ledger>>,
}

impl SharedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_instance(&self, handle: InstanceHandle) {
        let mut ledger = self.inner.lock().await;
        ledger.key_file = handle.key_file.clone();
        ledger.security_group_id = handle.security_group_id.clone();
        ledger.instance = Some(handle);
        debug!("ledger: instance recorded");
    }

    pub async fn record_ssh(&self, conn: Arc<SshConnection>) {
        self.inner.lock().await.ssh = Some(conn);
        debug!("ledger: ssh connection recorded");
    }

    pub async fn record_sync_session(&self, name: String) {
        self.inner.lock().await.sync_sessions.push(name);
        debug!("ledger: sync session recorded");
    }

    pub async fn record_forwards(&self, forwards: Arc<ForwardManager>) {
        self.inner.lock().await.forwards = Some(forwards);
        debug!("ledger: port forwards recorded");
    }

    /// Instance id for the signal-escalation path. Read this *before*
    /// `begin_cleanup` drains the slots.
    pub async fn instance_id(&self) -> Option<String> {
        self.inner
            .lock()
            .await
            .instance
            .as_ref()
            .map(|h| h.instance_id.clone())
    }

    pub async fn instance(&self) -> Option<InstanceHandle> {
        self.inner.lock().await.instance.clone()
    }

    /// First entry into cleanup: set the in-progress flag and drain every
    /// slot. Returns `None` when cleanup is already running — the
    /// re-entrancy guard for a second signal or a completion/signal
    /// interleave.
    pub async fn begin_cleanup(&self) -> Option<LedgerContents> {
        let mut ledger = self.inner.lock().await;
        if ledger.cleanup_in_progress {
            return None;
        }
        ledger.cleanup_in_progress = true;
        Some(LedgerContents {
            instance: ledger.instance.take(),
            key_file: ledger.key_file.take(),
            security_group_id: ledger.security_group_id.take(),
            ssh: ledger.ssh.take(),
            sync_sessions: std::mem::take(&mut ledger.sync_sessions),
            forwards: ledger.forwards.take(),
        })
    }

    /// Clear the in-progress flag. Called only after a *normal* cleanup
    /// completes; signal-driven cleanup leaves the flag set so any further
    /// signal stays a no-op.
    pub async fn finish_cleanup(&self) {
        self.inner.lock().await.cleanup_in_progress = false;
    }

    pub async fn cleanup_in_progress(&self) -> bool {
        self.inner.lock().await.cleanup_in_progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campers_domain::InstanceState;

    fn handle() -> InstanceHandle {
        InstanceHandle {
            instance_id: "i-abc".into(),
            public_ip: Some("54.1.2.3".into()),
            private_ip: None,
            state: InstanceState::Running,
            instance_type: "t3.medium".into(),
            launch_time: None,
            unique_id: Some("1750000000".into()),
            key_file: Some(PathBuf::from("/keys/1750000000.pem")),
            security_group_id: Some("sg-123".into()),
        }
    }

    #[tokio::test]
    async fn begin_cleanup_drains_slots_once() {
        let ledger = SharedLedger::new();
        ledger.record_instance(handle()).await;
        ledger.record_sync_session("campers-1750000000".into()).await;

        let contents = ledger.begin_cleanup().await.expect("first entry wins");
        assert!(contents.instance.is_some());
        assert_eq!(contents.key_file, Some(PathBuf::from("/keys/1750000000.pem")));
        assert_eq!(contents.security_group_id.as_deref(), Some("sg-123"));
        assert_eq!(contents.sync_sessions, vec!["campers-1750000000"]);

        // Re-entrant call observes the flag and gets nothing.
        assert!(ledger.begin_cleanup().await.is_none());
    }

    #[tokio::test]
    async fn finish_cleanup_reopens_the_gate() {
        let ledger = SharedLedger::new();
        assert!(ledger.begin_cleanup().await.is_some());
        assert!(ledger.begin_cleanup().await.is_none());

        ledger.finish_cleanup().await;
        let contents = ledger.begin_cleanup().await.expect("flag cleared");
        assert!(contents.instance.is_none());
    }

    #[tokio::test]
    async fn instance_id_is_drained_with_the_slots() {
        let ledger = SharedLedger::new();
        ledger.record_instance(handle()).await;
        assert_eq!(ledger.instance_id().await.as_deref(), Some("i-abc"));
        let _ = ledger.begin_cleanup().await;
        assert_eq!(ledger.instance_id().await, None);
    }

    #[tokio::test]
    async fn empty_ledger_drains_to_empty_contents() {
        let ledger = SharedLedger::new();
        let contents = ledger.begin_cleanup().await.unwrap();
        assert!(contents.instance.is_none());
        assert!(contents.ssh.is_none());
        assert!(contents.forwards.is_none());
        assert!(contents.sync_sessions.is_empty());
    }
}
