//! The run pipeline: config → provision → record → connect → sync →
//! forward → command → ordered cleanup.
//!
//! One coordinator task drives the steps serially; stream readers and the
//! UI drain run as background tasks. Every acquisition lands in the ledger
//! before the next begins, so the cleanup coordinator always sees exactly
//! the prefix of resources that exist — whether it is entered by normal
//! completion, by a pipeline error, or by a signal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use campers_domain::{
    validate_region_format, ExitPolicy, InstanceHandle, MachineConfig, TunnelSpec,
};
use campers_provider::{Compute, PricingService};
use campers_session::{SessionRecord, SessionRegistry};
use campers_ssh::{ForwardManager, SshConnection, SshTarget, DEFAULT_EXEC_TIMEOUT};
use campers_sync::{session_name, MutagenSync, SyncSessionSpec, DEFAULT_INITIAL_WAIT};
use tracing::{error, info, warn};

use crate::cleanup::CleanupCoordinator;
use crate::error::SupervisorError;
use crate::events::{EventBus, UiEvent};
use crate::ledger::SharedLedger;
use crate::signal::{install_handlers, signal_exit_code, SignalAction, SignalState};

fn env_flag(name: &str) -> bool {
    std::env::var(name).as_deref() == Ok("1")
}

pub struct Supervisor {
    compute: Arc<dyn Compute>,
    pricing: Arc<PricingService>,
    sync: MutagenSync,
    registry: SessionRegistry,
    events: Arc<EventBus>,
    ledger: SharedLedger,
}

impl Supervisor {
    pub fn new(
        compute: Arc<dyn Compute>,
        pricing: Arc<PricingService>,
        registry: SessionRegistry,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            compute,
            pricing,
            sync: MutagenSync::new(),
            registry,
            events,
            ledger: SharedLedger::new(),
        }
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Drive one full session. Returns the process exit code: the remote
    /// command's status on success, 1 on a fatal pipeline error, 128+signal
    /// when a signal initiated cleanup.
    pub async fn run(&self, config: &MachineConfig) -> i32 {
        // Pre-flight: closed-set checks before any cloud call.
        if let Err(e) = config.validate() {
            error!("invalid configuration: {}", e);
            return 1;
        }
        if let Err(e) = validate_region_format(&config.region) {
            error!("{}", e);
            return 1;
        }

        // Handlers go in before the first resource is acquired.
        let mut sig_rx = install_handlers();
        let mut sig_state = SignalState::new();

        let coordinator = CleanupCoordinator::new(
            self.compute.clone(),
            self.pricing.clone(),
            self.registry.clone(),
            self.events.clone(),
        );

        let acquire = self.acquire(config);
        tokio::pin!(acquire);

        let outcome: Result<i32, SupervisorError> = tokio::select! {
            result = &mut acquire => result,
            sig = sig_rx.recv() => {
                let signum = sig.unwrap_or(nix::libc::SIGINT);
                Err(SupervisorError::Interrupted { signal: signum })
            }
        };

        match outcome {
            Ok(code) => {
                coordinator
                    .run(&self.ledger, config.on_exit, &config.camp_name, false)
                    .await;
                code
            }
            Err(SupervisorError::Interrupted { signal }) => {
                sig_state.register(Instant::now());
                let escalation_id = self.ledger.instance_id().await;

                if env_flag("CAMPERS_FORCE_SIGNAL_EXIT") {
                    self.escalate(escalation_id.clone(), signal).await;
                }

                // Signals keep arriving while cleanup runs; the state machine
                // decides no-op vs escalation.
                let cleanup = coordinator.run(
                    &self.ledger,
                    ExitPolicy::Stop,
                    &config.camp_name,
                    true,
                );
                tokio::pin!(cleanup);
                loop {
                    tokio::select! {
                        _ = &mut cleanup => break,
                        sig2 = sig_rx.recv() => {
                            match sig_state.register(Instant::now()) {
                                SignalAction::Ignore => {
                                    info!("Cleanup already in progress, ignoring signal");
                                }
                                SignalAction::Escalate => {
                                    let signum = sig2.unwrap_or(signal);
                                    self.escalate(escalation_id.clone(), signum).await;
                                }
                                SignalAction::StartCleanup => unreachable!("first signal consumed"),
                            }
                        }
                    }
                }
                signal_exit_code(signal)
            }
            Err(e) => {
                error!("{}", e);
                eprintln!("Error: {}", e);
                if let Some(hint) = e.hint() {
                    eprintln!("  Hint: {}", hint);
                }
                coordinator
                    .run(&self.ledger, ExitPolicy::Stop, &config.camp_name, false)
                    .await;
                1
            }
        }
    }

    /// Skip the remaining ordered release: best-effort terminate, then exit.
    async fn escalate(&self, instance_id: Option<String>, signum: i32) {
        warn!("escalating to immediate exit");
        if let Some(id) = instance_id {
            let _ = tokio::time::timeout(
                Duration::from_secs(30),
                self.compute.terminate_instance(&id),
            )
            .await;
        }
        std::process::exit(signal_exit_code(signum));
    }

    /// Steps 4–10 of the pipeline. Every early return unwinds through the
    /// caller's cleanup; `Ok(code)` is the session's exit status.
    async fn acquire(&self, config: &MachineConfig) -> Result<i32, SupervisorError> {
        let test_mode = env_flag("CAMPERS_TEST_MODE");
        let skip_ssh = test_mode || env_flag("CAMPERS_SKIP_SSH_CONNECTION");
        let skip_sync = test_mode || env_flag("CAMPERS_DISABLE_MUTAGEN");

        self.events
            .publish(UiEvent::MergedConfig(Box::new(config.clone())));

        // 4. Provision.
        self.events.status(format!(
            "Provisioning {} in {}...",
            config.instance_type, config.region
        ));
        let handle = self.compute.launch_instance(config, None).await?;
        self.events
            .publish(UiEvent::InstanceDetails(Box::new(handle.clone())));
        self.ledger.record_instance(handle.clone()).await;
        self.write_session_record(config, &handle)?;

        // 5. SSH.
        let ssh = if skip_ssh {
            info!("skipping ssh connection (test harness)");
            None
        } else {
            Some(self.establish_ssh(config, &handle).await?)
        };

        // 6. Setup script: first launch only, which every `run` is — the
        // instance was just created. Non-zero exit is fatal.
        if let (Some(script), Some(ssh)) = (&config.setup_script, &ssh) {
            self.events.status("Running setup script...");
            let code = ssh.run_script(script, None, DEFAULT_EXEC_TIMEOUT).await?;
            if code != 0 {
                return Err(SupervisorError::ScriptFailed { which: "setup", code });
            }
        }

        // 7. Sync sessions.
        if skip_sync {
            info!("file sync disabled, skipping");
        } else if !config.sync_paths.is_empty() {
            self.establish_sync(config, &handle).await?;
        }

        // 8. Port forwarding.
        if let Some(ssh) = &ssh {
            if !config.ports.is_empty() {
                self.establish_forwards(&config.ports, ssh.clone()).await?;
            }
        }

        // 9. Startup script: every attach, not just first launch. Its exit
        // status becomes the session status when non-zero.
        if let (Some(script), Some(ssh)) = (&config.startup_script, &ssh) {
            self.events.status("Running startup script...");
            let workdir = config.sync_paths.first().map(|p| p.remote.as_str());
            let code = ssh.run_script(script, workdir, DEFAULT_EXEC_TIMEOUT).await?;
            if code != 0 {
                warn!(code, "startup script failed; using its status as the session status");
                return Ok(code);
            }
        }

        // 10. User command, or idle until a signal ends the session.
        match (&config.command, &ssh) {
            (Some(command), Some(ssh)) => {
                self.events.status(format!("Running: {}", command));
                let code = ssh.exec(command, DEFAULT_EXEC_TIMEOUT).await?;
                info!(code, "remote command finished");
                Ok(code)
            }
            (Some(command), None) => {
                warn!(command, "ssh skipped; cannot run remote command");
                Ok(0)
            }
            (None, _) => {
                self.events
                    .status("No command configured; supervising until exit signal");
                std::future::pending::<()>().await;
                unreachable!("pending future never resolves")
            }
        }
    }

    async fn establish_ssh(
        &self,
        config: &MachineConfig,
        handle: &InstanceHandle,
    ) -> Result<Arc<SshConnection>, SupervisorError> {
        let host = handle.public_ip.clone().ok_or_else(|| {
            SupervisorError::Fatal(format!(
                "instance {} has no public IP to connect to",
                handle.instance_id
            ))
        })?;
        let key_file = handle.key_file.clone().ok_or_else(|| {
            SupervisorError::Fatal("launch returned no key file".to_string())
        })?;

        self.events.status(format!("Connecting to {}...", host));

        // Remote output lines flow into the UI event stream.
        let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                events.log(line);
            }
        });

        let target = SshTarget {
            host,
            user: config.ssh_username.clone(),
            key_file,
            port: 22,
        };
        let conn = Arc::new(SshConnection::new(target, Some(line_tx)));
        conn.connect().await?;
        self.ledger.record_ssh(conn.clone()).await;
        self.events.status("SSH connection established");
        Ok(conn)
    }

    async fn establish_sync(
        &self,
        config: &MachineConfig,
        handle: &InstanceHandle,
    ) -> Result<(), SupervisorError> {
        self.sync.require_installed().await?;

        let host = handle.public_ip.clone().unwrap_or_default();
        let key_file = handle
            .key_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let unique_id = handle.unique_id.clone().unwrap_or_default();

        for (index, path) in config.sync_paths.iter().enumerate() {
            let name = session_name(&unique_id, index);

            // A crashed previous run may have left a session by this name.
            self.sync.cleanup_orphan(&name).await;

            self.events
                .status(format!("Syncing {} -> {}...", path.local, path.remote));
            self.sync
                .create(&SyncSessionSpec {
                    session_name: name.clone(),
                    local_path: path.local.clone(),
                    remote_path: path.remote.clone(),
                    host: host.clone(),
                    key_file: key_file.clone(),
                    username: config.ssh_username.clone(),
                    ignore_patterns: config.ignore.clone(),
                    include_vcs: config.include_vcs,
                })
                .await?;
            self.ledger.record_sync_session(name.clone()).await;

            self.sync.wait_for_initial(&name, DEFAULT_INITIAL_WAIT).await?;
            self.events.publish(UiEvent::SyncStatus {
                session: name,
                state: "watching".into(),
            });
        }
        Ok(())
    }

    async fn establish_forwards(
        &self,
        ports: &[TunnelSpec],
        ssh: Arc<SshConnection>,
    ) -> Result<(), SupervisorError> {
        let forwards = Arc::new(ForwardManager::new(ssh));
        forwards.create_all(ports).await?;
        for spec in ports {
            self.events.publish(UiEvent::TunnelUp(*spec));
        }
        self.ledger.record_forwards(forwards).await;
        Ok(())
    }

    /// Written as soon as the instance runs: consumers treat "cannot connect
    /// yet" as transient, so recording before SSH is established is fine.
    fn write_session_record(
        &self,
        config: &MachineConfig,
        handle: &InstanceHandle,
    ) -> Result<(), SupervisorError> {
        let record = SessionRecord {
            camp_name: config.camp_name.clone(),
            pid: std::process::id() as i32,
            instance_id: handle.instance_id.clone(),
            region: config.region.clone(),
            ssh_host: handle.public_ip.clone().unwrap_or_default(),
            ssh_port: 22,
            ssh_user: config.ssh_username.clone(),
            key_file: handle
                .key_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        };
        self.registry.create(&record)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockCompute;
    use campers_domain::{ImageSelector, SyncPath};
    use tempfile::TempDir;

    fn config() -> MachineConfig {
        MachineConfig {
            camp_name: "jupyter".into(),
            region: "us-east-1".into(),
            instance_type: "t3.medium".into(),
            disk_size_gb: 50,
            image: ImageSelector::DefaultUbuntu,
            allowed_ssh_cidr: "0.0.0.0/0".into(),
            command: Some("echo hi".into()),
            ports: vec![TunnelSpec::same_port(8888)],
            sync_paths: vec![SyncPath { local: "~/proj".into(), remote: "~/proj".into() }],
            ignore: vec![],
            include_vcs: false,
            setup_script: None,
            startup_script: None,
            on_exit: ExitPolicy::Stop,
            ssh_username: "ubuntu".into(),
        }
    }

    fn supervisor(compute: Arc<MockCompute>, dir: &TempDir) -> Supervisor {
        Supervisor::new(
            compute,
            Arc::new(PricingService::with_test_endpoint("http://127.0.0.1:1")),
            SessionRegistry::new(dir.path().to_path_buf()),
            Arc::new(EventBus::new(256)),
        )
    }

    #[tokio::test]
    async fn acquire_records_instance_and_session_before_ssh() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("CAMPERS_TEST_MODE", "1");
        let compute = Arc::new(MockCompute::new("us-east-1"));
        let sup = supervisor(compute.clone(), &dir);

        let code = sup.acquire(&config()).await.unwrap();
        // Test mode skips ssh, so the command is skipped and the status is 0.
        assert_eq!(code, 0);

        assert!(compute.calls().contains(&"launch_instance:jupyter".to_string()));
        assert!(sup.ledger.instance_id().await.is_some());
        assert!(sup.registry.read("jupyter").is_some());
    }

    #[tokio::test]
    async fn launch_failure_leaves_ledger_empty() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("CAMPERS_TEST_MODE", "1");
        let compute = Arc::new(MockCompute::new("us-east-1").failing_launch());
        let sup = supervisor(compute, &dir);

        let err = sup.acquire(&config()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Provider(_)));
        // Nothing acquired, nothing in the ledger, no session record.
        assert!(sup.ledger.instance_id().await.is_none());
        assert!(sup.registry.read("jupyter").is_none());
    }

    #[tokio::test]
    async fn invalid_region_fails_before_any_cloud_call() {
        let dir = TempDir::new().unwrap();
        let compute = Arc::new(MockCompute::new("us-east-1"));
        let sup = supervisor(compute.clone(), &dir);

        let mut bad = config();
        bad.region = "nowhere".into();
        let code = sup.run(&bad).await;
        assert_eq!(code, 1);
        assert!(compute.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_instance_type_fails_before_any_cloud_call() {
        let dir = TempDir::new().unwrap();
        let compute = Arc::new(MockCompute::new("us-east-1"));
        let sup = supervisor(compute.clone(), &dir);

        let mut bad = config();
        bad.instance_type = "p5.48xlarge".into();
        let code = sup.run(&bad).await;
        assert_eq!(code, 1);
        assert!(compute.calls().is_empty());
    }
}
