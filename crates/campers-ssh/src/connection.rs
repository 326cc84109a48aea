//! One authenticated SSH channel per supervisor, multiplexed through an
//! OpenSSH control master. Execs, tunnels, and the sync daemon all ride the
//! same authenticated connection, so the instance sees a single session.
//!
//! Host keys are accepted on first contact. The instance is ephemeral, the
//! key pair is disposable, and the security group pins the source range;
//! interactive fingerprint prompts would only wedge unattended runs.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::SshError;

/// Wall-clock budget for a single exec (playbook-style commands included).
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(3600);

const CONNECT_MAX_ATTEMPTS: u32 = 15;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(4);
const MASTER_CHECK_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    pub key_file: PathBuf,
    pub port: u16,
}

impl SshTarget {
    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

struct Inner {
    master: Option<Child>,
    connected: bool,
}

pub struct SshConnection {
    target: SshTarget,
    control_path: PathBuf,
    /// Mirror of every remote output line, drained by the UI.
    line_sink: Option<UnboundedSender<String>>,
    inner: Mutex<Inner>,
}

impl SshConnection {
    pub fn new(target: SshTarget, line_sink: Option<UnboundedSender<String>>) -> Self {
        let control_path = std::env::temp_dir().join(format!(
            "campers-ssh-{}-{}.sock",
            std::process::id(),
            target.host.replace(':', "_")
        ));
        Self {
            target,
            control_path,
            line_sink,
            inner: Mutex::new(Inner { master: None, connected: false }),
        }
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    pub(crate) fn destination(&self) -> String {
        self.target.destination()
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "-S".into(),
            self.control_path.display().to_string(),
            "-o".into(),
            "StrictHostKeyChecking=accept-new".into(),
            "-o".into(),
            "BatchMode=yes".into(),
            "-i".into(),
            self.target.key_file.display().to_string(),
            "-p".into(),
            self.target.port.to_string(),
        ]
    }

    /// Open the control master. Idempotent: an already-open connection is a
    /// no-op, and a closed connection may be reopened.
    ///
    /// The public IP takes a while to become routable after the instance
    /// reports running, so connection refusals and timeouts retry on a fixed
    /// cadence. Authentication failures do not retry.
    pub async fn connect(&self) -> Result<(), SshError> {
        let mut inner = self.inner.lock().await;
        if inner.connected {
            debug!(host = self.target.host, "ssh already connected");
            return Ok(());
        }

        for attempt in 1..=CONNECT_MAX_ATTEMPTS {
            match self.try_open_master().await {
                Ok(master) => {
                    inner.master = Some(master);
                    inner.connected = true;
                    info!(host = self.target.host, attempt, "ssh connection established");
                    return Ok(());
                }
                Err(SshError::Auth(msg)) => return Err(SshError::Auth(msg)),
                Err(e) => {
                    debug!(
                        host = self.target.host,
                        attempt, error = %e, "ssh not reachable yet"
                    );
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
            }
        }

        Err(SshError::Unreachable {
            host: self.target.host.clone(),
            attempts: CONNECT_MAX_ATTEMPTS,
        })
    }

    async fn try_open_master(&self) -> Result<Child, SshError> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.base_args())
            .arg("-M")
            .arg("-N")
            .arg("-o")
            .arg("ConnectTimeout=10")
            .arg(self.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut master = cmd
            .spawn()
            .map_err(|e| SshError::Spawn { program: "ssh".into(), source: e })?;
        let stderr = master.stderr.take().expect("stderr piped");

        // Collect master stderr in the background; auth failures show here.
        let (err_tx, mut err_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = err_tx.send(line);
            }
        });

        // Wait until the control socket answers, the master dies, or the
        // check budget runs out.
        let deadline = tokio::time::Instant::now() + MASTER_CHECK_TIMEOUT;
        loop {
            if let Some(status) = master.try_wait().ok().flatten() {
                let mut stderr_text = String::new();
                while let Ok(line) = err_rx.try_recv() {
                    stderr_text.push_str(&line);
                    stderr_text.push('\n');
                }
                let lowered = stderr_text.to_lowercase();
                if lowered.contains("permission denied") || lowered.contains("authentication") {
                    return Err(SshError::Auth(stderr_text.trim().to_string()));
                }
                return Err(SshError::Exec(format!(
                    "ssh master exited with {}: {}",
                    status,
                    stderr_text.trim()
                )));
            }

            if self.control_check().await {
                return Ok(master);
            }

            if tokio::time::Instant::now() >= deadline {
                let _ = master.kill().await;
                return Err(SshError::Exec("ssh master did not come up in time".into()));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    async fn control_check(&self) -> bool {
        Command::new("ssh")
            .arg("-S")
            .arg(&self.control_path)
            .arg("-O")
            .arg("check")
            .arg(self.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Lightweight health probe of the open channel.
    pub async fn is_healthy(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.connected && self.control_check().await
    }

    /// Run a command on the instance, merging stdout and stderr line-by-line
    /// into the log and the UI sink. Returns the remote exit status; a
    /// mid-exec disconnect reads as -1.
    pub async fn exec(&self, command: &str, timeout: Duration) -> Result<i32, SshError> {
        {
            let inner = self.inner.lock().await;
            if !inner.connected {
                return Err(SshError::NotConnected);
            }
        }
        self.run_remote(command, None, timeout).await
    }

    /// `exec` with the default wall-clock budget, reduced to "did it exit 0".
    pub async fn exec_ok(&self, command: &str) -> Result<bool, SshError> {
        Ok(self.exec(command, DEFAULT_EXEC_TIMEOUT).await? == 0)
    }

    /// Upload a script to a remote temp file, mark it executable, run it
    /// with the user's shell from `workdir`, then best-effort remove it.
    ///
    /// The script goes over stdin rather than the command line, so shell
    /// metacharacters and multi-line bodies survive untouched.
    pub async fn run_script(
        &self,
        script: &str,
        workdir: Option<&str>,
        timeout: Duration,
    ) -> Result<i32, SshError> {
        {
            let inner = self.inner.lock().await;
            if !inner.connected {
                return Err(SshError::NotConnected);
            }
        }

        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let remote_file = format!("$HOME/.campers-script-{}.sh", stamp);

        let upload = self
            .run_remote(
                &format!("cat > {f} && chmod +x {f}", f = remote_file),
                Some(script),
                Duration::from_secs(60),
            )
            .await?;
        if upload != 0 {
            return Err(SshError::Exec(format!(
                "uploading script failed with exit {}",
                upload
            )));
        }

        let cwd = workdir.unwrap_or("$HOME");
        let run_cmd = format!("cd {} && ${{SHELL:-/bin/sh}} {}", cwd, remote_file);
        let code = self.run_remote(&run_cmd, None, timeout).await?;

        if let Err(e) = self
            .run_remote(&format!("rm -f {}", remote_file), None, Duration::from_secs(30))
            .await
        {
            debug!(error = %e, "failed to remove remote script file");
        }

        Ok(code)
    }

    async fn run_remote(
        &self,
        command: &str,
        stdin_data: Option<&str>,
        timeout: Duration,
    ) -> Result<i32, SshError> {
        debug!(host = self.target.host, command, "ssh exec");

        let mut cmd = Command::new("ssh");
        cmd.args(self.base_args())
            .arg(self.destination())
            .arg(command)
            .stdin(if stdin_data.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| SshError::Spawn { program: "ssh".into(), source: e })?;

        if let Some(data) = stdin_data {
            let mut stdin = child.stdin.take().expect("stdin piped");
            let data = data.to_string();
            tokio::spawn(async move {
                let _ = stdin.write_all(data.as_bytes()).await;
                let _ = stdin.shutdown().await;
            });
        }

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        // Merge both streams through one channel so output interleaves in
        // arrival order.
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let tx_err = tx.clone();
        let out_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx.send(line);
            }
        });
        let err_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx_err.send(line);
            }
        });

        let sink = self.line_sink.clone();
        let collect = async {
            while let Some(line) = rx.recv().await {
                debug!(target: "campers::remote", "{}", line);
                if let Some(sink) = &sink {
                    let _ = sink.send(line);
                }
            }
        };

        let timed_out = tokio::time::timeout(timeout, collect).await.is_err();
        out_task.await.ok();
        err_task.await.ok();

        if timed_out {
            let _ = child.kill().await;
            return Err(SshError::Timeout { seconds: timeout.as_secs() });
        }

        let status = child
            .wait()
            .await
            .map_err(|e| SshError::Exec(format!("wait for ssh: {}", e)))?;
        Ok(status.code().unwrap_or(-1))
    }

    /// Run an `ssh -O` control command against the master socket, capturing
    /// stderr for the caller.
    pub(crate) async fn control_command(&self, args: &[&str]) -> Result<(), SshError> {
        let output = Command::new("ssh")
            .arg("-S")
            .arg(&self.control_path)
            .args(args)
            .arg(self.destination())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SshError::Spawn { program: "ssh".into(), source: e })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(SshError::Forward(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }

    /// Close the channel. Idempotent and safe in cleanup paths.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if !inner.connected && inner.master.is_none() {
            return;
        }

        if let Err(e) = self.control_command(&["-O", "exit"]).await {
            debug!(error = %e, "ssh control exit failed");
        }
        if let Some(mut master) = inner.master.take() {
            if let Err(e) = master.kill().await {
                debug!(error = %e, "killing ssh master failed");
            }
        }
        inner.connected = false;

        if self.control_path.exists() {
            let _ = std::fs::remove_file(&self.control_path);
        }
        info!(host = self.target.host, "ssh connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> SshTarget {
        SshTarget {
            host: "203.0.113.10".into(),
            user: "ubuntu".into(),
            key_file: PathBuf::from("/tmp/key.pem"),
            port: 22,
        }
    }

    #[tokio::test]
    async fn exec_without_connect_is_rejected() {
        let conn = SshConnection::new(target(), None);
        let err = conn.exec("true", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SshError::NotConnected));
    }

    #[tokio::test]
    async fn close_before_connect_is_a_no_op() {
        let conn = SshConnection::new(target(), None);
        conn.close().await;
        conn.close().await;
    }

    #[test]
    fn control_path_is_per_process_and_host() {
        let a = SshConnection::new(target(), None);
        let mut t = target();
        t.host = "203.0.113.11".into();
        let b = SshConnection::new(t, None);
        assert_ne!(a.control_path, b.control_path);
    }
}
