//! Local→remote TCP tunnels over the established SSH channel.
//!
//! Tunnels are added and removed through the control master, so the set
//! shares the single authenticated connection. Both ends bind loopback only.

use std::sync::Arc;

use campers_domain::TunnelSpec;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::connection::SshConnection;
use crate::error::SshError;

pub struct ForwardManager {
    conn: Arc<SshConnection>,
    tunnels: Mutex<Vec<TunnelSpec>>,
}

impl ForwardManager {
    pub fn new(conn: Arc<SshConnection>) -> Self {
        Self { conn, tunnels: Mutex::new(Vec::new()) }
    }

    pub async fn active(&self) -> Vec<TunnelSpec> {
        self.tunnels.lock().await.clone()
    }

    /// Open every tunnel in `specs`, all-or-nothing: the first failure stops
    /// all tunnels already opened in this batch and re-raises.
    pub async fn create_all(&self, specs: &[TunnelSpec]) -> Result<(), SshError> {
        for spec in specs {
            info!("Creating SSH tunnel for port {}...", spec.remote_port);
            match self.open_one(spec).await {
                Ok(()) => {
                    info!(
                        "SSH tunnel established: localhost:{} -> remote:{}",
                        spec.local_port, spec.remote_port
                    );
                    self.tunnels.lock().await.push(*spec);
                }
                Err(e) => {
                    warn!(error = %e, "tunnel setup failed; stopping tunnels already created");
                    self.stop_all().await;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Stop every recorded tunnel in reverse insertion order. Per-tunnel
    /// failures are logged and the loop continues.
    pub async fn stop_all(&self) {
        let mut tunnels = self.tunnels.lock().await;
        while let Some(spec) = tunnels.pop() {
            info!("Stopping SSH tunnel for port {}", spec.remote_port);
            if let Err(e) = self
                .conn
                .control_command(&["-O", "cancel", "-L", &forward_arg(&spec)])
                .await
            {
                warn!(tunnel = %spec, error = %e, "failed to stop tunnel");
            }
        }
    }

    async fn open_one(&self, spec: &TunnelSpec) -> Result<(), SshError> {
        match self
            .conn
            .control_command(&["-O", "forward", "-L", &forward_arg(spec)])
            .await
        {
            Ok(()) => Ok(()),
            Err(SshError::Forward(msg)) if is_port_in_use(&msg) => {
                Err(SshError::PortInUse { port: spec.local_port })
            }
            Err(e) => Err(e),
        }
    }
}

fn forward_arg(spec: &TunnelSpec) -> String {
    format!("127.0.0.1:{}:127.0.0.1:{}", spec.local_port, spec.remote_port)
}

fn is_port_in_use(stderr: &str) -> bool {
    let lowered = stderr.to_lowercase();
    lowered.contains("address already in use") || lowered.contains("cannot listen to port")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_argument_binds_loopback_on_both_ends() {
        let spec = TunnelSpec { remote_port: 8888, local_port: 9999 };
        assert_eq!(forward_arg(&spec), "127.0.0.1:9999:127.0.0.1:8888");
    }

    #[test]
    fn port_in_use_detection_matches_openssh_phrasing() {
        assert!(is_port_in_use("bind [127.0.0.1]:8888: Address already in use"));
        assert!(is_port_in_use("channel_setup_fwd_listener_tcpip: cannot listen to port: 8888"));
        assert!(!is_port_in_use("connection refused"));
    }
}
