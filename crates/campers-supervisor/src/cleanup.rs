//! Ordered, re-entrant-safe teardown of whatever the ledger holds.
//!
//! The order is fixed regardless of how cleanup was entered: port tunnels
//! first (so client sockets don't wedge), then the sync daemon (so it never
//! writes to a dead channel), then SSH, then the instance per the exit
//! policy. Every slot gets its own error boundary — a failed release is
//! counted and logged, and the coordinator moves on to the next slot.

use std::sync::Arc;

use campers_domain::{ExitPolicy, InstanceHandle, InstanceState, TunnelSpec};
use campers_provider::{format_cost, Compute, PricingService};
use campers_session::SessionRegistry;
use campers_sync::MutagenSync;
use tracing::{debug, info, warn};

use crate::events::EventBus;
use crate::ledger::{LedgerContents, SharedLedger};

pub struct CleanupReport {
    pub errors: u32,
}

pub struct CleanupCoordinator {
    compute: Arc<dyn Compute>,
    pricing: Arc<PricingService>,
    sync: MutagenSync,
    registry: SessionRegistry,
    events: Arc<EventBus>,
}

impl CleanupCoordinator {
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
        }
    }

    /// Run the full teardown. Returns `None` when another cleanup already
    /// holds the ledger (re-entrant call); the caller treats that as a
    /// no-op. `signal_driven` controls whether the in-progress flag is
    /// cleared afterwards — it is not for signal paths, so a later signal
    /// cannot restart a finished teardown.
    pub async fn run(
        &self,
        ledger: &SharedLedger,
        policy: ExitPolicy,
        camp_name: &str,
        signal_driven: bool,
    ) -> Option<CleanupReport> {
        let Some(contents) = ledger.begin_cleanup().await else {
            info!("Cleanup already in progress, ignoring");
            return None;
        };

        info!(policy = %policy, "starting cleanup");
        self.events.status("Cleaning up...");
        let mut errors: u32 = 0;

        let tunnel_specs = self.release_forwards(&contents).await;
        self.release_sync(&contents).await;
        self.release_ssh(&contents).await;
        errors += self.release_instance(&contents, policy, &tunnel_specs).await;

        if let Err(e) = self.registry.delete(camp_name) {
            warn!(camp = camp_name, error = %e, "failed to delete session record");
            errors += 1;
        }

        if errors == 0 {
            info!("Cleanup completed successfully");
        } else {
            info!("Cleanup completed with {} errors", errors);
        }

        if !signal_driven {
            ledger.finish_cleanup().await;
        }
        Some(CleanupReport { errors })
    }

    async fn release_forwards(&self, contents: &LedgerContents) -> Vec<TunnelSpec> {
        match &contents.forwards {
            Some(forwards) => {
                let specs = forwards.active().await;
                forwards.stop_all().await;
                for spec in &specs {
                    self.events.publish(crate::events::UiEvent::TunnelDown(*spec));
                }
                specs
            }
            None => {
                debug!("no port forwards to stop");
                Vec::new()
            }
        }
    }

    async fn release_sync(&self, contents: &LedgerContents) {
        if contents.sync_sessions.is_empty() {
            debug!("no sync sessions to terminate");
            return;
        }
        for session in &contents.sync_sessions {
            self.sync.terminate(session).await;
        }
    }

    async fn release_ssh(&self, contents: &LedgerContents) {
        match &contents.ssh {
            Some(conn) => conn.close().await,
            None => debug!("no ssh connection to close"),
        }
    }

    async fn release_instance(
        &self,
        contents: &LedgerContents,
        policy: ExitPolicy,
        tunnel_specs: &[TunnelSpec],
    ) -> u32 {
        let Some(handle) = &contents.instance else {
            debug!("no instance to release");
            return 0;
        };

        match policy {
            ExitPolicy::Stop => self.stop_with_cost_report(handle).await,
            ExitPolicy::Detach => {
                self.report_detached(handle, tunnel_specs);
                0
            }
            ExitPolicy::Destroy => match self.compute.terminate_instance(&handle.instance_id).await {
                Ok(()) => {
                    self.events
                        .status(format!("Instance {} terminated", handle.instance_id));
                    0
                }
                Err(e) => {
                    warn!(instance_id = handle.instance_id, error = %e, "failed to terminate instance");
                    1
                }
            },
        }
    }

    async fn stop_with_cost_report(&self, handle: &InstanceHandle) -> u32 {
        let volume_gb = match self.compute.get_volume_size(&handle.instance_id).await {
            Ok(size) => size.unwrap_or(0),
            Err(e) => {
                debug!(error = %e, "could not read volume size for cost estimate");
                0
            }
        };
        let running_cost = self
            .pricing
            .monthly_cost(&handle.instance_type, self.compute.region(), InstanceState::Running, volume_gb)
            .await;
        let stopped_cost = self
            .pricing
            .monthly_cost(&handle.instance_type, self.compute.region(), InstanceState::Stopped, volume_gb)
            .await;

        match self.compute.stop_instance(&handle.instance_id).await {
            Ok(_) => {
                self.events
                    .status(format!("Instance {} stopped", handle.instance_id));
                match (running_cost, stopped_cost) {
                    (Some(before), Some(after)) => {
                        self.events.status(format!(
                            "Cost impact: {} -> {}",
                            format_cost(Some(before)),
                            format_cost(Some(after))
                        ));
                    }
                    _ => self.events.status("Pricing unavailable".to_string()),
                }
                0
            }
            Err(e) => {
                warn!(instance_id = handle.instance_id, error = %e, "failed to stop instance");
                1
            }
        }
    }

    /// `detach` leaves the machine running: all local-side resources are
    /// already down at this point, so just tell the user how to get back.
    fn report_detached(&self, handle: &InstanceHandle, tunnel_specs: &[TunnelSpec]) {
        let ip = handle.public_ip.as_deref().unwrap_or("unknown");
        self.events
            .status(format!("Instance left running at {}", ip));
        if !tunnel_specs.is_empty() {
            let ports: Vec<String> = tunnel_specs
                .iter()
                .map(|t| t.remote_port.to_string())
                .collect();
            self.events
                .status(format!("Remote ports still serving: {}", ports.join(", ")));
        }
        self.events
            .status("Reconnect with: campers run <camp>".to_string());
    }
}
