//! Signal routing for the supervisor.
//!
//! The first interrupt or terminate starts cleanup. Further signals while
//! cleanup runs are no-ops, except that two no-op signals landing within
//! 1.5s of each other escalate to immediate exit — the double-Ctrl-C escape
//! hatch for a wedged teardown.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{info, warn};

/// Window within which a repeated signal escalates.
pub const ESCALATION_WINDOW: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: run ordered cleanup.
    StartCleanup,
    /// Cleanup already running: log and return.
    Ignore,
    /// Rapid repeat: skip the remaining ordered release, terminate the
    /// instance, exit now.
    Escalate,
}

/// Tracks signal arrivals and decides what each one means.
pub struct SignalState {
    count: u32,
    last: Option<Instant>,
}

impl SignalState {
    pub fn new() -> Self {
        Self { count: 0, last: None }
    }

    pub fn register(&mut self, now: Instant) -> SignalAction {
        self.count += 1;
        let previous = self.last.replace(now);

        match self.count {
            1 => SignalAction::StartCleanup,
            2 => SignalAction::Ignore,
            _ => match previous {
                Some(prev) if now.duration_since(prev) <= ESCALATION_WINDOW => {
                    SignalAction::Escalate
                }
                _ => SignalAction::Ignore,
            },
        }
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

/// Install handlers for the platform's interrupt and terminate signals.
/// Each delivery sends its signal number down the returned channel; the
/// supervisor owns the policy (cleanup, no-op, escalate).
pub fn install_handlers() -> mpsc::UnboundedReceiver<i32> {
    let (tx, rx) = mpsc::unbounded_channel();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to install SIGINT handler");
                return rx;
            }
        };
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                return rx;
            }
        };

        tokio::spawn(async move {
            loop {
                let signum = tokio::select! {
                    _ = interrupt.recv() => nix::libc::SIGINT,
                    _ = terminate.recv() => nix::libc::SIGTERM,
                };
                info!(signal = signum, "signal received");
                if tx.send(signum).is_err() {
                    break;
                }
            }
        });
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    break;
                }
                if tx.send(2).is_err() {
                    break;
                }
            }
        });
    }

    rx
}

/// POSIX convention for death-by-signal exit codes.
pub fn signal_exit_code(signum: i32) -> i32 {
    128 + signum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_signal_starts_cleanup() {
        let mut state = SignalState::new();
        assert_eq!(state.register(Instant::now()), SignalAction::StartCleanup);
    }

    #[test]
    fn second_signal_is_a_no_op() {
        let mut state = SignalState::new();
        let t0 = Instant::now();
        state.register(t0);
        assert_eq!(state.register(t0 + Duration::from_millis(100)), SignalAction::Ignore);
    }

    #[test]
    fn rapid_third_signal_escalates() {
        let mut state = SignalState::new();
        let t0 = Instant::now();
        state.register(t0);
        state.register(t0 + Duration::from_secs(5));
        assert_eq!(
            state.register(t0 + Duration::from_secs(5) + Duration::from_millis(800)),
            SignalAction::Escalate
        );
    }

    #[test]
    fn slow_third_signal_stays_a_no_op() {
        let mut state = SignalState::new();
        let t0 = Instant::now();
        state.register(t0);
        state.register(t0 + Duration::from_secs(5));
        assert_eq!(
            state.register(t0 + Duration::from_secs(10)),
            SignalAction::Ignore
        );
    }

    #[test]
    fn exit_codes_follow_posix_convention() {
        assert_eq!(signal_exit_code(2), 130);
        assert_eq!(signal_exit_code(15), 143);
    }
}
