//! Connection liveness supervision.
//!
//! The [`Heartbeat`] probes the bridge once per tick. Consecutive failures
//! are counted; a success resets the count. When the count reaches the
//! configured tolerance the supervisor moves to [`HeartbeatState::Terminated`]
//! and reports [`TickOutcome::Terminate`] exactly once. There is no
//! reconnection.
//!
//! Long-running work that blocks the host (context switches, command
//! callbacks) pauses the supervisor with [`Heartbeat::disable`]. The pause
//! is a scoped guard and lifts on every exit path.

use std::time::Duration;

use tracing::{debug, error, warn};

use crate::bridge::Probe;
use crate::error::BridgeError;
use crate::switch::{ScopedSwitch, SwitchGuard};

/// Default time between probes.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of consecutive failed probes that ends the process.
pub const DEFAULT_TOLERANCE: u32 = 2;

/// Default pause length after which each paused tick logs a warning.
pub const DEFAULT_MAX_PAUSE: Duration = Duration::from_secs(60);

/// Heartbeat timing and tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub tolerance: u32,
    /// `None` disables the long-pause warning.
    pub max_pause: Option<Duration>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            tolerance: DEFAULT_TOLERANCE,
            max_pause: Some(DEFAULT_MAX_PAUSE),
        }
    }
}

impl HeartbeatConfig {
    /// Override the probe interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Override the failure tolerance. Values below 1 are treated as 1.
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: u32) -> Self {
        self.tolerance = tolerance.max(1);
        self
    }

    /// Override the long-pause warning threshold.
    #[must_use]
    pub fn with_max_pause(mut self, max_pause: Option<Duration>) -> Self {
        self.max_pause = max_pause;
        self
    }
}

/// Supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Armed,
    Disabled,
    Terminated,
}

/// The result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The supervisor is disabled; nothing was probed.
    Paused,
    /// The probe succeeded. Queued events should be dispatched now.
    Healthy,
    /// The probe failed but the tolerance is not reached yet.
    Failed { failures: u32 },
    /// The tolerance was just reached. The process should quit.
    Terminate,
    /// Termination was already signalled earlier.
    Terminated,
}

/// The liveness supervisor.
#[derive(Debug)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    failures: u32,
    terminated: bool,
    pause: ScopedSwitch,
}

impl Heartbeat {
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config: config.with_tolerance(config.tolerance),
            failures: 0,
            terminated: false,
            pause: ScopedSwitch::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    #[must_use]
    pub fn state(&self) -> HeartbeatState {
        if self.terminated {
            HeartbeatState::Terminated
        } else if self.pause.is_engaged() {
            HeartbeatState::Disabled
        } else {
            HeartbeatState::Armed
        }
    }

    /// Consecutive failed probes so far.
    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Pause probing until the returned guard is dropped. Guards nest.
    pub fn disable(&self) -> SwitchGuard {
        self.pause.engage()
    }

    /// A handle onto the pause switch, for code that does not own the
    /// heartbeat but must pause it.
    #[must_use]
    pub fn pause_switch(&self) -> ScopedSwitch {
        self.pause.clone()
    }

    /// Fold one probe result into the state machine.
    pub fn record(&mut self, probe: Result<(), BridgeError>) -> TickOutcome {
        if self.terminated {
            return TickOutcome::Terminated;
        }
        match probe {
            Ok(()) => {
                if self.failures > 0 {
                    debug!(previous_failures = self.failures, "heartbeat recovered");
                }
                self.failures = 0;
                TickOutcome::Healthy
            }
            Err(e) => {
                self.failures += 1;
                if self.failures >= self.config.tolerance {
                    error!(
                        failures = self.failures,
                        error = %e,
                        "heartbeat tolerance reached, host connection lost"
                    );
                    self.terminated = true;
                    TickOutcome::Terminate
                } else {
                    warn!(
                        failures = self.failures,
                        tolerance = self.config.tolerance,
                        error = %e,
                        "heartbeat probe failed"
                    );
                    TickOutcome::Failed {
                        failures: self.failures,
                    }
                }
            }
        }
    }

    /// Run one tick: probe unless paused or terminated.
    pub async fn tick(&mut self, probe: &dyn Probe) -> TickOutcome {
        if self.terminated {
            return TickOutcome::Terminated;
        }
        if self.pause.is_engaged() {
            if let (Some(max_pause), Some(paused_for)) =
                (self.config.max_pause, self.pause.engaged_for())
            {
                if paused_for > max_pause {
                    warn!(
                        paused_for = ?paused_for,
                        max_pause = ?max_pause,
                        "heartbeat has been paused for longer than expected"
                    );
                }
            }
            return TickOutcome::Paused;
        }
        let result = probe.ping().await;
        self.record(result)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;

    /// Answers from a scripted list; an empty list means success.
    #[derive(Default)]
    struct ScriptedProbe {
        script: Mutex<VecDeque<bool>>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(script: &[bool]) -> Self {
            Self {
                script: Mutex::new(script.iter().copied().collect()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn ping(&self) -> Result<(), BridgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().pop_front() {
                Some(false) => Err(BridgeError::Disconnected),
                _ => Ok(()),
            }
        }
    }

    fn heartbeat(tolerance: u32) -> Heartbeat {
        Heartbeat::new(HeartbeatConfig::default().with_tolerance(tolerance))
    }

    #[test]
    fn test_failures_below_tolerance_stay_armed() {
        let mut hb = heartbeat(4);
        for n in 1..4 {
            let outcome = hb.record(Err(BridgeError::Disconnected));
            assert_eq!(outcome, TickOutcome::Failed { failures: n });
            assert_eq!(hb.state(), HeartbeatState::Armed);
            assert_eq!(hb.failures(), n);
        }
    }

    #[test]
    fn test_success_resets_counter() {
        let mut hb = heartbeat(3);
        hb.record(Err(BridgeError::Disconnected));
        hb.record(Err(BridgeError::Disconnected));
        assert_eq!(hb.record(Ok(())), TickOutcome::Healthy);
        assert_eq!(hb.failures(), 0);
        assert_eq!(hb.state(), HeartbeatState::Armed);
    }

    #[test]
    fn test_termination_signalled_exactly_once() {
        let mut hb = heartbeat(2);
        let outcomes: Vec<_> = (0..5)
            .map(|_| hb.record(Err(BridgeError::Disconnected)))
            .collect();
        let terminates = outcomes
            .iter()
            .filter(|o| **o == TickOutcome::Terminate)
            .count();
        assert_eq!(terminates, 1);
        assert_eq!(outcomes[1], TickOutcome::Terminate);
        assert!(outcomes[2..].iter().all(|o| *o == TickOutcome::Terminated));
        assert_eq!(hb.state(), HeartbeatState::Terminated);

        // A late success does not revive it.
        assert_eq!(hb.record(Ok(())), TickOutcome::Terminated);
    }

    #[test]
    fn test_zero_tolerance_is_clamped() {
        let mut hb = heartbeat(0);
        assert_eq!(hb.config().tolerance, 1);
        assert_eq!(
            hb.record(Err(BridgeError::Disconnected)),
            TickOutcome::Terminate
        );
    }

    #[tokio::test]
    async fn test_tick_probes_when_armed() {
        let probe = ScriptedProbe::new(&[false, true]);
        let mut hb = heartbeat(2);
        assert_eq!(hb.tick(&probe).await, TickOutcome::Failed { failures: 1 });
        assert_eq!(hb.tick(&probe).await, TickOutcome::Healthy);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_disabled_tick_skips_probe() {
        let probe = ScriptedProbe::new(&[false, false, false]);
        let mut hb = heartbeat(1);
        {
            let _guard = hb.disable();
            assert_eq!(hb.state(), HeartbeatState::Disabled);
            assert_eq!(hb.tick(&probe).await, TickOutcome::Paused);
            assert_eq!(hb.tick(&probe).await, TickOutcome::Paused);
        }
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert_eq!(hb.state(), HeartbeatState::Armed);
        assert_eq!(hb.tick(&probe).await, TickOutcome::Terminate);
    }

    #[test]
    fn test_disable_restores_armed_after_early_return() {
        fn lost() -> Result<(), BridgeError> {
            Err(BridgeError::Disconnected)
        }

        fn guarded(switch: &ScopedSwitch) -> Result<(), BridgeError> {
            let _guard = switch.engage();
            lost()?;
            Ok(())
        }

        let hb = heartbeat(2);
        let switch = hb.pause_switch();
        assert!(guarded(&switch).is_err());
        assert_eq!(hb.state(), HeartbeatState::Armed);
    }

    #[test]
    fn test_disable_restores_armed_after_panic() {
        let hb = heartbeat(2);
        let switch = hb.pause_switch();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = switch.engage();
            panic!("callback failed");
        }));
        assert!(result.is_err());
        assert_eq!(hb.state(), HeartbeatState::Armed);
    }

    #[tokio::test]
    async fn test_long_pause_still_reports_paused() {
        let probe = ScriptedProbe::new(&[]);
        let mut hb = Heartbeat::new(
            HeartbeatConfig::default().with_max_pause(Some(Duration::from_millis(1))),
        );
        let _guard = hb.disable();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(hb.tick(&probe).await, TickOutcome::Paused);
    }
}
