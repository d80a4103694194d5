//! Scoped on/off switches.
//!
//! A [`ScopedSwitch`] is engaged for as long as at least one [`SwitchGuard`]
//! is alive. Guards release on drop, so early returns, `?` and panics all
//! restore the switch. Used for pausing the heartbeat and for suspending
//! automatic context changes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct SwitchState {
    depth: usize,
    since: Option<Instant>,
}

/// A nestable switch shared between its owner and any guard holders.
#[derive(Debug, Clone, Default)]
pub struct ScopedSwitch {
    state: Arc<Mutex<SwitchState>>,
}

impl ScopedSwitch {
    /// Create a released switch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Engage the switch until the returned guard is dropped.
    pub fn engage(&self) -> SwitchGuard {
        let mut state = self.state.lock();
        if state.depth == 0 {
            state.since = Some(Instant::now());
        }
        state.depth += 1;
        SwitchGuard {
            state: Arc::clone(&self.state),
        }
    }

    /// Returns `true` while any guard is alive.
    #[must_use]
    pub fn is_engaged(&self) -> bool {
        self.state.lock().depth > 0
    }

    /// Number of live guards.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.state.lock().depth
    }

    /// How long the switch has been continuously engaged.
    #[must_use]
    pub fn engaged_for(&self) -> Option<Duration> {
        self.state.lock().since.map(|since| since.elapsed())
    }
}

/// Keeps a [`ScopedSwitch`] engaged while alive.
#[derive(Debug)]
#[must_use = "the switch is released as soon as the guard is dropped"]
pub struct SwitchGuard {
    state: Arc<Mutex<SwitchState>>,
}

impl Drop for SwitchGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.since = None;
        }
    }
}
