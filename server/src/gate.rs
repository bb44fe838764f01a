//! Single-flight admission gate in front of the vision call.
//!
//! One [`FrameGate`] is shared by every connection. A frame is admitted only
//! when no other frame is being processed and the throttle window since the
//! previous admitted frame *finished* has elapsed. Admission hands out a
//! [`GatePermit`]; the gate unlocks when the permit is released or dropped,
//! so an admitted frame cannot leave the gate locked on any exit path.

use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tracing::warn;

/// Snapshot of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateState {
    pub locked: bool,
    /// Completion time of the last admitted frame. `None` until one finishes.
    pub last_accepted_at: Option<Instant>,
}

/// Why a frame was not admitted. Neither case changes the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Busy,
    Throttled,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Busy => "busy",
            Rejection::Throttled => "throttled",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub enum Admission<'a> {
    Admitted(GatePermit<'a>),
    Rejected(Rejection),
}

struct Inner {
    state: GateState,
    min_interval: Duration,
}

pub struct FrameGate {
    inner: Mutex<Inner>,
}

impl FrameGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: GateState {
                    locked: false,
                    last_accepted_at: None,
                },
                min_interval,
            }),
        }
    }

    /// Check-and-set under one lock: either the frame is admitted and the
    /// gate is now locked, or nothing changed.
    pub fn try_acquire(&self, now: Instant) -> Admission<'_> {
        let mut inner = self.lock();
        if inner.state.locked {
            return Admission::Rejected(Rejection::Busy);
        }
        if let Some(last) = inner.state.last_accepted_at {
            if now.saturating_duration_since(last) < inner.min_interval {
                return Admission::Rejected(Rejection::Throttled);
            }
        }
        inner.state.locked = true;
        Admission::Admitted(GatePermit {
            gate: self,
            released: false,
        })
    }

    pub fn state(&self) -> GateState {
        self.lock().state
    }

    pub fn min_interval(&self) -> Duration {
        self.lock().min_interval
    }

    /// Takes effect for the next admission check.
    pub fn set_min_interval(&self, min_interval: Duration) {
        self.lock().min_interval = min_interval;
    }

    fn release(&self, now: Instant) {
        let mut inner = self.lock();
        inner.state.locked = false;
        inner.state.last_accepted_at = Some(now);
    }

    // The state is two plain fields; a panic elsewhere cannot leave them torn.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Proof of admission. Release it with the completion time; dropping it
/// unreleased (panic, cancelled task) releases with the current time.
#[must_use = "dropping the permit releases the gate immediately"]
pub struct GatePermit<'a> {
    gate: &'a FrameGate,
    released: bool,
}

impl GatePermit<'_> {
    /// Unlock the gate; `now` starts the next throttle window.
    pub fn release(mut self, now: Instant) {
        self.released = true;
        self.gate.release(now);
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        if !self.released {
            warn!("Frame gate permit dropped without explicit release");
            self.gate.release(Instant::now());
        }
    }
}
