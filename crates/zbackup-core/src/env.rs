//! Process environment handed to the planner and tasks.
//!
//! Hostname and wall-clock access go through [`Env`] instead of process-wide
//! globals so tests can pin both.

use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::Mutex;

/// Timestamp label format for remote snapshots, local wall-clock.
///
/// Fixed-width, so lexicographic label order equals time order.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Hostname and clock bound to one invocation.
#[derive(Clone)]
pub struct Env {
    pub hostname: String,
    pub clock: Clock,
}

impl Env {
    /// The real environment: system hostname, system clock.
    pub fn system() -> Self {
        Self {
            hostname: gethostname::gethostname().to_string_lossy().into_owned(),
            clock: Clock::system(),
        }
    }

    /// A pinned environment for tests.
    pub fn fixed(hostname: &str, now: DateTime<Local>) -> Self {
        Self {
            hostname: hostname.to_string(),
            clock: Clock::fixed(now),
        }
    }

    /// Current time rendered in the snapshot label format.
    pub fn timestamp_label(&self) -> String {
        self.clock.now().format(TIME_FORMAT).to_string()
    }
}

/// Wall-clock source: the system clock, or a settable fixed instant.
#[derive(Clone)]
pub struct Clock(Option<Arc<Mutex<DateTime<Local>>>>);

impl Clock {
    pub fn system() -> Self {
        Clock(None)
    }

    pub fn fixed(at: DateTime<Local>) -> Self {
        Clock(Some(Arc::new(Mutex::new(at))))
    }

    pub fn now(&self) -> DateTime<Local> {
        match &self.0 {
            Some(at) => *at.lock(),
            None => Local::now(),
        }
    }

    /// Move a fixed clock; no-op on the system clock.
    pub fn set(&self, at: DateTime<Local>) {
        if let Some(slot) = &self.0 {
            *slot.lock() = at;
        }
    }
}
