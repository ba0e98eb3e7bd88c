//! Upward notifications telling the host it should stop or checkpoint.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitEvent {
    /// A loop marker was tallied after the region length was reached.
    RegionBoundary { pc: u64, inst_count: u64 },
    /// The global instruction counter hit its target.
    TargetReached { inst_count: u64 },
    /// The data movement tracker finished an interval.
    IntervalReached { inst_count: u64 },
}

impl fmt::Display for ExitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitEvent::RegionBoundary { pc, inst_count } => write!(
                f,
                "region boundary at marker {:#x} after {} instructions",
                pc, inst_count
            ),
            ExitEvent::TargetReached { inst_count } => {
                write!(f, "instruction target reached after {}", inst_count)
            }
            ExitEvent::IntervalReached { inst_count } => {
                write!(f, "interval reached after {} instructions", inst_count)
            }
        }
    }
}

/// Sends an [`ExitEvent`] at most once until it is re-armed.
#[derive(Debug)]
pub struct ExitSignal {
    tx: flume::Sender<ExitEvent>,
    fired: bool,
}

impl ExitSignal {
    pub fn new(tx: flume::Sender<ExitEvent>) -> Self {
        Self { tx, fired: false }
    }

    /// Returns true if this call actually sent the event.
    pub fn fire(&mut self, event: ExitEvent) -> bool {
        if self.fired {
            return false;
        }
        self.fired = true;

        info!("{}", event);
        if self.tx.send(event).is_err() {
            debug!("exit receiver is gone, dropping {:?}", event);
        }

        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub fn rearm(&mut self) {
        self.fired = false;
    }
}
