use std::{cell::RefCell, rc::Rc};

use tracing::debug;

use crate::{
    event::CommitEvent,
    exit::{ExitEvent, ExitSignal},
    probe::{ListenState, ProbeListener},
};

pub const DEFAULT_UPDATE_THRESHOLD: u64 = 100;

pub type SharedGlobalCounter = Rc<RefCell<GlobalInstCounter>>;

/// Sums the instructions reported by every [`LocalInstCounter`] and signals
/// when a target count is reached.
#[derive(Debug)]
pub struct GlobalInstCounter {
    target: u64,
    count: u64,
    exit: ExitSignal,
}

impl GlobalInstCounter {
    pub fn new(target: u64, exits: flume::Sender<ExitEvent>) -> Self {
        Self {
            target,
            count: 0,
            exit: ExitSignal::new(exits),
        }
    }

    pub fn into_shared(self) -> SharedGlobalCounter {
        Rc::new(RefCell::new(self))
    }

    pub fn update(&mut self, local: u64) {
        self.count += local;
        if self.count >= self.target {
            self.exit.fire(ExitEvent::TargetReached {
                inst_count: self.count,
            });
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn set_target(&mut self, target: u64) {
        self.target = target;
    }

    pub fn target_reached(&self) -> bool {
        self.exit.has_fired()
    }

    pub fn clear(&mut self) {
        self.count = 0;
        self.exit.rearm();
    }
}

/// Counts every committed instruction of one core and hands the count to
/// the global counter in batches of `update_threshold`.
#[derive(Debug)]
pub struct LocalInstCounter {
    global: SharedGlobalCounter,
    count: u64,
    update_threshold: u64,
    state: ListenState,
}

impl LocalInstCounter {
    pub fn new(global: SharedGlobalCounter, update_threshold: u64, start_listening: bool) -> Self {
        debug!("local instruction counter, update threshold {}", update_threshold);
        Self {
            global,
            count: 0,
            update_threshold,
            state: ListenState::from_start(start_listening),
        }
    }

    /// Instructions not yet handed to the global counter.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn clear(&mut self) {
        self.count = 0;
    }

    pub fn set_threshold(&mut self, update_threshold: u64) {
        self.update_threshold = update_threshold;
    }
}

impl ProbeListener for LocalInstCounter {
    fn name(&self) -> &'static str {
        "LocalInstCounter"
    }

    fn listen_state(&self) -> ListenState {
        self.state
    }

    fn set_listen_state(&mut self, state: ListenState) {
        self.state = state;
    }

    fn commit(&mut self, _event: &CommitEvent) {
        self.count += 1;
        if self.count >= self.update_threshold {
            self.global.borrow_mut().update(self.count);
            self.count = 0;
        }
    }
}
