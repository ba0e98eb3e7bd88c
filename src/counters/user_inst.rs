use std::{cell::RefCell, rc::Rc};

use crate::{
    config::ConfigError,
    event::CommitEvent,
    probe::{ListenState, ProbeListener},
};

pub type SharedUserInstManager = Rc<RefCell<UserInstCounterManager>>;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserInstCounterManager {
    user: u64,
    non_user: u64,
}

impl UserInstCounterManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedUserInstManager {
        Rc::new(RefCell::new(self))
    }

    pub fn user_inst_count(&self) -> u64 {
        self.user
    }

    pub fn non_user_inst_count(&self) -> u64 {
        self.non_user
    }

    pub fn increase_user(&mut self) {
        self.user += 1;
    }

    pub fn increase_non_user(&mut self) {
        self.non_user += 1;
    }

    pub fn reset(&mut self) {
        self.user = 0;
        self.non_user = 0;
    }
}

/// Splits committed instructions into user and non-user ones.
#[derive(Debug)]
pub struct UserInstCounter {
    manager: SharedUserInstManager,
    state: ListenState,
}

impl UserInstCounter {
    pub fn new(
        manager: Option<SharedUserInstManager>,
        start_listening: bool,
    ) -> Result<Self, ConfigError> {
        let manager = manager.ok_or(ConfigError::MissingManager {
            probe: "UserInstCounter",
            manager: "UserInstCounterManager",
        })?;

        Ok(Self {
            manager,
            state: ListenState::from_start(start_listening),
        })
    }
}

impl ProbeListener for UserInstCounter {
    fn name(&self) -> &'static str {
        "UserInstCounter"
    }

    fn listen_state(&self) -> ListenState {
        self.state
    }

    fn set_listen_state(&mut self, state: ListenState) {
        self.state = state;
    }

    fn commit(&mut self, event: &CommitEvent) {
        let mut manager = self.manager.borrow_mut();
        if event.is_user_mode() {
            manager.increase_user();
        } else {
            manager.increase_non_user();
        }
    }
}
