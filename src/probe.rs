use tracing::debug;

use crate::event::{CommitEvent, MemoryAccess};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ListenState {
    #[default]
    Stopped,
    Listening,
}

impl ListenState {
    pub fn from_start(start_listening: bool) -> Self {
        if start_listening {
            ListenState::Listening
        } else {
            ListenState::Stopped
        }
    }
}

/// Something the host notifies about committed instructions and memory
/// requests.
///
/// Hosts call [`ProbeListener::on_commit`] / [`ProbeListener::on_memory_access`];
/// those drop the event while the listener is stopped and otherwise hand
/// it to `commit` / `memory_access`.
pub trait ProbeListener {
    /// Short name, used in log lines.
    fn name(&self) -> &'static str;
    fn listen_state(&self) -> ListenState;
    fn set_listen_state(&mut self, state: ListenState);

    fn commit(&mut self, _event: &CommitEvent) {}
    fn memory_access(&mut self, _access: &MemoryAccess) {}

    fn is_listening(&self) -> bool {
        self.listen_state() == ListenState::Listening
    }

    fn start_listening(&mut self) {
        if !self.is_listening() {
            self.set_listen_state(ListenState::Listening);
            debug!("{}: start listening", self.name());
        }
    }

    fn stop_listening(&mut self) {
        if self.is_listening() {
            self.set_listen_state(ListenState::Stopped);
            debug!("{}: stop listening", self.name());
        }
    }

    fn on_commit(&mut self, event: &CommitEvent) {
        if self.is_listening() {
            self.commit(event);
        }
    }

    fn on_memory_access(&mut self, access: &MemoryAccess) {
        if self.is_listening() {
            self.memory_access(access);
        }
    }
}
