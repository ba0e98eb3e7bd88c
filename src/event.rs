//! The events a probe consumes: committed instructions and memory requests.
//!
//! Hosts translate whatever their core emits into these.

use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct InstFlags: u8 {
        const CONTROL = 1 << 0;
        /// Target is encoded in the instruction.
        const DIRECT = 1 << 1;
        const MICROOP = 1 << 2;
        const LAST_MICROOP = 1 << 3;
        const USER_MODE = 1 << 4;
    }
}

pub const DEFAULT_INST_SIZE: u64 = 4;

/// One retired instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitEvent {
    pub pc: u64,
    /// Length in bytes, used to find the next sequential address.
    pub size: u64,
    pub flags: InstFlags,
    /// Branch target, only meaningful for direct control instructions.
    pub target: u64,
    pub disassembly: Option<String>,
}

impl CommitEvent {
    /// A plain user-mode instruction.
    pub fn new(pc: u64) -> Self {
        Self {
            pc,
            size: DEFAULT_INST_SIZE,
            flags: InstFlags::USER_MODE,
            target: 0,
            disassembly: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn direct_branch(mut self, target: u64) -> Self {
        self.flags |= InstFlags::CONTROL | InstFlags::DIRECT;
        self.target = target;
        self
    }

    pub fn indirect_branch(mut self) -> Self {
        self.flags |= InstFlags::CONTROL;
        self.flags.remove(InstFlags::DIRECT);
        self
    }

    pub fn microop(mut self, last: bool) -> Self {
        self.flags |= InstFlags::MICROOP;
        self.flags.set(InstFlags::LAST_MICROOP, last);
        self
    }

    pub fn kernel(mut self) -> Self {
        self.flags.remove(InstFlags::USER_MODE);
        self
    }

    pub fn with_disassembly(mut self, text: impl Into<String>) -> Self {
        self.disassembly = Some(text.into());
        self
    }

    pub fn is_control(&self) -> bool {
        self.flags.contains(InstFlags::CONTROL)
    }

    pub fn is_direct(&self) -> bool {
        self.flags.contains(InstFlags::DIRECT)
    }

    pub fn is_user_mode(&self) -> bool {
        self.flags.contains(InstFlags::USER_MODE)
    }

    /// A micro-op that does not finish its macro-instruction.
    pub fn is_partial_microop(&self) -> bool {
        self.flags.contains(InstFlags::MICROOP) && !self.flags.contains(InstFlags::LAST_MICROOP)
    }

    /// `None` for the last instruction of the address space.
    pub fn next_pc(&self) -> Option<u64> {
        self.pc.checked_add(self.size)
    }

    /// Direct control transfer to an address below the next sequential one.
    /// Indirect targets are unknown here, so they never count.
    pub fn is_backward_branch(&self) -> bool {
        if !self.is_control() || !self.is_direct() {
            return false;
        }

        // past the top every address is below the next one
        match self.next_pc() {
            Some(next) => self.target < next,
            None => true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum MemoryAccessKind {
    Read,
    Write,
}

/// A memory request, with the translation the host already did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryAccess {
    pub kind: MemoryAccessKind,
    pub vaddr: u64,
    pub paddr: u64,
    /// PC of the instruction issuing the request.
    pub pc: u64,
}
