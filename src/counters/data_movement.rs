//! Memory traffic per address pair, plus a plain basic block profile that
//! closes an interval every `interval_length` instructions.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{debug, trace};

use crate::{
    bbv::BlockVector,
    event::{CommitEvent, MemoryAccess, MemoryAccessKind},
    exit::{ExitEvent, ExitSignal},
    probe::{ListenState, ProbeListener},
};

pub type PairCounts = HashMap<(u64, u64), u64>;

#[derive(Debug)]
pub struct DataMovementTracker {
    interval_length: u64,
    interval_count: u64,
    block_inst_count: u64,
    state: ListenState,

    read_vaddr_paddr: PairCounts,
    write_vaddr_paddr: PairCounts,
    read_vaddr_pc: PairCounts,
    write_vaddr_pc: PairCounts,
    blocks: BlockVector,

    exit: ExitSignal,
}

/// Serializable view of a [`DataMovementTracker`]. Pair keys are written as
/// `vaddr&other` in hex.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DataMovementReport {
    pub interval_count: u64,
    pub read_vaddr_paddr: BTreeMap<String, u64>,
    pub write_vaddr_paddr: BTreeMap<String, u64>,
    pub read_vaddr_pc: BTreeMap<String, u64>,
    pub write_vaddr_pc: BTreeMap<String, u64>,
    pub basic_block_count: BTreeMap<u64, u64>,
    pub basic_block_inst_profile: BTreeMap<u64, u64>,
}

pub fn pair_key(first: u64, second: u64) -> String {
    format!("{:x}&{:x}", first, second)
}

fn keyed(counts: &PairCounts) -> BTreeMap<String, u64> {
    counts
        .iter()
        .map(|((a, b), count)| (pair_key(*a, *b), *count))
        .collect()
}

impl DataMovementTracker {
    pub fn new(interval_length: u64, start_listening: bool, exits: flume::Sender<ExitEvent>) -> Self {
        debug!("interval length: {}", interval_length);
        debug!("start listening: {}", start_listening);

        Self {
            interval_length,
            interval_count: 0,
            block_inst_count: 0,
            state: ListenState::from_start(start_listening),
            read_vaddr_paddr: HashMap::new(),
            write_vaddr_paddr: HashMap::new(),
            read_vaddr_pc: HashMap::new(),
            write_vaddr_pc: HashMap::new(),
            blocks: BlockVector::new(),
            exit: ExitSignal::new(exits),
        }
    }

    pub fn read_vaddr_paddr(&self) -> &PairCounts {
        &self.read_vaddr_paddr
    }

    pub fn write_vaddr_paddr(&self) -> &PairCounts {
        &self.write_vaddr_paddr
    }

    pub fn read_vaddr_pc(&self) -> &PairCounts {
        &self.read_vaddr_pc
    }

    pub fn write_vaddr_pc(&self) -> &PairCounts {
        &self.write_vaddr_pc
    }

    /// Execution counts and first-seen lengths per block end.
    pub fn blocks(&self) -> &BlockVector {
        &self.blocks
    }

    pub fn interval_count(&self) -> u64 {
        self.interval_count
    }

    pub fn clear_read_vaddr_paddr(&mut self) {
        self.read_vaddr_paddr.clear();
    }

    pub fn clear_write_vaddr_paddr(&mut self) {
        self.write_vaddr_paddr.clear();
    }

    pub fn clear_read_vaddr_pc(&mut self) {
        self.read_vaddr_pc.clear();
    }

    pub fn clear_write_vaddr_pc(&mut self) {
        self.write_vaddr_pc.clear();
    }

    pub fn clear_block_counts(&mut self) {
        self.blocks.clear();
    }

    /// Also re-arms the interval signal.
    pub fn clear_interval_count(&mut self) {
        self.interval_count = 0;
        self.exit.rearm();
    }

    pub fn report(&self) -> DataMovementReport {
        DataMovementReport {
            interval_count: self.interval_count,
            read_vaddr_paddr: keyed(&self.read_vaddr_paddr),
            write_vaddr_paddr: keyed(&self.write_vaddr_paddr),
            read_vaddr_pc: keyed(&self.read_vaddr_pc),
            write_vaddr_pc: keyed(&self.write_vaddr_pc),
            basic_block_count: self.blocks.sorted_counts(),
            basic_block_inst_profile: self.blocks.sorted_lengths(),
        }
    }
}

impl ProbeListener for DataMovementTracker {
    fn name(&self) -> &'static str {
        "DataMovementTracker"
    }

    fn listen_state(&self) -> ListenState {
        self.state
    }

    fn set_listen_state(&mut self, state: ListenState) {
        self.state = state;
    }

    fn commit(&mut self, event: &CommitEvent) {
        self.block_inst_count += 1;
        self.interval_count += 1;

        if !event.is_control() {
            return;
        }

        self.blocks.finalize(event.pc, self.block_inst_count);
        self.block_inst_count = 0;
        trace!("interval count: {}", self.interval_count);

        if self.interval_count >= self.interval_length {
            self.exit.fire(ExitEvent::IntervalReached {
                inst_count: self.interval_count,
            });
        }
    }

    fn memory_access(&mut self, access: &MemoryAccess) {
        let (by_paddr, by_pc) = match access.kind {
            MemoryAccessKind::Read => (&mut self.read_vaddr_paddr, &mut self.read_vaddr_pc),
            MemoryAccessKind::Write => (&mut self.write_vaddr_paddr, &mut self.write_vaddr_pc),
        };

        *by_paddr.entry((access.vaddr, access.paddr)).or_insert(0) += 1;
        *by_pc.entry((access.vaddr, access.pc)).or_insert(0) += 1;
    }
}
