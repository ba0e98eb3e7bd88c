use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet, HashMap},
    rc::Rc,
};

use tracing::{debug, trace};

use super::classify::{PcClass, PcTable};
use crate::{
    bbv::BlockVector,
    exit::{ExitEvent, ExitSignal},
};

/// The manager is owned by the host and handed to every core's observer.
/// `Rc<RefCell<..>>` keeps it on one thread, so updates from different
/// cores can never overlap.
pub type SharedManager = Rc<RefCell<RegionManager>>;

/// Global state for loop-point analysis: the classification cache, the
/// global basic block vector, marker tallies and the region length check.
#[derive(Debug)]
pub struct RegionManager {
    pcs: PcTable,
    bbv: BlockVector,
    backward_branch_counts: HashMap<u64, u64>,
    disassembly: HashMap<u64, String>,
    region_length: u64,
    global_inst_count: u64,
    most_recent_pc: u64,
    exit: ExitSignal,
}

impl RegionManager {
    pub fn new(region_length: u64, exits: flume::Sender<ExitEvent>) -> Self {
        debug!("region length = {}", region_length);

        Self {
            pcs: PcTable::new(),
            bbv: BlockVector::new(),
            backward_branch_counts: HashMap::new(),
            disassembly: HashMap::new(),
            region_length,
            global_inst_count: 0,
            most_recent_pc: 0,
            exit: ExitSignal::new(exits),
        }
    }

    pub fn into_shared(self) -> SharedManager {
        Rc::new(RefCell::new(self))
    }

    pub fn classification(&self, pc: u64) -> Option<PcClass> {
        self.pcs.get(pc)
    }

    /// Stores the class of a newly seen PC, returning whatever is stored.
    pub fn record_classification(&mut self, pc: u64, class: PcClass) -> PcClass {
        self.pcs.insert(pc, class)
    }

    /// Keeps the first disassembly seen for a marker PC.
    pub fn record_disassembly(&mut self, pc: u64, text: String) {
        self.disassembly.entry(pc).or_insert(text);
    }

    pub fn record_global_instruction(&mut self) {
        self.global_inst_count += 1;
    }

    pub fn finalize_global_block(&mut self, pc: u64, length: u64) {
        self.bbv.finalize(pc, length);
    }

    /// Counts a marker execution and checks the region length. Returns
    /// true when this call sent the region boundary.
    pub fn tally_backward_branch(&mut self, pc: u64) -> bool {
        *self.backward_branch_counts.entry(pc).or_insert(0) += 1;
        self.most_recent_pc = pc;

        trace!(
            "marker {:#x} at {} instructions",
            pc,
            self.global_inst_count
        );

        if self.global_inst_count >= self.region_length {
            return self.exit.fire(ExitEvent::RegionBoundary {
                pc,
                inst_count: self.global_inst_count,
            });
        }

        false
    }

    pub fn global_inst_count(&self) -> u64 {
        self.global_inst_count
    }

    pub fn region_length(&self) -> u64 {
        self.region_length
    }

    pub fn set_region_length(&mut self, region_length: u64) {
        debug!("region length = {}", region_length);
        self.region_length = region_length;
    }

    pub fn most_recent_pc(&self) -> u64 {
        self.most_recent_pc
    }

    /// Whether the boundary fired and nobody reset the instruction count since.
    pub fn boundary_reached(&self) -> bool {
        self.exit.has_fired()
    }

    pub fn global_bbv(&self) -> &BlockVector {
        &self.bbv
    }

    pub fn block_lengths(&self) -> &HashMap<u64, u64> {
        self.bbv.lengths()
    }

    pub fn backward_branch_counts(&self) -> &HashMap<u64, u64> {
        &self.backward_branch_counts
    }

    pub fn disassembly(&self, pc: u64) -> Option<&str> {
        self.disassembly.get(&pc).map(String::as_str)
    }

    /// Marker tallies with their disassembly, in address order.
    pub fn markers(&self) -> BTreeMap<u64, (u64, &str)> {
        self.backward_branch_counts
            .iter()
            .map(|(pc, count)| (*pc, (*count, self.disassembly(*pc).unwrap_or(""))))
            .collect()
    }

    pub fn encountered_pcs(&self) -> BTreeSet<u64> {
        self.pcs.encountered()
    }

    pub fn valid_pcs(&self) -> BTreeSet<u64> {
        self.pcs.matching(|class| class == PcClass::ValidMidBlock)
    }

    pub fn block_end_pcs(&self) -> BTreeSet<u64> {
        self.pcs.matching(PcClass::is_block_end)
    }

    pub fn backward_branch_pcs(&self) -> BTreeSet<u64> {
        self.pcs.matching(|class| class == PcClass::BackwardBranch)
    }

    pub fn clear_global_bbv(&mut self) {
        self.bbv.clear();
    }

    /// Also re-arms the region boundary.
    pub fn clear_global_inst(&mut self) {
        self.global_inst_count = 0;
        self.exit.rearm();
    }

    pub fn clear_backward_branch_counts(&mut self) {
        self.backward_branch_counts.clear();
    }

    pub fn clear_block_lengths(&mut self) {
        self.bbv.clear_lengths();
    }
}
