use std::rc::Rc;

use tracing::{debug, trace};

use super::{
    classify::PcClass,
    manager::SharedManager,
    profiler::LocalBlockProfiler,
};
use crate::{
    bbv::BlockVector,
    config::{AnalysisConfig, ConfigError},
    event::CommitEvent,
    probe::{ListenState, ProbeListener},
    range::{AddrRange, AddressFilter},
};

/// Loop-point observer for one core.
///
/// Every PC is classified once, the first time any core commits it, and
/// the class is cached in the shared [`RegionManager`](super::RegionManager).
/// Later commits of the same PC only replay the cached class, the address
/// filters are never looked at again.
#[derive(Debug)]
pub struct LooppointAnalysis {
    manager: SharedManager,
    bb_filter: AddressFilter,
    marker_range: AddrRange,
    state: ListenState,
    profiler: LocalBlockProfiler,
    filter_evaluations: u64,
}

#[derive(Default)]
pub struct LooppointAnalysisBuilder {
    manager: Option<SharedManager>,
    bb_valid_range: AddrRange,
    marker_valid_range: AddrRange,
    bb_excluded_ranges: Vec<AddrRange>,
    start_listening: bool,
}

impl LooppointAnalysisBuilder {
    pub fn manager(mut self, manager: SharedManager) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn bb_valid_range(mut self, range: AddrRange) -> Self {
        self.bb_valid_range = range;
        self
    }

    pub fn marker_valid_range(mut self, range: AddrRange) -> Self {
        self.marker_valid_range = range;
        self
    }

    pub fn exclude(mut self, range: AddrRange) -> Self {
        self.bb_excluded_ranges.push(range);
        self
    }

    pub fn start_listening(mut self, start: bool) -> Self {
        self.start_listening = start;
        self
    }

    /// Takes everything but the manager from `config`.
    pub fn config(self, config: &AnalysisConfig) -> Self {
        Self {
            bb_valid_range: config.bb_valid_range,
            marker_valid_range: config.marker_valid_range,
            bb_excluded_ranges: config.bb_excluded_ranges.clone(),
            start_listening: config.start_listening,
            ..self
        }
    }

    pub fn build(self) -> Result<LooppointAnalysis, ConfigError> {
        let manager = self.manager.ok_or(ConfigError::MissingManager {
            probe: "LooppointAnalysis",
            manager: "RegionManager",
        })?;

        self.bb_valid_range.validate()?;
        self.marker_valid_range.validate()?;
        for range in &self.bb_excluded_ranges {
            range.validate()?;
            debug!("added excluded range {}", range);
        }

        debug!("start listening: {}", self.start_listening);
        debug!("{} excluded address ranges", self.bb_excluded_ranges.len());
        debug!("bb valid range = {}", self.bb_valid_range);
        debug!("marker valid range = {}", self.marker_valid_range);

        Ok(LooppointAnalysis {
            manager,
            bb_filter: AddressFilter::new(self.bb_valid_range, self.bb_excluded_ranges),
            marker_range: self.marker_valid_range,
            state: ListenState::from_start(self.start_listening),
            profiler: LocalBlockProfiler::new(),
            filter_evaluations: 0,
        })
    }
}

impl LooppointAnalysis {
    pub fn builder() -> LooppointAnalysisBuilder {
        LooppointAnalysisBuilder::default()
    }

    pub fn manager(&self) -> &SharedManager {
        &self.manager
    }

    pub fn shares_manager_with(&self, other: &LooppointAnalysis) -> bool {
        Rc::ptr_eq(&self.manager, &other.manager)
    }

    pub fn local_bbv(&self) -> &BlockVector {
        self.profiler.bbv()
    }

    pub fn clear_local_bbv(&mut self) {
        self.profiler.clear();
    }

    /// Instructions committed since this core's last block boundary.
    pub fn block_inst_count(&self) -> u64 {
        self.profiler.block_inst_count()
    }

    /// How many times this observer ran the address and mode filters.
    pub fn filter_evaluations(&self) -> u64 {
        self.filter_evaluations
    }

    fn check_pc(&mut self, event: &CommitEvent) {
        let pc = event.pc;

        let known = self.manager.borrow().classification(pc);
        let class = match known {
            Some(class) => class,
            None => self.classify(event),
        };

        self.replay(pc, class);
    }

    /// First encounter of `event.pc` anywhere.
    fn classify(&mut self, event: &CommitEvent) -> PcClass {
        let class = self.evaluate(event);
        trace!("classified {:#x} as {}", event.pc, class);

        let mut manager = self.manager.borrow_mut();
        let class = manager.record_classification(event.pc, class);
        if class == PcClass::BackwardBranch {
            let text = event.disassembly.clone().unwrap_or_default();
            manager.record_disassembly(event.pc, text);
        }

        class
    }

    fn evaluate(&mut self, event: &CommitEvent) -> PcClass {
        self.filter_evaluations += 1;

        if event.is_partial_microop() || !event.is_user_mode() {
            return PcClass::Rejected;
        }

        if !self.bb_filter.contains(event.pc) {
            return PcClass::Rejected;
        }

        if !event.is_control() {
            return PcClass::ValidMidBlock;
        }

        // the marker range only decides loop markers, the block is
        // accounted either way
        if event.is_backward_branch() && self.marker_range.admits(event.pc) {
            PcClass::BackwardBranch
        } else {
            PcClass::BlockEnd
        }
    }

    fn replay(&mut self, pc: u64, class: PcClass) {
        if !class.is_counted() {
            return;
        }

        let mut manager = self.manager.borrow_mut();
        manager.record_global_instruction();
        self.profiler.count_instruction();

        if class.is_block_end() {
            let length = self.profiler.finalize_block(pc);
            manager.finalize_global_block(pc, length);

            if class == PcClass::BackwardBranch {
                manager.tally_backward_branch(pc);
            }
        }
    }
}

impl ProbeListener for LooppointAnalysis {
    fn name(&self) -> &'static str {
        "LooppointAnalysis"
    }

    fn listen_state(&self) -> ListenState {
        self.state
    }

    fn set_listen_state(&mut self, state: ListenState) {
        self.state = state;
    }

    fn commit(&mut self, event: &CommitEvent) {
        self.check_pc(event);
    }
}

#[cfg(test)]
mod tests {
    use super::LooppointAnalysis;
    use crate::{
        config::ConfigError,
        event::CommitEvent,
        exit::ExitEvent,
        looppoint::{PcClass, RegionManager, SharedManager},
        probe::ProbeListener,
        range::AddrRange,
    };

    fn setup(region_length: u64) -> (SharedManager, flume::Receiver<ExitEvent>) {
        let (tx, rx) = flume::unbounded();
        (RegionManager::new(region_length, tx).into_shared(), rx)
    }

    fn observer(manager: &SharedManager) -> LooppointAnalysis {
        LooppointAnalysis::builder()
            .manager(manager.clone())
            .start_listening(true)
            .build()
            .unwrap()
    }

    /// PCs 100..=109, one byte each, with 109 branching back to 100.
    fn iteration(analysis: &mut LooppointAnalysis) {
        for pc in 100..109 {
            analysis.on_commit(&CommitEvent::new(pc).with_size(1));
        }
        analysis.on_commit(
            &CommitEvent::new(109)
                .with_size(1)
                .direct_branch(100)
                .with_disassembly("jmp 100"),
        );
    }

    #[test]
    fn missing_manager() {
        let err = LooppointAnalysis::builder().build().unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingManager {
                probe: "LooppointAnalysis",
                manager: "RegionManager"
            }
        );
    }

    #[test]
    fn classification_happens_once() {
        let (manager, _rx) = setup(1000);
        let mut analysis = observer(&manager);

        analysis.on_commit(&CommitEvent::new(0x10));
        assert_eq!(analysis.filter_evaluations(), 1);

        // the same pc now claims to be a backward branch, a kernel
        // instruction and a partial micro-op
        analysis.on_commit(&CommitEvent::new(0x10).direct_branch(0x0));
        analysis.on_commit(&CommitEvent::new(0x10).kernel());
        analysis.on_commit(&CommitEvent::new(0x10).microop(false));

        assert_eq!(analysis.filter_evaluations(), 1);
        assert_eq!(
            manager.borrow().classification(0x10),
            Some(PcClass::ValidMidBlock)
        );
        assert_eq!(manager.borrow().global_inst_count(), 4);
        assert!(manager.borrow().global_bbv().is_empty());
        assert_eq!(analysis.block_inst_count(), 4);
    }

    #[test]
    fn rejection_is_permanent() {
        let (manager, _rx) = setup(1000);
        let mut analysis = LooppointAnalysis::builder()
            .manager(manager.clone())
            .bb_valid_range(AddrRange::new(0x100, 0x200).unwrap())
            .start_listening(true)
            .build()
            .unwrap();

        analysis.on_commit(&CommitEvent::new(0x50));
        analysis.on_commit(&CommitEvent::new(0x150).kernel());
        analysis.on_commit(&CommitEvent::new(0x154).microop(false));

        for _ in 0..3 {
            analysis.on_commit(&CommitEvent::new(0x50));
            analysis.on_commit(&CommitEvent::new(0x150));
            analysis.on_commit(&CommitEvent::new(0x154).microop(true));
        }

        let manager = manager.borrow();
        assert_eq!(manager.global_inst_count(), 0);
        assert_eq!(analysis.block_inst_count(), 0);
        assert_eq!(manager.encountered_pcs().len(), 3);
        assert!(manager.valid_pcs().is_empty());
        assert_eq!(manager.classification(0x150), Some(PcClass::Rejected));
        assert_eq!(analysis.filter_evaluations(), 3);
    }

    #[test]
    fn exclusion_overrides_inclusion() {
        let (manager, _rx) = setup(1000);
        let mut analysis = LooppointAnalysis::builder()
            .manager(manager.clone())
            .bb_valid_range(AddrRange::new(0x100, 0x200).unwrap())
            .exclude(AddrRange::new(0x180, 0x190).unwrap())
            .start_listening(true)
            .build()
            .unwrap();

        analysis.on_commit(&CommitEvent::new(0x184));
        analysis.on_commit(&CommitEvent::new(0x194));

        let manager = manager.borrow();
        assert_eq!(manager.classification(0x184), Some(PcClass::Rejected));
        assert_eq!(manager.classification(0x194), Some(PcClass::ValidMidBlock));
        assert_eq!(manager.global_inst_count(), 1);
    }

    #[test]
    fn block_length_first_seen() {
        let (manager, _rx) = setup(1000);
        let mut analysis = observer(&manager);

        // 4 straight-line instructions then the block end: length 5
        for pc in [0x0, 0x4, 0x8, 0xc] {
            analysis.on_commit(&CommitEvent::new(pc));
        }
        analysis.on_commit(&CommitEvent::new(0x40).direct_branch(0x80));

        // reach the same block end through a longer path: length 7
        for pc in [0x100, 0x104, 0x108, 0x10c, 0x110, 0x114] {
            analysis.on_commit(&CommitEvent::new(pc));
        }
        analysis.on_commit(&CommitEvent::new(0x40).direct_branch(0x80));

        assert_eq!(analysis.local_bbv().count(0x40), 2);
        assert_eq!(analysis.local_bbv().length(0x40), Some(5));

        let manager = manager.borrow();
        assert_eq!(manager.global_bbv().count(0x40), 2);
        assert_eq!(manager.block_lengths()[&0x40], 5);
    }

    #[test]
    fn forward_branch_is_not_a_marker() {
        let (manager, _rx) = setup(1000);
        let mut analysis = observer(&manager);

        analysis.on_commit(&CommitEvent::new(0x40).direct_branch(0x44));
        analysis.on_commit(&CommitEvent::new(0x50).direct_branch(0x90));

        let manager = manager.borrow();
        assert_eq!(manager.classification(0x40), Some(PcClass::BlockEnd));
        assert_eq!(manager.classification(0x50), Some(PcClass::BlockEnd));
        assert!(manager.backward_branch_counts().is_empty());
    }

    #[test]
    fn indirect_branch_is_not_a_marker() {
        let (manager, _rx) = setup(1000);
        let mut analysis = observer(&manager);

        analysis.on_commit(&CommitEvent::new(0x40).indirect_branch());

        assert_eq!(manager.borrow().classification(0x40), Some(PcClass::BlockEnd));
        assert_eq!(manager.borrow().global_bbv().count(0x40), 1);
    }

    #[test]
    fn marker_range_only_gates_markers() {
        let (manager, _rx) = setup(1000);
        let mut analysis = LooppointAnalysis::builder()
            .manager(manager.clone())
            .marker_valid_range(AddrRange::new(0x1000, 0x2000).unwrap())
            .start_listening(true)
            .build()
            .unwrap();

        analysis.on_commit(&CommitEvent::new(0x40).direct_branch(0x10));
        analysis.on_commit(&CommitEvent::new(0x1040).direct_branch(0x1010));

        let manager = manager.borrow();
        assert_eq!(manager.classification(0x40), Some(PcClass::BlockEnd));
        assert_eq!(manager.global_bbv().count(0x40), 1);
        assert_eq!(
            manager.classification(0x1040),
            Some(PcClass::BackwardBranch)
        );
        assert_eq!(manager.backward_branch_counts()[&0x1040], 1);
    }

    #[test]
    fn loop_scenario() {
        let (manager, rx) = setup(25);
        let mut analysis = observer(&manager);

        iteration(&mut analysis);
        iteration(&mut analysis);
        assert_eq!(manager.borrow().global_inst_count(), 20);
        assert!(rx.is_empty());
        assert!(!manager.borrow().boundary_reached());

        iteration(&mut analysis);
        assert_eq!(
            rx.try_recv(),
            Ok(ExitEvent::RegionBoundary {
                pc: 109,
                inst_count: 30
            })
        );

        let manager = manager.borrow();
        assert_eq!(manager.global_inst_count(), 30);
        assert_eq!(manager.global_bbv().len(), 1);
        assert_eq!(manager.global_bbv().count(109), 3);
        assert_eq!(manager.block_lengths()[&109], 10);
        assert_eq!(manager.backward_branch_counts()[&109], 3);
        assert_eq!(manager.disassembly(109), Some("jmp 100"));
        assert_eq!(manager.most_recent_pc(), 109);
        assert_eq!(analysis.local_bbv().count(109), 3);
    }

    #[test]
    fn boundary_does_not_repeat_without_reset() {
        let (manager, rx) = setup(25);
        let mut analysis = observer(&manager);

        for _ in 0..6 {
            iteration(&mut analysis);
        }
        assert_eq!(rx.try_iter().count(), 1);

        manager.borrow_mut().clear_global_inst();
        for _ in 0..2 {
            iteration(&mut analysis);
        }
        assert!(rx.is_empty());
        iteration(&mut analysis);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn cores_share_classification() {
        let (manager, _rx) = setup(1000);
        let mut core0 = observer(&manager);
        let mut core1 = observer(&manager);
        assert!(core0.shares_manager_with(&core1));

        core0.on_commit(&CommitEvent::new(0x10));
        core0.on_commit(&CommitEvent::new(0x14).direct_branch(0x10));
        core1.on_commit(&CommitEvent::new(0x10));
        core1.on_commit(&CommitEvent::new(0x14).direct_branch(0x10));
        core1.on_commit(&CommitEvent::new(0x10));

        assert_eq!(core0.filter_evaluations(), 2);
        assert_eq!(core1.filter_evaluations(), 0);

        assert_eq!(core0.local_bbv().count(0x14), 1);
        assert_eq!(core1.local_bbv().count(0x14), 1);
        assert_eq!(core1.block_inst_count(), 1);

        let manager = manager.borrow();
        assert_eq!(manager.global_bbv().count(0x14), 2);
        assert_eq!(manager.backward_branch_counts()[&0x14], 2);
        assert_eq!(manager.global_inst_count(), 5);
    }

    #[test]
    fn stopped_observer_ignores_commits() {
        let (manager, _rx) = setup(1000);
        let mut analysis = LooppointAnalysis::builder()
            .manager(manager.clone())
            .build()
            .unwrap();
        assert!(!analysis.is_listening());

        analysis.on_commit(&CommitEvent::new(0x10));
        assert!(manager.borrow().encountered_pcs().is_empty());

        analysis.start_listening();
        analysis.start_listening();
        analysis.on_commit(&CommitEvent::new(0x10));
        assert_eq!(manager.borrow().global_inst_count(), 1);

        analysis.stop_listening();
        analysis.on_commit(&CommitEvent::new(0x10));
        assert_eq!(manager.borrow().global_inst_count(), 1);
    }

    #[test]
    fn clear_local_bbv_leaves_global() {
        let (manager, _rx) = setup(1000);
        let mut analysis = observer(&manager);

        analysis.on_commit(&CommitEvent::new(0x14).direct_branch(0x10));
        analysis.clear_local_bbv();

        assert!(analysis.local_bbv().is_empty());
        assert_eq!(manager.borrow().global_bbv().count(0x14), 1);
    }
}
