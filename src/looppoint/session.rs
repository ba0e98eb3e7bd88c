use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use super::{
    analysis::LooppointAnalysis,
    manager::{RegionManager, SharedManager},
};
use crate::{
    config::{AnalysisConfig, ConfigError},
    event::CommitEvent,
    exit::ExitEvent,
    probe::ProbeListener,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MarkerStats {
    pub count: u64,
    pub disassembly: String,
}

/// Everything collected for one region, ready to be serialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RegionSnapshot {
    pub region: usize,
    pub global_inst_count: u64,
    pub marker_pc: u64,
    pub bbv: BTreeMap<u64, u64>,
    pub block_lengths: BTreeMap<u64, u64>,
    pub markers: BTreeMap<u64, MarkerStats>,
    pub local_bbvs: Vec<BTreeMap<u64, u64>>,
}

/// One manager plus one observer per core, all configured alike.
pub struct LoopPointSession {
    manager: SharedManager,
    cores: Vec<LooppointAnalysis>,
    region: usize,
}

impl LoopPointSession {
    pub fn new(config: &AnalysisConfig, exits: flume::Sender<ExitEvent>) -> Result<Self, ConfigError> {
        config.validate()?;

        let manager = RegionManager::new(config.region_length, exits).into_shared();
        let cores = (0..config.cores)
            .map(|_| {
                LooppointAnalysis::builder()
                    .manager(manager.clone())
                    .config(config)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "loop-point analysis on {} cores, region length {}",
            cores.len(),
            config.region_length
        );

        Ok(Self {
            manager,
            cores,
            region: 0,
        })
    }

    pub fn manager(&self) -> &SharedManager {
        &self.manager
    }

    pub fn cores(&self) -> &[LooppointAnalysis] {
        &self.cores
    }

    pub fn core_mut(&mut self, core: usize) -> Option<&mut LooppointAnalysis> {
        self.cores.get_mut(core)
    }

    /// Index of the region currently being collected.
    pub fn region(&self) -> usize {
        self.region
    }

    pub fn start_listening(&mut self) {
        for core in &mut self.cores {
            core.start_listening();
        }
    }

    pub fn stop_listening(&mut self) {
        for core in &mut self.cores {
            core.stop_listening();
        }
    }

    /// Routes a commit to its core's observer. Returns false for an
    /// unknown core.
    pub fn on_commit(&mut self, core: usize, event: &CommitEvent) -> bool {
        match self.cores.get_mut(core) {
            Some(analysis) => {
                analysis.on_commit(event);
                true
            }
            None => {
                warn!("commit for unknown core {}", core);
                false
            }
        }
    }

    pub fn boundary_reached(&self) -> bool {
        self.manager.borrow().boundary_reached()
    }

    pub fn snapshot(&self) -> RegionSnapshot {
        let manager = self.manager.borrow();

        let markers = manager
            .markers()
            .into_iter()
            .map(|(pc, (count, text))| {
                (
                    pc,
                    MarkerStats {
                        count,
                        disassembly: text.to_string(),
                    },
                )
            })
            .collect();

        RegionSnapshot {
            region: self.region,
            global_inst_count: manager.global_inst_count(),
            marker_pc: manager.most_recent_pc(),
            bbv: manager.global_bbv().sorted_counts(),
            block_lengths: manager.global_bbv().sorted_lengths(),
            markers,
            local_bbvs: self
                .cores
                .iter()
                .map(|core| core.local_bbv().sorted_counts())
                .collect(),
        }
    }

    /// Snapshots the current region and resets the per-region tables so
    /// the next boundary can fire.
    pub fn next_region(&mut self) -> RegionSnapshot {
        let snapshot = self.snapshot();

        {
            let mut manager = self.manager.borrow_mut();
            manager.clear_global_bbv();
            manager.clear_global_inst();
            manager.clear_backward_branch_counts();
        }
        for core in &mut self.cores {
            core.clear_local_bbv();
        }

        self.region += 1;
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::LoopPointSession;
    use crate::{config::AnalysisConfig, event::CommitEvent, exit::ExitEvent};

    fn run_loop(session: &mut LoopPointSession, core: usize, top: u64, iterations: usize) {
        for _ in 0..iterations {
            for pc in (top..top + 0x10).step_by(4) {
                session.on_commit(core, &CommitEvent::new(pc));
            }
            session.on_commit(core, &CommitEvent::new(top + 0x10).direct_branch(top));
        }
    }

    #[test]
    fn regions() {
        let config = AnalysisConfig {
            region_length: 20,
            cores: 2,
            ..Default::default()
        };
        let (tx, rx) = flume::unbounded();
        let mut session = LoopPointSession::new(&config, tx).unwrap();

        run_loop(&mut session, 0, 0x1000, 2);
        run_loop(&mut session, 1, 0x2000, 2);

        assert!(session.boundary_reached());
        assert!(matches!(
            rx.try_recv(),
            Ok(ExitEvent::RegionBoundary {
                pc: 0x2010,
                inst_count: 20
            })
        ));

        let first = session.next_region();
        assert_eq!(first.region, 0);
        assert_eq!(first.global_inst_count, 20);
        assert_eq!(first.marker_pc, 0x2010);
        assert_eq!(first.bbv[&0x1010], 2);
        assert_eq!(first.bbv[&0x2010], 2);
        assert_eq!(first.block_lengths[&0x1010], 5);
        assert_eq!(first.markers[&0x1010].count, 2);
        assert_eq!(first.local_bbvs.len(), 2);
        assert_eq!(first.local_bbvs[0].get(&0x2010), None);

        assert!(!session.boundary_reached());
        run_loop(&mut session, 0, 0x1000, 1);

        let second = session.snapshot();
        assert_eq!(session.region(), 1);
        assert_eq!(second.region, 1);
        assert_eq!(second.global_inst_count, 5);
        assert_eq!(second.bbv.len(), 1);
        assert_eq!(second.local_bbvs[1].len(), 0);
        // lengths are kept across regions
        assert_eq!(second.block_lengths[&0x2010], 5);
    }

    #[test]
    fn unknown_core() {
        let (tx, _rx) = flume::unbounded();
        let mut session = LoopPointSession::new(&AnalysisConfig::default(), tx).unwrap();
        assert!(!session.on_commit(3, &CommitEvent::new(0)));
        assert!(session.on_commit(0, &CommitEvent::new(0)));

        assert!(session.core_mut(3).is_none());
        let core = session.core_mut(0).unwrap();
        assert_eq!(core.block_inst_count(), 1);
        assert_eq!(session.cores().len(), 1);
    }

    #[test]
    fn listening_fans_out() {
        let config = AnalysisConfig {
            start_listening: false,
            cores: 3,
            ..Default::default()
        };
        let (tx, _rx) = flume::unbounded();
        let mut session = LoopPointSession::new(&config, tx).unwrap();

        session.on_commit(1, &CommitEvent::new(0));
        assert_eq!(session.manager().borrow().global_inst_count(), 0);

        session.start_listening();
        session.on_commit(1, &CommitEvent::new(0));
        session.on_commit(2, &CommitEvent::new(0));
        assert_eq!(session.manager().borrow().global_inst_count(), 2);

        session.stop_listening();
        session.on_commit(0, &CommitEvent::new(0));
        assert_eq!(session.manager().borrow().global_inst_count(), 2);
    }

    #[test]
    fn snapshot_serializes() {
        let (tx, _rx) = flume::unbounded();
        let mut session = LoopPointSession::new(&AnalysisConfig::default(), tx).unwrap();
        session.on_commit(0, &CommitEvent::new(0x10).direct_branch(0x0).with_disassembly("b 0x0"));

        let json = serde_json::to_value(session.snapshot()).unwrap();
        assert_eq!(json["bbv"]["16"], 1);
        assert_eq!(json["markers"]["16"]["disassembly"], "b 0x0");
    }
}
