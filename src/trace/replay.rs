//! Drives a trace through a [`LoopPointSession`] and the counters, reacting
//! to their exit events the way a simulator host would.

use std::io::BufRead;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::{TraceError, TraceReader, TraceRecord};
use crate::{
    config::{AnalysisConfig, ConfigError},
    counters::{
        global_inst::DEFAULT_UPDATE_THRESHOLD, DataMovementReport, DataMovementTracker,
        GlobalInstCounter, LocalInstCounter, SharedGlobalCounter, SharedUserInstManager,
        UserInstCounter, UserInstCounterManager,
    },
    event::CommitEvent,
    exit::ExitEvent,
    looppoint::{LoopPointSession, RegionSnapshot},
    probe::ProbeListener,
};

pub const DEFAULT_INTERVAL: u64 = 10_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Instructions per data movement interval.
    pub interval: u64,
    /// Global instruction count that raises `TargetReached`.
    pub inst_target: u64,
    /// Batch size of the per-core instruction counters.
    pub update_threshold: u64,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            inst_target: u64::MAX,
            update_threshold: DEFAULT_UPDATE_THRESHOLD,
        }
    }
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("bad analysis config")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Trace(#[from] TraceError),
}

#[derive(Clone, Debug, Serialize)]
pub struct Report {
    pub instructions: u64,
    pub user_instructions: u64,
    pub non_user_instructions: u64,
    pub target_hits: u64,
    pub intervals: u64,
    pub regions: Vec<RegionSnapshot>,
    pub data_movement: Vec<DataMovementReport>,
}

/// The simpler probes attached to one core.
struct CoreProbes {
    insts: LocalInstCounter,
    user: UserInstCounter,
    data: DataMovementTracker,
}

impl CoreProbes {
    fn new(
        global: &SharedGlobalCounter,
        users: &SharedUserInstManager,
        options: &ReplayOptions,
        start_listening: bool,
        exits: flume::Sender<ExitEvent>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            insts: LocalInstCounter::new(global.clone(), options.update_threshold, start_listening),
            user: UserInstCounter::new(Some(users.clone()), start_listening)?,
            data: DataMovementTracker::new(options.interval, start_listening, exits),
        })
    }

    fn commit(&mut self, event: &CommitEvent) {
        self.insts.on_commit(event);
        self.user.on_commit(event);
        self.data.on_commit(event);
    }
}

/// A session plus per-core counters, all signalling on one channel.
pub struct Replayer {
    session: LoopPointSession,
    global: SharedGlobalCounter,
    users: SharedUserInstManager,
    probes: Vec<CoreProbes>,
    exits: flume::Receiver<ExitEvent>,
    interval: u64,

    regions: Vec<RegionSnapshot>,
    target_hits: u64,
    intervals: u64,
}

impl Replayer {
    pub fn new(config: &AnalysisConfig, options: &ReplayOptions) -> Result<Self, ConfigError> {
        let (tx, rx) = flume::unbounded();

        let session = LoopPointSession::new(config, tx.clone())?;
        let global = GlobalInstCounter::new(options.inst_target, tx.clone()).into_shared();
        let users = UserInstCounterManager::new().into_shared();
        let probes = (0..config.cores)
            .map(|_| CoreProbes::new(&global, &users, options, config.start_listening, tx.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            session,
            global,
            users,
            probes,
            exits: rx,
            interval: options.interval,
            regions: Vec::new(),
            target_hits: 0,
            intervals: 0,
        })
    }

    pub fn session(&self) -> &LoopPointSession {
        &self.session
    }

    pub fn global(&self) -> &SharedGlobalCounter {
        &self.global
    }

    /// Regions closed so far.
    pub fn regions(&self) -> &[RegionSnapshot] {
        &self.regions
    }

    /// Feeds one record, then handles whatever it signalled.
    pub fn record(&mut self, record: TraceRecord) {
        match record {
            TraceRecord::Commit { core, event } => {
                if self.session.on_commit(core, &event) {
                    self.probes[core].commit(&event);
                }
            }
            TraceRecord::Memory { core, access } => match self.probes.get_mut(core) {
                Some(probes) => probes.data.on_memory_access(&access),
                None => warn!("memory access for unknown core {}", core),
            },
        }

        while let Ok(exit) = self.exits.try_recv() {
            self.handle(exit);
        }
    }

    fn handle(&mut self, exit: ExitEvent) {
        match exit {
            ExitEvent::RegionBoundary { .. } => {
                let snapshot = self.session.next_region();
                self.regions.push(snapshot);
            }
            ExitEvent::TargetReached { .. } => {
                self.target_hits += 1;
                self.global.borrow_mut().clear();
            }
            ExitEvent::IntervalReached { .. } => {
                self.intervals += 1;
                // the event does not say which core, re-arm every tracker past its interval
                let interval = self.interval;
                for probes in self
                    .probes
                    .iter_mut()
                    .filter(|probes| probes.data.interval_count() >= interval)
                {
                    probes.data.clear_interval_count();
                }
            }
        }
    }

    /// Closes the last, partial region and builds the report.
    pub fn finish(mut self) -> Report {
        let pending = self.session.manager().borrow().global_inst_count() > 0;
        if pending {
            let snapshot = self.session.next_region();
            self.regions.push(snapshot);
        }

        let users = self.users.borrow();
        Report {
            instructions: users.user_inst_count() + users.non_user_inst_count(),
            user_instructions: users.user_inst_count(),
            non_user_instructions: users.non_user_inst_count(),
            target_hits: self.target_hits,
            intervals: self.intervals,
            data_movement: self.probes.iter().map(|probes| probes.data.report()).collect(),
            regions: self.regions,
        }
    }
}

/// Replays a whole trace. Stops at the first malformed line.
pub fn replay<R: BufRead>(
    config: &AnalysisConfig,
    options: &ReplayOptions,
    reader: R,
) -> Result<Report, ReplayError> {
    let mut replayer = Replayer::new(config, options)?;

    let mut records = TraceReader::new(reader);
    for record in records.by_ref() {
        replayer.record(record?);
    }
    info!("replayed {} lines", records.line());

    Ok(replayer.finish())
}
