pub mod bbv;
pub mod config;
pub mod counters;
pub mod event;
pub mod exit;
pub mod looppoint;
pub mod probe;
pub mod range;
pub mod trace;

pub use config::{AnalysisConfig, ConfigError};
pub use event::{CommitEvent, InstFlags, MemoryAccess, MemoryAccessKind};
pub use exit::ExitEvent;
pub use looppoint::{LoopPointSession, LooppointAnalysis, RegionManager, RegionSnapshot};
pub use probe::{ListenState, ProbeListener};
pub use range::AddrRange;
