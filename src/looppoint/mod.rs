//! Basic block vector collection and loop-point region detection.

pub mod analysis;
pub mod classify;
pub mod manager;
pub mod profiler;
pub mod session;

pub use analysis::{LooppointAnalysis, LooppointAnalysisBuilder};
pub use classify::{PcClass, PcTable};
pub use manager::{RegionManager, SharedManager};
pub use profiler::LocalBlockProfiler;
pub use session::{LoopPointSession, MarkerStats, RegionSnapshot};
