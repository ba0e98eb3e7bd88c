//! Simpler probes: instruction tallies and memory traffic.

pub mod data_movement;
pub mod global_inst;
pub mod user_inst;

pub use data_movement::{DataMovementReport, DataMovementTracker};
pub use global_inst::{GlobalInstCounter, LocalInstCounter, SharedGlobalCounter};
pub use user_inst::{SharedUserInstManager, UserInstCounter, UserInstCounterManager};
