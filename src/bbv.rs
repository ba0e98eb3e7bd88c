//! Basic block vectors.

use std::collections::{BTreeMap, HashMap};

/// Execution counts per basic block, keyed by the PC of the block's last
/// instruction, along with the length each block had the first time it
/// was seen.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockVector {
    counts: HashMap<u64, u64>,
    lengths: HashMap<u64, u64>,
}

impl BlockVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one execution of the block ending at `pc`. The length is only
    /// kept from the first time the block is seen.
    pub fn finalize(&mut self, pc: u64, length: u64) {
        *self.counts.entry(pc).or_insert(0) += 1;
        self.lengths.entry(pc).or_insert(length);
    }

    pub fn count(&self, pc: u64) -> u64 {
        self.counts.get(&pc).copied().unwrap_or(0)
    }

    pub fn length(&self, pc: u64) -> Option<u64> {
        self.lengths.get(&pc).copied()
    }

    pub fn counts(&self) -> &HashMap<u64, u64> {
        &self.counts
    }

    pub fn lengths(&self) -> &HashMap<u64, u64> {
        &self.lengths
    }

    /// Number of distinct blocks with a nonzero count.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Instructions covered by the counted executions.
    pub fn weighted_instructions(&self) -> u64 {
        self.counts
            .iter()
            .map(|(pc, count)| count * self.length(*pc).unwrap_or(0))
            .sum()
    }

    pub fn sorted_counts(&self) -> BTreeMap<u64, u64> {
        self.counts.iter().map(|(pc, count)| (*pc, *count)).collect()
    }

    pub fn sorted_lengths(&self) -> BTreeMap<u64, u64> {
        self.lengths.iter().map(|(pc, len)| (*pc, *len)).collect()
    }

    /// Clears the execution counts. Lengths stay, a block does not change
    /// size between regions.
    pub fn clear(&mut self) {
        self.counts.clear();
    }

    pub fn clear_lengths(&mut self) {
        self.lengths.clear();
    }
}
