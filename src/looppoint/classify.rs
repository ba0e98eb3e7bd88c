use std::collections::{BTreeSet, HashMap};

/// What a PC turned out to be the first time it was committed.
///
/// A PC that was never seen has no entry at all. Once an entry exists it
/// is never changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PcClass {
    /// Failed a mode or address filter. Never counted.
    Rejected,
    /// Counted, but does not end a basic block.
    ValidMidBlock,
    /// Ends a basic block.
    BlockEnd,
    /// Ends a basic block and marks a loop iteration.
    BackwardBranch,
}

impl PcClass {
    pub fn is_counted(self) -> bool {
        self != PcClass::Rejected
    }

    pub fn is_block_end(self) -> bool {
        matches!(self, PcClass::BlockEnd | PcClass::BackwardBranch)
    }
}

/// Classification cache shared by every core.
#[derive(Clone, Debug, Default)]
pub struct PcTable {
    classes: HashMap<u64, PcClass>,
}

impl PcTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pc: u64) -> Option<PcClass> {
        self.classes.get(&pc).copied()
    }

    /// Records the class of a PC seen for the first time. An existing entry
    /// always wins, and the stored class is returned.
    pub fn insert(&mut self, pc: u64, class: PcClass) -> PcClass {
        *self.classes.entry(pc).or_insert(class)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn encountered(&self) -> BTreeSet<u64> {
        self.classes.keys().copied().collect()
    }

    /// PCs whose class satisfies `pred`, in address order.
    pub fn matching(&self, pred: impl Fn(PcClass) -> bool) -> BTreeSet<u64> {
        self.classes
            .iter()
            .filter(|(_, class)| pred(**class))
            .map(|(pc, _)| *pc)
            .collect()
    }
}
