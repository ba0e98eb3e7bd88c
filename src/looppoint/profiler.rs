use crate::bbv::BlockVector;

/// Per-core block accounting: the local basic block vector and the number
/// of instructions since this core's last block boundary.
#[derive(Clone, Debug, Default)]
pub struct LocalBlockProfiler {
    bbv: BlockVector,
    block_inst_count: u64,
}

impl LocalBlockProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_instruction(&mut self) {
        self.block_inst_count += 1;
    }

    /// Closes the block ending at `pc` and returns its length.
    pub fn finalize_block(&mut self, pc: u64) -> u64 {
        let length = self.block_inst_count;
        self.bbv.finalize(pc, length);
        self.block_inst_count = 0;
        length
    }

    pub fn block_inst_count(&self) -> u64 {
        self.block_inst_count
    }

    pub fn bbv(&self) -> &BlockVector {
        &self.bbv
    }

    pub fn clear(&mut self) {
        self.bbv.clear();
    }
}
