//! Logic-side accumulation of render-sync instructions.

use pocket_protocol::{RenderBatch, RenderInstruction, SelectorQuery};

/// Collects the instructions one logic-realm turn emits for one page.
///
/// Instructions are kept in emission order and leave as a single batch when
/// the turn ends, rather than one message per instruction.
#[derive(Debug, Default)]
pub struct RenderBatcher {
    pending: Vec<RenderInstruction>,
    next_query_id: u64,
    flushes: u64,
}

impl RenderBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, instruction: RenderInstruction) {
        self.pending.push(instruction);
    }

    /// Queue a selector query and return the id its reply will carry.
    ///
    /// The query travels in the same batch as the mutations emitted before
    /// it, so it observes them.
    pub fn query(&mut self, queue: Vec<SelectorQuery>) -> u64 {
        let query_id = self.next_query_id;
        self.next_query_id += 1;
        self.push(RenderInstruction::RunSelectorQuery { query_id, queue });
        query_id
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Number of non-empty batches flushed so far.
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// End the turn: hand out everything accumulated, or `None` if the turn
    /// emitted nothing.
    pub fn flush(&mut self) -> Option<RenderBatch> {
        if self.pending.is_empty() {
            return None;
        }
        self.flushes += 1;
        Some(RenderBatch::new(std::mem::take(&mut self.pending)))
    }
}
