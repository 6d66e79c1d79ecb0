use crate::base::mem::HasMemory;

/// Flat word array backing one memory region: a core's private bank set, a mesh L2
/// slice, a tile scratch buffer or the global store. Pure storage; whoever owns it
/// does the arbitration. Every word resets to 0.
#[derive(Debug, Clone)]
pub struct MemorySliceStore {
    words: Vec<u64>,
    mask: u64,
}

impl HasMemory for MemorySliceStore {
    fn words(&self) -> usize {
        self.words.len()
    }

    fn load_impl(&self, offset: usize) -> u64 {
        self.words[offset]
    }

    fn store_impl(&mut self, offset: usize, value: u64) {
        // stores truncate to the configured data width
        self.words[offset] = value & self.mask;
    }
}

impl MemorySliceStore {
    pub fn new(size: usize, mask: u64) -> Self {
        Self {
            words: vec![0u64; size],
            mask,
        }
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.words
    }

    pub fn reset(&mut self) {
        self.words.fill(0);
    }
}
