use anyhow::bail;

/// Trait for word-addressed storage in the grid: private bank sets, mesh slices,
/// tile scratch buffers and the global store all sit behind it.
pub trait HasMemory {
    /// Number of addressable words.
    fn words(&self) -> usize;
    fn load_impl(&self, offset: usize) -> u64;
    fn store_impl(&mut self, offset: usize, value: u64);

    fn load(&self, offset: usize) -> Result<u64, anyhow::Error> {
        if offset >= self.words() {
            bail!("load @ {:#06x} outside store of {} words", offset, self.words());
        }
        Ok(self.load_impl(offset))
    }

    fn store(&mut self, offset: usize, value: u64) -> Result<(), anyhow::Error> {
        if offset >= self.words() {
            bail!("store @ {:#06x} outside store of {} words", offset, self.words());
        }
        self.store_impl(offset, value);
        Ok(())
    }
}
