/// The last `N` readings, for running averages.
pub struct Window<const N: usize>(heapless::HistoryBuffer<u16, N>);

impl<const N: usize> Window<N> {
    pub const fn new() -> Self {
        Self(heapless::HistoryBuffer::new())
    }

    pub fn write(&mut self, value: u16) {
        self.0.write(value)
    }

    pub fn is_full(&self) -> bool {
        self.0.len() == N
    }

    pub fn clear(&mut self) {
        self.0.clear()
    }

    pub fn mean(&self) -> u16 {
        let len = self.0.len();
        if len == 0 {
            return 0;
        }

        let sum: u32 = self.0.as_slice().iter().map(|&v| v as u32).sum();
        (sum / len as u32) as u16
    }
}

impl<const N: usize> Default for Window<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> core::fmt::Debug for Window<N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.0.oldest_ordered()).finish()
    }
}
