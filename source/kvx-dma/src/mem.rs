//! DMA-coherent memory seam.
//!
//! Ring buffers are shared with the device, so they must come from a
//! coherent allocator owned by the platform integration. The engine only
//! needs the narrow [`CoherentMemory`] interface; tests satisfy it from
//! the host heap.
use crate::Result;
use core::ptr::NonNull;

/// One DMA-coherent allocation: a CPU mapping plus the bus address the
/// hardware sees.
#[derive(Debug)]
pub struct DmaRegion {
    cpu: NonNull<u64>,
    dma_addr: u64,
    len_words: usize,
}

// Regions are plain memory handed between contexts under the owning
// queue's protocol; the CPU pointer is only dereferenced volatilely.
unsafe impl Send for DmaRegion {}
unsafe impl Sync for DmaRegion {}

impl DmaRegion {
    /// Builds a region from its raw parts.
    ///
    /// # Safety
    ///
    /// `cpu` must point to `len_words` 64-bit words of DMA-coherent
    /// memory reachable by the device at `dma_addr`, valid until the
    /// region is returned to its allocator.
    #[must_use]
    pub const unsafe fn from_raw_parts(cpu: NonNull<u64>, dma_addr: u64, len_words: usize) -> Self {
        Self {
            cpu,
            dma_addr,
            len_words,
        }
    }

    /// Bus address of the first word.
    #[must_use]
    pub fn dma_addr(&self) -> u64 {
        self.dma_addr
    }

    /// Region length in bytes.
    #[must_use]
    pub fn len_bytes(&self) -> usize {
        self.len_words * core::mem::size_of::<u64>()
    }

    /// Region length in 64-bit words.
    #[must_use]
    pub fn len_words(&self) -> usize {
        self.len_words
    }

    /// Volatile store of one word. The index is asserted in bounds; ring
    /// code derives it from a masked ticket, so it always is.
    #[inline]
    pub fn write_word(&self, index: usize, value: u64) {
        assert!(index < self.len_words);
        unsafe { self.cpu.as_ptr().add(index).write_volatile(value) }
    }

    /// Volatile load of one word.
    #[inline]
    #[must_use]
    pub fn read_word(&self, index: usize) -> u64 {
        assert!(index < self.len_words);
        unsafe { self.cpu.as_ptr().add(index).read_volatile() }
    }

    pub(crate) fn cpu_ptr(&self) -> NonNull<u64> {
        self.cpu
    }
}

/// Allocator for DMA-coherent ring memory.
pub trait CoherentMemory {
    /// Allocates a zeroed, naturally aligned coherent buffer of `bytes`
    /// (a multiple of 8).
    fn alloc(&self, bytes: usize) -> Result<DmaRegion>;

    /// Returns a region to the pool.
    fn free(&self, region: DmaRegion);
}


#[cfg(test)]
mod tests {
    use super::testing::HeapMemory;
    use super::*;
    use crate::Error;

    #[test]
    fn alloc_zeroed_and_tracked() {
        let heap = HeapMemory::new();
        let region = heap.alloc(64).unwrap();
        assert_eq!(region.len_words(), 8);
        assert_eq!(region.read_word(0), 0);
        region.write_word(7, 0xdead_beef);
        assert_eq!(region.read_word(7), 0xdead_beef);
        assert_eq!(heap.live(), 1);
        heap.free(region);
        assert_eq!(heap.live(), 0);
    }

    #[test]
    fn misaligned_request_is_invalid() {
        let heap = HeapMemory::new();
        assert_eq!(heap.alloc(12).unwrap_err(), Error::InvalidArgument);
    }
}
