//! Hardware ring queues and the ticketed push/pop protocol.
//!
//! A [`HwQueue`] couples a queue's register window (a byte offset inside
//! the DMA block) with the DMA-coherent ring memory backing it. Job and
//! completion rings share one protocol, built on the hardware's
//! ticket-dispense registers:
//!
//! * producers snapshot `WP`/`RP`, fail with [`Error::QueueFull`] when the
//!   ring is at capacity, then claim an exclusive slot by reading
//!   `LOAD_INCR_WP`, fill the slot in ring memory, and publish it with an
//!   ordered write of `ticket + 1` to `VALID_WP`;
//! * consumers mirror this with `RP`/`LOAD_INCR_RP`/`VALID_RP`.
//!
//! No software lock guards either path; mutual exclusion between
//! concurrent producers (or consumers) comes entirely from the
//! exactly-once ticket contract of [`Mmio::load_incr`]. Both paths must
//! not block or sleep: they run from interrupt and deferred contexts.
use crate::{
    mem::{CoherentMemory, DmaRegion},
    regs::{rx_chan, rx_jobq, tx_compq, tx_jobq, Mmio},
    Error, Result,
};
use core::sync::atomic::{fence, Ordering};

/// Producer-side register layout of a ring, as offsets within the queue's
/// register window.
#[derive(Copy, Clone, Debug)]
pub struct ProducerRegs {
    pub wp: u64,
    pub rp: u64,
    pub load_incr_wp: u64,
    pub valid_wp: u64,
}

/// Consumer-side register layout of a ring.
#[derive(Copy, Clone, Debug)]
pub struct ConsumerRegs {
    pub wp: u64,
    pub rp: u64,
    pub load_incr_rp: u64,
    pub valid_rp: u64,
}

/// RX job queue ring registers.
pub const RX_JOB_RING: ProducerRegs = ProducerRegs {
    wp: rx_jobq::WP,
    rp: rx_jobq::RP,
    load_incr_wp: rx_jobq::LOAD_INCR_WP,
    valid_wp: rx_jobq::VALID_WP,
};

/// TX job queue ring registers.
pub const TX_JOB_RING: ProducerRegs = ProducerRegs {
    wp: tx_jobq::WP,
    rp: tx_jobq::RP,
    load_incr_wp: tx_jobq::LOAD_INCR_WP,
    valid_wp: tx_jobq::VALID_WP,
};

/// RX channel completion ring registers (inside the RX channel window).
pub const RX_COMP_RING: ConsumerRegs = ConsumerRegs {
    wp: rx_chan::COMP_Q_WP,
    rp: rx_chan::COMP_Q_RP,
    load_incr_rp: rx_chan::COMP_Q_LOAD_INCR_RP,
    valid_rp: rx_chan::COMP_Q_VALID_RP,
};

/// TX completion ring registers.
pub const TX_COMP_RING: ConsumerRegs = ConsumerRegs {
    wp: tx_compq::WP,
    rp: tx_compq::RP,
    load_incr_rp: tx_compq::LOAD_INCR_RP,
    valid_rp: tx_compq::VALID_RP,
};

/// One hardware queue: an optional register window and optional ring
/// memory. Both empty means the queue is released.
#[derive(Debug, Default)]
pub struct HwQueue {
    io_base: Option<u64>,
    mem: Option<DmaRegion>,
}

impl HwQueue {
    /// An unallocated queue.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            io_base: None,
            mem: None,
        }
    }

    /// A queue with a register window but no ring memory (static-mode
    /// completion queues, NoC fifo channels).
    #[must_use]
    pub const fn window(io_base: u64) -> Self {
        Self {
            io_base: Some(io_base),
            mem: None,
        }
    }

    /// Allocates ring memory of `bytes` and binds it to the register
    /// window at `io_base` (when given).
    pub fn alloc<A: CoherentMemory>(alloc: &A, bytes: usize, io_base: Option<u64>) -> Result<Self> {
        let mem = alloc.alloc(bytes)?;
        Ok(Self {
            io_base,
            mem: Some(mem),
        })
    }

    /// Frees the ring memory and forgets the window. Safe to call on an
    /// already-released queue.
    pub fn release<A: CoherentMemory>(&mut self, alloc: &A) {
        if let Some(mem) = self.mem.take() {
            alloc.free(mem);
        }
        self.io_base = None;
    }

    /// Whether ring memory is currently allocated.
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.mem.is_some()
    }

    /// The register window, when bound.
    #[must_use]
    pub fn io_base(&self) -> Option<u64> {
        self.io_base
    }

    /// Bus address of the ring memory (0 when none).
    #[must_use]
    pub fn dma_addr(&self) -> u64 {
        self.mem.as_ref().map_or(0, DmaRegion::dma_addr)
    }

    fn window_base(&self) -> Result<u64> {
        self.io_base.ok_or(Error::InvalidArgument)
    }

    /// Enqueues one slot of `words` into the ring. Must not sleep.
    ///
    /// `size_log2` is the ring's slot-count log2, `words.len()` its slot
    /// stride. Returns `ticket + 1`, the caller-visible job id compared
    /// against the completion counter later.
    pub fn push<M: Mmio>(
        &self,
        mmio: &M,
        ring: &ProducerRegs,
        size_log2: u32,
        words: &[u64],
    ) -> Result<u64> {
        let base = self.window_base()?;
        let mem = self.mem.as_ref().ok_or(Error::InvalidArgument)?;
        let capacity = 1u64 << size_log2;

        // Advisory snapshots; the ticket register below is the only
        // authoritative claim.
        let wp = mmio.read(base + ring.wp);
        let rp = mmio.read(base + ring.rp);
        if wp >= rp + capacity {
            return Err(Error::QueueFull);
        }

        let ticket = mmio.load_incr(base + ring.load_incr_wp);
        let slot = (ticket & (capacity - 1)) as usize * words.len();
        for (i, &word) in words.iter().enumerate() {
            mem.write_word(slot + i, word);
        }
        // Slot contents must be visible before the publish below.
        fence(Ordering::SeqCst);
        mmio.write(base + ring.valid_wp, ticket + 1);

        Ok(ticket + 1)
    }

    /// Dequeues the oldest unconsumed slot into `out`. Non-blocking.
    ///
    /// Returns `Ok(None)` when no completion is pending, and
    /// [`Error::QueueFull`] when the producer has lapped the ring
    /// (completions were lost).
    pub fn pop<M: Mmio>(
        &self,
        mmio: &M,
        ring: &ConsumerRegs,
        size_log2: u32,
        out: &mut [u64],
    ) -> Result<Option<u64>> {
        let base = self.window_base()?;
        let mem = self.mem.as_ref().ok_or(Error::InvalidArgument)?;
        let capacity = 1u64 << size_log2;

        let wp = mmio.read(base + ring.wp);
        let rp = mmio.read(base + ring.rp);
        if rp >= wp {
            return Ok(None);
        }
        if wp > rp + capacity {
            return Err(Error::QueueFull);
        }

        let ticket = mmio.load_incr(base + ring.load_incr_rp);
        let slot = (ticket & (capacity - 1)) as usize * out.len();
        // The device may still be completing its store to this slot.
        fence(Ordering::SeqCst);
        for (i, word) in out.iter_mut().enumerate() {
            *word = mem.read_word(slot + i);
        }
        mmio.write(base + ring.valid_rp, ticket + 1);

        Ok(Some(ticket + 1))
    }
}
