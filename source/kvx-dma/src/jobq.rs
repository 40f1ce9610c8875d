//! Job-queue allocator: shares physical job queues across phys.
//!
//! The hardware exposes eight RX job queues for sixty-four RX channels;
//! each RX cache owns a pair of queues (driver refill at `2 * cache_id`,
//! hardware-only buffer recycle at `2 * cache_id + 1`), shared by every
//! channel on that cache. TX job queues are private to their phy. A
//! shared queue's ring memory is freed only when its last reservation is
//! released.
//!
//! The list carries its own spin lock, held only across the slot lookup
//! and reservation-count update; coherent ring allocation always runs
//! outside it. The returned [`Arc`]`<`[`HwQueue`]`>` handles are what
//! keep the hot push path free of any lock.
use crate::{
    desc::{RX_JOB_DESC_WORDS, TX_JOB_DESC_WORDS},
    mem::CoherentMemory,
    queue::HwQueue,
    regs::{rx_jobq, tx_jobq, RX_JOB_CACHE_NUMBER, RX_JOB_QUEUE_NUMBER, RX_JOB_QUEUE_PER_CACHE,
           TX_JOB_QUEUE_NUMBER},
    Error, Result,
};
use alloc::sync::Arc;
use maitake_sync::spin::Mutex;

#[derive(Default)]
struct RxSlot {
    queue: Option<Arc<HwQueue>>,
    refs: u32,
}

struct Lists {
    rx: [RxSlot; RX_JOB_QUEUE_NUMBER],
    tx: [Option<Arc<HwQueue>>; TX_JOB_QUEUE_NUMBER],
}

/// The device's job queues and their reservation counts.
pub struct JobQueueList {
    inner: Mutex<Lists>,
}

impl Default for JobQueueList {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueueList {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Lists {
                rx: core::array::from_fn(|_| RxSlot::default()),
                tx: core::array::from_fn(|_| None),
            }),
        }
    }

    /// Reserves the refill job queue of `rx_cache_id`, allocating its
    /// ring (of `slots` descriptors) on the first reservation.
    pub fn get_rx<A: CoherentMemory>(
        &self,
        alloc: &A,
        rx_cache_id: u8,
        slots: u64,
    ) -> Result<Arc<HwQueue>> {
        if usize::from(rx_cache_id) >= RX_JOB_CACHE_NUMBER {
            return Err(Error::InvalidArgument);
        }
        let idx = RX_JOB_QUEUE_PER_CACHE * usize::from(rx_cache_id);
        {
            let mut lists = self.inner.lock();
            let slot = &mut lists.rx[idx];
            if let Some(queue) = &slot.queue {
                slot.refs += 1;
                return Ok(queue.clone());
            }
        }

        // First reservation of this cache: the ring allocation runs
        // outside the list lock.
        let bytes = slots as usize * RX_JOB_DESC_WORDS * 8;
        let io_base = rx_jobq::BASE + idx as u64 * rx_jobq::ELEM_SIZE;
        let queue = Arc::new(HwQueue::alloc(alloc, bytes, Some(io_base))?);

        let mut lists = self.inner.lock();
        let slot = &mut lists.rx[idx];
        if let Some(winner) = &slot.queue {
            // A sibling installed its ring while ours was in flight.
            slot.refs += 1;
            let winner = winner.clone();
            drop(lists);
            if let Ok(mut queue) = Arc::try_unwrap(queue) {
                queue.release(alloc);
            }
            return Ok(winner);
        }
        slot.queue = Some(queue.clone());
        slot.refs = 1;
        Ok(queue)
    }

    /// Releases one reservation of `rx_cache_id`'s job queue, freeing the
    /// ring when it was the last one. Extra releases are ignored.
    ///
    /// `on_last` runs under the list lock when this was the last
    /// reservation, before the ring is freed, so the caller can stop the
    /// hardware queue while its ring is still live.
    pub fn release_rx<A: CoherentMemory>(
        &self,
        alloc: &A,
        rx_cache_id: u8,
        on_last: impl FnOnce(),
    ) {
        if usize::from(rx_cache_id) >= RX_JOB_CACHE_NUMBER {
            return;
        }
        let idx = RX_JOB_QUEUE_PER_CACHE * usize::from(rx_cache_id);
        let queue = {
            let mut lists = self.inner.lock();
            let slot = &mut lists.rx[idx];
            if slot.refs == 0 {
                return;
            }
            slot.refs -= 1;
            if slot.refs > 0 {
                return;
            }
            on_last();
            slot.queue.take()
        };
        if let Some(queue) = queue {
            match Arc::try_unwrap(queue) {
                Ok(mut queue) => queue.release(alloc),
                Err(queue) => {
                    // A phy handle is still alive; keep the ring until it
                    // comes back through release.
                    tracing::error!(rx_jobq = idx, "released RX job queue still referenced");
                    let mut lists = self.inner.lock();
                    let slot = &mut lists.rx[idx];
                    if slot.queue.is_none() {
                        slot.queue = Some(queue);
                        slot.refs = 1;
                    }
                }
            }
        }
    }

    /// Takes the private TX job queue of `phy_id`, allocating its ring of
    /// `slots` descriptors. Fails with [`Error::InvalidArgument`] if the
    /// queue is already taken.
    pub fn get_tx<A: CoherentMemory>(
        &self,
        alloc: &A,
        phy_id: u8,
        slots: u64,
    ) -> Result<Arc<HwQueue>> {
        let idx = usize::from(phy_id);
        if idx >= TX_JOB_QUEUE_NUMBER {
            return Err(Error::InvalidArgument);
        }
        if self.inner.lock().tx[idx].is_some() {
            tracing::error!(tx_jobq = idx, "TX job queue already allocated");
            return Err(Error::InvalidArgument);
        }
        let bytes = slots as usize * TX_JOB_DESC_WORDS * 8;
        let io_base = tx_jobq::BASE + idx as u64 * tx_jobq::ELEM_SIZE;
        let queue = Arc::new(HwQueue::alloc(alloc, bytes, Some(io_base))?);

        let mut lists = self.inner.lock();
        if lists.tx[idx].is_some() {
            drop(lists);
            tracing::error!(tx_jobq = idx, "TX job queue already allocated");
            if let Ok(mut queue) = Arc::try_unwrap(queue) {
                queue.release(alloc);
            }
            return Err(Error::InvalidArgument);
        }
        lists.tx[idx] = Some(queue.clone());
        Ok(queue)
    }

    /// Releases `phy_id`'s private TX job queue, if allocated.
    pub fn release_tx<A: CoherentMemory>(&self, alloc: &A, phy_id: u8) {
        let idx = usize::from(phy_id);
        if idx >= TX_JOB_QUEUE_NUMBER {
            return;
        }
        let queue = self.inner.lock().tx[idx].take();
        if let Some(queue) = queue {
            match Arc::try_unwrap(queue) {
                Ok(mut queue) => queue.release(alloc),
                Err(queue) => {
                    tracing::error!(tx_jobq = idx, "released TX job queue still referenced");
                    let mut lists = self.inner.lock();
                    if lists.tx[idx].is_none() {
                        lists.tx[idx] = Some(queue);
                    }
                }
            }
        }
    }

    /// Reservation count of an RX cache's refill queue.
    #[must_use]
    pub fn rx_refs(&self, rx_cache_id: u8) -> u32 {
        self.inner
            .lock()
            .rx
            .get(RX_JOB_QUEUE_PER_CACHE * usize::from(rx_cache_id))
            .map_or(0, |slot| slot.refs)
    }
}
