//! The DMA device: phy arena, reservation, caller API, interrupt entry
//! points.
//!
//! [`DmaDevice`] is generic over the MMIO backend and the coherent
//! allocator so every protocol in the crate can run on the host against
//! the in-memory register file. The device spin lock covers reservation
//! bookkeeping (the `in_use` arena, the program table) only; the
//! job-queue list carries its own short lock, ring allocation and
//! hardware bring-up run outside both, and descriptor pushes and
//! completion reads go straight to the rings. Per-channel state for the
//! RX caller API lives behind per-slot locks so one busy channel never
//! stalls another.
use crate::{
    desc::{RxCompletion, Transfer, TxJob, RX_COMP_DESC_WORDS},
    jobq::JobQueueList,
    mem::CoherentMemory,
    phy::{Direction, Phy, TransferType},
    queue::{RX_COMP_RING, RX_JOB_RING, TX_JOB_RING},
    regs::{it, rx_chan, tx_compq, Mmio, RX_CHANNEL_NUMBER, TX_JOB_QUEUE_NUMBER},
    route::{self, NocRoute},
    sched::Scheduler,
    ucode::{ProgramTable, UcodeDesc, DEFAULT_UCODES},
    Error, Result,
};
use alloc::{boxed::Box, sync::Arc};
use maitake_sync::spin::Mutex;
use portable_atomic::{AtomicU64, Ordering};

/// Callback fired when a channel makes completion progress.
pub type Callback = Box<dyn Fn() + Send + Sync>;

/// Error interrupt vector bits, in hardware order.
const ERROR_IRQ_BITS: [&str; 5] = [
    "rx_channel",
    "rx_job_queue",
    "tx_job_queue",
    "tx_thread",
    "tx_completion_queue",
];

/// Reservation bookkeeping, guarded by the device lock.
struct DeviceState {
    rx_in_use: [bool; RX_CHANNEL_NUMBER],
    tx_in_use: [bool; TX_JOB_QUEUE_NUMBER],
    programs: ProgramTable,
    /// Program ids of the default microcode set, once loaded.
    mem2mem_id: Option<u8>,
    mem2noc_id: Option<u8>,
    mem2eth_id: Option<u8>,
}

/// A reserved RX channel: its phy plus the caller's completion callback.
/// The callback is shared so interrupt context can fire it after letting
/// go of the slot lock.
struct RxChan {
    phy: Phy,
    callback: Option<Arc<dyn Fn() + Send + Sync>>,
}

/// One DMA block.
pub struct DmaDevice<M: Mmio, A: CoherentMemory> {
    mmio: M,
    alloc: A,
    asn: u16,
    /// In-flight descriptor budget per phy, fixed at construction.
    max_desc: u64,
    state: Mutex<DeviceState>,
    jobs: JobQueueList,
    rx_chans: [Mutex<Option<RxChan>>; RX_CHANNEL_NUMBER],
    /// Monotonic completion counters, written from interrupt context.
    rx_comp_count: [AtomicU64; RX_CHANNEL_NUMBER],
    tx_comp_count: [AtomicU64; TX_JOB_QUEUE_NUMBER],
    /// Latched error interrupt vector, consumed by the next status read.
    err_vec: AtomicU64,
    sched: Scheduler,
}

// === impl DmaDevice ===

impl<M: Mmio, A: CoherentMemory> DmaDevice<M, A> {
    /// Builds a device over `mmio` sized for `max_desc` in-flight jobs
    /// per phy (a power of two; other values are rounded down).
    pub fn new(mmio: M, alloc: A, asn: u16, max_desc: u64) -> Result<Self> {
        if max_desc == 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(Self {
            mmio,
            alloc,
            asn,
            max_desc,
            state: Mutex::new(DeviceState {
                rx_in_use: [false; RX_CHANNEL_NUMBER],
                tx_in_use: [false; TX_JOB_QUEUE_NUMBER],
                programs: ProgramTable::new(),
                mem2mem_id: None,
                mem2noc_id: None,
                mem2eth_id: None,
            }),
            jobs: JobQueueList::new(),
            rx_chans: core::array::from_fn(|_| Mutex::new(None)),
            rx_comp_count: core::array::from_fn(|_| AtomicU64::new(0)),
            tx_comp_count: core::array::from_fn(|_| AtomicU64::new(0)),
            err_vec: AtomicU64::new(0),
            sched: Scheduler::new(),
        })
    }

    /// The deferred-work scheduler attached to this device.
    pub fn sched(&self) -> &Scheduler {
        &self.sched
    }

    pub fn mmio(&self) -> &M {
        &self.mmio
    }

    /// Reserves a phy and brings its queues up.
    ///
    /// RX phys are addressed: `id` must name a free channel whose
    /// hardware is not already activated ([`Error::Busy`]). TX takes the
    /// first free phy when `id` is `None`. Any init failure rolls the
    /// reservation back before returning.
    pub fn reserve_phy(
        &self,
        dir: Direction,
        id: Option<u8>,
        rx_cache_id: u8,
        transfer: TransferType,
    ) -> Result<Phy> {
        let mut state = self.state.lock();
        let hw_id = match dir {
            Direction::Rx => {
                let id = id.ok_or(Error::InvalidArgument)?;
                let slot = state
                    .rx_in_use
                    .get_mut(usize::from(id))
                    .ok_or(Error::InvalidArgument)?;
                if *slot {
                    return Err(Error::Busy);
                }
                let window = rx_chan::BASE + u64::from(id) * rx_chan::ELEM_SIZE;
                if self.mmio.read(window + rx_chan::ACTIVATED) != 0 {
                    tracing::error!(rx_chan = id, "channel active outside this driver");
                    return Err(Error::Busy);
                }
                *slot = true;
                id
            }
            Direction::Tx => {
                let idx = match id {
                    Some(id) => {
                        let slot = state
                            .tx_in_use
                            .get(usize::from(id))
                            .ok_or(Error::InvalidArgument)?;
                        if *slot {
                            return Err(Error::Busy);
                        }
                        usize::from(id)
                    }
                    None => state
                        .tx_in_use
                        .iter()
                        .position(|used| !used)
                        .ok_or(Error::Busy)?,
                };
                state.tx_in_use[idx] = true;
                idx as u8
            }
        };
        drop(state);
        self.comp_counter(dir, hw_id).store(0, Ordering::Relaxed);

        // Ring allocation and register bring-up both run outside the
        // device lock; the job-queue list serializes itself.
        let result = Phy::new(dir, hw_id, rx_cache_id, self.asn, self.max_desc)
            .and_then(|mut phy| {
                phy.allocate_queues(&self.alloc, &self.jobs, transfer)?;
                if let Err(e) = phy.init_queues(&self.mmio, transfer) {
                    phy.stop_queues(&self.mmio);
                    phy.release_queues(&self.mmio, &self.alloc, &self.jobs);
                    return Err(e);
                }
                Ok(phy)
            });
        match result {
            Ok(phy) => {
                tracing::debug!(?dir, hw_id, ?transfer, "reserved phy");
                Ok(phy)
            }
            Err(e) => {
                self.mark_free(&mut self.state.lock(), dir, hw_id);
                Err(e)
            }
        }
    }

    /// Stops and releases a reserved phy. Safe to call on a phy whose
    /// queues are already gone.
    pub fn release_phy(&self, mut phy: Phy) {
        phy.stop_queues(&self.mmio);
        // The shared RX job queue outlives each channel; release_queues
        // stops it with the last reference of the cache.
        phy.release_queues(&self.mmio, &self.alloc, &self.jobs);
        self.mark_free(&mut self.state.lock(), phy.dir, phy.hw_id);
        tracing::debug!(dir = ?phy.dir, hw_id = phy.hw_id, "released phy");
    }

    fn mark_free(&self, state: &mut DeviceState, dir: Direction, hw_id: u8) {
        match dir {
            Direction::Rx => state.rx_in_use[usize::from(hw_id)] = false,
            Direction::Tx => state.tx_in_use[usize::from(hw_id)] = false,
        }
    }

    fn comp_counter(&self, dir: Direction, hw_id: u8) -> &AtomicU64 {
        match dir {
            Direction::Rx => &self.rx_comp_count[usize::from(hw_id)],
            Direction::Tx => &self.tx_comp_count[usize::from(hw_id)],
        }
    }

    // === RX channel caller API ===

    /// Reserves RX channel `id` for packet reception on `rx_cache_id`,
    /// with an optional completion callback.
    pub fn reserve_rx_chan(
        &self,
        id: u8,
        rx_cache_id: u8,
        callback: Option<Callback>,
    ) -> Result<()> {
        let phy = self.reserve_phy(Direction::Rx, Some(id), rx_cache_id, TransferType::Mem2Eth)?;
        *self.rx_chans[usize::from(id)].lock() = Some(RxChan {
            phy,
            callback: callback.map(Arc::from),
        });
        Ok(())
    }

    /// Releases RX channel `id`. Releasing a free channel is a no-op.
    pub fn release_rx_chan(&self, id: u8) -> Result<()> {
        let chan = self
            .rx_chans
            .get(usize::from(id))
            .ok_or(Error::InvalidArgument)?
            .lock()
            .take();
        if let Some(chan) = chan {
            self.release_phy(chan.phy);
        }
        Ok(())
    }

    /// Hands a receive buffer to channel `id`'s job queue. Returns the
    /// job id; fails with [`Error::QueueFull`] when the refill ring is at
    /// capacity.
    pub fn enqueue_rx_buffer(&self, id: u8, buf_dma_addr: u64, len: u64) -> Result<u64> {
        let slot = self
            .rx_chans
            .get(usize::from(id))
            .ok_or(Error::InvalidArgument)?
            .lock();
        let chan = slot.as_ref().ok_or(Error::InvalidArgument)?;
        let jobq = chan.phy.jobq.as_ref().ok_or(Error::InvalidArgument)?;
        jobq.push(
            &self.mmio,
            &RX_JOB_RING,
            chan.phy.size_log2,
            &[buf_dma_addr, len],
        )
    }

    /// Pops the next received packet of channel `id`, if any. A latched
    /// error vector is drained through the status dump first.
    pub fn rx_completed(&self, id: u8) -> Result<Option<RxCompletion>> {
        let slot = self
            .rx_chans
            .get(usize::from(id))
            .ok_or(Error::InvalidArgument)?
            .lock();
        let chan = slot.as_ref().ok_or(Error::InvalidArgument)?;
        if self.err_vec.swap(0, Ordering::AcqRel) != 0 {
            chan.phy.read_status(&self.mmio);
        }
        let mut words = [0u64; RX_COMP_DESC_WORDS];
        let popped = chan.phy.compq.pop(
            &self.mmio,
            &RX_COMP_RING,
            chan.phy.size_log2,
            &mut words,
        )?;
        Ok(popped.map(|_| RxCompletion::from_words(words)))
    }

    /// Unmasks channel `id`'s completion interrupt.
    pub fn enable_irq(&self, id: u8) {
        let _state = self.state.lock();
        let mask = self.mmio.read(it::BASE + it::EN);
        self.mmio.write(it::BASE + it::EN, mask | 1 << id);
    }

    /// Masks channel `id`'s completion interrupt.
    pub fn disable_irq(&self, id: u8) {
        let _state = self.state.lock();
        let mask = self.mmio.read(it::BASE + it::EN);
        self.mmio.write(it::BASE + it::EN, mask & !(1 << id));
    }

    // === TX submission ===

    /// Submits a memory-to-memory copy on `phy`. Returns the job id to
    /// compare against [`completion_count`](Self::completion_count).
    pub fn push_mem2mem(&self, phy: &Phy, job: &TxJob) -> Result<u64> {
        let program_id = self.state.lock().mem2mem_id.ok_or(Error::InvalidArgument)?;
        self.push_tx(phy, Transfer::Mem2Mem, job, program_id)
    }

    /// Submits a memory-to-NoC transfer on `phy`; `job.route_id` must
    /// come from [`route_id`](Self::route_id).
    pub fn push_mem2noc(&self, phy: &Phy, job: &TxJob) -> Result<u64> {
        let program_id = self.state.lock().mem2noc_id.ok_or(Error::InvalidArgument)?;
        self.push_tx(phy, Transfer::Mem2Noc, job, program_id)
    }

    /// Submits an Ethernet packet (or packet fragment; `eot` marks the
    /// last one) on `phy`.
    pub fn push_packet(&self, phy: &Phy, job: &TxJob, eot: bool) -> Result<u64> {
        let program_id = self.state.lock().mem2eth_id.ok_or(Error::InvalidArgument)?;
        self.push_tx(phy, Transfer::Mem2Eth { eot }, job, program_id)
    }

    fn push_tx(&self, phy: &Phy, transfer: Transfer, job: &TxJob, program_id: u8) -> Result<u64> {
        let jobq = phy.jobq.as_ref().ok_or(Error::InvalidArgument)?;
        let words = transfer.descriptor(job, program_id);
        jobq.push(&self.mmio, &TX_JOB_RING, phy.size_log2, &words)
    }

    /// Builds and pushes `job` for `transfer`, resolving the program id
    /// of the matching default microcode.
    pub(crate) fn push_transfer(&self, phy: &Phy, transfer: Transfer, job: &TxJob) -> Result<u64> {
        match transfer {
            Transfer::Mem2Mem => self.push_mem2mem(phy, job),
            Transfer::Mem2Noc => self.push_mem2noc(phy, job),
            Transfer::Mem2Eth { eot } => self.push_packet(phy, job, eot),
        }
    }

    // === programs and routes ===

    /// Loads one microcode program; returns its program id.
    pub fn load_program(&self, desc: &UcodeDesc, blob: &[u8], global: bool) -> Result<u8> {
        let mut state = self.state.lock();
        state.programs.load(&self.mmio, desc, blob, self.asn, global)
    }

    /// Loads the three stock programs and retains their ids for the
    /// submission paths.
    pub fn load_default_programs(
        &self,
        mem2mem: &[u8],
        mem2noc: &[u8],
        mem2eth: &[u8],
    ) -> Result<()> {
        let mut state = self.state.lock();
        let state = &mut *state;
        state.mem2mem_id =
            Some(state.programs.load(&self.mmio, &DEFAULT_UCODES[0], mem2mem, self.asn, false)?);
        state.mem2noc_id =
            Some(state.programs.load(&self.mmio, &DEFAULT_UCODES[1], mem2noc, self.asn, false)?);
        state.mem2eth_id =
            Some(state.programs.load(&self.mmio, &DEFAULT_UCODES[2], mem2eth, self.asn, false)?);
        Ok(())
    }

    /// Finds or installs a NoC route table entry; see [`route::route_id`].
    pub fn route_id(&self, entry: NocRoute) -> Result<u16> {
        // Serialize scans so two callers cannot claim one row.
        let _state = self.state.lock();
        route::route_id(&self.mmio, entry)
    }

    // === interrupt context (never blocks beyond per-slot spin locks) ===

    /// Completion interrupt body: refreshes the phy's monotonic counter
    /// from hardware, signals the scheduler, and fires the RX channel
    /// callback.
    pub fn completion_irq(&self, dir: Direction, id: u8) {
        let count = self.hw_completion_count(dir, id);
        self.comp_counter(dir, id).fetch_max(count, Ordering::AcqRel);
        self.sched.pend();
        if dir == Direction::Rx {
            // The callback may re-enter the device (refill, reap), so the
            // slot lock is let go before it runs.
            let callback = self
                .rx_chans
                .get(usize::from(id))
                .and_then(|slot| slot.lock().as_ref().and_then(|c| c.callback.clone()));
            if let Some(callback) = callback {
                callback();
            }
        }
    }

    /// Error interrupt body: latches the interrupt vector for the next
    /// status read and names every asserted bit.
    pub fn error_irq(&self) {
        let vector = self.mmio.read(it::BASE + it::VECTOR_LAC);
        if vector == 0 {
            return;
        }
        self.err_vec.fetch_or(vector, Ordering::AcqRel);
        for (bit, name) in ERROR_IRQ_BITS.iter().enumerate() {
            if vector & 1 << bit != 0 {
                tracing::error!(block = name, "DMA error interrupt");
            }
        }
    }

    /// Errors latched by [`error_irq`](Self::error_irq) and not yet
    /// drained by a status read.
    pub fn latched_errors(&self) -> u64 {
        self.err_vec.load(Ordering::Acquire)
    }

    fn hw_completion_count(&self, dir: Direction, id: u8) -> u64 {
        let offset = match dir {
            Direction::Rx => {
                rx_chan::BASE + u64::from(id) * rx_chan::ELEM_SIZE + rx_chan::COMP_Q_WP
            }
            Direction::Tx => {
                tx_compq::BASE + u64::from(id) * tx_compq::ELEM_SIZE + tx_compq::WP
            }
        };
        self.mmio.read(offset)
    }

    /// The monotonic count of retired jobs on `(dir, id)`, refreshed from
    /// hardware. Never moves backwards, even across queue restarts.
    pub fn completion_count(&self, dir: Direction, id: u8) -> u64 {
        let counter = self.comp_counter(dir, id);
        counter.fetch_max(self.hw_completion_count(dir, id), Ordering::AcqRel);
        counter.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::testing::HeapMemory;
    use crate::regs::mock::MockMmio;
    use crate::regs::{rx_jobq, status, tx_jobq};

    type TestDevice = DmaDevice<MockMmio, HeapMemory>;

    /// Device fixture with ticket aliases for the queues the tests touch.
    fn device(max_desc: u64) -> TestDevice {
        crate::test_util::trace_init();
        let mmio = MockMmio::new();
        for idx in 0..crate::regs::RX_JOB_QUEUE_NUMBER as u64 {
            let base = rx_jobq::BASE + idx * rx_jobq::ELEM_SIZE;
            mmio.alias(base + rx_jobq::LOAD_INCR_WP, base + rx_jobq::WP);
            // A second channel on the cache finds the queue running and
            // must not reprogram it.
            mmio.on_write(base + rx_jobq::ACTIVATE, 1, base + rx_jobq::STATUS, status::RUNNING);
            mmio.on_write(base + rx_jobq::STOP, 1, base + rx_jobq::STATUS, status::STOPPED);
        }
        for idx in 0..4u64 {
            let base = tx_jobq::BASE + idx * tx_jobq::ELEM_SIZE;
            mmio.alias(base + tx_jobq::LOAD_INCR_WP, base + tx_jobq::WP);
            // TX completion queues report RUNNING once activated.
            let comp = tx_compq::BASE + idx * tx_compq::ELEM_SIZE;
            mmio.on_write(comp + tx_compq::ACTIVATE, 1, comp + tx_compq::STATUS, status::RUNNING);
        }
        DmaDevice::new(mmio, HeapMemory::new(), 11, max_desc).unwrap()
    }

    #[test]
    fn scenario1_rx_capacity_exhaustion() {
        let dev = device(4);
        dev.reserve_rx_chan(3, 1, None).unwrap();
        for n in 0..4u64 {
            let id = dev.enqueue_rx_buffer(3, 0x1000 * n, 0x800).unwrap();
            assert_eq!(id, n + 1);
        }
        assert_eq!(
            dev.enqueue_rx_buffer(3, 0x5000, 0x800).unwrap_err(),
            Error::QueueFull
        );
        // The failed enqueue left the ring untouched; draining one slot
        // makes room again.
        let jq = rx_jobq::BASE + 2 * rx_jobq::ELEM_SIZE;
        assert_eq!(dev.mmio().read(jq + rx_jobq::WP), 4);
        dev.mmio().set(jq + rx_jobq::RP, 1);
        dev.enqueue_rx_buffer(3, 0x5000, 0x800).unwrap();
        dev.release_rx_chan(3).unwrap();
    }

    #[test]
    fn scenario4_shared_jobq_survives_first_release() {
        let dev = device(4);
        dev.reserve_rx_chan(3, 1, None).unwrap();
        dev.reserve_rx_chan(4, 1, None).unwrap();

        let jq = rx_jobq::BASE + 2 * rx_jobq::ELEM_SIZE;
        dev.release_rx_chan(3).unwrap();
        // Channel 4 still owns a reference; the shared queue keeps
        // running and its refill path keeps working.
        assert_eq!(dev.mmio().read(jq + rx_jobq::STOP), 0);
        dev.enqueue_rx_buffer(4, 0x9000, 0x800).unwrap();

        dev.release_rx_chan(4).unwrap();
        assert_eq!(dev.mmio().read(jq + rx_jobq::STOP), 1, "last release stops the queue");
        assert_eq!(
            dev.enqueue_rx_buffer(4, 0x9000, 0x800).unwrap_err(),
            Error::InvalidArgument
        );
    }

    #[test]
    fn release_rx_chan_twice_is_safe() {
        let dev = device(4);
        dev.reserve_rx_chan(0, 0, None).unwrap();
        dev.release_rx_chan(0).unwrap();
        dev.release_rx_chan(0).unwrap();
        // The channel can be reserved again afterwards.
        dev.reserve_rx_chan(0, 0, None).unwrap();
        dev.release_rx_chan(0).unwrap();
    }

    #[test]
    fn rx_reserve_respects_foreign_activation() {
        let dev = device(4);
        let window = rx_chan::BASE + 7 * rx_chan::ELEM_SIZE;
        dev.mmio().set(window + rx_chan::ACTIVATED, 1);
        assert_eq!(
            dev.reserve_rx_chan(7, 0, None).unwrap_err(),
            Error::Busy
        );
        // The failed reservation left the slot free for later.
        dev.mmio().set(window + rx_chan::ACTIVATED, 0);
        dev.reserve_rx_chan(7, 0, None).unwrap();
        dev.release_rx_chan(7).unwrap();
    }

    #[test]
    fn completion_count_is_monotonic() {
        let dev = device(4);
        let wp = tx_compq::BASE + tx_compq::WP;
        dev.mmio().set(wp, 5);
        assert_eq!(dev.completion_count(Direction::Tx, 0), 5);
        // A queue restart rewinds the hardware counter; ours holds.
        dev.mmio().set(wp, 3);
        assert_eq!(dev.completion_count(Direction::Tx, 0), 5);
        dev.mmio().set(wp, 9);
        assert_eq!(dev.completion_count(Direction::Tx, 0), 9);
    }

    #[test]
    fn tx_push_needs_loaded_programs() {
        let dev = device(8);
        let phy = dev
            .reserve_phy(Direction::Tx, None, 0, TransferType::Mem2Mem)
            .unwrap();
        let job = TxJob::linear(0x1000, 0x2000, 4096);
        assert_eq!(
            dev.push_mem2mem(&phy, &job).unwrap_err(),
            Error::InvalidArgument
        );

        let blob: Vec<u8> = (0..4u64).flat_map(|w| w.to_le_bytes()).collect();
        dev.load_default_programs(&blob, &blob, &blob).unwrap();
        assert_eq!(dev.push_mem2mem(&phy, &job).unwrap(), 1);
        assert_eq!(dev.push_mem2mem(&phy, &job).unwrap(), 2);
        dev.release_phy(phy);
    }

    #[test]
    fn error_irq_latches_and_rx_read_drains() {
        let dev = device(4);
        dev.reserve_rx_chan(1, 0, None).unwrap();
        dev.mmio().set(it::BASE + it::VECTOR_LAC, 0b101);
        dev.error_irq();
        assert_eq!(dev.latched_errors(), 0b101);

        assert!(dev.rx_completed(1).unwrap().is_none());
        assert_eq!(dev.latched_errors(), 0, "status read drains the latch");
        dev.release_rx_chan(1).unwrap();
    }

    #[test]
    fn irq_mask_tracks_enable_disable() {
        let dev = device(4);
        dev.enable_irq(3);
        dev.enable_irq(5);
        assert_eq!(dev.mmio().read(it::BASE + it::EN), 0b101000);
        dev.disable_irq(3);
        assert_eq!(dev.mmio().read(it::BASE + it::EN), 0b100000);
    }

    #[test]
    fn rx_callback_fires_on_completion_irq() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let dev = device(4);
        let fired = Arc::new(AtomicUsize::new(0));
        let seen = fired.clone();
        dev.reserve_rx_chan(2, 0, Some(Box::new(move || {
            seen.fetch_add(1, Ordering::Relaxed);
        })))
        .unwrap();

        dev.completion_irq(Direction::Rx, 2);
        dev.completion_irq(Direction::Rx, 2);
        assert_eq!(fired.load(Ordering::Relaxed), 2);
        dev.release_rx_chan(2).unwrap();
    }

    #[test]
    fn rx_callback_may_reenter_the_device() {
        use std::sync::Arc;

        let dev = Arc::new(device(4));
        let refill = dev.clone();
        // The canonical callback body: hand the hardware a fresh buffer.
        dev.reserve_rx_chan(
            2,
            0,
            Some(Box::new(move || {
                refill.enqueue_rx_buffer(2, 0x7000, 0x800).unwrap();
            })),
        )
        .unwrap();

        dev.completion_irq(Direction::Rx, 2);
        assert_eq!(dev.mmio().read(rx_jobq::BASE + rx_jobq::WP), 1);
        dev.release_rx_chan(2).unwrap();
    }
}
