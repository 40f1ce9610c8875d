//! Physical endpoints (phys) and their queue-init state machines.
//!
//! A [`Phy`] is one of the hardware's 64 RX or 64 TX endpoints, owning
//! the ring queues its transfer mode needs: a memory-to-Ethernet RX phy
//! owns a channel ring, a share of its cache's job queue, and a
//! completion ring; a memory-to-NoC RX phy maps its register window only;
//! a TX phy owns a private job queue and a static-mode completion
//! counter. Reservation bookkeeping (`in_use`, the monotonic completion
//! counter) lives in the device arena, not here.
//!
//! The `init_*` methods are the hardware bring-up sequences: a run of
//! relaxed configuration writes committed by a single ordered activation
//! write, mirroring how the device samples its configuration.
use crate::{
    desc::RX_COMP_DESC_WORDS,
    jobq::JobQueueList,
    mem::CoherentMemory,
    queue::HwQueue,
    regs::{
        self, comp_field, comp_mode, rx_chan, rx_jobq, status, tx_compq, tx_jobq, tx_mon,
        tx_thread, Mmio, TX_THREAD_ID,
    },
    Error, Result,
};
use alloc::sync::Arc;

/// Bounded poll window for queue activation handshakes.
const ACTIVATE_POLL: usize = 100;

/// Endpoint direction, selecting the register blocks a phy talks to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    Rx,
    Tx,
}

/// Transfer mode a phy's queues are shaped for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransferType {
    /// AXI memory-to-memory copy (TX only).
    Mem2Mem,
    /// NoC remote-window transfer.
    Mem2Noc,
    /// Ethernet packet transfer.
    Mem2Eth,
}

/// One physical send or receive endpoint and the queues it owns.
pub struct Phy {
    pub hw_id: u8,
    pub dir: Direction,
    /// RX job cache this endpoint refills from (RX only).
    pub rx_cache_id: u8,
    pub asn: u16,
    pub asn_global: bool,
    /// log2 of the ring capacity, shared by every queue of this phy.
    pub size_log2: u32,
    pub notif_addr: u64,
    pub notif_arg: u64,
    /// Job submission ring; shared across the cache for RX, private for TX.
    pub jobq: Option<Arc<HwQueue>>,
    /// RX channel window (and buffer ring, in packet mode).
    pub chanq: HwQueue,
    /// Completion ring (packet RX) or static completion counter window.
    pub compq: HwQueue,
}

// === impl Phy ===

impl Phy {
    /// Creates an unallocated phy sized for `max_desc` in-flight jobs
    /// (rounded down to a power of two).
    pub fn new(dir: Direction, hw_id: u8, rx_cache_id: u8, asn: u16, max_desc: u64) -> Result<Self> {
        if max_desc == 0 {
            return Err(Error::InvalidArgument);
        }
        Ok(Self {
            hw_id,
            dir,
            rx_cache_id,
            asn,
            asn_global: false,
            size_log2: max_desc.ilog2(),
            notif_addr: 0,
            notif_arg: 0,
            jobq: None,
            chanq: HwQueue::empty(),
            compq: HwQueue::empty(),
        })
    }

    /// This phy's RX channel register window.
    fn rx_chan_window(&self) -> u64 {
        rx_chan::BASE + u64::from(self.hw_id) * rx_chan::ELEM_SIZE
    }

    /// Ring capacity, in slots.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        1 << self.size_log2
    }

    /// Allocates the queues `transfer` needs. On failure every queue
    /// allocated so far is torn down before the error is returned.
    pub fn allocate_queues<A: CoherentMemory>(
        &mut self,
        alloc: &A,
        jobs: &JobQueueList,
        transfer: TransferType,
    ) -> Result<()> {
        let res = self.try_allocate(alloc, jobs, transfer);
        if res.is_err() {
            self.drop_queues(alloc, jobs);
        }
        res
    }

    fn try_allocate<A: CoherentMemory>(
        &mut self,
        alloc: &A,
        jobs: &JobQueueList,
        transfer: TransferType,
    ) -> Result<()> {
        let slots = self.capacity();
        match (self.dir, transfer) {
            (Direction::Rx, TransferType::Mem2Eth) => {
                let window = self.rx_chan_window();
                self.chanq = HwQueue::alloc(alloc, slots as usize * 8, Some(window))?;
                self.jobq = Some(jobs.get_rx(alloc, self.rx_cache_id, slots)?);
                self.compq =
                    HwQueue::alloc(alloc, slots as usize * RX_COMP_DESC_WORDS * 8, Some(window))?;
            }
            (Direction::Rx, TransferType::Mem2Noc) => {
                // NoC fifo mode needs no ring memory; completions are a
                // bare counter in the channel window.
                let window = self.rx_chan_window();
                self.chanq = HwQueue::window(window);
                self.compq = HwQueue::window(window);
            }
            (Direction::Rx, TransferType::Mem2Mem) => return Err(Error::InvalidArgument),
            (Direction::Tx, _) => {
                self.jobq = Some(jobs.get_tx(alloc, self.hw_id, slots)?);
                self.compq = HwQueue::window(
                    tx_compq::BASE + u64::from(self.hw_id) * tx_compq::ELEM_SIZE,
                );
            }
        }
        Ok(())
    }

    /// Releases every queue this phy owns, including its job-queue
    /// reference. Idempotent. When this was the last reference of a
    /// shared RX job queue, the queue is stopped before its ring is
    /// freed.
    pub fn release_queues<M: Mmio, A: CoherentMemory>(
        &mut self,
        mmio: &M,
        alloc: &A,
        jobs: &JobQueueList,
    ) {
        self.chanq.release(alloc);
        self.compq.release(alloc);
        if let Some(queue) = self.jobq.take() {
            match self.dir {
                Direction::Rx => {
                    let io_base = queue.io_base();
                    drop(queue);
                    jobs.release_rx(alloc, self.rx_cache_id, || {
                        if let Some(base) = io_base {
                            mmio.write(base + rx_jobq::STOP, 1);
                        }
                    });
                }
                Direction::Tx => {
                    drop(queue);
                    jobs.release_tx(alloc, self.hw_id);
                }
            }
        }
    }

    /// Rollback teardown for a phy whose hardware was never brought up.
    fn drop_queues<A: CoherentMemory>(&mut self, alloc: &A, jobs: &JobQueueList) {
        self.chanq.release(alloc);
        self.compq.release(alloc);
        if let Some(queue) = self.jobq.take() {
            drop(queue);
            match self.dir {
                Direction::Rx => jobs.release_rx(alloc, self.rx_cache_id, || {}),
                Direction::Tx => jobs.release_tx(alloc, self.hw_id),
            }
        }
    }

    /// Runs the hardware init sequences `transfer` needs.
    pub fn init_queues<M: Mmio>(&self, mmio: &M, transfer: TransferType) -> Result<()> {
        match (self.dir, transfer) {
            (Direction::Rx, TransferType::Mem2Eth) => {
                self.init_rx_job_queue(mmio)?;
                self.init_rx_packet_channel(mmio)
            }
            (Direction::Rx, TransferType::Mem2Noc) => self.init_rx_noc_channel(mmio),
            (Direction::Rx, TransferType::Mem2Mem) => Err(Error::InvalidArgument),
            (Direction::Tx, _) => {
                self.init_tx_job_queue(mmio)?;
                self.init_tx_comp_queue(mmio)
            }
        }
    }

    /// Brings up this phy's share of the RX job queue. Refuses a queue
    /// that is already running: it may be live for a sibling channel.
    fn init_rx_job_queue<M: Mmio>(&self, mmio: &M) -> Result<()> {
        let jobq = self.jobq.as_ref().ok_or(Error::InvalidArgument)?;
        let base = jobq.io_base().ok_or(Error::InvalidArgument)?;
        if mmio.read(base + rx_jobq::STATUS) != status::STOPPED {
            return Ok(());
        }
        mmio.write_relaxed(base + rx_jobq::SA, jobq.dma_addr());
        mmio.write_relaxed(base + rx_jobq::NB_LOG2, u64::from(self.size_log2));
        mmio.write_relaxed(base + rx_jobq::WP, 0);
        mmio.write_relaxed(base + rx_jobq::VALID_WP, 0);
        mmio.write_relaxed(base + rx_jobq::RP, 0);
        mmio.write_relaxed(base + rx_jobq::NOTIF_ADDR, self.notif_addr);
        mmio.write_relaxed(base + rx_jobq::NOTIF_ARG, self.notif_arg);
        mmio.write_relaxed(base + rx_jobq::NOTIF_MODE, rx_jobq::NOTIF_MODE_ENABLE);
        mmio.write_relaxed(base + rx_jobq::CACHE_ID, u64::from(self.rx_cache_id));
        mmio.write_relaxed(base + rx_jobq::ASN, u64::from(self.asn));
        mmio.write(base + rx_jobq::ACTIVATE, 1);
        Ok(())
    }

    /// Packet-mode RX channel bring-up: buffers come from the job queue,
    /// completions are exported as full descriptors into the ring.
    fn init_rx_packet_channel<M: Mmio>(&self, mmio: &M) -> Result<()> {
        let base = self.chanq.io_base().ok_or(Error::InvalidArgument)?;
        if mmio.read(base + rx_chan::ACTIVATED) != 0 {
            tracing::error!(rx_chan = self.hw_id, "channel already activated");
            return Err(Error::Busy);
        }
        mmio.write_relaxed(base + rx_chan::BUF_EN, 0);
        mmio.write_relaxed(base + rx_chan::BUF_SA, 0);
        mmio.write_relaxed(base + rx_chan::BUF_SIZE, 0);
        mmio.write_relaxed(
            base + rx_chan::JOB_Q_CFG,
            rx_chan::JOB_Q_CFG_EN
                | u64::from(self.rx_cache_id) << rx_chan::JOB_Q_CFG_FIELD_SEL_SHIFT,
        );
        mmio.write_relaxed(base + rx_chan::CUR_OFFSET, 0);
        mmio.write_relaxed(base + rx_chan::BYTE_CNT, 0);
        mmio.write_relaxed(base + rx_chan::NOTIF_CNT, 0);
        mmio.write_relaxed(base + rx_chan::CNT_CLEAR_MODE, rx_chan::CNT_CLEAR_BOTH_ON_READ);
        mmio.write_relaxed(
            base + rx_chan::COMP_Q_CFG,
            rx_chan::COMP_Q_CFG_EN | 1 << rx_chan::COMP_Q_CFG_FIELD_SHIFT,
        );
        mmio.write_relaxed(base + rx_chan::COMP_Q_MODE, comp_mode::QUEUE);
        mmio.write_relaxed(base + rx_chan::COMP_Q_SA, self.compq.dma_addr());
        mmio.write_relaxed(base + rx_chan::COMP_Q_SLOT_NB_LOG2, u64::from(self.size_log2));
        mmio.write_relaxed(base + rx_chan::COMP_Q_WP, 0);
        mmio.write_relaxed(base + rx_chan::COMP_Q_RP, 0);
        mmio.write_relaxed(base + rx_chan::COMP_Q_VALID_RP, 0);
        mmio.write_relaxed(base + rx_chan::COMP_Q_NOTIF_ADDR, self.notif_addr);
        mmio.write_relaxed(base + rx_chan::COMP_Q_NOTIF_ARG, self.notif_arg);
        mmio.write_relaxed(base + rx_chan::COMP_Q_ASN, u64::from(self.asn));
        mmio.write(base + rx_chan::ACTIVATED, 1);
        Ok(())
    }

    /// NoC fifo RX channel bring-up. The landing buffer is not known yet;
    /// [`post_init`](Self::post_init) binds it and activates the channel.
    fn init_rx_noc_channel<M: Mmio>(&self, mmio: &M) -> Result<()> {
        let base = self.chanq.io_base().ok_or(Error::InvalidArgument)?;
        mmio.write(base + rx_chan::ACTIVATED, 0);
        mmio.write_relaxed(base + rx_chan::BUF_EN, 1);
        mmio.write_relaxed(base + rx_chan::JOB_Q_CFG, 0);
        mmio.write_relaxed(base + rx_chan::CUR_OFFSET, 0);
        mmio.write_relaxed(base + rx_chan::BYTE_CNT, 0);
        mmio.write_relaxed(base + rx_chan::NOTIF_CNT, 0);
        mmio.write_relaxed(base + rx_chan::CNT_CLEAR_MODE, rx_chan::CNT_CLEAR_BOTH_ON_READ);
        mmio.write_relaxed(base + rx_chan::COMP_Q_CFG, rx_chan::COMP_Q_CFG_EN);
        mmio.write_relaxed(base + rx_chan::COMP_Q_MODE, comp_mode::STATIC);
        mmio.write_relaxed(base + rx_chan::COMP_Q_SA, 0);
        mmio.write_relaxed(base + rx_chan::COMP_Q_SLOT_NB_LOG2, 0);
        mmio.write_relaxed(base + rx_chan::COMP_Q_WP, 0);
        mmio.write_relaxed(base + rx_chan::COMP_Q_RP, 0);
        mmio.write_relaxed(base + rx_chan::COMP_Q_VALID_RP, 0);
        mmio.write_relaxed(base + rx_chan::COMP_Q_NOTIF_ADDR, self.notif_addr);
        mmio.write_relaxed(base + rx_chan::COMP_Q_NOTIF_ARG, self.notif_arg);
        mmio.write(base + rx_chan::COMP_Q_ASN, u64::from(self.asn));
        Ok(())
    }

    /// Binds the NoC fifo landing buffer and activates the channel.
    pub fn post_init<M: Mmio>(&self, mmio: &M, buf_dma_addr: u64, buf_size: u64) -> Result<()> {
        let base = self.chanq.io_base().ok_or(Error::InvalidArgument)?;
        mmio.write_relaxed(base + rx_chan::BUF_SA, buf_dma_addr);
        mmio.write_relaxed(base + rx_chan::BUF_SIZE, buf_size);
        mmio.write(base + rx_chan::ACTIVATED, 1);
        Ok(())
    }

    fn init_tx_job_queue<M: Mmio>(&self, mmio: &M) -> Result<()> {
        let jobq = self.jobq.as_ref().ok_or(Error::InvalidArgument)?;
        let base = jobq.io_base().ok_or(Error::InvalidArgument)?;
        mmio.write_relaxed(base + tx_jobq::SA, jobq.dma_addr());
        mmio.write_relaxed(base + tx_jobq::NB_LOG2, u64::from(self.size_log2));
        mmio.write_relaxed(base + tx_jobq::WP, 0);
        mmio.write_relaxed(base + tx_jobq::VALID_WP, 0);
        mmio.write_relaxed(base + tx_jobq::RP, 0);
        mmio.write_relaxed(base + tx_jobq::NOTIF_ADDR, self.notif_addr);
        mmio.write_relaxed(base + tx_jobq::NOTIF_ARG, self.notif_arg);
        mmio.write_relaxed(base + tx_jobq::ASN, u64::from(self.asn));
        mmio.write_relaxed(base + tx_jobq::THREAD_ID, TX_THREAD_ID);
        mmio.write(base + tx_jobq::ACTIVATE, 1);
        Ok(())
    }

    /// Static-mode TX completion bring-up. The queue must be stopped;
    /// after the activation write the status must report running within a
    /// bounded window.
    fn init_tx_comp_queue<M: Mmio>(&self, mmio: &M) -> Result<()> {
        let base = self.compq.io_base().ok_or(Error::InvalidArgument)?;
        if mmio.read(base + tx_compq::STATUS) != status::STOPPED {
            tracing::error!(tx_compq = self.hw_id, "completion queue not stopped");
            return Err(Error::Busy);
        }
        mmio.write_relaxed(base + tx_compq::MODE, comp_mode::STATIC);
        mmio.write_relaxed(base + tx_compq::SA, 0);
        mmio.write_relaxed(base + tx_compq::NB_LOG2, 0);
        mmio.write_relaxed(base + tx_compq::GLOBAL, u64::from(self.asn_global));
        mmio.write_relaxed(base + tx_compq::ASN, u64::from(self.asn));
        mmio.write_relaxed(base + tx_compq::FIELD_EN, comp_field::NONE);
        mmio.write_relaxed(base + tx_compq::WP, 0);
        mmio.write_relaxed(base + tx_compq::RP, 0);
        mmio.write_relaxed(base + tx_compq::VALID_RP, 0);
        mmio.write_relaxed(base + tx_compq::NOTIF_ADDR, self.notif_addr);
        mmio.write_relaxed(base + tx_compq::NOTIF_ARG, self.notif_arg);
        mmio.write(base + tx_compq::ACTIVATE, 1);
        for _ in 0..ACTIVATE_POLL {
            if mmio.read(base + tx_compq::STATUS) == status::RUNNING {
                return Ok(());
            }
        }
        tracing::error!(tx_compq = self.hw_id, "completion queue did not start");
        Err(Error::Timeout)
    }

    /// Stops this phy's private queues. Safe to call repeatedly, and on a
    /// phy whose queues were never allocated. The shared RX job queue is
    /// not touched here; [`release_queues`](Self::release_queues) stops
    /// it when the last channel of the cache goes away.
    pub fn stop_queues<M: Mmio>(&self, mmio: &M) {
        match self.dir {
            Direction::Tx => {
                if let Some(base) = self.jobq.as_ref().and_then(|q| q.io_base()) {
                    mmio.write(base + tx_jobq::STOP, 1);
                }
                if let Some(base) = self.compq.io_base() {
                    mmio.write(base + tx_compq::STOP, 1);
                }
            }
            Direction::Rx => {
                if let Some(base) = self.chanq.io_base() {
                    mmio.write(base + rx_chan::ACTIVATED, 0);
                }
            }
        }
    }

    /// The hardware's count of retired jobs on this phy. Job ids returned
    /// by the push path are complete once `job_id <= completion_count`.
    pub fn completion_count<M: Mmio>(&self, mmio: &M) -> u64 {
        match self.dir {
            Direction::Rx => self
                .chanq
                .io_base()
                .map_or(0, |base| mmio.read(base + rx_chan::COMP_Q_WP)),
            Direction::Tx => self
                .compq
                .io_base()
                .map_or(0, |base| mmio.read(base + tx_compq::WP)),
        }
    }

    /// Dumps the error blocks relevant to this phy through `tracing`.
    pub fn read_status<M: Mmio>(&self, mmio: &M) {
        match self.dir {
            Direction::Rx => {
                let chan = mmio.read(regs::error::BASE + regs::error::RX_CHAN_STATUS);
                let job = mmio.read(regs::error::BASE + regs::error::RX_JOB_STATUS);
                tracing::error!(
                    rx_chan = self.hw_id,
                    chan_err = ?format_args!("{chan:#x}"),
                    job_err = ?format_args!("{job:#x}"),
                    "RX error status"
                );
            }
            Direction::Tx => {
                let job = mmio.read(regs::error::BASE + regs::error::TX_JOB_STATUS);
                let comp = mmio.read(regs::error::BASE + regs::error::TX_COMP_STATUS);
                let thread = mmio.read(regs::error::BASE + regs::error::TX_THREAD_STATUS);
                let thread_err = mmio.read(
                    tx_thread::BASE + TX_THREAD_ID * tx_thread::ELEM_SIZE + tx_thread::ERROR,
                );
                tracing::error!(
                    tx_phy = self.hw_id,
                    job_err = ?format_args!("{job:#x}"),
                    comp_err = ?format_args!("{comp:#x}"),
                    thread_status = ?format_args!("{thread:#x}"),
                    thread_err = ?format_args!("{thread_err:#x}"),
                    "TX error status"
                );
                let outstanding = mmio.read(
                    tx_mon::BASE
                        + tx_mon::THREAD_OUTSTANDING_READ_CNT
                        + TX_THREAD_ID * tx_mon::THREAD_OUTSTANDING_READ_CNT_ELEM_SIZE,
                );
                let vchan = mmio.read(tx_mon::BASE + tx_mon::VCHAN_OUTSTANDING_READ_CNT);
                let fifo = mmio.read(tx_mon::BASE + tx_mon::OUTSTANDING_FIFO_LEVEL);
                let queues = mmio.read(tx_mon::BASE + tx_mon::QUEUES_OUTSTANDING_FIFO_LEVEL);
                tracing::info!(
                    outstanding_reads = outstanding,
                    vchan_outstanding = vchan,
                    fifo_level = fifo,
                    queue_fifo_level = queues,
                    "TX monitoring"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::testing::HeapMemory;
    use crate::mem::DmaRegion;
    use crate::regs::mock::MockMmio;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tx_phy(hw_id: u8) -> Phy {
        Phy::new(Direction::Tx, hw_id, 0, 7, 16).unwrap()
    }

    #[test]
    fn scenario3_tx_comp_init_busy_no_writes() {
        let mmio = MockMmio::new();
        let mut phy = tx_phy(2);
        let comp_base = tx_compq::BASE + 2 * tx_compq::ELEM_SIZE;
        phy.compq = HwQueue::window(comp_base);
        mmio.set(comp_base + tx_compq::STATUS, status::RUNNING);

        assert_eq!(phy.init_tx_comp_queue(&mmio).unwrap_err(), Error::Busy);
        assert!(
            mmio.writes().is_empty(),
            "a busy queue must not be reconfigured"
        );
    }

    #[test]
    fn tx_comp_init_activates_static_mode() {
        let mmio = MockMmio::new();
        let mut phy = tx_phy(0);
        let comp_base = tx_compq::BASE;
        phy.compq = HwQueue::window(comp_base);
        // Hardware flips to RUNNING in response to the activation write.
        mmio.on_write(
            comp_base + tx_compq::ACTIVATE,
            1,
            comp_base + tx_compq::STATUS,
            status::RUNNING,
        );

        phy.init_tx_comp_queue(&mmio).unwrap();
        assert_eq!(mmio.read(comp_base + tx_compq::MODE), comp_mode::STATIC);
        assert_eq!(mmio.read(comp_base + tx_compq::ASN), 7);
        assert_eq!(
            mmio.writes().last(),
            Some(&(comp_base + tx_compq::ACTIVATE, 1)),
            "activation commits the configuration"
        );
    }

    #[test]
    fn tx_comp_init_times_out_when_never_running() {
        let mmio = MockMmio::new();
        let mut phy = tx_phy(1);
        phy.compq = HwQueue::window(tx_compq::BASE + tx_compq::ELEM_SIZE);
        assert_eq!(phy.init_tx_comp_queue(&mmio).unwrap_err(), Error::Timeout);
    }

    #[test]
    fn rx_packet_channel_init_carries_cache_id() {
        let mmio = MockMmio::new();
        let heap = HeapMemory::new();
        let jobs = JobQueueList::new();
        let mut phy = Phy::new(Direction::Rx, 3, 1, 9, 4).unwrap();
        phy.allocate_queues(&heap, &jobs, TransferType::Mem2Eth)
            .unwrap();

        phy.init_queues(&mmio, TransferType::Mem2Eth).unwrap();
        let chan = rx_chan::BASE + 3 * rx_chan::ELEM_SIZE;
        assert_eq!(
            mmio.read(chan + rx_chan::JOB_Q_CFG),
            rx_chan::JOB_Q_CFG_EN | 1 << rx_chan::JOB_Q_CFG_FIELD_SEL_SHIFT
        );
        assert_eq!(mmio.read(chan + rx_chan::COMP_Q_MODE), comp_mode::QUEUE);
        assert_eq!(mmio.read(chan + rx_chan::COMP_Q_SA), phy.compq.dma_addr());
        assert_eq!(
            mmio.writes().last(),
            Some(&(chan + rx_chan::ACTIVATED, 1))
        );
        // The shared job queue was programmed and activated too.
        let jq = rx_jobq::BASE + 2 * rx_jobq::ELEM_SIZE;
        assert_eq!(mmio.read(jq + rx_jobq::CACHE_ID), 1);
        assert_eq!(mmio.read(jq + rx_jobq::ACTIVATE), 1);

        phy.release_queues(&mmio, &heap, &jobs);
        assert_eq!(heap.live(), 0);
    }

    #[test]
    fn rx_packet_channel_refuses_reactivation() {
        let mmio = MockMmio::new();
        let heap = HeapMemory::new();
        let jobs = JobQueueList::new();
        let mut phy = Phy::new(Direction::Rx, 5, 0, 0, 4).unwrap();
        phy.allocate_queues(&heap, &jobs, TransferType::Mem2Eth)
            .unwrap();
        let chan = rx_chan::BASE + 5 * rx_chan::ELEM_SIZE;
        mmio.set(chan + rx_chan::ACTIVATED, 1);

        assert_eq!(
            phy.init_rx_packet_channel(&mmio).unwrap_err(),
            Error::Busy
        );
        phy.release_queues(&mmio, &heap, &jobs);
    }

    #[test]
    fn noc_channel_activates_only_at_post_init() {
        let mmio = MockMmio::new();
        let heap = HeapMemory::new();
        let jobs = JobQueueList::new();
        let mut phy = Phy::new(Direction::Rx, 7, 0, 3, 8).unwrap();
        phy.allocate_queues(&heap, &jobs, TransferType::Mem2Noc)
            .unwrap();
        assert_eq!(heap.live(), 0, "NoC fifo mode allocates no ring memory");

        phy.init_queues(&mmio, TransferType::Mem2Noc).unwrap();
        let chan = rx_chan::BASE + 7 * rx_chan::ELEM_SIZE;
        assert_eq!(mmio.read(chan + rx_chan::ACTIVATED), 0);
        assert_eq!(mmio.read(chan + rx_chan::COMP_Q_MODE), comp_mode::STATIC);
        assert_eq!(mmio.read(chan + rx_chan::BUF_EN), 1);

        phy.post_init(&mmio, 0x8000_0000, 0x1_0000).unwrap();
        assert_eq!(mmio.read(chan + rx_chan::BUF_SA), 0x8000_0000);
        assert_eq!(mmio.read(chan + rx_chan::BUF_SIZE), 0x1_0000);
        assert_eq!(mmio.read(chan + rx_chan::ACTIVATED), 1);
    }

    #[test]
    fn allocation_failure_rolls_back() {
        // Fails the nth allocation, so partial teardown can be observed.
        struct FailAfter {
            inner: HeapMemory,
            left: AtomicUsize,
        }
        impl CoherentMemory for FailAfter {
            fn alloc(&self, bytes: usize) -> crate::Result<DmaRegion> {
                if self.left.fetch_sub(1, Ordering::Relaxed) == 0 {
                    return Err(Error::OutOfMemory);
                }
                self.inner.alloc(bytes)
            }
            fn free(&self, region: DmaRegion) {
                self.inner.free(region);
            }
        }

        // Packet RX allocates chan ring, job queue ring, then comp ring;
        // fail the third.
        let alloc = FailAfter {
            inner: HeapMemory::new(),
            left: AtomicUsize::new(2),
        };
        let jobs = JobQueueList::new();
        let mut phy = Phy::new(Direction::Rx, 0, 2, 0, 4).unwrap();
        assert_eq!(
            phy.allocate_queues(&alloc, &jobs, TransferType::Mem2Eth)
                .unwrap_err(),
            Error::OutOfMemory
        );
        assert_eq!(alloc.inner.live(), 0, "partial allocation must be torn down");
        assert_eq!(jobs.rx_refs(2), 0, "job queue reference rolled back");
        assert!(phy.jobq.is_none());
    }

    #[test]
    fn stop_queues_is_idempotent() {
        let mmio = MockMmio::new();
        let heap = HeapMemory::new();
        let jobs = JobQueueList::new();
        let mut phy = tx_phy(4);
        phy.allocate_queues(&heap, &jobs, TransferType::Mem2Mem)
            .unwrap();
        phy.stop_queues(&mmio);
        phy.stop_queues(&mmio);
        let jq = tx_jobq::BASE + 4 * tx_jobq::ELEM_SIZE;
        assert_eq!(mmio.read(jq + tx_jobq::STOP), 1);
        phy.release_queues(&mmio, &heap, &jobs);
        // Released phys have nothing to stop.
        phy.stop_queues(&mmio);
    }

    #[test]
    fn completion_count_reads_direction_counter() {
        let mmio = MockMmio::new();
        let mut tx = tx_phy(6);
        tx.compq = HwQueue::window(tx_compq::BASE + 6 * tx_compq::ELEM_SIZE);
        mmio.set(tx_compq::BASE + 6 * tx_compq::ELEM_SIZE + tx_compq::WP, 42);
        assert_eq!(tx.completion_count(&mmio), 42);

        let mut rx = Phy::new(Direction::Rx, 1, 0, 0, 4).unwrap();
        rx.chanq = HwQueue::window(rx_chan::BASE + rx_chan::ELEM_SIZE);
        mmio.set(rx_chan::BASE + rx_chan::ELEM_SIZE + rx_chan::COMP_Q_WP, 7);
        assert_eq!(rx.completion_count(&mmio), 7);
    }
}
