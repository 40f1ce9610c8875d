//! Two-pass deferred transfer scheduler.
//!
//! Submission contexts hand jobs to a [`DmaChannel`] with
//! [`Scheduler::issue_pending`] and raise the lock-free pending signal;
//! the deferred context (a tasklet, or the async [`Scheduler::run`]
//! loop) drains it with [`Scheduler::process`]. Each invocation makes
//! two passes over the pending channels: pass one starts at most the
//! next queued job per channel, pass two reaps every running job the
//! hardware has retired. Starting before reaping lets a job that
//! completes immediately be observed in the same invocation.
//!
//! Locking is per channel only, and never two channels at once.
use crate::{
    desc::{Transfer, TxJob},
    device::{Callback, DmaDevice},
    mem::CoherentMemory,
    phy::Phy,
    regs::Mmio,
    Error,
};
use alloc::{collections::VecDeque, sync::Arc, vec::Vec};
use maitake_sync::{spin::Mutex, WaitCell};
use portable_atomic::{AtomicBool, Ordering};

/// A running job and the id the hardware will retire it under.
struct RunningJob {
    job: TxJob,
    last_job_id: u64,
}

#[derive(Default)]
struct ChannelQueues {
    queued: VecDeque<TxJob>,
    running: VecDeque<RunningJob>,
    completed: VecDeque<TxJob>,
}

/// A logical transfer channel bound to one TX phy.
pub struct DmaChannel {
    id: u16,
    transfer: Transfer,
    phy: Phy,
    callback: Option<Callback>,
    queues: Mutex<ChannelQueues>,
    /// Set while this channel sits on the scheduler's pending list.
    listed: AtomicBool,
}

// === impl DmaChannel ===

impl DmaChannel {
    #[must_use]
    pub fn new(id: u16, transfer: Transfer, phy: Phy, callback: Option<Callback>) -> Self {
        Self {
            id,
            transfer,
            phy,
            callback,
            queues: Mutex::new(ChannelQueues::default()),
            listed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> u16 {
        self.id
    }

    #[must_use]
    pub fn phy(&self) -> &Phy {
        &self.phy
    }

    /// Takes the oldest finished job, if any.
    pub fn take_completed(&self) -> Option<TxJob> {
        self.queues.lock().completed.pop_front()
    }

    /// Queue depths `(queued, running, completed)`.
    #[must_use]
    pub fn depths(&self) -> (usize, usize, usize) {
        let q = self.queues.lock();
        (q.queued.len(), q.running.len(), q.completed.len())
    }

    /// Consumes the channel, handing its phy back for release. The
    /// caller must have drained or abandoned in-flight work.
    #[must_use]
    pub fn into_phy(self) -> Phy {
        self.phy
    }
}

/// The deferred-work scheduler of one device.
pub struct Scheduler {
    channels: Mutex<Vec<Arc<DmaChannel>>>,
    pending: AtomicBool,
    wake: WaitCell,
}

// === impl Scheduler ===

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            channels: Mutex::new(Vec::new()),
            pending: AtomicBool::new(false),
            wake: WaitCell::new(),
        }
    }

    /// Raises the pending signal and wakes the deferred context. Safe
    /// from interrupt context.
    pub fn pend(&self) {
        self.pending.store(true, Ordering::Release);
        self.wake.wake();
    }

    /// Queues `job` on `chan` and schedules it for processing.
    pub fn issue_pending(&self, chan: &Arc<DmaChannel>, job: TxJob) {
        chan.queues.lock().queued.push_back(job);
        if !chan.listed.swap(true, Ordering::AcqRel) {
            let mut channels = self.channels.lock();
            if !channels.iter().any(|c| Arc::ptr_eq(c, chan)) {
                channels.push(chan.clone());
            }
        }
        self.pend();
    }

    /// One deferred-work invocation.
    pub fn process<M: Mmio, A: CoherentMemory>(&self, dev: &DmaDevice<M, A>) {
        self.pending.store(false, Ordering::Release);
        let channels = self.channels.lock().clone();

        // Pass 1: start the next queued job of every pending channel.
        for chan in &channels {
            let mut q = chan.queues.lock();
            let Some(job) = q.queued.front() else { continue };
            match dev.push_transfer(&chan.phy, chan.transfer, job) {
                Ok(job_id) => {
                    if let Some(job) = q.queued.pop_front() {
                        q.running.push_back(RunningJob {
                            job,
                            last_job_id: job_id,
                        });
                    }
                }
                // A full ring is back-pressure: the job stays queued and
                // the next invocation retries.
                Err(Error::QueueFull) => {}
                Err(error) => {
                    tracing::error!(chan = chan.id, ?error, "dropping unsubmittable job");
                    q.queued.pop_front();
                }
            }
        }

        // Pass 2: reap everything the hardware has retired, including
        // jobs started in pass 1.
        for chan in &channels {
            let count = dev.completion_count(chan.phy.dir, chan.phy.hw_id);
            let mut q = chan.queues.lock();
            let mut finished = false;
            while q.running.front().map_or(false, |run| run.last_job_id <= count) {
                if let Some(run) = q.running.pop_front() {
                    q.completed.push_back(run.job);
                    finished = true;
                }
            }
            let idle = q.queued.is_empty() && q.running.is_empty();
            drop(q);

            if finished {
                if let Some(callback) = &chan.callback {
                    callback();
                }
            }
            if idle && chan.listed.swap(false, Ordering::AcqRel) {
                let requeued = {
                    let q = chan.queues.lock();
                    !q.queued.is_empty() || !q.running.is_empty()
                };
                if requeued {
                    // Work arrived while unlisting; keep the channel.
                    chan.listed.store(true, Ordering::Release);
                } else {
                    self.channels.lock().retain(|c| !Arc::ptr_eq(c, chan));
                }
            }
        }
    }

    /// Drives [`process`](Self::process) from an async context until the
    /// scheduler is shut down.
    pub async fn run<M: Mmio, A: CoherentMemory>(&self, dev: &DmaDevice<M, A>) {
        loop {
            self.process(dev);
            if self.pending.load(Ordering::Acquire) {
                continue;
            }
            if self.wake.wait().await.is_err() {
                return;
            }
        }
    }

    /// Wakes and terminates the [`run`](Self::run) loop.
    pub fn shutdown(&self) {
        self.wake.close();
    }

    #[cfg(test)]
    pub(crate) fn listed_channels(&self) -> usize {
        self.channels.lock().len()
    }
}
