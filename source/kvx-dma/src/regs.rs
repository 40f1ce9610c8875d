//! Register map of the DMA block, and the MMIO access trait.
//!
//! Offsets are bytes from the DMA block base. Every register is 64 bits
//! wide. Queue registers repeat per queue with a fixed element stride, so
//! a queue's register is addressed as `BASE + id * ELEM_SIZE + REG`.
use core::{
    ptr,
    sync::atomic::{fence, Ordering},
};

/// Number of RX channels (and RX phys).
pub const RX_CHANNEL_NUMBER: usize = 64;
/// Number of physical RX job queues.
pub const RX_JOB_QUEUE_NUMBER: usize = 8;
/// Number of RX job caches; each cache owns two job queues.
pub const RX_JOB_CACHE_NUMBER: usize = 4;
/// RX job queues assigned per cache: one for driver refill, one reserved
/// for hardware-only buffer recycle.
pub const RX_JOB_QUEUE_PER_CACHE: usize = 2;
/// Number of TX job queues (and TX phys).
pub const TX_JOB_QUEUE_NUMBER: usize = 64;
/// Number of TX completion queues.
pub const TX_COMPLETION_QUEUE_NUMBER: usize = 64;
/// Program memory size, in 64-bit words.
pub const TX_PGRM_MEM_NUMBER: usize = 128;
/// Number of program table rows.
pub const TX_PGRM_TAB_NUMBER: usize = 16;
/// Number of NoC route table entries.
pub const NOC_ROUTE_TABLE_NUMBER: usize = 512;
/// Hardware TX thread driving the job queues.
pub const TX_THREAD_ID: u64 = 0;

/// Hardware queue status values.
pub mod status {
    pub const STOPPED: u64 = 0x0;
    pub const RUNNING: u64 = 0x1;
    pub const SWITCH_OFF: u64 = 0x2;
}

/// Completion queue modes.
pub mod comp_mode {
    /// Completions are written to a memory ring.
    pub const QUEUE: u64 = 0x0;
    /// Completions only bump the write-pointer counter.
    pub const STATIC: u64 = 0x1;
}

/// TX completion field export modes.
pub mod comp_field {
    pub const NONE: u64 = 0x0;
    pub const ETH: u64 = 0x1;
    pub const FULL: u64 = 0x2;
}

/// RX channel registers (one block per channel).
pub mod rx_chan {
    pub const BASE: u64 = 0x0;
    pub const ELEM_SIZE: u64 = 0x1000;
    pub const BUF_SA: u64 = 0x0;
    pub const BUF_SIZE: u64 = 0x8;
    pub const BUF_EN: u64 = 0x10;
    pub const CUR_OFFSET: u64 = 0x18;
    pub const JOB_Q_CFG: u64 = 0x20;
    pub const ACTIVATED: u64 = 0x28;
    pub const BYTE_CNT: u64 = 0x30;
    pub const NOTIF_CNT: u64 = 0x38;
    pub const CNT_CLEAR_MODE: u64 = 0x40;
    pub const COMP_Q_CFG: u64 = 0x58;
    pub const COMP_Q_MODE: u64 = 0x60;
    pub const COMP_Q_SA: u64 = 0x68;
    pub const COMP_Q_SLOT_NB_LOG2: u64 = 0x70;
    pub const COMP_Q_WP: u64 = 0x78;
    pub const COMP_Q_RP: u64 = 0x80;
    pub const COMP_Q_LOAD_INCR_RP: u64 = 0x88;
    pub const COMP_Q_VALID_RP: u64 = 0x90;
    pub const COMP_Q_NOTIF_ADDR: u64 = 0xA0;
    pub const COMP_Q_NOTIF_ARG: u64 = 0xB0;
    pub const COMP_Q_ASN: u64 = 0xB8;

    /// JOB_Q_CFG enable bit and cache-id field position.
    pub const JOB_Q_CFG_EN: u64 = 0x1;
    pub const JOB_Q_CFG_FIELD_SEL_SHIFT: u64 = 1;
    /// COMP_Q_CFG enable bit and descriptor-field-export position.
    pub const COMP_Q_CFG_EN: u64 = 0x1;
    pub const COMP_Q_CFG_FIELD_SHIFT: u64 = 1;
    /// Clear both byte and notify counters when read.
    pub const CNT_CLEAR_BOTH_ON_READ: u64 = 0x3;
}

/// RX job queue registers.
pub mod rx_jobq {
    pub const BASE: u64 = 0x40000;
    pub const ELEM_SIZE: u64 = 0x1000;
    pub const SA: u64 = 0x0;
    pub const NB_LOG2: u64 = 0x8;
    pub const WP: u64 = 0x10;
    pub const LOAD_INCR_WP: u64 = 0x18;
    pub const VALID_WP: u64 = 0x20;
    pub const RP: u64 = 0x30;
    pub const NOTIF_ADDR: u64 = 0x38;
    pub const NOTIF_ARG: u64 = 0x40;
    pub const NOTIF_MODE: u64 = 0x48;
    pub const NOTIF_MODE_ENABLE: u64 = 0x1;
    pub const ACTIVATE: u64 = 0x50;
    pub const STOP: u64 = 0x58;
    pub const STATUS: u64 = 0x60;
    pub const CACHE_ID: u64 = 0x70;
    pub const ASN: u64 = 0x78;
}

/// TX job queue registers.
pub mod tx_jobq {
    pub const BASE: u64 = 0x80000;
    pub const ELEM_SIZE: u64 = 0x1000;
    pub const SA: u64 = 0x0;
    pub const NB_LOG2: u64 = 0x8;
    pub const WP: u64 = 0x10;
    pub const LOAD_INCR_WP: u64 = 0x18;
    pub const VALID_WP: u64 = 0x20;
    pub const RP: u64 = 0x30;
    pub const NOTIF_ADDR: u64 = 0x38;
    pub const NOTIF_ARG: u64 = 0x40;
    pub const ASN: u64 = 0x48;
    pub const STATUS: u64 = 0x50;
    pub const ACTIVATE: u64 = 0x60;
    pub const STOP: u64 = 0x68;
    pub const THREAD_ID: u64 = 0x70;
}

/// TX completion queue registers.
pub mod tx_compq {
    pub const BASE: u64 = 0xC0000;
    pub const ELEM_SIZE: u64 = 0x1000;
    pub const MODE: u64 = 0x0;
    pub const SA: u64 = 0x8;
    pub const NB_LOG2: u64 = 0x10;
    pub const GLOBAL: u64 = 0x18;
    pub const ASN: u64 = 0x20;
    pub const FIELD_EN: u64 = 0x28;
    pub const WP: u64 = 0x30;
    pub const RP: u64 = 0x40;
    pub const LOAD_INCR_RP: u64 = 0x48;
    pub const VALID_RP: u64 = 0x50;
    pub const NOTIF_ADDR: u64 = 0x60;
    pub const NOTIF_ARG: u64 = 0x68;
    pub const ACTIVATE: u64 = 0x70;
    pub const STOP: u64 = 0x78;
    pub const STATUS: u64 = 0x80;
}

/// Interrupt vector block.
pub mod it {
    pub const BASE: u64 = 0x50000;
    pub const EN: u64 = 0x0;
    pub const VECTOR: u64 = 0x10;
    /// Latch-and-clear read of the interrupt vector.
    pub const VECTOR_LAC: u64 = 0x18;
}

/// Per-block error status registers.
pub mod error {
    pub const BASE: u64 = 0x51000;
    pub const RX_CHAN_STATUS: u64 = 0x0;
    pub const RX_JOB_STATUS: u64 = 0x10;
    pub const TX_JOB_STATUS: u64 = 0x20;
    pub const TX_THREAD_STATUS: u64 = 0x30;
    pub const TX_COMP_STATUS: u64 = 0x40;
}

/// TX thread registers.
pub mod tx_thread {
    pub const BASE: u64 = 0x60000;
    pub const ELEM_SIZE: u64 = 0x1000;
    pub const ERROR: u64 = 0x70;
    pub const ASN: u64 = 0x80;
}

/// TX monitoring registers.
pub mod tx_mon {
    pub const BASE: u64 = 0x68000;
    pub const THREAD_OUTSTANDING_READ_CNT: u64 = 0x0;
    pub const THREAD_OUTSTANDING_READ_CNT_ELEM_SIZE: u64 = 0x8;
    pub const VCHAN_OUTSTANDING_READ_CNT: u64 = 0x20;
    pub const OUTSTANDING_FIFO_LEVEL: u64 = 0x30;
    pub const QUEUES_OUTSTANDING_FIFO_LEVEL: u64 = 0x40;
}

/// Program memory (word addressable by the DMA, byte addressed here).
pub mod pgrm_mem {
    pub const BASE: u64 = 0x64000;
}

/// Program table row fields.
pub mod pgrm_tab {
    pub const BASE: u64 = 0x65000;
    pub const PM_START_ADDR_SHIFT: u64 = 0x0;
    pub const TRANSFER_MODE_SHIFT: u64 = 0x7;
    pub const GLOBAL_SHIFT: u64 = 0x8;
    pub const ASN_SHIFT: u64 = 0x9;
    pub const VALID_SHIFT: u64 = 0x12;
}

/// NoC route table.
pub mod noc_rt {
    pub const BASE: u64 = 0x66000;
    pub const ELEM_SIZE: u64 = 0x8;
}

/// Raw access to the DMA block's registers.
///
/// This trait is the synchronization boundary of the whole crate: the ring
/// protocol's mutual exclusion comes from [`load_incr`], which must return
/// each value exactly once across all callers. On hardware that contract
/// is provided by the register itself; the test backend provides it with
/// an atomic fetch-add.
///
/// [`load_incr`]: Mmio::load_incr
pub trait Mmio {
    /// Reads a register. Advisory snapshot, no side effect.
    fn read(&self, offset: u64) -> u64;

    /// Writes a register, ordered after all prior memory accesses.
    fn write(&self, offset: u64, value: u64);

    /// Writes a register with no ordering guarantee relative to normal
    /// memory accesses. Used for multi-register configuration sequences
    /// that are committed by a final ordered [`write`](Mmio::write).
    fn write_relaxed(&self, offset: u64, value: u64) {
        self.write(offset, value);
    }

    /// Reads a ticket-dispense register: returns the current value and
    /// atomically increments it. A given value is observed by exactly one
    /// caller.
    fn load_incr(&self, offset: u64) -> u64;
}

/// Production MMIO backend over the memory-mapped DMA block.
pub struct DeviceMmio {
    base: *mut u8,
}

// The DMA block's registers are safe to poke from any context; all
// cross-context protocols in this crate go through `load_incr` tickets or
// ordered commit writes.
unsafe impl Send for DeviceMmio {}
unsafe impl Sync for DeviceMmio {}

impl DeviceMmio {
    /// Wraps the mapped DMA block at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be the virtual address of the device's register block,
    /// mapped uncached, valid for the lifetime of the returned value.
    #[must_use]
    pub const unsafe fn new(base: *mut u8) -> Self {
        Self { base }
    }

    #[inline]
    fn reg(&self, offset: u64) -> *mut u64 {
        self.base.wrapping_add(offset as usize).cast::<u64>()
    }
}

impl Mmio for DeviceMmio {
    #[inline]
    fn read(&self, offset: u64) -> u64 {
        let value = unsafe { ptr::read_volatile(self.reg(offset)) };
        fence(Ordering::SeqCst);
        value
    }

    #[inline]
    fn write(&self, offset: u64, value: u64) {
        fence(Ordering::SeqCst);
        unsafe { ptr::write_volatile(self.reg(offset), value) };
        fence(Ordering::SeqCst);
    }

    #[inline]
    fn write_relaxed(&self, offset: u64, value: u64) {
        unsafe { ptr::write_volatile(self.reg(offset), value) };
    }

    #[inline]
    fn load_incr(&self, offset: u64) -> u64 {
        // The increment is a side effect of the register read itself.
        self.read(offset)
    }
}

#[cfg(test)]
pub mod mock {
    //! In-memory register file for host tests.
    use super::Mmio;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// A write-triggered rule: when `trigger` is written with `value`,
    /// store `set_value` at `set`.
    #[derive(Copy, Clone, Debug)]
    struct Rule {
        trigger: u64,
        value: u64,
        set: u64,
        set_value: u64,
    }

    #[derive(Default)]
    struct State {
        regs: BTreeMap<u64, u64>,
        writes: Vec<(u64, u64)>,
        rules: Vec<Rule>,
        aliases: BTreeMap<u64, u64>,
    }

    impl State {
        fn key(&self, offset: u64) -> u64 {
            *self.aliases.get(&offset).unwrap_or(&offset)
        }
    }

    /// Deterministic [`Mmio`] backend: registers are map entries,
    /// `load_incr` is a fetch-add, and every write is logged.
    #[derive(Default)]
    pub struct MockMmio {
        state: Mutex<State>,
    }

    impl MockMmio {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds a register value without logging a write.
        pub fn set(&self, offset: u64, value: u64) {
            let mut state = self.state.lock().unwrap();
            let key = state.key(offset);
            state.regs.insert(key, value);
        }

        /// Declares that reads of `from` observe the counter at `to`, the
        /// way a hardware `LOAD_INCR` register aliases its snapshot
        /// register.
        pub fn alias(&self, from: u64, to: u64) {
            self.state.lock().unwrap().aliases.insert(from, to);
        }

        /// Registers a hardware response: writing `value` to `trigger`
        /// also stores `set_value` at `set`. Used to script activation
        /// and status handshakes.
        pub fn on_write(&self, trigger: u64, value: u64, set: u64, set_value: u64) {
            self.state.lock().unwrap().rules.push(Rule {
                trigger,
                value,
                set,
                set_value,
            });
        }

        /// All writes issued so far, in order.
        #[must_use]
        pub fn writes(&self) -> Vec<(u64, u64)> {
            self.state.lock().unwrap().writes.clone()
        }

        /// Forgets the write log.
        pub fn clear_writes(&self) {
            self.state.lock().unwrap().writes.clear();
        }
    }

    impl Mmio for MockMmio {
        fn read(&self, offset: u64) -> u64 {
            let state = self.state.lock().unwrap();
            *state.regs.get(&state.key(offset)).unwrap_or(&0)
        }

        fn write(&self, offset: u64, value: u64) {
            let mut state = self.state.lock().unwrap();
            let key = state.key(offset);
            state.regs.insert(key, value);
            state.writes.push((offset, value));
            let fired: Vec<Rule> = state
                .rules
                .iter()
                .filter(|r| r.trigger == offset && r.value == value)
                .copied()
                .collect();
            for rule in fired {
                state.regs.insert(rule.set, rule.set_value);
            }
        }

        fn load_incr(&self, offset: u64) -> u64 {
            let mut state = self.state.lock().unwrap();
            let key = state.key(offset);
            let slot = state.regs.entry(key).or_insert(0);
            let ticket = *slot;
            *slot += 1;
            ticket
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_register_addressing() {
        // TX job queue 3's ACTIVATE register.
        let off = tx_jobq::BASE + 3 * tx_jobq::ELEM_SIZE + tx_jobq::ACTIVATE;
        assert_eq!(off, 0x80000 + 0x3000 + 0x60);
    }

    #[test]
    fn load_incr_dispenses_each_ticket_once() {
        let mmio = mock::MockMmio::new();
        let tickets: Vec<u64> = (0..8).map(|_| mmio.load_incr(0x18)).collect();
        assert_eq!(tickets, (0..8).collect::<Vec<u64>>());
        // The advisory snapshot now reflects the dispensed count.
        assert_eq!(mmio.read(0x18), 8);
    }

    #[test]
    fn write_rules_fire() {
        let mmio = mock::MockMmio::new();
        mmio.on_write(0x70, 1, 0x80, status::RUNNING);
        assert_eq!(mmio.read(0x80), status::STOPPED);
        mmio.write(0x70, 1);
        assert_eq!(mmio.read(0x80), status::RUNNING);
    }
}
