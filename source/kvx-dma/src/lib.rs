//! Hardware DMA transfer engine for the kvx NoC accelerator.
//!
//! This crate drives the DMA block of a network-on-chip accelerator: it
//! manages physical send/receive endpoints ([`phy::Phy`]), allocates and
//! initializes the hardware ring queues they own, builds bit-exact transfer
//! descriptors for the three transfer modes (memory-to-memory,
//! memory-to-NoC, memory-to-Ethernet), and schedules transfer start and
//! completion through a deferred two-pass task.
//!
//! The central algorithm is the [ticketed ring protocol](queue): software
//! and hardware share ring buffers whose write/read pointers are advanced
//! by side-effecting "load and increment" registers, so the hot enqueue and
//! dequeue paths take no software lock at all. Correctness rests on the
//! exactly-once ticket dispense of those registers plus explicit memory
//! barriers around slot publication, both of which are abstracted behind
//! the [`regs::Mmio`] trait so the protocol can be exercised on the host
//! with an in-memory register file.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod desc;
pub mod device;
pub mod errors;
pub mod jobq;
pub mod mem;
pub mod phy;
pub mod queue;
pub mod regs;
pub mod route;
pub mod sched;
#[cfg(test)]
mod test_util;
pub mod ucode;

pub use self::{
    desc::{RxCompletion, Transfer, TxJob},
    device::{Callback, DmaDevice},
    errors::Error,
    phy::{Direction, TransferType},
    regs::Mmio,
    sched::{DmaChannel, Scheduler},
};

/// A `Result` whose error side is this crate's [`Error`].
pub type Result<T> = core::result::Result<T, Error>;
