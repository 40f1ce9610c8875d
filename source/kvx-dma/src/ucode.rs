//! Microcode program memory and program table.
//!
//! TX jobs name a program table row; the row points into the 128-word
//! program memory and fixes the transfer mode (AXI or NoC) the hardware
//! thread runs the program in. Loading a program is a bump allocation in
//! program memory plus a single ordered table-row write; callers hand the
//! crate the word blob to load.
// The `bitfield!` expansion names the two-parameter `Result` in its
// typed accessors, so the crate alias must stay out of scope here.
use crate::{
    regs::{pgrm_mem, pgrm_tab, Mmio, TX_PGRM_MEM_NUMBER, TX_PGRM_TAB_NUMBER},
    Error,
};
use mycelium_bitfield::bitfield;

bitfield! {
    /// One program table row.
    pub struct ProgramRow<u64> {
        /// Start of the program, as a word index into program memory.
        pub const PM_START_ADDR = 7;
        /// Bus the program drives (0 NoC, 1 AXI).
        pub const TRANSFER_MODE: bool;
        /// Row is usable by any ASN.
        pub const GLOBAL: bool;
        pub const ASN = 9;
        pub const VALID: bool;
    }
}

/// Bus a microcode program drives.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransferMode {
    Noc,
    Axi,
}

/// Description of a loadable microcode program.
#[derive(Copy, Clone, Debug)]
pub struct UcodeDesc {
    pub name: &'static str,
    pub mode: TransferMode,
}

/// Programs shipped with the driver, in load order: memory-to-memory
/// strided copy, memory-to-NoC strided copy, memory-to-Ethernet packet
/// send.
pub const DEFAULT_UCODES: [UcodeDesc; 3] = [
    UcodeDesc {
        name: "mem2mem_stride2stride",
        mode: TransferMode::Axi,
    },
    UcodeDesc {
        name: "mem2noc_stride2stride",
        mode: TransferMode::Noc,
    },
    UcodeDesc {
        name: "mem2eth",
        mode: TransferMode::Noc,
    },
];

/// Program-memory load cursor and table-row id allocator.
pub struct ProgramTable {
    /// Next free byte in program memory.
    next_addr: u64,
    /// Allocated table rows, one bit per id.
    ids: u16,
}

// === impl ProgramTable ===

impl Default for ProgramTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramTable {
    #[must_use]
    pub const fn new() -> Self {
        Self { next_addr: 0, ids: 0 }
    }

    /// Loads `blob` (little-endian 64-bit words) into program memory and
    /// publishes a table row for it. Returns the program id TX jobs use.
    pub fn load<M: Mmio>(
        &mut self,
        mmio: &M,
        desc: &UcodeDesc,
        blob: &[u8],
        asn: u16,
        global: bool,
    ) -> crate::Result<u8> {
        if blob.is_empty() || blob.len() % 8 != 0 || self.next_addr & 0x7 != 0 {
            return Err(Error::InvalidArgument);
        }
        let start_word = self.next_addr >> 3;
        let nwords = (blob.len() / 8) as u64;
        if start_word + nwords > TX_PGRM_MEM_NUMBER as u64 {
            tracing::error!(program = desc.name, "program memory exhausted");
            return Err(Error::OutOfMemory);
        }
        let id = self.alloc_id().ok_or(Error::OutOfMemory)?;

        let row_off = pgrm_tab::BASE + u64::from(id) * 8;
        let current = ProgramRow::from_bits(mmio.read(row_off));
        if current.get(ProgramRow::VALID) {
            tracing::warn!(program = desc.name, id, "overriding valid program table row");
        }

        for (i, word) in blob.chunks_exact(8).enumerate() {
            let word = u64::from_le_bytes(word.try_into().map_err(|_| Error::InvalidArgument)?);
            mmio.write_relaxed(pgrm_mem::BASE + (start_word + i as u64) * 8, word);
        }
        let row = ProgramRow::new()
            .with(ProgramRow::PM_START_ADDR, start_word)
            .with(ProgramRow::TRANSFER_MODE, desc.mode == TransferMode::Axi)
            .with(ProgramRow::GLOBAL, global)
            .with(ProgramRow::ASN, u64::from(asn))
            .with(ProgramRow::VALID, true);
        mmio.write(row_off, row.bits());

        self.next_addr += nwords * 8;
        tracing::debug!(program = desc.name, id, start_word, nwords, "loaded program");
        Ok(id)
    }

    fn alloc_id(&mut self) -> Option<u8> {
        let id = self.ids.trailing_ones() as u8;
        if usize::from(id) >= TX_PGRM_TAB_NUMBER {
            return None;
        }
        self.ids |= 1 << id;
        Some(id)
    }
}
