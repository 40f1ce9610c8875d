//! Transfer descriptors and the builders that pack them.
//!
//! A TX job becomes nine 64-bit words in the job ring: eight generic
//! microcode parameters followed by one [`JobConfig`] word selecting the
//! program, the NoC route, the completion queue, and the post-transfer
//! fence. The parameter layout is fixed by the stock microcode programs,
//! so the builders here are bit-exact and pure: they never touch hardware.
use mycelium_bitfield::bitfield;

/// Words per TX job descriptor (8 parameters + 1 config).
pub const TX_JOB_DESC_WORDS: usize = 9;
/// Words per RX job descriptor (`{base, len}`).
pub const RX_JOB_DESC_WORDS: usize = 2;
/// Words per RX packet completion descriptor.
pub const RX_COMP_DESC_WORDS: usize = 4;

bitfield! {
    /// The TX job configuration word.
    #[derive(PartialEq, Eq)]
    pub struct JobConfig<u64> {
        /// Completion queue the hardware notifies when the job retires.
        pub const COMP_Q_ID = 16;
        /// NoC route table entry used by NoC-mode programs.
        pub const ROUTE_ID = 16;
        /// Program table row to execute for this job.
        pub const PRGM_ID = 16;
        /// Fence the transfer before signalling completion.
        pub const FENCE_AFTER: bool;
    }
}

/// A generic transfer request, resolved by a channel before pushing.
///
/// `lstride`/`rstride` are the distances between repeated elements on the
/// local and remote side; `stride == len` is a contiguous linear copy.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TxJob {
    pub src_dma_addr: u64,
    /// Destination address (mem2mem) or remote NoC offset (mem2noc).
    pub dst_dma_addr: u64,
    /// Object length in bytes.
    pub len: u64,
    /// Number of repeated objects.
    pub nb: u64,
    pub lstride: u64,
    pub rstride: u64,
    pub comp_q_id: u16,
    pub route_id: u16,
    /// Fence reads before the transfer starts. Accepted for layout
    /// parity, but the stock programs never consume it; only
    /// `fence_after` reaches the config word.
    pub fence_before: bool,
    pub fence_after: bool,
}

impl TxJob {
    /// A linear copy of `len` bytes: one object, strides degenerate.
    #[must_use]
    pub fn linear(src_dma_addr: u64, dst_dma_addr: u64, len: u64) -> Self {
        Self {
            src_dma_addr,
            dst_dma_addr,
            len,
            nb: 1,
            lstride: len,
            rstride: len,
            ..Self::default()
        }
    }
}

/// The three transfer modes, as pushed through a TX phy.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transfer {
    /// AXI memory-to-memory copy (optionally shaped by strides).
    Mem2Mem,
    /// Memory-to-NoC copy toward a routed remote window.
    Mem2Noc,
    /// Ethernet packet segment; `eot` marks the last segment of a frame.
    Mem2Eth { eot: bool },
}

impl Transfer {
    /// The eight microcode parameter words for `job` in this mode.
    ///
    /// Shaped copies encode the object length as a 16-byte-unit count
    /// plus a 4-bit remainder, and the strides as gaps past the object.
    #[must_use]
    pub fn param_words(&self, job: &TxJob) -> [u64; 8] {
        let len = job.len;
        match self {
            Self::Mem2Mem | Self::Mem2Noc => [
                job.src_dma_addr,
                job.dst_dma_addr,
                len >> 4,
                len & 0xf,
                job.nb,
                job.lstride.wrapping_sub(len),
                job.rstride.wrapping_sub(len),
                0,
            ],
            Self::Mem2Eth { eot } => [
                job.src_dma_addr,
                len,
                len >> 4,
                len & 0xf,
                u64::from(*eot),
                0,
                0,
                0,
            ],
        }
    }

    /// The config word for `job`, with `program_id` already resolved
    /// against the program table.
    #[must_use]
    pub fn config_word(&self, job: &TxJob, program_id: u8) -> u64 {
        let fence_after = match self {
            // The packet program ignores fences.
            Self::Mem2Eth { .. } => false,
            _ => job.fence_after,
        };
        JobConfig::new()
            .with(JobConfig::COMP_Q_ID, u64::from(job.comp_q_id))
            .with(JobConfig::ROUTE_ID, u64::from(job.route_id))
            .with(JobConfig::PRGM_ID, u64::from(program_id))
            .with(JobConfig::FENCE_AFTER, fence_after)
            .bits()
    }

    /// The full nine-word ring slot for `job`.
    #[must_use]
    pub fn descriptor(&self, job: &TxJob, program_id: u8) -> [u64; TX_JOB_DESC_WORDS] {
        let params = self.param_words(job);
        let mut words = [0u64; TX_JOB_DESC_WORDS];
        words[..8].copy_from_slice(&params);
        words[8] = self.config_word(job, program_id);
        words
    }
}

/// A completed RX packet, read back from the completion ring.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RxCompletion {
    /// Buffer bus address this packet landed in.
    pub base: u64,
    /// Buffer size, as enqueued.
    pub size: u64,
    /// Bytes actually received.
    pub byte_cnt: u64,
    /// Notification argument latched by the hardware.
    pub notif: u64,
}

impl RxCompletion {
    #[must_use]
    pub fn from_words(words: [u64; RX_COMP_DESC_WORDS]) -> Self {
        Self {
            base: words[0],
            size: words[1],
            byte_cnt: words[2],
            notif: words[3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn scenario2_mem2mem_linear_words() {
        let job = TxJob {
            comp_q_id: 7,
            ..TxJob::linear(0x8000_0000, 0x9000_0000, 4096)
        };
        let params = Transfer::Mem2Mem.param_words(&job);
        assert_eq!(
            params,
            [0x8000_0000, 0x9000_0000, 4096 >> 4, 4096 & 0xf, 1, 0, 0, 0]
        );
        let config = Transfer::Mem2Mem.config_word(&job, 0);
        assert_eq!(config & 0xffff, 7, "low 16 bits are the comp queue id");
    }

    #[test]
    fn strided_copy_encodes_gaps() {
        let job = TxJob {
            src_dma_addr: 0x1000,
            dst_dma_addr: 0x2000,
            len: 64,
            nb: 8,
            lstride: 256,
            rstride: 64,
            ..TxJob::default()
        };
        let params = Transfer::Mem2Noc.param_words(&job);
        assert_eq!(params[2], 4); // 64 bytes = 4 * 16
        assert_eq!(params[3], 0);
        assert_eq!(params[4], 8);
        assert_eq!(params[5], 256 - 64);
        assert_eq!(params[6], 0, "stride == len degenerates to linear");
    }

    #[test]
    fn packet_words_carry_eot() {
        let job = TxJob {
            src_dma_addr: 0xfeed,
            len: 1514,
            ..TxJob::default()
        };
        let params = Transfer::Mem2Eth { eot: true }.param_words(&job);
        assert_eq!(params[0], 0xfeed);
        assert_eq!(params[1], 1514);
        assert_eq!(params[2], 1514 >> 4);
        assert_eq!(params[3], 1514 & 0xf);
        assert_eq!(params[4], 1);
        assert_eq!(&params[5..], &[0, 0, 0]);
    }

    #[test]
    fn descriptor_is_params_then_config() {
        let job = TxJob::linear(1, 2, 32);
        let words = Transfer::Mem2Mem.descriptor(&job, 3);
        assert_eq!(&words[..8], &Transfer::Mem2Mem.param_words(&job));
        assert_eq!(words[8], Transfer::Mem2Mem.config_word(&job, 3));
    }

    proptest! {
        #[test]
        fn pack_config_word(
            comp_q in 0u16..=u16::MAX,
            route in 0u16..=u16::MAX,
            prgm in 0u8..16,
            fence in proptest::bool::ANY,
        ) {
            let job = TxJob {
                comp_q_id: comp_q,
                route_id: route,
                fence_after: fence,
                ..TxJob::default()
            };
            let word = Transfer::Mem2Mem.config_word(&job, prgm);
            let expected = u64::from(comp_q)
                | (u64::from(route) << 16)
                | (u64::from(prgm) << 32)
                | (u64::from(fence) << 48);
            prop_assert_eq!(word, expected);
        }

        #[test]
        fn length_split_reassembles(len in 0u64..=1 << 32) {
            let job = TxJob::linear(0, 0, len);
            let params = Transfer::Mem2Mem.param_words(&job);
            prop_assert_eq!((params[2] << 4) | params[3], len);
        }
    }
}
