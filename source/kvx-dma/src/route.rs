//! NoC route table allocation.
//!
//! TX jobs in NoC mode carry a route id naming an entry of the 512-row
//! hardware route table. The table is append-only for the device
//! lifetime: an entry equal to the requested one is reused, otherwise the
//! first invalid row is claimed, so route ids stay stable once handed
//! out. Routing semantics are opaque here: the 40-bit route word comes
//! from the caller.
// The `bitfield!` expansion names the two-parameter `Result` in its
// typed accessors, so the crate alias must stay out of scope here.
use crate::{
    regs::{noc_rt, Mmio, NOC_ROUTE_TABLE_NUMBER},
    Error,
};
use mycelium_bitfield::bitfield;

bitfield! {
    /// One NoC route table entry.
    pub struct NocRoute<u64> {
        /// Per-hop direction bits toward the destination cluster.
        pub const ROUTE = 40;
        /// Tag presented to the receiving cluster.
        pub const RX_TAG = 6;
        pub const QOS = 4;
        pub const GLOBAL: bool;
        pub const ASN = 9;
        pub const VCHAN: bool;
        pub const VALID: bool;
    }
}

impl NocRoute {
    /// Packs a valid entry for `route` toward `rx_tag`.
    #[must_use]
    pub fn entry(route: u64, rx_tag: u64, qos: u64, asn: u16, global: bool, vchan: bool) -> Self {
        Self::new()
            .with(Self::ROUTE, route)
            .with(Self::RX_TAG, rx_tag)
            .with(Self::QOS, qos)
            .with(Self::GLOBAL, global)
            .with(Self::ASN, u64::from(asn))
            .with(Self::VCHAN, vchan)
            .with(Self::VALID, true)
    }
}

/// Finds or installs `entry` in the route table and returns its id.
///
/// Scans for a row equal to `entry`, remembering the first invalid row on
/// the way; a miss claims that row with one ordered write. Fails with
/// [`Error::RouteTableFull`] when every row is valid and none match.
pub fn route_id<M: Mmio>(mmio: &M, entry: NocRoute) -> crate::Result<u16> {
    let target = entry.bits();
    let mut first_invalid = None;
    for id in 0..NOC_ROUTE_TABLE_NUMBER as u64 {
        let row = mmio.read(noc_rt::BASE + id * noc_rt::ELEM_SIZE);
        if row == target {
            return Ok(id as u16);
        }
        if first_invalid.is_none() && !NocRoute::from_bits(row).get(NocRoute::VALID) {
            first_invalid = Some(id);
        }
    }
    let Some(id) = first_invalid else {
        tracing::error!("NoC route table full");
        return Err(Error::RouteTableFull);
    };
    mmio.write(noc_rt::BASE + id * noc_rt::ELEM_SIZE, target);
    Ok(id as u16)
}
