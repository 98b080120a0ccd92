//! Channel admission.
//!
//! Runs under the group lock. A request either gets every channel it asks for
//! or leaves the pools exactly as it found them.

use heapless::Vec;

use crate::hal::{Dma2dHal, MAX_TX_PER_TRANSACTION};
use crate::mask::ChannelMask;
use crate::transaction::ChannelFlags;

/// Free and reserved channels of one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChannelPools {
    pub tx_free: ChannelMask,
    pub rx_free: ChannelMask,
    pub tx_reserved: ChannelMask,
    pub rx_reserved: ChannelMask,
}

/// Which channels carry the optional features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Capabilities {
    pub tx_reorder: ChannelMask,
    pub tx_csc: ChannelMask,
    pub rx_reorder: ChannelMask,
    pub rx_csc: ChannelMask,
}

impl Capabilities {
    pub(crate) fn of<H: Dma2dHal>() -> Self {
        Self {
            tx_reorder: H::TX_REORDER_MASK,
            tx_csc: H::TX_CSC_MASK,
            rx_reorder: H::RX_REORDER_MASK,
            rx_csc: H::RX_CSC_MASK,
        }
    }
}

/// The allocation-relevant part of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChannelRequest {
    pub tx_num: u8,
    pub rx_num: u8,
    pub flags: ChannelFlags,
    pub tx_mask: ChannelMask,
    pub rx_mask: ChannelMask,
}

impl ChannelRequest {
    /// Requests naming exact channels jump the queue.
    pub(crate) fn is_explicit(&self) -> bool {
        !self.tx_mask.is_empty() || !self.rx_mask.is_empty()
    }

    fn wants_sibling(&self) -> bool {
        self.flags.contains(ChannelFlags::SIBLING)
            && self.tx_num > 0
            && self.rx_num > 0
            && self.rx_mask.is_empty()
    }
}

/// Channels granted to one transaction.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Allocation {
    /// TX ids in pick order.
    pub tx: Vec<u8, MAX_TX_PER_TRANSACTION>,
    pub rx: Option<u8>,
}

impl Allocation {
    pub(crate) fn bundled_tx(&self) -> ChannelMask {
        self.tx.iter().copied().collect()
    }
}

/// Try to satisfy `req` from `pools`.
///
/// Default requests take the highest-numbered candidate first, since channel
/// 0 carries every optional feature. When a sibling request finds no RX twin
/// among its highest picks, the first TX pick is retried on the highest TX
/// candidate that has one.
pub(crate) fn try_allocate(
    pools: &mut ChannelPools,
    caps: &Capabilities,
    req: &ChannelRequest,
) -> Option<Allocation> {
    let snapshot = *pools;
    let mut allocation = pick(pools, caps, req, None);

    if allocation.is_none() && req.wants_sibling() {
        *pools = snapshot;
        let twins = tx_candidates(pools, caps, req)
            .intersection(rx_filter(caps, req.flags, pools.rx_free));
        if let Some(first) = twins.highest() {
            allocation = pick(pools, caps, req, Some(first));
        }
    }

    if allocation.is_none() {
        *pools = snapshot;
    }
    allocation
}

fn pick(
    pools: &mut ChannelPools,
    caps: &Capabilities,
    req: &ChannelRequest,
    first_tx: Option<u8>,
) -> Option<Allocation> {
    let mut allocation = Allocation::default();

    if req.tx_num > 0 {
        let mut candidates = tx_candidates(pools, caps, req);
        for n in 0..req.tx_num {
            let id = match first_tx {
                Some(id) if n == 0 => id,
                _ => candidates.highest()?,
            };
            candidates.clear(id);
            pools.tx_free.clear(id);
            allocation.tx.push(id).ok()?;
        }
    }

    if req.rx_num > 0 {
        let candidates = if !req.rx_mask.is_empty() {
            explicit(pools.rx_free, req.rx_mask)
        } else if req.flags.contains(ChannelFlags::SIBLING) {
            pools.rx_free.intersection(allocation.bundled_tx())
        } else {
            pools.rx_free.difference(pools.rx_reserved)
        };
        let id = rx_filter(caps, req.flags, candidates).highest()?;
        pools.rx_free.clear(id);
        allocation.rx = Some(id);
    }

    Some(allocation)
}

fn tx_candidates(
    pools: &ChannelPools,
    caps: &Capabilities,
    req: &ChannelRequest,
) -> ChannelMask {
    let mut candidates = if !req.tx_mask.is_empty() {
        explicit(pools.tx_free, req.tx_mask)
    } else {
        pools.tx_free.difference(pools.tx_reserved)
    };
    if req.flags.contains(ChannelFlags::TX_REORDER) {
        candidates = candidates.intersection(caps.tx_reorder);
    }
    if req.flags.contains(ChannelFlags::TX_CSC) {
        candidates = candidates.intersection(caps.tx_csc);
    }
    candidates
}

fn rx_filter(
    caps: &Capabilities,
    flags: ChannelFlags,
    mut candidates: ChannelMask,
) -> ChannelMask {
    if flags.contains(ChannelFlags::RX_REORDER) {
        candidates = candidates.intersection(caps.rx_reorder);
    }
    if flags.contains(ChannelFlags::RX_CSC) {
        candidates = candidates.intersection(caps.rx_csc);
    }
    candidates
}

/// An explicit mask is usable only if all of it is free.
fn explicit(free: ChannelMask, mask: ChannelMask) -> ChannelMask {
    if free.contains_all(mask) {
        mask
    } else {
        ChannelMask::EMPTY
    }
}
