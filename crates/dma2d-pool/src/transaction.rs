//! Transaction descriptors and the caller-owned queue nodes that carry them.

use core::cell::Cell;

use bitflags::bitflags;

use crate::allocator::ChannelRequest;
use crate::channel::ChannelRef;
use crate::hal::Dma2dHal;
use crate::mask::ChannelMask;

bitflags! {
    /// Features a transaction needs from its channels.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChannelFlags: u32 {
        /// TX channel must support macro-block reordering.
        const TX_REORDER = 1 << 0;
        /// RX channel must support macro-block reordering.
        const RX_REORDER = 1 << 1;
        /// TX channel must have a color-space converter.
        const TX_CSC = 1 << 2;
        /// RX channel must have a color-space converter.
        const RX_CSC = 1 << 3;
        /// RX channel must share its id with one of the TX channels.
        const SIBLING = 1 << 4;
    }
}

/// Opaque pointer handed back to callbacks untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserData(*mut ());

impl UserData {
    pub const NONE: Self = Self(core::ptr::null_mut());

    pub const fn new(ptr: *mut ()) -> Self {
        Self(ptr)
    }

    pub const fn as_ptr(self) -> *mut () {
        self.0
    }
}

impl Default for UserData {
    fn default() -> Self {
        Self::NONE
    }
}

// SAFETY: The scheduler never dereferences the pointer; it is only carried
// from registration to the callback that the owner registered.
unsafe impl Send for UserData {}
// SAFETY: See above.
unsafe impl Sync for UserData {}

/// Called once a transaction has been granted its channels.
///
/// Channels are listed TX first in pick order, then RX. Runs in task context
/// when granted from `enqueue`, in interrupt context when granted from the
/// queue. Returns `true` if a higher-priority task was woken.
pub type OnJobPicked<H> = fn(&[ChannelRef<'_, H>], UserData) -> bool;

/// An immutable request for a set of channels.
pub struct TransactionDesc<H: Dma2dHal> {
    /// Number of TX channels, `0..=2`.
    pub tx_channel_num: u8,
    /// Number of RX channels, `0` or `1`.
    pub rx_channel_num: u8,
    pub channel_flags: ChannelFlags,
    /// Exact TX channels to use. Empty means any suitable channel.
    pub specified_tx_channel_mask: ChannelMask,
    /// Exact RX channels to use. Empty means any suitable channel.
    pub specified_rx_channel_mask: ChannelMask,
    pub on_job_picked: OnJobPicked<H>,
    pub user_config: UserData,
}

impl<H: Dma2dHal> TransactionDesc<H> {
    /// A default-allocation request with no feature requirements.
    pub const fn new(
        tx_channel_num: u8,
        rx_channel_num: u8,
        on_job_picked: OnJobPicked<H>,
    ) -> Self {
        Self {
            tx_channel_num,
            rx_channel_num,
            channel_flags: ChannelFlags::empty(),
            specified_tx_channel_mask: ChannelMask::EMPTY,
            specified_rx_channel_mask: ChannelMask::EMPTY,
            on_job_picked,
            user_config: UserData::NONE,
        }
    }

    pub(crate) fn request(&self) -> ChannelRequest {
        ChannelRequest {
            tx_num: self.tx_channel_num,
            rx_num: self.rx_channel_num,
            flags: self.channel_flags,
            tx_mask: self.specified_tx_channel_mask,
            rx_mask: self.specified_rx_channel_mask,
        }
    }
}

impl<H: Dma2dHal> Clone for TransactionDesc<H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H: Dma2dHal> Copy for TransactionDesc<H> {}

/// Result of a successful [`enqueue`](crate::PoolHandle::enqueue).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Admission {
    /// Channels were granted and `on_job_picked` already ran.
    Dispatched { need_yield: bool },
    /// No channels were available; the transaction waits in the queue.
    Queued,
}

/// Lifecycle of a [`TransactionNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeStage {
    Idle,
    /// Linked into a group's pending queue.
    Pending,
    /// Holding channels.
    InFlight,
}

/// Caller-owned storage for one submitted transaction.
///
/// A node is the queue link of its transaction; the scheduler never allocates
/// nor frees it. It can be resubmitted once its previous transaction has
/// finished.
pub struct TransactionNode<H: Dma2dHal> {
    desc: Cell<Option<TransactionDesc<H>>>,
    next: Cell<Option<&'static TransactionNode<H>>>,
    stage: Cell<NodeStage>,
    group_id: Cell<Option<usize>>,
    rx_channel: Cell<Option<u8>>,
}

// SAFETY: Every field is only read or written while holding the lock of the
// group the node was submitted to. That lock is a critical section, so no two
// contexts touch the cells concurrently.
unsafe impl<H: Dma2dHal> Sync for TransactionNode<H> {}

impl<H: Dma2dHal> TransactionNode<H> {
    pub const fn new() -> Self {
        Self {
            desc: Cell::new(None),
            next: Cell::new(None),
            stage: Cell::new(NodeStage::Idle),
            group_id: Cell::new(None),
            rx_channel: Cell::new(None),
        }
    }

    pub(crate) fn desc(&self) -> Option<TransactionDesc<H>> {
        self.desc.get()
    }

    pub(crate) fn stage(&self) -> NodeStage {
        self.stage.get()
    }

    pub(crate) fn group_id(&self) -> Option<usize> {
        self.group_id.get()
    }

    pub(crate) fn rx_channel(&self) -> Option<u8> {
        self.rx_channel.get()
    }

    pub(crate) fn next(&self) -> Option<&'static TransactionNode<H>> {
        self.next.get()
    }

    pub(crate) fn set_next(&self, next: Option<&'static TransactionNode<H>>) {
        self.next.set(next);
    }

    /// Record a fresh submission to `group_id`.
    pub(crate) fn submit(&self, desc: TransactionDesc<H>, group_id: usize) {
        self.desc.set(Some(desc));
        self.group_id.set(Some(group_id));
        self.rx_channel.set(None);
        self.next.set(None);
    }

    pub(crate) fn mark_pending(&self) {
        self.stage.set(NodeStage::Pending);
    }

    pub(crate) fn mark_in_flight(&self, rx_channel: Option<u8>) {
        self.stage.set(NodeStage::InFlight);
        self.rx_channel.set(rx_channel);
    }

    /// The RX channel id is kept so that a late `force_end` reports the
    /// transaction as no longer in flight.
    pub(crate) fn mark_idle(&self) {
        self.stage.set(NodeStage::Idle);
    }
}

impl<H: Dma2dHal> Default for TransactionNode<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Size of the storage a caller must provide per transaction.
pub const fn transaction_node_size<H: Dma2dHal>() -> usize {
    core::mem::size_of::<TransactionNode<H>>()
}
