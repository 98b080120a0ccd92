use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::channel::ChannelRef;
use crate::error::Dma2dError;
use crate::factory::Dma2dFactory;
use crate::group::Group;
use crate::hal::Direction;
use crate::mask::ChannelMask;
use crate::platform::Platform;
use crate::transaction::{Admission, NodeStage, TransactionDesc, TransactionNode};

/// A counted reference to one group's channel pool.
///
/// Dropping a handle does **not** give the reference back; the group then
/// simply stays up. Call [`release`](Self::release) when done.
pub struct PoolHandle<'p, M: RawMutex, F: Dma2dFactory> {
    platform: &'p Platform<M, F>,
    group: *const Group<F::Hal>,
    group_id: usize,
}

// SAFETY: A PoolHandle is conceptually a shared reference to the platform and
// to its group. The group only hands out `&self` operations guarded by
// critical sections, so sharing follows from the platform being Sync.
unsafe impl<M: RawMutex, F: Dma2dFactory> Send for PoolHandle<'_, M, F> where
    Platform<M, F>: Sync
{
}

// SAFETY: See above.
unsafe impl<M: RawMutex, F: Dma2dFactory> Sync for PoolHandle<'_, M, F> where
    Platform<M, F>: Sync
{
}

impl<M: RawMutex, F: Dma2dFactory> core::fmt::Debug for PoolHandle<'_, M, F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("group_id", &self.group_id)
            .finish_non_exhaustive()
    }
}

impl<'p, M: RawMutex, F: Dma2dFactory> PoolHandle<'p, M, F> {
    /// Only called by `Platform`.
    pub(crate) fn new(
        platform: &'p Platform<M, F>,
        group: &Group<F::Hal>,
        group_id: usize,
    ) -> Self {
        Self { platform, group, group_id }
    }

    fn group(&self) -> &Group<F::Hal> {
        // SAFETY: The handle holds one reference count of its group. The
        // platform only drops a group whose count is zero, and only
        // `Platform::release_pool` (which consumes the handle) decrements it.
        unsafe { &*self.group }
    }

    pub fn group_id(&self) -> usize {
        self.group_id
    }

    /// Submit a transaction.
    ///
    /// If channels are available now, `on_job_picked` runs before this
    /// returns. Otherwise the node waits in the queue and `on_job_picked` runs
    /// from the interrupt that frees enough channels.
    pub fn enqueue(
        &self,
        desc: &TransactionDesc<F::Hal>,
        node: &'static TransactionNode<F::Hal>,
    ) -> Result<Admission, Dma2dError> {
        self.group().enqueue(desc, node)
    }

    /// Stop an in-flight transaction and free its channels.
    ///
    /// Returns `true` if a higher-priority task was woken by the next
    /// transaction being dispatched.
    pub fn force_end(
        &self,
        node: &'static TransactionNode<F::Hal>,
    ) -> Result<bool, Dma2dError> {
        self.group().force_end(node)
    }

    pub fn channel(&self, direction: Direction, id: u8) -> Option<ChannelRef<'_, F::Hal>> {
        self.group().channel_ref(direction, id)
    }

    pub fn tx_free_mask(&self) -> ChannelMask {
        self.group().tx_free_mask()
    }

    pub fn rx_free_mask(&self) -> ChannelMask {
        self.group().rx_free_mask()
    }

    /// Number of transactions waiting for channels.
    pub fn pending_len(&self) -> usize {
        self.group().pending_len()
    }

    pub fn node_stage(&self, node: &TransactionNode<F::Hal>) -> NodeStage {
        self.group().node_stage(node)
    }

    /// Shorthand for [`Platform::release_pool`].
    pub async fn release(self) -> Result<(), (Dma2dError, Self)> {
        let platform = self.platform;
        platform.release_pool(self).await
    }
}
