use alloc::boxed::Box;
use core::alloc::Layout;
use core::ptr;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use portable_atomic::{AtomicPtr, Ordering};

use crate::config::{PoolConfig, MAX_INTR_PRIORITY};
use crate::error::Dma2dError;
use crate::factory::{Dma2dFactory, InterruptSource};
use crate::group::Group;
use crate::hal::{Direction, Dma2dHal, GROUPS, RX_CHANNELS, TX_CHANNELS};
use crate::pool::PoolHandle;

/// Book-keeping for one hardware group.
struct GroupSlot<F: Dma2dFactory> {
    group: Option<Box<Group<F::Hal>>>,
    ref_count: usize,
    /// Fixed by the first acquirer, cleared on teardown.
    intr_priority: Option<u8>,
    tx_intr: [Option<F::Interrupt>; TX_CHANNELS],
    rx_intr: [Option<F::Interrupt>; RX_CHANNELS],
}

impl<F: Dma2dFactory> GroupSlot<F> {
    const fn new() -> Self {
        Self {
            group: None,
            ref_count: 0,
            intr_priority: None,
            tx_intr: [const { None }; TX_CHANNELS],
            rx_intr: [const { None }; RX_CHANNELS],
        }
    }
}

/// Owner of every 2D-DMA group.
///
/// A group is brought up on the first [`acquire_pool`](Self::acquire_pool)
/// and torn down once the last handle is released. Usually lives in a
/// `static` so that the interrupt vectors can reach
/// [`on_interrupt`](Self::on_interrupt).
pub struct Platform<M: RawMutex, F: Dma2dFactory> {
    factory: F,
    slots: Mutex<M, [GroupSlot<F>; GROUPS]>,
    /// Live groups for the interrupt path, which cannot take `slots`.
    published: [AtomicPtr<Group<F::Hal>>; GROUPS],
}

impl<M: RawMutex, F: Dma2dFactory> Platform<M, F> {
    pub const fn new(factory: F) -> Self {
        Self {
            factory,
            slots: Mutex::new([const { GroupSlot::new() }; GROUPS]),
            published: [const { AtomicPtr::new(ptr::null_mut()) }; GROUPS],
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Acquire a handle to the pool of channels of `config.pool_id`.
    ///
    /// The first caller of a group fixes its interrupt priority. Later
    /// callers must pass `0` or the same priority.
    pub async fn acquire_pool(
        &self,
        config: PoolConfig,
    ) -> Result<PoolHandle<'_, M, F>, Dma2dError> {
        if config.pool_id >= GROUPS || config.intr_priority > MAX_INTR_PRIORITY {
            error!("invalid argument");
            return Err(Dma2dError::InvalidArg);
        }
        let group_id = config.pool_id;

        let mut slots = self.slots.lock().await;
        let slot = &mut slots[group_id];

        if slot.group.is_none() {
            let group = self.create_group(group_id)?;
            let group_ptr = &*group as *const Group<F::Hal> as *mut Group<F::Hal>;
            slot.group = Some(group);
            self.published[group_id].store(group_ptr, Ordering::Release);
            debug!("new group ({}) created", group_id);
        }
        slot.ref_count += 1;

        if let Err(err) = self.install_interrupts(slot, group_id, config.intr_priority) {
            self.unref(slot, group_id);
            return Err(err);
        }

        match slot.group.as_deref() {
            Some(group) => Ok(PoolHandle::new(self, group, group_id)),
            None => Err(Dma2dError::InvalidState),
        }
    }

    fn create_group(&self, group_id: usize) -> Result<Box<Group<F::Hal>>, Dma2dError> {
        let hal = self.factory.bring_up(group_id).map_err(|_| {
            error!("bring up of group {} failed", group_id);
            Dma2dError::Fail
        })?;
        let reserved = self.factory.reserved_channels(group_id);
        try_box(Group::new(group_id, hal, reserved)).map_err(|group| {
            error!("no mem for group ({})", group_id);
            self.factory.tear_down(group_id, group.into_hal());
            Dma2dError::NoMemory
        })
    }

    fn install_interrupts(
        &self,
        slot: &mut GroupSlot<F>,
        group_id: usize,
        intr_priority: u8,
    ) -> Result<(), Dma2dError> {
        match slot.intr_priority {
            None => slot.intr_priority = Some(intr_priority),
            Some(fixed) if intr_priority != 0 && fixed != intr_priority => {
                error!("intr_priority conflict, already is {} but attempt to {}", fixed, intr_priority);
                return Err(Dma2dError::InvalidState);
            }
            Some(_) => {}
        }
        let priority = slot.intr_priority.unwrap_or(intr_priority);

        let Some(group) = slot.group.as_deref() else {
            return Err(Dma2dError::InvalidState);
        };
        let hal = group.hal();

        let lines = slot
            .rx_intr
            .iter_mut()
            .enumerate()
            .map(|(id, intr)| (Direction::Rx, id, intr))
            .chain(
                slot.tx_intr
                    .iter_mut()
                    .enumerate()
                    .map(|(id, intr)| (Direction::Tx, id, intr)),
            );
        for (direction, id, intr) in lines {
            if intr.is_some() {
                continue;
            }
            let channel_id = id as u8;
            let source = InterruptSource {
                group_id,
                direction,
                channel_id,
                status_reg: hal.interrupt_status_reg(direction, channel_id),
            };
            match self.factory.alloc_interrupt(source, priority) {
                Ok(handle) => *intr = Some(handle),
                Err(_) => {
                    error!("alloc interrupt failed on channel {}", channel_id);
                    return Err(Dma2dError::Fail);
                }
            }
        }
        Ok(())
    }

    /// Drop one reference, tearing the group down when it was the last.
    fn unref(&self, slot: &mut GroupSlot<F>, group_id: usize) {
        slot.ref_count = slot.ref_count.saturating_sub(1);
        if slot.ref_count == 0 {
            self.tear_down(slot, group_id);
        }
    }

    fn tear_down(&self, slot: &mut GroupSlot<F>, group_id: usize) {
        for intr in slot.rx_intr.iter_mut().chain(slot.tx_intr.iter_mut()) {
            if let Some(intr) = intr.take() {
                self.factory.free_interrupt(intr);
            }
        }
        self.published[group_id].store(ptr::null_mut(), Ordering::Release);
        slot.intr_priority = None;
        if let Some(group) = slot.group.take() {
            self.factory.tear_down(group_id, group.into_hal());
            debug!("group ({}) freed", group_id);
        }
    }

    /// Give a pool handle back.
    ///
    /// Fails with [`Dma2dError::NotAllowed`] when this was the last handle
    /// and transactions are still waiting in the queue; the handle is
    /// returned so that nothing is lost.
    pub async fn release_pool<'p>(
        &'p self,
        pool: PoolHandle<'p, M, F>,
    ) -> Result<(), (Dma2dError, PoolHandle<'p, M, F>)> {
        let group_id = pool.group_id();
        let mut slots = self.slots.lock().await;
        let slot = &mut slots[group_id];

        slot.ref_count = slot.ref_count.saturating_sub(1);
        if slot.ref_count == 0 {
            let pending = slot.group.as_deref().is_some_and(Group::has_pending);
            if pending {
                slot.ref_count += 1;
                error!("pending transaction in the pool");
                return Err((Dma2dError::NotAllowed, pool));
            }
            self.tear_down(slot, group_id);
        }
        Ok(())
    }

    /// Interrupt entry point for one channel.
    ///
    /// Returns `true` if a callback woke a higher-priority task, in which case
    /// the factory has already been asked to yield.
    pub fn on_interrupt(&self, group_id: usize, direction: Direction, channel_id: u8) -> bool {
        let Some(published) = self.published.get(group_id) else {
            return false;
        };
        let group = published.load(Ordering::Acquire);
        if group.is_null() {
            return false;
        }
        // SAFETY: A group is published only while it is alive. Teardown frees
        // the interrupts, unpublishes and only then drops the group, so a
        // non-null pointer seen here refers to a live group.
        let group = unsafe { &*group };
        let need_yield = group.handle_interrupt(direction, channel_id);
        if need_yield {
            self.factory.yield_from_isr();
        }
        need_yield
    }

    /// Current number of pool handles of `group_id`.
    ///
    /// Returns `None` for an unknown group or when the platform is busy.
    pub fn ref_count(&self, group_id: usize) -> Option<usize> {
        let slots = self.slots.try_lock().ok()?;
        slots.get(group_id).map(|slot| slot.ref_count)
    }
}

/// `Box::new` that reports allocation failure instead of aborting.
fn try_box<T>(value: T) -> Result<Box<T>, T> {
    let layout = Layout::new::<T>();
    if layout.size() == 0 {
        return Ok(Box::new(value));
    }
    // SAFETY: `layout` has a non-zero size.
    let raw = unsafe { alloc::alloc::alloc(layout) }.cast::<T>();
    if raw.is_null() {
        return Err(value);
    }
    // SAFETY: `raw` is a fresh allocation with the layout of `T`, which is
    // what `Box` expects to own and free.
    unsafe {
        raw.write(value);
        Ok(Box::from_raw(raw))
    }
}

