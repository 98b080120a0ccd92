//! One 2D-DMA hardware instance: its channels, the pending queue and the
//! interrupt-driven completion path.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;

use crate::allocator::{try_allocate, Allocation, Capabilities, ChannelPools, ChannelRequest};
use crate::channel::{Channel, ChannelRef, EventData};
use crate::error::Dma2dError;
use crate::factory::ReservedChannels;
use crate::hal::{
    Direction, Dma2dHal, RxEvents, TxEvents, MAX_CHANNELS_PER_TRANSACTION,
    MAX_TX_PER_TRANSACTION, RX_CHANNELS, TX_CHANNELS,
};
use crate::mask::ChannelMask;
use crate::queue::PendingQueue;
use crate::transaction::{
    Admission, ChannelFlags, NodeStage, TransactionDesc, TransactionNode,
};

/// State guarded by the group lock.
struct GroupState<H: Dma2dHal> {
    pools: ChannelPools,
    tx_m2m_free: ChannelMask,
    rx_m2m_free: ChannelMask,
    pending: PendingQueue<H>,
}

pub(crate) struct Group<H: Dma2dHal> {
    id: usize,
    hal: H,
    caps: Capabilities,
    tx_reserved: ChannelMask,
    rx_reserved: ChannelMask,
    state: Mutex<CriticalSectionRawMutex, RefCell<GroupState<H>>>,
    tx: [Channel<H>; TX_CHANNELS],
    rx: [Channel<H>; RX_CHANNELS],
}

impl<H: Dma2dHal> Group<H> {
    pub(crate) fn new(id: usize, hal: H, reserved: ReservedChannels) -> Self {
        let tx_reserved = reserved.tx.intersection(ChannelMask::first(TX_CHANNELS));
        let rx_reserved = reserved.rx.intersection(ChannelMask::first(RX_CHANNELS));
        let state = GroupState {
            pools: ChannelPools {
                tx_free: ChannelMask::first(TX_CHANNELS),
                rx_free: ChannelMask::first(RX_CHANNELS),
                tx_reserved,
                rx_reserved,
            },
            tx_m2m_free: H::TX_M2M_ID_MASK,
            rx_m2m_free: H::RX_M2M_ID_MASK,
            pending: PendingQueue::new(),
        };
        Self {
            id,
            hal,
            caps: Capabilities::of::<H>(),
            tx_reserved,
            rx_reserved,
            state: Mutex::new(RefCell::new(state)),
            tx: [const { Channel::new() }; TX_CHANNELS],
            rx: [const { Channel::new() }; RX_CHANNELS],
        }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn hal(&self) -> &H {
        &self.hal
    }

    pub(crate) fn into_hal(self) -> H {
        self.hal
    }

    /// Callers only construct ids that exist in `direction`.
    pub(crate) fn channel(&self, direction: Direction, id: u8) -> &Channel<H> {
        match direction {
            Direction::Tx => &self.tx[usize::from(id)],
            Direction::Rx => &self.rx[usize::from(id)],
        }
    }

    pub(crate) fn channel_ref(&self, direction: Direction, id: u8) -> Option<ChannelRef<'_, H>> {
        let count = match direction {
            Direction::Tx => TX_CHANNELS,
            Direction::Rx => RX_CHANNELS,
        };
        (usize::from(id) < count).then(|| ChannelRef::new(self, direction, id))
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut GroupState<H>) -> R) -> R {
        self.state.lock(|state| f(&mut state.borrow_mut()))
    }

    /// Run `f` on the free M2M peripheral ids of `direction` under the
    /// group lock.
    pub(crate) fn with_m2m_free<R>(
        &self,
        direction: Direction,
        f: impl FnOnce(&mut ChannelMask) -> R,
    ) -> R {
        self.with_state(|state| match direction {
            Direction::Tx => f(&mut state.tx_m2m_free),
            Direction::Rx => f(&mut state.rx_m2m_free),
        })
    }

    pub(crate) fn tx_free_mask(&self) -> ChannelMask {
        self.with_state(|state| state.pools.tx_free)
    }

    pub(crate) fn rx_free_mask(&self) -> ChannelMask {
        self.with_state(|state| state.pools.rx_free)
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.with_state(|state| state.pending.len())
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.with_state(|state| !state.pending.is_empty())
    }

    pub(crate) fn node_stage(&self, node: &TransactionNode<H>) -> NodeStage {
        self.with_state(|_| node.stage())
    }

    fn validate(&self, req: &ChannelRequest) -> Result<(), Dma2dError> {
        // Only an RX EOF or `force_end` frees channels, so every transaction
        // needs exactly one RX channel.
        let total = usize::from(req.tx_num) + usize::from(req.rx_num);
        let mut valid = req.rx_num == 1
            && usize::from(req.tx_num) <= MAX_TX_PER_TRANSACTION
            && total <= MAX_CHANNELS_PER_TRANSACTION;

        if !req.tx_mask.is_empty() {
            valid &= self.tx_reserved.contains_all(req.tx_mask)
                && req.tx_mask.count() == req.tx_num
                && (!req.flags.contains(ChannelFlags::TX_REORDER)
                    || self.caps.tx_reorder.contains_all(req.tx_mask))
                && (!req.flags.contains(ChannelFlags::TX_CSC)
                    || self.caps.tx_csc.contains_all(req.tx_mask));
        }
        if !req.rx_mask.is_empty() {
            valid &= self.rx_reserved.contains_all(req.rx_mask)
                && req.rx_mask.count() == req.rx_num
                && (!req.flags.contains(ChannelFlags::RX_REORDER)
                    || self.caps.rx_reorder.contains_all(req.rx_mask))
                && (!req.flags.contains(ChannelFlags::RX_CSC)
                    || self.caps.rx_csc.contains_all(req.rx_mask));
        }
        if req.flags.contains(ChannelFlags::SIBLING)
            && !req.tx_mask.is_empty()
            && !req.rx_mask.is_empty()
        {
            valid &= req.tx_mask == req.rx_mask;
        }

        if valid {
            Ok(())
        } else {
            error!("invalid argument");
            Err(Dma2dError::InvalidArg)
        }
    }

    pub(crate) fn enqueue(
        &self,
        desc: &TransactionDesc<H>,
        node: &'static TransactionNode<H>,
    ) -> Result<Admission, Dma2dError> {
        let req = desc.request();
        self.validate(&req)?;

        let granted = self.with_state(|state| {
            if node.stage() != NodeStage::Idle {
                error!("transaction already submitted");
                return Err(Dma2dError::InvalidState);
            }
            node.submit(*desc, self.id);
            match try_allocate(&mut state.pools, &self.caps, &req) {
                Some(allocation) => {
                    self.bind(node, req.flags, &allocation);
                    Ok(Some(allocation))
                }
                None => {
                    if req.is_explicit() {
                        state.pending.push_front(node);
                    } else {
                        state.pending.push_back(node);
                    }
                    node.mark_pending();
                    Ok(None)
                }
            }
        })?;

        match granted {
            Some(allocation) => {
                trace!("transaction dispatched on enqueue");
                let need_yield = self.notify_picked(desc, &allocation);
                Ok(Admission::Dispatched { need_yield })
            }
            None => {
                trace!("transaction queued");
                Ok(Admission::Queued)
            }
        }
    }

    /// Stamp every granted channel with its new owner. Group lock held.
    fn bind(
        &self,
        node: &'static TransactionNode<H>,
        flags: ChannelFlags,
        allocation: &Allocation,
    ) {
        for &id in &allocation.tx {
            self.channel(Direction::Tx, id).with_status(|status| {
                status.transaction = Some(node);
                status.reorder_en = flags.contains(ChannelFlags::TX_REORDER);
            });
        }
        if let Some(id) = allocation.rx {
            let bundled = allocation.bundled_tx();
            self.channel(Direction::Rx, id).with_status(|status| {
                status.transaction = Some(node);
                status.reorder_en = flags.contains(ChannelFlags::RX_REORDER);
                status.bundled_tx = bundled;
            });
        }
        node.mark_in_flight(allocation.rx);
    }

    /// Hand the granted channels to the transaction's owner. Must not be
    /// called with the group lock held.
    fn notify_picked(&self, desc: &TransactionDesc<H>, allocation: &Allocation) -> bool {
        let channels: Vec<ChannelRef<'_, H>, MAX_CHANNELS_PER_TRANSACTION> = allocation
            .tx
            .iter()
            .map(|&id| ChannelRef::new(self, Direction::Tx, id))
            .chain(allocation.rx.map(|id| ChannelRef::new(self, Direction::Rx, id)))
            .collect();
        (desc.on_job_picked)(&channels, desc.user_config)
    }

    /// Entry point for the interrupt of one channel.
    pub(crate) fn handle_interrupt(&self, direction: Direction, id: u8) -> bool {
        match direction {
            Direction::Tx if usize::from(id) < TX_CHANNELS => self.service_tx(id),
            Direction::Rx if usize::from(id) < RX_CHANNELS => self.service_rx(id),
            _ => false,
        }
    }

    fn service_tx(&self, id: u8) -> bool {
        let hal = &self.hal;
        let (events, on_desc_done, user_data, transaction) =
            self.channel(Direction::Tx, id).with_status(|status| {
                let raw = hal.interrupt_status(Direction::Tx, id);
                hal.clear_interrupt_status(Direction::Tx, id, raw);
                (
                    TxEvents::from_bits_truncate(raw),
                    status.on_desc_done,
                    status.user_data,
                    status.transaction,
                )
            });

        let mut need_yield = false;
        if events.contains(TxEvents::DONE) {
            if let Some(callback) = on_desc_done {
                let data = EventData { transaction, rx_eof_desc_addr: 0 };
                need_yield |= callback(ChannelRef::new(self, Direction::Tx, id), &data, user_data);
            }
        }
        need_yield
    }

    fn service_rx(&self, id: u8) -> bool {
        let hal = &self.hal;
        let (events, snapshot) = self.channel(Direction::Rx, id).with_status(|status| {
            let raw = hal.interrupt_status(Direction::Rx, id);
            hal.clear_interrupt_status(Direction::Rx, id, raw);
            (
                RxEvents::from_bits_truncate(raw),
                (
                    status.on_desc_done,
                    status.on_recv_eof,
                    status.user_data,
                    status.transaction,
                    status.bundled_tx,
                ),
            )
        });
        let (on_desc_done, on_recv_eof, user_data, transaction, bundled_tx) = snapshot;

        // The RX EOF can be caused by a bundled TX channel finishing, so the
        // TX side goes first.
        let mut need_yield = false;
        for tx in bundled_tx {
            need_yield |= self.service_tx(tx);
        }

        let this = ChannelRef::new(self, Direction::Rx, id);
        if events.contains(RxEvents::DONE) {
            if let Some(callback) = on_desc_done {
                let data = EventData { transaction, rx_eof_desc_addr: 0 };
                need_yield |= callback(this, &data, user_data);
            }
        }

        if events.intersects(RxEvents::TERMINAL) {
            if events.contains(RxEvents::SUC_EOF) {
                assert!(hal.is_fsm_idle(Direction::Rx, id));
            }
            let rx_eof_desc_addr = hal.rx_success_eof_desc_addr(id);
            need_yield |= self.release(id, None);
            if let Some(callback) = on_recv_eof {
                let data = EventData { transaction, rx_eof_desc_addr };
                need_yield |= callback(this, &data, user_data);
            }
        }
        need_yield
    }

    /// Free the RX channel `rx_id` together with its bundled TX channels and
    /// hand the freed channels to the head of the queue if they satisfy it.
    ///
    /// With `expected` set, nothing happens unless that node still owns the
    /// RX channel.
    fn release(
        &self,
        rx_id: u8,
        expected: Option<&'static TransactionNode<H>>,
    ) -> bool {
        let hal = &self.hal;
        let next = self.with_state(|state| {
            let mut rx_m2m = ChannelMask::EMPTY;
            let released = self.channel(Direction::Rx, rx_id).with_status(|status| {
                let node = status.transaction?;
                if expected.is_some_and(|expected| !core::ptr::eq(node, expected)) {
                    return None;
                }
                hal.enable_interrupt(Direction::Rx, rx_id, u32::MAX, false);
                hal.disconnect_from_periph(Direction::Rx, rx_id);
                let bundled = status.bundled_tx;
                if let Some(sel) = status.unbind() {
                    if H::RX_M2M_ID_MASK.contains(sel) {
                        rx_m2m.insert(sel);
                    }
                }
                Some((node, bundled))
            });
            let (node, bundled) = released?;

            let mut tx_m2m = ChannelMask::EMPTY;
            for tx in bundled {
                self.channel(Direction::Tx, tx).with_status(|status| {
                    hal.enable_interrupt(Direction::Tx, tx, u32::MAX, false);
                    hal.disconnect_from_periph(Direction::Tx, tx);
                    if let Some(sel) = status.unbind() {
                        if H::TX_M2M_ID_MASK.contains(sel) {
                            tx_m2m.insert(sel);
                        }
                    }
                });
            }
            node.mark_idle();

            state.pools.tx_free = state.pools.tx_free.union(bundled);
            state.pools.rx_free.insert(rx_id);
            state.tx_m2m_free = state.tx_m2m_free.union(tx_m2m);
            state.rx_m2m_free = state.rx_m2m_free.union(rx_m2m);
            trace!("released rx channel {}", rx_id);

            // Only the head is considered, later entries wait their turn.
            let head = state.pending.front()?;
            let desc = head.desc()?;
            let req = desc.request();
            let allocation = try_allocate(&mut state.pools, &self.caps, &req)?;
            state.pending.pop_front();
            self.bind(head, req.flags, &allocation);
            Some((desc, allocation))
        });

        match next {
            Some((desc, allocation)) => {
                trace!("pending transaction dispatched");
                self.notify_picked(&desc, &allocation)
            }
            None => false,
        }
    }

    /// Abort an in-flight transaction and free its channels.
    pub(crate) fn force_end(
        &self,
        node: &'static TransactionNode<H>,
    ) -> Result<bool, Dma2dError> {
        let hal = &self.hal;
        let rx_id = self.with_state(|state| {
            let rx_id = match (node.group_id(), node.rx_channel()) {
                (Some(group_id), Some(rx_id)) if group_id == self.id => rx_id,
                _ => {
                    error!("invalid argument");
                    return Err(Dma2dError::InvalidArg);
                }
            };
            let owned = node.stage() == NodeStage::InFlight
                && !state.pools.rx_free.contains(rx_id)
                && self
                    .channel(Direction::Rx, rx_id)
                    .with_status(|status| status.is_owned_by(node));
            if !owned {
                error!("transaction not in-flight");
                return Err(Dma2dError::InvalidState);
            }
            let bundled = self.channel(Direction::Rx, rx_id).with_status(|status| {
                hal.enable_interrupt(Direction::Rx, rx_id, u32::MAX, false);
                hal.stop(Direction::Rx, rx_id);
                status.bundled_tx
            });
            for tx in bundled {
                self.channel(Direction::Tx, tx)
                    .with_status(|_| hal.stop(Direction::Tx, tx));
            }
            Ok(rx_id)
        })?;

        warn!("transaction on rx channel {} force ended", rx_id);
        Ok(self.release(rx_id, Some(node)))
    }
}
