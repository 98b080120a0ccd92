//! Channels and the handle consumers use to drive them.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::config::{
    CscConfig, CscRxOption, CscTxOption, DataBurstLength, MacroBlockSize,
    ScrambleOrder, StrategyConfig, TransferAbility, Trigger, TriggerPeripheral,
};
use crate::error::Dma2dError;
use crate::group::Group;
use crate::hal::{Direction, Dma2dHal, RxEvents, TxEvents};
use crate::mask::ChannelMask;
use crate::transaction::{TransactionNode, UserData};

/// Channel event callback. Runs in interrupt context and returns `true` if
/// a higher-priority task was woken.
pub type EventCallback<H> = fn(ChannelRef<'_, H>, &EventData<H>, UserData) -> bool;

/// Event details passed to an [`EventCallback`].
pub struct EventData<H: Dma2dHal> {
    /// Transaction that owned the channel when the event fired.
    pub transaction: Option<&'static TransactionNode<H>>,
    /// Descriptor that raised the last successful RX EOF, `0` otherwise.
    pub rx_eof_desc_addr: usize,
}

/// Callbacks of a TX channel.
pub struct TxEventCallbacks<H: Dma2dHal> {
    pub on_desc_done: Option<EventCallback<H>>,
}

impl<H: Dma2dHal> Default for TxEventCallbacks<H> {
    fn default() -> Self {
        Self { on_desc_done: None }
    }
}

/// Callbacks of an RX channel.
pub struct RxEventCallbacks<H: Dma2dHal> {
    /// Called after the transaction finished and its channels were freed.
    pub on_recv_eof: Option<EventCallback<H>>,
    pub on_desc_done: Option<EventCallback<H>>,
}

impl<H: Dma2dHal> Default for RxEventCallbacks<H> {
    fn default() -> Self {
        Self { on_recv_eof: None, on_desc_done: None }
    }
}

/// Per-channel state guarded by the channel lock.
pub(crate) struct ChannelStatus<H: Dma2dHal> {
    pub transaction: Option<&'static TransactionNode<H>>,
    pub reorder_en: bool,
    pub periph_sel_id: Option<u8>,
    pub on_desc_done: Option<EventCallback<H>>,
    pub on_recv_eof: Option<EventCallback<H>>,
    pub user_data: UserData,
    /// TX channels granted together with this RX channel.
    pub bundled_tx: ChannelMask,
}

impl<H: Dma2dHal> ChannelStatus<H> {
    const fn new() -> Self {
        Self {
            transaction: None,
            reorder_en: false,
            periph_sel_id: None,
            on_desc_done: None,
            on_recv_eof: None,
            user_data: UserData::NONE,
            bundled_tx: ChannelMask::EMPTY,
        }
    }

    /// Drop everything tied to the finished transaction and hand back the
    /// peripheral id it held.
    pub(crate) fn unbind(&mut self) -> Option<u8> {
        self.transaction = None;
        self.reorder_en = false;
        self.on_desc_done = None;
        self.on_recv_eof = None;
        self.user_data = UserData::NONE;
        self.bundled_tx = ChannelMask::EMPTY;
        self.periph_sel_id.take()
    }

    pub(crate) fn is_owned_by(&self, node: &TransactionNode<H>) -> bool {
        self.transaction.is_some_and(|owner| core::ptr::eq(owner, node))
    }
}

pub(crate) struct Channel<H: Dma2dHal> {
    status: Mutex<CriticalSectionRawMutex, RefCell<ChannelStatus<H>>>,
}

impl<H: Dma2dHal> Channel<H> {
    pub(crate) const fn new() -> Self {
        Self { status: Mutex::new(RefCell::new(ChannelStatus::new())) }
    }

    pub(crate) fn with_status<R>(
        &self,
        f: impl FnOnce(&mut ChannelStatus<H>) -> R,
    ) -> R {
        self.status.lock(|status| f(&mut status.borrow_mut()))
    }
}

/// Handle to one channel of a group.
///
/// Handed to `on_job_picked` for every granted channel and to event
/// callbacks. Configuration calls are valid from task and interrupt context.
pub struct ChannelRef<'a, H: Dma2dHal> {
    group: &'a Group<H>,
    direction: Direction,
    id: u8,
}

impl<H: Dma2dHal> Clone for ChannelRef<'_, H> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<H: Dma2dHal> Copy for ChannelRef<'_, H> {}

impl<H: Dma2dHal> core::fmt::Debug for ChannelRef<'_, H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChannelRef")
            .field("group", &self.group.id())
            .field("direction", &self.direction)
            .field("id", &self.id)
            .finish()
    }
}

impl<'a, H: Dma2dHal> ChannelRef<'a, H> {
    /// `id` must be a valid channel of `direction` in `group`.
    pub(crate) fn new(group: &'a Group<H>, direction: Direction, id: u8) -> Self {
        Self { group, direction, id }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn group_id(&self) -> usize {
        self.group.id()
    }

    fn channel(&self) -> &'a Channel<H> {
        self.group.channel(self.direction, self.id)
    }

    fn hal(&self) -> &'a H {
        self.group.hal()
    }

    fn m2m_id_mask(&self) -> ChannelMask {
        match self.direction {
            Direction::Tx => H::TX_M2M_ID_MASK,
            Direction::Rx => H::RX_M2M_ID_MASK,
        }
    }

    /// Connect the channel to a peripheral and restore the baseline
    /// configuration.
    ///
    /// M2M triggers without an id get the lowest free M2M id of the group.
    pub fn connect(&self, trigger: Trigger) -> Result<(), Dma2dError> {
        let (dir, id) = (self.direction, self.id);
        let m2m_ids = self.m2m_id_mask();
        let channel = self.channel();

        // The id currently held counts as available, but only goes back to
        // the group once the new one is committed.
        let sel = self.group.with_m2m_free(dir, |free| {
            channel.with_status(|status| {
                let held = status.periph_sel_id.filter(|&prev| m2m_ids.contains(prev));
                let mut available = free.intersection(m2m_ids);
                if let Some(prev) = held {
                    available.insert(prev);
                }
                let sel = match (trigger.periph, trigger.periph_sel_id) {
                    (TriggerPeripheral::M2m, None) => available.lowest(),
                    (TriggerPeripheral::M2m, Some(sel)) => available.contains(sel).then_some(sel),
                    (_, Some(sel)) if !m2m_ids.contains(sel) => Some(sel),
                    _ => None,
                }?;
                if let Some(prev) = held {
                    free.insert(prev);
                }
                if m2m_ids.contains(sel) {
                    free.clear(sel);
                }
                status.periph_sel_id = Some(sel);
                Some(sel)
            })
        });
        let Some(sel) = sel else {
            error!("invalid periph_sel_id");
            return Err(Dma2dError::InvalidArg);
        };

        let hal = self.hal();
        channel.with_status(|status| {
            hal.stop(dir, id);
            reset_channel(hal, dir, id);
            hal.connect_to_periph(dir, id, trigger.periph, sel);
            hal.enable_reorder(dir, id, status.reorder_en);
            if dir == Direction::Tx {
                hal.tx_enable_dscr_port(id, trigger.periph == TriggerPeripheral::PpaSrm);
            }

            hal.enable_owner_check(dir, id, false);
            if dir == Direction::Tx {
                hal.tx_enable_auto_write_back(id, false);
                hal.tx_enable_eof_mode(id, true);
            }
            hal.enable_descriptor_burst(dir, id, false);
            hal.set_data_burst_length(dir, id, DataBurstLength::B128);
            hal.enable_page_bound_wrap(dir, id, true);
            hal.set_macro_block_size(dir, id, MacroBlockSize::None);
            match dir {
                Direction::Tx if H::TX_CSC_MASK.contains(id) => {
                    hal.tx_configure_color_space_conv(id, CscTxOption::None)
                }
                Direction::Rx if H::RX_CSC_MASK.contains(id) => {
                    hal.rx_configure_color_space_conv(id, CscRxOption::None)
                }
                _ => {}
            }

            hal.enable_interrupt(dir, id, u32::MAX, false);
            hal.clear_interrupt_status(dir, id, u32::MAX);
            if dir == Direction::Rx {
                hal.enable_interrupt(dir, id, RxEvents::TERMINAL.bits(), true);
            }
        });
        debug!("channel {} connected, periph_sel_id {}", id, sel);
        Ok(())
    }

    pub fn register_tx_event_callbacks(
        &self,
        cbs: TxEventCallbacks<H>,
        user_data: UserData,
    ) -> Result<(), Dma2dError> {
        if self.direction != Direction::Tx {
            error!("invalid argument");
            return Err(Dma2dError::InvalidArg);
        }
        let hal = self.hal();
        self.channel().with_status(|status| {
            if cbs.on_desc_done.is_some() {
                hal.enable_interrupt(Direction::Tx, self.id, TxEvents::DONE.bits(), true);
            }
            status.on_desc_done = cbs.on_desc_done;
            status.user_data = user_data;
        });
        Ok(())
    }

    pub fn register_rx_event_callbacks(
        &self,
        cbs: RxEventCallbacks<H>,
        user_data: UserData,
    ) -> Result<(), Dma2dError> {
        if self.direction != Direction::Rx {
            error!("invalid argument");
            return Err(Dma2dError::InvalidArg);
        }
        let hal = self.hal();
        self.channel().with_status(|status| {
            if cbs.on_desc_done.is_some() {
                hal.enable_interrupt(Direction::Rx, self.id, RxEvents::DONE.bits(), true);
            }
            status.on_recv_eof = cbs.on_recv_eof;
            status.on_desc_done = cbs.on_desc_done;
            status.user_data = user_data;
        });
        Ok(())
    }

    /// Point the channel at the first descriptor of a chain.
    ///
    /// Descriptors must be 8-byte aligned and outside tightly-coupled memory.
    pub fn set_desc_addr(&self, addr: usize) -> Result<(), Dma2dError> {
        let hal = self.hal();
        if addr == 0 || addr & 0x7 != 0 || hal.is_restricted_memory(addr) {
            error!("invalid descriptor address {}", addr);
            return Err(Dma2dError::InvalidArg);
        }
        self.channel()
            .with_status(|_| hal.set_desc_addr(self.direction, self.id, addr));
        Ok(())
    }

    /// Kick off the descriptor chain set with
    /// [`set_desc_addr`](Self::set_desc_addr). The channel must be idle.
    pub fn start(&self) -> Result<(), Dma2dError> {
        let hal = self.hal();
        self.channel().with_status(|_| {
            assert!(hal.is_fsm_idle(self.direction, self.id));
            hal.start(self.direction, self.id);
        });
        Ok(())
    }

    pub fn stop(&self) -> Result<(), Dma2dError> {
        let hal = self.hal();
        self.channel().with_status(|_| hal.stop(self.direction, self.id));
        Ok(())
    }

    /// Continue a stopped descriptor chain after new descriptors were linked.
    pub fn append(&self) -> Result<(), Dma2dError> {
        let hal = self.hal();
        self.channel().with_status(|_| hal.restart(self.direction, self.id));
        Ok(())
    }

    pub fn reset(&self) -> Result<(), Dma2dError> {
        let hal = self.hal();
        self.channel()
            .with_status(|_| reset_channel(hal, self.direction, self.id));
        Ok(())
    }

    /// `auto_update_desc` and `eof_till_data_popped` only exist on TX.
    pub fn apply_strategy(&self, config: StrategyConfig) {
        let hal = self.hal();
        let (dir, id) = (self.direction, self.id);
        self.channel().with_status(|_| {
            hal.enable_owner_check(dir, id, config.owner_check);
            if dir == Direction::Tx {
                hal.tx_enable_auto_write_back(id, config.auto_update_desc);
                hal.tx_enable_eof_mode(id, config.eof_till_data_popped);
            }
        });
    }

    pub fn set_transfer_ability(&self, ability: TransferAbility) {
        let hal = self.hal();
        let (dir, id) = (self.direction, self.id);
        self.channel().with_status(|_| {
            hal.enable_descriptor_burst(dir, id, ability.desc_burst_en);
            hal.set_data_burst_length(dir, id, ability.data_burst_length);
            hal.set_macro_block_size(dir, id, ability.mb_size);
        });
    }

    /// Configure the color-space converter of a CSC-capable channel.
    pub fn configure_color_space_conversion(
        &self,
        config: CscConfig,
    ) -> Result<(), Dma2dError> {
        let (dir, id) = (self.direction, self.id);
        let default = ScrambleOrder::default();
        let valid = match dir {
            Direction::Tx => {
                H::TX_CSC_MASK.contains(id)
                    && config.post_scramble == default
                    && (config.tx_csc_option != CscTxOption::None
                        || config.pre_scramble == default)
            }
            Direction::Rx => {
                H::RX_CSC_MASK.contains(id)
                    && (config.rx_csc_option != CscRxOption::None
                        || (config.pre_scramble == default
                            && config.post_scramble == default))
            }
        };
        if !valid {
            error!("invalid color space conversion");
            return Err(Dma2dError::InvalidArg);
        }

        let hal = self.hal();
        self.channel().with_status(|_| match dir {
            Direction::Tx => {
                hal.tx_configure_color_space_conv(id, config.tx_csc_option);
                hal.set_csc_pre_scramble(dir, id, config.pre_scramble);
            }
            Direction::Rx => {
                hal.rx_configure_color_space_conv(id, config.rx_csc_option);
                hal.set_csc_pre_scramble(dir, id, config.pre_scramble);
                hal.rx_set_csc_post_scramble(id, config.post_scramble);
            }
        });
        Ok(())
    }
}

/// Reset handshake: block commands, wait until the FSM accepts a reset,
/// reset, unblock.
pub(crate) fn reset_channel<H: Dma2dHal>(hal: &H, dir: Direction, id: u8) {
    hal.disable_cmd(dir, id, true);
    while !hal.is_reset_avail(dir, id) {
        core::hint::spin_loop();
    }
    hal.reset_channel(dir, id);
    hal.disable_cmd(dir, id, false);
}
