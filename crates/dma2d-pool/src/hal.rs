//! Register-layer abstraction for one 2D-DMA group.
//!
//! The scheduler only ever talks to hardware through [`Dma2dHal`]. A board
//! crate implements it over the real register block; tests implement it over
//! plain memory.

use bitflags::bitflags;

use crate::config::{
    CscRxOption, CscTxOption, DataBurstLength, MacroBlockSize, ScrambleOrder,
    TriggerPeripheral,
};
use crate::mask::ChannelMask;

/// Number of 2D-DMA groups.
pub const GROUPS: usize = 1;
/// TX channels per group.
pub const TX_CHANNELS: usize = 3;
/// RX channels per group.
pub const RX_CHANNELS: usize = 2;
/// Upper bound on channels a single transaction may hold.
pub const MAX_CHANNELS_PER_TRANSACTION: usize = 3;
/// Upper bound on TX channels a single transaction may hold.
pub const MAX_TX_PER_TRANSACTION: usize = 2;

/// Channel direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    /// Memory to peripheral.
    Tx,
    /// Peripheral to memory.
    Rx,
}

bitflags! {
    /// TX interrupt events.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TxEvents: u32 {
        const DONE = 1 << 0;
        const EOF = 1 << 1;
        const DSCR_ERR = 1 << 2;
    }
}

bitflags! {
    /// RX interrupt events.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RxEvents: u32 {
        const DONE = 1 << 0;
        const SUC_EOF = 1 << 1;
        const ERR_EOF = 1 << 2;
        const DSCR_ERR = 1 << 3;
    }
}

impl RxEvents {
    /// Events that end an RX transfer.
    pub const TERMINAL: Self = Self::SUC_EOF
        .union(Self::ERR_EOF)
        .union(Self::DSCR_ERR);
}

/// Start of the tightly-coupled memory window DMA cannot reach.
pub const TCM_START: usize = 0x3000_0000;
/// End (exclusive) of the tightly-coupled memory window.
pub const TCM_END: usize = 0x3000_2000;

/// Per-channel register primitives of one group.
///
/// Methods take `&self`: the scheduler serialises access per channel with its
/// own locks, so implementations only need interior mutability for the
/// register block.
pub trait Dma2dHal: Send + Sync + 'static {
    /// TX channels able to reorder macro blocks.
    const TX_REORDER_MASK: ChannelMask = ChannelMask::from_bits(0b001);
    /// TX channels with a color-space converter.
    const TX_CSC_MASK: ChannelMask = ChannelMask::from_bits(0b001);
    /// RX channels able to reorder macro blocks.
    const RX_REORDER_MASK: ChannelMask = ChannelMask::from_bits(0b01);
    /// RX channels with a color-space converter.
    const RX_CSC_MASK: ChannelMask = ChannelMask::from_bits(0b01);
    /// TX peripheral selection ids reserved for memory-to-memory use.
    const TX_M2M_ID_MASK: ChannelMask = ChannelMask::from_bits(0xF0);
    /// RX peripheral selection ids reserved for memory-to-memory use.
    const RX_M2M_ID_MASK: ChannelMask = ChannelMask::from_bits(0xF0);

    fn enable_interrupt(&self, dir: Direction, channel: u8, mask: u32, enable: bool);
    fn interrupt_status(&self, dir: Direction, channel: u8) -> u32;
    fn clear_interrupt_status(&self, dir: Direction, channel: u8, mask: u32);
    /// Address of the channel's interrupt status register.
    fn interrupt_status_reg(&self, dir: Direction, channel: u8) -> usize;

    fn connect_to_periph(
        &self,
        dir: Direction,
        channel: u8,
        periph: TriggerPeripheral,
        periph_sel_id: u8,
    );
    fn disconnect_from_periph(&self, dir: Direction, channel: u8);

    fn start(&self, dir: Direction, channel: u8);
    fn stop(&self, dir: Direction, channel: u8);
    fn restart(&self, dir: Direction, channel: u8);
    fn set_desc_addr(&self, dir: Direction, channel: u8, addr: usize);

    fn disable_cmd(&self, dir: Direction, channel: u8, disable: bool);
    fn is_reset_avail(&self, dir: Direction, channel: u8) -> bool;
    fn reset_channel(&self, dir: Direction, channel: u8);
    fn is_fsm_idle(&self, dir: Direction, channel: u8) -> bool;

    fn enable_owner_check(&self, dir: Direction, channel: u8, enable: bool);
    fn enable_descriptor_burst(&self, dir: Direction, channel: u8, enable: bool);
    fn set_data_burst_length(
        &self,
        dir: Direction,
        channel: u8,
        length: DataBurstLength,
    );
    fn enable_page_bound_wrap(&self, dir: Direction, channel: u8, enable: bool);
    fn set_macro_block_size(&self, dir: Direction, channel: u8, size: MacroBlockSize);
    fn enable_reorder(&self, dir: Direction, channel: u8, enable: bool);
    fn set_csc_pre_scramble(&self, dir: Direction, channel: u8, order: ScrambleOrder);

    fn tx_enable_auto_write_back(&self, channel: u8, enable: bool);
    fn tx_enable_eof_mode(&self, channel: u8, till_data_popped: bool);
    fn tx_enable_dscr_port(&self, channel: u8, enable: bool);
    fn tx_configure_color_space_conv(&self, channel: u8, option: CscTxOption);

    fn rx_configure_color_space_conv(&self, channel: u8, option: CscRxOption);
    fn rx_set_csc_post_scramble(&self, channel: u8, order: ScrambleOrder);
    /// Address of the descriptor that raised the last successful EOF.
    fn rx_success_eof_desc_addr(&self, channel: u8) -> usize;

    /// Returns `true` if `addr` lies in memory the DMA cannot access.
    fn is_restricted_memory(&self, addr: usize) -> bool {
        (TCM_START..TCM_END).contains(&addr)
    }
}
