use crate::hal::{Direction, Dma2dHal};
use crate::mask::ChannelMask;

/// Identifies the interrupt line of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterruptSource {
    pub group_id: usize,
    pub direction: Direction,
    pub channel_id: u8,
    /// Address of the channel's interrupt status register, for shared
    /// interrupt dispatch.
    pub status_reg: usize,
}

/// Channels kept out of default allocation.
///
/// Reserved channels can still be requested with an explicit channel mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReservedChannels {
    pub tx: ChannelMask,
    pub rx: ChannelMask,
}

/// Abstracts the board-specific parts of a group's lifecycle.
///
/// Implementors bring the hardware of a group up and down and hand out the
/// per-channel interrupts the scheduler is driven by.
pub trait Dma2dFactory {
    /// Register layer produced for a group.
    type Hal: Dma2dHal;
    /// Handle to an allocated interrupt. Dropped only through
    /// [`free_interrupt`](Self::free_interrupt).
    type Interrupt: Send;
    /// Error type for bring-up and interrupt allocation failures.
    type Error: core::fmt::Debug;

    /// Enable the bus clock, reset the registers and return the register
    /// layer for `group_id`.
    fn bring_up(&self, group_id: usize) -> Result<Self::Hal, Self::Error>;

    /// Undo [`bring_up`](Self::bring_up).
    fn tear_down(&self, group_id: usize, hal: Self::Hal);

    /// Allocate the shared interrupt of one channel.
    fn alloc_interrupt(
        &self,
        source: InterruptSource,
        priority: u8,
    ) -> Result<Self::Interrupt, Self::Error>;

    fn free_interrupt(&self, intr: Self::Interrupt);

    /// Channels of `group_id` kept out of default allocation.
    fn reserved_channels(&self, _group_id: usize) -> ReservedChannels {
        ReservedChannels::default()
    }

    /// Request a context switch on interrupt exit.
    fn yield_from_isr(&self) {}
}
