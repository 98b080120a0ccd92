#![no_std]
//! Channel-pool scheduler for 2D-DMA engines.
//!
//! Consumers submit transactions asking for a few TX/RX channels with given
//! features. Transactions that cannot be served right away wait in a
//! per-group queue and are dispatched from the completion interrupt of the
//! transaction that frees their channels. Groups are brought up lazily on
//! first use and torn down when the last pool handle is released.

extern crate alloc;

// This mod MUST go first, so that the others see its macros.
mod fmt;

mod allocator;
mod channel;
mod config;
mod error;
mod factory;
mod group;
mod hal;
mod mask;
mod platform;
mod pool;
mod queue;
mod transaction;

pub use channel::{ChannelRef, EventCallback, EventData, RxEventCallbacks, TxEventCallbacks};
pub use config::{
    CscConfig, CscRxOption, CscTxOption, DataBurstLength, MacroBlockSize, PoolConfig,
    ScrambleOrder, StrategyConfig, TransferAbility, Trigger, TriggerPeripheral,
    MAX_INTR_PRIORITY,
};
pub use error::Dma2dError;
pub use factory::{Dma2dFactory, InterruptSource, ReservedChannels};
pub use hal::{
    Direction, Dma2dHal, RxEvents, TxEvents, GROUPS, MAX_CHANNELS_PER_TRANSACTION,
    MAX_TX_PER_TRANSACTION, RX_CHANNELS, TCM_END, TCM_START, TX_CHANNELS,
};
pub use mask::ChannelMask;
pub use platform::Platform;
pub use pool::PoolHandle;
pub use transaction::{
    transaction_node_size, Admission, ChannelFlags, NodeStage, OnJobPicked, TransactionDesc,
    TransactionNode, UserData,
};
