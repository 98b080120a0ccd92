//! Configuration types for pools and channels.

/// Parameters for [`Platform::acquire_pool`](crate::Platform::acquire_pool).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PoolConfig {
    /// Hardware group to acquire.
    pub pool_id: usize,
    /// Interrupt priority, `0` for the default, otherwise `1..=3`.
    pub intr_priority: u8,
}

/// Highest interrupt priority a pool may request.
pub const MAX_INTR_PRIORITY: u8 = 3;

/// Peripheral a channel can be connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerPeripheral {
    /// Memory-to-memory.
    M2m,
    JpegEncoder,
    JpegDecoder,
    /// PPA scale/rotate/mirror engine.
    PpaSrm,
    /// PPA blending engine.
    PpaBlend,
}

/// Describes the peripheral a channel is connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Trigger {
    pub periph: TriggerPeripheral,
    /// Peripheral selection id. For M2M triggers `None` picks a free id.
    pub periph_sel_id: Option<u8>,
}

impl Trigger {
    /// A memory-to-memory trigger with an automatically picked id.
    pub const fn m2m() -> Self {
        Self { periph: TriggerPeripheral::M2m, periph_sel_id: None }
    }

    pub const fn new(periph: TriggerPeripheral, periph_sel_id: u8) -> Self {
        Self { periph, periph_sel_id: Some(periph_sel_id) }
    }
}

/// Descriptor handling strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StrategyConfig {
    /// Check the descriptor owner bit before processing.
    pub owner_check: bool,
    /// Write the owner bit back after a descriptor completes (TX only).
    pub auto_update_desc: bool,
    /// Raise EOF only once the data has been popped out (TX only).
    pub eof_till_data_popped: bool,
}

/// Data burst length in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataBurstLength {
    B8,
    B16,
    B32,
    B64,
    #[default]
    B128,
}

/// Macro block size for block-mode transfers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MacroBlockSize {
    #[default]
    None,
    Size8x8,
    Size8x16,
    Size16x16,
}

/// Transfer ability of a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferAbility {
    pub desc_burst_en: bool,
    pub data_burst_length: DataBurstLength,
    pub mb_size: MacroBlockSize,
}

/// Byte order applied around the color-space converter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScrambleOrder {
    #[default]
    Byte2_1_0,
    Byte2_0_1,
    Byte1_0_2,
    Byte1_2_0,
    Byte0_2_1,
    Byte0_1_2,
}

/// TX color-space conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CscTxOption {
    #[default]
    None,
    /// Byte scramble only.
    Scramble,
    Rgb888ToRgb565,
    Rgb565ToRgb888,
    Rgb888ToYuv444_601,
    Rgb888ToYuv444_709,
    Rgb888ToYuv422_601,
    Rgb888ToYuv422_709,
    Yuv444ToRgb888_601,
    Yuv444ToRgb888_709,
    Yuv422ToRgb888_601,
    Yuv422ToRgb888_709,
}

/// RX color-space conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CscRxOption {
    #[default]
    None,
    /// Byte scramble only.
    Scramble,
    Yuv422ToYuv444,
    Yuv420ToYuv444,
    Yuv420ToRgb888_601,
    Yuv420ToRgb888_709,
    Yuv420ToRgb565_601,
    Yuv420ToRgb565_709,
    Yuv422ToRgb888_601,
    Yuv422ToRgb888_709,
    Yuv444ToRgb888_601,
    Yuv444ToRgb888_709,
}

/// Color-space conversion settings.
///
/// TX channels use `tx_csc_option` and `pre_scramble`. RX channels use
/// `rx_csc_option` with both scramble stages. A non-default scramble order
/// only takes effect with a conversion option other than `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CscConfig {
    pub tx_csc_option: CscTxOption,
    pub rx_csc_option: CscRxOption,
    pub pre_scramble: ScrambleOrder,
    pub post_scramble: ScrambleOrder,
}
