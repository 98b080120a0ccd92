/// Errors returned by pool, transaction and channel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Dma2dError {
    /// Malformed configuration, infeasible explicit channel mask, bad
    /// descriptor address or illegal color-space/scramble combination.
    InvalidArg,
    /// The group could not be allocated.
    NoMemory,
    /// The pool still has pending transactions and cannot be torn down.
    NotAllowed,
    /// Conflicting interrupt priority, or the transaction is not in the
    /// state the operation needs.
    InvalidState,
    /// The factory failed to bring up hardware or allocate an interrupt.
    Fail,
}

impl core::fmt::Display for Dma2dError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Dma2dError::InvalidArg => write!(f, "invalid argument"),
            Dma2dError::NoMemory => write!(f, "no memory for 2D-DMA group"),
            Dma2dError::NotAllowed => {
                write!(f, "pending transactions still in the pool")
            }
            Dma2dError::InvalidState => write!(f, "invalid state"),
            Dma2dError::Fail => write!(f, "hardware or interrupt setup failed"),
        }
    }
}
