use crate::framebuffer::FramebufferId;

/// Errors raised by the pool's backing region.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArenaError {
    /// A borrowed static region cannot be resized.
    #[error("static region cannot grow")]
    Fixed,

    /// Requested growth is above the region's configured limit.
    #[error("growing to {requested} bytes exceeds the {limit} byte limit")]
    LimitExceeded { requested: usize, limit: usize },

    /// The allocator refused the request.
    #[error("allocation of {0} bytes failed")]
    AllocFailed(usize),

    /// A span would reach past the end of the region.
    #[error("span {offset}+{len} lies outside a {size} byte region")]
    OutOfBounds { offset: usize, len: usize, size: usize },
}

/// Errors raised by the frame buffer pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramebufferError {
    /// The region cannot hold even one slot. Fatal at start-up.
    #[error("region of {size} bytes is below the {required} byte minimum")]
    RegionTooSmall { size: usize, required: usize },

    /// A resize could not fit the requested layout; the old layout is kept.
    #[error("{count} slots of {slot_size} bytes do not fit in {available} bytes")]
    DoesNotFit {
        count: usize,
        slot_size: usize,
        available: usize,
    },

    /// Slot count outside `1..=MAX_FRAMEBUFFER_COUNT`.
    #[error("invalid slot count {0}")]
    InvalidCount(usize),

    /// Growing a dynamic region failed; the old layout is kept.
    #[error("region growth failed: {0}")]
    Grow(#[from] ArenaError),

    /// No slot is available to release.
    #[error("no slot available")]
    Exhausted,
}

/// Errors raised while building the framebuffer registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("framebuffer {0:?} is already registered")]
    Duplicate(FramebufferId),

    #[error("registry is full")]
    Full,
}

/// Reasons the debug controller refused a command. State is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    /// Command processing is gated off.
    #[error("debug IRQ disabled")]
    IrqDisabled,

    /// A data phase is still in flight.
    #[error("data phase in progress")]
    Busy,

    /// A script is uploaded and not yet taken, or still running.
    #[error("script upload pending")]
    UploadPending,

    /// The script buffer could not be reserved.
    #[error("cannot reserve {0} bytes for the script")]
    NoMemory(usize),
}
