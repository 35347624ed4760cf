use bitflags::bitflags;

/// Which of the pool's two queues an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    /// Slots available to fill.
    Free,
    /// Filled slots waiting for a consumer.
    Used,
}

bitflags! {
    /// Modifiers for [`Framebuffer::acquire`](super::Framebuffer::acquire).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AcquireFlags: u8 {
        /// Look at the slot an acquire would return without taking it.
        const PEEK = 1 << 0;
        /// Invalidate the data cache over the slot payload first.
        const INVALIDATE = 1 << 1;
    }
}

impl AcquireFlags {
    pub fn peek(self) -> bool {
        self.contains(Self::PEEK)
    }

    pub fn invalidate(self) -> bool {
        self.contains(Self::INVALIDATE)
    }
}

bitflags! {
    /// Modifiers for [`Framebuffer::release`](super::Framebuffer::release).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ReleaseFlags: u8 {
        /// Let the buffering policy hold back the producer's last writable slot.
        const CHECK_LAST = 1 << 0;
    }
}

impl ReleaseFlags {
    pub fn check_last(self) -> bool {
        self.contains(Self::CHECK_LAST)
    }
}

bitflags! {
    /// Per-slot header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VbFlags: u32 {
        /// On loan or published.
        const IN_USE = 1 << 0;
        /// The producer ran past the end of the payload.
        const OVERFLOW = 1 << 1;
        /// Most recently published slot.
        const LAST = 1 << 2;
    }
}
