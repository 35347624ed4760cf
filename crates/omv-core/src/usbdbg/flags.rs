use bitflags::bitflags;

bitflags! {
    /// Status bits reported by GET_STATE.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatusFlags: u32 {
        const SCRIPT_RUNNING = 1 << 0;
        const TEXTBUF_NOTEMPTY = 1 << 1;
        const FRAMEBUF_LOCKED = 1 << 2;
        const PROFILE_ENABLED = 1 << 3;
        const PROFILE_HAS_PMU = 1 << 4;
    }
}
