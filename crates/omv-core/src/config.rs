//! Compile-time configuration.

/// Alignment of queue metadata and slot payloads, in bytes.
pub const FRAMEBUFFER_ALIGNMENT: usize = 32;

/// Bytes reserved at the start of every slot for its header.
pub const VBUFFER_HEADER_SIZE: usize = FRAMEBUFFER_ALIGNMENT;

/// Queues up to this capacity keep their cells inline instead of in the pool region.
pub const INLINE_QUEUE_CAPACITY: usize = 3;

/// Most slots a pool may be divided into.
pub const MAX_FRAMEBUFFER_COUNT: usize = u16::MAX as usize;

/// Quality ceiling for frames larger than [`JPEG_QUALITY_THRESH`].
pub const JPEG_QUALITY_LOW: u8 = 50;

/// Quality ceiling for small frames.
pub const JPEG_QUALITY_HIGH: u8 = 90;

/// Source size (bytes) above which the low quality ceiling applies.
pub const JPEG_QUALITY_THRESH: usize = 320 * 240 * 2;

/// Frames to hold a reduced quality after an encoder overflow.
pub const JPEG_OVERFLOW_HOLD: u32 = 60;

/// Firmware version reported to the host.
pub const FIRMWARE_VERSION: (u32, u32, u32) = (4, 7, 0);

/// Size of the pending text-output ring.
pub const TEXT_BUFFER_SIZE: usize = 1024;

/// Largest chunk moved per data-phase call.
pub const DEBUG_CHUNK_SIZE: usize = 512;

/// Fixed response length of the architecture string.
pub const ARCH_STR_LEN: usize = 64;

/// Fixed response length of GET_STATE.
pub const GET_STATE_LEN: usize = 64;

/// Leading magic byte of every debug command header.
pub const USBDBG_HEADER_MAGIC: u8 = 0x30;

/// Header length: magic, opcode, u32 little-endian length.
pub const USBDBG_HEADER_SIZE: usize = 6;

/// A partially received header is discarded after this long without data.
pub const DATA_TIMEOUT_MS: u32 = 1000;

/// Line rates that switch the CDC port into debug mode.
pub const DEBUG_BAUDRATES: [u32; 2] = [921_600, 12_000_000];

/// Line rate that requests a reset into the bootloader.
pub const BOOTLOADER_BAUDRATE: u32 = 1200;
