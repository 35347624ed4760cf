#![no_std]

/// Moves bytes between the debug controller and the physical transport.
///
/// Both calls are non-blocking: they move as much as the transport can take
/// (or has ready) right now and return the byte count, which may be zero.
pub trait DataChannel {
    /// Write bytes toward the host. Returns the number of bytes accepted.
    fn write(&mut self, buf: &[u8]) -> usize;

    /// Read bytes sent by the host. Returns the number of bytes copied into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> usize;
}

/// A CDC-style serial endpoint carrying the debug protocol.
pub trait CdcPort: DataChannel {
    /// Bytes buffered from the host and ready to read.
    fn read_available(&self) -> usize;

    /// Space left in the outgoing FIFO.
    fn write_available(&self) -> usize;

    /// Push any partially filled packet out to the host.
    fn flush(&mut self);

    /// Returns true while a host holds the port open.
    fn connected(&self) -> bool;
}

/// Cache maintenance for memory filled behind the CPU's back (DMA, MDMA).
pub trait CacheMaintenance {
    /// Discard cached lines covering `buf` so the next read observes memory.
    fn invalidate(&self, buf: &[u8]);
}

/// Cache maintenance for cores without a data cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoCache;

impl CacheMaintenance for NoCache {
    fn invalidate(&self, _buf: &[u8]) {}
}

/// Pixel layouts a frame slot can carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PixFormat {
    #[default]
    Invalid,
    /// 1 bit per pixel, rows padded to 32 bits.
    Binary,
    Grayscale,
    Rgb565,
    Bayer,
    Yuv422,
    Jpeg,
    Png,
}

impl PixFormat {
    /// True for formats whose bytes are already an encoded stream.
    pub fn is_compressed(self) -> bool {
        matches!(self, PixFormat::Jpeg | PixFormat::Png)
    }

    /// Bytes needed to hold one `w` x `h` frame.
    ///
    /// Compressed formats report the raw RGB565 size as an upper bound.
    pub fn image_size(self, w: u32, h: u32) -> usize {
        let (w, h) = (w as usize, h as usize);
        match self {
            PixFormat::Invalid => 0,
            PixFormat::Binary => w.div_ceil(32) * 4 * h,
            PixFormat::Grayscale | PixFormat::Bayer => w * h,
            PixFormat::Rgb565 | PixFormat::Yuv422 | PixFormat::Jpeg | PixFormat::Png => w * h * 2,
        }
    }
}

/// Borrowed view of one frame handed to an encoder.
#[derive(Debug, Clone, Copy)]
pub struct ImageRef<'a> {
    pub width: u32,
    pub height: u32,
    pub format: PixFormat,
    pub data: &'a [u8],
}

/// Reasons an encoder may refuse a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// The output did not fit in the destination buffer.
    Overflow,
    /// The source pixel format is not supported.
    Unsupported,
}

/// Compresses frames into the publish buffer. The codec itself lives outside the core.
pub trait FrameEncoder {
    /// Encode `src` into `dst` at `quality` (1..=100). Returns the encoded length.
    fn compress(&mut self, src: &ImageRef<'_>, dst: &mut [u8], quality: u8) -> Result<usize, EncodeError>;
}

/// Device-side hooks the debug controller calls into.
pub trait DebugTarget {
    /// Architecture identification reported to the host.
    fn arch_str(&self) -> &str;

    /// Attached sensor's chip id, if a sensor is present.
    fn sensor_id(&self) -> Option<u32>;

    /// Raise a keyboard interrupt in the script interpreter.
    fn interrupt_script(&mut self);

    /// Reset the device. On hardware this does not return.
    fn system_reset(&mut self);

    /// Reset into the bootloader. On hardware this does not return.
    fn reset_to_bootloader(&mut self);
}

/// Execution profiler exposed through the profile commands.
pub trait Profiler {
    /// Returns true if hardware event counters are available.
    fn has_pmu(&self) -> bool;

    /// Size of the serialized profile in bytes.
    fn size(&self) -> usize;

    /// Copy serialized profile bytes starting at `offset`. Returns the count copied.
    fn read_at(&mut self, offset: usize, out: &mut [u8]) -> usize;

    /// Select exclusive (true) or inclusive (false) timing.
    fn set_mode(&mut self, exclusive: bool);

    /// Program hardware counter `counter` to count `event`.
    fn set_event(&mut self, counter: u32, event: u32);

    /// Discard all collected records.
    fn reset(&mut self);
}

/// Placeholder for builds without a profiler. It cannot be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoProfiler {}

impl Profiler for NoProfiler {
    fn has_pmu(&self) -> bool {
        match *self {}
    }

    fn size(&self) -> usize {
        match *self {}
    }

    fn read_at(&mut self, _offset: usize, _out: &mut [u8]) -> usize {
        match *self {}
    }

    fn set_mode(&mut self, _exclusive: bool) {
        match *self {}
    }

    fn set_event(&mut self, _counter: u32, _event: u32) {
        match *self {}
    }

    fn reset(&mut self) {
        match *self {}
    }
}

/// Millisecond tick source. Wraps around.
pub trait Clock {
    fn now_ms(&self) -> u32;
}
