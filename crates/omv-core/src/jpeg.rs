//! JPEG publish buffer.
//!
//! Holds the latest compressed frame for the debug host. The capture side
//! calls [`JpegBuffer::update`] once per frame; the debug channel claims the
//! frame, streams it out in chunks and then lets go of it. Both sides only
//! ever try the lock, so a collision costs one frame, never a stall.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use omv_hal::{EncodeError, FrameEncoder, ImageRef, PixFormat};

use crate::config::{JPEG_OVERFLOW_HOLD, JPEG_QUALITY_HIGH, JPEG_QUALITY_LOW, JPEG_QUALITY_THRESH};
use crate::lock::TryLock;

/// Width, height and encoded length of the published frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameHeader {
    pub width: u32,
    pub height: u32,
    pub size: usize,
}

/// What [`JpegBuffer::update`] did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publish {
    /// Compressed into the buffer at `quality`.
    Encoded { size: usize, quality: u8 },
    /// Source was already compressed and copied verbatim.
    Copied { size: usize },
    /// Did not fit; the buffer was cleared. `quality` is the lowered setting.
    Dropped { quality: u8 },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Publishing is switched off.
    Disabled,
    /// The host is streaming the current frame.
    Claimed,
    /// Someone else holds the lock.
    Busy,
    /// The source format cannot be published.
    Unsupported,
}

enum Storage {
    Owned(Vec<u8>),
    Static(&'static mut [u8]),
}

impl Storage {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Owned(v) => v,
            Storage::Static(s) => s,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Storage::Owned(v) => v,
            Storage::Static(s) => s,
        }
    }
}

struct JpegFrame {
    header: FrameHeader,
    quality: u8,
    /// Frames left before quality may ramp up again.
    hold: u32,
    claimed: bool,
    pixels: Storage,
}

impl JpegFrame {
    fn clear(&mut self) {
        self.header = FrameHeader::default();
    }
}

pub struct JpegBuffer {
    enabled: AtomicBool,
    frame: TryLock<JpegFrame>,
}

impl JpegBuffer {
    /// Heap-backed buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self::with_storage(Storage::Owned(alloc::vec![0; capacity]))
    }

    /// Buffer placed in a statically allocated region.
    pub fn from_static(buf: &'static mut [u8]) -> Self {
        Self::with_storage(Storage::Static(buf))
    }

    fn with_storage(pixels: Storage) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            frame: TryLock::new(JpegFrame {
                header: FrameHeader::default(),
                quality: (JPEG_QUALITY_LOW + JPEG_QUALITY_HIGH) / 2,
                hold: 0,
                claimed: false,
                pixels,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Switch publishing on or off. Turning it off discards the current frame.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        if !enabled {
            if let Some(mut frame) = self.frame.try_lock() {
                frame.clear();
                frame.claimed = false;
            }
        }
    }

    /// Current compression quality, if the lock is free.
    pub fn quality(&self) -> Option<u8> {
        self.frame.try_lock().map(|f| f.quality)
    }

    /// Bytes available for one encoded frame.
    pub fn capacity(&self) -> Option<usize> {
        self.frame.try_lock().map(|f| f.pixels.as_slice().len())
    }

    /// Header of the published frame, if the lock is free.
    pub fn header(&self) -> Option<FrameHeader> {
        self.frame.try_lock().map(|f| f.header)
    }

    /// Publish `src`: copy it if already compressed, otherwise encode it.
    pub fn update<E: FrameEncoder + ?Sized>(&self, src: &ImageRef<'_>, encoder: &mut E) -> Publish {
        if !self.is_enabled() {
            return Publish::Skipped(SkipReason::Disabled);
        }
        let Some(mut frame) = self.frame.try_lock() else {
            return Publish::Skipped(SkipReason::Busy);
        };
        if frame.claimed {
            return Publish::Skipped(SkipReason::Claimed);
        }
        if src.format == PixFormat::Invalid {
            return Publish::Skipped(SkipReason::Unsupported);
        }

        if src.format.is_compressed() {
            let dst = frame.pixels.as_mut_slice();
            if src.data.len() > dst.len() {
                frame.clear();
                return Publish::Dropped { quality: frame.quality };
            }
            dst[..src.data.len()].copy_from_slice(src.data);
            frame.header = FrameHeader {
                width: src.width,
                height: src.height,
                size: src.data.len(),
            };
            return Publish::Copied { size: src.data.len() };
        }

        let quality = frame.quality;
        match encoder.compress(src, frame.pixels.as_mut_slice(), quality) {
            Ok(size) => {
                frame.header = FrameHeader {
                    width: src.width,
                    height: src.height,
                    size,
                };
                frame.hold = frame.hold.saturating_sub(1);
                // Large frames stop ramping at the low ceiling but are never
                // pushed down to it.
                let ceiling = if src.data.len() > JPEG_QUALITY_THRESH {
                    JPEG_QUALITY_LOW
                } else {
                    JPEG_QUALITY_HIGH
                };
                if frame.hold == 0 && quality < ceiling {
                    frame.quality = quality + 1;
                }
                Publish::Encoded { size, quality }
            }
            Err(EncodeError::Overflow) => {
                if quality > 1 {
                    frame.quality = (quality / 2).max(1);
                    frame.hold = JPEG_OVERFLOW_HOLD;
                }
                frame.clear();
                log::debug!("jpeg overflow at quality {}, dropping to {}", quality, frame.quality);
                Publish::Dropped { quality: frame.quality }
            }
            Err(EncodeError::Unsupported) => Publish::Skipped(SkipReason::Unsupported),
        }
    }

    /// Pin the published frame for streaming and return its header.
    ///
    /// Returns `None` if there is no frame or the lock is busy. Claiming an
    /// already claimed frame returns the same header.
    pub fn claim(&self) -> Option<FrameHeader> {
        let mut frame = self.frame.try_lock()?;
        if frame.header.size == 0 {
            return None;
        }
        frame.claimed = true;
        Some(frame.header)
    }

    pub fn is_claimed(&self) -> bool {
        self.frame.try_lock().is_some_and(|f| f.claimed)
    }

    /// Copy bytes of the claimed frame from `offset` into `out`.
    ///
    /// Returns `None` while the lock is busy, so the caller can retry.
    /// Otherwise returns the count copied, which is zero past the end of the
    /// frame or once the claim is gone (publishing was switched off).
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> Option<usize> {
        let frame = self.frame.try_lock()?;
        if !frame.claimed {
            return Some(0);
        }
        let data = &frame.pixels.as_slice()[..frame.header.size];
        let Some(tail) = data.get(offset..) else {
            return Some(0);
        };
        let n = tail.len().min(out.len());
        out[..n].copy_from_slice(&tail[..n]);
        Some(n)
    }

    /// Release a claim. A fully streamed frame is discarded so the host is
    /// not sent the same frame twice. Does nothing if the claim was already
    /// dropped.
    pub fn finish_claim(&self, consumed: bool) {
        if let Some(mut frame) = self.frame.try_lock() {
            if !frame.claimed {
                return;
            }
            frame.claimed = false;
            if consumed {
                frame.clear();
            }
        }
    }
}

impl core::fmt::Debug for JpegBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JpegBuffer")
            .field("enabled", &self.is_enabled())
            .field("header", &self.header())
            .finish()
    }
}
