//! Integration tests for the JPEG publish buffer.

use omv_core::config::{JPEG_OVERFLOW_HOLD, JPEG_QUALITY_HIGH, JPEG_QUALITY_LOW};
use omv_core::jpeg::{FrameHeader, JpegBuffer, Publish, SkipReason};
use omv_hal::{EncodeError, FrameEncoder, ImageRef, PixFormat};

/// Encoder double: writes `output_len` bytes of `quality`, or overflows.
struct StubEncoder {
    output_len: usize,
    calls: Vec<u8>,
}

impl StubEncoder {
    fn new(output_len: usize) -> Self {
        Self {
            output_len,
            calls: Vec::new(),
        }
    }
}

impl FrameEncoder for StubEncoder {
    fn compress(&mut self, src: &ImageRef<'_>, dst: &mut [u8], quality: u8) -> Result<usize, EncodeError> {
        self.calls.push(quality);
        if src.format == PixFormat::Bayer {
            return Err(EncodeError::Unsupported);
        }
        if self.output_len > dst.len() {
            return Err(EncodeError::Overflow);
        }
        dst[..self.output_len].fill(quality);
        Ok(self.output_len)
    }
}

fn raw(data: &[u8]) -> ImageRef<'_> {
    ImageRef {
        width: 4,
        height: 4,
        format: PixFormat::Rgb565,
        data,
    }
}

const MID_QUALITY: u8 = (JPEG_QUALITY_LOW + JPEG_QUALITY_HIGH) / 2;

// ============================================================================
// Publishing
// ============================================================================

mod update_tests {
    use super::*;

    #[test]
    fn encodes_raw_frames_and_ramps_quality() {
        let jpeg = JpegBuffer::new(256);
        let mut enc = StubEncoder::new(10);
        let pixels = [0u8; 32];
        assert_eq!(
            jpeg.update(&raw(&pixels), &mut enc),
            Publish::Encoded {
                size: 10,
                quality: MID_QUALITY
            }
        );
        assert_eq!(
            jpeg.header(),
            Some(FrameHeader {
                width: 4,
                height: 4,
                size: 10
            })
        );
        assert_eq!(jpeg.quality(), Some(MID_QUALITY + 1));
        for _ in 0..100 {
            jpeg.update(&raw(&pixels), &mut enc);
        }
        assert_eq!(jpeg.quality(), Some(JPEG_QUALITY_HIGH));
    }

    #[test]
    fn copies_compressed_frames_verbatim() {
        let jpeg = JpegBuffer::new(16);
        let mut enc = StubEncoder::new(1);
        let src = ImageRef {
            width: 2,
            height: 2,
            format: PixFormat::Jpeg,
            data: &[0xFF, 0xD8, 1, 2, 0xFF, 0xD9],
        };
        assert_eq!(jpeg.update(&src, &mut enc), Publish::Copied { size: 6 });
        assert!(enc.calls.is_empty());
        jpeg.claim().expect("frame");
        let mut out = [0u8; 6];
        assert_eq!(jpeg.read_at(0, &mut out), Some(6));
        assert_eq!(out, [0xFF, 0xD8, 1, 2, 0xFF, 0xD9]);
    }

    #[test]
    fn oversized_compressed_frame_clears_buffer() {
        let jpeg = JpegBuffer::new(4);
        let mut enc = StubEncoder::new(2);
        jpeg.update(&raw(&[0; 8]), &mut enc);
        let src = ImageRef {
            width: 2,
            height: 2,
            format: PixFormat::Jpeg,
            data: &[0; 8],
        };
        assert!(matches!(jpeg.update(&src, &mut enc), Publish::Dropped { .. }));
        assert_eq!(jpeg.header().expect("unlocked").size, 0);
    }

    #[test]
    fn overflow_halves_quality_and_holds_it() {
        let jpeg = JpegBuffer::new(8);
        let mut enc = StubEncoder::new(100);
        let pixels = [0u8; 32];
        assert_eq!(
            jpeg.update(&raw(&pixels), &mut enc),
            Publish::Dropped {
                quality: MID_QUALITY / 2
            }
        );
        assert!(jpeg.claim().is_none(), "dropped frame must not be published");

        // The frame that ends the hold ramps straight away.
        enc.output_len = 4;
        for _ in 1..JPEG_OVERFLOW_HOLD {
            jpeg.update(&raw(&pixels), &mut enc);
        }
        assert_eq!(jpeg.quality(), Some(MID_QUALITY / 2));
        jpeg.update(&raw(&pixels), &mut enc);
        assert_eq!(jpeg.quality(), Some(MID_QUALITY / 2 + 1));
        jpeg.update(&raw(&pixels), &mut enc);
        assert_eq!(jpeg.quality(), Some(MID_QUALITY / 2 + 2));
    }

    #[test]
    fn repeated_overflow_bottoms_out_at_one() {
        let jpeg = JpegBuffer::new(1);
        let mut enc = StubEncoder::new(2);
        for _ in 0..10 {
            jpeg.update(&raw(&[0; 4]), &mut enc);
        }
        assert_eq!(jpeg.quality(), Some(1));
    }

    #[test]
    fn overflow_at_lowest_quality_does_not_restart_hold() {
        let jpeg = JpegBuffer::new(8);
        let mut enc = StubEncoder::new(100);
        let pixels = [0u8; 32];
        while jpeg.quality() != Some(1) {
            jpeg.update(&raw(&pixels), &mut enc);
        }

        enc.output_len = 4;
        for _ in 1..JPEG_OVERFLOW_HOLD {
            jpeg.update(&raw(&pixels), &mut enc);
        }
        assert_eq!(jpeg.quality(), Some(1));

        enc.output_len = 100;
        assert_eq!(jpeg.update(&raw(&pixels), &mut enc), Publish::Dropped { quality: 1 });
        enc.output_len = 4;
        jpeg.update(&raw(&pixels), &mut enc);
        assert_eq!(jpeg.quality(), Some(2));
    }

    #[test]
    fn large_frames_stop_ramping_at_low_ceiling() {
        let jpeg = JpegBuffer::new(64);
        let mut enc = StubEncoder::new(8);
        let big = vec![0u8; 320 * 240 * 2 + 2];
        let src = ImageRef {
            width: 321,
            height: 240,
            format: PixFormat::Rgb565,
            data: &big,
        };
        // Already above the ceiling: held, not lowered.
        for _ in 0..5 {
            jpeg.update(&src, &mut enc);
        }
        assert_eq!(jpeg.quality(), Some(MID_QUALITY));

        enc.output_len = 100;
        jpeg.update(&src, &mut enc);
        assert_eq!(jpeg.quality(), Some(MID_QUALITY / 2));
        enc.output_len = 8;
        for _ in 0..JPEG_OVERFLOW_HOLD + 100 {
            jpeg.update(&src, &mut enc);
        }
        assert_eq!(jpeg.quality(), Some(JPEG_QUALITY_LOW));
    }

    #[test]
    fn skips_when_disabled_claimed_or_unsupported() {
        let jpeg = JpegBuffer::new(64);
        let mut enc = StubEncoder::new(8);
        let pixels = [0u8; 32];

        jpeg.set_enabled(false);
        assert_eq!(jpeg.update(&raw(&pixels), &mut enc), Publish::Skipped(SkipReason::Disabled));
        jpeg.set_enabled(true);

        jpeg.update(&raw(&pixels), &mut enc);
        jpeg.claim().expect("frame");
        assert_eq!(jpeg.update(&raw(&pixels), &mut enc), Publish::Skipped(SkipReason::Claimed));
        jpeg.finish_claim(false);

        let invalid = ImageRef {
            format: PixFormat::Invalid,
            ..raw(&pixels)
        };
        assert_eq!(jpeg.update(&invalid, &mut enc), Publish::Skipped(SkipReason::Unsupported));
        let bayer = ImageRef {
            format: PixFormat::Bayer,
            ..raw(&pixels)
        };
        assert_eq!(jpeg.update(&bayer, &mut enc), Publish::Skipped(SkipReason::Unsupported));
    }

    #[test]
    fn static_storage_is_usable() {
        let storage: &'static mut [u8] = Box::leak(vec![0u8; 32].into_boxed_slice());
        let jpeg = JpegBuffer::from_static(storage);
        assert_eq!(jpeg.capacity(), Some(32));
        let mut enc = StubEncoder::new(12);
        assert!(matches!(jpeg.update(&raw(&[0; 32]), &mut enc), Publish::Encoded { size: 12, .. }));
    }
}

// ============================================================================
// Claiming and streaming
// ============================================================================

mod claim_tests {
    use super::*;

    #[test]
    fn claim_requires_a_frame() {
        let jpeg = JpegBuffer::new(64);
        assert_eq!(jpeg.claim(), None);
        assert!(!jpeg.is_claimed());
    }

    #[test]
    fn consumed_frame_is_cleared() {
        let jpeg = JpegBuffer::new(64);
        let mut enc = StubEncoder::new(8);
        jpeg.update(&raw(&[0; 32]), &mut enc);
        let header = jpeg.claim().expect("frame");
        assert_eq!(jpeg.claim(), Some(header));
        assert!(jpeg.is_claimed());
        jpeg.finish_claim(true);
        assert_eq!(jpeg.claim(), None);
    }

    #[test]
    fn read_at_stops_at_frame_end() {
        let jpeg = JpegBuffer::new(64);
        let mut enc = StubEncoder::new(8);
        jpeg.update(&raw(&[0; 32]), &mut enc);
        let mut out = [0u8; 16];
        assert_eq!(jpeg.read_at(0, &mut out), Some(0), "unclaimed frames are not readable");
        jpeg.claim().expect("frame");
        assert_eq!(jpeg.read_at(4, &mut out), Some(4));
        assert_eq!(jpeg.read_at(8, &mut out), Some(0));
        assert_eq!(jpeg.read_at(100, &mut out), Some(0));
    }

    #[test]
    fn disabling_ends_the_claim() {
        let jpeg = JpegBuffer::new(64);
        let mut enc = StubEncoder::new(8);
        jpeg.update(&raw(&[0; 32]), &mut enc);
        jpeg.claim().expect("frame");
        jpeg.set_enabled(false);
        let mut out = [0u8; 8];
        assert_eq!(jpeg.read_at(0, &mut out), Some(0));

        // A new frame published meanwhile is not consumed by the stale claim.
        jpeg.set_enabled(true);
        jpeg.update(&raw(&[0; 32]), &mut enc);
        jpeg.finish_claim(true);
        assert_eq!(jpeg.header().expect("unlocked").size, 8);
    }

    #[test]
    fn disabling_discards_frame() {
        let jpeg = JpegBuffer::new(64);
        let mut enc = StubEncoder::new(8);
        jpeg.update(&raw(&[0; 32]), &mut enc);
        jpeg.set_enabled(false);
        assert!(!jpeg.is_enabled());
        assert_eq!(jpeg.header().expect("unlocked").size, 0);
    }
}
