//! Owned byte region backing a frame buffer pool.
//!
//! The region hands out [`Span`] handles instead of raw pointers. A span is
//! checked against the region when it is created, and since a region only
//! ever grows, a span stays valid for the life of the region.

use alloc::vec::Vec;
use core::ptr::NonNull;

use crate::error::ArenaError;

/// A bounds-checked `offset..offset + len` window into a [`Region`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    offset: usize,
    len: usize,
}

impl Span {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

enum Backing {
    /// Linker-placed memory; never resized.
    Static,
    /// Heap memory that may grow up to `limit`.
    Dynamic { buf: Vec<u8>, limit: usize },
}

/// Contiguous memory owned by one pool.
///
/// Accessors only ever materialize references to sub-ranges, so the pool can
/// keep atomic queue cells in one part of the region while slot payloads in
/// another part are borrowed mutably.
pub struct Region {
    base: NonNull<u8>,
    len: usize,
    backing: Backing,
}

// SAFETY: the region exclusively owns its memory; `&'static mut` input
// guarantees no other alias exists for static backing.
unsafe impl Send for Region {}

impl Region {
    /// Wrap a statically placed buffer. The region cannot grow.
    pub fn from_static(buf: &'static mut [u8]) -> Self {
        let len = buf.len();
        let base = NonNull::from(buf).cast::<u8>();
        Self {
            base,
            len,
            backing: Backing::Static,
        }
    }

    /// Allocate a zeroed heap region of `size` bytes that may later grow to `limit`.
    pub fn dynamic(size: usize, limit: usize) -> Result<Self, ArenaError> {
        if size > limit {
            return Err(ArenaError::LimitExceeded { requested: size, limit });
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(size)
            .map_err(|_| ArenaError::AllocFailed(size))?;
        buf.resize(size, 0);
        let base = NonNull::new(buf.as_mut_ptr()).unwrap_or(NonNull::dangling());
        Ok(Self {
            base,
            len: size,
            backing: Backing::Dynamic { buf, limit },
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.backing, Backing::Dynamic { .. })
    }

    /// Largest size the region may grow to.
    pub fn limit(&self) -> usize {
        match &self.backing {
            Backing::Static => self.len,
            Backing::Dynamic { limit, .. } => *limit,
        }
    }

    /// Bytes to skip from the start so the first usable byte is `align`-aligned.
    pub fn align_offset(&self, align: usize) -> usize {
        let addr = self.base.as_ptr() as usize;
        addr.next_multiple_of(align) - addr
    }

    /// Grow the region to at least `size` bytes.
    ///
    /// May move the memory: every pointer previously derived from the region
    /// is invalid afterwards. On error the region is unchanged.
    pub fn grow_to(&mut self, size: usize) -> Result<(), ArenaError> {
        if size <= self.len {
            return Ok(());
        }
        let Backing::Dynamic { buf, limit } = &mut self.backing else {
            return Err(ArenaError::Fixed);
        };
        if size > *limit {
            return Err(ArenaError::LimitExceeded {
                requested: size,
                limit: *limit,
            });
        }
        buf.try_reserve_exact(size - buf.len())
            .map_err(|_| ArenaError::AllocFailed(size))?;
        buf.resize(size, 0);
        self.base = NonNull::new(buf.as_mut_ptr()).unwrap_or(NonNull::dangling());
        self.len = size;
        log::debug!("region grown to {} bytes", size);
        Ok(())
    }

    /// Checked span constructor.
    pub fn span(&self, offset: usize, len: usize) -> Result<Span, ArenaError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(Span { offset, len }),
            _ => Err(ArenaError::OutOfBounds {
                offset,
                len,
                size: self.len,
            }),
        }
    }

    pub fn bytes(&self, span: Span) -> &[u8] {
        assert!(span.end() <= self.len);
        // SAFETY: span lies inside the region (checked at creation and the
        // region never shrinks); shared access through `&self`.
        unsafe { core::slice::from_raw_parts(self.base.as_ptr().add(span.offset), span.len) }
    }

    pub fn bytes_mut(&mut self, span: Span) -> &mut [u8] {
        assert!(span.end() <= self.len);
        // SAFETY: as in `bytes`; `&mut self` makes the access exclusive.
        unsafe { core::slice::from_raw_parts_mut(self.base.as_ptr().add(span.offset), span.len) }
    }

    /// Raw pointer to the start of `span`, for carving typed cells.
    ///
    /// The caller must not create references that overlap slices returned by
    /// [`Region::bytes`] or [`Region::bytes_mut`] for the same bytes.
    pub(crate) fn ptr(&self, span: Span) -> NonNull<u8> {
        assert!(span.end() <= self.len);
        // SAFETY: in bounds, see `bytes`.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(span.offset)) }
    }
}

impl core::fmt::Debug for Region {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Region")
            .field("len", &self.len)
            .field("dynamic", &self.is_dynamic())
            .field("limit", &self.limit())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leak(size: usize) -> &'static mut [u8] {
        Box::leak(vec![0u8; size].into_boxed_slice())
    }

    #[test]
    fn span_rejects_out_of_bounds() {
        let region = Region::from_static(leak(64));
        assert!(region.span(0, 64).is_ok());
        assert_eq!(
            region.span(60, 8),
            Err(ArenaError::OutOfBounds {
                offset: 60,
                len: 8,
                size: 64
            })
        );
        assert!(region.span(usize::MAX, 2).is_err());
    }

    #[test]
    fn static_region_cannot_grow() {
        let mut region = Region::from_static(leak(64));
        assert_eq!(region.grow_to(128), Err(ArenaError::Fixed));
        assert_eq!(region.len(), 64);
        assert!(region.grow_to(32).is_ok());
    }

    #[test]
    fn dynamic_region_grows_within_limit() {
        let mut region = Region::dynamic(64, 256).expect("alloc");
        region.grow_to(200).expect("grow");
        assert_eq!(region.len(), 200);
        assert_eq!(
            region.grow_to(512),
            Err(ArenaError::LimitExceeded {
                requested: 512,
                limit: 256
            })
        );
        assert_eq!(region.len(), 200);
    }

    #[test]
    fn bytes_are_writable_through_spans() {
        let mut region = Region::dynamic(32, 32).expect("alloc");
        let span = region.span(8, 4).expect("span");
        region.bytes_mut(span).copy_from_slice(&[1, 2, 3, 4]);
        let whole = region.span(0, 32).expect("span");
        assert_eq!(&region.bytes(whole)[8..12], &[1, 2, 3, 4]);
    }

    #[test]
    fn align_offset_lands_on_boundary() {
        let region = Region::dynamic(128, 128).expect("alloc");
        let pad = region.align_offset(32);
        assert!(pad < 32);
        let span = region.span(pad, 1).expect("span");
        assert_eq!(region.ptr(span).as_ptr() as usize % 32, 0);
    }
}
