//! Frame buffer pool.
//!
//! A pool owns one [`Region`] and carves it into queue metadata, `count`
//! equally sized slots and whatever scratch is left at the end:
//!
//! ```text
//! | pad | free cells | used cells | slot 0 | slot 1 | ... | slot n-1 | scratch |
//! ```
//!
//! Queue cells are only carved for pools of more than
//! [`INLINE_QUEUE_CAPACITY`](crate::config::INLINE_QUEUE_CAPACITY) slots; smaller pools keep them inline. Each slot
//! starts with a [`VBUFFER_HEADER_SIZE`] byte header (write offset, flags)
//! followed by the payload, both aligned to [`FRAMEBUFFER_ALIGNMENT`].
//!
//! The capture side takes slots from the free queue and publishes them to the
//! used queue; the consumer takes the freshest used slot and hands it back to
//! the free queue. Neither side ever blocks: an empty queue is reported as
//! `None` and the caller decides whether to skip or retry.

mod flags;
pub mod registry;

pub use flags::{AcquireFlags, Queue, ReleaseFlags, VbFlags};
pub use registry::{FramebufferId, FramebufferRegistry};

use omv_hal::{CacheMaintenance, ImageRef, NoCache, PixFormat};

use crate::arena::{Region, Span};
use crate::config::{FRAMEBUFFER_ALIGNMENT, MAX_FRAMEBUFFER_COUNT, VBUFFER_HEADER_SIZE};
use crate::error::FramebufferError;
use crate::queue::IndexQueue;

/// Index of a slot within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub u16);

impl SlotId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Outcome of [`Framebuffer::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The slot moved to the requested queue.
    Released(SlotId),
    /// The buffering policy held the slot back. The producer keeps it and
    /// must release it again later.
    Skipped(SlotId),
}

/// Capture window. `x`/`y` is the crop origin, `w`/`h` the frame size and
/// `u`/`v` the size before scaling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geometry {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub u: u32,
    pub v: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Layout {
    /// Padding before the first aligned byte.
    origin: usize,
    /// Bytes reserved for each of the two queues. Zero when inline.
    queue_bytes: usize,
    /// Header plus payload.
    buf_size: usize,
    count: usize,
}

impl Layout {
    fn slots_start(&self) -> usize {
        self.origin + 2 * self.queue_bytes
    }

    fn slot_offset(&self, idx: u16) -> usize {
        self.slots_start() + idx as usize * self.buf_size
    }

    fn end(&self) -> usize {
        self.slots_start() + self.count * self.buf_size
    }
}

/// Bytes reserved per queue for a pool of `count` slots.
fn queue_bytes(count: usize) -> usize {
    IndexQueue::storage_size(count).next_multiple_of(FRAMEBUFFER_ALIGNMENT)
}

/// Read-only view of one slot.
#[derive(Debug)]
pub struct VBuffer<'a> {
    pub offset: i32,
    pub flags: VbFlags,
    pub data: &'a [u8],
}

/// Writable view of one slot.
pub struct VBufferMut<'a> {
    header: &'a mut [u8],
    pub data: &'a mut [u8],
}

impl VBufferMut<'_> {
    pub fn offset(&self) -> i32 {
        read_header(self.header).0
    }

    /// Record how many payload bytes the producer has written.
    pub fn set_offset(&mut self, offset: i32) {
        let flags = self.flags();
        write_header(self.header, offset, flags);
    }

    pub fn flags(&self) -> VbFlags {
        read_header(self.header).1
    }

    /// Flag that the producer ran out of payload space.
    pub fn mark_overflow(&mut self) {
        let (offset, flags) = read_header(self.header);
        write_header(self.header, offset, flags | VbFlags::OVERFLOW);
    }
}

fn read_header(header: &[u8]) -> (i32, VbFlags) {
    let mut word = [0u8; 4];
    word.copy_from_slice(&header[0..4]);
    let offset = i32::from_le_bytes(word);
    word.copy_from_slice(&header[4..8]);
    let flags = VbFlags::from_bits_truncate(u32::from_le_bytes(word));
    (offset, flags)
}

fn write_header(header: &mut [u8], offset: i32, flags: VbFlags) {
    header[0..4].copy_from_slice(&offset.to_le_bytes());
    header[4..8].copy_from_slice(&flags.bits().to_le_bytes());
}

/// A pool of frame slots shared by one producer and one consumer.
pub struct Framebuffer<C: CacheMaintenance = NoCache> {
    geometry: Geometry,
    pixformat: PixFormat,
    expanded: bool,
    frame_size: usize,
    layout: Layout,
    free: IndexQueue,
    used: IndexQueue,
    /// Slot taken from the free queue by the producer.
    capture: Option<u16>,
    /// Slot taken from the used queue by the consumer.
    reader: Option<u16>,
    cache: C,
    region: Region,
}

impl<C: CacheMaintenance> Framebuffer<C> {
    /// Take ownership of `region` and lay it out as one expanded slot.
    ///
    /// Fails if the region cannot hold a single minimal slot. There is no
    /// usable pool in that case, so callers should treat it as fatal.
    pub fn new(region: Region, cache: C) -> Result<Self, FramebufferError> {
        let mut fb = Self {
            geometry: Geometry::default(),
            pixformat: PixFormat::Invalid,
            expanded: false,
            frame_size: 0,
            layout: Layout::default(),
            free: IndexQueue::inline_clamped(0),
            used: IndexQueue::inline_clamped(0),
            capture: None,
            reader: None,
            cache,
            region,
        };
        let required = fb.region.align_offset(FRAMEBUFFER_ALIGNMENT) + VBUFFER_HEADER_SIZE + FRAMEBUFFER_ALIGNMENT;
        match fb.resize(1, true) {
            Ok(()) => Ok(fb),
            Err(FramebufferError::DoesNotFit { .. }) => Err(FramebufferError::RegionTooSmall {
                size: fb.region.len(),
                required,
            }),
            Err(e) => Err(e),
        }
    }

    /// Re-lay out the pool as `count` slots and return every slot to the free queue.
    ///
    /// With `expand`, slots grow to share the whole region. Otherwise each slot
    /// holds exactly one committed frame, and a dynamic region is grown if
    /// needed. On error the previous layout is left intact.
    pub fn resize(&mut self, count: usize, expand: bool) -> Result<(), FramebufferError> {
        if count == 0 || count > MAX_FRAMEBUFFER_COUNT {
            return Err(FramebufferError::InvalidCount(count));
        }
        let queue_bytes = queue_bytes(count);
        let meta = 2 * queue_bytes;
        let min_buf = VBUFFER_HEADER_SIZE + self.frame_size.max(1).next_multiple_of(FRAMEBUFFER_ALIGNMENT);

        let buf_size = if expand {
            let origin = self.region.align_offset(FRAMEBUFFER_ALIGNMENT);
            let available = self.region.len().saturating_sub(origin + meta);
            let buf_size = available / count / FRAMEBUFFER_ALIGNMENT * FRAMEBUFFER_ALIGNMENT;
            if buf_size < min_buf {
                return Err(FramebufferError::DoesNotFit {
                    count,
                    slot_size: min_buf,
                    available,
                });
            }
            buf_size
        } else {
            let needed = count
                .checked_mul(min_buf)
                .and_then(|slots| slots.checked_add(meta))
                .ok_or(FramebufferError::InvalidCount(count))?;
            let origin = self.region.align_offset(FRAMEBUFFER_ALIGNMENT);
            if origin + needed > self.region.len() {
                if !self.region.is_dynamic() {
                    return Err(FramebufferError::DoesNotFit {
                        count,
                        slot_size: min_buf,
                        available: self.region.len().saturating_sub(origin + meta),
                    });
                }
                // Growing may move the memory, so leave room for re-alignment.
                self.region.grow_to(needed + FRAMEBUFFER_ALIGNMENT - 1)?;
            }
            min_buf
        };

        let layout = Layout {
            origin: self.region.align_offset(FRAMEBUFFER_ALIGNMENT),
            queue_bytes,
            buf_size,
            count,
        };
        let queue_spans = if queue_bytes > 0 {
            Some((
                self.region.span(layout.origin, queue_bytes)?,
                self.region.span(layout.origin + queue_bytes, queue_bytes)?,
            ))
        } else {
            None
        };
        self.region.span(0, layout.end())?;

        self.commit(layout, queue_spans);
        self.expanded = expand;
        log::debug!(
            "framebuffer laid out: {} x {} bytes (expanded: {}, region {} bytes)",
            count,
            buf_size,
            expand,
            self.region.len()
        );
        Ok(())
    }

    fn commit(&mut self, layout: Layout, queue_spans: Option<(Span, Span)>) {
        self.layout = layout;
        let (free, used) = match queue_spans {
            // SAFETY: both spans are in bounds, aligned to FRAMEBUFFER_ALIGNMENT
            // and sized by `IndexQueue::storage_size`. They end before the
            // first slot, so no slot view overlaps them, and the region only
            // moves inside `resize`, which rebuilds the queues afterwards.
            Some((free, used)) => unsafe {
                (
                    IndexQueue::pooled(self.region.ptr(free), layout.count),
                    IndexQueue::pooled(self.region.ptr(used), layout.count),
                )
            },
            None => (
                IndexQueue::inline_clamped(layout.count),
                IndexQueue::inline_clamped(layout.count),
            ),
        };
        self.free = free;
        self.used = used;
        self.flush();
    }

    /// Return every slot to the free queue in index order and clear headers.
    pub fn flush(&mut self) {
        self.free.flush();
        self.used.flush();
        self.capture = None;
        self.reader = None;
        for idx in 0..self.layout.count as u16 {
            self.write_slot_header(idx, 0, VbFlags::empty());
            if self.free.push(idx).is_err() {
                log::error!("free queue overflow while flushing slot {}", idx);
            }
        }
    }

    /// Commit the frame the sensor will deliver. Takes effect for slot sizes
    /// on the next non-expanding [`resize`](Self::resize).
    pub fn set_frame(&mut self, w: u32, h: u32, pixformat: PixFormat) {
        self.geometry.w = w;
        self.geometry.h = h;
        self.pixformat = pixformat;
        self.frame_size = pixformat.image_size(w, h);
    }

    pub fn set_geometry(&mut self, geometry: Geometry) {
        self.geometry = geometry;
        self.frame_size = self.pixformat.image_size(geometry.w, geometry.h);
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn pixformat(&self) -> PixFormat {
        self.pixformat
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Payload bytes per slot.
    pub fn buffer_size(&self) -> usize {
        self.layout.buf_size - VBUFFER_HEADER_SIZE
    }

    pub fn count(&self) -> usize {
        self.layout.count
    }

    pub fn is_dynamic(&self) -> bool {
        self.region.is_dynamic()
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn region_len(&self) -> usize {
        self.region.len()
    }

    /// Offset one past the last slot.
    pub fn pool_end(&self) -> usize {
        self.layout.end()
    }

    /// Region bytes after the last slot, free for scratch use.
    pub fn scratch_mut(&mut self) -> &mut [u8] {
        let end = self.layout.end();
        match self.region.span(end, self.region.len().saturating_sub(end)) {
            Ok(span) => self.region.bytes_mut(span),
            Err(_) => &mut [],
        }
    }

    pub fn writable(&self) -> bool {
        self.capture.is_some() || !self.free.is_empty()
    }

    pub fn readable(&self) -> bool {
        self.reader.is_some() || !self.used.is_empty()
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    pub fn used_len(&self) -> usize {
        self.used.len()
    }

    pub fn on_loan(&self) -> usize {
        usize::from(self.capture.is_some()) + usize::from(self.reader.is_some())
    }

    /// Every slot is either queued or on loan, exactly once.
    pub fn accounted(&self) -> bool {
        self.free.len() + self.used.len() + self.on_loan() == self.layout.count
    }

    /// Indices in the free queue, oldest first.
    pub fn free_slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.free.iter().map(SlotId)
    }

    /// Indices in the used queue, oldest first.
    pub fn used_slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        self.used.iter().map(SlotId)
    }

    /// Take a slot from `queue`.
    ///
    /// `Queue::Free` gives the producer a slot to fill. `Queue::Used` gives the
    /// consumer the freshest published slot; in double and triple buffering
    /// mode older unread slots are recycled on the way. A side that already
    /// holds a slot gets the same one back. With [`AcquireFlags::PEEK`] both
    /// queues are left untouched. Returns `None` when the queue is empty.
    pub fn acquire(&mut self, queue: Queue, flags: AcquireFlags) -> Option<SlotId> {
        let idx = match queue {
            Queue::Free => self.acquire_free(flags)?,
            Queue::Used => self.acquire_used(flags)?,
        };
        if flags.invalidate() {
            if let Some(span) = self.payload_span(idx) {
                self.cache.invalidate(self.region.bytes(span));
            }
        }
        Some(SlotId(idx))
    }

    fn acquire_free(&mut self, flags: AcquireFlags) -> Option<u16> {
        if let Some(idx) = self.capture {
            return Some(idx);
        }
        if flags.peek() {
            return self.free.peek();
        }
        let idx = self.free.pop()?;
        let kept = self.slot_flags(idx) & VbFlags::LAST;
        self.write_slot_header(idx, 0, VbFlags::IN_USE | kept);
        self.capture = Some(idx);
        Some(idx)
    }

    fn acquire_used(&mut self, flags: AcquireFlags) -> Option<u16> {
        if let Some(idx) = self.reader {
            return Some(idx);
        }
        let newest_only = matches!(self.layout.count, 2 | 3);
        // A peek reports what a consuming acquire would return, without trimming.
        if flags.peek() {
            return if newest_only { self.used.iter().last() } else { self.used.peek() };
        }
        if newest_only {
            while self.used.len() > 1 {
                self.drop_oldest_used();
            }
        }
        let idx = self.used.pop()?;
        self.reader = Some(idx);
        Some(idx)
    }

    /// Move a slot into `queue`.
    ///
    /// `Queue::Free` hands a slot back for refilling: the consumer's slot if it
    /// holds one, else the producer's, else the oldest used slot.
    ///
    /// `Queue::Used` publishes the producer's slot (its loan, or the free queue
    /// head if it filled that in place) under the buffering policy:
    ///
    /// * 1 slot: always published.
    /// * 2 slots: an unread slot in the used queue is recycled and replaced.
    /// * 3 slots: at most two are queued; the oldest is recycled to keep a
    ///   free slot for the producer, and the new slot is tagged
    ///   [`VbFlags::LAST`].
    /// * more: plain FIFO.
    ///
    /// With [`ReleaseFlags::CHECK_LAST`], a double or triple buffered release
    /// that would leave the producer with nothing to write into returns
    /// [`Release::Skipped`] instead.
    pub fn release(&mut self, queue: Queue, flags: ReleaseFlags) -> Result<Release, FramebufferError> {
        match queue {
            Queue::Free => self.release_free(),
            Queue::Used => self.release_used(flags),
        }
    }

    fn release_free(&mut self) -> Result<Release, FramebufferError> {
        let idx = self
            .reader
            .take()
            .or_else(|| self.capture.take())
            .or_else(|| self.used.pop())
            .ok_or(FramebufferError::Exhausted)?;
        self.recycle(idx);
        Ok(Release::Released(SlotId(idx)))
    }

    fn release_used(&mut self, flags: ReleaseFlags) -> Result<Release, FramebufferError> {
        let (idx, loaned) = match self.capture {
            Some(idx) => (idx, true),
            None => (self.free.peek().ok_or(FramebufferError::Exhausted)?, false),
        };
        let last = if loaned {
            self.free.is_empty()
        } else {
            self.free.len() == 1
        };

        match self.layout.count {
            2 => {
                if !self.used.is_empty() {
                    self.drop_oldest_used();
                } else if last && flags.check_last() {
                    return Ok(Release::Skipped(SlotId(idx)));
                }
            }
            3 => {
                if self.used.len() >= 2 || (last && !self.used.is_empty()) {
                    self.drop_oldest_used();
                } else if last && flags.check_last() {
                    return Ok(Release::Skipped(SlotId(idx)));
                }
            }
            _ => {}
        }

        if loaned {
            self.capture = None;
        } else {
            self.free.pop();
        }
        let mut slot_flags = self.slot_flags(idx) | VbFlags::IN_USE;
        if self.layout.count >= 3 {
            for other in 0..self.layout.count as u16 {
                let other_flags = self.slot_flags(other);
                if other_flags.contains(VbFlags::LAST) {
                    self.set_slot_flags(other, other_flags - VbFlags::LAST);
                }
            }
            slot_flags |= VbFlags::LAST;
        }
        self.set_slot_flags(idx, slot_flags);
        self.used.push(idx).map_err(|_| FramebufferError::Exhausted)?;
        Ok(Release::Released(SlotId(idx)))
    }

    fn drop_oldest_used(&mut self) {
        if let Some(stale) = self.used.pop() {
            log::trace!("dropping unread slot {}", stale);
            self.recycle(stale);
        }
    }

    /// Clear a slot's header and queue it as free. [`VbFlags::LAST`] stays
    /// put until the next publish moves it.
    fn recycle(&mut self, idx: u16) {
        let kept = self.slot_flags(idx) & VbFlags::LAST;
        self.write_slot_header(idx, 0, kept);
        if self.free.push(idx).is_err() {
            log::error!("free queue overflow returning slot {}", idx);
        }
    }

    fn slot_span(&self, idx: u16) -> Option<Span> {
        if idx as usize >= self.layout.count {
            return None;
        }
        self.region
            .span(self.layout.slot_offset(idx), self.layout.buf_size)
            .ok()
    }

    fn payload_span(&self, idx: u16) -> Option<Span> {
        let slot = self.slot_span(idx)?;
        self.region
            .span(slot.offset() + VBUFFER_HEADER_SIZE, slot.len() - VBUFFER_HEADER_SIZE)
            .ok()
    }

    fn slot_flags(&self, idx: u16) -> VbFlags {
        self.slot_span(idx)
            .map(|span| read_header(self.region.bytes(span)).1)
            .unwrap_or_default()
    }

    fn set_slot_flags(&mut self, idx: u16, flags: VbFlags) {
        if let Some(span) = self.slot_span(idx) {
            let header = self.region.bytes_mut(span);
            let (offset, _) = read_header(header);
            write_header(header, offset, flags);
        }
    }

    fn write_slot_header(&mut self, idx: u16, offset: i32, flags: VbFlags) {
        if let Some(span) = self.slot_span(idx) {
            write_header(self.region.bytes_mut(span), offset, flags);
        }
    }

    pub fn slot(&self, id: SlotId) -> Option<VBuffer<'_>> {
        let span = self.slot_span(id.0)?;
        let (header, data) = self.region.bytes(span).split_at(VBUFFER_HEADER_SIZE);
        let (offset, flags) = read_header(header);
        Some(VBuffer { offset, flags, data })
    }

    pub fn slot_mut(&mut self, id: SlotId) -> Option<VBufferMut<'_>> {
        let span = self.slot_span(id.0)?;
        let (header, data) = self.region.bytes_mut(span).split_at_mut(VBUFFER_HEADER_SIZE);
        Some(VBufferMut { header, data })
    }

    /// The slot's contents as a frame for the encoder.
    ///
    /// Compressed frames cover the bytes the producer reported through the
    /// slot offset; raw frames cover the committed frame size.
    pub fn image(&self, id: SlotId) -> Option<ImageRef<'_>> {
        let slot = self.slot(id)?;
        let len = if self.pixformat.is_compressed() {
            usize::try_from(slot.offset).unwrap_or(0)
        } else {
            self.frame_size
        };
        Some(ImageRef {
            width: self.geometry.w,
            height: self.geometry.h,
            format: self.pixformat,
            data: &slot.data[..len.min(slot.data.len())],
        })
    }
}

impl<C: CacheMaintenance> core::fmt::Debug for Framebuffer<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Framebuffer")
            .field("geometry", &self.geometry)
            .field("pixformat", &self.pixformat)
            .field("count", &self.layout.count)
            .field("buffer_size", &self.buffer_size())
            .field("free", &self.free)
            .field("used", &self.used)
            .field("capture", &self.capture)
            .field("reader", &self.reader)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::INLINE_QUEUE_CAPACITY;

    #[test]
    fn queue_bytes_are_zero_for_inline_pools() {
        assert_eq!(queue_bytes(1), 0);
        assert_eq!(queue_bytes(INLINE_QUEUE_CAPACITY), 0);
        assert_eq!(queue_bytes(4), FRAMEBUFFER_ALIGNMENT);
        assert_eq!(queue_bytes(16), 64);
    }

    #[test]
    fn header_round_trips_through_bytes() {
        let mut header = [0u8; VBUFFER_HEADER_SIZE];
        write_header(&mut header, -3, VbFlags::IN_USE | VbFlags::LAST);
        assert_eq!(read_header(&header), (-3, VbFlags::IN_USE | VbFlags::LAST));
    }
}
