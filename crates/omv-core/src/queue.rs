//! Single-producer single-consumer queue of slot indices.
//!
//! The ring has `capacity + 1` cells so a full queue can be told apart from an
//! empty one without a separate counter. The producer only stores `tail` and
//! the consumer only stores `head`; each publishes with `Release` and observes
//! the other side with `Acquire`.
//!
//! Queues up to [`INLINE_QUEUE_CAPACITY`] keep their cells inline. Larger
//! queues live in cells carved from the owning pool's region.

use core::mem::size_of;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU16, AtomicUsize, Ordering};

use crate::config::INLINE_QUEUE_CAPACITY;

const INLINE_CELLS: usize = INLINE_QUEUE_CAPACITY + 1;

enum Cells {
    Inline([AtomicU16; INLINE_CELLS]),
    Pooled { ptr: NonNull<AtomicU16>, len: usize },
}

impl Cells {
    fn as_slice(&self) -> &[AtomicU16] {
        match self {
            Cells::Inline(cells) => cells,
            // SAFETY: `pooled` requires `ptr` to address `len` initialized,
            // aligned cells that outlive the queue and are not otherwise aliased.
            Cells::Pooled { ptr, len } => unsafe { core::slice::from_raw_parts(ptr.as_ptr(), *len) },
        }
    }
}

/// Fixed-capacity FIFO of `u16` slot indices.
pub struct IndexQueue {
    head: AtomicUsize,
    tail: AtomicUsize,
    capacity: usize,
    cells: Cells,
}

// SAFETY: cells are atomics. Only the producer role writes `tail` and the
// cell at `tail`; only the consumer role writes `head`. `split` hands out at
// most one handle per role.
unsafe impl Send for IndexQueue {}
unsafe impl Sync for IndexQueue {}

impl IndexQueue {
    /// Bytes of external cell storage a queue of `capacity` needs.
    ///
    /// Zero for capacities small enough to be stored inline.
    pub const fn storage_size(capacity: usize) -> usize {
        if capacity <= INLINE_QUEUE_CAPACITY {
            0
        } else {
            (capacity + 1) * size_of::<AtomicU16>()
        }
    }

    /// Required alignment of external cell storage.
    pub const fn storage_align() -> usize {
        core::mem::align_of::<AtomicU16>()
    }

    /// Create a queue with inline cells. `capacity` must be at most
    /// [`INLINE_QUEUE_CAPACITY`].
    pub fn inline(capacity: usize) -> Option<Self> {
        (capacity <= INLINE_QUEUE_CAPACITY).then(|| Self::inline_clamped(capacity))
    }

    pub(crate) fn inline_clamped(capacity: usize) -> Self {
        Self {
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            capacity: capacity.min(INLINE_QUEUE_CAPACITY),
            cells: Cells::Inline(core::array::from_fn(|_| AtomicU16::new(0))),
        }
    }

    /// Create a queue over caller-provided cells, e.g. a `static` array.
    ///
    /// Capacity is one less than the number of cells. Returns `None` if
    /// `cells` is empty.
    pub fn with_cells(cells: &'static [AtomicU16]) -> Option<Self> {
        let capacity = cells.len().checked_sub(1)?;
        Some(Self {
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            capacity,
            cells: Cells::Pooled {
                ptr: NonNull::from(cells).cast::<AtomicU16>(),
                len: cells.len(),
            },
        })
    }

    /// Create a queue over external cell storage, initializing the cells.
    ///
    /// # Safety
    ///
    /// `storage` must point to at least [`IndexQueue::storage_size`]`(capacity)`
    /// bytes aligned to [`IndexQueue::storage_align`], valid for reads and
    /// writes for as long as the queue lives, and not accessed through any
    /// other path while the queue exists.
    pub(crate) unsafe fn pooled(storage: NonNull<u8>, capacity: usize) -> Self {
        let len = capacity + 1;
        let ptr = storage.cast::<AtomicU16>();
        for i in 0..len {
            // SAFETY: within the storage the caller vouched for.
            unsafe { ptr.as_ptr().add(i).write(AtomicU16::new(0)) };
        }
        Self {
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            capacity,
            cells: Cells::Pooled { ptr, len },
        }
    }

    /// Largest number of indices the queue holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn ring(&self) -> usize {
        self.capacity() + 1
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (tail + self.ring() - head) % self.ring()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// Oldest index without removing it.
    pub fn peek(&self) -> Option<u16> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        Some(self.cells.as_slice()[head].load(Ordering::Relaxed))
    }

    /// Append `idx`, handing it back if the queue is full.
    pub fn push(&mut self, idx: u16) -> Result<(), u16> {
        self.enqueue(idx)
    }

    /// Remove the oldest index.
    pub fn pop(&mut self) -> Option<u16> {
        self.dequeue()
    }

    /// Drop every queued index.
    pub fn flush(&mut self) {
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Release);
    }

    /// Iterate over queued indices, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        let head = self.head.load(Ordering::Acquire);
        let cells = self.cells.as_slice();
        let ring = self.ring();
        (0..self.len()).map(move |i| cells[(head + i) % ring].load(Ordering::Relaxed))
    }

    /// Split into the two role handles.
    pub fn split(&mut self) -> (IndexProducer<'_>, IndexConsumer<'_>) {
        let queue: &IndexQueue = self;
        (IndexProducer { queue }, IndexConsumer { queue })
    }

    fn enqueue(&self, idx: u16) -> Result<(), u16> {
        let tail = self.tail.load(Ordering::Relaxed);
        let next = (tail + 1) % self.ring();
        if next == self.head.load(Ordering::Acquire) {
            return Err(idx);
        }
        self.cells.as_slice()[tail].store(idx, Ordering::Relaxed);
        self.tail.store(next, Ordering::Release);
        Ok(())
    }

    fn dequeue(&self) -> Option<u16> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.tail.load(Ordering::Acquire) {
            return None;
        }
        let idx = self.cells.as_slice()[head].load(Ordering::Relaxed);
        self.head.store((head + 1) % self.ring(), Ordering::Release);
        Some(idx)
    }
}

impl core::fmt::Debug for IndexQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Push side of a split [`IndexQueue`].
pub struct IndexProducer<'q> {
    queue: &'q IndexQueue,
}

impl IndexProducer<'_> {
    pub fn push(&mut self, idx: u16) -> Result<(), u16> {
        self.queue.enqueue(idx)
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Pop side of a split [`IndexQueue`].
pub struct IndexConsumer<'q> {
    queue: &'q IndexQueue,
}

impl IndexConsumer<'_> {
    pub fn pop(&mut self) -> Option<u16> {
        self.queue.dequeue()
    }

    pub fn peek(&self) -> Option<u16> {
        self.queue.peek()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
