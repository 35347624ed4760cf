//! Pending text output (interpreter stdout) waiting for the host to drain it.

use heapless::Deque;

use crate::config::TEXT_BUFFER_SIZE;

#[derive(Debug)]
pub struct TextBuffer {
    ring: Deque<u8, TEXT_BUFFER_SIZE>,
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextBuffer {
    pub const fn new() -> Self {
        Self { ring: Deque::new() }
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }

    /// Append output. Returns the number of bytes dropped.
    ///
    /// When `data` does not fit behind what is pending, the ring is emptied
    /// first so the host sees whole writes rather than a torn tail. Writes
    /// longer than the ring keep only their last bytes.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let mut dropped = 0;
        if data.len() > TEXT_BUFFER_SIZE - self.ring.len() {
            dropped += self.ring.len();
            self.ring.clear();
        }
        let data = if data.len() > TEXT_BUFFER_SIZE {
            dropped += data.len() - TEXT_BUFFER_SIZE;
            &data[data.len() - TEXT_BUFFER_SIZE..]
        } else {
            data
        };
        for &b in data {
            // Cannot fail: space was made above.
            let _ = self.ring.push_back(b);
        }
        dropped
    }

    /// Copy pending bytes into `out` without consuming them.
    pub fn peek_into(&self, out: &mut [u8]) -> usize {
        let mut n = 0;
        for (dst, &src) in out.iter_mut().zip(self.ring.iter()) {
            *dst = src;
            n += 1;
        }
        n
    }

    /// Drop up to `n` bytes from the front.
    pub fn consume(&mut self, n: usize) {
        for _ in 0..n {
            if self.ring.pop_front().is_none() {
                break;
            }
        }
    }

    /// Copy and consume up to `out.len()` bytes.
    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let n = self.peek_into(out);
        self.consume(n);
        n
    }
}
