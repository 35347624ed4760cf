//! Synthetic RGB565 camera.

/// Colour bars that scroll one column per frame.
#[derive(Debug, Clone)]
pub struct TestPattern {
    width: u32,
    height: u32,
    frame: u32,
}

const BARS: [u16; 8] = [
    0xFFFF, // white
    0xFFE0, // yellow
    0x07FF, // cyan
    0x07E0, // green
    0xF81F, // magenta
    0xF800, // red
    0x001F, // blue
    0x0000, // black
];

impl TestPattern {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame: 0,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 2
    }

    /// Render the next frame into `out` as little-endian RGB565.
    ///
    /// Returns the bytes written, or `None` if `out` cannot hold a frame.
    pub fn capture(&mut self, out: &mut [u8]) -> Option<usize> {
        let size = self.frame_size();
        let out = out.get_mut(..size)?;
        let bar_width = (self.width / BARS.len() as u32).max(1);
        for (y, row) in out.chunks_exact_mut(self.width as usize * 2).enumerate() {
            for (x, px) in row.chunks_exact_mut(2).enumerate() {
                let bar = ((x as u32 + self.frame) / bar_width) as usize % BARS.len();
                // Darken the bottom half so frames are not uniform vertically.
                let colour = if y as u32 >= self.height / 2 {
                    (BARS[bar] >> 1) & 0x7BEF
                } else {
                    BARS[bar]
                };
                px.copy_from_slice(&colour.to_le_bytes());
            }
        }
        self.frame = self.frame.wrapping_add(1);
        Some(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_one_frame() {
        let mut sensor = TestPattern::new(16, 4);
        let mut buf = vec![0xAAu8; 200];
        assert_eq!(sensor.capture(&mut buf), Some(128));
        assert_eq!(&buf[0..2], &0xFFFFu16.to_le_bytes());
        assert_eq!(buf[128], 0xAA);
    }

    #[test]
    fn rejects_short_buffers() {
        let mut sensor = TestPattern::new(16, 4);
        assert_eq!(sensor.capture(&mut [0u8; 100]), None);
    }

    #[test]
    fn pattern_scrolls() {
        let mut sensor = TestPattern::new(16, 1);
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        sensor.capture(&mut a);
        sensor.capture(&mut b);
        assert_ne!(a, b);
        assert_eq!(&a[2..4], &b[0..2]);
    }
}
