//! Framebuffer for 3-bit greyscale e-paper panels
//!
//! Pixels are grey levels 0 (black) to 7 (white). Two pixels are packed per
//! byte: high nibble = left pixel, low nibble = right pixel.

/// Number of grey levels the panel can show
pub const GREY_LEVELS: u8 = 8;

/// Lightest grey level
pub const WHITE: u8 = GREY_LEVELS - 1;

/// Darkest grey level
pub const BLACK: u8 = 0;

/// Framebuffer sized for one panel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    buffer: Vec<u8>,
}

impl Framebuffer {
    /// Create a framebuffer initialized to white
    pub fn new(width: u32, height: u32) -> Self {
        let len = (width as usize).div_ceil(2) * height as usize;
        Self {
            width,
            height,
            buffer: vec![(WHITE << 4) | WHITE; len],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Clear the entire framebuffer to a single level
    pub fn clear(&mut self, level: u8) {
        let level = level.min(WHITE);
        self.buffer.fill((level << 4) | level);
    }

    /// Raw packed buffer
    #[cfg(test)]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * (self.width as usize).div_ceil(2) + x as usize / 2
    }

    /// Write a single pixel; out-of-range coordinates are ignored
    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, level: u8) {
        if x >= self.width || y >= self.height {
            return;
        }

        let idx = self.index(x, y);
        let level = level.min(WHITE);
        if x % 2 == 0 {
            self.buffer[idx] = (self.buffer[idx] & 0x0F) | (level << 4);
        } else {
            self.buffer[idx] = (self.buffer[idx] & 0xF0) | level;
        }
    }

    /// Read a single pixel
    pub fn pixel(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }

        let byte = self.buffer[self.index(x, y)];
        Some(if x % 2 == 0 { byte >> 4 } else { byte & 0x0F })
    }

    /// Fill a rectangular region with a level
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, level: u8) {
        for row in y..y.saturating_add(height).min(self.height) {
            for col in x..x.saturating_add(width).min(self.width) {
                self.set_pixel(col, row, level);
            }
        }
    }

    /// Expand to one byte per pixel scaled to 0..=255
    pub fn to_grey8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                let level = self.pixel(x, y).unwrap_or(WHITE);
                out.push((u16::from(level) * 255 / u16::from(WHITE)) as u8);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_white() {
        let fb = Framebuffer::new(5, 2);
        assert_eq!(fb.as_slice().len(), 6);
        assert_eq!(fb.pixel(4, 1), Some(WHITE));
        assert_eq!(fb.pixel(5, 0), None);
    }

    #[test]
    fn test_nibble_packing() {
        let mut fb = Framebuffer::new(4, 1);
        fb.set_pixel(0, 0, 3);
        fb.set_pixel(1, 0, 5);
        assert_eq!(fb.as_slice()[0], 0x35);
        assert_eq!(fb.pixel(0, 0), Some(3));
        assert_eq!(fb.pixel(1, 0), Some(5));
        assert_eq!(fb.pixel(2, 0), Some(WHITE));

        // Levels above white are clamped
        fb.set_pixel(3, 0, 15);
        assert_eq!(fb.pixel(3, 0), Some(WHITE));
    }

    #[test]
    fn test_fill_rect_clips() {
        let mut fb = Framebuffer::new(4, 4);
        fb.fill_rect(2, 2, 10, 10, BLACK);
        assert_eq!(fb.pixel(1, 1), Some(WHITE));
        assert_eq!(fb.pixel(3, 3), Some(BLACK));
        assert_eq!(fb.to_grey8()[15], 0);
        assert_eq!(fb.to_grey8()[0], 255);
    }
}
