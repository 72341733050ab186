//! Grayscale input images and the 1-bit bitmaps the print head consumes.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Order of pixels inside a packed byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BitOrder {
    /// Bit 7 is the leftmost pixel of the group.
    #[default]
    MsbFirst,
    /// Bit 0 is the leftmost pixel of the group.
    LsbFirst,
}

/// Row-major 8-bit grayscale grid (0 = black, 255 = white).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Image {
    /// Wraps a row-major pixel buffer.
    ///
    /// Fails with `InvalidDimensions` when either side is zero or the buffer
    /// length is not `width * height`.
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self, Error> {
        let expected = width.checked_mul(height);
        if width == 0 || height == 0 || expected != Some(pixels.len()) {
            return Err(Error::InvalidDimensions {
                width,
                height,
                max_width: usize::MAX,
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Image where every pixel has the same intensity.
    pub fn uniform(width: usize, height: usize, intensity: u8) -> Result<Self, Error> {
        let len = width.saturating_mul(height);
        Self::new(width, height, vec![intensity; len])
    }

    /// Copies an `image` crate luma buffer.
    pub fn from_luma(img: &GrayImage) -> Result<Self, Error> {
        let (w, h) = img.dimensions();
        Self::new(w as usize, h as usize, img.as_raw().clone())
    }

    /// Converts any decoded image to grayscale and scales it to `width` dots,
    /// keeping the aspect ratio.
    pub fn from_dynamic(img: &DynamicImage, width: u32) -> Result<Self, Error> {
        let gray = img.to_luma8();
        let (orig_w, orig_h) = gray.dimensions();
        if orig_w == 0 || orig_h == 0 || width == 0 {
            return Err(Error::InvalidDimensions {
                width: orig_w as usize,
                height: orig_h as usize,
                max_width: width as usize,
            });
        }
        let scale = width as f32 / orig_w as f32;
        let target_h = ((orig_h as f32 * scale).round() as u32).max(1);
        let resized = image::imageops::resize(&gray, width, target_h, FilterType::Lanczos3);
        Self::from_luma(&resized)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.pixels[y * self.width + x]
    }

    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.width;
        &self.pixels[start..start + self.width]
    }
}

/// Row-major grid of dots; `true` burns a dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: usize,
    height: usize,
    bits: Vec<bool>,
}

impl Bitmap {
    /// Blank (all white) bitmap.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width * height],
        }
    }

    pub fn from_bits(width: usize, height: usize, bits: Vec<bool>) -> Result<Self, Error> {
        if width == 0 || height == 0 || width.checked_mul(height) != Some(bits.len()) {
            return Err(Error::InvalidDimensions {
                width,
                height,
                max_width: usize::MAX,
            });
        }
        Ok(Self {
            width,
            height,
            bits,
        })
    }

    /// Rebuilds a bitmap from consecutive packed rows, as carried by data frames.
    pub fn from_packed_rows(
        width: usize,
        height: usize,
        packed: &[u8],
        order: BitOrder,
    ) -> Result<Self, Error> {
        let row_bytes = width.div_ceil(8);
        if width == 0 || height == 0 || packed.len() != row_bytes * height {
            return Err(Error::InvalidDimensions {
                width,
                height,
                max_width: usize::MAX,
            });
        }
        let mut bitmap = Self::new(width, height);
        for (y, row) in packed.chunks(row_bytes).enumerate() {
            for x in 0..width {
                let byte = row[x / 8];
                let bit = match order {
                    BitOrder::MsbFirst => 7 - (x % 8),
                    BitOrder::LsbFirst => x % 8,
                };
                bitmap.set(x, y, (byte >> bit) & 1 == 1);
            }
        }
        Ok(bitmap)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Bytes per packed row (8 dots per byte, last byte zero-padded).
    pub fn bytes_per_row(&self) -> usize {
        self.width.div_ceil(8)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        self.bits[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, on: bool) {
        self.bits[y * self.width + x] = on;
    }

    pub fn row(&self, y: usize) -> &[bool] {
        let start = y * self.width;
        &self.bits[start..start + self.width]
    }

    /// Number of burned dots.
    pub fn count_ones(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    /// Appends row `y` packed 8 dots per byte to `out`.
    pub fn pack_row_into(&self, y: usize, order: BitOrder, out: &mut Vec<u8>) {
        for group in self.row(y).chunks(8) {
            let mut b: u8 = 0;
            for (i, &on) in group.iter().enumerate() {
                if on {
                    b |= match order {
                        BitOrder::MsbFirst => 0x80u8 >> i,
                        BitOrder::LsbFirst => 1u8 << i,
                    };
                }
            }
            out.push(b);
        }
    }

    /// Packs the whole bitmap, rows top to bottom.
    pub fn pack(&self, order: BitOrder) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bytes_per_row() * self.height);
        for y in 0..self.height {
            self.pack_row_into(y, order, &mut out);
        }
        out
    }

    /// Renders dots as black on white, e.g. for a preview window.
    pub fn to_luma(&self) -> GrayImage {
        GrayImage::from_fn(self.width as u32, self.height as u32, |x, y| {
            if self.get(x as usize, y as usize) {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }
}
