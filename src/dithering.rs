//! Binarization: turn an 8-bit grayscale [`Image`] into a 1-bit [`Bitmap`].
//!
//! Every algorithm is a pure function of the input image; running the same
//! algorithm twice yields identical bitmaps. Error diffusion uses integer
//! arithmetic and a strict raster scan so results never depend on float
//! rounding or scheduling.

use std::fmt;
use std::str::FromStr;

use image::{GrayImage, Luma};
use imageproc::drawing::draw_filled_circle_mut;
use log::trace;
use serde::{Deserialize, Serialize};

use crate::bitmap::{Bitmap, Image};
use crate::error::Error;
use crate::protocol::PRINT_WIDTH;

/// Fixed cutoff used by [`Dithering::Threshold`] and error diffusion.
pub const CUTOFF: u8 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dithering {
    /// Dot wherever intensity is below [`CUTOFF`].
    #[serde(alias = "none")]
    Threshold,
    /// Dot wherever intensity is below the image's mean intensity.
    MeanThreshold,
    /// 4x4 ordered dithering.
    Bayer,
    #[default]
    FloydSteinberg,
    Atkinson,
    /// Round dots on a 4x4 grid, sized by local darkness.
    Halftone,
}

impl Dithering {
    pub const ALL: [Dithering; 6] = [
        Dithering::Threshold,
        Dithering::MeanThreshold,
        Dithering::Bayer,
        Dithering::FloydSteinberg,
        Dithering::Atkinson,
        Dithering::Halftone,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Dithering::Threshold => "threshold",
            Dithering::MeanThreshold => "mean-threshold",
            Dithering::Bayer => "bayer",
            Dithering::FloydSteinberg => "floyd-steinberg",
            Dithering::Atkinson => "atkinson",
            Dithering::Halftone => "halftone",
        }
    }
}

impl fmt::Display for Dithering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dithering {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "none" {
            return Ok(Dithering::Threshold);
        }
        Dithering::ALL
            .into_iter()
            .find(|d| d.name() == s)
            .ok_or_else(|| Error::InvalidConfig(format!("unknown dithering algorithm {s:?}")))
    }
}

/// Binarizes `image` for the standard 384-dot print head.
pub fn binarize(image: &Image, dithering: Dithering) -> Result<Bitmap, Error> {
    binarize_within(image, dithering, PRINT_WIDTH)
}

/// Binarizes `image`, rejecting widths of zero or above `max_width`.
pub fn binarize_within(
    image: &Image,
    dithering: Dithering,
    max_width: usize,
) -> Result<Bitmap, Error> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 || width > max_width {
        return Err(Error::InvalidDimensions {
            width,
            height,
            max_width,
        });
    }
    trace!("binarizing {}x{} with {}", width, height, dithering);
    let bitmap = match dithering {
        Dithering::Threshold => threshold(image, CUTOFF),
        Dithering::MeanThreshold => threshold(image, mean_intensity(image)),
        Dithering::Bayer => bayer(image),
        Dithering::FloydSteinberg => diffuse(image, &FLOYD_STEINBERG),
        Dithering::Atkinson => diffuse(image, &ATKINSON),
        Dithering::Halftone => halftone(image),
    };
    Ok(bitmap)
}

fn threshold(image: &Image, cutoff: u8) -> Bitmap {
    let mut out = Bitmap::new(image.width(), image.height());
    for y in 0..image.height() {
        for (x, &v) in image.row(y).iter().enumerate() {
            out.set(x, y, v < cutoff);
        }
    }
    out
}

fn mean_intensity(image: &Image) -> u8 {
    let sum: u64 = image.pixels().iter().map(|&v| v as u64).sum();
    // pixel count is at least 1, Image rejects empty grids
    (sum / image.pixels().len() as u64) as u8
}

const BAYER4: [[u8; 4]; 4] = [[0, 8, 2, 10], [12, 4, 14, 6], [3, 11, 1, 9], [15, 7, 13, 5]];

fn bayer(image: &Image) -> Bitmap {
    let mut out = Bitmap::new(image.width(), image.height());
    for y in 0..image.height() {
        for (x, &v) in image.row(y).iter().enumerate() {
            // cutoff = (m + 0.5) * 16, kept in integers
            let m = BAYER4[y % 4][x % 4] as u16;
            out.set(x, y, (v as u16) * 2 < 32 * m + 16);
        }
    }
    out
}

/// Error diffusion kernel: `(dx, dy, weight)` taps over a common divisor.
struct Kernel {
    taps: &'static [(isize, usize, i32)],
    divisor: i32,
}

const FLOYD_STEINBERG: Kernel = Kernel {
    taps: &[(1, 0, 7), (-1, 1, 3), (0, 1, 5), (1, 1, 1)],
    divisor: 16,
};

const ATKINSON: Kernel = Kernel {
    taps: &[(1, 0, 1), (2, 0, 1), (-1, 1, 1), (0, 1, 1), (1, 1, 1), (0, 2, 1)],
    divisor: 8,
};

fn diffuse(image: &Image, kernel: &Kernel) -> Bitmap {
    // columns of slack on each side so edge taps need no bounds checks
    const PAD: usize = 2;
    let (width, height) = (image.width(), image.height());
    let depth = kernel.taps.iter().map(|&(_, dy, _)| dy).max().unwrap_or(0) + 1;
    // errors[0] is the current row, errors[k] the row k below it
    let mut errors = vec![vec![0i32; width + 2 * PAD]; depth];
    let mut out = Bitmap::new(width, height);

    for y in 0..height {
        for x in 0..width {
            let value = image.get(x, y) as i32 + errors[0][x + PAD];
            let on = value < CUTOFF as i32;
            out.set(x, y, on);
            let err = value - if on { 0 } else { 255 };
            for &(dx, dy, weight) in kernel.taps {
                let col = (x + PAD).wrapping_add_signed(dx);
                errors[dy][col] += err * weight / kernel.divisor;
            }
        }
        errors.rotate_left(1);
        if let Some(last) = errors.last_mut() {
            last.fill(0);
        }
    }
    out
}

const HALFTONE_CELL: u32 = 4;
const HALFTONE_ALPHA: f32 = 3.0;

fn halftone(image: &Image) -> Bitmap {
    let (width, height) = (image.width(), image.height());
    let side = HALFTONE_CELL as usize;
    let max_radius = (HALFTONE_ALPHA * HALFTONE_CELL as f32 / 2.0) as i32;
    let cells: Vec<GrayImage> = (0..=max_radius).map(halftone_cell).collect();
    let mut out = Bitmap::new(width, height);

    for cy in (0..height).step_by(side) {
        for cx in (0..width).step_by(side) {
            let mut sum = 0u32;
            let mut n = 0u32;
            for y in cy..(cy + side).min(height) {
                for x in cx..(cx + side).min(width) {
                    sum += image.get(x, y) as u32;
                    n += 1;
                }
            }
            let darkness = 1.0 - (sum as f32 / n as f32) / 255.0;
            let radius = (HALFTONE_ALPHA * darkness * HALFTONE_CELL as f32 / 2.0) as i32;
            let cell = &cells[radius.clamp(0, max_radius) as usize];
            for y in cy..(cy + side).min(height) {
                for x in cx..(cx + side).min(width) {
                    let px = cell.get_pixel((x - cx) as u32, (y - cy) as u32);
                    out.set(x, y, px[0] == 0);
                }
            }
        }
    }
    out
}

fn halftone_cell(radius: i32) -> GrayImage {
    let mut cell = GrayImage::from_pixel(HALFTONE_CELL, HALFTONE_CELL, Luma([255]));
    if radius > 0 {
        let center = (HALFTONE_CELL as i32 / 2, HALFTONE_CELL as i32 / 2);
        draw_filled_circle_mut(&mut cell, center, radius, Luma([0]));
    }
    cell
}
