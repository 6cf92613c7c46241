//! Color palette used at the image import/export boundary.
//!
//! The palette never affects simulated values; it only decides which pixel
//! color stands for which [`CellState`] when a circuit is loaded from an image
//! and how the current generation looks when it is written back out.

use image::{DynamicImage, Rgba, RgbaImage};

use crate::cell::CellState;
use crate::error::{WireworldError, WireworldResult};

/// One color per cell state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub empty: Rgba<u8>,
    pub wire: Rgba<u8>,
    pub head: Rgba<u8>,
    pub tail: Rgba<u8>,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            empty: Rgba([0x00, 0x00, 0x00, 0xff]),
            wire: Rgba([0x01, 0x5b, 0x96, 0xff]),
            head: Rgba([0xff, 0xff, 0xff, 0xff]),
            tail: Rgba([0x99, 0xff, 0x00, 0xff]),
        }
    }
}

impl Palette {
    /// Color used for `state`.
    pub fn encode(&self, state: CellState) -> Rgba<u8> {
        match state {
            CellState::Empty => self.empty,
            CellState::Wire => self.wire,
            CellState::Head => self.head,
            CellState::Tail => self.tail,
        }
    }

    /// State whose color equals `color` exactly, alpha included.
    ///
    /// Anything unrecognised is background, so annotation colors in a source
    /// image are ignored.
    pub fn decode(&self, color: Rgba<u8>) -> CellState {
        if color == self.wire {
            CellState::Wire
        } else if color == self.head {
            CellState::Head
        } else if color == self.tail {
            CellState::Tail
        } else {
            CellState::Empty
        }
    }

    pub fn set(&mut self, state: CellState, color: Rgba<u8>) {
        match state {
            CellState::Empty => self.empty = color,
            CellState::Wire => self.wire = color,
            CellState::Head => self.head = color,
            CellState::Tail => self.tail = color,
        }
    }

    /// Convert an image into row-major cell bytes. Returns `(cells, width, height)`.
    pub fn image_to_grid(&self, image: &DynamicImage) -> (Vec<u8>, u32, u32) {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        let cells = rgba
            .pixels()
            .map(|pixel| self.decode(*pixel).as_byte())
            .collect();
        (cells, width, height)
    }

    /// Convert row-major cell bytes into an image.
    pub fn grid_to_image(&self, cells: &[u8], width: u32, height: u32) -> WireworldResult<RgbaImage> {
        let expected = width as usize * height as usize;
        if cells.len() != expected {
            return Err(WireworldError::SizeMismatch {
                expected,
                actual: cells.len(),
            });
        }

        Ok(RgbaImage::from_fn(width, height, |x, y| {
            let index = y as usize * width as usize + x as usize;
            self.encode(CellState::from_byte(cells[index]))
        }))
    }
}

/// Parse an `rrggbb` hex string (leading `#` allowed) into an opaque color.
pub fn parse_hex_color(text: &str) -> WireworldResult<Rgba<u8>> {
    let digits = text.strip_prefix('#').unwrap_or(text);
    if digits.len() != 6 || !digits.is_ascii() {
        return Err(WireworldError::PaletteParse(text.to_string()));
    }

    let component = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&digits[range], 16)
            .map_err(|_| WireworldError::PaletteParse(text.to_string()))
    };

    Ok(Rgba([component(0..2)?, component(2..4)?, component(4..6)?, 0xff]))
}

/// Format a color as lowercase `rrggbb`. Alpha is dropped.
pub fn to_hex(color: Rgba<u8>) -> String {
    let [r, g, b, _] = color.0;
    format!("{r:02x}{g:02x}{b:02x}")
}
