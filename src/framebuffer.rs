//! Monochrome framebuffer and the panel it is flushed to.
//!
//! The buffer layout matches what the 4.2" e-paper controller expects: rows
//! of bytes, eight horizontal pixels per byte, most significant bit first,
//! a set bit meaning white paper and a cleared bit meaning black ink.

use embedded_graphics::{pixelcolor::BinaryColor, prelude::*};
use thiserror::Error;

/// Canvas dimensions of the 4.2" panel
pub const CANVAS_WIDTH: u32 = 400;
pub const CANVAS_HEIGHT: u32 = 300;

/// The framebuffer could not be allocated.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("could not allocate a {bytes} byte framebuffer")]
pub struct AllocationError {
    pub bytes: usize,
}

/// Errors reported by a display panel.
#[derive(Error, Debug)]
pub enum PanelError {
    /// Driver-level failure talking to the controller
    #[error("panel driver: {0}")]
    Driver(String),

    /// Frame size does not match the panel
    #[error("frame is {actual} bytes, panel expects {expected}")]
    FrameSize { expected: usize, actual: usize },

    #[error("panel I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Output surface the canvas is flushed to.
///
/// Implemented by the SPI e-paper driver on hardware builds and by the
/// terminal renderer in development mode.
pub trait Panel {
    fn power_on(&mut self) -> Result<(), PanelError>;
    fn power_off(&mut self) -> Result<(), PanelError>;
    fn show(&mut self, frame: &Framebuffer) -> Result<(), PanelError>;
}

/// 1 bit per pixel canvas.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    bytes: Vec<u8>,
}

impl Framebuffer {
    /// Allocate a white canvas, reporting failure instead of aborting.
    pub fn try_new(width: u32, height: u32) -> Result<Self, AllocationError> {
        let bytes_per_row = width.div_ceil(8);
        let size = (bytes_per_row * height) as usize;

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(size)
            .map_err(|_| AllocationError { bytes: size })?;
        bytes.resize(size, 0xFF);

        Ok(Self {
            width,
            height,
            bytes,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Raw bytes in controller order.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Fill the whole canvas with paper.
    pub fn clear_white(&mut self) {
        self.bytes.fill(0xFF);
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: BinaryColor) {
        if x >= self.width || y >= self.height {
            return;
        }

        let (index, mask) = self.locate(x, y);
        match color {
            BinaryColor::On => self.bytes[index] &= !mask,
            BinaryColor::Off => self.bytes[index] |= mask,
        }
    }

    /// True if the pixel carries ink. Out-of-bounds pixels are paper.
    pub fn is_ink(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let (index, mask) = self.locate(x, y);
        self.bytes[index] & mask == 0
    }

    /// Number of inked pixels inside the given rows.
    pub fn ink_in_rows(&self, rows: std::ops::Range<u32>) -> usize {
        rows.filter(|&y| y < self.height)
            .map(|y| (0..self.width).filter(|&x| self.is_ink(x, y)).count())
            .sum()
    }

    fn locate(&self, x: u32, y: u32) -> (usize, u8) {
        let bytes_per_row = self.width.div_ceil(8);
        let index = (y * bytes_per_row + x / 8) as usize;
        (index, 0x80 >> (x % 8))
    }
}

impl OriginDimensions for Framebuffer {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for Framebuffer {
    type Color = BinaryColor;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if let (Ok(x), Ok(y)) = (u32::try_from(point.x), u32::try_from(point.y)) {
                self.set_pixel(x, y, color);
            }
        }
        Ok(())
    }
}
