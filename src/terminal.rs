//! # Terminal Panel
//!
//! Development stand-in for the e-paper panel. Every flush prints the canvas
//! as ASCII art, one character per 5x10 pixel cell, so layouts can be checked
//! on a desktop without any display hardware attached.

use crate::framebuffer::{Framebuffer, Panel, PanelError};
use std::io::{self, Write};
use tracing::debug;

const CELL_WIDTH: u32 = 5;
const CELL_HEIGHT: u32 = 10;

/// Panel that writes ASCII renders to any [`Write`] sink.
pub struct TerminalPanel<W> {
    out: W,
    powered: bool,
}

impl TerminalPanel<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TerminalPanel<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            powered: false,
        }
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Panel for TerminalPanel<W> {
    fn power_on(&mut self) -> Result<(), PanelError> {
        debug!("terminal panel on");
        self.powered = true;
        Ok(())
    }

    fn power_off(&mut self) -> Result<(), PanelError> {
        debug!("terminal panel off");
        self.powered = false;
        Ok(())
    }

    fn show(&mut self, frame: &Framebuffer) -> Result<(), PanelError> {
        self.out.write_all(render_ascii(frame).as_bytes())?;
        self.out.flush()?;
        Ok(())
    }
}

/// Downsample the canvas into a framed block of text.
///
/// A cell is drawn as `#` when any pixel inside it carries ink.
pub fn render_ascii(frame: &Framebuffer) -> String {
    let cols = frame.width().div_ceil(CELL_WIDTH);
    let rows = frame.height().div_ceil(CELL_HEIGHT);
    let border = format!("+{}+\n", "-".repeat(cols as usize));

    let mut out = String::with_capacity(((cols + 3) * (rows + 2)) as usize);
    out.push_str(&border);
    for row in 0..rows {
        out.push('|');
        for col in 0..cols {
            let inked = (0..CELL_HEIGHT).any(|dy| {
                (0..CELL_WIDTH).any(|dx| frame.is_ink(col * CELL_WIDTH + dx, row * CELL_HEIGHT + dy))
            });
            out.push(if inked { '#' } else { ' ' });
        }
        out.push_str("|\n");
    }
    out.push_str(&border);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_graphics::pixelcolor::BinaryColor;

    #[test]
    fn test_blank_canvas_renders_frame_only() {
        let fb = Framebuffer::try_new(10, 20).unwrap();
        assert_eq!(render_ascii(&fb), "+--+\n|  |\n|  |\n+--+\n");
    }

    #[test]
    fn test_ink_marks_its_cell() {
        let mut fb = Framebuffer::try_new(10, 20).unwrap();
        fb.set_pixel(7, 15, BinaryColor::On);
        assert_eq!(render_ascii(&fb), "+--+\n|  |\n| #|\n+--+\n");
    }

    #[test]
    fn test_show_writes_to_sink() {
        let fb = Framebuffer::try_new(400, 300).unwrap();
        let mut panel = TerminalPanel::new(Vec::new());
        panel.power_on().unwrap();
        assert!(panel.is_powered());
        panel.show(&fb).unwrap();

        let text = String::from_utf8(panel.into_inner()).unwrap();
        // 30 cell rows plus top and bottom border
        assert_eq!(text.lines().count(), 32);
        assert!(text.lines().all(|l| l.chars().count() == 82));
    }
}
