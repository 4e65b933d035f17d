//! # Display Compositor
//!
//! Lays out one page per station on the fixed-size canvas: the station name
//! as a title, a divider, then one row per departure with three columns
//! (line, destination, countdown). A station gets exactly one page; rows that
//! do not fit are dropped for this cycle rather than carried to a second page.
//!
//! Every drawing operation flushes the canvas to the [`Panel`] straight away,
//! so a page builds up row by row on the e-paper.
//!
//! If the canvas could not be allocated at startup the compositor disables
//! itself: every operation becomes a no-op and [`Compositor::is_ready`]
//! reports `false`.

use crate::framebuffer::{Framebuffer, Panel, CANVAS_HEIGHT, CANVAS_WIDTH};
use embedded_graphics::{
    mono_font::{iso_8859_1::FONT_10X20, MonoTextStyle},
    pixelcolor::BinaryColor,
    prelude::*,
    primitives::{Line, PrimitiveStyle},
    text::Text,
};
use tracing::{debug, error, warn};

/// Baseline of the page title
pub const TITLE_Y: i32 = 30;
/// Left edge of the title and the divider
pub const TITLE_X: i32 = 10;
/// Divider drawn under the title
pub const DIVIDER_Y: i32 = 42;
/// Baseline of the first departure row
pub const TOP_MARGIN: i32 = 80;
/// Vertical distance between departure rows
pub const LINE_HEIGHT: i32 = 36;
/// Column x positions
pub const LINE_X: i32 = 10;
pub const DEST_X: i32 = 80;
pub const TIME_X: i32 = 310;

const GLYPH_WIDTH: i32 = 10;
const COLUMN_GAP: i32 = 10;

/// Text shown while the kiosk sleeps
pub const IDLE_TEXT: &str = "Press the button for departures";
/// Text shown while LIVE mode brings the radio up
pub const CONNECTING_TEXT: &str = "Live mode - connecting...";

/// Draws station pages and status screens onto the canvas.
pub struct Compositor<P> {
    panel: P,
    canvas: Option<Framebuffer>,
    cursor_y: i32,
    rows_on_page: usize,
    max_rows_per_station: Option<usize>,
}

impl<P: Panel> Compositor<P> {
    /// Allocate the canvas and wrap the panel.
    ///
    /// `max_rows_per_station` caps the rows on a page below what the canvas
    /// geometry allows; `None` fills the page.
    pub fn new(panel: P, max_rows_per_station: Option<usize>) -> Self {
        let canvas = match Framebuffer::try_new(CANVAS_WIDTH, CANVAS_HEIGHT) {
            Ok(canvas) => Some(canvas),
            Err(e) => {
                error!(error = %e, "display disabled for this session");
                None
            }
        };
        Self::with_canvas(panel, canvas, max_rows_per_station)
    }

    /// Build around an already allocated (or missing) canvas.
    pub fn with_canvas(
        panel: P,
        canvas: Option<Framebuffer>,
        max_rows_per_station: Option<usize>,
    ) -> Self {
        Self {
            panel,
            canvas,
            cursor_y: TOP_MARGIN,
            rows_on_page: 0,
            max_rows_per_station,
        }
    }

    /// False when the canvas could not be allocated.
    pub fn is_ready(&self) -> bool {
        self.canvas.is_some()
    }

    pub fn cursor_y(&self) -> i32 {
        self.cursor_y
    }

    pub fn canvas(&self) -> Option<&Framebuffer> {
        self.canvas.as_ref()
    }

    pub fn panel(&self) -> &P {
        &self.panel
    }

    pub fn panel_mut(&mut self) -> &mut P {
        &mut self.panel
    }

    pub fn power_on(&mut self) {
        if !self.is_ready() {
            return;
        }
        if let Err(e) = self.panel.power_on() {
            warn!(error = %e, "display power on failed");
        }
    }

    pub fn power_off(&mut self) {
        if !self.is_ready() {
            return;
        }
        if let Err(e) = self.panel.power_off() {
            warn!(error = %e, "display power off failed");
        }
    }

    /// Clear the canvas and start a fresh page for `name`.
    pub fn start_station_page(&mut self, name: &str) {
        let Some(canvas) = self.canvas.as_mut() else {
            return;
        };
        draw_header(canvas, name);
        self.cursor_y = TOP_MARGIN;
        self.rows_on_page = 0;
        self.flush();
    }

    /// Draw one departure row below the previous one.
    ///
    /// Returns `false` without drawing anything once the page is full; the
    /// caller should stop adding rows for this station.
    pub fn add_departure_row(&mut self, line: &str, destination: &str, minutes: u32) -> bool {
        if self.canvas.is_none() {
            return false;
        }
        if self.cursor_y + LINE_HEIGHT > CANVAS_HEIGHT as i32 - LINE_HEIGHT {
            debug!(cursor_y = self.cursor_y, "page full, dropping row");
            return false;
        }
        if let Some(max_rows) = self.max_rows_per_station {
            if self.rows_on_page >= max_rows {
                debug!(max_rows, "row limit reached, dropping row");
                return false;
            }
        }

        if let Some(canvas) = self.canvas.as_mut() {
            let style = MonoTextStyle::new(&FONT_10X20, BinaryColor::On);
            let y = self.cursor_y;
            let dest_chars = ((TIME_X - DEST_X - COLUMN_GAP) / GLYPH_WIDTH) as usize;
            let line_chars = ((DEST_X - LINE_X - COLUMN_GAP) / GLYPH_WIDTH) as usize;
            let countdown = format!("{minutes} min");

            let _ = Text::new(&clip(line, line_chars), Point::new(LINE_X, y), style).draw(canvas);
            let _ = Text::new(&clip(destination, dest_chars), Point::new(DEST_X, y), style)
                .draw(canvas);
            let _ = Text::new(&countdown, Point::new(TIME_X, y), style).draw(canvas);
        }

        self.cursor_y += LINE_HEIGHT;
        self.rows_on_page += 1;
        self.flush();
        true
    }

    pub fn idle_screen(&mut self) {
        self.message_screen(IDLE_TEXT);
    }

    pub fn connecting_screen(&mut self) {
        self.message_screen(CONNECTING_TEXT);
    }

    pub fn battery_status_screen(&mut self, text: &str) {
        self.message_screen(text);
    }

    /// Clear the canvas and show a single line of text at the top.
    pub fn message_screen(&mut self, text: &str) {
        let Some(canvas) = self.canvas.as_mut() else {
            return;
        };
        draw_header(canvas, text);
        self.cursor_y = TOP_MARGIN;
        self.rows_on_page = 0;
        self.flush();
    }

    fn flush(&mut self) {
        if let Some(canvas) = self.canvas.as_ref() {
            if let Err(e) = self.panel.show(canvas) {
                warn!(error = %e, "display flush failed");
            }
        }
    }
}

/// Clear to paper, then draw a title line and the divider under it.
fn draw_header(canvas: &mut Framebuffer, title: &str) {
    canvas.clear_white();

    let style = MonoTextStyle::new(&FONT_10X20, BinaryColor::On);
    let max_chars = ((CANVAS_WIDTH as i32 - 2 * TITLE_X) / GLYPH_WIDTH) as usize;
    let _ = Text::new(&clip(title, max_chars), Point::new(TITLE_X, TITLE_Y), style).draw(canvas);

    let _ = Line::new(
        Point::new(TITLE_X, DIVIDER_Y),
        Point::new(CANVAS_WIDTH as i32 - TITLE_X, DIVIDER_Y),
    )
    .into_styled(PrimitiveStyle::with_stroke(BinaryColor::On, 1))
    .draw(canvas);
}

/// Cut `text` to at most `max_chars` characters.
fn clip(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
