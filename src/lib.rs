//! # Departure Board Core Library
//!
//! This library holds the moving parts of a battery-powered transit kiosk: a
//! SLEEP/LIVE mode machine driven by a physical button, a pipeline that turns
//! live departure feeds into typed rows, and a compositor that lays those rows
//! out on a fixed-size monochrome e-paper canvas.
//!
//! ## Data Flow
//! 1. **Poll**: [`mode::ModeMachine`] applies queued button presses and the
//!    inactivity timeout
//! 2. **Fetch**: [`departures::fetch_stations`] queries every configured stop
//!    and keeps only departures still in the future
//! 3. **Render**: [`compositor::Compositor`] draws one page per station and
//!    hands the canvas to a [`framebuffer::Panel`]
//! 4. **Rest**: [`orchestrator::Orchestrator`] parks the peripherals and waits
//!    for the next button press
//!
//! ## Core Types
//! - [`TransportType`]: the mode of transport a line belongs to
//! - [`Departure`]: a single upcoming departure, already normalized
//! - [`Station`]: a display name and the departures shown for it

use serde::Deserialize;

pub mod battery;
pub mod compositor;
pub mod config;
pub mod departures;
pub mod framebuffer;
#[cfg(all(target_os = "linux", feature = "hardware"))]
pub mod hardware;
pub mod input;
pub mod mode;
pub mod network;
pub mod orchestrator;
pub mod terminal;

/// Mode of transport as reported by the departure feed.
///
/// Codes the kiosk does not know about are kept as [`TransportType::Other`]
/// so that a new product type never breaks decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportType {
    Ubahn,
    Sbahn,
    Tram,
    Bus,
    #[serde(other)]
    Other,
}

impl TransportType {
    /// Parse a feed code such as `"TRAM"`. Matching ignores ASCII case.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "UBAHN" => TransportType::Ubahn,
            "SBAHN" => TransportType::Sbahn,
            "TRAM" => TransportType::Tram,
            "BUS" => TransportType::Bus,
            _ => TransportType::Other,
        }
    }

    /// One-letter prefix put in front of the line label.
    ///
    /// Subway lines carry no prefix: their labels already read "U2", "U8".
    pub fn line_prefix(self) -> &'static str {
        match self {
            TransportType::Tram => "T",
            TransportType::Sbahn => "S",
            TransportType::Bus => "B",
            TransportType::Ubahn | TransportType::Other => "",
        }
    }
}

/// A departure ready for display.
///
/// `minutes` is always at least 1: departures that already left, or leave
/// within the current minute, never make it into a [`Station`].
///
/// # Example
/// ```
/// use departure_board_lib::Departure;
///
/// let dep = Departure {
///     line: "T19".to_string(),
///     destination: "Pasing".to_string(),
///     minutes: 4,
/// };
/// assert_eq!(dep.countdown_label(), "4 min");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Departure {
    /// Line label with its transport prefix, e.g. "T19" or "U2"
    pub line: String,
    /// Final stop of the service
    pub destination: String,
    /// Whole minutes until departure, never zero
    pub minutes: u32,
}

impl Departure {
    /// Text shown in the countdown column.
    pub fn countdown_label(&self) -> String {
        format!("{} min", self.minutes)
    }
}

/// One configured stop and the departures fetched for it this cycle.
///
/// A station with no qualifying departures is never built; the pipeline
/// omits it instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Station {
    /// Name shown in the page title
    pub display_name: String,
    /// Departures in the order the feed returned them
    pub departures: Vec<Departure>,
}
