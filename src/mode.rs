//! # Mode State Machine
//!
//! The kiosk is either asleep (nothing fetched, peripherals powered down) or
//! live (departures refreshed on a timer). A button press wakes it up and
//! every further press extends the live session. After [`ModeMachine`] has
//! seen no press for the live timeout it raises a one-shot sleep request; the
//! request stays raised until the owner acts on it with
//! [`ModeMachine::enter_sleep`].
//!
//! ## Event Injection
//! Button presses do not reach the machine through callbacks. The machine
//! owns the receiving half of a channel and hands out an [`EventSender`];
//! whatever watches the button edge pushes [`ModeEvent::ButtonPressed`] into
//! it. Queued events are applied on the next [`ModeMachine::poll`], which is
//! why a press during a long fetch is only noticed once the fetch is done.
//!
//! | state | button pressed            | timeout elapsed        |
//! |-------|---------------------------|------------------------|
//! | SLEEP | LIVE, interaction = now   | no-op                  |
//! | LIVE  | LIVE, interaction = now   | raise `sleep_requested`|

use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Top-level activity mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sleep,
    Live,
}

/// Inputs the machine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeEvent {
    ButtonPressed,
}

/// Sending half handed to the button watcher.
pub type EventSender = mpsc::UnboundedSender<ModeEvent>;

#[derive(Error, Debug)]
pub enum WakeError {
    #[error("could not arm wake source: {0}")]
    Io(#[from] std::io::Error),
}

/// Hardware signal that brings the board out of its low-power state.
pub trait WakeSource {
    /// Prepare the source for the next low-power period.
    fn arm(&mut self) -> Result<(), WakeError>;
}

/// Wake source configured through a device's `power/wakeup` attribute.
///
/// With no path configured there is nothing to arm: the button watcher alone
/// resumes the loop.
#[derive(Debug, Clone, Default)]
pub struct SysfsWake {
    path: Option<PathBuf>,
}

impl SysfsWake {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl WakeSource for SysfsWake {
    fn arm(&mut self) -> Result<(), WakeError> {
        if let Some(path) = &self.path {
            fs::write(path, "enabled")?;
            debug!(path = %path.display(), "wake source armed");
        }
        Ok(())
    }
}

pub struct ModeMachine<W> {
    mode: Mode,
    sleep_requested: bool,
    last_interaction: Instant,
    live_timeout: Duration,
    events: mpsc::UnboundedReceiver<ModeEvent>,
    wake: W,
}

impl<W: WakeSource> ModeMachine<W> {
    /// Create a machine in SLEEP along with the sender for button events.
    pub fn new(live_timeout: Duration, wake: W, now: Instant) -> (Self, EventSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let machine = Self {
            mode: Mode::Sleep,
            sleep_requested: false,
            last_interaction: now,
            live_timeout,
            events: rx,
            wake,
        };
        info!("mode machine initialised in SLEEP");
        (machine, tx)
    }

    pub fn current_mode(&self) -> Mode {
        self.mode
    }

    pub fn sleep_requested(&self) -> bool {
        self.sleep_requested
    }

    pub fn last_interaction(&self) -> Instant {
        self.last_interaction
    }

    /// Apply queued events, then check the inactivity timeout. Never blocks.
    pub fn poll(&mut self, now: Instant) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event, now);
        }
        self.tick(now);
    }

    /// Apply one event.
    pub fn handle_event(&mut self, event: ModeEvent, now: Instant) {
        match event {
            ModeEvent::ButtonPressed => {
                debug!("button pressed");
                self.last_interaction = now;
                match self.mode {
                    Mode::Sleep => self.enter_live(now),
                    Mode::Live => debug!("live session extended"),
                }
            }
        }
    }

    /// Raise the sleep request once the live session has gone idle.
    pub fn tick(&mut self, now: Instant) {
        if self.mode != Mode::Live || self.sleep_requested {
            return;
        }
        if now.saturating_duration_since(self.last_interaction) >= self.live_timeout {
            info!("live mode timed out, requesting sleep");
            self.sleep_requested = true;
        }
    }

    /// Go to SLEEP, clear the request and re-arm the wake source.
    pub fn enter_sleep(&mut self) {
        info!("entering SLEEP mode");
        self.mode = Mode::Sleep;
        self.sleep_requested = false;
        if let Err(e) = self.wake.arm() {
            warn!(error = %e, "wake source not armed");
        }
    }

    pub fn enter_live(&mut self, now: Instant) {
        info!("entering LIVE mode");
        self.mode = Mode::Live;
        self.last_interaction = now;
    }

    /// Suspend until the next event arrives or `deadline` passes.
    ///
    /// Returns `true` if an event was applied. Once every sender is gone the
    /// wait simply runs to the deadline.
    pub async fn wait_for_event(&mut self, deadline: Instant) -> bool {
        tokio::select! {
            event = self.events.recv() => match event {
                Some(event) => {
                    self.handle_event(event, Instant::now());
                    true
                }
                None => {
                    sleep_until(deadline).await;
                    false
                }
            },
            _ = sleep_until(deadline) => false,
        }
    }
}
