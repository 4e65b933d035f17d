//! # Orchestrator
//!
//! The single control loop of the kiosk. Each [`Orchestrator::step`] polls the
//! mode machine, runs the battery check when its timer is due, and then either
//! parks the hardware (SLEEP) or runs a fetch-and-render cycle (LIVE).
//!
//! Two countdowns drive the loop and are independent of the mode:
//! - **update**: how often LIVE mode refetches departures
//! - **battery**: how often the gauge is sampled and shown
//!
//! A countdown that has never run, or was forced, is due immediately. Forcing
//! the update countdown on the way into SLEEP is what makes the next wake-up
//! fetch straight away.
//!
//! Every await inside a step happens in sequence, so exactly one cycle is in
//! flight at a time. Button presses that arrive during a fetch or a dwell wait
//! in the mode machine's channel until the next poll.

use crate::battery::{AdcSource, BatteryGauge};
use crate::compositor::Compositor;
use crate::config::Config;
use crate::departures::{fetch_stations, DepartureSource};
use crate::framebuffer::Panel;
use crate::mode::{Mode, ModeMachine, WakeSource};
use crate::network::{ensure_connected, Radio};
use crate::Station;
use chrono::Utc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Monotonic countdown that is due once its deadline has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    interval: Duration,
    deadline: Option<Instant>,
}

impl Countdown {
    /// A countdown that has not run yet and is therefore due.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.map_or(true, |deadline| now >= deadline)
    }

    /// True when the countdown never ran or was forced.
    pub fn is_forced(&self) -> bool {
        self.deadline.is_none()
    }

    pub fn restart(&mut self, now: Instant) {
        self.deadline = Some(now + self.interval);
    }

    pub fn force(&mut self) {
        self.deadline = None;
    }
}

/// Owns every collaborator and the current station list.
pub struct Orchestrator<S, P, R, A, W> {
    config: Config,
    mode: ModeMachine<W>,
    source: S,
    compositor: Compositor<P>,
    radio: R,
    gauge: BatteryGauge<A>,
    update_timer: Countdown,
    battery_timer: Countdown,
    stations: Vec<Station>,
    parked: bool,
}

impl<S, P, R, A, W> Orchestrator<S, P, R, A, W>
where
    S: DepartureSource,
    P: Panel,
    R: Radio,
    A: AdcSource,
    W: WakeSource,
{
    pub fn new(
        config: Config,
        mode: ModeMachine<W>,
        source: S,
        compositor: Compositor<P>,
        radio: R,
        gauge: BatteryGauge<A>,
    ) -> Self {
        let update_timer = Countdown::new(config.timing.update_interval());
        let battery_timer = Countdown::new(config.timing.battery_check_interval());
        Self {
            config,
            mode,
            source,
            compositor,
            radio,
            gauge,
            update_timer,
            battery_timer,
            stations: Vec::new(),
            parked: false,
        }
    }

    pub fn mode(&self) -> &ModeMachine<W> {
        &self.mode
    }

    /// Stations from the most recent fetch cycle.
    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn compositor(&self) -> &Compositor<P> {
        &self.compositor
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn update_timer(&self) -> &Countdown {
        &self.update_timer
    }

    pub fn battery_timer(&self) -> &Countdown {
        &self.battery_timer
    }

    /// Run the loop forever.
    pub async fn run(&mut self) {
        info!(
            stations = self.config.stations.len(),
            update_ms = self.config.timing.update_interval_ms,
            "departure board running"
        );
        loop {
            self.step().await;
        }
    }

    /// One pass of the control loop.
    pub async fn step(&mut self) {
        self.mode.poll(Instant::now());

        if self.battery_timer.is_due(Instant::now()) {
            self.check_battery();
            self.battery_timer.restart(Instant::now());
        }

        match self.mode.current_mode() {
            Mode::Sleep => self.sleep_step().await,
            Mode::Live => {
                self.parked = false;
                self.live_step().await;

                self.mode.poll(Instant::now());
                if self.mode.sleep_requested() {
                    self.park();
                }
            }
        }
    }

    fn check_battery(&mut self) {
        self.compositor.power_on();
        match self.gauge.sample() {
            Ok(reading) => {
                let status = reading.status_text();
                info!(
                    voltage = reading.voltage,
                    percent = reading.percentage(),
                    "battery checked"
                );
                if reading.is_low_battery() {
                    warn!(voltage = reading.voltage, "battery low");
                }
                self.compositor.battery_status_screen(&status);
            }
            Err(e) => warn!(error = %e, "battery check failed"),
        }
        if self.mode.current_mode() == Mode::Sleep {
            self.compositor.power_off();
        }
    }

    /// Park once, then wait for a press or the next battery check.
    async fn sleep_step(&mut self) {
        if !self.parked {
            self.park();
        }
        let deadline = self
            .battery_timer
            .deadline()
            .unwrap_or_else(Instant::now);
        if self.mode.wait_for_event(deadline).await {
            debug!("woken by button");
        }
    }

    /// Enter SLEEP: idle screen, peripherals off, next LIVE entry fetches at once.
    fn park(&mut self) {
        self.mode.enter_sleep();
        self.compositor.power_on();
        self.compositor.idle_screen();
        self.compositor.power_off();
        if let Err(e) = self.radio.power_off() {
            warn!(error = %e, "radio power off failed");
        }
        self.update_timer.force();
        self.parked = true;
    }

    async fn live_step(&mut self) {
        if !self.update_timer.is_due(Instant::now()) {
            sleep(self.config.timing.poll_interval()).await;
            return;
        }

        self.compositor.power_on();
        if self.update_timer.is_forced() {
            self.compositor.connecting_screen();
        }

        if let Err(e) = ensure_connected(&mut self.radio, &self.config.network).await {
            // Total connection loss falls back to the connecting screen
            warn!(error = %e, "skipping update cycle");
            self.compositor.connecting_screen();
            self.update_timer.restart(Instant::now());
            return;
        }

        self.stations = fetch_stations(
            &self.source,
            &self.config.stations,
            &self.config.api,
            Utc::now(),
        )
        .await;

        if self.stations.is_empty() {
            info!("no station has upcoming departures");
        }
        self.render_stations().await;
        self.update_timer.restart(Instant::now());
    }

    /// Show each station on its own page for the dwell time.
    async fn render_stations(&mut self) {
        let dwell = self.config.timing.dwell();
        for station in &self.stations {
            self.compositor.start_station_page(&station.display_name);
            let mut shown = 0;
            for departure in &station.departures {
                if !self.compositor.add_departure_row(
                    &departure.line,
                    &departure.destination,
                    departure.minutes,
                ) {
                    break;
                }
                shown += 1;
            }
            if shown < station.departures.len() {
                debug!(
                    station = %station.display_name,
                    dropped = station.departures.len() - shown,
                    "rows did not fit"
                );
            }
            sleep(dwell).await;
        }
    }
}
