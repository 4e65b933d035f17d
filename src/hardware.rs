//! Raspberry Pi adapters for the Waveshare 4.2" e-paper panel and the wake
//! button. Only built with the `hardware` feature.
//!
//! The panel talks over the kernel SPI driver (chip select is handled by
//! spidev) with DC, RST and BUSY on gpio-cdev lines. The button is watched on
//! a plain thread that blocks on falling-edge line events and forwards each
//! press into the mode machine's channel.

use crate::config::HardwareConfig;
use crate::framebuffer::{Framebuffer, Panel, PanelError, CANVAS_HEIGHT, CANVAS_WIDTH};
use crate::mode::{EventSender, ModeEvent};
use epd_waveshare::{epd4in2::Epd4in2, prelude::*};
use linux_embedded_hal::gpio_cdev::{Chip, EventRequestFlags, LineRequestFlags};
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::{CdevPin, Delay, SpidevDevice};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Presses closer together than this are contact bounce
const DEBOUNCE_NS: u64 = 200_000_000;

#[derive(Error, Debug)]
pub enum ButtonError {
    #[error("GPIO error: {0}")]
    Gpio(#[from] linux_embedded_hal::gpio_cdev::Error),

    #[error("could not start button thread: {0}")]
    Thread(#[from] std::io::Error),
}

type Driver = Epd4in2<SpidevDevice, CdevPin, CdevPin, CdevPin, Delay>;

fn driver_error(context: &str, e: impl std::fmt::Debug) -> PanelError {
    PanelError::Driver(format!("{context}: {e:?}"))
}

/// The e-paper panel behind [`Panel`].
pub struct EpdPanel {
    spi: SpidevDevice,
    delay: Delay,
    epd: Driver,
    awake: bool,
}

impl EpdPanel {
    /// Open the SPI device and GPIO lines and initialise the controller.
    pub fn open(hw: &HardwareConfig) -> Result<Self, PanelError> {
        let mut spi =
            SpidevDevice::open(&hw.spi_device).map_err(|e| driver_error("open spidev", e))?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(4_000_000)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        spi.configure(&options)?;

        let mut chip = Chip::new(&hw.gpio_chip).map_err(|e| driver_error("open gpio chip", e))?;
        let output = |chip: &mut Chip, offset: u32, default: u8, label: &str| {
            chip.get_line(offset)
                .and_then(|line| line.request(LineRequestFlags::OUTPUT, default, label))
                .and_then(CdevPin::new)
                .map_err(|e| driver_error(label, e))
        };
        let dc = output(&mut chip, hw.dc_pin, 0, "epd-dc")?;
        let rst = output(&mut chip, hw.rst_pin, 1, "epd-rst")?;
        let busy = chip
            .get_line(hw.busy_pin)
            .and_then(|line| line.request(LineRequestFlags::INPUT, 0, "epd-busy"))
            .and_then(CdevPin::new)
            .map_err(|e| driver_error("epd-busy", e))?;

        let mut delay = Delay {};
        let epd = Epd4in2::new(&mut spi, busy, dc, rst, &mut delay, None)
            .map_err(|e| driver_error("panel init", e))?;

        info!(
            spi = %hw.spi_device,
            dc = hw.dc_pin,
            rst = hw.rst_pin,
            busy = hw.busy_pin,
            "e-paper panel initialised"
        );
        Ok(Self {
            spi,
            delay,
            epd,
            awake: true,
        })
    }
}

impl Panel for EpdPanel {
    fn power_on(&mut self) -> Result<(), PanelError> {
        if self.awake {
            return Ok(());
        }
        self.epd
            .wake_up(&mut self.spi, &mut self.delay)
            .map_err(|e| driver_error("wake", e))?;
        self.awake = true;
        debug!("panel awake");
        Ok(())
    }

    fn power_off(&mut self) -> Result<(), PanelError> {
        if !self.awake {
            return Ok(());
        }
        self.epd
            .sleep(&mut self.spi, &mut self.delay)
            .map_err(|e| driver_error("sleep", e))?;
        self.awake = false;
        debug!("panel asleep");
        Ok(())
    }

    fn show(&mut self, frame: &Framebuffer) -> Result<(), PanelError> {
        let expected = (CANVAS_WIDTH * CANVAS_HEIGHT).div_ceil(8) as usize;
        if frame.as_bytes().len() != expected {
            return Err(PanelError::FrameSize {
                expected,
                actual: frame.as_bytes().len(),
            });
        }
        self.power_on()?;
        self.epd
            .update_and_display_frame(&mut self.spi, frame.as_bytes(), &mut self.delay)
            .map_err(|e| driver_error("refresh", e))
    }
}

/// Watch the button line and send one event per debounced falling edge.
pub fn spawn_gpio_button(
    chip_path: &str,
    offset: u32,
    tx: EventSender,
) -> Result<JoinHandle<()>, ButtonError> {
    let mut chip = Chip::new(chip_path)?;
    let events = chip.get_line(offset)?.events(
        LineRequestFlags::INPUT,
        EventRequestFlags::FALLING_EDGE,
        "departure-button",
    )?;
    info!(line = offset, "watching wake button");

    let handle = thread::Builder::new()
        .name("button".to_string())
        .spawn(move || {
            let mut last_press: Option<u64> = None;
            for event in events {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "button line read failed");
                        continue;
                    }
                };
                let at = event.timestamp();
                if last_press.is_some_and(|prev| at.saturating_sub(prev) < DEBOUNCE_NS) {
                    continue;
                }
                last_press = Some(at);
                if tx.send(ModeEvent::ButtonPressed).is_err() {
                    debug!("mode machine gone, stopping button thread");
                    break;
                }
            }
        })?;
    Ok(handle)
}
