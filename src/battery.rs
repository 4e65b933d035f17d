//! Battery gauge.
//!
//! The battery sits behind a 1:2 voltage divider on an ADC input. A raw
//! 12-bit sample is scaled to volts, clamped to the charged voltage, and then
//! mapped linearly onto 0-100 % between the empty and full cell voltages.

use std::fs;
use std::path::PathBuf;
use thiserror::Error;

/// Cell voltage treated as empty
pub const MIN_VOLTAGE: f32 = 3.0;
/// Cell voltage treated as fully charged
pub const MAX_VOLTAGE: f32 = 4.2;
/// Below this the kiosk reports a low battery
pub const LOW_BATTERY_THRESHOLD: f32 = 3.3;

const ADC_FULL_SCALE: f32 = 4095.0;
const DIVIDER_RATIO: f32 = 2.0;
const ADC_SUPPLY_VOLTS: f32 = 3.3;

#[derive(Error, Debug)]
pub enum AdcError {
    #[error("ADC read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("ADC sample {0:?} is not a number")]
    Parse(String),
}

/// Source of raw battery ADC samples.
pub trait AdcSource {
    fn read_raw(&mut self) -> Result<u16, AdcError>;
}

/// ADC exposed through the Linux IIO sysfs interface.
#[derive(Debug, Clone)]
pub struct IioAdc {
    path: PathBuf,
}

impl IioAdc {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AdcSource for IioAdc {
    fn read_raw(&mut self) -> Result<u16, AdcError> {
        let text = fs::read_to_string(&self.path)?;
        let trimmed = text.trim();
        trimmed
            .parse::<u16>()
            .map_err(|_| AdcError::Parse(trimmed.to_string()))
    }
}

/// Coarse charge bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryLevel {
    Critical,
    Low,
    Medium,
    Full,
}

/// One battery measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryReading {
    pub voltage: f32,
}

impl BatteryReading {
    pub fn from_voltage(voltage: f32) -> Self {
        Self { voltage }
    }

    /// Convert a raw ADC sample taken against `vref_mv`.
    pub fn from_raw(raw: u16, vref_mv: u32) -> Self {
        let voltage = (raw as f32 / ADC_FULL_SCALE)
            * DIVIDER_RATIO
            * ADC_SUPPLY_VOLTS
            * (vref_mv as f32 / 1000.0);
        Self {
            voltage: voltage.min(MAX_VOLTAGE),
        }
    }

    /// Charge estimate, linear between [`MIN_VOLTAGE`] and [`MAX_VOLTAGE`].
    pub fn percentage(&self) -> u8 {
        if self.voltage >= MAX_VOLTAGE {
            return 100;
        }
        if self.voltage <= MIN_VOLTAGE {
            return 0;
        }
        let fraction = (self.voltage - MIN_VOLTAGE) / (MAX_VOLTAGE - MIN_VOLTAGE);
        (fraction * 100.0).round().clamp(0.0, 100.0) as u8
    }

    pub fn level(&self) -> BatteryLevel {
        match self.percentage() {
            0..=10 => BatteryLevel::Critical,
            11..=25 => BatteryLevel::Low,
            26..=75 => BatteryLevel::Medium,
            _ => BatteryLevel::Full,
        }
    }

    pub fn is_low_battery(&self) -> bool {
        self.voltage < LOW_BATTERY_THRESHOLD
    }

    /// Text for the battery status screen, e.g. "battery:87%".
    pub fn status_text(&self) -> String {
        let mut status = format!("battery:{}%", self.percentage());
        if self.is_low_battery() {
            status.push_str(" LOW");
        }
        status
    }
}

/// Samples an [`AdcSource`] and turns it into a [`BatteryReading`].
pub struct BatteryGauge<A> {
    adc: A,
    vref_mv: u32,
}

impl<A: AdcSource> BatteryGauge<A> {
    pub fn new(adc: A, vref_mv: u32) -> Self {
        Self { adc, vref_mv }
    }

    pub fn sample(&mut self) -> Result<BatteryReading, AdcError> {
        let raw = self.adc.read_raw()?;
        Ok(BatteryReading::from_raw(raw, self.vref_mv))
    }
}
