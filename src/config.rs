//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the
//! departure-config.toml file. The file is read exactly once at startup; the
//! station list it describes is immutable for the lifetime of the process.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_PATH: &str = "departure-config.toml";

/// Application configuration loaded from departure-config.toml
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Stops to query, shown in this order
    pub stations: Vec<StationQuery>,
    /// Departure feed settings
    pub api: ApiConfig,
    /// Loop timers and timeouts
    pub timing: TimingConfig,
    /// Compositor policy
    pub display: DisplayConfig,
    /// Radio and connectivity
    pub network: NetworkConfig,
    /// Battery ADC
    pub battery: BatteryConfig,
    /// Wake source and button wiring
    pub power: PowerConfig,
}

/// One stop the kiosk shows departures for.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StationQuery {
    /// Name printed in the page title
    pub display_name: String,
    /// Opaque stop key understood by the feed (e.g. "de:09162:170")
    pub stop_id: String,
    /// Transport type codes to include ("TRAM", "UBAHN", ...); empty = all
    #[serde(default)]
    pub transport_types: Vec<String>,
    /// Only show departures at least this many minutes from now
    #[serde(default)]
    pub time_offset_minutes: i32,
}

/// Departure feed settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Endpoint queried once per station
    pub base_url: String,
    /// Number of departures requested per station
    pub result_limit: u32,
    /// Responses larger than this are rejected, not truncated
    pub max_response_bytes: usize,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// User-Agent header sent with every request
    pub user_agent: String,
}

/// Loop timers, all in milliseconds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Time between departure refreshes while LIVE
    pub update_interval_ms: u64,
    /// Time between battery checks, in any mode
    pub battery_check_interval_ms: u64,
    /// Inactivity after which LIVE asks to go back to SLEEP
    pub live_timeout_ms: u64,
    /// How long each station page stays on screen
    pub dwell_ms: u64,
    /// Idle time between loop iterations while LIVE
    pub poll_interval_ms: u64,
}

/// Compositor policy
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Cap on rows per station page; unset means "as many as fit"
    pub max_rows_per_station: Option<usize>,
    /// Panel wiring, only read by hardware builds
    pub hardware: HardwareConfig,
}

/// SPI device and GPIO lines of the e-paper panel
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub spi_device: String,
    pub gpio_chip: String,
    /// Data/command select, BCM numbering
    pub dc_pin: u32,
    pub rst_pin: u32,
    pub busy_pin: u32,
}

/// Radio and connectivity
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Wireless interface whose operstate tells whether we are online
    pub interface: String,
    /// rfkill `soft` switch used to power the radio up and down
    pub rfkill_path: Option<PathBuf>,
    /// Connectivity checks before giving up on a cycle
    pub connect_attempts: u32,
    /// Delay between connectivity checks
    pub attempt_interval_ms: u64,
}

/// Battery ADC
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatteryConfig {
    /// IIO raw sample file for the battery divider
    pub adc_path: PathBuf,
    /// ADC reference voltage in millivolts
    pub vref_mv: u32,
}

/// Wake source and button wiring
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PowerConfig {
    /// `power/wakeup` attribute of the device carrying the wake button
    pub wakeup_path: Option<PathBuf>,
    /// GPIO line offset of the wake button (hardware builds)
    pub button_line: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            stations: vec![StationQuery {
                display_name: "Stiglmaierpl.".to_string(),
                stop_id: "de:09162:170".to_string(),
                transport_types: vec!["TRAM".to_string(), "UBAHN".to_string()],
                time_offset_minutes: 0,
            }],
            api: ApiConfig::default(),
            timing: TimingConfig::default(),
            display: DisplayConfig::default(),
            network: NetworkConfig::default(),
            battery: BatteryConfig::default(),
            power: PowerConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: "https://www.mvg.de/api/bgw-pt/v3/departures".to_string(),
            result_limit: 5,
            max_response_bytes: 16 * 1024,
            timeout_secs: 15,
            user_agent: concat!("departure-board/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            update_interval_ms: 60_000,
            battery_check_interval_ms: 300_000,
            live_timeout_ms: 300_000,
            dwell_ms: 5_000,
            poll_interval_ms: 50,
        }
    }
}

impl TimingConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn battery_check_interval(&self) -> Duration {
        Duration::from_millis(self.battery_check_interval_ms)
    }

    pub fn live_timeout(&self) -> Duration {
        Duration::from_millis(self.live_timeout_ms)
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        HardwareConfig {
            spi_device: "/dev/spidev0.0".to_string(),
            gpio_chip: "/dev/gpiochip0".to_string(),
            dc_pin: 25,
            rst_pin: 17,
            busy_pin: 24,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            interface: "wlan0".to_string(),
            rfkill_path: None,
            connect_attempts: 20,
            attempt_interval_ms: 500,
        }
    }
}

impl NetworkConfig {
    pub fn attempt_interval(&self) -> Duration {
        Duration::from_millis(self.attempt_interval_ms)
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        BatteryConfig {
            adc_path: PathBuf::from("/sys/bus/iio/devices/iio:device0/in_voltage0_raw"),
            vref_mv: 1100,
        }
    }
}

impl Config {
    /// Load configuration from departure-config.toml
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load() -> Self {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    if config.stations.is_empty() {
                        warn!(path = %path.display(), "config lists no stations, nothing will be fetched");
                    }
                    info!(
                        path = %path.display(),
                        stations = config.stations.len(),
                        "loaded configuration"
                    );
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "no config file found, using defaults");
                Self::default()
            }
        }
    }
}
