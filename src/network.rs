//! Radio power and connectivity.
//!
//! The kiosk never keeps the radio up while asleep. Entering a LIVE fetch
//! cycle powers it back on and waits a bounded number of checks for the
//! interface to come up; if it never does the cycle is skipped.

use crate::config::NetworkConfig;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("radio control failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("not connected after {attempts} attempts")]
    NotConnected { attempts: u32 },
}

/// Network radio the kiosk can switch on and off.
pub trait Radio {
    fn power_on(&mut self) -> Result<(), NetworkError>;
    fn power_off(&mut self) -> Result<(), NetworkError>;
    fn is_connected(&self) -> bool;
}

/// Radio controlled through sysfs.
///
/// Link state comes from `/sys/class/net/<iface>/operstate`; power goes
/// through an rfkill `soft` switch when one is configured. Association and
/// DHCP are left to the system's network manager.
#[derive(Debug, Clone)]
pub struct SysfsRadio {
    operstate_path: PathBuf,
    rfkill_path: Option<PathBuf>,
}

impl SysfsRadio {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            operstate_path: PathBuf::from(format!("/sys/class/net/{}/operstate", config.interface)),
            rfkill_path: config.rfkill_path.clone(),
        }
    }

    pub fn with_paths(operstate_path: impl Into<PathBuf>, rfkill_path: Option<PathBuf>) -> Self {
        Self {
            operstate_path: operstate_path.into(),
            rfkill_path,
        }
    }

    fn set_blocked(&self, blocked: bool) -> Result<(), NetworkError> {
        if let Some(path) = &self.rfkill_path {
            fs::write(path, if blocked { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl Radio for SysfsRadio {
    fn power_on(&mut self) -> Result<(), NetworkError> {
        self.set_blocked(false)
    }

    fn power_off(&mut self) -> Result<(), NetworkError> {
        self.set_blocked(true)
    }

    fn is_connected(&self) -> bool {
        fs::read_to_string(&self.operstate_path)
            .map(|state| state.trim() == "up")
            .unwrap_or(false)
    }
}

/// Make sure the radio is up, checking at most `connect_attempts` times.
pub async fn ensure_connected<R: Radio + ?Sized>(
    radio: &mut R,
    config: &NetworkConfig,
) -> Result<(), NetworkError> {
    if radio.is_connected() {
        return Ok(());
    }

    info!("bringing network up");
    radio.power_on()?;

    for attempt in 1..=config.connect_attempts {
        sleep(config.attempt_interval()).await;
        if radio.is_connected() {
            info!(attempt, "network connected");
            return Ok(());
        }
        debug!(attempt, "still waiting for network");
    }

    warn!(attempts = config.connect_attempts, "network did not come up");
    Err(NetworkError::NotConnected {
        attempts: config.connect_attempts,
    })
}
