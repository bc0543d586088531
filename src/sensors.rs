//! ==============================================================================
//! sensors.rs - capability-gated position and power sources
//! ==============================================================================
//!
//! purpose:
//!     provides the loop's view of the device sensors: a one-shot position
//!     permission probe, a position fix, and a battery query. abstracts away
//!     the difference between running against real hardware (a serial NMEA
//!     GPS module and the sysfs power-supply class) and a development
//!     machine (mocks).
//!
//! relationships:
//!     - used by: transmitter.rs (one reading + one power query per cycle)
//!     - uses: nmea.rs (GGA parsing on feature="hardware")
//!     - uses: rppal uart (on feature="hardware")
//!
//! the two queries are independent: a position timeout must never block the
//! battery reading from being used, and vice versa. the loop issues them
//! concurrently.
//!
//! ==============================================================================

use std::future::Future;

use thiserror::Error;

use crate::domain::{PowerState, Reading};

/// per-cycle, non-fatal sensor failure; the cycle continues with partial data
#[derive(Debug, Error)]
#[cfg_attr(not(feature = "hardware"), allow(dead_code))]
pub enum AcquisitionError {
    #[error("position fix timed out after {0} s")]
    FixTimeout(u64),
    #[error("sensor unavailable: {0}")]
    Unavailable(String),
}

pub trait SensorSource: Send + Sync + 'static {
    /// resolve the position permission once at startup; a denial means the
    /// loop must never start polling position
    fn request_position_permission(&self) -> impl Future<Output = bool> + Send;

    /// acquire one position fix at the source's native accuracy
    fn current_reading(&self) -> impl Future<Output = Result<Reading, AcquisitionError>> + Send;

    /// query battery level and charge state
    fn current_power_state(
        &self,
    ) -> impl Future<Output = Result<PowerState, AcquisitionError>> + Send;
}

// ==============================================================================================
// MOCK IMPLEMENTATION (development build, no hardware access)
// ==============================================================================================
#[cfg(not(feature = "hardware"))]
pub struct Sensors {
    latitude: f64,
    longitude: f64,
}

#[cfg(not(feature = "hardware"))]
impl Sensors {
    pub fn new(_config: &crate::config::SensorsConfig) -> Self {
        tracing::info!("Using MOCK sensors (no hardware access)");
        Self {
            latitude: 53.361336,
            longitude: -6.505620,
        }
    }
}

#[cfg(not(feature = "hardware"))]
impl SensorSource for Sensors {
    async fn request_position_permission(&self) -> bool {
        tracing::debug!("[MOCK GPS] position permission granted");
        true
    }

    async fn current_reading(&self) -> Result<Reading, AcquisitionError> {
        tracing::debug!("[MOCK GPS] fix at {}, {}", self.latitude, self.longitude);
        Ok(Reading {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy_m: Some(8.0),
            captured_at: chrono::Utc::now(),
        })
    }

    async fn current_power_state(&self) -> Result<PowerState, AcquisitionError> {
        tracing::debug!("[MOCK BATTERY] 82% unplugged");
        Ok(PowerState {
            level_fraction: 0.82,
            charge_state: crate::domain::ChargeState::Unplugged,
        })
    }
}

// ==============================================================================================
// HARDWARE IMPLEMENTATION (serial NMEA GPS + sysfs power supply)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub struct Sensors {
    gps_device: String,
    gps_baud: u32,
    fix_timeout_seconds: u64,
    battery_supply: String,
}

#[cfg(feature = "hardware")]
impl Sensors {
    pub fn new(config: &crate::config::SensorsConfig) -> Self {
        tracing::info!(
            "Using HARDWARE sensors (gps {} @ {} baud, battery {})",
            config.gps.device,
            config.gps.baud,
            config.battery.supply
        );
        Self {
            gps_device: config.gps.device.clone(),
            gps_baud: config.gps.baud,
            fix_timeout_seconds: config.gps.fix_timeout_seconds,
            battery_supply: config.battery.supply.clone(),
        }
    }
}

#[cfg(feature = "hardware")]
impl SensorSource for Sensors {
    async fn request_position_permission(&self) -> bool {
        use rppal::uart::{Parity, Uart};

        match Uart::with_path(&self.gps_device, self.gps_baud, Parity::None, 8, 1) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("position access denied ({}): {}", self.gps_device, e);
                false
            }
        }
    }

    async fn current_reading(&self) -> Result<Reading, AcquisitionError> {
        let device = self.gps_device.clone();
        let baud = self.gps_baud;
        let timeout_s = self.fix_timeout_seconds;

        // serial reads are blocking io; run them off the async threads
        let fix = tokio::task::spawn_blocking(move || {
            acquire_fix_blocking(&device, baud, timeout_s)
        })
        .await
        .map_err(|e| AcquisitionError::Unavailable(format!("gps task failed: {}", e)))??;

        tracing::debug!(
            "gps fix acquired ({} satellites, quality {})",
            fix.satellites,
            fix.quality
        );

        Ok(Reading {
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy_m: fix.accuracy_m(),
            captured_at: chrono::Utc::now(),
        })
    }

    async fn current_power_state(&self) -> Result<PowerState, AcquisitionError> {
        use crate::domain::ChargeState;

        let base = std::path::Path::new("/sys/class/power_supply").join(&self.battery_supply);

        let capacity: f64 = std::fs::read_to_string(base.join("capacity"))
            .map_err(|e| AcquisitionError::Unavailable(format!("battery capacity: {}", e)))?
            .trim()
            .parse()
            .map_err(|e| AcquisitionError::Unavailable(format!("battery capacity: {}", e)))?;

        // status file is optional on some supplies; missing maps to unknown
        let status = std::fs::read_to_string(base.join("status")).unwrap_or_default();
        let charge_state = match status.trim() {
            "Charging" => ChargeState::Charging,
            "Full" => ChargeState::Full,
            "Discharging" | "Not charging" => ChargeState::Unplugged,
            _ => ChargeState::Unknown,
        };

        Ok(PowerState {
            level_fraction: (capacity / 100.0).clamp(0.0, 1.0),
            charge_state,
        })
    }
}

/// read NMEA lines from the uart until a checksum-valid GGA fix arrives or
/// the timeout elapses
#[cfg(feature = "hardware")]
fn acquire_fix_blocking(
    device: &str,
    baud: u32,
    timeout_s: u64,
) -> Result<crate::nmea::GgaFix, AcquisitionError> {
    use rppal::uart::{Parity, Uart};
    use std::time::{Duration, Instant};

    let mut uart = Uart::with_path(device, baud, Parity::None, 8, 1)
        .map_err(|e| AcquisitionError::Unavailable(format!("gps open: {}", e)))?;
    uart.set_read_mode(0, Duration::from_millis(200))
        .map_err(|e| AcquisitionError::Unavailable(format!("gps setup: {}", e)))?;

    let deadline = Instant::now() + Duration::from_secs(timeout_s);
    let mut line = String::new();
    let mut buf = [0u8; 256];

    while Instant::now() < deadline {
        let n = uart
            .read(&mut buf)
            .map_err(|e| AcquisitionError::Unavailable(format!("gps read: {}", e)))?;

        for &byte in &buf[..n] {
            match byte {
                b'\n' => {
                    if let Some(fix) = crate::nmea::parse_gga(&line) {
                        return Ok(fix);
                    }
                    line.clear();
                }
                b'\r' => {}
                _ => {
                    // NMEA sentences are short; drop runaway garbage
                    if line.len() < 120 {
                        line.push(byte as char);
                    }
                }
            }
        }
    }

    Err(AcquisitionError::FixTimeout(timeout_s))
}
