use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::DeviceIdentity;

/// one position fix, produced fresh on every poll
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Reading {
    /// latitude in decimal degrees (positive = north)
    pub latitude: f64,
    /// longitude in decimal degrees (positive = east)
    pub longitude: f64,
    /// estimated accuracy radius in meters, if the source reports one
    pub accuracy_m: Option<f64>,
    /// capture time (utc)
    pub captured_at: DateTime<Utc>,
}

/// battery charge state as reported by the platform
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeState {
    Unknown,
    Charging,
    Full,
    Unplugged,
}

/// battery level and charge state, same lifecycle as a Reading
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PowerState {
    /// charge level as a fraction in [0, 1]
    pub level_fraction: f64,
    pub charge_state: ChargeState,
}

impl PowerState {
    /// substitute value when the battery query fails; the cycle continues
    /// with this instead of aborting
    pub fn fallback() -> Self {
        Self {
            level_fraction: 0.0,
            charge_state: ChargeState::Unknown,
        }
    }
}

/// the row shipped to the record store, built at send time and not retained
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransmissionRecord {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    /// serialized as an ISO-8601 string on the wire
    pub timestamp: DateTime<Utc>,
    /// integer percent 0-100
    pub battery_level: u8,
    pub device_type: String,
}

impl TransmissionRecord {
    pub fn new(identity: &DeviceIdentity, reading: &Reading, power: &PowerState) -> Self {
        Self {
            device_id: identity.device_id.clone(),
            latitude: reading.latitude,
            longitude: reading.longitude,
            accuracy: reading.accuracy_m,
            timestamp: reading.captured_at,
            battery_level: battery_percent(power.level_fraction),
            device_type: identity.device_type.clone(),
        }
    }
}

/// round a [0, 1] fraction to a whole percent, clamped to 0-100
fn battery_percent(fraction: f64) -> u8 {
    (fraction * 100.0).round().clamp(0.0, 100.0) as u8
}

/// transmission sub-state, distinct from the always-running poll timer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmissionPhase {
    Idle,
    Sending,
    Success,
    Error,
}

/// live snapshot of the sample-and-transmit loop
///
/// written only by the loop task, read by the status surface as a clone.
#[derive(Clone, Debug, Serialize)]
pub struct LoopState {
    pub last_reading: Option<Reading>,
    pub last_power: Option<PowerState>,
    pub last_update_at: Option<DateTime<Utc>>,
    /// completed poll cycles, incremented whether or not a fix was obtained
    pub poll_count: u64,
    /// records confirmed accepted by the remote store
    pub transmission_success_count: u64,
    pub phase: TransmissionPhase,
    pub last_transmission_error: Option<String>,
}

impl Default for LoopState {
    fn default() -> Self {
        Self {
            last_reading: None,
            last_power: None,
            last_update_at: None,
            poll_count: 0,
            transmission_success_count: 0,
            phase: TransmissionPhase::Idle,
            last_transmission_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            device_id: "e4_test_device".to_string(),
            device_type: "linux-x86_64".to_string(),
        }
    }

    #[test]
    fn battery_level_rounds_to_whole_percent() {
        assert_eq!(battery_percent(0.87), 87);
        assert_eq!(battery_percent(0.005), 1);
        assert_eq!(battery_percent(0.0), 0);
        assert_eq!(battery_percent(1.0), 100);
        // out-of-range platform values clamp instead of wrapping
        assert_eq!(battery_percent(1.2), 100);
        assert_eq!(battery_percent(-0.1), 0);
    }

    #[test]
    fn record_wire_shape_matches_store_columns() {
        let reading = Reading {
            latitude: 40.7128,
            longitude: -74.0060,
            accuracy_m: Some(5.2),
            captured_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        };
        let power = PowerState {
            level_fraction: 0.87,
            charge_state: ChargeState::Unplugged,
        };

        let record = TransmissionRecord::new(&identity(), &reading, &power);
        assert_eq!(record.battery_level, 87);
        assert_eq!(record.device_type, "linux-x86_64");

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["device_id"], "e4_test_device");
        assert_eq!(json["latitude"], 40.7128);
        assert_eq!(json["longitude"], -74.0060);
        assert_eq!(json["accuracy"], 5.2);
        assert_eq!(json["battery_level"], 87);
        // timestamp goes out as an ISO-8601 string
        assert!(json["timestamp"]
            .as_str()
            .unwrap()
            .starts_with("2025-06-01T12:00:00"));
    }

    #[test]
    fn missing_accuracy_serializes_as_null() {
        let reading = Reading {
            latitude: 1.0,
            longitude: 2.0,
            accuracy_m: None,
            captured_at: Utc::now(),
        };
        let record = TransmissionRecord::new(&identity(), &reading, &PowerState::fallback());
        let json = serde_json::to_value(&record).unwrap();
        assert!(json["accuracy"].is_null());
        assert_eq!(json["battery_level"], 0);
    }

    #[test]
    fn phase_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&TransmissionPhase::Sending).unwrap(),
            "\"sending\""
        );
        assert_eq!(
            serde_json::to_string(&TransmissionPhase::Error).unwrap(),
            "\"error\""
        );
    }
}
