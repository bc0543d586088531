//! Device identity: a process-stable unique id plus a coarse device-type
//! label. Generated once at startup and passed into the loop's constructor,
//! never regenerated per call.

use chrono::Utc;

/// id prefix carried by every device id this host generates
const ID_PREFIX: &str = "e4";

#[derive(Clone, Debug)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub device_type: String,
}

impl DeviceIdentity {
    pub fn generate() -> Self {
        Self {
            device_id: new_device_id(),
            device_type: device_type_label(),
        }
    }
}

/// build a device id from a time-derived component and a random component,
/// e.g. "e4_kx2f9a1b_3hq8zt0m5c"
///
/// unique with overwhelming probability within a casually-sized fleet; two
/// calls in the same process are not required to agree.
pub fn new_device_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u128;
    let random: u64 = rand::random();
    format!(
        "{}_{}_{}",
        ID_PREFIX,
        to_base36(millis),
        to_base36(random as u128)
    )
}

/// human-readable platform label; unknown platforms fall back to a generic
/// tag instead of failing
pub fn device_type_label() -> String {
    match std::env::consts::OS {
        "" => "unknown-device".to_string(),
        os => format!("{}-{}", os, std::env::consts::ARCH),
    }
}

fn to_base36(mut n: u128) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
