//! Minimal NMEA parsing for serial GPS modules.
//!
//! Only `GGA` sentences are consumed: they carry everything a position
//! reading needs (coordinates, fix quality, HDOP). Any talker id is
//! accepted ($GPGGA, $GNGGA, ...). Sentences with a bad checksum or no fix
//! are rejected.

/// horizontal UERE estimate in meters for consumer GPS modules; multiplied
/// by HDOP to approximate an accuracy radius
const UERE_METERS: f64 = 5.0;

/// parsed GGA fix with a usable position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GgaFix {
    pub latitude: f64,
    pub longitude: f64,
    /// fix quality field, always > 0 here (0-quality sentences are rejected)
    pub quality: u8,
    pub satellites: u8,
    pub hdop: Option<f64>,
}

impl GgaFix {
    /// accuracy radius estimate in meters, when HDOP was reported
    pub fn accuracy_m(&self) -> Option<f64> {
        self.hdop.map(|h| h * UERE_METERS)
    }
}

/// parse one NMEA line; returns a fix only for a checksum-valid GGA
/// sentence whose quality field indicates a real fix
pub fn parse_gga(line: &str) -> Option<GgaFix> {
    let line = line.trim();
    let body = checksum_valid_body(line)?;

    let fields: Vec<&str> = body.split(',').collect();
    // talker + 14 data fields for GGA
    if fields.len() < 10 || !fields[0].ends_with("GGA") {
        return None;
    }

    let quality: u8 = fields[6].parse().ok()?;
    if quality == 0 {
        return None;
    }

    let latitude = parse_coordinate(fields[2], fields[3], 2)?;
    let longitude = parse_coordinate(fields[4], fields[5], 3)?;
    let satellites: u8 = fields[7].parse().unwrap_or(0);
    let hdop = fields[8].parse::<f64>().ok();

    Some(GgaFix {
        latitude,
        longitude,
        quality,
        satellites,
        hdop,
    })
}

/// verify "$...*hh" framing and XOR checksum; returns the body between
/// '$' and '*'
fn checksum_valid_body(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('$')?;
    let (body, checksum_hex) = rest.rsplit_once('*')?;
    let expected = u8::from_str_radix(checksum_hex, 16).ok()?;
    let actual = body.bytes().fold(0u8, |acc, b| acc ^ b);
    (actual == expected).then_some(body)
}

/// NMEA packs coordinates as (d)ddmm.mmmm with a hemisphere letter;
/// `degree_digits` is 2 for latitude, 3 for longitude
fn parse_coordinate(value: &str, hemisphere: &str, degree_digits: usize) -> Option<f64> {
    if value.len() <= degree_digits {
        return None;
    }
    let degrees: f64 = value[..degree_digits].parse().ok()?;
    let minutes: f64 = value[degree_digits..].parse().ok()?;
    let decimal = degrees + minutes / 60.0;

    match hemisphere {
        "N" | "E" => Some(decimal),
        "S" | "W" => Some(-decimal),
        _ => None,
    }
}
