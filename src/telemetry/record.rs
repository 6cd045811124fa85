//! # Telemetry Records
//!
//! The closed set of measurements the device reports.
//!
//! Each record serializes as `{"t": <type tag>, "d": <fields>}` with the
//! short field names the collector expects:
//!
//! | Type      | Fields                                   |
//! |-----------|------------------------------------------|
//! | `GNSS`    | `t` (unix s), `la`, `lo`, `hdop`, `hpa`  |
//! | `BATTERY` | `b` (percent)                            |

use serde::Serialize;

/// Position fix from the GNSS receiver
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionFix {
    /// UTC time of the fix in unix seconds
    #[serde(rename = "t")]
    pub timestamp: i64,

    /// Latitude in degrees
    #[serde(rename = "la")]
    pub latitude: f64,

    /// Longitude in degrees
    #[serde(rename = "lo")]
    pub longitude: f64,

    /// Horizontal dilution of precision
    pub hdop: f32,

    /// Horizontal position accuracy in meters
    pub hpa: f32,
}

/// Battery charge level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatteryLevel {
    /// Remaining charge (0-100%)
    #[serde(rename = "b")]
    pub percent: u8,
}

/// One queued measurement
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "t", content = "d")]
pub enum TelemetryRecord {
    #[serde(rename = "GNSS")]
    Position(PositionFix),

    #[serde(rename = "BATTERY")]
    Battery(BatteryLevel),
}

impl TelemetryRecord {
    /// Wire type tag of the record.
    pub fn type_tag(&self) -> &'static str {
        match self {
            TelemetryRecord::Position(_) => "GNSS",
            TelemetryRecord::Battery(_) => "BATTERY",
        }
    }
}

impl From<PositionFix> for TelemetryRecord {
    fn from(fix: PositionFix) -> Self {
        TelemetryRecord::Position(fix)
    }
}

impl From<BatteryLevel> for TelemetryRecord {
    fn from(level: BatteryLevel) -> Self {
        TelemetryRecord::Battery(level)
    }
}
