//! # GNSS Reader
//!
//! Powers the modem's GNSS engine, reads `AT+CGNSINF` and filters fixes by
//! quality before they are queued.
//!
//! ## `+CGNSINF` fields used
//!
//! | Index | Field                 |
//! |-------|-----------------------|
//! | 0     | GNSS run status       |
//! | 1     | Fix status            |
//! | 2     | UTC `yyyyMMddhhmmss.sss` |
//! | 3     | Latitude              |
//! | 4     | Longitude             |
//! | 10    | HDOP                  |
//! | 16    | HPA (meters)          |

use super::Reading;
use crate::config::GnssConfig;
use crate::fsm::{ClockHandle, StateMachine};
use crate::modem::channel::{CommandChannel, CommandSlot};
use crate::modem::response::{field, AtResponse};
use crate::telemetry::PositionFix;
use chrono::NaiveDateTime;
use tracing::{debug, info};

/// Powers the GNSS engine and selects GPS + GLONASS + Galileo
pub const POWER_ON_COMMAND: &str = "AT+CGNSPWR=1;+CGNSMOD=1,0,0,1,0";

/// Powers the GNSS engine down
pub const POWER_OFF_COMMAND: &str = "AT+CGNSPWR=0";

/// Navigation information query
pub const READ_COMMAND: &str = "AT+CGNSINF";

const RUN_STATUS: usize = 0;
const FIX_STATUS: usize = 1;
const UTC_DATE_TIME: usize = 2;
const LATITUDE: usize = 3;
const LONGITUDE: usize = 4;
const HDOP: usize = 10;
const HPA: usize = 16;

/// GNSS engine power state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GnssPower {
    Off,
    On,
}

/// One parsed `+CGNSINF` line
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GnssReading {
    pub running: bool,
    pub fixed: bool,
    /// UTC time of the fix in unix seconds
    pub timestamp: Option<i64>,
    pub latitude: f64,
    pub longitude: f64,
    pub hdop: f32,
    pub hpa: f32,
}

impl GnssReading {
    /// Queueable fix, if the reading carries a time.
    pub fn to_fix(&self) -> Option<PositionFix> {
        self.timestamp.map(|timestamp| PositionFix {
            timestamp,
            latitude: self.latitude,
            longitude: self.longitude,
            hdop: self.hdop,
            hpa: self.hpa,
        })
    }
}

/// Converts `yyyyMMddhhmmss.sss` (UTC) to unix seconds.
pub fn parse_utc(value: &str) -> Option<i64> {
    let whole = value.split('.').next()?;
    NaiveDateTime::parse_from_str(whole, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// Parses the `+CGNSINF` line of a reply.
///
/// Empty numeric fields (no fix yet) read as zero.
pub fn parse_gnss_info(response: &AtResponse) -> Option<GnssReading> {
    let rest = response.info_line("CGNSINF")?;

    let flag = |n| field(rest, n) == Some("1");
    let number = |n| {
        field(rest, n)
            .filter(|v| !v.is_empty())
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(0.0)
    };

    Some(GnssReading {
        running: flag(RUN_STATUS),
        fixed: flag(FIX_STATUS),
        timestamp: field(rest, UTC_DATE_TIME).and_then(parse_utc),
        latitude: number(LATITUDE),
        longitude: number(LONGITUDE),
        hdop: number(HDOP) as f32,
        hpa: number(HPA) as f32,
    })
}

/// Fix quality thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixFilter {
    pub min_hdop: f32,
    pub max_hdop: f32,
    pub max_hpa: f32,
}

impl FixFilter {
    /// Whether `reading` is good enough to be queued.
    pub fn accepts(&self, reading: &GnssReading) -> bool {
        reading.fixed
            && reading.timestamp.is_some()
            && reading.hdop >= self.min_hdop
            && reading.hdop <= self.max_hdop
            && reading.hpa <= self.max_hpa
    }
}

impl From<&GnssConfig> for FixFilter {
    fn from(config: &GnssConfig) -> Self {
        Self {
            min_hdop: config.min_hdop,
            max_hdop: config.max_hdop,
            max_hpa: config.max_hpa,
        }
    }
}

/// GNSS power and read commands, one tick at a time
#[derive(Debug)]
pub struct GnssReader {
    power: StateMachine<GnssPower>,
    slot: CommandSlot,
    command_timeout_ms: u64,
}

impl GnssReader {
    pub fn new(command_timeout_ms: u64, clock: ClockHandle) -> Self {
        Self {
            power: StateMachine::new("GNSS", GnssPower::Off, clock),
            slot: CommandSlot::new(),
            command_timeout_ms,
        }
    }

    pub fn power(&self) -> GnssPower {
        self.power.state()
    }

    /// Powers the engine on; returns true once it is on.
    pub fn power_on(&mut self, at: &mut CommandChannel) -> bool {
        if self.power.state() == GnssPower::Off
            && self
                .slot
                .poll(at, POWER_ON_COMMAND, self.command_timeout_ms)
                .is_some()
        {
            self.power.request_transition(GnssPower::On);
        }
        self.power.state() == GnssPower::On
    }

    /// Powers the engine off; returns true once it is off.
    pub fn power_off(&mut self, at: &mut CommandChannel) -> bool {
        if self.power.state() == GnssPower::On
            && self
                .slot
                .poll(at, POWER_OFF_COMMAND, self.command_timeout_ms)
                .is_some()
        {
            self.power.request_transition(GnssPower::Off);
        }
        self.power.state() == GnssPower::Off
    }

    /// Reads navigation information; the engine must be on.
    pub fn read(&mut self, at: &mut CommandChannel) -> Reading<GnssReading> {
        if self.power.state() != GnssPower::On {
            return Reading::Invalid;
        }

        let Some(response) = self.slot.poll(at, READ_COMMAND, self.command_timeout_ms) else {
            return Reading::Pending;
        };

        match parse_gnss_info(&response) {
            Some(reading) => {
                debug!("[GNSS] {:?}", reading);
                Reading::Ready(reading)
            }
            None => {
                info!("[GNSS] no navigation information in reply");
                Reading::Invalid
            }
        }
    }
}
