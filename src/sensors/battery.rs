//! Battery level from `AT+CBC`.
//!
//! The modem answers `+CBC: <bcs>,<bcl>,<voltage>`; the second field is the
//! charge level in percent.

use super::Reading;
use crate::modem::channel::{CommandChannel, CommandSlot};
use crate::modem::response::{field, AtResponse};
use crate::telemetry::BatteryLevel;
use tracing::{info, warn};

/// Battery charge query
pub const BATTERY_QUERY: &str = "AT+CBC";

/// Charge level from an `AT+CBC` reply.
pub fn parse_battery_level(response: &AtResponse) -> Option<BatteryLevel> {
    response
        .info_line("CBC")
        .and_then(|rest| field(rest, 1))
        .and_then(|level| level.parse::<u8>().ok())
        .filter(|percent| *percent <= 100)
        .map(|percent| BatteryLevel { percent })
}

/// Reads the battery level one tick at a time
#[derive(Debug)]
pub struct BatteryReader {
    slot: CommandSlot,
    command_timeout_ms: u64,
}

impl BatteryReader {
    pub fn new(command_timeout_ms: u64) -> Self {
        Self {
            slot: CommandSlot::new(),
            command_timeout_ms,
        }
    }

    pub fn poll(&mut self, at: &mut CommandChannel) -> Reading<BatteryLevel> {
        let Some(response) = self.slot.poll(at, BATTERY_QUERY, self.command_timeout_ms) else {
            return Reading::Pending;
        };

        match parse_battery_level(&response) {
            Some(level) => {
                info!("Battery status: {}%", level.percent);
                Reading::Ready(level)
            }
            None => {
                warn!("Unreadable battery status: {:?}", response.message.trim());
                Reading::Invalid
            }
        }
    }
}
