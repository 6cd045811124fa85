//! # Sensors Module
//!
//! Measurements read through the modem's AT interface.
//!
//! This module handles:
//! - GNSS power control, `AT+CGNSINF` parsing and fix quality filtering
//! - Battery level from `AT+CBC`

pub mod battery;
pub mod gnss;

pub use battery::BatteryReader;
pub use gnss::{FixFilter, GnssReader, GnssReading};

/// Progress of a sensor read driven one tick at a time
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading<T> {
    /// The command is still running (or waiting for the channel)
    Pending,
    /// The reply was parsed
    Ready(T),
    /// The reply finished but could not be parsed
    Invalid,
}

impl<T> Reading<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Reading::Pending)
    }
}
