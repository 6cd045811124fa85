//! # Modem Module
//!
//! Low-level plumbing to the SIM7080G cellular modem.
//!
//! This module handles:
//! - Opening the modem UART (57,600 baud, 8N1)
//! - The byte transport abstraction used by tests
//! - Serialized AT command/response exchange with per-command timeouts
//! - Picking markers and fields out of AT responses

pub mod channel;
pub mod response;
pub mod serial;
pub mod transport;

pub use channel::{ChannelState, ChannelTimings, CommandChannel, CommandSlot};
pub use response::{AtResponse, ResponseClass};
pub use serial::SerialTransport;
pub use transport::Transport;
