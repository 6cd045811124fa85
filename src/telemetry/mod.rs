//! # Telemetry Module
//!
//! Buffers measurements until the next upload.
//!
//! This module handles:
//! - The closed set of record types (position fix, battery level)
//! - FIFO queueing with snapshot-then-drain semantics
//! - Encoding the upload envelope as CBOR

pub mod queue;
pub mod record;

pub use queue::{QueueSnapshot, TelemetryQueue};
pub use record::{BatteryLevel, PositionFix, TelemetryRecord};
