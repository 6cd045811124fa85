//! # Modem Telemetry Library
//!
//! Drive a SIM7080G cellular modem over its AT command interface and upload
//! buffered telemetry over LTE-M.
//!
//! This library provides a single-threaded, non-blocking engine: guarded
//! state machines ticked by one scheduler, a serialized AT command channel,
//! a cellular attach sequence with status-dependent backoff, a TCP upload
//! session and a telemetry queue encoded as CBOR.

pub mod app;
pub mod config;
pub mod error;
pub mod fsm;
pub mod modem;
pub mod network;
pub mod sensors;
pub mod telemetry;
