//! # Network Module
//!
//! Cellular attach and the TCP upload session layered on top of it.
//!
//! This module handles:
//! - Radio configuration and PDP context activation
//! - Registration polling with status-dependent backoff
//! - Waiting for an address, and detaching afterwards
//! - Opening a socket, declaring the payload size, sending it and closing

pub mod attach;
pub mod socket;

pub use attach::{AttachFault, AttachSequence, AttachSettings, AttachState, AttachStatus};
pub use socket::{SessionSettings, SessionState, SessionStatus, SocketSession, UploadOutcome};
