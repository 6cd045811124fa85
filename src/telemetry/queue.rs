//! # Telemetry Queue
//!
//! FIFO of pending measurements and the CBOR envelope they are uploaded in.
//!
//! ## Envelope
//!
//! ```text
//! { "t": <unix seconds>, "c": <record count>,
//!   "it": [ { "t": <type tag>, "d": <fields> }, ... ],
//!   "i": <device identity> }
//! ```
//!
//! ## Draining
//!
//! An upload takes a [`QueueSnapshot`] (payload plus the number of records it
//! covers) and later calls [`TelemetryQueue::drain`] with that count. Records
//! appended in between are not part of the payload and stay queued.

use super::record::TelemetryRecord;
use crate::error::{ModemError, Result};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Serialize)]
struct Envelope<'a> {
    t: i64,
    c: usize,
    it: &'a VecDeque<TelemetryRecord>,
    i: &'a str,
}

/// Encoded queue contents ready for transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    /// CBOR envelope
    pub payload: Bytes,
    /// Number of leading records covered by `payload`
    pub count: usize,
}

/// Ordered collection of pending telemetry records
#[derive(Debug, Clone, Default)]
pub struct TelemetryQueue {
    records: VecDeque<TelemetryRecord>,
    identity: String,
}

impl TelemetryQueue {
    /// Creates an empty queue without a device identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty queue reporting as `identity`.
    pub fn with_identity(identity: impl Into<String>) -> Self {
        Self {
            records: VecDeque::new(),
            identity: identity.into(),
        }
    }

    /// Sets the device identity placed in every envelope.
    pub fn set_identity(&mut self, identity: impl Into<String>) {
        self.identity = identity.into();
    }

    /// Device identity placed in every envelope.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Appends a record to the tail.
    pub fn enqueue(&mut self, record: impl Into<TelemetryRecord>) {
        self.records.push_back(record.into());
    }

    /// Number of queued records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no record is queued.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Queued records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &TelemetryRecord> {
        self.records.iter()
    }

    /// Encodes the envelope stamped with the current UTC time.
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.encode_at(Utc::now().timestamp())
    }

    /// Encodes the envelope stamped with `timestamp` (unix seconds).
    pub fn encode_at(&self, timestamp: i64) -> Result<Vec<u8>> {
        serde_cbor::to_vec(&self.envelope(timestamp)).map_err(|e| ModemError::Encode(e.to_string()))
    }

    /// Encodes the current contents for an upload.
    pub fn snapshot(&self) -> Result<QueueSnapshot> {
        Ok(QueueSnapshot {
            payload: Bytes::from(self.encode()?),
            count: self.records.len(),
        })
    }

    /// Removes the `count` oldest records, returning how many were removed.
    pub fn drain(&mut self, count: usize) -> usize {
        let count = count.min(self.records.len());
        self.records.drain(..count);
        count
    }

    /// Removes every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// JSON rendering of the envelope, for logs.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self.envelope(Utc::now().timestamp()))
            .map_err(|e| ModemError::Encode(e.to_string()))
    }

    fn envelope(&self, timestamp: i64) -> Envelope<'_> {
        Envelope {
            t: timestamp,
            c: self.records.len(),
            it: &self.records,
            i: &self.identity,
        }
    }
}
