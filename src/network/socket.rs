//! # Socket Session
//!
//! One TCP upload of the telemetry queue through the modem's socket stack.
//!
//! ```text
//!  OPEN ──▶ SEND ──▶ SEND_SIZE ──▶ SEND_DATA ──▶ CLOSE ──▶ OPEN (Finished)
//!    │        │          │                         ▲
//!    └────────┴──────────┴─────── failure ─────────┘
//! ```
//!
//! SEND takes a [`QueueSnapshot`]; SEND_SIZE declares exactly its length and
//! SEND_DATA writes exactly its bytes. Only after the modem has taken the
//! bytes are the snapshotted records drained. Delivery is at-most-once: the
//! collector does not acknowledge, and a sent payload is never resent.

use crate::config::{ModemConfig, ServerConfig};
use crate::fsm::{ClockHandle, StateMachine};
use crate::modem::channel::{CommandChannel, CommandSlot};
use crate::modem::response::ResponseClass;
use crate::telemetry::{QueueSnapshot, TelemetryQueue};
use tracing::{info, warn};

/// Marker of a successfully opened socket 0
pub const OPEN_SUCCESS_MARKER: &str = "+CAOPEN: 0,0";

/// Socket close command
pub const CLOSE_COMMAND: &str = "AT+CACLOSE=0";

/// Upload session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Send,
    SendSize,
    SendData,
    Close,
}

/// How an upload cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The modem accepted the payload; `records` were drained
    Delivered { records: usize, bytes: usize },
    /// The queue was empty
    NothingToSend,
    /// The socket could not be opened
    OpenFailed,
    /// The size declaration was refused or timed out
    SizeRejected,
    /// The envelope could not be encoded
    EncodeFailed,
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    InProgress,
    Finished(UploadOutcome),
}

/// Collector endpoint and timeouts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub host: String,
    pub port: u16,
    pub open_timeout_ms: u64,
    pub command_timeout_ms: u64,
}

impl SessionSettings {
    pub fn from_config(server: &ServerConfig, modem: &ModemConfig) -> Self {
        Self {
            host: server.host.clone(),
            port: server.port,
            open_timeout_ms: server.open_timeout_ms,
            command_timeout_ms: modem.command_timeout_ms,
        }
    }

    pub fn open_command(&self) -> String {
        format!("AT+CAOPEN=0,0,\"TCP\",\"{}\",{}", self.host, self.port)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default(), &ModemConfig::default())
    }
}

/// Size declaration for a payload of `len` bytes.
pub fn send_size_command(len: usize) -> String {
    format!("AT+CASEND=0,{}", len)
}

/// TCP upload state machine
#[derive(Debug)]
pub struct SocketSession {
    fsm: StateMachine<SessionState>,
    slot: CommandSlot,
    settings: SessionSettings,
    snapshot: Option<QueueSnapshot>,
    outcome: Option<UploadOutcome>,
}

impl SocketSession {
    pub fn new(settings: SessionSettings, clock: ClockHandle) -> Self {
        Self {
            fsm: StateMachine::new("TCP", SessionState::Open, clock),
            slot: CommandSlot::new(),
            settings,
            snapshot: None,
            outcome: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.fsm.state()
    }

    /// Advances the upload by at most one command step.
    pub fn tick(&mut self, at: &mut CommandChannel, queue: &mut TelemetryQueue) -> SessionStatus {
        match self.fsm.state() {
            SessionState::Open => self.open(at),
            SessionState::Send => self.take_snapshot(queue),
            SessionState::SendSize => self.declare_size(at),
            SessionState::SendData => self.send_data(at, queue),
            SessionState::Close => return self.close(at),
        }
        SessionStatus::InProgress
    }

    fn open(&mut self, at: &mut CommandChannel) {
        let command = self.settings.open_command();
        let Some(response) = self.slot.poll(at, &command, self.settings.open_timeout_ms) else {
            return;
        };

        if response.contains(OPEN_SUCCESS_MARKER) {
            info!("[TCP] connected to {}:{}", self.settings.host, self.settings.port);
            self.fsm.request_transition(SessionState::Send);
        } else {
            warn!(
                "[TCP] could not open {}:{}: {:?}",
                self.settings.host,
                self.settings.port,
                response.message.trim()
            );
            self.finish_with(UploadOutcome::OpenFailed);
        }
    }

    fn take_snapshot(&mut self, queue: &TelemetryQueue) {
        if queue.is_empty() {
            info!("[TCP] nothing queued");
            self.finish_with(UploadOutcome::NothingToSend);
            return;
        }

        match queue.snapshot() {
            Ok(snapshot) => {
                info!(
                    "[TCP] sending {} records ({} bytes)",
                    snapshot.count,
                    snapshot.payload.len()
                );
                self.snapshot = Some(snapshot);
                self.fsm.request_transition(SessionState::SendSize);
            }
            Err(e) => {
                warn!("[TCP] {}", e);
                self.finish_with(UploadOutcome::EncodeFailed);
            }
        }
    }

    fn declare_size(&mut self, at: &mut CommandChannel) {
        let Some(len) = self.snapshot.as_ref().map(|s| s.payload.len()) else {
            self.finish_with(UploadOutcome::EncodeFailed);
            return;
        };

        let command = send_size_command(len);
        let Some(response) = self.slot.poll(at, &command, self.settings.command_timeout_ms) else {
            return;
        };

        if response.classify() == ResponseClass::Completed {
            self.fsm.request_transition(SessionState::SendData);
        } else {
            warn!("[TCP] size declaration refused ({:?})", response.classify());
            self.snapshot = None;
            self.finish_with(UploadOutcome::SizeRejected);
        }
    }

    fn send_data(&mut self, at: &mut CommandChannel, queue: &mut TelemetryQueue) {
        let Some(snapshot) = self.snapshot.as_ref() else {
            self.finish_with(UploadOutcome::EncodeFailed);
            return;
        };

        if self.slot.poll_binary(at, &snapshot.payload).is_none() {
            return;
        }

        let bytes = snapshot.payload.len();
        let records = queue.drain(snapshot.count);
        info!("[TCP] payload sent, {} records removed from queue", records);
        self.snapshot = None;
        self.finish_with(UploadOutcome::Delivered { records, bytes });
    }

    fn close(&mut self, at: &mut CommandChannel) -> SessionStatus {
        if self
            .slot
            .poll(at, CLOSE_COMMAND, self.settings.command_timeout_ms)
            .is_none()
        {
            return SessionStatus::InProgress;
        }

        self.fsm.request_transition(SessionState::Open);
        let outcome = self.outcome.take().unwrap_or(UploadOutcome::NothingToSend);
        SessionStatus::Finished(outcome)
    }

    fn finish_with(&mut self, outcome: UploadOutcome) {
        self.outcome = Some(outcome);
        self.fsm.request_transition(SessionState::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::timer::mocks::ManualClock;
    use crate::modem::channel::ChannelTimings;
    use crate::modem::transport::mocks::ScriptedTransport;
    use crate::telemetry::{BatteryLevel, PositionFix, TelemetryRecord};

    const STEP_MS: u64 = 10;

    struct Rig {
        modem: ScriptedTransport,
        clock: ManualClock,
        at: CommandChannel,
        session: SocketSession,
        queue: TelemetryQueue,
    }

    impl Rig {
        fn new() -> Self {
            let modem = ScriptedTransport::new();
            modem.respond("AT+CAOPEN", &["+CAOPEN: 0,0\r\n\r\nOK\r\n"]);
            modem.respond("AT+CASEND", &[">"]);
            modem.respond(CLOSE_COMMAND, &["OK\r\n"]);

            let clock = ManualClock::new();
            let at = CommandChannel::new(modem.boxed(), clock.handle(), ChannelTimings::default());
            let session = SocketSession::new(SessionSettings::default(), clock.handle());
            Self {
                modem,
                clock,
                at,
                session,
                queue: TelemetryQueue::with_identity("869951031234567"),
            }
        }

        fn step(&mut self) -> SessionStatus {
            let status = self.session.tick(&mut self.at, &mut self.queue);
            self.clock.advance(STEP_MS);
            status
        }

        fn run(&mut self, limit_ms: u64) -> UploadOutcome {
            for _ in 0..limit_ms / STEP_MS {
                if let SessionStatus::Finished(outcome) = self.step() {
                    return outcome;
                }
            }
            panic!("session did not finish (state {:?})", self.session.state());
        }

        fn run_until(&mut self, state: SessionState) {
            for _ in 0..100_000 {
                if self.session.state() == state {
                    return;
                }
                self.step();
            }
            panic!("never reached {:?}", state);
        }
    }

    fn fix() -> PositionFix {
        PositionFix {
            timestamp: 1_696_161_600,
            latitude: 45.645,
            longitude: 25.645,
            hdop: 1.0,
            hpa: 2.0,
        }
    }

    #[test]
    fn test_open_command_format() {
        let settings = SessionSettings {
            host: "collector.example".to_string(),
            port: 4000,
            ..SessionSettings::default()
        };
        assert_eq!(settings.open_command(), "AT+CAOPEN=0,0,\"TCP\",\"collector.example\",4000");
        assert_eq!(send_size_command(57), "AT+CASEND=0,57");
    }

    #[test]
    fn test_upload_declares_exact_payload_size() {
        let mut rig = Rig::new();
        rig.queue.enqueue(fix());
        rig.queue.enqueue(BatteryLevel { percent: 82 });

        let outcome = rig.run(60_000);

        let written = rig.modem.written();
        let commands = rig.modem.written_commands();
        assert_eq!(commands.len(), 4);
        assert!(commands[0].starts_with("AT+CAOPEN=0,0,\"TCP\""));
        assert_eq!(commands[3], CLOSE_COMMAND);

        let payload = &written[2];
        assert_eq!(commands[1], send_size_command(payload.len()));
        assert_eq!(
            outcome,
            UploadOutcome::Delivered {
                records: 2,
                bytes: payload.len()
            }
        );

        let envelope: serde_cbor::Value = serde_cbor::from_slice(payload).unwrap();
        match envelope {
            serde_cbor::Value::Map(entries) => {
                assert_eq!(
                    entries.get(&serde_cbor::Value::Text("c".to_string())),
                    Some(&serde_cbor::Value::Integer(2))
                );
            }
            other => panic!("expected map, got {:?}", other),
        }

        assert!(rig.queue.is_empty());
        assert_eq!(rig.session.state(), SessionState::Open);
        assert!(rig.at.is_free());
    }

    #[test]
    fn test_records_added_after_snapshot_stay_queued() {
        let mut rig = Rig::new();
        rig.queue.enqueue(BatteryLevel { percent: 82 });

        rig.run_until(SessionState::SendSize);
        rig.queue.enqueue(BatteryLevel { percent: 81 });

        let outcome = rig.run(60_000);

        assert!(matches!(outcome, UploadOutcome::Delivered { records: 1, .. }));
        assert_eq!(rig.queue.len(), 1);
        assert_eq!(
            rig.queue.iter().next(),
            Some(&TelemetryRecord::from(BatteryLevel { percent: 81 }))
        );
    }

    #[test]
    fn test_open_failure_goes_to_close() {
        let mut rig = Rig::new();
        rig.modem.respond("AT+CAOPEN", &["+CAOPEN: 0,1\r\n\r\nOK\r\n"]);
        rig.queue.enqueue(BatteryLevel { percent: 82 });

        let outcome = rig.run(30_000);

        assert_eq!(outcome, UploadOutcome::OpenFailed);
        let commands = rig.modem.written_commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1], CLOSE_COMMAND);
        assert_eq!(rig.queue.len(), 1);
    }

    #[test]
    fn test_empty_queue_skips_send() {
        let mut rig = Rig::new();

        let outcome = rig.run(30_000);

        assert_eq!(outcome, UploadOutcome::NothingToSend);
        assert_eq!(rig.modem.count_written("AT+CASEND"), 0);
        assert_eq!(rig.modem.count_written(CLOSE_COMMAND), 1);
    }

    #[test]
    fn test_refused_size_keeps_records() {
        let mut rig = Rig::new();
        rig.modem.respond("AT+CASEND", &["ERROR\r\n"]);
        rig.queue.enqueue(fix());

        let outcome = rig.run(30_000);

        assert_eq!(outcome, UploadOutcome::SizeRejected);
        assert_eq!(rig.queue.len(), 1);
        assert_eq!(rig.modem.written().len(), 3, "no payload may be written");
    }

    #[test]
    fn test_silent_size_declaration_is_refused() {
        let mut rig = Rig::new();
        rig.modem.respond("AT+CASEND", &[""]);
        rig.queue.enqueue(fix());

        assert_eq!(rig.run(30_000), UploadOutcome::SizeRejected);
        assert_eq!(rig.queue.len(), 1);
    }
}
