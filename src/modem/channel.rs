//! # Command Channel
//!
//! Serializes AT command/response exchange over the single modem transport.
//!
//! The channel has two states. While FREE a call to [`CommandChannel::issue`]
//! writes the command and moves to BUSY. While BUSY every call performs one
//! non-blocking read attempt, appends whatever byte arrived and marks the
//! response finished once the command's timeout has elapsed. The caller then
//! inspects the text and calls [`CommandChannel::release`].
//!
//! ```text
//!            issue() [write]            release()
//!   FREE ───────────────────▶ BUSY ───────────────▶ FREE
//!                              │ ▲
//!                              └─┘ issue() [read one byte, check deadline]
//! ```
//!
//! A BUSY channel that nobody releases would stay locked forever, so the
//! root driver calls [`CommandChannel::reclaim_abandoned`] on every tick.
//! Every written command gets a new ticket; a [`CommandSlot`] holding an
//! older ticket knows its command was reclaimed and leaves the channel alone.

use crate::config::ModemConfig;
use crate::fsm::{ClockHandle, StateMachine, StateWatch};
use crate::modem::response::AtResponse;
use crate::modem::transport::Transport;
use tracing::{debug, warn};

/// Command line terminator
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Timeout for ordinary commands
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 1_000;

/// Timeout for raw payload transfers
pub const BINARY_TRANSFER_TIMEOUT_MS: u64 = 10_000;

/// Per-byte timeout of the timed read
pub const DEFAULT_BYTE_TIMEOUT_MS: u64 = 1_000;

/// Time a finished command may stay unreleased before it is reclaimed
pub const DEFAULT_RELEASE_GRACE_MS: u64 = 5_000;

/// Command channel lock state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Free,
    Busy,
}

/// Timed read sub-machine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedReadState {
    Init,
    Running,
    Timeout,
    Success,
}

/// Channel timing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTimings {
    pub byte_timeout_ms: u64,
    pub binary_timeout_ms: u64,
    pub release_grace_ms: u64,
}

impl Default for ChannelTimings {
    fn default() -> Self {
        Self {
            byte_timeout_ms: DEFAULT_BYTE_TIMEOUT_MS,
            binary_timeout_ms: BINARY_TRANSFER_TIMEOUT_MS,
            release_grace_ms: DEFAULT_RELEASE_GRACE_MS,
        }
    }
}

impl From<&ModemConfig> for ChannelTimings {
    fn from(config: &ModemConfig) -> Self {
        Self {
            byte_timeout_ms: config.byte_timeout_ms,
            binary_timeout_ms: config.binary_timeout_ms,
            release_grace_ms: config.release_grace_ms,
        }
    }
}

/// One read attempt per call, bounded by a per-byte timeout.
#[derive(Debug)]
struct TimedReader {
    fsm: StateMachine<TimedReadState>,
    byte_timeout_ms: u64,
}

impl TimedReader {
    fn new(clock: ClockHandle, byte_timeout_ms: u64) -> Self {
        Self {
            fsm: StateMachine::new("TimedRead", TimedReadState::Init, clock),
            byte_timeout_ms,
        }
    }

    fn state(&self) -> TimedReadState {
        self.fsm.state()
    }

    fn reset(&mut self) {
        self.fsm.request_transition(TimedReadState::Init);
    }

    fn poll(&mut self, transport: &mut dyn Transport) -> Option<u8> {
        // A finished attempt starts over on the next call
        if matches!(
            self.fsm.state(),
            TimedReadState::Success | TimedReadState::Timeout
        ) {
            self.fsm.request_transition(TimedReadState::Init);
        }

        if self.fsm.state() == TimedReadState::Init {
            self.fsm.reset_timer();
            self.fsm.request_transition(TimedReadState::Running);
        }

        match transport.read_byte() {
            Ok(Some(byte)) => {
                self.fsm.request_transition(TimedReadState::Success);
                return Some(byte);
            }
            Ok(None) => {}
            Err(e) => debug!("Transport read failed: {}", e),
        }

        if self.fsm.is_elapsed(self.byte_timeout_ms) {
            self.fsm.request_transition(TimedReadState::Timeout);
        }

        None
    }
}

/// Single-owner AT command engine over a [`Transport`]
pub struct CommandChannel {
    transport: Box<dyn Transport>,
    fsm: StateMachine<ChannelState>,
    reader: TimedReader,
    buffer: Vec<u8>,
    text: String,
    command: String,
    timeout_ms: u64,
    finished: bool,
    ticket: u64,
    timings: ChannelTimings,
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("state", &self.fsm.state())
            .field("command", &self.command)
            .field("received", &self.buffer.len())
            .field("finished", &self.finished)
            .field("ticket", &self.ticket)
            .finish_non_exhaustive()
    }
}

impl CommandChannel {
    /// Creates a FREE channel over `transport`.
    pub fn new(transport: Box<dyn Transport>, clock: ClockHandle, timings: ChannelTimings) -> Self {
        Self {
            transport,
            fsm: StateMachine::new("AT", ChannelState::Free, clock.clone()),
            reader: TimedReader::new(clock, timings.byte_timeout_ms),
            buffer: Vec::with_capacity(256),
            text: String::new(),
            command: String::new(),
            timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            finished: false,
            ticket: 0,
            timings,
        }
    }

    /// Current lock state.
    pub fn state(&self) -> ChannelState {
        self.fsm.state()
    }

    /// Whether a new command may be issued.
    pub fn is_free(&self) -> bool {
        self.fsm.state() == ChannelState::Free
    }

    /// Shareable view of the lock state, for guards.
    pub fn state_watch(&self) -> StateWatch<ChannelState> {
        self.fsm.state_watch()
    }

    /// Text of the command currently (or last) in flight.
    pub fn current_command(&self) -> &str {
        &self.command
    }

    /// State of the timed read sub-machine.
    pub fn read_state(&self) -> TimedReadState {
        self.reader.state()
    }

    /// Raw bytes received for the command in flight.
    pub fn received(&self) -> &[u8] {
        &self.buffer
    }

    /// Ticket of the command currently (or last) written.
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    /// Whether the command with `ticket` still holds the channel.
    pub fn is_held_by(&self, ticket: u64) -> bool {
        self.fsm.state() == ChannelState::Busy && self.ticket == ticket
    }

    /// Issues `command` or advances the command already in flight.
    ///
    /// When FREE the command is written with a CRLF terminator and an
    /// unfinished, empty response is returned. When BUSY nothing is written
    /// and the arguments are ignored; one byte is read if available and the
    /// response is finished once the timeout given at write time has elapsed.
    ///
    /// Unfinished responses carry no text; see [`received`](Self::received)
    /// for the bytes collected so far.
    pub fn issue(&mut self, command: &str, timeout_ms: u64) -> AtResponse {
        if self.is_free() {
            let mut frame = Vec::with_capacity(command.len() + LINE_TERMINATOR.len());
            frame.extend_from_slice(command.as_bytes());
            frame.extend_from_slice(LINE_TERMINATOR);
            self.begin(&frame, command.to_string(), timeout_ms);
            return self.response();
        }

        self.advance()
    }

    /// Writes a raw payload, then collects the reply like [`issue`](Self::issue).
    ///
    /// Uses the bulk-transfer timeout instead of a per-command one.
    pub fn issue_binary(&mut self, payload: &[u8]) -> AtResponse {
        if self.is_free() {
            let label = format!("<{} bytes>", payload.len());
            self.begin(payload, label, self.timings.binary_timeout_ms);
            return self.response();
        }

        self.advance()
    }

    /// Frees the channel after a finished response has been consumed.
    ///
    /// Must be called exactly once per issued command.
    pub fn release(&mut self) {
        if self.fsm.state() == ChannelState::Busy {
            debug!("[AT] released after '{}'", self.command);
        }
        self.finished = false;
        self.reader.reset();
        self.fsm.request_transition(ChannelState::Free);
    }

    /// Force-releases a channel whose owner stopped driving it.
    ///
    /// Returns true when the channel was reclaimed: it was BUSY for longer
    /// than the command's timeout plus the release grace period.
    pub fn reclaim_abandoned(&mut self) -> bool {
        if self.fsm.state() != ChannelState::Busy {
            return false;
        }

        let limit = self.timeout_ms.saturating_add(self.timings.release_grace_ms);
        if self.fsm.time_in_state_ms() < limit {
            return false;
        }

        warn!(
            "[AT] '{}' was never released after {} ms, reclaiming channel",
            self.command,
            self.fsm.time_in_state_ms()
        );
        self.release();
        true
    }

    fn begin(&mut self, frame: &[u8], command: String, timeout_ms: u64) {
        self.buffer.clear();
        self.text.clear();
        self.finished = false;
        self.timeout_ms = timeout_ms;
        self.command = command;
        self.ticket = self.ticket.wrapping_add(1);
        self.reader.reset();

        // A failed write still occupies the channel; it finishes as a timeout
        if let Err(e) = self.transport.write_all(frame) {
            warn!("[AT] failed to write '{}': {}", self.command, e);
        } else {
            debug!("[AT] sent '{}'", self.command);
        }

        self.fsm.request_transition(ChannelState::Busy);
    }

    fn advance(&mut self) -> AtResponse {
        if !self.finished {
            if let Some(byte) = self.reader.poll(self.transport.as_mut()) {
                self.buffer.push(byte);
            }

            if self.fsm.time_in_state_ms() >= self.timeout_ms {
                self.finished = true;
                self.text = String::from_utf8_lossy(&self.buffer).into_owned();
                debug!(
                    "[AT] '{}' finished with {} bytes",
                    self.command,
                    self.buffer.len()
                );
            }
        }

        self.response()
    }

    fn response(&self) -> AtResponse {
        if !self.finished {
            return AtResponse::default();
        }
        AtResponse::finished(self.text.as_str())
    }
}

/// Ownership marker for one user of a shared [`CommandChannel`]
///
/// Remembers the ticket of the command this owner wrote, so an owner only
/// starts a command on a FREE channel, releases exactly once per finished
/// response and never touches a command written by someone else after its
/// own was reclaimed.
#[derive(Debug, Default)]
pub struct CommandSlot {
    ticket: Option<u64>,
}

impl CommandSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this owner has a command in flight.
    pub fn is_pending(&self) -> bool {
        self.ticket.is_some()
    }

    /// Issues or advances `command`; returns the response once finished.
    ///
    /// Returns `None` while the command runs, while another owner holds the
    /// channel, and on the tick this owner learns its command was reclaimed.
    pub fn poll(
        &mut self,
        at: &mut CommandChannel,
        command: &str,
        timeout_ms: u64,
    ) -> Option<AtResponse> {
        if !self.claim(at) {
            return None;
        }
        let response = at.issue(command, timeout_ms);
        self.settle(at, response)
    }

    /// Binary counterpart of [`poll`](Self::poll).
    pub fn poll_binary(&mut self, at: &mut CommandChannel, payload: &[u8]) -> Option<AtResponse> {
        if !self.claim(at) {
            return None;
        }
        let response = at.issue_binary(payload);
        self.settle(at, response)
    }

    fn claim(&mut self, at: &CommandChannel) -> bool {
        match self.ticket {
            Some(ticket) if at.is_held_by(ticket) => true,
            Some(ticket) => {
                debug!("[AT] command #{} was reclaimed, dropping it", ticket);
                self.ticket = None;
                false
            }
            None => at.is_free(),
        }
    }

    fn settle(&mut self, at: &mut CommandChannel, response: AtResponse) -> Option<AtResponse> {
        if self.ticket.is_none() {
            self.ticket = Some(at.ticket());
        }
        if !response.is_finished {
            return None;
        }
        at.release();
        self.ticket = None;
        Some(response)
    }
}
