//! # Attach Sequence
//!
//! Brings the modem onto the LTE-M packet network, one AT command per state.
//!
//! ```text
//!  OFF ─▶ CONFIGURE ─▶ PDP_ACTIVATE ─▶ REGISTER_POLL ─▶ ADDRESS_POLL ─▶ (Attached)
//!   ▲          AT+CNMP=...  AT+CNACT=0,1     AT+CEREG?        AT+CNACT?
//!   └──────────── escalation (RestartRequired) ◀──────────┘
//! ```
//!
//! ## Registration backoff
//!
//! The modem's registration status decides how long to wait before the next
//! `AT+CEREG?`:
//!
//! | Status | Meaning                        | Wait       |
//! |--------|--------------------------------|------------|
//! | 1, 5   | registered (home / roaming)    | proceed    |
//! | 0      | not registered, not searching  | 7 000 ms   |
//! | 2      | searching                      | 242 000 ms |
//! | 3      | registration denied            | 22 000 ms  |
//! | other  | unknown                        | poll interval |
//!
//! Every failed poll counts against `max_registration_attempts`; once it is
//! used up the sequence returns to OFF and asks for a modem restart.
//!
//! Address polling has no budget: an unassigned (`0`) or unreadable address
//! is queried again every `poll_interval_ms` until the network assigns one.

use crate::config::{ModemConfig, NetworkConfig};
use crate::fsm::{ClockHandle, StateMachine};
use crate::modem::channel::{CommandChannel, CommandSlot};
use crate::modem::response::{
    parse_address_octet, parse_registration_status, AtResponse, ResponseClass,
};
use tracing::{debug, info, warn};

/// PDP context activation command
pub const PDP_ACTIVATE_COMMAND: &str = "AT+CNACT=0,1";

/// PDP context deactivation command
pub const PDP_DEACTIVATE_COMMAND: &str = "AT+CNACT=0,0";

/// Registration status query
pub const REGISTRATION_QUERY: &str = "AT+CEREG?";

/// Address query for all PDP contexts
pub const ADDRESS_QUERY: &str = "AT+CNACT?";

/// Attach sequence state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachState {
    Off,
    Configure,
    PdpActivate,
    RegisterPoll,
    AddressPoll,
    Deactivate,
}

/// Reason the sequence gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachFault {
    /// The PDP context never reported `ACTIVE`
    PdpActivation,
    /// Registration polls used up their budget
    BackoffExhausted,
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachStatus {
    /// Still working; tick again
    InProgress,
    /// An address was assigned; sockets may be opened
    Attached,
    /// The PDP context was deactivated
    Detached,
    /// The sequence reset to OFF; the outer driver should restart the modem
    RestartRequired(AttachFault),
}

/// Minimum wait before the next registration poll after `status`.
pub fn registration_backoff_ms(status: u8) -> u64 {
    match status {
        0 => 7_000,
        2 => 242_000,
        3 => 22_000,
        _ => 0,
    }
}

/// Whether `status` means the modem is registered.
pub fn is_registered(status: u8) -> bool {
    matches!(status, 1 | 5)
}

/// Attach parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachSettings {
    pub apn: String,
    pub command_timeout_ms: u64,
    pub pdp_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_pdp_attempts: u32,
    pub max_registration_attempts: u32,
}

impl AttachSettings {
    pub fn from_config(network: &NetworkConfig, modem: &ModemConfig) -> Self {
        Self {
            apn: network.apn.clone(),
            command_timeout_ms: modem.command_timeout_ms,
            pdp_timeout_ms: network.pdp_timeout_ms,
            poll_interval_ms: network.poll_interval_ms,
            max_pdp_attempts: network.max_pdp_attempts,
            max_registration_attempts: network.max_registration_attempts,
        }
    }

    /// Radio and PDP configuration command for the APN.
    pub fn configure_command(&self) -> String {
        format!(
            "AT+CNMP=38;+CMNB=1;+CNACT=0,0;+CGDCONT=1,\"IP\",\"{apn}\";+CNCFG=0,1,{apn}",
            apn = self.apn
        )
    }
}

impl Default for AttachSettings {
    fn default() -> Self {
        Self::from_config(&NetworkConfig::default(), &ModemConfig::default())
    }
}

/// Layered state machine for the cellular attach
#[derive(Debug)]
pub struct AttachSequence {
    fsm: StateMachine<AttachState>,
    slot: CommandSlot,
    settings: AttachSettings,
    attempts: u32,
    backoff_ms: u64,
}

impl AttachSequence {
    pub fn new(settings: AttachSettings, clock: ClockHandle) -> Self {
        Self {
            fsm: StateMachine::new("CATM1", AttachState::Off, clock),
            slot: CommandSlot::new(),
            settings,
            attempts: 0,
            backoff_ms: 0,
        }
    }

    pub fn state(&self) -> AttachState {
        self.fsm.state()
    }

    /// Requests PDP deactivation; only accepted while OFF.
    pub fn detach(&mut self) -> bool {
        if self.fsm.state() != AttachState::Off {
            return false;
        }
        self.fsm.request_transition(AttachState::Deactivate)
    }

    /// Advances the sequence by at most one command step.
    pub fn tick(&mut self, at: &mut CommandChannel) -> AttachStatus {
        match self.fsm.state() {
            AttachState::Off => {
                info!("Starting LTE-M attach (APN {})", self.settings.apn);
                self.enter(AttachState::Configure);
                AttachStatus::InProgress
            }
            AttachState::Configure => self.configure(at),
            AttachState::PdpActivate => self.activate_pdp(at),
            AttachState::RegisterPoll => self.poll_registration(at),
            AttachState::AddressPoll => self.poll_address(at),
            AttachState::Deactivate => self.deactivate(at),
        }
    }

    fn configure(&mut self, at: &mut CommandChannel) -> AttachStatus {
        let command = self.settings.configure_command();
        let timeout_ms = self.settings.command_timeout_ms;
        if let Some(response) = self.slot.poll(at, &command, timeout_ms) {
            if response.classify() == ResponseClass::ProtocolError {
                warn!("[CATM1] configuration reported an error: {}", response.message.trim());
            }
            self.enter(AttachState::PdpActivate);
        }
        AttachStatus::InProgress
    }

    fn activate_pdp(&mut self, at: &mut CommandChannel) -> AttachStatus {
        let timeout_ms = self.settings.pdp_timeout_ms;
        let Some(response) = self.slot.poll(at, PDP_ACTIVATE_COMMAND, timeout_ms) else {
            return AttachStatus::InProgress;
        };

        // DEACTIVE contains ACTIVE, so it is checked first
        if response.contains("DEACTIVE") {
            warn!("[CATM1] PDP context is not active");
        } else if response.classify() == ResponseClass::ProtocolError {
            warn!("[CATM1] PDP context error");
        } else if response.contains("ACTIVE") {
            info!("[CATM1] PDP context is active");
            self.enter(AttachState::RegisterPoll);
            return AttachStatus::InProgress;
        } else {
            warn!("[CATM1] PDP context not detected");
        }

        self.attempts += 1;
        if self.attempts >= self.settings.max_pdp_attempts {
            return self.escalate(AttachFault::PdpActivation);
        }
        AttachStatus::InProgress
    }

    fn poll_registration(&mut self, at: &mut CommandChannel) -> AttachStatus {
        let wait_ms = self.settings.poll_interval_ms.max(self.backoff_ms);
        if !self.slot.is_pending() && !self.fsm.is_elapsed(wait_ms) {
            return AttachStatus::InProgress;
        }

        let timeout_ms = self.settings.command_timeout_ms;
        let Some(response) = self.slot.poll(at, REGISTRATION_QUERY, timeout_ms) else {
            return AttachStatus::InProgress;
        };
        self.fsm.reset_timer();

        let status = parse_registration_status(&response);

        if let Some(status) = status.filter(|s| is_registered(*s)) {
            info!("[CATM1] registered on network (status {})", status);
            self.enter(AttachState::AddressPoll);
            return AttachStatus::InProgress;
        }

        self.attempts += 1;
        self.backoff_ms = status.map(registration_backoff_ms).unwrap_or(0);
        warn!(
            "[CATM1] not registered (status {}), attempt {}/{}, next poll in {} ms",
            describe_status(status, &response),
            self.attempts,
            self.settings.max_registration_attempts,
            self.settings.poll_interval_ms.max(self.backoff_ms)
        );

        if self.attempts >= self.settings.max_registration_attempts {
            return self.escalate(AttachFault::BackoffExhausted);
        }
        AttachStatus::InProgress
    }

    fn poll_address(&mut self, at: &mut CommandChannel) -> AttachStatus {
        if !self.slot.is_pending() && !self.fsm.is_elapsed(self.settings.poll_interval_ms) {
            return AttachStatus::InProgress;
        }

        let timeout_ms = self.settings.command_timeout_ms;
        let Some(response) = self.slot.poll(at, ADDRESS_QUERY, timeout_ms) else {
            return AttachStatus::InProgress;
        };
        self.fsm.reset_timer();

        match parse_address_octet(&response) {
            Some(octet) if octet != "0" => {
                info!("[CATM1] address assigned: {}", response.message.trim());
                self.enter(AttachState::Off);
                AttachStatus::Attached
            }
            _ => {
                debug!("[CATM1] no address yet, polling again");
                AttachStatus::InProgress
            }
        }
    }

    fn deactivate(&mut self, at: &mut CommandChannel) -> AttachStatus {
        if self
            .slot
            .poll(at, PDP_DEACTIVATE_COMMAND, self.settings.command_timeout_ms)
            .is_some()
        {
            info!("[CATM1] PDP context deactivated");
            self.enter(AttachState::Off);
            return AttachStatus::Detached;
        }
        AttachStatus::InProgress
    }

    fn escalate(&mut self, fault: AttachFault) -> AttachStatus {
        warn!("[CATM1] giving up ({:?}), modem restart required", fault);
        self.enter(AttachState::Off);
        AttachStatus::RestartRequired(fault)
    }

    fn enter(&mut self, state: AttachState) {
        self.fsm.request_transition(state);
        self.fsm.reset_timer();
        self.attempts = 0;
        self.backoff_ms = 0;
    }
}

fn describe_status(status: Option<u8>, response: &AtResponse) -> String {
    match status {
        Some(status) => status.to_string(),
        None if response.is_empty() => "timeout".to_string(),
        None => "unreadable".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::timer::mocks::ManualClock;
    use crate::modem::channel::ChannelTimings;
    use crate::modem::transport::mocks::ScriptedTransport;

    const STEP_MS: u64 = 10;

    struct Rig {
        modem: ScriptedTransport,
        clock: ManualClock,
        at: CommandChannel,
        attach: AttachSequence,
    }

    impl Rig {
        fn new(settings: AttachSettings) -> Self {
            let modem = ScriptedTransport::new();
            let clock = ManualClock::new();
            let at = CommandChannel::new(modem.boxed(), clock.handle(), ChannelTimings::default());
            let attach = AttachSequence::new(settings, clock.handle());
            Self {
                modem,
                clock,
                at,
                attach,
            }
        }

        fn happy_modem(&self) {
            self.modem.respond("AT+CNMP", &["OK\r\n"]);
            self.modem.respond(PDP_ACTIVATE_COMMAND, &["OK\r\n\r\n+APP PDP: 0,ACTIVE\r\n"]);
            self.modem.respond(REGISTRATION_QUERY, &["+CEREG: 0,5\r\n\r\nOK\r\n"]);
            self.modem.respond(ADDRESS_QUERY, &["+CNACT: 0,1,\"10.160.3.17\"\r\nOK\r\n"]);
            self.modem.respond(PDP_DEACTIVATE_COMMAND, &["OK\r\n"]);
        }

        /// Ticks until a non-InProgress status, recording when `watch` is written.
        fn run(&mut self, limit_ms: u64, watch: &str) -> (AttachStatus, Vec<u64>) {
            let mut writes = Vec::new();
            let mut seen = self.modem.count_written(watch);
            let mut elapsed = 0;
            while elapsed <= limit_ms {
                let status = self.attach.tick(&mut self.at);
                let count = self.modem.count_written(watch);
                if count != seen {
                    writes.push(self.clock.get());
                    seen = count;
                }
                if status != AttachStatus::InProgress {
                    return (status, writes);
                }
                self.clock.advance(STEP_MS);
                elapsed += STEP_MS;
            }
            panic!(
                "attach did not settle within {} ms (state {:?})",
                limit_ms,
                self.attach.state()
            );
        }
    }

    #[test]
    fn test_backoff_table() {
        assert_eq!(registration_backoff_ms(0), 7_000);
        assert_eq!(registration_backoff_ms(2), 242_000);
        assert_eq!(registration_backoff_ms(3), 22_000);
        assert_eq!(registration_backoff_ms(4), 0);
        assert!(is_registered(1));
        assert!(is_registered(5));
        assert!(!is_registered(2));
    }

    #[test]
    fn test_configure_command_uses_apn() {
        let settings = AttachSettings {
            apn: "internet.test".to_string(),
            ..AttachSettings::default()
        };
        assert_eq!(
            settings.configure_command(),
            "AT+CNMP=38;+CMNB=1;+CNACT=0,0;+CGDCONT=1,\"IP\",\"internet.test\";+CNCFG=0,1,internet.test"
        );
    }

    #[test]
    fn test_happy_path_attaches() {
        let mut rig = Rig::new(AttachSettings::default());
        rig.happy_modem();

        let (status, _) = rig.run(60_000, REGISTRATION_QUERY);

        assert_eq!(status, AttachStatus::Attached);
        assert_eq!(rig.attach.state(), AttachState::Off);
        assert!(rig.at.is_free());
        assert_eq!(
            rig.modem.written_commands(),
            vec![
                AttachSettings::default().configure_command(),
                PDP_ACTIVATE_COMMAND.to_string(),
                REGISTRATION_QUERY.to_string(),
                ADDRESS_QUERY.to_string(),
            ]
        );
    }

    #[test]
    fn test_status_two_waits_before_repoll() {
        let mut rig = Rig::new(AttachSettings::default());
        rig.happy_modem();
        rig.modem
            .respond(REGISTRATION_QUERY, &["+CEREG: 0,2\r\nOK\r\n", "+CEREG: 0,5\r\nOK\r\n"]);

        let (status, writes) = rig.run(400_000, REGISTRATION_QUERY);

        assert_eq!(status, AttachStatus::Attached);
        assert_eq!(writes.len(), 2);
        assert!(
            writes[1] - writes[0] >= 242_000,
            "repolled after {} ms",
            writes[1] - writes[0]
        );
    }

    #[test]
    fn test_status_zero_and_three_backoff() {
        for (status, wait) in [(0u8, 7_000u64), (3, 22_000)] {
            let mut rig = Rig::new(AttachSettings::default());
            rig.happy_modem();
            let first = format!("+CEREG: 0,{}\r\nOK\r\n", status);
            rig.modem
                .respond(REGISTRATION_QUERY, &[first.as_str(), "+CEREG: 0,1\r\nOK\r\n"]);

            let (result, writes) = rig.run(100_000, REGISTRATION_QUERY);

            assert_eq!(result, AttachStatus::Attached);
            assert_eq!(writes.len(), 2);
            let gap = writes[1] - writes[0];
            assert!(gap >= wait, "status {} repolled after {} ms", status, gap);
            assert!(gap < wait + 2_000, "status {} waited too long: {} ms", status, gap);
        }
    }

    #[test]
    fn test_unknown_status_repolls_at_poll_interval() {
        let mut rig = Rig::new(AttachSettings::default());
        rig.happy_modem();
        rig.modem
            .respond(REGISTRATION_QUERY, &["+CEREG: 0,4\r\nOK\r\n", "+CEREG: 0,5\r\nOK\r\n"]);

        let (_, writes) = rig.run(60_000, REGISTRATION_QUERY);

        let gap = writes[1] - writes[0];
        assert!(gap >= 2_000 && gap < 4_000, "repolled after {} ms", gap);
    }

    #[test]
    fn test_registration_budget_escalates() {
        let settings = AttachSettings {
            max_registration_attempts: 3,
            ..AttachSettings::default()
        };
        let mut rig = Rig::new(settings);
        rig.happy_modem();
        rig.modem.respond(REGISTRATION_QUERY, &["+CEREG: 0,0\r\nOK\r\n"]);

        let (status, writes) = rig.run(120_000, REGISTRATION_QUERY);

        assert_eq!(status, AttachStatus::RestartRequired(AttachFault::BackoffExhausted));
        assert_eq!(writes.len(), 3);
        assert_eq!(rig.attach.state(), AttachState::Off);
        assert!(rig.at.is_free());
    }

    #[test]
    fn test_pdp_errors_retry_then_escalate() {
        let settings = AttachSettings {
            max_pdp_attempts: 2,
            pdp_timeout_ms: 500,
            ..AttachSettings::default()
        };
        let mut rig = Rig::new(settings);
        rig.happy_modem();
        rig.modem.respond(PDP_ACTIVATE_COMMAND, &["ERROR\r\n", "+APP PDP: 0,DEACTIVE\r\n"]);

        let (status, writes) = rig.run(30_000, PDP_ACTIVATE_COMMAND);

        assert_eq!(status, AttachStatus::RestartRequired(AttachFault::PdpActivation));
        assert_eq!(writes.len(), 2);
        assert_eq!(rig.modem.count_written(REGISTRATION_QUERY), 0);
    }

    #[test]
    fn test_pdp_recovers_after_deactive() {
        let mut rig = Rig::new(AttachSettings::default());
        rig.happy_modem();
        rig.modem.respond(
            PDP_ACTIVATE_COMMAND,
            &["+APP PDP: 0,DEACTIVE\r\n", "+APP PDP: 0,ACTIVE\r\n"],
        );

        let (status, writes) = rig.run(120_000, PDP_ACTIVATE_COMMAND);

        assert_eq!(status, AttachStatus::Attached);
        assert_eq!(writes.len(), 2);
    }

    #[test]
    fn test_address_zero_then_assigned() {
        let mut rig = Rig::new(AttachSettings::default());
        rig.happy_modem();
        rig.modem.respond(
            ADDRESS_QUERY,
            &[
                "+CNACT: 0,0,\"0.0.0.0\"\r\nOK\r\n",
                "+CNACT: 0,1,\"100.64.1.9\"\r\nOK\r\n",
            ],
        );

        let (status, writes) = rig.run(60_000, ADDRESS_QUERY);

        assert_eq!(status, AttachStatus::Attached);
        assert_eq!(writes.len(), 2);
        assert!(writes[1] - writes[0] >= 2_000);
    }

    #[test]
    fn test_unassigned_address_polls_without_budget() {
        let settings = AttachSettings {
            max_registration_attempts: 3,
            ..AttachSettings::default()
        };
        let mut rig = Rig::new(settings);
        rig.happy_modem();
        rig.modem.respond(ADDRESS_QUERY, &["+CNACT: 0,0,\"0.0.0.0\"\r\nOK\r\n"]);

        for _ in 0..10_000 {
            let status = rig.attach.tick(&mut rig.at);
            assert_eq!(status, AttachStatus::InProgress);
            rig.clock.advance(STEP_MS);
        }

        assert_eq!(rig.attach.state(), AttachState::AddressPoll);
        assert!(
            rig.modem.count_written(ADDRESS_QUERY) > 10,
            "only {} address queries",
            rig.modem.count_written(ADDRESS_QUERY)
        );
    }

    #[test]
    fn test_detach_only_from_off() {
        let mut rig = Rig::new(AttachSettings::default());
        rig.happy_modem();

        rig.attach.tick(&mut rig.at);
        assert_eq!(rig.attach.state(), AttachState::Configure);
        assert!(!rig.attach.detach());

        let (status, _) = rig.run(60_000, ADDRESS_QUERY);
        assert_eq!(status, AttachStatus::Attached);
        assert_eq!(rig.attach.state(), AttachState::Off);
        assert!(rig.attach.detach());

        let (status, _) = rig.run(5_000, PDP_DEACTIVATE_COMMAND);
        assert_eq!(status, AttachStatus::Detached);
        assert_eq!(rig.attach.state(), AttachState::Off);
        assert_eq!(rig.modem.count_written(PDP_DEACTIVATE_COMMAND), 1);
    }

    #[test]
    fn test_waits_for_busy_channel() {
        let mut rig = Rig::new(AttachSettings::default());
        rig.happy_modem();
        rig.at.issue("AT+OTHER", 1_000);

        rig.attach.tick(&mut rig.at);
        rig.attach.tick(&mut rig.at);
        assert_eq!(rig.modem.written_commands(), vec!["AT+OTHER".to_string()]);

        rig.at.release();
        rig.attach.tick(&mut rig.at);
        assert_eq!(rig.modem.count_written("AT+CNMP"), 1);
    }
}
