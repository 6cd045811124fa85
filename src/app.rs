//! # Application
//!
//! Root context owning the command channel, the telemetry queue and every
//! state machine, plus the phase scheduler that ticks them.
//!
//! ```text
//!  IDENTIFY ─▶ READ_GNSS ─▶ GNSS_OFF ─▶ IDLE ◀──────────────────────────┐
//!                                        │ battery due ─▶ READ_BATTERY ─┤
//!                                        │ gnss due    ─▶ READ_GNSS ... ┤
//!                                        │ upload due  ─▶ ATTACH ─▶ UPLOAD ─▶ DETACH
//!                                        │                  │
//!  IDENTIFY ◀── settle ◀── RESTART ◀─────┴──── escalation ──┘
//! ```
//!
//! Phase changes are guarded by the channel being FREE, so a phase never
//! hands over while a command of the previous one is still in flight.

use crate::config::{Config, ScheduleConfig};
use crate::fsm::{ClockHandle, StateMachine, Timer};
use crate::modem::channel::{ChannelState, ChannelTimings, CommandChannel, CommandSlot};
use crate::modem::response::parse_imei;
use crate::modem::transport::Transport;
use crate::network::{
    AttachSequence, AttachSettings, AttachStatus, SessionSettings, SessionStatus, SocketSession,
};
use crate::sensors::{BatteryReader, FixFilter, GnssReader, Reading};
use crate::telemetry::TelemetryQueue;
use tracing::{debug, info, warn};

/// Identity query (IMEI)
pub const IDENTITY_QUERY: &str = "AT+GSN";

/// Full functionality with modem reset
pub const RESTART_COMMAND: &str = "AT+CFUN=1,1";

/// Scheduler phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Identify,
    Idle,
    ReadGnss,
    GnssOff,
    ReadBattery,
    Attach,
    Upload,
    Detach,
    Restart,
}

/// Owner of everything ticked by the main loop
pub struct Application {
    at: CommandChannel,
    phase: StateMachine<Phase>,
    queue: TelemetryQueue,
    attach: AttachSequence,
    session: SocketSession,
    gnss: GnssReader,
    fix_filter: FixFilter,
    battery: BatteryReader,
    control: CommandSlot,
    command_timeout_ms: u64,
    schedule: ScheduleConfig,
    gnss_timer: Timer,
    battery_timer: Timer,
    upload_timer: Timer,
    battery_read: bool,
    restart_sent: bool,
    restarts: u32,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("phase", &self.phase.state())
            .field("channel", &self.at.state())
            .field("queued", &self.queue.len())
            .field("restarts", &self.restarts)
            .finish_non_exhaustive()
    }
}

impl Application {
    pub fn new(config: &Config, transport: Box<dyn Transport>, clock: ClockHandle) -> Self {
        let at = CommandChannel::new(
            transport,
            clock.clone(),
            ChannelTimings::from(&config.modem),
        );

        let channel = at.state_watch();
        let phase = StateMachine::new("APP", Phase::Identify, clock.clone())
            .with_guard(move || channel.get() == ChannelState::Free);

        Self {
            phase,
            queue: TelemetryQueue::new(),
            attach: AttachSequence::new(
                AttachSettings::from_config(&config.network, &config.modem),
                clock.clone(),
            ),
            session: SocketSession::new(
                SessionSettings::from_config(&config.server, &config.modem),
                clock.clone(),
            ),
            gnss: GnssReader::new(config.gnss.command_timeout_ms, clock.clone()),
            fix_filter: FixFilter::from(&config.gnss),
            battery: BatteryReader::new(config.modem.command_timeout_ms),
            control: CommandSlot::new(),
            command_timeout_ms: config.modem.command_timeout_ms,
            schedule: config.schedule.clone(),
            gnss_timer: Timer::new(clock.clone()),
            battery_timer: Timer::new(clock.clone()),
            upload_timer: Timer::new(clock),
            battery_read: false,
            restart_sent: false,
            restarts: 0,
            at,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase.state()
    }

    pub fn queue(&self) -> &TelemetryQueue {
        &self.queue
    }

    pub fn channel(&self) -> &CommandChannel {
        &self.at
    }

    /// Modem restarts requested so far.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Runs one scheduler step. Never blocks.
    pub fn tick(&mut self) {
        self.at.reclaim_abandoned();

        match self.phase.state() {
            Phase::Identify => self.identify(),
            Phase::Idle => self.idle(),
            Phase::ReadGnss => self.read_gnss(),
            Phase::GnssOff => self.gnss_off(),
            Phase::ReadBattery => self.read_battery(),
            Phase::Attach => self.run_attach(),
            Phase::Upload => self.upload(),
            Phase::Detach => self.detach(),
            Phase::Restart => self.restart(),
        }
    }

    fn identify(&mut self) {
        let timeout_ms = self.command_timeout_ms;
        let Some(response) = self.control.poll(&mut self.at, IDENTITY_QUERY, timeout_ms) else {
            return;
        };

        match parse_imei(&response) {
            Some(imei) => {
                info!("IMEI: {}", imei);
                self.queue.set_identity(imei);
                self.enter(Phase::ReadGnss);
            }
            None => warn!("No IMEI in reply {:?}, retrying", response.message.trim()),
        }
    }

    fn idle(&mut self) {
        let upload_due = self.upload_timer.is_elapsed(secs(self.schedule.upload_interval_s));
        if upload_due && !self.queue.is_empty() {
            match self.queue.to_json() {
                Ok(json) => info!("Uploading {}", json),
                Err(e) => warn!("{}", e),
            }
            self.enter(Phase::Attach);
        } else if !self.battery_read
            || self.battery_timer.is_elapsed(secs(self.schedule.battery_interval_s))
        {
            self.enter(Phase::ReadBattery);
        } else if self.gnss_timer.is_elapsed(secs(self.schedule.gnss_interval_s)) {
            self.enter(Phase::ReadGnss);
        }
    }

    fn read_gnss(&mut self) {
        if !self.gnss.power_on(&mut self.at) {
            return;
        }

        match self.gnss.read(&mut self.at) {
            Reading::Pending => {}
            Reading::Ready(reading) if self.fix_filter.accepts(&reading) => {
                if let Some(fix) = reading.to_fix() {
                    info!(
                        "Position fix {:.6}, {:.6} (hdop {}, hpa {} m)",
                        fix.latitude, fix.longitude, fix.hdop, fix.hpa
                    );
                    self.queue.enqueue(fix);
                }
                self.enter(Phase::GnssOff);
            }
            Reading::Ready(_) | Reading::Invalid => {
                if self.phase.time_in_state_ms() >= secs(self.schedule.gnss_interval_s) {
                    info!("No usable GNSS fix, giving up until the next interval");
                    self.enter(Phase::GnssOff);
                }
            }
        }
    }

    fn gnss_off(&mut self) {
        if self.gnss.power_off(&mut self.at) {
            self.gnss_timer.reset();
            self.enter(Phase::Idle);
        }
    }

    fn read_battery(&mut self) {
        match self.battery.poll(&mut self.at) {
            Reading::Pending => return,
            Reading::Ready(level) => self.queue.enqueue(level),
            Reading::Invalid => {}
        }
        self.battery_read = true;
        self.battery_timer.reset();
        self.enter(Phase::Idle);
    }

    fn run_attach(&mut self) {
        match self.attach.tick(&mut self.at) {
            AttachStatus::Attached => self.enter(Phase::Upload),
            AttachStatus::RestartRequired(fault) => {
                warn!("Attach failed ({:?}), restarting modem", fault);
                self.enter(Phase::Restart);
            }
            AttachStatus::InProgress | AttachStatus::Detached => {}
        }
    }

    fn upload(&mut self) {
        if let SessionStatus::Finished(outcome) = self.session.tick(&mut self.at, &mut self.queue) {
            info!("Upload finished: {:?} ({} records still queued)", outcome, self.queue.len());
            self.upload_timer.reset();
            self.attach.detach();
            self.enter(Phase::Detach);
        }
    }

    fn detach(&mut self) {
        if self.attach.tick(&mut self.at) == AttachStatus::Detached {
            self.enter(Phase::Idle);
        }
    }

    fn restart(&mut self) {
        if !self.restart_sent {
            if self
                .control
                .poll(&mut self.at, RESTART_COMMAND, self.command_timeout_ms)
                .is_some()
            {
                self.restarts += 1;
                self.restart_sent = true;
                self.phase.reset_timer();
            }
            return;
        }

        if self.phase.is_elapsed(self.schedule.restart_settle_ms) {
            self.restart_sent = false;
            self.enter(Phase::Identify);
        }
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase.request_transition(phase) {
            self.phase.reset_timer();
        } else {
            debug!("[APP] {:?} deferred, channel busy", phase);
        }
    }
}

fn secs(seconds: u64) -> u64 {
    seconds.saturating_mul(1_000)
}
