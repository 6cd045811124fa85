//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{ModemError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub modem: ModemConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub gnss: GnssConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

/// AT command channel configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ModemConfig {
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    #[serde(default = "default_byte_timeout_ms")]
    pub byte_timeout_ms: u64,

    #[serde(default = "default_binary_timeout_ms")]
    pub binary_timeout_ms: u64,

    #[serde(default = "default_release_grace_ms")]
    pub release_grace_ms: u64,
}

/// Cellular attach configuration
#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    #[serde(default = "default_apn")]
    pub apn: String,

    #[serde(default = "default_pdp_timeout_ms")]
    pub pdp_timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_pdp_attempts")]
    pub max_pdp_attempts: u32,

    #[serde(default = "default_max_registration_attempts")]
    pub max_registration_attempts: u32,
}

/// Telemetry collector configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,

    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
}

/// Measurement and upload cadence
#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_gnss_interval_s")]
    pub gnss_interval_s: u64,

    #[serde(default = "default_battery_interval_s")]
    pub battery_interval_s: u64,

    #[serde(default = "default_upload_interval_s")]
    pub upload_interval_s: u64,

    #[serde(default = "default_restart_settle_ms")]
    pub restart_settle_ms: u64,
}

/// GNSS fix acceptance configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GnssConfig {
    #[serde(default = "default_gnss_command_timeout_ms")]
    pub command_timeout_ms: u64,

    #[serde(default = "default_min_hdop")]
    pub min_hdop: f32,

    #[serde(default = "default_max_hdop")]
    pub max_hdop: f32,

    #[serde(default = "default_max_hpa")]
    pub max_hpa: f32,
}

/// Log output configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Directory for rolling log files (empty = console only)
    #[serde(default)]
    pub dir: String,

    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 57600 }
fn default_tick_interval_ms() -> u64 { 1 }

fn default_command_timeout_ms() -> u64 { 1000 }
fn default_byte_timeout_ms() -> u64 { 1000 }
fn default_binary_timeout_ms() -> u64 { 10000 }
fn default_release_grace_ms() -> u64 { 5000 }

fn default_apn() -> String { "iot.1nce.net".to_string() }
fn default_pdp_timeout_ms() -> u64 { 15000 }
fn default_poll_interval_ms() -> u64 { 2000 }
fn default_max_pdp_attempts() -> u32 { 5 }
fn default_max_registration_attempts() -> u32 { 10 }

fn default_server_host() -> String { "2.tcp.eu.ngrok.io".to_string() }
fn default_server_port() -> u16 { 12596 }
fn default_open_timeout_ms() -> u64 { 10000 }

fn default_gnss_interval_s() -> u64 { 60 }
fn default_battery_interval_s() -> u64 { 3600 }
fn default_upload_interval_s() -> u64 { 60 }
fn default_restart_settle_ms() -> u64 { 10000 }

fn default_gnss_command_timeout_ms() -> u64 { 2000 }
fn default_min_hdop() -> f32 { 0.2 }
fn default_max_hdop() -> f32 { 10.0 }
fn default_max_hpa() -> f32 { 20.0 }

fn default_log_file_prefix() -> String { "modem-telemetry.log".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout_ms(),
            byte_timeout_ms: default_byte_timeout_ms(),
            binary_timeout_ms: default_binary_timeout_ms(),
            release_grace_ms: default_release_grace_ms(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            apn: default_apn(),
            pdp_timeout_ms: default_pdp_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_pdp_attempts: default_max_pdp_attempts(),
            max_registration_attempts: default_max_registration_attempts(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
            open_timeout_ms: default_open_timeout_ms(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            gnss_interval_s: default_gnss_interval_s(),
            battery_interval_s: default_battery_interval_s(),
            upload_interval_s: default_upload_interval_s(),
            restart_settle_ms: default_restart_settle_ms(),
        }
    }
}

impl Default for GnssConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_gnss_command_timeout_ms(),
            min_hdop: default_min_hdop(),
            max_hdop: default_max_hdop(),
            max_hpa: default_max_hpa(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: String::new(),
            file_prefix: default_log_file_prefix(),
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> ModemError {
    ModemError::Config(toml::de::Error::custom(message))
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(invalid(format!("{} must be between {} and {}", name, min, max)));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use modem_telemetry::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Serial
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if ![9600, 19200, 38400, 57600, 115200].contains(&self.serial.baud_rate) {
            return Err(invalid(
                "baud_rate must be one of: 9600, 19200, 38400, 57600, 115200",
            ));
        }

        check_range("tick_interval_ms", self.serial.tick_interval_ms, 1, 100)?;

        // Command channel
        check_range("command_timeout_ms", self.modem.command_timeout_ms, 1, 60000)?;
        check_range("byte_timeout_ms", self.modem.byte_timeout_ms, 1, 60000)?;
        check_range("binary_timeout_ms", self.modem.binary_timeout_ms, 1, 120000)?;
        check_range("release_grace_ms", self.modem.release_grace_ms, 1, 60000)?;

        if self.modem.binary_timeout_ms < self.modem.command_timeout_ms {
            return Err(invalid(
                "binary_timeout_ms must not be shorter than command_timeout_ms",
            ));
        }

        // Network attach
        if self.network.apn.is_empty() {
            return Err(invalid("network apn cannot be empty"));
        }

        check_range("pdp_timeout_ms", self.network.pdp_timeout_ms, 1, 120000)?;
        check_range("poll_interval_ms", self.network.poll_interval_ms, 100, 60000)?;

        if self.network.max_pdp_attempts == 0 {
            return Err(invalid("max_pdp_attempts must be greater than 0"));
        }

        if self.network.max_registration_attempts == 0 {
            return Err(invalid("max_registration_attempts must be greater than 0"));
        }

        // Collector
        if self.server.host.is_empty() {
            return Err(invalid("server host cannot be empty"));
        }

        if self.server.port == 0 {
            return Err(invalid("server port must be greater than 0"));
        }

        check_range("open_timeout_ms", self.server.open_timeout_ms, 1, 120000)?;

        // Schedule
        for (name, value) in [
            ("gnss_interval_s", self.schedule.gnss_interval_s),
            ("battery_interval_s", self.schedule.battery_interval_s),
            ("upload_interval_s", self.schedule.upload_interval_s),
        ] {
            if value == 0 {
                return Err(invalid(format!("{} must be greater than 0", name)));
            }
        }

        check_range("restart_settle_ms", self.schedule.restart_settle_ms, 0, 600000)?;

        // GNSS acceptance
        check_range("gnss command_timeout_ms", self.gnss.command_timeout_ms, 1, 60000)?;

        if self.gnss.min_hdop < 0.0 || self.gnss.min_hdop >= self.gnss.max_hdop {
            return Err(invalid("min_hdop must be >= 0.0 and less than max_hdop"));
        }

        if self.gnss.max_hpa <= 0.0 {
            return Err(invalid("max_hpa must be greater than 0.0"));
        }

        // Logging
        if !self.logging.dir.is_empty() && self.logging.file_prefix.is_empty() {
            return Err(invalid("logging file_prefix cannot be empty when dir is set"));
        }

        Ok(())
    }
}
