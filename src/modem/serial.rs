//! # Serial Port Transport
//!
//! Opens the SIM7080G UART and exposes it as a non-blocking [`Transport`].
//!
//! The port is opened through `tokio-serial`'s re-exported `serialport`
//! builder. Reads first ask the driver how many bytes are waiting so that a
//! tick never parks inside `read`.

use crate::config::SerialConfig;
use crate::error::{ModemError, Result};
use crate::modem::transport::Transport;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::{debug, info, warn};

/// SIM7080G default UART baud rate
pub const SIM7080G_BAUD_RATE: u32 = 57_600;

/// Device paths tried after the configured one (in order of preference)
const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyUSB0", // USB-to-serial adapters
    "/dev/ttyACM0", // USB CDC devices
];

/// Driver-level read timeout; reads only happen when bytes are waiting
const PORT_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Modem serial port handle
pub struct SerialTransport {
    /// Serial port handle
    port: Box<dyn tokio_serial::SerialPort>,
    /// Device path (e.g., /dev/ttyUSB0)
    device_path: String,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl SerialTransport {
    /// Open the modem port described by the configuration
    ///
    /// Tries the configured port first, then the default device paths.
    ///
    /// # Errors
    ///
    /// Returns [`ModemError::SerialPortNotFound`] when no candidate opens.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use modem_telemetry::config::Config;
    /// use modem_telemetry::modem::serial::SerialTransport;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// let serial = SerialTransport::open(&config.serial)?;
    /// println!("Connected to: {}", serial.device_path());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let mut paths: Vec<&str> = vec![config.port.as_str()];
        paths.extend(
            DEFAULT_DEVICE_PATHS
                .iter()
                .copied()
                .filter(|p| *p != config.port),
        );
        Self::open_with_paths(&paths, config.baud_rate)
    }

    /// Open the first device in `paths` that accepts the connection
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Successfully opened modem at {} ({} baud)", path, baud_rate);
                    return Ok(Self {
                        port,
                        device_path: path.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(ModemError::SerialPortNotFound(paths.join(", ")))
    }

    /// Open a specific serial port with 8N1 settings
    fn open_port(path: &str, baud_rate: u32) -> Result<Box<dyn tokio_serial::SerialPort>> {
        tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(PORT_READ_TIMEOUT)
            .open()
            .map_err(|e| ModemError::Serial(format!("Failed to open {}: {}", path, e)))
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(io::Error::from)
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if self.bytes_available()? == 0 {
            return Ok(None);
        }

        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(1) => Ok(Some(buf[0])),
            Ok(_) => Ok(None),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
