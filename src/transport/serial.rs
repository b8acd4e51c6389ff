//! Serial port link to the robot controller.
//!
//! Opens the port at 115200 baud, 8 data bits, with short timeouts so the
//! transport worker keeps observing the stop signal.

use anyhow::{Context, Result};
use serialport::{DataBits, SerialPort, SerialPortInfo, SerialPortType};
use std::io::{self, Read, Write};
use std::time::Duration;

use super::link::{CommandLink, LinkOpener};

pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Identifiers a VEX V5 brain reports over USB.
const CONTROLLER_KEYWORDS: [&str; 3] = ["VEX", "V5", "BRAIN"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Read and write timeout.
    pub timeout: Duration,
}

impl SerialConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub struct SerialLink {
    name: String,
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .timeout(config.timeout)
            .open()
            .with_context(|| format!("could not open serial port {}", config.port))?;
        Ok(Self {
            name: config.port.clone(),
            port,
        })
    }
}

impl CommandLink for SerialLink {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        self.port.write_all(line)?;
        self.port.flush()
    }

    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let pending = self.port.bytes_to_read().map_err(io::Error::from)? as usize;
        if pending == 0 || buf.is_empty() {
            return Ok(0);
        }
        let take = pending.min(buf.len());
        self.port.read(&mut buf[..take])
    }
}

/// Opens a `SerialLink` when the transport worker starts.
pub struct SerialOpener {
    pub config: SerialConfig,
}

impl SerialOpener {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }
}

impl LinkOpener for SerialOpener {
    fn describe(&self) -> String {
        format!("{} @ {} baud", self.config.port, self.config.baud_rate)
    }

    fn open(&self) -> Result<Box<dyn CommandLink>> {
        Ok(Box::new(SerialLink::open(&self.config)?))
    }
}

// ----------------------------------------------------------------------------
// Port discovery
// ----------------------------------------------------------------------------

/// A port name with whatever the OS reports about the device behind it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortCandidate {
    pub name: String,
    pub description: String,
}

impl From<&SerialPortInfo> for PortCandidate {
    fn from(info: &SerialPortInfo) -> Self {
        let description = match &info.port_type {
            SerialPortType::UsbPort(usb) => {
                let mut parts = vec![format!("USB VID:PID={:04x}:{:04x}", usb.vid, usb.pid)];
                parts.extend(usb.manufacturer.clone());
                parts.extend(usb.product.clone());
                parts.extend(usb.serial_number.as_ref().map(|s| format!("SER={}", s)));
                parts.join(" ")
            }
            SerialPortType::PciPort => "PCI".to_string(),
            SerialPortType::BluetoothPort => "Bluetooth".to_string(),
            SerialPortType::Unknown => "n/a".to_string(),
        };
        Self {
            name: info.port_name.clone(),
            description,
        }
    }
}

/// First candidate whose description names the controller.
pub fn find_controller_port(candidates: &[PortCandidate]) -> Option<&PortCandidate> {
    candidates.iter().find(|candidate| {
        let description = candidate.description.to_uppercase();
        CONTROLLER_KEYWORDS
            .iter()
            .any(|keyword| description.contains(keyword))
    })
}

/// Enumerate serial ports.
pub fn list_ports() -> Result<Vec<PortCandidate>> {
    let ports = serialport::available_ports().context("enumerate serial ports")?;
    Ok(ports.iter().map(PortCandidate::from).collect())
}

/// Look for the robot controller among the attached serial ports.
///
/// Logs the available ports and returns `None` when nothing matches.
pub fn discover_port() -> Result<Option<String>> {
    log::info!("searching for robot controller port...");
    let candidates = list_ports()?;
    if let Some(found) = find_controller_port(&candidates) {
        log::info!("found robot controller on {} ({})", found.name, found.description);
        return Ok(Some(found.name.clone()));
    }
    log::warn!("could not find the robot controller port automatically");
    if candidates.is_empty() {
        log::warn!("no serial ports available");
    }
    for (i, candidate) in candidates.iter().enumerate() {
        log::info!("  {}: {} - {}", i + 1, candidate.name, candidate.description);
    }
    Ok(None)
}
