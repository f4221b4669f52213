//! Serial port communication
//!
//! Serial/USB link to the machine via the `serialport` crate, plus port
//! enumeration filtered to device names that look like CNC controllers.

use crate::transport::{map_io_error, Communicator, ConnectionDriver, ConnectionParams};
use smoothiekit_core::{ConnectionError, Error, Result};
use std::io::{Read, Write};
use std::time::Duration;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,
    /// Port description (e.g., "USB Serial Port")
    pub description: String,
    /// Manufacturer name if available
    pub manufacturer: Option<String>,
}

/// List serial ports that look like machine links
///
/// - Windows: COM*
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports()
        .map_err(|e| Error::other(format!("Failed to enumerate ports: {}", e)))?;

    Ok(ports
        .iter()
        .filter(|port| is_machine_port(&port.port_name))
        .map(|port| {
            let (description, manufacturer) = match &port.port_type {
                serialport::SerialPortType::UsbPort(usb) => (
                    format!(
                        "USB {} {}",
                        usb.manufacturer.as_deref().unwrap_or("Device"),
                        usb.product.as_deref().unwrap_or("Serial Port")
                    ),
                    usb.manufacturer.clone(),
                ),
                serialport::SerialPortType::BluetoothPort => {
                    ("Bluetooth Serial".to_string(), None)
                }
                _ => ("Serial Port".to_string(), None),
            };
            SerialPortInfo {
                port_name: port.port_name.clone(),
                description,
                manufacturer,
            }
        })
        .collect())
}

fn is_machine_port(port_name: &str) -> bool {
    if port_name.starts_with("COM") && port_name[3..].chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    if port_name.starts_with("/dev/ttyUSB") || port_name.starts_with("/dev/ttyACM") {
        return true;
    }
    if port_name.starts_with("/dev/cu.usbserial-") || port_name.starts_with("/dev/cu.usbmodem") {
        return true;
    }
    false
}

/// Serial link implementation over the `serialport` crate
pub struct SerialCommunicator {
    port: Option<Box<dyn serialport::SerialPort>>,
    params: Option<ConnectionParams>,
}

impl SerialCommunicator {
    /// Create an unconnected serial communicator
    pub fn new() -> Self {
        Self {
            port: None,
            params: None,
        }
    }
}

impl Default for SerialCommunicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Communicator for SerialCommunicator {
    fn connect(&mut self, params: &ConnectionParams) -> Result<()> {
        if params.driver != ConnectionDriver::Serial {
            return Err(ConnectionError::InvalidParameters {
                reason: "SerialCommunicator requires the serial driver".to_string(),
            }
            .into());
        }

        let port = serialport::new(&params.port, params.baud_rate)
            .timeout(Duration::from_millis(params.timeout_ms))
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", params.port, e);
                ConnectionError::FailedToOpen {
                    port: params.port.clone(),
                    reason: e.to_string(),
                }
            })?;

        self.port = Some(port);
        self.params = Some(params.clone());
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.port = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn send(&mut self, data: &[u8]) -> Result<usize> {
        let port_name = self
            .params
            .as_ref()
            .map(|p| p.port.clone())
            .unwrap_or_default();
        let port = self
            .port
            .as_mut()
            .ok_or(ConnectionError::NotOpen)?;
        let n = port
            .write(data)
            .map_err(|e| map_io_error(&port_name, e))?;
        port.flush().map_err(|e| map_io_error(&port_name, e))?;
        Ok(n)
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        let port_name = self
            .params
            .as_ref()
            .map(|p| p.port.clone())
            .unwrap_or_default();
        let port = self
            .port
            .as_mut()
            .ok_or(ConnectionError::NotOpen)?;

        let mut buf = [0u8; 512];
        match port.read(&mut buf) {
            Ok(0) => Err(ConnectionError::ConnectionLost {
                reason: format!("{}: device detached", port_name),
            }
            .into()),
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(map_io_error(&port_name, e).into()),
        }
    }

    fn ident(&self) -> String {
        self.params
            .as_ref()
            .map(|p| p.ident())
            .unwrap_or_else(|| "serial:".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_port_patterns() {
        assert!(is_machine_port("COM3"));
        assert!(is_machine_port("/dev/ttyUSB0"));
        assert!(is_machine_port("/dev/ttyACM1"));
        assert!(is_machine_port("/dev/cu.usbmodem14101"));
        assert!(!is_machine_port("/dev/ttyS0"));
        assert!(!is_machine_port("COMX"));
    }
}
