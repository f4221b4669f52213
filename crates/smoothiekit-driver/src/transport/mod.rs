//! Transport layer
//!
//! The byte-stream link to the machine. Serial/USB and TCP links are both
//! driven through the [`Communicator`] trait: synchronous writes, polled
//! reads with a short timeout, and explicit connect/disconnect. The
//! streaming core owns exactly one communicator per controller.

pub mod serial;
pub mod tcp;

use smoothiekit_core::{ConnectionError, Result};

pub use serial::{list_ports, SerialCommunicator, SerialPortInfo};
pub use tcp::TcpCommunicator;

/// Kind of link a communicator drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDriver {
    /// Serial/USB device
    Serial,
    /// TCP socket
    Tcp,
}

impl std::fmt::Display for ConnectionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionDriver::Serial => write!(f, "serial"),
            ConnectionDriver::Tcp => write!(f, "socket"),
        }
    }
}

/// Parameters for opening a link
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Which kind of link to open
    pub driver: ConnectionDriver,
    /// Device path (serial) or `host:port` address (TCP)
    pub port: String,
    /// Baud rate for serial links
    pub baud_rate: u32,
    /// Read timeout in milliseconds; keep this short, the driver loop polls
    pub timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            driver: ConnectionDriver::Serial,
            port: String::new(),
            baud_rate: 115_200,
            timeout_ms: 50,
        }
    }
}

impl ConnectionParams {
    /// Connection identity, unique per machine link
    pub fn ident(&self) -> String {
        format!("{}:{}", self.driver, self.port)
    }
}

/// A bidirectional byte-stream link to the machine
pub trait Communicator: Send {
    /// Open the link
    fn connect(&mut self, params: &ConnectionParams) -> Result<()>;

    /// Close the link
    fn disconnect(&mut self) -> Result<()>;

    /// Whether the link is currently open
    fn is_connected(&self) -> bool;

    /// Write raw bytes to the link
    fn send(&mut self, data: &[u8]) -> Result<usize>;

    /// Poll for inbound bytes; an empty vector means nothing arrived
    /// within the read timeout
    fn receive(&mut self) -> Result<Vec<u8>>;

    /// Connection identity string
    fn ident(&self) -> String;
}

pub(crate) fn map_io_error(port: &str, err: std::io::Error) -> ConnectionError {
    match err.kind() {
        std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::UnexpectedEof => ConnectionError::ConnectionLost {
            reason: format!("{}: {}", port, err),
        },
        _ => ConnectionError::Io {
            reason: format!("{}: {}", port, err),
        },
    }
}
