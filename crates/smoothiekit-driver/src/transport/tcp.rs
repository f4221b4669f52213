//! TCP socket communication
//!
//! Network link to a machine exposing its console on a TCP port (Smoothie
//! boards on Ethernet listen on port 23). Uses a blocking stream with a
//! short read timeout so the driver loop can poll it.

use crate::transport::{map_io_error, Communicator, ConnectionDriver, ConnectionParams};
use smoothiekit_core::{ConnectionError, Result};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// TCP link implementation over `std::net::TcpStream`
pub struct TcpCommunicator {
    stream: Option<TcpStream>,
    params: Option<ConnectionParams>,
}

impl TcpCommunicator {
    /// Create an unconnected TCP communicator
    pub fn new() -> Self {
        Self {
            stream: None,
            params: None,
        }
    }

    fn addr(&self) -> String {
        self.params
            .as_ref()
            .map(|p| p.port.clone())
            .unwrap_or_default()
    }
}

impl Default for TcpCommunicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Communicator for TcpCommunicator {
    fn connect(&mut self, params: &ConnectionParams) -> Result<()> {
        if params.driver != ConnectionDriver::Tcp {
            return Err(ConnectionError::InvalidParameters {
                reason: "TcpCommunicator requires the socket driver".to_string(),
            }
            .into());
        }

        let stream = TcpStream::connect(&params.port).map_err(|e| {
            tracing::warn!("Failed to connect to {}: {}", params.port, e);
            ConnectionError::FailedToOpen {
                port: params.port.clone(),
                reason: e.to_string(),
            }
        })?;
        stream
            .set_read_timeout(Some(Duration::from_millis(params.timeout_ms.max(1))))
            .map_err(|e| map_io_error(&params.port, e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| map_io_error(&params.port, e))?;

        self.stream = Some(stream);
        self.params = Some(params.clone());
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn send(&mut self, data: &[u8]) -> Result<usize> {
        let addr = self.addr();
        let stream = self.stream.as_mut().ok_or(ConnectionError::NotOpen)?;
        let n = stream.write(data).map_err(|e| map_io_error(&addr, e))?;
        stream.flush().map_err(|e| map_io_error(&addr, e))?;
        Ok(n)
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        let addr = self.addr();
        let stream = self.stream.as_mut().ok_or(ConnectionError::NotOpen)?;

        let mut buf = [0u8; 512];
        match stream.read(&mut buf) {
            Ok(0) => Err(ConnectionError::ConnectionLost {
                reason: format!("{}: closed by peer", addr),
            }
            .into()),
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(map_io_error(&addr, e).into()),
        }
    }

    fn ident(&self) -> String {
        self.params
            .as_ref()
            .map(|p| p.ident())
            .unwrap_or_else(|| "socket:".to_string())
    }
}
