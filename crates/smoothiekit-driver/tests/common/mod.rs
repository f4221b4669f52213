//! Shared test harness: a mock link that records writes, plus helpers to
//! build controllers in well-known states.
#![allow(dead_code)]

use smoothiekit_driver::controller::{BOOT_DELAY, VERSION_SETTLE};
use smoothiekit_driver::{Communicator, ConnectionParams, SmoothieController};
use smoothiekit_core::{DriverConfig, Result};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Mock communicator capturing everything the controller writes
pub struct MockLink {
    pub sent: Arc<Mutex<Vec<String>>>,
    connected: bool,
}

impl MockLink {
    pub fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                sent: sent.clone(),
                connected: false,
            },
            sent,
        )
    }
}

impl Communicator for MockLink {
    fn connect(&mut self, _params: &ConnectionParams) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send(&mut self, data: &[u8]) -> Result<usize> {
        self.sent
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(data).to_string());
        Ok(data.len())
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn ident(&self) -> String {
        "serial:/dev/ttyTEST".to_string()
    }
}

/// A controller over a mock link, not yet opened
pub fn controller(config: DriverConfig) -> (SmoothieController, Arc<Mutex<Vec<String>>>) {
    let (link, sent) = MockLink::new();
    let params = ConnectionParams {
        port: "/dev/ttyTEST".to_string(),
        ..Default::default()
    };
    (
        SmoothieController::new(Box::new(link), params, config),
        sent,
    )
}

/// An opened controller that has completed the startup handshake
pub fn ready_controller(
    config: DriverConfig,
    t0: Instant,
) -> (SmoothieController, Arc<Mutex<Vec<String>>>) {
    let (mut c, sent) = controller(config);
    c.open(t0).unwrap();
    c.poll_init(t0 + BOOT_DELAY);
    c.poll_init(t0 + BOOT_DELAY + VERSION_SETTLE);
    assert!(c.is_ready());
    sent.lock().unwrap().clear(); // drop the "version\n" handshake
    (c, sent)
}

/// Snapshot of the captured writes
pub fn writes(sent: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    sent.lock().unwrap().clone()
}

/// Count how many captured writes equal `data`
pub fn count_writes(sent: &Arc<Mutex<Vec<String>>>, data: &str) -> usize {
    sent.lock().unwrap().iter().filter(|w| *w == data).count()
}
