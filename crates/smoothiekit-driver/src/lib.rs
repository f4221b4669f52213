//! # SmoothieKit Driver
//!
//! Controller driver for Smoothieware CNC/laser machines. Streams G-code
//! programs over a serial or TCP link under character-counting flow
//! control, interleaves realtime queries, and fans controller events out
//! to client sessions.
//!
//! The crate is organized around one driver task per machine:
//!
//! 1. **transport** - the byte-stream link (serial via `serialport`, TCP)
//! 2. **protocol** - response classification and status parsing
//! 3. **controller** - the streaming core: sender, feeder, workflow,
//!    line preprocessing, the 250 ms tick, and the command dispatcher
//! 4. **service** - the spawned task owning a controller, plus handles
//! 5. **session** / **registry** - event fan-out and engine-owned lookup

pub mod controller;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod session;
pub mod transport;

pub use controller::{Command, CommandContext, SmoothieController, TICK_INTERVAL};
pub use protocol::{ParsedLine, Response, ResponseParser};
pub use registry::ControllerRegistry;
pub use service::{spawn, spawn_with, DriverHandle, DriverMessage, SharedState};
pub use session::SessionRegistry;
pub use transport::{
    list_ports, Communicator, ConnectionDriver, ConnectionParams, SerialCommunicator,
    SerialPortInfo, TcpCommunicator,
};
