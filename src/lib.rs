//! # SmoothieKit
//!
//! A Rust G-code streamer and controller driver for Smoothieware CNC and
//! laser machines, over serial/USB or TCP.
//!
//! ## Architecture
//!
//! SmoothieKit is organized as a workspace:
//!
//! 1. **smoothiekit-core** - types, errors, state model, events, config
//! 2. **smoothiekit-driver** - transport, protocol, streaming core,
//!    driver task, sessions
//! 3. **smoothiekit** - this crate: re-exports and the CLI streamer
//!
//! ## Features
//!
//! - **Character-counting streaming**: programs flow as fast as the
//!   firmware's receive buffer allows, with self-tuning buffer size
//! - **Workflow control**: pause/resume/stop, M0/M1/M6 and `%wait`
//!   in-stream pauses, machine-error pause policy
//! - **Ad-hoc commands**: a feeder that shares the link with a running
//!   program without disturbing its flow control
//! - **Realtime queries**: status (`?`) and parser state (`$G`) on a
//!   250 ms tick with query masking and timeouts
//! - **Session fan-out**: typed controller events for any number of
//!   subscribed clients

pub use smoothiekit_core::{
    ConnectionError, ControllerError, ControllerSettings, DriverConfig, Error, HoldReason,
    MachineSnapshot, MachineState, MacroDef, ModalGroups, Position, Result, SessionEvent,
    SessionMessage, WorkflowState, CONTROLLER_TYPE,
};

pub use smoothiekit_driver::{
    list_ports, spawn, spawn_with, Command, CommandContext, Communicator, ConnectionDriver,
    ConnectionParams, ControllerRegistry, DriverHandle, SerialCommunicator, SerialPortInfo,
    SmoothieController, TcpCommunicator,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Console output on stderr, filterable through `RUST_LOG`.
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}
