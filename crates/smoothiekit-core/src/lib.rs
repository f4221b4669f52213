//! # SmoothieKit Core
//!
//! Core types for the SmoothieKit machine driver: error handling, the
//! machine/workflow state model, session event definitions, and driver
//! configuration. This crate performs no I/O; everything here is plain
//! data shared between the driver and its embedders.

pub mod config;
pub mod error;
pub mod event;
pub mod state;

pub use config::{DriverConfig, ExceptionConfig, MacroDef};
pub use error::{ConnectionError, ControllerError, Error, Result};
pub use event::{SessionEvent, SessionMessage};
pub use state::{
    BufferState, ControllerSettings, HoldReason, MachineSnapshot, MachineState, ModalGroups,
    Position, WorkflowState,
};

/// Controller type identifier announced to sessions
pub const CONTROLLER_TYPE: &str = "Smoothie";
