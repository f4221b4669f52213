//! Error handling for SmoothieKit
//!
//! Provides error types for the two layers of the driver:
//! - Connection errors (transport open/close/write)
//! - Controller errors (state machine, program, dispatcher)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Represents errors related to the byte-stream link to the machine,
/// covering serial ports and TCP sockets alike.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// Failed to open the link
    #[error("Failed to open {port}: {reason}")]
    FailedToOpen {
        /// The port or address that failed to open.
        port: String,
        /// The reason the link failed to open.
        reason: String,
    },

    /// The link is not open
    #[error("Connection is not open")]
    NotOpen,

    /// The link was lost unexpectedly
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the link was lost.
        reason: String,
    },

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },

    /// I/O error on the link
    #[error("I/O error: {reason}")]
    Io {
        /// The underlying I/O failure.
        reason: String,
    },
}

/// Controller error type
///
/// Represents errors raised by the streaming core and the command
/// dispatcher.
#[derive(Error, Debug, Clone)]
pub enum ControllerError {
    /// A program failed validation on load
    #[error("Invalid program: {reason}")]
    InvalidProgram {
        /// The reason the program was rejected.
        reason: String,
    },

    /// A macro id could not be resolved from configuration
    #[error("Macro not found: {id}")]
    MacroNotFound {
        /// The macro id that was requested.
        id: String,
    },
}

/// Main error type for SmoothieKit
///
/// A unified error type that can represent any error from both layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
