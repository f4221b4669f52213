//! Controller event definitions
//!
//! Events fanned out from a controller to its subscribed client sessions.
//! Each event maps to a wire name; `controller:settings` and
//! `controller:state` are additionally delivered under their historical
//! `Smoothie:`-prefixed names for older clients.

use crate::state::WorkflowState;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event emitted by a controller to its sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// The link to the machine opened
    ConnectionOpen {
        /// Connection identity.
        ident: String,
    },
    /// The link to the machine closed
    ConnectionClose {
        /// Connection identity.
        ident: String,
    },
    /// The link reported an error
    ConnectionError {
        /// Connection identity.
        ident: String,
        /// Error description.
        error: String,
    },
    /// Link availability changed
    ConnectionChange {
        /// Connection identity.
        ident: String,
        /// Whether the link is now open.
        open: bool,
    },
    /// A raw line surfaced from the machine
    ConnectionRead {
        /// The raw line, without its trailing newline.
        raw: String,
    },
    /// Data written to the machine on behalf of a client
    ConnectionWrite {
        /// The written data, including any trailing newline.
        data: String,
    },
    /// Controller type announcement
    ControllerType {
        /// Always `"Smoothie"` for this driver.
        controller: String,
    },
    /// Firmware settings changed
    ControllerSettings {
        /// Settings snapshot as JSON.
        settings: Value,
    },
    /// Machine state snapshot changed
    ControllerState {
        /// State snapshot as JSON.
        state: Value,
    },
    /// Feeder progress report
    FeederStatus {
        /// Feeder status as JSON.
        status: Value,
    },
    /// Sender progress report
    SenderStatus {
        /// Sender status as JSON.
        status: Value,
    },
    /// A program was loaded into the sender
    SenderLoad {
        /// Program name.
        name: String,
        /// Program text as loaded, before the trailing dwell is appended.
        content: String,
    },
    /// The loaded program was removed
    SenderUnload,
    /// The workflow state machine transitioned
    WorkflowState {
        /// New workflow state.
        state: WorkflowState,
    },
}

impl SessionEvent {
    /// The event's wire name
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::ConnectionOpen { .. } => "connection:open",
            SessionEvent::ConnectionClose { .. } => "connection:close",
            SessionEvent::ConnectionError { .. } => "connection:error",
            SessionEvent::ConnectionChange { .. } => "connection:change",
            SessionEvent::ConnectionRead { .. } => "connection:read",
            SessionEvent::ConnectionWrite { .. } => "connection:write",
            SessionEvent::ControllerType { .. } => "controller:type",
            SessionEvent::ControllerSettings { .. } => "controller:settings",
            SessionEvent::ControllerState { .. } => "controller:state",
            SessionEvent::FeederStatus { .. } => "feeder:status",
            SessionEvent::SenderStatus { .. } => "sender:status",
            SessionEvent::SenderLoad { .. } => "sender:load",
            SessionEvent::SenderUnload => "sender:unload",
            SessionEvent::WorkflowState { .. } => "workflow:state",
        }
    }

    /// Historical alias delivered alongside the canonical name, if any
    pub fn legacy_name(&self) -> Option<&'static str> {
        match self {
            SessionEvent::ControllerSettings { .. } => Some("Smoothie:settings"),
            SessionEvent::ControllerState { .. } => Some("Smoothie:state"),
            _ => None,
        }
    }

    /// Short description for logging
    pub fn description(&self) -> String {
        match self {
            SessionEvent::ConnectionOpen { ident } => format!("connection open: {}", ident),
            SessionEvent::ConnectionClose { ident } => format!("connection close: {}", ident),
            SessionEvent::ConnectionError { ident, error } => {
                format!("connection error on {}: {}", ident, error)
            }
            SessionEvent::ConnectionChange { ident, open } => {
                format!("connection change: {} open={}", ident, open)
            }
            SessionEvent::ConnectionRead { raw } => format!("read: {}", raw),
            SessionEvent::ConnectionWrite { data } => format!("write: {}", data.trim_end()),
            SessionEvent::ControllerType { controller } => format!("controller: {}", controller),
            SessionEvent::ControllerSettings { .. } => "settings changed".to_string(),
            SessionEvent::ControllerState { .. } => "state changed".to_string(),
            SessionEvent::FeederStatus { .. } => "feeder status".to_string(),
            SessionEvent::SenderStatus { .. } => "sender status".to_string(),
            SessionEvent::SenderLoad { name, .. } => format!("program loaded: {}", name),
            SessionEvent::SenderUnload => "program unloaded".to_string(),
            SessionEvent::WorkflowState { state } => format!("workflow: {}", state),
        }
    }
}

/// An event paired with the wire name it is delivered under
///
/// Most events are delivered once, under [`SessionEvent::name`].
/// `controller:settings` and `controller:state` reach each session a
/// second time under their `Smoothie:`-prefixed alias, as a separate
/// message with the same payload.
#[derive(Debug, Clone)]
pub struct SessionMessage {
    /// Wire name for this delivery
    pub name: &'static str,
    /// The event payload
    pub event: SessionEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names() {
        let event = SessionEvent::ConnectionRead {
            raw: "ok".to_string(),
        };
        assert_eq!(event.name(), "connection:read");
        assert_eq!(event.legacy_name(), None);
    }

    #[test]
    fn legacy_duplicates_for_settings_and_state() {
        let settings = SessionEvent::ControllerSettings {
            settings: Value::Null,
        };
        assert_eq!(settings.legacy_name(), Some("Smoothie:settings"));

        let state = SessionEvent::ControllerState { state: Value::Null };
        assert_eq!(state.legacy_name(), Some("Smoothie:state"));
    }
}
