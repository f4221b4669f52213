//! Machine and workflow state model
//!
//! Data types shared between the response parser and the streaming core:
//! machine state, positions, modal groups, the status snapshot with its
//! revision counters, and the controller-level workflow state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Machine state reported by Smoothieware status reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MachineState {
    /// No status report received yet
    #[default]
    Unknown,
    /// Machine is idle
    Idle,
    /// Machine is executing motion
    Run,
    /// Feed hold is active
    Hold,
    /// Safety door is open
    Door,
    /// Homing cycle in progress
    Home,
    /// Alarm lock
    Alarm,
    /// Check mode ($C)
    Check,
}

impl MachineState {
    /// Parse the machine-state token of a status report
    pub fn parse(token: &str) -> Self {
        match token {
            s if s.starts_with("Idle") => MachineState::Idle,
            s if s.starts_with("Run") => MachineState::Run,
            s if s.starts_with("Hold") => MachineState::Hold,
            s if s.starts_with("Door") => MachineState::Door,
            s if s.starts_with("Home") => MachineState::Home,
            s if s.starts_with("Alarm") => MachineState::Alarm,
            s if s.starts_with("Check") => MachineState::Check,
            _ => MachineState::Unknown,
        }
    }
}

impl std::fmt::Display for MachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineState::Unknown => write!(f, ""),
            MachineState::Idle => write!(f, "Idle"),
            MachineState::Run => write!(f, "Run"),
            MachineState::Hold => write!(f, "Hold"),
            MachineState::Door => write!(f, "Door"),
            MachineState::Home => write!(f, "Home"),
            MachineState::Alarm => write!(f, "Alarm"),
            MachineState::Check => write!(f, "Check"),
        }
    }
}

/// Six-axis position in machine or work coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// X axis
    pub x: f64,
    /// Y axis
    pub y: f64,
    /// Z axis
    pub z: f64,
    /// A axis (4th axis)
    pub a: f64,
    /// B axis (5th axis)
    pub b: f64,
    /// C axis (6th axis)
    pub c: f64,
}

impl Position {
    /// Build a position from up to six comma-separated coordinates
    pub fn from_coords(coords: &[f64]) -> Self {
        Self {
            x: coords.first().copied().unwrap_or(0.0),
            y: coords.get(1).copied().unwrap_or(0.0),
            z: coords.get(2).copied().unwrap_or(0.0),
            a: coords.get(3).copied().unwrap_or(0.0),
            b: coords.get(4).copied().unwrap_or(0.0),
            c: coords.get(5).copied().unwrap_or(0.0),
        }
    }
}

/// Active modal groups reported by `$G`
///
/// Defaults match the firmware's power-on state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModalGroups {
    /// Motion mode (G0, G1, G2, G3, G38.2, G80, ...)
    pub motion: String,
    /// Work coordinate system (G54..G59)
    pub wcs: String,
    /// Plane selection (G17, G18, G19)
    pub plane: String,
    /// Units (G20 inches, G21 millimeters)
    pub units: String,
    /// Distance mode (G90 absolute, G91 incremental)
    pub distance: String,
    /// Feed rate mode (G93 inverse time, G94 units per minute)
    pub feedrate: String,
    /// Program mode (M0, M1, M2, M30)
    pub program: String,
    /// Spindle state (M3, M4, M5)
    pub spindle: String,
    /// Active coolant modes (M7 and/or M8; empty when off)
    pub coolant: Vec<String>,
}

impl Default for ModalGroups {
    fn default() -> Self {
        Self {
            motion: "G0".to_string(),
            wcs: "G54".to_string(),
            plane: "G17".to_string(),
            units: "G21".to_string(),
            distance: "G90".to_string(),
            feedrate: "G94".to_string(),
            program: "M0".to_string(),
            spindle: "M5".to_string(),
            coolant: Vec::new(),
        }
    }
}

/// Receive-buffer numbers carried by a status report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferState {
    /// Planner blocks available
    pub planned: Option<u32>,
    /// Serial rx buffer bytes available
    pub rx: Option<u32>,
}

/// Snapshot of the machine as seen by the response parser
///
/// The streaming core reads this snapshot; the only fields it writes are
/// the optimistic `ov_f`/`ov_s` override values, which the next
/// authoritative status report overwrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSnapshot {
    /// Machine state from the latest status report
    pub machine_state: MachineState,
    /// Machine position
    pub mpos: Position,
    /// Work position
    pub wpos: Position,
    /// Modal groups from the latest `$G` reply
    pub modal: ModalGroups,
    /// Active tool number
    pub tool: u32,
    /// Feed rate override percentage
    pub ov_f: u32,
    /// Spindle override percentage
    pub ov_s: u32,
    /// Receive-buffer state, when the firmware reports it
    pub buf: Option<BufferState>,
}

impl Default for MachineSnapshot {
    fn default() -> Self {
        Self {
            machine_state: MachineState::Unknown,
            mpos: Position::default(),
            wpos: Position::default(),
            modal: ModalGroups::default(),
            tool: 0,
            ov_f: 100,
            ov_s: 100,
            buf: None,
        }
    }
}

/// Firmware settings as accumulated from `version` and parameter replies
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSettings {
    /// Raw firmware build/version line
    pub version: Option<String>,
    /// Named parameters reported by the firmware (`$#` output and friends)
    pub parameters: BTreeMap<String, String>,
}

/// Controller-level job lifecycle, distinct from the firmware machine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    /// No program running
    #[default]
    Idle,
    /// Streaming a loaded program
    Running,
    /// Program streaming suspended
    Paused,
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowState::Idle => write!(f, "idle"),
            WorkflowState::Running => write!(f, "running"),
            WorkflowState::Paused => write!(f, "paused"),
        }
    }
}

/// Why a sender, feeder, or workflow hold was engaged
///
/// Serializes to `{"data": ...}` for in-stream pause triggers and to
/// `{"err": ...}` for machine-reported errors, matching the wire payloads
/// clients already understand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldReason {
    /// An in-stream trigger (`%wait`, `M0`, `M1`, `M6`)
    #[serde(rename = "data")]
    Data(String),
    /// A machine-reported error line
    #[serde(rename = "err")]
    Err(String),
}

impl HoldReason {
    /// The trigger word or error text
    pub fn text(&self) -> &str {
        match self {
            HoldReason::Data(s) => s,
            HoldReason::Err(s) => s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_state_parses_prefixes() {
        assert_eq!(MachineState::parse("Idle"), MachineState::Idle);
        assert_eq!(MachineState::parse("Hold:0"), MachineState::Hold);
        assert_eq!(MachineState::parse("Alarm"), MachineState::Alarm);
        assert_eq!(MachineState::parse("???"), MachineState::Unknown);
    }

    #[test]
    fn hold_reason_wire_shape() {
        let data = serde_json::to_value(HoldReason::Data("M0".to_string())).unwrap();
        assert_eq!(data, serde_json::json!({ "data": "M0" }));

        let err = serde_json::to_value(HoldReason::Err("error: Alarm lock".to_string())).unwrap();
        assert_eq!(err, serde_json::json!({ "err": "error: Alarm lock" }));
    }

    #[test]
    fn snapshot_defaults() {
        let snapshot = MachineSnapshot::default();
        assert_eq!(snapshot.ov_f, 100);
        assert_eq!(snapshot.ov_s, 100);
        assert_eq!(snapshot.modal.wcs, "G54");
    }
}
