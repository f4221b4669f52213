//! Status report and parser-state payload parsing
//!
//! Smoothieware status reports come in two shapes depending on firmware
//! age: pipe-separated (`<Idle|MPos:0,0,0|WPos:0,0,0|F:0.,100.>`) and
//! comma-separated (`<Idle,MPos:0,0,0,WPos:0,0,0>`). Field extraction
//! tokenizes on `name:value[,value...]` groups so both shapes parse the
//! same way.

use regex::Regex;
use smoothiekit_core::state::{BufferState, MachineState, ModalGroups, Position};

/// Parsed `?` status report
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusReport {
    /// Machine state token
    pub machine_state: MachineState,
    /// Machine position, when reported
    pub mpos: Option<Position>,
    /// Work position, when reported
    pub wpos: Option<Position>,
    /// Current feed rate
    pub feedrate: Option<f64>,
    /// Feed override percentage (second value of `F:`)
    pub ov_f: Option<u32>,
    /// Current spindle value
    pub spindle: Option<f64>,
    /// Spindle override percentage (second value of `S:`)
    pub ov_s: Option<u32>,
    /// Receive-buffer state (`Buf:`/`RX:` fields)
    pub buf: Option<BufferState>,
}

/// Parsed `$G` parser-state report
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParserState {
    /// Active modal groups
    pub modal: ModalGroups,
    /// Active tool
    pub tool: Option<u32>,
    /// Programmed feed rate
    pub feedrate: Option<f64>,
    /// Programmed spindle value
    pub spindle: Option<f64>,
}

pub(crate) fn status_field_regex() -> Regex {
    // One machine-state token or one name:value[,value...] group; value
    // lists never exceed the six axes.
    Regex::new(r"[A-Za-z]+(:[0-9.\-]+(,[0-9.\-]+){0,5})?").expect("status field regex")
}

/// Parse the inner text of a `<...>` status report
pub fn parse_status(inner: &str, field_re: &Regex) -> StatusReport {
    let mut report = StatusReport::default();
    let mut fields = field_re.find_iter(inner);

    if let Some(state) = fields.next() {
        let token = state.as_str().split(':').next().unwrap_or("");
        report.machine_state = MachineState::parse(token);
    }

    for field in fields {
        let Some((name, values)) = field.as_str().split_once(':') else {
            continue;
        };
        let values: Vec<f64> = values
            .split(',')
            .filter_map(|v| v.trim().parse::<f64>().ok())
            .collect();
        match name {
            "MPos" => report.mpos = Some(Position::from_coords(&values)),
            "WPos" => report.wpos = Some(Position::from_coords(&values)),
            "F" => {
                report.feedrate = values.first().copied();
                report.ov_f = values.get(1).map(|v| v.round() as u32);
            }
            "S" => {
                report.spindle = values.first().copied();
                report.ov_s = values.get(1).map(|v| v.round() as u32);
            }
            "Buf" => {
                let buf = report.buf.get_or_insert_with(BufferState::default);
                buf.planned = values.first().map(|v| v.round() as u32);
                if let Some(rx) = values.get(1) {
                    buf.rx = Some(rx.round() as u32);
                }
            }
            "RX" => {
                let buf = report.buf.get_or_insert_with(BufferState::default);
                buf.rx = values.first().map(|v| v.round() as u32);
            }
            _ => {}
        }
    }

    report
}

/// Parse the word list of a `[...]` parser-state report
pub fn parse_parser_state(words: &str) -> ParserState {
    let mut state = ParserState::default();

    for word in words.split_whitespace() {
        let mut chars = word.chars();
        let Some(letter) = chars.next() else { continue };
        let value_text = chars.as_str();
        let Ok(value) = value_text.parse::<f64>() else {
            continue;
        };
        match letter.to_ascii_uppercase() {
            'G' => apply_g_word(&mut state.modal, value),
            'M' => apply_m_word(&mut state.modal, value),
            'T' => state.tool = Some(value.round() as u32),
            'F' => state.feedrate = Some(value),
            'S' => state.spindle = Some(value),
            _ => {}
        }
    }

    state
}

fn format_word(letter: char, value: f64) -> String {
    format!("{}{}", letter, value)
}

fn apply_g_word(modal: &mut ModalGroups, value: f64) {
    let word = format_word('G', value);
    if [0.0, 1.0, 2.0, 3.0, 38.2, 38.3, 38.4, 38.5, 80.0].contains(&value) {
        modal.motion = word;
    } else if (54.0..=59.0).contains(&value) {
        modal.wcs = word;
    } else if [17.0, 18.0, 19.0].contains(&value) {
        modal.plane = word;
    } else if [20.0, 21.0].contains(&value) {
        modal.units = word;
    } else if [90.0, 91.0].contains(&value) {
        modal.distance = word;
    } else if [93.0, 94.0].contains(&value) {
        modal.feedrate = word;
    }
}

fn apply_m_word(modal: &mut ModalGroups, value: f64) {
    let word = format_word('M', value);
    if [0.0, 1.0, 2.0, 30.0].contains(&value) {
        modal.program = word;
    } else if [3.0, 4.0, 5.0].contains(&value) {
        modal.spindle = word;
    } else if [7.0, 8.0].contains(&value) {
        if !modal.coolant.contains(&word) {
            modal.coolant.push(word);
        }
    } else if value == 9.0 {
        modal.coolant.clear();
    }
}
