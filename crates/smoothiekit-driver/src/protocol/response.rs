//! Response classification
//!
//! Buffers inbound bytes until newline and classifies each complete line
//! into a typed response. Partial lines are kept across calls; the
//! classifier itself is stateless.

use crate::protocol::status::{
    parse_parser_state, parse_status, status_field_regex, ParserState, StatusReport,
};
use regex::Regex;

/// A classified response from the machine
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// `<...>` status report
    Status(StatusReport),
    /// `ok` acknowledgement
    Ok,
    /// `error: ...` acknowledgement
    Error(String),
    /// `ALARM: ...` or `HALTED ...` condition
    Alarm(String),
    /// `[G0 G54 ...]` parser state
    ParserState(ParserState),
    /// `[G54:...]`-style parameter line
    Parameter {
        /// Parameter name (G54..G59, G28, G30, G92, TLO, PRB).
        name: String,
        /// Raw value text.
        value: String,
    },
    /// `version` command reply
    Version(String),
    /// Anything else the firmware prints
    Other,
}

/// One complete line together with its classification
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    /// The raw line without its trailing newline
    pub raw: String,
    /// The classification
    pub response: Response,
}

/// Streaming line classifier for the Smoothieware console protocol
pub struct ResponseParser {
    buffer: String,
    re_status: Regex,
    re_status_field: Regex,
    re_error: Regex,
    re_alarm: Regex,
    re_parser_state: Regex,
    re_parameter: Regex,
}

impl ResponseParser {
    /// Create a parser with an empty line buffer
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            re_status: Regex::new(r"^<(.+)>$").expect("status regex"),
            re_status_field: status_field_regex(),
            re_error: Regex::new(r"(?i)^error:\s*(.*)$").expect("error regex"),
            re_alarm: Regex::new(r"(?i)^alarm:\s*(.*)$").expect("alarm regex"),
            re_parser_state: Regex::new(r"^\[((?:[A-Za-z][0-9]+(?:\.[0-9]*)?\s*)+)\]$")
                .expect("parser state regex"),
            re_parameter: Regex::new(
                r"^\[(G5[4-9](?:\.[1-3])?|G28|G30|G92|TLO|PRB):(.+)\]$",
            )
            .expect("parameter regex"),
        }
    }

    /// Append inbound bytes, returning every line completed by them
    ///
    /// Bytes after the last newline stay buffered for the next call.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<ParsedLine> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']).trim();
            if line.is_empty() {
                continue;
            }
            lines.push(self.classify(line));
        }
        lines
    }

    /// Drop any buffered partial line
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Classify a single complete line
    pub fn classify(&self, line: &str) -> ParsedLine {
        let raw = line.to_string();

        if let Some(caps) = self.re_status.captures(line) {
            let report = parse_status(&caps[1], &self.re_status_field);
            return ParsedLine {
                raw,
                response: Response::Status(report),
            };
        }

        if line.eq_ignore_ascii_case("ok") {
            return ParsedLine {
                raw,
                response: Response::Ok,
            };
        }

        if let Some(caps) = self.re_error.captures(line) {
            return ParsedLine {
                raw,
                response: Response::Error(caps[1].trim().to_string()),
            };
        }

        if let Some(caps) = self.re_alarm.captures(line) {
            return ParsedLine {
                raw,
                response: Response::Alarm(caps[1].trim().to_string()),
            };
        }
        if line.starts_with("HALTED") {
            return ParsedLine {
                raw: raw.clone(),
                response: Response::Alarm(raw),
            };
        }

        if let Some(caps) = self.re_parameter.captures(line) {
            return ParsedLine {
                raw,
                response: Response::Parameter {
                    name: caps[1].to_string(),
                    value: caps[2].to_string(),
                },
            };
        }

        if let Some(caps) = self.re_parser_state.captures(line) {
            let state = parse_parser_state(&caps[1]);
            return ParsedLine {
                raw,
                response: Response::ParserState(state),
            };
        }

        if line.starts_with("Build version:") {
            return ParsedLine {
                raw: raw.clone(),
                response: Response::Version(raw),
            };
        }

        ParsedLine {
            raw,
            response: Response::Other,
        }
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smoothiekit_core::MachineState;

    #[test]
    fn buffers_partial_lines() {
        let mut parser = ResponseParser::new();
        assert!(parser.push(b"o").is_empty());
        let lines = parser.push(b"k\r\n<Idle|MPos:0,0,0|WPos:0,0,0>\n");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].response, Response::Ok);
        assert!(matches!(lines[1].response, Response::Status(_)));
    }

    #[test]
    fn classifies_error_and_alarm() {
        let parser = ResponseParser::new();
        assert_eq!(
            parser.classify("error: Unsupported command").response,
            Response::Error("Unsupported command".to_string())
        );
        assert_eq!(
            parser.classify("ALARM: Hard limit").response,
            Response::Alarm("Hard limit".to_string())
        );
        assert!(matches!(
            parser
                .classify("HALTED, M999 or $X to exit HALT state")
                .response,
            Response::Alarm(_)
        ));
    }

    #[test]
    fn classifies_parser_state() {
        let parser = ResponseParser::new();
        let parsed = parser.classify("[G0 G54 G17 G21 G90 G94 M0 M5 M9 T0 F0. S0.]");
        match parsed.response {
            Response::ParserState(state) => assert_eq!(state.modal.units, "G21"),
            other => panic!("expected parser state, got {:?}", other),
        }
    }

    #[test]
    fn classifies_parameter_lines() {
        let parser = ResponseParser::new();
        let parsed = parser.classify("[G54:0.000,0.000,0.000]");
        assert_eq!(
            parsed.response,
            Response::Parameter {
                name: "G54".to_string(),
                value: "0.000,0.000,0.000".to_string(),
            }
        );
    }

    #[test]
    fn classifies_version() {
        let parser = ResponseParser::new();
        let raw = "Build version: edge-3332e7f, Build date: Oct 10 2017, MCU: LPC1769, System Clock: 120MHz";
        assert_eq!(parser.classify(raw).response, Response::Version(raw.to_string()));
    }

    #[test]
    fn status_machine_state_round_trip() {
        let parser = ResponseParser::new();
        let parsed = parser.classify("<Run|MPos:1,2,3|WPos:0,0,0>");
        match parsed.response {
            Response::Status(report) => assert_eq!(report.machine_state, MachineState::Run),
            other => panic!("expected status, got {:?}", other),
        }
    }

    #[test]
    fn unknown_lines_are_other() {
        let parser = ResponseParser::new();
        assert_eq!(parser.classify("Smoothie command parser").response, Response::Other);
    }
}
