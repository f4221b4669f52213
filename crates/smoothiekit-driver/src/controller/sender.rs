//! Character-counting program sender
//!
//! Streams a loaded program under character-counting flow control: the
//! sender keeps an account of the bytes occupying the firmware's receive
//! buffer and releases the next line only when it fits. Every `ok`/`error`
//! acknowledges the oldest in-flight line and frees its bytes.
//!
//! The sender owns only the accounting; preprocessing and transport writes
//! are driven by the controller, which asks `peek`/`fits` and then either
//! `skip_line` (blank output) or `enqueue_sent` (line released to the
//! wire).

use serde_json::{json, Value};
use smoothiekit_core::HoldReason;
use std::collections::VecDeque;
use std::time::Instant;

/// Default receive-buffer budget: 128 bytes less an 8-byte safety margin.
pub const DEFAULT_BUFFER_SIZE: usize = 120;

/// An in-flight line awaiting acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    /// Index of the line in the program
    pub index: usize,
    /// Byte length of the line, excluding its newline
    pub bytes: usize,
}

/// The program sender
#[derive(Debug)]
pub struct Sender {
    name: Option<String>,
    lines: Vec<String>,
    total: usize,
    sent: usize,
    received: usize,
    hold: bool,
    hold_reason: Option<HoldReason>,
    buffer_size: usize,
    data_length: usize,
    queue: VecDeque<Pending>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
}

impl Sender {
    /// Create an unloaded sender
    pub fn new() -> Self {
        Self {
            name: None,
            lines: Vec::new(),
            total: 0,
            sent: 0,
            received: 0,
            hold: false,
            hold_reason: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            data_length: 0,
            queue: VecDeque::new(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Assign a program, replacing any previous one
    pub fn load(&mut self, name: impl Into<String>, content: &str) {
        self.name = Some(name.into());
        self.lines = content
            .split('\n')
            .map(|l| l.trim_end_matches('\r').to_string())
            .collect();
        self.total = self.lines.len();
        self.rewind();
        self.started_at = None;
    }

    /// Drop the loaded program
    pub fn unload(&mut self) {
        self.name = None;
        self.lines.clear();
        self.total = 0;
        self.rewind();
        self.started_at = None;
    }

    /// Whether a program is loaded
    pub fn is_loaded(&self) -> bool {
        self.name.is_some()
    }

    /// Reset progress while keeping the program
    pub fn rewind(&mut self) {
        self.sent = 0;
        self.received = 0;
        self.hold = false;
        self.hold_reason = None;
        self.queue.clear();
        self.data_length = 0;
        self.finished_at = None;
    }

    /// Capture the start time and mark the program unfinished
    pub fn start(&mut self, now: Instant) {
        self.started_at = Some(now);
        self.finished_at = None;
    }

    /// Freeze transmission; acknowledgement accounting continues
    pub fn hold(&mut self, reason: Option<HoldReason>) {
        self.hold = true;
        self.hold_reason = reason;
    }

    /// Re-enable transmission
    pub fn unhold(&mut self) {
        self.hold = false;
        self.hold_reason = None;
    }

    /// The next program line to transmit, if any
    pub fn peek(&self) -> Option<&str> {
        self.lines.get(self.sent).map(|s| s.as_str())
    }

    /// Program line by index
    pub fn line_at(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(|s| s.as_str())
    }

    /// Whether a line of `line_len` bytes may be transmitted now
    ///
    /// A line too large for the buffer on its own is still permitted when
    /// nothing is in flight; it is then the only line outstanding.
    pub fn fits(&self, line_len: usize) -> bool {
        self.queue.is_empty() || self.data_length + line_len + 1 <= self.buffer_size
    }

    /// Advance past a line whose preprocessed form was empty
    pub fn skip_line(&mut self) {
        self.sent += 1;
        self.received += 1;
    }

    /// Account for a line released to the wire
    pub fn enqueue_sent(&mut self, bytes: usize) {
        self.queue.push_back(Pending {
            index: self.sent,
            bytes,
        });
        self.data_length += bytes;
        self.sent += 1;
    }

    /// Acknowledge the oldest in-flight line
    ///
    /// Returns the dequeued entry, or `None` when nothing was in flight.
    pub fn ack(&mut self) -> Option<Pending> {
        let pending = self.queue.pop_front()?;
        self.data_length -= pending.bytes;
        self.received += 1;
        Some(pending)
    }

    /// Whether every line has been received and nothing is in flight
    pub fn at_end(&self) -> bool {
        self.is_loaded() && self.received >= self.total && self.queue.is_empty()
    }

    /// Record completion
    pub fn finish(&mut self, now: Instant) {
        self.finished_at = Some(now);
    }

    /// Raise the buffer budget from a firmware-reported rx size
    ///
    /// Only grows; the default remains the floor.
    pub fn tune_buffer_size(&mut self, candidate: usize) {
        self.buffer_size = self.buffer_size.max(candidate);
    }

    /// Program name
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Total line count
    pub fn total(&self) -> usize {
        self.total
    }

    /// Lines dispatched (sent or skipped)
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// Lines completed
    pub fn received(&self) -> usize {
        self.received
    }

    /// Whether transmission is frozen
    pub fn is_holding(&self) -> bool {
        self.hold
    }

    /// The reason for the current hold, if any
    pub fn hold_reason(&self) -> Option<&HoldReason> {
        self.hold_reason.as_ref()
    }

    /// Bytes currently occupying the firmware buffer
    pub fn data_length(&self) -> usize {
        self.data_length
    }

    /// Current buffer budget
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of in-flight lines
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// When streaming started
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// When streaming finished
    pub fn finished_at(&self) -> Option<Instant> {
        self.finished_at
    }

    /// JSON progress report for sessions
    pub fn status(&self, now: Instant) -> Value {
        let elapsed_ms = self
            .started_at
            .map(|t| now.saturating_duration_since(t).as_millis() as u64);
        json!({
            "sp": {
                "type": "char-counting",
                "bufferSize": self.buffer_size,
                "dataLength": self.data_length,
                "queue": self.queue.len(),
            },
            "name": &self.name,
            "total": self.total,
            "sent": self.sent,
            "received": self.received,
            "hold": self.hold,
            "holdReason": &self.hold_reason,
            "elapsedTime": elapsed_ms,
            "finished": self.finished_at.is_some(),
        })
    }
}

impl Default for Sender {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded_sender(lines: &[&str]) -> Sender {
        let mut sender = Sender::new();
        sender.load("test.nc", &lines.join("\n"));
        sender
    }

    #[test]
    fn load_then_unload_restores_initial_state() {
        let mut sender = loaded_sender(&["G1 X1", "G1 X2"]);
        assert!(sender.is_loaded());
        assert_eq!(sender.total(), 2);

        sender.unload();
        assert!(!sender.is_loaded());
        assert_eq!(sender.total(), 0);
        assert_eq!(sender.sent(), 0);
        assert_eq!(sender.received(), 0);
        assert_eq!(sender.data_length(), 0);
        assert_eq!(sender.queue_len(), 0);
    }

    #[test]
    fn counters_obey_invariants() {
        let mut sender = loaded_sender(&["G1 X1", "", "G1 X2"]);

        let line = sender.peek().unwrap().to_string();
        assert!(sender.fits(line.len()));
        sender.enqueue_sent(line.len());
        sender.skip_line();

        assert!(sender.received() <= sender.sent());
        assert!(sender.sent() <= sender.total());
        assert_eq!(sender.data_length(), line.len());

        sender.ack();
        assert_eq!(sender.data_length(), 0);
        assert_eq!(sender.received(), 2);
    }

    #[test]
    fn flow_control_gate() {
        let mut sender = loaded_sender(&["a", "b", "c"]);
        sender.tune_buffer_size(0);
        assert_eq!(sender.buffer_size(), DEFAULT_BUFFER_SIZE);

        // Fill close to the budget.
        sender.enqueue_sent(100);
        assert!(sender.fits(19)); // 100 + 19 + 1 == 120
        assert!(!sender.fits(20)); // 100 + 20 + 1 > 120

        sender.ack();
        assert!(sender.fits(119));
    }

    #[test]
    fn oversize_line_allowed_when_queue_empty() {
        let mut sender = loaded_sender(&["x"]);
        assert!(sender.fits(DEFAULT_BUFFER_SIZE + 50));

        sender.enqueue_sent(DEFAULT_BUFFER_SIZE + 50);
        assert!(!sender.fits(1));
        sender.ack();
        assert!(sender.fits(1));
    }

    #[test]
    fn rewind_preserves_lines() {
        let mut sender = loaded_sender(&["G1 X1", "G1 X2"]);
        sender.enqueue_sent(5);
        sender.hold(Some(HoldReason::Data("M0".to_string())));

        sender.rewind();
        assert_eq!(sender.sent(), 0);
        assert_eq!(sender.received(), 0);
        assert!(!sender.is_holding());
        assert_eq!(sender.queue_len(), 0);
        assert_eq!(sender.data_length(), 0);
        assert_eq!(sender.total(), 2);
        assert_eq!(sender.peek(), Some("G1 X1"));
    }

    #[test]
    fn buffer_tuning_is_monotonic() {
        let mut sender = Sender::new();
        sender.tune_buffer_size(192);
        assert_eq!(sender.buffer_size(), 192);
        sender.tune_buffer_size(92);
        assert_eq!(sender.buffer_size(), 192);
    }

    #[test]
    fn end_detection() {
        let mut sender = loaded_sender(&["G1 X1"]);
        assert!(!sender.at_end());
        sender.enqueue_sent(5);
        assert!(!sender.at_end());
        sender.ack();
        assert!(sender.at_end());
    }

    #[test]
    fn hold_freezes_nothing_but_transmission() {
        let mut sender = loaded_sender(&["G1 X1", "G1 X2"]);
        sender.enqueue_sent(5);
        sender.hold(Some(HoldReason::Data("%wait".to_string())));
        assert!(sender.is_holding());

        // Acks keep working under hold.
        sender.ack();
        assert_eq!(sender.received(), 1);
        assert_eq!(sender.hold_reason().unwrap().text(), "%wait");
    }
}
