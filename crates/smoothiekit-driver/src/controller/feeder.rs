//! Ad-hoc command feeder
//!
//! A FIFO of one-shot command lines fed outside the loaded program. The
//! feeder shares the link with the sender but bypasses program flow
//! control: one line is in flight at a time, released on each
//! acknowledgement. Pause words hold the feeder itself rather than the
//! workflow.

use serde_json::{json, Value};
use smoothiekit_core::HoldReason;
use std::collections::VecDeque;

/// The command feeder
#[derive(Debug, Default)]
pub struct Feeder {
    queue: VecDeque<String>,
    hold: bool,
    hold_reason: Option<HoldReason>,
    pending: bool,
}

impl Feeder {
    /// Create an empty feeder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append lines to the queue
    pub fn feed<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for line in lines {
            self.queue.push_back(line.into());
        }
    }

    /// Take the next queued line
    pub fn pop(&mut self) -> Option<String> {
        self.queue.pop_front()
    }

    /// Whether a line may be released now
    pub fn can_send(&self) -> bool {
        !self.hold && !self.pending
    }

    /// Whether a line is in flight awaiting acknowledgement
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Mark a line as released to the wire
    pub fn set_pending(&mut self) {
        self.pending = true;
    }

    /// Acknowledge the in-flight line
    pub fn ack(&mut self) {
        self.pending = false;
    }

    /// Freeze the queue
    pub fn hold(&mut self, reason: Option<HoldReason>) {
        self.hold = true;
        self.hold_reason = reason;
    }

    /// Unfreeze the queue
    pub fn unhold(&mut self) {
        self.hold = false;
        self.hold_reason = None;
    }

    /// Whether the queue is frozen
    pub fn is_holding(&self) -> bool {
        self.hold
    }

    /// The reason for the current hold, if any
    pub fn hold_reason(&self) -> Option<&HoldReason> {
        self.hold_reason.as_ref()
    }

    /// Drop the queue and clear hold/pending
    pub fn reset(&mut self) {
        self.queue.clear();
        self.hold = false;
        self.hold_reason = None;
        self.pending = false;
    }

    /// Number of queued lines
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Whether there is anything worth reporting to sessions
    pub fn has_work(&self) -> bool {
        !self.queue.is_empty() || self.pending
    }

    /// JSON progress report for sessions
    pub fn status(&self) -> Value {
        json!({
            "queue": self.queue.len(),
            "pending": self.pending,
            "hold": self.hold,
            "holdReason": &self.hold_reason,
        })
    }
}
