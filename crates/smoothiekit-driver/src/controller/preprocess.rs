//! Line preprocessing
//!
//! Transforms each raw program or feeder line before it reaches the wire:
//! strips `;` comments, handles `%` directives (`%wait` and variable
//! assignments), substitutes `[expr]` bracket expressions against the
//! evaluation context, and detects the pause words (M0/M1/M6) that drive
//! workflow holds.

use crate::controller::expr::{self, ExprError};
use regex::Regex;
use smoothiekit_core::MachineSnapshot;
use std::collections::HashMap;

/// The in-stream wait directive
pub const WAIT: &str = "%wait";

/// Dwell line substituted for `%wait`; a short `G4` drains the planner
/// queue so its `ok` marks true completion.
pub const WAIT_DWELL: &str = "G4 P0.5 (%wait)";

/// A value bound in the evaluation context
#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    /// Numeric variable, usable inside expressions
    Number(f64),
    /// Textual variable (modal words), substituted verbatim
    Text(String),
}

/// Variable bindings for expression evaluation and substitution
///
/// User variables assigned through `%name=expr` persist for the life of
/// the program; machine-derived variables are refreshed on every call.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    vars: HashMap<String, ContextValue>,
}

impl EvalContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a numeric variable
    pub fn set_number(&mut self, name: impl Into<String>, value: f64) {
        self.vars.insert(name.into(), ContextValue::Number(value));
    }

    /// Bind a textual variable
    pub fn set_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), ContextValue::Text(value.into()));
    }

    /// Look up a binding
    pub fn get(&self, name: &str) -> Option<&ContextValue> {
        self.vars.get(name)
    }

    /// Numeric view of a binding, parsing textual values when possible
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.vars.get(name)? {
            ContextValue::Number(value) => Some(*value),
            ContextValue::Text(text) => text.trim().parse::<f64>().ok(),
        }
    }

    fn default_number(&mut self, name: &str) {
        if !self.vars.contains_key(name) {
            self.set_number(name, 0.0);
        }
    }

    /// Refresh machine-derived variables from the latest snapshot
    ///
    /// Bounding-box variables keep any caller-provided value and default
    /// to zero. `coolant` is collapsed into newline-joined tokens so a
    /// substitution cannot put two words of one modal group on a line.
    pub fn populate(&mut self, snapshot: &MachineSnapshot) {
        for name in ["xmin", "xmax", "ymin", "ymax", "zmin", "zmax"] {
            self.default_number(name);
        }

        self.set_number("mposx", snapshot.mpos.x);
        self.set_number("mposy", snapshot.mpos.y);
        self.set_number("mposz", snapshot.mpos.z);
        self.set_number("mposa", snapshot.mpos.a);
        self.set_number("mposb", snapshot.mpos.b);
        self.set_number("mposc", snapshot.mpos.c);

        self.set_number("posx", snapshot.wpos.x);
        self.set_number("posy", snapshot.wpos.y);
        self.set_number("posz", snapshot.wpos.z);
        self.set_number("posa", snapshot.wpos.a);
        self.set_number("posb", snapshot.wpos.b);
        self.set_number("posc", snapshot.wpos.c);

        self.set_text("modal.motion", snapshot.modal.motion.clone());
        self.set_text("modal.wcs", snapshot.modal.wcs.clone());
        self.set_text("modal.plane", snapshot.modal.plane.clone());
        self.set_text("modal.units", snapshot.modal.units.clone());
        self.set_text("modal.distance", snapshot.modal.distance.clone());
        self.set_text("modal.feedrate", snapshot.modal.feedrate.clone());
        self.set_text("modal.program", snapshot.modal.program.clone());
        self.set_text("modal.spindle", snapshot.modal.spindle.clone());
        self.set_text("modal.coolant", snapshot.modal.coolant.join("\n"));

        self.set_number("tool", f64::from(snapshot.tool));
    }
}

/// An in-stream trigger detected while preprocessing a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseTrigger {
    /// `%wait` directive
    Wait,
    /// M0 program pause
    M0,
    /// M1 optional pause
    M1,
    /// M6 tool change
    M6,
}

impl PauseTrigger {
    /// The trigger word as it appears in hold reasons
    pub fn word(&self) -> &'static str {
        match self {
            PauseTrigger::Wait => WAIT,
            PauseTrigger::M0 => "M0",
            PauseTrigger::M1 => "M1",
            PauseTrigger::M6 => "M6",
        }
    }
}

/// Result of preprocessing one raw line
#[derive(Debug, Clone, PartialEq)]
pub struct Translated {
    /// The outbound line; empty lines are silently skipped by callers
    pub line: String,
    /// Triggers the caller must apply to its hold pipeline
    pub triggers: Vec<PauseTrigger>,
}

impl Translated {
    fn plain(line: String) -> Self {
        Self {
            line,
            triggers: Vec::new(),
        }
    }
}

/// Strip a `;` comment and surrounding whitespace
pub fn strip_comment(line: &str) -> &str {
    match line.split_once(';') {
        Some((code, _)) => code.trim(),
        None => line.trim(),
    }
}

/// The line preprocessor
pub struct Preprocessor {
    re_bracket: Regex,
}

impl Preprocessor {
    /// Create a preprocessor
    pub fn new() -> Self {
        Self {
            re_bracket: Regex::new(r"\[([^\[\]]+)\]").expect("bracket regex"),
        }
    }

    /// Transform one raw line against the context
    pub fn translate(&self, raw: &str, ctx: &mut EvalContext) -> Translated {
        let line = strip_comment(raw);
        if line.is_empty() {
            return Translated::plain(String::new());
        }

        if let Some(rest) = line.strip_prefix('%') {
            if line == WAIT {
                return Translated {
                    line: WAIT_DWELL.to_string(),
                    triggers: vec![PauseTrigger::Wait],
                };
            }
            self.apply_assignments(rest, ctx);
            return Translated::plain(String::new());
        }

        let substituted = self.substitute(line, ctx);
        let triggers = detect_pause_words(&substituted);
        Translated {
            line: substituted,
            triggers,
        }
    }

    fn apply_assignments(&self, text: &str, ctx: &mut EvalContext) {
        for assignment in text.split(',') {
            let Some((name, expr_text)) = assignment.split_once('=') else {
                tracing::warn!("Ignoring malformed directive: %{}", assignment.trim());
                continue;
            };
            let name = name.trim();
            match expr::evaluate(expr_text, &|id| ctx.number(id)) {
                Ok(value) => ctx.set_number(name, value),
                Err(err) => {
                    tracing::warn!("Failed to evaluate %{}={}: {}", name, expr_text.trim(), err);
                }
            }
        }
    }

    fn substitute(&self, line: &str, ctx: &EvalContext) -> String {
        self.re_bracket
            .replace_all(line, |caps: &regex::Captures<'_>| {
                let expr_text = &caps[1];
                if let Some(ContextValue::Text(text)) = ctx.get(expr_text.trim()) {
                    return text.clone();
                }
                match expr::evaluate(expr_text, &|id| ctx.number(id)) {
                    Ok(value) => format!("{}", value),
                    Err(err) => {
                        log_substitution_error(expr_text, &err);
                        String::new()
                    }
                }
            })
            .trim()
            .to_string()
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

fn log_substitution_error(expr_text: &str, err: &ExprError) {
    tracing::warn!("Failed to evaluate [{}]: {}", expr_text, err);
}

fn detect_pause_words(line: &str) -> Vec<PauseTrigger> {
    let mut triggers = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if !c.eq_ignore_ascii_case(&'m') {
            continue;
        }
        let mut digits = String::new();
        while let Some(&d) = chars.peek() {
            if d.is_ascii_digit() || d == '.' {
                digits.push(d);
                chars.next();
            } else {
                break;
            }
        }
        let Ok(value) = digits.parse::<f64>() else {
            continue;
        };
        if value == 0.0 {
            triggers.push(PauseTrigger::M0);
        } else if value == 1.0 {
            triggers.push(PauseTrigger::M1);
        } else if value == 6.0 {
            triggers.push(PauseTrigger::M6);
        }
    }

    triggers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_stripping_is_idempotent() {
        let once = strip_comment("G1 X1 ; move").to_string();
        assert_eq!(once, "G1 X1");
        assert_eq!(strip_comment(&once), once);
    }

    #[test]
    fn wait_becomes_dwell() {
        let pre = Preprocessor::new();
        let mut ctx = EvalContext::new();
        let out = pre.translate("%wait", &mut ctx);
        assert_eq!(out.line, WAIT_DWELL);
        assert_eq!(out.triggers, vec![PauseTrigger::Wait]);
    }

    #[test]
    fn wait_with_comment_becomes_dwell() {
        let pre = Preprocessor::new();
        let mut ctx = EvalContext::new();
        let out = pre.translate("%wait ; Wait for the planner to empty", &mut ctx);
        assert_eq!(out.line, WAIT_DWELL);
    }

    #[test]
    fn assignments_mutate_context() {
        let pre = Preprocessor::new();
        let mut ctx = EvalContext::new();
        let out = pre.translate("%depth=2.5, step=depth/5", &mut ctx);
        assert!(out.line.is_empty());
        assert_eq!(ctx.number("depth"), Some(2.5));
        assert_eq!(ctx.number("step"), Some(0.5));
    }

    #[test]
    fn bracket_substitution() {
        let pre = Preprocessor::new();
        let mut ctx = EvalContext::new();
        ctx.set_number("xmin", 10.0);
        let out = pre.translate("G0 X[xmin + 1] Y[2 * 3]", &mut ctx);
        assert_eq!(out.line, "G0 X11 Y6");
        assert!(out.triggers.is_empty());
    }

    #[test]
    fn failed_substitution_is_empty() {
        let pre = Preprocessor::new();
        let mut ctx = EvalContext::new();
        let out = pre.translate("G0 X[nope]", &mut ctx);
        assert_eq!(out.line, "G0 X");
    }

    #[test]
    fn textual_substitution() {
        let pre = Preprocessor::new();
        let mut ctx = EvalContext::new();
        ctx.set_text("modal.units", "G21");
        let out = pre.translate("[modal.units]", &mut ctx);
        assert_eq!(out.line, "G21");
    }

    #[test]
    fn detects_pause_words() {
        let pre = Preprocessor::new();
        let mut ctx = EvalContext::new();
        assert_eq!(pre.translate("M0", &mut ctx).triggers, vec![PauseTrigger::M0]);
        assert_eq!(pre.translate("m1", &mut ctx).triggers, vec![PauseTrigger::M1]);
        assert_eq!(pre.translate("M06 T2", &mut ctx).triggers, vec![PauseTrigger::M6]);
        assert!(pre.translate("M30", &mut ctx).triggers.is_empty());
        assert!(pre.translate("G1 X1", &mut ctx).triggers.is_empty());
    }

    #[test]
    fn populate_fills_machine_variables() {
        let mut ctx = EvalContext::new();
        let mut snapshot = MachineSnapshot::default();
        snapshot.mpos.x = 12.5;
        snapshot.wpos.z = -3.0;
        snapshot.modal.coolant = vec!["M7".to_string(), "M8".to_string()];
        ctx.populate(&snapshot);

        assert_eq!(ctx.number("mposx"), Some(12.5));
        assert_eq!(ctx.number("posz"), Some(-3.0));
        assert_eq!(ctx.number("xmin"), Some(0.0));
        assert_eq!(
            ctx.get("modal.coolant"),
            Some(&ContextValue::Text("M7\nM8".to_string()))
        );
    }
}
