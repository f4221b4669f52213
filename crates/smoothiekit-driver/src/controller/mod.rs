//! Smoothieware controller
//!
//! The streaming core: owns the link, the response parser, the sender,
//! feeder, and workflow state machines, and the realtime query masks. All
//! state lives on the driver task; inputs are inbound bytes, the 250 ms
//! tick, and dispatcher commands.

pub mod expr;
pub mod feeder;
pub mod preprocess;
pub mod sender;
pub mod workflow;

use self::feeder::Feeder;
use self::preprocess::{EvalContext, PauseTrigger, Preprocessor, WAIT};
use self::sender::Sender;
use self::workflow::Workflow;
use crate::protocol::{ParsedLine, Response, ResponseParser, StatusReport};
use crate::session::SessionRegistry;
use crate::transport::{Communicator, ConnectionParams};
use serde_json::Value;
use smoothiekit_core::{
    ControllerError, ControllerSettings, DriverConfig, Error, HoldReason, MachineSnapshot,
    MachineState, Position, Result, SessionEvent, SessionMessage, WorkflowState, CONTROLLER_TYPE,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Cadence of the controller tick
pub const TICK_INTERVAL: Duration = Duration::from_millis(250);
/// Bootloader settle time before the `version` handshake
pub const BOOT_DELAY: Duration = Duration::from_millis(1000);
/// Delay between the `version` query and readiness
pub const VERSION_SETTLE: Duration = Duration::from_millis(50);

const STATUS_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const PARSER_STATE_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
const PARSER_STATE_THROTTLE: Duration = Duration::from_millis(500);
const FINISH_IDLE_WINDOW: Duration = Duration::from_millis(500);
const RX_BUFFER_MARGIN: u32 = 8;

/// Trailer appended to every loaded program; the dwell's `ok` arrives only
/// once the planner queue has drained, which marks true completion.
const WAIT_TRAILER: &str = "%wait ; Wait for the planner to empty";

/// Realtime single-byte commands, written without a newline
const REALTIME_COMMANDS: [&str; 4] = ["?", "!", "~", "\u{18}"];

/// Caller-supplied variables merged into the evaluation context
pub type CommandContext = HashMap<String, f64>;

/// Commands accepted by the dispatcher
#[derive(Debug, Clone)]
pub enum Command {
    /// Load a program into the sender
    SenderLoad {
        /// Program name.
        name: String,
        /// Program text.
        gcode: String,
        /// Caller variables (bounding box and friends).
        context: Option<CommandContext>,
    },
    /// Drop the loaded program
    SenderUnload,
    /// Start streaming the loaded program
    SenderStart,
    /// Stop streaming
    SenderStop,
    /// Pause streaming
    SenderPause,
    /// Resume streaming
    SenderResume,
    /// Release the feeder hold and continue feeding
    FeederStart,
    /// Drop all queued feeder lines
    FeederStop,
    /// Realtime feed hold (`!`)
    FeedHold,
    /// Realtime cycle start (`~`)
    CycleStart,
    /// Run the homing cycle
    Homing,
    /// Clear an alarm lock
    Unlock,
    /// Firmware reset (Ctrl-X)
    Reset,
    /// Sleep; not supported by Smoothieware
    Sleep,
    /// Adjust the feed override by a signed delta; zero resets to 100%
    FeedOverride {
        /// Signed percentage delta.
        delta: i32,
    },
    /// Adjust the spindle override by a signed delta; zero resets to 100%
    SpindleOverride {
        /// Signed percentage delta.
        delta: i32,
    },
    /// Rapid override; not supported by Smoothieware
    RapidOverride,
    /// Laser test fire
    LaserTest {
        /// Laser power (`fire` argument); zero turns the laser off.
        power: f64,
        /// Burn duration in milliseconds; zero keeps firing.
        duration_ms: u64,
    },
    /// Feed ad-hoc G-code through the feeder
    Gcode {
        /// One or more newline-separated commands.
        commands: String,
        /// Caller variables.
        context: Option<CommandContext>,
    },
    /// Run a configured macro through the feeder
    MacroRun {
        /// Macro id.
        id: String,
    },
    /// Load a configured macro into the sender
    MacroLoad {
        /// Macro id.
        id: String,
    },
    /// Load a file from the watch directory into the sender
    WatchdirLoad {
        /// File name relative to the watch directory.
        file: String,
    },
    /// Write raw data to the machine on behalf of a client
    Write {
        /// Data to write; realtime bytes go out as-is, anything else gets
        /// a trailing newline.
        data: String,
    },
}

#[derive(Debug, Default)]
struct ActionMask {
    query_parser_state_state: bool,
    query_parser_state_reply: bool,
    query_status_report: bool,
    reply_parser_state: bool,
    reply_status_report: bool,
}

#[derive(Debug, Default)]
struct ActionTime {
    query_parser_state: Option<Instant>,
    query_status_report: Option<Instant>,
    sender_finish: Option<Instant>,
}

/// The Smoothieware controller core
///
/// Single-threaded: every method takes `&mut self` and is invoked from the
/// driver task (or directly from tests). Time is always passed in, never
/// sampled, so behavior is reproducible.
pub struct SmoothieController {
    params: ConnectionParams,
    connection: Box<dyn Communicator>,
    parser: ResponseParser,
    preprocessor: Preprocessor,
    context: EvalContext,
    config: DriverConfig,

    snapshot: MachineSnapshot,
    snapshot_rev: u64,
    settings: ControllerSettings,
    settings_rev: u64,
    emitted_snapshot_rev: u64,
    emitted_settings_rev: u64,
    tick_wpos: Position,

    sender: Sender,
    feeder: Feeder,
    workflow: Workflow,

    actions: ActionMask,
    action_time: ActionTime,

    ready: bool,
    opened_at: Option<Instant>,
    version_queried_at: Option<Instant>,

    sessions: SessionRegistry,
}

impl SmoothieController {
    /// Create a controller over the given link
    pub fn new(
        connection: Box<dyn Communicator>,
        params: ConnectionParams,
        config: DriverConfig,
    ) -> Self {
        Self {
            params,
            connection,
            parser: ResponseParser::new(),
            preprocessor: Preprocessor::new(),
            context: EvalContext::new(),
            config,
            snapshot: MachineSnapshot::default(),
            snapshot_rev: 0,
            settings: ControllerSettings::default(),
            settings_rev: 0,
            emitted_snapshot_rev: 0,
            emitted_settings_rev: 0,
            tick_wpos: Position::default(),
            sender: Sender::new(),
            feeder: Feeder::new(),
            workflow: Workflow::new(),
            actions: ActionMask::default(),
            action_time: ActionTime::default(),
            ready: false,
            opened_at: None,
            version_queried_at: None,
            sessions: SessionRegistry::new(),
        }
    }

    /// Connection identity
    pub fn ident(&self) -> String {
        self.params.ident()
    }

    /// Whether the link is open
    pub fn is_open(&self) -> bool {
        self.connection.is_connected()
    }

    /// Whether the startup handshake has completed
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Current workflow state
    pub fn workflow_state(&self) -> WorkflowState {
        self.workflow.state()
    }

    /// Reason payload of the last workflow pause, if any
    pub fn workflow_reason(&self) -> Option<&HoldReason> {
        self.workflow.reason()
    }

    /// Machine snapshot as last reported
    pub fn snapshot(&self) -> &MachineSnapshot {
        &self.snapshot
    }

    /// Firmware settings as last reported
    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// The program sender
    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    /// The ad-hoc feeder
    pub fn feeder(&self) -> &Feeder {
        &self.feeder
    }

    /// Subscribe a session to this controller's events
    pub fn subscribe(&mut self) -> (Uuid, mpsc::UnboundedReceiver<SessionMessage>) {
        self.sessions.subscribe()
    }

    /// Remove a session
    pub fn unsubscribe(&mut self, id: Uuid) -> bool {
        self.sessions.unsubscribe(id)
    }

    // ---- connection lifecycle ----

    /// Open the link and begin the startup handshake
    ///
    /// On failure the controller stays created but inert; `open` may be
    /// retried.
    pub fn open(&mut self, now: Instant) -> Result<()> {
        if self.connection.is_connected() {
            return Ok(());
        }
        if let Err(err) = self.connection.connect(&self.params) {
            self.emit(SessionEvent::ConnectionError {
                ident: self.ident(),
                error: err.to_string(),
            });
            return Err(err);
        }

        tracing::info!("Connection opened: {}", self.ident());
        self.emit(SessionEvent::ConnectionOpen {
            ident: self.ident(),
        });
        self.emit(SessionEvent::ConnectionChange {
            ident: self.ident(),
            open: true,
        });
        self.emit(SessionEvent::ControllerType {
            controller: CONTROLLER_TYPE.to_string(),
        });

        self.workflow_stop();
        self.clear_action_values();
        if self.sender.is_loaded() {
            self.sender.unload();
            self.emit(SessionEvent::SenderUnload);
        }

        self.ready = false;
        self.opened_at = Some(now);
        self.version_queried_at = None;
        Ok(())
    }

    /// Close the link
    pub fn close(&mut self) {
        if !self.connection.is_connected() {
            return;
        }
        tracing::info!("Connection closed: {}", self.ident());
        self.ready = false;
        self.opened_at = None;
        self.version_queried_at = None;
        self.parser.reset();
        self.emit(SessionEvent::ConnectionClose {
            ident: self.ident(),
        });
        self.emit(SessionEvent::ConnectionChange {
            ident: self.ident(),
            open: false,
        });
        let _ = self.connection.disconnect();
    }

    /// Handle an unexpected transport failure: surface it and close
    pub fn on_transport_error(&mut self, error: &Error) {
        tracing::error!("Transport error on {}: {}", self.ident(), error);
        self.ready = false;
        self.emit(SessionEvent::ConnectionError {
            ident: self.ident(),
            error: error.to_string(),
        });
        self.close();
    }

    /// Advance the startup handshake: wait out the bootloader, query the
    /// firmware version, then declare the controller ready
    pub fn poll_init(&mut self, now: Instant) {
        if self.ready || !self.connection.is_connected() {
            return;
        }
        let Some(opened_at) = self.opened_at else {
            return;
        };
        match self.version_queried_at {
            None => {
                if now.duration_since(opened_at) >= BOOT_DELAY {
                    self.transport_write("version\n");
                    self.version_queried_at = Some(now);
                }
            }
            Some(queried_at) => {
                if now.duration_since(queried_at) >= VERSION_SETTLE {
                    self.ready = true;
                    tracing::debug!("Controller ready: {}", self.ident());
                }
            }
        }
    }

    /// Drain inbound bytes from the link
    ///
    /// An error here means the link failed; the caller destroys the
    /// controller after calling [`Self::on_transport_error`].
    pub fn poll_transport(&mut self, now: Instant) -> Result<()> {
        if !self.connection.is_connected() {
            return Ok(());
        }
        loop {
            let chunk = self.connection.receive()?;
            if chunk.is_empty() {
                return Ok(());
            }
            self.on_data(&chunk, now);
        }
    }

    // ---- inbound data ----

    /// Feed inbound bytes through the response parser
    pub fn on_data(&mut self, bytes: &[u8], now: Instant) {
        let lines = self.parser.push(bytes);
        for parsed in lines {
            self.handle_response(parsed, now);
        }
    }

    fn handle_response(&mut self, parsed: ParsedLine, now: Instant) {
        let ParsedLine { raw, response } = parsed;
        match response {
            Response::Status(report) => self.on_status(report, raw),
            Response::Ok => self.on_ok(raw, now),
            Response::Error(_) => self.on_error(raw, now),
            Response::Alarm(_) => {
                self.emit(SessionEvent::ConnectionRead { raw });
                self.feeder.reset();
                let mut next = self.snapshot.clone();
                next.machine_state = MachineState::Alarm;
                self.commit_snapshot(next);
            }
            Response::ParserState(state) => {
                let mut next = self.snapshot.clone();
                next.modal = state.modal;
                if let Some(tool) = state.tool {
                    next.tool = tool;
                }
                self.commit_snapshot(next);
                self.actions.query_parser_state_state = false;
                self.actions.query_parser_state_reply = true;
                if self.actions.reply_parser_state {
                    self.emit(SessionEvent::ConnectionRead { raw });
                }
            }
            Response::Parameter { name, value } => {
                if self.settings.parameters.get(&name) != Some(&value) {
                    self.settings.parameters.insert(name, value);
                    self.settings_rev += 1;
                }
                self.emit(SessionEvent::ConnectionRead { raw });
            }
            Response::Version(version) => {
                if self.settings.version.as_deref() != Some(version.as_str()) {
                    self.settings.version = Some(version);
                    self.settings_rev += 1;
                }
                self.emit(SessionEvent::ConnectionRead { raw });
            }
            Response::Other => {
                self.emit(SessionEvent::ConnectionRead { raw });
            }
        }
    }

    fn on_status(&mut self, report: StatusReport, raw: String) {
        self.apply_status_report(&report);

        self.actions.query_status_report = false;
        self.action_time.query_status_report = None;
        if self.actions.reply_status_report {
            self.actions.reply_status_report = false;
            self.emit(SessionEvent::ConnectionRead { raw });
        }

        // Buffer self-tuning is only safe while nothing is in flight.
        if self.workflow.is_idle() && self.sender.data_length() == 0 {
            if let Some(rx) = report.buf.and_then(|b| b.rx) {
                if rx > RX_BUFFER_MARGIN {
                    self.sender.tune_buffer_size((rx - RX_BUFFER_MARGIN) as usize);
                }
            }
        }
    }

    fn on_ok(&mut self, raw: String, now: Instant) {
        // A pending $G is acknowledged out of band and must not advance
        // the sender or feeder.
        if self.actions.query_parser_state_reply {
            if self.actions.reply_parser_state {
                self.actions.reply_parser_state = false;
                self.emit(SessionEvent::ConnectionRead { raw });
            }
            self.actions.query_parser_state_reply = false;
            return;
        }

        if self.workflow.is_running() {
            if self.sender.queue_len() > 0 {
                if self.sender.is_holding()
                    && self.sender.received() + 1 >= self.sender.sent()
                {
                    tracing::debug!(
                        "Continue sending G-code: sent={}, received={}",
                        self.sender.sent(),
                        self.sender.received() + 1
                    );
                    self.sender.unhold();
                }
                self.sender.ack();
                self.sender_next(now);
                if self.sender_caught_up() {
                    self.feeder_next();
                }
            } else if self.feeder.is_pending() {
                self.feeder.ack();
                self.feeder_next();
            } else {
                self.feeder_next();
            }
            return;
        }

        if self.workflow.is_paused() && self.sender.received() < self.sender.sent() {
            self.sender.ack();
            self.sender_next(now);
            return;
        }

        self.emit(SessionEvent::ConnectionRead { raw });
        self.feeder.ack();
        self.feeder_next();
    }

    fn on_error(&mut self, raw: String, now: Instant) {
        if self.workflow.is_running() && self.sender.queue_len() > 0 {
            let received = self.sender.received();
            let line = self
                .sender
                .line_at(received)
                .unwrap_or("")
                .trim()
                .to_string();
            self.emit(SessionEvent::ConnectionRead {
                raw: format!("> {} (line={})", line, received + 1),
            });
            self.emit(SessionEvent::ConnectionRead { raw: raw.clone() });

            if !self.config.exception.ignore_errors {
                self.workflow_pause(Some(HoldReason::Err(raw)));
            }
            self.sender.ack();
            self.sender_next(now);
            return;
        }

        if self.workflow.is_paused() && self.sender.received() < self.sender.sent() {
            self.emit(SessionEvent::ConnectionRead { raw });
            self.sender.ack();
            self.sender_next(now);
            return;
        }

        self.emit(SessionEvent::ConnectionRead { raw });
        self.feeder.ack();
        self.feeder_next();
    }

    fn apply_status_report(&mut self, report: &StatusReport) {
        let mut next = self.snapshot.clone();
        next.machine_state = report.machine_state;
        if let Some(mpos) = report.mpos {
            next.mpos = mpos;
        }
        if let Some(wpos) = report.wpos {
            next.wpos = wpos;
        }
        if let Some(ov_f) = report.ov_f {
            next.ov_f = ov_f;
        }
        if let Some(ov_s) = report.ov_s {
            next.ov_s = ov_s;
        }
        if report.buf.is_some() {
            next.buf = report.buf;
        }
        self.commit_snapshot(next);
    }

    fn commit_snapshot(&mut self, next: MachineSnapshot) {
        if next != self.snapshot {
            self.snapshot = next;
            self.snapshot_rev += 1;
        }
    }

    // ---- periodic tick ----

    /// The 250 ms controller tick
    pub fn on_tick(&mut self, now: Instant) {
        if !self.connection.is_connected() {
            return;
        }

        // Work-position stability since the previous state sync; consumed
        // by end-of-program detection below.
        let zero_offset = self.tick_wpos == self.snapshot.wpos;

        if self.feeder.has_work() {
            let status = self.feeder.status();
            self.emit(SessionEvent::FeederStatus { status });
        }
        if self.sender.peek().is_some() {
            let status = self.sender.status(now);
            self.emit(SessionEvent::SenderStatus { status });
        }

        if self.settings_rev != self.emitted_settings_rev {
            self.emitted_settings_rev = self.settings_rev;
            let settings = serde_json::to_value(&self.settings).unwrap_or(Value::Null);
            self.emit(SessionEvent::ControllerSettings { settings });
        }
        if self.snapshot_rev != self.emitted_snapshot_rev {
            self.emitted_snapshot_rev = self.snapshot_rev;
            self.tick_wpos = self.snapshot.wpos;
            let state = serde_json::to_value(&self.snapshot).unwrap_or(Value::Null);
            self.emit(SessionEvent::ControllerState { state });
        }

        if !self.ready {
            return;
        }

        self.query_status_report(now);
        self.query_parser_state(now);

        if let Some(finished_at) = self.action_time.sender_finish {
            let machine_idle =
                zero_offset && self.snapshot.machine_state == MachineState::Idle;
            if !machine_idle {
                self.action_time.sender_finish = Some(now);
            } else if now.duration_since(finished_at) > FINISH_IDLE_WINDOW {
                tracing::debug!("Finished sending G-code: {}", self.ident());
                self.action_time.sender_finish = None;
                let _ = self.dispatch(Command::SenderStop, now);
            }
        }
    }

    fn query_status_report(&mut self, now: Instant) {
        if let Some(queried_at) = self.action_time.query_status_report {
            if now.duration_since(queried_at) >= STATUS_QUERY_TIMEOUT {
                self.actions.query_status_report = false;
            }
        }
        if self.actions.query_status_report {
            return;
        }
        self.actions.query_status_report = true;
        self.action_time.query_status_report = Some(now);
        self.transport_write("?");
    }

    fn query_parser_state(&mut self, now: Instant) {
        // $G consumes receive-buffer bytes, so it only runs while both the
        // workflow and the machine are idle.
        if !self.workflow.is_idle() || self.snapshot.machine_state != MachineState::Idle {
            return;
        }
        if let Some(queried_at) = self.action_time.query_parser_state {
            if now.duration_since(queried_at) >= PARSER_STATE_QUERY_TIMEOUT {
                self.actions.query_parser_state_state = false;
                self.actions.query_parser_state_reply = false;
            }
        }
        if self.actions.query_parser_state_state || self.actions.query_parser_state_reply {
            return;
        }
        if let Some(queried_at) = self.action_time.query_parser_state {
            if now.duration_since(queried_at) < PARSER_STATE_THROTTLE {
                return;
            }
        }
        self.actions.query_parser_state_state = true;
        self.actions.query_parser_state_reply = false;
        self.action_time.query_parser_state = Some(now);
        self.transport_write("$G\n");
    }

    fn clear_action_values(&mut self) {
        self.actions = ActionMask::default();
        self.action_time = ActionTime::default();
    }

    // ---- streaming ----

    fn sender_caught_up(&self) -> bool {
        self.sender.queue_len() == 0 && self.sender.received() == self.sender.sent()
    }

    fn sender_next(&mut self, now: Instant) {
        if !self.sender.is_loaded() {
            return;
        }
        while !self.sender.is_holding() && !self.workflow.is_idle() {
            let Some(raw) = self.sender.peek().map(|s| s.to_string()) else {
                break;
            };
            self.context.populate(&self.snapshot);
            let translated = self.preprocessor.translate(&raw, &mut self.context);
            self.apply_sender_triggers(&translated.triggers);

            let line = translated.line.trim().to_string();
            if line.is_empty() {
                self.sender.skip_line();
                continue;
            }
            if !self.sender.fits(line.len()) {
                break;
            }
            self.sender.enqueue_sent(line.len());
            self.transport_write_line(&line);
        }

        if self.sender.at_end() && self.sender.finished_at().is_none() {
            self.sender.finish(now);
            self.action_time.sender_finish = Some(now);
            tracing::debug!(
                "Sent all program lines: total={}, ident={}",
                self.sender.total(),
                self.ident()
            );
        }
    }

    fn apply_sender_triggers(&mut self, triggers: &[PauseTrigger]) {
        for trigger in triggers {
            match trigger {
                PauseTrigger::Wait => {
                    self.sender.hold(Some(HoldReason::Data(WAIT.to_string())));
                }
                PauseTrigger::M0 | PauseTrigger::M1 | PauseTrigger::M6 => {
                    self.workflow_pause(Some(HoldReason::Data(trigger.word().to_string())));
                }
            }
        }
    }

    fn apply_feeder_triggers(&mut self, triggers: &[PauseTrigger]) {
        for trigger in triggers {
            self.feeder
                .hold(Some(HoldReason::Data(trigger.word().to_string())));
        }
    }

    fn feeder_next(&mut self) {
        // During a program the feeder only runs in the gaps where the
        // sender has nothing outstanding.
        if self.workflow.is_running() && !self.sender_caught_up() {
            return;
        }
        loop {
            if !self.feeder.can_send() {
                break;
            }
            let Some(raw) = self.feeder.pop() else {
                break;
            };
            self.context.populate(&self.snapshot);
            let translated = self.preprocessor.translate(&raw, &mut self.context);
            self.apply_feeder_triggers(&translated.triggers);

            let line = translated.line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if self.snapshot.machine_state == MachineState::Alarm {
                tracing::warn!("Stopped sending commands while in Alarm state");
                self.feeder.reset();
                break;
            }
            self.feeder.set_pending();
            self.emit(SessionEvent::ConnectionWrite {
                data: format!("{}\n", line),
            });
            self.transport_write_line(&line);
        }
    }

    // ---- workflow transitions with side effects ----

    fn workflow_start(&mut self, now: Instant) {
        if self.workflow.start() {
            self.sender.rewind();
            self.action_time.sender_finish = None;
            self.sender.start(now);
            self.emit_workflow_state();
        }
    }

    fn workflow_pause(&mut self, reason: Option<HoldReason>) {
        let hold_reason = reason.clone();
        if self.workflow.pause(reason) {
            self.sender.hold(hold_reason);
            self.emit_workflow_state();
        }
    }

    fn workflow_resume(&mut self, now: Instant) {
        if self.workflow.resume() {
            self.feeder.reset();
            self.sender.unhold();
            self.emit_workflow_state();
            self.sender_next(now);
        }
    }

    fn workflow_stop(&mut self) {
        if self.workflow.stop() {
            self.sender.rewind();
            self.action_time.sender_finish = None;
            self.emit_workflow_state();
        }
    }

    fn emit_workflow_state(&mut self) {
        let state = self.workflow.state();
        self.emit(SessionEvent::WorkflowState { state });
    }

    // ---- command dispatcher ----

    /// Dispatch a public command
    pub fn dispatch(&mut self, command: Command, now: Instant) -> Result<()> {
        match command {
            Command::SenderLoad {
                name,
                gcode,
                context,
            } => self.sender_load(name, gcode, context),
            Command::SenderUnload => {
                self.workflow_stop();
                self.sender.unload();
                self.emit(SessionEvent::SenderUnload);
                Ok(())
            }
            Command::SenderStart => {
                self.workflow_start(now);
                self.feeder.reset();
                self.sender_next(now);
                Ok(())
            }
            Command::SenderStop => {
                self.workflow_stop();
                // A firmware left in feed hold would wedge; release it.
                if self.snapshot.machine_state == MachineState::Hold {
                    self.write("~");
                }
                Ok(())
            }
            Command::SenderPause => {
                self.workflow_pause(None);
                self.write("!");
                Ok(())
            }
            Command::SenderResume => {
                self.write("~");
                self.workflow_resume(now);
                Ok(())
            }
            Command::FeederStart => {
                if self.workflow.is_running() {
                    return Ok(());
                }
                self.write("~");
                self.feeder.unhold();
                self.feeder_next();
                Ok(())
            }
            Command::FeederStop => {
                self.feeder.reset();
                Ok(())
            }
            Command::FeedHold => {
                self.write("!");
                Ok(())
            }
            Command::CycleStart => {
                self.write("~");
                Ok(())
            }
            Command::Homing => {
                self.write("$H");
                Ok(())
            }
            Command::Unlock => {
                self.write("$X");
                Ok(())
            }
            Command::Reset => {
                self.workflow_stop();
                self.feeder.reset();
                self.write("\u{18}");
                Ok(())
            }
            Command::Sleep => {
                tracing::debug!("sleep is not supported by Smoothieware");
                Ok(())
            }
            Command::FeedOverride { delta } => self.apply_override(true, delta),
            Command::SpindleOverride { delta } => self.apply_override(false, delta),
            Command::RapidOverride => Ok(()),
            Command::LaserTest { power, duration_ms } => self.laser_test(power, duration_ms),
            Command::Gcode { commands, context } => {
                self.merge_context(context);
                self.gcode(&commands)
            }
            Command::MacroRun { id } => {
                let m = self
                    .config
                    .macro_by_id(&id)
                    .cloned()
                    .ok_or(ControllerError::MacroNotFound { id })?;
                tracing::debug!("Running macro: {}", m.name);
                self.gcode(&m.content)
            }
            Command::MacroLoad { id } => {
                let m = self
                    .config
                    .macro_by_id(&id)
                    .cloned()
                    .ok_or(ControllerError::MacroNotFound { id })?;
                self.sender_load(m.name, m.content, None)
            }
            Command::WatchdirLoad { file } => {
                let base = self
                    .config
                    .watch_directory
                    .clone()
                    .ok_or_else(|| Error::other("no watch directory configured"))?;
                let gcode = std::fs::read_to_string(base.join(&file))?;
                self.sender_load(file, gcode, None)
            }
            Command::Write { data } => {
                self.write(&data);
                Ok(())
            }
        }
    }

    fn sender_load(
        &mut self,
        name: String,
        gcode: String,
        context: Option<CommandContext>,
    ) -> Result<()> {
        if gcode.trim().is_empty() {
            return Err(ControllerError::InvalidProgram {
                reason: "empty program".to_string(),
            }
            .into());
        }
        self.merge_context(context);
        let content = format!("{}\n{}", gcode, WAIT_TRAILER);
        self.sender.load(&name, &content);
        tracing::info!(
            "Loaded program: name={}, lines={}",
            name,
            self.sender.total()
        );
        self.emit(SessionEvent::SenderLoad {
            name,
            content: gcode,
        });
        self.workflow_stop();
        Ok(())
    }

    fn merge_context(&mut self, context: Option<CommandContext>) {
        if let Some(vars) = context {
            for (name, value) in vars {
                self.context.set_number(name, value);
            }
        }
    }

    fn gcode(&mut self, commands: &str) -> Result<()> {
        let lines: Vec<String> = commands
            .split('\n')
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty())
            .map(String::from)
            .collect();
        if lines.is_empty() {
            return Ok(());
        }
        self.feeder.feed(lines);
        if !self.feeder.is_pending() {
            self.feeder_next();
        }
        Ok(())
    }

    fn apply_override(&mut self, feed: bool, delta: i32) -> Result<()> {
        let current = if feed {
            self.snapshot.ov_f
        } else {
            self.snapshot.ov_s
        } as i32;
        let value = if delta == 0 {
            100
        } else {
            (current + delta).clamp(10, 200)
        };
        let word = if feed { "M220" } else { "M221" };
        self.gcode(&format!("{} S{}", word, value))?;

        // Optimistic writeback; the next status report is authoritative.
        let mut next = self.snapshot.clone();
        if feed {
            next.ov_f = value as u32;
        } else {
            next.ov_s = value as u32;
        }
        self.commit_snapshot(next);
        Ok(())
    }

    fn laser_test(&mut self, power: f64, duration_ms: u64) -> Result<()> {
        if power == 0.0 {
            return self.gcode("fire off\nM5");
        }
        let mut commands = vec!["M3".to_string(), format!("fire {}", power)];
        if duration_ms > 0 {
            commands.push(format!("G4 P{}", duration_ms as f64 / 1000.0));
            commands.push("fire off".to_string());
            commands.push("M5".to_string());
        }
        self.gcode(&commands.join("\n"))
    }

    // ---- writes ----

    /// Write data on behalf of a client, surfacing it to sessions
    ///
    /// Realtime bytes go out as-is; anything else gets a trailing newline.
    /// A user-originated `?` or `$G` arms the reply masks so exactly one
    /// reply line is echoed back.
    fn write(&mut self, data: &str) {
        if !self.connection.is_connected() {
            tracing::error!("Dropped write on closed connection: {:?}", data);
            return;
        }
        let cmd = data.trim();
        if cmd == "?" {
            self.actions.reply_status_report = true;
        }
        if cmd == "$G" {
            self.actions.reply_parser_state = true;
        }
        let payload = if REALTIME_COMMANDS.contains(&data) || data.ends_with('\n') {
            data.to_string()
        } else {
            format!("{}\n", data)
        };
        self.emit(SessionEvent::ConnectionWrite {
            data: payload.clone(),
        });
        self.transport_write(&payload);
    }

    fn transport_write_line(&mut self, line: &str) {
        let data = format!("{}\n", line);
        self.transport_write(&data);
    }

    fn transport_write(&mut self, data: &str) {
        let filtered = self.write_filter(data);
        if let Err(err) = self.connection.send(filtered.as_bytes()) {
            tracing::error!("Write failed on {}: {}", self.ident(), err);
        }
    }

    /// Outbound data filter; identity for Smoothieware
    fn write_filter<'a>(&self, data: &'a str) -> &'a str {
        data
    }

    fn emit(&mut self, event: SessionEvent) {
        tracing::trace!("{}", event.description());
        self.sessions.broadcast(&event);
    }
}
