//! Driver task
//!
//! Runs a [`SmoothieController`] on a spawned task that owns all mutable
//! state: messages from handles are drained, the transport is polled, and
//! the 250 ms tick fires, all from one loop. Observers read a mirrored
//! snapshot behind a lock instead of touching the controller.

use crate::controller::{Command, SmoothieController, TICK_INTERVAL};
use crate::registry::ControllerRegistry;
use crate::transport::{
    Communicator, ConnectionDriver, ConnectionParams, SerialCommunicator, TcpCommunicator,
};
use parking_lot::RwLock;
use smoothiekit_core::{DriverConfig, Error, MachineState, Result, SessionMessage, WorkflowState};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

const LOOP_DELAY: Duration = Duration::from_millis(10);

/// Messages a handle can post to its driver task
pub enum DriverMessage {
    /// Open the link
    Open,
    /// Close the link
    Close,
    /// Dispatch a controller command
    Command(Command),
    /// Subscribe a session; the receiver comes back on the oneshot
    Subscribe(oneshot::Sender<(Uuid, mpsc::UnboundedReceiver<SessionMessage>)>),
    /// Stop the driver task
    Shutdown,
}

/// Mirrored controller state readable without going through the task
#[derive(Debug, Clone)]
pub struct SharedState {
    /// Connection identity
    pub ident: String,
    /// Whether the link is open
    pub open: bool,
    /// Whether the startup handshake has completed
    pub ready: bool,
    /// Workflow state
    pub workflow: WorkflowState,
    /// Machine state from the latest status report
    pub machine: MachineState,
    /// Loaded program name
    pub sender_name: Option<String>,
    /// Loaded program line count
    pub sender_total: usize,
    /// Lines dispatched
    pub sender_sent: usize,
    /// Lines completed
    pub sender_received: usize,
    /// Queued feeder lines
    pub feeder_queue: usize,
}

impl SharedState {
    fn new(ident: String) -> Self {
        Self {
            ident,
            open: false,
            ready: false,
            workflow: WorkflowState::Idle,
            machine: MachineState::Unknown,
            sender_name: None,
            sender_total: 0,
            sender_sent: 0,
            sender_received: 0,
            feeder_queue: 0,
        }
    }
}

/// Handle to a running driver task
#[derive(Clone)]
pub struct DriverHandle {
    ident: String,
    tx: mpsc::UnboundedSender<DriverMessage>,
    shared: Arc<RwLock<SharedState>>,
}

impl DriverHandle {
    /// Connection identity
    pub fn ident(&self) -> &str {
        &self.ident
    }

    /// Ask the task to open the link
    pub fn open(&self) -> Result<()> {
        self.send(DriverMessage::Open)
    }

    /// Ask the task to close the link
    pub fn close(&self) -> Result<()> {
        self.send(DriverMessage::Close)
    }

    /// Dispatch a controller command
    pub fn command(&self, command: Command) -> Result<()> {
        self.send(DriverMessage::Command(command))
    }

    /// Stop the driver task
    pub fn shutdown(&self) -> Result<()> {
        self.send(DriverMessage::Shutdown)
    }

    /// Subscribe a session to controller events
    pub async fn subscribe(&self) -> Result<(Uuid, mpsc::UnboundedReceiver<SessionMessage>)> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(DriverMessage::Subscribe(reply_tx))?;
        reply_rx
            .await
            .map_err(|_| Error::other("driver task has stopped"))
    }

    /// Snapshot of the mirrored state
    pub fn state(&self) -> SharedState {
        self.shared.read().clone()
    }

    fn send(&self, message: DriverMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| Error::other("driver task has stopped"))
    }
}

/// Spawn a driver for the given connection parameters
///
/// Picks the communicator from the driver kind and registers the handle;
/// the task removes itself from the registry when it stops.
pub fn spawn(
    params: ConnectionParams,
    config: DriverConfig,
    registry: ControllerRegistry,
) -> DriverHandle {
    let communicator: Box<dyn Communicator> = match params.driver {
        ConnectionDriver::Serial => Box::new(SerialCommunicator::new()),
        ConnectionDriver::Tcp => Box::new(TcpCommunicator::new()),
    };
    spawn_with(communicator, params, config, registry)
}

/// Spawn a driver over an explicit communicator
pub fn spawn_with(
    communicator: Box<dyn Communicator>,
    params: ConnectionParams,
    config: DriverConfig,
    registry: ControllerRegistry,
) -> DriverHandle {
    let ident = params.ident();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let shared = Arc::new(RwLock::new(SharedState::new(ident.clone())));
    let handle = DriverHandle {
        ident: ident.clone(),
        tx,
        shared: shared.clone(),
    };
    registry.insert(handle.clone());

    tokio::spawn(async move {
        let mut controller = SmoothieController::new(communicator, params, config);
        let mut last_tick = Instant::now();

        'run: loop {
            // 1. MESSAGE PHASE: drain handle messages
            loop {
                match rx.try_recv() {
                    Ok(DriverMessage::Open) => {
                        let _ = controller.open(Instant::now());
                    }
                    Ok(DriverMessage::Close) => controller.close(),
                    Ok(DriverMessage::Command(command)) => {
                        if let Err(err) = controller.dispatch(command, Instant::now()) {
                            tracing::warn!("Command failed on {}: {}", ident, err);
                        }
                    }
                    Ok(DriverMessage::Subscribe(reply)) => {
                        let _ = reply.send(controller.subscribe());
                    }
                    Ok(DriverMessage::Shutdown) => {
                        controller.close();
                        break 'run;
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        controller.close();
                        break 'run;
                    }
                }
            }

            // 2. READ PHASE: drain inbound bytes
            if controller.is_open() {
                if let Err(err) = controller.poll_transport(Instant::now()) {
                    controller.on_transport_error(&err);
                    break 'run;
                }
                controller.poll_init(Instant::now());
            }

            // 3. TICK PHASE
            if last_tick.elapsed() >= TICK_INTERVAL {
                last_tick = Instant::now();
                controller.on_tick(last_tick);
            }

            mirror(&controller, &shared);
            tokio::time::sleep(LOOP_DELAY).await;
        }

        mirror(&controller, &shared);
        registry.remove(&ident);
        tracing::debug!("Driver task stopped: {}", ident);
    });

    handle
}

fn mirror(controller: &SmoothieController, shared: &Arc<RwLock<SharedState>>) {
    let mut state = shared.write();
    state.open = controller.is_open();
    state.ready = controller.is_ready();
    state.workflow = controller.workflow_state();
    state.machine = controller.snapshot().machine_state;
    state.sender_name = controller.sender().name().map(String::from);
    state.sender_total = controller.sender().total();
    state.sender_sent = controller.sender().sent();
    state.sender_received = controller.sender().received();
    state.feeder_queue = controller.feeder().len();
}
