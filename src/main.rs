use anyhow::{bail, Context, Result};
use clap::Parser;
use smoothiekit::{
    init_logging, list_ports, Command, ConnectionDriver, ConnectionParams, ControllerRegistry,
    DriverConfig, SessionEvent, WorkflowState,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Smoothieware G-code streamer - serial or TCP")]
struct Args {
    /// Serial device (/dev/ttyACM0) or TCP address (host:port)
    #[arg(short, long)]
    conn: Option<String>,

    /// Baud rate for serial links
    #[arg(short, long, default_value_t = 115_200)]
    baud: u32,

    /// G-code file to stream to completion
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// One-shot G-code to send through the feeder
    #[arg(short, long)]
    gcode: Option<String>,

    /// Driver configuration file (JSON or TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// List candidate serial ports and exit
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let args = Args::parse();

    if args.list {
        for port in list_ports()? {
            println!("{}\t{}", port.port_name, port.description);
        }
        return Ok(());
    }

    let Some(conn) = args.conn else {
        bail!("--conn is required unless --list is given");
    };
    let driver = if conn.contains(':') {
        ConnectionDriver::Tcp
    } else {
        ConnectionDriver::Serial
    };
    let params = ConnectionParams {
        driver,
        port: conn,
        baud_rate: args.baud,
        ..Default::default()
    };

    let config = match &args.config {
        Some(path) => DriverConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => DriverConfig::default(),
    };

    let registry = ControllerRegistry::new();
    let handle = smoothiekit::spawn(params, config, registry.clone());
    let (_session, mut events) = handle.subscribe().await?;
    handle.open()?;

    // Wait out the bootloader and the version handshake.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !handle.state().ready {
        while let Ok(message) = events.try_recv() {
            if let SessionEvent::ConnectionError { error, .. } = message.event {
                bail!("connection failed: {}", error);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("machine did not become ready within 10s");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    eprintln!("connected to {}", handle.ident());

    if let Some(gcode) = args.gcode {
        handle.command(Command::Gcode {
            commands: gcode,
            context: None,
        })?;
        // Give the machine a moment to answer, echoing what comes back.
        let replies = async {
            while let Some(message) = events.recv().await {
                if let SessionEvent::ConnectionRead { raw } = message.event {
                    println!("{}", raw);
                }
            }
        };
        let _ = tokio::time::timeout(Duration::from_secs(2), replies).await;
    }

    if let Some(file) = args.file {
        let gcode = std::fs::read_to_string(&file)
            .with_context(|| format!("reading {}", file.display()))?;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "program".to_string());

        handle.command(Command::SenderLoad {
            name,
            gcode,
            context: None,
        })?;
        handle.command(Command::SenderStart)?;

        let mut started = false;
        while let Some(message) = events.recv().await {
            match message.event {
                SessionEvent::WorkflowState { state } => match state {
                    WorkflowState::Running => started = true,
                    WorkflowState::Paused => eprintln!("\npaused"),
                    WorkflowState::Idle if started => break,
                    WorkflowState::Idle => {}
                },
                SessionEvent::SenderStatus { status } => {
                    let sent = status.get("sent").and_then(|v| v.as_u64()).unwrap_or(0);
                    let total = status.get("total").and_then(|v| v.as_u64()).unwrap_or(0);
                    eprint!("\r{}/{} lines", sent, total);
                }
                SessionEvent::ConnectionRead { raw } => {
                    if raw.starts_with("error") || raw.starts_with('>') {
                        eprintln!("\n{}", raw);
                    }
                }
                SessionEvent::ConnectionError { error, .. } => {
                    bail!("connection lost: {}", error);
                }
                _ => {}
            }
        }
        eprintln!("\nprogram finished");
    }

    handle.shutdown()?;
    Ok(())
}
