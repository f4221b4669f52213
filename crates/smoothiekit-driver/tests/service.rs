//! Driver task lifecycle over a mock link.

mod common;

use common::{count_writes, MockLink};
use smoothiekit_driver::{spawn_with, Command, ConnectionParams, ControllerRegistry};
use smoothiekit_core::{DriverConfig, SessionEvent, WorkflowState};
use std::time::Duration;

async fn wait_until(mut check: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn driver_task_lifecycle() {
    let registry = ControllerRegistry::new();
    let (link, sent) = MockLink::new();
    let params = ConnectionParams {
        port: "/dev/ttyTEST".to_string(),
        ..Default::default()
    };
    let handle = spawn_with(
        Box::new(link),
        params,
        DriverConfig::default(),
        registry.clone(),
    );
    assert_eq!(registry.len(), 1);
    assert!(registry.get(handle.ident()).is_some());

    let (_id, mut events) = handle.subscribe().await.unwrap();
    handle.open().unwrap();

    let message = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("no event within 2s")
        .expect("event channel closed");
    assert_eq!(message.name, "connection:open");
    assert!(matches!(message.event, SessionEvent::ConnectionOpen { .. }));

    // The startup handshake takes a bit over a second of task time.
    wait_until(|| handle.state().ready, "handshake").await;
    assert_eq!(count_writes(&sent, "version\n"), 1);

    handle
        .command(Command::SenderLoad {
            name: "job.nc".to_string(),
            gcode: "G1 X1".to_string(),
            context: None,
        })
        .unwrap();
    handle.command(Command::SenderStart).unwrap();
    wait_until(
        || handle.state().workflow == WorkflowState::Running,
        "workflow start",
    )
    .await;
    wait_until(|| count_writes(&sent, "G1 X1\n") == 1, "program line").await;

    handle.shutdown().unwrap();
    wait_until(|| registry.is_empty(), "registry cleanup").await;
}
