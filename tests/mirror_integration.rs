//! Integration tests for the log mirror pipeline.

use std::time::Duration;

use claude_bridge::bridge::{BridgeClient, BridgeServer};
use claude_bridge::classify::OutputEvent;
use claude_bridge::mirror::{LogMirror, OutputLog};
use claude_bridge::process::Supervisor;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn replayed_log_output_reaches_subscribers() {
    let dir = tempfile::tempdir().unwrap();
    let log = OutputLog::new(dir.path().join("out.log"));

    // Server whose event source is the log mirror, as when the supervisor
    // and the UI run in separate processes.
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let supervisor = Supervisor::spawn(mpsc::unbounded_channel().0, None);
    let handle = BridgeServer::new(0)
        .start(supervisor, event_rx)
        .await
        .expect("failed to start server");

    let cancel = CancellationToken::new();
    let mirror = LogMirror::new(log.clone(), event_tx).with_interval(Duration::from_millis(10));
    tokio::spawn(mirror.run(cancel.clone()));

    let client = BridgeClient::new(handle.local_addr().to_string());
    let mut subscription = client.subscribe();

    // The greeting confirms the subscription is registered.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(OutputEvent::Hello { .. }) = subscription.recv().await {
                break;
            }
        }
    })
    .await
    .expect("timed out waiting for greeting");

    // Give the mirror a tick to record the starting size.
    tokio::time::sleep(Duration::from_millis(50)).await;
    log.append(b"line from another process\n").await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = subscription.recv().await.expect("subscription ended");
            if matches!(event, OutputEvent::Stdout { .. }) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for replay");

    assert_eq!(
        event,
        OutputEvent::Stdout {
            text: "line from another process".to_string(),
            raw: "line from another process".to_string(),
        }
    );

    cancel.cancel();
}

#[cfg(unix)]
#[tokio::test]
async fn supervisor_mirrors_raw_output_to_the_log() {
    use claude_bridge::process::LaunchBuilder;

    let dir = tempfile::tempdir().unwrap();
    let log = OutputLog::new(dir.path().join("out.log"));

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let handle = Supervisor::spawn(event_tx, Some(log.clone()));

    handle
        .start(LaunchBuilder::new("/bin/sh").args(["-c", "printf 'persisted line\\n'"]))
        .await
        .expect("start failed");

    // Wait for the output to flow through.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = event_rx.recv().await.expect("event channel closed");
            if matches!(event, OutputEvent::Stdout { .. }) {
                break;
            }
        }
    })
    .await
    .expect("timed out waiting for output");

    let content = tokio::fs::read_to_string(log.path()).await.unwrap();
    assert_eq!(content, "persisted line\n");
}
