//! Integration tests for the bridge server round trip.

use std::time::Duration;

use claude_bridge::bridge::{
    BridgeClient, BridgeServer, CommandAck, ServerHandle, StartOptions, Subscription,
};
use claude_bridge::classify::OutputEvent;
use claude_bridge::process::Supervisor;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

async fn start_server() -> (
    ServerHandle,
    BridgeClient,
    mpsc::UnboundedSender<OutputEvent>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let supervisor = Supervisor::spawn(event_tx.clone(), None);
    let handle = BridgeServer::new(0)
        .start(supervisor, event_rx)
        .await
        .expect("failed to start server");
    let client = BridgeClient::new(handle.local_addr().to_string());
    (handle, client, event_tx)
}

/// Raw subscriber connection that has already consumed the greeting.
async fn raw_subscriber(
    handle: &ServerHandle,
) -> (BufReader<OwnedReadHalf>, tokio::net::tcp::OwnedWriteHalf) {
    let stream = TcpStream::connect(handle.local_addr())
        .await
        .expect("connect failed");
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await.expect("read failed");
    assert_eq!(line.trim(), r#"{"type":"hello","pid":null}"#);
    (reader, writer)
}

async fn read_json_line(reader: &mut BufReader<OwnedReadHalf>) -> serde_json::Value {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(5), reader.read_line(&mut line))
        .await
        .expect("timed out waiting for a line")
        .expect("read failed");
    serde_json::from_str(line.trim()).expect("invalid json line")
}

async fn next_matching<F>(subscription: &mut Subscription, pred: F) -> OutputEvent
where
    F: Fn(&OutputEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = subscription.recv().await.expect("subscription ended");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn status_round_trip_reports_not_running() {
    let (_handle, client, _events) = start_server().await;
    let snapshot = assert_ok!(client.status().await);
    assert!(!snapshot.running);
    assert_eq!(snapshot.pid, None);
}

#[tokio::test]
async fn every_subscriber_is_greeted() {
    let (handle, _client, _events) = start_server().await;
    let _first = raw_subscriber(&handle).await;
    let _second = raw_subscriber(&handle).await;
}

#[tokio::test]
async fn unknown_command_replies_to_that_connection_only() {
    let (handle, _client, events) = start_server().await;
    let (mut asker_reader, mut asker_writer) = raw_subscriber(&handle).await;
    let (mut other_reader, _other_writer) = raw_subscriber(&handle).await;

    asker_writer
        .write_all(b"{\"cmd\":\"greet\",\"id\":9}\n")
        .await
        .unwrap();

    let reply: CommandAck =
        serde_json::from_value(read_json_line(&mut asker_reader).await).unwrap();
    assert!(!reply.ok);
    assert_eq!(reply.msg.as_deref(), Some("unknown cmd"));
    assert_eq!(reply.id, Some(9));

    // The other connection sees the next broadcast, not the reply.
    events
        .send(OutputEvent::Stdout {
            text: "after".to_string(),
            raw: "after".to_string(),
        })
        .unwrap();
    let seen = read_json_line(&mut other_reader).await;
    assert_eq!(seen["type"], "stdout");
    assert_eq!(seen["text"], "after");
}

#[tokio::test]
async fn malformed_command_is_dropped_without_closing_the_connection() {
    let (handle, _client, _events) = start_server().await;
    let (mut reader, mut writer) = raw_subscriber(&handle).await;

    writer.write_all(b"this is not json\n").await.unwrap();
    writer
        .write_all(b"{\"cmd\":\"status\",\"id\":3}\n")
        .await
        .unwrap();

    // The only reply is for the well-formed status command.
    let reply = read_json_line(&mut reader).await;
    assert_eq!(reply["running"], false);
    assert_eq!(reply["id"], 3);
}

#[tokio::test]
async fn events_fan_out_to_every_subscriber_exactly_once() {
    let (handle, _client, events) = start_server().await;
    let (mut reader_a, _writer_a) = raw_subscriber(&handle).await;
    let (mut reader_b, _writer_b) = raw_subscriber(&handle).await;

    events
        .send(OutputEvent::Thinking {
            value: true,
            raw: "Thinking on".to_string(),
        })
        .unwrap();

    for reader in [&mut reader_a, &mut reader_b] {
        let seen = read_json_line(reader).await;
        assert_eq!(seen["type"], "thinking");
        assert_eq!(seen["value"], true);
    }

    // One event, one delivery: the next broadcast is the next line.
    events
        .send(OutputEvent::Stdout {
            text: "next".to_string(),
            raw: "next".to_string(),
        })
        .unwrap();
    for reader in [&mut reader_a, &mut reader_b] {
        let seen = read_json_line(reader).await;
        assert_eq!(seen["text"], "next");
    }
}

#[tokio::test]
async fn dropped_subscriber_does_not_stop_delivery_to_others() {
    let (handle, _client, events) = start_server().await;
    let gone = raw_subscriber(&handle).await;
    let (mut reader, _writer) = raw_subscriber(&handle).await;
    drop(gone);

    // Give the server a moment to observe the closed socket.
    tokio::time::sleep(Duration::from_millis(50)).await;

    events
        .send(OutputEvent::Stdout {
            text: "still flowing".to_string(),
            raw: "still flowing".to_string(),
        })
        .unwrap();
    let seen = read_json_line(&mut reader).await;
    assert_eq!(seen["text"], "still flowing");
}

#[tokio::test]
async fn subscription_client_receives_typed_events() {
    let (_handle, client, events) = start_server().await;
    let mut subscription = client.subscribe();

    // First event on a fresh subscription is the greeting.
    let hello = next_matching(&mut subscription, |e| matches!(e, OutputEvent::Hello { .. })).await;
    assert_eq!(hello, OutputEvent::hello());

    events
        .send(OutputEvent::Stderr {
            text: "warn".to_string(),
            raw: "warn".to_string(),
        })
        .unwrap();
    let event =
        next_matching(&mut subscription, |e| matches!(e, OutputEvent::Stderr { .. })).await;
    assert_eq!(
        event,
        OutputEvent::Stderr {
            text: "warn".to_string(),
            raw: "warn".to_string(),
        }
    );
}

#[tokio::test]
async fn subscription_works_as_a_stream() {
    use futures_util::StreamExt;

    let (_handle, client, events) = start_server().await;
    let mut stream = Box::pin(client.subscribe().into_stream());

    let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timed out waiting for greeting")
        .expect("stream ended");
    assert_eq!(first, OutputEvent::hello());

    events
        .send(OutputEvent::Stdout {
            text: "streamed".to_string(),
            raw: "streamed".to_string(),
        })
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timed out waiting for event")
        .expect("stream ended");
    assert!(matches!(second, OutputEvent::Stdout { ref text, .. } if text == "streamed"));
}

#[tokio::test]
async fn stop_and_input_without_process_fail_with_reasons() {
    let (_handle, client, _events) = start_server().await;

    let ack = client.stop().await.unwrap();
    assert!(!ack.ok);
    assert_eq!(ack.msg.as_deref(), Some("not running"));

    let ack = client.send_input("hello").await.unwrap();
    assert!(!ack.ok);
    assert_eq!(ack.msg.as_deref(), Some("not running"));
}

#[cfg(unix)]
#[tokio::test]
async fn full_session_against_a_real_process() {
    let (_handle, client, _events) = start_server().await;
    let mut subscription = client.subscribe();
    // The greeting confirms the subscription is registered before any
    // events of interest can be broadcast.
    next_matching(&mut subscription, |e| matches!(e, OutputEvent::Hello { .. })).await;

    // cat echoes stdin back to stdout and stays alive until stopped.
    let ack = client
        .start(StartOptions {
            executable: Some("cat".to_string()),
            ..StartOptions::default()
        })
        .await
        .unwrap();
    assert!(ack.ok, "start failed: {:?}", ack.msg);
    assert!(ack.pid.is_some());

    // A second start while one is alive fails without side effects.
    let again = client.start(StartOptions::default()).await.unwrap();
    assert!(!again.ok);
    assert_eq!(again.msg.as_deref(), Some("already running"));

    let snapshot = client.status().await.unwrap();
    assert!(snapshot.running);

    let ack = client.send_input("hello bridge").await.unwrap();
    assert!(ack.ok);

    let event = next_matching(&mut subscription, |e| {
        matches!(e, OutputEvent::Stdout { text, .. } if text == "hello bridge")
    })
    .await;
    assert_eq!(
        event,
        OutputEvent::Stdout {
            text: "hello bridge".to_string(),
            raw: "hello bridge".to_string(),
        }
    );

    let ack = client.stop().await.unwrap();
    assert!(ack.ok);

    next_matching(&mut subscription, OutputEvent::is_process).await;
    let snapshot = client.status().await.unwrap();
    assert!(!snapshot.running);
}
