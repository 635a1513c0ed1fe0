//! Bridge client: request/reply commands and the event subscription.
//!
//! Commands use a dedicated short-lived connection each, and every request
//! carries a correlation id that the reply must echo, so broadcast traffic
//! on the wire can never be mistaken for a reply. The subscription side
//! holds one persistent connection and reconnects with capped exponential
//! backoff for as long as the subscriber is alive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::bridge::types::{BridgeError, CommandAck, Request, StatusSnapshot};
use crate::classify::{Mode, OutputEvent};

/// Default timeout for a command round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// First reconnect delay after a subscription connection drops.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Upper bound on the reconnect delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(15);

/// Reconnect delay before retry number `attempt`.
///
/// Doubles from [`INITIAL_BACKOFF`] and is capped at [`MAX_BACKOFF`];
/// there is no retry-count limit.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn backoff_delay(attempt: u32) -> Duration {
    let base = INITIAL_BACKOFF.as_millis() as u64;
    let max = MAX_BACKOFF.as_millis() as u64;
    let delay = if attempt >= 31 {
        max
    } else {
        (base << attempt).min(max)
    };
    Duration::from_millis(delay)
}

/// Options for a `start` command.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Executable override; the server default is used when absent.
    pub executable: Option<String>,
    /// Argument list.
    pub args: Vec<String>,
    /// Working directory override.
    pub working_dir: Option<String>,
    /// Permission mode to launch in.
    pub mode: Option<Mode>,
}

/// Client for the bridge endpoint.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    addr: String,
    timeout: Duration,
    next_id: Arc<AtomicU64>,
}

impl BridgeClient {
    /// Create a client for the given `host:port` address.
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The address this client talks to.
    #[must_use]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Start the supervised process.
    ///
    /// # Errors
    ///
    /// Returns a transport error; a refused start (e.g. already running)
    /// comes back as a `CommandAck` with `ok == false`.
    pub async fn start(&self, options: StartOptions) -> Result<CommandAck, BridgeError> {
        self.request(&Request::Start {
            executable: options.executable,
            args: options.args,
            working_dir: options.working_dir,
            mode: options.mode,
        })
        .await
    }

    /// Stop the supervised process.
    ///
    /// # Errors
    ///
    /// Returns a transport error on connection or timeout failure.
    pub async fn stop(&self) -> Result<CommandAck, BridgeError> {
        self.request(&Request::Stop).await
    }

    /// Relay a line of input to the process.
    ///
    /// # Errors
    ///
    /// Returns a transport error on connection or timeout failure.
    pub async fn send_input(&self, text: impl Into<String>) -> Result<CommandAck, BridgeError> {
        self.request(&Request::Input { text: text.into() }).await
    }

    /// Query whether a process is running.
    ///
    /// # Errors
    ///
    /// Returns a transport error on connection or timeout failure.
    pub async fn status(&self) -> Result<StatusSnapshot, BridgeError> {
        self.request(&Request::Status).await
    }

    /// Send one command over a fresh connection and await the reply that
    /// echoes its correlation id. The connection is closed afterwards, and
    /// on timeout.
    async fn request<T: DeserializeOwned>(&self, request: &Request) -> Result<T, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut payload = serde_json::to_value(request)?;
        payload["id"] = serde_json::Value::from(id);
        let mut line = payload.to_string();
        line.push('\n');

        #[allow(clippy::cast_possible_truncation)]
        let timeout_ms = self.timeout.as_millis() as u64;

        let result = tokio::time::timeout(self.timeout, async {
            let stream = TcpStream::connect(&self.addr).await?;
            let (reader, mut writer) = stream.into_split();
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;

            let mut reader = BufReader::new(reader);
            let mut reply_line = String::new();
            loop {
                reply_line.clear();
                let bytes_read = reader.read_line(&mut reply_line).await?;
                if bytes_read == 0 {
                    return Err(BridgeError::ConnectionClosed);
                }
                let Ok(value) =
                    serde_json::from_str::<serde_json::Value>(reply_line.trim())
                else {
                    continue;
                };
                // Broadcast events carry no id; skip anything that is not
                // our reply.
                if value.get("id").and_then(serde_json::Value::as_u64) == Some(id) {
                    return Ok(serde_json::from_value(value)?);
                }
            }
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(BridgeError::ResponseTimeout(timeout_ms)),
        }
    }

    /// Subscribe to the broadcast event stream.
    ///
    /// The subscription owns a persistent connection that reconnects with
    /// exponential backoff, indefinitely, until the subscription is
    /// dropped.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(subscription_loop(self.addr.clone(), tx));
        Subscription { rx }
    }
}

/// A live event subscription.
///
/// Dropping the subscription tears down the underlying connection and
/// stops reconnection attempts.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<OutputEvent>,
}

impl Subscription {
    /// Receive the next event.
    ///
    /// Returns `None` only if the subscription task has stopped.
    pub async fn recv(&mut self) -> Option<OutputEvent> {
        self.rx.recv().await
    }

    /// Consume the subscription as an event stream.
    pub fn into_stream(self) -> impl futures_core::Stream<Item = OutputEvent> {
        futures_util::stream::unfold(self, |mut subscription| async {
            subscription.recv().await.map(|event| (event, subscription))
        })
    }
}

async fn subscription_loop(addr: String, tx: mpsc::UnboundedSender<OutputEvent>) {
    let mut attempt: u32 = 0;

    loop {
        if tx.is_closed() {
            return;
        }

        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                tracing::debug!(%addr, "subscription connected");
                attempt = 0;
                read_events(stream, &tx).await;
                if tx.is_closed() {
                    return;
                }
                tracing::debug!(%addr, "subscription connection lost");
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "subscription connect failed");
            }
        }

        let delay = backoff_delay(attempt);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            () = tx.closed() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Forward events from one connection until it drops or the subscriber
/// goes away.
async fn read_events(stream: TcpStream, tx: &mpsc::UnboundedSender<OutputEvent>) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    loop {
        line.clear();
        tokio::select! {
            () = tx.closed() => return,

            result = reader.read_line(&mut line) => {
                match result {
                    Ok(0) => return,
                    Ok(_) => {
                        // Command replies on a shared connection are not
                        // events; skip anything that does not parse as one.
                        if let Ok(event) = serde_json::from_str::<OutputEvent>(line.trim()) {
                            if tx.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "subscription read failed");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_starts_at_initial_delay() {
        assert_eq!(backoff_delay(0), INITIAL_BACKOFF);
    }

    #[test]
    fn backoff_doubles_each_attempt() {
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn backoff_is_non_decreasing_and_bounded() {
        let mut last = Duration::ZERO;
        for attempt in 0..64 {
            let delay = backoff_delay(attempt);
            assert!(delay >= last);
            assert!(delay <= MAX_BACKOFF);
            last = delay;
        }
        assert_eq!(backoff_delay(63), MAX_BACKOFF);
    }

    #[test]
    fn client_with_timeout_sets_timeout() {
        let client = BridgeClient::new("127.0.0.1:9234").with_timeout(Duration::from_secs(1));
        assert_eq!(client.timeout, Duration::from_secs(1));
    }

    #[test]
    fn client_default_timeout_is_5_seconds() {
        let client = BridgeClient::new("127.0.0.1:9234");
        assert_eq!(client.timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn request_times_out_against_silent_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept but never reply.
        tokio::spawn(async move {
            let _keep = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client =
            BridgeClient::new(addr.to_string()).with_timeout(Duration::from_millis(100));
        let result = client.status().await;
        assert!(matches!(result, Err(BridgeError::ResponseTimeout(100))));
    }
}
