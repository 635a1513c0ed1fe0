//! Bridge server: command endpoint plus event broadcast.
//!
//! Listens on a local TCP socket speaking JSON lines. Each accepted
//! connection is greeted with a `hello` event, can issue commands that are
//! forwarded to the supervisor, and receives every broadcast event for as
//! long as it stays open.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::bridge::registry::SubscriberRegistry;
use crate::bridge::types::{BridgeError, CommandAck, Request, StatusSnapshot};
use crate::classify::OutputEvent;
use crate::config::DEFAULT_EXECUTABLE;
use crate::process::{LaunchBuilder, SupervisorHandle};

/// Bridge server configuration and startup.
#[derive(Debug)]
pub struct BridgeServer {
    host: String,
    port: u16,
    default_executable: PathBuf,
}

impl BridgeServer {
    /// Create a server bound to localhost on the given port.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port,
            default_executable: PathBuf::from(DEFAULT_EXECUTABLE),
        }
    }

    /// Set the host address to bind to.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the executable used when a `start` command carries none.
    #[must_use]
    pub fn with_default_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.default_executable = executable.into();
        self
    }

    /// Start the server: bind, spawn the broadcast pump and accept loop.
    ///
    /// Every event received on `events` is serialized once and delivered to
    /// all currently open subscribers.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails to bind.
    pub async fn start(
        &self,
        supervisor: SupervisorHandle,
        mut events: mpsc::UnboundedReceiver<OutputEvent>,
    ) -> Result<ServerHandle, BridgeError> {
        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;
        let local_addr = listener.local_addr()?;
        let registry = Arc::new(SubscriberRegistry::new());

        tracing::info!(address = %local_addr, "bridge server started");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Broadcast pump: one serialization per event, fan-out via registry.
        let pump_registry = Arc::clone(&registry);
        let mut pump_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = pump_shutdown.changed() => {
                        if *pump_shutdown.borrow() {
                            break;
                        }
                    }

                    event = events.recv() => {
                        let Some(event) = event else { break };
                        match serde_json::to_string(&event) {
                            Ok(payload) => {
                                pump_registry.broadcast(&payload).await;
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to serialize event");
                            }
                        }
                    }
                }
            }
        });

        // Accept loop.
        let accept_registry = Arc::clone(&registry);
        let default_executable = self.default_executable.clone();
        let mut accept_shutdown = shutdown_rx;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = accept_shutdown.changed() => {
                        if *accept_shutdown.borrow() {
                            tracing::info!("bridge server shutting down");
                            break;
                        }
                    }

                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, peer)) => {
                                tracing::debug!(%peer, "subscriber connected");
                                let supervisor = supervisor.clone();
                                let registry = Arc::clone(&accept_registry);
                                let default_executable = default_executable.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(
                                        stream,
                                        supervisor,
                                        registry,
                                        default_executable,
                                    )
                                    .await
                                    {
                                        tracing::debug!(error = %e, "connection handler error");
                                    }
                                });
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to accept connection");
                            }
                        }
                    }
                }
            }
        });

        Ok(ServerHandle {
            local_addr,
            shutdown_tx,
        })
    }
}

/// Handle for a running bridge server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
}

impl ServerHandle {
    /// The address the server is listening on.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signals the server to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn to_line<T: Serialize>(value: &T) -> Option<String> {
    match serde_json::to_string(value) {
        Ok(line) => Some(line),
        Err(e) => {
            tracing::warn!(error = %e, "failed to serialize reply");
            None
        }
    }
}

/// Handle a single subscriber connection until it closes.
async fn handle_connection(
    stream: TcpStream,
    supervisor: SupervisorHandle,
    registry: Arc<SubscriberRegistry>,
    default_executable: PathBuf,
) -> Result<(), BridgeError> {
    let conn_id = Uuid::new_v4();
    let (reader, mut writer) = stream.into_split();

    // Replies and broadcast events share the connection's outbound channel,
    // so per-connection ordering is preserved.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    registry.add(conn_id, out_tx.clone()).await;

    let writer_task = tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if writer.write_all(b"\n").await.is_err() {
                break;
            }
        }
    });

    if let Some(line) = to_line(&OutputEvent::hello()) {
        let _ = out_tx.send(line);
    }

    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = match reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(subscriber = %conn_id, error = %e, "read failed");
                break;
            }
        };
        if bytes_read == 0 {
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        // Unparseable input on the command channel is dropped per message
        // without closing the connection.
        let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
            tracing::debug!(subscriber = %conn_id, "dropping malformed command");
            continue;
        };
        let id = value.get("id").and_then(serde_json::Value::as_u64);
        let request =
            serde_json::from_value::<Request>(value).unwrap_or(Request::Unknown);

        let reply = match request {
            Request::Start {
                executable,
                args,
                working_dir,
                mode,
            } => {
                let executable = executable
                    .filter(|e| !e.is_empty())
                    .map_or_else(|| default_executable.clone(), PathBuf::from);
                let mut launch = LaunchBuilder::new(executable).args(args);
                if let Some(dir) = working_dir {
                    launch = launch.working_dir(dir);
                }
                if let Some(mode) = mode {
                    launch = launch.mode(mode);
                }
                match supervisor.start(launch).await {
                    Ok(pid) => to_line(&CommandAck::ok_pid(pid, id)),
                    Err(e) => to_line(&CommandAck::err(e.to_string(), id)),
                }
            }
            Request::Stop => match supervisor.stop().await {
                Ok(()) => to_line(&CommandAck::ok(id)),
                Err(e) => to_line(&CommandAck::err(e.to_string(), id)),
            },
            Request::Input { text } => match supervisor.send_input(text).await {
                Ok(()) => to_line(&CommandAck::ok(id)),
                Err(e) => to_line(&CommandAck::err(e.to_string(), id)),
            },
            Request::Status => to_line(&StatusSnapshot {
                running: supervisor.is_running().await,
                pid: None,
                id,
            }),
            Request::Unknown => to_line(&CommandAck::err("unknown cmd", id)),
        };

        if let Some(line) = reply {
            if out_tx.send(line).is_err() {
                break;
            }
        }
    }

    registry.remove(conn_id).await;
    drop(out_tx);
    let _ = writer_task.await;
    tracing::debug!(subscriber = %conn_id, "subscriber disconnected");
    Ok(())
}
