//! Supervisor actor owning the single bridged process.
//!
//! All handle mutation happens inside one control loop, so a `stop` can
//! never race an in-flight `start`: commands arrive over a channel and are
//! processed strictly in order. The loop also watches the running child so
//! a natural exit clears the handle and emits a `process closed` event.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio::sync::{mpsc, oneshot};

use crate::classify::{OutputEvent, StreamClassifier, StreamKind};
use crate::mirror::OutputLog;
use crate::process::command::{BridgedProcess, LaunchBuilder, SpawnError};

/// Timeout for graceful child termination on `stop`.
pub const TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffer size for the supervisor command channel.
pub const DEFAULT_COMMAND_BUFFER: usize = 32;

/// Error type for supervisor operations.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    /// A process is already running.
    #[error("already running")]
    AlreadyRunning,
    /// No process is running.
    #[error("not running")]
    NotRunning,
    /// The child's input stream is closed.
    #[error("stdin unavailable")]
    StdinUnavailable,
    /// The process failed to spawn.
    #[error("spawn failed: {0}")]
    Spawn(#[from] SpawnError),
    /// The supervisor task is gone.
    #[error("supervisor task not available")]
    ChannelClosed,
}

/// Commands accepted by the supervisor loop.
enum Control {
    Start {
        launch: LaunchBuilder,
        reply: oneshot::Sender<Result<u32, SupervisorError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
    Input {
        text: String,
        reply: oneshot::Sender<Result<(), SupervisorError>>,
    },
    Status {
        reply: oneshot::Sender<bool>,
    },
}

/// Cloneable handle for issuing commands to the supervisor loop.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<Control>,
}

impl SupervisorHandle {
    /// Start a process from the given launch configuration.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` if a process handle exists, `Spawn` if the
    /// OS rejects the spawn, or `ChannelClosed` if the supervisor is gone.
    pub async fn start(&self, launch: LaunchBuilder) -> Result<u32, SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Control::Start { launch, reply })
            .await
            .map_err(|_| SupervisorError::ChannelClosed)?;
        rx.await.map_err(|_| SupervisorError::ChannelClosed)?
    }

    /// Stop the running process.
    ///
    /// The handle is cleared immediately; OS-level teardown continues in the
    /// background and emits a `process closed` event when the child is gone.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` if no process handle exists.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Control::Stop { reply })
            .await
            .map_err(|_| SupervisorError::ChannelClosed)?;
        rx.await.map_err(|_| SupervisorError::ChannelClosed)?
    }

    /// Write `text` plus a newline to the child's stdin.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning` if no process handle exists, or
    /// `StdinUnavailable` if the input stream is already closed.
    pub async fn send_input(&self, text: impl Into<String>) -> Result<(), SupervisorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Control::Input {
                text: text.into(),
                reply,
            })
            .await
            .map_err(|_| SupervisorError::ChannelClosed)?;
        rx.await.map_err(|_| SupervisorError::ChannelClosed)?
    }

    /// Whether a process handle currently exists. Pure query.
    pub async fn is_running(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Control::Status { reply }).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

/// State for the one live child.
struct RunningProcess {
    pid: u32,
    process: BridgedProcess,
    stdin: Option<ChildStdin>,
}

/// The supervisor control loop.
pub struct Supervisor {
    rx: mpsc::Receiver<Control>,
    events: mpsc::UnboundedSender<OutputEvent>,
    log: Option<OutputLog>,
    running: Option<RunningProcess>,
}

enum Tick {
    Command(Option<Control>),
    Exited(std::io::Result<ExitStatus>),
}

impl Supervisor {
    /// Spawn the supervisor loop and return a handle to it.
    ///
    /// Classified events are sent on `events`; raw output chunks are
    /// appended to `log` when one is configured. The loop exits, killing
    /// any live child, once every handle clone is dropped.
    #[must_use]
    pub fn spawn(
        events: mpsc::UnboundedSender<OutputEvent>,
        log: Option<OutputLog>,
    ) -> SupervisorHandle {
        let (tx, rx) = mpsc::channel(DEFAULT_COMMAND_BUFFER);
        let supervisor = Self {
            rx,
            events,
            log,
            running: None,
        };
        tokio::spawn(supervisor.run());
        SupervisorHandle { tx }
    }

    async fn run(mut self) {
        loop {
            let tick = if let Some(running) = self.running.as_mut() {
                tokio::select! {
                    status = running.process.wait() => Tick::Exited(status),
                    cmd = self.rx.recv() => Tick::Command(cmd),
                }
            } else {
                Tick::Command(self.rx.recv().await)
            };

            match tick {
                Tick::Exited(status) => self.handle_exit(status),
                Tick::Command(Some(cmd)) => self.handle_command(cmd).await,
                Tick::Command(None) => break,
            }
        }

        // Every handle is gone; take the child down with us.
        if let Some(mut running) = self.running.take() {
            if let Err(e) = running.process.terminate(TERMINATE_TIMEOUT).await {
                tracing::warn!(pid = running.pid, error = %e, "failed to terminate child on shutdown");
            }
        }
    }

    fn handle_exit(&mut self, status: std::io::Result<ExitStatus>) {
        let Some(running) = self.running.take() else {
            return;
        };
        match status {
            Ok(status) => {
                tracing::info!(pid = running.pid, code = ?status.code(), "process exited");
                let _ = self.events.send(OutputEvent::closed(status.code()));
            }
            Err(e) => {
                tracing::warn!(pid = running.pid, error = %e, "failed to wait on process");
                let _ = self.events.send(OutputEvent::errored(e.to_string()));
            }
        }
    }

    async fn handle_command(&mut self, cmd: Control) {
        match cmd {
            Control::Start { launch, reply } => {
                let _ = reply.send(self.start(launch).await);
            }
            Control::Stop { reply } => {
                let _ = reply.send(self.stop());
            }
            Control::Input { text, reply } => {
                let _ = reply.send(self.send_input(&text).await);
            }
            Control::Status { reply } => {
                let _ = reply.send(self.running.is_some());
            }
        }
    }

    async fn start(&mut self, launch: LaunchBuilder) -> Result<u32, SupervisorError> {
        if self.running.is_some() {
            return Err(SupervisorError::AlreadyRunning);
        }

        if let Some(log) = &self.log {
            if let Err(e) = log.ensure_exists().await {
                tracing::warn!(path = %log.path().display(), error = %e, "failed to create output log");
            }
        }

        let mut process = match BridgedProcess::spawn(&launch) {
            Ok(process) => process,
            Err(e) => {
                // Spawn failures also surface as a broadcast event, since
                // subscribers other than the caller need to observe them.
                let _ = self.events.send(OutputEvent::errored(e.to_string()));
                return Err(e.into());
            }
        };

        let pid = process.id().unwrap_or(0);
        let stdin = process.take_stdin();

        if let Some(stdout) = process.take_stdout() {
            spawn_output_reader(stdout, StreamKind::Stdout, self.events.clone(), self.log.clone());
        }
        if let Some(stderr) = process.take_stderr() {
            spawn_output_reader(stderr, StreamKind::Stderr, self.events.clone(), self.log.clone());
        }

        tracing::info!(pid, executable = %launch.executable().display(), "process started");

        self.running = Some(RunningProcess {
            pid,
            process,
            stdin,
        });
        Ok(pid)
    }

    fn stop(&mut self) -> Result<(), SupervisorError> {
        let Some(mut running) = self.running.take() else {
            return Err(SupervisorError::NotRunning);
        };

        tracing::info!(pid = running.pid, "stopping process");
        drop(running.stdin.take());

        let events = self.events.clone();
        tokio::spawn(async move {
            match running.process.terminate(TERMINATE_TIMEOUT).await {
                Ok(status) => {
                    let _ = events.send(OutputEvent::closed(status.and_then(|s| s.code())));
                }
                Err(e) => {
                    tracing::warn!(pid = running.pid, error = %e, "failed to terminate process");
                    let _ = events.send(OutputEvent::errored(e.to_string()));
                }
            }
        });
        Ok(())
    }

    async fn send_input(&mut self, text: &str) -> Result<(), SupervisorError> {
        let Some(running) = self.running.as_mut() else {
            return Err(SupervisorError::NotRunning);
        };
        let Some(stdin) = running.stdin.as_mut() else {
            return Err(SupervisorError::StdinUnavailable);
        };

        let mut line = text.to_string();
        line.push('\n');
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            tracing::warn!(pid = running.pid, error = %e, "stdin write failed");
            running.stdin = None;
            return Err(SupervisorError::StdinUnavailable);
        }
        if let Err(e) = stdin.flush().await {
            tracing::warn!(pid = running.pid, error = %e, "stdin flush failed");
            running.stdin = None;
            return Err(SupervisorError::StdinUnavailable);
        }
        Ok(())
    }
}

/// Read one output stream chunk-by-chunk, mirroring raw bytes to the log
/// and sending classified events.
fn spawn_output_reader<R>(
    reader: R,
    stream: StreamKind,
    events: mpsc::UnboundedSender<OutputEvent>,
    log: Option<OutputLog>,
) where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = reader;
        let mut classifier = StreamClassifier::new(stream);
        let mut buf = [0u8; 4096];

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]);
                    if let Some(log) = &log {
                        if let Err(e) = log.append(chunk.as_bytes()).await {
                            tracing::warn!(path = %log.path().display(), error = %e, "log append failed");
                        }
                    }
                    for event in classifier.push_chunk(&chunk) {
                        if events.send(event).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "output stream read failed");
                    break;
                }
            }
        }

        if let Some(event) = classifier.finish() {
            let _ = events.send(event);
        }
    });
}
