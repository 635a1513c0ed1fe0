//! Bridge wire messages.
//!
//! Communication uses JSON-line format over a local TCP socket: clients
//! send one command per line and receive replies plus the broadcast event
//! stream on the same connection. Requests may carry a numeric `id`, which
//! replies echo so callers can match them against concurrent traffic.

use serde::{Deserialize, Serialize};

use crate::classify::Mode;

/// Command sent from a client to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Request {
    /// Start the supervised process.
    Start {
        /// Executable override; the configured default is used when absent
        /// or empty.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        executable: Option<String>,
        /// Argument list.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        /// Working directory override.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<String>,
        /// Permission mode to launch in.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<Mode>,
    },
    /// Stop the supervised process.
    Stop,
    /// Relay a line of input to the process's stdin.
    Input {
        /// Text to write; a newline is appended.
        text: String,
    },
    /// Query whether a process is running.
    Status,
    /// Catch-all for unrecognized commands.
    #[serde(other)]
    Unknown,
}

/// Reply to a `start`, `stop`, `input`, or unknown command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Pid of the started process, on a successful `start`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Failure reason, when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    /// Correlation id echoed from the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl CommandAck {
    /// Successful reply.
    #[must_use]
    pub fn ok(id: Option<u64>) -> Self {
        Self {
            ok: true,
            pid: None,
            msg: None,
            id,
        }
    }

    /// Successful reply carrying the started pid.
    #[must_use]
    pub fn ok_pid(pid: u32, id: Option<u64>) -> Self {
        Self {
            ok: true,
            pid: Some(pid),
            msg: None,
            id,
        }
    }

    /// Failed reply with a reason.
    #[must_use]
    pub fn err(msg: impl Into<String>, id: Option<u64>) -> Self {
        Self {
            ok: false,
            pid: None,
            msg: Some(msg.into()),
            id,
        }
    }
}

/// Reply to a `status` command.
///
/// The pid is not tracked across this boundary and is always `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Whether a process handle exists.
    pub running: bool,
    /// Always `null`.
    pub pid: Option<u32>,
    /// Correlation id echoed from the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

/// Errors that can occur on the bridge transport.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Failed to bind or connect the bridge socket.
    #[error("bridge connection failed: {0}")]
    ConnectionFailed(#[from] std::io::Error),

    /// No reply arrived within the request timeout.
    #[error("bridge response timeout after {0}ms")]
    ResponseTimeout(u64),

    /// The connection closed before a reply arrived.
    #[error("connection closed before a reply arrived")]
    ConnectionClosed,

    /// Failed to serialize or deserialize a message.
    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),
}
