//! Classified output events.
//!
//! Every line read from the child process (or replayed from the output log)
//! is classified into exactly one of these events before being broadcast
//! to subscribers.

use serde::{Deserialize, Serialize};

/// Permission mode reported by the child process.
///
/// `bypass` and `yolo` add a permission-skipping flag to the spawn
/// arguments; beyond that the bridge treats the mode as opaque data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Default mode, no extra flags.
    #[default]
    Normal,
    /// Bypass permissions mode.
    Bypass,
    /// Yolo mode.
    Yolo,
}

impl Mode {
    /// Parse the free text of a mode banner into a mode.
    ///
    /// Matching is case-insensitive and by substring; text containing
    /// neither `bypass` nor `yolo` maps to [`Mode::Normal`].
    #[must_use]
    pub fn from_banner(text: &str) -> Self {
        let text = text.to_lowercase();
        if text.contains("bypass") {
            Self::Bypass
        } else if text.contains("yolo") {
            Self::Yolo
        } else {
            Self::Normal
        }
    }

    /// Extra spawn argument implied by this mode, if any.
    #[must_use]
    pub fn permission_flag(self) -> Option<&'static str> {
        match self {
            Self::Normal => None,
            Self::Bypass | Self::Yolo => Some("--dangerously-skip-permissions"),
        }
    }
}

/// Which output stream a chunk arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Child process standard output.
    Stdout,
    /// Child process standard error.
    Stderr,
}

/// Lifecycle action reported in a `process` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessAction {
    /// The child process exited.
    Closed,
    /// The child process could not be spawned or failed fatally.
    Error,
}

/// Event broadcast to every open subscriber.
///
/// Serialized as a JSON line with a `type` tag, e.g.
/// `{"type":"mode","mode":"yolo","raw":"⏵⏵ yolo mode (shift+tab)"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputEvent {
    /// Greeting sent to a subscriber immediately after accept.
    Hello {
        /// Always `null`; the pid is not tracked across this boundary.
        pid: Option<u32>,
    },
    /// A plain line from the child's standard output.
    Stdout {
        /// Trimmed line text.
        text: String,
        /// The line as delivered, before trimming.
        raw: String,
    },
    /// A plain line from the child's standard error.
    Stderr {
        /// Trimmed line text.
        text: String,
        /// The line as delivered, before trimming.
        raw: String,
    },
    /// A mode banner line.
    Mode {
        /// Normalized mode.
        mode: Mode,
        /// The line as delivered, before trimming.
        raw: String,
    },
    /// A thinking-state toggle line.
    Thinking {
        /// `true` for `Thinking on`, `false` for `Thinking off`.
        value: bool,
        /// The line as delivered, before trimming.
        raw: String,
    },
    /// A process lifecycle report.
    Process {
        /// What happened to the process.
        action: ProcessAction,
        /// Exit code, when the process closed with one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
        /// Error text, when the process failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl OutputEvent {
    /// Greeting event for a freshly accepted subscriber.
    #[must_use]
    pub fn hello() -> Self {
        Self::Hello { pid: None }
    }

    /// Event for a process that exited with the given code.
    #[must_use]
    pub fn closed(code: Option<i32>) -> Self {
        Self::Process {
            action: ProcessAction::Closed,
            code,
            error: None,
        }
    }

    /// Event for a process that failed with the given error text.
    #[must_use]
    pub fn errored(error: impl Into<String>) -> Self {
        Self::Process {
            action: ProcessAction::Error,
            code: None,
            error: Some(error.into()),
        }
    }

    /// Returns true if this is a process lifecycle event.
    #[must_use]
    pub fn is_process(&self) -> bool {
        matches!(self, Self::Process { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_from_banner_matches_substrings() {
        assert_eq!(Mode::from_banner("bypass permissions"), Mode::Bypass);
        assert_eq!(Mode::from_banner("YOLO mode"), Mode::Yolo);
        assert_eq!(Mode::from_banner("accept edits"), Mode::Normal);
    }

    #[test]
    fn mode_bypass_wins_over_yolo() {
        assert_eq!(Mode::from_banner("bypass yolo"), Mode::Bypass);
    }

    #[test]
    fn mode_permission_flag() {
        assert_eq!(Mode::Normal.permission_flag(), None);
        assert_eq!(
            Mode::Yolo.permission_flag(),
            Some("--dangerously-skip-permissions")
        );
        assert_eq!(
            Mode::Bypass.permission_flag(),
            Some("--dangerously-skip-permissions")
        );
    }

    #[test]
    fn hello_serializes_with_null_pid() {
        let json = serde_json::to_string(&OutputEvent::hello()).unwrap();
        assert_eq!(json, r#"{"type":"hello","pid":null}"#);
    }

    #[test]
    fn stdout_event_wire_shape() {
        let event = OutputEvent::Stdout {
            text: "hi".to_string(),
            raw: "  hi".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"stdout","text":"hi","raw":"  hi"}"#);
    }

    #[test]
    fn mode_event_wire_shape() {
        let event = OutputEvent::Mode {
            mode: Mode::Yolo,
            raw: "⏵⏵ yolo mode (shift+tab)".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"mode""#));
        assert!(json.contains(r#""mode":"yolo""#));
    }

    #[test]
    fn closed_event_omits_absent_fields() {
        let json = serde_json::to_string(&OutputEvent::closed(Some(0))).unwrap();
        assert_eq!(json, r#"{"type":"process","action":"closed","code":0}"#);

        let json = serde_json::to_string(&OutputEvent::closed(None)).unwrap();
        assert_eq!(json, r#"{"type":"process","action":"closed"}"#);
    }

    #[test]
    fn error_event_carries_text() {
        let json = serde_json::to_string(&OutputEvent::errored("no such file")).unwrap();
        assert_eq!(
            json,
            r#"{"type":"process","action":"error","error":"no such file"}"#
        );
    }

    #[test]
    fn events_round_trip() {
        let events = vec![
            OutputEvent::hello(),
            OutputEvent::Thinking {
                value: true,
                raw: "Thinking on".to_string(),
            },
            OutputEvent::closed(Some(1)),
        ];
        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let back: OutputEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(event, back);
        }
    }
}
