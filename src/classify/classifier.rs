//! Chunk-to-line assembly and line classification.
//!
//! Byte chunks from a child process may split lines at arbitrary points, so
//! [`LineAssembler`] buffers an incomplete trailing line until the next chunk
//! arrives. Classification itself is per-line and stateless: the same line on
//! the same stream always yields the same event.

use std::sync::OnceLock;

use regex::Regex;

use super::event::{Mode, OutputEvent, StreamKind};

/// Mode banner marker: two `⏵` characters, free text, then an opening paren.
fn mode_banner_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"⏵⏵\s*([^(]+)").expect("mode banner pattern is valid"))
}

fn thinking_on_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)thinking\s+on").expect("thinking-on pattern is valid"))
}

fn thinking_off_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)thinking\s+off").expect("thinking-off pattern is valid"))
}

/// Classify a single line from the given stream.
///
/// Returns `None` for lines that are empty after trimming. Mode banners are
/// matched first, then thinking toggles; everything else is a plain
/// stdout/stderr line carrying both the trimmed and the raw text.
#[must_use]
pub fn classify_line(line: &str, stream: StreamKind) -> Option<OutputEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(captures) = mode_banner_pattern().captures(trimmed) {
        let mode = Mode::from_banner(captures[1].trim());
        return Some(OutputEvent::Mode {
            mode,
            raw: line.to_string(),
        });
    }

    if thinking_on_pattern().is_match(trimmed) {
        return Some(OutputEvent::Thinking {
            value: true,
            raw: line.to_string(),
        });
    }

    if thinking_off_pattern().is_match(trimmed) {
        return Some(OutputEvent::Thinking {
            value: false,
            raw: line.to_string(),
        });
    }

    let event = match stream {
        StreamKind::Stdout => OutputEvent::Stdout {
            text: trimmed.to_string(),
            raw: line.to_string(),
        },
        StreamKind::Stderr => OutputEvent::Stderr {
            text: trimmed.to_string(),
            raw: line.to_string(),
        },
    };
    Some(event)
}

/// Splits arbitrary chunks into complete lines.
///
/// Carriage returns are stripped, and a trailing fragment without a newline
/// is buffered until the next `push` or a final `flush`.
#[derive(Debug, Default)]
pub struct LineAssembler {
    partial: String,
}

impl LineAssembler {
    /// Create an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every complete line it closes.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        for ch in chunk.chars() {
            if ch != '\r' {
                self.partial.push(ch);
            }
        }

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let mut line: String = self.partial.drain(..=pos).collect();
            line.pop();
            lines.push(line);
        }
        lines
    }

    /// Drain the buffered trailing fragment, if any.
    ///
    /// Called when the underlying stream ends so a final unterminated line
    /// is not lost.
    pub fn flush(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }

    /// Returns true if no partial line is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }
}

/// Stateful chunk classifier for one output stream.
///
/// Combines a [`LineAssembler`] with [`classify_line`] so callers can feed
/// raw chunks and receive classified events.
#[derive(Debug)]
pub struct StreamClassifier {
    stream: StreamKind,
    lines: LineAssembler,
}

impl StreamClassifier {
    /// Create a classifier for the given stream.
    #[must_use]
    pub fn new(stream: StreamKind) -> Self {
        Self {
            stream,
            lines: LineAssembler::new(),
        }
    }

    /// Which stream this classifier tags events with.
    #[must_use]
    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    /// Classify every complete line closed by this chunk.
    pub fn push_chunk(&mut self, chunk: &str) -> Vec<OutputEvent> {
        self.lines
            .push(chunk)
            .iter()
            .filter_map(|line| classify_line(line, self.stream))
            .collect()
    }

    /// Classify the buffered trailing fragment at stream end.
    pub fn finish(&mut self) -> Option<OutputEvent> {
        self.lines
            .flush()
            .and_then(|line| classify_line(&line, self.stream))
    }
}
