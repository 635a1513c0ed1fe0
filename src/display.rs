//! Colored CLI display utilities for bridge output.
//!
//! Used by the binary's `serve` and `watch` commands to print events in a
//! readable form; library paths log through `tracing` instead.

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::classify::{OutputEvent, ProcessAction};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Print the listening banner for a freshly started server.
pub fn print_listening(addr: &str) {
    println!(
        "{} {} listening on {}",
        timestamp().dimmed(),
        "[BRIDGE]".blue().bold(),
        addr.bold()
    );
}

/// Print one broadcast event.
pub fn print_event(event: &OutputEvent) {
    match event {
        OutputEvent::Hello { .. } => {
            println!("{} {}", timestamp().dimmed(), "[HELLO]".blue());
        }
        OutputEvent::Stdout { text, .. } => {
            println!("{} {}", timestamp().dimmed(), text);
        }
        OutputEvent::Stderr { text, .. } => {
            println!("{} {}", timestamp().dimmed(), text.red());
        }
        OutputEvent::Mode { mode, .. } => {
            println!(
                "{} {} {:?}",
                timestamp().dimmed(),
                "[MODE]".yellow().bold(),
                mode
            );
        }
        OutputEvent::Thinking { value, .. } => {
            let state = if *value { "on" } else { "off" };
            println!(
                "{} {} {}",
                timestamp().dimmed(),
                "[THINKING]".cyan(),
                state.dimmed()
            );
        }
        OutputEvent::Process {
            action: ProcessAction::Closed,
            code,
            ..
        } => {
            println!(
                "{} {} exit code {:?}",
                timestamp().dimmed(),
                "[CLOSED]".magenta().bold(),
                code
            );
        }
        OutputEvent::Process {
            action: ProcessAction::Error,
            error,
            ..
        } => {
            println!(
                "{} {} {}",
                timestamp().dimmed(),
                "[ERROR]".red().bold(),
                error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

/// Print an error message to stderr.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), message);
}
