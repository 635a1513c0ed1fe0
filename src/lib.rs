//! Claude Bridge - supervise a Claude CLI process and fan its output out to
//! chat frontends.
//!
//! The bridge owns at most one child process at a time, classifies its
//! output into tagged events, broadcasts them to every connected
//! subscriber over a local JSON-lines socket, and mirrors raw output to a
//! durable log that a separate process can replay.

pub mod bridge;
pub mod classify;
pub mod config;
pub mod display;
pub mod mirror;
pub mod process;
