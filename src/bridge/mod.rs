//! Bridge transport: JSON-lines command endpoint and event fan-out.
//!
//! # Architecture
//!
//! ```text
//! Frontend                        Bridge                      Supervisor
//!    |                              |                              |
//!    |-- {cmd:"start", id:1} ------>|-- LaunchBuilder ------------>|
//!    |<-- {ok:true, pid, id:1} -----|                              |
//!    |                              |<== classified OutputEvents ==|
//!    |<== broadcast to all =========|                              |
//! ```
//!
//! # Protocol
//!
//! JSON-line format over a local TCP socket: one message per line in both
//! directions. Replies echo the request's correlation id; broadcast events
//! carry a `type` tag and no id.

mod client;
mod registry;
mod server;
mod types;

pub use client::*;
pub use registry::*;
pub use server::*;
pub use types::*;
