//! Durable output log and polling replay.

mod log;
mod poller;
mod tailer;

pub use log::*;
pub use poller::*;
pub use tailer::*;
