//! Output classification: chunks to lines to tagged events.

mod classifier;
mod event;

pub use classifier::*;
pub use event::*;
