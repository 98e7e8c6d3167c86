//! Per-player session handling: login, the packet pumps, transfers,
//! fallback and teardown.

pub mod animation;
mod chunk;
mod handler;
pub mod processor;
mod registry;
mod session;
mod tracker;

pub use processor::{Context, NopProcessor, Processor};
pub use registry::Registry;
pub use session::Session;
pub use tracker::Tracker;
