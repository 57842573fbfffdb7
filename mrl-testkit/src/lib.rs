//! Test helpers for code that talks to a map-reduce-lite coordinator.

pub mod mock;
pub mod raw;

pub use mock::{LogsReply, MockCoordinator, StatusReply, SubmitReply};
pub use raw::RawServer;
