//! Storage module for screencap
//!
//! Keeps the recents list of finished recordings as a JSON document.

mod models;
mod store;

pub use models::Recording;
pub use store::{add_recording, JsonRecordingStore, RecordingStore, MAX_RECENT_RECORDINGS};
