//! # lumina-testing
//!
//! Test doubles shared across the workspace: a thread-safe in-memory
//! [`EventLog`](lumina_eventlog::EventLog) and scripted collaborator
//! gateways that fail on cue. Loops under test are constructed against
//! these and driven synchronously.

pub mod gateways;
pub mod memory_event_log;

pub use gateways::{ScriptedAlbum, ScriptedMediaCommand, ScriptedNotifications};
pub use memory_event_log::InMemoryEventLog;
