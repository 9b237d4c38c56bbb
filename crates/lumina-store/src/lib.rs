//! # lumina-store
//!
//! Shared SQLite plumbing for the stateful Lumina services: pool
//! construction with the pragmas every service wants, embedded-DDL schema
//! application, and the durable consumer-offset store used by the projector
//! and the saga engine to record their progress through the event log.

pub mod offset;
pub mod sqlite;

pub use offset::OffsetStore;
pub use sqlite::{StoreError, apply_schema, connect, connect_in_memory};
