//! # lumina-projector
//!
//! The media read model: a background loop that polls the event log,
//! folds events into a denormalized query table, and durably advances a
//! watermark — plus the HTTP query surface over that table.
//!
//! Delivery from the log is at-least-once; every mutation is an upsert
//! guarded by `last_event_version`, so replays and rebuilds are no-ops for
//! already-applied events.

pub mod config;
pub mod http;
pub mod projector;
pub mod read_model;

pub use config::MediaQueryConfig;
pub use projector::{Projector, ProjectorConfig, ProjectorError};
pub use read_model::{MediaReadModel, MediaReadModelStore, MediaStatus};
