//! evsearch-core library.
//!
//! Replays the deletion/freezing/movement event log of the entity store and
//! writes one ownership-enriched `events_search` row per affected entity.
//!
//! # Layout
//!
//! - [`model`]: entity kinds, event types, raw and enriched events, snapshots.
//! - [`payload`]: decoding of the JSON history attached to deletion events.
//! - [`snapshots`]: temporal index per entity kind and the cross-kind facade.
//! - [`watermark`]: persisted last-seen timestamps per event/entity type.
//! - [`processor`]: the batched event processor and its strategies.
//! - [`maintenance`]: the task driver running processors in hierarchy order.
//! - [`source`]: the data-source boundary plus in-memory and SQLite backends.
//!
//! # Conventions
//!
//! - **Errors**: typed errors via `thiserror`, propagation via `anyhow::Result`.
//! - **Logging**: `tracing` macros with structured fields.

pub mod config;
pub mod db;
pub mod error;
pub mod maintenance;
pub mod model;
pub mod payload;
pub mod processor;
pub mod snapshots;
pub mod source;
pub mod watermark;

pub use maintenance::{EventsSearchTask, RunReport};
pub use model::{EntityKind, EventType, NewEvent, RawEvent, Snapshot};
pub use source::DataSource;
