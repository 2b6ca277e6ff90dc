//! Core data model: kinds, events and snapshots.

pub mod event;
pub mod kind;
pub mod snapshot;

pub use event::{NewEvent, RawEvent};
pub use kind::{EntityKind, EventType, UnknownEntityKind, UnknownEventType};
pub use snapshot::{ParentRef, Snapshot};
