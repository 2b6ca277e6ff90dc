//! Time-indexed ownership snapshots.

mod facade;
mod store;

pub use facade::SnapshotsFacade;
pub use store::Snapshots;
