//! # Progress Tracking
//!
//! Shared job counters and the completion decision built on them.
//!
//! - [`counter_store`] - narrow atomic key-value seam with TTLs
//! - [`tracker`] - `processed` / `total` counters per job
//! - [`observer`] - polls both counters and triggers cleanup

pub mod counter_store;
pub mod observer;
pub mod tracker;

pub use counter_store::{CounterStore, CounterStoreError, InMemoryCounterStore};
pub use observer::{CompletionObserver, CompletionState, ObserverError};
pub use tracker::{ProgressError, ProgressTracker};
