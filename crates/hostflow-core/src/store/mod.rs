//! Host persistence
//!
//! Status writes are conditional ([`StatusUpdate`]); the store compares and
//! sets atomically and reports whether a record was modified. That
//! compare-and-set is the only mutual exclusion between jobs, so it must be
//! atomic across every process sharing the store.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryHostStore;

use crate::error::StoreResult;
use crate::host::{Host, StatusUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait HostStore: Send + Sync {
    /// Insert a new host; fails with `AlreadyExists` if the ID is taken
    async fn insert(&self, host: &Host) -> StoreResult<()>;

    async fn find(&self, id: &str) -> StoreResult<Option<Host>>;

    async fn list(&self) -> StoreResult<Vec<Host>>;

    /// Apply `update` if it still matches the stored host.
    ///
    /// Returns `Ok(false)` when the host is missing or no longer matches.
    async fn compare_and_set_status(&self, update: &StatusUpdate) -> StoreResult<bool>;

    /// Set the quarantine flag; returns whether the flag changed
    async fn set_quarantined(&self, id: &str, quarantined: bool) -> StoreResult<bool>;

    /// Record the last time the host's agent checked in
    async fn set_last_communication(&self, id: &str, at: DateTime<Utc>) -> StoreResult<()>;
}
