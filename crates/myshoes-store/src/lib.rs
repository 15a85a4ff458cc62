//! myshoes-store: persistent state for the myshoes controller.
//!
//! Stores targets, pending jobs, and runners (live and tombstoned) in an
//! embedded redb database, plus named advisory locks used to serialize
//! dispatch across processes.

pub mod error;
pub mod lock;
pub mod store;
pub mod tables;

pub use error::{StoreError, StoreResult};
pub use lock::{AdvisoryLock, LEASE_TTL};
pub use store::Store;
