//! redb table definitions for the myshoes store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Runners are split the way the controller reads them: a detail
//! row that outlives the runner, a live set, a per-target index, a cloud id
//! index for live instances, and a tombstone table.

use redb::TableDefinition;

/// Targets keyed by `{target_id}`.
pub const TARGETS: TableDefinition<&str, &[u8]> = TableDefinition::new("targets");

/// Pending jobs keyed by `{job_id}`.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Runner attributes keyed by `{runner_id}`. Kept after deletion.
pub const RUNNERS: TableDefinition<&str, &[u8]> = TableDefinition::new("runners");

/// Live runners: `{runner_id}` → `{target_id}`.
pub const RUNNERS_RUNNING: TableDefinition<&str, &str> = TableDefinition::new("runners_running");

/// Live runners per target: `{target_id}:{runner_id}` → `{runner_id}`.
pub const RUNNERS_BY_TARGET: TableDefinition<&str, &str> =
    TableDefinition::new("runners_by_target");

/// Live instances: `{cloud_id}` → `{runner_id}`.
pub const RUNNER_CLOUD_IDS: TableDefinition<&str, &str> = TableDefinition::new("runner_cloud_ids");

/// Tombstones keyed by `{runner_id}`.
pub const RUNNERS_DELETED: TableDefinition<&str, &[u8]> = TableDefinition::new("runners_deleted");

/// Advisory leases keyed by lock name.
pub const LOCKS: TableDefinition<&str, &[u8]> = TableDefinition::new("locks");
