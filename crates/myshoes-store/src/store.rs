//! Store: redb-backed persistence for targets, jobs, and runners.
//!
//! Provides typed operations over the three entities. All values are
//! JSON-serialized into redb's `&[u8]` value columns. Multi-table changes
//! (runner creation and deletion) happen inside a single write
//! transaction, so either every relation changes or none does. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use myshoes_core::*;

use crate::error::{StoreError, StoreResult};
use crate::tables::*;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

pub(crate) use map_err;

/// Tombstone row for a deleted runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Tombstone {
    deleted_at: DateTime<Utc>,
    reason: DeleteReason,
}

/// Thread-safe store backed by redb.
#[derive(Clone)]
pub struct Store {
    pub(crate) db: Arc<Database>,
}

pub(crate) fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

impl Store {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(TARGETS).map_err(map_err!(Table))?;
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.open_table(RUNNERS).map_err(map_err!(Table))?;
        txn.open_table(RUNNERS_RUNNING).map_err(map_err!(Table))?;
        txn.open_table(RUNNERS_BY_TARGET).map_err(map_err!(Table))?;
        txn.open_table(RUNNER_CLOUD_IDS).map_err(map_err!(Table))?;
        txn.open_table(RUNNERS_DELETED).map_err(map_err!(Table))?;
        txn.open_table(LOCKS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Targets ────────────────────────────────────────────────────

    /// Insert a target, or resurrect a deleted row with the same natural key.
    ///
    /// A resurrected row keeps its id and `created_at`; every other
    /// attribute comes from `target` and the status flips back to
    /// `active`. Fails with `AlreadyExists` if a non-deleted row holds the
    /// natural key.
    pub fn create_target(&self, target: &Target) -> StoreResult<Target> {
        let natural_key = target.natural_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stored = {
            let mut table = txn.open_table(TARGETS).map_err(map_err!(Table))?;

            let mut deleted: Option<Target> = None;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let row: Target = decode(value.value())?;
                if row.natural_key() != natural_key {
                    continue;
                }
                if !row.is_deleted() {
                    return Err(StoreError::AlreadyExists(format!("target {natural_key}")));
                }
                if deleted.as_ref().is_none_or(|d| row.updated_at > d.updated_at) {
                    deleted = Some(row);
                }
            }

            let stored = match deleted {
                Some(old) => Target {
                    id: old.id,
                    created_at: old.created_at,
                    status: TargetStatus::Active,
                    status_description: String::new(),
                    updated_at: Utc::now(),
                    ..target.clone()
                },
                None => {
                    let id = target.id.to_string();
                    if table.get(id.as_str()).map_err(map_err!(Read))?.is_some() {
                        return Err(StoreError::AlreadyExists(format!("target {id}")));
                    }
                    target.clone()
                }
            };

            let value = encode(&stored)?;
            table
                .insert(stored.id.to_string().as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            stored
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(target_id = %stored.id, scope = %stored.scope, "target stored");
        Ok(stored)
    }

    /// Get a target by id, including deleted rows.
    pub fn get_target(&self, id: &TargetId) -> StoreResult<Target> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
        let key = id.to_string();
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => decode(guard.value()),
            None => Err(StoreError::NotFound(format!("target {id}"))),
        }
    }

    /// Get a target by `(host_domain, scope)`, preferring a non-deleted row.
    pub fn get_target_by_natural_key(
        &self,
        host_domain: Option<&str>,
        scope: &str,
    ) -> StoreResult<Target> {
        let wanted = natural_key(host_domain, scope);
        let mut best: Option<Target> = None;
        for target in self.list_targets(false)? {
            if target.natural_key() != wanted {
                continue;
            }
            let better = match &best {
                None => true,
                Some(current) => current.is_deleted() && !target.is_deleted(),
            };
            if better {
                best = Some(target);
            }
        }
        best.ok_or_else(|| StoreError::NotFound(format!("target {wanted}")))
    }

    /// List targets. With `active_only`, deleted rows are skipped.
    pub fn list_targets(&self, active_only: bool) -> StoreResult<Vec<Target>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let target: Target = decode(value.value())?;
            if active_only && target.is_deleted() {
                continue;
            }
            results.push(target);
        }
        Ok(results)
    }

    pub fn update_target_status(
        &self,
        id: &TargetId,
        status: TargetStatus,
        description: &str,
    ) -> StoreResult<Target> {
        self.update_target_with(id, |t| {
            t.status = status;
            t.status_description = description.to_string();
        })
    }

    pub fn update_target_token(
        &self,
        id: &TargetId,
        token: &str,
        expired_at: DateTime<Utc>,
    ) -> StoreResult<Target> {
        self.update_target_with(id, |t| {
            t.installation_token = token.to_string();
            t.token_expired_at = expired_at;
        })
    }

    /// Apply the provisioning parameters that are set in `params`.
    pub fn update_target_params(&self, id: &TargetId, params: &TargetParams) -> StoreResult<Target> {
        self.update_target_with(id, |t| {
            if let Some(rt) = params.resource_type {
                t.resource_type = rt;
            }
            if let Some(version) = &params.runner_version {
                t.runner_version = Some(version.clone());
            }
            if let Some(user) = &params.runner_user {
                t.runner_user = Some(user.clone());
            }
            if let Some(url) = &params.provider_url {
                t.provider_url = (!url.is_empty()).then(|| url.clone());
            }
        })
    }

    /// Soft-delete a target. Deleting a deleted target is a no-op.
    pub fn delete_target(&self, id: &TargetId) -> StoreResult<Target> {
        self.update_target_with(id, |t| {
            t.status = TargetStatus::Deleted;
        })
    }

    /// Read-modify-write a target inside one write transaction.
    fn update_target_with(
        &self,
        id: &TargetId,
        apply: impl FnOnce(&mut Target),
    ) -> StoreResult<Target> {
        let key = id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(TARGETS).map_err(map_err!(Table))?;
            let current = table
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            let mut target: Target = match current {
                Some(bytes) => decode(&bytes)?,
                None => return Err(StoreError::NotFound(format!("target {id}"))),
            };
            apply(&mut target);
            target.updated_at = Utc::now();
            let value = encode(&target)?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            target
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(target_id = %id, status = %updated.status, "target updated");
        Ok(updated)
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Insert a job. Fails if a job with the same id exists.
    pub fn enqueue_job(&self, job: &Job) -> StoreResult<()> {
        let key = job.id.to_string();
        let value = encode(job)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StoreError::AlreadyExists(format!("job {key}")));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(job_id = %job.id, repository = %job.repository, "job enqueued");
        Ok(())
    }

    /// List all pending jobs.
    pub fn list_jobs(&self) -> StoreResult<Vec<Job>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Delete a job. Returns true if it existed; deleting twice is fine.
    pub fn delete_job(&self, id: &JobId) -> StoreResult<bool> {
        let key = id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(job_id = %id, existed, "job deleted");
        Ok(existed)
    }

    // ── Runners ────────────────────────────────────────────────────

    /// Persist a newly provisioned runner.
    ///
    /// Writes the detail row, the live set, the per-target index and the
    /// cloud id index in one transaction. Runner ids are never reused and
    /// a cloud id may back at most one live runner.
    pub fn create_runner(&self, runner: &Runner) -> StoreResult<()> {
        let id = runner.id.to_string();
        let target_id = runner.target_id.to_string();
        let by_target = format!("{target_id}:{id}");
        let detail = Runner {
            deleted_at: None,
            reason: None,
            ..runner.clone()
        };
        let value = encode(&detail)?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut runners = txn.open_table(RUNNERS).map_err(map_err!(Table))?;
            if runners.get(id.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StoreError::AlreadyExists(format!("runner {id}")));
            }
            let mut cloud_ids = txn.open_table(RUNNER_CLOUD_IDS).map_err(map_err!(Table))?;
            if cloud_ids
                .get(runner.cloud_id.as_str())
                .map_err(map_err!(Read))?
                .is_some()
            {
                return Err(StoreError::AlreadyExists(format!(
                    "live runner for cloud id {}",
                    runner.cloud_id
                )));
            }

            runners
                .insert(id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            cloud_ids
                .insert(runner.cloud_id.as_str(), id.as_str())
                .map_err(map_err!(Write))?;

            let mut running = txn.open_table(RUNNERS_RUNNING).map_err(map_err!(Table))?;
            running
                .insert(id.as_str(), target_id.as_str())
                .map_err(map_err!(Write))?;

            let mut index = txn.open_table(RUNNERS_BY_TARGET).map_err(map_err!(Table))?;
            index
                .insert(by_target.as_str(), id.as_str())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(runner_id = %runner.id, cloud_id = %runner.cloud_id, "runner stored");
        Ok(())
    }

    /// Get a live runner.
    pub fn get_runner(&self, id: &RunnerId) -> StoreResult<Runner> {
        let key = id.to_string();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let running = txn.open_table(RUNNERS_RUNNING).map_err(map_err!(Table))?;
        if running.get(key.as_str()).map_err(map_err!(Read))?.is_none() {
            return Err(StoreError::NotFound(format!("runner {id}")));
        }
        let runners = txn.open_table(RUNNERS).map_err(map_err!(Table))?;
        match runners.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => decode(guard.value()),
            None => Err(StoreError::NotFound(format!("runner {id}"))),
        }
    }

    /// Get a tombstoned runner with its deletion time and reason.
    pub fn get_deleted_runner(&self, id: &RunnerId) -> StoreResult<Runner> {
        let key = id.to_string();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let deleted = txn.open_table(RUNNERS_DELETED).map_err(map_err!(Table))?;
        let tombstone: Tombstone = match deleted.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => decode(guard.value())?,
            None => return Err(StoreError::NotFound(format!("deleted runner {id}"))),
        };
        let runners = txn.open_table(RUNNERS).map_err(map_err!(Table))?;
        let mut runner: Runner = match runners.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => decode(guard.value())?,
            None => return Err(StoreError::NotFound(format!("runner {id}"))),
        };
        runner.deleted_at = Some(tombstone.deleted_at);
        runner.reason = Some(tombstone.reason);
        Ok(runner)
    }

    /// List all live runners.
    pub fn list_runners(&self) -> StoreResult<Vec<Runner>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let running = txn.open_table(RUNNERS_RUNNING).map_err(map_err!(Table))?;
        let runners = txn.open_table(RUNNERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in running.iter().map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            if let Some(guard) = runners.get(key.value()).map_err(map_err!(Read))? {
                results.push(decode(guard.value())?);
            }
        }
        Ok(results)
    }

    /// List live runners of one target.
    pub fn list_runners_by_target(&self, target_id: &TargetId) -> StoreResult<Vec<Runner>> {
        let prefix = format!("{target_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let index = txn.open_table(RUNNERS_BY_TARGET).map_err(map_err!(Table))?;
        let runners = txn.open_table(RUNNERS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in index.iter().map_err(map_err!(Read))? {
            let (key, runner_id) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                continue;
            }
            if let Some(guard) = runners.get(runner_id.value()).map_err(map_err!(Read))? {
                results.push(decode(guard.value())?);
            }
        }
        Ok(results)
    }

    /// Move a live runner to the tombstone set.
    ///
    /// Deleting an already tombstoned runner is a no-op: the tombstone is
    /// never rewritten. Unknown ids are `NotFound`.
    pub fn delete_runner(
        &self,
        id: &RunnerId,
        at: DateTime<Utc>,
        reason: DeleteReason,
    ) -> StoreResult<()> {
        let key = id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut deleted = txn.open_table(RUNNERS_DELETED).map_err(map_err!(Table))?;
            if deleted.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                debug!(runner_id = %id, "runner already deleted");
                return Ok(());
            }

            let mut running = txn.open_table(RUNNERS_RUNNING).map_err(map_err!(Table))?;
            let target_id = match running.remove(key.as_str()).map_err(map_err!(Write))? {
                Some(guard) => guard.value().to_string(),
                None => return Err(StoreError::NotFound(format!("runner {id}"))),
            };

            let runners = txn.open_table(RUNNERS).map_err(map_err!(Table))?;
            let detail: Runner = match runners.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StoreError::NotFound(format!("runner {id}"))),
            };

            let mut index = txn.open_table(RUNNERS_BY_TARGET).map_err(map_err!(Table))?;
            index
                .remove(format!("{target_id}:{key}").as_str())
                .map_err(map_err!(Write))?;

            let mut cloud_ids = txn.open_table(RUNNER_CLOUD_IDS).map_err(map_err!(Table))?;
            let owned_by_this = cloud_ids
                .get(detail.cloud_id.as_str())
                .map_err(map_err!(Read))?
                .is_some_and(|guard| guard.value() == key);
            if owned_by_this {
                cloud_ids
                    .remove(detail.cloud_id.as_str())
                    .map_err(map_err!(Write))?;
            }

            let value = encode(&Tombstone {
                deleted_at: at,
                reason,
            })?;
            deleted
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(runner_id = %id, %reason, "runner tombstoned");
        Ok(())
    }

    /// Runners (live or deleted) created at or after `since`.
    pub fn list_runner_log_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Runner>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let runners = txn.open_table(RUNNERS).map_err(map_err!(Table))?;
        let deleted = txn.open_table(RUNNERS_DELETED).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in runners.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let mut runner: Runner = decode(value.value())?;
            if runner.created_at < since {
                continue;
            }
            if let Some(guard) = deleted.get(key.value()).map_err(map_err!(Read))? {
                let tombstone: Tombstone = decode(guard.value())?;
                runner.deleted_at = Some(tombstone.deleted_at);
                runner.reason = Some(tombstone.reason);
            }
            results.push(runner);
        }
        Ok(results)
    }
}
