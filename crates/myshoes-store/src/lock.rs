//! Named advisory locks.
//!
//! A lock is a lease row in the `locks` table. Holding it serializes the
//! starter's dispatch pass across controller processes sharing one data
//! directory. Leases expire so a crashed holder cannot wedge dispatch.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store::{Store, decode, encode, map_err};
use crate::tables::LOCKS;

/// How long an acquired lease stays valid without release.
pub const LEASE_TTL: Duration = Duration::from_secs(60);

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Lease {
    token: Uuid,
    expires_at: DateTime<Utc>,
}

/// Proof of holding a named lock. Pass it back to release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvisoryLock {
    name: String,
    token: Uuid,
}

impl AdvisoryLock {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Store {
    /// Acquire the named lock, waiting up to `timeout`.
    ///
    /// Fails with `LockTimeout` when another holder keeps the lease for the
    /// whole window.
    pub async fn acquire_advisory_lock(
        &self,
        name: &str,
        timeout: Duration,
    ) -> StoreResult<AdvisoryLock> {
        let token = Uuid::new_v4();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.try_acquire_lease(name, token, LEASE_TTL)? {
                debug!(lock = name, "advisory lock acquired");
                return Ok(AdvisoryLock {
                    name: name.to_string(),
                    token,
                });
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                warn!(lock = name, "timed out waiting for advisory lock");
                return Err(StoreError::LockTimeout(name.to_string()));
            }
            tokio::time::sleep(RETRY_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Release a held lock. Returns false if the lease was already lost.
    pub fn release_advisory_lock(&self, lock: &AdvisoryLock) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let released = {
            let mut table = txn.open_table(LOCKS).map_err(map_err!(Table))?;
            let current: Option<Lease> = match table
                .get(lock.name.as_str())
                .map_err(map_err!(Read))?
            {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            match current {
                Some(lease) if lease.token == lock.token => {
                    table
                        .remove(lock.name.as_str())
                        .map_err(map_err!(Write))?;
                    true
                }
                _ => false,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        if released {
            debug!(lock = %lock.name, "advisory lock released");
        } else {
            warn!(lock = %lock.name, "advisory lock lease was lost before release");
        }
        Ok(released)
    }

    /// Take the lease if it is free, expired, or already ours.
    pub(crate) fn try_acquire_lease(
        &self,
        name: &str,
        token: Uuid,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let ttl = TimeDelta::from_std(ttl).map_err(map_err!(Write))?;
        let now = Utc::now();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let acquired = {
            let mut table = txn.open_table(LOCKS).map_err(map_err!(Table))?;
            let current: Option<Lease> = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            let free = current.is_none_or(|lease| lease.token == token || lease.expires_at <= now);
            if free {
                let value = encode(&Lease {
                    token,
                    expires_at: now + ttl,
                })?;
                table
                    .insert(name, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            free
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(acquired)
    }
}
