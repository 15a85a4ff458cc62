//! Pre-provisioning gate.

use async_trait::async_trait;
use myshoes_core::Job;

use crate::error::StarterResult;

/// Decides whether a job may be provisioned now. Returning `false` leaves
/// the job queued for the next tick.
#[async_trait]
pub trait Safety: Send + Sync {
    async fn check(&self, job: &Job) -> StarterResult<bool>;
}

/// Always allows provisioning.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

#[async_trait]
impl Safety for Unlimited {
    async fn check(&self, _job: &Job) -> StarterResult<bool> {
        Ok(true)
    }
}
