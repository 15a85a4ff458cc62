//! In-memory [`Provisioner`] for tests of the controller loops.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ProvisionError, ProvisionResult};
use crate::service::{Instance, InstanceSpec, Provisioner};

#[derive(Default)]
struct State {
    next_id: u64,
    add_attempts: usize,
    added: Vec<InstanceSpec>,
    deleted: Vec<String>,
    live: HashSet<String>,
    failing_adds: usize,
    failing_deletes: usize,
    add_delay: Duration,
    delete_delay: Duration,
    deleting: usize,
    peak_deleting: usize,
    adding: usize,
    peak_adding: usize,
}

/// Scriptable provisioner.
///
/// Instances are named `fake-<n>`. Deleting an instance it never created
/// answers `NotFound`, like a real provider would.
pub struct FakeProvisioner {
    shoes_type: String,
    state: Mutex<State>,
}

impl Default for FakeProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProvisioner {
    pub fn new() -> Self {
        Self::with_shoes_type("fake")
    }

    pub fn with_shoes_type(shoes_type: &str) -> Self {
        Self {
            shoes_type: shoes_type.to_string(),
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next `n` add calls fail.
    pub fn fail_next_adds(&self, n: usize) {
        self.lock().failing_adds = n;
    }

    /// Make the next `n` delete calls fail with a non-NotFound error.
    pub fn fail_next_deletes(&self, n: usize) {
        self.lock().failing_deletes = n;
    }

    pub fn set_add_delay(&self, delay: Duration) {
        self.lock().add_delay = delay;
    }

    pub fn set_delete_delay(&self, delay: Duration) {
        self.lock().delete_delay = delay;
    }

    /// Successful adds, in order.
    pub fn added(&self) -> Vec<InstanceSpec> {
        self.lock().added.clone()
    }

    pub fn add_attempts(&self) -> usize {
        self.lock().add_attempts
    }

    /// Every delete call, including failed ones.
    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    pub fn live_instances(&self) -> Vec<String> {
        let mut live: Vec<String> = self.lock().live.iter().cloned().collect();
        live.sort();
        live
    }

    pub fn peak_concurrent_adds(&self) -> usize {
        self.lock().peak_adding
    }

    pub fn peak_concurrent_deletes(&self) -> usize {
        self.lock().peak_deleting
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn add_instance(&self, spec: &InstanceSpec) -> ProvisionResult<Instance> {
        let delay = {
            let mut state = self.lock();
            state.add_attempts += 1;
            state.adding += 1;
            state.peak_adding = state.peak_adding.max(state.adding);
            state.add_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        state.adding -= 1;
        if state.failing_adds > 0 {
            state.failing_adds -= 1;
            return Err(ProvisionError::Rpc("insufficient capacity".to_string()));
        }
        state.next_id += 1;
        let n = state.next_id;
        let cloud_id = format!("fake-{n}");
        state.live.insert(cloud_id.clone());
        state.added.push(spec.clone());
        Ok(Instance {
            cloud_id,
            shoes_type: self.shoes_type.clone(),
            ip_address: format!("10.0.0.{n}"),
            resource_type: spec.resource_type,
        })
    }

    async fn delete_instance(&self, cloud_id: &str, _labels: &[String]) -> ProvisionResult<()> {
        let delay = {
            let mut state = self.lock();
            state.deleted.push(cloud_id.to_string());
            state.deleting += 1;
            state.peak_deleting = state.peak_deleting.max(state.deleting);
            state.delete_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        state.deleting -= 1;
        if state.failing_deletes > 0 {
            state.failing_deletes -= 1;
            return Err(ProvisionError::Unavailable("provider timeout".to_string()));
        }
        if state.live.remove(cloud_id) {
            Ok(())
        } else {
            Err(ProvisionError::NotFound(cloud_id.to_string()))
        }
    }
}
