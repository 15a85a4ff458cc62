//! Metrics registry: labelled counters and gauges shared across tasks.
//!
//! Series are created on first use. Values are f64 so the same storage
//! serves counters, gauges and duration sums.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use crate::catalog::Descriptor;

pub(crate) type LabelSet = Vec<(String, String)>;

pub(crate) struct Family {
    pub(crate) descriptor: Descriptor,
    pub(crate) series: BTreeMap<LabelSet, f64>,
}

/// Shared metrics registry. Clones share state.
#[derive(Clone, Default)]
pub struct Metrics {
    families: Arc<Mutex<BTreeMap<&'static str, Family>>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one.
    pub fn inc(&self, descriptor: &Descriptor, labels: &[(&str, &str)]) {
        self.add(descriptor, labels, 1.0);
    }

    /// Add `delta` to a series (counter increment or gauge adjustment).
    pub fn add(&self, descriptor: &Descriptor, labels: &[(&str, &str)], delta: f64) {
        let mut families = self.lock();
        *Self::series_mut(&mut families, descriptor, labels) += delta;
    }

    /// Set a gauge.
    pub fn set(&self, descriptor: &Descriptor, labels: &[(&str, &str)], value: f64) {
        let mut families = self.lock();
        *Self::series_mut(&mut families, descriptor, labels) = value;
    }

    /// Current value of a series; zero if it was never touched.
    pub fn get(&self, descriptor: &Descriptor, labels: &[(&str, &str)]) -> f64 {
        let families = self.lock();
        families
            .get(descriptor.name)
            .and_then(|f| f.series.get(&label_set(labels)))
            .copied()
            .unwrap_or(0.0)
    }

    /// Bump a gauge for the lifetime of the returned guard.
    pub fn inflight(&self, descriptor: &'static Descriptor) -> InflightGuard {
        self.add(descriptor, &[], 1.0);
        InflightGuard {
            metrics: self.clone(),
            descriptor,
        }
    }

    pub(crate) fn with_families<R>(&self, f: impl FnOnce(&BTreeMap<&'static str, Family>) -> R) -> R {
        f(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<&'static str, Family>> {
        // A panic while holding the lock cannot leave a series half-written.
        self.families.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn series_mut<'a>(
        families: &'a mut BTreeMap<&'static str, Family>,
        descriptor: &Descriptor,
        labels: &[(&str, &str)],
    ) -> &'a mut f64 {
        let family = families.entry(descriptor.name).or_insert_with(|| {
            trace!(metric = descriptor.name, "metric family registered");
            Family {
                descriptor: *descriptor,
                series: BTreeMap::new(),
            }
        });
        family.series.entry(label_set(labels)).or_insert(0.0)
    }
}

fn label_set(labels: &[(&str, &str)]) -> LabelSet {
    let mut set: LabelSet = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    set.sort();
    set
}

/// Decrements its gauge on drop.
pub struct InflightGuard {
    metrics: Metrics,
    descriptor: &'static Descriptor,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.metrics.add(self.descriptor, &[], -1.0);
    }
}
