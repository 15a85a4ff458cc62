//! myshoes-metrics: observability for the myshoes controller.
//!
//! Every subsystem records into one shared [`Metrics`] registry. The API
//! serves the registry as Prometheus text on `/metrics`.
//!
//! # Architecture
//!
//! ```text
//! Metrics (cheap to clone, shared)
//!   ├── inc() / add()      ← counters from ingest, starter, reaper, github
//!   ├── set() / inflight() ← gauges
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod catalog;
pub mod prometheus;
pub mod registry;

pub use catalog::{Descriptor, Kind};
pub use prometheus::render_prometheus;
pub use registry::{InflightGuard, Metrics};
