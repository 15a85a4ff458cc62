//! myshoes-ingest: how work enters the queue.
//!
//! Two producers write [`Job`](myshoes_core::Job) rows: the webhook
//! [`Ingestor`] for live deliveries, and the [`BackFiller`] that sweeps
//! for workflow runs the webhook path never delivered.
//!
//! # Architecture
//!
//! ```text
//! POST /github/events
//!   └── Ingestor::handle()
//!         ├── verify_signature()  → X-Hub-Signature-256
//!         ├── parse_event()       → check_run / workflow_job / ping
//!         ├── Admission::of()     → runs-on label policy
//!         ├── resolve_target()    → repository target, else organization
//!         └── Store::enqueue_job()
//!
//! BackFiller::run()
//!   └── sweep() → runner log → stale pending runs → queued jobs → enqueue
//! ```

pub mod backfill;
pub mod error;
pub mod event;
pub mod ingestor;
pub mod resolve;
pub mod signature;

pub use backfill::{BackFiller, BackfillReport};
pub use error::{IngestError, IngestResult};
pub use ingestor::{Admission, Ingestor, Outcome, Rejection};
pub use resolve::resolve_target;
pub use signature::{sign, verify_signature};
