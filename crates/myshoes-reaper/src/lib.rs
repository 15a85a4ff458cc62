//! myshoes-reaper: tombstones runners whose work is over.
//!
//! # Architecture
//!
//! ```text
//! Reaper::run()
//!   └── sweep()  (under the `reaper` advisory lock)
//!         ├── per active target, concurrently: reap_target()
//!         │     ├── Store::list_runners_by_target() + HostingService::list_runners()
//!         │     ├── no runners anywhere → target status `err`
//!         │     └── classify() each live runner by name, age and status
//!         ├── runners of missing or deleted targets → reason `gone`
//!         └── spawn deletion per selected runner
//!               ├── HostingService::remove_runner()   (if listed)
//!               ├── Provisioner::delete_instance()    (semaphore-gated)
//!               └── Store::delete_runner(reason)
//! ```
//!
//! | listed state | age            | reason               |
//! |--------------|----------------|----------------------|
//! | absent       | > 5 min        | `completed`          |
//! | offline      | > 5 min        | `completed`          |
//! | online       | > 6 h          | `reached-hard-limit` |

pub mod classify;
pub mod error;
pub mod reaper;

pub use classify::{Limits, Verdict, classify, runner_mode};
pub use error::{ReaperError, ReaperResult};
pub use reaper::{LOCK_NAME, NO_RUNNER_DESCRIPTION, Reaper, ReaperConfig, SweepReport};
