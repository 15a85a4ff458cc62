//! myshoes-starter: dispatches queued jobs to the provisioner.
//!
//! # Architecture
//!
//! ```text
//! Starter::run()
//!   └── tick()  (under the `starter` advisory lock)
//!         ├── Store::list_jobs()
//!         └── spawn work() per job not in flight
//!               ├── Safety::check()
//!               ├── registration token → setup script (askama, gzip)
//!               ├── ProviderSet::for_target() → Provisioner::add_instance()
//!               ├── strict: wait for the runner to register
//!               ├── Store::create_runner() → Store::delete_job()
//!               └── on failure: backoff_delay(attempt), up to MAX_ATTEMPTS
//! ```

pub mod backoff;
pub mod error;
pub mod safety;
pub mod script;
pub mod starter;

pub use backoff::{MAX_ATTEMPTS, MAX_BACKOFF, backoff_delay};
pub use error::{StarterError, StarterResult};
pub use safety::{Safety, Unlimited};
pub use script::{ScriptParams, build_setup_script};
pub use starter::{JobOutcome, LOCK_NAME, Starter, StarterConfig, TickReport};
