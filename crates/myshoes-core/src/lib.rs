//! myshoes-core: shared domain types for the myshoes controller.
//!
//! Everything the control loops agree on lives here: the persisted
//! entities (`Target`, `Job`, `Runner`), the resource size ladder,
//! runner termination modes, `runs-on` label policy, and scope/host
//! parsing. No I/O happens in this crate.

pub mod config;
pub mod error;
pub mod labels;
pub mod scope;
pub mod types;
pub mod version;

pub use config::{RunnerDefaults, WebhookMode};
pub use error::{CoreError, CoreResult};
pub use labels::{RUNNER_LABEL, extract_labels, is_admitted, resource_type_from_labels};
pub use scope::{Scope, api_base_url, host_domain_from_url, parse_repository_url, repository_url};
pub use types::*;
pub use version::RunnerMode;
