//! Runner termination modes.
//!
//! Runner binaries from `v2.282.0` on support `--ephemeral`: the runner
//! deregisters itself after its job. Older binaries run with `--once` and
//! stay listed as `offline` afterwards.

use semver::Version;

use crate::error::{CoreError, CoreResult};

/// Version string meaning "newest release at boot time".
pub const LATEST: &str = "latest";

const EPHEMERAL_SINCE: Version = Version::new(2, 282, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerMode {
    Ephemeral,
    Once,
}

impl RunnerMode {
    /// Derive the mode from a declared runner version (`vX.Y.Z` or `latest`).
    pub fn from_version(version: &str) -> CoreResult<Self> {
        if version == LATEST {
            return Ok(RunnerMode::Ephemeral);
        }
        let parsed = parse_version(version)?;
        if parsed >= EPHEMERAL_SINCE {
            Ok(RunnerMode::Ephemeral)
        } else {
            Ok(RunnerMode::Once)
        }
    }

    /// Flag passed to the runner's `config.sh`.
    pub fn config_flag(&self) -> &'static str {
        match self {
            RunnerMode::Ephemeral => "--ephemeral",
            RunnerMode::Once => "--once",
        }
    }
}

/// Validate a declared runner version.
pub fn validate_version(version: &str) -> CoreResult<()> {
    if version == LATEST {
        return Ok(());
    }
    parse_version(version).map(|_| ())
}

fn parse_version(version: &str) -> CoreResult<Version> {
    let bare = version
        .strip_prefix('v')
        .ok_or_else(|| CoreError::InvalidRunnerVersion(version.to_string()))?;
    Version::parse(bare).map_err(|_| CoreError::InvalidRunnerVersion(version.to_string()))
}
