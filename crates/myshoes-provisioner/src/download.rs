//! Resolving a plugin location to an executable on disk.
//!
//! Local paths are used as-is. `http://` and `https://` locations are
//! downloaded once into the cache directory under the SHA-256 of the URL
//! and reused on later calls.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{ProvisionError, ProvisionResult};

#[derive(Clone)]
pub struct PluginFetcher {
    http: reqwest::Client,
    cache_dir: PathBuf,
}

impl PluginFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            http: reqwest::Client::new(),
            cache_dir: cache_dir.into(),
        }
    }

    pub async fn resolve(&self, location: &str) -> ProvisionResult<PathBuf> {
        if is_remote(location) {
            return self.download(location).await;
        }
        let path = Path::new(location);
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(path.to_path_buf()),
            Ok(_) => Err(ProvisionError::Download(format!("{location} is not a file"))),
            Err(e) => Err(ProvisionError::Download(format!("{location}: {e}"))),
        }
    }

    /// Where a remote plugin is cached.
    pub fn cache_path(&self, url: &str) -> PathBuf {
        self.cache_dir
            .join(hex::encode(Sha256::digest(url.as_bytes())))
    }

    async fn download(&self, url: &str) -> ProvisionResult<PathBuf> {
        let dest = self.cache_path(url);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            debug!(%url, path = %dest.display(), "using cached plugin");
            return Ok(dest);
        }

        let fail = |e: &dyn std::fmt::Display| ProvisionError::Download(format!("{url}: {e}"));
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| fail(&e))?;

        let response = self.http.get(url).send().await.map_err(|e| fail(&e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(fail(&format!("unexpected status {status}")));
        }
        let body = response.bytes().await.map_err(|e| fail(&e))?;

        // Write beside the final name so a partial file is never executed.
        let partial = dest.with_extension("part");
        tokio::fs::write(&partial, &body)
            .await
            .map_err(|e| fail(&e))?;
        tokio::fs::set_permissions(&partial, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| fail(&e))?;
        tokio::fs::rename(&partial, &dest)
            .await
            .map_err(|e| fail(&e))?;

        info!(%url, path = %dest.display(), bytes = body.len(), "plugin downloaded");
        Ok(dest)
    }
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}
