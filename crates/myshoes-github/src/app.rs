//! GitHub App credentials and JWT minting.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;

use crate::error::{GitHubError, GitHubResult};

/// Backdate `iat` to tolerate clock drift against the hosting service.
const CLOCK_DRIFT_SECS: i64 = 60;
/// App JWTs may live at most 10 minutes.
const JWT_LIFETIME_SECS: i64 = 9 * 60;

#[derive(Debug, Serialize)]
struct Claims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// Identity of the GitHub App the controller acts as.
#[derive(Clone)]
pub struct AppCredentials {
    app_id: i64,
    key: EncodingKey,
}

impl fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

impl AppCredentials {
    pub fn from_pem(app_id: i64, pem: &[u8]) -> GitHubResult<Self> {
        let key = EncodingKey::from_rsa_pem(pem)
            .map_err(|e| GitHubError::Auth(format!("invalid RSA private key: {e}")))?;
        Ok(Self { app_id, key })
    }

    /// Parse the `GITHUB_PRIVATE_KEY_BASE64` form.
    pub fn from_base64_pem(app_id: i64, encoded: &str) -> GitHubResult<Self> {
        let pem = STANDARD
            .decode(encoded.trim())
            .map_err(|e| GitHubError::Auth(format!("private key is not base64: {e}")))?;
        Self::from_pem(app_id, &pem)
    }

    pub fn app_id(&self) -> i64 {
        self.app_id
    }

    /// Mint an app JWT for app-level endpoints.
    pub fn jwt(&self) -> GitHubResult<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iat: now - CLOCK_DRIFT_SECS,
            exp: now + JWT_LIFETIME_SECS,
            iss: self.app_id.to_string(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| GitHubError::Auth(format!("failed to sign app JWT: {e}")))
    }
}
