//! Webhook intake.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use tracing::{debug, warn};

use myshoes_ingest::Outcome;

use crate::ApiState;
use crate::error::{ApiError, ApiResult};

pub const EVENT_HEADER: &str = "x-github-event";
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// POST /github/events
///
/// Enqueued, rejected and ignored deliveries all answer 204. Bad
/// signatures and malformed payloads answer 400.
pub async fn receive_event(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let event = header(EVENT_HEADER)
        .ok_or_else(|| ApiError::BadRequest(format!("missing {EVENT_HEADER} header")))?;
    let signature = header(SIGNATURE_HEADER);

    match state.ingestor.handle(event, signature, &body).await {
        Ok(Outcome::Enqueued(job_id)) => debug!(%job_id, event, "webhook enqueued"),
        Ok(Outcome::Rejected(reason)) => debug!(reason = reason.as_str(), event, "webhook rejected"),
        Ok(Outcome::Ignored) => {}
        Err(e) if e.is_client_error() => {
            warn!(event, error = %e, "bad webhook delivery");
            return Err(ApiError::BadRequest(e.to_string()));
        }
        Err(e) => return Err(ApiError::Internal(e.to_string())),
    }
    Ok(StatusCode::NO_CONTENT)
}
