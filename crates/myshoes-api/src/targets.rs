//! Target administration.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use myshoes_core::{ResourceType, RunnerMode, Scope, Target, TargetId, TargetParams, TargetStatus};

use crate::ApiState;
use crate::error::{ApiError, ApiResult};

/// A target as rendered by the API. The installation token is left out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetView {
    pub id: TargetId,
    pub scope: String,
    pub host_domain: Option<String>,
    pub installation_id: i64,
    pub token_expired_at: DateTime<Utc>,
    pub resource_type: ResourceType,
    pub runner_version: Option<String>,
    pub runner_user: Option<String>,
    pub provider_url: Option<String>,
    pub status: TargetStatus,
    pub status_description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Target> for TargetView {
    fn from(t: Target) -> Self {
        Self {
            id: t.id,
            scope: t.scope,
            host_domain: t.host_domain,
            installation_id: t.installation_id,
            token_expired_at: t.token_expired_at,
            resource_type: t.resource_type,
            runner_version: t.runner_version,
            runner_user: t.runner_user,
            provider_url: t.provider_url,
            status: t.status,
            status_description: t.status_description,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTarget {
    pub scope: String,
    #[serde(default)]
    pub resource_type: ResourceType,
    pub runner_version: Option<String>,
    pub runner_user: Option<String>,
    pub provider_url: Option<String>,
}

fn parse_id(id: &str) -> ApiResult<TargetId> {
    Uuid::parse_str(id).map_err(|_| ApiError::BadRequest(format!("invalid target id: {id}")))
}

fn validate_runner(version: Option<&str>, user: Option<&str>) -> ApiResult<()> {
    if let Some(version) = version {
        RunnerMode::from_version(version)?;
    }
    if user.is_some_and(|u| u.trim().is_empty()) {
        return Err(ApiError::BadRequest("runner_user must not be empty".to_string()));
    }
    Ok(())
}

/// Get a target that has not been deleted.
fn live_target(state: &ApiState, id: &TargetId) -> ApiResult<Target> {
    let target = state.store.get_target(id)?;
    if target.is_deleted() {
        return Err(ApiError::NotFound(format!("target {id} not found")));
    }
    Ok(target)
}

/// POST /target
pub async fn create_target(
    State(state): State<ApiState>,
    body: Result<Json<CreateTarget>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(req) = body?;
    let scope: Scope = req.scope.parse()?;
    validate_runner(req.runner_version.as_deref(), req.runner_user.as_deref())?;

    let host_domain = state.host_domain.clone();
    let scope = scope.to_string();
    let installation_id = state
        .hosting
        .find_installation(host_domain.as_deref(), &scope)
        .await?;
    let token = state
        .hosting
        .installation_token(host_domain.as_deref(), installation_id)
        .await?;

    let now = Utc::now();
    let target = Target {
        id: Uuid::new_v4(),
        scope,
        host_domain,
        installation_id,
        installation_token: token.token,
        token_expired_at: token.expires_at,
        resource_type: req.resource_type,
        runner_version: req.runner_version,
        runner_user: req.runner_user,
        provider_url: req.provider_url.filter(|u| !u.is_empty()),
        status: TargetStatus::Active,
        status_description: String::new(),
        created_at: now,
        updated_at: now,
    };
    let stored = state.store.create_target(&target)?;
    info!(target_id = %stored.id, scope = %stored.scope, installation_id, "target created");
    Ok((StatusCode::CREATED, Json(TargetView::from(stored))))
}

/// GET /target
pub async fn list_targets(State(state): State<ApiState>) -> ApiResult<Json<Vec<TargetView>>> {
    let targets = state.store.list_targets(true)?;
    Ok(Json(targets.into_iter().map(TargetView::from).collect()))
}

/// GET /target/{id}
pub async fn get_target(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<TargetView>> {
    let id = parse_id(&id)?;
    Ok(Json(live_target(&state, &id)?.into()))
}

/// PATCH /target/{id}
pub async fn update_target(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Result<Json<TargetParams>, JsonRejection>,
) -> ApiResult<Json<TargetView>> {
    let id = parse_id(&id)?;
    let Json(params) = body?;
    validate_runner(params.runner_version.as_deref(), params.runner_user.as_deref())?;
    live_target(&state, &id)?;

    let updated = state.store.update_target_params(&id, &params)?;
    info!(target_id = %id, resource_type = %updated.resource_type, "target updated");
    Ok(Json(updated.into()))
}

/// DELETE /target/{id}
pub async fn delete_target(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id)?;
    let target = state.store.get_target(&id)?;
    if target.is_deleted() {
        return Ok(StatusCode::NO_CONTENT);
    }
    let live = state.store.list_runners_by_target(&id)?;
    if !live.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "target {id} still has {} live runners",
            live.len()
        )));
    }
    state.store.delete_target(&id)?;
    info!(target_id = %id, scope = %target.scope, "target deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::to_bytes;
    use axum::response::Response;
    use myshoes_github::fake::FakeHosting;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    fn state() -> (ApiState, Arc<FakeHosting>) {
        let hosting = Arc::new(FakeHosting::new());
        hosting.add_installation("octocat", 42);
        (ApiState::for_tests(hosting.clone()), hosting)
    }

    fn create_body(value: Value) -> Result<Json<CreateTarget>, JsonRejection> {
        Ok(Json(serde_json::from_value(value).unwrap()))
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create(state: &ApiState, scope: &str) -> TargetView {
        let resp = create_target(
            State(state.clone()),
            create_body(json!({"scope": scope, "resource_type": "large"})),
        )
        .await
        .unwrap()
        .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        serde_json::from_value(body_json(resp).await).unwrap()
    }

    #[tokio::test]
    async fn create_resolves_installation_and_hides_token() {
        let (state, _) = state();
        let resp = create_target(
            State(state.clone()),
            create_body(json!({"scope": "octocat/hello-world", "resource_type": "large"})),
        )
        .await
        .unwrap()
        .into_response();

        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = body_json(resp).await;
        assert_eq!(body["scope"], "octocat/hello-world");
        assert_eq!(body["installation_id"], 42);
        assert_eq!(body["resource_type"], "large");
        assert_eq!(body["status"], "active");
        assert!(body.get("installation_token").is_none());

        let stored = state.store.list_targets(true).unwrap();
        assert_eq!(stored[0].installation_token, "ghs_42");
    }

    #[tokio::test]
    async fn duplicate_scope_is_rejected() {
        let (state, _) = state();
        create(&state, "octocat").await;
        let err = create_target(State(state), create_body(json!({"scope": "octocat"})))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let (state, _) = state();
        for body in [
            json!({"scope": "a/b/c"}),
            json!({"scope": "octocat", "runner_version": "2.300"}),
            json!({"scope": "octocat", "runner_user": " "}),
            json!({"scope": "unknown-org"}),
        ] {
            let err = create_target(State(state.clone()), create_body(body.clone()))
                .await
                .err()
                .unwrap();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST, "{body}");
        }
    }

    #[tokio::test]
    async fn get_update_and_delete() {
        let (state, _) = state();
        let created = create(&state, "octocat/hello-world").await;
        let id = created.id.to_string();

        let Json(fetched) = get_target(State(state.clone()), Path(id.clone())).await.unwrap();
        assert_eq!(fetched, created);

        let params = TargetParams {
            resource_type: Some(ResourceType::Small),
            runner_version: Some("v2.305.0".to_string()),
            ..TargetParams::default()
        };
        let Json(updated) = update_target(State(state.clone()), Path(id.clone()), Ok(Json(params)))
            .await
            .unwrap();
        assert_eq!(updated.resource_type, ResourceType::Small);
        assert_eq!(updated.runner_version.as_deref(), Some("v2.305.0"));

        let status = delete_target(State(state.clone()), Path(id.clone())).await.unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        let err = get_target(State(state.clone()), Path(id.clone())).await.err().unwrap();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let Json(all) = list_targets(State(state)).await.unwrap();
        assert!(all.is_empty());
    }

    #[tokio::test]
    async fn unknown_and_malformed_ids() {
        let (state, _) = state();
        let err = get_target(State(state.clone()), Path(Uuid::new_v4().to_string()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        let err = delete_target(State(state), Path("not-a-uuid".to_string()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn recreating_a_deleted_scope_resurrects_it() {
        let (state, _) = state();
        let first = create(&state, "octocat").await;
        delete_target(State(state.clone()), Path(first.id.to_string()))
            .await
            .unwrap();

        let second = create(&state, "octocat").await;
        assert_eq!(second.id, first.id);
        assert_eq!(second.status, TargetStatus::Active);
        assert_eq!(second.resource_type, ResourceType::Large);
    }
}
