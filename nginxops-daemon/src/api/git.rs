use axum::extract::State;
use axum::Json;

use nginxops_sync::repo;

use super::error::ApiError;
use super::types::GitStatusResponse;
use super::AppState;

pub(crate) async fn get_git_status(
    State(state): State<AppState>,
) -> Result<Json<GitStatusResponse>, ApiError> {
    let git = state.cfg.git.clone();
    let status = tokio::task::spawn_blocking(move || repo::repo_status(&git))
        .await
        .map_err(|err| ApiError::internal(format!("git status task join error: {err}")))??;

    Ok(Json(status.into()))
}
