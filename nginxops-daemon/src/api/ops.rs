//! Check and apply handlers, the operator-triggered entry points into the
//! push pipeline.

use axum::extract::{Query, State};
use axum::Json;

use nginxops_core::keys;
use nginxops_transport::{
    nginx_reload_command, nginx_test_command, push_prefix, run_remote_command,
};

use super::error::ApiError;
use super::types::{ApplyResponse, CheckResponse, Mode, ModeQuery, TargetRequest};
use super::AppState;

/// Push the chosen namespace to the host's check directory and run
/// `nginx -t` against it. A failing test is an `ok: false` response, not an
/// error; the bytes are already in the check directory for inspection.
pub(crate) async fn check_config(
    State(state): State<AppState>,
    Query(ModeQuery { mode }): Query<ModeQuery>,
    Json(req): Json<TargetRequest>,
) -> Result<Json<CheckResponse>, ApiError> {
    let target = state
        .find_target(&req.group, &req.server)
        .ok_or_else(ApiError::server_not_found)?;

    let source_prefix = match mode {
        Mode::Preview => &state.cfg.sync.preview_syncer.key_prefix,
        Mode::Prod => &state.cfg.sync.git_syncer.key_prefix,
    };
    let source_ns = keys::namespace_prefix(
        source_prefix,
        &req.group,
        &req.server,
        target.config_dir_suffix(),
    );
    let check_dir = target.check_dir();

    let pool = state.pool_for(&target).await?;
    let outcome = push_prefix(&state.store, pool.clone(), &source_ns, &check_dir).await?;

    let command = nginx_test_command(&target, &check_dir);
    let nginx = run_remote_command(pool, command).await?;

    Ok(Json(CheckResponse {
        ok: nginx.ok,
        mode,
        sync: outcome.into(),
        nginx: nginx.into(),
    }))
}

/// Push the committed (`git`) namespace to the live config directory and
/// reload nginx.
pub(crate) async fn apply_config(
    State(state): State<AppState>,
    Json(req): Json<TargetRequest>,
) -> Result<Json<ApplyResponse>, ApiError> {
    let target = state
        .find_target(&req.group, &req.server)
        .ok_or_else(ApiError::server_not_found)?;

    let source_ns = keys::namespace_prefix(
        &state.cfg.sync.git_syncer.key_prefix,
        &req.group,
        &req.server,
        target.config_dir_suffix(),
    );

    let pool = state.pool_for(&target).await?;
    let outcome = push_prefix(
        &state.store,
        pool.clone(),
        &source_ns,
        &target.nginx_config_dir,
    )
    .await?;

    let nginx = run_remote_command(pool, nginx_reload_command(&target)).await?;

    let message = if nginx.ok {
        format!(
            "config applied (total: {}, updated: {}, skipped: {}) and nginx reloaded",
            outcome.total, outcome.updated, outcome.skipped
        )
    } else {
        "failed to reload nginx".to_string()
    };

    Ok(Json(ApplyResponse {
        ok: nginx.ok,
        message,
        sync: outcome.into(),
        nginx: nginx.into(),
    }))
}
