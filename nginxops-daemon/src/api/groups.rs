use axum::extract::State;
use axum::Json;

use super::types::{GroupSummary, GroupsResponse, HostSummary};
use super::AppState;

pub(crate) async fn get_groups(State(state): State<AppState>) -> Json<GroupsResponse> {
    let groups = state
        .cfg
        .server_groups
        .iter()
        .map(|group| GroupSummary {
            name: group.group.clone(),
            hosts: group
                .servers
                .iter()
                .map(|server| HostSummary {
                    name: server.name.clone(),
                    host: server.host.clone(),
                    config_dir_suffix: server.config_dir_suffix().to_string(),
                })
                .collect(),
        })
        .collect();

    Json(GroupsResponse { groups })
}
