use crate::routes::chat::status_for;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use parley::Role;
use serde_json::json;

async fn agents_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "agents": state.gateway.agents() }))
}

/// Recent turns for one agent, shaped for display: the user side is labeled
/// "me", system turns and blank content are dropped.
async fn messages_handler(
    State(state): State<AppState>,
    Path(agent): Path<String>,
) -> axum::response::Response {
    match state.gateway.recent_messages(&agent).await {
        Ok(history) => {
            let shaped: Vec<serde_json::Value> = history
                .iter()
                .filter(|m| m.role != Role::System && !m.content.trim().is_empty())
                .map(|m| {
                    let from = match m.role {
                        Role::User => "me",
                        _ => agent.as_str(),
                    };
                    json!({ "from": from, "text": m.content })
                })
                .collect();
            Json(json!({ "messages": shaped })).into_response()
        }
        Err(err) => (status_for(&err), Json(json!({ "error": err.to_string() }))).into_response(),
    }
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let local_up = state.gateway.backend_health().await;
    (StatusCode::OK, Json(json!({ "local_up": local_up })))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/agents", get(agents_handler))
        .route("/messages/:agent", get(messages_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}
