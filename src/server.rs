//! Status endpoint.
//!
//! [`app`] builds a small read-only router:
//! - `GET /health`: liveness, always `{"status":"ok"}`
//! - `GET /status`: committed role and consensus view
//! - `GET /metrics`: Prometheus exposition
//!
//! Handlers only read; nothing here can change the role.

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub node_id: String,
    pub role: &'static str,
    pub previous_role: &'static str,
    pub leader: Option<String>,
    pub is_leader: bool,
}

/// Build the status [`Router`].
pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status));

    if state.config.observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    router
        .with_state(state)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Bind `listen` and serve until `shutdown` resolves.
pub async fn serve(
    state: Arc<AppState>,
    listen: &str,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(listen = %listen, "status endpoint listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

/// `GET /status`
async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let snapshot = state.machine.snapshot();
    Json(StatusResponse {
        node_id: state.machine.node_id().to_string(),
        role: snapshot.current.as_str(),
        previous_role: snapshot.previous.as_str(),
        leader: state.consensus.current_leader(),
        is_leader: state.consensus.is_self_leader(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::raft::{Consensus, RaftNode};
    use crate::config::Config;
    use crate::hooks::executor::ProcessExecutor;
    use crate::hooks::system::HookSystem;
    use crate::role::RoleMachine;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> (Arc<AppState>, Arc<RaftNode>) {
        let config: Config = serde_yaml::from_str(
            "node: {id: n1, raft_addr: '127.0.0.1:10001', data_dir: /tmp/vip}\n\
             cluster: {nodes: [{id: n1, addr: '127.0.0.1:10001'}]}\n",
        )
        .unwrap();
        let raft = Arc::new(RaftNode::new("n1", "127.0.0.1:10001", vec![]));
        let consensus: Arc<dyn Consensus> = raft.clone();
        let hooks = Arc::new(HookSystem::new(&config, Arc::new(ProcessExecutor::new())));
        let machine = Arc::new(RoleMachine::from_config(
            "n1",
            &config.state,
            hooks,
            consensus.clone(),
        ));
        let state = Arc::new(AppState {
            config,
            machine,
            consensus,
        });
        (state, raft)
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _) = state();
        let (status, body) = get_json(app(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_status_reports_ready_before_leadership() {
        let (state, _) = state();
        let (status, body) = get_json(app(state), "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["node_id"], "n1");
        assert_eq!(body["role"], "Ready");
        assert_eq!(body["previous_role"], "Ready");
        assert!(body["leader"].is_null());
        assert_eq!(body["is_leader"], false);
    }

    #[tokio::test]
    async fn test_status_follows_committed_role() {
        let (state, raft) = state();
        raft.start().unwrap();
        state.machine.observe_leadership(true).await;

        let (_, body) = get_json(app(state), "/status").await;
        assert_eq!(body["role"], "Master");
        assert_eq!(body["previous_role"], "Ready");
        assert_eq!(body["leader"], "n1");
        assert_eq!(body["is_leader"], true);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (state, _) = state();
        let response = app(state)
            .oneshot(Request::get("/vip").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
