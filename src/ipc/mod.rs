//! Local HTTP/WebSocket control surface for the daemon.

pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::instance::ServerInstance;
use crate::supervisor::Supervisor;

/// IPC 요청/응답 타입
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceInfo {
    #[serde(flatten)]
    pub instance: ServerInstance,
    /// Whether a live process is tracked right now.
    pub running: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceListResponse {
    pub instances: Vec<InstanceInfo>,
}

/// IPC Server State
#[derive(Clone)]
pub struct IPCServer {
    pub supervisor: Arc<Supervisor>,
    pub listen_addr: SocketAddr,
}

impl IPCServer {
    pub fn new(supervisor: Arc<Supervisor>, listen_addr: SocketAddr) -> Self {
        Self { supervisor, listen_addr }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/instances", get(handlers::instance::list_instances))
            .route("/api/instance/:id/start", post(handlers::instance::start_instance))
            .route("/api/instance/:id/stop", post(handlers::instance::stop_instance))
            .route("/api/instance/:id/kill", post(handlers::instance::kill_instance))
            .route("/api/instance/:id/command", post(handlers::instance::execute_command))
            .route("/api/instance/:id/stats", get(handlers::instance::instance_stats))
            .route("/api/instance/:id/console", get(handlers::console::console_socket))
            .route("/api/instance/:id/console/history", get(handlers::console::console_history))
            .with_state(self.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `shutdown` resolves.
    pub async fn start(self, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> Result<()> {
        let router = self.router();

        // TCP 리스너
        let listener = tokio::net::TcpListener::bind(self.listen_addr).await?;
        tracing::info!("IPC listening on http://{}", listener.local_addr()?);

        axum::serve(listener, router).with_graceful_shutdown(shutdown).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::HubRegistry;
    use crate::instance::{JsonInstanceStore, ServerInstance};
    use crate::java_env::RuntimeProvider;
    use crate::port::PortRange;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    struct NoRuntime;

    #[async_trait::async_trait]
    impl RuntimeProvider for NoRuntime {
        async fn ensure_runtime(&self, _major: u32) -> anyhow::Result<std::path::PathBuf> {
            Err(anyhow::anyhow!("unavailable"))
        }
    }

    fn server(dir: &std::path::Path) -> (IPCServer, String) {
        let store = Arc::new(JsonInstanceStore::new(dir.join("instances.json")));
        let inst = ServerInstance::new("lobby", "paper", "1.20.4", 25565, 1024);
        let id = inst.id.clone();
        store.add(inst).unwrap();

        let supervisor = Supervisor::new(
            store,
            Arc::new(NoRuntime),
            Arc::new(HubRegistry::default()),
            dir.join("servers"),
            PortRange::default(),
        );
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        (IPCServer::new(Arc::new(supervisor), addr), id)
    }

    async fn call(server: &IPCServer, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = server.router().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_list_instances() {
        let dir = tempfile::tempdir().unwrap();
        let (server, id) = server(dir.path());

        let (status, body) = call(&server, "GET", "/api/instances", None).await;
        assert_eq!(status, StatusCode::OK);
        let list = body["instances"].as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["id"], id.as_str());
        assert_eq!(list[0]["status"], "STOPPED");
        assert_eq!(list[0]["running"], false);
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let (server, id) = server(dir.path());

        let (status, body) = call(&server, "POST", "/api/instance/ghost/start", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_code"], "INSTANCE_NOT_FOUND");

        let (status, body) = call(&server, "POST", &format!("/api/instance/{}/stop", id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error_code"], "NOT_RUNNING");

        let (status, _) = call(
            &server,
            "POST",
            &format!("/api/instance/{}/command", id),
            Some(serde_json::json!({ "command": "list" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_console_history_of_stopped_instance() {
        let dir = tempfile::tempdir().unwrap();
        let (server, id) = server(dir.path());

        let (status, body) = call(&server, "GET", &format!("/api/instance/{}/console/history", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["lines"], serde_json::json!([]));

        let (status, _) = call(&server, "GET", "/api/instance/ghost/console/history", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stats_of_stopped_instance() {
        let dir = tempfile::tempdir().unwrap();
        let (server, id) = server(dir.path());

        let (status, body) = call(&server, "GET", &format!("/api/instance/{}/stats", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["running"], false);
        assert_eq!(body["disk_bytes"], 0);
    }
}
