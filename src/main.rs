use std::sync::Arc;
use std::time::Duration;

use blockhost::config::GlobalConfig;
use blockhost::console::HubRegistry;
use blockhost::instance::JsonInstanceStore;
use blockhost::ipc::IPCServer;
use blockhost::java_env::JavaRuntimes;
use blockhost::supervisor::Supervisor;
use tracing_subscriber::EnvFilter;

/// Grace period for servers to save and exit when the daemon shuts down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("blockhost daemon starting");

    let cfg = GlobalConfig::load()?;

    let store = Arc::new(JsonInstanceStore::open(&cfg.instances_file)?);
    let runtimes = Arc::new(JavaRuntimes::new(&cfg.runtimes_path, cfg.java_path.clone()));
    let hubs = Arc::new(HubRegistry::new(cfg.console.into()));
    let supervisor = Arc::new(Supervisor::new(store, runtimes, hubs, &cfg.servers_path, cfg.ports));

    // 데몬 재시작 후 남은 RUNNING/STOPPING 기록 정리
    match supervisor.reset_stale_statuses() {
        Ok(0) => {}
        Ok(n) => tracing::info!("Reset {} stale instance status(es)", n),
        Err(e) => tracing::warn!("Failed to reset stale statuses: {}", e),
    }

    let ipc_server = IPCServer::new(supervisor.clone(), cfg.listen_addr);
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received, cleaning up...");
    };

    let served = ipc_server.start(shutdown).await;
    if let Err(e) = &served {
        tracing::error!("IPC server error: {:#}", e);
    }

    supervisor.stop_all(SHUTDOWN_GRACE).await;
    tracing::info!("blockhost daemon shutting down");
    served
}
