use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use mineswap::config::GlobalConfig;
use mineswap::ipc::IPCServer;
use mineswap::manager::Manager;
use mineswap::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 콘솔 출력은 stdout, 진단 로그는 stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    tracing::info!("mineswap daemon starting");

    let cfg = GlobalConfig::load()?;
    let manager = Arc::new(Manager::new(&cfg));

    // Console follower: prints every appended line verbatim
    let mut lines = manager.console().subscribe();
    tokio::spawn(async move {
        loop {
            match lines.recv().await {
                Ok(line) => {
                    let mut out = std::io::stdout().lock();
                    let _ = out.write_all(line.content.as_bytes());
                    let _ = out.flush();
                }
                Err(RecvError::Lagged(n)) => tracing::warn!("Console follower skipped {} lines", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    match manager.initialize() {
        Ok(servers) => tracing::info!("{} server(s) in {}", servers.len(), cfg.servers_dir.display()),
        Err(e) => tracing::warn!("Initial scan failed: {}", e),
    }

    let interactive = manager.clone();
    tokio::spawn(async move {
        if let Err(e) = cli::run(interactive).await {
            tracing::error!("Interactive console error: {}", e);
        }
    });

    let ipc_server = IPCServer::new(manager.clone(), &cfg.ipc_listen);
    tokio::select! {
        result = ipc_server.start() => {
            if let Err(e) = result {
                tracing::error!("IPC server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, cleaning up...");
        }
    }

    // stop_timeout 이후 강제 종료까지 기다릴 여유
    manager
        .shutdown(Duration::from_secs(cfg.stop_timeout_secs + 5))
        .await;

    tracing::info!("mineswap daemon shutting down");
    // stdin 읽기 스레드가 런타임 종료를 막으므로 바로 종료
    std::process::exit(0);
}
