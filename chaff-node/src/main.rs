// CHAFF node daemon: tiered block caches, RPC listener, overlay bootstrap.

use chaff_node::{config, router::Router, RouterEvent};
use tracing::{debug, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("chaff-node {}", VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = config::load();
    let identity = chaff_core::Id::random();
    info!(id = %identity, port = cfg.listen_port, "starting node");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let router = Router::new(identity, &cfg);
        let addr = router.listen().await?;
        info!(%addr, "listening");

        let mut seeds = Vec::new();
        for entry in &cfg.bootstrap {
            match config::parse_seed(entry) {
                Ok(peer) => seeds.push(peer),
                Err(err) => warn!(entry, error = %err, "bad bootstrap entry, skipped"),
            }
        }
        if !seeds.is_empty() {
            if let Err(err) = router.bootstrap(&seeds).await {
                warn!(error = %err, "bootstrap incomplete");
            }
        }

        let mut events = router.subscribe();
        let mut connections = router.connections();
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = events.recv() => match event {
                    Ok(RouterEvent::Full(kind)) => {
                        warn!(tier = kind.name(), "cache full");
                    }
                    Ok(RouterEvent::Capacity(kind, pct)) => {
                        debug!(tier = kind.name(), percent_free = pct, "capacity changed");
                    }
                    Err(_) => {}
                },
                changed = connections.changed() => {
                    if changed.is_ok() {
                        info!(peers = *connections.borrow(), "peer count changed");
                    }
                }
            }
        }
        info!("shutting down");
        Ok::<(), anyhow::Error>(())
    })?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
