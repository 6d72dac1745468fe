use anyhow::Result;
use lib_livechan::{BoardFeed, BoardPoller, ChanClient, DirectoryRefresher, DispatchHub, SourceRegistry};
use std::sync::Arc;
use tokio::signal;

mod livechan_logic;
use livechan_logic::{config, downstream, logger, state};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config();
    logger::setup_logging(&config.log_dir(), &config.log_level(), config.log_keep())?;

    let sources = Arc::new(SourceRegistry::new(config.poll_tuning()));
    let hub = DispatchHub::new(Arc::clone(&sources), config.hub_settings());
    let feed: Arc<dyn BoardFeed> = Arc::new(ChanClient::new(config.client_settings())?);

    // An unreachable upstream at startup is not fatal; the periodic refresh retries.
    match sources.refresh(feed.as_ref()).await {
        Ok(_) => log::info!("Loaded {} boards.", sources.list().len()),
        Err(e) => log::error!("Initial board directory load failed: {}", e),
    }
    DirectoryRefresher::new(Arc::clone(&feed), Arc::clone(&sources), config.directory_refresh()).spawn(&hub);
    BoardPoller::new(feed, hub.clone()).spawn();

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let app_state = state::AppState::new(hub.clone(), config.listener_queue());
    let mut downstream_handle = tokio::spawn(downstream::run(
        config.clone(),
        app_state,
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate() => {
            log::info!("SIGTERM received, initiating shutdown.");
        }
        result = &mut downstream_handle => {
            match result {
                Ok(Ok(())) => log::warn!("Downstream server stopped unexpectedly."),
                Ok(Err(e)) => log::error!("Downstream server failed: {}", e),
                Err(e) => log::error!("Downstream server task panicked: {}", e),
            }
            hub.shutdown().await;
            anyhow::bail!("Downstream server exited");
        }
    }

    // Send shutdown signal to the HTTP server, then stop the engine
    let _ = shutdown_tx.send(());
    match downstream_handle.await {
        Ok(Err(e)) => log::error!("Downstream server failed during shutdown: {}", e),
        Err(e) => log::error!("Downstream server task panicked: {}", e),
        Ok(Ok(())) => {}
    }
    hub.shutdown().await;

    log::info!("Shutdown complete.");
    Ok(())
}

async fn terminate() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                log::warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        // On non-unix platforms, just wait forever.
        std::future::pending::<()>().await;
    }
}
