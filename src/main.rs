use std::error::Error;
use std::process::ExitCode;

use tracing::{error, info};

use emergency_cache::cache::{EmergencyCache, Persister, ShutdownMode, open_store};
use emergency_cache::config::{self, Settings};
use emergency_cache::logging;
use emergency_cache::middleware::Logger;
use emergency_cache::proxy::Upstream;
use emergency_cache::server::Server;

#[tokio::main]
async fn main() -> ExitCode {
    let settings = match config::load_with_cli() {
        Ok((_, settings)) => settings,
        Err(e) => {
            eprintln!("emergency-cache: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&settings.logging, settings.cache.debug) {
        eprintln!("emergency-cache: {e}");
        return ExitCode::FAILURE;
    }

    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "emergency-cache exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> Result<(), Box<dyn Error + Send + Sync>> {
    let Settings {
        listen,
        upstream,
        cache,
        ..
    } = settings;

    info!(
        %listen,
        %upstream,
        store = %cache.path,
        emergency_mode = cache.emergency_mode,
        "starting emergency-cache"
    );

    let store = open_store(&cache.path)?;
    let persister = Persister::spawn(store.clone(), cache.persister);
    let handler = Logger::new(EmergencyCache::new(
        cache,
        store,
        persister.handle(),
        Upstream::new(upstream)?,
    ));

    let server = Server::bind(&listen.to_string()).await?;
    server.run_until(handler, shutdown_signal()).await?;

    persister.shutdown(ShutdownMode::Drain).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
