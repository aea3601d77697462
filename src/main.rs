mod api;
mod bus;
mod capability;
mod config;
mod console;
mod crypto;
mod gateway;
mod lifecycle;
mod messages;
mod range;
mod server;
mod settings;
mod state;

#[cfg(test)]
mod testutil;

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use api::client::OriginClient;
use bus::MessageBus;
use capability::sealed::SealedLoader;
use capability::CapabilityLoader;
use config::{Args, GatewayConfig};
use gateway::Dispatcher;
use lifecycle::LifecycleManager;
use settings::SettingsStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = GatewayConfig::from(Args::parse());
    log::info!("vaultgate starting (origin {})", config.origin);

    let origin = Arc::new(OriginClient::new(&config.origin, config.timeout));
    let settings = SettingsStore::new(config.settings_path());
    log::info!("Settings stored in {}", settings.path().display());

    let (bus, commands) = MessageBus::new();
    let loader: Arc<dyn CapabilityLoader> = Arc::new(SealedLoader::new(origin.clone()));
    let (lifecycle, lifecycle_task) =
        LifecycleManager::spawn(loader, settings, bus.clone(), commands);

    // Queued behind the restore of the persisted flag.
    if config.enable_on_start {
        if let Err(e) = lifecycle.set_enabled(true).await {
            log::error!("Failed to enable capability: {}", e);
        }
    }

    if config.console {
        let bus = bus.clone();
        tokio::spawn(async move {
            if let Err(e) = console::run(bus).await {
                log::error!("Console failed: {}", e);
            }
        });
    }

    let dispatcher = Arc::new(Dispatcher::new(origin, lifecycle, bus)?);
    let listener = TcpListener::bind(config.listen).await?;
    log::info!("Listening on http://{}", listener.local_addr()?);

    tokio::select! {
        _ = server::run(listener, dispatcher) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            log::info!("Received Ctrl+C, shutting down...");
        }
    }

    lifecycle_task.abort();
    log::info!("vaultgate stopped");
    Ok(())
}
