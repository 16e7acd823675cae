pub mod config;
pub mod observer;
pub mod server;
pub mod statistics;

use std::{sync::Arc, time::Duration};

use service::token::TokenRotator;

use self::{
    config::Config,
    observer::{Observer, UserStore},
    server::Exit,
    statistics::Statistics,
};

/// Boots the relay from a loaded configuration and runs until a
/// shutdown signal arrives.
///
/// Opened as a library function so integration tests can start the
/// whole server in-process instead of going through `main`.
pub async fn startup(config: Arc<Config>) -> anyhow::Result<()> {
    let statistics = Statistics::default();
    let tokens = TokenRotator::run(Duration::from_secs(config.runtime.token_rotation));

    let server = server::start(
        &config,
        &statistics,
        Observer::new(config.clone(), UserStore::default()),
        tokens,
    )?;

    {
        let stopper = server.stopper();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("shutdown signal received");
                stopper.stop();
            }
        });
    }

    match server.join().await {
        Exit::Stopped => {
            let counts = statistics.snapshot();
            log::info!(
                "relay server stopped: received={} packets ({} bytes), sent={} packets ({} bytes)",
                counts.received_pkts,
                counts.received_bytes,
                counts.send_pkts,
                counts.send_bytes,
            );

            Ok(())
        }
        Exit::Failed => anyhow::bail!("datagram loop terminated unexpectedly"),
    }
}
