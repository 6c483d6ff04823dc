use anyhow::Context;
use subpub::{init_logging, shutdown::wait_for_shutdown_signal, Broker, Server, Settings};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;
    init_logging(&settings.log)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    let broker = Broker::with_config(settings.broker_config());
    let server = Server::bind(
        settings.listen_address.as_str(),
        broker.clone(),
        settings.connection_config(),
    )
    .await?;
    let shutdown = server.shutdown_token();
    let server = tokio::spawn(server.run());

    wait_for_shutdown_signal()
        .await
        .context("Failed to install signal handlers")?;

    shutdown.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Server stopped with an error"),
        Err(e) => error!(error = %e, "Server task failed"),
    }

    if let Err(e) = broker.close(settings.shutdown_timeout()).await {
        warn!(error = %e, "Broker did not shut down cleanly");
    }
    let stats = broker.stats();
    info!(
        published = stats.published,
        delivered = stats.delivered,
        peak_backlog = stats.peak_backlog,
        "Bye"
    );
    Ok(())
}
