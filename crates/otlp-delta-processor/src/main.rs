use clap::Parser;
use otlp_delta_core::CancellationToken;
use otlp_delta_processor::{logging, serve, Error, ProcessorConfig};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = ProcessorConfig::try_parse()?;
    logging::setup(&config.log_level)?;

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                signal.cancel();
            }
            Err(err) => warn!(error = %err, "Unable to listen for shutdown signal"),
        }
    });
    serve(&config, cancel).await
}
