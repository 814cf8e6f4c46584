//! Configuration for the cumulative-to-delta processor.

use std::{net::SocketAddr, num::ParseIntError, time::Duration};

use clap::Parser;

use crate::Error;

const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4317";
const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:4319";

/// Converts cumulative OTLP sums into delta sums and forwards them.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct ProcessorConfig {
    /// Seconds a series may go unreported before its state is dropped.
    /// Zero keeps state forever.
    #[arg(long, env = "OTLP_DELTA_MAX_STALE", default_value = "0", value_parser = parse_seconds)]
    pub max_stale: Duration,

    /// Only convert monotonic sums, passing non-monotonic sums through.
    #[arg(long, env = "OTLP_DELTA_MONOTONIC_ONLY")]
    pub monotonic_only: bool,

    /// Names of metrics to convert. All metrics are converted when empty.
    #[arg(long = "metric", env = "OTLP_DELTA_METRICS", value_delimiter = ',')]
    pub metrics: Vec<String>,

    /// Address to accept OTLP/gRPC metrics on.
    #[arg(long = "listen", env = "OTLP_DELTA_LISTEN", default_value = DEFAULT_LISTEN_ADDRESS)]
    pub listen_address: SocketAddr,

    /// The OTLP exporter endpoint to forward converted metrics to.
    #[arg(
        short,
        long,
        env = "OTEL_EXPORTER_OTLP_ENDPOINT",
        default_value = DEFAULT_OTLP_ENDPOINT
    )]
    pub otlp_endpoint: String,

    /// Log filter, e.g. `info` or `otlp_delta_core=debug`.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl ProcessorConfig {
    /// Checks the configuration is usable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.otlp_endpoint.is_empty() {
            return Err(Error::InvalidConfig("otlp endpoint is empty".to_owned()));
        }
        if !(self.otlp_endpoint.starts_with("http://") || self.otlp_endpoint.starts_with("https://"))
        {
            return Err(Error::InvalidConfig(format!(
                "otlp endpoint {} must start with http:// or https://",
                self.otlp_endpoint
            )));
        }
        if self.metrics.iter().any(|m| m.trim().is_empty()) {
            return Err(Error::InvalidConfig(
                "metric names must not be blank".to_owned(),
            ));
        }
        Ok(())
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_stale: Duration::ZERO,
            monotonic_only: false,
            metrics: Vec::new(),
            listen_address: SocketAddr::from(([127, 0, 0, 1], 4319)),
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_owned(),
            log_level: "info".to_owned(),
        }
    }
}

fn parse_seconds(value: &str) -> Result<Duration, ParseIntError> {
    Ok(Duration::from_secs(value.trim().parse()?))
}
