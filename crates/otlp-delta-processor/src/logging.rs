//! Log subscriber setup for the processor binary.

use tracing_subscriber::EnvFilter;

use crate::Error;

/// Crates whose logs are only interesting when something goes wrong.
const QUIET_TARGETS: &[&str] = &["h2", "hyper", "hyper_util", "tower", "tonic"];

/// Builds the log filter from `log_level`, keeping transport crates at `warn`.
pub fn filter(log_level: &str) -> Result<EnvFilter, Error> {
    let mut directives = log_level.to_owned();
    for target in QUIET_TARGETS {
        directives.push_str(&format!(",{target}=warn"));
    }
    EnvFilter::try_new(directives).map_err(|e| Error::LoggingError(e.to_string()))
}

/// Installs a global `fmt` subscriber.
pub fn setup(log_level: &str) -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(log_level)?)
        .with_target(true)
        .try_init()
        .map_err(|e| Error::LoggingError(e.to_string()))
}
