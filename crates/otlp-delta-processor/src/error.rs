//! Errors for this crate.

use thiserror::Error;

/// An error from the cumulative-to-delta processor.
#[derive(Error, Debug)]
pub enum Error {
    /// An error setting up delta tracking.
    #[error(transparent)]
    TrackerError(#[from] otlp_delta_core::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Unable to install log subscriber: {0}")]
    LoggingError(String),
    #[error(transparent)]
    TonicError(#[from] tonic::Status),
    #[error(transparent)]
    TonicTransportError(#[from] tonic::transport::Error),
    #[error(transparent)]
    ArgumentError(#[from] clap::Error),
}
