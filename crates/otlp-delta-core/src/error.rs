use thiserror::Error;

/// An error from the delta tracking library.
#[derive(Error, Debug)]
pub enum Error {
    /// The stale sweeper needs a Tokio runtime to run on.
    #[error("A Tokio runtime is required to sweep stale series")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}
