use faultline_grid::GridError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FailoverError {
    #[error("durable store lookup failed: {0}")]
    /// A task/schedule/view store operation failed. Fatal for the current
    /// event cycle only; the work is retried on the next topology event.
    Store(#[source] anyhow::Error),

    #[error("execution setup failed: {0}")]
    /// Resolving or submitting the executable unit failed, e.g. a missing
    /// execution strategy or invalid endpoint credentials.
    Setup(#[source] anyhow::Error),

    #[error(transparent)]
    /// A grid-level operation was rejected.
    Grid(#[from] GridError),
}
