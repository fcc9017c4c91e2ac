use std::net::SocketAddr;

use fi_prometheus::AdapterError;
use fi_slurm::SourceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExporterError {
    #[error("failed to set up the metrics registry: {0}")]
    Registry(#[from] AdapterError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("polling failed for: {collectors}")]
    PollFailed { collectors: String },
    #[error("failed to serialize snapshots: {0}")]
    Json(#[from] serde_json::Error),
}
