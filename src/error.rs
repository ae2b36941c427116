//! Top-level error type for the daemon.
//!
//! Every failure that ends the process is one of these. `main` logs it and exits
//! with a non-zero status.

use crate::access_log::AccessLogError;
use crate::config::ConfigError;
use crate::http::ServerError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    AccessLog(#[from] AccessLogError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
