//! HTTP server module with optional TLS.
//!
//! This module provides the listeners and the file-serving service:
//! - **Plain**: a single HTTP listener
//! - **TLS**: an HTTPS listener using certificate files from the command line,
//!   optionally paired with an HTTP->HTTPS redirect listener
//!
//! The server includes:
//! - Static file serving with directory listings
//! - Graceful shutdown on SIGTERM/SIGINT
//! - Certificate hot-reload via SIGHUP (TLS mode)

pub mod redirect;
mod server;
mod shutdown;
pub mod static_files;

pub use server::{start_server, ServerError};
