//! wharf - static file server
//!
//! Serves a directory over HTTP or HTTPS, optionally redirecting plaintext
//! traffic to HTTPS, and records every request in an access log.

pub mod access_log;
pub mod config;
pub mod error;
pub mod http;
pub mod middleware;
pub mod routes;

pub use error::Error;
