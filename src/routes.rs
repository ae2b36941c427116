//! Router for the main listener.
//!
//! There is no routing beyond the filesystem: every request goes to the static
//! file service, wrapped in the access logging middleware.

use std::path::Path;

use axum::{middleware, Router};

use crate::access_log::AccessLog;
use crate::http::static_files::create_static_service;
use crate::middleware::access_log_layer;

/// Creates the router serving `serve_dir` with access logging.
pub fn create_router(serve_dir: &Path, access_log: AccessLog) -> Router {
    Router::new()
        .fallback_service(create_static_service(serve_dir))
        // Access log layer - outermost, so the record sees the final response
        .layer(middleware::from_fn_with_state(access_log, access_log_layer))
}
