//! HTTP/HTTPS listener startup.
//!
//! Two modes, chosen by `ServerConfig::tls`:
//! - Plain: a single HTTP listener on the configured port
//! - TLS: an HTTPS listener with the given certificate files, plus an optional
//!   HTTP->HTTPS redirect listener running alongside it

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;

use crate::access_log::AccessLog;
use crate::config::{ServerConfig, TlsConfig, SHUTDOWN_GRACE_SECS};

use super::redirect;
use super::shutdown;

/// Server startup error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to load TLS certificates from {cert} and {key}: {source}")]
    TlsConfig {
        cert: String,
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{name} listener failed: {source}")]
    Listener {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Start the listeners described by `config`.
///
/// `handle` controls the main listener; shutting it down (directly or through
/// SIGINT/SIGTERM) also stops the redirect listener. Resolves once every
/// listener has stopped, or as soon as any listener fails.
pub async fn start_server(
    app: Router,
    config: &ServerConfig,
    access_log: AccessLog,
    handle: Handle,
) -> Result<(), ServerError> {
    let addr = config.addr();

    let Some(tls) = &config.tls else {
        shutdown::setup_shutdown_handler(vec![handle.clone()]);
        return start_plain_server(app, addr, handle).await;
    };

    let Some(redirect_addr) = config.redirect_addr() else {
        shutdown::setup_shutdown_handler(vec![handle.clone()]);
        return start_tls_server(app, addr, tls, handle).await;
    };

    let redirect_handle = Handle::new();
    shutdown::setup_shutdown_handler(vec![handle.clone(), redirect_handle.clone()]);

    let redirect_app = redirect::create_redirect_router(addr.port(), access_log);
    let https = {
        let redirect_handle = redirect_handle.clone();
        async move {
            let result = start_tls_server(app, addr, tls, handle).await;
            redirect_handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
            result
        }
    };
    let http =
        redirect::run_redirect_server(redirect_app, redirect_addr, addr.port(), redirect_handle);

    tokio::try_join!(https, http).map(|_| ())
}

/// Start a plain HTTP server (no TLS).
async fn start_plain_server(
    app: Router,
    addr: SocketAddr,
    handle: Handle,
) -> Result<(), ServerError> {
    tracing::info!(%addr, "Starting HTTP server (no TLS)");

    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|source| ServerError::Listener {
            name: "http",
            source,
        })
}

/// Start an HTTPS server with the configured certificate files.
async fn start_tls_server(
    app: Router,
    addr: SocketAddr,
    tls: &TlsConfig,
    handle: Handle,
) -> Result<(), ServerError> {
    tracing::info!(
        %addr,
        cert = %tls.cert_path.display(),
        key = %tls.key_path.display(),
        "Starting HTTPS server"
    );

    let rustls_config = load_certificates(&tls.cert_path, &tls.key_path).await?;

    shutdown::setup_reload_handler(
        rustls_config.clone(),
        tls.cert_path.clone(),
        tls.key_path.clone(),
    );

    axum_server::bind_rustls(addr, rustls_config)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|source| ServerError::Listener {
            name: "https",
            source,
        })
}

async fn load_certificates(cert: &Path, key: &Path) -> Result<RustlsConfig, ServerError> {
    RustlsConfig::from_pem_file(cert, key)
        .await
        .map_err(|source| ServerError::TlsConfig {
            cert: cert.display().to_string(),
            key: key.display().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_certificate_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("chain.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "not a certificate").unwrap();
        std::fs::write(&key, "not a key").unwrap();

        let err = load_certificates(&cert, &key).await.unwrap_err();
        assert!(matches!(err, ServerError::TlsConfig { .. }));
    }
}
