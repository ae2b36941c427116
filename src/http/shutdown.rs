//! Signal handling for the listeners.
//!
//! SIGINT and SIGTERM drain every listener; SIGHUP re-reads the certificate
//! files in TLS mode.

use std::path::PathBuf;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;

use crate::config::SHUTDOWN_GRACE_SECS;

/// Drain all `handles` on the first SIGINT or SIGTERM, giving in-flight
/// requests `SHUTDOWN_GRACE_SECS`.
pub fn setup_shutdown_handler(handles: Vec<Handle>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!(signal = "SIGINT", "Draining listeners");
            }
            _ = terminate => {
                tracing::info!(signal = "SIGTERM", "Draining listeners");
            }
        }

        for handle in &handles {
            handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
        }
        tracing::info!(
            grace_secs = SHUTDOWN_GRACE_SECS,
            listeners = handles.len(),
            "Shutdown started"
        );
    });
}

/// Reload the chain and key into `tls_config` on every SIGHUP. A failed reload
/// keeps serving the previous certificate.
#[cfg(unix)]
pub fn setup_reload_handler(tls_config: RustlsConfig, cert_path: PathBuf, key_path: PathBuf) {
    tokio::spawn(async move {
        let mut sighup =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGHUP handler");
                    return;
                }
            };

        while sighup.recv().await.is_some() {
            tracing::info!(signal = "SIGHUP", "Reloading certificates");

            match tls_config.reload_from_pem_file(&cert_path, &key_path).await {
                Ok(()) => {
                    tracing::info!(
                        cert = %cert_path.display(),
                        key = %key_path.display(),
                        "Certificates reloaded"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        cert = %cert_path.display(),
                        key = %key_path.display(),
                        "Certificate reload failed, keeping previous certificate"
                    );
                }
            }
        }
    });
}

/// SIGHUP does not exist here; certificates load once at startup.
#[cfg(not(unix))]
pub fn setup_reload_handler(_tls_config: RustlsConfig, _cert_path: PathBuf, _key_path: PathBuf) {
    tracing::warn!("Certificate reload is unavailable on this platform");
}
