//! HTTP to HTTPS redirect listener.
//!
//! A plaintext listener (port 80 by default) that answers every request with a
//! temporary redirect to the same host and path over HTTPS. Redirects are access
//! logged like any other request.

use std::net::SocketAddr;

use axum::http::{header::HOST, HeaderMap, StatusCode, Uri};
use axum::middleware;
use axum::response::Redirect;
use axum::routing::any;
use axum::Router;
use axum_server::Handle;

use crate::access_log::AccessLog;
use crate::middleware::access_log_layer;

use super::server::ServerError;

/// Router that redirects every request to HTTPS on `https_port`.
pub fn create_redirect_router(https_port: u16, access_log: AccessLog) -> Router {
    Router::new()
        .fallback(any(move |headers: HeaderMap, uri: Uri| async move {
            let host = request_host(&headers, &uri).ok_or(StatusCode::BAD_REQUEST)?;
            Ok::<_, StatusCode>(redirect_to_https(host, &uri, https_port))
        }))
        .layer(middleware::from_fn_with_state(access_log, access_log_layer))
}

/// Run the redirect listener until `handle` shuts it down.
pub async fn run_redirect_server(
    app: Router,
    addr: SocketAddr,
    https_port: u16,
    handle: Handle,
) -> Result<(), ServerError> {
    tracing::info!(
        %addr,
        https_port,
        "Starting HTTP->HTTPS redirect server"
    );

    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|source| ServerError::Listener {
            name: "redirect",
            source,
        })?;

    tracing::debug!("HTTP redirect server stopped");
    Ok(())
}

/// Host the client addressed: the `Host` header, else the request target's
/// authority. Forwarding headers are not consulted.
fn request_host<'a>(headers: &'a HeaderMap, uri: &'a Uri) -> Option<&'a str> {
    headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .filter(|host| !host.is_empty())
        .or_else(|| uri.authority().map(|authority| authority.as_str()))
}

/// Build the temporary redirect for a plaintext request.
pub fn redirect_to_https(host: &str, uri: &Uri, https_port: u16) -> Redirect {
    let host = strip_port(host);
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    let https_url = if https_port == 443 {
        format!("https://{host}{path_and_query}")
    } else {
        format!("https://{host}:{https_port}{path_and_query}")
    };

    tracing::debug!(from = %uri, to = %https_url, "Redirecting HTTP to HTTPS");

    Redirect::temporary(&https_url)
}

/// Remove a trailing `:port` from a Host value, leaving IPv6 literals intact.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    host.split(':').next().unwrap_or(host)
}
