//! Access logging middleware.
//!
//! Wraps every request in a tracing span carrying a UUID v4 request id, runs the
//! inner service, and swaps the response body for an [`ObservedBody`] that counts
//! the bytes handed to the connection. The access record is submitted once the
//! body has been fully sent or dropped, so `Status` and `Written` describe what
//! the client actually received.

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use bytes::Bytes;
use http::header::{HeaderName, REFERER, USER_AGENT};
use http::{HeaderMap, StatusCode};
use http_body::{Body as HttpBody, Frame, SizeHint};
use tracing::Instrument;
use uuid::Uuid;

use crate::access_log::{AccessLog, AccessLogRecord};

/// Request side of an access record, captured before the handler runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeta {
    pub remote_addr: String,
    pub url: String,
    pub user_agent: String,
    pub referer: String,
    pub method: String,
    pub request_uri: String,
    pub protocol: String,
}

impl RequestMeta {
    pub fn from_request(request: &Request) -> Self {
        let uri = request.uri();
        let headers = request.headers();

        let remote_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_default();

        Self {
            remote_addr,
            url: uri.to_string(),
            user_agent: header_str(headers, USER_AGENT),
            referer: header_str(headers, REFERER),
            method: request.method().to_string(),
            request_uri: uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
            protocol: format!("{:?}", request.version()),
        }
    }

    /// Attach the response side and stamp the record with the current time.
    pub fn complete(self, status: StatusCode, written: u64) -> AccessLogRecord {
        AccessLogRecord {
            remote_addr: self.remote_addr,
            url: self.url,
            user_agent: self.user_agent,
            referer: self.referer,
            method: self.method,
            request_uri: self.request_uri,
            protocol: self.protocol,
            status: status.as_u16(),
            written,
            date_time: chrono::Utc::now().timestamp_millis(),
        }
    }
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Middleware that records one access log entry per request.
///
/// Install with `axum::middleware::from_fn_with_state(access_log, access_log_layer)`
/// as the outermost layer so the span covers all request processing.
pub async fn access_log_layer(
    State(access_log): State<AccessLog>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4();
    let meta = RequestMeta::from_request(&request);

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %meta.method,
        path = %request.uri().path(),
        duration_ms = tracing::field::Empty,
    );

    let start = Instant::now();

    async move {
        let response = next.run(request).await;
        let status = response.status();
        let duration_ms = start.elapsed().as_millis() as u64;

        tracing::Span::current().record("duration_ms", duration_ms);
        tracing::debug!(status = status.as_u16(), duration_ms, "Request completed");

        let (parts, body) = response.into_parts();
        let body = ObservedBody::new(body, PendingRecord {
            meta,
            status,
            access_log,
        });
        Response::from_parts(parts, Body::new(body))
    }
    .instrument(span)
    .await
}

struct PendingRecord {
    meta: RequestMeta,
    status: StatusCode,
    access_log: AccessLog,
}

/// Response body wrapper that counts data bytes and submits the access record
/// when the body ends or is dropped.
pub struct ObservedBody {
    inner: Body,
    written: u64,
    pending: Option<PendingRecord>,
}

impl ObservedBody {
    fn new(inner: Body, pending: PendingRecord) -> Self {
        Self {
            inner,
            written: 0,
            pending: Some(pending),
        }
    }

    fn finish(&mut self) {
        if let Some(pending) = self.pending.take() {
            let record = pending.meta.complete(pending.status, self.written);
            pending.access_log.record(record);
        }
    }
}

impl HttpBody for ObservedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let frame = ready!(Pin::new(&mut this.inner).poll_frame(cx));

        match &frame {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    this.written += data.len() as u64;
                }
            }
            Some(Err(_)) => {}
            None => this.finish(),
        }

        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for ObservedBody {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccessLogConfig, AccessLogFormat};
    use http::{Method, Version};
    use std::future::poll_fn;

    fn request(uri: &str) -> Request {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .version(Version::HTTP_11)
            .header(USER_AGENT, "test-agent/1.0")
            .header(REFERER, "https://example.com/")
            .body(Body::empty())
            .unwrap()
    }

    async fn json_log(
        dir: &tempfile::TempDir,
    ) -> (AccessLog, tokio::task::JoinHandle<Result<(), crate::access_log::AccessLogError>>) {
        let config = AccessLogConfig {
            path: Some(dir.path().join("access.json")),
            format: AccessLogFormat::Json,
        };
        let (log, writer) = AccessLog::open(&config).await.unwrap();
        (log, tokio::spawn(writer.run()))
    }

    fn read_records(dir: &tempfile::TempDir) -> Vec<AccessLogRecord> {
        std::fs::read_to_string(dir.path().join("access.json"))
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_request_meta_from_request() {
        let mut req = request("/docs/index.html?lang=en");
        req.extensions_mut()
            .insert(ConnectInfo("192.0.2.7:41000".parse::<SocketAddr>().unwrap()));

        let meta = RequestMeta::from_request(&req);
        assert_eq!(meta.remote_addr, "192.0.2.7:41000");
        assert_eq!(meta.url, "/docs/index.html?lang=en");
        assert_eq!(meta.request_uri, "/docs/index.html?lang=en");
        assert_eq!(meta.user_agent, "test-agent/1.0");
        assert_eq!(meta.referer, "https://example.com/");
        assert_eq!(meta.method, "GET");
        assert_eq!(meta.protocol, "HTTP/1.1");
    }

    #[test]
    fn test_request_meta_without_connect_info_or_headers() {
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let meta = RequestMeta::from_request(&req);
        assert_eq!(meta.remote_addr, "");
        assert_eq!(meta.user_agent, "");
        assert_eq!(meta.referer, "");
    }

    #[tokio::test]
    async fn test_observed_body_counts_bytes_when_drained() {
        let dir = tempfile::tempdir().unwrap();
        let (log, writer) = json_log(&dir).await;

        let mut body = ObservedBody::new(Body::from("hello, world"), PendingRecord {
            meta: RequestMeta::from_request(&request("/hello.txt")),
            status: StatusCode::OK,
            access_log: log.clone(),
        });

        while let Some(frame) = poll_fn(|cx| Pin::new(&mut body).poll_frame(cx)).await {
            frame.unwrap();
        }
        drop(body);

        log.close();
        writer.await.unwrap().unwrap();

        let records = read_records(&dir);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, 200);
        assert_eq!(records[0].written, 12);
        assert_eq!(records[0].request_uri, "/hello.txt");
    }

    #[tokio::test]
    async fn test_observed_body_logs_on_drop_without_reading() {
        let dir = tempfile::tempdir().unwrap();
        let (log, writer) = json_log(&dir).await;

        let body = ObservedBody::new(Body::from("never sent"), PendingRecord {
            meta: RequestMeta::from_request(&request("/missing")),
            status: StatusCode::NOT_FOUND,
            access_log: log.clone(),
        });
        drop(body);

        log.close();
        writer.await.unwrap().unwrap();

        let records = read_records(&dir);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, 404);
        assert_eq!(records[0].written, 0);
    }
}
