//! Access log records and the writer task that persists them.
//!
//! Request handlers never touch the log file. They push completed records onto a
//! channel through a cloneable [`AccessLog`] handle, and a single
//! [`AccessLogWriter`] task owns the file and appends one line per record. Since
//! only that task writes, JSON lines from concurrent requests can never interleave.
//!
//! Three sinks are supported:
//! - **JSON**: one JSON object per line in the log file
//! - **Text**: one tab separated line in the log file, duplicated to stderr
//! - **Stderr**: the text line on stderr only (no log file configured)

use std::io;
use std::path::Path;

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;

use crate::config::{AccessLogConfig, AccessLogFormat};

/// Placeholder for empty fields in text lines, keeping columns aligned
const EMPTY_FIELD: &str = "-";

/// Metadata of one completed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccessLogRecord {
    pub remote_addr: String,
    #[serde(rename = "URL")]
    pub url: String,
    pub user_agent: String,
    pub referer: String,
    pub method: String,
    #[serde(rename = "RequestURI")]
    pub request_uri: String,
    pub protocol: String,
    pub status: u16,
    /// Response body bytes handed to the connection
    pub written: u64,
    /// Milliseconds since the Unix epoch
    pub date_time: i64,
}

impl AccessLogRecord {
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Tab separated line; the timestamp is rendered as RFC 3339.
    pub fn to_text_line(&self) -> String {
        let date_time = Utc
            .timestamp_millis_opt(self.date_time)
            .single()
            .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
            .unwrap_or_else(|| self.date_time.to_string());

        let fields = [
            self.remote_addr.as_str(),
            self.url.as_str(),
            self.user_agent.as_str(),
            self.referer.as_str(),
            self.method.as_str(),
            self.request_uri.as_str(),
            self.protocol.as_str(),
        ];

        let mut line = fields
            .iter()
            .map(|field| {
                if field.is_empty() {
                    EMPTY_FIELD.to_string()
                } else {
                    // a tab or line break inside a value would shift the columns
                    field.replace(|c: char| matches!(c, '\t' | '\r' | '\n'), " ")
                }
            })
            .collect::<Vec<_>>()
            .join("\t");
        line.push_str(&format!("\t{}\t{}\t{}\n", self.status, self.written, date_time));
        line
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AccessLogError {
    #[error("Failed to write access log: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to serialize access record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Access log writer is not running")]
    Closed,
}

enum Command {
    Record(Box<AccessLogRecord>),
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle used by request handlers to submit records.
#[derive(Clone)]
pub struct AccessLog {
    tx: async_channel::Sender<Command>,
}

/// Owns the log destination and appends records in arrival order.
pub struct AccessLogWriter {
    rx: async_channel::Receiver<Command>,
    sink: Sink,
}

enum Sink {
    Stderr,
    Text(File),
    Json(File),
}

impl AccessLog {
    /// Open the configured destination and return the handle and its writer.
    ///
    /// The log file's parent directory is created if missing. The writer does
    /// nothing until [`AccessLogWriter::run`] is polled.
    pub async fn open(config: &AccessLogConfig) -> Result<(Self, AccessLogWriter), AccessLogError> {
        let sink = match &config.path {
            None => Sink::Stderr,
            Some(path) => {
                let file = open_append(path).await?;
                match config.format {
                    AccessLogFormat::Text => Sink::Text(file),
                    AccessLogFormat::Json => Sink::Json(file),
                }
            }
        };

        tracing::info!(
            path = ?config.path,
            format = ?config.format,
            "Opened access log"
        );

        let (tx, rx) = async_channel::unbounded();
        Ok((Self { tx }, AccessLogWriter { rx, sink }))
    }

    /// Queue a record for the writer. Never blocks the request.
    pub fn record(&self, record: AccessLogRecord) {
        if self.tx.try_send(Command::Record(Box::new(record))).is_err() {
            tracing::warn!("Access log writer stopped, dropping record");
        }
    }

    /// Wait until every record queued before this call has been written.
    pub async fn flush(&self) -> Result<(), AccessLogError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(done_tx))
            .await
            .map_err(|_| AccessLogError::Closed)?;
        done_rx.await.map_err(|_| AccessLogError::Closed)
    }

    /// Stop accepting records. The writer drains what is queued, then exits.
    pub fn close(&self) {
        self.tx.close();
    }
}

impl AccessLogWriter {
    /// Append records until the channel is closed or a write fails.
    pub async fn run(mut self) -> Result<(), AccessLogError> {
        while let Ok(command) = self.rx.recv().await {
            match command {
                Command::Record(record) => {
                    if let Err(e) = self.write(&record).await {
                        tracing::error!(error = %e, "Access log write failed");
                        self.rx.close();
                        return Err(e);
                    }
                }
                Command::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }

        tracing::debug!("Access log writer stopped");
        Ok(())
    }

    async fn write(&mut self, record: &AccessLogRecord) -> Result<(), AccessLogError> {
        match &mut self.sink {
            Sink::Stderr => {
                write_stderr(&record.to_text_line()).await?;
            }
            Sink::Text(file) => {
                let line = record.to_text_line();
                file.write_all(line.as_bytes()).await?;
                file.flush().await?;
                write_stderr(&line).await?;
            }
            Sink::Json(file) => {
                file.write_all(record.to_json_line()?.as_bytes()).await?;
                file.flush().await?;
            }
        }
        Ok(())
    }
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.flush().await
}

async fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    OpenOptions::new().create(true).append(true).open(path).await
}
