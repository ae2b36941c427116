//! wharf: a static file server.
//!
//! This is the application entry point. It initializes tracing, validates the
//! command line, starts the access log writer, builds the router and runs the
//! listeners until shutdown.

use std::process::ExitCode;

use axum_server::Handle;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wharf::access_log::{AccessLog, AccessLogError};
use wharf::config::{Args, LogFormat, ServerConfig, DEFAULT_LOG_FILTER};
use wharf::http::start_server;
use wharf::routes::create_router;
use wharf::Error;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing with priority: CLI > env > default
    let log_filter = args
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(&log_filter));
    match args.log_format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Fatal error, exiting");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Error> {
    let config = ServerConfig::from_args(args)?;

    tracing::info!(
        addr = %config.addr(),
        tls = config.is_tls(),
        redirect = ?config.redirect_addr(),
        serve_dir = %config.serve_dir.display(),
        "Loaded configuration"
    );

    // The writer task owns the log file; handlers only enqueue records
    let (access_log, writer) = AccessLog::open(&config.access_log).await?;
    let mut writer = tokio::spawn(writer.run());

    let app = create_router(&config.serve_dir, access_log.clone());

    tokio::select! {
        result = start_server(app, &config, access_log.clone(), Handle::new()) => {
            result?;
            tracing::info!("Server stopped, flushing access log");
            access_log.flush().await?;
            access_log.close();
            writer.await??;
        }
        result = &mut writer => {
            result??;
            return Err(AccessLogError::Closed.into());
        }
    }

    Ok(())
}
