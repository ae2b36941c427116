//! Command line parsing and configuration validation.
//!
//! `Args` is the raw clap surface. `ServerConfig::from_args` validates it once at
//! startup and produces the immutable configuration every other component reads:
//! the listen address, whether TLS is enabled (and with which certificate files),
//! whether the HTTP->HTTPS redirect listener runs, and where access logs go.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};

// =============================================================================
// Defaults
// =============================================================================

/// Port used when `-p` is not given
pub const DEFAULT_PORT: u16 = 80;

/// The only port that refuses to start without a certificate
pub const HTTPS_PORT: u16 = 443;

/// Port of the plaintext redirect listener
pub const DEFAULT_REDIRECT_PORT: u16 = 80;

/// Address all listeners bind to unless `--bind` is given
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";

/// Directory served when `-d` is not given
pub const DEFAULT_SERVE_DIR: &str = ".";

/// Default log filter when neither `--log-level` nor RUST_LOG is set
pub const DEFAULT_LOG_FILTER: &str = "wharf=info,tower_http=info";

/// Seconds to wait for in-flight connections on shutdown
pub const SHUTDOWN_GRACE_SECS: u64 = 30;

/// wharf: serve a directory over HTTP(S) with access logging
#[derive(Parser, Debug, Clone)]
#[command(name = "wharf", version, about)]
pub struct Args {
    /// Port to listen on (80 if not provided)
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Path to the PEM certificate chain
    #[arg(short = 'c', long = "cert")]
    pub cert_chain: Option<PathBuf>,

    /// Path to the PEM private key
    #[arg(short = 'k', long = "key")]
    pub cert_key: Option<PathBuf>,

    /// Directory to serve
    #[arg(short = 'd', long = "dir")]
    pub serve_dir: Option<PathBuf>,

    /// File to append access logs to (stderr if not provided)
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Write access logs as JSON lines. Requires --log-file
    #[arg(short = 'j', long = "json")]
    pub json: bool,

    /// Redirect plain HTTP on the redirect port to HTTPS
    #[arg(short = 'r', long = "redirect")]
    pub redirect: bool,

    /// Address to bind listeners to
    #[arg(long, default_value = DEFAULT_BIND_ADDR)]
    pub bind: IpAddr,

    /// Port for the HTTP->HTTPS redirect listener
    #[arg(long, default_value_t = DEFAULT_REDIRECT_PORT)]
    pub redirect_port: u16,

    /// Log level filter (e.g., "wharf=debug,tower_http=info")
    #[arg(long)]
    pub log_level: Option<String>,

    /// Format of diagnostic logs on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Output format of the diagnostic (tracing) logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Validated server configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub serve_dir: PathBuf,
    /// Present iff both certificate files were given and exist
    pub tls: Option<TlsConfig>,
    pub access_log: AccessLogConfig,
}

/// Certificate files and redirect settings for TLS mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Run a plaintext listener that redirects to HTTPS
    pub redirect_http: bool,
    pub redirect_port: u16,
}

/// Where and how access records are persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLogConfig {
    /// Log file; `None` sends records to stderr
    pub path: Option<PathBuf>,
    pub format: AccessLogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLogFormat {
    /// Tab separated fields, one request per line
    Text,
    /// One JSON object per line
    Json,
}

impl ServerConfig {
    /// Validate command line arguments.
    ///
    /// Rules, checked in order:
    /// - certificate chain and key paths must exist when given
    /// - port 443 requires both certificate paths
    /// - TLS mode is enabled when both certificate paths are given, on any port
    /// - JSON access logging requires a log file
    /// - the serve directory must exist and be a directory
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let port = args.port.unwrap_or_else(|| {
            tracing::info!(port = DEFAULT_PORT, "No listen port provided, using default");
            DEFAULT_PORT
        });

        if let Some(path) = &args.cert_chain {
            if !path_exists(path) {
                return Err(ConfigError::CertChainNotFound(path.clone()));
            }
        }

        if let Some(path) = &args.cert_key {
            if !path_exists(path) {
                return Err(ConfigError::CertKeyNotFound(path.clone()));
            }
        }

        let tls = match (args.cert_chain, args.cert_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig {
                cert_path,
                key_path,
                redirect_http: args.redirect,
                redirect_port: args.redirect_port,
            }),
            (chain, key) => {
                if port == HTTPS_PORT {
                    return Err(ConfigError::MissingCertificate(port));
                }
                if chain.is_some() || key.is_some() {
                    tracing::warn!("Only one of --cert/--key provided, serving plain HTTP");
                }
                if args.redirect {
                    tracing::warn!("HTTPS redirect requested without TLS, ignoring");
                }
                None
            }
        };

        let format = if args.json {
            if args.log_file.is_none() {
                return Err(ConfigError::JsonWithoutLogFile);
            }
            AccessLogFormat::Json
        } else {
            AccessLogFormat::Text
        };

        let serve_dir = args
            .serve_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SERVE_DIR));
        match std::fs::metadata(&serve_dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(ConfigError::NotADirectory(serve_dir)),
            Err(_) => return Err(ConfigError::ServeDirNotFound(serve_dir)),
        }

        Ok(Self {
            bind: args.bind,
            port,
            serve_dir,
            tls,
            access_log: AccessLogConfig {
                path: args.log_file,
                format,
            },
        })
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Address of the main listener
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Address of the redirect listener, when it should run
    pub fn redirect_addr(&self) -> Option<SocketAddr> {
        self.tls
            .as_ref()
            .filter(|tls| tls.redirect_http)
            .map(|tls| SocketAddr::new(self.bind, tls.redirect_port))
    }
}

fn path_exists(path: &Path) -> bool {
    std::fs::metadata(path).is_ok()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cert chain path invalid: {}", .0.display())]
    CertChainNotFound(PathBuf),
    #[error("Cert private key path invalid: {}", .0.display())]
    CertKeyNotFound(PathBuf),
    #[error("Provided port {0} but no certificate")]
    MissingCertificate(u16),
    #[error("JSON access logging requires a log file (-l)")]
    JsonWithoutLogFile,
    #[error("Serve directory not found: {}", .0.display())]
    ServeDirNotFound(PathBuf),
    #[error("Serve path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("wharf").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    fn cert_files(dir: &tempfile::TempDir) -> (String, String) {
        let cert = dir.path().join("chain.pem");
        let key = dir.path().join("key.pem");
        File::create(&cert).unwrap();
        File::create(&key).unwrap();
        (
            cert.to_string_lossy().into_owned(),
            key.to_string_lossy().into_owned(),
        )
    }

    #[test]
    fn test_defaults_to_plain_http_on_port_80() {
        let config = ServerConfig::from_args(parse(&[])).unwrap();
        assert_eq!(config.port, 80);
        assert!(!config.is_tls());
        assert_eq!(config.serve_dir, PathBuf::from("."));
        assert_eq!(config.access_log.path, None);
        assert_eq!(config.access_log.format, AccessLogFormat::Text);
        assert_eq!(config.addr(), "0.0.0.0:80".parse().unwrap());
    }

    #[test]
    fn test_explicit_port_without_certs_is_plain() {
        let config = ServerConfig::from_args(parse(&["-p", "8080"])).unwrap();
        assert_eq!(config.port, 8080);
        assert!(!config.is_tls());
    }

    #[test]
    fn test_both_certs_enable_tls_on_any_port() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = cert_files(&dir);

        for port in ["443", "8443", "80"] {
            let config =
                ServerConfig::from_args(parse(&["-p", port, "-c", &cert, "-k", &key])).unwrap();
            assert!(config.is_tls(), "port {port} should use TLS");
        }

        let config = ServerConfig::from_args(parse(&["-c", &cert, "-k", &key])).unwrap();
        assert!(config.is_tls());
        assert_eq!(config.port, 80);
    }

    #[test]
    fn test_port_443_requires_certificate() {
        let err = ServerConfig::from_args(parse(&["-p", "443"])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCertificate(443)));
    }

    #[test]
    fn test_port_443_with_only_chain_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, _) = cert_files(&dir);
        let err = ServerConfig::from_args(parse(&["-p", "443", "-c", &cert])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCertificate(443)));
    }

    #[test]
    fn test_single_cert_path_on_other_port_is_plain() {
        let dir = tempfile::tempdir().unwrap();
        let (_, key) = cert_files(&dir);
        let config = ServerConfig::from_args(parse(&["-p", "8080", "-k", &key])).unwrap();
        assert!(!config.is_tls());
    }

    #[test]
    fn test_missing_cert_chain_is_rejected() {
        let err = ServerConfig::from_args(parse(&["-c", "/definitely/not/here.pem"])).unwrap_err();
        assert!(matches!(err, ConfigError::CertChainNotFound(_)));
    }

    #[test]
    fn test_missing_cert_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, _) = cert_files(&dir);
        let err = ServerConfig::from_args(parse(&["-c", &cert, "-k", "/definitely/not/here.pem"]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::CertKeyNotFound(_)));
    }

    #[test]
    fn test_json_requires_log_file() {
        let err = ServerConfig::from_args(parse(&["-j"])).unwrap_err();
        assert!(matches!(err, ConfigError::JsonWithoutLogFile));
    }

    #[test]
    fn test_json_with_log_file() {
        let config = ServerConfig::from_args(parse(&["-j", "-l", "/tmp/access.log"])).unwrap();
        assert_eq!(config.access_log.format, AccessLogFormat::Json);
        assert_eq!(config.access_log.path, Some(PathBuf::from("/tmp/access.log")));
    }

    #[test]
    fn test_redirect_only_in_tls_mode() {
        let config = ServerConfig::from_args(parse(&["-r", "-p", "8080"])).unwrap();
        assert_eq!(config.redirect_addr(), None);

        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = cert_files(&dir);
        let config =
            ServerConfig::from_args(parse(&["-r", "-p", "443", "-c", &cert, "-k", &key])).unwrap();
        assert_eq!(config.redirect_addr(), Some("0.0.0.0:80".parse().unwrap()));
    }

    #[test]
    fn test_serve_dir_must_exist() {
        let err = ServerConfig::from_args(parse(&["-d", "/definitely/not/a/dir"])).unwrap_err();
        assert!(matches!(err, ConfigError::ServeDirNotFound(_)));
    }

    #[test]
    fn test_serve_dir_must_be_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, _) = cert_files(&dir);
        let err = ServerConfig::from_args(parse(&["-d", &cert])).unwrap_err();
        assert!(matches!(err, ConfigError::NotADirectory(_)));
    }

    #[test]
    fn test_bind_address_is_configurable() {
        let config = ServerConfig::from_args(parse(&["--bind", "127.0.0.1", "-p", "8000"])).unwrap();
        assert_eq!(config.addr(), "127.0.0.1:8000".parse().unwrap());
    }
}
