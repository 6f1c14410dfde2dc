// src/config.rs
/* Command line (clap) layered over an optional TOML file, validated into `Settings`.
   Precedence: flag > environment > file > default. */

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::auth::Credential;
use crate::error::ConfigError;
use crate::session::{SessionConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT};
use crate::upstream::Endpoint;

pub const DEFAULT_NNTP_PORT: u16 = 119;

#[derive(Parser, Debug, Default)]
#[command(about = "A store-and-forward NNTP proxy that can log in to the upstream server for its clients")]
pub struct Args {
    /// TOML configuration file (default: ./newsgate.toml if present); flags take precedence
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Local address to listen on (e.g., 127.0.0.1:119)
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Upstream news server host name or address
    #[arg(long)]
    pub server_addr: Option<String>,

    /// Upstream news server port
    #[arg(long)]
    pub server_port: Option<u16>,

    /// Log in to the upstream server with AUTHINFO USER/PASS on behalf of clients
    #[arg(long)]
    pub auth: bool,

    #[arg(long, env = "NEWSGATE_USERNAME")]
    pub username: Option<String>,

    #[arg(long, env = "NEWSGATE_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Close a session after this many seconds without traffic in either direction
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,

    /// Give up on an upstream address after this many seconds
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Path to TLS certificate for client connections (optional)
    #[cfg(feature = "tls")]
    #[arg(long, requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// Path to TLS private key (optional)
    #[cfg(feature = "tls")]
    #[arg(long, requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,
}

/// On-disk configuration. Every key is optional here; `Settings::resolve` decides what is required.
#[derive(Deserialize, Debug, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub proxy_addr: Option<IpAddr>,
    pub proxy_port: Option<u16>,
    pub server_addr: Option<String>,
    pub server_port: Option<u16>,
    #[serde(default)]
    pub auth: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub idle_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Ok(toml::from_str(&data)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Validated configuration, ready for the acceptor and the sessions it starts.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen: SocketAddr,
    pub session: SessionConfig,
    pub tls: Option<TlsFiles>,
}

impl Settings {
    pub fn resolve(args: Args, file: FileConfig) -> Result<Self, ConfigError> {
        let listen = args.listen.unwrap_or_else(|| {
            SocketAddr::new(
                file.proxy_addr.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
                file.proxy_port.unwrap_or(DEFAULT_NNTP_PORT),
            )
        });

        let host = args
            .server_addr
            .or(file.server_addr)
            .filter(|host| !host.trim().is_empty())
            .ok_or_else(|| ConfigError::Invalid("server_addr is required".into()))?;
        let port = args.server_port.or(file.server_port).unwrap_or(DEFAULT_NNTP_PORT);

        let credential = if args.auth || file.auth {
            let username = required_secret("username", args.username.or(file.username))?;
            let password = required_secret("password", args.password.or(file.password))?;
            Some(Credential::new(username, password))
        } else {
            None
        };

        let idle_timeout = seconds(
            "idle timeout",
            args.idle_timeout.or(file.idle_timeout_secs),
            DEFAULT_IDLE_TIMEOUT,
        )?;
        let connect_timeout = seconds(
            "connect timeout",
            args.connect_timeout.or(file.connect_timeout_secs),
            DEFAULT_CONNECT_TIMEOUT,
        )?;

        #[cfg(feature = "tls")]
        let (tls_cert, tls_key) = (args.tls_cert.or(file.tls_cert), args.tls_key.or(file.tls_key));
        #[cfg(not(feature = "tls"))]
        let (tls_cert, tls_key) = (file.tls_cert, file.tls_key);

        let tls = match (tls_cert, tls_key) {
            (Some(cert), Some(key)) if tls_enabled() => Some(TlsFiles { cert, key }),
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(
                    "TLS files configured but this build has no TLS support".into(),
                ))
            }
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid(
                    "tls_cert and tls_key must be given together".into(),
                ))
            }
        };

        Ok(Settings {
            listen,
            session: SessionConfig {
                upstream: Endpoint::new(host, port),
                credential,
                idle_timeout,
                connect_timeout,
            },
            tls,
        })
    }
}

pub fn tls_enabled() -> bool {
    cfg!(feature = "tls")
}

// CR or LF in a credential would smuggle extra commands into the AUTHINFO exchange.
fn required_secret(name: &str, value: Option<String>) -> Result<String, ConfigError> {
    let value = value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::Invalid(format!("auth is enabled but {} is missing", name)))?;
    if value.contains(['\r', '\n']) {
        return Err(ConfigError::Invalid(format!("{} must not contain line breaks", name)));
    }
    Ok(value)
}

fn seconds(name: &str, value: Option<u64>, default: Duration) -> Result<Duration, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::Invalid(format!("{} must be at least one second", name))),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(default),
    }
}

/// Read from the working directory when `--config` is not given, if present.
pub const DEFAULT_CONFIG_FILE: &str = "newsgate.toml";

/// An explicit path must exist; the fallback is only read when it does.
pub fn file_config(explicit: Option<&Path>, fallback: &Path) -> Result<FileConfig, ConfigError> {
    match explicit {
        Some(path) => FileConfig::load(path),
        None if fallback.is_file() => FileConfig::load(fallback),
        None => Ok(FileConfig::default()),
    }
}

pub fn load() -> Result<Settings, ConfigError> {
    let args = Args::parse();
    let file = file_config(args.config.as_deref(), Path::new(DEFAULT_CONFIG_FILE))?;
    Settings::resolve(args, file)
}

// ./target/release/newsgate --server-addr news.example.com
// NEWSGATE_PASSWORD=secret ./target/release/newsgate -c newsgate.toml --auth --username me
// RUST_LOG=newsgate=debug ./target/release/newsgate --listen 0.0.0.0:1119 --server-addr 10.0.0.5
