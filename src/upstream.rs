// src/upstream.rs
/* Resolve and connect to the fixed upstream news server. */

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use log::debug;
use tokio::net::{lookup_host, TcpStream};
use tokio::time;

use crate::error::SessionError;

/// The upstream server. Fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Candidate addresses in resolver order.
pub async fn resolve(endpoint: &Endpoint) -> Result<Vec<SocketAddr>, SessionError> {
    let addrs: Vec<SocketAddr> = lookup_host((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|source| SessionError::Resolve {
            endpoint: endpoint.to_string(),
            source,
        })?
        .collect();
    if addrs.is_empty() {
        return Err(SessionError::NoAddress(endpoint.to_string()));
    }
    Ok(addrs)
}

/// Connects to the first candidate that accepts. No retries beyond the candidate list.
pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream, SessionError> {
    let mut last_err = None;
    for addr in resolve(endpoint).await? {
        debug!("Trying upstream candidate {}", addr);
        let err = match time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("Could not set TCP_NODELAY on upstream {}: {}", addr, e);
                }
                return Ok(stream);
            }
            Ok(Err(e)) => e,
            Err(_) => io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
        };
        debug!("Upstream candidate {} failed: {}", addr, err);
        last_err = Some(err);
    }
    Err(SessionError::Connect {
        endpoint: endpoint.to_string(),
        source: last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no candidate addresses")),
    })
}
