// src/session.rs
/* One accepted client: connect upstream, optionally log in on its behalf, relay, tear down. */

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time;

use crate::auth::{self, Credential};
use crate::error::SessionError;
use crate::line::line_reader;
use crate::relay::{relay, RelayEnd};
use crate::upstream::{self, Endpoint};

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Upper bound on shutting down one side at teardown; shorter idle timeouts win.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Per-session settings, shared read-only by every session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub upstream: Endpoint,
    /// `Some` when credential injection is enabled.
    pub credential: Option<Credential>,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
}

impl SessionConfig {
    pub fn new(upstream: Endpoint) -> Self {
        Self {
            upstream,
            credential: None,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Relaying,
    Closed,
}

struct Lifecycle {
    id: u64,
    peer: SocketAddr,
    state: SessionState,
}

impl Lifecycle {
    fn enter(&mut self, next: SessionState) {
        debug!("Session {} ({}): {:?} -> {:?}", self.id, self.peer, self.state, next);
        self.state = next;
    }
}

/// Owns the client connection and, once connected, the upstream one. `run` consumes
/// the session, so both are released exactly once whichever way it ends.
pub struct Session<C> {
    client: C,
    config: Arc<SessionConfig>,
    lifecycle: Lifecycle,
}

impl<C> Session<C>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(id: u64, peer: SocketAddr, client: C, config: Arc<SessionConfig>) -> Self {
        Self {
            client,
            config,
            lifecycle: Lifecycle {
                id,
                peer,
                state: SessionState::Connecting,
            },
        }
    }

    #[cfg(test)]
    fn state(&self) -> SessionState {
        self.lifecycle.state
    }

    pub async fn run(self) -> Result<RelayEnd, SessionError> {
        let Session {
            client,
            config,
            mut lifecycle,
        } = self;
        let id = lifecycle.id;

        let upstream = match upstream::connect(&config.upstream, config.connect_timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                lifecycle.enter(SessionState::Closed);
                return Err(e);
            }
        };
        debug!("Session {} connected to upstream {}", id, config.upstream);

        let (client_r, mut client_w) = io::split(client);
        let (upstream_r, mut upstream_w) = upstream.into_split();
        let mut client_r = line_reader(client_r);
        let mut upstream_r = line_reader(upstream_r);

        let outcome = async {
            // Nothing from the client is read until the login has finished.
            if let Some(credential) = &config.credential {
                lifecycle.enter(SessionState::Authenticating);
                let login = async {
                    let greeting =
                        auth::authenticate(&mut upstream_r, &mut upstream_w, credential).await?;
                    client_w.write_all(&greeting).await?;
                    client_w.flush().await?;
                    Ok::<_, SessionError>(())
                };
                time::timeout(config.idle_timeout, login)
                    .await
                    .map_err(|_| SessionError::LoginTimeout(config.idle_timeout))??;
            }
            lifecycle.enter(SessionState::Relaying);
            let end = relay(
                &mut client_r,
                &mut client_w,
                &mut upstream_r,
                &mut upstream_w,
                config.idle_timeout,
            )
            .await?;
            Ok::<_, SessionError>(end)
        }
        .await;

        // Client first: the upstream only sees its close once the client side is done.
        let grace = config.idle_timeout.min(SHUTDOWN_GRACE);
        close_quietly(id, "client", &mut client_w, grace).await;
        close_quietly(id, "upstream", &mut upstream_w, grace).await;
        lifecycle.enter(SessionState::Closed);
        outcome
    }
}

/// Best-effort shutdown of one side. A peer that stopped reading can keep a
/// shutdown pending forever, so it is abandoned after `grace`.
async fn close_quietly<W: AsyncWrite + Unpin>(id: u64, side: &str, writer: &mut W, grace: Duration) {
    match time::timeout(grace, writer.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Session {}: {} shutdown: {}", id, side, e),
        Err(_) => debug!("Session {}: {} shutdown timed out after {:?}", id, side, grace),
    }
}
