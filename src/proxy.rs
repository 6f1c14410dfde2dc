// src/proxy.rs
/* Accept loop: hands every client to its own task and reaps finished ones. */

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::io::{self, AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinSet};
use tokio::time;

#[cfg(feature = "tls")]
use tokio_rustls::TlsAcceptor;

use crate::relay::RelayEnd;
use crate::session::{Session, SessionConfig};

// errno values shared by Linux, the BSDs and macOS.
const ENFILE: i32 = 23;
const EMFILE: i32 = 24;

/// Pause before accepting again once the process or system is out of descriptors.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Where client connections come from.
trait Incoming {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Incoming for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Serves plain TCP clients. Accept errors are logged and retried, never returned.
pub async fn start(listener: TcpListener, config: Arc<SessionConfig>) -> io::Result<()> {
    accept_loop(listener, config, |id, peer, client, config| {
        handle_connection(id, peer, client, config)
    })
    .await
}

/// Serves TLS clients; a failed handshake only drops that client.
#[cfg(feature = "tls")]
pub async fn start_tls(
    listener: TcpListener,
    config: Arc<SessionConfig>,
    acceptor: TlsAcceptor,
) -> io::Result<()> {
    accept_loop(listener, config, move |id, peer, client, config| {
        let acceptor = acceptor.clone();
        async move {
            match acceptor.accept(client).await {
                Ok(stream) => handle_connection(id, peer, stream, config).await,
                Err(e) => warn!("TLS handshake failed for {} (session {}): {}", peer, id, e),
            }
        }
    })
    .await
}

async fn accept_loop<L, F, Fut>(
    listener: L,
    config: Arc<SessionConfig>,
    handler: F,
) -> io::Result<()>
where
    L: Incoming,
    F: Fn(u64, SocketAddr, TcpStream, Arc<SessionConfig>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut sessions = JoinSet::new();
    let mut next_id: u64 = 0;
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (client, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        if out_of_descriptors(&e) {
                            time::sleep(ACCEPT_BACKOFF).await;
                        }
                        continue;
                    }
                };
                next_id += 1;
                info!("New connection from {} (session {})", peer, next_id);
                if let Err(e) = client.set_nodelay(true) {
                    warn!("Could not set TCP_NODELAY for {}: {}", peer, e);
                }
                sessions.spawn(handler(next_id, peer, client, Arc::clone(&config)));
            }
            Some(finished) = sessions.join_next(), if !sessions.is_empty() => reap(finished),
        }
    }
}

fn out_of_descriptors(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(EMFILE | ENFILE))
}

fn reap(finished: Result<(), JoinError>) {
    if let Err(e) = finished {
        if e.is_panic() {
            error!("Session task panicked: {}", e);
        }
    }
}

/// Runs one session to completion and reports how it ended.
pub async fn handle_connection<C>(id: u64, peer: SocketAddr, client: C, config: Arc<SessionConfig>)
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    match Session::new(id, peer, client, config).run().await {
        Ok(end) => info!("Session {} ({}) closed: {}", id, peer, describe(end)),
        Err(e) => warn!("Session {} ({}) aborted: {}", id, peer, e),
    }
}

fn describe(end: RelayEnd) -> &'static str {
    match end {
        RelayEnd::ClientClosed => "client disconnected",
        RelayEnd::UpstreamClosed => "upstream disconnected",
        RelayEnd::IdleTimeout => "idle timeout",
    }
}
