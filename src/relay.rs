// src/relay.rs
/* Line-framed forwarding between the client and the upstream server. */

use std::time::Duration;

use log::trace;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{self, Instant};

use crate::line::frame_len;

/// Why a relay stopped without an I/O error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    ClientClosed,
    UpstreamClosed,
    IdleTimeout,
}

/// Forwards line-sized chunks in both directions until either side reaches end of
/// stream or neither side has moved a byte within `idle_timeout`.
///
/// Both readers should come from [`crate::line::line_reader`] so a single read never
/// exceeds one line buffer. Every chunk is flushed before the next wait. End of
/// stream on one side ends both directions; half-closed sessions are not kept open.
pub async fn relay<CR, CW, UR, UW>(
    client_r: &mut CR,
    client_w: &mut CW,
    upstream_r: &mut UR,
    upstream_w: &mut UW,
    idle_timeout: Duration,
) -> io::Result<RelayEnd>
where
    CR: AsyncBufRead + Unpin,
    CW: AsyncWrite + Unpin,
    UR: AsyncBufRead + Unpin,
    UW: AsyncWrite + Unpin,
{
    let idle = time::sleep(idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            chunk = client_r.fill_buf() => {
                let chunk = chunk?;
                if chunk.is_empty() {
                    return Ok(RelayEnd::ClientClosed);
                }
                let Some(n) = forward(chunk, upstream_w, idle_timeout).await? else {
                    return Ok(RelayEnd::IdleTimeout);
                };
                client_r.consume(n);
                trace!("[C] {} bytes", n);
            }
            chunk = upstream_r.fill_buf() => {
                let chunk = chunk?;
                if chunk.is_empty() {
                    return Ok(RelayEnd::UpstreamClosed);
                }
                let Some(n) = forward(chunk, client_w, idle_timeout).await? else {
                    return Ok(RelayEnd::IdleTimeout);
                };
                upstream_r.consume(n);
                trace!("[S] {} bytes", n);
            }
            _ = &mut idle => return Ok(RelayEnd::IdleTimeout),
        }
        idle.as_mut().reset(Instant::now() + idle_timeout);
    }
}

/// Writes and flushes the next frame of `chunk`. `None` if the peer stopped reading
/// for longer than `idle_timeout`.
async fn forward<W: AsyncWrite + Unpin>(
    chunk: &[u8],
    dst: &mut W,
    idle_timeout: Duration,
) -> io::Result<Option<usize>> {
    let n = frame_len(chunk);
    let write = async {
        dst.write_all(&chunk[..n]).await?;
        dst.flush().await
    };
    match time::timeout(idle_timeout, write).await {
        Ok(result) => result.map(|()| Some(n)),
        Err(_) => Ok(None),
    }
}
