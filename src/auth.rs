// src/auth.rs
/* AUTHINFO USER/PASS exchange performed on the client's behalf before relaying starts. */

use std::fmt;

use log::{debug, warn};
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};

use crate::error::SessionError;
use crate::line::read_line;

pub const STATUS_AUTH_ACCEPTED: &str = "281";
pub const STATUS_PASSWORD_REQUIRED: &str = "381";

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Keeps the password out of logs and panic messages.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Logs in to the upstream server and returns its greeting line, unsent.
///
/// The greeting is read before any command goes out so the caller can hand it
/// to the client once the exchange has succeeded. On any error the greeting
/// must not reach the client.
pub async fn authenticate<R, W>(
    upstream_r: &mut R,
    upstream_w: &mut W,
    credential: &Credential,
) -> Result<Vec<u8>, SessionError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let greeting = read_line(upstream_r).await?;
    if greeting.is_empty() {
        return Err(SessionError::UpstreamClosed);
    }
    debug!("Upstream greeting: {}", status_text(&greeting));

    send_command(upstream_w, "AUTHINFO USER", &credential.username).await?;
    let reply = read_reply(upstream_r).await?;
    if has_status(&reply, STATUS_AUTH_ACCEPTED) {
        debug!("Upstream accepted username without a password");
        return Ok(greeting);
    }
    if !has_status(&reply, STATUS_PASSWORD_REQUIRED) {
        warn!("Unexpected reply to AUTHINFO USER: {}", status_text(&reply));
        return Err(SessionError::UserRejected(status_text(&reply)));
    }

    send_command(upstream_w, "AUTHINFO PASS", &credential.password).await?;
    let reply = read_reply(upstream_r).await?;
    if !has_status(&reply, STATUS_AUTH_ACCEPTED) {
        return Err(SessionError::PassRejected(status_text(&reply)));
    }
    Ok(greeting)
}

async fn send_command<W: AsyncWrite + Unpin>(
    upstream_w: &mut W,
    verb: &str,
    arg: &str,
) -> Result<(), SessionError> {
    let command = format!("{} {}\r\n", verb, arg);
    upstream_w.write_all(command.as_bytes()).await?;
    upstream_w.flush().await?;
    Ok(())
}

async fn read_reply<R: AsyncBufRead + Unpin>(upstream_r: &mut R) -> Result<Vec<u8>, SessionError> {
    let reply = read_line(upstream_r).await?;
    if reply.is_empty() {
        return Err(SessionError::UpstreamClosed);
    }
    Ok(reply)
}

/// Prefix match on the three-digit status code.
pub fn has_status(line: &[u8], code: &str) -> bool {
    line.starts_with(code.as_bytes())
}

fn status_text(line: &[u8]) -> String {
    String::from_utf8_lossy(line).trim_end().to_string()
}
