// src/line.rs
/* Bounded line framing. Lines longer than MAX_LINE come out as several chunks. */

use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};

/// Largest chunk ever read or forwarded at once, terminator included.
pub const MAX_LINE: usize = 512;

pub fn line_reader<R: AsyncRead>(inner: R) -> BufReader<R> {
    BufReader::with_capacity(MAX_LINE, inner)
}

/// Length of the next frame in `buf`: up to and including the first `\n`,
/// or everything buffered when no terminator has arrived yet.
pub fn frame_len(buf: &[u8]) -> usize {
    match buf.iter().position(|&b| b == b'\n') {
        Some(pos) => pos + 1,
        None => buf.len(),
    }
}

/// Reads a single line of at most `MAX_LINE` bytes. An empty result means end of stream.
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut line = Vec::with_capacity(MAX_LINE);
    while line.len() < MAX_LINE {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            break;
        }
        let window = &buf[..buf.len().min(MAX_LINE - line.len())];
        let n = frame_len(window);
        let complete = window[n - 1] == b'\n';
        line.extend_from_slice(&window[..n]);
        reader.consume(n);
        if complete {
            break;
        }
    }
    Ok(line)
}
