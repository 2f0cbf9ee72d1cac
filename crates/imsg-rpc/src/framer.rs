//! C6: line-delimited framing and JSON encode/decode over an async byte stream.

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::warn;

/// One line of input, read at the byte level so malformed UTF-8 can be
/// reported to the caller instead of being folded into EOF (§4.6/§7: a
/// malformed line must not terminate the session).
pub enum Frame {
    Line(String),
    InvalidUtf8,
}

/// Read up to and including the next `\n`, stripping the terminator.
/// `None` means the peer closed the stream (or a real I/O error occurred).
/// Blank lines are skipped. Non-UTF-8 bytes yield `Frame::InvalidUtf8`
/// rather than ending the loop.
pub async fn read_frame<R>(reader: &mut BufReader<R>) -> Option<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => return None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                }
                if buf.is_empty() {
                    continue;
                }
                return Some(match String::from_utf8(buf) {
                    Ok(line) => Frame::Line(line),
                    Err(_) => Frame::InvalidUtf8,
                });
            }
            Err(err) => {
                warn!(error = %err, "error reading frame, treating as EOF");
                return None;
            }
        }
    }
}

pub fn reader_of<R>(reader: R) -> BufReader<R>
where
    R: AsyncRead + Unpin,
{
    BufReader::new(reader)
}

/// Parse a raw line into a JSON value.
pub fn parse_frame(line: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(line)
}

/// Serialises outbound frames one at a time so notifications from
/// subscription workers and responses from the dispatcher never interleave.
pub struct FrameWriter<W> {
    inner: tokio::sync::Mutex<W>,
}

const FALLBACK_INTERNAL_ERROR: &str = "{\"jsonrpc\":\"2.0\",\"id\":null,\"error\":{\"code\":-32603,\"message\":\"internal error\"}}\n";

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(inner),
        }
    }

    pub async fn write<T: Serialize>(&self, value: &T) {
        let line = match serde_json::to_string(value) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "failed to encode outbound frame, emitting fallback");
                let mut guard = self.inner.lock().await;
                let _ = guard.write_all(FALLBACK_INTERNAL_ERROR.as_bytes()).await;
                let _ = guard.flush().await;
                return;
            }
        };
        let mut guard = self.inner.lock().await;
        let _ = guard.write_all(line.as_bytes()).await;
        let _ = guard.write_all(b"\n").await;
        let _ = guard.flush().await;
    }
}
