//! Line-delimited JSON-RPC 2.0 server (C6-C9) bridging clients to the
//! Messages store and watcher.

pub mod collaborators;
mod dispatcher;
#[cfg(test)]
mod e2e;
mod error;
mod framer;
mod handlers;
pub mod protocol;
mod subscriptions;

pub use collaborators::{ContactDirectory, MessageSender, NullMessageSender, StubContactDirectory};
pub use dispatcher::handle_line;
pub use error::RpcError;
pub use framer::{Frame, FrameWriter, read_frame, reader_of};
pub use handlers::{AppState, Notifier, default_watcher};
pub use subscriptions::SubscriptionManager;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::PARSE_ERROR;
use crate::protocol::RpcResponse;

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> Notifier for FrameWriter<W> {
    async fn notify(&self, value: Value) {
        self.write(&value).await
    }
}

/// Drive the reader loop for one peer connection to completion. Reads
/// frames until EOF, dispatches each through `state`, and writes responses
/// through `state.writer`. A malformed-UTF-8 line produces a `-32700`
/// parse-error response and the loop continues; only a real EOF (or I/O
/// error) cancels every active subscription and ends the session.
pub async fn serve<R>(state: Arc<AppState>, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut reader = reader_of(reader);
    loop {
        let response = match read_frame(&mut reader).await {
            None => {
                debug!("input closed, cancelling subscriptions");
                state.subscriptions.cancel_all().await;
                return;
            }
            Some(Frame::InvalidUtf8) => {
                Some(RpcResponse::err(Value::Null, PARSE_ERROR, "parse error"))
            }
            Some(Frame::Line(line)) => handle_line(&state, &line).await,
        };
        if let Some(response) = response {
            state
                .writer
                .notify(serde_json::to_value(&response).unwrap_or(Value::Null))
                .await;
        }
    }
}

/// Build the writer half from an `AsyncWrite`, type-erased behind the
/// `Notifier` trait so `AppState` doesn't need to be generic over it.
pub fn notifier_for<W: AsyncWrite + Unpin + Send + 'static>(writer: W) -> Arc<dyn Notifier> {
    Arc::new(FrameWriter::new(writer))
}

/// Best-effort flush helper used at shutdown in the CLI binary.
pub async fn flush<W: AsyncWrite + Unpin>(writer: &mut W) {
    let _ = writer.flush().await;
}

pub fn log_startup(db_path: &str) {
    info!(db_path, "imsg-rpc server starting");
}
