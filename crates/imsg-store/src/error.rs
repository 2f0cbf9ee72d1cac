use thiserror::Error;

/// Errors surfaced by the message store.
///
/// `PermissionDenied` is the only variant meant to abort the process: it is
/// raised when opening `chat.db` itself fails for access reasons, before the
/// RPC loop ever starts (§7).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(
        "permission denied opening {path}: grant Full Disk Access to this process in \
         System Settings > Privacy & Security > Full Disk Access"
    )]
    PermissionDenied { path: String },

    #[error("failed to open database at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("query failed: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("chat {0} not found")]
    ChatNotFound(i64),
}
