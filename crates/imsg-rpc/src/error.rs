use thiserror::Error;

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// Typed handler-side error. The dispatcher maps this to a JSON-RPC error
/// object via [`RpcError::code`]; everything else a handler returns via `?`
/// from an untyped source collapses to [`INTERNAL_ERROR`].
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("{0}")]
    InvalidParams(String),

    #[error(transparent)]
    Store(#[from] imsg_store::StoreError),

    #[error(transparent)]
    Filter(#[from] imsg_watch::FilterError),

    #[error("{0}")]
    Internal(String),
}

impl RpcError {
    pub fn code(&self) -> i32 {
        match self {
            RpcError::InvalidParams(_) | RpcError::Filter(_) => INVALID_PARAMS,
            RpcError::Store(imsg_store::StoreError::ChatNotFound(_)) => INVALID_PARAMS,
            RpcError::Store(_) | RpcError::Internal(_) => INTERNAL_ERROR,
        }
    }
}
