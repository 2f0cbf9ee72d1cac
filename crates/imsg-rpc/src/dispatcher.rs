//! C7: request dispatcher — validates, routes and invokes method handlers
//! per the ordered checks the protocol specifies.

use serde_json::Value;

use crate::error::{
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::framer::parse_frame;
use crate::handlers::{
    AppState, chats_list, contacts_resolve, contacts_search, messages_history, reactions_send,
    send, watch_subscribe, watch_unsubscribe,
};
use crate::protocol::RpcResponse;

/// Handle one raw input line, returning the response to emit (if any).
/// Notifications (no `id` field) never produce a success response, but
/// still produce an error response with `id: null` on failure (§4.7).
pub async fn handle_line(state: &AppState, line: &str) -> Option<RpcResponse> {
    let value = match parse_frame(line) {
        Ok(value) => value,
        Err(_) => return Some(RpcResponse::err(Value::Null, PARSE_ERROR, "parse error")),
    };

    let Some(object) = value.as_object() else {
        return Some(RpcResponse::err(
            Value::Null,
            INVALID_REQUEST,
            "request must be an object",
        ));
    };

    let has_id = object.contains_key("id");
    let id = object.get("id").cloned().unwrap_or(Value::Null);

    if let Some(version) = object.get("jsonrpc")
        && version.as_str() != Some("2.0")
    {
        return Some(RpcResponse::err(
            id,
            INVALID_REQUEST,
            "jsonrpc must be \"2.0\"",
        ));
    }

    let method = match object.get("method").and_then(Value::as_str) {
        Some(method) if !method.is_empty() => method,
        _ => return Some(RpcResponse::err(id, INVALID_REQUEST, "method is required")),
    };

    let params = object
        .get("params")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    let outcome = match method {
        "chats.list" => chats_list(state, params).await,
        "messages.history" => messages_history(state, params).await,
        "watch.subscribe" => watch_subscribe(state, params).await,
        "watch.unsubscribe" => watch_unsubscribe(state, params).await,
        "send" => send(state, params).await,
        "reactions.send" => reactions_send(state, params).await,
        "contacts.search" => contacts_search(state, params).await,
        "contacts.resolve" => contacts_resolve(state, params).await,
        _ => {
            return Some(RpcResponse::err(
                id,
                METHOD_NOT_FOUND,
                format!("unknown method {method}"),
            ));
        }
    };

    match outcome {
        Ok(result) => {
            if has_id {
                Some(RpcResponse::ok(id, result))
            } else {
                None
            }
        }
        Err(err) => {
            let code = err.code();
            debug_assert!(matches!(code, INVALID_PARAMS | INTERNAL_ERROR));
            Some(RpcResponse::err(id, code, err.to_string()))
        }
    }
}
