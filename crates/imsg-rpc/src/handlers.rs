//! C9: the eight method handlers, plus the shared state they run against.

use std::sync::Arc;

use async_trait::async_trait;
use imsg_store::{ChatCache, Message, ReactionKind, Store};
use imsg_watch::{Filter, Watcher, WatcherConfig};
use serde_json::{Value, json};
use tracing::warn;

use crate::collaborators::{
    Contact, ContactDirectory, ContactError, MessageSender, SendError, SendOptions,
    SendReactionOptions,
};
use crate::error::RpcError;
use crate::protocol::RpcNotification;
use crate::subscriptions::SubscriptionManager;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, value: Value);
}

pub struct AppState {
    pub store: Arc<Store>,
    pub cache: Arc<ChatCache>,
    pub watcher: Arc<Watcher>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub sender: Arc<dyn MessageSender>,
    pub contacts: Arc<dyn ContactDirectory>,
    pub writer: Arc<dyn Notifier>,
}

fn str_field<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn i64_field(params: &Value, key: &str, default: i64) -> i64 {
    params.get(key).and_then(Value::as_i64).unwrap_or(default)
}

fn bool_field(params: &Value, key: &str, default: bool) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn string_list_field(params: &Value, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn build_filter(params: &Value) -> Result<Filter, RpcError> {
    let participants = string_list_field(params, "participants");
    Ok(Filter::new(
        participants,
        str_field(params, "start"),
        str_field(params, "end"),
    )?)
}

fn message_to_wire(message: &Message, chat: &imsg_store::ChatInfo, include_extras: bool) -> Value {
    let mut obj = json!({
        "id": message.id,
        "chat_id": message.chat_id,
        "guid": message.guid,
        "reply_to_guid": message.reply_to_guid,
        "sender": message.sender,
        "is_from_me": message.is_from_me,
        "text": message.text,
        "created_at": message.created_at.to_rfc3339(),
        "chat_identifier": chat.identifier,
        "chat_guid": chat.guid,
        "chat_name": chat.display_name,
        "participants": chat.participants,
        "is_group": chat.is_group,
    });
    if include_extras {
        obj["attachments"] = json!(message.attachments);
        obj["reactions"] = json!(message.reactions);
    }
    obj
}

/// `chats.list` — params: `{limit? int}`.
pub async fn chats_list(state: &AppState, params: Value) -> Result<Value, RpcError> {
    let limit = i64_field(&params, "limit", 20).max(1);
    let chats = state.store.list_chats(limit)?;
    Ok(json!({ "chats": chats }))
}

/// `messages.history` — params: `{chat_id int, limit?, participants?, start?, end?, attachments?}`.
pub async fn messages_history(state: &AppState, params: Value) -> Result<Value, RpcError> {
    let Some(chat_id) = params.get("chat_id").and_then(Value::as_i64) else {
        return Err(RpcError::InvalidParams("chat_id is required".into()));
    };
    let limit = i64_field(&params, "limit", 50).max(1);
    let attachments = bool_field(&params, "attachments", false);
    let filter = build_filter(&params)?;

    let chat = state.cache.get_or_fetch(&state.store, chat_id)?;
    let messages = state
        .store
        .messages_by_chat(chat_id, limit, attachments)?
        .into_iter()
        .filter(|m| filter.matches(m))
        .map(|m| message_to_wire(&m, &chat, attachments))
        .collect::<Vec<_>>();
    Ok(json!({ "messages": messages }))
}

/// `watch.subscribe` — params: `{chat_id?, since_rowid?, participants?, start?, end?, attachments?}`.
pub async fn watch_subscribe(state: &AppState, params: Value) -> Result<Value, RpcError> {
    let chat_id_filter = i64_field(&params, "chat_id", 0);
    let attachments = bool_field(&params, "attachments", false);
    let filter = build_filter(&params)?;

    let since_rowid = match params.get("since_rowid").and_then(Value::as_i64) {
        Some(rowid) => rowid,
        None => state.store.max_row_id()?,
    };

    let (subscription_id, token) = state.subscriptions.allocate().await;
    let mut rx = state.watcher.subscribe(
        state.store.clone(),
        chat_id_filter,
        since_rowid,
        attachments,
        token.clone(),
    );

    let store = state.store.clone();
    let cache = state.cache.clone();
    let writer = state.writer.clone();
    let subscriptions = state.subscriptions.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                received = rx.recv() => {
                    let Some(message) = received else { break };
                    if !filter.matches(&message) {
                        continue;
                    }
                    let result = {
                        let store = store.clone();
                        let cache = cache.clone();
                        let chat_id = message.chat_id;
                        tokio::task::spawn_blocking(move || cache.get_or_fetch(&store, chat_id)).await
                    };
                    let chat = match result {
                        Ok(Ok(chat)) => chat,
                        Ok(Err(err)) => {
                            warn!(error = %err, subscription_id, "subscription failed to resolve chat, terminating");
                            writer
                                .notify(json!(RpcNotification::new(
                                    "error",
                                    json!({"subscription": subscription_id, "error": {"message": err.to_string()}})
                                )))
                                .await;
                            break;
                        }
                        Err(join_err) => {
                            warn!(error = %join_err, subscription_id, "subscription worker panicked, terminating");
                            break;
                        }
                    };
                    let wire = message_to_wire(&message, &chat, attachments);
                    writer
                        .notify(json!(RpcNotification::new(
                            "message",
                            json!({"subscription": subscription_id, "message": wire})
                        )))
                        .await;
                }
            }
        }
        subscriptions.unsubscribe(subscription_id).await;
    });

    Ok(json!({ "subscription": subscription_id }))
}

/// `watch.unsubscribe` — params: `{subscription int}`.
pub async fn watch_unsubscribe(state: &AppState, params: Value) -> Result<Value, RpcError> {
    let Some(subscription_id) = params.get("subscription").and_then(Value::as_u64) else {
        return Err(RpcError::InvalidParams("subscription is required".into()));
    };
    state.subscriptions.unsubscribe(subscription_id).await;
    Ok(json!({ "ok": true }))
}

fn resolve_chat_target(params: &Value) -> (Option<i64>, Option<String>, Option<String>) {
    (
        params.get("chat_id").and_then(Value::as_i64),
        str_field(params, "chat_identifier").map(str::to_string),
        str_field(params, "chat_guid").map(str::to_string),
    )
}

/// `send` — see the method-handler table for the full validation rules.
pub async fn send(state: &AppState, params: Value) -> Result<Value, RpcError> {
    let to = str_field(&params, "to").map(str::to_string);
    let (chat_id, mut chat_identifier, mut chat_guid) = resolve_chat_target(&params);
    let has_chat_target = chat_id.is_some() || chat_identifier.is_some() || chat_guid.is_some();

    if to.is_some() && has_chat_target {
        return Err(RpcError::InvalidParams(
            "cannot supply both `to` and a chat target".into(),
        ));
    }
    if to.is_none() && !has_chat_target {
        return Err(RpcError::InvalidParams(
            "one of `to` or a chat target is required".into(),
        ));
    }

    let text = str_field(&params, "text")
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let file = str_field(&params, "file")
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    if text.is_none() && file.is_none() {
        return Err(RpcError::InvalidParams(
            "one of `text` or `file` is required".into(),
        ));
    }

    if let Some(chat_id) = chat_id {
        let info = state.cache.get_or_fetch(&state.store, chat_id)?;
        chat_identifier.get_or_insert(info.identifier);
        chat_guid = chat_guid.or(info.guid);
    }

    let service = str_field(&params, "service").unwrap_or("auto").to_string();
    let region = str_field(&params, "region").unwrap_or("US").to_string();

    state
        .sender
        .send(SendOptions {
            to,
            chat_identifier,
            chat_guid,
            text,
            file,
            service,
            region,
        })
        .await
        .map_err(map_send_error)?;
    Ok(json!({ "ok": true }))
}

/// `reactions.send` — params: `{guid, reaction, chat_id?|chat_identifier?|chat_guid?}`.
pub async fn reactions_send(state: &AppState, params: Value) -> Result<Value, RpcError> {
    let Some(guid) = str_field(&params, "guid") else {
        return Err(RpcError::InvalidParams("guid is required".into()));
    };
    let Some(reaction_str) = str_field(&params, "reaction") else {
        return Err(RpcError::InvalidParams("reaction is required".into()));
    };
    let kind = ReactionKind::parse(reaction_str);

    let (chat_id, mut chat_identifier, mut chat_guid) = resolve_chat_target(&params);
    if chat_identifier.is_none() && chat_guid.is_none() && chat_id.is_none() {
        let message = state
            .store
            .message_by_guid(guid)?
            .ok_or_else(|| RpcError::InvalidParams(format!("unknown message guid {guid}")))?;
        let info = state.cache.get_or_fetch(&state.store, message.chat_id)?;
        chat_identifier = Some(info.identifier);
        chat_guid = info.guid;
    } else if let Some(chat_id) = chat_id {
        let info = state.cache.get_or_fetch(&state.store, chat_id)?;
        chat_identifier.get_or_insert(info.identifier);
        chat_guid = chat_guid.or(info.guid);
    }

    state
        .sender
        .send_reaction(SendReactionOptions {
            target_guid: guid.to_string(),
            reaction: kind,
            emoji: reaction_str.to_string(),
            chat_identifier,
            chat_guid,
        })
        .await
        .map_err(map_send_error)?;
    Ok(json!({ "ok": true }))
}

/// `contacts.search` — params: `{query, limit?}`.
pub async fn contacts_search(state: &AppState, params: Value) -> Result<Value, RpcError> {
    let Some(query) = str_field(&params, "query") else {
        return Err(RpcError::InvalidParams("query is required".into()));
    };
    let limit = i64_field(&params, "limit", 10).max(1) as usize;
    match state.contacts.search(query, limit).await {
        Ok(matches) => Ok(json!({ "matches": contacts_json(matches) })),
        Err(ContactError::Unauthorized) => {
            Ok(json!({ "matches": [], "warning": "contacts_unavailable" }))
        }
        Err(ContactError::Other(msg)) => Err(RpcError::Internal(msg)),
    }
}

/// `contacts.resolve` — params: `{handles: [string]}`.
pub async fn contacts_resolve(state: &AppState, params: Value) -> Result<Value, RpcError> {
    let handles = string_list_field(&params, "handles");
    if handles.is_empty() {
        return Err(RpcError::InvalidParams("handles must be non-empty".into()));
    }
    match state.contacts.resolve(&handles).await {
        Ok(contacts) => Ok(json!({ "contacts": contacts_json(contacts) })),
        Err(ContactError::Unauthorized) => {
            Ok(json!({ "contacts": [], "warning": "contacts_unavailable" }))
        }
        Err(ContactError::Other(msg)) => Err(RpcError::Internal(msg)),
    }
}

fn contacts_json(contacts: Vec<Contact>) -> Value {
    json!(
        contacts
            .into_iter()
            .map(|c| json!({"handle": c.handle, "display_name": c.display_name}))
            .collect::<Vec<_>>()
    )
}

fn map_send_error(err: SendError) -> RpcError {
    match err {
        SendError::InvalidInput(msg) => RpcError::InvalidParams(msg),
        SendError::Unavailable(msg) => RpcError::Internal(msg),
    }
}

pub fn default_watcher() -> Watcher {
    Watcher::new(WatcherConfig::default())
}
