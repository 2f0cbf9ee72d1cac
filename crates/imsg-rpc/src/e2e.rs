//! End-to-end scenarios driving the dispatcher, subscription manager and
//! watcher together, the way a real client would see them over the wire.

#![cfg(test)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use imsg_store::{ChatCache, Store};
use rusqlite::{Connection, params};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::collaborators::{Contact, NullMessageSender, StubContactDirectory};
use crate::dispatcher::handle_line;
use crate::handlers::{AppState, Notifier, default_watcher};
use crate::subscriptions::SubscriptionManager;

struct RecordingNotifier {
    frames: Mutex<Vec<Value>>,
}

impl RecordingNotifier {
    fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
        }
    }

    async fn drain(&self) -> Vec<Value> {
        std::mem::take(&mut *self.frames.lock().await)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, value: Value) {
        self.frames.lock().await.push(value);
    }
}

fn seed_schema(conn: &Connection) {
    conn.execute_batch(
        "CREATE TABLE chat (ROWID INTEGER PRIMARY KEY, guid TEXT, chat_identifier TEXT, \
            display_name TEXT, service_name TEXT);
         CREATE TABLE handle (ROWID INTEGER PRIMARY KEY, id TEXT);
         CREATE TABLE message (ROWID INTEGER PRIMARY KEY, guid TEXT, text TEXT, \
            attributedBody BLOB, thread_originator_guid TEXT, handle_id INTEGER, \
            is_from_me INTEGER, date INTEGER, associated_message_guid TEXT, \
            associated_message_type INTEGER);
         CREATE TABLE chat_message_join (chat_id INTEGER, message_id INTEGER);
         CREATE TABLE chat_handle_join (chat_id INTEGER, handle_id INTEGER);
         CREATE TABLE attachment (ROWID INTEGER PRIMARY KEY, filename TEXT, \
            transfer_name TEXT, uti TEXT, mime_type TEXT, total_bytes INTEGER, is_sticker INTEGER);
         CREATE TABLE message_attachment_join (message_id INTEGER, attachment_id INTEGER);",
    )
    .unwrap();
}

fn open_store_with_chat() -> (std::path::PathBuf, Store) {
    let dir = tempfile::tempdir().unwrap().keep();
    let path = dir.join("chat.db");
    let conn = Connection::open(&path).unwrap();
    seed_schema(&conn);
    conn.execute(
        "INSERT INTO chat (ROWID, guid, chat_identifier, display_name, service_name) \
         VALUES (1, 'chat-guid', '+123', 'Test', 'iMessage')",
        [],
    )
    .unwrap();
    conn.execute("INSERT INTO handle (ROWID, id) VALUES (1, '+123')", [])
        .unwrap();
    conn.execute(
        "INSERT INTO chat_handle_join (chat_id, handle_id) VALUES (1, 1)",
        [],
    )
    .unwrap();

    let base = 1_000_000_000_000i64;
    for (rowid, minutes_ago, is_from_me, text) in [
        (1, 10, 0, "hi"),
        (2, 9, 1, "hello back"),
        (3, 1, 0, "latest"),
    ] {
        conn.execute(
            "INSERT INTO message (ROWID, guid, text, handle_id, is_from_me, date) \
             VALUES (?1, ?2, ?3, 1, ?4, ?5)",
            params![
                rowid,
                format!("msg-{rowid}"),
                text,
                is_from_me,
                base - minutes_ago * 60_000_000_000i64
            ],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO chat_message_join (chat_id, message_id) VALUES (1, ?1)",
            params![rowid],
        )
        .unwrap();
    }
    let store = Store::open(path.clone()).unwrap();
    (path, store)
}

fn state_with(store: Store, writer: Arc<RecordingNotifier>) -> Arc<AppState> {
    Arc::new(AppState {
        store: Arc::new(store),
        cache: Arc::new(ChatCache::new()),
        watcher: Arc::new(default_watcher()),
        subscriptions: Arc::new(SubscriptionManager::new()),
        sender: Arc::new(NullMessageSender::default()),
        contacts: Arc::new(StubContactDirectory::new(vec![])),
        writer,
    })
}

fn state_with_contacts(
    store: Store,
    writer: Arc<RecordingNotifier>,
    sender: Arc<NullMessageSender>,
    contacts: Vec<Contact>,
) -> Arc<AppState> {
    Arc::new(AppState {
        store: Arc::new(store),
        cache: Arc::new(ChatCache::new()),
        watcher: Arc::new(default_watcher()),
        subscriptions: Arc::new(SubscriptionManager::new()),
        sender,
        contacts: Arc::new(StubContactDirectory::new(contacts)),
        writer,
    })
}

#[tokio::test]
async fn chats_list_scenario() {
    let (_path, store) = open_store_with_chat();
    let state = state_with(store, Arc::new(RecordingNotifier::new()));

    let resp = handle_line(
        &state,
        r#"{"id":"1","method":"chats.list","params":{"limit":5}}"#,
    )
    .await
    .unwrap();
    let result = resp.result.unwrap();
    let chats = result["chats"].as_array().unwrap();
    assert_eq!(chats[0]["id"], 1);
    assert_eq!(chats[0]["identifier"], "+123");
}

#[tokio::test]
async fn history_ordering_scenario() {
    let (_path, store) = open_store_with_chat();
    let state = state_with(store, Arc::new(RecordingNotifier::new()));

    let resp = handle_line(
        &state,
        r#"{"id":"2","method":"messages.history","params":{"chat_id":1,"limit":10}}"#,
    )
    .await
    .unwrap();
    let result = resp.result.unwrap();
    let messages = result["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1]["is_from_me"], true);
}

#[tokio::test]
async fn body_fallback_scenario() {
    let (path, store) = open_store_with_chat();
    let conn =
        Connection::open_with_flags(&path, rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE).unwrap();
    let mut blob = vec![0x01, 0x2B];
    blob.extend_from_slice(b"fallback text");
    blob.extend_from_slice(&[0x86, 0x84]);
    conn.execute(
        "UPDATE message SET text = NULL, attributedBody = ?1 WHERE ROWID = 1",
        params![blob],
    )
    .unwrap();
    drop(conn);

    let state = state_with(store, Arc::new(RecordingNotifier::new()));
    let resp = handle_line(
        &state,
        r#"{"id":"3","method":"messages.history","params":{"chat_id":1,"limit":10}}"#,
    )
    .await
    .unwrap();
    let messages = resp.result.unwrap()["messages"].as_array().unwrap().clone();
    let recovered = messages.iter().find(|m| m["id"] == 1).unwrap();
    assert_eq!(recovered["text"], "fallback text");
}

#[tokio::test]
async fn subscribe_unsubscribe_resubscribe_scenario() {
    let (path, store) = open_store_with_chat();
    let writer = Arc::new(RecordingNotifier::new());
    let state = state_with(store, writer.clone());

    let resp = handle_line(
        &state,
        r#"{"id":"4","method":"watch.subscribe","params":{"chat_id":1}}"#,
    )
    .await
    .unwrap();
    let s1 = resp.result.unwrap()["subscription"].as_u64().unwrap();
    assert_eq!(s1, 1);

    let conn =
        Connection::open_with_flags(&path, rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE).unwrap();
    conn.execute(
        "INSERT INTO message (ROWID, guid, text, handle_id, is_from_me, date) VALUES (4, 'msg-4', 'new', 1, 0, 0)",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO chat_message_join (chat_id, message_id) VALUES (1, 4)",
        [],
    )
    .unwrap();
    drop(conn);

    tokio::time::sleep(Duration::from_millis(700)).await;
    let frames = writer.drain().await;
    assert!(frames.iter().any(|f| f["method"] == "message"
        && f["params"]["subscription"] == s1
        && f["params"]["message"]["id"] == 4));

    let resp = handle_line(
        &state,
        r#"{"id":"5","method":"watch.unsubscribe","params":{"subscription":1}}"#,
    )
    .await
    .unwrap();
    assert_eq!(resp.result.unwrap()["ok"], true);

    let conn =
        Connection::open_with_flags(&path, rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE).unwrap();
    conn.execute(
        "INSERT INTO message (ROWID, guid, text, handle_id, is_from_me, date) VALUES (5, 'msg-5', 'after unsub', 1, 0, 0)",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO chat_message_join (chat_id, message_id) VALUES (1, 5)",
        [],
    )
    .unwrap();
    drop(conn);

    tokio::time::sleep(Duration::from_millis(700)).await;
    let frames = writer.drain().await;
    assert!(!frames.iter().any(|f| f["params"]["message"]["id"] == 5));

    let resp = handle_line(
        &state,
        r#"{"id":"6","method":"watch.subscribe","params":{"chat_id":1}}"#,
    )
    .await
    .unwrap();
    let s2 = resp.result.unwrap()["subscription"].as_u64().unwrap();
    assert!(s2 > s1);
}

#[tokio::test]
async fn duplicate_chat_target_rejection_scenario() {
    let (_path, store) = open_store_with_chat();
    let state = state_with(store, Arc::new(RecordingNotifier::new()));

    let resp = handle_line(
        &state,
        r#"{"id":"7","method":"send","params":{"to":"+123","chat_id":1,"text":"hi"}}"#,
    )
    .await
    .unwrap();
    assert_eq!(resp.error.unwrap().code, crate::error::INVALID_PARAMS);
}

#[tokio::test]
async fn send_happy_path_scenario() {
    let (_path, store) = open_store_with_chat();
    let sender = Arc::new(NullMessageSender::default());
    let state = state_with_contacts(
        store,
        Arc::new(RecordingNotifier::new()),
        sender.clone(),
        vec![],
    );

    let resp = handle_line(
        &state,
        r#"{"id":"10","method":"send","params":{"chat_id":1,"text":"hello there"}}"#,
    )
    .await
    .unwrap();
    assert_eq!(resp.result.unwrap()["ok"], true);

    let sent = sender.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].chat_identifier.as_deref(), Some("+123"));
    assert_eq!(sent[0].text.as_deref(), Some("hello there"));
}

#[tokio::test]
async fn reactions_send_happy_path_scenario() {
    let (_path, store) = open_store_with_chat();
    let sender = Arc::new(NullMessageSender::default());
    let state = state_with_contacts(
        store,
        Arc::new(RecordingNotifier::new()),
        sender.clone(),
        vec![],
    );

    let resp = handle_line(
        &state,
        r#"{"id":"11","method":"reactions.send","params":{"guid":"msg-1","reaction":"love"}}"#,
    )
    .await
    .unwrap();
    assert_eq!(resp.result.unwrap()["ok"], true);

    let reactions = sender.reactions_sent.lock().await;
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].target_guid, "msg-1");
    assert_eq!(reactions[0].chat_identifier.as_deref(), Some("+123"));
}

#[tokio::test]
async fn reactions_send_unknown_guid_is_invalid_params() {
    let (_path, store) = open_store_with_chat();
    let state = state_with(store, Arc::new(RecordingNotifier::new()));

    let resp = handle_line(
        &state,
        r#"{"id":"12","method":"reactions.send","params":{"guid":"no-such-guid","reaction":"love"}}"#,
    )
    .await
    .unwrap();
    assert_eq!(resp.error.unwrap().code, crate::error::INVALID_PARAMS);
}

#[tokio::test]
async fn contacts_search_and_resolve_scenario() {
    let (_path, store) = open_store_with_chat();
    let sender = Arc::new(NullMessageSender::default());
    let contacts = vec![
        Contact {
            handle: "+123".into(),
            display_name: "Alice Example".into(),
        },
        Contact {
            handle: "+456".into(),
            display_name: "Bob Example".into(),
        },
    ];
    let state = state_with_contacts(store, Arc::new(RecordingNotifier::new()), sender, contacts);

    let resp = handle_line(
        &state,
        r#"{"id":"13","method":"contacts.search","params":{"query":"alice"}}"#,
    )
    .await
    .unwrap();
    let matches = resp.result.unwrap()["matches"].as_array().unwrap().clone();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0]["handle"], "+123");

    let resp = handle_line(
        &state,
        r#"{"id":"14","method":"contacts.resolve","params":{"handles":["+456"]}}"#,
    )
    .await
    .unwrap();
    let resolved = resp.result.unwrap()["contacts"].as_array().unwrap().clone();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0]["display_name"], "Bob Example");
}

#[tokio::test]
async fn contacts_unauthorized_degrades_to_warning() {
    let (_path, store) = open_store_with_chat();
    let state = Arc::new(AppState {
        store: Arc::new(store),
        cache: Arc::new(ChatCache::new()),
        watcher: Arc::new(default_watcher()),
        subscriptions: Arc::new(SubscriptionManager::new()),
        sender: Arc::new(NullMessageSender::default()),
        contacts: Arc::new({
            let mut dir = StubContactDirectory::new(vec![]);
            dir.authorized = false;
            dir
        }),
        writer: Arc::new(RecordingNotifier::new()),
    });

    let resp = handle_line(
        &state,
        r#"{"id":"15","method":"contacts.search","params":{"query":"x"}}"#,
    )
    .await
    .unwrap();
    let result = resp.result.unwrap();
    assert_eq!(result["matches"].as_array().unwrap().len(), 0);
    assert_eq!(result["warning"], "contacts_unavailable");
}

#[tokio::test]
async fn zero_limit_is_treated_as_one() {
    let (_path, store) = open_store_with_chat();
    let state = state_with(store, Arc::new(RecordingNotifier::new()));

    let resp = handle_line(
        &state,
        r#"{"id":"16","method":"messages.history","params":{"chat_id":1,"limit":0}}"#,
    )
    .await
    .unwrap();
    let messages = resp.result.unwrap()["messages"].as_array().unwrap().clone();
    assert_eq!(messages.len(), 1);
}

#[tokio::test]
async fn bad_line_then_good_line_scenario() {
    let (_path, store) = open_store_with_chat();
    let state = state_with(store, Arc::new(RecordingNotifier::new()));

    let first = handle_line(&state, "not json").await.unwrap();
    assert_eq!(first.error.unwrap().code, crate::error::PARSE_ERROR);
    assert_eq!(first.id, Value::Null);

    let second = handle_line(&state, r#"{"id":"9","method":"chats.list"}"#)
        .await
        .unwrap();
    assert!(second.error.is_none());
    assert_eq!(second.id, serde_json::json!("9"));
}

#[tokio::test]
async fn invalid_utf8_on_the_wire_does_not_end_the_session() {
    let (_path, store) = open_store_with_chat();
    let writer = Arc::new(RecordingNotifier::new());
    let state = Arc::new(AppState {
        store: Arc::new(store),
        cache: Arc::new(ChatCache::new()),
        watcher: Arc::new(default_watcher()),
        subscriptions: Arc::new(SubscriptionManager::new()),
        sender: Arc::new(NullMessageSender::default()),
        contacts: Arc::new(StubContactDirectory::new(vec![])),
        writer: writer.clone(),
    });

    let mut input = vec![0xFF, 0xFE, b'\n'];
    input.extend_from_slice(br#"{"id":"1","method":"chats.list"}"#);
    input.push(b'\n');

    crate::serve(state, input.as_slice()).await;

    let frames = writer.drain().await;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["error"]["code"], crate::error::PARSE_ERROR);
    assert_eq!(frames[0]["id"], Value::Null);
    assert_eq!(frames[1]["id"], "1");
    assert!(frames[1]["result"]["chats"].is_array());
}
