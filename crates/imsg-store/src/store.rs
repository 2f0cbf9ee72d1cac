//! C2: read-only queries over the Messages SQLite database.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, warn};

use crate::epoch::{apple_time_to_utc, decode_attributed_body};
use crate::error::StoreError;
use crate::models::{Attachment, Chat, ChatInfo, Message, Reaction, ReactionKind};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Read-only handle onto `chat.db`.
///
/// Each query opens its own short-lived connection rather than sharing one
/// behind a lock (§5): `rusqlite::Connection` is `!Sync`, and a fresh
/// connection per query sidesteps holding a handle across an `.await` point
/// while the foreign writer (Messages.app) may itself be holding locks.
pub struct Store {
    db_path: PathBuf,
    has_attributed_body: bool,
}

impl Store {
    /// Open the store, probing the schema once up front. Fails fast with
    /// [`StoreError::PermissionDenied`] when the file cannot be read.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let db_path = db_path.into();
        if let Err(err) = std::fs::File::open(&db_path)
            && err.kind() == std::io::ErrorKind::PermissionDenied
        {
            return Err(StoreError::PermissionDenied {
                path: db_path.display().to_string(),
            });
        }

        let conn = Self::connect_at(&db_path)?;
        let has_attributed_body = Self::probe_attributed_body(&conn)?;
        debug!(
            path = %db_path.display(),
            has_attributed_body,
            "opened Messages store"
        );
        Ok(Self {
            db_path,
            has_attributed_body,
        })
    }

    fn connect_at(db_path: &Path) -> Result<Connection, StoreError> {
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| StoreError::Open {
            path: db_path.display().to_string(),
            source,
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        Self::connect_at(&self.db_path)
    }

    fn probe_attributed_body(conn: &Connection) -> Result<bool, StoreError> {
        let mut stmt = conn.prepare("PRAGMA table_info(message)")?;
        let has_column = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .filter_map(Result::ok)
            .any(|name| name == "attributedBody");
        Ok(has_column)
    }

    fn resolve_text(&self, text: Option<String>, blob: Option<Vec<u8>>) -> String {
        match text {
            Some(t) if !t.is_empty() => t,
            _ => blob
                .filter(|_| self.has_attributed_body)
                .map(|b| decode_attributed_body(&b))
                .unwrap_or_default(),
        }
    }

    /// `listChats(limit)` — ordered by most recently active, newest first.
    pub fn list_chats(&self, limit: i64) -> Result<Vec<Chat>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT chat.ROWID, chat.chat_identifier, chat.guid, chat.display_name, \
                    chat.service_name, MAX(message.date) \
             FROM chat \
             JOIN chat_message_join ON chat_message_join.chat_id = chat.ROWID \
             JOIN message ON message.ROWID = chat_message_join.message_id \
             GROUP BY chat.ROWID \
             ORDER BY MAX(message.date) DESC \
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                let id: i64 = row.get(0)?;
                let identifier: String = row.get(1)?;
                let guid: Option<String> = row.get(2)?;
                let display_name: Option<String> = row.get(3)?;
                let service: String = row.get(4)?;
                let last_date: i64 = row.get(5)?;
                Ok((id, identifier, guid, display_name, service, last_date))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut chats = Vec::with_capacity(rows.len());
        for (id, identifier, guid, display_name, service, last_date) in rows {
            let participants = self.participants_with(&conn, id)?;
            let is_group = participants.len() > 1;
            chats.push(Chat {
                id,
                display_name: display_name
                    .filter(|n| !n.is_empty())
                    .or(Some(identifier.clone())),
                identifier,
                guid,
                service,
                last_message_at: apple_time_to_utc(last_date),
                participants,
                is_group,
            });
        }
        Ok(chats)
    }

    /// `messagesByChat(chatID, limit)` — newest first. Attachments and
    /// reactions are fetched only when `include_extras` is set, so a caller
    /// that isn't going to put them on the wire doesn't pay for the extra
    /// per-message queries.
    pub fn messages_by_chat(
        &self,
        chat_id: i64,
        limit: i64,
        include_extras: bool,
    ) -> Result<Vec<Message>, StoreError> {
        let conn = self.connect()?;
        self.query_messages(
            &conn,
            "SELECT message.ROWID, message.guid, message.text, message.attributedBody, \
                    message.thread_originator_guid, handle.id, message.is_from_me, message.date \
             FROM message \
             JOIN chat_message_join ON chat_message_join.message_id = message.ROWID \
             LEFT JOIN handle ON handle.ROWID = message.handle_id \
             WHERE chat_message_join.chat_id = ?1 \
             ORDER BY message.ROWID DESC \
             LIMIT ?2",
            params![chat_id, limit],
            chat_id,
            include_extras,
        )
    }

    /// `messagesAfter(afterRowID, chatIDFilter, limit)` — ascending, used by
    /// the watcher. `chat_id_filter == 0` means no chat filter. See
    /// `messages_by_chat` for `include_extras`.
    pub fn messages_after(
        &self,
        after_row_id: i64,
        chat_id_filter: i64,
        limit: i64,
        include_extras: bool,
    ) -> Result<Vec<Message>, StoreError> {
        let conn = self.connect()?;
        if chat_id_filter == 0 {
            let mut stmt = conn.prepare(
                "SELECT message.ROWID, message.guid, message.text, message.attributedBody, \
                        message.thread_originator_guid, handle.id, message.is_from_me, \
                        message.date, chat_message_join.chat_id \
                 FROM message \
                 JOIN chat_message_join ON chat_message_join.message_id = message.ROWID \
                 LEFT JOIN handle ON handle.ROWID = message.handle_id \
                 WHERE message.ROWID > ?1 \
                 ORDER BY message.ROWID ASC \
                 LIMIT ?2",
            )?;
            let messages = stmt
                .query_map(params![after_row_id, limit], |row| {
                    self.row_to_message(row, Some(8))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            self.maybe_attach_children(&conn, messages, include_extras)
        } else {
            self.query_messages(
                &conn,
                "SELECT message.ROWID, message.guid, message.text, message.attributedBody, \
                        message.thread_originator_guid, handle.id, message.is_from_me, \
                        message.date \
                 FROM message \
                 JOIN chat_message_join ON chat_message_join.message_id = message.ROWID \
                 LEFT JOIN handle ON handle.ROWID = message.handle_id \
                 WHERE message.ROWID > ?1 AND chat_message_join.chat_id = ?2 \
                 ORDER BY message.ROWID ASC \
                 LIMIT ?3",
                params![after_row_id, chat_id_filter, limit],
                chat_id_filter,
                include_extras,
            )
        }
    }

    /// `message(guid)` — look up a single message, resolving its owning chat.
    /// Callers only need the row's identity and chat id, never its
    /// attachments or reactions, so those are never fetched here.
    pub fn message_by_guid(&self, guid: &str) -> Result<Option<Message>, StoreError> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT message.ROWID, message.guid, message.text, message.attributedBody, \
                    message.thread_originator_guid, handle.id, message.is_from_me, \
                    message.date, chat_message_join.chat_id \
             FROM message \
             JOIN chat_message_join ON chat_message_join.message_id = message.ROWID \
             LEFT JOIN handle ON handle.ROWID = message.handle_id \
             WHERE message.guid = ?1",
            params![guid],
            |row| self.row_to_message(row, Some(8)),
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// `maxRowID()` — watermark bootstrap.
    pub fn max_row_id(&self) -> Result<i64, StoreError> {
        let conn = self.connect()?;
        let max: i64 =
            conn.query_row("SELECT COALESCE(MAX(ROWID), 0) FROM message", [], |row| {
                row.get(0)
            })?;
        Ok(max)
    }

    /// `attachmentsByMessage(messageID)`.
    pub fn attachments_by_message(&self, message_id: i64) -> Result<Vec<Attachment>, StoreError> {
        let conn = self.connect()?;
        self.attachments_with(&conn, message_id)
    }

    /// `reactionsByMessage(messageID)`.
    pub fn reactions_by_message(&self, message_id: i64) -> Result<Vec<Reaction>, StoreError> {
        let conn = self.connect()?;
        self.reactions_with(&conn, message_id)
    }

    /// `chatInfo(chatID)` — used by the chat cache.
    pub fn chat_info(&self, chat_id: i64) -> Result<Option<ChatInfo>, StoreError> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                "SELECT chat_identifier, guid, display_name, service_name FROM chat WHERE ROWID = ?1",
                params![chat_id],
                |row| {
                    let identifier: String = row.get(0)?;
                    let guid: Option<String> = row.get(1)?;
                    let display_name: Option<String> = row.get(2)?;
                    let service: String = row.get(3)?;
                    Ok((identifier, guid, display_name, service))
                },
            )
            .optional()?;
        let Some((identifier, guid, display_name, service)) = row else {
            return Ok(None);
        };
        let participants = self.participants_with(&conn, chat_id)?;
        Ok(Some(ChatInfo {
            display_name: display_name
                .filter(|n| !n.is_empty())
                .or(Some(identifier.clone())),
            is_group: participants.len() > 1,
            identifier,
            guid,
            service,
            participants,
        }))
    }

    /// `participants(chatID)` — used by the chat cache.
    pub fn participants(&self, chat_id: i64) -> Result<Vec<String>, StoreError> {
        let conn = self.connect()?;
        self.participants_with(&conn, chat_id)
    }

    fn participants_with(
        &self,
        conn: &Connection,
        chat_id: i64,
    ) -> Result<Vec<String>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT handle.id FROM chat_handle_join \
             JOIN handle ON handle.ROWID = chat_handle_join.handle_id \
             WHERE chat_handle_join.chat_id = ?1 \
             ORDER BY handle.id",
        )?;
        let handles = stmt
            .query_map(params![chat_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(handles)
    }

    fn query_messages(
        &self,
        conn: &Connection,
        sql: &str,
        query_params: impl rusqlite::Params,
        chat_id: i64,
        include_extras: bool,
    ) -> Result<Vec<Message>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let messages = stmt
            .query_map(query_params, |row| {
                self.row_to_message(row, None).map(|mut m| {
                    m.chat_id = chat_id;
                    m
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        self.maybe_attach_children(conn, messages, include_extras)
    }

    /// Build a [`Message`] from a row whose first 8 columns are
    /// `ROWID, guid, text, attributedBody, thread_originator_guid, sender, is_from_me, date`,
    /// optionally followed by a `chat_id` column at `chat_id_col`.
    fn row_to_message(
        &self,
        row: &rusqlite::Row<'_>,
        chat_id_col: Option<usize>,
    ) -> rusqlite::Result<Message> {
        let id: i64 = row.get(0)?;
        let guid: String = row.get(1)?;
        let text: Option<String> = row.get(2)?;
        let blob: Option<Vec<u8>> = row.get(3)?;
        let reply_to_guid: Option<String> = row.get(4)?;
        let sender: Option<String> = row.get(5)?;
        let is_from_me: bool = row.get(6)?;
        let date: i64 = row.get(7)?;
        let chat_id = match chat_id_col {
            Some(col) => row.get(col)?,
            None => 0,
        };
        Ok(Message {
            id,
            chat_id,
            guid,
            reply_to_guid,
            sender: sender.unwrap_or_default(),
            is_from_me,
            text: self.resolve_text(text, blob),
            created_at: apple_time_to_utc(date),
            attachments: Vec::new(),
            reactions: Vec::new(),
        })
    }

    /// Fetch attachments and reactions for each message, unless `include_extras`
    /// is false, in which case the rows are returned as-is (each already
    /// carries empty `attachments`/`reactions` from `row_to_message`).
    fn maybe_attach_children(
        &self,
        conn: &Connection,
        messages: Vec<Message>,
        include_extras: bool,
    ) -> Result<Vec<Message>, StoreError> {
        if !include_extras {
            return Ok(messages);
        }
        self.attach_children(conn, messages)
    }

    fn attach_children(
        &self,
        conn: &Connection,
        mut messages: Vec<Message>,
    ) -> Result<Vec<Message>, StoreError> {
        for message in &mut messages {
            message.attachments = self.attachments_with(conn, message.id)?;
            message.reactions = self.reactions_with(conn, message.id)?;
        }
        Ok(messages)
    }

    fn attachments_with(
        &self,
        conn: &Connection,
        message_id: i64,
    ) -> Result<Vec<Attachment>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT attachment.filename, attachment.transfer_name, attachment.uti, \
                    attachment.mime_type, attachment.total_bytes, attachment.is_sticker \
             FROM attachment \
             JOIN message_attachment_join ON message_attachment_join.attachment_id = attachment.ROWID \
             WHERE message_attachment_join.message_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![message_id], |row| {
                let filename: String = row.get(0)?;
                let transfer_name: String = row.get(1)?;
                let uti: String = row.get(2)?;
                let mime_type: String = row.get(3)?;
                let total_bytes: i64 = row.get(4)?;
                let is_sticker: bool = row.get(5)?;
                Ok((
                    filename,
                    transfer_name,
                    uti,
                    mime_type,
                    total_bytes,
                    is_sticker,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut attachments = Vec::with_capacity(rows.len());
        for (filename, transfer_name, uti, mime_type, total_bytes, is_sticker) in rows {
            let resolved = expand_tilde(&filename);
            let missing = !Path::new(&resolved).is_file();
            attachments.push(Attachment {
                filename,
                transfer_name,
                uti,
                mime_type,
                total_bytes,
                is_sticker,
                path: resolved,
                missing,
            });
        }
        Ok(attachments)
    }

    fn reactions_with(
        &self,
        conn: &Connection,
        message_id: i64,
    ) -> Result<Vec<Reaction>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT reaction.ROWID, reaction.associated_message_type, reaction.text, \
                    handle.id, reaction.is_from_me, reaction.date \
             FROM message AS target \
             JOIN message AS reaction ON reaction.associated_message_guid = target.guid \
             LEFT JOIN handle ON handle.ROWID = reaction.handle_id \
             WHERE target.ROWID = ?1 AND reaction.associated_message_type >= 2000",
        )?;
        let rows = stmt
            .query_map(params![message_id], |row| {
                let id: i64 = row.get(0)?;
                let type_code: i64 = row.get(1)?;
                let text: Option<String> = row.get(2)?;
                let sender: Option<String> = row.get(3)?;
                let is_from_me: bool = row.get(4)?;
                let date: i64 = row.get(5)?;
                Ok((id, type_code, text, sender, is_from_me, date))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut reactions = Vec::with_capacity(rows.len());
        for (id, type_code, text, sender, is_from_me, date) in rows {
            let Some(kind) = ReactionKind::from_associated_message_type(type_code) else {
                warn!(type_code, "unrecognised associated_message_type, skipping");
                continue;
            };
            reactions.push(Reaction {
                id,
                kind,
                emoji: text.unwrap_or_default(),
                sender: sender.unwrap_or_default(),
                is_from_me,
                created_at: apple_time_to_utc(date),
            });
        }
        Ok(reactions)
    }
}

fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest).display().to_string();
    }
    path.to_string()
}
