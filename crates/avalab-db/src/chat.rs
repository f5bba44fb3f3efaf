//! Chat store: per-chat message history in commit order.

use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use avalab_types::models::{ChatSummary, Message};

use crate::models::{MESSAGE_COLUMNS, message_from_row, now_micros};
use crate::queries::{chats_containing, load_chat, require_chat, require_profile};
use crate::{Database, Error, Result};

/// Fixed history page size.
pub const PAGE_SIZE: u32 = 20;

pub const MAX_CONTENT_LEN: usize = 4000;

/// Persist a message from a current chat member.
///
/// `sent_at` is the wall clock in microseconds, bumped past the chat's
/// previous message when the clock has not moved on (or went backwards),
/// so ordering within a chat is strict.
pub(crate) fn append_message(
    conn: &Connection,
    chat_id: Uuid,
    sender: &str,
    content: &str,
    is_invite: bool,
) -> Result<Message> {
    if content.trim().is_empty() {
        return Err(Error::invalid("message is empty"));
    }
    if content.len() > MAX_CONTENT_LEN {
        return Err(Error::invalid(format!(
            "message exceeds {MAX_CONTENT_LEN} bytes"
        )));
    }

    let chat = require_chat(conn, chat_id)?;
    if !chat.members.contains(sender) {
        return Err(Error::forbidden(format!(
            "'{sender}' is not a member of chat {chat_id}"
        )));
    }

    let last: Option<i64> = conn.query_row(
        "SELECT MAX(sent_at) FROM messages WHERE chat_id = ?1",
        [chat_id.to_string()],
        |row| row.get(0),
    )?;
    let now = now_micros();
    let sent_at = match last {
        Some(last) if last >= now => last + 1,
        _ => now,
    };

    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO messages (id, chat_id, sender_app_id, content, sent_at, is_invite) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id.to_string(), chat_id.to_string(), sender, content, sent_at, is_invite],
    )?;

    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
    Ok(conn.query_row(&sql, [id.to_string()], message_from_row)?)
}

fn latest_message(conn: &Connection, chat_id: Uuid) -> Result<Option<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 ORDER BY sent_at DESC LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, [chat_id.to_string()], message_from_row)
        .optional()?)
}

impl Database {
    pub fn append(
        &self,
        chat_id: Uuid,
        sender: &str,
        content: &str,
        is_invite: bool,
    ) -> Result<Message> {
        self.with_tx(|tx| append_message(tx, chat_id, sender, content, is_invite))
    }

    /// Append on behalf of a profile, looking up its current `app_id` in the
    /// same transaction so a concurrent rename cannot slip in between.
    pub fn append_as(&self, chat_id: Uuid, author: Uuid, content: &str) -> Result<Message> {
        self.with_tx(|tx| {
            let author = require_profile(tx, author)?;
            append_message(tx, chat_id, &author.app_id, content, false)
        })
    }

    /// One page of history, newest first. Pages start at 1.
    pub fn page(&self, chat_id: Uuid, page: u32) -> Result<Vec<Message>> {
        if page == 0 {
            return Err(Error::invalid("pages start at 1"));
        }
        let offset = i64::from(page - 1) * i64::from(PAGE_SIZE);

        self.with_conn(|conn| {
            require_chat(conn, chat_id)?;
            let sql = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 ORDER BY sent_at DESC LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![chat_id.to_string(), PAGE_SIZE, offset],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn latest(&self, chat_id: Uuid) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            require_chat(conn, chat_id)?;
            latest_message(conn, chat_id)
        })
    }

    /// Every chat `app_id` belongs to, most recently active first.
    pub fn chats_of(&self, app_id: &str) -> Result<Vec<ChatSummary>> {
        self.with_conn(|conn| {
            let mut chats = Vec::new();
            for id in chats_containing(conn, app_id)? {
                if let Some(chat) = load_chat(conn, id)? {
                    let latest = latest_message(conn, id)?;
                    chats.push(ChatSummary { chat, latest });
                }
            }
            chats.sort_by(|a, b| {
                let a = a.latest.as_ref().map(|m| m.sent_at);
                let b = b.latest.as_ref().map(|m| m.sent_at);
                b.cmp(&a)
            });
            Ok(chats)
        })
    }
}
