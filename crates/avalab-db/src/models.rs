//! Row decoding. Ids are stored as TEXT uuids and timestamps as INTEGER
//! microseconds since the epoch.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use avalab_types::models::{Invite, InviteStatus, Message, Profile};

pub const PROFILE_COLUMNS: &str = "id, app_id, username, display_name, description, do_search, stack, links, avatar_path, created_at";

pub const MESSAGE_COLUMNS: &str = "id, chat_id, sender_app_id, content, sent_at, is_invite";

pub const INVITE_COLUMNS: &str =
    "id, message_id, chat_id, sender_app_id, receiver_app_id, team_app_id, status";

pub fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn micros_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(micros).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, micros))
}

pub fn json_list_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        internal_id: uuid_at(row, 0)?,
        app_id: row.get(1)?,
        username: row.get(2)?,
        display_name: row.get(3)?,
        description: row.get(4)?,
        do_search: row.get(5)?,
        stack: row.get(6)?,
        links: json_list_at(row, 7)?,
        avatar_path: row.get(8)?,
        created_at: micros_at(row, 9)?,
    })
}

pub fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: uuid_at(row, 0)?,
        chat_id: uuid_at(row, 1)?,
        sender_app_id: row.get(2)?,
        content: row.get(3)?,
        sent_at: micros_at(row, 4)?,
        is_invite: row.get(5)?,
    })
}

pub fn invite_from_row(row: &Row<'_>) -> rusqlite::Result<Invite> {
    let status: String = row.get(6)?;
    let status = InviteStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            Type::Text,
            format!("unknown invite status '{status}'").into(),
        )
    })?;

    Ok(Invite {
        id: uuid_at(row, 0)?,
        message_id: uuid_at(row, 1)?,
        chat_id: uuid_at(row, 2)?,
        sender_app_id: row.get(3)?,
        receiver_app_id: row.get(4)?,
        team_app_id: row.get(5)?,
        status,
    })
}

pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}
