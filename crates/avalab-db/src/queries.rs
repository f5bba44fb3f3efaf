//! Connection-level helpers shared by the registry, ledger, cascade and
//! chat store. Everything here takes a plain `&Connection` so it can run
//! inside whichever transaction the caller holds.

use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use avalab_types::MemberSet;
use avalab_types::models::{Chat, Invite, Profile, Team};

use crate::models::{
    INVITE_COLUMNS, PROFILE_COLUMNS, invite_from_row, json_list_at, profile_from_row, uuid_at,
};
use crate::{Error, Result};

// -- Profiles --

pub fn profile_by_id(conn: &Connection, id: Uuid) -> Result<Option<Profile>> {
    let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1");
    Ok(conn
        .query_row(&sql, [id.to_string()], profile_from_row)
        .optional()?)
}

pub fn profile_by_app_id(conn: &Connection, app_id: &str) -> Result<Option<Profile>> {
    let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE app_id = ?1");
    Ok(conn.query_row(&sql, [app_id], profile_from_row).optional()?)
}

pub fn require_profile(conn: &Connection, id: Uuid) -> Result<Profile> {
    profile_by_id(conn, id)?.ok_or_else(|| Error::not_found(format!("profile {id}")))
}

pub fn require_app_id(conn: &Connection, app_id: &str) -> Result<Profile> {
    profile_by_app_id(conn, app_id)?.ok_or_else(|| Error::not_found(format!("profile '{app_id}'")))
}

pub fn app_id_taken(conn: &Connection, app_id: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM profiles WHERE app_id = ?1", [app_id], |_| Ok(()))
        .optional()?
        .is_some())
}

// -- Teams --

pub fn load_team(conn: &Connection, app_id: &str) -> Result<Option<Team>> {
    let head = conn
        .query_row(
            "SELECT app_id, owner_app_id, title, description, missing_roles FROM teams WHERE app_id = ?1",
            [app_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    json_list_at(row, 4)?,
                ))
            },
        )
        .optional()?;

    let Some((app_id, owner_app_id, title, description, missing_roles)) = head else {
        return Ok(None);
    };

    let members = team_members(conn, &app_id)?;
    Ok(Some(Team {
        app_id,
        owner_app_id,
        title,
        description,
        members,
        missing_roles,
    }))
}

pub fn require_team(conn: &Connection, app_id: &str) -> Result<Team> {
    load_team(conn, app_id)?.ok_or_else(|| Error::not_found(format!("team '{app_id}'")))
}

pub fn team_members(conn: &Connection, team_app_id: &str) -> Result<MemberSet> {
    let mut stmt = conn
        .prepare("SELECT app_id FROM team_members WHERE team_app_id = ?1 ORDER BY position")?;
    let ids = stmt
        .query_map([team_app_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids.into())
}

/// Rewrite a team's roster rows from `members`, positions following set order.
pub fn save_team_members(conn: &Connection, team_app_id: &str, members: &MemberSet) -> Result<()> {
    conn.execute("DELETE FROM team_members WHERE team_app_id = ?1", [team_app_id])?;
    let mut stmt = conn.prepare(
        "INSERT INTO team_members (team_app_id, app_id, position) VALUES (?1, ?2, ?3)",
    )?;
    for (position, app_id) in members.iter().enumerate() {
        stmt.execute(params![team_app_id, app_id, position as i64])?;
    }
    Ok(())
}

/// App ids of every team whose roster contains `app_id`.
pub fn teams_containing(conn: &Connection, app_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT team_app_id FROM team_members WHERE app_id = ?1 ORDER BY team_app_id",
    )?;
    let ids = stmt
        .query_map([app_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn teams_owned_by(conn: &Connection, app_id: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT app_id FROM teams WHERE owner_app_id = ?1 ORDER BY created_at")?;
    let ids = stmt
        .query_map([app_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

// -- Chats --

pub fn load_chat(conn: &Connection, id: Uuid) -> Result<Option<Chat>> {
    let head = conn
        .query_row(
            "SELECT is_group, team_app_id FROM chats WHERE id = ?1",
            [id.to_string()],
            |row| Ok((row.get::<_, bool>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .optional()?;

    let Some((is_group, team_app_id)) = head else {
        return Ok(None);
    };

    Ok(Some(Chat {
        id,
        is_group,
        team_app_id,
        members: chat_members(conn, id)?,
    }))
}

pub fn require_chat(conn: &Connection, id: Uuid) -> Result<Chat> {
    load_chat(conn, id)?.ok_or_else(|| Error::not_found(format!("chat {id}")))
}

pub fn chat_members(conn: &Connection, chat_id: Uuid) -> Result<MemberSet> {
    let mut stmt =
        conn.prepare("SELECT app_id FROM chat_members WHERE chat_id = ?1 ORDER BY position")?;
    let ids = stmt
        .query_map([chat_id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids.into())
}

pub fn save_chat_members(conn: &Connection, chat_id: Uuid, members: &MemberSet) -> Result<()> {
    let chat_id = chat_id.to_string();
    conn.execute("DELETE FROM chat_members WHERE chat_id = ?1", [&chat_id])?;
    let mut stmt =
        conn.prepare("INSERT INTO chat_members (chat_id, app_id, position) VALUES (?1, ?2, ?3)")?;
    for (position, app_id) in members.iter().enumerate() {
        stmt.execute(params![chat_id, app_id, position as i64])?;
    }
    Ok(())
}

pub fn chats_containing(conn: &Connection, app_id: &str) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare("SELECT chat_id FROM chat_members WHERE app_id = ?1")?;
    let ids = stmt
        .query_map([app_id], |row| uuid_at(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// The group chat bound to a team, if one was created.
pub fn bound_chat_id(conn: &Connection, team_app_id: &str) -> Result<Option<Uuid>> {
    Ok(conn
        .query_row(
            "SELECT id FROM chats WHERE team_app_id = ?1",
            [team_app_id],
            |row| uuid_at(row, 0),
        )
        .optional()?)
}

// -- Invites --

pub fn load_invite(conn: &Connection, id: Uuid) -> Result<Option<Invite>> {
    let sql = format!("SELECT {INVITE_COLUMNS} FROM invites WHERE id = ?1");
    Ok(conn
        .query_row(&sql, [id.to_string()], invite_from_row)
        .optional()?)
}

pub fn require_invite(conn: &Connection, id: Uuid) -> Result<Invite> {
    load_invite(conn, id)?.ok_or_else(|| Error::not_found(format!("invite {id}")))
}
