//! Multi-table cascades keyed on a profile's `app_id`.
//!
//! Team rosters, chat rosters, message senders and invites all refer to a
//! profile by its public id. Both functions here expect to run inside the
//! caller's transaction and leave committing (or rolling back) to it.

use rusqlite::{Connection, params};
use tracing::debug;
use uuid::Uuid;

use crate::membership::{delete_team_records, update_member};
use crate::queries::{
    bound_chat_id, chat_members, chats_containing, save_chat_members, save_team_members,
    team_members, teams_containing, teams_owned_by,
};
use crate::Result;
use crate::models::uuid_at;

/// Rewrite every reference to `old` so it points at `new`.
pub(crate) fn rename(conn: &Connection, old: &str, new: &str) -> Result<()> {
    // Owned teams and plain memberships: owner reference plus roster entry
    let mut teams = teams_owned_by(conn, old)?;
    for team in teams_containing(conn, old)? {
        if !teams.contains(&team) {
            teams.push(team);
        }
    }
    for team in &teams {
        update_member(conn, team, old, new)?;
    }

    // Chat rosters, bound group chats included
    let chats = chats_containing(conn, old)?;
    for chat_id in &chats {
        let mut members = chat_members(conn, *chat_id)?;
        members.replace(old, new);
        save_chat_members(conn, *chat_id, &members)?;
    }

    let messages = conn.execute(
        "UPDATE messages SET sender_app_id = ?1 WHERE sender_app_id = ?2",
        params![new, old],
    )?;
    conn.execute(
        "UPDATE invites SET sender_app_id = ?1 WHERE sender_app_id = ?2",
        params![new, old],
    )?;
    conn.execute(
        "UPDATE invites SET receiver_app_id = ?1 WHERE receiver_app_id = ?2",
        params![new, old],
    )?;

    debug!(
        "Rename cascade '{}' -> '{}': {} teams, {} chats, {} messages",
        old,
        new,
        teams.len(),
        chats.len(),
        messages
    );
    Ok(())
}

/// Remove everything that belongs to `app_id` ahead of deleting its profile.
/// Returns the chats that were deleted along the way.
pub(crate) fn delete_profile(conn: &Connection, app_id: &str) -> Result<Vec<Uuid>> {
    let mut deleted_chats = Vec::new();
    for team in teams_owned_by(conn, app_id)? {
        deleted_chats.extend(bound_chat_id(conn, &team)?);
        delete_team_records(conn, &team)?;
    }

    // Memberships in other teams, mirrored into their bound chats
    for team in teams_containing(conn, app_id)? {
        let mut members = team_members(conn, &team)?;
        members.remove(app_id);
        save_team_members(conn, &team, &members)?;
        if let Some(chat_id) = bound_chat_id(conn, &team)? {
            let mut chat = chat_members(conn, chat_id)?;
            chat.remove(app_id);
            save_chat_members(conn, chat_id, &chat)?;
        }
    }

    // Direct chats die with either participant
    let mut stmt = conn.prepare(
        "SELECT c.id FROM chats c JOIN chat_members m ON m.chat_id = c.id WHERE c.is_group = 0 AND m.app_id = ?1",
    )?;
    let direct = stmt
        .query_map([app_id], |row| uuid_at(row, 0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    deleted_chats.extend(direct);
    conn.execute(
        "DELETE FROM chats WHERE is_group = 0 AND id IN (SELECT chat_id FROM chat_members WHERE app_id = ?1)",
        [app_id],
    )?;
    conn.execute("DELETE FROM chat_members WHERE app_id = ?1", [app_id])?;

    // Pending invites addressed to the profile, carrier messages included
    conn.execute(
        "DELETE FROM messages WHERE id IN (SELECT message_id FROM invites WHERE receiver_app_id = ?1 AND status = 'pending')",
        [app_id],
    )?;

    Ok(deleted_chats)
}
