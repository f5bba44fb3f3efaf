//! Membership ledger: team rosters, ownership, and the chats bound to them.
//!
//! Every roster write goes through here so a team and its bound group chat
//! always carry the same member set.

use rusqlite::{Connection, params};
use tracing::info;
use uuid::Uuid;

use avalab_types::MemberSet;
use avalab_types::models::{Chat, Team};

use crate::identity::validate_app_id;
use crate::models::now_micros;
use crate::queries::{
    bound_chat_id, chats_containing, load_chat, load_team, require_app_id, require_chat,
    require_team, save_chat_members, save_team_members, teams_containing, teams_owned_by,
};
use crate::{Database, Error, Result};

fn require_owner(team: &Team, actor: &str) -> Result<()> {
    if team.owner_app_id != actor {
        return Err(Error::forbidden(format!(
            "only the owner may change team '{}'",
            team.app_id
        )));
    }
    Ok(())
}

/// Write `members` to the team and, if present, its bound group chat.
fn save_roster(conn: &Connection, team_app_id: &str, members: &MemberSet) -> Result<()> {
    save_team_members(conn, team_app_id, members)?;
    if let Some(chat_id) = bound_chat_id(conn, team_app_id)? {
        save_chat_members(conn, chat_id, members)?;
    }
    Ok(())
}

/// Add `app_id` to a team without an ownership check. Used by the ledger
/// itself and by invite acceptance, which carries the owner's consent.
pub(crate) fn insert_member(conn: &Connection, team_app_id: &str, app_id: &str) -> Result<Team> {
    let mut team = require_team(conn, team_app_id)?;
    if team.members.insert(app_id) {
        save_roster(conn, team_app_id, &team.members)?;
    }
    Ok(team)
}

/// Swap `old` for `new` in a team's roster and owner reference, keeping the
/// roster position. Only the rename cascade calls this; chat rosters are
/// rewritten by the cascade separately.
pub(crate) fn update_member(conn: &Connection, team_app_id: &str, old: &str, new: &str) -> Result<()> {
    let mut team = require_team(conn, team_app_id)?;
    if team.owner_app_id == old {
        conn.execute(
            "UPDATE teams SET owner_app_id = ?1 WHERE app_id = ?2",
            params![new, team_app_id],
        )?;
    }
    if team.members.replace(old, new) {
        save_team_members(conn, team_app_id, &team.members)?;
    }
    Ok(())
}

/// Delete a team, its bound chat (with history) and pending invites to it.
pub(crate) fn delete_team_records(conn: &Connection, team_app_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM messages WHERE id IN (SELECT message_id FROM invites WHERE team_app_id = ?1 AND status = 'pending')",
        [team_app_id],
    )?;
    // team_members and the bound chat go with the row via ON DELETE CASCADE
    conn.execute("DELETE FROM teams WHERE app_id = ?1", [team_app_id])?;
    Ok(())
}

fn existing_direct_chat(conn: &Connection, roster: &MemberSet) -> Result<Option<Uuid>> {
    let Some(first) = roster.iter().next() else {
        return Ok(None);
    };
    for chat_id in chats_containing(conn, first)? {
        let chat = require_chat(conn, chat_id)?;
        if !chat.is_group && chat.members.same_members(roster) {
            return Ok(Some(chat.id));
        }
    }
    Ok(None)
}

fn insert_chat(conn: &Connection, team_app_id: Option<&str>, members: &MemberSet) -> Result<Chat> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO chats (id, is_group, team_app_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![id.to_string(), team_app_id.is_some(), team_app_id, now_micros()],
    )?;
    save_chat_members(conn, id, members)?;
    require_chat(conn, id)
}

impl Database {
    // -- Teams --

    pub fn create_team(
        &self,
        owner: &str,
        team_app_id: &str,
        title: &str,
        description: Option<&str>,
    ) -> Result<Team> {
        validate_app_id(team_app_id)?;
        if title.trim().is_empty() {
            return Err(Error::invalid("team title is empty"));
        }

        let team = self.with_tx(|tx| {
            require_app_id(tx, owner)?;
            if load_team(tx, team_app_id)?.is_some() {
                return Err(Error::conflict(format!("team '{team_app_id}' already exists")));
            }

            tx.execute(
                "INSERT INTO teams (app_id, owner_app_id, title, description, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![team_app_id, owner, title.trim(), description, now_micros()],
            )?;
            save_team_members(tx, team_app_id, &[owner].into_iter().collect())?;
            require_team(tx, team_app_id)
        })?;

        info!("'{}' created team '{}'", owner, team_app_id);
        Ok(team)
    }

    pub fn team(&self, app_id: &str) -> Result<Team> {
        self.with_conn(|conn| require_team(conn, app_id))
    }

    pub fn teams_owned_by(&self, app_id: &str) -> Result<Vec<Team>> {
        self.with_conn(|conn| {
            teams_owned_by(conn, app_id)?
                .iter()
                .map(|team| require_team(conn, team))
                .collect()
        })
    }

    /// Teams whose roster contains `app_id`, owned ones included.
    pub fn teams_of(&self, app_id: &str) -> Result<Vec<Team>> {
        self.with_conn(|conn| {
            teams_containing(conn, app_id)?
                .iter()
                .map(|team| require_team(conn, team))
                .collect()
        })
    }

    /// Idempotent: adding a current member changes nothing.
    pub fn add_member(&self, actor: &str, team_app_id: &str, candidate: &str) -> Result<Team> {
        self.with_tx(|tx| {
            let team = require_team(tx, team_app_id)?;
            require_owner(&team, actor)?;
            require_app_id(tx, candidate)?;
            insert_member(tx, team_app_id, candidate)
        })
    }

    pub fn remove_member(&self, actor: &str, team_app_id: &str, target: &str) -> Result<Team> {
        self.with_tx(|tx| {
            let mut team = require_team(tx, team_app_id)?;
            require_owner(&team, actor)?;
            if target == team.owner_app_id {
                return Err(Error::forbidden("the owner cannot be removed from their team"));
            }
            if !team.members.remove(target) {
                return Err(Error::not_found(format!(
                    "member '{target}' of team '{team_app_id}'"
                )));
            }
            save_roster(tx, team_app_id, &team.members)?;
            Ok(team)
        })
    }

    pub fn transfer_ownership(&self, actor: &str, team_app_id: &str, new_owner: &str) -> Result<Team> {
        self.with_tx(|tx| {
            let team = require_team(tx, team_app_id)?;
            require_owner(&team, actor)?;
            if !team.members.contains(new_owner) {
                return Err(Error::not_found(format!(
                    "member '{new_owner}' of team '{team_app_id}'"
                )));
            }
            tx.execute(
                "UPDATE teams SET owner_app_id = ?1 WHERE app_id = ?2",
                params![new_owner, team_app_id],
            )?;
            info!("Team '{}' transferred from '{}' to '{}'", team_app_id, actor, new_owner);
            require_team(tx, team_app_id)
        })
    }

    pub fn set_missing_roles(&self, actor: &str, team_app_id: &str, roles: &[String]) -> Result<Team> {
        self.with_tx(|tx| {
            let team = require_team(tx, team_app_id)?;
            require_owner(&team, actor)?;

            let mut cleaned: Vec<String> = Vec::new();
            for role in roles.iter().map(|r| r.trim()).filter(|r| !r.is_empty()) {
                if !cleaned.iter().any(|r| r == role) {
                    cleaned.push(role.to_string());
                }
            }
            let encoded = serde_json::to_string(&cleaned)
                .map_err(|e| Error::invalid(format!("missing roles: {e}")))?;
            tx.execute(
                "UPDATE teams SET missing_roles = ?1 WHERE app_id = ?2",
                params![encoded, team_app_id],
            )?;
            require_team(tx, team_app_id)
        })
    }

    /// Delete a team. Returns the id of its bound chat, if it had one.
    pub fn delete_team(&self, actor: &str, team_app_id: &str) -> Result<Option<Uuid>> {
        self.with_tx(|tx| {
            let team = require_team(tx, team_app_id)?;
            require_owner(&team, actor)?;
            let chat_id = bound_chat_id(tx, team_app_id)?;
            delete_team_records(tx, team_app_id)?;
            info!("'{}' deleted team '{}'", actor, team_app_id);
            Ok(chat_id)
        })
    }

    // -- Chats --

    /// Open a one-to-one chat. A second chat between the same two profiles
    /// is a conflict, whichever side asks.
    pub fn create_direct_chat(&self, actor: &str, other: &str) -> Result<Chat> {
        if actor == other {
            return Err(Error::invalid("cannot open a direct chat with yourself"));
        }

        self.with_tx(|tx| {
            require_app_id(tx, actor)?;
            require_app_id(tx, other)?;
            let roster: MemberSet = [actor, other].into_iter().collect();
            if let Some(existing) = existing_direct_chat(tx, &roster)? {
                return Err(Error::conflict(format!(
                    "direct chat {existing} already exists"
                )));
            }
            insert_chat(tx, None, &roster)
        })
    }

    /// Open the team's group chat, seeded with the current roster.
    pub fn create_group_chat(&self, actor: &str, team_app_id: &str) -> Result<Chat> {
        self.with_tx(|tx| {
            let team = require_team(tx, team_app_id)?;
            require_owner(&team, actor)?;
            if let Some(existing) = bound_chat_id(tx, team_app_id)? {
                return Err(Error::conflict(format!(
                    "team '{team_app_id}' already has chat {existing}"
                )));
            }
            insert_chat(tx, Some(team_app_id), &team.members)
        })
    }

    /// The group chat bound to a team, if one was opened.
    pub fn group_chat(&self, team_app_id: &str) -> Result<Option<Chat>> {
        self.with_conn(|conn| {
            require_team(conn, team_app_id)?;
            match bound_chat_id(conn, team_app_id)? {
                Some(id) => load_chat(conn, id),
                None => Ok(None),
            }
        })
    }

    pub fn chat(&self, id: Uuid) -> Result<Chat> {
        self.with_conn(|conn| require_chat(conn, id))
    }

    /// Load a chat on behalf of `app_id`, checking current membership.
    pub fn chat_for_member(&self, id: Uuid, app_id: &str) -> Result<Chat> {
        self.with_conn(|conn| {
            let chat = require_chat(conn, id)?;
            if !chat.members.contains(app_id) {
                return Err(Error::forbidden(format!("'{app_id}' is not a member of chat {id}")));
            }
            Ok(chat)
        })
    }
}
