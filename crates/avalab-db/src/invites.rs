//! Team invites, carried by a chat message.
//!
//! ```text
//! Pending ──accept──▶ Accepted   (receiver joins the team)
//!    │    ──reject──▶ Rejected
//!    └────cancel───▶ (deleted with its message, sender only)
//! ```

use rusqlite::{OptionalExtension, params};
use tracing::info;
use uuid::Uuid;

use avalab_types::models::{Invite, InviteStatus, Message};

use crate::chat::append_message;
use crate::membership::insert_member;
use crate::models::{INVITE_COLUMNS, invite_from_row};
use crate::queries::{require_chat, require_invite, require_team};
use crate::{Database, Error, Result};

fn require_pending(invite: &Invite) -> Result<()> {
    if invite.status != InviteStatus::Pending {
        return Err(Error::invalid_state(format!(
            "invite {} is already {}",
            invite.id,
            invite.status.as_str()
        )));
    }
    Ok(())
}

impl Database {
    /// Post an invite into `chat_id`, inviting `receiver` to `team_app_id`.
    ///
    /// The carrier message and the invite are written together.
    pub fn create_invite(
        &self,
        chat_id: Uuid,
        sender: &str,
        receiver: &str,
        team_app_id: &str,
        content: Option<&str>,
    ) -> Result<(Invite, Message)> {
        if sender == receiver {
            return Err(Error::invalid("cannot invite yourself"));
        }

        let created = self.with_tx(|tx| {
            let chat = require_chat(tx, chat_id)?;
            let team = require_team(tx, team_app_id)?;
            if team.owner_app_id != sender {
                return Err(Error::forbidden(format!(
                    "only the owner may invite to team '{team_app_id}'"
                )));
            }
            if !chat.members.contains(receiver) {
                return Err(Error::invalid(format!(
                    "'{receiver}' is not a member of chat {chat_id}"
                )));
            }
            if team.members.contains(receiver) {
                return Err(Error::conflict(format!(
                    "'{receiver}' is already on team '{team_app_id}'"
                )));
            }
            let pending: Option<String> = tx
                .query_row(
                    "SELECT id FROM invites WHERE receiver_app_id = ?1 AND team_app_id = ?2 AND status = 'pending'",
                    params![receiver, team_app_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(existing) = pending {
                return Err(Error::conflict(format!(
                    "invite {existing} is already pending"
                )));
            }

            let default_content = format!("Invitation to join team {}", team.title);
            let message = append_message(
                tx,
                chat_id,
                sender,
                content.unwrap_or(&default_content),
                true,
            )?;

            let id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO invites (id, message_id, chat_id, sender_app_id, receiver_app_id, team_app_id, status) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id.to_string(),
                    message.id.to_string(),
                    chat_id.to_string(),
                    sender,
                    receiver,
                    team_app_id,
                    InviteStatus::Pending.as_str()
                ],
            )?;
            Ok((require_invite(tx, id)?, message))
        })?;

        info!("'{}' invited '{}' to team '{}'", sender, receiver, team_app_id);
        Ok(created)
    }

    pub fn invite(&self, id: Uuid) -> Result<Invite> {
        self.with_conn(|conn| require_invite(conn, id))
    }

    pub fn pending_invites_for(&self, app_id: &str) -> Result<Vec<Invite>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {INVITE_COLUMNS} FROM invites WHERE receiver_app_id = ?1 AND status = 'pending' ORDER BY rowid"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([app_id], invite_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Accept or reject a pending invite. Only the receiver may answer, and
    /// only once; accepting adds the receiver to the team in the same
    /// transaction.
    pub fn set_invite_status(&self, id: Uuid, actor: &str, status: InviteStatus) -> Result<Invite> {
        if status == InviteStatus::Pending {
            return Err(Error::invalid("an invite can only be accepted or rejected"));
        }

        let invite = self.with_tx(|tx| {
            let invite = require_invite(tx, id)?;
            if invite.receiver_app_id != actor {
                return Err(Error::forbidden("only the receiver may answer an invite"));
            }
            require_pending(&invite)?;

            tx.execute(
                "UPDATE invites SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id.to_string()],
            )?;
            if status == InviteStatus::Accepted {
                insert_member(tx, &invite.team_app_id, &invite.receiver_app_id)?;
            }
            require_invite(tx, id)
        })?;

        info!(
            "'{}' {} invite to team '{}'",
            actor,
            invite.status.as_str(),
            invite.team_app_id
        );
        Ok(invite)
    }

    /// Withdraw a pending invite, deleting it and its carrier message.
    /// Returns the invite as it was before deletion.
    pub fn cancel_invite(&self, id: Uuid, actor: &str) -> Result<Invite> {
        self.with_tx(|tx| {
            let invite = require_invite(tx, id)?;
            if invite.sender_app_id != actor {
                return Err(Error::forbidden("only the sender may cancel an invite"));
            }
            require_pending(&invite)?;

            tx.execute("DELETE FROM invites WHERE id = ?1", [id.to_string()])?;
            tx.execute(
                "DELETE FROM messages WHERE id = ?1",
                [invite.message_id.to_string()],
            )?;
            Ok(invite)
        })
    }
}
