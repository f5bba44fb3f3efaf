use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS profiles (
            id              TEXT PRIMARY KEY,
            app_id          TEXT NOT NULL UNIQUE,
            username        TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            display_name    TEXT,
            description     TEXT,
            do_search       INTEGER NOT NULL DEFAULT 0,
            stack           TEXT,
            links           TEXT NOT NULL DEFAULT '[]',
            avatar_path     TEXT,
            created_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS teams (
            app_id          TEXT PRIMARY KEY,
            owner_app_id    TEXT NOT NULL,
            title           TEXT NOT NULL,
            description     TEXT,
            missing_roles   TEXT NOT NULL DEFAULT '[]',
            created_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_teams_owner
            ON teams(owner_app_id);

        CREATE TABLE IF NOT EXISTS team_members (
            team_app_id     TEXT NOT NULL REFERENCES teams(app_id) ON DELETE CASCADE,
            app_id          TEXT NOT NULL,
            position        INTEGER NOT NULL,
            PRIMARY KEY (team_app_id, app_id)
        );

        CREATE INDEX IF NOT EXISTS idx_team_members_app
            ON team_members(app_id);

        CREATE TABLE IF NOT EXISTS chats (
            id              TEXT PRIMARY KEY,
            is_group        INTEGER NOT NULL,
            team_app_id     TEXT UNIQUE REFERENCES teams(app_id) ON DELETE CASCADE,
            created_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_members (
            chat_id         TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            app_id          TEXT NOT NULL,
            position        INTEGER NOT NULL,
            PRIMARY KEY (chat_id, app_id)
        );

        CREATE INDEX IF NOT EXISTS idx_chat_members_app
            ON chat_members(app_id);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            chat_id         TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            sender_app_id   TEXT NOT NULL,
            content         TEXT NOT NULL,
            sent_at         INTEGER NOT NULL,
            is_invite       INTEGER NOT NULL DEFAULT 0,
            UNIQUE(chat_id, sent_at)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_sender
            ON messages(sender_app_id);

        CREATE TABLE IF NOT EXISTS invites (
            id              TEXT PRIMARY KEY,
            message_id      TEXT NOT NULL UNIQUE REFERENCES messages(id) ON DELETE CASCADE,
            chat_id         TEXT NOT NULL,
            sender_app_id   TEXT NOT NULL,
            receiver_app_id TEXT NOT NULL,
            team_app_id     TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'pending'
        );

        CREATE INDEX IF NOT EXISTS idx_invites_receiver
            ON invites(receiver_app_id, status);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
