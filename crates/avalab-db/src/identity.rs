//! Identity registry: profiles and the mapping between a profile's stable
//! internal id and its mutable public `app_id`.

use rusqlite::{OptionalExtension, params};
use tracing::{info, warn};
use uuid::Uuid;

use avalab_types::api::ProfilePatch;
use avalab_types::models::{Profile, ProfileRef};

use crate::avatars::{AvatarStore, renamed_path};
use crate::models::{PROFILE_COLUMNS, now_micros, profile_from_row};
use crate::queries::{app_id_taken, require_app_id, require_profile};
use crate::{Database, Error, Result, cascade};

const MAX_APP_ID_LEN: usize = 64;

/// Outcome of a committed rename.
#[derive(Debug, Clone)]
pub struct Renamed {
    pub profile: ProfileRef,
    pub old_app_id: String,
}

/// Outcome of a committed account deletion.
#[derive(Debug, Clone)]
pub struct DeletedProfile {
    pub app_id: String,
    /// Direct chats and owned teams' group chats removed with the profile
    pub deleted_chats: Vec<Uuid>,
}

/// Public ids double as avatar directory names, so keep them to a safe
/// filename alphabet.
pub fn validate_app_id(app_id: &str) -> Result<()> {
    if app_id.is_empty() || app_id.len() > MAX_APP_ID_LEN {
        return Err(Error::invalid(format!(
            "app_id must be 1-{MAX_APP_ID_LEN} characters"
        )));
    }
    if app_id.starts_with('.') {
        return Err(Error::invalid("app_id may not start with '.'"));
    }
    if !app_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(Error::invalid(
            "app_id may only contain letters, digits, '_', '-' and '.'",
        ));
    }
    Ok(())
}

impl Database {
    /// Register a profile. Without an explicit `app_id` the internal id
    /// doubles as the initial public id.
    pub fn create_profile(
        &self,
        username: &str,
        password_hash: &str,
        app_id: Option<&str>,
    ) -> Result<Profile> {
        let id = Uuid::new_v4();
        let app_id = app_id.map(str::to_string).unwrap_or_else(|| id.to_string());
        validate_app_id(&app_id)?;

        self.with_tx(|tx| {
            if app_id_taken(tx, &app_id)? {
                return Err(Error::conflict(format!("app_id '{app_id}' is taken")));
            }
            let taken: Option<i64> = tx
                .query_row("SELECT 1 FROM profiles WHERE username = ?1", [username], |row| {
                    row.get(0)
                })
                .optional()?;
            if taken.is_some() {
                return Err(Error::conflict(format!("username '{username}' is taken")));
            }

            tx.execute(
                "INSERT INTO profiles (id, app_id, username, password, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.to_string(), app_id, username, password_hash, now_micros()],
            )?;
            require_profile(tx, id)
        })
    }

    pub fn profile(&self, id: Uuid) -> Result<Profile> {
        self.with_conn(|conn| require_profile(conn, id))
    }

    /// Look up login credentials: `(internal_id, password_hash)`.
    pub fn credentials(&self, username: &str) -> Result<Option<(Uuid, String)>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, password FROM profiles WHERE username = ?1",
                    [username],
                    |row| Ok((crate::models::uuid_at(row, 0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn password_hash(&self, id: Uuid) -> Result<String> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT password FROM profiles WHERE id = ?1",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::not_found(format!("profile {id}")))
        })
    }

    /// Resolve a public id to the profile currently holding it.
    pub fn resolve(&self, app_id: &str) -> Result<ProfileRef> {
        self.resolve_profile(app_id).map(|p| p.to_ref())
    }

    pub fn resolve_profile(&self, app_id: &str) -> Result<Profile> {
        self.with_conn(|conn| require_app_id(conn, app_id))
    }

    /// The profile directory, oldest first. `do_search` narrows it to
    /// profiles that are (or are not) open to team offers.
    pub fn list_profiles(&self, do_search: Option<bool>) -> Result<Vec<Profile>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {PROFILE_COLUMNS} FROM profiles WHERE ?1 IS NULL OR do_search = ?1 ORDER BY created_at, rowid"
            );
            let mut stmt = conn.prepare(&sql)?;
            let profiles = stmt
                .query_map([do_search], profile_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(profiles)
        })
    }

    /// Change a profile's public id and cascade it through every record that
    /// refers to the old one.
    ///
    /// The uniqueness check, the cascade and the avatar directory move share
    /// one transaction: if anything fails, nothing changes.
    pub fn rename_profile(
        &self,
        id: Uuid,
        new_app_id: &str,
        avatars: &AvatarStore,
    ) -> Result<Renamed> {
        validate_app_id(new_app_id)?;

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let profile = require_profile(&tx, id)?;
            let old_app_id = profile.app_id.clone();

            if old_app_id == new_app_id {
                return Ok(Renamed {
                    profile: profile.to_ref(),
                    old_app_id,
                });
            }
            if app_id_taken(&tx, new_app_id)? {
                return Err(Error::conflict(format!("app_id '{new_app_id}' is taken")));
            }

            tx.execute(
                "UPDATE profiles SET app_id = ?1, avatar_path = ?2 WHERE id = ?3",
                params![
                    new_app_id,
                    profile
                        .avatar_path
                        .as_deref()
                        .map(|p| renamed_path(p, &old_app_id, new_app_id)),
                    id.to_string()
                ],
            )?;
            cascade::rename(&tx, &old_app_id, new_app_id)?;

            // Last step before commit so a failed move still rolls back the rows
            let moved = avatars.rename(&old_app_id, new_app_id)?;

            if let Err(e) = tx.commit() {
                if moved {
                    if let Err(undo) = avatars.rename(new_app_id, &old_app_id) {
                        warn!(
                            "Failed to restore avatar directory {} after aborted rename: {}",
                            old_app_id, undo
                        );
                    }
                }
                return Err(e.into());
            }

            info!("Renamed profile {} from '{}' to '{}'", id, old_app_id, new_app_id);
            let profile = require_profile(conn, id)?;
            Ok(Renamed {
                profile: profile.to_ref(),
                old_app_id,
            })
        })
    }

    pub fn update_profile(&self, id: Uuid, patch: &ProfilePatch) -> Result<Profile> {
        self.with_tx(|tx| {
            let current = require_profile(tx, id)?;
            tx.execute(
                "UPDATE profiles SET display_name = ?1, description = ?2, do_search = ?3, stack = ?4 WHERE id = ?5",
                params![
                    patch.display_name.as_ref().or(current.display_name.as_ref()),
                    patch.description.as_ref().or(current.description.as_ref()),
                    patch.do_search.unwrap_or(current.do_search),
                    patch.stack.as_ref().or(current.stack.as_ref()),
                    id.to_string()
                ],
            )?;
            require_profile(tx, id)
        })
    }

    /// Append a link unless it is already listed.
    pub fn add_link(&self, id: Uuid, link: &str) -> Result<Profile> {
        let link = link.trim();
        if link.is_empty() {
            return Err(Error::invalid("link is empty"));
        }
        self.edit_links(id, |links| {
            if !links.iter().any(|l| l == link) {
                links.push(link.to_string());
            }
        })
    }

    pub fn remove_link(&self, id: Uuid, link: &str) -> Result<Profile> {
        let link = link.trim();
        self.edit_links(id, |links| links.retain(|l| l != link))
    }

    fn edit_links(&self, id: Uuid, edit: impl FnOnce(&mut Vec<String>)) -> Result<Profile> {
        self.with_tx(|tx| {
            let mut links = require_profile(tx, id)?.links;
            edit(&mut links);
            let encoded = serde_json::to_string(&links)
                .map_err(|e| Error::invalid(format!("links: {e}")))?;
            tx.execute(
                "UPDATE profiles SET links = ?1 WHERE id = ?2",
                params![encoded, id.to_string()],
            )?;
            require_profile(tx, id)
        })
    }

    pub fn set_avatar(
        &self,
        id: Uuid,
        ext: &str,
        data: &[u8],
        avatars: &AvatarStore,
    ) -> Result<Profile> {
        let ext = ext.to_ascii_lowercase();
        if !AvatarStore::is_allowed_extension(&ext) {
            return Err(Error::invalid(format!("unsupported avatar type '{ext}'")));
        }

        self.with_tx(|tx| {
            let profile = require_profile(tx, id)?;
            let path = avatars.save(&profile.app_id, &ext, data)?;
            tx.execute(
                "UPDATE profiles SET avatar_path = ?1 WHERE id = ?2",
                params![path, id.to_string()],
            )?;
            require_profile(tx, id)
        })
    }

    pub fn clear_avatar(&self, id: Uuid, avatars: &AvatarStore) -> Result<Profile> {
        self.with_tx(|tx| {
            let profile = require_profile(tx, id)?;
            tx.execute(
                "UPDATE profiles SET avatar_path = NULL WHERE id = ?1",
                [id.to_string()],
            )?;
            avatars.remove(&profile.app_id)?;
            require_profile(tx, id)
        })
    }

    /// Delete a profile and everything that only exists because of it.
    pub fn delete_profile(&self, id: Uuid, avatars: &AvatarStore) -> Result<DeletedProfile> {
        let deleted = self.with_tx(|tx| {
            let profile = require_profile(tx, id)?;
            let deleted_chats = cascade::delete_profile(tx, &profile.app_id)?;
            tx.execute("DELETE FROM profiles WHERE id = ?1", [id.to_string()])?;
            Ok(DeletedProfile {
                app_id: profile.app_id,
                deleted_chats,
            })
        })?;

        if let Err(e) = avatars.remove(&deleted.app_id) {
            warn!("Failed to remove avatar directory for '{}': {}", deleted.app_id, e);
        }
        info!("Deleted profile {} ('{}')", id, deleted.app_id);
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{profile, scratch_dir};

    #[test]
    fn directory_filters_on_do_search() {
        let db = Database::open_in_memory().unwrap();
        profile(&db, "alice");
        let bob = profile(&db, "bob");
        profile(&db, "carol");

        let patch = ProfilePatch {
            display_name: None,
            description: None,
            do_search: Some(true),
            stack: None,
        };
        db.update_profile(bob, &patch).unwrap();

        let app_ids = |profiles: Vec<Profile>| -> Vec<String> {
            profiles.into_iter().map(|p| p.app_id).collect()
        };
        assert_eq!(app_ids(db.list_profiles(None).unwrap()), ["alice", "bob", "carol"]);
        assert_eq!(app_ids(db.list_profiles(Some(true)).unwrap()), ["bob"]);
        assert_eq!(app_ids(db.list_profiles(Some(false)).unwrap()), ["alice", "carol"]);
    }

    #[test]
    fn default_app_id_is_internal_id() {
        let db = Database::open_in_memory().unwrap();
        let p = db.create_profile("alice", "hash", None).unwrap();
        assert_eq!(p.app_id, p.internal_id.to_string());
        assert_eq!(db.resolve(&p.app_id).unwrap().internal_id, p.internal_id);
    }

    #[test]
    fn duplicate_username_or_app_id_conflicts() {
        let db = Database::open_in_memory().unwrap();
        profile(&db, "alice");
        assert!(matches!(
            db.create_profile("alice", "hash", Some("other")),
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            db.create_profile("someone", "hash", Some("alice")),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn resolve_unknown_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.resolve("ghost"), Err(Error::NotFound(_))));
    }

    #[test]
    fn rejects_path_like_app_ids() {
        assert!(validate_app_id("al.ice-_1").is_ok());
        assert!(validate_app_id("").is_err());
        assert!(validate_app_id("..").is_err());
        assert!(validate_app_id("a/b").is_err());
        assert!(validate_app_id(&"x".repeat(65)).is_err());
    }

    #[test]
    fn rename_to_taken_app_id_conflicts() {
        let db = Database::open_in_memory().unwrap();
        let avatars = AvatarStore::new(scratch_dir()).unwrap();
        let alice = profile(&db, "alice");
        profile(&db, "bob");

        let err = db.rename_profile(alice, "bob", &avatars).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(db.profile(alice).unwrap().app_id, "alice");

        std::fs::remove_dir_all(avatars.root()).unwrap();
    }

    #[test]
    fn rename_moves_avatar_with_profile() {
        let db = Database::open_in_memory().unwrap();
        let avatars = AvatarStore::new(scratch_dir()).unwrap();
        let alice = profile(&db, "alice");
        db.set_avatar(alice, "PNG", b"img", &avatars).unwrap();

        let renamed = db.rename_profile(alice, "al", &avatars).unwrap();
        assert_eq!(renamed.old_app_id, "alice");
        assert_eq!(renamed.profile.app_id, "al");
        assert_eq!(renamed.profile.avatar_path.as_deref(), Some("al/avatar.png"));
        assert!(avatars.dir_for("al").join("avatar.png").exists());
        assert!(matches!(db.resolve("alice"), Err(Error::NotFound(_))));

        std::fs::remove_dir_all(avatars.root()).unwrap();
    }

    #[test]
    fn failed_avatar_move_rolls_back_rename() {
        let db = Database::open_in_memory().unwrap();
        let avatars = AvatarStore::new(scratch_dir()).unwrap();
        let alice = profile(&db, "alice");
        db.set_avatar(alice, "png", b"img", &avatars).unwrap();
        // stale directory squatting on the target name
        std::fs::create_dir_all(avatars.dir_for("al")).unwrap();

        assert!(matches!(
            db.rename_profile(alice, "al", &avatars),
            Err(Error::Io(_))
        ));
        let p = db.profile(alice).unwrap();
        assert_eq!(p.app_id, "alice");
        assert_eq!(p.avatar_path.as_deref(), Some("alice/avatar.png"));

        std::fs::remove_dir_all(avatars.root()).unwrap();
    }

    #[test]
    fn patch_keeps_unset_fields() {
        let db = Database::open_in_memory().unwrap();
        let alice = profile(&db, "alice");
        db.update_profile(
            alice,
            &ProfilePatch {
                display_name: Some("Alice".into()),
                stack: Some("rust:3".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let p = db
            .update_profile(
                alice,
                &ProfilePatch {
                    do_search: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(p.display_name.as_deref(), Some("Alice"));
        assert_eq!(p.stack.as_deref(), Some("rust:3"));
        assert!(p.do_search);
    }

    #[test]
    fn links_are_deduplicated() {
        let db = Database::open_in_memory().unwrap();
        let alice = profile(&db, "alice");
        db.add_link(alice, "https://a.example").unwrap();
        db.add_link(alice, " https://a.example ").unwrap();
        let p = db.add_link(alice, "https://b.example").unwrap();
        assert_eq!(p.links, ["https://a.example", "https://b.example"]);

        let p = db.remove_link(alice, "https://a.example").unwrap();
        assert_eq!(p.links, ["https://b.example"]);
    }
}
