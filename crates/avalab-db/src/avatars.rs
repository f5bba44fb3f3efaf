use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

/// On-disk avatar storage.
///
/// Each profile owns one directory `{dir}/{app_id}/` holding a single
/// `avatar.{ext}` file. The directory name is the profile's public id, so a
/// rename has to move it.
#[derive(Debug, Clone)]
pub struct AvatarStore {
    dir: PathBuf,
}

const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

impl AvatarStore {
    pub fn new(dir: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        info!("Avatar storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        &self.dir
    }

    /// Directory that holds one profile's avatar.
    pub fn dir_for(&self, app_id: &str) -> PathBuf {
        self.dir.join(app_id)
    }

    pub fn is_allowed_extension(ext: &str) -> bool {
        ALLOWED_EXTENSIONS.contains(&ext)
    }

    /// Store `data` as the profile's avatar, replacing any previous one.
    /// Returns the path relative to the storage root.
    pub fn save(&self, app_id: &str, ext: &str, data: &[u8]) -> io::Result<String> {
        let dir = self.dir_for(app_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;

        let file_name = format!("avatar.{ext}");
        fs::write(dir.join(&file_name), data)?;
        Ok(format!("{app_id}/{file_name}"))
    }

    /// Remove a profile's avatar directory. Missing directories are fine.
    pub fn remove(&self, app_id: &str) -> io::Result<()> {
        match fs::remove_dir_all(self.dir_for(app_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Move `{old}/` to `{new}/`. Returns `false` when there was nothing to move.
    pub fn rename(&self, old: &str, new: &str) -> io::Result<bool> {
        let from = self.dir_for(old);
        if !from.exists() {
            return Ok(false);
        }

        let to = self.dir_for(new);
        if to.exists() {
            warn!("Avatar directory {} already exists", to.display());
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("avatar directory for '{new}' already exists"),
            ));
        }

        fs::rename(&from, &to)?;
        Ok(true)
    }
}

/// Rewrite a stored relative avatar path for a renamed profile.
pub fn renamed_path(path: &str, old: &str, new: &str) -> String {
    match path.strip_prefix(old).and_then(|rest| rest.strip_prefix('/')) {
        Some(file) => format!("{new}/{file}"),
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::scratch_dir;

    #[test]
    fn save_replaces_previous_avatar() {
        let store = AvatarStore::new(scratch_dir()).unwrap();
        store.save("alice", "png", b"one").unwrap();
        let path = store.save("alice", "jpg", b"two").unwrap();

        assert_eq!(path, "alice/avatar.jpg");
        assert!(!store.dir_for("alice").join("avatar.png").exists());
        assert_eq!(fs::read(store.root().join(&path)).unwrap(), b"two");

        fs::remove_dir_all(store.root()).unwrap();
    }

    #[test]
    fn rename_moves_directory() {
        let store = AvatarStore::new(scratch_dir()).unwrap();
        store.save("alice", "png", b"img").unwrap();

        assert!(store.rename("alice", "al").unwrap());
        assert!(!store.dir_for("alice").exists());
        assert!(store.dir_for("al").join("avatar.png").exists());

        // nothing left to move
        assert!(!store.rename("alice", "al2").unwrap());

        fs::remove_dir_all(store.root()).unwrap();
    }

    #[test]
    fn rename_refuses_to_clobber() {
        let store = AvatarStore::new(scratch_dir()).unwrap();
        store.save("alice", "png", b"a").unwrap();
        store.save("bob", "png", b"b").unwrap();

        assert!(store.rename("alice", "bob").is_err());
        assert!(store.dir_for("alice").exists());

        fs::remove_dir_all(store.root()).unwrap();
    }

    #[test]
    fn renamed_path_only_touches_prefix() {
        assert_eq!(renamed_path("alice/avatar.png", "alice", "al"), "al/avatar.png");
        assert_eq!(renamed_path("alicia/avatar.png", "alice", "al"), "alicia/avatar.png");
    }
}
