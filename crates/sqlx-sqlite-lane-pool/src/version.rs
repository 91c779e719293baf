//! Versioned database file resolution
//!
//! The database file is named `modelstore-{version}.db` inside a storage
//! directory. When the caller bumps the version string (because its model
//! layout changed), files belonging to the previous version are renamed to
//! the new version's expected paths so their data can be migrated in place
//! rather than recreated from scratch.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::Result;
use crate::error::Error;

const FILE_PREFIX: &str = "modelstore-";

fn file_name(version: &str) -> String {
   format!("{FILE_PREFIX}{version}.db")
}

/// Resolve the database file for `version` inside `base_dir`.
///
/// Creates `base_dir` if missing. If the target file does not exist but files
/// from another version do, the old main file and its `-wal`/`-shm`
/// companions are renamed to the new version's paths and the second element
/// of the returned tuple is `true` — the caller should take its migration
/// path instead of treating the database as freshly created.
///
/// # Errors
///
/// Returns [`Error::StorageUnavailable`] when the storage directory cannot
/// be created; callers are expected to degrade to an inert, best-effort mode
/// rather than surface this to their own callers.
pub fn resolve_versioned_file(base_dir: &Path, version: &str) -> Result<(PathBuf, bool)> {
   if let Err(e) = std::fs::create_dir_all(base_dir) {
      return Err(Error::StorageUnavailable(format!(
         "{}: {e}",
         base_dir.display()
      )));
   }

   let target = base_dir.join(file_name(version));
   if target.exists() {
      return Ok((target, false));
   }

   let wal_target = base_dir.join(format!("{FILE_PREFIX}{version}.db-wal"));
   let shm_target = base_dir.join(format!("{FILE_PREFIX}{version}.db-shm"));

   let mut adopted = false;
   for entry in std::fs::read_dir(base_dir)? {
      let entry = entry?;
      let name = entry.file_name();
      let Some(name) = name.to_str() else {
         continue;
      };
      if !name.starts_with(FILE_PREFIX) {
         continue;
      }

      // Route each companion file to its matching new-version path. The
      // rename is best-effort: a file we cannot move is left behind, and
      // the open proceeds with whatever was adopted.
      let destination = if name.ends_with(".db-shm") {
         &shm_target
      } else if name.ends_with(".db-wal") {
         &wal_target
      } else if name.ends_with(".db") {
         &target
      } else {
         continue;
      };

      match std::fs::rename(entry.path(), destination) {
         Ok(()) => {
            adopted = true;
            debug!(from = %name, to = %destination.display(), "Adopted previous-version database file");
         }
         Err(e) => {
            warn!(file = %name, error = %e, "Failed to adopt previous-version database file");
         }
      }
   }

   Ok((target, adopted))
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn fresh_directory_yields_new_path() {
      let dir = tempfile::tempdir().unwrap();
      let (path, adopted) = resolve_versioned_file(dir.path(), "1").unwrap();
      assert_eq!(path, dir.path().join("modelstore-1.db"));
      assert!(!adopted);
   }

   #[test]
   fn same_version_is_not_adopted() {
      let dir = tempfile::tempdir().unwrap();
      std::fs::write(dir.path().join("modelstore-1.db"), b"x").unwrap();

      let (path, adopted) = resolve_versioned_file(dir.path(), "1").unwrap();
      assert!(path.exists());
      assert!(!adopted);
   }

   #[test]
   fn previous_version_files_are_renamed() {
      let dir = tempfile::tempdir().unwrap();
      std::fs::write(dir.path().join("modelstore-1.db"), b"main").unwrap();
      std::fs::write(dir.path().join("modelstore-1.db-wal"), b"wal").unwrap();
      std::fs::write(dir.path().join("modelstore-1.db-shm"), b"shm").unwrap();

      let (path, adopted) = resolve_versioned_file(dir.path(), "2").unwrap();
      assert!(adopted);
      assert_eq!(std::fs::read(&path).unwrap(), b"main");
      assert!(dir.path().join("modelstore-2.db-wal").exists());
      assert!(dir.path().join("modelstore-2.db-shm").exists());
      assert!(!dir.path().join("modelstore-1.db").exists());
   }

   #[test]
   fn unrelated_files_are_left_alone() {
      let dir = tempfile::tempdir().unwrap();
      std::fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

      let (_, adopted) = resolve_versioned_file(dir.path(), "1").unwrap();
      assert!(!adopted);
      assert!(dir.path().join("notes.txt").exists());
   }

   #[test]
   fn unusable_directory_is_reported() {
      let dir = tempfile::tempdir().unwrap();
      let blocker = dir.path().join("occupied");
      std::fs::write(&blocker, b"not a directory").unwrap();

      let err = resolve_versioned_file(&blocker, "1").unwrap_err();
      assert!(matches!(err, Error::StorageUnavailable(_)));
   }
}
