//! Publisher - Crash-Safe Artifact Replacement
//!
//! Order of operations:
//! 1. Remove any stale staging path (best-effort)
//! 2. Copy the existing artifact to staging (fatal on failure)
//! 3. Write the new artifact over the staged copy (fatal on failure)
//! 4. Remove the old target (best-effort)
//! 5. Rename staging onto the target (fatal on failure)
//! 6. Remove the staging path (best-effort)
//!
//! Until step 4 the original target is untouched. A failure at step 2 or 3
//! removes the staging path again (best-effort). A failed rename at step 5
//! leaves the staged artifact in place for manual recovery.
//!
//! Concurrent runs against the same target are not coordinated.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::project::GeneratedArtifact;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Couldn't create output directory {}: {source}", path.display())]
    Prepare {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Couldn't back up {} to {}: {source}", target.display(), staging.display())]
    Backup {
        target: PathBuf,
        staging: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Couldn't write project to {}: {source}", staging.display())]
    Stage {
        staging: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "Couldn't move {} into {}: {source} (the staged project was left in place)",
        staging.display(),
        target.display()
    )]
    Move {
        staging: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Best-effort removals. Failing any of these never fails a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStep {
    StaleStaging,
    OldTarget,
    Staging,
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CleanupStep::StaleStaging => "stale staging path",
            CleanupStep::OldTarget => "previous project",
            CleanupStep::Staging => "staging path",
        })
    }
}

#[derive(Debug, Error)]
#[error("Couldn't remove {step} {}: {source}", path.display())]
pub struct CleanupWarning {
    pub step: CleanupStep,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug)]
pub struct PublishReport {
    pub target: PathBuf,
    pub warnings: Vec<CleanupWarning>,
}

/// One publish attempt. Never persisted.
#[derive(Debug)]
pub struct PublishTransaction {
    staging: PathBuf,
    target: PathBuf,
    warnings: Vec<CleanupWarning>,
}

impl PublishTransaction {
    /// Pick a staging path beside `target` and seed it with a copy of the
    /// current artifact, if any.
    pub fn begin(target: &Path) -> Result<Self, PublishError> {
        let parent = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|source| PublishError::Prepare {
            path: parent.clone(),
            source,
        })?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        let staging = parent.join(format!(".{file_name}.{}.staging", Uuid::new_v4().simple()));

        let mut tx = Self {
            staging,
            target: target.to_path_buf(),
            warnings: Vec::new(),
        };
        tx.remove_best_effort(CleanupStep::StaleStaging, tx.staging.clone());

        if exists(&tx.target) {
            if let Err(source) = copy_path(&tx.target, &tx.staging) {
                tx.remove_best_effort(CleanupStep::Staging, tx.staging.clone());
                return Err(PublishError::Backup {
                    target: tx.target,
                    staging: tx.staging,
                    source,
                });
            }
            debug!(staging = %tx.staging.display(), "Backed up existing project");
        }

        Ok(tx)
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    pub fn target_path(&self) -> &Path {
        &self.target
    }

    /// Write the new artifact into staging. The target is not touched.
    pub fn stage<A: GeneratedArtifact + ?Sized>(&mut self, artifact: &A) -> Result<(), PublishError> {
        if let Err(source) = artifact.write(&self.staging) {
            self.remove_best_effort(CleanupStep::Staging, self.staging.clone());
            return Err(PublishError::Stage {
                staging: self.staging.clone(),
                source,
            });
        }
        Ok(())
    }

    /// Replace the target with the staged artifact.
    pub fn swap(mut self) -> Result<PublishReport, PublishError> {
        self.remove_best_effort(CleanupStep::OldTarget, self.target.clone());

        fs::rename(&self.staging, &self.target).map_err(|source| PublishError::Move {
            staging: self.staging.clone(),
            target: self.target.clone(),
            source,
        })?;

        self.remove_best_effort(CleanupStep::Staging, self.staging.clone());

        Ok(PublishReport {
            target: self.target,
            warnings: self.warnings,
        })
    }

    fn remove_best_effort(&mut self, step: CleanupStep, path: PathBuf) {
        if let Err(source) = remove_path(&path) {
            debug!(%step, path = %path.display(), error = %source, "Cleanup failed");
            self.warnings.push(CleanupWarning { step, path, source });
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Publisher;

impl Publisher {
    pub fn new() -> Self {
        Self
    }

    pub fn publish<A: GeneratedArtifact + ?Sized>(
        &self,
        artifact: &A,
        target: &Path,
    ) -> Result<PublishReport, PublishError> {
        let mut tx = PublishTransaction::begin(target)?;
        tx.stage(artifact)?;
        tx.swap()
    }
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Remove a file or directory tree. A missing path is not an error.
fn remove_path(path: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Copy a file or directory tree to `to`. Symlinks are copied as links,
/// never followed.
fn copy_path(from: &Path, to: &Path) -> io::Result<()> {
    let file_type = fs::symlink_metadata(from)?.file_type();
    if file_type.is_symlink() {
        return copy_link(from, to);
    }
    if !file_type.is_dir() {
        fs::copy(from, to)?;
        return Ok(());
    }
    for entry in WalkDir::new(from) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let dest = to.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if file_type.is_symlink() {
            copy_link(entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_link(from: &Path, to: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(from)?, to)
}

#[cfg(not(unix))]
fn copy_link(from: &Path, _to: &Path) -> io::Result<()> {
    debug!(path = %from.display(), "Symlink not carried into the new project");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Text(&'static str);

    impl GeneratedArtifact for Text {
        fn write(&self, path: &Path) -> io::Result<()> {
            fs::write(path, self.0)
        }
    }

    struct Failing;

    impl GeneratedArtifact for Failing {
        fn write(&self, _: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "encoder exploded"))
        }
    }

    /// Writes a directory artifact holding `list.txt`.
    struct Listing(&'static str);

    impl GeneratedArtifact for Listing {
        fn write(&self, path: &Path) -> io::Result<()> {
            fs::create_dir_all(path)?;
            fs::write(path.join("list.txt"), self.0)
        }
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".staging"))
            .collect()
    }

    #[test]
    fn test_publish_new_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out/Demo.txt");
        let report = Publisher::new().publish(&Text("new"), &target).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
        assert!(report.warnings.is_empty());
        assert!(leftovers(&dir.path().join("out")).is_empty());
    }

    #[test]
    fn test_publish_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("Demo.txt");
        fs::write(&target, "old").unwrap();
        Publisher::new().publish(&Text("new"), &target).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn test_staging_is_unique_sibling() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("Demo.txt");
        let a = PublishTransaction::begin(&target).unwrap();
        let b = PublishTransaction::begin(&target).unwrap();
        assert_ne!(a.staging_path(), b.staging_path());
        assert_eq!(a.staging_path().parent(), Some(dir.path()));
    }

    #[test]
    fn test_interrupted_after_stage_keeps_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("Demo.txt");
        fs::write(&target, "old").unwrap();

        let mut tx = PublishTransaction::begin(&target).unwrap();
        tx.stage(&Text("new")).unwrap();
        let staging = tx.staging_path().to_path_buf();
        drop(tx);

        assert_eq!(fs::read_to_string(&target).unwrap(), "old");
        assert_eq!(fs::read_to_string(&staging).unwrap(), "new");
    }

    #[test]
    fn test_failed_stage_keeps_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("Demo.txt");
        fs::write(&target, "old").unwrap();
        for _ in 0..3 {
            let err = Publisher::new().publish(&Failing, &target).unwrap_err();
            assert!(matches!(err, PublishError::Stage { .. }));
        }
        assert_eq!(fs::read_to_string(&target).unwrap(), "old");
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn test_directory_backup_copied() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("Demo.bundle");
        fs::create_dir_all(target.join("nested")).unwrap();
        fs::write(target.join("nested/keep.txt"), "kept").unwrap();

        let tx = PublishTransaction::begin(&target).unwrap();
        assert_eq!(
            fs::read_to_string(tx.staging_path().join("nested/keep.txt")).unwrap(),
            "kept"
        );
        let report = tx.swap().unwrap();
        assert!(report.warnings.is_empty());
        assert_eq!(fs::read_to_string(target.join("nested/keep.txt")).unwrap(), "kept");
    }

    #[cfg(unix)]
    #[test]
    fn test_backup_keeps_symlinks_as_links() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("Demo.bundle");
        let linked_dir = dir.path().join("shared");
        fs::create_dir_all(&target).unwrap();
        fs::create_dir_all(&linked_dir).unwrap();
        fs::write(linked_dir.join("big.bin"), "payload").unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone"), target.join("dangling")).unwrap();
        std::os::unix::fs::symlink(&linked_dir, target.join("shared")).unwrap();

        let report = Publisher::new().publish(&Listing("new"), &target).unwrap();

        assert!(report.warnings.is_empty());
        assert_eq!(fs::read_to_string(target.join("list.txt")).unwrap(), "new");
        assert_eq!(fs::read_link(target.join("dangling")).unwrap(), dir.path().join("gone"));
        assert_eq!(fs::read_link(target.join("shared")).unwrap(), linked_dir);
        assert_eq!(fs::read_to_string(linked_dir.join("big.bin")).unwrap(), "payload");
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn test_remove_missing_path_is_ok() {
        let dir = TempDir::new().unwrap();
        assert!(remove_path(&dir.path().join("nothing")).is_ok());
    }
}
