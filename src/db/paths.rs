// src/db/paths.rs
//! Centralized path derivation for the administrative directory

use std::path::{Path, PathBuf};

/// Default administrative directory
pub const DEFAULT_ADMINDIR: &str = "/var/lib/debpkg";

/// The authoritative status file
pub fn status_file(admin: &Path) -> PathBuf {
    admin.join("status")
}

/// Staging name the status file is rewritten through
pub fn status_new_file(admin: &Path) -> PathBuf {
    admin.join("status-new")
}

/// Previous status file kept after a checkpoint
pub fn status_old_file(admin: &Path) -> PathBuf {
    admin.join("status-old")
}

/// The available-package catalog
pub fn available_file(admin: &Path) -> PathBuf {
    admin.join("available")
}

pub fn available_new_file(admin: &Path) -> PathBuf {
    admin.join("available-new")
}

/// Journal directory of numbered per-package update records
pub fn updates_dir(admin: &Path) -> PathBuf {
    admin.join("updates")
}

/// Per-package metadata directory
pub fn info_dir(admin: &Path) -> PathBuf {
    admin.join("info")
}

/// A per-package metadata file: `info/<pkg>.<ext>`
pub fn info_file(admin: &Path, pkg: &str, ext: &str) -> PathBuf {
    info_dir(admin).join(format!("{}.{}", pkg, ext))
}

pub fn diversions_file(admin: &Path) -> PathBuf {
    admin.join("diversions")
}

pub fn statoverride_file(admin: &Path) -> PathBuf {
    admin.join("statoverride")
}

/// Trigger state directory
pub fn triggers_dir(admin: &Path) -> PathBuf {
    admin.join("triggers")
}

/// File-trigger interest registry
pub fn triggers_file_interests(admin: &Path) -> PathBuf {
    triggers_dir(admin).join("File")
}

/// Activations nobody is interested in yet
pub fn triggers_unincorp(admin: &Path) -> PathBuf {
    triggers_dir(admin).join("Unincorp")
}

/// Explicit-trigger interest file for one named trigger
pub fn triggers_interest_file(admin: &Path, trigger: &str) -> PathBuf {
    triggers_dir(admin).join(trigger)
}

/// Database lock sentinel
pub fn lock_file(admin: &Path) -> PathBuf {
    admin.join("lock")
}

/// Frontend lock sentinel
pub fn lock_frontend_file(admin: &Path) -> PathBuf {
    admin.join("lock-frontend")
}

/// Scratch directory for control-member extraction
pub fn tmp_dir(admin: &Path) -> PathBuf {
    admin.join("tmp.ci")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let admin = Path::new("/var/lib/debpkg");
        assert_eq!(status_file(admin), PathBuf::from("/var/lib/debpkg/status"));
        assert_eq!(
            updates_dir(admin),
            PathBuf::from("/var/lib/debpkg/updates")
        );
        assert_eq!(
            info_file(admin, "foo", "list"),
            PathBuf::from("/var/lib/debpkg/info/foo.list")
        );
        assert_eq!(
            triggers_file_interests(admin),
            PathBuf::from("/var/lib/debpkg/triggers/File")
        );
    }
}
