// src/fsys/mod.rs

//! The filesystem node table: one interned record per absolute path any
//! package has ever claimed, with per-package back-references, diversions and
//! stat overrides.
//!
//! Nodes live in an arena for the session; cross-references are stable
//! indices. Stored names are canonical: a single leading `/`, no `.`
//! segments, no repeated slashes. Transient per-run state is cleared by
//! [`FsysTable::reset_transient`], identity and ownership survive.

mod diversion;
mod statoverride;

pub use diversion::Diversion;
pub use statoverride::StatOverride;

use crate::db::models::PackageId;
use crate::error::{Error, Result};
use std::collections::HashMap;

/// Stable arena index of a filesystem node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Per-run flags on a node, all cleared at session init
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeFlags {
    pub new_conffile: bool,
    pub in_new_archive: bool,
    pub old_conffile: bool,
    pub obsolete_conffile: bool,
    pub elide_other_lists: bool,
    pub no_atomic_overwrite: bool,
    pub placed_on_disk: bool,
    pub deferred_fsync: bool,
    pub deferred_rename: bool,
    pub filtered: bool,
}

/// One interned filesystem path
#[derive(Debug, Clone)]
pub struct FsNode {
    /// Canonical absolute path
    pub name: String,
    /// Packages claiming this path
    pub owners: Vec<PackageId>,
    /// Index into the diversion registry, set on both contested and
    /// redirected nodes
    pub divert: Option<usize>,
    pub statoverride: Option<StatOverride>,
    pub flags: NodeFlags,
    pub old_hash: Option<String>,
    pub new_hash: Option<String>,
    /// Device and inode observed when the file was placed on disk
    pub ondisk_id: Option<(u64, u64)>,
}

impl FsNode {
    fn new(name: String) -> Self {
        Self {
            name,
            owners: Vec::new(),
            divert: None,
            statoverride: None,
            flags: NodeFlags::default(),
            old_hash: None,
            new_hash: None,
            ondisk_id: None,
        }
    }
}

/// Session-wide interned table of filesystem nodes
#[derive(Debug, Default)]
pub struct FsysTable {
    nodes: Vec<FsNode>,
    index: HashMap<String, NodeId>,
    diversions: Vec<Diversion>,
}

/// Normalize any path into canonical absolute form.
///
/// Leading slashes and `./` pairs are stripped, `.` segments and repeated
/// slashes collapse, and traversal (`..`) is rejected outright.
pub fn normalize(path: &str) -> Result<String> {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(Error::Path(format!(
                    "path '{}' escapes the filesystem root",
                    path
                )))
            }
            seg => {
                out.push('/');
                out.push_str(seg);
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

impl FsysTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node without creating it
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let name = normalize(path).ok()?;
        self.index.get(&name).copied()
    }

    /// Look up a node, creating it on miss
    pub fn intern(&mut self, path: &str) -> Result<NodeId> {
        let name = normalize(path)?;
        if let Some(&id) = self.index.get(&name) {
            return Ok(id);
        }
        debug_assert!(name.starts_with('/'), "node name '{}' not canonical", name);
        let id = NodeId(self.nodes.len());
        self.index.insert(name.clone(), id);
        self.nodes.push(FsNode::new(name));
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> &FsNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut FsNode {
        &mut self.nodes[id.0]
    }

    /// Iterate every node id in insertion order
    pub fn iter_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Packages owning a node
    pub fn owners(&self, id: NodeId) -> &[PackageId] {
        &self.nodes[id.0].owners
    }

    pub fn add_owner(&mut self, id: NodeId, pkg: PackageId) {
        let node = &mut self.nodes[id.0];
        if !node.owners.contains(&pkg) {
            node.owners.push(pkg);
        }
    }

    pub fn remove_owner(&mut self, id: NodeId, pkg: PackageId) {
        self.nodes[id.0].owners.retain(|&p| p != pkg);
    }

    /// Clear all transient per-run state, preserving identity, ownership,
    /// diversions and stat overrides.
    pub fn reset_transient(&mut self) {
        for node in &mut self.nodes {
            node.flags = NodeFlags::default();
            node.old_hash = None;
            node.new_hash = None;
            node.ondisk_id = None;
        }
    }

    pub(crate) fn diversions(&self) -> &[Diversion] {
        &self.diversions
    }

    pub(crate) fn push_diversion(&mut self, diversion: Diversion) -> usize {
        let idx = self.diversions.len();
        self.diversions.push(diversion);
        idx
    }

    pub(crate) fn clear_diversions(&mut self) {
        self.diversions.clear();
        for node in &mut self.nodes {
            node.divert = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_canonical_forms() {
        assert_eq!(normalize("/usr/bin/x").unwrap(), "/usr/bin/x");
        assert_eq!(normalize("usr/bin/x").unwrap(), "/usr/bin/x");
        assert_eq!(normalize("./usr/bin/x").unwrap(), "/usr/bin/x");
        assert_eq!(normalize("//usr//bin///x").unwrap(), "/usr/bin/x");
        assert_eq!(normalize("/./usr/./bin/x").unwrap(), "/usr/bin/x");
        assert_eq!(normalize("/usr/bin/").unwrap(), "/usr/bin");
        assert_eq!(normalize("/").unwrap(), "/");
    }

    #[test]
    fn test_normalize_rejects_traversal() {
        assert!(normalize("/usr/../etc/passwd").is_err());
        assert!(normalize("../x").is_err());
    }

    #[test]
    fn test_intern_dedups_equivalent_paths() {
        let mut table = FsysTable::new();
        let a = table.intern("/usr/bin/x").unwrap();
        let b = table.intern("usr/bin/x").unwrap();
        let c = table.intern("./usr//bin/x").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(table.len(), 1);
        assert_eq!(table.node(a).name, "/usr/bin/x");
    }

    #[test]
    fn test_find_without_create() {
        let mut table = FsysTable::new();
        assert!(table.find("/nope").is_none());
        let id = table.intern("/yes").unwrap();
        assert_eq!(table.find("/yes"), Some(id));
        assert_eq!(table.find("yes"), Some(id));
    }

    #[test]
    fn test_owner_bookkeeping() {
        let mut table = FsysTable::new();
        let id = table.intern("/usr/share/doc/x").unwrap();
        table.add_owner(id, PackageId(1));
        table.add_owner(id, PackageId(2));
        table.add_owner(id, PackageId(1));
        assert_eq!(table.owners(id), &[PackageId(1), PackageId(2)]);
        table.remove_owner(id, PackageId(1));
        assert_eq!(table.owners(id), &[PackageId(2)]);
    }

    #[test]
    fn test_reset_preserves_identity_and_owners() {
        let mut table = FsysTable::new();
        let id = table.intern("/etc/x.conf").unwrap();
        table.add_owner(id, PackageId(0));
        {
            let node = table.node_mut(id);
            node.flags.in_new_archive = true;
            node.flags.placed_on_disk = true;
            node.new_hash = Some("abc".to_string());
            node.ondisk_id = Some((1, 2));
        }
        table.reset_transient();
        let node = table.node(id);
        assert!(!node.flags.in_new_archive);
        assert!(!node.flags.placed_on_disk);
        assert!(node.new_hash.is_none());
        assert!(node.ondisk_id.is_none());
        assert_eq!(node.owners, vec![PackageId(0)]);
        assert_eq!(table.find("/etc/x.conf"), Some(id));
    }
}
