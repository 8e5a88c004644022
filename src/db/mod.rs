// src/db/mod.rs

//! The package database: in-memory indexed set of package records backed by
//! the status and available files.
//!
//! Mutations are journaled: each changed record is written as a single
//! stanza into `updates/NNNN` (fsynced) before the engine proceeds. A
//! checkpoint replays nothing at runtime; it rewrites the status file
//! through a temp + fsync + rename and truncates the journal. On load the
//! journal is replayed in numeric order and immediately checkpointed, which
//! is what recovers an interrupted session.

pub mod lock;
pub mod models;
pub mod paths;

pub use lock::{AdminLock, SessionLocks};

use crate::control::{paragraph_into_package, DecodeContext, Slot, StanzaReader};
use crate::error::{Error, Result};
use crate::fsys::FsysTable;
use models::{Package, PackageId};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// In-memory package database with journaled persistence
pub struct Database {
    admin_dir: PathBuf,
    packages: Vec<Package>,
    by_name: HashMap<String, Vec<PackageId>>,
    next_update: u64,
}

impl Database {
    /// Create the admin-directory skeleton if it is missing
    pub fn ensure_layout(admin: &Path) -> Result<()> {
        fs::create_dir_all(admin)?;
        fs::create_dir_all(paths::updates_dir(admin))?;
        fs::create_dir_all(paths::info_dir(admin))?;
        fs::create_dir_all(paths::triggers_dir(admin))?;
        let status = paths::status_file(admin);
        if !status.exists() {
            fs::write(&status, "")?;
        }
        let available = paths::available_file(admin);
        if !available.exists() {
            fs::write(&available, "")?;
        }
        Ok(())
    }

    /// Load the database, replaying and folding in any journal left by an
    /// interrupted session.
    pub fn load(admin: &Path) -> Result<Self> {
        Self::ensure_layout(admin)?;

        let mut db = Self {
            admin_dir: admin.to_path_buf(),
            packages: Vec::new(),
            by_name: HashMap::new(),
            next_update: 0,
        };

        db.load_status()?;
        db.load_available()?;
        let replayed = db.replay_updates()?;
        if replayed > 0 {
            info!("recovered {} journaled record(s)", replayed);
            db.checkpoint()?;
        }
        Ok(db)
    }

    pub fn admin_dir(&self) -> &Path {
        &self.admin_dir
    }

    fn load_status(&mut self) -> Result<()> {
        let path = paths::status_file(&self.admin_dir);
        let ctx = DecodeContext::status_file(path.display().to_string());
        let file = File::open(&path)?;
        let mut reader = StanzaReader::new(BufReader::new(file), path.display().to_string());
        while let Some(para) = reader.next_paragraph()? {
            let pkg = paragraph_into_package(&para, Slot::Installed, &ctx)?;
            self.insert_record(pkg);
        }
        Ok(())
    }

    fn load_available(&mut self) -> Result<()> {
        let path = paths::available_file(&self.admin_dir);
        if !path.exists() {
            return Ok(());
        }
        let ctx = DecodeContext::available_file(path.display().to_string());
        let file = File::open(&path)?;
        let mut reader = StanzaReader::new(BufReader::new(file), path.display().to_string());
        while let Some(para) = reader.next_paragraph()? {
            let record = paragraph_into_package(&para, Slot::Available, &ctx)?;
            let arch = record.available.architecture.clone().unwrap_or_default();
            let id = self.find_or_create(&record.name, &arch);
            self.packages[id.0].available = record.available;
        }
        Ok(())
    }

    /// Replay `updates/NNNN` journal files in numeric order. Each file holds
    /// one status stanza that replaces the named package's record.
    fn replay_updates(&mut self) -> Result<usize> {
        let dir = paths::updates_dir(&self.admin_dir);
        let mut entries: Vec<(u64, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            match name.parse::<u64>() {
                Ok(n) => entries.push((n, entry.path())),
                Err(_) => {
                    warn!("ignoring stray file in updates directory: {}", name);
                }
            }
        }
        entries.sort_by_key(|(n, _)| *n);

        for (n, path) in &entries {
            debug!("replaying journal entry {}", path.display());
            let ctx = DecodeContext::status_file(path.display().to_string());
            let file = File::open(path)?;
            let mut reader = StanzaReader::new(BufReader::new(file), path.display().to_string());
            if let Some(para) = reader.next_paragraph()? {
                let pkg = paragraph_into_package(&para, Slot::Installed, &ctx)?;
                self.replace_record(pkg);
            }
            self.next_update = n + 1;
        }
        Ok(entries.len())
    }

    fn insert_record(&mut self, pkg: Package) -> PackageId {
        let id = PackageId(self.packages.len());
        self.by_name.entry(pkg.name.clone()).or_default().push(id);
        self.packages.push(pkg);
        id
    }

    /// Replace a package's installed-side record, keeping the available slot
    /// and any run-state.
    fn replace_record(&mut self, incoming: Package) {
        let arch = incoming.arch.clone();
        let id = self.find_or_create(&incoming.name, &arch);
        let existing = &mut self.packages[id.0];
        existing.want = incoming.want;
        existing.eflag = incoming.eflag;
        existing.status = incoming.status;
        existing.installed = incoming.installed;
        existing.config_version = incoming.config_version;
        existing.triggers_pending = incoming.triggers_pending;
        existing.triggers_awaited = incoming.triggers_awaited;
        if existing.arch.is_empty() {
            existing.arch = arch;
        }
    }

    /// Find a package by name. With several architecture instances, the
    /// first recorded one wins.
    pub fn find(&self, name: &str) -> Option<PackageId> {
        let name = name.to_ascii_lowercase();
        self.by_name.get(&name).and_then(|v| v.first().copied())
    }

    /// Find a specific architecture instance
    pub fn find_arch(&self, name: &str, arch: &str) -> Option<PackageId> {
        let name = name.to_ascii_lowercase();
        self.by_name.get(&name).and_then(|ids| {
            ids.iter()
                .copied()
                .find(|id| self.packages[id.0].arch == arch)
        })
    }

    /// Find or create the record for a (name, architecture) pair
    pub fn find_or_create(&mut self, name: &str, arch: &str) -> PackageId {
        let lname = name.to_ascii_lowercase();
        if let Some(ids) = self.by_name.get(&lname) {
            if let Some(&id) = ids
                .iter()
                .find(|id| self.packages[id.0].arch == arch || self.packages[id.0].arch.is_empty())
            {
                if self.packages[id.0].arch.is_empty() {
                    self.packages[id.0].arch = arch.to_string();
                }
                return id;
            }
        }
        self.insert_record(Package::new(lname, arch))
    }

    pub fn pkg(&self, id: PackageId) -> &Package {
        &self.packages[id.0]
    }

    pub fn pkg_mut(&mut self, id: PackageId) -> &mut Package {
        &mut self.packages[id.0]
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = PackageId> {
        (0..self.packages.len()).map(PackageId)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Journal one package's current record: write `updates/NNNN`, fsync the
    /// file and its directory before returning.
    pub fn record_update(&mut self, id: PackageId) -> Result<()> {
        let dir = paths::updates_dir(&self.admin_dir);
        let path = dir.join(format!("{:04}", self.next_update));
        let mut out = File::create(&path)?;
        self.packages[id.0].status_stanza().write_to(&mut out)?;
        writeln!(out)?;
        out.sync_all()?;
        fsync_dir(&dir)?;
        self.next_update += 1;
        debug!(
            "journaled {} as {}",
            self.packages[id.0].name,
            path.display()
        );
        Ok(())
    }

    /// Fold the journal into the status file: rewrite atomically, then
    /// truncate the updates directory.
    pub fn checkpoint(&mut self) -> Result<()> {
        let status = paths::status_file(&self.admin_dir);
        let status_new = paths::status_new_file(&self.admin_dir);

        {
            let mut out = File::create(&status_new)?;
            for pkg in &self.packages {
                if !pkg.is_informative() {
                    continue;
                }
                pkg.status_stanza().write_to(&mut out)?;
                writeln!(out)?;
            }
            out.sync_all()?;
        }

        // Keep the previous version around, then commit the new one
        if status.exists() {
            let _ = fs::rename(&status, paths::status_old_file(&self.admin_dir));
        }
        fs::rename(&status_new, &status)?;
        fsync_dir(&self.admin_dir)?;

        let updates = paths::updates_dir(&self.admin_dir);
        for entry in fs::read_dir(&updates)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().parse::<u64>().is_ok() {
                fs::remove_file(entry.path())?;
            }
        }
        fsync_dir(&updates)?;
        self.next_update = 0;
        debug!("status checkpoint written");
        Ok(())
    }

    /// Rewrite the available file from the in-memory records
    pub fn save_available(&self) -> Result<()> {
        let available = paths::available_file(&self.admin_dir);
        let available_new = paths::available_new_file(&self.admin_dir);
        {
            let mut out = File::create(&available_new)?;
            for pkg in &self.packages {
                if pkg.available.is_empty() {
                    continue;
                }
                pkg.available_stanza().write_to(&mut out)?;
                writeln!(out)?;
            }
            out.sync_all()?;
        }
        fs::rename(&available_new, &available)?;
        fsync_dir(&self.admin_dir)?;
        Ok(())
    }

    /// Load one package's file list from `info/<pkg>.list` and register the
    /// ownerships on the node table.
    pub fn load_file_list(&mut self, id: PackageId, fsys: &mut FsysTable) -> Result<()> {
        if self.packages[id.0].files_listed {
            return Ok(());
        }
        let name = self.packages[id.0].name.clone();
        let path = paths::info_file(&self.admin_dir, &name, "list");
        let mut files = Vec::new();
        match fs::read_to_string(&path) {
            Ok(text) => {
                for line in text.lines() {
                    let line = line.trim_end();
                    if line.is_empty() {
                        continue;
                    }
                    let node = fsys.intern(line)?;
                    fsys.add_owner(node, id);
                    files.push(node);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let pkg = &mut self.packages[id.0];
        pkg.files = files;
        pkg.files_listed = true;
        Ok(())
    }

    /// Load the file lists of every package that may own files
    pub fn load_all_file_lists(&mut self, fsys: &mut FsysTable) -> Result<()> {
        for id in self.iter_ids().collect::<Vec<_>>() {
            if self.packages[id.0].status.owns_files() {
                self.load_file_list(id, fsys)?;
            }
        }
        Ok(())
    }
}

/// fsync a directory so renames and unlinks within it are durable
pub(crate) fn fsync_dir(path: &Path) -> Result<()> {
    match File::open(path) {
        // Not every filesystem supports fsync on directories
        Ok(dir) => {
            let _ = dir.sync_all();
            Ok(())
        }
        Err(e) => Err(Error::Io(e)),
    }
}
