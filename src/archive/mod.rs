// src/archive/mod.rs

//! The archive-processing pipeline: driving one package archive through
//! validation, staging, maintainer-script brackets and the crash-safe
//! rename commit, ending with the package in state `unpacked`.
//!
//! Disk effects are ordered so that every window has a defined recovery:
//! nothing is touched before validation passes; staged `.dpkg-new` siblings
//! are removable on any failure before commit; the status journal is
//! written before the first rename and after the last, so an interrupted
//! commit is observable as `half-installed`.

pub mod reader;

pub use reader::{ControlMembers, EntryKind, EntryMeta, PackageArchive};

use crate::control::{paragraph_into_package, DecodeContext, Slot};
use crate::db::models::{Conffile, Eflag, Istobe, PackageBinary, PackageId, PkgStatus, Want};
use crate::db::paths;
use crate::deps::{ConflictKind, DepChecker, DepResult};
use crate::error::{Error, Result};
use crate::fsys::{self, NodeId, StatOverride};
use crate::script::{POSTRM, PREINST, PRERM};
use crate::session::Session;
use crate::trigger;
use crate::version::Version;
use md5::{Digest, Md5};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::{symlink, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One data entry scheduled for installation
#[derive(Debug, Clone)]
struct Planned {
    /// Node of the path the package claims
    node: NodeId,
    /// Canonical name actually written, after diversion resolution
    written: String,
    meta: EntryMeta,
    conffile: bool,
}

/// How far the pipeline got, for error unwinding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Validated,
    OldPrermDone,
    Staged,
    Committing,
    Committed,
}

/// Unpack one archive; on success the package is `unpacked` and owns its
/// files. Configuration is the scheduler's job.
pub fn unpack(session: &mut Session, archive_path: &Path) -> Result<PackageId> {
    let archive = PackageArchive::open(archive_path)?;
    let control = archive.read_control()?;
    let mut u = Unpacker::prepare(session, &archive, control)?;
    u.plan(&archive)?;

    match u.execute(&archive) {
        Ok(id) => Ok(id),
        Err(e) => {
            u.unwind();
            Err(e)
        }
    }
}

struct Unpacker<'s> {
    session: &'s mut Session,
    control: ControlMembers,
    id: PackageId,
    name: String,
    new_bin: PackageBinary,
    new_version: Version,
    old_status: PkgStatus,
    old_version: Option<Version>,
    old_configured_version: Option<Version>,
    planned: Vec<Planned>,
    /// Ownership claims to strip from other packages (Replaces)
    elide: Vec<(PackageId, NodeId)>,
    /// Backups made during commit, removed on success
    backups: Vec<(PathBuf, PathBuf)>,
    /// New maintainer scripts staged under the scratch dir
    scratch_scripts: PathBuf,
    /// Old postrm preserved before info files are replaced
    preserved_postrm: Option<PathBuf>,
    phase: Phase,
}

impl<'s> Unpacker<'s> {
    /// Steps 1-2 of the pipeline: parse control metadata and validate
    /// against the database. No disk mutation happens here.
    fn prepare(
        session: &'s mut Session,
        archive: &PackageArchive,
        control: ControlMembers,
    ) -> Result<Self> {
        let ctx = DecodeContext::archive_control(archive.path().display().to_string());
        let record = paragraph_into_package(&control.stanza, Slot::Available, &ctx)?;
        let name = record.name.clone();
        let new_bin = record.available.clone();

        let new_version = new_bin.version.clone().ok_or_else(|| {
            Error::Archive(format!(
                "archive '{}' has no Version field",
                archive.path().display()
            ))
        })?;
        let arch = new_bin.architecture.clone().ok_or_else(|| {
            Error::Archive(format!(
                "archive '{}' has no Architecture field",
                archive.path().display()
            ))
        })?;

        if arch != "all" && arch != session.native_arch {
            let err = Error::Archive(format!(
                "package {} architecture ({}) does not match system ({})",
                name, arch, session.native_arch
            ));
            let forced = session.force.architecture;
            session.force.gate(forced, err)?;
        }

        let id = session.db.find_or_create(&name, &arch);
        let pkg = session.db.pkg(id);
        let old_status = pkg.status;
        let old_version = pkg.installed.version.clone();
        let old_configured_version = pkg.config_version.clone().or_else(|| {
            if old_status >= PkgStatus::HalfConfigured || old_status == PkgStatus::ConfigFiles {
                pkg.installed.version.clone()
            } else {
                None
            }
        });

        if pkg.want == Want::Hold && old_status.has_installed_data() {
            let err = Error::Database(format!("package {} is on hold", name));
            let forced = session.force.hold;
            session.force.gate(forced, err)?;
        }

        if let Some(old) = &old_version {
            if new_version < *old {
                let err = Error::Database(format!(
                    "downgrading {} from {} to {}",
                    name, old, new_version
                ));
                let forced = session.force.downgrade;
                session.force.gate(forced, err)?;
            }
        }

        // Pre-depends must be fully configured before we touch anything
        let mut reason = String::new();
        let checker = DepChecker::new(&session.db, &session.native_arch);
        let predep = checker.expression(&name, "pre-depends on", &new_bin.pre_depends, &mut reason);
        if predep != DepResult::Ok {
            let err = Error::Depends(format!(
                "{} pre-dependency problem:\n{}",
                name,
                reason.trim_end()
            ));
            let forced = session.force.depends;
            session.force.gate(forced, err)?;
        }

        if let Some(violation) = checker.coinstall_violation(&name, &new_bin) {
            let forced = match violation.kind {
                ConflictKind::Conflicts => session.force.conflicts,
                ConflictKind::Breaks => session.force.breaks,
            };
            let err = Error::Conflict(violation.to_string());
            session.force.gate(forced, err)?;
        }

        let is_upgrade = old_status.has_installed_data();
        {
            let pkg = session.db.pkg_mut(id);
            pkg.available = new_bin.clone();
            pkg.istobe = Istobe::Install;
            pkg.want = Want::Install;
        }

        let old_str = old_version
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "<none>".to_string());
        session.log.action(
            if is_upgrade { "upgrade" } else { "install" },
            &name,
            &old_str,
            &new_version.to_string(),
        );
        info!(
            "preparing to unpack {} {} (over {})",
            name, new_version, old_str
        );

        let scratch_scripts = session.scratch_dir()?;

        Ok(Self {
            session,
            control,
            id,
            name,
            new_bin,
            new_version,
            old_status,
            old_version,
            old_configured_version,
            planned: Vec::new(),
            elide: Vec::new(),
            backups: Vec::new(),
            scratch_scripts,
            preserved_postrm: None,
            phase: Phase::Validated,
        })
    }

    /// Steps 3-4: enumerate the file list, resolve diversions, and detect
    /// ownership conflicts before anything is staged.
    fn plan(&mut self, archive: &PackageArchive) -> Result<()> {
        // Per-archive state: flags left by an earlier operation in this
        // session must not leak into this one.
        self.session.fsys.reset_transient();
        self.session.db.load_file_list(self.id, &mut self.session.fsys)?;

        let conffile_set: HashSet<&str> =
            self.control.conffiles.iter().map(String::as_str).collect();

        let mut planned = Vec::new();
        {
            let fsys = &mut self.session.fsys;
            let name = &self.name;
            archive.scan_data(|meta| {
                let canonical = fsys::normalize(&meta.path)?;
                let node = fsys.intern(&canonical)?;
                let resolved = fsys.divert_resolve(name, node);
                let written = fsys.node(resolved).name.clone();
                if resolved != node {
                    info!("diverting {} to {}", canonical, written);
                }
                fsys.node_mut(node).flags.in_new_archive = true;
                let conffile = conffile_set.contains(canonical.as_str());
                if conffile {
                    fsys.node_mut(node).flags.new_conffile = true;
                }
                planned.push(Planned {
                    node,
                    written,
                    meta: meta.clone(),
                    conffile,
                });
                Ok(())
            })?;
        }

        // Ownership conflicts: another installed package claiming a
        // non-directory path we are about to write.
        for p in &planned {
            if p.meta.kind == EntryKind::Directory {
                continue;
            }
            let owners = self.session.fsys.owners(p.node).to_vec();
            for owner in owners {
                if owner == self.id {
                    continue;
                }
                let other = self.session.db.pkg(owner);
                if !other.status.owns_files() {
                    continue;
                }
                let checker = DepChecker::new(&self.session.db, &self.session.native_arch);
                let replaces_it = self.new_bin.replaces.iter().any(|group| {
                    group
                        .alternatives
                        .iter()
                        .any(|atom| checker.atom_targets(atom, &other.name, &other.installed))
                });
                if replaces_it {
                    debug!(
                        "{} replaces {}, taking over {}",
                        self.name,
                        other.name,
                        self.session.fsys.node(p.node).name
                    );
                    self.elide.push((owner, p.node));
                } else {
                    let err = Error::Conflict(format!(
                        "trying to overwrite '{}', which is also in package {} {}",
                        self.session.fsys.node(p.node).name,
                        other.name,
                        other.installed_version_string()
                    ));
                    let forced = self.session.force.overwrite;
                    self.session.force.gate(forced, err)?;
                }
            }
        }

        self.planned = planned;
        Ok(())
    }

    /// Steps 5-11: scripts, staging, commit, database update
    fn execute(&mut self, archive: &PackageArchive) -> Result<PackageId> {
        self.write_scratch_scripts()?;

        // Upgrades enter the half-installed window before the old prerm
        if self.old_status.has_installed_data() {
            self.set_status(PkgStatus::HalfInstalled)?;
            self.run_old_prerm()?;
        }
        self.phase = Phase::OldPrermDone;

        self.stage(archive)?;
        self.phase = Phase::Staged;

        self.run_new_preinst()?;

        // Fresh installs become half-installed at the first irreversible step
        if !self.old_status.has_installed_data() {
            self.set_status(PkgStatus::HalfInstalled)?;
        }
        self.phase = Phase::Committing;
        self.commit_renames()?;
        self.remove_vanished_files()?;
        self.phase = Phase::Committed;

        self.update_record()?;
        self.write_info_files()?;
        self.activate_triggers()?;

        self.run_old_postrm()?;

        let version = self.new_version.to_string();
        self.session.log.status("unpacked", &self.name, &version);
        info!("unpacked {} {}", self.name, version);
        Ok(self.id)
    }

    fn set_status(&mut self, status: PkgStatus) -> Result<()> {
        let pkg = self.session.db.pkg_mut(self.id);
        pkg.status = status;
        let version = pkg.installed_version_string();
        self.session.db.record_update(self.id)?;
        self.session.log.status(status.as_str(), &self.name, &version);
        Ok(())
    }

    /// The incoming package's scripts, available before its info files are
    /// installed (needed for preinst and the abort-* unwind).
    fn write_scratch_scripts(&mut self) -> Result<()> {
        for (script, content) in &self.control.scripts {
            let path = self.scratch_script_path(script);
            let mut out = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o755)
                .open(&path)?;
            out.write_all(content)?;
        }
        // Preserve the outgoing version's postrm before info/ is replaced
        let old_postrm = paths::info_file(&self.session.admin_dir, &self.name, POSTRM);
        if self.old_status.has_installed_data() && old_postrm.exists() {
            let preserved = self.scratch_scripts.join(format!("{}.postrm.old", self.name));
            fs::copy(&old_postrm, &preserved)?;
            fs::set_permissions(&preserved, fs::Permissions::from_mode(0o755))?;
            self.preserved_postrm = Some(preserved);
        }
        Ok(())
    }

    fn scratch_script_path(&self, script: &str) -> PathBuf {
        self.scratch_scripts
            .join(format!("{}.{}.new", self.name, script))
    }

    fn run_old_prerm(&mut self) -> Result<()> {
        if self.old_status < PkgStatus::Unpacked {
            return Ok(());
        }
        let new_version = self.new_version.to_string();
        let runner = self.session.runner();
        let pkg = self.session.db.pkg(self.id);
        runner.run_with_fallback(
            pkg,
            PRERM,
            &["upgrade", &new_version],
            &["failed-upgrade", &new_version],
        )
    }

    fn run_new_preinst(&mut self) -> Result<()> {
        let path = self.scratch_script_path(PREINST);
        let runner = self.session.runner();
        let pkg = self.session.db.pkg(self.id);
        if let Some(old) = &self.old_version {
            let old = old.to_string();
            runner.run_file(pkg, &path, PREINST, &["upgrade", &old])
        } else if let Some(cfg) = &self.old_configured_version {
            let cfg = cfg.to_string();
            runner.run_file(pkg, &path, PREINST, &["install", &cfg])
        } else {
            runner.run_file(pkg, &path, PREINST, &["install"])
        }
    }

    /// Step 5: write every data member next to its final location
    fn stage(&mut self, archive: &PackageArchive) -> Result<()> {
        // Entries arrive in the same order as the metadata pass
        let mut index = 0usize;
        let planned = std::mem::take(&mut self.planned);
        let result = {
            let session = &mut *self.session;
            archive.extract_data(|meta, reader| {
                let p = planned.get(index).ok_or_else(|| {
                    Error::Archive("archive changed between passes".to_string())
                })?;
                index += 1;
                stage_entry(session, p, meta, reader)
            })
        };
        self.planned = planned;
        result
    }

    /// Step 8: back up and rename everything staged, deferred renames after
    /// all fsyncs have happened at stage time.
    fn commit_renames(&mut self) -> Result<()> {
        let planned = std::mem::take(&mut self.planned);
        let result: Result<()> = (|| {
            for p in &planned {
                let node_flags = self.session.fsys.node(p.node).flags;
                if !node_flags.deferred_rename {
                    continue;
                }
                if p.conffile {
                    // Conffiles stay parked as .dpkg-new until configure
                    continue;
                }
                let disk = self.session.disk_path(&p.written);
                let staged = dpkg_new(&disk);

                match fs::symlink_metadata(&disk) {
                    Ok(meta) if !meta.is_dir() => {
                        let backup = dpkg_old(&disk);
                        let _ = fs::remove_file(&backup);
                        fs::rename(&disk, &backup)?;
                        self.backups.push((disk.clone(), backup));
                    }
                    _ => {}
                }
                if let EntryKind::Hardlink { target } = &p.meta.kind {
                    let target_canonical = fsys::normalize(target)?;
                    let link_source = self.session.disk_path(&target_canonical);
                    let _ = fs::remove_file(&disk);
                    fs::hard_link(&link_source, &disk)?;
                } else {
                    fs::rename(&staged, &disk)?;
                }
                self.session.fsys.node_mut(p.node).flags.placed_on_disk = true;
            }
            Ok(())
        })();
        self.planned = planned;
        result?;

        // Success: the pre-overwrite backups are no longer needed
        for (_, backup) in self.backups.drain(..) {
            let _ = fs::remove_file(backup);
        }
        Ok(())
    }

    /// Step 8, tail: paths owned by the outgoing version that the new one
    /// no longer ships.
    fn remove_vanished_files(&mut self) -> Result<()> {
        let old_files = self.session.db.pkg(self.id).files.clone();
        let old_conffiles: HashSet<String> = self
            .session
            .db
            .pkg(self.id)
            .installed
            .conffiles
            .iter()
            .map(|c| c.path.clone())
            .collect();

        let mut dirs = Vec::new();
        for node in old_files {
            let n = self.session.fsys.node(node);
            if n.flags.in_new_archive {
                continue;
            }
            // Another package still claims it
            if n.owners.iter().any(|&o| o != self.id) {
                continue;
            }
            let name = n.name.clone();
            if old_conffiles.contains(&name) {
                // Conffiles linger; configure marks them obsolete
                continue;
            }
            let written = self.session.fsys.divert_resolve(&self.name, node);
            let disk = self.session.disk_path(&self.session.fsys.node(written).name);
            match fs::symlink_metadata(&disk) {
                Ok(meta) if meta.is_dir() => dirs.push(disk),
                Ok(_) => {
                    debug!("removing obsolete file {}", disk.display());
                    let _ = fs::remove_file(&disk);
                }
                Err(_) => {}
            }
        }

        // Directories last, deepest first, only when empty
        dirs.sort_by(|a, b| b.as_os_str().len().cmp(&a.as_os_str().len()));
        for dir in dirs {
            let _ = fs::remove_dir(&dir);
        }
        Ok(())
    }

    /// Steps 9-10: move available into installed, transfer ownership and
    /// journal the new state.
    fn update_record(&mut self) -> Result<()> {
        // Conffile records: keep recorded hashes across the upgrade, mark
        // disappeared ones obsolete.
        let old_conffiles = self.session.db.pkg(self.id).installed.conffiles.clone();
        let mut records = Vec::new();
        for path in &self.control.conffiles {
            let hash = old_conffiles
                .iter()
                .find(|c| &c.path == path)
                .map(|c| c.hash.clone())
                .unwrap_or_else(|| "newconffile".to_string());
            records.push(Conffile {
                path: path.clone(),
                hash,
                obsolete: false,
            });
        }
        for old in &old_conffiles {
            if !self.control.conffiles.contains(&old.path) {
                records.push(Conffile {
                    path: old.path.clone(),
                    hash: old.hash.clone(),
                    obsolete: true,
                });
            }
        }

        // Strip claims of replaced packages
        let elide = std::mem::take(&mut self.elide);
        for (owner, node) in &elide {
            self.session.fsys.remove_owner(*node, *owner);
            let other = self.session.db.pkg_mut(*owner);
            other.files.retain(|n| n != node);
        }

        // Transfer file ownership to the new version
        let old_files = self.session.db.pkg(self.id).files.clone();
        let new_files: Vec<NodeId> = self.planned.iter().map(|p| p.node).collect();
        let new_set: HashSet<NodeId> = new_files.iter().copied().collect();
        for node in old_files {
            if !new_set.contains(&node) {
                self.session.fsys.remove_owner(node, self.id);
            }
        }
        for &node in &new_files {
            self.session.fsys.add_owner(node, self.id);
        }

        {
            let pkg = self.session.db.pkg_mut(self.id);
            let mut installed = self.new_bin.clone();
            installed.conffiles = records;
            pkg.installed = installed;
            pkg.config_version = self.old_configured_version.clone();
            pkg.status = PkgStatus::Unpacked;
            pkg.eflag = Eflag::Ok;
            pkg.files = new_files;
            pkg.files_listed = true;
        }
        self.session.db.record_update(self.id)?;

        // Rewrite the lists of packages that lost a path
        let owners: HashSet<PackageId> = elide.iter().map(|(o, _)| *o).collect();
        for owner in owners {
            write_list_file(self.session, owner)?;
        }
        Ok(())
    }

    /// Step 9, tail: per-package metadata under info/
    fn write_info_files(&mut self) -> Result<()> {
        write_list_file(self.session, self.id)?;

        let admin = self.session.admin_dir.clone();
        let mut md5sums = String::new();
        for p in &self.planned {
            if p.meta.kind != EntryKind::File || p.conffile {
                continue;
            }
            if let Some(hash) = &self.session.fsys.node(p.node).new_hash {
                let name = &self.session.fsys.node(p.node).name;
                md5sums.push_str(&format!("{}  {}\n", hash, name.trim_start_matches('/')));
            }
        }
        fs::write(paths::info_file(&admin, &self.name, "md5sums"), md5sums)?;

        if self.control.conffiles.is_empty() {
            let _ = fs::remove_file(paths::info_file(&admin, &self.name, "conffiles"));
        } else {
            let mut text = self.control.conffiles.join("\n");
            text.push('\n');
            fs::write(paths::info_file(&admin, &self.name, "conffiles"), text)?;
        }

        if self.control.triggers.is_empty() {
            let _ = fs::remove_file(paths::info_file(&admin, &self.name, "triggers"));
        } else {
            let mut text = String::new();
            for d in &self.control.triggers {
                match d {
                    trigger::Directive::Interest { name, await_trigger } => {
                        let kw = if *await_trigger { "interest" } else { "interest-noawait" };
                        text.push_str(&format!("{} {}\n", kw, name));
                    }
                    trigger::Directive::Activate { name, await_trigger } => {
                        let kw = if *await_trigger { "activate" } else { "activate-noawait" };
                        text.push_str(&format!("{} {}\n", kw, name));
                    }
                }
            }
            fs::write(paths::info_file(&admin, &self.name, "triggers"), text)?;
        }

        // Replace maintainer scripts with the new set
        for script in reader::SCRIPT_MEMBERS {
            let dest = paths::info_file(&admin, &self.name, script);
            match self
                .control
                .scripts
                .iter()
                .find(|(name, _)| name.as_str() == *script)
            {
                Some((_, content)) => {
                    let mut out = OpenOptions::new()
                        .write(true)
                        .create(true)
                        .truncate(true)
                        .mode(0o755)
                        .open(&dest)?;
                    out.write_all(content)?;
                }
                None => {
                    let _ = fs::remove_file(&dest);
                }
            }
        }
        Ok(())
    }

    /// Step 11 prologue: register interests and fire activations
    fn activate_triggers(&mut self) -> Result<()> {
        let activations = self
            .session
            .triggers
            .set_package_interests(&self.name, &self.control.triggers);

        for (trigger_name, _await) in activations {
            trigger::activate(
                &mut self.session.db,
                &mut self.session.triggers,
                &trigger_name,
                Some(self.id),
                &mut self.session.log,
            )?;
        }

        let written: Vec<String> = self.planned.iter().map(|p| p.written.clone()).collect();
        trigger::activate_for_paths(
            &mut self.session.db,
            &mut self.session.triggers,
            written.iter().map(String::as_str),
            Some(self.id),
            &mut self.session.log,
        )?;
        Ok(())
    }

    /// Step 11: the outgoing version's postrm
    fn run_old_postrm(&mut self) -> Result<()> {
        if !self.old_status.has_installed_data() {
            return Ok(());
        }
        let preserved = match &self.preserved_postrm {
            Some(p) => p.clone(),
            None => return Ok(()),
        };
        let new_version = self.new_version.to_string();
        let runner = self.session.runner();
        let pkg = self.session.db.pkg(self.id);
        let result = runner.run_file(pkg, &preserved, POSTRM, &["upgrade", &new_version]);
        if let Err(e) = &result {
            // Fall back to the incoming version's postrm
            let old = self
                .old_version
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default();
            warn!("{}; trying the incoming version's postrm", e);
            let fallback = paths::info_file(&self.session.admin_dir, &self.name, POSTRM);
            runner.run_file(pkg, &fallback, POSTRM, &["failed-upgrade", &old])?;
        }
        Ok(())
    }

    /// Error unwind: delete staged siblings, run the abort scripts, leave
    /// the package in a defined state.
    fn unwind(&mut self) {
        warn!("unpack of {} failed, cleaning up", self.name);

        if self.phase >= Phase::Committing {
            // Renames may be half done: this window is exactly what
            // half-installed plus reinstreq exists for.
            let pkg = self.session.db.pkg_mut(self.id);
            pkg.status = PkgStatus::HalfInstalled;
            pkg.eflag = Eflag::Reinstreq;
            let _ = self.session.db.record_update(self.id);
            let version = self.session.db.pkg(self.id).installed_version_string();
            self.session
                .log
                .status("half-installed", &self.name, &version);
            return;
        }

        // Remove every staged sibling
        for p in &self.planned {
            if p.meta.kind == EntryKind::Directory {
                continue;
            }
            let staged = dpkg_new(&self.session.disk_path(&p.written));
            let _ = fs::remove_file(&staged);
        }

        // abort-install / abort-upgrade via the incoming version's postrm
        let script = self.scratch_script_path(POSTRM);
        let runner = self.session.runner();
        let pkg = self.session.db.pkg(self.id);
        let abort_ok = if self.old_version.is_some() {
            let old = self.old_version.as_ref().unwrap().to_string();
            runner
                .run_file(pkg, &script, POSTRM, &["abort-upgrade", &old])
                .is_ok()
        } else {
            runner
                .run_file(pkg, &script, POSTRM, &["abort-install"])
                .is_ok()
        };

        let pkg = self.session.db.pkg_mut(self.id);
        if abort_ok {
            pkg.status = self.old_status;
        } else {
            pkg.status = if self.old_status.has_installed_data() {
                PkgStatus::HalfInstalled
            } else {
                self.old_status
            };
            pkg.eflag = Eflag::Reinstreq;
        }
        pkg.istobe = Istobe::Normal;
        let version = pkg.installed_version_string();
        let status = pkg.status.as_str();
        let _ = self.session.db.record_update(self.id);
        self.session.log.status(status, &self.name, &version);
    }
}

/// Stage one entry onto disk next to its final location
fn stage_entry(
    session: &mut Session,
    p: &Planned,
    meta: &EntryMeta,
    reader: &mut dyn Read,
) -> Result<()> {
    let disk = session.disk_path(&p.written);
    let statoverride = session.fsys.node(p.node).statoverride;

    match &meta.kind {
        EntryKind::Directory => {
            fs::create_dir_all(&disk)?;
            apply_stat(&disk, statoverride, meta)?;
        }
        EntryKind::File => {
            if let Some(parent) = disk.parent() {
                fs::create_dir_all(parent)?;
            }
            let staged = dpkg_new(&disk);
            let mut out = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&staged)?;

            let mut hasher = Md5::new();
            let mut buf = [0u8; 32768];
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                out.write_all(&buf[..n])?;
            }
            out.sync_all()?;
            drop(out);
            apply_stat(&staged, statoverride, meta)?;

            let node = session.fsys.node_mut(p.node);
            node.new_hash = Some(format!("{:x}", hasher.finalize()));
            node.flags.deferred_fsync = false;
            node.flags.deferred_rename = true;
        }
        EntryKind::Symlink { target } => {
            if let Some(parent) = disk.parent() {
                fs::create_dir_all(parent)?;
            }
            let staged = dpkg_new(&disk);
            let _ = fs::remove_file(&staged);
            symlink(target, &staged)?;
            session.fsys.node_mut(p.node).flags.deferred_rename = true;
        }
        EntryKind::Hardlink { .. } => {
            // Created at commit time, once the link source is in place
            session.fsys.node_mut(p.node).flags.deferred_rename = true;
        }
    }
    Ok(())
}

/// Apply stat-override or archive metadata to a staged path
fn apply_stat(path: &Path, statoverride: Option<StatOverride>, meta: &EntryMeta) -> Result<()> {
    let (uid, gid, mode) = match statoverride {
        Some(so) => (so.uid, so.gid, so.mode),
        None => (meta.uid, meta.gid, meta.mode),
    };
    if nix::unistd::geteuid().is_root() {
        nix::unistd::chown(
            path,
            Some(nix::unistd::Uid::from_raw(uid)),
            Some(nix::unistd::Gid::from_raw(gid)),
        )
        .map_err(|e| Error::Archive(format!("cannot chown {}: {}", path.display(), e)))?;
    }
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Rewrite `info/<pkg>.list` from the in-memory ownership list
pub(crate) fn write_list_file(session: &mut Session, id: PackageId) -> Result<()> {
    let name = session.db.pkg(id).name.clone();
    let mut text = String::new();
    for &node in &session.db.pkg(id).files {
        text.push_str(&session.fsys.node(node).name);
        text.push('\n');
    }
    let path = paths::info_file(&session.admin_dir, &name, "list");
    fs::write(&path, text)?;
    Ok(())
}

fn dpkg_new(path: &Path) -> PathBuf {
    sibling(path, ".dpkg-new")
}

fn dpkg_old(path: &Path) -> PathBuf {
    sibling(path, ".dpkg-old")
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(suffix);
    path.with_file_name(name)
}
