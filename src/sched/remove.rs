// src/sched/remove.rs

//! Removal and purging: dropping a package's files while preserving its
//! configuration, or erasing every trace of it.

use crate::db::models::{Eflag, Istobe, PackageBinary, PackageId, PkgStatus, Want};
use crate::db::paths;
use crate::error::{Error, Result};
use crate::script::{POSTINST, POSTRM, PRERM};
use crate::session::Session;
use std::collections::HashSet;
use std::fs;
use tracing::{debug, info, warn};

/// Remove a package, keeping conffiles (status becomes `config-files`).
/// With `purge` the conffiles and the remaining record go too.
pub fn remove_package(session: &mut Session, id: PackageId, purge: bool) -> Result<()> {
    let pkg = session.db.pkg(id);
    let name = pkg.name.clone();
    let version = pkg.installed_version_string();
    let status = pkg.status;

    match status {
        PkgStatus::NotInstalled => {
            warn!("package {} is not installed", name);
            return Ok(());
        }
        PkgStatus::ConfigFiles if !purge => {
            info!("package {} is already removed, only config files remain", name);
            return Ok(());
        }
        _ => {}
    }

    if pkg.installed.essential {
        let err = Error::Database(format!(
            "{} is an essential package, refusing to remove",
            name
        ));
        let forced = session.force.remove_essential;
        session.force.gate(forced, err)?;
    }
    if pkg.eflag == Eflag::Reinstreq {
        let err = Error::Database(format!(
            "package {} requires reinstallation, refusing to remove",
            name
        ));
        let forced = session.force.remove_reinstreq;
        session.force.gate(forced, err)?;
    }

    session.db.pkg_mut(id).istobe = Istobe::Remove;
    check_reverse_depends(session, id, &name)?;

    session.log.action(
        if purge { "purge" } else { "remove" },
        &name,
        &version,
        "",
    );
    info!("removing {} ({})", name, version);

    if status.owns_files() {
        remove_installation(session, id, &name, &version)?;
    }

    if purge {
        purge_config(session, id, &name, &version)?;
    }

    session.db.pkg_mut(id).istobe = Istobe::Normal;
    Ok(())
}

/// Refuse removal while other installed packages depend on this one
fn check_reverse_depends(session: &mut Session, id: PackageId, name: &str) -> Result<()> {
    let mut broken = String::new();
    {
        let db = &session.db;
        let checker = crate::deps::DepChecker::new(db, &session.native_arch);
        for other_id in db.iter_ids() {
            if other_id == id {
                continue;
            }
            let other = db.pkg(other_id);
            if !matches!(
                other.status,
                PkgStatus::Installed
                    | PkgStatus::TriggersPending
                    | PkgStatus::TriggersAwaited
                    | PkgStatus::Unpacked
                    | PkgStatus::HalfConfigured
            ) {
                continue;
            }
            for group in other
                .installed
                .depends
                .iter()
                .chain(other.installed.pre_depends.iter())
            {
                let names_target = group.alternatives.iter().any(|atom| {
                    atom.package == name
                        || provides_name(&session.db.pkg(id).installed, &atom.package)
                });
                if !names_target {
                    continue;
                }
                let mut reason = String::new();
                if checker.group(&other.name, "depends on", group, &mut reason)
                    != crate::deps::DepResult::Ok
                {
                    broken.push_str(&reason);
                }
            }
        }
    }

    if !broken.is_empty() {
        let err = Error::Depends(format!(
            "dependency problems prevent removal of {}:\n{}",
            name,
            broken.trim_end()
        ));
        let forced = session.force.depends;
        if let Err(e) = session.force.gate(forced, err) {
            session.db.pkg_mut(id).istobe = Istobe::Normal;
            return Err(e);
        }
    }
    Ok(())
}

fn provides_name(bin: &PackageBinary, virtual_name: &str) -> bool {
    bin.provides
        .iter()
        .flat_map(|g| g.alternatives.iter())
        .any(|a| a.package == virtual_name)
}

/// The main removal sequence: prerm, file deletion, postrm, config-files
fn remove_installation(
    session: &mut Session,
    id: PackageId,
    name: &str,
    version: &str,
) -> Result<()> {
    let had_config_stage = session.db.pkg(id).status >= PkgStatus::HalfConfigured;

    if had_config_stage {
        {
            session.db.pkg_mut(id).status = PkgStatus::HalfConfigured;
        }
        session.db.record_update(id)?;
        session.log.status("half-configured", name, version);

        let runner = session.runner();
        if let Err(e) = runner.run(session.db.pkg(id), PRERM, &["remove"]) {
            // Try to put the package back into a configured state
            let runner = session.runner();
            let _ = runner.run(session.db.pkg(id), POSTINST, &["abort-remove"]);
            let pkg = session.db.pkg_mut(id);
            pkg.status = PkgStatus::Installed;
            pkg.istobe = Istobe::Normal;
            session.db.record_update(id)?;
            return Err(e);
        }
    }

    {
        session.db.pkg_mut(id).status = PkgStatus::HalfInstalled;
    }
    session.db.record_update(id)?;
    session.log.status("half-installed", name, version);

    delete_files(session, id, name)?;

    let runner = session.runner();
    if let Err(e) = runner.run(session.db.pkg(id), POSTRM, &["remove"]) {
        let pkg = session.db.pkg_mut(id);
        pkg.eflag = Eflag::Reinstreq;
        session.db.record_update(id)?;
        return Err(e);
    }

    // Interests vanish with the files; conffiles and postrm stay for purge
    session.triggers.remove_package(name);
    let admin = session.admin_dir.clone();
    for script in ["preinst", "prerm", "postinst"] {
        let _ = fs::remove_file(paths::info_file(&admin, name, script));
    }
    let _ = fs::remove_file(paths::info_file(&admin, name, "md5sums"));
    let _ = fs::remove_file(paths::info_file(&admin, name, "triggers"));

    // No files are owned in config-files state; the conffile records in
    // the installed metadata are what purge works from later.
    let files = session.db.pkg(id).files.clone();
    for node in files {
        session.fsys.remove_owner(node, id);
    }
    {
        let pkg = session.db.pkg_mut(id);
        pkg.files.clear();
        pkg.status = PkgStatus::ConfigFiles;
        pkg.want = Want::Deinstall;
        pkg.triggers_pending.clear();
        pkg.triggers_awaited.clear();
    }
    let conffile_paths: Vec<String> = session
        .db
        .pkg(id)
        .installed
        .conffiles
        .iter()
        .map(|c| c.path.clone())
        .collect();
    let mut list_text = conffile_paths.join("\n");
    if !list_text.is_empty() {
        list_text.push('\n');
    }
    fs::write(paths::info_file(&admin, name, "list"), list_text)?;
    session.db.record_update(id)?;
    session.log.status("config-files", name, version);
    Ok(())
}

/// Erase conffiles, run `postrm purge`, drop the record entirely
fn purge_config(session: &mut Session, id: PackageId, name: &str, version: &str) -> Result<()> {
    let conffiles = session.db.pkg(id).installed.conffiles.clone();
    for cf in &conffiles {
        if let Ok(node) = session.fsys.intern(&cf.path) {
            let resolved = session.fsys.divert_resolve(name, node);
            let written = session.fsys.node(resolved).name.clone();
            let disk = session.disk_path(&written);
            for suffix in ["", ".dpkg-old", ".dpkg-new", ".dpkg-dist", ".dpkg-bak"] {
                let victim = disk.with_file_name(format!(
                    "{}{}",
                    disk.file_name().and_then(|n| n.to_str()).unwrap_or_default(),
                    suffix
                ));
                if victim.exists() {
                    debug!("purging {}", victim.display());
                    let _ = fs::remove_file(&victim);
                }
            }
            session.fsys.remove_owner(node, id);
        }
    }

    let runner = session.runner();
    runner.run(session.db.pkg(id), POSTRM, &["purge"])?;

    let admin = session.admin_dir.clone();
    let _ = fs::remove_file(paths::info_file(&admin, name, "postrm"));
    let _ = fs::remove_file(paths::info_file(&admin, name, "conffiles"));
    let _ = fs::remove_file(paths::info_file(&admin, name, "list"));

    {
        let pkg = session.db.pkg_mut(id);
        pkg.installed = PackageBinary::default();
        pkg.config_version = None;
        pkg.files.clear();
        pkg.status = PkgStatus::NotInstalled;
        pkg.want = Want::Unknown;
        pkg.eflag = Eflag::Ok;
    }
    session.db.record_update(id)?;
    session.log.status("not-installed", name, version);
    Ok(())
}

/// Delete the files a package owns, files first, then empty directories
/// deepest-first. Shared paths and conffiles stay.
fn delete_files(session: &mut Session, id: PackageId, name: &str) -> Result<()> {
    let conffile_paths: HashSet<String> = session
        .db
        .pkg(id)
        .installed
        .conffiles
        .iter()
        .map(|c| c.path.clone())
        .collect();

    let files = session.db.pkg(id).files.clone();
    let mut dirs = Vec::new();
    for &node in files.iter().rev() {
        let n = session.fsys.node(node);
        if n.owners.iter().any(|&o| o != id) {
            debug!("keeping shared path {}", n.name);
            continue;
        }
        let node_name = n.name.clone();
        if conffile_paths.contains(&node_name) {
            continue;
        }
        let resolved = session.fsys.divert_resolve(name, node);
        let written = session.fsys.node(resolved).name.clone();
        let disk = session.disk_path(&written);
        match fs::symlink_metadata(&disk) {
            Ok(meta) if meta.is_dir() => dirs.push(disk),
            Ok(_) => {
                debug!("removing {}", disk.display());
                let _ = fs::remove_file(&disk);
            }
            Err(_) => {}
        }
    }

    dirs.sort_by(|a, b| b.as_os_str().len().cmp(&a.as_os_str().len()));
    for dir in dirs {
        let _ = fs::remove_dir(&dir);
    }
    Ok(())
}
