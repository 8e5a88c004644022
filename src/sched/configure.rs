// src/sched/configure.rs

//! Configuration of one unpacked package: conffile resolution, the
//! `postinst configure` invocation, and the resulting status transitions.

use crate::conffile::{self, Prompter};
use crate::db::models::{Eflag, Istobe, PackageId, PkgStatus};
use crate::error::{Error, Result};
use crate::script::POSTINST;
use crate::session::Session;
use crate::trigger;
use tracing::{info, warn};

/// Configure one package. The caller has already established that its
/// dependencies are satisfied (or forced).
pub fn configure_package(
    session: &mut Session,
    id: PackageId,
    prompter: &mut dyn Prompter,
) -> Result<()> {
    let pkg = session.db.pkg(id);
    let name = pkg.name.clone();
    match pkg.status {
        PkgStatus::Unpacked | PkgStatus::HalfConfigured => {}
        PkgStatus::Installed | PkgStatus::TriggersPending | PkgStatus::TriggersAwaited => {
            info!("{} is already installed and configured", name);
            return Ok(());
        }
        other => {
            return Err(Error::Database(format!(
                "package {} is in state {}, cannot configure",
                name, other
            )))
        }
    }

    let version = pkg.installed_version_string();
    let old_config_version = pkg
        .config_version
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_default();
    session.log.action("configure", &name, &version, "");
    info!("setting up {} ({})", name, version);

    {
        let pkg = session.db.pkg_mut(id);
        pkg.status = PkgStatus::HalfConfigured;
    }
    session.db.record_update(id)?;
    session.log.status("half-configured", &name, &version);

    process_conffiles(session, id, prompter)?;

    let runner = session.runner();
    let result = runner.run(session.db.pkg(id), POSTINST, &["configure", &old_config_version]);
    if let Err(e) = result {
        let pkg = session.db.pkg_mut(id);
        pkg.eflag = Eflag::Reinstreq;
        session.db.record_update(id)?;
        return Err(e);
    }

    {
        let pkg = session.db.pkg_mut(id);
        pkg.eflag = Eflag::Ok;
        pkg.config_version = None;
        pkg.istobe = Istobe::Normal;
        pkg.status = if !pkg.triggers_pending.is_empty() {
            PkgStatus::TriggersPending
        } else if !pkg.triggers_awaited.is_empty() {
            PkgStatus::TriggersAwaited
        } else {
            PkgStatus::Installed
        };
    }
    session.db.record_update(id)?;
    let status = session.db.pkg(id).status;
    session.log.status(status.as_str(), &name, &version);
    Ok(())
}

/// Resolve every conffile of a package being configured
fn process_conffiles(
    session: &mut Session,
    id: PackageId,
    prompter: &mut dyn Prompter,
) -> Result<()> {
    let name = session.db.pkg(id).name.clone();
    let conffiles = session.db.pkg(id).installed.conffiles.clone();

    for (idx, cf) in conffiles.iter().enumerate() {
        let node = session.fsys.intern(&cf.path)?;
        let resolved = session.fsys.divert_resolve(&name, node);
        let disk = {
            let written = session.fsys.node(resolved).name.clone();
            session.disk_path(&written)
        };

        if cf.obsolete {
            conffile::retire_obsolete(&disk)?;
            continue;
        }

        let staged = disk.with_file_name(format!(
            "{}.dpkg-new",
            disk.file_name().and_then(|n| n.to_str()).unwrap_or_default()
        ));
        if !staged.exists() {
            // Nothing staged this run (reconfiguration without unpack)
            continue;
        }

        let old_hash = if cf.hash == "newconffile" {
            None
        } else {
            Some(cf.hash.as_str())
        };
        let force = session.force.clone();
        let outcome = conffile::process(&name, &disk, old_hash, &force, prompter)?;

        let pkg = session.db.pkg_mut(id);
        pkg.installed.conffiles[idx].hash = outcome.new_hash;
    }
    Ok(())
}

/// Process the deferred triggers of every package left pending, then
/// settle awaiters.
pub fn run_deferred_triggers(session: &mut Session) -> Result<u32> {
    let mut failures = 0;
    let pending: Vec<PackageId> = session
        .db
        .iter_ids()
        .filter(|&id| session.db.pkg(id).status == PkgStatus::TriggersPending)
        .collect();

    for id in pending {
        if session.abort_requested() {
            break;
        }
        let runner = session.runner();
        match session
            .trigproc
            .process(&mut session.db, &runner, &mut session.log, id)
        {
            Ok(_) => {
                session.db.record_update(id)?;
            }
            Err(e) => {
                warn!("trigger processing failed: {}", e);
                let pkg = session.db.pkg_mut(id);
                pkg.eflag = Eflag::Reinstreq;
                session.db.record_update(id)?;
                failures += 1;
            }
        }
    }

    // A target that processed everything releases its awaiters
    let names: Vec<String> = session
        .db
        .iter_ids()
        .map(|id| session.db.pkg(id).name.clone())
        .collect();
    for name in names {
        trigger::release_awaiters(&mut session.db, &name, &mut session.log);
    }
    Ok(failures)
}
