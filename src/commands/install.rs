// src/commands/install.rs

//! Operational subcommands: install/unpack, configure, remove/purge,
//! triggers-only. Each opens a session, converges interrupted state, runs
//! the requested operations and commits whatever was reached.

use anyhow::{bail, Context, Result};
use debpkg::conffile::StdioPrompter;
use debpkg::db::models::{PackageId, PkgStatus};
use debpkg::{archive, sched, Session, SessionOptions};
use std::path::PathBuf;
use tracing::error;

fn open_session(opts: &SessionOptions) -> Result<Session> {
    Session::open(opts.clone()).map_err(Into::into)
}

/// Finish a command: persist state, then surface any operation failures
fn finish(mut session: Session, failures: u32) -> Result<()> {
    session.commit().context("writing the database back")?;
    if failures > 0 {
        bail!(debpkg::Error::Script(format!(
            "{} operation(s) failed, see messages above",
            failures
        )));
    }
    Ok(())
}

/// Unpack archives; with `configure` also drive them to `installed`
pub fn cmd_install(archives: &[PathBuf], opts: &SessionOptions, configure: bool) -> Result<()> {
    let mut session = open_session(opts)?;
    sched::recover(&mut session)?;
    session.log.message(&format!(
        "startup archives {}",
        if configure { "install" } else { "unpack" }
    ));

    let mut unpacked: Vec<PackageId> = Vec::new();
    let mut failures = 0u32;

    for path in archives {
        if session.abort_requested() {
            break;
        }
        match archive::unpack(&mut session, path) {
            Ok(id) => unpacked.push(id),
            Err(e) => {
                error!("error processing archive {}: {}", path.display(), e);
                failures += 1;
                session.note_failure()?;
            }
        }
    }

    if configure {
        failures += sched::configure_queue(&mut session, unpacked, &mut StdioPrompter)?;
    }

    finish(session, failures)
}

/// Configure named packages, or everything pending
pub fn cmd_configure(packages: &[String], pending: bool, opts: &SessionOptions) -> Result<()> {
    if packages.is_empty() && !pending {
        bail!("configure needs package names or --pending");
    }

    let mut session = open_session(opts)?;
    sched::recover(&mut session)?;
    session.log.message("startup packages configure");

    let targets: Vec<PackageId> = if pending {
        session
            .db
            .iter_ids()
            .filter(|&id| {
                matches!(
                    session.db.pkg(id).status,
                    PkgStatus::Unpacked | PkgStatus::HalfConfigured
                )
            })
            .collect()
    } else {
        resolve_names(&session, packages)?
    };

    let failures = sched::configure_queue(&mut session, targets, &mut StdioPrompter)?;
    finish(session, failures)
}

/// Remove or purge named packages
pub fn cmd_remove(packages: &[String], purge: bool, opts: &SessionOptions) -> Result<()> {
    let mut session = open_session(opts)?;
    sched::recover(&mut session)?;
    session.log.message(&format!(
        "startup packages {}",
        if purge { "purge" } else { "remove" }
    ));

    let targets = resolve_names(&session, packages)?;
    let mut failures = 0u32;
    for id in targets {
        if session.abort_requested() {
            break;
        }
        if let Err(e) = sched::remove_package(&mut session, id, purge) {
            error!("error removing {}: {}", session.db.pkg(id).name, e);
            failures += 1;
            session.note_failure()?;
        }
    }

    failures += sched::run_deferred_triggers(&mut session)?;
    finish(session, failures)
}

/// Run deferred trigger processing only
pub fn cmd_triggers_only(packages: &[String], opts: &SessionOptions) -> Result<()> {
    let mut session = open_session(opts)?;
    session.log.message("startup packages triggers-only");

    let failures = if packages.is_empty() {
        sched::run_deferred_triggers(&mut session)?
    } else {
        let targets = resolve_names(&session, packages)?;
        let mut failures = 0u32;
        for id in targets {
            let runner = session.runner();
            match session
                .trigproc
                .process(&mut session.db, &runner, &mut session.log, id)
            {
                Ok(_) => session.db.record_update(id)?,
                Err(e) => {
                    error!("{}", e);
                    failures += 1;
                }
            }
        }
        failures
    };

    finish(session, failures)
}

fn resolve_names(session: &Session, names: &[String]) -> Result<Vec<PackageId>> {
    let mut out = Vec::new();
    for name in names {
        match session.db.find(name) {
            Some(id) => out.push(id),
            None => bail!("package '{}' is not in the database", name),
        }
    }
    Ok(out)
}
