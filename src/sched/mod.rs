// src/sched/mod.rs

//! The dependency scheduler: sequencing pending configure work, breaking
//! dependency cycles, and converging interrupted packages at startup.
//!
//! The work queue is retried in passes. `sincenothing` counts consecutive
//! deferrals; when a whole pass makes no progress the resolution strategy
//! escalates through `dependtry` levels: strict, then cycle breaking over
//! non-pre-depend edges, then trigger flushing, then forced configuration.
//! A pass that still cannot move fails the remaining set.

mod configure;
mod remove;

pub use configure::{configure_package, run_deferred_triggers};
pub use remove::remove_package;

use crate::conffile::Prompter;
use crate::db::models::{Eflag, PackageId, PkgStatus};
use crate::deps::{DepChecker, DepGroup, DepResult};
use crate::error::{Error, Result};
use crate::script::POSTRM;
use crate::session::Session;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

/// Escalation ceiling: strict, break-cycles, flush-triggers, force
const MAX_DEPENDTRY: u32 = 4;

/// Configure every package in `targets`, ordering by dependencies.
/// Returns the number of packages that failed.
pub fn configure_queue(
    session: &mut Session,
    targets: Vec<PackageId>,
    prompter: &mut dyn Prompter,
) -> Result<u32> {
    let mut queue: VecDeque<PackageId> = targets
        .into_iter()
        .filter(|&id| {
            matches!(
                session.db.pkg(id).status,
                PkgStatus::Unpacked | PkgStatus::HalfConfigured
            )
        })
        .collect();

    let mut failures = 0u32;
    let mut dependtry = 1u32;
    let mut sincenothing = 0u32;
    let mut broken_edges: HashSet<(PackageId, PackageId)> = HashSet::new();

    while let Some(id) = queue.pop_front() {
        if session.abort_requested() {
            warn!("interrupted, stopping before the next package");
            return Err(Error::Interrupted);
        }
        if !matches!(
            session.db.pkg(id).status,
            PkgStatus::Unpacked | PkgStatus::HalfConfigured
        ) {
            continue;
        }

        let pending: HashSet<PackageId> = queue.iter().copied().chain([id]).collect();
        let verdict = deps_verdict(session, id, &pending, &broken_edges);

        let proceed = match verdict {
            Verdict::Ready => true,
            Verdict::Deferred(_) if dependtry >= MAX_DEPENDTRY => {
                warn!(
                    "configuring {} despite unsatisfied dependencies",
                    session.db.pkg(id).name
                );
                true
            }
            Verdict::Deferred(_) => {
                sincenothing += 1;
                queue.push_back(id);
                if sincenothing > queue.len() as u32 + 1 {
                    dependtry += 1;
                    sincenothing = 0;
                    debug!("no progress, escalating to dependtry {}", dependtry);
                    if dependtry == 2 {
                        break_cycles(session, &queue, &mut broken_edges);
                    }
                    if dependtry == 3 {
                        run_deferred_triggers(session)?;
                    }
                    if dependtry > MAX_DEPENDTRY {
                        return fail_remaining(session, queue, failures);
                    }
                }
                continue;
            }
            Verdict::Broken(reason) => {
                let err = Error::Depends(format!(
                    "dependency problems prevent configuration of {}:\n{}",
                    session.db.pkg(id).name,
                    reason.trim_end()
                ));
                let forced = session.force.depends || session.force.configure_any;
                match session.force.gate(forced, err) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("{}", e);
                        failures += 1;
                        session.note_failure()?;
                        false
                    }
                }
            }
        };

        if !proceed {
            continue;
        }

        sincenothing = 0;
        match configure_package(session, id, prompter) {
            Ok(()) => {}
            Err(e) => {
                warn!("error configuring {}: {}", session.db.pkg(id).name, e);
                failures += 1;
                session.note_failure()?;
            }
        }
    }

    failures += run_deferred_triggers(session)?;
    Ok(failures)
}

enum Verdict {
    Ready,
    Deferred(String),
    Broken(String),
}

/// Evaluate a pending package's depends (and pre-depends) for configure
fn deps_verdict(
    session: &Session,
    id: PackageId,
    pending: &HashSet<PackageId>,
    broken_edges: &HashSet<(PackageId, PackageId)>,
) -> Verdict {
    let checker = DepChecker::new(&session.db, &session.native_arch);
    let pkg = session.db.pkg(id);
    let mut reason = String::new();
    let mut worst = DepResult::Ok;

    for group in pkg.installed.depends.iter().chain(&pkg.installed.pre_depends) {
        let mut local = String::new();
        let result = checker.group(&pkg.name, "depends on", group, &mut local);
        if result == DepResult::Ok {
            continue;
        }
        // A cycle-broken edge is taken on faith for ordering purposes
        if group_edge_broken(session, id, group, pending, broken_edges) {
            debug!("ignoring cycle-broken dependency of {}", pkg.name);
            continue;
        }
        reason.push_str(&local);
        if result == DepResult::Halt {
            worst = DepResult::Halt;
        } else if worst == DepResult::Ok {
            worst = DepResult::Defer;
        }
    }

    match worst {
        DepResult::Ok => Verdict::Ready,
        DepResult::Defer => Verdict::Deferred(reason),
        DepResult::Halt => Verdict::Broken(reason),
    }
}

fn group_edge_broken(
    session: &Session,
    consumer: PackageId,
    group: &DepGroup,
    pending: &HashSet<PackageId>,
    broken_edges: &HashSet<(PackageId, PackageId)>,
) -> bool {
    group.alternatives.iter().any(|atom| {
        resolve_target(session, &atom.package, pending)
            .map(|producer| broken_edges.contains(&(consumer, producer)))
            .unwrap_or(false)
    })
}

/// Map a dependency atom onto a pending package, through Provides if needed
fn resolve_target(
    session: &Session,
    dep_name: &str,
    pending: &HashSet<PackageId>,
) -> Option<PackageId> {
    if let Some(id) = session.db.find(dep_name) {
        if pending.contains(&id) {
            return Some(id);
        }
    }
    pending.iter().copied().find(|&id| {
        session
            .db
            .pkg(id)
            .installed
            .provides
            .iter()
            .flat_map(|g| g.alternatives.iter())
            .any(|a| a.package == dep_name)
    })
}

/// Tri-color DFS over the pending set; on finding a cycle, break one
/// non-pre-depend edge by deferring its consumer past the producer.
fn break_cycles(
    session: &Session,
    queue: &VecDeque<PackageId>,
    broken_edges: &mut HashSet<(PackageId, PackageId)>,
) {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let pending: HashSet<PackageId> = queue.iter().copied().collect();

    // consumer -> (producer, is_predep)
    let mut edges: HashMap<PackageId, Vec<(PackageId, bool)>> = HashMap::new();
    for &id in &pending {
        let pkg = session.db.pkg(id);
        let mut out = Vec::new();
        for (groups, predep) in [(&pkg.installed.depends, false), (&pkg.installed.pre_depends, true)]
        {
            for group in groups.iter() {
                for atom in &group.alternatives {
                    if let Some(target) = resolve_target(session, &atom.package, &pending) {
                        if target != id {
                            out.push((target, predep));
                        }
                    }
                }
            }
        }
        edges.insert(id, out);
    }

    let mut colors: HashMap<PackageId, Color> = pending.iter().map(|&id| (id, Color::White)).collect();
    let mut stack: Vec<PackageId> = Vec::new();

    fn visit(
        node: PackageId,
        edges: &HashMap<PackageId, Vec<(PackageId, bool)>>,
        colors: &mut HashMap<PackageId, Color>,
        stack: &mut Vec<PackageId>,
        broken: &mut HashSet<(PackageId, PackageId)>,
        session: &Session,
    ) {
        colors.insert(node, Color::Gray);
        stack.push(node);
        if let Some(out) = edges.get(&node) {
            for &(target, predep) in out {
                match colors.get(&target).copied() {
                    Some(Color::White) => {
                        visit(target, edges, colors, stack, broken, session);
                    }
                    Some(Color::Gray) => {
                        // Cycle found: walk it and break a depends edge
                        let start = stack.iter().position(|&n| n == target).unwrap_or(0);
                        let cycle: Vec<PackageId> = stack[start..].to_vec();
                        let mut chosen = None;
                        for window in cycle.windows(2) {
                            let (from, to) = (window[0], window[1]);
                            let is_predep = edges
                                .get(&from)
                                .map(|es| es.iter().any(|&(t, p)| t == to && p))
                                .unwrap_or(false);
                            if !is_predep {
                                chosen = Some((from, to));
                                break;
                            }
                        }
                        // Close the loop edge: last -> first
                        if chosen.is_none() && !predep {
                            chosen = Some((node, target));
                        }
                        match chosen {
                            Some((from, to)) => {
                                info!(
                                    "dependency cycle found, breaking {} -> {}",
                                    session.db.pkg(from).name,
                                    session.db.pkg(to).name
                                );
                                broken.insert((from, to));
                            }
                            None => {
                                warn!("dependency cycle of pre-depends cannot be broken");
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        stack.pop();
        colors.insert(node, Color::Black);
    }

    let nodes: Vec<PackageId> = pending.iter().copied().collect();
    for node in nodes {
        if colors.get(&node) == Some(&Color::White) {
            visit(node, &edges, &mut colors, &mut stack, broken_edges, session);
        }
    }
}

/// Report and fail everything the scheduler could not place
fn fail_remaining(
    session: &mut Session,
    queue: VecDeque<PackageId>,
    mut failures: u32,
) -> Result<u32> {
    for id in queue {
        let name = session.db.pkg(id).name.clone();
        warn!("package {} could not be configured this run", name);
        failures += 1;
        session.note_failure()?;
    }
    Ok(failures)
}

/// Startup convergence: every package found in a half-state is driven to a
/// defined point before new work begins.
pub fn recover(session: &mut Session) -> Result<()> {
    let broken: Vec<PackageId> = session
        .db
        .iter_ids()
        .filter(|&id| session.db.pkg(id).status == PkgStatus::HalfInstalled)
        .collect();

    for id in broken {
        let pkg = session.db.pkg(id);
        let name = pkg.name.clone();
        let version = pkg.installed_version_string();
        warn!(
            "package {} was interrupted mid-installation, recovering",
            name
        );

        let runner = session.runner();
        let _ = runner.run(session.db.pkg(id), POSTRM, &["abort-upgrade", &version]);

        // Remove any leftover staged siblings of its recorded files
        let files = session.db.pkg(id).files.clone();
        for node in files {
            let node_name = session.fsys.node(node).name.clone();
            let staged = session.disk_path(&format!("{}.dpkg-new", node_name));
            let _ = std::fs::remove_file(&staged);
        }

        let pkg = session.db.pkg_mut(id);
        if pkg.installed.version.is_some() {
            // The commit had happened (or mostly so): treat as unpacked and
            // let configuration finish the job.
            pkg.status = PkgStatus::Unpacked;
            pkg.eflag = Eflag::Reinstreq;
        } else {
            pkg.status = PkgStatus::NotInstalled;
            pkg.eflag = Eflag::Ok;
        }
        let status = pkg.status.as_str();
        session.db.record_update(id)?;
        session.log.status(status, &name, &version);
    }
    Ok(())
}

/// An audit finding: a package in a state needing attention
#[derive(Debug, Clone)]
pub struct AuditFinding {
    pub package: String,
    pub version: String,
    pub problem: &'static str,
}

/// Scan for packages in broken or intermediate states
pub fn audit(session: &Session) -> Vec<AuditFinding> {
    let mut findings = Vec::new();
    for id in session.db.iter_ids() {
        let pkg = session.db.pkg(id);
        let problem = if pkg.eflag == Eflag::Reinstreq {
            Some("requires reinstallation")
        } else {
            match pkg.status {
                PkgStatus::HalfInstalled => Some("only half installed"),
                PkgStatus::Unpacked => Some("unpacked but not configured"),
                PkgStatus::HalfConfigured => Some("configuration was interrupted"),
                PkgStatus::TriggersPending => Some("triggers are pending"),
                PkgStatus::TriggersAwaited => Some("awaiting trigger processing"),
                _ => None,
            }
        };
        if let Some(problem) = problem {
            findings.push(AuditFinding {
                package: pkg.name.clone(),
                version: pkg.installed_version_string(),
                problem,
            });
        }
    }
    findings
}
