// src/trigger/mod.rs

//! The trigger engine: deferred activation and deduplicated processing of
//! explicit and file triggers.
//!
//! Interests are declared by packages at unpack time. Activations accumulate
//! into the target package's pending set (`installed` ->
//! `triggers-pending`); activating packages that requested await semantics
//! park in `triggers-awaited` until the target processes. Processing runs
//! `postinst triggered <names...>` once per target with the accumulated
//! names, bounded per session to break activation cycles.

use crate::db::models::{PackageId, PkgStatus};
use crate::db::{paths, Database};
use crate::error::{Error, Result};
use crate::log::ActionLog;
use crate::script::{ScriptRunner, POSTINST};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// Re-entries allowed per package per session before a cycle is declared
pub const DEFAULT_CYCLE_BOUND: u32 = 50;

/// One package's interest in a named trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interest {
    pub package: String,
    /// Whether activating packages should await this target
    pub await_trigger: bool,
}

/// One package's interest in a path prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInterest {
    pub path: String,
    pub package: String,
    pub await_trigger: bool,
}

/// A directive from a package's triggers control member
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Interest { name: String, await_trigger: bool },
    Activate { name: String, await_trigger: bool },
}

/// Parse a triggers control member: one directive per line, `#` comments
pub fn parse_directives(text: &str) -> Result<Vec<Directive>> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut words = line.split_ascii_whitespace();
        let keyword = words.next().unwrap();
        let name = words
            .next()
            .ok_or_else(|| Error::Trigger(format!("trigger directive '{}' has no name", line)))?;
        if words.next().is_some() {
            return Err(Error::Trigger(format!(
                "junk after trigger directive '{}'",
                line
            )));
        }
        let directive = match keyword {
            "interest" | "interest-await" => Directive::Interest {
                name: name.to_string(),
                await_trigger: true,
            },
            "interest-noawait" => Directive::Interest {
                name: name.to_string(),
                await_trigger: false,
            },
            "activate" | "activate-await" => Directive::Activate {
                name: name.to_string(),
                await_trigger: true,
            },
            "activate-noawait" => Directive::Activate {
                name: name.to_string(),
                await_trigger: false,
            },
            other => {
                return Err(Error::Trigger(format!(
                    "unknown trigger directive '{}'",
                    other
                )))
            }
        };
        out.push(directive);
    }
    Ok(out)
}

/// Session-wide trigger interest registry with on-disk persistence
#[derive(Debug, Default)]
pub struct TriggerState {
    file_interests: Vec<FileInterest>,
    explicit: BTreeMap<String, Vec<Interest>>,
    /// Activations with no interested package yet
    unincorp: Vec<String>,
}

impl TriggerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the registry from the triggers directory
    pub fn load(admin: &Path) -> Result<Self> {
        let mut state = Self::new();
        let dir = paths::triggers_dir(admin);
        if !dir.exists() {
            return Ok(state);
        }

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let text = fs::read_to_string(entry.path())?;
            match name.as_str() {
                "File" => {
                    for line in text.lines() {
                        let line = line.trim_end();
                        if line.is_empty() {
                            continue;
                        }
                        let (path, spec) = line.rsplit_once(' ').ok_or_else(|| {
                            Error::Trigger(format!("malformed file-trigger record '{}'", line))
                        })?;
                        let (package, await_trigger) = parse_pkg_spec(spec);
                        state.file_interests.push(FileInterest {
                            path: path.to_string(),
                            package,
                            await_trigger,
                        });
                    }
                }
                "Unincorp" => {
                    state.unincorp =
                        text.lines().filter(|l| !l.is_empty()).map(String::from).collect();
                }
                trigger => {
                    let interests = text
                        .lines()
                        .filter(|l| !l.is_empty())
                        .map(|l| {
                            let (package, await_trigger) = parse_pkg_spec(l.trim_end());
                            Interest {
                                package,
                                await_trigger,
                            }
                        })
                        .collect();
                    state.explicit.insert(trigger.to_string(), interests);
                }
            }
        }
        Ok(state)
    }

    /// Persist the registry, removing files for triggers with no interests
    pub fn save(&self, admin: &Path) -> Result<()> {
        let dir = paths::triggers_dir(admin);
        fs::create_dir_all(&dir)?;

        // Drop per-trigger files whose interest set vanished
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != "File"
                && name != "Unincorp"
                && !self.explicit.contains_key(name.as_str())
            {
                fs::remove_file(entry.path())?;
            }
        }

        let mut out = fs::File::create(paths::triggers_file_interests(admin))?;
        for fi in &self.file_interests {
            writeln!(out, "{} {}", fi.path, format_pkg_spec(&fi.package, fi.await_trigger))?;
        }
        out.sync_all()?;

        let mut out = fs::File::create(paths::triggers_unincorp(admin))?;
        for name in &self.unincorp {
            writeln!(out, "{}", name)?;
        }
        out.sync_all()?;

        for (trigger, interests) in &self.explicit {
            let mut out = fs::File::create(paths::triggers_interest_file(admin, trigger))?;
            for i in interests {
                writeln!(out, "{}", format_pkg_spec(&i.package, i.await_trigger))?;
            }
            out.sync_all()?;
        }
        Ok(())
    }

    /// Replace a package's declared interests with a fresh directive set.
    /// Returns the activate directives for the caller to fire after unpack.
    pub fn set_package_interests(
        &mut self,
        pkg: &str,
        directives: &[Directive],
    ) -> Vec<(String, bool)> {
        self.remove_package(pkg);
        let mut activations = Vec::new();
        for d in directives {
            match d {
                Directive::Interest { name, await_trigger } => {
                    if name.starts_with('/') {
                        self.file_interests.push(FileInterest {
                            path: name.clone(),
                            package: pkg.to_string(),
                            await_trigger: *await_trigger,
                        });
                    } else {
                        self.explicit.entry(name.clone()).or_default().push(Interest {
                            package: pkg.to_string(),
                            await_trigger: *await_trigger,
                        });
                    }
                }
                Directive::Activate { name, await_trigger } => {
                    activations.push((name.clone(), *await_trigger));
                }
            }
        }
        activations
    }

    /// Remove every interest a package declared
    pub fn remove_package(&mut self, pkg: &str) {
        self.file_interests.retain(|fi| fi.package != pkg);
        self.explicit.retain(|_, interests| {
            interests.retain(|i| i.package != pkg);
            !interests.is_empty()
        });
    }

    /// Interests whose path prefix covers the given canonical path
    pub fn interested_in_path(&self, path: &str) -> Vec<FileInterest> {
        self.file_interests
            .iter()
            .filter(|fi| path == fi.path || path.starts_with(&format!("{}/", fi.path)))
            .cloned()
            .collect()
    }

    pub fn interested_in(&self, trigger: &str) -> &[Interest] {
        self.explicit
            .get(trigger)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn unincorporated(&self) -> &[String] {
        &self.unincorp
    }
}

fn parse_pkg_spec(spec: &str) -> (String, bool) {
    match spec.strip_suffix("/noawait") {
        Some(pkg) => (pkg.to_string(), false),
        None => (spec.to_string(), true),
    }
}

fn format_pkg_spec(pkg: &str, await_trigger: bool) -> String {
    if await_trigger {
        pkg.to_string()
    } else {
        format!("{}/noawait", pkg)
    }
}

/// Activate one trigger (explicit name or absolute path) against the
/// database. `activator` is the package whose operation caused it.
pub fn activate(
    db: &mut Database,
    state: &mut TriggerState,
    name: &str,
    activator: Option<PackageId>,
    log: &mut ActionLog,
) -> Result<()> {
    let targets: Vec<(String, bool)> = if name.starts_with('/') {
        state
            .interested_in_path(name)
            .into_iter()
            .map(|fi| (fi.package, fi.await_trigger))
            .collect()
    } else {
        state
            .interested_in(name)
            .iter()
            .map(|i| (i.package.clone(), i.await_trigger))
            .collect()
    };

    if targets.is_empty() {
        if !name.starts_with('/') && !state.unincorp.contains(&name.to_string()) {
            debug!("trigger {} has no interested package yet", name);
            state.unincorp.push(name.to_string());
        }
        return Ok(());
    }

    for (target_name, await_trigger) in targets {
        let target_id = match db.find(&target_name) {
            Some(id) => id,
            None => {
                warn!("trigger interest by unknown package {}", target_name);
                continue;
            }
        };
        if Some(target_id) == activator {
            continue;
        }

        let target = db.pkg_mut(target_id);
        if !matches!(
            target.status,
            PkgStatus::Installed | PkgStatus::TriggersPending | PkgStatus::TriggersAwaited
        ) {
            debug!(
                "not activating trigger {} for {} in state {}",
                name, target.name, target.status
            );
            continue;
        }

        if !target.triggers_pending.iter().any(|t| t.as_str() == name) {
            target.triggers_pending.push(name.to_string());
        }
        if target.status == PkgStatus::Installed {
            target.status = PkgStatus::TriggersPending;
            let version = target.installed_version_string();
            let tname = target.name.clone();
            log.status("triggers-pending", &tname, &version);
        }

        if await_trigger {
            if let Some(activator_id) = activator {
                let target_name = db.pkg(target_id).name.clone();
                let activator_pkg = db.pkg_mut(activator_id);
                if !activator_pkg.triggers_awaited.contains(&target_name) {
                    activator_pkg.triggers_awaited.push(target_name);
                }
            }
        }
    }
    Ok(())
}

/// Activate file triggers for every path written during an unpack
pub fn activate_for_paths<'a>(
    db: &mut Database,
    state: &mut TriggerState,
    paths: impl IntoIterator<Item = &'a str>,
    activator: Option<PackageId>,
    log: &mut ActionLog,
) -> Result<()> {
    for path in paths {
        activate(db, state, path, activator, log)?;
    }
    Ok(())
}

/// Bounded trigger processing for one session
pub struct TrigProc {
    counts: HashMap<PackageId, u32>,
    bound: u32,
}

impl Default for TrigProc {
    fn default() -> Self {
        Self::new(DEFAULT_CYCLE_BOUND)
    }
}

impl TrigProc {
    pub fn new(bound: u32) -> Self {
        Self {
            counts: HashMap::new(),
            bound,
        }
    }

    /// Run the pending triggers of one package. Returns false when the
    /// cycle bound left them deferred to the next session.
    pub fn process(
        &mut self,
        db: &mut Database,
        runner: &ScriptRunner,
        log: &mut ActionLog,
        id: PackageId,
    ) -> Result<bool> {
        let pending = db.pkg(id).triggers_pending.clone();
        if pending.is_empty() {
            return Ok(true);
        }

        let entry = self.counts.entry(id).or_insert(0);
        *entry += 1;
        if *entry > self.bound {
            let pkg = db.pkg(id);
            warn!(
                "package {} re-triggered more than {} times this session, deferring: {}",
                pkg.name,
                self.bound,
                pending.join(" ")
            );
            return Ok(false);
        }

        let pkg = db.pkg(id);
        let name = pkg.name.clone();
        let version = pkg.installed_version_string();
        log.action("trigproc", &name, &version, &pending.join(" "));

        let joined = pending.join(" ");
        runner.run(db.pkg(id), POSTINST, &["triggered", &joined])?;

        // Success: this batch is done; activations that arrived while the
        // script ran stay pending for another round.
        let pkg = db.pkg_mut(id);
        pkg.triggers_pending.retain(|t| !pending.contains(t));
        if pkg.triggers_pending.is_empty() {
            pkg.status = if pkg.triggers_awaited.is_empty() {
                PkgStatus::Installed
            } else {
                PkgStatus::TriggersAwaited
            };
            let status = pkg.status.as_str();
            log.status(status, &name, &version);
        }

        release_awaiters(db, &name, log);
        Ok(true)
    }
}

/// After `target_name` processed its triggers, packages awaiting it may
/// settle into their final state.
pub fn release_awaiters(db: &mut Database, target_name: &str, log: &mut ActionLog) {
    // Only release once the target has nothing further pending
    if let Some(target_id) = db.find(target_name) {
        if !db.pkg(target_id).triggers_pending.is_empty() {
            return;
        }
    }
    for id in db.iter_ids().collect::<Vec<_>>() {
        let pkg = db.pkg_mut(id);
        let before = pkg.triggers_awaited.len();
        pkg.triggers_awaited.retain(|t| t.as_str() != target_name);
        if pkg.triggers_awaited.len() != before
            && pkg.triggers_awaited.is_empty()
            && pkg.status == PkgStatus::TriggersAwaited
        {
            pkg.status = if pkg.triggers_pending.is_empty() {
                PkgStatus::Installed
            } else {
                PkgStatus::TriggersPending
            };
            let name = pkg.name.clone();
            let version = pkg.installed_version_string();
            let status = pkg.status.as_str();
            log.status(status, &name, &version);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Want;
    use crate::version::Version;
    use tempfile::TempDir;

    fn test_db() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::load(dir.path()).unwrap();
        (dir, db)
    }

    fn add_installed(db: &mut Database, name: &str) -> PackageId {
        let id = db.find_or_create(name, "amd64");
        let pkg = db.pkg_mut(id);
        pkg.want = Want::Install;
        pkg.status = PkgStatus::Installed;
        pkg.installed.version = Some(Version::parse("1.0").unwrap());
        id
    }

    #[test]
    fn test_parse_directives() {
        let directives = parse_directives(
            "# comment\n\
             interest /usr/share/icons\n\
             interest-noawait ldconfig\n\
             activate menu-update\n",
        )
        .unwrap();
        assert_eq!(directives.len(), 3);
        assert_eq!(
            directives[0],
            Directive::Interest {
                name: "/usr/share/icons".to_string(),
                await_trigger: true
            }
        );
        assert_eq!(
            directives[1],
            Directive::Interest {
                name: "ldconfig".to_string(),
                await_trigger: false
            }
        );
        assert!(matches!(directives[2], Directive::Activate { .. }));
    }

    #[test]
    fn test_parse_directives_rejects_junk() {
        assert!(parse_directives("interest\n").is_err());
        assert!(parse_directives("interest a b\n").is_err());
        assert!(parse_directives("frob x\n").is_err());
    }

    #[test]
    fn test_path_prefix_matching() {
        let mut state = TriggerState::new();
        state.set_package_interests(
            "iconcache",
            &[Directive::Interest {
                name: "/usr/share/icons".to_string(),
                await_trigger: true,
            }],
        );

        assert_eq!(state.interested_in_path("/usr/share/icons/hicolor/x.png").len(), 1);
        assert_eq!(state.interested_in_path("/usr/share/icons").len(), 1);
        assert!(state.interested_in_path("/usr/share/iconsets/x").is_empty());
        assert!(state.interested_in_path("/usr/share/doc/x").is_empty());
    }

    #[test]
    fn test_activation_marks_target_pending() {
        let (_dir, mut db) = test_db();
        let target = add_installed(&mut db, "iconcache");

        let mut state = TriggerState::new();
        state.set_package_interests(
            "iconcache",
            &[Directive::Interest {
                name: "/usr/share/icons".to_string(),
                await_trigger: true,
            }],
        );

        let mut log = ActionLog::disabled();
        activate(
            &mut db,
            &mut state,
            "/usr/share/icons/hicolor/app.png",
            None,
            &mut log,
        )
        .unwrap();

        let pkg = db.pkg(target);
        assert_eq!(pkg.status, PkgStatus::TriggersPending);
        assert_eq!(pkg.triggers_pending, vec!["/usr/share/icons/hicolor/app.png"]);
    }

    #[test]
    fn test_activation_dedups() {
        let (_dir, mut db) = test_db();
        let target = add_installed(&mut db, "ldso");

        let mut state = TriggerState::new();
        state.set_package_interests(
            "ldso",
            &[Directive::Interest {
                name: "ldconfig".to_string(),
                await_trigger: false,
            }],
        );

        let mut log = ActionLog::disabled();
        activate(&mut db, &mut state, "ldconfig", None, &mut log).unwrap();
        activate(&mut db, &mut state, "ldconfig", None, &mut log).unwrap();
        assert_eq!(db.pkg(target).triggers_pending, vec!["ldconfig"]);
    }

    #[test]
    fn test_await_parks_activator() {
        let (_dir, mut db) = test_db();
        add_installed(&mut db, "iconcache");
        let activator = add_installed(&mut db, "someapp");

        let mut state = TriggerState::new();
        state.set_package_interests(
            "iconcache",
            &[Directive::Interest {
                name: "cache-update".to_string(),
                await_trigger: true,
            }],
        );

        let mut log = ActionLog::disabled();
        activate(&mut db, &mut state, "cache-update", Some(activator), &mut log).unwrap();
        assert_eq!(db.pkg(activator).triggers_awaited, vec!["iconcache"]);
    }

    #[test]
    fn test_unincorporated_activation_recorded() {
        let (_dir, mut db) = test_db();
        let mut state = TriggerState::new();
        let mut log = ActionLog::disabled();
        activate(&mut db, &mut state, "nobody-cares", None, &mut log).unwrap();
        assert_eq!(state.unincorporated(), &["nobody-cares".to_string()]);
    }

    #[test]
    fn test_state_persistence_roundtrip() {
        let dir = TempDir::new().unwrap();
        Database::ensure_layout(dir.path()).unwrap();

        let mut state = TriggerState::new();
        state.set_package_interests(
            "iconcache",
            &[
                Directive::Interest {
                    name: "/usr/share/icons".to_string(),
                    await_trigger: true,
                },
                Directive::Interest {
                    name: "cache-update".to_string(),
                    await_trigger: false,
                },
            ],
        );
        state.unincorp.push("orphan".to_string());
        state.save(dir.path()).unwrap();

        let reloaded = TriggerState::load(dir.path()).unwrap();
        assert_eq!(reloaded.interested_in_path("/usr/share/icons/x").len(), 1);
        assert_eq!(reloaded.interested_in("cache-update").len(), 1);
        assert!(!reloaded.interested_in("cache-update")[0].await_trigger);
        assert_eq!(reloaded.unincorporated(), &["orphan".to_string()]);

        // Removing the package and saving again drops its interest file
        let mut state = reloaded;
        state.remove_package("iconcache");
        state.save(dir.path()).unwrap();
        assert!(!paths::triggers_interest_file(dir.path(), "cache-update").exists());
    }

    #[test]
    fn test_release_awaiters() {
        let (_dir, mut db) = test_db();
        let target = add_installed(&mut db, "iconcache");
        let waiter = add_installed(&mut db, "someapp");
        db.pkg_mut(waiter).status = PkgStatus::TriggersAwaited;
        db.pkg_mut(waiter).triggers_awaited = vec!["iconcache".to_string()];
        db.pkg_mut(target).triggers_pending.clear();

        let mut log = ActionLog::disabled();
        release_awaiters(&mut db, "iconcache", &mut log);
        assert_eq!(db.pkg(waiter).status, PkgStatus::Installed);
        assert!(db.pkg(waiter).triggers_awaited.is_empty());
    }

    #[test]
    fn test_cycle_bound_defers() {
        let (dir, mut db) = test_db();
        let target = add_installed(&mut db, "looper");
        db.pkg_mut(target).status = PkgStatus::TriggersPending;
        db.pkg_mut(target).triggers_pending = vec!["spin".to_string()];

        let runner = ScriptRunner::new(dir.path(), dir.path());
        let mut log = ActionLog::disabled();
        let mut trigproc = TrigProc::new(2);

        // No postinst installed: each round "succeeds" and we re-arm
        for _ in 0..2 {
            assert!(trigproc.process(&mut db, &runner, &mut log, target).unwrap());
            db.pkg_mut(target).status = PkgStatus::TriggersPending;
            db.pkg_mut(target).triggers_pending = vec!["spin".to_string()];
        }
        // Third round exceeds the bound and defers
        assert!(!trigproc.process(&mut db, &runner, &mut log, target).unwrap());
        assert_eq!(db.pkg(target).triggers_pending, vec!["spin"]);
    }
}
