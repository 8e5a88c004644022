// src/deps/check.rs

//! Evaluation of dependency expressions against the package database.
//!
//! The checker classifies every group as satisfied (`Ok`), satisfiable by
//! operations already scheduled this run (`Defer`), or permanently violated
//! (`Halt`), and accumulates a human-readable reason buffer for reporting.

use super::{DepAtom, DepGroup};
use crate::db::models::{Istobe, Package, PackageBinary, PkgStatus};
use crate::db::Database;
use crate::version::Version;
use std::fmt::Write as _;

/// Outcome of evaluating one group or expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepResult {
    /// Satisfied now
    Ok,
    /// Unsatisfied, but a pending configure may fix it
    Defer,
    /// Permanently violated
    Halt,
}

impl DepResult {
    fn worst(self, other: DepResult) -> DepResult {
        use DepResult::*;
        match (self, other) {
            (Halt, _) | (_, Halt) => Halt,
            (Defer, _) | (_, Defer) => Defer,
            _ => Ok,
        }
    }
}

/// Which metadata slot to evaluate against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepView {
    Installed,
    Available,
}

/// Dependency checker bound to one database and host architecture
pub struct DepChecker<'a> {
    db: &'a Database,
    host_arch: &'a str,
}

impl<'a> DepChecker<'a> {
    pub fn new(db: &'a Database, host_arch: &'a str) -> Self {
        Self { db, host_arch }
    }

    /// Evaluate a conjunction of groups. The reason buffer receives one line
    /// per unsatisfied group.
    pub fn expression(
        &self,
        owner: &str,
        what: &str,
        groups: &[DepGroup],
        reason: &mut String,
    ) -> DepResult {
        let mut result = DepResult::Ok;
        for group in groups {
            let g = self.group(owner, what, group, reason);
            result = result.worst(g);
        }
        result
    }

    /// Evaluate one or-group
    pub fn group(
        &self,
        owner: &str,
        what: &str,
        group: &DepGroup,
        reason: &mut String,
    ) -> DepResult {
        let mut best: Option<DepResult> = None;
        let mut local = String::new();

        for atom in &group.alternatives {
            if !atom.applies_on(self.host_arch) {
                continue;
            }
            match self.atom(atom, &mut local) {
                DepResult::Ok => return DepResult::Ok,
                other => {
                    best = Some(match best {
                        // An or-group is as good as its best alternative
                        None => other,
                        Some(prev) => {
                            if other == DepResult::Defer {
                                DepResult::Defer
                            } else {
                                prev
                            }
                        }
                    });
                }
            }
        }

        match best {
            // Every alternative was restricted away
            None => DepResult::Ok,
            Some(result) => {
                let _ = writeln!(reason, " {} {} {}; however:{}", owner, what, group, local);
                result
            }
        }
    }

    fn atom(&self, atom: &DepAtom, reason: &mut String) -> DepResult {
        let mut best = DepResult::Halt;
        let mut seen_candidate = false;

        if let Some(id) = self.db.find(&atom.package) {
            let pkg = self.db.pkg(id);
            seen_candidate = pkg.status != PkgStatus::NotInstalled;
            match self.real_package(atom, pkg) {
                DepResult::Ok => return DepResult::Ok,
                r => best = best.prefer(r),
            }
        }

        // Virtual names: any package providing the atom's name counts
        for id in self.db.iter_ids() {
            let provider = self.db.pkg(id);
            if provider.name == atom.package {
                continue;
            }
            for group in &provider.installed.provides {
                for provide in &group.alternatives {
                    if provide.package != atom.package {
                        continue;
                    }
                    seen_candidate = true;
                    match self.provider(atom, provider, provide.constraint.as_ref().map(|(_, v)| v))
                    {
                        DepResult::Ok => return DepResult::Ok,
                        r => best = best.prefer(r),
                    }
                }
            }
        }

        if !seen_candidate {
            let _ = write!(reason, "\n  package {} is not installed", atom.package);
        } else {
            let _ = write!(
                reason,
                "\n  package {} is not ready or does not satisfy {}",
                atom.package, atom
            );
        }
        best
    }

    fn real_package(&self, atom: &DepAtom, pkg: &Package) -> DepResult {
        let version = match &pkg.installed.version {
            Some(v) => v,
            None => return DepResult::Halt,
        };
        if !atom.version_matches(version) {
            return DepResult::Halt;
        }
        self.state_result(pkg)
    }

    fn provider(&self, atom: &DepAtom, pkg: &Package, provided: Option<&Version>) -> DepResult {
        if atom.constraint.is_some() {
            // Versioned dependencies match only versioned provides
            match provided {
                Some(v) if atom.version_matches(v) => {}
                _ => return DepResult::Halt,
            }
        }
        self.state_result(pkg)
    }

    fn state_result(&self, pkg: &Package) -> DepResult {
        if pkg.istobe == Istobe::Remove || pkg.istobe == Istobe::Deconfigure {
            return DepResult::Halt;
        }
        match pkg.status {
            PkgStatus::Installed | PkgStatus::TriggersPending | PkgStatus::TriggersAwaited => {
                DepResult::Ok
            }
            PkgStatus::Unpacked | PkgStatus::HalfConfigured => DepResult::Defer,
            _ => DepResult::Halt,
        }
    }

    /// Does `atom` (a Conflicts/Breaks/Replaces clause) match the package
    /// described by `name` and `bin`?
    pub fn atom_targets(&self, atom: &DepAtom, name: &str, bin: &PackageBinary) -> bool {
        if atom.package == name {
            match &bin.version {
                Some(v) => return atom.version_matches(v),
                None => return atom.constraint.is_none(),
            }
        }
        // Unversioned clauses also hit providers of the name
        if atom.constraint.is_none() {
            for group in &bin.provides {
                for provide in &group.alternatives {
                    if provide.package == atom.package {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Check an incoming package against installed Conflicts/Breaks in both
    /// directions. Returns the first violation found.
    pub fn coinstall_violation(
        &self,
        new_name: &str,
        new_bin: &PackageBinary,
    ) -> Option<ConflictViolation> {
        for id in self.db.iter_ids() {
            let other = self.db.pkg(id);
            if other.name == new_name || other.istobe == Istobe::Remove {
                continue;
            }

            let other_present = other.status >= PkgStatus::HalfInstalled;
            let other_configured = other.status >= PkgStatus::TriggersAwaited;
            if !other_present {
                continue;
            }

            // The incoming package objects to the installed one
            for group in &new_bin.conflicts {
                for atom in &group.alternatives {
                    if self.atom_targets(atom, &other.name, &other.installed) {
                        return Some(ConflictViolation {
                            kind: ConflictKind::Conflicts,
                            offender: new_name.to_string(),
                            victim: other.name.clone(),
                            clause: atom.to_string(),
                        });
                    }
                }
            }
            for group in &new_bin.breaks {
                for atom in &group.alternatives {
                    if other_configured && self.atom_targets(atom, &other.name, &other.installed) {
                        return Some(ConflictViolation {
                            kind: ConflictKind::Breaks,
                            offender: new_name.to_string(),
                            victim: other.name.clone(),
                            clause: atom.to_string(),
                        });
                    }
                }
            }

            // The installed one objects to the incoming package
            for group in &other.installed.conflicts {
                for atom in &group.alternatives {
                    if self.atom_targets(atom, new_name, new_bin) {
                        return Some(ConflictViolation {
                            kind: ConflictKind::Conflicts,
                            offender: other.name.clone(),
                            victim: new_name.to_string(),
                            clause: atom.to_string(),
                        });
                    }
                }
            }
            for group in &other.installed.breaks {
                for atom in &group.alternatives {
                    if other_configured && self.atom_targets(atom, new_name, new_bin) {
                        return Some(ConflictViolation {
                            kind: ConflictKind::Breaks,
                            offender: other.name.clone(),
                            victim: new_name.to_string(),
                            clause: atom.to_string(),
                        });
                    }
                }
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Conflicts,
    Breaks,
}

/// A detected coexistence violation
#[derive(Debug, Clone)]
pub struct ConflictViolation {
    pub kind: ConflictKind,
    /// Package whose clause forbids the coexistence
    pub offender: String,
    /// Package the clause forbids
    pub victim: String,
    pub clause: String,
}

impl std::fmt::Display for ConflictViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let verb = match self.kind {
            ConflictKind::Conflicts => "conflicts with",
            ConflictKind::Breaks => "breaks",
        };
        write!(
            f,
            "{} {} {} (clause: {})",
            self.offender, verb, self.victim, self.clause
        )
    }
}

impl DepResult {
    /// Candidate scanning keeps the most promising outcome seen so far
    fn prefer(self, other: DepResult) -> DepResult {
        match (self, other) {
            (DepResult::Ok, _) | (_, DepResult::Ok) => DepResult::Ok,
            (DepResult::Defer, _) | (_, DepResult::Defer) => DepResult::Defer,
            _ => DepResult::Halt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Want;
    use crate::deps::parse_depends;
    use crate::version::Version;
    use tempfile::TempDir;

    fn test_db() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::load(dir.path()).unwrap();
        (dir, db)
    }

    fn add_pkg(db: &mut Database, name: &str, version: &str, status: PkgStatus) {
        let id = db.find_or_create(name, "amd64");
        let pkg = db.pkg_mut(id);
        pkg.want = Want::Install;
        pkg.status = status;
        pkg.installed.version = Some(Version::parse(version).unwrap());
        pkg.installed.architecture = Some("amd64".to_string());
    }

    fn groups(s: &str) -> Vec<DepGroup> {
        parse_depends("Depends", s).unwrap()
    }

    #[test]
    fn test_satisfied_by_installed() {
        let (_dir, mut db) = test_db();
        add_pkg(&mut db, "libc6", "2.31-1", PkgStatus::Installed);

        let checker = DepChecker::new(&db, "amd64");
        let mut reason = String::new();
        assert_eq!(
            checker.expression("foo", "depends on", &groups("libc6 (>= 2.30)"), &mut reason),
            DepResult::Ok
        );
        assert!(reason.is_empty());
    }

    #[test]
    fn test_version_violation_halts() {
        let (_dir, mut db) = test_db();
        add_pkg(&mut db, "libc6", "2.29-1", PkgStatus::Installed);

        let checker = DepChecker::new(&db, "amd64");
        let mut reason = String::new();
        assert_eq!(
            checker.expression("foo", "depends on", &groups("libc6 (>= 2.30)"), &mut reason),
            DepResult::Halt
        );
        assert!(reason.contains("libc6"));
    }

    #[test]
    fn test_unpacked_defers() {
        let (_dir, mut db) = test_db();
        add_pkg(&mut db, "libbar", "1.0", PkgStatus::Unpacked);

        let checker = DepChecker::new(&db, "amd64");
        let mut reason = String::new();
        assert_eq!(
            checker.expression("foo", "depends on", &groups("libbar"), &mut reason),
            DepResult::Defer
        );
    }

    #[test]
    fn test_missing_package_halts() {
        let (_dir, db) = test_db();
        let checker = DepChecker::new(&db, "amd64");
        let mut reason = String::new();
        assert_eq!(
            checker.expression("foo", "depends on", &groups("nonexistent"), &mut reason),
            DepResult::Halt
        );
        assert!(reason.contains("not installed"));
    }

    #[test]
    fn test_alternative_satisfies_group() {
        let (_dir, mut db) = test_db();
        add_pkg(&mut db, "gawk", "5.1", PkgStatus::Installed);

        let checker = DepChecker::new(&db, "amd64");
        let mut reason = String::new();
        assert_eq!(
            checker.expression("foo", "depends on", &groups("mawk | gawk"), &mut reason),
            DepResult::Ok
        );
    }

    #[test]
    fn test_provider_satisfies_virtual_name() {
        let (_dir, mut db) = test_db();
        add_pkg(&mut db, "postfix", "3.5", PkgStatus::Installed);
        let id = db.find("postfix").unwrap();
        db.pkg_mut(id).installed.provides = groups("mail-transport-agent");

        let checker = DepChecker::new(&db, "amd64");
        let mut reason = String::new();
        assert_eq!(
            checker.expression(
                "foo",
                "depends on",
                &groups("mail-transport-agent"),
                &mut reason
            ),
            DepResult::Ok
        );
    }

    #[test]
    fn test_versioned_dep_needs_versioned_provide() {
        let (_dir, mut db) = test_db();
        add_pkg(&mut db, "postfix", "3.5", PkgStatus::Installed);
        let id = db.find("postfix").unwrap();
        db.pkg_mut(id).installed.provides = groups("mta");

        let checker = DepChecker::new(&db, "amd64");
        let mut reason = String::new();
        assert_eq!(
            checker.expression("foo", "depends on", &groups("mta (>= 2.0)"), &mut reason),
            DepResult::Halt
        );

        db.pkg_mut(id).installed.provides = groups("mta (= 3.0)");
        let checker = DepChecker::new(&db, "amd64");
        let mut reason = String::new();
        assert_eq!(
            checker.expression("foo", "depends on", &groups("mta (>= 2.0)"), &mut reason),
            DepResult::Ok
        );
    }

    #[test]
    fn test_package_being_removed_not_counted() {
        let (_dir, mut db) = test_db();
        add_pkg(&mut db, "libbar", "1.0", PkgStatus::Installed);
        let id = db.find("libbar").unwrap();
        db.pkg_mut(id).istobe = Istobe::Remove;

        let checker = DepChecker::new(&db, "amd64");
        let mut reason = String::new();
        assert_eq!(
            checker.expression("foo", "depends on", &groups("libbar"), &mut reason),
            DepResult::Halt
        );
    }

    #[test]
    fn test_arch_restricted_atom_skipped() {
        let (_dir, db) = test_db();
        let checker = DepChecker::new(&db, "amd64");
        let mut reason = String::new();
        // The only alternative is restricted to another architecture, so the
        // group is vacuously satisfied.
        assert_eq!(
            checker.expression("foo", "depends on", &groups("libfoo [i386]"), &mut reason),
            DepResult::Ok
        );
    }

    #[test]
    fn test_conflict_detection_both_directions() {
        let (_dir, mut db) = test_db();
        add_pkg(&mut db, "oldmta", "1.0", PkgStatus::Installed);
        let id = db.find("oldmta").unwrap();
        db.pkg_mut(id).installed.conflicts = groups("newmta");

        let checker = DepChecker::new(&db, "amd64");

        // Installed package objects to the incoming one
        let mut incoming = PackageBinary {
            version: Some(Version::parse("2.0").unwrap()),
            ..Default::default()
        };
        let violation = checker.coinstall_violation("newmta", &incoming).unwrap();
        assert_eq!(violation.offender, "oldmta");

        // Incoming package objects to the installed one
        incoming.conflicts = groups("oldmta (<< 2.0)");
        let violation = checker.coinstall_violation("unrelated", &incoming).unwrap();
        assert_eq!(violation.offender, "unrelated");
        assert_eq!(violation.victim, "oldmta");
    }

    #[test]
    fn test_breaks_only_against_configured() {
        let (_dir, mut db) = test_db();
        add_pkg(&mut db, "fragile", "1.0", PkgStatus::Unpacked);

        let checker = DepChecker::new(&db, "amd64");
        let incoming = PackageBinary {
            version: Some(Version::parse("2.0").unwrap()),
            breaks: groups("fragile (<< 2.0)"),
            ..Default::default()
        };
        // Victim is only unpacked, so a Breaks clause does not fire
        assert!(checker.coinstall_violation("breaker", &incoming).is_none());

        let id = db.find("fragile").unwrap();
        db.pkg_mut(id).status = PkgStatus::Installed;
        let checker = DepChecker::new(&db, "amd64");
        assert!(checker.coinstall_violation("breaker", &incoming).is_some());
    }
}
