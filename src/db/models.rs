// src/db/models.rs

//! Package records: the in-memory shape of a status or available stanza.
//!
//! A [`Package`] carries identity, selection state, the two metadata slots
//! (*installed* and *available*) and trigger bookkeeping. Cross-references to
//! filesystem nodes are stable arena indices, never pointers.

use crate::control::Paragraph;
use crate::deps::{format_depends, DepGroup};
use crate::fsys::NodeId;
use crate::version::Version;
use std::fmt;

/// Stable arena index of a package within the database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId(pub usize);

/// What the administrator wants done with the package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Want {
    #[default]
    Unknown,
    Install,
    Hold,
    Deinstall,
    Purge,
}

impl Want {
    pub fn as_str(&self) -> &'static str {
        match self {
            Want::Unknown => "unknown",
            Want::Install => "install",
            Want::Hold => "hold",
            Want::Deinstall => "deinstall",
            Want::Purge => "purge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unknown" => Some(Want::Unknown),
            "install" => Some(Want::Install),
            "hold" => Some(Want::Hold),
            "deinstall" => Some(Want::Deinstall),
            "purge" => Some(Want::Purge),
            _ => None,
        }
    }
}

/// Error flag, sticky until a successful unpack+configure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Eflag {
    #[default]
    Ok,
    Reinstreq,
}

impl Eflag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Eflag::Ok => "ok",
            Eflag::Reinstreq => "reinstreq",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(Eflag::Ok),
            "reinstreq" => Some(Eflag::Reinstreq),
            _ => None,
        }
    }
}

/// Installation state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum PkgStatus {
    #[default]
    NotInstalled,
    ConfigFiles,
    HalfInstalled,
    Unpacked,
    HalfConfigured,
    TriggersAwaited,
    TriggersPending,
    Installed,
}

impl PkgStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PkgStatus::NotInstalled => "not-installed",
            PkgStatus::ConfigFiles => "config-files",
            PkgStatus::HalfInstalled => "half-installed",
            PkgStatus::Unpacked => "unpacked",
            PkgStatus::HalfConfigured => "half-configured",
            PkgStatus::TriggersAwaited => "triggers-awaited",
            PkgStatus::TriggersPending => "triggers-pending",
            PkgStatus::Installed => "installed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not-installed" => Some(PkgStatus::NotInstalled),
            "config-files" => Some(PkgStatus::ConfigFiles),
            "half-installed" => Some(PkgStatus::HalfInstalled),
            "unpacked" => Some(PkgStatus::Unpacked),
            "half-configured" => Some(PkgStatus::HalfConfigured),
            "triggers-awaited" => Some(PkgStatus::TriggersAwaited),
            "triggers-pending" => Some(PkgStatus::TriggersPending),
            "installed" => Some(PkgStatus::Installed),
            _ => None,
        }
    }

    /// True once installed metadata must be complete
    pub fn has_installed_data(&self) -> bool {
        *self >= PkgStatus::HalfInstalled
    }

    /// True when the package may own files on disk
    pub fn owns_files(&self) -> bool {
        *self >= PkgStatus::HalfInstalled
    }
}

impl fmt::Display for PkgStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-architecture coexistence mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiArch {
    #[default]
    No,
    Same,
    Foreign,
    Allowed,
}

impl MultiArch {
    pub fn as_str(&self) -> &'static str {
        match self {
            MultiArch::No => "no",
            MultiArch::Same => "same",
            MultiArch::Foreign => "foreign",
            MultiArch::Allowed => "allowed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "no" => Some(MultiArch::No),
            "same" => Some(MultiArch::Same),
            "foreign" => Some(MultiArch::Foreign),
            "allowed" => Some(MultiArch::Allowed),
            _ => None,
        }
    }
}

/// A configuration file record carried in package metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conffile {
    /// Canonical absolute path
    pub path: String,
    /// Recorded hash of the distributed version, or "newconffile" before the
    /// first configure pass
    pub hash: String,
    pub obsolete: bool,
}

/// The fields of one control stanza: one of a package's two metadata slots
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageBinary {
    pub version: Option<Version>,
    pub architecture: Option<String>,
    pub multiarch: MultiArch,
    pub maintainer: Option<String>,
    pub description: Option<String>,
    pub section: Option<String>,
    pub priority: Option<String>,
    pub source: Option<String>,
    pub installed_size: Option<u64>,
    pub essential: bool,
    pub conffiles: Vec<Conffile>,
    pub depends: Vec<DepGroup>,
    pub pre_depends: Vec<DepGroup>,
    pub recommends: Vec<DepGroup>,
    pub suggests: Vec<DepGroup>,
    pub enhances: Vec<DepGroup>,
    pub conflicts: Vec<DepGroup>,
    pub breaks: Vec<DepGroup>,
    pub replaces: Vec<DepGroup>,
    pub provides: Vec<DepGroup>,
    /// Unknown fields kept verbatim in input order
    pub extra: Vec<(String, String)>,
}

impl PackageBinary {
    pub fn is_empty(&self) -> bool {
        self.version.is_none()
    }

    /// Find a conffile record by canonical path
    pub fn conffile(&self, path: &str) -> Option<&Conffile> {
        self.conffiles.iter().find(|c| c.path == path)
    }
}

/// What the current run intends to do with a package. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Istobe {
    #[default]
    Normal,
    Remove,
    Install,
    Preinstall,
    Deconfigure,
}

/// One package: identity, selection state, both metadata slots, trigger
/// bookkeeping and the run-state the scheduler threads through.
#[derive(Debug, Clone, Default)]
pub struct Package {
    pub name: String,
    /// Architecture the installed (or pending) instance is for; empty until
    /// a stanza supplies one
    pub arch: String,
    pub want: Want,
    pub eflag: Eflag,
    pub status: PkgStatus,
    pub installed: PackageBinary,
    pub available: PackageBinary,
    /// Version most recently configured, when it differs from installed
    pub config_version: Option<Version>,
    /// Trigger names awaiting processing by this package
    pub triggers_pending: Vec<String>,
    /// Package names whose trigger processing this one awaits
    pub triggers_awaited: Vec<String>,

    /// Ordered filesystem nodes owned by this package (run-state, loaded
    /// from the info list file)
    pub files: Vec<NodeId>,
    /// Whether `files` has been populated this session
    pub files_listed: bool,
    /// Scheduler intent for the current run
    pub istobe: Istobe,
}

impl Package {
    pub fn new(name: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arch: arch.into(),
            ..Default::default()
        }
    }

    /// Whether this record carries any information worth persisting
    pub fn is_informative(&self) -> bool {
        self.want != Want::Unknown
            || self.eflag != Eflag::Ok
            || self.status != PkgStatus::NotInstalled
            || !self.installed.is_empty()
    }

    /// The version string of the installed slot, or "<none>"
    pub fn installed_version_string(&self) -> String {
        match &self.installed.version {
            Some(v) => v.to_string(),
            None => "<none>".to_string(),
        }
    }

    /// Render the status-file stanza for this package
    pub fn status_stanza(&self) -> Paragraph {
        let status = format!(
            "{} {} {}",
            self.want.as_str(),
            self.eflag.as_str(),
            self.status.as_str()
        );
        let mut p = self.slot_stanza(&self.installed, Some(&status));
        if let Some(cv) = &self.config_version {
            if self.installed.version.as_ref() != Some(cv) {
                p.set("Config-Version", cv.to_string());
            }
        }
        if !self.triggers_pending.is_empty() {
            p.set("Triggers-Pending", self.triggers_pending.join(" "));
        }
        if !self.triggers_awaited.is_empty() {
            p.set("Triggers-Awaited", self.triggers_awaited.join(" "));
        }
        p
    }

    /// Render the available-file stanza for this package
    pub fn available_stanza(&self) -> Paragraph {
        self.slot_stanza(&self.available, None)
    }

    fn slot_stanza(&self, bin: &PackageBinary, status: Option<&str>) -> Paragraph {
        let mut p = Paragraph::new();
        p.push("Package", self.name.clone());
        if let Some(status) = status {
            p.push("Status", status.to_string());
        }
        if bin.essential {
            p.push("Essential", "yes");
        }
        if let Some(v) = &bin.priority {
            p.push("Priority", v.clone());
        }
        if let Some(v) = &bin.section {
            p.push("Section", v.clone());
        }
        if let Some(v) = bin.installed_size {
            p.push("Installed-Size", v.to_string());
        }
        if let Some(v) = &bin.maintainer {
            p.push("Maintainer", v.clone());
        }
        if let Some(v) = &bin.architecture {
            p.push("Architecture", v.clone());
        }
        if bin.multiarch != MultiArch::No {
            p.push("Multi-Arch", bin.multiarch.as_str());
        }
        if let Some(v) = &bin.source {
            p.push("Source", v.clone());
        }
        if let Some(v) = &bin.version {
            p.push("Version", v.to_string());
        }
        for (field, groups) in [
            ("Replaces", &bin.replaces),
            ("Provides", &bin.provides),
            ("Depends", &bin.depends),
            ("Pre-Depends", &bin.pre_depends),
            ("Recommends", &bin.recommends),
            ("Suggests", &bin.suggests),
            ("Breaks", &bin.breaks),
            ("Conflicts", &bin.conflicts),
            ("Enhances", &bin.enhances),
        ] {
            if !groups.is_empty() {
                p.push(field, format_depends(groups));
            }
        }
        if !bin.conffiles.is_empty() {
            let mut value = String::new();
            for c in &bin.conffiles {
                value.push('\n');
                value.push_str(&c.path);
                value.push(' ');
                value.push_str(&c.hash);
                if c.obsolete {
                    value.push_str(" obsolete");
                }
            }
            p.push("Conffiles", value);
        }
        if let Some(v) = &bin.description {
            p.push("Description", v.clone());
        }
        for (name, value) in &bin.extra {
            p.push(name.clone(), value.clone());
        }
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_triple_roundtrip() {
        for want in ["unknown", "install", "hold", "deinstall", "purge"] {
            assert_eq!(Want::parse(want).unwrap().as_str(), want);
        }
        for status in [
            "not-installed",
            "config-files",
            "half-installed",
            "unpacked",
            "half-configured",
            "triggers-awaited",
            "triggers-pending",
            "installed",
        ] {
            assert_eq!(PkgStatus::parse(status).unwrap().as_str(), status);
        }
        assert_eq!(Eflag::parse("reinstreq"), Some(Eflag::Reinstreq));
        assert_eq!(Want::parse("bogus"), None);
    }

    #[test]
    fn test_status_ordering_helpers() {
        assert!(!PkgStatus::NotInstalled.has_installed_data());
        assert!(!PkgStatus::ConfigFiles.owns_files());
        assert!(PkgStatus::HalfInstalled.has_installed_data());
        assert!(PkgStatus::Installed.owns_files());
    }

    #[test]
    fn test_is_informative() {
        let mut pkg = Package::new("foo", "amd64");
        assert!(!pkg.is_informative());
        pkg.want = Want::Install;
        assert!(pkg.is_informative());

        let mut pkg = Package::new("bar", "amd64");
        pkg.eflag = Eflag::Reinstreq;
        assert!(pkg.is_informative());
    }

    #[test]
    fn test_status_stanza_fields() {
        let mut pkg = Package::new("foo", "amd64");
        pkg.want = Want::Install;
        pkg.status = PkgStatus::Installed;
        pkg.installed.version = Some(crate::version::Version::parse("1.0-1").unwrap());
        pkg.installed.architecture = Some("amd64".to_string());
        pkg.triggers_pending = vec!["ldconfig".to_string()];

        let stanza = pkg.status_stanza();
        assert_eq!(stanza.get("Package"), Some("foo"));
        assert_eq!(stanza.get("Status"), Some("install ok installed"));
        assert_eq!(stanza.get("Version"), Some("1.0-1"));
        assert_eq!(stanza.get("Triggers-Pending"), Some("ldconfig"));
    }

    #[test]
    fn test_conffiles_stanza_rendering() {
        let mut pkg = Package::new("foo", "amd64");
        pkg.status = PkgStatus::Installed;
        pkg.installed.version = Some(crate::version::Version::parse("1.0").unwrap());
        pkg.installed.conffiles.push(Conffile {
            path: "/etc/foo.conf".to_string(),
            hash: "d41d8cd98f00b204e9800998ecf8427e".to_string(),
            obsolete: false,
        });
        pkg.installed.conffiles.push(Conffile {
            path: "/etc/foo-old.conf".to_string(),
            hash: "aaaa".to_string(),
            obsolete: true,
        });

        let stanza = pkg.status_stanza();
        let value = stanza.get("Conffiles").unwrap();
        assert!(value.contains("/etc/foo.conf d41d8cd98f00b204e9800998ecf8427e"));
        assert!(value.contains("/etc/foo-old.conf aaaa obsolete"));
    }
}
