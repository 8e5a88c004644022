// src/force.rs

//! Force flags: the knobs that downgrade specific failure classes from
//! abort to warning.
//!
//! Flags arrive from `--force-<thing>` / `--no-force-<thing>` options and
//! the comma-separated `DPKG_FORCE` environment variable. Internal invariant
//! violations are never subject to force policy.

use crate::error::{Error, Result};
use tracing::warn;

/// Conffile prompt policy, the one force area that is a choice rather than
/// a boolean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConffilePolicy {
    /// Ask on conflicting changes
    #[default]
    Ask,
    /// Keep the locally modified version
    KeepOld,
    /// Install the distributed version
    InstallNew,
    /// Take the default answer for each prompt
    Default,
}

/// The full force-flag set for one session
#[derive(Debug, Clone)]
pub struct ForceOptions {
    pub downgrade: bool,
    pub configure_any: bool,
    pub hold: bool,
    pub remove_reinstreq: bool,
    pub remove_essential: bool,
    pub depends: bool,
    pub depends_version: bool,
    pub breaks: bool,
    pub conflicts: bool,
    pub overwrite: bool,
    pub architecture: bool,
    pub bad_path: bool,
    pub conffile: ConffilePolicy,
    /// Reinstall missing conffiles without prompting
    pub conffile_miss: bool,
    /// Always prompt, even when the decision is otherwise automatic
    pub conffile_ask: bool,
    /// Stop scheduling new operations after this many package failures
    pub abort_after: u32,
}

impl Default for ForceOptions {
    fn default() -> Self {
        Self {
            downgrade: true,
            configure_any: false,
            hold: false,
            remove_reinstreq: false,
            remove_essential: false,
            depends: false,
            depends_version: false,
            breaks: false,
            conflicts: false,
            overwrite: false,
            architecture: false,
            bad_path: false,
            conffile: ConffilePolicy::Ask,
            conffile_miss: false,
            conffile_ask: false,
            abort_after: 50,
        }
    }
}

impl ForceOptions {
    /// Build from the environment plus explicit option strings, later
    /// entries overriding earlier ones.
    pub fn from_env_and_args(args: &[String]) -> Result<Self> {
        let mut opts = Self::default();
        if let Ok(env) = std::env::var("DPKG_FORCE") {
            for name in env.split(',') {
                let name = name.trim();
                if !name.is_empty() {
                    opts.apply(name, true)?;
                }
            }
        }
        for arg in args {
            if let Some(name) = arg.strip_prefix("no-") {
                opts.apply(name, false)?;
            } else {
                opts.apply(arg, true)?;
            }
        }
        Ok(opts)
    }

    /// Apply one named flag
    pub fn apply(&mut self, name: &str, enable: bool) -> Result<()> {
        match name {
            "all" => {
                for flag in [
                    "downgrade",
                    "configure-any",
                    "hold",
                    "remove-reinstreq",
                    "remove-essential",
                    "depends",
                    "depends-version",
                    "breaks",
                    "conflicts",
                    "overwrite",
                    "bad-path",
                ] {
                    self.apply(flag, enable)?;
                }
            }
            "downgrade" => self.downgrade = enable,
            "configure-any" => self.configure_any = enable,
            "hold" => self.hold = enable,
            "remove-reinstreq" => self.remove_reinstreq = enable,
            "remove-essential" => self.remove_essential = enable,
            "depends" => self.depends = enable,
            "depends-version" => self.depends_version = enable,
            "breaks" => self.breaks = enable,
            "conflicts" => self.conflicts = enable,
            "overwrite" => self.overwrite = enable,
            "architecture" => self.architecture = enable,
            "bad-path" => self.bad_path = enable,
            "confold" => {
                self.conffile = if enable {
                    ConffilePolicy::KeepOld
                } else {
                    ConffilePolicy::Ask
                }
            }
            "confnew" => {
                self.conffile = if enable {
                    ConffilePolicy::InstallNew
                } else {
                    ConffilePolicy::Ask
                }
            }
            "confdef" => {
                self.conffile = if enable {
                    ConffilePolicy::Default
                } else {
                    ConffilePolicy::Ask
                }
            }
            "confmiss" => self.conffile_miss = enable,
            "confask" => self.conffile_ask = enable,
            other => {
                return Err(Error::Database(format!("unknown force option '{}'", other)));
            }
        }
        Ok(())
    }

    /// Decide whether a forced failure class proceeds: logs the warning and
    /// returns `Ok` when forced, otherwise returns the error.
    pub fn gate(&self, forced: bool, err: Error) -> Result<()> {
        if forced {
            warn!("overriding problem, continuing anyway: {}", err);
            Ok(())
        } else {
            Err(err)
        }
    }
}
