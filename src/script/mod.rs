// src/script/mod.rs

//! Maintainer-script execution.
//!
//! Scripts live at `info/<pkg>.<script>` and are invoked directly with a
//! preserved argv, never through a shell. A missing script is a successful
//! no-op. Each invocation gets the defined environment contract, a nullified
//! stdin, captured output relayed to the log, and a timeout.

use crate::db::models::Package;
use crate::db::paths;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Default timeout for maintainer-script execution
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// The four script hooks a package may install
pub const PREINST: &str = "preinst";
pub const POSTINST: &str = "postinst";
pub const PRERM: &str = "prerm";
pub const POSTRM: &str = "postrm";

/// Maintainer-script runner bound to one admin dir and install root
pub struct ScriptRunner {
    admin_dir: PathBuf,
    instdir: PathBuf,
    timeout: Duration,
}

impl ScriptRunner {
    pub fn new(admin_dir: &Path, instdir: &Path) -> Self {
        Self {
            admin_dir: admin_dir.to_path_buf(),
            instdir: instdir.to_path_buf(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `info/<pkg>.<script> <args...>`. Missing script files succeed.
    pub fn run(&self, pkg: &Package, script: &str, args: &[&str]) -> Result<()> {
        let path = paths::info_file(&self.admin_dir, &pkg.name, script);
        self.run_file(pkg, &path, script, args)
    }

    /// Run a script hook from an explicit path: used for scripts of a
    /// package version that is not (or no longer) the installed one.
    pub fn run_file(&self, pkg: &Package, path: &Path, script: &str, args: &[&str]) -> Result<()> {
        if !path.exists() {
            debug!("{} has no {} script, skipping", pkg.name, script);
            return Ok(());
        }

        info!("running {} script of {} {:?}", script, pkg.name, args);

        let mut child = Command::new(path)
            .args(args)
            .current_dir(&self.instdir)
            .env("DPKG_MAINTSCRIPT_PACKAGE", &pkg.name)
            .env("DPKG_MAINTSCRIPT_ARCH", &pkg.arch)
            .env("DPKG_MAINTSCRIPT_NAME", script)
            .env("DPKG_ADMINDIR", &self.admin_dir)
            .env("DPKG_ROOT", &self.instdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::Script(format!(
                    "unable to execute {} script of {}: {}",
                    script, pkg.name, e
                ))
            })?;

        match child.wait_timeout(self.timeout)? {
            Some(status) => {
                let output = child.wait_with_output()?;
                relay_output(&pkg.name, script, &output.stdout, &output.stderr);

                if status.success() {
                    debug!("{} script of {} completed", script, pkg.name);
                    Ok(())
                } else {
                    let code = status.code().unwrap_or(-1);
                    Err(Error::Script(format!(
                        "{} script of {} returned error exit status {}",
                        script, pkg.name, code
                    )))
                }
            }
            None => {
                let _ = child.kill();
                Err(Error::Script(format!(
                    "{} script of {} timed out after {} seconds",
                    script,
                    pkg.name,
                    self.timeout.as_secs()
                )))
            }
        }
    }

    /// Run a script, retrying the error unwind variant if the first attempt
    /// fails: `postinst configure` failures are followed by nothing, but
    /// callers use this for the `abort-*` fallback pattern on prerm/preinst.
    pub fn run_with_fallback(
        &self,
        pkg: &Package,
        script: &str,
        args: &[&str],
        fallback_args: &[&str],
    ) -> Result<()> {
        match self.run(pkg, script, args) {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!("{}; trying script from a previous attempt", first);
                match self.run(pkg, script, fallback_args) {
                    Ok(()) => Ok(()),
                    Err(_) => Err(first),
                }
            }
        }
    }
}

fn relay_output(pkg: &str, script: &str, stdout: &[u8], stderr: &[u8]) {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    for line in stdout.lines() {
        info!("[{} {}] {}", pkg, script, line);
    }
    for line in stderr.lines() {
        warn!("[{} {}] {}", pkg, script, line);
    }
}
