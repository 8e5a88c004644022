// src/fsys/diversion.rs

//! Diversions: registered renames that redirect one package's installation
//! of a path to an alternate location.
//!
//! The on-disk `diversions` file is a sequence of three-line records:
//! contested path, redirected path, then the package allowed to use the
//! contested path (a bare `:` means a local diversion that applies to every
//! package). Rewrites go through `diversions-new` with an atomic rename.

use super::{FsysTable, NodeId};
use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// One registered diversion
#[derive(Debug, Clone)]
pub struct Diversion {
    pub contested: NodeId,
    pub redirected: NodeId,
    /// Package allowed to install the contested path directly; `None` for a
    /// local diversion that redirects everyone.
    pub package: Option<String>,
}

impl FsysTable {
    /// Load the diversions registry, replacing any current registrations
    pub fn load_diversions(&mut self, file: &Path) -> Result<()> {
        self.clear_diversions();

        let text = match fs::read_to_string(file) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut lines = text.lines();
        loop {
            let contested = match lines.next() {
                Some(line) => line,
                None => break,
            };
            let redirected = lines.next().ok_or_else(|| {
                Error::Database(format!(
                    "diversions file '{}' is truncated after '{}'",
                    file.display(),
                    contested
                ))
            })?;
            let package = lines.next().ok_or_else(|| {
                Error::Database(format!(
                    "diversions file '{}' is missing the package line for '{}'",
                    file.display(),
                    contested
                ))
            })?;

            if contested == redirected {
                return Err(Error::Database(format!(
                    "diversion of '{}' to itself",
                    contested
                )));
            }

            let package = if package == ":" {
                None
            } else {
                Some(package.to_string())
            };

            let contested_id = self.intern(contested)?;
            let redirected_id = self.intern(redirected)?;
            let idx = self.push_diversion(Diversion {
                contested: contested_id,
                redirected: redirected_id,
                package,
            });
            self.node_mut(contested_id).divert = Some(idx);
            self.node_mut(redirected_id).divert = Some(idx);
            debug!(
                "diversion: {} -> {}",
                self.node(contested_id).name,
                self.node(redirected_id).name
            );
        }
        Ok(())
    }

    /// Persist the diversions registry: write `<file>-new`, fsync, rename.
    pub fn save_diversions(&self, file: &Path) -> Result<()> {
        let new_path = file.with_file_name(format!(
            "{}-new",
            file.file_name().and_then(|n| n.to_str()).unwrap_or("diversions")
        ));
        let mut out = fs::File::create(&new_path)?;
        for d in self.diversions() {
            writeln!(out, "{}", self.node(d.contested).name)?;
            writeln!(out, "{}", self.node(d.redirected).name)?;
            writeln!(out, "{}", d.package.as_deref().unwrap_or(":"))?;
        }
        out.sync_all()?;
        if file.exists() {
            let old_path = file.with_file_name(format!(
                "{}-old",
                file.file_name().and_then(|n| n.to_str()).unwrap_or("diversions")
            ));
            let _ = fs::rename(file, &old_path);
        }
        fs::rename(&new_path, file)?;
        Ok(())
    }

    /// Resolve where `pkg_name` actually installs content claimed at `node`.
    ///
    /// The named package keeps the contested path; everyone else is sent to
    /// the redirected path. Local diversions redirect every package.
    pub fn divert_resolve(&self, pkg_name: &str, node: NodeId) -> NodeId {
        match self.node(node).divert.map(|i| &self.diversions()[i]) {
            Some(d) if d.contested == node => match &d.package {
                Some(owner) if owner == pkg_name => node,
                _ => d.redirected,
            },
            _ => node,
        }
    }

    /// The diversion record covering a node, if any
    pub fn diversion_for(&self, node: NodeId) -> Option<&Diversion> {
        self.node(node).divert.map(|i| &self.diversions()[i])
    }
}
