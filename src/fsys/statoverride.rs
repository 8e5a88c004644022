// src/fsys/statoverride.rs

//! Stat overrides: administrator-specified ownership and mode applied at
//! unpack time instead of archive metadata.
//!
//! The `statoverride` file holds one `uid gid mode path` record per line,
//! mode in octal. Rewrites go through `statoverride-new` with an atomic
//! rename, matching the diversions discipline.

use super::FsysTable;
use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Ownership and permissions forced onto one path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatOverride {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

impl FsysTable {
    /// Load the stat-override registry onto the node table
    pub fn load_statoverrides(&mut self, file: &Path) -> Result<()> {
        let text = match fs::read_to_string(file) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let bad = |what: &str| {
                Error::Database(format!(
                    "statoverride file '{}' line {}: {}",
                    file.display(),
                    lineno + 1,
                    what
                ))
            };

            let mut words = line.splitn(4, ' ');
            let uid = words
                .next()
                .and_then(|w| w.parse::<u32>().ok())
                .ok_or_else(|| bad("bad uid"))?;
            let gid = words
                .next()
                .and_then(|w| w.parse::<u32>().ok())
                .ok_or_else(|| bad("bad gid"))?;
            let mode = words
                .next()
                .and_then(|w| u32::from_str_radix(w, 8).ok())
                .ok_or_else(|| bad("bad octal mode"))?;
            let path = words.next().ok_or_else(|| bad("missing path"))?;
            if !path.starts_with('/') {
                return Err(bad("path is not absolute"));
            }

            let id = self.intern(path)?;
            self.node_mut(id).statoverride = Some(StatOverride { uid, gid, mode });
        }
        Ok(())
    }

    /// Persist the stat-override registry
    pub fn save_statoverrides(&self, file: &Path) -> Result<()> {
        let new_path = file.with_file_name(format!(
            "{}-new",
            file.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("statoverride")
        ));
        let mut out = fs::File::create(&new_path)?;
        for id in self.iter_ids() {
            let node = self.node(id);
            if let Some(so) = node.statoverride {
                writeln!(out, "{} {} {:o} {}", so.uid, so.gid, so.mode, node.name)?;
            }
        }
        out.sync_all()?;
        if file.exists() {
            let old_path = file.with_file_name(format!(
                "{}-old",
                file.file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("statoverride")
            ));
            let _ = fs::rename(file, &old_path);
        }
        fs::rename(&new_path, file)?;
        Ok(())
    }
}
