// src/log.rs

//! Timestamped action log.
//!
//! Every status transition and operation is appended as a single
//! `YYYY-MM-DD HH:MM:SS message` line. Failure to open the log downgrades to
//! a warning and disables logging for the session; rotation is someone
//! else's job.

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::warn;

/// Append-only action log, silently disabled when unavailable
pub struct ActionLog {
    file: Option<File>,
}

impl ActionLog {
    /// Open the log for appending. A missing path disables logging.
    pub fn open(path: Option<&Path>) -> Self {
        let file = path.and_then(|p| {
            match OpenOptions::new().create(true).append(true).open(p) {
                Ok(f) => Some(f),
                Err(e) => {
                    warn!("could not open log '{}': {}", p.display(), e);
                    None
                }
            }
        });
        Self { file }
    }

    /// A log that never writes
    pub fn disabled() -> Self {
        Self { file: None }
    }

    /// Append one message line
    pub fn message(&mut self, msg: &str) {
        if let Some(file) = &mut self.file {
            let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
            if writeln!(file, "{} {}", stamp, msg).is_err() {
                // One failed write disables the log for the session
                self.file = None;
            }
        }
    }

    /// Log a package status transition
    pub fn status(&mut self, status: &str, pkg: &str, version: &str) {
        self.message(&format!("status {} {} {}", status, pkg, version));
    }

    /// Log an action on a package: `action pkg old-version new-version`
    pub fn action(&mut self, action: &str, pkg: &str, old: &str, new: &str) {
        self.message(&format!("{} {} {} {}", action, pkg, old, new));
    }
}
