// src/conffile/mod.rs

//! Conffile handling: the three-way comparison between the recorded hash,
//! the file currently on disk and the version staged from the new archive,
//! and the file shuffling each decision implies.
//!
//! The staged copy waits as `<target>.dpkg-new` until configure time. The
//! outcome is either installing it (current file backed up to
//! `<target>.dpkg-old`) or keeping the current file (staged copy parked as
//! `<target>.dpkg-dist`). Obsolete conffiles are parked as `.dpkg-bak`.

use crate::error::{Error, Result};
use crate::force::{ConffilePolicy, ForceOptions};
use md5::{Digest, Md5};
use std::fs;
use std::io::{BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

/// Hash of a file as a lowercase hex digest, `None` when it does not exist
pub fn file_hash(path: &Path) -> Result<Option<String>> {
    let mut file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut hasher = Md5::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Some(format!("{:x}", hasher.finalize())))
}

/// Hash of an in-memory buffer
pub fn buffer_hash(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

/// What to do with one conffile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    InstallNew,
    KeepCurrent,
    /// Policy says ask; the embedded flag is the default answer
    Prompt { default_install: bool },
}

/// Pure decision matrix over the three hashes.
///
/// `old` is the recorded hash of the previously distributed version, `cur`
/// the hash of the file on disk (`None` when deleted), `new` the hash of the
/// staged version.
pub fn decide(
    old: Option<&str>,
    cur: Option<&str>,
    new: &str,
    force: &ForceOptions,
) -> Decision {
    let cur = match cur {
        // Locally deleted: honoured unless missing conffiles are forced back
        None => {
            return if force.conffile_miss {
                Decision::InstallNew
            } else {
                Decision::KeepCurrent
            }
        }
        Some(c) => c,
    };

    let automatic = if new == cur {
        // Distributed version identical to what is on disk
        Some(Decision::InstallNew)
    } else if old == Some(cur) {
        // User never modified the file
        Some(Decision::InstallNew)
    } else if old == Some(new) {
        // User modified it and the distributed version is unchanged
        Some(Decision::KeepCurrent)
    } else {
        None
    };

    match automatic {
        Some(decision) if !force.conffile_ask => decision,
        Some(decision) => Decision::Prompt {
            default_install: decision == Decision::InstallNew,
        },
        // Three-way disagreement: the configurable case
        None => match force.conffile {
            ConffilePolicy::KeepOld => Decision::KeepCurrent,
            ConffilePolicy::InstallNew => Decision::InstallNew,
            ConffilePolicy::Default => Decision::KeepCurrent,
            ConffilePolicy::Ask => Decision::Prompt {
                default_install: false,
            },
        },
    }
}

/// Answer obtained from the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAnswer {
    Install,
    Keep,
}

/// Source of interactive conffile answers
pub trait Prompter {
    fn ask(&mut self, pkg: &str, path: &str, default_install: bool) -> PromptAnswer;
}

/// Interactive prompt on stdin/stdout, with diff and shell escapes
pub struct StdioPrompter;

impl Prompter for StdioPrompter {
    fn ask(&mut self, pkg: &str, path: &str, default_install: bool) -> PromptAnswer {
        let stdin = std::io::stdin();
        loop {
            let default = if default_install { "Y" } else { "N" };
            print!(
                "Configuration file '{}' (package {})\n\
                 ==> Modified or deleted locally, package distributor shipped an updated version.\n\
                 \x20   Y or I : install the package maintainer's version\n\
                 \x20   N or O : keep your currently-installed version\n\
                 \x20     D    : show the differences between the versions\n\
                 \x20     Z    : start a shell to examine the situation\n\
                 The default action is to keep your current version.\n\
                 *** {} ({}/I/N/O/D/Z) ? ",
                path, pkg, path, default
            );
            let _ = std::io::stdout().flush();

            let mut line = String::new();
            if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
                // EOF: take the default
                return if default_install {
                    PromptAnswer::Install
                } else {
                    PromptAnswer::Keep
                };
            }
            match line.trim() {
                "" => {
                    return if default_install {
                        PromptAnswer::Install
                    } else {
                        PromptAnswer::Keep
                    }
                }
                "y" | "Y" | "i" | "I" => return PromptAnswer::Install,
                "n" | "N" | "o" | "O" => return PromptAnswer::Keep,
                "d" | "D" => {
                    let _ = Command::new("diff")
                        .arg("-u")
                        .arg(path)
                        .arg(format!("{}.dpkg-new", path))
                        .status();
                }
                "z" | "Z" => {
                    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
                    let _ = Command::new(shell).status();
                }
                _ => continue,
            }
        }
    }
}

/// Result of processing one conffile at configure time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub decision: Decision,
    /// Hash of the distributed version, to be recorded in the database
    pub new_hash: String,
}

/// Process one conffile: compare hashes, resolve the decision, shuffle files.
///
/// `target` is the on-disk path, `old_hash` the recorded hash from the
/// database (`None` for a brand-new conffile).
pub fn process(
    pkg: &str,
    target: &Path,
    old_hash: Option<&str>,
    force: &ForceOptions,
    prompter: &mut dyn Prompter,
) -> Result<Outcome> {
    let staged = sibling(target, ".dpkg-new");
    let new_hash = match file_hash(&staged)? {
        Some(h) => h,
        None => {
            // Nothing staged: the archive did not ship it this time
            return Err(Error::Conffile(format!(
                "no staged version for conffile '{}'",
                target.display()
            )));
        }
    };
    let cur_hash = file_hash(target)?;

    let decision = match old_hash {
        // First installation of this conffile
        None if cur_hash.is_none() => Decision::InstallNew,
        None => decide(None, cur_hash.as_deref(), &new_hash, force),
        Some(old) => decide(Some(old), cur_hash.as_deref(), &new_hash, force),
    };

    let resolved = match decision {
        Decision::Prompt { default_install } => {
            match prompter.ask(pkg, &target.display().to_string(), default_install) {
                PromptAnswer::Install => Decision::InstallNew,
                PromptAnswer::Keep => Decision::KeepCurrent,
            }
        }
        other => other,
    };

    match resolved {
        Decision::InstallNew => {
            if target.exists() {
                let backup = sibling(target, ".dpkg-old");
                if backup.exists() {
                    fs::remove_file(&backup)?;
                }
                fs::rename(target, &backup)?;
            }
            fs::rename(&staged, target)?;
            info!("installing new version of config file {}", target.display());
        }
        Decision::KeepCurrent => {
            let dist = sibling(target, ".dpkg-dist");
            if dist.exists() {
                fs::remove_file(&dist)?;
            }
            if cur_hash.is_some() {
                fs::rename(&staged, &dist)?;
                info!(
                    "keeping current version of config file {}, new version parked as {}",
                    target.display(),
                    dist.display()
                );
            } else {
                // Locally deleted and not forced back: drop the staged copy
                fs::remove_file(&staged)?;
                warn!(
                    "config file {} was deleted locally, not reinstalling",
                    target.display()
                );
            }
        }
        Decision::Prompt { .. } => unreachable!("prompt resolved above"),
    }

    Ok(Outcome {
        decision: resolved,
        new_hash,
    })
}

/// Park an obsolete conffile (present in the old version only) as
/// `.dpkg-bak`, leaving user content recoverable.
pub fn retire_obsolete(target: &Path) -> Result<()> {
    if !target.exists() {
        return Ok(());
    }
    let backup = sibling(target, ".dpkg-bak");
    if backup.exists() {
        fs::remove_file(&backup)?;
    }
    fs::rename(target, &backup)?;
    info!(
        "obsolete config file {} moved to {}",
        target.display(),
        backup.display()
    );
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(suffix);
    path.with_file_name(name)
}
