// src/commands/mod.rs

//! Subcommand handlers: session lifecycle around the engine operations.

mod install;
mod query;

pub use install::{cmd_configure, cmd_install, cmd_remove, cmd_triggers_only};
pub use query::{cmd_audit, cmd_status, cmd_update_avail};

use debpkg::Error;

/// Process exit codes: 1 = requested action failed, 2 = fatal error
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(Error::Lock(_)) | Some(Error::Io(_)) | Some(Error::Database(_)) => 2,
        Some(_) => 1,
        // Non-engine errors are fatal
        None => 2,
    }
}
