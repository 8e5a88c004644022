// src/error.rs

//! Crate-wide error type.
//!
//! Recoverable conditions carry a kind plus formatted text so callers can map
//! them onto force-flag policy. Internal invariant violations are not
//! representable here; those panic.

use thiserror::Error;

/// Engine error
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Version(#[from] crate::version::VersionError),

    /// Field-grammar or stanza-level parse failure, with source context
    #[error("parsing file '{file}' near line {line}: {msg}")]
    Parse {
        file: String,
        line: usize,
        msg: String,
    },

    #[error("{0}")]
    Database(String),

    #[error("{0}")]
    Path(String),

    #[error("{0}")]
    Archive(String),

    #[error("{0}")]
    Depends(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Conffile(String),

    #[error("{0}")]
    Script(String),

    #[error("{0}")]
    Trigger(String),

    #[error("{0}")]
    Lock(String),

    /// Operation interrupted by signal; state has been persisted
    #[error("operation interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for errors that mean another engine instance holds the database
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, Error::Lock(_))
    }
}
