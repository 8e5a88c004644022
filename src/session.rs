// src/session.rs

//! The session context: the one object owning the locks, the package
//! database, the filesystem node table, the trigger registry and the
//! force-policy for a run.
//!
//! Opening a session takes the advisory locks, loads and recovers the
//! database (journal replay), loads diversions, stat overrides and trigger
//! interests, and clears transient node state. The abort flag is set by
//! SIGINT/SIGTERM and checked between scheduler ticks and between
//! maintainer-script invocations; the current operation always completes.

use crate::db::models::PackageId;
use crate::db::{paths, Database, SessionLocks};
use crate::error::{Error, Result};
use crate::force::ForceOptions;
use crate::fsys::FsysTable;
use crate::log::ActionLog;
use crate::script::ScriptRunner;
use crate::trigger::{TrigProc, TriggerState};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

static ABORT_PROCESSING: AtomicBool = AtomicBool::new(false);

extern "C" fn request_abort(_signo: libc::c_int) {
    ABORT_PROCESSING.store(true, Ordering::SeqCst);
}

/// Install TERM/INT handlers that request a clean stop
pub fn install_signal_handlers() {
    let action = SigAction::new(
        SigHandler::Handler(request_abort),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        let _ = signal::sigaction(Signal::SIGINT, &action);
        let _ = signal::sigaction(Signal::SIGTERM, &action);
    }
}

/// Configuration for opening a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub admin_dir: PathBuf,
    pub instdir: PathBuf,
    pub native_arch: String,
    pub force: ForceOptions,
    pub log_path: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        let admin_dir = std::env::var_os("DPKG_ADMINDIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(paths::DEFAULT_ADMINDIR));
        let instdir = std::env::var_os("DPKG_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/"));
        Self {
            admin_dir,
            instdir,
            native_arch: native_arch().to_string(),
            force: ForceOptions::default(),
            log_path: None,
        }
    }
}

/// Host architecture in packaging vocabulary
pub fn native_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "i386",
        "powerpc64" => "ppc64el",
        "riscv64" => "riscv64",
        other => other,
    }
}

/// One locked engine session over an admin directory
pub struct Session {
    pub admin_dir: PathBuf,
    pub instdir: PathBuf,
    pub native_arch: String,
    pub force: ForceOptions,
    pub db: Database,
    pub fsys: FsysTable,
    pub triggers: TriggerState,
    pub trigproc: TrigProc,
    pub log: ActionLog,
    failures: u32,
    _locks: SessionLocks,
}

impl Session {
    /// Lock the admin area and load every piece of persistent state
    pub fn open(opts: SessionOptions) -> Result<Self> {
        Database::ensure_layout(&opts.admin_dir)?;
        let locks = SessionLocks::acquire(&opts.admin_dir)?;

        let mut db = Database::load(&opts.admin_dir)?;
        let mut fsys = FsysTable::new();
        fsys.load_diversions(&paths::diversions_file(&opts.admin_dir))?;
        fsys.load_statoverrides(&paths::statoverride_file(&opts.admin_dir))?;
        fsys.reset_transient();
        db.load_all_file_lists(&mut fsys)?;
        let triggers = TriggerState::load(&opts.admin_dir)?;

        let log = ActionLog::open(opts.log_path.as_deref());
        debug!(
            "session open: admindir={} instdir={} arch={}",
            opts.admin_dir.display(),
            opts.instdir.display(),
            opts.native_arch
        );

        Ok(Self {
            admin_dir: opts.admin_dir,
            instdir: opts.instdir,
            native_arch: opts.native_arch,
            force: opts.force,
            db,
            fsys,
            triggers,
            trigproc: TrigProc::default(),
            log,
            failures: 0,
            _locks: locks,
        })
    }

    /// Script runner bound to this session's directories
    pub fn runner(&self) -> ScriptRunner {
        ScriptRunner::new(&self.admin_dir, &self.instdir)
    }

    /// On-disk location of a canonical path under the install root
    pub fn disk_path(&self, canonical: &str) -> PathBuf {
        self.instdir
            .join(canonical.trim_start_matches('/'))
    }

    /// Whether a signal asked the engine to stop
    pub fn abort_requested(&self) -> bool {
        ABORT_PROCESSING.load(Ordering::SeqCst)
    }

    /// Journal one package's record
    pub fn record(&mut self, id: PackageId) -> Result<()> {
        self.db.record_update(id)
    }

    /// Count one failed operation; errors out when the abort-after limit is
    /// reached.
    pub fn note_failure(&mut self) -> Result<()> {
        self.failures += 1;
        if self.failures >= self.force.abort_after {
            return Err(Error::Database(format!(
                "too many errors ({}), stopping",
                self.failures
            )));
        }
        Ok(())
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Persist all mutated state: trigger registry and status checkpoint
    pub fn commit(&mut self) -> Result<()> {
        self.triggers.save(&self.admin_dir)?;
        self.db.checkpoint()?;
        Ok(())
    }

    /// Path to the admin tmp area, created on demand
    pub fn scratch_dir(&self) -> Result<PathBuf> {
        let dir = paths::tmp_dir(&self.admin_dir);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Open a session rooted at explicit directories (test and CLI helper)
pub fn open_at(admin: &Path, instdir: &Path, force: ForceOptions) -> Result<Session> {
    Session::open(SessionOptions {
        admin_dir: admin.to_path_buf(),
        instdir: instdir.to_path_buf(),
        force,
        ..Default::default()
    })
}
