// src/main.rs
//! Command-line front-end: translates user intent into engine operations.

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

// =============================================================================
// CLI Definitions
// =============================================================================

#[derive(Parser)]
#[command(name = "debpkg")]
#[command(version)]
#[command(about = "Binary package installation engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Options shared by every operation that opens a session
#[derive(Args, Clone)]
struct CommonOpts {
    /// Administrative directory holding the package database
    #[arg(long, default_value = "/var/lib/debpkg")]
    admindir: PathBuf,

    /// Filesystem root packages are installed under
    #[arg(long, default_value = "/")]
    instdir: PathBuf,

    /// Force options, comma separated (e.g. depends,confold); prefix with
    /// no- to negate
    #[arg(long = "force", value_delimiter = ',')]
    force: Vec<String>,

    /// Append action records to this log file
    #[arg(long)]
    log: Option<PathBuf>,

    /// Stop after this many package failures
    #[arg(long)]
    abort_after: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// Unpack and configure package archives
    Install {
        /// Package archive files
        #[arg(required = true)]
        archives: Vec<PathBuf>,

        #[command(flatten)]
        common: CommonOpts,
    },

    /// Unpack package archives without configuring them
    Unpack {
        /// Package archive files
        #[arg(required = true)]
        archives: Vec<PathBuf>,

        #[command(flatten)]
        common: CommonOpts,
    },

    /// Configure unpacked packages
    Configure {
        /// Package names
        packages: Vec<String>,

        /// Configure every package that is unpacked or half-configured
        #[arg(long)]
        pending: bool,

        #[command(flatten)]
        common: CommonOpts,
    },

    /// Remove installed packages, keeping their configuration files
    Remove {
        /// Package names
        #[arg(required = true)]
        packages: Vec<String>,

        #[command(flatten)]
        common: CommonOpts,
    },

    /// Remove installed packages including configuration files
    Purge {
        /// Package names
        #[arg(required = true)]
        packages: Vec<String>,

        #[command(flatten)]
        common: CommonOpts,
    },

    /// Process pending triggers without other work
    TriggersOnly {
        /// Package names (all pending if omitted)
        packages: Vec<String>,

        #[command(flatten)]
        common: CommonOpts,
    },

    /// Report packages left in broken intermediate states
    Audit {
        #[command(flatten)]
        common: CommonOpts,
    },

    /// Print the database record of a package
    Status {
        /// Package name
        package: String,

        #[command(flatten)]
        common: CommonOpts,
    },

    /// Replace available-package information from a packages file
    UpdateAvail {
        /// Stanza file of available packages
        packages_file: PathBuf,

        #[command(flatten)]
        common: CommonOpts,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: Shell,
    },
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    debpkg::session::install_signal_handlers();

    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(commands::exit_code(&e))
        }
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Install { archives, common }) => {
            commands::cmd_install(&archives, &common.into_session()?, true)
        }

        Some(Commands::Unpack { archives, common }) => {
            commands::cmd_install(&archives, &common.into_session()?, false)
        }

        Some(Commands::Configure {
            packages,
            pending,
            common,
        }) => commands::cmd_configure(&packages, pending, &common.into_session()?),

        Some(Commands::Remove { packages, common }) => {
            commands::cmd_remove(&packages, false, &common.into_session()?)
        }

        Some(Commands::Purge { packages, common }) => {
            commands::cmd_remove(&packages, true, &common.into_session()?)
        }

        Some(Commands::TriggersOnly { packages, common }) => {
            commands::cmd_triggers_only(&packages, &common.into_session()?)
        }

        Some(Commands::Audit { common }) => commands::cmd_audit(&common.into_session()?),

        Some(Commands::Status { package, common }) => {
            commands::cmd_status(&package, &common.into_session()?)
        }

        Some(Commands::UpdateAvail {
            packages_file,
            common,
        }) => commands::cmd_update_avail(&packages_file, &common.into_session()?),

        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "debpkg", &mut io::stdout());
            Ok(())
        }

        None => {
            println!("debpkg v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'debpkg --help' for usage information");
            Ok(())
        }
    }
}

impl CommonOpts {
    /// Resolve CLI options into session options
    fn into_session(self) -> Result<debpkg::SessionOptions> {
        let mut force = debpkg::ForceOptions::from_env_and_args(&self.force)?;
        if let Some(n) = self.abort_after {
            force.abort_after = n;
        }
        let mut opts = debpkg::SessionOptions {
            force,
            log_path: self.log,
            ..Default::default()
        };
        // Explicit flags win over DPKG_ADMINDIR / DPKG_ROOT
        if self.admindir != PathBuf::from("/var/lib/debpkg") {
            opts.admin_dir = self.admindir;
        } else if std::env::var_os("DPKG_ADMINDIR").is_none() {
            opts.admin_dir = self.admindir;
        }
        if self.instdir != PathBuf::from("/") {
            opts.instdir = self.instdir;
        } else if std::env::var_os("DPKG_ROOT").is_none() {
            opts.instdir = self.instdir;
        }
        Ok(opts)
    }
}
