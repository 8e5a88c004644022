// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: administrative directory
fn admindir_arg() -> Arg {
    Arg::new("admindir")
        .long("admindir")
        .value_name("DIR")
        .default_value("/var/lib/debpkg")
        .help("Administrative directory holding the package database")
}

/// Common argument: installation root
fn instdir_arg() -> Arg {
    Arg::new("instdir")
        .long("instdir")
        .value_name("DIR")
        .default_value("/")
        .help("Filesystem root packages are installed under")
}

fn build_cli() -> Command {
    Command::new("debpkg")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Binary package installation engine")
        .subcommand_required(false)
        .subcommand(
            Command::new("install")
                .about("Unpack and configure package archives")
                .arg(Arg::new("archives").required(true).num_args(1..).help("Package archive files"))
                .arg(admindir_arg())
                .arg(instdir_arg()),
        )
        .subcommand(
            Command::new("unpack")
                .about("Unpack package archives without configuring them")
                .arg(Arg::new("archives").required(true).num_args(1..).help("Package archive files"))
                .arg(admindir_arg())
                .arg(instdir_arg()),
        )
        .subcommand(
            Command::new("configure")
                .about("Configure unpacked packages")
                .arg(Arg::new("packages").num_args(0..).help("Package names"))
                .arg(
                    Arg::new("pending")
                        .long("pending")
                        .action(ArgAction::SetTrue)
                        .help("Configure every package that is unpacked or half-configured"),
                )
                .arg(admindir_arg())
                .arg(instdir_arg()),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove installed packages, keeping their configuration files")
                .arg(Arg::new("packages").required(true).num_args(1..).help("Package names"))
                .arg(admindir_arg())
                .arg(instdir_arg()),
        )
        .subcommand(
            Command::new("purge")
                .about("Remove installed packages including configuration files")
                .arg(Arg::new("packages").required(true).num_args(1..).help("Package names"))
                .arg(admindir_arg())
                .arg(instdir_arg()),
        )
        .subcommand(
            Command::new("triggers-only")
                .about("Process pending triggers without other work")
                .arg(Arg::new("packages").num_args(0..).help("Package names (all pending if omitted)"))
                .arg(admindir_arg())
                .arg(instdir_arg()),
        )
        .subcommand(
            Command::new("audit")
                .about("Report packages left in broken intermediate states")
                .arg(admindir_arg()),
        )
        .subcommand(
            Command::new("status")
                .about("Print the database record of a package")
                .arg(Arg::new("package").required(true).help("Package name"))
                .arg(admindir_arg()),
        )
        .subcommand(
            Command::new("update-avail")
                .about("Replace available-package information from a packages file")
                .arg(Arg::new("packages-file").required(true).help("Stanza file of available packages"))
                .arg(admindir_arg()),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("debpkg.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
