// src/commands/query.rs

//! Read-mostly subcommands: audit, status, update-avail.

use anyhow::{bail, Context, Result};
use debpkg::control::{paragraph_into_package, DecodeContext, Slot, StanzaReader};
use debpkg::{sched, Session, SessionOptions};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Report packages stuck in intermediate or broken states
pub fn cmd_audit(opts: &SessionOptions) -> Result<()> {
    let session = Session::open(opts.clone())?;
    let findings = sched::audit(&session);

    if findings.is_empty() {
        println!("No broken packages found.");
        return Ok(());
    }

    println!("The following packages need attention:");
    for f in &findings {
        println!("  {} {} - {}", f.package, f.version, f.problem);
    }
    Ok(())
}

/// Print the stored status stanza of one package
pub fn cmd_status(package: &str, opts: &SessionOptions) -> Result<()> {
    let session = Session::open(opts.clone())?;
    match session.db.find(package) {
        Some(id) => {
            let pkg = session.db.pkg(id);
            if !pkg.is_informative() {
                bail!("package '{}' is not installed and no information is available", package);
            }
            print!("{}", pkg.status_stanza());
            Ok(())
        }
        None => bail!("package '{}' is not in the database", package),
    }
}

/// Replace the available catalog from a stanza file
pub fn cmd_update_avail(packages_file: &Path, opts: &SessionOptions) -> Result<()> {
    let mut session = Session::open(opts.clone())?;

    let file = File::open(packages_file)
        .with_context(|| format!("opening {}", packages_file.display()))?;
    let ctx = DecodeContext::available_file(packages_file.display().to_string());
    let mut reader = StanzaReader::new(
        BufReader::new(file),
        packages_file.display().to_string(),
    );

    let mut count = 0usize;
    while let Some(para) = reader.next_paragraph().map_err(anyhow::Error::from)? {
        let record = paragraph_into_package(&para, Slot::Available, &ctx)?;
        let arch = record.available.architecture.clone().unwrap_or_default();
        let id = session.db.find_or_create(&record.name, &arch);
        session.db.pkg_mut(id).available = record.available;
        count += 1;
    }

    session.db.save_available()?;
    println!("Information about {} package(s) was updated.", count);
    Ok(())
}
