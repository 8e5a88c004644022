// src/archive/reader.rs

//! Thin package-archive reader.
//!
//! A package archive is a gzip-compressed tar whose members live under two
//! top-level directories: `control/` (the control stanza, conffile list,
//! trigger directives and maintainer scripts) and `data/` (the filesystem
//! payload, rooted at the install root). The reader yields typed metadata
//! and content streams; it knows nothing about the database.

use crate::control::{Paragraph, StanzaReader};
use crate::error::{Error, Result};
use crate::trigger::{parse_directives, Directive};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tar::{Archive, EntryType};

/// Script members recognized in `control/`
pub const SCRIPT_MEMBERS: &[&str] = &["preinst", "postinst", "prerm", "postrm"];

/// What kind of filesystem object a data entry is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink { target: String },
    Hardlink { target: String },
}

/// Metadata of one data member
#[derive(Debug, Clone)]
pub struct EntryMeta {
    /// Path relative to the install root, no leading slash
    pub path: String,
    pub kind: EntryKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub mtime: u64,
    pub size: u64,
}

/// The parsed contents of an archive's control area
#[derive(Debug, Default)]
pub struct ControlMembers {
    pub stanza: Paragraph,
    pub conffiles: Vec<String>,
    pub triggers: Vec<Directive>,
    /// (script name, content) for each maintainer script shipped
    pub scripts: Vec<(String, Vec<u8>)>,
}

/// One package archive on disk
pub struct PackageArchive {
    path: PathBuf,
}

impl PackageArchive {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Archive(format!(
                "cannot access archive '{}'",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_tar(&self) -> Result<Archive<GzDecoder<BufReader<File>>>> {
        let file = File::open(&self.path)?;
        Ok(Archive::new(GzDecoder::new(BufReader::new(file))))
    }

    /// Read and parse every control member
    pub fn read_control(&self) -> Result<ControlMembers> {
        let mut archive = self.open_tar()?;
        let mut members = ControlMembers::default();
        let mut saw_control = false;

        for entry in archive.entries()? {
            let mut entry = entry?;
            let member = match member_name(&entry.path()?, "control/") {
                Some(name) => name,
                None => continue,
            };
            if entry.header().entry_type() == EntryType::Directory {
                continue;
            }

            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;

            match member.as_str() {
                "control" => {
                    let mut reader =
                        StanzaReader::new(std::io::Cursor::new(&content), "control member");
                    members.stanza = reader.next_paragraph()?.ok_or_else(|| {
                        Error::Archive(format!(
                            "archive '{}' has an empty control member",
                            self.path.display()
                        ))
                    })?;
                    saw_control = true;
                }
                "conffiles" => {
                    for line in String::from_utf8_lossy(&content).lines() {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if !line.starts_with('/') {
                            return Err(Error::Archive(format!(
                                "conffile name '{}' is not an absolute path",
                                line
                            )));
                        }
                        members.conffiles.push(line.to_string());
                    }
                }
                "triggers" => {
                    members.triggers = parse_directives(&String::from_utf8_lossy(&content))?;
                }
                script if SCRIPT_MEMBERS.contains(&script) => {
                    members.scripts.push((script.to_string(), content));
                }
                other => {
                    // Checksum lists and similar are regenerated locally
                    tracing::debug!("ignoring control member '{}'", other);
                }
            }
        }

        if !saw_control {
            return Err(Error::Archive(format!(
                "archive '{}' has no control member",
                self.path.display()
            )));
        }
        Ok(members)
    }

    /// Walk data members, metadata only
    pub fn scan_data(&self, mut f: impl FnMut(&EntryMeta) -> Result<()>) -> Result<()> {
        let mut archive = self.open_tar()?;
        for entry in archive.entries()? {
            let entry = entry?;
            if let Some(meta) = data_meta(&entry)? {
                f(&meta)?;
            }
        }
        Ok(())
    }

    /// Walk data members with their content streams
    pub fn extract_data(
        &self,
        mut f: impl FnMut(&EntryMeta, &mut dyn Read) -> Result<()>,
    ) -> Result<()> {
        let mut archive = self.open_tar()?;
        for entry in archive.entries()? {
            let mut entry = entry?;
            if let Some(meta) = data_meta(&entry)? {
                f(&meta, &mut entry)?;
            }
        }
        Ok(())
    }
}

/// Strip the area prefix from a member path, tolerating a leading `./`
fn member_name(path: &Path, prefix: &str) -> Option<String> {
    let s = path.to_string_lossy();
    let s = s.strip_prefix("./").unwrap_or(&s);
    s.strip_prefix(prefix)
        .filter(|rest| !rest.is_empty())
        .map(|rest| rest.trim_end_matches('/').to_string())
}

fn data_meta<R: Read>(entry: &tar::Entry<'_, R>) -> Result<Option<EntryMeta>> {
    let path = entry.path()?;
    let rel = match member_name(&path, "data/") {
        Some(rel) => rel,
        None => return Ok(None),
    };

    let header = entry.header();
    let kind = match header.entry_type() {
        EntryType::Regular | EntryType::Continuous => EntryKind::File,
        EntryType::Directory => EntryKind::Directory,
        EntryType::Symlink => {
            let target = entry
                .link_name()?
                .map(|p| p.to_string_lossy().into_owned())
                .ok_or_else(|| Error::Archive(format!("symlink '{}' has no target", rel)))?;
            EntryKind::Symlink { target }
        }
        EntryType::Link => {
            let target = entry
                .link_name()?
                .map(|p| {
                    let s = p.to_string_lossy().into_owned();
                    let s = s.strip_prefix("./").unwrap_or(&s);
                    s.strip_prefix("data/").unwrap_or(s).to_string()
                })
                .ok_or_else(|| Error::Archive(format!("hardlink '{}' has no target", rel)))?;
            EntryKind::Hardlink { target }
        }
        other => {
            return Err(Error::Archive(format!(
                "unsupported archive member type {:?} for '{}'",
                other, rel
            )))
        }
    };

    Ok(Some(EntryMeta {
        path: rel,
        kind,
        mode: header.mode()? & 0o7777,
        uid: header.uid()? as u32,
        gid: header.gid()? as u32,
        mtime: header.mtime()?,
        size: header.size()?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn build_archive(dir: &Path, members: &[(&str, &[u8], u32)]) -> PathBuf {
        let path = dir.join("test.pkg.tar.gz");
        let file = File::create(&path).unwrap();
        let encoder = GzEncoder::new(file, Compression::fast());
        let mut builder = tar::Builder::new(encoder);

        for (name, content, mode) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(*mode);
            header.set_mtime(1_700_000_000);
            header.set_uid(0);
            header.set_gid(0);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap().flush().unwrap();
        path
    }

    #[test]
    fn test_read_control_members() {
        let dir = TempDir::new().unwrap();
        let path = build_archive(
            dir.path(),
            &[
                (
                    "control/control",
                    b"Package: foo\nVersion: 1.0\nArchitecture: amd64\n",
                    0o644,
                ),
                ("control/conffiles", b"/etc/foo.conf\n", 0o644),
                ("control/postinst", b"#!/bin/sh\nexit 0\n", 0o755),
                ("control/triggers", b"interest /usr/share/foo\n", 0o644),
                ("data/usr/bin/foo", b"binary", 0o755),
            ],
        );

        let archive = PackageArchive::open(&path).unwrap();
        let control = archive.read_control().unwrap();
        assert_eq!(control.stanza.get("Package"), Some("foo"));
        assert_eq!(control.conffiles, vec!["/etc/foo.conf"]);
        assert_eq!(control.scripts.len(), 1);
        assert_eq!(control.scripts[0].0, "postinst");
        assert_eq!(control.triggers.len(), 1);
    }

    #[test]
    fn test_missing_control_rejected() {
        let dir = TempDir::new().unwrap();
        let path = build_archive(dir.path(), &[("data/usr/bin/foo", b"x", 0o755)]);
        let archive = PackageArchive::open(&path).unwrap();
        assert!(archive.read_control().is_err());
    }

    #[test]
    fn test_scan_data_yields_metadata() {
        let dir = TempDir::new().unwrap();
        let path = build_archive(
            dir.path(),
            &[
                ("control/control", b"Package: foo\nVersion: 1.0\n", 0o644),
                ("data/usr/bin/foo", b"binary", 0o755),
                ("data/etc/foo.conf", b"conf", 0o644),
            ],
        );

        let archive = PackageArchive::open(&path).unwrap();
        let mut seen = Vec::new();
        archive
            .scan_data(|meta| {
                seen.push((meta.path.clone(), meta.mode, meta.size));
                Ok(())
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![
                ("usr/bin/foo".to_string(), 0o755, 6),
                ("etc/foo.conf".to_string(), 0o644, 4),
            ]
        );
    }

    #[test]
    fn test_extract_data_streams_content() {
        let dir = TempDir::new().unwrap();
        let path = build_archive(
            dir.path(),
            &[
                ("control/control", b"Package: foo\nVersion: 1.0\n", 0o644),
                ("data/usr/bin/foo", b"the content", 0o755),
            ],
        );

        let archive = PackageArchive::open(&path).unwrap();
        let mut captured = Vec::new();
        archive
            .extract_data(|meta, reader| {
                assert_eq!(meta.path, "usr/bin/foo");
                reader.read_to_end(&mut captured)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(captured, b"the content");
    }

    #[test]
    fn test_nonexistent_archive_rejected() {
        assert!(PackageArchive::open(Path::new("/no/such/file.tar.gz")).is_err());
    }
}
