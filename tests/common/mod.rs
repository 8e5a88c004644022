// tests/common/mod.rs

//! Shared test utilities: building package archives and opening sessions
//! against scratch admin directories.

use debpkg::session::native_arch;
use debpkg::{ForceOptions, Session};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header};
use tempfile::TempDir;

/// Declarative description of a package archive to build
pub struct PackageSpec {
    pub name: String,
    pub version: String,
    pub extra_control: Vec<(String, String)>,
    /// (path without leading slash, content, mode)
    pub files: Vec<(String, Vec<u8>, u32)>,
    /// Absolute conffile paths (must also appear in `files`)
    pub conffiles: Vec<String>,
    /// (script name, content)
    pub scripts: Vec<(String, String)>,
    /// Trigger control member, verbatim
    pub triggers: Option<String>,
}

impl PackageSpec {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            extra_control: Vec::new(),
            files: Vec::new(),
            conffiles: Vec::new(),
            scripts: Vec::new(),
            triggers: None,
        }
    }

    pub fn control(mut self, field: &str, value: &str) -> Self {
        self.extra_control
            .push((field.to_string(), value.to_string()));
        self
    }

    pub fn file(mut self, path: &str, content: &str, mode: u32) -> Self {
        self.files
            .push((path.trim_start_matches('/').to_string(), content.as_bytes().to_vec(), mode));
        self
    }

    pub fn conffile(mut self, path: &str, content: &str) -> Self {
        self.conffiles.push(path.to_string());
        self.files.push((
            path.trim_start_matches('/').to_string(),
            content.as_bytes().to_vec(),
            0o644,
        ));
        self
    }

    pub fn script(mut self, name: &str, content: &str) -> Self {
        self.scripts.push((name.to_string(), content.to_string()));
        self
    }

    pub fn triggers(mut self, content: &str) -> Self {
        self.triggers = Some(content.to_string());
        self
    }

    /// Write the archive into `dir` and return its path
    pub fn build(&self, dir: &Path) -> PathBuf {
        let path = dir.join(format!("{}_{}.pkg.tar.gz", self.name, self.version));
        let file = File::create(&path).unwrap();
        let encoder = GzEncoder::new(file, Compression::fast());
        let mut builder = Builder::new(encoder);

        let mut control = format!(
            "Package: {}\nVersion: {}\nArchitecture: {}\n",
            self.name,
            self.version,
            native_arch()
        );
        for (field, value) in &self.extra_control {
            control.push_str(&format!("{}: {}\n", field, value));
        }
        append_file(&mut builder, "control/control", control.as_bytes(), 0o644);

        if !self.conffiles.is_empty() {
            let mut text = self.conffiles.join("\n");
            text.push('\n');
            append_file(&mut builder, "control/conffiles", text.as_bytes(), 0o644);
        }
        for (name, content) in &self.scripts {
            append_file(
                &mut builder,
                &format!("control/{}", name),
                content.as_bytes(),
                0o755,
            );
        }
        if let Some(triggers) = &self.triggers {
            append_file(&mut builder, "control/triggers", triggers.as_bytes(), 0o644);
        }

        // Parent directories first, deduplicated, shallowest first
        let mut dirs = BTreeSet::new();
        for (path, _, _) in &self.files {
            let mut prefix = String::new();
            for seg in path.split('/').take(path.split('/').count() - 1) {
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(seg);
                dirs.insert(prefix.clone());
            }
        }
        for dir in dirs {
            append_dir(&mut builder, &format!("data/{}", dir));
        }
        for (path, content, mode) in &self.files {
            append_file(&mut builder, &format!("data/{}", path), content, *mode);
        }

        builder
            .into_inner()
            .unwrap()
            .finish()
            .unwrap()
            .flush()
            .unwrap();
        path
    }
}

fn append_file<W: Write>(builder: &mut Builder<W>, name: &str, content: &[u8], mode: u32) {
    let mut header = Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(mode);
    header.set_mtime(1_700_000_000);
    header.set_uid(0);
    header.set_gid(0);
    header.set_cksum();
    builder.append_data(&mut header, name, content).unwrap();
}

fn append_dir<W: Write>(builder: &mut Builder<W>, name: &str) {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    header.set_mode(0o755);
    header.set_mtime(1_700_000_000);
    header.set_uid(0);
    header.set_gid(0);
    header.set_cksum();
    builder
        .append_data(&mut header, format!("{}/", name), std::io::empty())
        .unwrap();
}

/// A scratch environment: admin dir, install root and archive scratch
pub struct TestEnv {
    pub admin: TempDir,
    pub root: TempDir,
    pub scratch: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            admin: TempDir::new().unwrap(),
            root: TempDir::new().unwrap(),
            scratch: TempDir::new().unwrap(),
        }
    }

    pub fn session(&self) -> Session {
        self.session_with(ForceOptions::default())
    }

    pub fn session_with(&self, force: ForceOptions) -> Session {
        debpkg::session::open_at(self.admin.path(), self.root.path(), force).unwrap()
    }

    /// Absolute on-disk path for a canonical package path
    pub fn disk(&self, canonical: &str) -> PathBuf {
        self.root.path().join(canonical.trim_start_matches('/'))
    }

    pub fn build(&self, spec: &PackageSpec) -> PathBuf {
        spec.build(self.scratch.path())
    }
}

/// Prompter for tests that must never be asked anything
pub struct NeverPrompt;

impl debpkg::conffile::Prompter for NeverPrompt {
    fn ask(
        &mut self,
        pkg: &str,
        path: &str,
        _default_install: bool,
    ) -> debpkg::conffile::PromptAnswer {
        panic!("unexpected conffile prompt for {} ({})", path, pkg);
    }
}
