// src/control/fields.rs

//! Static field registry: known stanza fields and their typed decoders.
//!
//! Decoders fill a [`Draft`] that callers then install into one of the
//! package's metadata slots. Unknown fields are retained verbatim, in input
//! order, so stanzas round-trip.

use crate::control::Paragraph;
use crate::db::models::{Conffile, Eflag, MultiArch, Package, PackageBinary, PkgStatus, Want};
use crate::deps::parse_depends;
use crate::error::{Error, Result};
use crate::version::Version;
use tracing::warn;

/// How strictly to treat a stanza source
#[derive(Debug, Clone)]
pub struct DecodeContext {
    /// Source name for diagnostics
    pub filename: String,
    /// Whether a Status field is meaningful here (status file only)
    pub accept_status: bool,
    /// Downgrade warning-class version defects to diagnostics
    pub lax_versions: bool,
}

impl DecodeContext {
    pub fn status_file(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            accept_status: true,
            lax_versions: true,
        }
    }

    pub fn available_file(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            accept_status: false,
            lax_versions: true,
        }
    }

    pub fn archive_control(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            accept_status: false,
            lax_versions: false,
        }
    }
}

/// Which metadata slot a stanza describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Installed,
    Available,
}

/// Intermediate decode target; one stanza's worth of state
#[derive(Debug, Default)]
pub struct Draft {
    pub name: Option<String>,
    pub want: Option<Want>,
    pub eflag: Option<Eflag>,
    pub status: Option<PkgStatus>,
    pub config_version: Option<Version>,
    pub triggers_pending: Vec<String>,
    pub triggers_awaited: Vec<String>,
    pub bin: PackageBinary,
}

pub type FieldDecoder = fn(&mut Draft, &str, &DecodeContext) -> Result<()>;

/// Known fields in canonical write order
pub static FIELD_REGISTRY: &[(&str, FieldDecoder)] = &[
    ("Package", decode_package),
    ("Status", decode_status),
    ("Essential", decode_essential),
    ("Priority", decode_priority),
    ("Section", decode_section),
    ("Installed-Size", decode_installed_size),
    ("Maintainer", decode_maintainer),
    ("Architecture", decode_architecture),
    ("Multi-Arch", decode_multiarch),
    ("Source", decode_source),
    ("Version", decode_version),
    ("Config-Version", decode_config_version),
    ("Replaces", decode_replaces),
    ("Provides", decode_provides),
    ("Depends", decode_depends),
    ("Pre-Depends", decode_pre_depends),
    ("Recommends", decode_recommends),
    ("Suggests", decode_suggests),
    ("Breaks", decode_breaks),
    ("Conflicts", decode_conflicts),
    ("Enhances", decode_enhances),
    ("Conffiles", decode_conffiles),
    ("Description", decode_description),
    ("Triggers-Pending", decode_triggers_pending),
    ("Triggers-Awaited", decode_triggers_awaited),
];

/// Apply one field to the draft: known fields decode, unknown fields are
/// kept verbatim.
pub fn apply_field(draft: &mut Draft, name: &str, value: &str, ctx: &DecodeContext) -> Result<()> {
    for (known, decoder) in FIELD_REGISTRY {
        if known.eq_ignore_ascii_case(name) {
            return decoder(draft, value, ctx);
        }
    }
    draft.bin.extra.push((name.to_string(), value.to_string()));
    Ok(())
}

/// Decode a whole stanza into a package record with the given slot filled
pub fn paragraph_into_package(p: &Paragraph, slot: Slot, ctx: &DecodeContext) -> Result<Package> {
    let mut draft = Draft::default();
    for field in p.fields() {
        apply_field(&mut draft, &field.name, &field.value, ctx)?;
    }

    let name = draft.name.ok_or_else(|| {
        Error::Parse {
            file: ctx.filename.clone(),
            line: 0,
            msg: "stanza has no Package field".to_string(),
        }
    })?;

    let arch = draft.bin.architecture.clone().unwrap_or_default();
    let mut pkg = Package::new(name, arch);
    pkg.want = draft.want.unwrap_or_default();
    pkg.eflag = draft.eflag.unwrap_or_default();
    pkg.status = draft.status.unwrap_or_default();
    pkg.config_version = draft.config_version;
    pkg.triggers_pending = draft.triggers_pending;
    pkg.triggers_awaited = draft.triggers_awaited;
    match slot {
        Slot::Installed => pkg.installed = draft.bin,
        Slot::Available => pkg.available = draft.bin,
    }
    Ok(pkg)
}

fn field_error(ctx: &DecodeContext, msg: String) -> Error {
    Error::Parse {
        file: ctx.filename.clone(),
        line: 0,
        msg,
    }
}

fn decode_version_value(value: &str, ctx: &DecodeContext, field: &str) -> Result<Option<Version>> {
    if value.is_empty() {
        return Ok(None);
    }
    if ctx.lax_versions {
        let (version, warnings) = Version::parse_lax(value)
            .map_err(|e| field_error(ctx, format!("{} field: {}", field, e)))?;
        for w in warnings {
            warn!("{}: {} field '{}': {}", ctx.filename, field, value, w);
        }
        Ok(Some(version))
    } else {
        Ok(Some(Version::parse(value).map_err(|e| {
            field_error(ctx, format!("{} field: {}", field, e))
        })?))
    }
}

fn decode_package(draft: &mut Draft, value: &str, ctx: &DecodeContext) -> Result<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(field_error(ctx, "Package field is empty".to_string()));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '-' | '+' | '.' | '_'))
    {
        return Err(field_error(
            ctx,
            format!("invalid character '{}' in package name '{}'", c, value),
        ));
    }
    draft.name = Some(value.to_ascii_lowercase());
    Ok(())
}

fn decode_status(draft: &mut Draft, value: &str, ctx: &DecodeContext) -> Result<()> {
    if !ctx.accept_status {
        warn!("{}: ignoring Status field outside the status file", ctx.filename);
        return Ok(());
    }
    let mut words = value.split_ascii_whitespace();
    let want = words
        .next()
        .and_then(Want::parse)
        .ok_or_else(|| field_error(ctx, format!("bad want in Status '{}'", value)))?;
    let eflag = words
        .next()
        .and_then(Eflag::parse)
        .ok_or_else(|| field_error(ctx, format!("bad eflag in Status '{}'", value)))?;
    let status = words
        .next()
        .and_then(PkgStatus::parse)
        .ok_or_else(|| field_error(ctx, format!("bad status in Status '{}'", value)))?;
    if words.next().is_some() {
        return Err(field_error(ctx, format!("junk after Status '{}'", value)));
    }
    draft.want = Some(want);
    draft.eflag = Some(eflag);
    draft.status = Some(status);
    Ok(())
}

fn decode_essential(draft: &mut Draft, value: &str, ctx: &DecodeContext) -> Result<()> {
    match value.trim() {
        "yes" => draft.bin.essential = true,
        "no" => draft.bin.essential = false,
        other => {
            return Err(field_error(
                ctx,
                format!("Essential field value must be yes or no, not '{}'", other),
            ))
        }
    }
    Ok(())
}

fn decode_priority(draft: &mut Draft, value: &str, _ctx: &DecodeContext) -> Result<()> {
    draft.bin.priority = Some(value.to_string());
    Ok(())
}

fn decode_section(draft: &mut Draft, value: &str, _ctx: &DecodeContext) -> Result<()> {
    draft.bin.section = Some(value.to_string());
    Ok(())
}

fn decode_installed_size(draft: &mut Draft, value: &str, ctx: &DecodeContext) -> Result<()> {
    draft.bin.installed_size = Some(value.trim().parse::<u64>().map_err(|_| {
        field_error(ctx, format!("Installed-Size '{}' is not a number", value))
    })?);
    Ok(())
}

fn decode_maintainer(draft: &mut Draft, value: &str, _ctx: &DecodeContext) -> Result<()> {
    draft.bin.maintainer = Some(value.to_string());
    Ok(())
}

fn decode_architecture(draft: &mut Draft, value: &str, _ctx: &DecodeContext) -> Result<()> {
    draft.bin.architecture = Some(value.trim().to_string());
    Ok(())
}

fn decode_multiarch(draft: &mut Draft, value: &str, ctx: &DecodeContext) -> Result<()> {
    draft.bin.multiarch = MultiArch::parse(value.trim())
        .ok_or_else(|| field_error(ctx, format!("unknown Multi-Arch value '{}'", value)))?;
    Ok(())
}

fn decode_source(draft: &mut Draft, value: &str, _ctx: &DecodeContext) -> Result<()> {
    draft.bin.source = Some(value.to_string());
    Ok(())
}

fn decode_version(draft: &mut Draft, value: &str, ctx: &DecodeContext) -> Result<()> {
    draft.bin.version = decode_version_value(value.trim(), ctx, "Version")?;
    Ok(())
}

fn decode_config_version(draft: &mut Draft, value: &str, ctx: &DecodeContext) -> Result<()> {
    draft.config_version = decode_version_value(value.trim(), ctx, "Config-Version")?;
    Ok(())
}

macro_rules! dep_decoder {
    ($fn_name:ident, $field:ident, $name:literal) => {
        fn $fn_name(draft: &mut Draft, value: &str, _ctx: &DecodeContext) -> Result<()> {
            draft.bin.$field = parse_depends($name, value)?;
            Ok(())
        }
    };
}

dep_decoder!(decode_replaces, replaces, "Replaces");
dep_decoder!(decode_provides, provides, "Provides");
dep_decoder!(decode_depends, depends, "Depends");
dep_decoder!(decode_pre_depends, pre_depends, "Pre-Depends");
dep_decoder!(decode_recommends, recommends, "Recommends");
dep_decoder!(decode_suggests, suggests, "Suggests");
dep_decoder!(decode_breaks, breaks, "Breaks");
dep_decoder!(decode_conflicts, conflicts, "Conflicts");
dep_decoder!(decode_enhances, enhances, "Enhances");

fn decode_conffiles(draft: &mut Draft, value: &str, ctx: &DecodeContext) -> Result<()> {
    for line in value.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut words = line.split_ascii_whitespace();
        let path = words
            .next()
            .ok_or_else(|| field_error(ctx, "empty conffile entry".to_string()))?;
        if !path.starts_with('/') {
            return Err(field_error(
                ctx,
                format!("conffile path '{}' is not absolute", path),
            ));
        }
        let hash = words
            .next()
            .ok_or_else(|| field_error(ctx, format!("conffile '{}' has no hash", path)))?;
        let obsolete = match words.next() {
            None => false,
            Some("obsolete") => true,
            Some(junk) => {
                return Err(field_error(
                    ctx,
                    format!("junk '{}' after conffile entry '{}'", junk, path),
                ))
            }
        };
        draft.bin.conffiles.push(Conffile {
            path: path.to_string(),
            hash: hash.to_string(),
            obsolete,
        });
    }
    Ok(())
}

fn decode_description(draft: &mut Draft, value: &str, _ctx: &DecodeContext) -> Result<()> {
    draft.bin.description = Some(value.to_string());
    Ok(())
}

fn decode_triggers_pending(draft: &mut Draft, value: &str, _ctx: &DecodeContext) -> Result<()> {
    draft.triggers_pending = value
        .split_ascii_whitespace()
        .map(str::to_string)
        .collect();
    Ok(())
}

fn decode_triggers_awaited(draft: &mut Draft, value: &str, _ctx: &DecodeContext) -> Result<()> {
    draft.triggers_awaited = value
        .split_ascii_whitespace()
        .map(str::to_string)
        .collect();
    Ok(())
}
