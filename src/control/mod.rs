// src/control/mod.rs

//! Control-stanza grammar: streaming reader and round-trip writer.
//!
//! A paragraph is a sequence of `Name: value` fields separated from the next
//! paragraph by a blank line. Continuation lines begin with a space or tab.
//! Field names are case-insensitive; their order within a stanza is preserved
//! so a parsed paragraph can be written back faithfully.

mod fields;

pub use fields::{
    apply_field, paragraph_into_package, DecodeContext, Draft, FieldDecoder, Slot, FIELD_REGISTRY,
};

use crate::error::{Error, Result};
use std::io::BufRead;

/// A single field: name as read, value with embedded newlines for
/// continuation lines (each stored without its leading continuation blank).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
}

/// An ordered set of fields with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paragraph {
    fields: Vec<Field>,
}

impl Paragraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a field value by case-insensitive name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    /// Append a field. Caller is responsible for duplicate checking when the
    /// paragraph is built by hand.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push(Field {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Replace an existing field value or append a new field
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        match self
            .fields
            .iter_mut()
            .find(|f| f.name.eq_ignore_ascii_case(name))
        {
            Some(field) => field.value = value.into(),
            None => self.push(name.to_string(), value),
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    /// Render the paragraph, continuation lines prefixed with a single space.
    /// No trailing blank line is emitted.
    pub fn write_to(&self, out: &mut impl std::io::Write) -> std::io::Result<()> {
        for field in &self.fields {
            let mut lines = field.value.split('\n');
            let first = lines.next().unwrap_or("");
            if first.is_empty() && field.value.contains('\n') {
                // Multiline value with an empty first line renders as `Name:`
                writeln!(out, "{}:", field.name)?;
            } else {
                writeln!(out, "{}: {}", field.name, first)?;
            }
            for cont in lines {
                writeln!(out, " {}", cont)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Paragraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut buf = Vec::new();
        self.write_to(&mut buf).map_err(|_| std::fmt::Error)?;
        f.write_str(&String::from_utf8_lossy(&buf))
    }
}

/// Streaming stanza reader over any buffered source
pub struct StanzaReader<R: BufRead> {
    reader: R,
    filename: String,
    line: usize,
}

impl<R: BufRead> StanzaReader<R> {
    pub fn new(reader: R, filename: impl Into<String>) -> Self {
        Self {
            reader,
            filename: filename.into(),
            line: 0,
        }
    }

    fn parse_error(&self, msg: impl Into<String>) -> Error {
        Error::Parse {
            file: self.filename.clone(),
            line: self.line,
            msg: msg.into(),
        }
    }

    /// Read the next paragraph, or `None` at end of input
    pub fn next_paragraph(&mut self) -> Result<Option<Paragraph>> {
        let mut paragraph = Paragraph::new();
        let mut buf = String::new();

        loop {
            buf.clear();
            let n = self.reader.read_line(&mut buf)?;
            if n == 0 {
                // EOF
                if paragraph.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(paragraph));
            }
            self.line += 1;

            let line = buf.trim_end_matches(['\n', '\r']);
            let trimmed = line.trim_end_matches([' ', '\t']);

            if trimmed.is_empty() {
                if paragraph.is_empty() {
                    // Leading blank lines before a stanza are ignored
                    continue;
                }
                return Ok(Some(paragraph));
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                // Continuation of the previous field
                let last = paragraph.fields.last_mut().ok_or_else(|| {
                    self.parse_error("continuation line outside a field")
                })?;
                last.value.push('\n');
                last.value.push_str(&trimmed[1..]);
                continue;
            }

            let colon = trimmed
                .find(':')
                .ok_or_else(|| self.parse_error(format!("line '{}' has no colon", trimmed)))?;
            let name = &trimmed[..colon];
            if name.is_empty() {
                return Err(self.parse_error("field name is empty"));
            }
            if name.contains(char::is_whitespace) {
                return Err(self.parse_error(format!("field name '{}' contains whitespace", name)));
            }
            if paragraph.get(name).is_some() {
                return Err(self.parse_error(format!("duplicate field '{}'", name)));
            }

            let value = trimmed[colon + 1..].trim_start_matches([' ', '\t']);
            paragraph.push(name.to_string(), value.to_string());
        }
    }

    /// Collect every remaining paragraph
    pub fn collect_paragraphs(&mut self) -> Result<Vec<Paragraph>> {
        let mut out = Vec::new();
        while let Some(p) = self.next_paragraph()? {
            out.push(p);
        }
        Ok(out)
    }
}
