// src/deps/mod.rs

//! Dependency expressions: and-of-or over atoms.
//!
//! A relationship field like `Depends: a (>= 1.0) | b, c [amd64]` parses into
//! a conjunction of [`DepGroup`]s, each holding one or more alternative
//! [`DepAtom`]s. Conflicts/Breaks/Replaces/Provides use the same grammar with
//! single-atom groups.

mod check;

pub use check::{ConflictKind, ConflictViolation, DepChecker, DepResult, DepView};

use crate::error::{Error, Result};
use crate::version::{Version, VersionRelation};
use std::fmt;

/// One relationship atom: a package name with optional architecture
/// qualifier, version constraint and architecture restriction list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepAtom {
    pub package: String,
    /// `pkg:any` style qualifier
    pub arch_qualifier: Option<String>,
    pub constraint: Option<(VersionRelation, Version)>,
    /// `[amd64 !i386]` restrictions; empty means applicable everywhere
    pub arch_restriction: Vec<ArchRestriction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchRestriction {
    pub negated: bool,
    pub arch: String,
}

impl DepAtom {
    /// True when the atom applies on the given host architecture
    pub fn applies_on(&self, arch: &str) -> bool {
        if self.arch_restriction.is_empty() {
            return true;
        }
        let negated = self.arch_restriction[0].negated;
        if negated {
            // Negated lists exclude the named architectures
            !self
                .arch_restriction
                .iter()
                .any(|r| r.arch.eq_ignore_ascii_case(arch))
        } else {
            self.arch_restriction
                .iter()
                .any(|r| r.arch.eq_ignore_ascii_case(arch))
        }
    }

    /// Check a concrete version against this atom's constraint, if any
    pub fn version_matches(&self, version: &Version) -> bool {
        match &self.constraint {
            Some((rel, reference)) => rel.satisfied_by(version, reference),
            None => true,
        }
    }
}

impl fmt::Display for DepAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.package)?;
        if let Some(q) = &self.arch_qualifier {
            write!(f, ":{}", q)?;
        }
        if let Some((rel, ver)) = &self.constraint {
            write!(f, " ({} {})", rel, ver)?;
        }
        if !self.arch_restriction.is_empty() {
            write!(f, " [")?;
            for (i, r) in self.arch_restriction.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                if r.negated {
                    write!(f, "!")?;
                }
                write!(f, "{}", r.arch)?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// A disjunction of alternatives; satisfied when any atom is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepGroup {
    pub alternatives: Vec<DepAtom>,
}

impl fmt::Display for DepGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, atom) in self.alternatives.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{}", atom)?;
        }
        Ok(())
    }
}

/// Render a conjunction back into field-value syntax
pub fn format_depends(groups: &[DepGroup]) -> String {
    groups
        .iter()
        .map(|g| g.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a relationship field value into its conjunction of groups
pub fn parse_depends(field_name: &str, value: &str) -> Result<Vec<DepGroup>> {
    let mut groups = Vec::new();
    for group_str in value.split(',') {
        let group_str = group_str.trim();
        if group_str.is_empty() {
            continue;
        }
        let mut alternatives = Vec::new();
        for atom_str in group_str.split('|') {
            alternatives.push(parse_atom(field_name, atom_str.trim())?);
        }
        groups.push(DepGroup { alternatives });
    }
    Ok(groups)
}

fn parse_atom(field_name: &str, s: &str) -> Result<DepAtom> {
    let bad = |msg: String| Error::Depends(format!("in field '{}': {}", field_name, msg));

    if s.is_empty() {
        return Err(bad("empty package name in dependency".into()));
    }

    // Package name runs until whitespace, '(' or '['
    let name_end = s
        .find(|c: char| c.is_ascii_whitespace() || c == '(' || c == '[')
        .unwrap_or(s.len());
    let name_part = &s[..name_end];
    let mut rest = s[name_end..].trim_start();

    let (package, arch_qualifier) = match name_part.find(':') {
        Some(pos) => (
            name_part[..pos].to_string(),
            Some(name_part[pos + 1..].to_string()),
        ),
        None => (name_part.to_string(), None),
    };
    if package.is_empty() {
        return Err(bad(format!("missing package name in '{}'", s)));
    }
    if let Some(c) = package
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '-' | '+' | '.' | '_'))
    {
        return Err(bad(format!("invalid character '{}' in package name '{}'", c, package)));
    }

    let mut constraint = None;
    if let Some(stripped) = rest.strip_prefix('(') {
        let close = stripped
            .find(')')
            .ok_or_else(|| bad(format!("unclosed version constraint in '{}'", s)))?;
        let inner = stripped[..close].trim();
        rest = stripped[close + 1..].trim_start();

        let op_end = inner
            .find(|c: char| !matches!(c, '<' | '>' | '='))
            .unwrap_or(inner.len());
        let op = &inner[..op_end];
        let rel = VersionRelation::parse(op)
            .ok_or_else(|| bad(format!("invalid version relation '{}' in '{}'", op, s)))?;
        let version = Version::parse(inner[op_end..].trim())
            .map_err(|e| bad(format!("bad version in '{}': {}", s, e)))?;
        constraint = Some((rel, version));
    }

    let mut arch_restriction = Vec::new();
    if let Some(stripped) = rest.strip_prefix('[') {
        let close = stripped
            .find(']')
            .ok_or_else(|| bad(format!("unclosed architecture restriction in '{}'", s)))?;
        for word in stripped[..close].split_ascii_whitespace() {
            let (negated, arch) = match word.strip_prefix('!') {
                Some(a) => (true, a),
                None => (false, word),
            };
            if arch.is_empty() {
                return Err(bad(format!("empty architecture in restriction of '{}'", s)));
            }
            arch_restriction.push(ArchRestriction {
                negated,
                arch: arch.to_string(),
            });
        }
        rest = stripped[close + 1..].trim_start();
    }

    if !rest.is_empty() {
        return Err(bad(format!("junk after dependency atom: '{}'", rest)));
    }

    Ok(DepAtom {
        package,
        arch_qualifier,
        constraint,
        arch_restriction,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(s: &str) -> DepAtom {
        let groups = parse_depends("Depends", s).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].alternatives.len(), 1);
        groups[0].alternatives[0].clone()
    }

    #[test]
    fn test_parse_bare_name() {
        let atom = parse_one("libc6");
        assert_eq!(atom.package, "libc6");
        assert!(atom.constraint.is_none());
        assert!(atom.arch_qualifier.is_none());
    }

    #[test]
    fn test_parse_versioned() {
        let atom = parse_one("libc6 (>= 2.31)");
        let (rel, ver) = atom.constraint.unwrap();
        assert_eq!(rel, VersionRelation::LaterOrEqual);
        assert_eq!(ver.to_string(), "2.31");
    }

    #[test]
    fn test_parse_arch_qualifier() {
        let atom = parse_one("python3:any (>= 3.9)");
        assert_eq!(atom.package, "python3");
        assert_eq!(atom.arch_qualifier.as_deref(), Some("any"));
    }

    #[test]
    fn test_parse_arch_restriction() {
        let atom = parse_one("libnuma1 [amd64 arm64]");
        assert_eq!(atom.arch_restriction.len(), 2);
        assert!(atom.applies_on("amd64"));
        assert!(!atom.applies_on("i386"));

        let atom = parse_one("libfoo [!s390x]");
        assert!(atom.applies_on("amd64"));
        assert!(!atom.applies_on("s390x"));
    }

    #[test]
    fn test_parse_alternatives_and_conjunction() {
        let groups = parse_depends("Depends", "mawk | gawk, libc6 (>= 2.31)").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].alternatives.len(), 2);
        assert_eq!(groups[0].alternatives[1].package, "gawk");
        assert_eq!(groups[1].alternatives[0].package, "libc6");
    }

    #[test]
    fn test_parse_rejects_bad_operator() {
        assert!(parse_depends("Depends", "foo (== 1.0)").is_err());
        assert!(parse_depends("Depends", "foo (~> 1.0)").is_err());
    }

    #[test]
    fn test_parse_rejects_junk() {
        assert!(parse_depends("Depends", "foo (>= 1.0) junk").is_err());
        assert!(parse_depends("Depends", "foo (>= 1.0").is_err());
        assert!(parse_depends("Depends", "b@d").is_err());
    }

    #[test]
    fn test_format_roundtrip() {
        let input = "mawk | gawk (>= 1:5.0), libc6 (>= 2.31), libfoo [!i386]";
        let groups = parse_depends("Depends", input).unwrap();
        let formatted = format_depends(&groups);
        let reparsed = parse_depends("Depends", &formatted).unwrap();
        assert_eq!(groups, reparsed);
    }

    #[test]
    fn test_empty_value_yields_no_groups() {
        assert!(parse_depends("Depends", "").unwrap().is_empty());
        assert!(parse_depends("Depends", "  ").unwrap().is_empty());
    }
}
