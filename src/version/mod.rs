// src/version/mod.rs

//! Version parsing, formatting and total ordering.
//!
//! Versions have the shape `[epoch:]upstream[-revision]`. The epoch is a
//! non-negative decimal integer (default 0); the revision is split off at the
//! last hyphen. Upstream and revision compare by alternating runs of
//! non-digits and digits, with a custom character order in which letters sort
//! before non-letters and `~` sorts before everything including end-of-string
//! (so `1.0~rc1` < `1.0`).

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Version parse defects.
///
/// The warning-class defects (`is_warning() == true`) are hard errors from
/// strict parse paths and downgraded to diagnostics when reading the status
/// file, which must always be loadable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("version string is empty")]
    EmptyVersion,

    #[error("version string has embedded spaces")]
    EmbeddedSpaces,

    #[error("epoch in version is empty")]
    EmptyEpoch,

    #[error("epoch in version is not a number")]
    NonNumericEpoch,

    #[error("epoch in version is negative")]
    NegativeEpoch,

    #[error("epoch in version is too big")]
    EpochTooLarge,

    #[error("nothing after colon in version number")]
    EmptyAfterEpochColon,

    #[error("revision in version is empty")]
    EmptyRevision,

    #[error("upstream version does not start with a digit")]
    UpstreamDoesNotStartWithDigit,

    #[error("invalid character '{0}' in version number")]
    InvalidCharInVersion(char),

    #[error("invalid character '{0}' in revision number")]
    InvalidCharInRevision(char),
}

impl VersionError {
    /// Warning-class defects survive lax parsing; the rest never do.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            VersionError::UpstreamDoesNotStartWithDigit
                | VersionError::InvalidCharInVersion(_)
                | VersionError::InvalidCharInRevision(_)
        )
    }
}

/// A parsed package version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub epoch: u32,
    pub upstream: String,
    pub revision: String,
}

impl Version {
    /// Parse a version string, rejecting every defect.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let (version, warnings) = Self::parse_lax(s)?;
        if let Some(warn) = warnings.into_iter().next() {
            return Err(warn);
        }
        Ok(version)
    }

    /// Parse a version string, collecting warning-class defects instead of
    /// failing on them. Structural defects still fail.
    pub fn parse_lax(s: &str) -> Result<(Self, Vec<VersionError>), VersionError> {
        let s = s.trim_matches(|c| c == ' ' || c == '\t');
        if s.is_empty() {
            return Err(VersionError::EmptyVersion);
        }
        if s.contains(' ') || s.contains('\t') {
            return Err(VersionError::EmbeddedSpaces);
        }

        let mut warnings = Vec::new();

        let (epoch, rest) = match s.find(':') {
            Some(pos) => {
                let epoch_str = &s[..pos];
                if epoch_str.is_empty() {
                    return Err(VersionError::EmptyEpoch);
                }
                if epoch_str.starts_with('-') && epoch_str[1..].chars().all(|c| c.is_ascii_digit())
                {
                    return Err(VersionError::NegativeEpoch);
                }
                if !epoch_str.chars().all(|c| c.is_ascii_digit()) {
                    return Err(VersionError::NonNumericEpoch);
                }
                let epoch = epoch_str
                    .parse::<u32>()
                    .map_err(|_| VersionError::EpochTooLarge)?;
                let rest = &s[pos + 1..];
                if rest.is_empty() {
                    return Err(VersionError::EmptyAfterEpochColon);
                }
                (epoch, rest)
            }
            None => (0, s),
        };

        let (upstream, revision) = match rest.rfind('-') {
            Some(pos) => {
                let revision = &rest[pos + 1..];
                if revision.is_empty() {
                    return Err(VersionError::EmptyRevision);
                }
                (&rest[..pos], revision)
            }
            None => (rest, ""),
        };

        if !upstream.starts_with(|c: char| c.is_ascii_digit()) {
            warnings.push(VersionError::UpstreamDoesNotStartWithDigit);
        }
        for c in upstream.chars() {
            if !c.is_ascii_alphanumeric() && !matches!(c, '.' | '-' | '+' | '~' | ':') {
                warnings.push(VersionError::InvalidCharInVersion(c));
                break;
            }
        }
        for c in revision.chars() {
            if !c.is_ascii_alphanumeric() && !matches!(c, '.' | '+' | '~') {
                warnings.push(VersionError::InvalidCharInRevision(c));
                break;
            }
        }

        Ok((
            Self {
                epoch,
                upstream: upstream.to_string(),
                revision: revision.to_string(),
            },
            warnings,
        ))
    }

    /// Compare two versions: epoch, then upstream, then revision
    pub fn compare(&self, other: &Version) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match verrevcmp(&self.upstream, &other.upstream) {
            Ordering::Equal => {}
            ord => return ord,
        }
        verrevcmp(&self.revision, &other.revision)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // A zero epoch is printed anyway when the upstream part contains a
        // colon, which would otherwise be misread as an epoch separator.
        if self.epoch > 0 || self.upstream.contains(':') || self.revision.contains(':') {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.upstream)?;
        if !self.revision.is_empty() {
            write!(f, "-{}", self.revision)?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Character weight for the upstream/revision comparison. Letters sort before
/// non-letters, `~` before everything including end-of-string.
fn char_order(c: u8) -> i32 {
    if c.is_ascii_alphabetic() {
        c as i32
    } else if c == b'~' {
        -1
    } else {
        c as i32 + 256
    }
}

/// Compare upstream or revision strings by alternating non-digit and digit
/// runs. Digit runs compare as integers with leading zeros insignificant.
fn verrevcmp(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0usize, 0usize);

    while i < a.len() || j < b.len() {
        // Non-digit run, including the virtual end-of-string character.
        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit()) {
            let ac = if i < a.len() && !a[i].is_ascii_digit() {
                char_order(a[i])
            } else {
                0
            };
            let bc = if j < b.len() && !b[j].is_ascii_digit() {
                char_order(b[j])
            } else {
                0
            };
            match ac.cmp(&bc) {
                Ordering::Equal => {}
                ord => return ord,
            }
            if i < a.len() && !a[i].is_ascii_digit() {
                i += 1;
            }
            if j < b.len() && !b[j].is_ascii_digit() {
                j += 1;
            }
        }

        while i < a.len() && a[i] == b'0' {
            i += 1;
        }
        while j < b.len() && b[j] == b'0' {
            j += 1;
        }

        let mut first_diff = Ordering::Equal;
        while i < a.len() && j < b.len() && a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            if first_diff == Ordering::Equal {
                first_diff = a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }
        if i < a.len() && a[i].is_ascii_digit() {
            return Ordering::Greater;
        }
        if j < b.len() && b[j].is_ascii_digit() {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }

    Ordering::Equal
}

/// Version constraint operators used in dependency atoms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionRelation {
    /// `<<` strictly earlier
    StrictlyEarlier,
    /// `<=` earlier or equal
    EarlierOrEqual,
    /// `=` exactly equal
    Exact,
    /// `>=` later or equal
    LaterOrEqual,
    /// `>>` strictly later
    StrictlyLater,
}

impl VersionRelation {
    /// Parse an operator token
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "<<" => Some(Self::StrictlyEarlier),
            "<=" => Some(Self::EarlierOrEqual),
            "=" => Some(Self::Exact),
            ">=" => Some(Self::LaterOrEqual),
            ">>" => Some(Self::StrictlyLater),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrictlyEarlier => "<<",
            Self::EarlierOrEqual => "<=",
            Self::Exact => "=",
            Self::LaterOrEqual => ">=",
            Self::StrictlyLater => ">>",
        }
    }

    /// Check whether `candidate` satisfies `candidate <rel> reference`
    pub fn satisfied_by(&self, candidate: &Version, reference: &Version) -> bool {
        let ord = candidate.compare(reference);
        match self {
            Self::StrictlyEarlier => ord == Ordering::Less,
            Self::EarlierOrEqual => ord != Ordering::Greater,
            Self::Exact => ord == Ordering::Equal,
            Self::LaterOrEqual => ord != Ordering::Less,
            Self::StrictlyLater => ord == Ordering::Greater,
        }
    }
}

impl fmt::Display for VersionRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn cmp(a: &str, b: &str) -> Ordering {
        v(a).compare(&v(b))
    }

    #[test]
    fn test_parse_simple() {
        let ver = v("1.2.3");
        assert_eq!(ver.epoch, 0);
        assert_eq!(ver.upstream, "1.2.3");
        assert_eq!(ver.revision, "");
    }

    #[test]
    fn test_parse_with_epoch_and_revision() {
        let ver = v("2:1.2.3-4");
        assert_eq!(ver.epoch, 2);
        assert_eq!(ver.upstream, "1.2.3");
        assert_eq!(ver.revision, "4");
    }

    #[test]
    fn test_parse_embedded_hyphen_goes_to_upstream() {
        let ver = v("1.2-rc1-3");
        assert_eq!(ver.upstream, "1.2-rc1");
        assert_eq!(ver.revision, "3");
    }

    #[test]
    fn test_parse_strips_whitespace() {
        assert_eq!(v("  1.0  "), v("1.0"));
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(Version::parse(""), Err(VersionError::EmptyVersion));
        assert_eq!(Version::parse("   "), Err(VersionError::EmptyVersion));
    }

    #[test]
    fn test_parse_rejects_embedded_spaces() {
        assert_eq!(Version::parse("1.0 2"), Err(VersionError::EmbeddedSpaces));
    }

    #[test]
    fn test_parse_epoch_errors() {
        assert_eq!(Version::parse(":1.0"), Err(VersionError::EmptyEpoch));
        assert_eq!(Version::parse("a:1.0"), Err(VersionError::NonNumericEpoch));
        assert_eq!(Version::parse("-1:1.0"), Err(VersionError::NegativeEpoch));
        assert_eq!(
            Version::parse("99999999999:1.0"),
            Err(VersionError::EpochTooLarge)
        );
        assert_eq!(Version::parse("1:"), Err(VersionError::EmptyAfterEpochColon));
    }

    #[test]
    fn test_parse_rejects_empty_revision() {
        assert_eq!(Version::parse("1.0-"), Err(VersionError::EmptyRevision));
    }

    #[test]
    fn test_parse_strict_rejects_warnings() {
        assert_eq!(
            Version::parse("abc"),
            Err(VersionError::UpstreamDoesNotStartWithDigit)
        );
        assert_eq!(
            Version::parse("1.0!x"),
            Err(VersionError::InvalidCharInVersion('!'))
        );
        assert_eq!(
            Version::parse("1.0-1_2"),
            Err(VersionError::InvalidCharInRevision('_'))
        );
    }

    #[test]
    fn test_parse_lax_downgrades_warnings() {
        let (ver, warnings) = Version::parse_lax("abc").unwrap();
        assert_eq!(ver.upstream, "abc");
        assert_eq!(warnings, vec![VersionError::UpstreamDoesNotStartWithDigit]);

        // Structural defects stay fatal in lax mode
        assert_eq!(
            Version::parse_lax("1:"),
            Err(VersionError::EmptyAfterEpochColon)
        );
    }

    #[test]
    fn test_compare_laws() {
        assert_eq!(cmp("1.0", "1.0"), Ordering::Equal);
        assert_eq!(cmp("1.0", "2.0"), Ordering::Less);
        assert_eq!(cmp("1.0~beta1", "1.0"), Ordering::Less);
        assert_eq!(cmp("1.0-1", "1.0-2"), Ordering::Less);
        assert_eq!(cmp("1:0", "2"), Ordering::Greater);
        assert_eq!(cmp("1.0a", "1.0b"), Ordering::Less);
        assert_eq!(cmp("1.0", "1.0.1"), Ordering::Less);
    }

    #[test]
    fn test_compare_tilde_sorts_before_end() {
        assert_eq!(cmp("1.0~", "1.0"), Ordering::Less);
        assert_eq!(cmp("1.0~~", "1.0~"), Ordering::Less);
        assert_eq!(cmp("1.0~rc1", "1.0~rc2"), Ordering::Less);
    }

    #[test]
    fn test_compare_letters_before_nonletters() {
        // 'a' sorts before '+' despite higher ASCII value
        assert_eq!(cmp("1.0a", "1.0+"), Ordering::Less);
    }

    #[test]
    fn test_compare_leading_zeros_insignificant() {
        assert_eq!(cmp("1.002", "1.2"), Ordering::Equal);
        assert_eq!(cmp("1.010", "1.9"), Ordering::Greater);
    }

    #[test]
    fn test_display_roundtrip() {
        for s in ["1.0", "2:1.2.3-4", "1.0~rc1-0+b1", "0.5-1.2", "0:1:0"] {
            let parsed = v(s);
            let reparsed = v(&parsed.to_string());
            assert_eq!(parsed.compare(&reparsed), Ordering::Equal);
            assert_eq!(parsed, reparsed);
        }
    }

    #[test]
    fn test_display_hides_zero_epoch() {
        assert_eq!(v("0:1.0").to_string(), "1.0");
        assert_eq!(v("1:1.0").to_string(), "1:1.0");
    }

    #[test]
    fn test_relation_parse() {
        assert_eq!(
            VersionRelation::parse("<<"),
            Some(VersionRelation::StrictlyEarlier)
        );
        assert_eq!(VersionRelation::parse("="), Some(VersionRelation::Exact));
        assert_eq!(VersionRelation::parse("<"), None);
        assert_eq!(VersionRelation::parse("=="), None);
    }

    #[test]
    fn test_relation_satisfied_by() {
        let one = v("1.0");
        let two = v("2.0");
        assert!(VersionRelation::StrictlyEarlier.satisfied_by(&one, &two));
        assert!(!VersionRelation::StrictlyEarlier.satisfied_by(&two, &one));
        assert!(VersionRelation::EarlierOrEqual.satisfied_by(&one, &one));
        assert!(VersionRelation::Exact.satisfied_by(&one, &one));
        assert!(!VersionRelation::Exact.satisfied_by(&one, &two));
        assert!(VersionRelation::LaterOrEqual.satisfied_by(&two, &one));
        assert!(VersionRelation::StrictlyLater.satisfied_by(&two, &one));
    }
}
