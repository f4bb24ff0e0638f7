//! Name-version-release identifiers and RPM label ordering.

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NvrError {
    #[error("NVR {0:?} must have the form name-version-release")]
    Malformed(String),
    #[error("NVR {0:?} has a non-numeric epoch")]
    BadEpoch(String),
}

/// A parsed build identifier.
///
/// The epoch is optional and written as a prefix of the version
/// (`bash-1:5.2-1.fc40`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nvr {
    pub name: String,
    pub epoch: Option<u64>,
    pub version: String,
    pub release: String,
}

impl Nvr {
    pub fn parse(nvr: &str) -> Result<Self, NvrError> {
        let malformed = || NvrError::Malformed(nvr.to_string());

        let (rest, release) = nvr.rsplit_once('-').ok_or_else(malformed)?;
        let (name, version) = rest.rsplit_once('-').ok_or_else(malformed)?;
        if name.is_empty() || version.is_empty() || release.is_empty() {
            return Err(malformed());
        }

        let (epoch, version) = match version.split_once(':') {
            Some((epoch, version)) => {
                let epoch = epoch
                    .parse::<u64>()
                    .map_err(|_| NvrError::BadEpoch(nvr.to_string()))?;
                (Some(epoch), version)
            }
            None => (None, version),
        };
        if version.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            name: name.to_string(),
            epoch,
            version: version.to_string(),
            release: release.to_string(),
        })
    }

    /// Compare epoch, version and release the way `rpm.labelCompare` does.
    /// A missing epoch counts as zero.
    pub fn label_compare(&self, other: &Nvr) -> Ordering {
        self.epoch
            .unwrap_or(0)
            .cmp(&other.epoch.unwrap_or(0))
            .then_with(|| rpmvercmp(&self.version, &other.version))
            .then_with(|| rpmvercmp(&self.release, &other.release))
    }
}

impl fmt::Display for Nvr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.epoch {
            Some(epoch) => write!(f, "{}-{}:{}-{}", self.name, epoch, self.version, self.release),
            None => write!(f, "{}-{}-{}", self.name, self.version, self.release),
        }
    }
}

fn is_separator(b: u8) -> bool {
    !b.is_ascii_alphanumeric() && b != b'~' && b != b'^'
}

fn segment_end(s: &[u8], start: usize, numeric: bool) -> usize {
    let mut end = start;
    while end < s.len()
        && if numeric {
            s[end].is_ascii_digit()
        } else {
            s[end].is_ascii_alphabetic()
        }
    {
        end += 1;
    }
    end
}

/// RPM version segment comparison.
///
/// Alphanumeric runs are compared pairwise; numeric runs compare by value and
/// beat alphabetic runs. `~` sorts before anything, even the end of the
/// string. `^` sorts after the end of the string but before anything else.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    while i < a.len() || j < b.len() {
        while i < a.len() && is_separator(a[i]) {
            i += 1;
        }
        while j < b.len() && is_separator(b[j]) {
            j += 1;
        }

        let ca = a.get(i).copied();
        let cb = b.get(j).copied();

        if ca == Some(b'~') || cb == Some(b'~') {
            if ca != Some(b'~') {
                return Ordering::Greater;
            }
            if cb != Some(b'~') {
                return Ordering::Less;
            }
            i += 1;
            j += 1;
            continue;
        }

        if ca == Some(b'^') || cb == Some(b'^') {
            if ca.is_none() {
                return Ordering::Less;
            }
            if cb.is_none() {
                return Ordering::Greater;
            }
            if ca != Some(b'^') {
                return Ordering::Greater;
            }
            if cb != Some(b'^') {
                return Ordering::Less;
            }
            i += 1;
            j += 1;
            continue;
        }

        if i >= a.len() || j >= b.len() {
            break;
        }

        let numeric = a[i].is_ascii_digit();
        let end_a = segment_end(a, i, numeric);
        let end_b = segment_end(b, j, numeric);

        // Segments of different kinds: numeric is newer.
        if end_b == j {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let mut seg_a = &a[i..end_a];
        let mut seg_b = &b[j..end_b];
        let ordering = if numeric {
            while seg_a.first() == Some(&b'0') {
                seg_a = &seg_a[1..];
            }
            while seg_b.first() == Some(&b'0') {
                seg_b = &seg_b[1..];
            }
            seg_a.len().cmp(&seg_b.len()).then_with(|| seg_a.cmp(seg_b))
        } else {
            seg_a.cmp(seg_b)
        };
        if ordering != Ordering::Equal {
            return ordering;
        }

        i = end_a;
        j = end_b;
    }

    match (i >= a.len(), j >= b.len()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, _) => Ordering::Greater,
    }
}
