//! Fingerprint Store - Lockfile Change Detection
//!
//! A fingerprint is the tool version, the canonical spec and the sorted file
//! list, rendered as plain text. Two runs with identical inputs produce
//! byte-identical fingerprints, so comparison is exact string equality.

use semver::Version;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::iter::Peekable;
use std::path::{Path, PathBuf};
use std::str::Chars;
use thiserror::Error;

use crate::config::ConfigTree;

pub const VERSION_HEADER: &str = "# TOOL VERSION";
pub const SPEC_HEADER: &str = "# SPEC";
pub const FILES_HEADER: &str = "# FILES";

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("Couldn't serialize spec for lockfile: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("Couldn't load lockfile {}: {source}", path.display())]
    CorruptStore {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Couldn't write lockfile {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short content digest, for log lines only.
    pub fn digest(&self) -> String {
        let mut hex = format!("{:x}", Sha256::digest(self.0.as_bytes()));
        hex.truncate(12);
        hex
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the fingerprint for one run.
///
/// `files` are paths relative to the spec directory. Duplicates are dropped,
/// backslashes become `/`, and the list is sorted with [`natural_cmp`].
pub fn compute_fingerprint<I, S>(
    tool_version: &Version,
    tree: &ConfigTree,
    files: I,
) -> Result<Fingerprint, FingerprintError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let spec = tree.to_canonical_string()?.replace("\r\n", "\n");
    let spec = spec.trim_end_matches('\n');

    let unique: BTreeSet<String> = files
        .into_iter()
        .map(|f| f.as_ref().replace('\\', "/"))
        .collect();
    let mut sorted: Vec<String> = unique.into_iter().collect();
    sorted.sort_by(|a, b| natural_cmp(a, b));

    Ok(Fingerprint(format!(
        "{VERSION_HEADER}\n{tool_version}\n\n{SPEC_HEADER}\n{spec}\n\n{FILES_HEADER}\n{}\n",
        sorted.join("\n")
    )))
}

/// Exact comparison; all normalization already happened in compute.
pub fn matches(stored: Option<&Fingerprint>, computed: &Fingerprint) -> bool {
    stored.map_or(false, |s| s == computed)
}

/// Handle to the lockfile on disk.
#[derive(Debug, Clone)]
pub struct FingerprintStore {
    path: PathBuf,
}

impl FingerprintStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` when no lockfile exists yet. Unreadable text (bad UTF-8, an old
    /// format) still loads and simply fails to match.
    pub fn load(&self) -> Result<Option<Fingerprint>, FingerprintError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(Fingerprint(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(FingerprintError::CorruptStore {
                path: self.path.clone(),
                source,
            }),
        }
    }

    pub fn persist(&self, fingerprint: &Fingerprint) -> Result<(), FingerprintError> {
        let persist_error = |source| FingerprintError::Persist {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(persist_error)?;
            }
        }
        fs::write(&self.path, fingerprint.as_str()).map_err(persist_error)
    }
}

/// Natural path ordering: digit runs compare numerically, everything else
/// compares by code point (case and punctuation significant). Ties fall back
/// to byte order so the result is a total order.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        let ord = match (left.peek().copied(), right.peek().copied()) {
            (None, None) => break,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                compare_digit_runs(&take_digits(&mut left), &take_digits(&mut right))
            }
            (Some(l), Some(r)) => {
                left.next();
                right.next();
                l.cmp(&r)
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    a.cmp(b)
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        run.push(c);
    }
    run
}

fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
