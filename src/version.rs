//! Version Gate - Minimum Tool Version Check

use semver::Version;
use serde_yaml::Value;
use thiserror::Error;

use crate::config::ConfigTree;

/// Where a spec declares the oldest tool version it supports.
pub const MINIMUM_VERSION_PATH: [&str; 2] = ["options", "minimumVersion"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("Project requires tool version {required} or newer, current is {actual}")]
    IncompatibleVersion { required: Version, actual: Version },

    #[error("Invalid version {0:?}: expected MAJOR[.MINOR[.PATCH]]")]
    InvalidVersion(String),
}

/// Parse a version, allowing omitted minor/patch components (`2`, `2.1`).
pub fn parse_version(raw: &str) -> Result<Version, VersionError> {
    let trimmed = raw.trim();
    if let Ok(v) = Version::parse(trimmed) {
        return Ok(v);
    }

    let parts: Vec<&str> = trimmed.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(VersionError::InvalidVersion(raw.to_string()));
    }

    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(VersionError::InvalidVersion(raw.to_string()));
        }
        *slot = part
            .parse()
            .map_err(|_| VersionError::InvalidVersion(raw.to_string()))?;
    }
    Ok(Version::new(numbers[0], numbers[1], numbers[2]))
}

/// Read the declared minimum from a spec, if any.
///
/// An unquoted YAML value such as `2.10` is a float and arrives here as
/// `2.1`. Specs should quote the version.
pub fn declared_minimum(tree: &ConfigTree) -> Result<Option<Version>, VersionError> {
    match tree.lookup(&MINIMUM_VERSION_PATH) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => parse_version(s).map(Some),
        Some(Value::Number(n)) => parse_version(&n.to_string()).map(Some),
        Some(other) => Err(VersionError::InvalidVersion(format!("{other:?}"))),
    }
}

/// Pure comparison. No minimum always passes.
pub fn check(declared: Option<&Version>, running: &Version) -> Result<(), VersionError> {
    match declared {
        Some(required) if required > running => Err(VersionError::IncompatibleVersion {
            required: required.clone(),
            actual: running.clone(),
        }),
        _ => Ok(()),
    }
}
