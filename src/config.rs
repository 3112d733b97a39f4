//! Config Loader - Spec File to Config Tree
//!
//! Parsing is all-or-nothing: a spec either yields a complete tree or an error.
//! Key order is preserved exactly as written, including across includes.

use serde_yaml::{Mapping, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Key naming further spec files to merge beneath the current one.
pub const INCLUDE_KEY: &str = "include";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No project spec found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Parsing project spec {} failed: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Invalid include in {}: {reason}", path.display())]
    InvalidInclude { path: PathBuf, reason: String },
}

/// Parsed spec. The root is always a mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigTree {
    root: Mapping,
}

impl ConfigTree {
    pub fn from_mapping(root: Mapping) -> Self {
        Self { root }
    }

    /// Parse spec text directly. `json` selects the JSON dialect.
    pub fn parse(text: &str, json: bool) -> Result<Self, ConfigError> {
        parse_mapping(Path::new("<inline>"), text, json).map(Self::from_mapping)
    }

    pub fn root(&self) -> &Mapping {
        &self.root
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    /// Walk nested mappings, e.g. `["options", "minimumVersion"]`.
    pub fn lookup(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.root.get(*first)?;
        for key in rest {
            current = current.as_mapping()?.get(*key)?;
        }
        Some(current)
    }

    /// Stable re-serialization. Keys stay in encountered order.
    pub fn to_canonical_string(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.root)
    }

    pub fn to_value(&self) -> Value {
        Value::Mapping(self.root.clone())
    }
}

/// Load a spec file, resolving `include` entries relative to each file.
pub fn load(path: &Path) -> Result<ConfigTree, ConfigError> {
    let mut visiting = Vec::new();
    load_mapping(path, &mut visiting).map(ConfigTree::from_mapping)
}

fn load_mapping(path: &Path, visiting: &mut Vec<PathBuf>) -> Result<Mapping, ConfigError> {
    let canonical = fs::canonicalize(path).map_err(|e| read_error(path, e))?;
    if visiting.contains(&canonical) {
        return Err(ConfigError::InvalidInclude {
            path: path.to_path_buf(),
            reason: "include cycle detected".to_string(),
        });
    }

    let contents = fs::read_to_string(path).map_err(|e| read_error(path, e))?;
    let (includes, own) = split_includes(path, parse_mapping(path, &contents, is_json(path))?)?;

    visiting.push(canonical);
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut merged = Mapping::new();
    for include in includes {
        let included = load_mapping(&base.join(include), visiting)?;
        merge_mapping(&mut merged, included);
    }
    visiting.pop();

    merge_mapping(&mut merged, own);
    Ok(merged)
}

fn read_error(path: &Path, source: io::Error) -> ConfigError {
    if source.kind() == io::ErrorKind::NotFound {
        ConfigError::NotFound(path.to_path_buf())
    } else {
        ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("json"))
}

fn parse_mapping(path: &Path, text: &str, json: bool) -> Result<Mapping, ConfigError> {
    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let value = if json {
        let parsed: serde_json::Value =
            serde_json::from_str(text).map_err(|e| parse_error(e.to_string()))?;
        serde_yaml::to_value(parsed).map_err(|e| parse_error(e.to_string()))?
    } else {
        serde_yaml::from_str::<Value>(text).map_err(|e| parse_error(e.to_string()))?
    };

    match value {
        Value::Mapping(mapping) => Ok(mapping),
        other => Err(parse_error(format!(
            "top level must be a mapping, found {}",
            kind_name(&other)
        ))),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "nothing",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Pull the include list out of a mapping, keeping the remaining key order.
fn split_includes(path: &Path, mapping: Mapping) -> Result<(Vec<String>, Mapping), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidInclude {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut includes = Vec::new();
    let mut rest = Mapping::with_capacity(mapping.len());
    for (key, value) in mapping {
        if key.as_str() != Some(INCLUDE_KEY) {
            rest.insert(key, value);
            continue;
        }
        match value {
            Value::String(single) => includes.push(single),
            Value::Sequence(items) => {
                for item in items {
                    match item {
                        Value::String(s) => includes.push(s),
                        _ => return Err(invalid("include entries must be strings")),
                    }
                }
            }
            Value::Null => {}
            _ => return Err(invalid("include must be a string or a list of strings")),
        }
    }
    Ok((includes, rest))
}

/// Recursive merge: nested mappings combine, anything else is replaced.
fn merge_mapping(base: &mut Mapping, overlay: Mapping) {
    for (key, value) in overlay {
        let Value::Mapping(incoming) = value else {
            base.insert(key, value);
            continue;
        };
        if let Some(Value::Mapping(existing)) = base.get_mut(&key) {
            merge_mapping(existing, incoming);
            continue;
        }
        base.insert(key, Value::Mapping(incoming));
    }
}
