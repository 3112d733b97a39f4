//! Validation System - Rules Over the Built Project
//!
//! Rules produce structured violations.
//! Errors block generation, warnings are only reported.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::bundle::file_list_stem;
use crate::model::SpecProject;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub message: String,
    pub remediation: Vec<String>,
}

impl ValidationViolation {
    fn error(rule: &str, message: String, remediation: &str) -> Self {
        Self {
            rule: rule.to_string(),
            severity: ViolationSeverity::Error,
            message,
            remediation: vec![remediation.to_string()],
        }
    }

    fn warning(rule: &str, message: String) -> Self {
        Self {
            rule: rule.to_string(),
            severity: ViolationSeverity::Warning,
            message,
            remediation: vec![],
        }
    }
}

/// One violation per line, for error messages.
pub fn format_violations(violations: &[ValidationViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("  {}: {}", v.rule, v.message))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<ValidationViolation>,
}

impl ValidationResult {
    pub fn errors(&self) -> Vec<ValidationViolation> {
        self.by_severity(ViolationSeverity::Error)
    }

    pub fn warnings(&self) -> Vec<ValidationViolation> {
        self.by_severity(ViolationSeverity::Warning)
    }

    fn by_severity(&self, severity: ViolationSeverity) -> Vec<ValidationViolation> {
        self.violations
            .iter()
            .filter(|v| v.severity == severity)
            .cloned()
            .collect()
    }
}

/// Validation rule trait - produces violations
pub trait ValidationRule {
    fn name(&self) -> &'static str;
    fn validate(&self, project: &SpecProject, tool_version: &Version) -> Vec<ValidationViolation>;
}

// --- Concrete Rules ---

pub struct NameRule;

impl ValidationRule for NameRule {
    fn name(&self) -> &'static str { "name" }

    fn validate(&self, project: &SpecProject, _: &Version) -> Vec<ValidationViolation> {
        let name = project.name.trim();
        if name.is_empty() {
            return vec![ValidationViolation::error(
                self.name(),
                "Project name is empty".to_string(),
                "Set a non-empty `name`",
            )];
        }
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return vec![ValidationViolation::error(
                self.name(),
                format!("Project name {:?} cannot be used as a file name", project.name),
                "Remove path separators from `name`",
            )];
        }
        vec![]
    }
}

pub struct MissingSourceRule;

impl ValidationRule for MissingSourceRule {
    fn name(&self) -> &'static str { "missing_source" }

    fn validate(&self, project: &SpecProject, _: &Version) -> Vec<ValidationViolation> {
        project
            .missing
            .iter()
            .map(|m| {
                ValidationViolation::error(
                    self.name(),
                    format!("{} references missing path {:?}", m.owner, m.path),
                    "Create the path or remove it from the spec",
                )
            })
            .collect()
    }
}

pub struct DependencyRule;

impl ValidationRule for DependencyRule {
    fn name(&self) -> &'static str { "dependency" }

    fn validate(&self, project: &SpecProject, _: &Version) -> Vec<ValidationViolation> {
        let known: HashSet<&str> = project.targets.iter().map(|t| t.name.as_str()).collect();
        let mut violations = vec![];

        for target in &project.targets {
            for dep in &target.dependencies {
                if dep == &target.name {
                    violations.push(ValidationViolation::error(
                        self.name(),
                        format!("Target {} depends on itself", target.name),
                        "Remove the self-dependency",
                    ));
                } else if !known.contains(dep.as_str()) {
                    violations.push(ValidationViolation::error(
                        self.name(),
                        format!("Target {} depends on unknown target {}", target.name, dep),
                        "Declare the target or fix the dependency name",
                    ));
                }
            }
        }

        violations
    }
}

pub struct FileListRule;

impl ValidationRule for FileListRule {
    fn name(&self) -> &'static str { "file_list" }

    /// Target names are sanitised into bundle file names; two targets must
    /// not end up sharing one list.
    fn validate(&self, project: &SpecProject, _: &Version) -> Vec<ValidationViolation> {
        let mut owners: HashMap<String, &str> = HashMap::new();
        let mut violations = vec![];

        for target in &project.targets {
            let stem = file_list_stem(&target.name);
            match owners.get(stem.as_str()) {
                Some(first) => violations.push(ValidationViolation::error(
                    self.name(),
                    format!(
                        "Targets {} and {} would both be written to {stem}.files",
                        first, target.name
                    ),
                    "Rename one of the targets",
                )),
                None => {
                    owners.insert(stem, &target.name);
                }
            }
        }

        violations
    }
}

pub struct EmptyTargetRule;

impl ValidationRule for EmptyTargetRule {
    fn name(&self) -> &'static str { "empty_target" }

    fn validate(&self, project: &SpecProject, _: &Version) -> Vec<ValidationViolation> {
        project
            .targets
            .iter()
            .filter(|t| t.files.is_empty())
            .map(|t| ValidationViolation::warning(self.name(), format!("Target {} has no files", t.name)))
            .collect()
    }
}

/// Validator runs every rule and splits the outcome by severity
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(NameRule),
                Box::new(MissingSourceRule),
                Box::new(DependencyRule),
                Box::new(FileListRule),
                Box::new(EmptyTargetRule),
            ],
        }
    }

    pub fn validate(&self, project: &SpecProject, tool_version: &Version) -> ValidationResult {
        let violations: Vec<_> = self
            .rules
            .iter()
            .flat_map(|rule| rule.validate(project, tool_version))
            .collect();
        let valid = !violations.iter().any(|v| v.severity == ViolationSeverity::Error);
        ValidationResult { valid, violations }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
