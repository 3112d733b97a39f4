//! Project Model - Spec Schema and Source Resolution
//!
//! The built-in project model: a name, file groups and an ordered set of
//! targets whose sources are files, directories or glob patterns.

use globset::GlobBuilder;
use indexmap::IndexMap;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::bundle::BUNDLE_EXTENSION;
use crate::config::ConfigTree;
use crate::project::{BoxError, GenerationError, ProjectBuilder, ProjectModel};
use crate::validation::Validator;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    pub name: String,
    #[serde(default)]
    pub file_groups: Vec<String>,
    #[serde(default)]
    pub targets: IndexMap<String, TargetSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpec {
    #[serde(default, rename = "type")]
    pub kind: TargetKind,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    #[default]
    Application,
    Library,
    Tool,
    Bundle,
}

/// A target with its sources resolved to concrete files.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub name: String,
    pub kind: TargetKind,
    pub dependencies: Vec<String>,
    pub files: Vec<PathBuf>,
}

/// Where a non-glob source or file group pointed at nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingSource {
    pub owner: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct SpecProject {
    pub name: String,
    pub base_path: PathBuf,
    pub targets: Vec<ResolvedTarget>,
    pub group_files: Vec<PathBuf>,
    pub missing: Vec<MissingSource>,
}

impl SpecProject {
    pub fn target(&self, name: &str) -> Option<&ResolvedTarget> {
        self.targets.iter().find(|t| t.name == name)
    }
}

impl ProjectModel for SpecProject {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn all_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .targets
            .iter()
            .flat_map(|t| t.files.iter().cloned())
            .chain(self.group_files.iter().cloned())
            .collect();
        files.sort();
        files.dedup();
        files
    }

    fn validate(&self, tool_version: &Version) -> Result<(), GenerationError> {
        let result = Validator::new().validate(self, tool_version);
        for warning in result.warnings() {
            tracing::warn!(rule = %warning.rule, "{}", warning.message);
        }
        if result.valid {
            Ok(())
        } else {
            Err(GenerationError::Validation(result.errors()))
        }
    }
}

/// Builds [`SpecProject`]s from parsed specs.
#[derive(Debug, Clone, Default)]
pub struct SpecProjectBuilder;

impl ProjectBuilder for SpecProjectBuilder {
    type Project = SpecProject;

    fn build(&self, base_path: &Path, tree: &ConfigTree) -> Result<SpecProject, BoxError> {
        let spec: ProjectSpec = serde_yaml::from_value(tree.to_value())?;

        let mut missing = Vec::new();
        let mut targets = Vec::with_capacity(spec.targets.len());
        for (name, target) in &spec.targets {
            let mut files = Vec::new();
            for source in &target.sources {
                match resolve_source(base_path, source)? {
                    Some(found) => files.extend(found),
                    None => missing.push(MissingSource {
                        owner: name.clone(),
                        path: source.clone(),
                    }),
                }
            }
            files.sort();
            files.dedup();
            targets.push(ResolvedTarget {
                name: name.clone(),
                kind: target.kind,
                dependencies: target.dependencies.clone(),
                files,
            });
        }

        let mut group_files = Vec::new();
        for group in &spec.file_groups {
            match resolve_source(base_path, group)? {
                Some(found) => group_files.extend(found),
                None => missing.push(MissingSource {
                    owner: "fileGroups".to_string(),
                    path: group.clone(),
                }),
            }
        }

        Ok(SpecProject {
            name: spec.name,
            base_path: base_path.to_path_buf(),
            targets,
            group_files,
            missing,
        })
    }
}

pub fn is_glob(source: &str) -> bool {
    source.contains(['*', '?', '[', '{'])
}

/// Resolve one source entry to files. `None` means a literal path that
/// does not exist; a glob with no matches is simply empty.
pub fn resolve_source(base: &Path, source: &str) -> Result<Option<Vec<PathBuf>>, globset::Error> {
    if is_glob(source) {
        let matcher = GlobBuilder::new(source)
            .literal_separator(true)
            .build()?
            .compile_matcher();
        let files = walk_files(base)
            .into_iter()
            .filter(|path| {
                path.strip_prefix(base)
                    .map_or(false, |rel| matcher.is_match(rel))
            })
            .collect();
        return Ok(Some(files));
    }

    let path = base.join(source);
    if path.is_file() {
        Ok(Some(vec![path]))
    } else if path.is_dir() {
        Ok(Some(walk_files(&path)))
    } else {
        Ok(None)
    }
}

/// Regular files under `root`, skipping hidden entries and generated bundles.
fn walk_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_excluded(entry.path()))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

fn is_excluded(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.starts_with('.'));
    let generated = path
        .extension()
        .map_or(false, |e| e == BUNDLE_EXTENSION);
    hidden || generated
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, rel: &str) {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel).unwrap();
    }

    fn build(dir: &TempDir, spec: &str) -> SpecProject {
        let tree = ConfigTree::parse(spec, false).unwrap();
        SpecProjectBuilder.build(dir.path(), &tree).unwrap()
    }

    #[test]
    fn test_literal_and_directory_sources() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "main.c");
        touch(&dir, "lib/a.c");
        touch(&dir, "lib/nested/b.c");
        let project = build(
            &dir,
            "name: Demo\ntargets:\n  App:\n    sources: [main.c, lib]\n",
        );
        assert_eq!(
            project.relative_files(),
            vec!["lib/a.c", "lib/nested/b.c", "main.c"]
        );
        assert!(project.missing.is_empty());
    }

    #[test]
    fn test_glob_sources() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "a.txt");
        touch(&dir, "b.txt");
        touch(&dir, "sub/c.txt");
        touch(&dir, "notes.md");
        let project = build(&dir, "name: Demo\ntargets:\n  App:\n    sources: ['*.txt']\n");
        assert_eq!(project.relative_files(), vec!["a.txt", "b.txt"]);

        let deep = build(&dir, "name: Demo\ntargets:\n  App:\n    sources: ['**/*.txt']\n");
        assert_eq!(deep.relative_files(), vec!["a.txt", "b.txt", "sub/c.txt"]);
    }

    #[test]
    fn test_hidden_and_generated_entries_skipped() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "a.txt");
        touch(&dir, ".cache/x.txt");
        touch(&dir, "Demo.genproj/project.txt");
        let project = build(&dir, "name: Demo\ntargets:\n  App:\n    sources: ['**/*.txt']\n");
        assert_eq!(project.relative_files(), vec!["a.txt"]);
    }

    #[test]
    fn test_missing_sources_recorded() {
        let dir = TempDir::new().unwrap();
        let project = build(
            &dir,
            "name: Demo\nfileGroups: [docs]\ntargets:\n  App:\n    sources: [gone.c]\n",
        );
        assert_eq!(
            project.missing,
            vec![
                MissingSource { owner: "App".into(), path: "gone.c".into() },
                MissingSource { owner: "fileGroups".into(), path: "docs".into() },
            ]
        );
    }

    #[test]
    fn test_target_order_and_kind() {
        let dir = TempDir::new().unwrap();
        let project = build(
            &dir,
            "name: Demo\ntargets:\n  Zed:\n    type: library\n  App:\n    dependencies: [Zed]\n",
        );
        let names: Vec<_> = project.targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Zed", "App"]);
        assert_eq!(project.target("Zed").unwrap().kind, TargetKind::Library);
        assert_eq!(project.target("App").unwrap().kind, TargetKind::Application);
    }

    #[test]
    fn test_missing_name_fails_build() {
        let dir = TempDir::new().unwrap();
        let tree = ConfigTree::parse("targets: {}\n", false).unwrap();
        assert!(SpecProjectBuilder.build(dir.path(), &tree).is_err());
    }
}
