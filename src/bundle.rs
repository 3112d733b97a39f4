//! Bundle Generator - Project Model to `.genproj` Directory
//!
//! A bundle is a directory holding `project.json` plus one `<target>.files`
//! list per target. Output is deterministic for a given project and tool
//! version.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use crate::fingerprint::natural_cmp;
use crate::model::{SpecProject, TargetKind};
use crate::project::{BoxError, GeneratedArtifact, ProjectGenerator, ProjectModel};

pub const BUNDLE_EXTENSION: &str = "genproj";
pub const MANIFEST_FILE: &str = "project.json";
pub const FILE_LIST_EXTENSION: &str = "files";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BundleManifest {
    pub name: String,
    pub tool_version: String,
    pub targets: Vec<BundleTarget>,
    pub file_groups: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BundleTarget {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TargetKind,
    pub dependencies: Vec<String>,
    pub files: Vec<String>,
}

/// Files of a generated bundle, keyed by their name inside the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleArtifact {
    files: BTreeMap<String, Vec<u8>>,
}

impl BundleArtifact {
    pub fn files(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.files
    }
}

impl GeneratedArtifact for BundleArtifact {
    /// Overlays onto an existing bundle. Lists of targets that no longer
    /// exist are removed; files the bundle does not own are left alone.
    fn write(&self, path: &Path) -> io::Result<()> {
        if path.is_file() {
            fs::remove_file(path)?;
        }
        fs::create_dir_all(path)?;
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let entry_path = entry.path();
            let is_list = entry_path
                .extension()
                .map_or(false, |e| e == FILE_LIST_EXTENSION);
            let owned = entry
                .file_name()
                .to_str()
                .map_or(false, |name| self.files.contains_key(name));
            if is_list && !owned && entry.file_type()?.is_file() {
                fs::remove_file(&entry_path)?;
            }
        }
        for (name, data) in &self.files {
            fs::write(path.join(name), data)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BundleGenerator {
    tool_version: Version,
}

impl BundleGenerator {
    pub fn new(tool_version: Version) -> Self {
        Self { tool_version }
    }

    pub fn manifest(&self, project: &SpecProject) -> BundleManifest {
        let relative = |files: &[std::path::PathBuf]| -> Vec<String> {
            let mut rel: Vec<String> = files
                .iter()
                .map(|f| {
                    f.strip_prefix(&project.base_path)
                        .unwrap_or(f.as_path())
                        .to_string_lossy()
                        .replace('\\', "/")
                })
                .collect();
            rel.sort_by(|a, b| natural_cmp(a, b));
            rel
        };

        BundleManifest {
            name: project.name.clone(),
            tool_version: self.tool_version.to_string(),
            targets: project
                .targets
                .iter()
                .map(|t| BundleTarget {
                    name: t.name.clone(),
                    kind: t.kind,
                    dependencies: t.dependencies.clone(),
                    files: relative(&t.files),
                })
                .collect(),
            file_groups: relative(&project.group_files),
        }
    }
}

impl ProjectGenerator<SpecProject> for BundleGenerator {
    type Artifact = BundleArtifact;

    fn artifact_name(&self, project: &SpecProject) -> String {
        format!("{}.{}", project.name(), BUNDLE_EXTENSION)
    }

    fn generate(&self, project: &SpecProject) -> Result<BundleArtifact, BoxError> {
        let manifest = self.manifest(project);
        let mut files = BTreeMap::new();

        for target in &manifest.targets {
            let mut list = target.files.join("\n");
            if !list.is_empty() {
                list.push('\n');
            }
            files.insert(
                format!("{}.{}", file_list_stem(&target.name), FILE_LIST_EXTENSION),
                list.into_bytes(),
            );
        }

        let mut json = serde_json::to_vec_pretty(&manifest)?;
        json.push(b'\n');
        files.insert(MANIFEST_FILE.to_string(), json);

        Ok(BundleArtifact { files })
    }
}

/// File name stem of a target's list inside the bundle.
pub(crate) fn file_list_stem(target: &str) -> String {
    target
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResolvedTarget;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn project() -> SpecProject {
        SpecProject {
            name: "Demo".to_string(),
            base_path: PathBuf::from("/work"),
            targets: vec![ResolvedTarget {
                name: "App".to_string(),
                kind: TargetKind::Tool,
                dependencies: vec![],
                files: vec![PathBuf::from("/work/src/b10.c"), PathBuf::from("/work/src/b9.c")],
            }],
            group_files: vec![PathBuf::from("/work/README.md")],
            missing: vec![],
        }
    }

    #[test]
    fn test_manifest_relative_and_sorted() {
        let manifest = BundleGenerator::new(Version::new(1, 2, 3)).manifest(&project());
        assert_eq!(manifest.tool_version, "1.2.3");
        assert_eq!(manifest.targets[0].files, vec!["src/b9.c", "src/b10.c"]);
        assert_eq!(manifest.file_groups, vec!["README.md"]);
    }

    #[test]
    fn test_generate_is_deterministic() {
        let generator = BundleGenerator::new(Version::new(1, 0, 0));
        let a = generator.generate(&project()).unwrap();
        let b = generator.generate(&project()).unwrap();
        assert_eq!(a, b);
        assert!(a.files().contains_key(MANIFEST_FILE));
        assert!(a.files().contains_key("App.files"));
        assert_eq!(generator.artifact_name(&project()), "Demo.genproj");
    }

    #[test]
    fn test_write_overlays_existing_bundle() {
        let dir = TempDir::new().unwrap();
        let bundle = dir.path().join("Demo.genproj");
        fs::create_dir_all(&bundle).unwrap();
        fs::write(bundle.join("user.settings"), "keep").unwrap();
        fs::write(bundle.join(MANIFEST_FILE), "stale").unwrap();

        let artifact = BundleGenerator::new(Version::new(1, 0, 0))
            .generate(&project())
            .unwrap();
        artifact.write(&bundle).unwrap();

        assert_eq!(fs::read_to_string(bundle.join("user.settings")).unwrap(), "keep");
        let manifest: BundleManifest =
            serde_json::from_slice(&fs::read(bundle.join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(manifest.name, "Demo");
    }

    #[test]
    fn test_file_list_stem_sanitized() {
        assert_eq!(file_list_stem("ios/App:Main"), "ios_App_Main");
    }

    #[test]
    fn test_write_drops_lists_of_removed_targets() {
        let dir = TempDir::new().unwrap();
        let bundle = dir.path().join("Demo.genproj");
        fs::create_dir_all(&bundle).unwrap();
        fs::write(bundle.join("Old.files"), "a.txt\n").unwrap();
        fs::write(bundle.join("notes.txt"), "keep").unwrap();

        let artifact = BundleGenerator::new(Version::new(1, 0, 0))
            .generate(&project())
            .unwrap();
        artifact.write(&bundle).unwrap();

        let mut names: Vec<String> = fs::read_dir(&bundle)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["App.files", "notes.txt", "project.json"]);
    }
}
