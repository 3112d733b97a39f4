//! Project Capabilities - Builder, Model, Generator, Artifact
//!
//! The pipeline only sees these traits. Any project model can plug in.

use semver::Version;
use std::error::Error as StdError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::ConfigTree;
use crate::validation::{format_violations, ValidationViolation};

pub type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Building project failed: {0}")]
    Build(#[source] BoxError),

    #[error("Spec validation failed:\n{}", format_violations(.0))]
    Validation(Vec<ValidationViolation>),

    #[error("Generation failed: {0}")]
    Generate(#[source] BoxError),
}

/// A built, in-memory project.
pub trait ProjectModel {
    fn name(&self) -> &str;

    /// Directory that relative paths in the spec resolve against.
    fn base_path(&self) -> &Path;

    /// Every file the project contributes.
    fn all_files(&self) -> Vec<PathBuf>;

    fn validate(&self, tool_version: &Version) -> Result<(), GenerationError>;

    /// `all_files` relative to `base_path`, `/`-separated. Files outside the
    /// base keep their full path.
    fn relative_files(&self) -> Vec<String> {
        self.relative_files_except(&[])
    }

    /// [`ProjectModel::relative_files`] without the files listed in
    /// `excluded` (absolute paths).
    fn relative_files_except(&self, excluded: &[PathBuf]) -> Vec<String> {
        let base = self.base_path();
        self.all_files()
            .iter()
            .filter(|path| !excluded.contains(*path))
            .map(|path| match path.strip_prefix(base) {
                Ok(rel) => rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
                Err(_) => path.to_string_lossy().into_owned(),
            })
            .collect()
    }
}

pub trait ProjectBuilder {
    type Project: ProjectModel;

    fn build(&self, base_path: &Path, tree: &ConfigTree) -> Result<Self::Project, BoxError>;
}

/// Output of a generator. Writing replaces whatever it owns at `path`.
pub trait GeneratedArtifact {
    fn write(&self, path: &Path) -> io::Result<()>;
}

pub trait ProjectGenerator<P: ProjectModel> {
    type Artifact: GeneratedArtifact;

    /// File name of the published artifact, e.g. `Demo.genproj`.
    fn artifact_name(&self, project: &P) -> String;

    fn generate(&self, project: &P) -> Result<Self::Artifact, BoxError>;
}
