//! Generation Pipeline - Single Entry Point
//!
//! load -> version gate -> build + validate -> lockfile check -> generate
//! -> publish -> persist lockfile.
//!
//! CRITICAL: the lockfile is written only after a successful publish.

use semver::Version;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use crate::config::{self, ConfigError};
use crate::fingerprint::{compute_fingerprint, matches, FingerprintError, FingerprintStore};
use crate::project::{GenerationError, ProjectBuilder, ProjectGenerator, ProjectModel};
use crate::publish::{PublishError, Publisher};
use crate::version::{self, VersionError};

pub const DEFAULT_SPEC: &str = "project.yml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Version,
    Build,
    Fingerprint,
    Generate,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Load => "load",
            Stage::Version => "version",
            Stage::Build => "build",
            Stage::Fingerprint => "fingerprint",
            Stage::Generate => "generate",
            Stage::Publish => "publish",
        })
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Load(ConfigError),

    #[error(transparent)]
    Version(VersionError),

    #[error(transparent)]
    Build(GenerationError),

    #[error(transparent)]
    Fingerprint(FingerprintError),

    #[error(transparent)]
    Generate(GenerationError),

    #[error(transparent)]
    Publish(PublishError),
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Load(_) => Stage::Load,
            PipelineError::Version(_) => Stage::Version,
            PipelineError::Build(_) => Stage::Build,
            PipelineError::Fingerprint(_) => Stage::Fingerprint,
            PipelineError::Generate(_) => Stage::Generate,
            PipelineError::Publish(_) => Stage::Publish,
        }
    }
}

/// The project was published but the lockfile could not be updated.
/// The next run regenerates.
#[derive(Debug, Error)]
#[error("Project was saved but lockfile {} was not updated: {source}", lockfile.display())]
pub struct CacheWriteWarning {
    pub lockfile: PathBuf,
    #[source]
    pub source: FingerprintError,
}

#[derive(Debug)]
pub enum RunOutcome {
    /// Lockfile matched; nothing was written.
    Skipped { lockfile: PathBuf },
    Generated {
        artifact: PathBuf,
        lockfile: Option<PathBuf>,
        cache_warning: Option<CacheWriteWarning>,
    },
}

impl RunOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, RunOutcome::Skipped { .. })
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub spec_path: PathBuf,
    /// Defaults to the spec's directory.
    pub output_dir: Option<PathBuf>,
    /// Lockfile skipping is off when unset.
    pub lockfile: Option<PathBuf>,
    pub tool_version: Version,
}

impl PipelineOptions {
    pub fn new(spec_path: impl Into<PathBuf>) -> Self {
        Self {
            spec_path: spec_path.into(),
            output_dir: None,
            lockfile: None,
            tool_version: crate::tool_version(),
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_lockfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.lockfile = Some(path.into());
        self
    }

    pub fn with_tool_version(mut self, version: Version) -> Self {
        self.tool_version = version;
        self
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::new(DEFAULT_SPEC)
    }
}

/// Drives one generation run per call to [`GenerationPipeline::run`].
pub struct GenerationPipeline<B, G> {
    builder: B,
    generator: G,
    publisher: Publisher,
}

impl<B, G> GenerationPipeline<B, G>
where
    B: ProjectBuilder,
    G: ProjectGenerator<B::Project>,
{
    pub fn new(builder: B, generator: G) -> Self {
        Self {
            builder,
            generator,
            publisher: Publisher::new(),
        }
    }

    pub fn run(&self, options: &PipelineOptions) -> Result<RunOutcome, PipelineError> {
        let spec_path = absolute(&options.spec_path);
        let _span = info_span!("generate", spec = %spec_path.display()).entered();
        let base_path = spec_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        debug!(stage = %Stage::Load, "Entering stage");
        let tree = config::load(&spec_path).map_err(PipelineError::Load)?;
        info!("Loaded project spec {}", spec_path.display());

        debug!(stage = %Stage::Version, "Entering stage");
        let declared = version::declared_minimum(&tree).map_err(PipelineError::Version)?;
        version::check(declared.as_ref(), &options.tool_version).map_err(PipelineError::Version)?;

        debug!(stage = %Stage::Build, "Entering stage");
        let project = self
            .builder
            .build(&base_path, &tree)
            .map_err(|e| PipelineError::Build(GenerationError::Build(e)))?;
        project
            .validate(&options.tool_version)
            .map_err(PipelineError::Build)?;
        // The lockfile may sit inside a source directory; it is never part
        // of the set it records.
        let excluded: Vec<PathBuf> = options
            .lockfile
            .as_deref()
            .map(absolute)
            .into_iter()
            .collect();
        let files = project.relative_files_except(&excluded);
        info!("Loaded project {} with {} files", project.name(), files.len());

        let pending_lock = match &options.lockfile {
            Some(path) => {
                debug!(stage = %Stage::Fingerprint, "Entering stage");
                let store = FingerprintStore::new(path);
                let computed = compute_fingerprint(&options.tool_version, &tree, &files)
                    .map_err(PipelineError::Fingerprint)?;
                let stored = store.load().map_err(PipelineError::Fingerprint)?;
                if matches(stored.as_ref(), &computed) {
                    info!(
                        fingerprint = %computed.digest(),
                        "Not generating project as lockfile {} has not changed",
                        path.display()
                    );
                    return Ok(RunOutcome::Skipped {
                        lockfile: path.clone(),
                    });
                }
                debug!(fingerprint = %computed.digest(), "Lockfile changed or missing");
                Some((store, computed))
            }
            None => None,
        };

        debug!(stage = %Stage::Generate, "Entering stage");
        info!("Generating project...");
        let artifact = self
            .generator
            .generate(&project)
            .map_err(|e| PipelineError::Generate(GenerationError::Generate(e)))?;

        debug!(stage = %Stage::Publish, "Entering stage");
        info!("Writing project...");
        let output_dir = options
            .output_dir
            .as_deref()
            .map(absolute)
            .unwrap_or(base_path);
        let target = output_dir.join(self.generator.artifact_name(&project));
        let report = self
            .publisher
            .publish(&artifact, &target)
            .map_err(PipelineError::Publish)?;
        for warning in &report.warnings {
            warn!("{warning}");
        }

        let mut lockfile = None;
        let mut cache_warning = None;
        if let Some((store, fingerprint)) = pending_lock {
            match store.persist(&fingerprint) {
                Ok(()) => {
                    info!("Wrote lockfile to {}", store.path().display());
                    lockfile = Some(store.path().to_path_buf());
                }
                Err(source) => {
                    let warning = CacheWriteWarning {
                        lockfile: store.path().to_path_buf(),
                        source,
                    };
                    warn!("{warning}");
                    cache_warning = Some(warning);
                }
            }
        }

        info!("Saved project to {}", target.display());
        Ok(RunOutcome::Generated {
            artifact: target,
            lockfile,
            cache_warning,
        })
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Load.to_string(), "load");
        assert_eq!(Stage::Publish.to_string(), "publish");
    }

    #[test]
    fn test_error_stage() {
        let err = PipelineError::Load(ConfigError::NotFound(PathBuf::from("project.yml")));
        assert_eq!(err.stage(), Stage::Load);
        assert!(err.to_string().contains("No project spec found"));
    }

    #[test]
    fn test_options_builder() {
        let options = PipelineOptions::default()
            .with_lockfile("project.lock")
            .with_output_dir("out")
            .with_tool_version(Version::new(9, 9, 9));
        assert_eq!(options.spec_path, PathBuf::from(DEFAULT_SPEC));
        assert_eq!(options.lockfile, Some(PathBuf::from("project.lock")));
        assert_eq!(options.output_dir, Some(PathBuf::from("out")));
        assert_eq!(options.tool_version, Version::new(9, 9, 9));
    }

    #[test]
    fn test_absolute_keeps_absolute() {
        let abs = env::current_dir().unwrap().join("x");
        assert_eq!(absolute(&abs), abs);
        assert!(absolute(Path::new("rel")).is_absolute());
    }
}
