//! Projgen Core - Spec-Driven Project Generation
//!
//! # Guarantees
//! 1. Unchanged inputs are a no-op (lockfile match skips generation)
//! 2. Tool version, spec content and file set all feed the lockfile
//! 3. An existing project is never half-overwritten
//! 4. The lockfile is written only after the project is published

pub mod config;
pub mod version;
pub mod fingerprint;
pub mod project;
pub mod model;
pub mod validation;
pub mod bundle;
pub mod publish;
pub mod pipeline;

pub use config::{ConfigError, ConfigTree};
pub use version::VersionError;
pub use fingerprint::{compute_fingerprint, Fingerprint, FingerprintError, FingerprintStore};
pub use project::{BoxError, GeneratedArtifact, GenerationError, ProjectBuilder, ProjectGenerator, ProjectModel};
pub use model::{SpecProject, SpecProjectBuilder};
pub use bundle::{BundleArtifact, BundleGenerator};
pub use publish::{PublishError, PublishReport, PublishTransaction, Publisher};
pub use pipeline::{CacheWriteWarning, GenerationPipeline, PipelineError, PipelineOptions, RunOutcome, Stage};

use semver::Version;

pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// [`TOOL_VERSION`] as a semver value.
pub fn tool_version() -> Version {
    // Cargo rejects package versions that are not valid semver.
    Version::parse(TOOL_VERSION).unwrap_or_else(|_| Version::new(0, 0, 0))
}
