//! Projgen CLI - Generate a project bundle from a spec
//!
//! Exit codes: 0 on success or an unchanged lockfile, 1 on any failure.

use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

use projgen_core::{
    pipeline::DEFAULT_SPEC, BundleGenerator, GenerationPipeline, PipelineOptions, SpecProjectBuilder,
    TOOL_VERSION,
};

#[derive(Parser)]
#[command(name = "projgen")]
#[command(about = "Projgen - generate a project bundle from a declarative spec")]
#[command(disable_version_flag = true)]
struct Cli {
    /// The path to the project spec file
    #[arg(short, long, env = "PROJGEN_SPEC", default_value = DEFAULT_SPEC)]
    spec: PathBuf,

    /// The folder where the project should be generated (defaults to the spec's folder)
    #[arg(short, long, env = "PROJGEN_PROJECT")]
    project: Option<PathBuf>,

    /// The path to a lockfile; when set, unchanged specs are not regenerated
    #[arg(short, long, env = "PROJGEN_LOCKFILE")]
    lockfile: Option<PathBuf>,

    /// Suppress informational and success messages
    #[arg(short, long)]
    quiet: bool,

    /// Show the tool version
    #[arg(short = 'v', long)]
    version: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.version {
        println!("{TOOL_VERSION}");
        return ExitCode::SUCCESS;
    }

    init_logging(cli.quiet);

    let mut options = PipelineOptions::new(cli.spec);
    if let Some(dir) = cli.project {
        options = options.with_output_dir(dir);
    }
    if let Some(lockfile) = cli.lockfile {
        options = options.with_lockfile(lockfile);
    }

    let pipeline = GenerationPipeline::new(
        SpecProjectBuilder,
        BundleGenerator::new(options.tool_version.clone()),
    );

    match pipeline.run(&options) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(stage = %e.stage(), "{}", error_chain(&e));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

/// Top-level message followed by each distinct cause.
fn error_chain(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
