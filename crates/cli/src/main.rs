//! Strecha CLI
//!
//! Derives the roof/site composite (RGB, slope, elevation, thermal) from an
//! orthophoto, a DEM, a thermal raster and a boundary drawing.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use strecha_core::{
    load_config_or_default, validate_config, Config, DemBranchSource, ErrorPolicy, GdalEngine,
    LayerRegistry, ManifestRegistry, NoopRegistry, PipelineDefinition, PipelineRunner,
    PipelineVariant, RasterEngine, RegistryBackend, RunInputs,
};

/// Exit code when the run finished but some stage failed or was skipped.
const EXIT_INCOMPLETE: u8 = 2;

#[derive(Parser)]
#[command(name = "strecha")]
#[command(about = "Derive the roof/site six-band composite", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "STRECHA_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline
    Run(RunArgs),

    /// Check configuration and that the external tools can be started
    Validate,

    /// Print the stages a run would execute
    Stages {
        #[arg(long, value_enum)]
        variant: Option<VariantArg>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Boundary drawing (DXF)
    #[arg(long)]
    boundary: PathBuf,

    /// Digital elevation model
    #[arg(long)]
    dem: PathBuf,

    /// Directory receiving every artifact
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Orthophoto with at least three bands
    #[arg(long)]
    orthophoto: Option<PathBuf>,

    /// Thermal raster
    #[arg(long)]
    thermal: Option<PathBuf>,

    #[arg(long, value_enum)]
    variant: Option<VariantArg>,

    /// Leave out the RGB selection (requires --no-merge)
    #[arg(long)]
    no_rgb: bool,

    /// Leave out the thermal band selection (requires --no-merge)
    #[arg(long)]
    no_thermal: bool,

    /// Do not merge the six-band result
    #[arg(long)]
    no_merge: bool,

    /// Skip every stage after the first failure
    #[arg(long)]
    abort_on_error: bool,

    /// Exit non-zero when any stage failed or was skipped
    #[arg(long)]
    strict: bool,

    /// Write the run report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum VariantArg {
    Composite,
    DemOnly,
}

impl From<VariantArg> for PipelineVariant {
    fn from(variant: VariantArg) -> Self {
        match variant {
            VariantArg::Composite => PipelineVariant::Composite,
            VariantArg::DemOnly => PipelineVariant::DemOnly,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("Fatal error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(json: bool) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer()))
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = load_config_or_default(cli.config.as_deref()).with_context(|| {
        format!(
            "Failed to load config from {}",
            cli.config
                .as_deref()
                .map_or("defaults".to_string(), |p| p.display().to_string())
        )
    })?;

    match cli.command {
        Commands::Run(args) => {
            apply_overrides(&mut config, &args);
            validate_config(&config).context("Invalid configuration")?;
            check_inputs(&config, &args)?;
            run_command(config, args).await
        }
        Commands::Validate => {
            validate_config(&config).context("Invalid configuration")?;
            let engine = GdalEngine::new(config.engine.clone());
            engine.validate().await.context("Engine validation failed")?;
            info!("Configuration and {} tools OK", engine.name());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Stages { variant } => {
            if let Some(variant) = variant {
                config.pipeline.variant = variant.into();
            }
            stages_command(&config)
        }
    }
}

fn apply_overrides(config: &mut Config, args: &RunArgs) {
    if let Some(variant) = args.variant {
        config.pipeline.variant = variant.into();
    }
    if args.no_rgb {
        config.pipeline.branches.rgb = false;
    }
    if args.no_thermal {
        config.pipeline.branches.thermal = false;
    }
    if args.no_merge {
        config.pipeline.branches.merge = false;
    }
    if args.abort_on_error {
        config.pipeline.error_policy = ErrorPolicy::Abort;
    }
    if args.strict {
        config.pipeline.strict_exit = true;
    }
}

/// The composite variant reads the orthophoto and the thermal raster for every
/// branch left enabled.
fn check_inputs(config: &Config, args: &RunArgs) -> Result<()> {
    if config.pipeline.variant != PipelineVariant::Composite {
        return Ok(());
    }
    let branches = &config.pipeline.branches;
    if branches.rgb && args.orthophoto.is_none() {
        bail!("The composite variant requires --orthophoto (or --no-rgb --no-merge)");
    }
    if branches.thermal && args.thermal.is_none() {
        bail!("The composite variant requires --thermal (or --no-thermal --no-merge)");
    }
    Ok(())
}

async fn run_command(config: Config, args: RunArgs) -> Result<ExitCode> {
    let mut inputs = RunInputs::new(&args.boundary, &args.dem);
    inputs.orthophoto = args.orthophoto.clone();
    inputs.thermal = args.thermal.clone();

    let engine = GdalEngine::new(config.engine.clone());
    let registry = create_registry(&config, &args.output_dir);
    info!("Registering layers with {} registry", registry.name());

    let runner = PipelineRunner::new(&config, engine)
        .context("Invalid pipeline definition")?
        .with_registry(registry);
    let result = runner.run(&inputs, &args.output_dir).await?;

    if let Some(path) = &args.report {
        write_report(path, &result)?;
        info!("Wrote run report to {}", path.display());
    }

    for artifact in result.final_artifacts() {
        info!("Output: {}", artifact.path.display());
    }

    if result.succeeded() {
        return Ok(ExitCode::SUCCESS);
    }

    warn!(
        "Run incomplete: failed {:?}, skipped {:?}",
        result.failed_stages(),
        result.skipped_stages()
    );
    if config.pipeline.strict_exit {
        Ok(ExitCode::from(EXIT_INCOMPLETE))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn create_registry(config: &Config, output_dir: &Path) -> Arc<dyn LayerRegistry> {
    match config.registry.backend {
        RegistryBackend::Manifest => Arc::new(ManifestRegistry::new(
            output_dir.join(&config.registry.manifest_name),
        )),
        RegistryBackend::None => Arc::new(NoopRegistry),
    }
}

fn write_report(path: &Path, result: &strecha_core::RunResult) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

fn stages_command(config: &Config) -> Result<ExitCode> {
    let definition = PipelineDefinition::from_config(&config.pipeline)
        .context("Invalid pipeline definition")?;

    let source = match definition.branch_source() {
        DemBranchSource::RankFilter => "rank filter",
        DemBranchSource::HighPass => "high-pass",
    };
    println!(
        "{} pipeline, elevation from {}",
        definition.variant().as_str(),
        source
    );
    for (index, stage) in definition.stages().iter().enumerate() {
        let dependencies: Vec<&str> = definition
            .dependencies(*stage)
            .iter()
            .map(|dependency| dependency.name())
            .collect();
        println!(
            "{:>2}. {:<20} {}",
            index + 1,
            stage.name(),
            dependencies.join(", ")
        );
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_args() {
        let cli = Cli::try_parse_from([
            "strecha",
            "run",
            "--boundary",
            "obvod.dxf",
            "--dem",
            "dem.tif",
            "-o",
            "out",
            "--variant",
            "dem-only",
            "--strict",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.boundary, PathBuf::from("obvod.dxf"));
        assert!(args.orthophoto.is_none());

        let mut config = Config::default();
        apply_overrides(&mut config, &args);
        assert_eq!(config.pipeline.variant, PipelineVariant::DemOnly);
        assert!(config.pipeline.strict_exit);
        assert_eq!(config.pipeline.error_policy, ErrorPolicy::Continue);
    }

    #[test]
    fn test_run_requires_dem() {
        let result = Cli::try_parse_from(["strecha", "run", "--boundary", "obvod.dxf", "-o", "out"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_create_registry() {
        let mut config = Config::default();
        let registry = create_registry(&config, Path::new("/out"));
        assert_eq!(registry.name(), "manifest");

        config.registry.backend = RegistryBackend::None;
        let registry = create_registry(&config, Path::new("/out"));
        assert_eq!(registry.name(), "noop");
    }

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec![
            "strecha",
            "run",
            "--boundary",
            "obvod.dxf",
            "--dem",
            "dem.tif",
            "-o",
            "out",
        ];
        argv.extend_from_slice(extra);
        let Commands::Run(args) = Cli::try_parse_from(argv).unwrap().command else {
            panic!("expected run command");
        };
        args
    }

    #[test]
    fn test_composite_requires_orthophoto_and_thermal() {
        let args = run_args(&[]);
        let mut config = Config::default();
        apply_overrides(&mut config, &args);
        let err = check_inputs(&config, &args).unwrap_err();
        assert!(err.to_string().contains("--orthophoto"));

        let args = run_args(&["--orthophoto", "ortofoto.tif"]);
        let err = check_inputs(&config, &args).unwrap_err();
        assert!(err.to_string().contains("--thermal"));

        let args = run_args(&["--orthophoto", "ortofoto.tif", "--thermal", "tir.tif"]);
        assert!(check_inputs(&config, &args).is_ok());
    }

    #[test]
    fn test_dem_only_needs_no_optional_inputs() {
        let args = run_args(&["--variant", "dem-only"]);
        let mut config = Config::default();
        apply_overrides(&mut config, &args);
        assert!(check_inputs(&config, &args).is_ok());
    }

    #[test]
    fn test_switched_off_branches_need_no_inputs() {
        let args = run_args(&["--orthophoto", "ortofoto.tif", "--no-thermal", "--no-merge"]);
        let mut config = Config::default();
        apply_overrides(&mut config, &args);
        assert!(!config.pipeline.branches.thermal);
        assert!(!config.pipeline.branches.merge);
        assert!(config.pipeline.branches.rgb);
        assert!(check_inputs(&config, &args).is_ok());
    }
}
