use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use nireg_core::naming;
use nireg_registration::{
    ConsoleProgressCallback, ElastixEngine, ExtensionPolicy, ParameterMap, ParameterPreset,
    PipelineConfig, Registration,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod batch;

use batch::BatchOptions;

#[derive(Parser)]
#[command(name = "nireg")]
#[command(about = "Rigid-then-affine registration of NIfTI images with elastix")]
struct Cli {
    /// Debug logging, including the elastix log
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register MOVING onto FIXED and write r_<MOVING>
    Register(RegisterArgs),

    /// Register every NIfTI image under a directory onto FIXED
    Batch {
        fixed: PathBuf,

        /// Directory searched recursively for moving images
        moving_dir: PathBuf,

        /// Number of registrations run in parallel (default: one per core)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Write results here instead of beside each moving image
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Prefix of the registered image names
        #[arg(long, default_value = "r")]
        prefix: String,

        /// elastix binary (default: $ELASTIX_PATH, then `elastix` on PATH)
        #[arg(long)]
        elastix: Option<PathBuf>,
    },

    /// Report whether a pair of paths passes the extension checks
    Check { fixed: PathBuf, moving: PathBuf },

    /// Remove r_temp.nii and TransformParameters.0.txt
    Clean {
        #[arg(short, long, default_value = ".")]
        work_dir: PathBuf,
    },

    /// Print or write a default elastix parameter file
    Preset {
        /// translation, rigid, affine or bspline
        name: ParameterPreset,

        /// Override FinalBSplineInterpolationOrder
        #[arg(long)]
        interpolation_order: Option<u32>,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RegisterArgs {
    fixed: PathBuf,
    moving: PathBuf,

    /// Directory for the intermediate files
    #[arg(short, long, default_value = ".")]
    work_dir: PathBuf,

    /// Write the result here instead of beside the moving image
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Prefix of the registered image name
    #[arg(long, default_value = "r")]
    prefix: String,

    /// elastix binary (default: $ELASTIX_PATH, then `elastix` on PATH)
    #[arg(long)]
    elastix: Option<PathBuf>,

    /// Gate the stages with the historical extension check
    #[arg(long)]
    legacy_extension_check: bool,

    /// Leave r_temp.nii and TransformParameters.0.txt in the work directory
    #[arg(long)]
    keep_intermediate: bool,

    /// elastix parameter file for the rigid stage
    #[arg(long)]
    rigid_parameters: Option<PathBuf>,

    /// elastix parameter file for the affine stage
    #[arg(long)]
    affine_parameters: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Register(args) => {
            register(args)?;
        }
        Commands::Batch {
            fixed,
            moving_dir,
            jobs,
            output_dir,
            prefix,
            elastix,
        } => {
            let options = BatchOptions {
                jobs,
                output_dir,
                prefix,
                elastix,
            };
            batch(&fixed, &moving_dir, &options)?;
        }
        Commands::Check { fixed, moving } => {
            check(&fixed, &moving);
        }
        Commands::Clean { work_dir } => {
            Registration::remove_files(&work_dir)
                .with_context(|| format!("Failed to clean {}", work_dir.display()))?;
            info!("Removed intermediate files from {}", work_dir.display());
        }
        Commands::Preset {
            name,
            interpolation_order,
            output,
        } => {
            preset(name, interpolation_order, output.as_deref())?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn engine(elastix: Option<&Path>) -> ElastixEngine {
    match elastix {
        Some(binary) => ElastixEngine::with_binary(binary),
        None => ElastixEngine::new(),
    }
}

fn load_parameters(path: Option<&Path>, preset: ParameterPreset) -> Result<ParameterMap> {
    match path {
        Some(path) => ParameterMap::read_file(path)
            .with_context(|| format!("Failed to load parameters from {}", path.display())),
        None => Ok(ParameterMap::preset(preset)),
    }
}

fn register(args: RegisterArgs) -> Result<()> {
    let policy = if args.legacy_extension_check {
        ExtensionPolicy::Legacy
    } else {
        ExtensionPolicy::Strict
    };

    let mut config = PipelineConfig::new()
        .with_work_dir(&args.work_dir)
        .with_output_prefix(&args.prefix)
        .with_extension_policy(policy)
        .keep_intermediate(args.keep_intermediate)
        .with_rigid_parameters(load_parameters(
            args.rigid_parameters.as_deref(),
            ParameterPreset::Rigid,
        )?)
        .with_affine_parameters(load_parameters(
            args.affine_parameters.as_deref(),
            ParameterPreset::Affine,
        )?);
    if let Some(dir) = &args.output_dir {
        config = config.with_output_dir(dir);
    }

    let label = args.moving.display().to_string();
    let mut task = Registration::with_engine(&args.fixed, &args.moving, engine(args.elastix.as_deref()))
        .with_config(config)
        .with_progress(Arc::new(ConsoleProgressCallback::with_label(label)));

    let written = task
        .run()
        .with_context(|| format!("Failed to register {}", args.moving.display()))?;
    println!("{}", written.display());
    Ok(())
}

fn batch(fixed: &Path, moving_dir: &Path, options: &BatchOptions) -> Result<()> {
    let summary = batch::run_batch(fixed, moving_dir, options, || {
        engine(options.elastix.as_deref())
    })?;
    if summary.is_empty() {
        warn!("No NIfTI images found under {}", moving_dir.display());
        return Ok(());
    }

    for outcome in summary.failed() {
        if let Err(e) = &outcome.result {
            warn!("{}: {}", outcome.moving.display(), e);
        }
    }
    info!(
        "{} of {} registrations succeeded",
        summary.succeeded().count(),
        summary.len()
    );

    let failed = summary.failed().count();
    if failed > 0 {
        anyhow::bail!("{} of {} registrations failed", failed, summary.len());
    }
    Ok(())
}

fn check(fixed: &Path, moving: &Path) {
    let legacy = naming::legacy_extension_check(fixed, moving);
    let strict = naming::strict_extension_check(fixed, moving);
    println!("legacy check (is_img_nii): {}", legacy);
    println!("strict check (both NIfTI): {}", strict);
    if legacy != strict {
        warn!("The legacy and strict checks disagree for this pair");
    }
}

fn preset(name: ParameterPreset, interpolation_order: Option<u32>, output: Option<&Path>) -> Result<()> {
    let mut map = ParameterMap::preset(name);
    if let Some(order) = interpolation_order {
        map = map.with_interpolation_order(order);
    }

    match output {
        Some(path) => {
            map.write_file(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {} parameters to {}", name, path.display());
        }
        None => print!("{}", map.to_elastix_string()),
    }
    Ok(())
}
