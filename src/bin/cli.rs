//! Tessera CLI - run tiled tensor operations across in-process ranks

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use tessera::config::ConfigManager;
use tessera::error::{ErrorContext, WithContext};
use tessera::ops;
use tessera::runtime::StatsSnapshot;
use tessera::{
    init, version, CodeletRegistry, DType, Distribution, NodeContext, ProcessGroup, Tensor, TensorTraits,
    TesseraConfig, TesseraError, TesseraResult,
};

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Distributed tile-based tensor execution")]
#[command(version = version())]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fill a distributed tensor with a constant and verify it on every rank
    Fill {
        /// Number of in-process ranks
        #[arg(short, long, default_value = "2")]
        ranks: usize,

        /// Tensor shape, comma separated
        #[arg(short, long, value_delimiter = ',', default_value = "8,8")]
        shape: Vec<usize>,

        /// Basetile shape, comma separated
        #[arg(short, long, value_delimiter = ',', default_value = "4,4")]
        tile: Vec<usize>,

        /// Fill value
        #[arg(long, default_value = "1.0")]
        value: f64,
    },

    /// Run randn, sumnorm and normalize, then report per-slice statistics
    Normalize {
        /// Number of in-process ranks
        #[arg(short, long, default_value = "2")]
        ranks: usize,

        /// Tensor shape, comma separated
        #[arg(short, long, value_delimiter = ',', default_value = "16,6")]
        shape: Vec<usize>,

        /// Basetile shape, comma separated
        #[arg(short, long, value_delimiter = ',', default_value = "5,4")]
        tile: Vec<usize>,

        /// Axis to normalize along
        #[arg(short, long, default_value = "0")]
        axis: usize,

        /// Random seed
        #[arg(long, default_value = "0")]
        seed: u64,
    },

    /// Generate a configuration file
    Config {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "./tessera_config.json")]
        output: PathBuf,
    },
}

#[derive(Serialize)]
struct RunReport<T: Serialize> {
    ranks: usize,
    result: T,
    per_rank: Vec<StatsSnapshot>,
    total: StatsSnapshot,
}

#[derive(Serialize)]
struct SliceSummary {
    slices: usize,
    max_abs_mean: f64,
    max_deviation_error: f64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(recoverable = e.is_recoverable(), "{}", e);
            eprintln!("{}", e.user_message());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> TesseraResult<()> {
    let mut manager = ConfigManager::new();
    if let Some(path) = &cli.config {
        manager.load_from_file(path)?;
    }
    // Command-line overrides stay out of the loaded file.
    let mut config = manager.get_config();
    config.logging.verbose |= cli.verbose;
    init(&config.logging);

    match cli.command {
        Commands::Fill {
            ranks,
            shape,
            tile,
            value,
        } => {
            config.distributed.world_size = ranks;
            config.validate()?;
            fill_command(config, &shape, &tile, value)
        }
        Commands::Normalize {
            ranks,
            shape,
            tile,
            axis,
            seed,
        } => {
            config.distributed.world_size = ranks;
            config.validate()?;
            normalize_command(config, &shape, &tile, axis, seed)
        }
        Commands::Config { output } => generate_config(&config, &output),
    }
}

fn round_robin(shape: &[usize], tile: &[usize], world_size: usize) -> TesseraResult<Distribution> {
    let traits = TensorTraits::new(shape.to_vec(), tile.to_vec()).with_context(|| {
        ErrorContext::new("tensor layout")
            .with_shape(&format!("{:?}/{:?}", shape, tile))
            .with_suggestion("Give one positive basetile extent per axis")
    })?;
    Distribution::round_robin(traits.grid().shape().to_vec(), world_size)
}

fn report<T: Serialize>(ranks: usize, result: T, per_rank: Vec<StatsSnapshot>) -> TesseraResult<()> {
    let total = per_rank
        .iter()
        .fold(StatsSnapshot::default(), |acc, s| acc.merge(s));
    let report = RunReport {
        ranks,
        result,
        per_rank,
        total,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn fill_command(config: TesseraConfig, shape: &[usize], tile: &[usize], value: f64) -> TesseraResult<()> {
    let ranks = config.distributed.world_size;
    let distribution = round_robin(shape, tile, ranks)?;
    info!("Filling {:?} tiled by {:?} over {} ranks", shape, tile, ranks);

    let registry = Arc::new(CodeletRegistry::with_builtin()?);
    let group = ProcessGroup::new(config)?;
    let per_rank = group.spmd(registry, |ctx| {
        let tensor = Tensor::from_shape(ctx, shape, tile, DType::F64, &distribution)?;
        ops::fill(ctx, value, &tensor)?;
        tensor.replicate(ctx)?.wait(ctx)?;
        let mut checked = 0usize;
        for i in 0..tensor.tile_count() {
            let values = tensor.read_tile::<f64>(ctx, i)?;
            if let Some(bad) = values.iter().find(|&&v| v != value) {
                return Err(TesseraError::InvalidState(format!(
                    "rank {} read {} in tile {}, expected {}",
                    ctx.rank(),
                    bad,
                    i,
                    value
                )));
            }
            checked += values.len();
        }
        info!(rank = ctx.rank(), elements = checked, "fill verified");
        Ok(ctx.stats())
    })?;
    report(ranks, "verified", per_rank)
}

fn normalize_command(config: TesseraConfig, shape: &[usize], tile: &[usize], axis: usize, seed: u64) -> TesseraResult<()> {
    if axis >= shape.len() {
        return Err(TesseraError::InvalidInput(format!(
            "axis {} out of range for shape {:?}",
            axis, shape
        )));
    }
    let ranks = config.distributed.world_size;
    let distribution = round_robin(shape, tile, ranks)?;
    let mut stats_shape = vec![2];
    let mut stats_tile = vec![2];
    for i in (0..shape.len()).filter(|&i| i != axis) {
        stats_shape.push(shape[i]);
        stats_tile.push(tile[i]);
    }
    let stats_distribution = round_robin(&stats_shape, &stats_tile, ranks)?;
    info!("Normalizing {:?} tiled by {:?} along axis {}", shape, tile, axis);

    let registry = Arc::new(CodeletRegistry::with_builtin()?);
    let group = ProcessGroup::new(config)?;
    let results = group.spmd(registry, |ctx| {
        let data = Tensor::from_shape(ctx, shape, tile, DType::F64, &distribution)?;
        let stats = Tensor::from_shape(ctx, &stats_shape, &stats_tile, DType::F64, &stats_distribution)?;
        let gamma_beta = Tensor::from_shape(ctx, &[2], &[2], DType::F64, &Distribution::single(0))?;
        gamma_beta.write_tile(ctx, 0, &[1.0f64, 0.0])?;

        ops::randn(ctx, &data, seed, 1.0, 3.0)?;
        ops::sumnorm(ctx, &data, &stats, axis)?;
        ops::normalize(ctx, &gamma_beta, &stats, &data, shape[axis], 1e-10, axis)?;
        ops::sumnorm(ctx, &data, &stats, axis)?;
        let summary = summarize(ctx, &stats, shape[axis])?;
        Ok((summary, ctx.stats()))
    })?;

    let (summaries, per_rank): (Vec<_>, Vec<_>) = results.into_iter().unzip();
    let summary = summaries
        .into_iter()
        .next()
        .ok_or_else(|| TesseraError::InternalError("no ranks ran".to_string()))?;
    report(ranks, summary, per_rank)
}

/// Mean and deviation of every slice, read on each rank after replication
fn summarize(ctx: &NodeContext, stats: &Tensor, size: usize) -> TesseraResult<SliceSummary> {
    stats.replicate(ctx)?.wait(ctx)?;
    let mut summary = SliceSummary {
        slices: 0,
        max_abs_mean: 0.0,
        max_deviation_error: 0.0,
    };
    for i in 0..stats.tile_count() {
        for pair in stats.read_tile::<f64>(ctx, i)?.chunks_exact(2) {
            let mean = pair[0] / size as f64;
            let rms = pair[1] / (size as f64).sqrt();
            let deviation = (rms * rms - mean * mean).max(0.0).sqrt();
            summary.slices += 1;
            summary.max_abs_mean = summary.max_abs_mean.max(mean.abs());
            summary.max_deviation_error = summary.max_deviation_error.max((deviation - 1.0).abs());
        }
    }
    Ok(summary)
}

fn generate_config(config: &TesseraConfig, output: &Path) -> TesseraResult<()> {
    info!("Generating configuration file...");
    std::fs::write(output, config.to_json()?)?;
    info!("Configuration saved to {:?}", output);
    Ok(())
}
