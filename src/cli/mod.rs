//! Command-line parsing for the lineage fitness estimator.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! modeling code. Handlers live in `app`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::domain::{FailurePolicy, PriorKind, DEFAULT_OTHER_LABEL};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "lfit", version, about = "Lineage fitness inference from barcode count time series")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level; overrides LINEAGE_FITNESS_LOG.
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every replicate of one population/environment and write the results.
    Fit(FitArgs),
    /// Generate synthetic count tables with known fitness.
    Simulate(SimulateArgs),
    /// Print a previously written collected-fitness table.
    Report(ReportArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Directory holding `{output}_{population}_{environment}_{rep}.csv` tables.
    #[arg(long, default_value = ".")]
    pub input_dir: PathBuf,

    /// Directory for written results (created if missing).
    #[arg(long, default_value = "out")]
    pub output_dir: PathBuf,

    /// Run label; the first component of every file name.
    #[arg(short = 'o', long, default_value = "LTEE")]
    pub output: String,

    #[arg(short = 'p', long)]
    pub population: String,

    #[arg(short = 'e', long)]
    pub environment: String,

    /// Number of replicate tables to read.
    #[arg(short = 'r', long, default_value_t = 3)]
    pub replicates: usize,

    /// Fixed fitness of the reference (first) lineage.
    #[arg(long = "reference", default_value_t = 0.0, allow_negative_numbers = true)]
    pub s_ref: f64,

    /// Prior on the non-reference fitness values.
    #[arg(long, value_enum, default_value_t = PriorKind::Flat)]
    pub prior: PriorKind,

    /// `(mean, sd)` table for `--prior fixed-values`.
    #[arg(long, value_name = "CSV")]
    pub prior_values: Option<PathBuf>,

    /// Lineage ids to keep (first = reference); everything else is pooled.
    #[arg(long = "group", value_name = "ID", value_delimiter = ',')]
    pub groups: Vec<String>,

    /// Label of the pooled row when condensing.
    #[arg(long, default_value = DEFAULT_OTHER_LABEL)]
    pub other_label: String,

    /// Write reconstructed trajectories.
    #[arg(long)]
    pub reconstruct: bool,

    /// Last day of the reconstruction grid.
    #[arg(long, default_value_t = 5)]
    pub max_days: usize,

    /// Generations per day; reconstruction times are `day * gens_per_day`.
    #[arg(long, default_value_t = 7.0)]
    pub gens_per_day: f64,

    /// What to do when a replicate fails.
    #[arg(long = "on-failure", value_enum, default_value_t = FailurePolicy::Abort)]
    pub failure_policy: FailurePolicy,

    /// Optimizer iteration budget per replicate.
    #[arg(long)]
    pub max_iters: Option<usize>,

    /// Gradient infinity-norm tolerance.
    #[arg(long)]
    pub grad_tol: Option<f64>,
}

#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    /// Output directory for the generated tables.
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// File stem; tables are written as `{name}_{rep}.csv`.
    #[arg(long, default_value = "sim")]
    pub name: String,

    /// Lineage ids (default `L0, L1, ...`).
    #[arg(long, value_delimiter = ',')]
    pub ids: Vec<String>,

    /// Initial frequencies over all lineages.
    #[arg(long, value_delimiter = ',', required = true)]
    pub f0: Vec<f64>,

    /// Fitness of every lineage, reference first.
    #[arg(long, value_delimiter = ',', required = true, allow_negative_numbers = true)]
    pub fitness: Vec<f64>,

    /// Sample times.
    #[arg(long, value_delimiter = ',', default_value = "0,7,14,21,28")]
    pub times: Vec<f64>,

    /// Expected reads per sample.
    #[arg(long, default_value_t = 10_000.0)]
    pub depth: f64,

    #[arg(long, default_value_t = 1)]
    pub replicates: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[derive(Debug, Parser, Clone)]
pub struct ReportArgs {
    /// Collected-fitness CSV written by `lfit fit`.
    #[arg(value_name = "CSV")]
    pub input: PathBuf,

    /// Also print optimizer diagnostics from a summary JSON.
    #[arg(long, value_name = "JSON")]
    pub summary: Option<PathBuf>,
}
