//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and initializes logging
//! - parses CLI arguments
//! - runs the fit / simulate pipelines
//! - prints reports

use clap::Parser;
use log::LevelFilter;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

use crate::cli::{Cli, Command, FitArgs, LogLevel, ReportArgs, SimulateArgs};
use crate::domain::{FitConfig, SimulateConfig};
use crate::error::{FitError, Result};
use crate::fit::EstimatorOptions;

pub mod pipeline;

/// Environment variable consulted when `--log-level` is not given.
pub const LOG_ENV: &str = "LINEAGE_FITNESS_LOG";

/// Entry point for the `lfit` binary.
pub fn run() -> Result<()> {
    // A missing .env file is normal.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.log_level)?;

    match cli.command {
        Command::Fit(args) => handle_fit(&args),
        Command::Simulate(args) => handle_simulate(&args),
        Command::Report(args) => handle_report(&args),
    }
}

fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Off => LevelFilter::Off,
        LogLevel::Error => LevelFilter::Error,
        LogLevel::Warn => LevelFilter::Warn,
        LogLevel::Info => LevelFilter::Info,
        LogLevel::Debug => LevelFilter::Debug,
        LogLevel::Trace => LevelFilter::Trace,
    }
}

/// Resolve the log level from the flag, then the environment, then `warn`.
pub fn resolve_log_level(flag: Option<LogLevel>, env: Option<&str>) -> Result<LevelFilter> {
    if let Some(level) = flag {
        return Ok(level_filter(level));
    }
    match env.map(str::trim) {
        None | Some("") => Ok(LevelFilter::Warn),
        Some(value) => value
            .parse::<LevelFilter>()
            .map_err(|_| FitError::Config(format!("{LOG_ENV}='{value}' is not a log level"))),
    }
}

fn init_logging(flag: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV).ok();
    let level = resolve_log_level(flag, env.as_deref())?;
    let config = ConfigBuilder::new().set_time_level(LevelFilter::Debug).build();
    // Only the first logger wins; a second init (e.g. from tests) is harmless.
    let _ = TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto);
    Ok(())
}

fn handle_fit(args: &FitArgs) -> Result<()> {
    let config = fit_config_from_args(args);
    let run = pipeline::run_fit(&config)?;

    println!("{}", crate::report::format_batch_report(&run.batch, &config));
    for path in &run.written {
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn handle_simulate(args: &SimulateArgs) -> Result<()> {
    let config = simulate_config_from_args(args);
    let out = pipeline::run_simulate(&config, &args.output_dir, &args.name)?;

    println!("{}", crate::report::format_simulation(&out.dataset));
    for path in &out.written {
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn handle_report(args: &ReportArgs) -> Result<()> {
    let collected = crate::io::read_collected_fitness(&args.input)?;
    println!("{}", crate::report::format_collected(&collected));
    if let Some(path) = &args.summary {
        let summary = crate::io::read_summary_json(path)?;
        println!("{}", crate::report::format_summary(&summary));
    }
    Ok(())
}

pub fn fit_config_from_args(args: &FitArgs) -> FitConfig {
    let defaults = EstimatorOptions::default();
    FitConfig {
        input_dir: args.input_dir.clone(),
        output_dir: args.output_dir.clone(),
        output: args.output.clone(),
        population: args.population.clone(),
        environment: args.environment.clone(),
        replicates: args.replicates,

        s_ref: args.s_ref,
        prior: args.prior,
        prior_values: args.prior_values.clone(),

        groups: args.groups.clone(),
        other_label: args.other_label.clone(),

        reconstruct: args.reconstruct,
        max_days: args.max_days,
        gens_per_day: args.gens_per_day,

        failure_policy: args.failure_policy,
        estimator: EstimatorOptions {
            max_iters: args.max_iters.unwrap_or(defaults.max_iters),
            grad_tol: args.grad_tol.unwrap_or(defaults.grad_tol),
            ..defaults
        },
    }
}

pub fn simulate_config_from_args(args: &SimulateArgs) -> SimulateConfig {
    SimulateConfig {
        ids: args.ids.clone(),
        f0: args.f0.clone(),
        fitness: args.fitness.clone(),
        times: args.times.clone(),
        depth: args.depth,
        replicates: args.replicates,
        seed: args.seed,
    }
}
