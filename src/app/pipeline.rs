//! Shared run logic behind the `fit` and `simulate` subcommands.
//!
//! Keeping this in one place separates the workflow from presentation:
//! read replicate tables -> condense -> build prior -> fit replicates -> write outputs
//!
//! Outputs are written only after every fit the failure policy requires has
//! succeeded, so an aborted run leaves no partial results. Each file is staged
//! and renamed into place, and per-replicate files left by an earlier run for
//! a replicate skipped this time are removed.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::data::{generate_dataset, SyntheticDataset};
use crate::domain::{CountTable, FitConfig, SimulateConfig};
use crate::error::{FitError, Result};
use crate::fit::{fit_replicates, BatchFit, BatchSpec, FitnessPrior};
use crate::io::{
    read_prior_values, read_replicate_tables, write_aggregated_csv, write_count_table, write_map_csv,
    write_summary_json, write_trajectory_csv, write_truth_csv, RunLayout, RunSummary,
};

/// All outputs of a single `lfit fit` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub layout: RunLayout,
    /// The (possibly condensed) table that was fitted.
    pub table: CountTable,
    pub batch: BatchFit,
    pub written: Vec<PathBuf>,
}

/// Sample times of the reconstruction grid: `day * gens_per_day` for `day = 0..=max_days`.
pub fn reconstruction_grid(max_days: usize, gens_per_day: f64) -> Vec<f64> {
    (0..=max_days).map(|day| day as f64 * gens_per_day).collect()
}

/// Resolve the configured prior, reading external values when required.
pub fn build_prior(config: &FitConfig) -> Result<FitnessPrior> {
    let values = match &config.prior_values {
        Some(path) => Some(read_prior_values(path)?),
        None => None,
    };
    FitnessPrior::from_kind(config.prior, values)
}

fn validate_config(config: &FitConfig) -> Result<()> {
    if config.replicates == 0 {
        return Err(FitError::Config("replicate count must be > 0".into()));
    }
    if config.reconstruct && !(config.gens_per_day.is_finite() && config.gens_per_day > 0.0) {
        return Err(FitError::Config(format!(
            "generations per day must be finite and > 0 (got {})",
            config.gens_per_day
        )));
    }
    if config.population.is_empty() || config.environment.is_empty() {
        return Err(FitError::Config("population and environment must be non-empty".into()));
    }
    Ok(())
}

/// Execute the full fitting pipeline and write its outputs.
pub fn run_fit(config: &FitConfig) -> Result<RunOutput> {
    validate_config(config)?;
    let layout = RunLayout::from_config(config);

    let inputs = layout.inputs(config.replicates);
    info!("reading {} replicate table(s) for {}", inputs.len(), layout.stem());
    let raw = read_replicate_tables(&inputs)?;

    let table = if config.groups.is_empty() {
        raw
    } else {
        let condensed = raw.condense(&config.groups, &config.other_label)?;
        debug!(
            "condensed {} lineages into {} ({})",
            raw.n_lineages(),
            condensed.n_lineages(),
            condensed.ids().collect::<Vec<_>>().join(", ")
        );
        condensed
    };

    let spec = BatchSpec {
        population: config.population.clone(),
        environment: config.environment.clone(),
        s_ref: config.s_ref,
        prior: build_prior(config)?,
        estimator: config.estimator.clone(),
        policy: config.failure_policy,
        reconstruction_times: config
            .reconstruct
            .then(|| reconstruction_grid(config.max_days, config.gens_per_day)),
    };
    info!(
        "fitting {} lineages x {} times x {} replicate(s), prior={}",
        table.n_lineages(),
        table.n_times(),
        table.n_replicates(),
        config.prior.name()
    );
    let batch = fit_replicates(&table, &spec)?;

    let written = write_outputs(config, &layout, &table, &batch)?;
    info!("wrote {} file(s) to {}", written.len(), layout.output_dir().display());

    Ok(RunOutput {
        layout,
        table,
        batch,
        written,
    })
}

fn remove_stale(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            warn!("removed stale output {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FitError::io(path, e)),
    }
}

fn write_outputs(config: &FitConfig, layout: &RunLayout, table: &CountTable, batch: &BatchFit) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(layout.output_dir()).map_err(|e| FitError::io(layout.output_dir(), e))?;
    let mut written = Vec::new();

    for gap in &batch.gaps {
        remove_stale(&layout.map_estimate(gap.replicate))?;
        remove_stale(&layout.reconstructed(gap.replicate))?;
    }

    if !config.groups.is_empty() {
        for r in 0..table.n_replicates() {
            let path = layout.condensed(r + 1);
            write_count_table(&path, table, r)?;
            written.push(path);
        }
    }

    for fit in &batch.fits {
        let ids = &fit.reconstruction.ids;
        let path = layout.map_estimate(fit.replicate);
        write_map_csv(&path, ids, &fit.estimate)?;
        written.push(path);

        if config.reconstruct {
            let path = layout.reconstructed(fit.replicate);
            write_trajectory_csv(&path, ids, &fit.reconstruction.times, &fit.reconstruction.predicted)?;
            written.push(path);
        }
    }

    let path = layout.collected();
    write_aggregated_csv(&path, &batch.aggregate)?;
    written.push(path);

    let path = layout.summary();
    write_summary_json(&path, &RunSummary::from_batch(config, batch))?;
    written.push(path);

    Ok(written)
}

/// All outputs of a single `lfit simulate` run.
#[derive(Debug, Clone)]
pub struct SimulateOutput {
    pub dataset: SyntheticDataset,
    pub written: Vec<PathBuf>,
}

/// Generate a synthetic dataset and write `{name}_{rep}.csv` plus `{name}_truth.csv`.
pub fn run_simulate(config: &SimulateConfig, output_dir: &Path, name: &str) -> Result<SimulateOutput> {
    let dataset = generate_dataset(config)?;
    fs::create_dir_all(output_dir).map_err(|e| FitError::io(output_dir, e))?;

    let mut written = Vec::new();
    for r in 0..dataset.table.n_replicates() {
        let path = output_dir.join(format!("{name}_{}.csv", r + 1));
        write_count_table(&path, &dataset.table, r)?;
        written.push(path);
    }
    let path = output_dir.join(format!("{name}_truth.csv"));
    write_truth_csv(&path, &dataset.config.ids, &dataset.config.f0, &dataset.config.fitness)?;
    written.push(path);

    info!("simulated {} replicate table(s) into {}", dataset.table.n_replicates(), output_dir.display());
    Ok(SimulateOutput { dataset, written })
}
