//! File naming for one population/environment run.
//!
//! Every file shares the stem `{output}_{population}_{environment}`:
//!
//! ```text
//! input:   {stem}_{rep}.csv
//! outputs: {stem}_{rep}_MAP.csv
//!          {stem}_{rep}_reconstructed_freq.csv
//!          {stem}_{rep}_condensed_freq.csv
//!          {stem}_collected_fitness.csv
//!          {stem}_summary.json
//! ```
//!
//! Replicate labels are 1-based.

use std::path::{Path, PathBuf};

use crate::domain::FitConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    input_dir: PathBuf,
    output_dir: PathBuf,
    stem: String,
}

impl RunLayout {
    pub fn new(input_dir: &Path, output_dir: &Path, output: &str, population: &str, environment: &str) -> Self {
        Self {
            input_dir: input_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            stem: format!("{output}_{population}_{environment}"),
        }
    }

    pub fn from_config(config: &FitConfig) -> Self {
        Self::new(
            &config.input_dir,
            &config.output_dir,
            &config.output,
            &config.population,
            &config.environment,
        )
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn input(&self, rep: usize) -> PathBuf {
        self.input_dir.join(format!("{}_{rep}.csv", self.stem))
    }

    /// Inputs for replicates `1..=replicates`.
    pub fn inputs(&self, replicates: usize) -> Vec<PathBuf> {
        (1..=replicates).map(|rep| self.input(rep)).collect()
    }

    pub fn map_estimate(&self, rep: usize) -> PathBuf {
        self.output_dir.join(format!("{}_{rep}_MAP.csv", self.stem))
    }

    pub fn reconstructed(&self, rep: usize) -> PathBuf {
        self.output_dir.join(format!("{}_{rep}_reconstructed_freq.csv", self.stem))
    }

    pub fn condensed(&self, rep: usize) -> PathBuf {
        self.output_dir.join(format!("{}_{rep}_condensed_freq.csv", self.stem))
    }

    pub fn collected(&self) -> PathBuf {
        self.output_dir.join(format!("{}_collected_fitness.csv", self.stem))
    }

    pub fn summary(&self) -> PathBuf {
        self.output_dir.join(format!("{}_summary.json", self.stem))
    }
}
