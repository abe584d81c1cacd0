//! Synthetic lineage-count datasets with known fitness.
//!
//! Frequencies follow the exponential-competition law exactly; read counts are
//! independent Poisson draws around `frequency * depth`. The generator is
//! seeded, so a config always produces the same dataset.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::domain::{CountTable, SimulateConfig};
use crate::error::{FitError, Result};
use crate::fit::{sample_poisson, simulate};

#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    /// The config with lineage ids filled in.
    pub config: SimulateConfig,
    /// Noise-free frequencies `[lineage][time]`.
    pub frequencies: Vec<Vec<f64>>,
    pub table: CountTable,
}

pub fn default_ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("L{i}")).collect()
}

pub fn generate_dataset(config: &SimulateConfig) -> Result<SyntheticDataset> {
    let n = config.f0.len();
    if n < 2 {
        return Err(FitError::Config("simulation needs at least two lineages".into()));
    }
    if config.fitness.len() != n {
        return Err(FitError::Config(format!(
            "{n} initial frequencies but {} fitness values",
            config.fitness.len()
        )));
    }
    if config.replicates == 0 {
        return Err(FitError::Config("replicate count must be > 0".into()));
    }
    if !(config.depth.is_finite() && config.depth > 0.0) {
        return Err(FitError::Config(format!("depth {} must be finite and > 0", config.depth)));
    }
    let ids = if config.ids.is_empty() {
        default_ids(n)
    } else if config.ids.len() == n {
        config.ids.clone()
    } else {
        return Err(FitError::Config(format!(
            "{} lineage ids for {n} lineages",
            config.ids.len()
        )));
    };

    let frequencies = simulate(&config.f0, &config.fitness, &config.times)?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let (t_len, r_len) = (config.times.len(), config.replicates);
    let mut counts = vec![0u64; n * t_len * r_len];
    let mut column = vec![0.0; n];
    for r in 0..r_len {
        for t in 0..t_len {
            for (c, row) in column.iter_mut().zip(&frequencies) {
                *c = row[t];
            }
            let draws = sample_poisson(&column, config.depth, &mut rng)?;
            for (i, draw) in draws.into_iter().enumerate() {
                counts[(i * t_len + t) * r_len + r] = draw;
            }
        }
    }

    let table = CountTable::new(ids.clone(), config.times.clone(), r_len, counts)?;
    Ok(SyntheticDataset {
        config: SimulateConfig {
            ids,
            ..config.clone()
        },
        frequencies,
        table,
    })
}
