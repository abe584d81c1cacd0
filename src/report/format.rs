//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the fitting code stays free of presentation concerns
//! - output changes are localized

use crate::data::SyntheticDataset;
use crate::domain::FitConfig;
use crate::fit::{BatchFit, LineageStats};
use crate::io::{CollectedFitness, RunSummary};

/// Format the result of a `fit` run: setup, per-replicate diagnostics, fitness table.
pub fn format_batch_report(batch: &BatchFit, config: &FitConfig) -> String {
    let mut out = String::new();

    out.push_str("=== lfit - lineage fitness (MAP) ===\n");
    out.push_str(&format!(
        "Run: {} | population={} | environment={}\n",
        config.output, config.population, config.environment
    ));
    out.push_str(&format!(
        "Prior: {} | reference s={} | replicates={} ({} fitted)\n",
        config.prior.name(),
        config.s_ref,
        config.replicates,
        batch.aggregate.n_fitted()
    ));

    out.push_str("\nReplicate diagnostics:\n");
    for fit in &batch.fits {
        out.push_str(&format!(
            "  rep {:<3} iters={:<6} log posterior={:.4} ({:?})",
            fit.replicate, fit.estimate.iterations, fit.estimate.log_posterior, fit.estimate.termination
        ));
        if let Some(h) = fit.estimate.hyper {
            out.push_str(&format!(" mu={:.5} sigma={:.5}", h.mu, h.sigma));
        }
        if let Some(residual) = fit.reconstruction.max_abs_residual() {
            out.push_str(&format!(" max|resid|={residual:.2e}"));
        }
        out.push('\n');
    }
    for gap in &batch.gaps {
        out.push_str(&format!("  rep {:<3} skipped: {}\n", gap.replicate, gap.message));
    }

    out.push_str("\nFitness:\n");
    out.push_str(&format_stats_table(&batch.aggregate.ids, &batch.aggregate.stats));
    out
}

/// Format a collected-fitness table read back from disk.
pub fn format_collected(collected: &CollectedFitness) -> String {
    let mut out = String::new();
    let gaps: usize = collected
        .values
        .first()
        .map(|row| row.iter().filter(|v| v.is_none()).count())
        .unwrap_or(0);
    out.push_str(&format!(
        "{} lineages x {} replicates ({} gap(s))\n",
        collected.ids.len(),
        collected.replicate_labels.len(),
        gaps
    ));
    out.push_str(&format_stats_table(&collected.ids, &collected.stats));
    out
}

/// Format the optimizer section of a summary JSON.
pub fn format_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Summary: {}_{}_{} | prior={} | generated {}\n",
        summary.output,
        summary.population,
        summary.environment,
        summary.prior.name(),
        summary.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    for rep in &summary.replicates {
        out.push_str(&format!(
            "  rep {:<3} iters={:<6} log posterior={:.4} ({:?})\n",
            rep.replicate, rep.iterations, rep.log_posterior, rep.termination
        ));
    }
    for gap in &summary.gaps {
        out.push_str(&format!("  rep {:<3} skipped: {}\n", gap.replicate, gap.message));
    }
    out
}

pub fn format_simulation(data: &SyntheticDataset) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Simulated {} lineages x {} times x {} replicate(s) at depth {} (seed {})\n",
        data.table.n_lineages(),
        data.table.n_times(),
        data.table.n_replicates(),
        data.config.depth,
        data.config.seed
    ));
    for ((id, f0), s) in data.config.ids.iter().zip(&data.config.f0).zip(&data.config.fitness) {
        out.push_str(&format!("  {id:<12} f0={f0:.4} s={s:+.5}\n"));
    }
    out
}

fn format_stats_table(ids: &[String], stats: &[LineageStats]) -> String {
    let width = ids.iter().map(|id| id.len()).max().unwrap_or(2).max(2);
    let mut out = String::new();
    out.push_str(&format!("{:<width$}  {:>12}  {:>12}\n", "BC", "average", "sd"));
    out.push_str(&format!("{}\n", "-".repeat(width + 28)));
    for (k, (id, s)) in ids.iter().zip(stats).enumerate() {
        let marker = if k == 0 { " (ref)" } else { "" };
        out.push_str(&format!("{id:<width$}  {:>+12.6}  {:>12.6}{marker}\n", s.mean, s.sd));
    }
    out
}
