//! Export fitted results to CSV.
//!
//! Files are meant to be easy to consume in spreadsheets or downstream scripts:
//!
//! - per-replicate MAP estimates (`BC, s`)
//! - the collected fitness table (`BC, s_1..s_R, average, standard deviation`)
//! - frequency trajectories (`BC, <time>...`)
//! - count tables in the ingest format
//!
//! Every file is written to a `.tmp` sibling and renamed into place once
//! complete, so a failed write never leaves a truncated result behind.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::domain::CountTable;
use crate::error::{FitError, Result};
use crate::fit::{AggregatedFitness, MapEstimate};

/// Integral times print without a decimal point (`7`, not `7.0`).
pub fn format_time(t: f64) -> String {
    if t.fract() == 0.0 && t.abs() < 1e15 {
        format!("{}", t as i64)
    } else {
        format!("{t}")
    }
}

fn format_value(v: f64) -> String {
    format!("{v:.10}")
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Output staged under a temporary name; dropping it uncommitted discards it.
pub(crate) struct StagedFile<'a> {
    path: &'a Path,
    tmp: PathBuf,
    out: BufWriter<File>,
    committed: bool,
}

impl<'a> StagedFile<'a> {
    pub(crate) fn create(path: &'a Path) -> Result<Self> {
        let tmp = staging_path(path);
        let file = File::create(&tmp).map_err(|e| FitError::io(&tmp, e))?;
        Ok(Self {
            path,
            tmp,
            out: BufWriter::new(file),
            committed: false,
        })
    }

    pub(crate) fn writer(&mut self) -> &mut BufWriter<File> {
        &mut self.out
    }

    /// Flush and move the file to its final path.
    pub(crate) fn commit(mut self) -> Result<()> {
        self.out.flush().map_err(|e| FitError::io(&self.tmp, e))?;
        fs::rename(&self.tmp, self.path).map_err(|e| FitError::io(self.path, e))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

struct CsvFile<'a> {
    out: StagedFile<'a>,
}

impl<'a> CsvFile<'a> {
    fn create(path: &'a Path) -> Result<Self> {
        Ok(Self {
            out: StagedFile::create(path)?,
        })
    }

    fn row<I, S>(&mut self, cells: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let line = cells
            .into_iter()
            .map(|c| escape(c.as_ref()))
            .collect::<Vec<_>>()
            .join(",");
        let path = self.out.path;
        writeln!(self.out.writer(), "{line}").map_err(|e| FitError::io(path, e))
    }

    fn finish(self) -> Result<()> {
        self.out.commit()
    }
}

fn escape(cell: &str) -> String {
    if cell.contains([',', '"', '\n']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

fn id_header(times: &[f64]) -> Vec<String> {
    std::iter::once("BC".to_string())
        .chain(times.iter().map(|t| format_time(*t)))
        .collect()
}

/// One row per lineage: id and fitted fitness, reference first.
pub fn write_map_csv(path: &Path, ids: &[String], estimate: &MapEstimate) -> Result<()> {
    let fitness = estimate.full_fitness();
    if fitness.len() != ids.len() {
        return Err(FitError::DataShape(format!(
            "{} ids for an estimate over {} lineages",
            ids.len(),
            fitness.len()
        )));
    }

    let mut csv = CsvFile::create(path)?;
    csv.row(["BC", "s"])?;
    for (id, s) in ids.iter().zip(&fitness) {
        csv.row([id.clone(), format_value(*s)])?;
    }
    csv.finish()
}

/// Collected fitness table; gap replicates are left empty.
pub fn write_aggregated_csv(path: &Path, aggregated: &AggregatedFitness) -> Result<()> {
    let mut csv = CsvFile::create(path)?;
    let header = std::iter::once("BC".to_string())
        .chain((1..=aggregated.replicates.len()).map(|k| format!("s_{k}")))
        .chain(["average".to_string(), "standard deviation".to_string()]);
    csv.row(header)?;

    for (i, (id, stats)) in aggregated.ids.iter().zip(&aggregated.stats).enumerate() {
        let cells = std::iter::once(id.clone())
            .chain(aggregated.replicates.iter().map(|row| match row {
                Some(row) => format_value(row[i]),
                None => String::new(),
            }))
            .chain([format_value(stats.mean), format_value(stats.sd)]);
        csv.row(cells)?;
    }
    csv.finish()
}

/// Frequencies `[lineage][time]` as one row per lineage.
pub fn write_trajectory_csv(path: &Path, ids: &[String], times: &[f64], rows: &[Vec<f64>]) -> Result<()> {
    if rows.len() != ids.len() || rows.iter().any(|r| r.len() != times.len()) {
        return Err(FitError::DataShape(format!(
            "trajectory shape does not match {} lineages x {} times",
            ids.len(),
            times.len()
        )));
    }
    let mut csv = CsvFile::create(path)?;
    csv.row(id_header(times))?;
    for (id, row) in ids.iter().zip(rows) {
        csv.row(std::iter::once(id.clone()).chain(row.iter().map(|v| format_value(*v))))?;
    }
    csv.finish()
}

/// Replicate `replicate` (0-based) of `table` in the ingest format.
pub fn write_count_table(path: &Path, table: &CountTable, replicate: usize) -> Result<()> {
    if replicate >= table.n_replicates() {
        return Err(FitError::DataShape(format!(
            "replicate index {replicate} out of range for {} replicates",
            table.n_replicates()
        )));
    }
    let mut csv = CsvFile::create(path)?;
    csv.row(id_header(table.times()))?;
    for (i, id) in table.ids().enumerate() {
        let counts = (0..table.n_times()).map(|t| table.count(i, t, replicate).to_string());
        csv.row(std::iter::once(id.to_string()).chain(counts))?;
    }
    csv.finish()
}

/// Ground truth of a simulation: `BC, f0, s`.
pub fn write_truth_csv(path: &Path, ids: &[String], f0: &[f64], fitness: &[f64]) -> Result<()> {
    if f0.len() != ids.len() || fitness.len() != ids.len() {
        return Err(FitError::DataShape("ground truth length mismatch".into()));
    }
    let mut csv = CsvFile::create(path)?;
    csv.row(["BC", "f0", "s"])?;
    for ((id, f), s) in ids.iter().zip(f0).zip(fitness) {
        csv.row([id.clone(), format_value(*f), format_value(*s)])?;
    }
    csv.finish()
}
