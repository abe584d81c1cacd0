//! CSV ingest for lineage count tables and prior/fitness tables.
//!
//! Count tables have one row per lineage:
//!
//! ```text
//! BC,0,7,14,21
//! ref,9012,8800,8650,8400
//! a,500,650,820,1010
//! ```
//!
//! - the first column holds the lineage id; its header is free-form
//! - every other header is a sample time
//! - empty / `nan` / `NA` cells are missing and count as 0
//! - counts may be written as integral floats (`12.0`)
//!
//! Structural problems (ragged rows, non-numeric headers, fractional counts)
//! are reported as `FileFormat` errors naming the file and line.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::StringRecord;

use crate::domain::{sanitize_count, validate_times, CountTable};
use crate::error::{FitError, Result};
use crate::fit::{LineageStats, NormalPrior};

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| FitError::io(path, e))
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

fn read_headers<R: Read>(reader: &mut csv::Reader<R>, source: &Path) -> Result<Vec<String>> {
    let headers = reader
        .headers()
        .map_err(|e| FitError::file_format(source, format!("failed to read header: {e}")))?;
    Ok(headers.iter().map(normalize_header_name).collect())
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports often prefix the first header with a UTF-8 BOM.
    name.trim().trim_start_matches('\u{feff}').to_string()
}

fn is_missing(cell: &str) -> bool {
    let cell = cell.trim();
    cell.is_empty()
        || cell.eq_ignore_ascii_case("nan")
        || cell.eq_ignore_ascii_case("na")
        || cell.eq_ignore_ascii_case("n/a")
        || cell.eq_ignore_ascii_case("null")
}

fn parse_count_cell(cell: &str) -> std::result::Result<u64, String> {
    if is_missing(cell) {
        return Ok(0);
    }
    let value: f64 = cell
        .trim()
        .parse()
        .map_err(|_| format!("'{cell}' is not a number"))?;
    sanitize_count(value)
}

fn parse_float_cell(cell: &str, what: &str) -> std::result::Result<f64, String> {
    let value: f64 = cell
        .trim()
        .parse()
        .map_err(|_| format!("{what} '{cell}' is not a number"))?;
    if !value.is_finite() {
        return Err(format!("{what} '{cell}' is not finite"));
    }
    Ok(value)
}

fn next_record<R: Read>(
    records: &mut csv::StringRecordsIter<'_, R>,
    source: &Path,
    line: usize,
) -> Result<Option<StringRecord>> {
    match records.next() {
        None => Ok(None),
        Some(Ok(record)) => Ok(Some(record)),
        Some(Err(e)) => Err(FitError::file_format(source, format!("line {line}: {e}"))),
    }
}

/// Read a single-replicate count table from `path`.
pub fn read_count_table(path: &Path) -> Result<CountTable> {
    parse_count_table(open(path)?, path)
}

/// Parse a single-replicate count table; `source` is used in error messages.
pub fn parse_count_table<R: Read>(input: R, source: &Path) -> Result<CountTable> {
    let mut reader = csv_reader(input);
    let headers = read_headers(&mut reader, source)?;
    if headers.first().is_none_or(|h| h.is_empty()) {
        return Err(FitError::file_format(source, "missing lineage id column header"));
    }

    let times = headers[1..]
        .iter()
        .enumerate()
        .map(|(k, h)| {
            h.parse::<f64>().map_err(|_| {
                FitError::file_format(source, format!("time header '{h}' (column {}) is not a number", k + 2))
            })
        })
        .collect::<Result<Vec<f64>>>()?;
    if times.is_empty() {
        return Err(FitError::file_format(source, "no time columns after the lineage id column"));
    }
    validate_times(&times).map_err(|e| FitError::file_format(source, e.to_string()))?;

    let mut ids = Vec::new();
    let mut counts = Vec::new();
    let mut records = reader.records();
    let mut line = 1;
    loop {
        line += 1;
        let Some(record) = next_record(&mut records, source, line)? else {
            break;
        };
        if record.len() != times.len() + 1 {
            return Err(FitError::file_format(
                source,
                format!("line {line}: expected {} fields, found {}", times.len() + 1, record.len()),
            ));
        }
        let id = normalize_header_name(&record[0]);
        if id.is_empty() {
            return Err(FitError::file_format(source, format!("line {line}: empty lineage id")));
        }
        for (k, cell) in record.iter().skip(1).enumerate() {
            let count = parse_count_cell(cell)
                .map_err(|msg| FitError::file_format(source, format!("line {line}, column {}: {msg}", k + 2)))?;
            counts.push(count);
        }
        ids.push(id);
    }
    if ids.is_empty() {
        return Err(FitError::file_format(source, "no lineage rows"));
    }

    CountTable::new(ids, times, 1, counts).map_err(|e| match e {
        FitError::DataShape(msg) => FitError::file_format(source, msg),
        other => other,
    })
}

/// Read one table per replicate and stack them (replicate `k` from `paths[k]`).
pub fn read_replicate_tables(paths: &[PathBuf]) -> Result<CountTable> {
    let tables = paths
        .iter()
        .map(|p| read_count_table(p))
        .collect::<Result<Vec<_>>>()?;
    CountTable::stack(&tables)
}

/// Read a per-lineage `(mean, sd)` prior table.
///
/// Columns are located by header (`mean`, and `sd` / `std`), so an optional
/// leading id column is allowed. Rows are taken in file order.
pub fn read_prior_values(path: &Path) -> Result<Vec<NormalPrior>> {
    let mut reader = csv_reader(open(path)?);
    let headers = read_headers(&mut reader, path)?;
    let find = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
    };
    let (Some(mean_col), Some(sd_col)) = (find(&["mean", "average"]), find(&["sd", "std", "standard deviation"])) else {
        return Err(FitError::file_format(path, "prior table needs 'mean' and 'sd' columns"));
    };

    let mut values = Vec::new();
    let mut records = reader.records();
    let mut line = 1;
    loop {
        line += 1;
        let Some(record) = next_record(&mut records, path, line)? else {
            break;
        };
        let cell = |col: usize, what: &str| {
            record
                .get(col)
                .ok_or_else(|| format!("missing {what}"))
                .and_then(|c| parse_float_cell(c, what))
                .map_err(|msg| FitError::file_format(path, format!("line {line}: {msg}")))
        };
        values.push(NormalPrior {
            mean: cell(mean_col, "mean")?,
            sd: cell(sd_col, "sd")?,
        });
    }
    if values.is_empty() {
        return Err(FitError::file_format(path, "prior table has no rows"));
    }
    Ok(values)
}

/// A collected-fitness table read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedFitness {
    pub ids: Vec<String>,
    /// Replicate column headers (`s_1`, `s_2`, ...).
    pub replicate_labels: Vec<String>,
    /// `[lineage][replicate]`; `None` marks a gap.
    pub values: Vec<Vec<Option<f64>>>,
    pub stats: Vec<LineageStats>,
}

/// Read a collected-fitness CSV (`BC, s_1..s_R, average, standard deviation`).
pub fn read_collected_fitness(path: &Path) -> Result<CollectedFitness> {
    let mut reader = csv_reader(open(path)?);
    let headers = read_headers(&mut reader, path)?;
    let width = headers.len();
    if width < 4
        || !headers[width - 2].eq_ignore_ascii_case("average")
        || !headers[width - 1].eq_ignore_ascii_case("standard deviation")
    {
        return Err(FitError::file_format(
            path,
            "expected header 'BC, s_1, ..., average, standard deviation'",
        ));
    }
    let replicate_labels = headers[1..width - 2].to_vec();

    let mut out = CollectedFitness {
        ids: Vec::new(),
        replicate_labels,
        values: Vec::new(),
        stats: Vec::new(),
    };
    let mut records = reader.records();
    let mut line = 1;
    loop {
        line += 1;
        let Some(record) = next_record(&mut records, path, line)? else {
            break;
        };
        if record.len() != width {
            return Err(FitError::file_format(
                path,
                format!("line {line}: expected {width} fields, found {}", record.len()),
            ));
        }
        let at_line = |msg: String| FitError::file_format(path, format!("line {line}: {msg}"));
        let row = record
            .iter()
            .skip(1)
            .take(width - 3)
            .map(|c| if c.is_empty() { Ok(None) } else { parse_float_cell(c, "fitness").map(Some) })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(at_line)?;
        let mean = parse_float_cell(&record[width - 2], "average").map_err(at_line)?;
        let sd = parse_float_cell(&record[width - 1], "standard deviation").map_err(at_line)?;

        out.ids.push(record[0].to_string());
        out.values.push(row);
        out.stats.push(LineageStats { mean, sd });
    }
    if out.ids.is_empty() {
        return Err(FitError::file_format(path, "collected fitness table has no rows"));
    }
    Ok(out)
}
