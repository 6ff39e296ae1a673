//! Frame level operations of the node: CSV import, splits and factor conversion.

use std::{collections::HashSet, path::Path};

use comms::specs::frame::{Column, ColumnData, FrameData, check_split_ratios};
use log::debug;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::error::{NodeErr, Result};

const MISSING: [&str; 3] = ["", "NA", "N/A"];

/// The key a file is imported under when no destination is given.
pub fn default_key(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".into());

    format!("{stem}.hex")
}

/// Parses the CSV file at `path`, the first record is the header.
///
/// # Arguments
/// * `path` - The file to read.
/// * `categorical` - Columns that must be parsed as categorical regardless of their content.
///
/// # Errors
/// `NotFound` when the file does not exist, `Invalid` when it is malformed.
pub fn read_csv(path: &Path, categorical: &[String]) -> Result<FrameData> {
    if !path.is_file() {
        return Err(NodeErr::NotFound(format!("file '{}'", path.display())));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.is_empty() || headers.iter().any(String::is_empty) {
        return Err(NodeErr::Invalid(format!(
            "'{}' has an empty header",
            path.display()
        )));
    }

    let known: HashSet<&str> = headers.iter().map(String::as_str).collect();
    if let Some(name) = categorical.iter().find(|c| !known.contains(c.as_str())) {
        return Err(NodeErr::Invalid(format!(
            "cannot force unknown column '{name}' to categorical"
        )));
    }

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for record in reader.records() {
        let record = record?;
        for (column, cell) in cells.iter_mut().zip(record.iter()) {
            column.push(cell.to_string());
        }
    }

    let columns = headers
        .into_iter()
        .zip(cells)
        .map(|(name, cells)| {
            let forced = categorical.contains(&name);
            parse_column(name, &cells, forced)
        })
        .collect();

    let frame = FrameData::new(columns);
    frame.validate().map_err(NodeErr::Invalid)?;

    debug!(rows = frame.nrows(), cols = frame.ncols(); "parsed {}", path.display());

    Ok(frame)
}

fn is_missing(cell: &str) -> bool {
    MISSING.contains(&cell)
}

fn parse_column(name: String, cells: &[String], forced: bool) -> Column {
    if !forced {
        let parsed: Option<Vec<Option<f64>>> = cells
            .iter()
            .map(|cell| {
                if is_missing(cell) {
                    return Some(None);
                }
                cell.parse::<f64>().ok().filter(|v| v.is_finite()).map(Some)
            })
            .collect();

        if let Some(values) = parsed {
            return Column::numeric(name, values);
        }
    }

    let labels: Vec<Option<&str>> = cells
        .iter()
        .map(|cell| (!is_missing(cell)).then_some(cell.as_str()))
        .collect();

    Column::categorical(name, &labels)
}

/// Randomly partitions the rows of `data` into `ratios.len() + 1` parts.
///
/// The last part holds the remainder and may be empty. Rows keep their
/// relative order inside each part and the partition only depends on `seed`.
pub fn split(data: &FrameData, ratios: &[f64], seed: u64) -> Result<Vec<FrameData>> {
    check_split_ratios(ratios).map_err(NodeErr::Invalid)?;

    let n = data.nrows();
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let mut bounds = Vec::with_capacity(ratios.len() + 2);
    bounds.push(0);

    let mut cumulative = 0.0;
    for ratio in ratios {
        cumulative += ratio;
        let bound = ((cumulative * n as f64).round() as usize).min(n);
        bounds.push(bound.max(*bounds.last().unwrap_or(&0)));
    }
    bounds.push(n);

    let parts = bounds
        .windows(2)
        .map(|w| {
            let mut rows = order[w[0]..w[1]].to_vec();
            rows.sort_unstable();
            data.take_rows(&rows)
        })
        .collect();

    Ok(parts)
}

/// Converts `column` of `data` to categorical, levels are the distinct values in numeric order.
///
/// Categorical columns are returned unchanged.
pub fn as_factor(data: &FrameData, column: &str) -> Result<FrameData> {
    let index = data
        .columns
        .iter()
        .position(|c| c.name == column)
        .ok_or_else(|| NodeErr::Invalid(format!("unknown column '{column}'")))?;

    let mut out = data.clone();
    let ColumnData::Numeric(values) = &data.columns[index].data else {
        return Ok(out);
    };

    let mut distinct: Vec<f64> = values.iter().flatten().copied().collect();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();

    let levels: Vec<String> = distinct.iter().map(|v| format_level(*v)).collect();
    let codes = values
        .iter()
        .map(|v| {
            v.and_then(|v| distinct.binary_search_by(|d| d.total_cmp(&v)).ok())
                .map(|i| i as u32)
        })
        .collect();

    out.columns[index].data = ColumnData::Categorical { levels, codes };
    Ok(out)
}

fn format_level(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}
