use std::collections::HashSet;

use serde::{Deserialize, Serialize};

const RATIO_TOLERANCE: f64 = 1e-9;

/// The semantic type of a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ColumnKind {
    Numeric,
    Categorical { levels: Vec<String> },
}

impl ColumnKind {
    pub fn is_categorical(&self) -> bool {
        matches!(self, ColumnKind::Categorical { .. })
    }

    /// The levels of a categorical column, empty for numeric ones.
    pub fn levels(&self) -> &[String] {
        match self {
            ColumnKind::Numeric => &[],
            ColumnKind::Categorical { levels } => levels,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub kind: ColumnKind,
}

/// Metadata of a frame resident on the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMeta {
    pub key: String,
    pub rows: usize,
    pub columns: Vec<ColumnMeta>,
}

impl FrameMeta {
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// The values of a single column, `None` marks a missing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Categorical {
        levels: Vec<String>,
        codes: Vec<Option<u32>>,
    },
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(values) => values.len(),
            ColumnData::Categorical { codes, .. } => codes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnData::Numeric(_) => ColumnKind::Numeric,
            ColumnData::Categorical { levels, .. } => ColumnKind::Categorical {
                levels: levels.clone(),
            },
        }
    }

    /// The level name at `row` for categorical columns.
    pub fn label(&self, row: usize) -> Option<&str> {
        match self {
            ColumnData::Numeric(_) => None,
            ColumnData::Categorical { levels, codes } => {
                let code = codes.get(row).copied().flatten()?;
                levels.get(code as usize).map(String::as_str)
            }
        }
    }

    /// The numeric value at `row` for numeric columns.
    pub fn value(&self, row: usize) -> Option<f64> {
        match self {
            ColumnData::Numeric(values) => values.get(row).copied().flatten(),
            ColumnData::Categorical { .. } => None,
        }
    }

    /// A new column made of the rows at `rows`, in that order.
    pub fn take(&self, rows: &[usize]) -> Self {
        match self {
            ColumnData::Numeric(values) => {
                ColumnData::Numeric(rows.iter().map(|&r| values[r]).collect())
            }
            ColumnData::Categorical { levels, codes } => ColumnData::Categorical {
                levels: levels.clone(),
                codes: rows.iter().map(|&r| codes[r]).collect(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn numeric<S: Into<String>>(name: S, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Numeric(values),
        }
    }

    /// Builds a categorical column from labels, levels are the sorted distinct labels.
    pub fn categorical<S: Into<String>>(name: S, labels: &[Option<&str>]) -> Self {
        let mut levels: Vec<String> = labels.iter().flatten().map(|l| l.to_string()).collect();
        levels.sort();
        levels.dedup();

        let codes = labels
            .iter()
            .map(|l| {
                l.and_then(|l| levels.binary_search_by(|lv| lv.as_str().cmp(l)).ok())
                    .map(|i| i as u32)
            })
            .collect();

        Self {
            name: name.into(),
            data: ColumnData::Categorical { levels, codes },
        }
    }

    pub fn meta(&self) -> ColumnMeta {
        ColumnMeta {
            name: self.name.clone(),
            kind: self.data.kind(),
        }
    }
}

/// Column-major tabular data, the transfer format for uploads and fetches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameData {
    pub columns: Vec<Column>,
}

impl FrameData {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn nrows(&self) -> usize {
        self.columns.first().map(|c| c.data.len()).unwrap_or_default()
    }

    pub fn ncols(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Builds the metadata for this data stored under `key`.
    pub fn meta(&self, key: &str) -> FrameMeta {
        FrameMeta {
            key: key.to_string(),
            rows: self.nrows(),
            columns: self.columns.iter().map(Column::meta).collect(),
        }
    }

    /// A new frame made of the rows at `rows`, in that order.
    pub fn take_rows(&self, rows: &[usize]) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                data: c.data.take(rows),
            })
            .collect();

        Self { columns }
    }

    /// Checks the structural invariants of the frame.
    ///
    /// # Returns
    /// A human readable description of the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        let nrows = self.nrows();
        let mut names = HashSet::new();

        for column in &self.columns {
            if column.name.is_empty() {
                return Err("column names must not be empty".into());
            }

            if !names.insert(column.name.as_str()) {
                return Err(format!("duplicated column name '{}'", column.name));
            }

            if column.data.len() != nrows {
                return Err(format!(
                    "column '{}' has {} rows, expected {nrows}",
                    column.name,
                    column.data.len()
                ));
            }

            match &column.data {
                ColumnData::Numeric(values) => {
                    if values.iter().flatten().any(|v| !v.is_finite()) {
                        return Err(format!(
                            "column '{}' contains non finite values",
                            column.name
                        ));
                    }
                }
                ColumnData::Categorical { levels, codes } => {
                    let nlevels = levels.len();
                    if let Some(code) = codes.iter().flatten().find(|&&c| c as usize >= nlevels) {
                        return Err(format!(
                            "column '{}' has code {code} but only {nlevels} levels",
                            column.name
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    /// Rough in-memory footprint, used by the node's memory budget.
    pub fn estimated_bytes(&self) -> u64 {
        (self.nrows() as u64) * (self.ncols() as u64) * 8
    }
}

/// Checks that every split ratio is in `(0, 1]` and that they add up to at most one.
pub fn check_split_ratios(ratios: &[f64]) -> Result<(), String> {
    if ratios.is_empty() {
        return Err("at least one split ratio is required".into());
    }

    if let Some(r) = ratios.iter().find(|r| !(**r > 0.0 && **r <= 1.0)) {
        return Err(format!("split ratio {r} is not in (0, 1]"));
    }

    let total: f64 = ratios.iter().sum();
    if total > 1.0 + RATIO_TOLERANCE {
        return Err(format!("split ratios add up to {total}, more than 1"));
    }

    Ok(())
}
