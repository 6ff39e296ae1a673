//! Closed-form baseline estimators backing the node's fits.
//!
//! Classification uses the nearest class centroid in standardised feature
//! space, regression uses ridge least squares. Both keep sufficient
//! statistics so that a checkpointed model can absorb more rows later on.

use comms::specs::frame::{ColumnData, ColumnKind, FrameData};
use ndarray::{Array1, Array2, ArrayView1, s};
use serde::{Deserialize, Serialize};

use crate::error::{NodeErr, Result};

const RIDGE_FLOOR: f64 = 1e-6;
const MIN_SCALE: f64 = 1e-12;

/// How a column's values are turned into a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    Numeric,
    Categorical { levels: Vec<String> },
}

impl Encoding {
    pub fn of(data: &ColumnData) -> Self {
        match data {
            ColumnData::Numeric(_) => Encoding::Numeric,
            ColumnData::Categorical { levels, .. } => Encoding::Categorical {
                levels: levels.clone(),
            },
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Encoding::Numeric => ColumnKind::Numeric,
            Encoding::Categorical { levels } => ColumnKind::Categorical {
                levels: levels.clone(),
            },
        }
    }
}

/// Standardises a single feature column, imputing missing values with the training mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEncoder {
    pub name: String,
    pub encoding: Encoding,
    pub mean: f64,
    pub scale: f64,
}

impl FeatureEncoder {
    fn fit(name: &str, data: &ColumnData, rows: &[usize]) -> Self {
        let mut encoder = Self {
            name: name.to_string(),
            encoding: Encoding::of(data),
            mean: 0.0,
            scale: 1.0,
        };

        let values: Vec<f64> = rows.iter().filter_map(|&r| encoder.raw(data, r)).collect();
        if !values.is_empty() {
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let std_dev = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

            encoder.mean = mean;
            encoder.scale = if std_dev > MIN_SCALE { std_dev } else { 1.0 };
        }

        encoder
    }

    /// Categorical values are matched by level name, unseen levels count as missing.
    fn raw(&self, data: &ColumnData, row: usize) -> Option<f64> {
        match (&self.encoding, data) {
            (Encoding::Numeric, ColumnData::Numeric(values)) => values[row],
            (Encoding::Categorical { levels }, ColumnData::Categorical { .. }) => {
                let label = data.label(row)?;
                levels.iter().position(|l| l == label).map(|i| i as f64)
            }
            _ => None,
        }
    }

    fn encode(&self, data: &ColumnData, row: usize) -> f64 {
        (self.raw(data, row).unwrap_or(self.mean) - self.mean) / self.scale
    }
}

/// The response values of the rows that have one.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Classes(Vec<usize>),
    Values(Vec<f64>),
}

impl Response {
    pub fn len(&self) -> usize {
        match self {
            Response::Classes(classes) => classes.len(),
            Response::Values(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn append(&mut self, other: Response) -> Result<()> {
        match (self, other) {
            (Response::Classes(a), Response::Classes(b)) => a.extend(b),
            (Response::Values(a), Response::Values(b)) => a.extend(b),
            _ => return Err(NodeErr::State("mixed response kinds".into())),
        }

        Ok(())
    }
}

/// Extracts the response column `y` on `rows`, skipping rows where it is missing.
///
/// # Arguments
/// * `frame` - The frame holding the response.
/// * `y` - The response column name.
/// * `target` - How the model encodes the response, labels are matched by name.
/// * `rows` - The candidate rows.
///
/// # Returns
/// The rows that have a response together with the encoded response.
pub fn response(
    frame: &FrameData,
    y: &str,
    target: &Encoding,
    rows: &[usize],
) -> Result<(Vec<usize>, Response)> {
    let column = frame
        .column(y)
        .ok_or_else(|| NodeErr::State(format!("frame has no response column '{y}'")))?;

    match (target, &column.data) {
        (Encoding::Numeric, ColumnData::Numeric(values)) => {
            let (kept, values) = rows
                .iter()
                .filter_map(|&r| values[r].map(|v| (r, v)))
                .unzip();
            Ok((kept, Response::Values(values)))
        }
        (Encoding::Categorical { levels }, data @ ColumnData::Categorical { .. }) => {
            let mut kept = Vec::with_capacity(rows.len());
            let mut classes = Vec::with_capacity(rows.len());

            for &row in rows {
                let Some(label) = data.label(row) else {
                    continue;
                };

                let class = levels.iter().position(|l| l == label).ok_or_else(|| {
                    NodeErr::State(format!("response level '{label}' is unknown to the model"))
                })?;

                kept.push(row);
                classes.push(class);
            }

            Ok((kept, Response::Classes(classes)))
        }
        _ => Err(NodeErr::State(format!(
            "response column '{y}' does not have the type the model expects"
        ))),
    }
}

/// What the estimator predicts for a set of rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    Classes {
        levels: Vec<String>,
        labels: Vec<usize>,
        probs: Vec<Vec<f64>>,
    },
    Values(Vec<f64>),
}

impl Prediction {
    pub fn len(&self) -> usize {
        match self {
            Prediction::Classes { labels, .. } => labels.len(),
            Prediction::Values(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn append(&mut self, other: Prediction) -> Result<()> {
        match (self, other) {
            (
                Prediction::Classes { labels, probs, .. },
                Prediction::Classes {
                    labels: more_labels,
                    probs: more_probs,
                    ..
                },
            ) => {
                labels.extend(more_labels);
                probs.extend(more_probs);
            }
            (Prediction::Values(a), Prediction::Values(b)) => a.extend(b),
            _ => return Err(NodeErr::State("mixed prediction kinds".into())),
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Head {
    Centroid {
        levels: Vec<String>,
        sums: Array2<f64>,
        counts: Vec<u64>,
    },
    Ridge {
        l2: f64,
        gram: Array2<f64>,
        moments: Array1<f64>,
        rows: u64,
        /// Feature weights followed by the intercept.
        coefficients: Array1<f64>,
    },
}

impl Head {
    fn absorb(&mut self, design: &Array2<f64>, response: &Response, l2: f64) -> Result<()> {
        match (self, response) {
            (Head::Centroid { sums, counts, .. }, Response::Classes(classes)) => {
                for (row, &class) in design.outer_iter().zip(classes) {
                    let mut sum = sums.row_mut(class);
                    sum += &row;
                    counts[class] += 1;
                }
            }
            (
                Head::Ridge {
                    l2: penalty,
                    gram,
                    moments,
                    rows,
                    coefficients,
                },
                Response::Values(values),
            ) => {
                let augmented = with_bias(design);
                *gram += &augmented.t().dot(&augmented);
                *moments += &augmented.t().dot(&ArrayView1::from(values.as_slice()));
                *rows += values.len() as u64;
                *penalty = l2;

                let lambda = *penalty * *rows as f64 + RIDGE_FLOOR;
                *coefficients = solve_ridge(gram, moments, lambda)?;
            }
            _ => {
                return Err(NodeErr::Invalid(
                    "response type does not match the model".into(),
                ));
            }
        }

        Ok(())
    }
}

/// A fitted estimator, feature encoders plus the problem specific head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimator {
    pub encoders: Vec<FeatureEncoder>,
    pub head: Head,
}

impl Estimator {
    /// Fits an estimator on `rows` of `frame`.
    ///
    /// # Arguments
    /// * `frame` - The training frame.
    /// * `rows` - The rows to train on, rows without a response are skipped.
    /// * `x` - Feature column names.
    /// * `y` - Response column name, categorical means classification.
    /// * `l2` - Ridge penalty per row for regression.
    /// * `warm` - A previous estimator to continue from, its encoders are kept.
    ///
    /// # Returns
    /// The fitted estimator or an error if the frame does not fit the request.
    pub fn fit(
        frame: &FrameData,
        rows: &[usize],
        x: &[String],
        y: &str,
        l2: f64,
        warm: Option<&Estimator>,
    ) -> Result<Self> {
        let target = match warm {
            Some(warm) => warm.response_encoding(),
            None => frame
                .column(y)
                .map(|c| Encoding::of(&c.data))
                .ok_or_else(|| NodeErr::Invalid(format!("unknown response column '{y}'")))?,
        };

        let (rows, response) = response(frame, y, &target, rows)?;
        if rows.is_empty() {
            return Err(NodeErr::Invalid(format!(
                "no rows with a value for response '{y}'"
            )));
        }

        let mut estimator = match warm {
            Some(warm) => warm.clone(),
            None => Self::fresh(frame, &rows, x, &target, l2)?,
        };

        let design = design(&estimator.encoders, frame, &rows)?;
        estimator.head.absorb(&design, &response, l2)?;
        Ok(estimator)
    }

    fn fresh(
        frame: &FrameData,
        rows: &[usize],
        x: &[String],
        target: &Encoding,
        l2: f64,
    ) -> Result<Self> {
        let encoders = x
            .iter()
            .map(|name| {
                let column = frame
                    .column(name)
                    .ok_or_else(|| NodeErr::Invalid(format!("unknown feature column '{name}'")))?;
                Ok(FeatureEncoder::fit(name, &column.data, rows))
            })
            .collect::<Result<Vec<_>>>()?;

        let d = encoders.len();
        let head = match target {
            Encoding::Categorical { levels } => Head::Centroid {
                levels: levels.clone(),
                sums: Array2::zeros((levels.len(), d)),
                counts: vec![0; levels.len()],
            },
            Encoding::Numeric => Head::Ridge {
                l2,
                gram: Array2::zeros((d + 1, d + 1)),
                moments: Array1::zeros(d + 1),
                rows: 0,
                coefficients: Array1::zeros(d + 1),
            },
        };

        Ok(Self { encoders, head })
    }

    pub fn response_encoding(&self) -> Encoding {
        match &self.head {
            Head::Centroid { levels, .. } => Encoding::Categorical {
                levels: levels.clone(),
            },
            Head::Ridge { .. } => Encoding::Numeric,
        }
    }

    /// Predicts every row in `rows`, missing feature values are imputed.
    pub fn predict(&self, frame: &FrameData, rows: &[usize]) -> Result<Prediction> {
        let design = design(&self.encoders, frame, rows)?;

        match &self.head {
            Head::Centroid {
                levels,
                sums,
                counts,
            } => {
                let centroids: Vec<Option<Array1<f64>>> = sums
                    .outer_iter()
                    .zip(counts)
                    .map(|(sum, &count)| (count > 0).then(|| sum.mapv(|v| v / count as f64)))
                    .collect();

                let mut labels = Vec::with_capacity(rows.len());
                let mut probs = Vec::with_capacity(rows.len());

                for x in design.outer_iter() {
                    let scores: Vec<Option<f64>> = centroids
                        .iter()
                        .map(|c| c.as_ref().map(|c| -0.5 * (&x - c).mapv(|v| v * v).sum()))
                        .collect();

                    let p = softmax(&scores);
                    labels.push(argmax(&p));
                    probs.push(p);
                }

                Ok(Prediction::Classes {
                    levels: levels.clone(),
                    labels,
                    probs,
                })
            }
            Head::Ridge { coefficients, .. } => {
                let d = self.encoders.len();
                let weights = coefficients.slice(s![..d]);
                let intercept = coefficients[d];

                let values = design.dot(&weights).iter().map(|v| v + intercept).collect();
                Ok(Prediction::Values(values))
            }
        }
    }
}

fn design(encoders: &[FeatureEncoder], frame: &FrameData, rows: &[usize]) -> Result<Array2<f64>> {
    let columns = encoders
        .iter()
        .map(|e| {
            frame
                .column(&e.name)
                .map(|c| &c.data)
                .ok_or_else(|| NodeErr::State(format!("frame has no column '{}'", e.name)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Array2::from_shape_fn(
        (rows.len(), encoders.len()),
        |(i, j)| encoders[j].encode(columns[j], rows[i]),
    ))
}

fn with_bias(design: &Array2<f64>) -> Array2<f64> {
    let (n, d) = design.dim();
    let mut out = Array2::ones((n, d + 1));
    out.slice_mut(s![.., ..d]).assign(design);
    out
}

/// Classes without training rows get a probability of zero.
fn softmax(scores: &[Option<f64>]) -> Vec<f64> {
    let max = scores
        .iter()
        .flatten()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);

    let weights: Vec<f64> = scores
        .iter()
        .map(|s| s.map(|s| (s - max).exp()).unwrap_or(0.0))
        .collect();

    let total: f64 = weights.iter().sum();
    weights.iter().map(|w| w / total).collect()
}

/// Ties resolve to the lowest index.
fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| {
            if v > best.1 { (i, v) } else { best }
        })
        .0
}

/// Solves `(gram + lambda * I') w = moments`, where `I'` leaves the intercept unpenalised.
fn solve_ridge(gram: &Array2<f64>, moments: &Array1<f64>, lambda: f64) -> Result<Array1<f64>> {
    let mut a = gram.clone();
    let d = a.nrows() - 1;
    for i in 0..d {
        a[[i, i]] += lambda;
    }

    cholesky_solve(&a, moments)
        .ok_or_else(|| NodeErr::State("the regression system is not positive definite".into()))
}

fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    let mut l = Array2::<f64>::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }

            if i == j {
                if !sum.is_finite() || sum <= 0.0 {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }

    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * z[k];
        }
        z[i] = sum / l[[i, i]];
    }

    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = z[i];
        for k in i + 1..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }

    Some(x)
}
