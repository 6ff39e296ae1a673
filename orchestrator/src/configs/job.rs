use std::{
    fs, io,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use comms::specs::metrics::Metric;
use serde::{Deserialize, Serialize};

use super::ModelConfig;
use crate::{
    error::SessionError,
    search::{HyperParams, SearchSpace},
};

const DEFAULT_ADDRESS: &str = "127.0.0.1:54321";
const DEFAULT_TIMEOUT_SECS: u64 = 300;

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// A whole session described in one file: where to connect, what to import and what to fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default)]
    pub nthreads: Option<NonZeroUsize>,
    #[serde(default)]
    pub max_mem: Option<u64>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    pub dataset: PathBuf,
    #[serde(default)]
    pub categorical: Vec<String>,
    #[serde(default)]
    pub split: Option<SplitConfig>,
    pub model: ModelConfig,
    #[serde(default)]
    pub search: Option<SearchConfig>,
    /// The metric search results are ranked by, mse or logloss depending on the problem if unset.
    #[serde(default)]
    pub rank_by: Option<Metric>,
    #[serde(default)]
    pub save_dir: Option<PathBuf>,
}

/// How the imported dataset is partitioned, the first part trains and the second validates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    pub ratios: Vec<f64>,
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SearchConfig {
    Grid {
        hyper_params: HyperParams,
    },
    Random {
        space: SearchSpace,
        trials: usize,
        #[serde(default)]
        seed: u64,
    },
}

impl JobConfig {
    /// Reads a job from a JSON file.
    ///
    /// # Errors
    /// `SessionError::NotFound` if the file does not exist and
    /// `SessionError::Validation` if it cannot be read or is not a valid job.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => {
                SessionError::NotFound(format!("job file {}", path.display()))
            }
            _ => SessionError::Validation(format!("cannot read job file {}: {e}", path.display())),
        })?;

        Self::from_json(&text)
    }

    /// Parses and validates a job.
    ///
    /// # Errors
    /// `SessionError::Validation` if the text is not a valid job.
    pub fn from_json(text: &str) -> Result<Self, SessionError> {
        let job: Self = serde_json::from_str(text)
            .map_err(|e| SessionError::Validation(format!("malformed job: {e}")))?;

        job.model.validate()?;
        if let Some(split) = &job.split {
            comms::specs::frame::check_split_ratios(&split.ratios)
                .map_err(SessionError::Validation)?;
        }

        Ok(job)
    }
}
