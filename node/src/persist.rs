//! Model artifacts on disk.

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use comms::specs::model::ModelMeta;
use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    error::{NodeErr, Result},
    estimator::Estimator,
    model::TrainedModel,
};

const FORMAT: &str = "model-artifact";
const VERSION: u32 = 1;

#[derive(Serialize)]
struct ArtifactRef<'a> {
    format: &'a str,
    version: u32,
    meta: &'a ModelMeta,
    estimator: &'a Estimator,
}

#[derive(Deserialize)]
struct Artifact {
    format: String,
    version: u32,
    meta: ModelMeta,
    estimator: Estimator,
}

/// The file a model is saved to inside `dir`.
pub fn artifact_path(dir: &Path, key: &str) -> PathBuf {
    let name: String = key
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();

    dir.join(name)
}

/// Writes `model` to `dir/<key>`, creating `dir` if needed.
///
/// # Returns
/// The path of the written artifact.
pub fn save(model: &TrainedModel, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = artifact_path(dir, &model.meta.key);

    let artifact = ArtifactRef {
        format: FORMAT,
        version: VERSION,
        meta: &model.meta,
        estimator: &model.estimator,
    };

    let mut writer = BufWriter::new(File::create(&path)?);
    serde_json::to_writer(&mut writer, &artifact)?;
    writer.flush()?;

    info!("saved model {} to {}", model.meta.key, path.display());
    Ok(path)
}

/// Reads a model artifact written by [`save`].
///
/// # Errors
/// `NotFound` if `path` does not exist, `Invalid` if it is not a model artifact.
pub fn load(path: &Path) -> Result<TrainedModel> {
    if !path.is_file() {
        return Err(NodeErr::NotFound(format!("model file '{}'", path.display())));
    }

    let reader = BufReader::new(File::open(path)?);
    let artifact: Artifact = serde_json::from_reader(reader)?;

    if artifact.format != FORMAT || artifact.version != VERSION {
        return Err(NodeErr::Invalid(format!(
            "'{}' is a {} v{} file, expected {FORMAT} v{VERSION}",
            path.display(),
            artifact.format,
            artifact.version
        )));
    }

    info!("loaded model {} from {}", artifact.meta.key, path.display());
    Ok(TrainedModel {
        meta: artifact.meta,
        estimator: artifact.estimator,
    })
}
