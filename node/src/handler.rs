use std::{io, path::PathBuf, sync::Arc};

use comms::{
    msg::{Command, Reply},
    specs::{
        cluster::{ClusterInfo, ClusterSpec},
        frame::FrameData,
        model::TrainSpec,
    },
};
use log::{info, warn};
use parking_lot::Mutex;
use tokio::{sync::Semaphore, task};

use crate::{
    config::NodeConfig,
    error::{NodeErr, Result},
    frames, model, persist,
    store::Store,
};

/// Executes client commands against the shared store.
///
/// CPU bound work runs on the blocking pool, fits are bounded by `nthreads`.
pub struct Handler {
    config: NodeConfig,
    store: Arc<Mutex<Store>>,
    fits: Arc<Semaphore>,
}

impl Handler {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::new(config.max_mem))),
            fits: Arc::new(Semaphore::new(config.nthreads.get())),
            config,
        }
    }

    /// Runs `cmd` and builds its reply.
    ///
    /// # Arguments
    /// * `cmd` - Any command except `Disconnect`, which the connection loop handles.
    ///
    /// # Returns
    /// The reply on success or the error to report as a fault.
    pub async fn handle(&self, cmd: Command) -> Result<Reply> {
        match cmd {
            Command::Connect(spec) => Ok(Reply::Cluster(self.connect(spec))),
            Command::ImportFile {
                path,
                destination,
                categorical,
            } => self.import(path, destination, categorical).await,
            Command::Upload { destination, data } => self.upload(destination, data),
            Command::AsFactor { frame, column } => {
                let data = self.store.lock().frame(&frame)?;
                let converted = blocking(move || frames::as_factor(&data, &column)).await?;

                let mut store = self.store.lock();
                let key = store.next_key(&format!("{frame}_factor"));
                Ok(Reply::Frame(store.insert_frame(key, converted)?))
            }
            Command::Split {
                frame,
                ratios,
                seed,
            } => {
                let data = self.store.lock().frame(&frame)?;
                let parts = blocking(move || frames::split(&data, &ratios, seed)).await?;

                let mut store = self.store.lock();
                let keyed = parts
                    .into_iter()
                    .enumerate()
                    .map(|(i, part)| (store.next_key(&format!("{frame}_part{i}")), part))
                    .collect();

                Ok(Reply::Frames(store.insert_frames(keyed)?))
            }
            Command::Train(spec) => self.train(spec).await,
            Command::Predict { model: key, frame } => {
                let (trained, data) = {
                    let store = self.store.lock();
                    (store.model(&key)?, store.frame(&frame)?)
                };
                let predictions = blocking(move || model::predict(&trained, &data)).await?;

                let mut store = self.store.lock();
                let key = store.next_key(&format!("{key}_predictions"));
                Ok(Reply::Frame(store.insert_frame(key, predictions)?))
            }
            Command::Performance { model: key, frame } => {
                let (trained, data) = {
                    let store = self.store.lock();
                    (store.model(&key)?, store.frame(&frame)?)
                };
                let metrics = blocking(move || model::performance(&trained, &data)).await?;
                Ok(Reply::Metrics(metrics))
            }
            Command::SaveModel { model: key, dir } => {
                let trained = self.store.lock().model(&key)?;
                let path = blocking(move || persist::save(&trained, &dir)).await?;
                Ok(Reply::Path(path))
            }
            Command::LoadModel { path } => {
                let loaded = blocking(move || persist::load(&path)).await?;
                let meta = self.store.lock().insert_model(loaded)?;
                Ok(Reply::Model(Box::new(meta)))
            }
            Command::DescribeFrame { key } => Ok(Reply::Frame(self.store.lock().frame_meta(&key)?)),
            Command::DescribeModel { key } => {
                let trained = self.store.lock().model(&key)?;
                Ok(Reply::Model(Box::new(trained.meta.clone())))
            }
            Command::Fetch { frame, limit } => {
                let data = self.store.lock().frame(&frame)?;
                let data = match limit {
                    Some(limit) if limit < data.nrows() => {
                        data.take_rows(&(0..limit).collect::<Vec<_>>())
                    }
                    _ => FrameData::clone(&data),
                };
                Ok(Reply::Data(data))
            }
            Command::Remove { key } => {
                self.store.lock().remove(&key)?;
                info!("removed {key}");
                Ok(Reply::Ack)
            }
            Command::List => {
                let store = self.store.lock();
                Ok(Reply::Listing {
                    frames: store.frame_keys(),
                    models: store.model_keys(),
                })
            }
            Command::Disconnect => Ok(Reply::Ack),
        }
    }

    fn connect(&self, spec: ClusterSpec) -> ClusterInfo {
        let store = self.store.lock();
        let info = ClusterInfo {
            name: self.config.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            nthreads: self.config.nthreads,
            max_mem: self.config.max_mem,
            frames: store.frame_keys().len(),
            models: store.model_keys().len(),
        };

        if spec.nthreads.is_some_and(|n| n != info.nthreads) || spec.max_mem != info.max_mem {
            warn!(
                "client asked for nthreads={:?} max_mem={:?}, node runs with nthreads={} max_mem={:?}",
                spec.nthreads, spec.max_mem, info.nthreads, info.max_mem
            );
        }

        info
    }

    async fn import(
        &self,
        path: PathBuf,
        destination: Option<String>,
        categorical: Vec<String>,
    ) -> Result<Reply> {
        let key = destination.unwrap_or_else(|| frames::default_key(&path));
        info!("importing {} as {key}", path.display());

        let data = blocking(move || frames::read_csv(&path, &categorical)).await?;
        Ok(Reply::Frame(self.store.lock().insert_frame(key, data)?))
    }

    fn upload(&self, destination: Option<String>, data: FrameData) -> Result<Reply> {
        data.validate().map_err(NodeErr::Invalid)?;

        let mut store = self.store.lock();
        let key = match destination {
            Some(key) => key,
            None => store.next_key("upload"),
        };

        Ok(Reply::Frame(store.insert_frame(key, data)?))
    }

    async fn train(&self, spec: TrainSpec) -> Result<Reply> {
        let _permit = self
            .fits
            .acquire()
            .await
            .map_err(|e| NodeErr::State(e.to_string()))?;

        let (key, training, validation, previous) = {
            let mut store = self.store.lock();
            let training = store.frame(&spec.training_frame)?;
            let validation = spec
                .validation_frame
                .as_deref()
                .map(|key| store.frame(key))
                .transpose()?;
            let previous = spec
                .algorithm
                .checkpoint()
                .map(|key| store.model(key))
                .transpose()?;
            let key = match &spec.model_id {
                Some(key) => key.clone(),
                None => store.next_key(&format!("{}_model", spec.algorithm.name())),
            };
            (key, training, validation, previous)
        };

        let trained = blocking(move || {
            model::train(
                key,
                &spec,
                &training,
                validation.as_deref(),
                previous.as_deref(),
            )
        })
        .await?;

        let meta = self.store.lock().insert_model(trained)?;
        info!("trained model {}", meta.key);
        Ok(Reply::Model(Box::new(meta)))
    }
}

/// Runs `f` on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| NodeErr::Io(io::Error::other(e)))?
}
