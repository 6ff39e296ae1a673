use std::{collections::HashMap, sync::Arc};

use comms::specs::{
    frame::{FrameData, FrameMeta},
    model::ModelMeta,
};
use log::debug;

use crate::{
    error::{NodeErr, Result},
    model::TrainedModel,
};

/// The frames and models resident on the node, keyed by name.
///
/// Frames and models share one key space.
#[derive(Debug, Default)]
pub struct Store {
    frames: HashMap<String, Arc<FrameData>>,
    models: HashMap<String, Arc<TrainedModel>>,
    bytes: u64,
    max_mem: Option<u64>,
    counter: u64,
}

impl Store {
    pub fn new(max_mem: Option<u64>) -> Self {
        Self {
            max_mem,
            ..Default::default()
        }
    }

    /// A fresh key starting with `prefix`.
    pub fn next_key(&mut self, prefix: &str) -> String {
        loop {
            self.counter += 1;
            let key = format!("{prefix}_{}", self.counter);
            if !self.contains(&key) {
                return key;
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.frames.contains_key(key) || self.models.contains_key(key)
    }

    pub fn used_bytes(&self) -> u64 {
        self.bytes
    }

    /// Stores a single frame, replacing any frame under the same key.
    pub fn insert_frame(&mut self, key: String, data: FrameData) -> Result<FrameMeta> {
        let mut metas = self.insert_frames(vec![(key, data)])?;
        metas
            .pop()
            .ok_or_else(|| NodeErr::State("no frame was stored".into()))
    }

    /// Stores all frames or none of them.
    ///
    /// # Errors
    /// `State` if they would not fit in the memory budget, `Invalid` if a key names a model.
    pub fn insert_frames(&mut self, frames: Vec<(String, FrameData)>) -> Result<Vec<FrameMeta>> {
        if let Some((key, _)) = frames.iter().find(|(key, _)| self.models.contains_key(key)) {
            return Err(NodeErr::Invalid(format!("key '{key}' already names a model")));
        }

        let freed: u64 = frames
            .iter()
            .filter_map(|(key, _)| self.frames.get(key))
            .map(|f| f.estimated_bytes())
            .sum();
        let added: u64 = frames.iter().map(|(_, f)| f.estimated_bytes()).sum();
        let after = self.bytes.saturating_sub(freed) + added;

        if let Some(max_mem) = self.max_mem
            && after > max_mem
        {
            return Err(NodeErr::State(format!(
                "storing {added} bytes would exceed the memory budget of {max_mem} bytes"
            )));
        }

        self.bytes = after;
        let metas = frames
            .into_iter()
            .map(|(key, data)| {
                let meta = data.meta(&key);
                debug!(rows = meta.rows; "stored frame {key}");
                self.frames.insert(key, Arc::new(data));
                meta
            })
            .collect();

        Ok(metas)
    }

    pub fn frame(&self, key: &str) -> Result<Arc<FrameData>> {
        self.frames
            .get(key)
            .cloned()
            .ok_or_else(|| NodeErr::NotFound(format!("frame '{key}'")))
    }

    pub fn frame_meta(&self, key: &str) -> Result<FrameMeta> {
        Ok(self.frame(key)?.meta(key))
    }

    /// Stores a model, replacing any model under the same key.
    pub fn insert_model(&mut self, model: TrainedModel) -> Result<ModelMeta> {
        let key = model.meta.key.clone();
        if self.frames.contains_key(&key) {
            return Err(NodeErr::Invalid(format!("key '{key}' already names a frame")));
        }

        let meta = model.meta.clone();
        debug!("stored model {key}");
        self.models.insert(key, Arc::new(model));
        Ok(meta)
    }

    pub fn model(&self, key: &str) -> Result<Arc<TrainedModel>> {
        self.models
            .get(key)
            .cloned()
            .ok_or_else(|| NodeErr::NotFound(format!("model '{key}'")))
    }

    /// Drops the frame or model stored under `key`.
    pub fn remove(&mut self, key: &str) -> Result<()> {
        if let Some(frame) = self.frames.remove(key) {
            self.bytes = self.bytes.saturating_sub(frame.estimated_bytes());
            return Ok(());
        }

        self.models
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| NodeErr::NotFound(format!("key '{key}'")))
    }

    /// Metadata of every frame, sorted by key.
    pub fn frames(&self) -> Vec<FrameMeta> {
        let mut metas: Vec<FrameMeta> = self.frames.iter().map(|(k, f)| f.meta(k)).collect();
        metas.sort_by(|a, b| a.key.cmp(&b.key));
        metas
    }

    /// Keys of every model, sorted.
    pub fn model_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.models.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn frame_keys(&self) -> Vec<String> {
        self.frames().into_iter().map(|f| f.key).collect()
    }
}
