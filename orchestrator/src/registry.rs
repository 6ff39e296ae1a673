use std::collections::HashMap;

use comms::specs::{frame::FrameMeta, model::ModelMeta};

use crate::{
    error::SessionError,
    handles::{Frame, Handle, Model},
};

/// Last known metadata of every object this session created or loaded.
///
/// A handle is valid as long as its key is registered.
#[derive(Debug, Default)]
pub struct Registry {
    frames: HashMap<String, FrameMeta>,
    models: HashMap<String, ModelMeta>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_frame(&mut self, meta: FrameMeta) -> Frame {
        self.models.remove(&meta.key);
        self.frames.insert(meta.key.clone(), meta.clone());
        Frame::new(meta)
    }

    pub fn insert_model(&mut self, meta: ModelMeta) -> Model {
        self.frames.remove(&meta.key);
        self.models.insert(meta.key.clone(), meta.clone());
        Model::new(meta)
    }

    /// The registered metadata of `frame`.
    ///
    /// # Errors
    /// `SessionError::State` if the handle was removed or never belonged to this session.
    pub fn frame(&self, frame: &Frame) -> Result<&FrameMeta, SessionError> {
        self.frames
            .get(frame.key())
            .ok_or_else(|| invalid_handle("frame", frame.key()))
    }

    /// The registered metadata of `model`.
    ///
    /// # Errors
    /// `SessionError::State` if the handle was removed or never belonged to this session.
    pub fn model(&self, model: &Model) -> Result<&ModelMeta, SessionError> {
        self.models
            .get(model.key())
            .ok_or_else(|| invalid_handle("model", model.key()))
    }

    pub fn model_by_key(&self, key: &str) -> Option<&ModelMeta> {
        self.models.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.frames.contains_key(key) || self.models.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.frames.remove(key).is_some() | self.models.remove(key).is_some()
    }

    pub fn frames(&self) -> Vec<Frame> {
        let mut frames: Vec<Frame> = self.frames.values().cloned().map(Frame::new).collect();
        frames.sort_by(|a, b| a.key().cmp(b.key()));
        frames
    }

    pub fn models(&self) -> Vec<Model> {
        let mut models: Vec<Model> = self.models.values().cloned().map(Model::new).collect();
        models.sort_by(|a, b| a.key().cmp(b.key()));
        models
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.models.clear();
    }
}

fn invalid_handle(kind: &str, key: &str) -> SessionError {
    SessionError::State(format!("{kind} handle '{key}' is no longer valid"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(key: &str) -> FrameMeta {
        FrameMeta {
            key: key.into(),
            rows: 1,
            columns: vec![],
        }
    }

    #[test]
    fn removed_handles_are_invalid() {
        let mut registry = Registry::new();
        let frame = registry.insert_frame(meta("a"));
        assert!(registry.frame(&frame).is_ok());

        assert!(registry.remove("a"));
        assert!(matches!(registry.frame(&frame), Err(SessionError::State(_))));
        assert!(!registry.remove("a"));
    }

    #[test]
    fn clear_invalidates_everything() {
        let mut registry = Registry::new();
        registry.insert_frame(meta("a"));
        registry.insert_frame(meta("b"));
        assert_eq!(
            registry.frames().iter().map(|f| f.key().to_string()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );

        registry.clear();
        assert!(registry.frames().is_empty());
        assert!(!registry.contains("a"));
    }
}
