use std::collections::BTreeMap;

use crate::error::{Result, TensorError};
use crate::tensor::Tensor;

/// A bundle of named tensors: the inputs or outputs of one stage invocation.
///
/// Iteration order is lexical by name. Callers that need an index-derived
/// order (e.g. `logits_2` before `logits_10`) must sort explicitly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorMap {
    entries: BTreeMap<String, Tensor>,
}

impl TensorMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tensor, returning the previous tensor stored under `name`.
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) -> Option<Tensor> {
        self.entries.insert(name.into(), tensor)
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.insert(name, tensor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.entries.get(name)
    }

    /// Like [`TensorMap::get`], but a missing entry is an error.
    pub fn require(&self, name: &str) -> Result<&Tensor> {
        self.entries
            .get(name)
            .ok_or_else(|| TensorError::MissingTensor(name.to_string()))
    }

    /// Remove and return the tensor stored under `name`.
    pub fn take(&mut self, name: &str) -> Result<Tensor> {
        self.entries
            .remove(name)
            .ok_or_else(|| TensorError::MissingTensor(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;

    #[test]
    fn test_insert_and_require() {
        let map = TensorMap::new()
            .with("input_ids", Tensor::from_tokens(&[1, 2]))
            .with("k_cache", Tensor::zeros(Shape::new(vec![1, 0, 4])));
        assert_eq!(map.len(), 2);
        assert!(map.contains("input_ids"));
        assert_eq!(map.require("input_ids").unwrap().data_u32().unwrap(), &[1, 2]);
        assert!(matches!(
            map.require("v_cache"),
            Err(TensorError::MissingTensor(name)) if name == "v_cache"
        ));
    }

    #[test]
    fn test_take() {
        let mut map = TensorMap::new().with("a", Tensor::from_tokens(&[3]));
        assert!(map.take("a").is_ok());
        assert!(map.is_empty());
        assert!(map.take("a").is_err());
    }

    #[test]
    fn test_names_are_lexical() {
        let map = TensorMap::new()
            .with("logits_10", Tensor::from_tokens(&[]))
            .with("logits_2", Tensor::from_tokens(&[]));
        let names: Vec<&str> = map.names().collect();
        assert_eq!(names, vec!["logits_10", "logits_2"]);
    }
}
