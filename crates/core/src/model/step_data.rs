use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Facts recorded by pages during a unit session, keyed by page-chosen names.
///
/// Merges are shallow: new keys are added, existing keys are overwritten, and
/// nothing is ever dropped by a merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepData(Map<String, Value>);

impl StepData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for constructing patches.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Shallow merge, last writer wins per key.
    pub fn merge(&mut self, patch: StepData) {
        for (key, value) in patch.0 {
            self.0.insert(key, value);
        }
    }

    /// Returns a copy of `self` with `patch` merged on top.
    #[must_use]
    pub fn merged_with(&self, patch: &StepData) -> StepData {
        let mut merged = self.clone();
        merged.merge(patch.clone());
        merged
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Decode a value into a concrete type; `None` if missing or mistyped.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for StepData {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
