//! Context variables: session state threaded through a run.
//!
//! The map is open-ended: tools decide which keys exist. Keys can be added
//! or overwritten but never removed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved parameter name under which a tool receives the live context.
pub const CONTEXT_VARIABLES_PARAM: &str = "context_variables";

/// String-keyed map of arbitrary JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextVariables(Map<String, Value>);

impl ContextVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Read a key as text. Missing keys and `null` read as `""`; other
    /// non-strings render as JSON.
    pub fn get_str(&self, key: &str) -> String {
        match self.0.get(key) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// Insert or overwrite a key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Merge `other` into `self`; keys from `other` win.
    pub fn merge(&mut self, other: &ContextVariables) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Copy of `self` with `other` merged on top.
    pub fn overlaid(&self, other: &ContextVariables) -> Self {
        let mut merged = self.clone();
        merged.merge(other);
        merged
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for ContextVariables {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ContextVariables {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
