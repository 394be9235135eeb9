//! Record & contract layer.
//!
//! Every payload flowing between nodes implements [`NodeOutput`]. The engine
//! freezes an item the moment it is handed to a dataflow adapter, duplicates
//! it with `copy_to` for fan-out, and `reset`s it before it goes back into a
//! pool. [`Row`] is the default untyped payload: a named-field record whose
//! values are arbitrary JSON values.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Contract every payload type must satisfy.
///
/// `copy_to` must not mutate `self` (it is called on frozen items) and may
/// assume `other` is freshly reset or newly constructed. `Default` is how
/// pools and emitters construct new instances.
pub trait NodeOutput: Default + fmt::Debug + Send + 'static {
    fn is_frozen(&self) -> bool;

    /// Idempotent. Makes the instance logically immutable.
    fn freeze(&mut self);

    /// Clear all fields and unfreeze.
    fn reset(&mut self);

    /// Copy all fields into `other`. The frozen flag is not copied.
    fn copy_to(&self, other: &mut Self);
}

/// Mutable named-field record. Column order is irrelevant to equality;
/// iteration is sorted by column name.
///
/// Like `copy_to`, `clone` yields an unfrozen row.
#[derive(Default, Serialize, Deserialize)]
pub struct Row {
    fields: BTreeMap<String, Value>,
    #[serde(skip)]
    frozen: bool,
}

impl Row {
    /// Create a new empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter for constructing rows in code and tests.
    ///
    /// Construction only: a frozen row is returned unchanged. Use
    /// [`Row::set`] where the failure should be handled.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Err(e) = self.set(column, value) {
            tracing::warn!("Row::with ignored: {}", e);
        }
        self
    }

    /// Set a column. Fails on a frozen row.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Result<Option<Value>> {
        if self.frozen {
            return Err(EngineError::Frozen("set column"));
        }
        Ok(self.fields.insert(column.into(), value.into()))
    }

    /// Remove a column. Fails on a frozen row.
    pub fn remove(&mut self, column: &str) -> Result<Option<Value>> {
        if self.frozen {
            return Err(EngineError::Frozen("remove column"));
        }
        Ok(self.fields.remove(column))
    }

    /// Remove every column. Fails on a frozen row.
    pub fn clear(&mut self) -> Result<()> {
        if self.frozen {
            return Err(EngineError::Frozen("clear row"));
        }
        self.fields.clear();
        Ok(())
    }

    #[inline]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Value::as_i64)
    }

    pub fn get_f64(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(Value::as_f64)
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    pub fn get_bool(&self, column: &str) -> Option<bool> {
        self.get(column).and_then(Value::as_bool)
    }

    #[inline]
    pub fn contains(&self, column: &str) -> bool {
        self.fields.contains_key(column)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl NodeOutput for Row {
    #[inline]
    fn is_frozen(&self) -> bool {
        self.frozen
    }

    #[inline]
    fn freeze(&mut self) {
        self.frozen = true;
    }

    fn reset(&mut self) {
        self.fields.clear();
        self.frozen = false;
    }

    fn copy_to(&self, other: &mut Self) {
        other.fields.clone_from(&self.fields);
    }
}

impl Clone for Row {
    fn clone(&self) -> Self {
        Self {
            fields: self.fields.clone(),
            frozen: false,
        }
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.fields.iter()).finish()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            frozen: false,
        }
    }
}
