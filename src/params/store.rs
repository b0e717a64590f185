//! Ranked, typed, sealable parameter store.
//!
//! The store never logs and never panics: every rejected operation is
//! returned as a [`ParameterError`] and the caller (usually a
//! [`TaskContext`](crate::pipeline::TaskContext)) decides how to report it
//! based on [`ParameterError::severity`].

use indexmap::IndexMap;
use serde_json::Value;

use super::key::NamespaceKey;
use super::value::{Ranking, ValueType};
use crate::error::ParameterError;

#[derive(Debug, Clone, Default)]
struct Entry {
    declared: Option<ValueType>,
    value: Option<Value>,
    rank: Option<Ranking>,
}

/// Parameters shared by all tasks of a pipeline run.
///
/// # Examples
///
/// ```
/// use respipe::params::{NamespaceKey, ParameterStore, Ranking, ValueType};
/// use serde_json::json;
///
/// let mut store = ParameterStore::new();
/// let timeout = NamespaceKey::new("download", "timeout");
///
/// store.set_type(&timeout, ValueType::Integer).unwrap();
/// store.set_value(&timeout, json!(30), Ranking::TaskDefault).unwrap();
/// store.set_value(&timeout, json!(60), Ranking::ApplicationProperties).unwrap();
/// // lower rank is ignored
/// store.set_value(&timeout, json!(10), Ranking::PipelineDefinition).unwrap();
/// assert_eq!(store.value(&timeout), Some(&json!(60)));
///
/// // declared type is enforced
/// assert!(store.set_value(&timeout, json!("soon"), Ranking::Runtime).is_err());
/// assert_eq!(store.value(&timeout), Some(&json!(60)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ParameterStore {
    entries: IndexMap<NamespaceKey, Entry>,
    sealed: bool,
}

impl ParameterStore {
    /// Creates an empty, unsealed store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value of `key` with the given rank.
    ///
    /// A write ranked below the stored value's rank is ignored. Writing
    /// `null` clears the value but keeps the declaration.
    ///
    /// # Errors
    ///
    /// - [`ParameterError::Sealed`] if the store is sealed and `key` is new.
    /// - [`ParameterError::TypeMismatch`] if `value` does not match the
    ///   declared type; the previous value is kept.
    pub fn set_value(
        &mut self,
        key: &NamespaceKey,
        value: Value,
        rank: Ranking,
    ) -> Result<(), ParameterError> {
        let entry = self.entry_mut(key)?;

        if let Some(declared) = entry.declared {
            let actual = ValueType::of(&value);
            if actual != ValueType::Null && !declared.accepts(actual) {
                return Err(ParameterError::TypeMismatch {
                    key: key.clone(),
                    expected: declared,
                    actual,
                });
            }
        }

        if entry.rank.is_some_and(|stored| stored > rank) {
            return Ok(());
        }

        if value.is_null() {
            entry.value = None;
            entry.rank = None;
        } else {
            entry.value = Some(value);
            entry.rank = Some(rank);
        }
        Ok(())
    }

    /// Returns the value of `key`, if any.
    pub fn value(&self, key: &NamespaceKey) -> Option<&Value> {
        self.entries.get(key).and_then(|e| e.value.as_ref())
    }

    /// Returns the value of `key` if it has the `expected` type.
    ///
    /// # Errors
    ///
    /// [`ParameterError::TypeMismatch`] if a value is present but of
    /// another type.
    pub fn value_as(
        &self,
        key: &NamespaceKey,
        expected: ValueType,
    ) -> Result<Option<&Value>, ParameterError> {
        match self.value(key) {
            Some(value) if !expected.accepts(ValueType::of(value)) => {
                Err(ParameterError::TypeMismatch {
                    key: key.clone(),
                    expected,
                    actual: ValueType::of(value),
                })
            },
            other => Ok(other),
        }
    }

    /// Returns the rank the current value of `key` was written with.
    pub fn rank(&self, key: &NamespaceKey) -> Option<Ranking> {
        self.entries.get(key).and_then(|e| e.rank)
    }

    /// Declares the type of `key`.
    ///
    /// Re-declaring the same type is a no-op.
    ///
    /// # Errors
    ///
    /// - [`ParameterError::Sealed`] if the store is sealed and `key` is new.
    /// - [`ParameterError::TypeConflict`] if another type is already declared.
    /// - [`ParameterError::TypeMismatch`] if the current value does not match
    ///   `value_type`; nothing is declared.
    pub fn set_type(
        &mut self,
        key: &NamespaceKey,
        value_type: ValueType,
    ) -> Result<(), ParameterError> {
        let entry = self.entry_mut(key)?;
        match entry.declared {
            Some(declared) if declared == value_type => Ok(()),
            Some(declared) => Err(ParameterError::TypeConflict {
                key: key.clone(),
                declared,
                requested: value_type,
            }),
            None => {
                if let Some(value) = &entry.value {
                    let actual = ValueType::of(value);
                    if !value_type.accepts(actual) {
                        return Err(ParameterError::TypeMismatch {
                            key: key.clone(),
                            expected: value_type,
                            actual,
                        });
                    }
                }
                entry.declared = Some(value_type);
                Ok(())
            },
        }
    }

    /// Returns the declared type of `key`.
    pub fn value_type(&self, key: &NamespaceKey) -> Option<ValueType> {
        self.entries.get(key).and_then(|e| e.declared)
    }

    /// Freezes the key set. Existing keys stay writable.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    /// Returns `true` once [`seal`](Self::seal) has been called.
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Returns the keys of `namespace` that currently hold a value, in
    /// insertion order.
    pub fn keys(&self, namespace: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, e)| k.namespace() == namespace && e.value.is_some())
            .map(|(k, _)| k.key())
            .collect()
    }

    /// Returns the number of known keys, declared or valued.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no key is known.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, key: &NamespaceKey) -> Result<&mut Entry, ParameterError> {
        if self.sealed && !self.entries.contains_key(key) {
            return Err(ParameterError::Sealed { key: key.clone() });
        }
        Ok(self.entries.entry(key.clone()).or_default())
    }
}
