//! Ordered map type for a document's context block.
//!
//! [`ContextMap`] wraps [`IndexMap`] so context fields keep their insertion
//! order. The LLM codec writes context fields in that order, which keeps
//! encoding deterministic and diffs of the source file small.
//!
//! ## Examples
//!
//! ```rust
//! use dx_serializer::{ContextMap, Value};
//!
//! let mut map = ContextMap::new();
//! map.insert("name".to_string(), Value::from("dx"));
//! map.insert("version".to_string(), Value::from("0.0.1"));
//!
//! assert_eq!(map.len(), 2);
//! assert_eq!(map.get("name").and_then(|v| v.as_str()), Some("dx"));
//! ```

use crate::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// An insertion-ordered map of context keys to values.
///
/// # Examples
///
/// ```rust
/// use dx_serializer::{ContextMap, Value};
///
/// let mut map = ContextMap::new();
/// map.insert("first".to_string(), Value::from(1));
/// map.insert("second".to_string(), Value::from(2));
///
/// let keys: Vec<_> = map.keys().cloned().collect();
/// assert_eq!(keys, vec!["first", "second"]);
/// ```
///
/// Two maps are equal only if they hold the same pairs in the same order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextMap(IndexMap<String, Value>);

impl PartialEq for ContextMap {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().eq(other.0.iter())
    }
}

impl ContextMap {
    /// Creates an empty `ContextMap`.
    #[must_use]
    pub fn new() -> Self {
        ContextMap(IndexMap::new())
    }

    /// Creates an empty `ContextMap` with the specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        ContextMap(IndexMap::with_capacity(capacity))
    }

    /// Inserts a key-value pair into the map.
    ///
    /// If the map already contained this key, the value is replaced in place
    /// (keeping its position) and the old value is returned.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dx_serializer::{ContextMap, Value};
    ///
    /// let mut map = ContextMap::new();
    /// assert!(map.insert("key".to_string(), Value::from(42)).is_none());
    /// assert!(map.insert("key".to_string(), Value::from(43)).is_some());
    /// ```
    pub fn insert(&mut self, key: String, value: Value) -> Option<Value> {
        self.0.insert(key, value)
    }

    /// Returns a reference to the value corresponding to the key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns `true` if the map holds the key.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the map contains no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns an iterator over the keys of the map, in insertion order.
    pub fn keys(&self) -> indexmap::map::Keys<'_, String, Value> {
        self.0.keys()
    }

    /// Returns an iterator over the values of the map, in insertion order.
    pub fn values(&self) -> indexmap::map::Values<'_, String, Value> {
        self.0.values()
    }

    /// Returns an iterator over the key-value pairs of the map, in insertion order.
    pub fn iter(&self) -> indexmap::map::Iter<'_, String, Value> {
        self.0.iter()
    }
}

impl IntoIterator for ContextMap {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ContextMap {
    type Item = (&'a String, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<(String, Value)> for ContextMap {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        ContextMap(IndexMap::from_iter(iter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replacement_keeps_position() {
        let mut map = ContextMap::new();
        map.insert("a".to_string(), Value::from(1));
        map.insert("b".to_string(), Value::from(2));
        map.insert("a".to_string(), Value::from(3));

        let pairs: Vec<_> = map.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        assert_eq!(pairs, vec![("a", Value::from(3)), ("b", Value::from(2))]);
    }

    #[test]
    fn test_collect_and_lookup() {
        let a: ContextMap = vec![("x".to_string(), Value::from(1))].into_iter().collect();
        let b: ContextMap = vec![("x".to_string(), Value::from(1))].into_iter().collect();
        assert_eq!(a, b);
        assert!(a.contains_key("x"));
        assert!(!a.contains_key("y"));
    }

    #[test]
    fn test_equality_respects_order() {
        let xy: ContextMap = vec![("x".to_string(), Value::from(1)), ("y".to_string(), Value::from(2))]
            .into_iter()
            .collect();
        let yx: ContextMap = vec![("y".to_string(), Value::from(2)), ("x".to_string(), Value::from(1))]
            .into_iter()
            .collect();
        assert_ne!(xy, yx);
        assert_eq!(xy, xy.clone());
    }

    #[test]
    fn test_serde_transparent() {
        let mut map = ContextMap::new();
        map.insert("name".to_string(), Value::from("dx"));
        assert_eq!(serde_json::to_string(&map).unwrap(), r#"{"name":"dx"}"#);
    }
}
