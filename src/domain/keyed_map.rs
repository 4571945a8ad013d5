// ============================================================
// Layer 3 - KeyedMap
// ============================================================
// An insertion-ordered mapping from data key to a value.
//
// Every per-dataset input of the registry is one of these:
//   in_shapes        → KeyedMap<[usize; 3]>
//   n_neurons        → KeyedMap<usize>
//   mean_activity    → KeyedMap<Vec<f32>>
//   shared_match_ids → KeyedMap<Vec<i64>>
//
// Order matters: the first key of `n_neurons` becomes the
// anchor that other datasets share parameters with, so the
// JSON object order must survive deserialisation. A HashMap
// would scramble it and a BTreeMap would sort it.
//
// Reference: Rust Book §8 (Vectors), serde "Implementing Deserialize"

use std::{fmt, marker::PhantomData};

use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::domain::error::ReadoutError;

#[derive(Debug, Clone, PartialEq)]
pub struct KeyedMap<T> {
    entries: Vec<(String, T)>,
}

impl<T> KeyedMap<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Insert or replace. A replaced key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, value: T) -> Option<T> {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Like `get`, but a missing key is a lookup error naming `map`.
    pub fn require(&self, map: &'static str, key: &str) -> Result<&T, ReadoutError> {
        self.get(key).ok_or_else(|| ReadoutError::MissingEntry {
            map,
            key: key.to_string(),
        })
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for KeyedMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Into<String>, T> FromIterator<(K, T)> for KeyedMap<T> {
    fn from_iter<I: IntoIterator<Item = (K, T)>>(iter: I) -> Self {
        let mut map = KeyedMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

// ─── Serde ────────────────────────────────────────────────────────────────────
// Serialised as a plain JSON object. The visitor pushes entries
// in the order the deserializer hands them over, which for
// serde_json is document order.
impl<T: Serialize> Serialize for KeyedMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct KeyedMapVisitor<T>(PhantomData<T>);

impl<'de, T: Deserialize<'de>> Visitor<'de> for KeyedMapVisitor<T> {
    type Value = KeyedMap<T>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map from data key to value")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = KeyedMap::new();
        while let Some((key, value)) = access.next_entry::<String, T>()? {
            if map.insert(key.clone(), value).is_some() {
                return Err(serde::de::Error::custom(format!("duplicate data key '{key}'")));
            }
        }
        Ok(map)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for KeyedMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(KeyedMapVisitor(PhantomData))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserves_insertion_order() {
        let map: KeyedMap<usize> = [("zeta", 1), ("alpha", 2), ("mid", 3)].into_iter().collect();
        let keys: Vec<&str> = map.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut map = KeyedMap::new();
        map.insert("a", 1);
        map.insert("b", 2);
        assert_eq!(map.insert("a", 10), Some(1));
        assert_eq!(map.iter().next(), Some(("a", &10)));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_require_names_map_and_key() {
        let map: KeyedMap<usize> = KeyedMap::new();
        let err = map.require("n_neurons", "session_b").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("n_neurons"));
        assert!(msg.contains("session_b"));
    }

    #[test]
    fn test_json_order_survives() {
        let map: KeyedMap<usize> =
            serde_json::from_str(r#"{"s3": 5, "s1": 7, "s2": 9}"#).unwrap();
        let keys: Vec<&str> = map.keys().collect();
        assert_eq!(keys, vec!["s3", "s1", "s2"]);
    }

    #[test]
    fn test_duplicate_json_key_rejected() {
        let res: Result<KeyedMap<usize>, _> = serde_json::from_str(r#"{"a": 1, "a": 2}"#);
        assert!(res.is_err());
    }
}
