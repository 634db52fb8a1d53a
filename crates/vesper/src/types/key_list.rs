use serde::{Deserialize, Serialize};

use crate::intern::PropertyKey;

/// An ordered, deduplicated list of property keys with a cursor.
///
/// Backs `for-in` enumeration records and own-key snapshots: the list is
/// built once (integer indices ascending, then strings in insertion order,
/// then symbols) and then stepped. It is a gc-thing so a suspended iteration
/// keeps its snapshot alive across collections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct KeyList {
    keys: Vec<PropertyKey>,
    cursor: usize,
}

impl KeyList {
    pub fn new(keys: Vec<PropertyKey>) -> Self {
        Self { keys, cursor: 0 }
    }

    /// Appends a key unless it is already present.
    ///
    /// Enumeration walks the prototype chain; a shadowed key must appear
    /// only once, at its first (most derived) position.
    pub fn push_unique(&mut self, key: PropertyKey) {
        if !self.keys.contains(&key) {
            self.keys.push(key);
        }
    }

    pub fn keys(&self) -> &[PropertyKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns the next key and advances the cursor.
    pub fn step(&mut self) -> Option<PropertyKey> {
        let key = self.keys.get(self.cursor).copied();
        if key.is_some() {
            self.cursor += 1;
        }
        key
    }

    pub fn estimate_size(&self) -> usize {
        size_of::<Self>() + self.keys.len() * size_of::<PropertyKey>()
    }
}
