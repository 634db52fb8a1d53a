//! String interning for property keys and binding names.
//!
//! Property-key comparison must be pointer equality, so every string used as
//! a key is interned on first use and identified by a [`StringId`]. A fixed
//! block of well-known names (`length`, `prototype`, iterator-protocol names,
//! ...) is seeded at construction so hot paths never hit the lookup table.
//!
//! Canonical decimal integer keys in `0..=u32::MAX - 1` never reach the
//! interner at all: they travel as the index-string fast form
//! ([`crate::value::Value::IndexString`] / [`PropertyKey::Index`]) and are
//! materialized into ordinary strings only on demand.

use ahash::AHashMap;
use serde::ser::SerializeStruct;
use strum::{EnumCount, FromRepr, IntoStaticStr};

use crate::heap::HeapId;

/// Index into the string interner's storage.
///
/// `u32` keeps [`PropertyKey`] and binding references small; equality is
/// pointer equality on the interned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct StringId(u32);

impl StringId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Names known at compile time, seeded at fixed ids ahead of dynamic interns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumCount, IntoStaticStr)]
#[repr(u32)]
#[strum(serialize_all = "camelCase")]
pub enum WellKnown {
    #[strum(serialize = "")]
    Empty,
    Length,
    Prototype,
    Constructor,
    Name,
    Message,
    Value,
    Done,
    Next,
    Return,
    Throw,
    Then,
    Resolve,
    Reject,
    ToString,
    ValueOf,
    Eval,
    Arguments,
    GlobalThis,
    Undefined,
    #[strum(serialize = "Object")]
    Object,
    #[strum(serialize = "NaN")]
    Nan,
    #[strum(serialize = "Infinity")]
    Infinity,
    #[strum(serialize = "__proto__")]
    DunderProto,
    // proxy trap names
    GetPrototypeOf,
    SetPrototypeOf,
    IsExtensible,
    PreventExtensions,
    GetOwnPropertyDescriptor,
    DefineProperty,
    Has,
    Get,
    Set,
    DeleteProperty,
    OwnKeys,
    Apply,
    Construct,
    // descriptor field names
    Writable,
    Enumerable,
    Configurable,
    // misc library names used by the core
    Push,
    Map,
    Stack,
    Anonymous,
    #[strum(serialize = "default")]
    Default,
    #[strum(serialize = "*default*")]
    DefaultExport,
    #[strum(serialize = "*namespace*")]
    NamespaceExport,
}

impl From<WellKnown> for StringId {
    #[inline]
    fn from(name: WellKnown) -> Self {
        Self(name as u32)
    }
}

/// The property-key space: interned strings, integer indices, symbols, and
/// private names.
///
/// Integer indices are a distinct representation, never interned strings, so
/// the object model can keep its dense part keyed by `u32` and enumerate
/// index keys in ascending numeric order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PropertyKey {
    /// An interned string key.
    Str(StringId),
    /// A canonical decimal integer key in `0..=u32::MAX - 1`.
    Index(u32),
    /// A symbol key; the id points at a symbol gc-thing.
    Symbol(HeapId),
    /// A private name scoped to a class body.
    Private(HeapId),
}

impl From<WellKnown> for PropertyKey {
    #[inline]
    fn from(name: WellKnown) -> Self {
        Self::Str(name.into())
    }
}

/// Largest value representable as an index key (`2^32 - 2`).
pub const MAX_INDEX_KEY: u32 = u32::MAX - 1;

/// Parses a string as a canonical array-index key.
///
/// Canonical means: the decimal rendering round-trips exactly, so `"007"`,
/// `"1e3"` and `"4294967295"` are all ordinary string keys.
#[must_use]
pub fn parse_index_key(s: &str) -> Option<u32> {
    if s.is_empty() || s.len() > 10 {
        return None;
    }
    if s == "0" {
        return Some(0);
    }
    if s.starts_with('0') || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u64 = s.parse().ok()?;
    if n <= u64::from(MAX_INDEX_KEY) { Some(n as u32) } else { None }
}

/// Interner mapping strings to stable [`StringId`]s.
///
/// Owned by the runtime; never a process-wide singleton. Serialization keeps
/// only the dynamic tail (well-known names are re-seeded on construction and
/// on deserialize).
#[derive(Debug)]
pub struct Interns {
    strings: Vec<String>,
    lookup: AHashMap<String, StringId>,
}

impl Default for Interns {
    fn default() -> Self {
        Self::new()
    }
}

impl Interns {
    /// Creates an interner seeded with the [`WellKnown`] block.
    #[must_use]
    pub fn new() -> Self {
        let mut interns = Self {
            strings: Vec::with_capacity(64),
            lookup: AHashMap::with_capacity(64),
        };
        for i in 0..WellKnown::COUNT as u32 {
            let name: &'static str = WellKnown::from_repr(i).expect("well-known repr in range").into();
            interns.strings.push(name.to_string());
            interns.lookup.insert(name.to_string(), StringId(i));
        }
        interns
    }

    /// Interns a string, returning its stable id.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.lookup.get(s) {
            return id;
        }
        let id = StringId(u32::try_from(self.strings.len()).expect("interner overflow"));
        self.strings.push(s.to_string());
        self.lookup.insert(s.to_string(), id);
        id
    }

    /// Returns the interned string for an id.
    #[must_use]
    pub fn get(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    /// Looks up an already-interned string without inserting.
    #[must_use]
    pub fn lookup(&self, s: &str) -> Option<StringId> {
        self.lookup.get(s).copied()
    }

    /// Number of dynamically interned strings (excluding the seeded block).
    #[must_use]
    pub fn dynamic_count(&self) -> usize {
        self.strings.len() - WellKnown::COUNT
    }

    /// Converts a raw string into a property key, using the index fast form
    /// for canonical integer keys.
    pub fn string_to_key(&mut self, s: &str) -> PropertyKey {
        match parse_index_key(s) {
            Some(index) => PropertyKey::Index(index),
            None => PropertyKey::Str(self.intern(s)),
        }
    }
}

impl serde::Serialize for Interns {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Interns", 1)?;
        state.serialize_field("dynamic", &self.strings[WellKnown::COUNT..])?;
        state.end()
    }
}

impl<'de> serde::Deserialize<'de> for Interns {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(serde::Deserialize)]
        struct Fields {
            dynamic: Vec<String>,
        }
        let fields = Fields::deserialize(deserializer)?;
        let mut interns = Self::new();
        for s in fields.dynamic {
            interns.intern(&s);
        }
        Ok(interns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_ids_are_stable() {
        let interns = Interns::new();
        assert_eq!(interns.get(WellKnown::Length.into()), "length");
        assert_eq!(interns.get(WellKnown::Prototype.into()), "prototype");
        assert_eq!(interns.get(WellKnown::DunderProto.into()), "__proto__");
        assert_eq!(interns.lookup("length"), Some(WellKnown::Length.into()));
    }

    #[test]
    fn interning_is_idempotent() {
        let mut interns = Interns::new();
        let a = interns.intern("foo");
        let b = interns.intern("foo");
        assert_eq!(a, b);
        assert_eq!(interns.get(a), "foo");
    }

    #[test]
    fn canonical_index_keys() {
        assert_eq!(parse_index_key("0"), Some(0));
        assert_eq!(parse_index_key("42"), Some(42));
        assert_eq!(parse_index_key("4294967294"), Some(4_294_967_294));
        // non-canonical or out-of-range forms stay string keys
        assert_eq!(parse_index_key("007"), None);
        assert_eq!(parse_index_key("4294967295"), None);
        assert_eq!(parse_index_key("-1"), None);
        assert_eq!(parse_index_key("1e3"), None);
        assert_eq!(parse_index_key(""), None);
    }

    #[test]
    fn serde_round_trip_preserves_dynamic_ids() {
        let mut interns = Interns::new();
        let foo = interns.intern("foo");
        let bar = interns.intern("bar");
        let bytes = postcard::to_allocvec(&interns).unwrap();
        let restored: Interns = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(restored.get(foo), "foo");
        assert_eq!(restored.get(bar), "bar");
    }
}
