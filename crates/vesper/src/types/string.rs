use serde::{Deserialize, Serialize};

/// Heap-resident string payload.
///
/// Interned property keys never materialize one of these; they live in the
/// interner and travel as `StringId`. Runtime strings (concatenation results,
/// `String(x)` coercions, normalized index strings) live here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct JsString {
    text: String,
}

impl JsString {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Normalizes an index string into its ordinary form.
    pub fn from_index(index: u32) -> Self {
        Self {
            text: index.to_string(),
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Length in code units.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Code unit at `index`, or `None` past the end.
    pub fn char_at(&self, index: usize) -> Option<char> {
        self.text.chars().nth(index)
    }

    /// Rough heap footprint for the resource tracker.
    pub fn estimate_size(&self) -> usize {
        size_of::<Self>() + self.text.len()
    }
}

impl PartialEq<str> for JsString {
    fn eq(&self, other: &str) -> bool {
        self.text == other
    }
}
