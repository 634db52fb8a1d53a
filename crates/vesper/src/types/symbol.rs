use serde::{Deserialize, Serialize};

use crate::intern::StringId;

/// A unique symbol. Identity is the heap id; the payload only carries the
/// optional description used by `toString` and debugging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct JsSymbol {
    pub description: Option<StringId>,
}

impl JsSymbol {
    pub fn new(description: Option<StringId>) -> Self {
        Self { description }
    }
}
