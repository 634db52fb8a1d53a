use serde::{Deserialize, Serialize};

use crate::intern::StringId;

/// What a private name refers to on instances that carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum PrivateKind {
    Field,
    Method,
    Accessor,
}

/// A private class-member name.
///
/// Not a string and not a symbol: identity is the heap id, so two class
/// evaluations of the same source produce distinct names. The description is
/// the source spelling (`#x`) used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PrivateName {
    pub description: StringId,
    pub kind: PrivateKind,
}

impl PrivateName {
    pub fn new(description: StringId, kind: PrivateKind) -> Self {
        Self { description, kind }
    }
}
