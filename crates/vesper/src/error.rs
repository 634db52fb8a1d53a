use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{resource::ResourceError, value::Value};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Native error constructors named by ECMAScript.
///
/// A throw-site signals a kind plus a message; the actual error object is
/// materialized from the current realm's intrinsics only when a catch block
/// (or the embedder) observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum NativeErrorKind {
    /// Plain `Error`.
    Error,
    /// Wrong type, calling a non-callable, proxy invariant violations.
    TypeError,
    /// Out-of-range numerics: invalid array length, BigInt division by zero.
    RangeError,
    /// Unresolvable bindings, TDZ reads, `this` before `super()`.
    ReferenceError,
    /// Parse failures and malformed numeric literals.
    SyntaxError,
    /// Encoding failures in URI handling built-ins.
    #[strum(serialize = "URIError")]
    UriError,
    /// Failures signalled by `eval` when no compiler is attached.
    EvalError,
}

/// An error kind plus message, not yet materialized into an error object.
///
/// Keeping throw-sites object-free lets low-level components (environments,
/// the big-integer subsystem, property storage) signal errors without access
/// to a realm; the interpreter materializes on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeError {
    /// Which intrinsic constructor the error belongs to.
    pub kind: NativeErrorKind,
    /// Human-readable message stored on the error object.
    pub message: String,
}

impl NativeError {
    /// Creates a native error of the given kind.
    pub fn new(kind: NativeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{kind}: {msg}", kind = self.kind, msg = self.message)
    }
}

/// The error channel of the two-channel result model.
///
/// Every fallible operation returns [`RunResult`]; callers propagate with `?`
/// unless a try state is in scope. The interpreter's unwind machinery turns
/// `Native` and `Thrown` into catch-block values; `Resource` unwinds through
/// every handler and reaches the embedder.
#[derive(Debug)]
pub enum RunError {
    /// A pending native error; materialized into an error object when caught.
    Native(NativeError),
    /// A value thrown by script (`throw x`) or an already-materialized error.
    Thrown(Value),
    /// An uncatchable resource-limit violation.
    Resource(ResourceError),
}

impl RunError {
    /// Creates a pending TypeError.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Native(NativeError::new(NativeErrorKind::TypeError, message))
    }

    /// Creates a pending RangeError.
    pub fn range_error(message: impl Into<String>) -> Self {
        Self::Native(NativeError::new(NativeErrorKind::RangeError, message))
    }

    /// Creates a pending ReferenceError.
    pub fn reference_error(message: impl Into<String>) -> Self {
        Self::Native(NativeError::new(NativeErrorKind::ReferenceError, message))
    }

    /// Creates a pending SyntaxError.
    pub fn syntax_error(message: impl Into<String>) -> Self {
        Self::Native(NativeError::new(NativeErrorKind::SyntaxError, message))
    }

    /// Returns true when this error can be caught by a try state.
    #[must_use]
    pub fn is_catchable(&self) -> bool {
        !matches!(self, Self::Resource(_))
    }
}

/// The catchable subset of [`RunError`], storable inside a try state or a
/// suspended unwind (resource errors are never stored: they cannot be caught).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum PendingError {
    Native(NativeError),
    Thrown(Value),
}

impl From<PendingError> for RunError {
    fn from(pending: PendingError) -> Self {
        match pending {
            PendingError::Native(err) => Self::Native(err),
            PendingError::Thrown(value) => Self::Thrown(value),
        }
    }
}

impl TryFrom<RunError> for PendingError {
    type Error = RunError;

    fn try_from(err: RunError) -> Result<Self, RunError> {
        match err {
            RunError::Native(native) => Ok(Self::Native(native)),
            RunError::Thrown(value) => Ok(Self::Thrown(value)),
            RunError::Resource(_) => Err(err),
        }
    }
}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        Self::Resource(err)
    }
}

impl From<NativeError> for RunError {
    fn from(err: NativeError) -> Self {
        Self::Native(err)
    }
}

/// Error produced when a script image fails validation at load time.
///
/// Corrupt images are a fatal embedder-facing condition, never a script
/// throw: an interpreter must not start executing an image whose operands
/// are out of bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLoadError {
    /// Description of the failed validation.
    pub message: String,
}

impl ScriptLoadError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ScriptLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid script image: {msg}", msg = self.message)
    }
}

impl std::error::Error for ScriptLoadError {}

/// Embedder-facing completion of a run: an uncaught error described without
/// exposing heap internals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exception {
    /// An uncaught error with a native kind (TypeError, RangeError, ...).
    Native {
        /// The intrinsic constructor the error belongs to.
        kind: NativeErrorKind,
        /// The error message.
        message: String,
        /// Source line of the throw site, when the script image carries line info.
        line: Option<u32>,
    },
    /// An uncaught thrown value rendered to a string.
    Value {
        /// Display form of the thrown value.
        rendered: String,
    },
    /// A resource limit stopped execution.
    Resource(ResourceError),
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native { kind, message, line } => {
                write!(f, "Uncaught {kind}: {message}")?;
                if let Some(line) = line {
                    write!(f, " (line {line})")?;
                }
                Ok(())
            }
            Self::Value { rendered } => write!(f, "Uncaught {rendered}"),
            Self::Resource(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Exception {}
