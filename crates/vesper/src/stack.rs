//! Native-stack states: structured operations in progress.
//!
//! Every executing context owns two parallel stacks: value slots (argument
//! lists being built, concat parts) and a LIFO of states. Each state records
//! the value-stack high-water at its creation, so popping a state truncates
//! the value slots back to where they were, the stack-balance invariant the
//! whole interpreter leans on.

use serde::{Deserialize, Serialize};

use crate::{
    bytecode::Reg,
    error::PendingError,
    heap::HeapId,
    intern::PropertyKey,
    value::Value,
};

/// Sync or async iteration protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum IterKind {
    Sync,
    Async,
}

/// An iterator record: the iterator object, its cached `next`, and the done
/// flag that gates close-on-abrupt-exit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct IteratorRecord {
    pub iterator: Value,
    pub next_method: Value,
    pub done: bool,
    pub kind: IterKind,
}

/// What a call state is building toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum CallStateKind {
    /// Ordinary call (also carries the direct-eval variants).
    Call,
    /// `new` expression.
    New,
    /// `super(...)` in a derived constructor.
    SuperCall,
}

/// A call in progress: callee, receiver, and the argument span pushed onto
/// the value slots so far.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct CallState {
    pub func: Value,
    pub this: Value,
    /// Value-slot index where this call's arguments start.
    pub base: usize,
    pub argc: usize,
    pub kind: CallStateKind,
}

/// One element collected while a class body evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ClassElementKind {
    Method,
    Getter,
    Setter,
    StaticMethod,
    StaticGetter,
    StaticSetter,
    StaticField,
    InstanceField,
    StaticBlock,
}

/// A recorded class element, applied at `ClassInit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ClassElement {
    pub kind: ClassElementKind,
    pub key: Option<PropertyKey>,
    /// Method/initializer function object, or `Undefined` for a bare field.
    pub value: Value,
    /// Anonymous-function field naming: name the initializer result after
    /// the key.
    pub names_function: bool,
}

/// Class construction in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ClassState {
    /// Destination register of the `PushClass`.
    pub dst: Reg,
    pub name: Option<Value>,
    /// Parent constructor, `Value::Null` for `extends null`, `Undefined`
    /// for a base class.
    pub parent: Value,
    pub proto: Value,
    pub constructor: Value,
    pub elements: Vec<ClassElement>,
    pub priv_env: Option<HeapId>,
    /// The frame's private environment before this class body, restored at
    /// `ClassInit`.
    pub prev_priv_env: Option<HeapId>,
    pub inst_field_count: usize,
    pub inst_priv_method_count: usize,
}

/// Sub-phase of a try state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum TryPhase {
    Try,
    Catch,
    Finally,
    End,
}

/// What to do when the current try phase completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum TryNextOp {
    Normal,
    Throw,
    Return,
}

/// try/catch/finally bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct TryState {
    pub phase: TryPhase,
    pub next_op: TryNextOp,
    /// The pending error carried across a finally block.
    pub error: Option<PendingError>,
    /// Absolute instruction indices within the script.
    pub catch_ip: Option<usize>,
    pub finally_ip: Option<usize>,
}

/// The discriminated payload of a state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum StateKind {
    /// Records a lexical-environment push; the matching pop restores `outer`.
    LexEnv { saved_env: HeapId },
    /// For-in over a key-list snapshot.
    ForIn { keys: HeapId },
    /// For-of (sync or async) iterator, closed on abrupt exit.
    ForOf { iter: IteratorRecord },
    /// Array destructuring iterator.
    ArrayAssi { iter: IteratorRecord },
    Class(ClassState),
    Call(CallState),
    /// Array literal under construction.
    Array { array: Value, next_index: u32 },
    /// Object literal under construction.
    Object { object: Value },
    /// Object destructuring source plus the keys already consumed (for rest).
    ObjectAssi { object: Value, seen: Vec<PropertyKey> },
    Try(TryState),
}

/// A state plus the value-slot high-water at its creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct State {
    /// Value-slot length when the state was pushed; pop truncates to it.
    pub sp: usize,
    pub kind: StateKind,
}

impl State {
    /// Enumerates contained heap references for the GC scan.
    pub(crate) fn trace(&self, mark: &mut impl FnMut(HeapId)) {
        match &self.kind {
            StateKind::LexEnv { saved_env } => mark(*saved_env),
            StateKind::ForIn { keys } => mark(*keys),
            StateKind::ForOf { iter } | StateKind::ArrayAssi { iter } => {
                iter.iterator.trace(mark);
                iter.next_method.trace(mark);
            }
            StateKind::Class(class) => {
                if let Some(name) = class.name {
                    name.trace(mark);
                }
                class.parent.trace(mark);
                class.proto.trace(mark);
                class.constructor.trace(mark);
                for element in &class.elements {
                    if let Some(PropertyKey::Symbol(id) | PropertyKey::Private(id)) = element.key {
                        mark(id);
                    }
                    element.value.trace(mark);
                }
                if let Some(priv_env) = class.priv_env {
                    mark(priv_env);
                }
            }
            StateKind::Call(call) => {
                call.func.trace(mark);
                call.this.trace(mark);
            }
            StateKind::Array { array, .. } => array.trace(mark),
            StateKind::Object { object } => object.trace(mark),
            StateKind::ObjectAssi { object, seen } => {
                object.trace(mark);
                for key in seen {
                    if let PropertyKey::Symbol(id) | PropertyKey::Private(id) = key {
                        mark(*id);
                    }
                }
            }
            StateKind::Try(try_state) => {
                if let Some(PendingError::Thrown(value)) = &try_state.error {
                    value.trace(mark);
                }
            }
        }
    }
}
