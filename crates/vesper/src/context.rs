//! Execution contexts.
//!
//! Script contexts live on the runtime's context stack while running.
//! Generator and async contexts additionally own their context record while
//! suspended: the whole frame (registers, arguments, value slots, states,
//! instruction pointer) moves into the heap-resident [`GeneratorContext`]
//! at a suspension point and moves back out on resume, so a collection
//! while suspended traces every pending value.

use serde::{Deserialize, Serialize};

use crate::{
    bytecode::Reg,
    error::PendingError,
    heap::HeapId,
    promise::PromiseCapability,
    stack::State,
    value::Value,
};

/// What flavor of context a frame executes under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ContextKind {
    /// Plain script or function call.
    Normal,
    /// Body of a generator; `ctx` is the heap-resident generator context.
    Generator { ctx: HeapId },
    /// Body of an async function.
    Async { ctx: HeapId },
}

/// A script execution context: one frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ScriptContext {
    /// The running function object (`Undefined` for toplevel code).
    pub function: Value,
    pub script: HeapId,
    /// Function-table index within the script.
    pub func: u32,
    /// Register file, sized to the function record's `reg_count`.
    pub regs: Vec<Value>,
    /// Owned copy of the call arguments.
    pub args: Vec<Value>,
    pub retval: Value,
    /// Absolute instruction index within the script.
    pub ip: usize,
    pub var_env: HeapId,
    pub lex_env: HeapId,
    pub priv_env: Option<HeapId>,
    pub new_target: Value,
    /// Value slots for structured operations in progress.
    pub stack: Vec<Value>,
    /// The state stack paired with the value slots.
    pub states: Vec<State>,
    pub kind: ContextKind,
}

impl ScriptContext {
    /// Enumerates contained heap references for the GC scan.
    pub(crate) fn trace(&self, mark: &mut impl FnMut(HeapId)) {
        self.function.trace(mark);
        mark(self.script);
        for value in self.regs.iter().chain(&self.args).chain(&self.stack) {
            value.trace(mark);
        }
        self.retval.trace(mark);
        mark(self.var_env);
        mark(self.lex_env);
        if let Some(priv_env) = self.priv_env {
            mark(priv_env);
        }
        self.new_target.trace(mark);
        for state in &self.states {
            state.trace(mark);
        }
        match self.kind {
            ContextKind::Normal => {}
            ContextKind::Generator { ctx } | ContextKind::Async { ctx } => mark(ctx),
        }
    }
}

/// Lifecycle of a generator or async context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum GeneratorState {
    /// Created, body not entered.
    SuspendedStart,
    /// Parked at a `yield` or `await`.
    SuspendedYield,
    /// Currently on the context stack; re-entry is an error.
    Running,
    Completed,
}

/// Sync generator vs async function/generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum GeneratorKind {
    Sync,
    Async,
}

/// The parked continuation an async context runs on re-entry, before normal
/// dispatch resumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum ResumeOp {
    /// Plain `await`: deliver the settled value (or throw) at `dst`.
    Await { dst: Reg },
    /// Generator parked at `yield`: the resume request's value lands at `dst`.
    Yield { dst: Reg },
    /// `for await` step: the awaited iterator result arrived; extract
    /// done/value, jumping to `done_ip` when exhausted.
    AsyncStep { dst: Reg, done_ip: usize },
    /// Async-iterator close during unwind: the close result arrived; keep
    /// unwinding with the stored pending operation.
    IterClose {
        /// Error to rethrow once the close completes, if the unwind was a throw.
        pending: Option<PendingError>,
        /// True when the unwind was a `return` rather than a throw.
        returning: bool,
    },
}

impl ResumeOp {
    fn trace(&self, mark: &mut impl FnMut(HeapId)) {
        if let Self::IterClose {
            pending: Some(PendingError::Thrown(value)),
            ..
        } = self
        {
            value.trace(mark);
        }
    }
}

/// Heap-resident generator/async context.
///
/// Owns its private native stack: while suspended, the full frame lives in
/// `frame`; while running, the frame is on the runtime's context stack and
/// `frame` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct GeneratorContext {
    pub kind: GeneratorKind,
    pub state: GeneratorState,
    pub frame: Option<Box<ScriptContext>>,
    /// Async only: the promise settled when the body completes.
    pub capability: Option<PromiseCapability>,
    /// Parked continuation run on the next re-entry.
    pub resume_op: Option<ResumeOp>,
    /// The value handed outward at the last `yield`.
    pub yielded: Value,
}

impl GeneratorContext {
    pub fn new_generator() -> Self {
        Self {
            kind: GeneratorKind::Sync,
            state: GeneratorState::SuspendedStart,
            frame: None,
            capability: None,
            resume_op: None,
            yielded: Value::Undefined,
        }
    }

    pub fn new_async(capability: PromiseCapability) -> Self {
        Self {
            kind: GeneratorKind::Async,
            state: GeneratorState::SuspendedStart,
            frame: None,
            capability: Some(capability),
            resume_op: None,
            yielded: Value::Undefined,
        }
    }

    pub fn estimate_size(&self) -> usize {
        let frame = self.frame.as_ref().map_or(0, |f| {
            (f.regs.len() + f.args.len() + f.stack.len()) * size_of::<Value>() + f.states.len() * size_of::<State>()
        });
        size_of::<Self>() + frame
    }

    /// Enumerates contained heap references for the GC scan.
    pub(crate) fn trace(&self, mark: &mut impl FnMut(HeapId)) {
        if let Some(frame) = &self.frame {
            frame.trace(mark);
        }
        if let Some(capability) = &self.capability {
            capability.trace(mark);
        }
        if let Some(resume_op) = &self.resume_op {
            resume_op.trace(mark);
        }
        self.yielded.trace(mark);
    }
}
