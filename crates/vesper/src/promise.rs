//! Promise internals: enough machinery for `await`, `Promise.resolve`,
//! `.then`, and the reaction jobs the queue drains.
//!
//! The full Promise library (combinators, species) is a collaborator; the
//! core needs capabilities, the resolve/reject latch, and reactions firing
//! in registration order.

use serde::{Deserialize, Serialize};

use crate::{heap::HeapId, value::Value};

/// Settlement state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum PromiseState {
    Pending,
    Fulfilled,
    Rejected,
}

/// Which settlement a reaction is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ReactionKind {
    Fulfill,
    Reject,
}

/// What a reaction runs when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) enum ReactionHandler {
    /// Pass the value through to the capability.
    Identity,
    /// Reject the capability with the value.
    Thrower,
    /// Call a script/native function with the value.
    Func(Value),
    /// Resume a suspended async context.
    AsyncResume { ctx: HeapId },
}

/// A promise capability: the promise plus its settle functions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct PromiseCapability {
    pub promise: HeapId,
    pub resolve: Value,
    pub reject: Value,
}

impl PromiseCapability {
    pub(crate) fn trace(&self, mark: &mut impl FnMut(HeapId)) {
        mark(self.promise);
        self.resolve.trace(mark);
        self.reject.trace(mark);
    }
}

/// One registered reaction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct Reaction {
    /// Capability settled with the handler's result (`None` for reactions
    /// that only drive an async context).
    pub capability: Option<PromiseCapability>,
    pub handler: ReactionHandler,
    pub kind: ReactionKind,
}

impl Reaction {
    pub(crate) fn trace(&self, mark: &mut impl FnMut(HeapId)) {
        if let Some(capability) = &self.capability {
            capability.trace(mark);
        }
        match self.handler {
            ReactionHandler::Func(value) => value.trace(mark),
            ReactionHandler::AsyncResume { ctx } => mark(ctx),
            ReactionHandler::Identity | ReactionHandler::Thrower => {}
        }
    }
}

/// Internal slots of a promise object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PromiseData {
    pub state: PromiseState,
    pub result: Value,
    pub fulfill_reactions: Vec<Reaction>,
    pub reject_reactions: Vec<Reaction>,
    /// The resolve-function latch: both settle functions share it, so the
    /// first call wins and later calls are ignored.
    pub already_resolved: bool,
}

impl PromiseData {
    pub fn pending() -> Self {
        Self {
            state: PromiseState::Pending,
            result: Value::Undefined,
            fulfill_reactions: Vec::new(),
            reject_reactions: Vec::new(),
            already_resolved: false,
        }
    }

    pub(crate) fn trace(&self, mark: &mut impl FnMut(HeapId)) {
        self.result.trace(mark);
        for reaction in self.fulfill_reactions.iter().chain(&self.reject_reactions) {
            reaction.trace(mark);
        }
    }
}
