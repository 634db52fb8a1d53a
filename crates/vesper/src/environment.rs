//! Lexical environments: the scope chain.
//!
//! One `Environment` record covers all five variants; they differ only in
//! storage. Declarative storage is an open-addressed table keyed by interned
//! name. Object-environment operations (including the global object half of
//! the global environment) have to go through the object model and therefore
//! live in the operations layer; everything declarative is answered here.

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::{
    error::{RunError, RunResult},
    heap::HeapId,
    intern::{Interns, StringId},
    value::Value,
};

/// A named slot in a declarative environment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct Binding {
    /// `None` until initialized: reads throw ReferenceError (TDZ).
    pub value: Option<Value>,
    pub mutable: bool,
    /// For immutable bindings: whether assignment throws (strict) or is
    /// silently ignored.
    pub strict: bool,
    pub deletable: bool,
}

/// State of a function environment's `this` cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) enum ThisStatus {
    /// Derived constructor before `super()` ran.
    Uninitialized,
    /// Arrow functions: `this` resolves through the outer chain.
    Lexical,
    Initialized(Value),
}

/// Declarative storage shared by several variants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct DeclarativeStore {
    pub bindings: HashMap<StringId, Binding>,
}

impl DeclarativeStore {
    pub fn has(&self, name: StringId) -> bool {
        self.bindings.contains_key(&name)
    }

    pub fn create_mutable(&mut self, name: StringId, deletable: bool) {
        self.bindings.insert(
            name,
            Binding {
                value: None,
                mutable: true,
                strict: false,
                deletable,
            },
        );
    }

    pub fn create_immutable(&mut self, name: StringId, strict: bool) {
        self.bindings.insert(
            name,
            Binding {
                value: None,
                mutable: false,
                strict,
                deletable: false,
            },
        );
    }

    pub fn initialize(&mut self, name: StringId, value: Value) {
        let binding = self.bindings.get_mut(&name).expect("initialize of undeclared binding");
        debug_assert!(binding.value.is_none(), "binding initialized twice");
        binding.value = Some(value);
    }

    pub fn set(&mut self, name: StringId, value: Value, strict: bool, interns: &Interns) -> RunResult<()> {
        let Some(binding) = self.bindings.get_mut(&name) else {
            if strict {
                return Err(RunError::reference_error(format!(
                    "{name} is not defined",
                    name = interns.get(name)
                )));
            }
            // Non-strict set of a missing binding is created on the fly by
            // the global environment; a plain declarative env creates it
            // deletable, matching sloppy direct-eval behavior.
            self.bindings.insert(
                name,
                Binding {
                    value: Some(value),
                    mutable: true,
                    strict: false,
                    deletable: true,
                },
            );
            return Ok(());
        };
        if binding.value.is_none() {
            return Err(tdz_error(name, interns));
        }
        if !binding.mutable {
            if strict || binding.strict {
                return Err(RunError::type_error(format!(
                    "assignment to constant variable '{name}'",
                    name = interns.get(name)
                )));
            }
            return Ok(());
        }
        binding.value = Some(value);
        Ok(())
    }

    pub fn get(&self, name: StringId, interns: &Interns) -> RunResult<Value> {
        match self.bindings.get(&name) {
            Some(Binding { value: Some(value), .. }) => Ok(*value),
            Some(Binding { value: None, .. }) => Err(tdz_error(name, interns)),
            None => Err(RunError::reference_error(format!(
                "{name} is not defined",
                name = interns.get(name)
            ))),
        }
    }

    pub fn delete(&mut self, name: StringId) -> bool {
        match self.bindings.get(&name) {
            Some(binding) if binding.deletable => {
                self.bindings.remove(&name);
                true
            }
            Some(_) => false,
            None => true,
        }
    }
}

/// An indirect module binding: resolves through another module's environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct IndirectBinding {
    pub module: HeapId,
    pub target_name: StringId,
}

/// Variant-specific storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum EnvKind {
    Declarative(DeclarativeStore),
    /// Binding names are own properties of `binding_object`. `with_base`
    /// marks a `with` environment (it becomes the implicit receiver and
    /// honors `@@unscopables`).
    Object {
        binding_object: HeapId,
        with_base: bool,
    },
    Function {
        store: DeclarativeStore,
        this_status: ThisStatus,
        /// The running function object.
        function: Value,
        new_target: Value,
        /// Home object for `super` resolution.
        home_object: Option<HeapId>,
    },
    /// The global environment pairs an object environment over globalThis
    /// with a declarative environment for `let`/`const`/`class`.
    Global {
        global_object: HeapId,
        store: DeclarativeStore,
        /// Names declared with `var`, for the cannot-shadow checks.
        var_names: HashSet<StringId>,
    },
    Module {
        store: DeclarativeStore,
        indirect: HashMap<StringId, IndirectBinding>,
    },
}

/// One link in the scope chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Environment {
    pub outer: Option<HeapId>,
    pub kind: EnvKind,
    /// Pre-computed ancestor chain (`ancestors[0]` is the outermost) for
    /// depth-indexed binding resolution.
    pub ancestors: Vec<HeapId>,
    /// Cleared when a descendant may introduce shadowing at runtime
    /// (`eval`, `with`); stale caches must not be consulted.
    pub cache_enabled: bool,
}

impl Environment {
    fn chain(outer: Option<HeapId>, outer_ancestors: &[HeapId]) -> Vec<HeapId> {
        match outer {
            Some(outer_id) => {
                let mut ancestors = Vec::with_capacity(outer_ancestors.len() + 1);
                ancestors.extend_from_slice(outer_ancestors);
                ancestors.push(outer_id);
                ancestors
            }
            None => Vec::new(),
        }
    }

    pub fn declarative(outer: Option<HeapId>, outer_ancestors: &[HeapId]) -> Self {
        Self {
            outer,
            kind: EnvKind::Declarative(DeclarativeStore::default()),
            ancestors: Self::chain(outer, outer_ancestors),
            cache_enabled: true,
        }
    }

    pub fn object(outer: Option<HeapId>, outer_ancestors: &[HeapId], binding_object: HeapId, with_base: bool) -> Self {
        Self {
            outer,
            kind: EnvKind::Object {
                binding_object,
                with_base,
            },
            ancestors: Self::chain(outer, outer_ancestors),
            // `with` introduces names the compiler cannot see.
            cache_enabled: !with_base,
        }
    }

    pub fn function(
        outer: Option<HeapId>,
        outer_ancestors: &[HeapId],
        this_status: ThisStatus,
        function: Value,
        new_target: Value,
        home_object: Option<HeapId>,
    ) -> Self {
        Self {
            outer,
            kind: EnvKind::Function {
                store: DeclarativeStore::default(),
                this_status,
                function,
                new_target,
                home_object,
            },
            ancestors: Self::chain(outer, outer_ancestors),
            cache_enabled: true,
        }
    }

    pub fn global(global_object: HeapId) -> Self {
        Self {
            outer: None,
            kind: EnvKind::Global {
                global_object,
                store: DeclarativeStore::default(),
                var_names: HashSet::new(),
            },
            ancestors: Vec::new(),
            cache_enabled: true,
        }
    }

    pub fn module(outer: Option<HeapId>, outer_ancestors: &[HeapId]) -> Self {
        Self {
            outer,
            kind: EnvKind::Module {
                store: DeclarativeStore::default(),
                indirect: HashMap::new(),
            },
            ancestors: Self::chain(outer, outer_ancestors),
            cache_enabled: true,
        }
    }

    /// The declarative store of this environment, if it has one.
    pub fn store_mut(&mut self) -> Option<&mut DeclarativeStore> {
        match &mut self.kind {
            EnvKind::Declarative(store)
            | EnvKind::Function { store, .. }
            | EnvKind::Global { store, .. }
            | EnvKind::Module { store, .. } => Some(store),
            EnvKind::Object { .. } => None,
        }
    }

    pub fn store(&self) -> Option<&DeclarativeStore> {
        match &self.kind {
            EnvKind::Declarative(store)
            | EnvKind::Function { store, .. }
            | EnvKind::Global { store, .. }
            | EnvKind::Module { store, .. } => Some(store),
            EnvKind::Object { .. } => None,
        }
    }

    /// `HasThisBinding`: function (non-arrow), global, and module envs.
    pub fn has_this_binding(&self) -> bool {
        match &self.kind {
            EnvKind::Function { this_status, .. } => !matches!(this_status, ThisStatus::Lexical),
            EnvKind::Global { .. } | EnvKind::Module { .. } => true,
            _ => false,
        }
    }

    /// `HasSuperBinding`: function envs created for methods.
    pub fn has_super_binding(&self) -> bool {
        match &self.kind {
            EnvKind::Function {
                this_status, home_object, ..
            } => !matches!(this_status, ThisStatus::Lexical) && home_object.is_some(),
            _ => false,
        }
    }

    /// `WithBaseObject`: the implicit receiver a `with` env provides.
    pub fn with_base_object(&self) -> Option<HeapId> {
        match &self.kind {
            EnvKind::Object {
                binding_object,
                with_base: true,
            } => Some(*binding_object),
            _ => None,
        }
    }

    /// Enumerates contained heap references for the GC scan.
    pub(crate) fn trace(&self, mark: &mut impl FnMut(HeapId)) {
        if let Some(outer) = self.outer {
            mark(outer);
        }
        for &ancestor in &self.ancestors {
            mark(ancestor);
        }
        let trace_store = |store: &DeclarativeStore, mark: &mut dyn FnMut(HeapId)| {
            for binding in store.bindings.values() {
                if let Some(value) = binding.value {
                    value.trace(&mut |id| mark(id));
                }
            }
        };
        match &self.kind {
            EnvKind::Declarative(store) => trace_store(store, mark),
            EnvKind::Object { binding_object, .. } => mark(*binding_object),
            EnvKind::Function {
                store,
                this_status,
                function,
                new_target,
                home_object,
            } => {
                trace_store(store, mark);
                if let ThisStatus::Initialized(value) = this_status {
                    value.trace(mark);
                }
                function.trace(mark);
                new_target.trace(mark);
                if let Some(home) = home_object {
                    mark(*home);
                }
            }
            EnvKind::Global {
                global_object, store, ..
            } => {
                mark(*global_object);
                trace_store(store, mark);
            }
            EnvKind::Module { store, indirect } => {
                trace_store(store, mark);
                for binding in indirect.values() {
                    mark(binding.module);
                }
            }
        }
    }

    pub fn estimate_size(&self) -> usize {
        let store_len = self.store().map_or(0, |s| s.bindings.len());
        size_of::<Self>() + store_len * (size_of::<StringId>() + size_of::<Binding>())
    }
}

/// ReferenceError raised on a TDZ read or write.
fn tdz_error(name: StringId, interns: &Interns) -> RunError {
    RunError::reference_error(format!(
        "cannot access '{name}' before initialization",
        name = interns.get(name)
    ))
}
