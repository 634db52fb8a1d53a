//! The arena heap and its tri-phase mark-and-sweep collector.
//!
//! Every heap-managed entity is a slot in one arena, identified by
//! [`HeapId`]. Freed slots go on a free list and are reused, keeping memory
//! flat across allocation-heavy loops. Collection is non-moving and
//! non-concurrent: the runtime enumerates its roots (context stacks, realm,
//! job queue, interned keyed objects), marking walks an explicit worklist,
//! weak edges are solved, then the sweep unlinks unmarked slots.
//!
//! Cyclic object graphs need no special handling: the mark phase reaches
//! whatever is reachable and the sweep frees the rest, cycles included.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    context::GeneratorContext,
    environment::Environment,
    jobs::Job,
    object::{JsObject, ObjectKind},
    resource::{ResourceError, ResourceTracker},
    script::{ModuleRecord, Script},
    tracer::VmTracer,
    types::{JsBigInt, JsString, JsSymbol, KeyList, PrivateName},
};

/// Unique identifier of a slot in the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeapId(usize);

impl HeapId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Every kind of gc-thing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum HeapData {
    Str(JsString),
    Symbol(JsSymbol),
    BigInt(JsBigInt),
    KeyList(KeyList),
    Object(JsObject),
    Env(Environment),
    Script(Script),
    Module(ModuleRecord),
    /// Generator and async execution contexts (they own their native stack).
    Generator(GeneratorContext),
    PrivateName(PrivateName),
}

impl HeapData {
    /// Static variant name, used by heap statistics.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "Str",
            Self::Symbol(_) => "Symbol",
            Self::BigInt(_) => "BigInt",
            Self::KeyList(_) => "KeyList",
            Self::Object(_) => "Object",
            Self::Env(_) => "Env",
            Self::Script(_) => "Script",
            Self::Module(_) => "Module",
            Self::Generator(_) => "Generator",
            Self::PrivateName(_) => "PrivateName",
        }
    }

    /// Rough footprint for the resource tracker.
    pub fn estimate_size(&self) -> usize {
        match self {
            Self::Str(s) => s.estimate_size(),
            Self::Symbol(_) => size_of::<JsSymbol>(),
            Self::BigInt(b) => b.estimate_size(),
            Self::KeyList(k) => k.estimate_size(),
            Self::Object(o) => o.estimate_size(),
            Self::Env(e) => e.estimate_size(),
            Self::Script(s) => s.estimate_size(),
            Self::Module(_) => size_of::<ModuleRecord>(),
            Self::Generator(g) => g.estimate_size(),
            Self::PrivateName(_) => size_of::<PrivateName>(),
        }
    }

    /// The scan op: enumerates every heap reference this thing contains.
    fn trace(&self, mark: &mut impl FnMut(HeapId)) {
        match self {
            Self::Str(_) | Self::Symbol(_) | Self::BigInt(_) | Self::PrivateName(_) => {}
            Self::KeyList(list) => {
                for key in list.keys() {
                    if let crate::intern::PropertyKey::Symbol(id) | crate::intern::PropertyKey::Private(id) = key {
                        mark(*id);
                    }
                }
            }
            Self::Object(object) => object.trace(mark),
            Self::Env(env) => env.trace(mark),
            Self::Script(script) => script.trace(mark),
            Self::Module(module) => module.trace(mark),
            Self::Generator(generator) => generator.trace(mark),
        }
    }
}

/// One live arena slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeapSlot {
    marked: bool,
    /// Temporarily `None` while borrowed out via [`Heap::take_data`].
    data: Option<HeapData>,
}

/// Snapshot of heap state at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Total number of live objects on the heap.
    pub live_objects: usize,
    /// Number of free (recycled) slots available for reuse.
    pub free_slots: usize,
    /// Total heap capacity (live + free).
    pub total_slots: usize,
    /// Breakdown of live objects by `HeapData` variant name.
    pub objects_by_type: BTreeMap<&'static str, usize>,
    /// Dynamically interned strings in the runtime's interner.
    pub interned_strings: usize,
    /// Resource tracker allocation count, if recorded.
    pub tracker_allocations: Option<usize>,
    /// Resource tracker memory usage in bytes, if recorded.
    pub tracker_memory_bytes: Option<usize>,
}

/// Difference between two heap snapshots (`after - before`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapDiff {
    pub live_objects_delta: isize,
    pub free_slots_delta: isize,
    pub total_slots_delta: isize,
    /// Per-type deltas for types present in either snapshot.
    pub objects_by_type_delta: BTreeMap<&'static str, isize>,
    /// Types only present in the "after" snapshot.
    pub new_types: Vec<&'static str>,
    /// Types only present in the "before" snapshot.
    pub removed_types: Vec<&'static str>,
    pub interned_strings_delta: isize,
}

impl HeapStats {
    /// Computes the difference between `self` ("before") and `other` ("after").
    #[must_use]
    pub fn diff(&self, other: &Self) -> HeapDiff {
        let delta = |before: usize, after: usize| (after as isize).wrapping_sub(before as isize);
        let mut objects_by_type_delta = BTreeMap::new();
        let mut new_types = Vec::new();
        let mut removed_types = Vec::new();
        for (&name, &count) in &self.objects_by_type {
            let after = other.objects_by_type.get(name).copied().unwrap_or(0);
            objects_by_type_delta.insert(name, delta(count, after));
            if !other.objects_by_type.contains_key(name) {
                removed_types.push(name);
            }
        }
        for (&name, &count) in &other.objects_by_type {
            if !self.objects_by_type.contains_key(name) {
                objects_by_type_delta.insert(name, count as isize);
                new_types.push(name);
            }
        }
        HeapDiff {
            live_objects_delta: delta(self.live_objects, other.live_objects),
            free_slots_delta: delta(self.free_slots, other.free_slots),
            total_slots_delta: delta(self.total_slots, other.total_slots),
            objects_by_type_delta,
            new_types,
            removed_types,
            interned_strings_delta: delta(self.interned_strings, other.interned_strings),
        }
    }
}

impl std::fmt::Display for HeapDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "HeapDiff: {live:+} live objects, {total:+} slots",
            live = self.live_objects_delta,
            total = self.total_slots_delta
        )?;
        for (&name, &delta) in &self.objects_by_type_delta {
            if delta != 0 {
                write!(f, "\n  {name}: {delta:+}")?;
            }
        }
        if self.interned_strings_delta != 0 {
            write!(f, "\n  Interned strings: {delta:+}", delta = self.interned_strings_delta)?;
        }
        Ok(())
    }
}

/// Result of one collection cycle.
#[derive(Debug, Default)]
pub(crate) struct GcOutcome {
    /// Number of slots freed.
    pub freed: usize,
    /// Finalization cleanup jobs to enqueue, batched after the cycle.
    pub jobs: Vec<Job>,
}

/// The arena heap.
///
/// Generic over `T: ResourceTracker`; an unlimited tracker compiles every
/// check away. Owned by the runtime, never shared between runtimes.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Heap<T: ResourceTracker> {
    entries: Vec<Option<HeapSlot>>,
    /// Freed slot ids available for reuse.
    free_list: Vec<HeapId>,
    tracker: T,
    /// Allocations since the last collection; compared against the
    /// tracker's interval to schedule a cycle.
    allocations_since_gc: u32,
    /// While set, allocation never schedules a collection. Used around
    /// multi-step constructions that would trace half-built structures.
    gc_disabled: bool,
    /// WeakRef objects whose targets must be solved at sweep time.
    weak_refs: Vec<HeapId>,
    /// FinalizationRegistry objects with pending cells.
    registries: Vec<HeapId>,
}

impl<T: ResourceTracker> Heap<T> {
    pub fn new(tracker: T) -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            tracker,
            allocations_since_gc: 0,
            gc_disabled: false,
            weak_refs: Vec::new(),
            registries: Vec::new(),
        }
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    /// Allocates a new gc-thing, reusing a freed slot when one is available.
    pub fn allocate(&mut self, data: HeapData) -> Result<HeapId, ResourceError> {
        self.tracker.on_allocate(|| data.estimate_size())?;
        self.allocations_since_gc = self.allocations_since_gc.saturating_add(1);
        let slot = HeapSlot { marked: false, data: Some(data) };
        match self.free_list.pop() {
            Some(id) => {
                debug_assert!(self.entries[id.index()].is_none(), "free-list entry still occupied");
                self.entries[id.index()] = Some(slot);
                Ok(id)
            }
            None => {
                let id = HeapId(self.entries.len());
                self.entries.push(Some(slot));
                Ok(id)
            }
        }
    }

    /// True when enough allocations have accumulated to schedule a cycle.
    pub fn should_collect(&self) -> bool {
        !self.gc_disabled && self.allocations_since_gc >= self.tracker.gc_interval()
    }

    /// Disables collection scheduling (e.g. during stack reallocation).
    pub fn disable_gc(&mut self) {
        self.gc_disabled = true;
    }

    pub fn enable_gc(&mut self) {
        self.gc_disabled = false;
    }

    pub fn is_live(&self, id: HeapId) -> bool {
        self.entries.get(id.index()).is_some_and(Option::is_some)
    }

    pub fn get(&self, id: HeapId) -> &HeapData {
        self.entries[id.index()]
            .as_ref()
            .expect("heap access to freed slot")
            .data
            .as_ref()
            .expect("heap access to borrowed slot")
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.entries[id.index()]
            .as_mut()
            .expect("heap access to freed slot")
            .data
            .as_mut()
            .expect("heap access to borrowed slot")
    }

    /// Borrows a thing's payload out of the arena, leaving the slot pinned.
    ///
    /// Pair with [`Self::put_data`] before the next safepoint; collection
    /// never runs in between because it is only scheduled at opcode
    /// boundaries.
    pub fn take_data(&mut self, id: HeapId) -> HeapData {
        self.entries[id.index()]
            .as_mut()
            .expect("heap take of freed slot")
            .data
            .take()
            .expect("heap take of already borrowed slot")
    }

    pub fn put_data(&mut self, id: HeapId, data: HeapData) {
        let slot = self.entries[id.index()].as_mut().expect("heap put to freed slot");
        debug_assert!(slot.data.is_none(), "heap put over live data");
        slot.data = Some(data);
    }

    // --- typed accessors ---

    pub fn string(&self, id: HeapId) -> &JsString {
        match self.get(id) {
            HeapData::Str(s) => s,
            other => panic!("expected Str, found {name}", name = other.variant_name()),
        }
    }

    pub fn symbol(&self, id: HeapId) -> &JsSymbol {
        match self.get(id) {
            HeapData::Symbol(s) => s,
            other => panic!("expected Symbol, found {name}", name = other.variant_name()),
        }
    }

    pub fn big_int(&self, id: HeapId) -> &JsBigInt {
        match self.get(id) {
            HeapData::BigInt(b) => b,
            other => panic!("expected BigInt, found {name}", name = other.variant_name()),
        }
    }

    pub fn object(&self, id: HeapId) -> &JsObject {
        match self.get(id) {
            HeapData::Object(o) => o,
            other => panic!("expected Object, found {name}", name = other.variant_name()),
        }
    }

    pub fn object_mut(&mut self, id: HeapId) -> &mut JsObject {
        match self.get_mut(id) {
            HeapData::Object(o) => o,
            other => panic!("expected Object, found {name}", name = other.variant_name()),
        }
    }

    pub fn env(&self, id: HeapId) -> &Environment {
        match self.get(id) {
            HeapData::Env(e) => e,
            other => panic!("expected Env, found {name}", name = other.variant_name()),
        }
    }

    pub fn env_mut(&mut self, id: HeapId) -> &mut Environment {
        match self.get_mut(id) {
            HeapData::Env(e) => e,
            other => panic!("expected Env, found {name}", name = other.variant_name()),
        }
    }

    pub fn script(&self, id: HeapId) -> &Script {
        match self.get(id) {
            HeapData::Script(s) => s,
            other => panic!("expected Script, found {name}", name = other.variant_name()),
        }
    }

    pub fn module(&self, id: HeapId) -> &ModuleRecord {
        match self.get(id) {
            HeapData::Module(m) => m,
            other => panic!("expected Module, found {name}", name = other.variant_name()),
        }
    }

    pub fn module_mut(&mut self, id: HeapId) -> &mut ModuleRecord {
        match self.get_mut(id) {
            HeapData::Module(m) => m,
            other => panic!("expected Module, found {name}", name = other.variant_name()),
        }
    }

    pub fn generator(&self, id: HeapId) -> &GeneratorContext {
        match self.get(id) {
            HeapData::Generator(g) => g,
            other => panic!("expected Generator, found {name}", name = other.variant_name()),
        }
    }

    pub fn generator_mut(&mut self, id: HeapId) -> &mut GeneratorContext {
        match self.get_mut(id) {
            HeapData::Generator(g) => g,
            other => panic!("expected Generator, found {name}", name = other.variant_name()),
        }
    }

    pub fn key_list_mut(&mut self, id: HeapId) -> &mut KeyList {
        match self.get_mut(id) {
            HeapData::KeyList(k) => k,
            other => panic!("expected KeyList, found {name}", name = other.variant_name()),
        }
    }

    // --- weak tracking ---

    /// Registers a WeakRef object for weak solving at sweep time.
    pub fn register_weak_ref(&mut self, id: HeapId) {
        self.weak_refs.push(id);
    }

    /// Registers a FinalizationRegistry object.
    pub fn register_registry(&mut self, id: HeapId) {
        self.registries.push(id);
    }

    // --- collection ---

    /// Runs one full collection cycle from the given roots.
    ///
    /// 1. Gray phase: clear every mark bit, then mark the roots.
    /// 2. Blacken: iterative worklist over each marked thing's scan op.
    /// 3. Sweep: solve weak references and finalization cells, then free
    ///    every unmarked slot.
    ///
    /// Suspended generator contexts that became unreachable are freed with
    /// the rest; their deinit never runs script, so no iterator-close side
    /// effects are observable from collection.
    pub fn collect(&mut self, roots: &[HeapId], tracer: &mut impl VmTracer) -> GcOutcome {
        tracer.on_gc_start(self.live_count());

        // Gray phase.
        for slot in self.entries.iter_mut().flatten() {
            slot.marked = false;
        }
        let mut worklist: Vec<HeapId> = Vec::with_capacity(roots.len());
        for &root in roots {
            self.mark_one(root, &mut worklist);
        }

        // Blacken phase: drain the worklist, scanning each thing once.
        while let Some(id) = worklist.pop() {
            // Scan without holding a borrow across the recursive marking.
            let mut found: Vec<HeapId> = Vec::new();
            if let Some(slot) = &self.entries[id.index()]
                && let Some(data) = &slot.data
            {
                data.trace(&mut |child| found.push(child));
            }
            for child in found {
                self.mark_one(child, &mut worklist);
            }
        }

        // Weak solve.
        let mut outcome = GcOutcome::default();
        let weak_refs = std::mem::take(&mut self.weak_refs);
        for id in weak_refs {
            // A dead base drops its entry with it.
            if !self.is_marked(id) {
                continue;
            }
            let referent = match self.get(id) {
                HeapData::Object(object) => match object.kind {
                    ObjectKind::WeakRef { target } => target,
                    _ => None,
                },
                _ => None,
            };
            if let Some(referent) = referent
                && !self.is_marked(referent)
                && let HeapData::Object(object) = self.get_mut(id)
                && let ObjectKind::WeakRef { target } = &mut object.kind
            {
                *target = None;
            }
            self.weak_refs.push(id);
        }
        let registries = std::mem::take(&mut self.registries);
        for id in registries {
            if !self.is_marked(id) {
                continue;
            }
            let mut dead_flags = Vec::new();
            if let HeapData::Object(object) = self.get(id)
                && let ObjectKind::FinalizationRegistry(registry) = &object.kind
            {
                dead_flags = registry.cells.iter().map(|cell| !self.is_marked(cell.target)).collect();
            }
            if dead_flags.iter().any(|&dead| dead)
                && let HeapData::Object(object) = self.get_mut(id)
                && let ObjectKind::FinalizationRegistry(registry) = &mut object.kind
            {
                let cleanup = registry.cleanup;
                let mut kept = Vec::with_capacity(registry.cells.len());
                // Cells enqueue in registration order.
                for (cell, dead) in registry.cells.drain(..).zip(dead_flags) {
                    if dead {
                        outcome.jobs.push(Job::FinalizationCleanup {
                            callback: cleanup,
                            held: cell.held,
                        });
                    } else {
                        kept.push(cell);
                    }
                }
                registry.cells = kept;
            }
            self.registries.push(id);
        }

        // Free phase.
        for index in 0..self.entries.len() {
            let unmarked = matches!(&self.entries[index], Some(slot) if !slot.marked);
            if unmarked {
                let slot = self.entries[index].take().expect("checked occupied");
                if let Some(data) = &slot.data {
                    self.tracker.on_free(|| data.estimate_size());
                }
                self.free_list.push(HeapId(index));
                outcome.freed += 1;
            }
        }
        self.allocations_since_gc = 0;

        tracer.on_gc_end(outcome.freed);
        outcome
    }

    fn mark_one(&mut self, id: HeapId, worklist: &mut Vec<HeapId>) {
        if let Some(slot) = self.entries.get_mut(id.index()).and_then(Option::as_mut)
            && !slot.marked
        {
            slot.marked = true;
            worklist.push(id);
        }
    }

    /// True when the slot is live and was reached by the current cycle.
    pub fn is_marked(&self, id: HeapId) -> bool {
        self.entries
            .get(id.index())
            .and_then(Option::as_ref)
            .is_some_and(|slot| slot.marked)
    }

    fn live_count(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    /// Captures current heap statistics.
    pub fn stats(&self, interned_strings: usize) -> HeapStats {
        let mut objects_by_type: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut live_objects = 0;
        for slot in self.entries.iter().flatten() {
            live_objects += 1;
            if let Some(data) = &slot.data {
                *objects_by_type.entry(data.variant_name()).or_insert(0) += 1;
            }
        }
        HeapStats {
            live_objects,
            free_slots: self.free_list.len(),
            total_slots: self.entries.len(),
            objects_by_type,
            interned_strings,
            tracker_allocations: self.tracker.allocation_count(),
            tracker_memory_bytes: self.tracker.current_memory_bytes(),
        }
    }
}
