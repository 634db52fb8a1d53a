//! The object model: property storage, descriptors, and the ordinary-object
//! algorithms that need no runtime dispatch.
//!
//! Operations that may call script (proxy traps, accessors, `set` walking a
//! prototype chain of receivers) live in [`crate::operations`]; this module
//! owns the data layout and the pure Validate+Apply machinery.
//!
//! Storage is split the way enumeration order demands: integer-index keys in
//! a `BTreeMap` (ascending iteration for free), string and symbol keys in one
//! insertion-ordered `IndexMap`.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    builtins::NativeFunction,
    heap::HeapId,
    intern::{PropertyKey, StringId},
    promise::PromiseData,
    value::Value,
};

/// A property descriptor as supplied to `defineProperty` and returned from
/// `getOwnPropertyDescriptor`: every field optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct PropertyDescriptor {
    pub value: Option<Value>,
    pub writable: Option<bool>,
    pub get: Option<Value>,
    pub set: Option<Value>,
    pub enumerable: Option<bool>,
    pub configurable: Option<bool>,
}

impl PropertyDescriptor {
    /// A fully-populated data descriptor.
    pub fn data(value: Value, writable: bool, enumerable: bool, configurable: bool) -> Self {
        Self {
            value: Some(value),
            writable: Some(writable),
            get: None,
            set: None,
            enumerable: Some(enumerable),
            configurable: Some(configurable),
        }
    }

    /// A fully-populated accessor descriptor.
    pub fn accessor(get: Value, set: Value, enumerable: bool, configurable: bool) -> Self {
        Self {
            value: None,
            writable: None,
            get: Some(get),
            set: Some(set),
            enumerable: Some(enumerable),
            configurable: Some(configurable),
        }
    }

    pub fn is_data_descriptor(&self) -> bool {
        self.value.is_some() || self.writable.is_some()
    }

    pub fn is_accessor_descriptor(&self) -> bool {
        self.get.is_some() || self.set.is_some()
    }

    pub fn is_generic_descriptor(&self) -> bool {
        !self.is_data_descriptor() && !self.is_accessor_descriptor()
    }
}

/// The payload of a stored property.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) enum PropertySlot {
    Data {
        value: Value,
        writable: bool,
    },
    /// Accessor pair; `Value::Undefined` marks an absent side.
    Accessor {
        get: Value,
        set: Value,
    },
}

/// A stored own property.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct Property {
    pub slot: PropertySlot,
    pub enumerable: bool,
    pub configurable: bool,
}

impl Property {
    pub fn data(value: Value, writable: bool, enumerable: bool, configurable: bool) -> Self {
        Self {
            slot: PropertySlot::Data { value, writable },
            enumerable,
            configurable,
        }
    }

    /// Builds a stored property from a descriptor, defaulting absent fields
    /// per CreateDataProperty / CreateAccessorProperty.
    pub fn from_descriptor(desc: &PropertyDescriptor) -> Self {
        let slot = if desc.is_accessor_descriptor() {
            PropertySlot::Accessor {
                get: desc.get.unwrap_or(Value::Undefined),
                set: desc.set.unwrap_or(Value::Undefined),
            }
        } else {
            PropertySlot::Data {
                value: desc.value.unwrap_or(Value::Undefined),
                writable: desc.writable.unwrap_or(false),
            }
        };
        Self {
            slot,
            enumerable: desc.enumerable.unwrap_or(false),
            configurable: desc.configurable.unwrap_or(false),
        }
    }

    /// Renders this property back as a fully-populated descriptor.
    pub fn to_descriptor(self) -> PropertyDescriptor {
        match self.slot {
            PropertySlot::Data { value, writable } => {
                PropertyDescriptor::data(value, writable, self.enumerable, self.configurable)
            }
            PropertySlot::Accessor { get, set } => {
                PropertyDescriptor::accessor(get, set, self.enumerable, self.configurable)
            }
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self.slot, PropertySlot::Data { .. })
    }

    /// Enumerates contained heap references for the GC scan.
    pub(crate) fn trace(&self, mark: &mut impl FnMut(HeapId)) {
        match self.slot {
            PropertySlot::Data { value, .. } => value.trace(mark),
            PropertySlot::Accessor { get, set } => {
                get.trace(mark);
                set.trace(mark);
            }
        }
    }
}

/// String/symbol half of the key space (indices live in the dense part).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) enum NamedKey {
    Str(StringId),
    Symbol(HeapId),
}

/// Typed-array element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ElementType {
    Int8,
    Uint8,
    Uint8Clamped,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
    Float64,
    BigInt64,
    BigUint64,
}

impl ElementType {
    pub fn byte_size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 | Self::Uint8Clamped => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 | Self::BigInt64 | Self::BigUint64 => 8,
        }
    }

    /// True for the element types whose values are BigInts.
    pub fn is_big_int(self) -> bool {
        matches!(self, Self::BigInt64 | Self::BigUint64)
    }
}

/// A typed view over an array buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct TypedArrayView {
    pub buffer: HeapId,
    pub byte_offset: usize,
    /// Element count, fixed at view creation.
    pub length: usize,
    pub elem: ElementType,
}

/// Backing store for typed-array views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ArrayBufferData {
    pub bytes: Vec<u8>,
    pub detached: bool,
}

/// Proxy internal slots. A revoked proxy has `target`/`handler` of `None`;
/// every operation on it throws TypeError.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct ProxyData {
    pub target: Option<HeapId>,
    pub handler: Option<HeapId>,
    /// Captured at creation so `typeof` needs no chain walk.
    pub callable: bool,
    pub constructable: bool,
}

/// One class-field initializer carried on a constructor, run per instance
/// after `this` is bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ClassField {
    pub key: PropertyKey,
    /// Initializer function object, or `None` for a bare field (undefined).
    pub init: Option<Value>,
    /// When set, the initializer's result is named after the key
    /// (anonymous-function field naming).
    pub names_function: bool,
}

/// A function defined by a script image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ScriptFunction {
    pub script: HeapId,
    /// Index into the script's function table; `None` for a synthesized
    /// default class constructor (no body to execute).
    pub func: Option<u32>,
    /// Mirror of the derived flag for body-less default constructors.
    pub derived: bool,
    /// Closure environment captured at creation.
    pub env: HeapId,
    /// Method home object, target of `super` property access.
    pub home_object: Option<HeapId>,
    /// Private environment in scope at creation.
    pub priv_env: Option<HeapId>,
    /// Instance fields installed by a class constructor.
    pub fields: Vec<ClassField>,
    /// Instance private methods installed by a class constructor.
    pub instance_priv_methods: Vec<(HeapId, Property)>,
}

/// A built-in function plus its bound internal state.
///
/// `slots` carries the values a built-in is closed over (a promise for its
/// resolve function, an async context for an await resumption); keeping them
/// as plain values keeps function objects serializable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct NativeFunctionData {
    pub func: NativeFunction,
    pub name: StringId,
    pub slots: SmallVec<[Value; 2]>,
}

/// `Function.prototype.bind` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct BoundFunctionData {
    pub target: Value,
    pub bound_this: Value,
    pub bound_args: Vec<Value>,
}

/// A finalization-registry cell awaiting its target's death.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct RegistryCell {
    pub target: HeapId,
    pub held: Value,
    pub token: Option<Value>,
}

/// FinalizationRegistry internal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RegistryData {
    pub cleanup: Value,
    pub cells: Vec<RegistryCell>,
}

/// Object specializations: which vtable entries are overridden and what
/// extra internal slots the object carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum ObjectKind {
    Ordinary,
    /// Array exotic object; `length` is synthesized from these slots.
    Array { length: u32, length_writable: bool },
    /// String exotic object capturing a primitive string.
    StringObject { value: HeapId },
    /// Integer-indexed exotic object.
    TypedArray(TypedArrayView),
    ArrayBuffer(ArrayBufferData),
    Proxy(ProxyData),
    /// Boolean/Number/Symbol/BigInt wrapper holding its primitive.
    PrimitiveWrapper(Value),
    Function(ScriptFunction),
    NativeFunction(NativeFunctionData),
    BoundFunction(BoundFunctionData),
    /// Generator or async-function instance; the id points at the suspended
    /// execution context.
    Generator { ctx: HeapId },
    Promise(PromiseData),
    WeakRef { target: Option<HeapId> },
    FinalizationRegistry(RegistryData),
}

/// An object: prototype, extensibility, specialization payload, and the
/// ordered own-property tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct JsObject {
    pub proto: Option<HeapId>,
    pub extensible: bool,
    pub kind: ObjectKind,
    pub named: IndexMap<NamedKey, Property>,
    pub indexed: BTreeMap<u32, Property>,
    /// Private members, keyed by private-name identity in installation order.
    pub privates: Vec<(HeapId, Property)>,
}

impl JsObject {
    pub fn new(proto: Option<HeapId>, kind: ObjectKind) -> Self {
        Self {
            proto,
            extensible: true,
            kind,
            named: IndexMap::new(),
            indexed: BTreeMap::new(),
            privates: Vec::new(),
        }
    }

    pub fn ordinary(proto: Option<HeapId>) -> Self {
        Self::new(proto, ObjectKind::Ordinary)
    }

    pub fn array(proto: Option<HeapId>) -> Self {
        Self::new(
            proto,
            ObjectKind::Array {
                length: 0,
                length_writable: true,
            },
        )
    }

    pub fn is_callable(&self) -> bool {
        match &self.kind {
            ObjectKind::Function(_) | ObjectKind::NativeFunction(_) | ObjectKind::BoundFunction(_) => true,
            ObjectKind::Proxy(p) => p.callable,
            _ => false,
        }
    }

    pub fn is_constructor(&self) -> bool {
        match &self.kind {
            ObjectKind::Function(_) | ObjectKind::NativeFunction(_) | ObjectKind::BoundFunction(_) => true,
            ObjectKind::Proxy(p) => p.constructable,
            _ => false,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, ObjectKind::Array { .. })
    }

    /// The `name` this function was created with, if it is cheaply known.
    ///
    /// Script functions carry their name in the function record; resolving
    /// it needs the script, so callers with heap access go through there.
    pub fn function_name(&self) -> Option<StringId> {
        match &self.kind {
            ObjectKind::NativeFunction(data) => Some(data.name),
            _ => None,
        }
    }

    /// Looks up a stored own property (no exotic synthesis).
    pub fn own_property(&self, key: PropertyKey) -> Option<&Property> {
        match key {
            PropertyKey::Index(i) => self.indexed.get(&i),
            PropertyKey::Str(s) => self.named.get(&NamedKey::Str(s)),
            PropertyKey::Symbol(s) => self.named.get(&NamedKey::Symbol(s)),
            PropertyKey::Private(p) => self.privates.iter().find(|(id, _)| *id == p).map(|(_, prop)| prop),
        }
    }

    pub fn own_property_mut(&mut self, key: PropertyKey) -> Option<&mut Property> {
        match key {
            PropertyKey::Index(i) => self.indexed.get_mut(&i),
            PropertyKey::Str(s) => self.named.get_mut(&NamedKey::Str(s)),
            PropertyKey::Symbol(s) => self.named.get_mut(&NamedKey::Symbol(s)),
            PropertyKey::Private(p) => {
                self.privates.iter_mut().find(|(id, _)| *id == p).map(|(_, prop)| prop)
            }
        }
    }

    /// Inserts or replaces a stored own property, keeping insertion order for
    /// keys that already exist.
    pub fn set_own_property(&mut self, key: PropertyKey, property: Property) {
        match key {
            PropertyKey::Index(i) => {
                self.indexed.insert(i, property);
                if let ObjectKind::Array { length, .. } = &mut self.kind
                    && i >= *length
                {
                    *length = i + 1;
                }
            }
            PropertyKey::Str(s) => {
                self.named.insert(NamedKey::Str(s), property);
            }
            PropertyKey::Symbol(s) => {
                self.named.insert(NamedKey::Symbol(s), property);
            }
            PropertyKey::Private(p) => match self.privates.iter_mut().find(|(id, _)| *id == p) {
                Some((_, slot)) => *slot = property,
                None => self.privates.push((p, property)),
            },
        }
    }

    /// Removes a stored own property, preserving the order of the rest.
    pub fn remove_own_property(&mut self, key: PropertyKey) -> bool {
        match key {
            PropertyKey::Index(i) => self.indexed.remove(&i).is_some(),
            PropertyKey::Str(s) => self.named.shift_remove(&NamedKey::Str(s)).is_some(),
            PropertyKey::Symbol(s) => self.named.shift_remove(&NamedKey::Symbol(s)).is_some(),
            PropertyKey::Private(_) => false,
        }
    }

    /// Stored own keys in specification order: integer indices ascending,
    /// then string keys in insertion order, then symbols in insertion order.
    ///
    /// Exotic synthesis (string-object code units, array `length`) is layered
    /// on top by the operations layer.
    pub fn stored_own_keys(&self) -> Vec<PropertyKey> {
        let mut keys = Vec::with_capacity(self.indexed.len() + self.named.len());
        keys.extend(self.indexed.keys().map(|&i| PropertyKey::Index(i)));
        keys.extend(self.named.keys().filter_map(|k| match k {
            NamedKey::Str(s) => Some(PropertyKey::Str(*s)),
            NamedKey::Symbol(_) => None,
        }));
        keys.extend(self.named.keys().filter_map(|k| match k {
            NamedKey::Symbol(s) => Some(PropertyKey::Symbol(*s)),
            NamedKey::Str(_) => None,
        }));
        keys
    }

    /// Dense view of an array's elements `0..length`.
    pub fn dense_values(&self) -> impl Iterator<Item = Option<Value>> + '_ {
        let length = match self.kind {
            ObjectKind::Array { length, .. } => length,
            _ => 0,
        };
        (0..length).map(|i| {
            self.indexed.get(&i).and_then(|p| match p.slot {
                PropertySlot::Data { value, .. } => Some(value),
                PropertySlot::Accessor { .. } => None,
            })
        })
    }

    /// Rough heap footprint for the resource tracker.
    pub fn estimate_size(&self) -> usize {
        size_of::<Self>()
            + self.named.len() * (size_of::<NamedKey>() + size_of::<Property>())
            + self.indexed.len() * (size_of::<u32>() + size_of::<Property>())
    }

    /// Enumerates contained heap references for the GC scan.
    pub(crate) fn trace(&self, mark: &mut impl FnMut(HeapId)) {
        if let Some(proto) = self.proto {
            mark(proto);
        }
        for property in self.named.values() {
            property.trace(mark);
        }
        for property in self.indexed.values() {
            property.trace(mark);
        }
        for (name, property) in &self.privates {
            mark(*name);
            property.trace(mark);
        }
        match &self.kind {
            ObjectKind::Ordinary | ObjectKind::Array { .. } | ObjectKind::ArrayBuffer(_) => {}
            ObjectKind::StringObject { value } => mark(*value),
            ObjectKind::TypedArray(view) => mark(view.buffer),
            ObjectKind::Proxy(p) => {
                if let Some(target) = p.target {
                    mark(target);
                }
                if let Some(handler) = p.handler {
                    mark(handler);
                }
            }
            ObjectKind::PrimitiveWrapper(value) => value.trace(mark),
            ObjectKind::Function(f) => {
                mark(f.script);
                mark(f.env);
                if let Some(home) = f.home_object {
                    mark(home);
                }
                if let Some(penv) = f.priv_env {
                    mark(penv);
                }
                for field in &f.fields {
                    if let PropertyKey::Symbol(id) | PropertyKey::Private(id) = field.key {
                        mark(id);
                    }
                    if let Some(init) = field.init {
                        init.trace(mark);
                    }
                }
                for (name, prop) in &f.instance_priv_methods {
                    mark(*name);
                    prop.trace(mark);
                }
            }
            ObjectKind::NativeFunction(data) => {
                for slot in &data.slots {
                    slot.trace(mark);
                }
            }
            ObjectKind::BoundFunction(data) => {
                data.target.trace(mark);
                data.bound_this.trace(mark);
                for arg in &data.bound_args {
                    arg.trace(mark);
                }
            }
            ObjectKind::Generator { ctx } => mark(*ctx),
            ObjectKind::Promise(promise) => promise.trace(mark),
            ObjectKind::WeakRef { target: _ } => {
                // The referent is intentionally not traced: weak edges are
                // solved after marking.
            }
            ObjectKind::FinalizationRegistry(registry) => {
                registry.cleanup.trace(mark);
                for cell in &registry.cells {
                    // Targets are weak; held values and tokens are strong.
                    cell.held.trace(mark);
                    if let Some(token) = cell.token {
                        token.trace(mark);
                    }
                }
            }
        }
    }
}

/// OrdinaryDefineOwnProperty's ValidateAndApplyPropertyDescriptor, operating
/// on the stored tables. `same_value` is supplied by the caller so value
/// comparison can see the heap.
///
/// Returns false (without mutating) when the definition is rejected.
pub(crate) fn validate_and_apply(
    object: &mut JsObject,
    key: PropertyKey,
    desc: &PropertyDescriptor,
    same_value: impl Fn(Value, Value) -> bool,
) -> bool {
    let current = object.own_property(key).copied();
    let Some(current) = current else {
        if !object.extensible {
            return false;
        }
        object.set_own_property(key, Property::from_descriptor(desc));
        return true;
    };

    // Every field absent: trivially applies.
    if desc.is_generic_descriptor() && desc.enumerable.is_none() && desc.configurable.is_none() {
        return true;
    }

    if !current.configurable {
        if desc.configurable == Some(true) {
            return false;
        }
        if let Some(enumerable) = desc.enumerable
            && enumerable != current.enumerable
        {
            return false;
        }
        if !desc.is_generic_descriptor() && desc.is_accessor_descriptor() != !current.is_data() {
            return false;
        }
        match current.slot {
            PropertySlot::Data { value, writable } => {
                if !writable {
                    if desc.writable == Some(true) {
                        return false;
                    }
                    if let Some(new_value) = desc.value
                        && !same_value(new_value, value)
                    {
                        return false;
                    }
                }
            }
            PropertySlot::Accessor { get, set } => {
                if let Some(new_get) = desc.get
                    && !same_value(new_get, get)
                {
                    return false;
                }
                if let Some(new_set) = desc.set
                    && !same_value(new_set, set)
                {
                    return false;
                }
            }
        }
    }

    // Apply: merge the descriptor into the current property.
    let mut updated = current;
    if desc.is_accessor_descriptor() && current.is_data() {
        updated.slot = PropertySlot::Accessor {
            get: desc.get.unwrap_or(Value::Undefined),
            set: desc.set.unwrap_or(Value::Undefined),
        };
    } else if desc.is_data_descriptor() && !current.is_data() {
        updated.slot = PropertySlot::Data {
            value: desc.value.unwrap_or(Value::Undefined),
            writable: desc.writable.unwrap_or(false),
        };
    } else {
        match &mut updated.slot {
            PropertySlot::Data { value, writable } => {
                if let Some(new_value) = desc.value {
                    *value = new_value;
                }
                if let Some(new_writable) = desc.writable {
                    *writable = new_writable;
                }
            }
            PropertySlot::Accessor { get, set } => {
                if let Some(new_get) = desc.get {
                    *get = new_get;
                }
                if let Some(new_set) = desc.set {
                    *set = new_set;
                }
            }
        }
    }
    if let Some(enumerable) = desc.enumerable {
        updated.enumerable = enumerable;
    }
    if let Some(configurable) = desc.configurable {
        updated.configurable = configurable;
    }
    object.set_own_property(key, updated);
    true
}
