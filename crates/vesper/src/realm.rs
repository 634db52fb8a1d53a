//! Realms: one global object, one set of intrinsics.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::{
    builtins::NativeFunction,
    environment::Environment,
    error::NativeErrorKind,
    heap::{Heap, HeapData, HeapId},
    intern::{Interns, PropertyKey, StringId, WellKnown},
    object::{JsObject, NativeFunctionData, ObjectKind, Property},
    resource::ResourceTracker,
    types::JsSymbol,
    value::Value,
};

/// The intrinsic objects of a realm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Intrinsics {
    pub object_prototype: HeapId,
    pub function_prototype: HeapId,
    pub array_prototype: HeapId,
    pub string_prototype: HeapId,
    pub boolean_prototype: HeapId,
    pub number_prototype: HeapId,
    pub symbol_prototype: HeapId,
    pub bigint_prototype: HeapId,
    pub iterator_prototype: HeapId,
    pub generator_prototype: HeapId,
    pub promise_prototype: HeapId,
    pub error_prototypes: AHashMap<NativeErrorKind, HeapId>,
    pub error_constructors: AHashMap<NativeErrorKind, HeapId>,
    /// The realm's `eval` function, identity-compared for direct eval.
    pub eval: Value,
    // Well-known symbols.
    pub symbol_iterator: HeapId,
    pub symbol_async_iterator: HeapId,
    pub symbol_to_primitive: HeapId,
    pub symbol_has_instance: HeapId,
    pub symbol_unscopables: HeapId,
}

impl Intrinsics {
    /// Prototype for a native error kind (falls back to `Error.prototype`).
    pub fn error_prototype(&self, kind: NativeErrorKind) -> HeapId {
        self.error_prototypes
            .get(&kind)
            .or_else(|| self.error_prototypes.get(&NativeErrorKind::Error))
            .copied()
            .expect("realm has error prototypes")
    }
}

/// An isolation unit: global object, global environment, intrinsics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Realm {
    pub global_object: HeapId,
    pub global_env: HeapId,
    pub intrinsics: Intrinsics,
}

impl Realm {
    /// Enumerates the realm's heap references for the GC root set.
    pub(crate) fn trace(&self, mark: &mut impl FnMut(HeapId)) {
        mark(self.global_object);
        mark(self.global_env);
        let i = &self.intrinsics;
        for id in [
            i.object_prototype,
            i.function_prototype,
            i.array_prototype,
            i.string_prototype,
            i.boolean_prototype,
            i.number_prototype,
            i.symbol_prototype,
            i.bigint_prototype,
            i.iterator_prototype,
            i.generator_prototype,
            i.promise_prototype,
            i.symbol_iterator,
            i.symbol_async_iterator,
            i.symbol_to_primitive,
            i.symbol_has_instance,
            i.symbol_unscopables,
        ] {
            mark(id);
        }
        for &id in i.error_prototypes.values().chain(i.error_constructors.values()) {
            mark(id);
        }
        i.eval.trace(mark);
    }

    /// Builds a fresh realm: prototype chain, error hierarchy, well-known
    /// symbols, global object and environment, and the global bindings the
    /// core depends on.
    pub(crate) fn create<T: ResourceTracker>(heap: &mut Heap<T>, interns: &mut Interns) -> Self {
        // Realm construction happens before any script can run; allocation
        // failures here are fatal to the embedder, matching corrupt-image
        // handling rather than script-visible throws.
        let alloc = |heap: &mut Heap<T>, data: HeapData| heap.allocate(data).expect("realm allocation");

        let object_prototype = alloc(heap, HeapData::Object(JsObject::new(None, ObjectKind::Ordinary)));
        let function_prototype = alloc(
            heap,
            HeapData::Object(JsObject::new(
                Some(object_prototype),
                ObjectKind::NativeFunction(NativeFunctionData {
                    func: NativeFunction::FunctionPrototype,
                    name: WellKnown::Empty.into(),
                    slots: smallvec::SmallVec::new(),
                }),
            )),
        );
        let ordinary = |heap: &mut Heap<T>, proto: HeapId| {
            alloc(heap, HeapData::Object(JsObject::ordinary(Some(proto))))
        };
        let array_prototype = ordinary(heap, object_prototype);
        let string_prototype = ordinary(heap, object_prototype);
        let boolean_prototype = ordinary(heap, object_prototype);
        let number_prototype = ordinary(heap, object_prototype);
        let symbol_prototype = ordinary(heap, object_prototype);
        let bigint_prototype = ordinary(heap, object_prototype);
        let iterator_prototype = ordinary(heap, object_prototype);
        let generator_prototype = ordinary(heap, iterator_prototype);
        let promise_prototype = ordinary(heap, object_prototype);

        let symbol = |heap: &mut Heap<T>, description: StringId| {
            alloc(heap, HeapData::Symbol(JsSymbol::new(Some(description))))
        };
        let symbol_iterator = symbol(heap, interns.intern("Symbol.iterator"));
        let symbol_async_iterator = symbol(heap, interns.intern("Symbol.asyncIterator"));
        let symbol_to_primitive = symbol(heap, interns.intern("Symbol.toPrimitive"));
        let symbol_has_instance = symbol(heap, interns.intern("Symbol.hasInstance"));
        let symbol_unscopables = symbol(heap, interns.intern("Symbol.unscopables"));

        let mut native = |heap: &mut Heap<T>, func: NativeFunction, name: &str| {
            let name_id = interns.intern(name);
            let mut object = JsObject::new(
                Some(function_prototype),
                ObjectKind::NativeFunction(NativeFunctionData {
                    func,
                    name: name_id,
                    slots: smallvec::SmallVec::new(),
                }),
            );
            let name_value = alloc(heap, HeapData::Str(crate::types::JsString::new(name)));
            object.set_own_property(
                PropertyKey::Str(WellKnown::Name.into()),
                Property::data(Value::String(name_value), false, false, true),
            );
            alloc(heap, HeapData::Object(object))
        };

        // Error hierarchy: prototypes chain through Error.prototype, each
        // constructor exposes its prototype and lands on the global later.
        let mut error_prototypes = AHashMap::new();
        let mut error_constructors = AHashMap::new();
        let base_error_prototype = ordinary(heap, object_prototype);
        error_prototypes.insert(NativeErrorKind::Error, base_error_prototype);
        for kind in NativeErrorKind::iter() {
            let proto = if kind == NativeErrorKind::Error {
                base_error_prototype
            } else {
                ordinary(heap, base_error_prototype)
            };
            error_prototypes.insert(kind, proto);
            let kind_name: &'static str = kind.into();
            let constructor = native(heap, NativeFunction::ErrorConstructor(kind), kind_name);
            // ctor.prototype <-> proto.constructor
            heap.object_mut(constructor).set_own_property(
                PropertyKey::Str(WellKnown::Prototype.into()),
                Property::data(Value::Object(proto), false, false, false),
            );
            heap.object_mut(proto).set_own_property(
                PropertyKey::Str(WellKnown::Constructor.into()),
                Property::data(Value::Object(constructor), true, false, true),
            );
            let name_value = alloc(heap, HeapData::Str(crate::types::JsString::new(kind_name)));
            heap.object_mut(proto).set_own_property(
                PropertyKey::Str(WellKnown::Name.into()),
                Property::data(Value::String(name_value), true, false, true),
            );
            error_constructors.insert(kind, constructor);
        }

        let eval_function = native(heap, NativeFunction::Eval, "eval");

        let global_object = ordinary(heap, object_prototype);
        let global_env = alloc(heap, HeapData::Env(Environment::global(global_object)));

        let realm = Self {
            global_object,
            global_env,
            intrinsics: Intrinsics {
                object_prototype,
                function_prototype,
                array_prototype,
                string_prototype,
                boolean_prototype,
                number_prototype,
                symbol_prototype,
                bigint_prototype,
                iterator_prototype,
                generator_prototype,
                promise_prototype,
                error_prototypes,
                error_constructors,
                eval: Value::Object(eval_function),
                symbol_iterator,
                symbol_async_iterator,
                symbol_to_primitive,
                symbol_has_instance,
                symbol_unscopables,
            },
        };
        realm.populate(heap, interns);
        realm
    }

    /// Installs prototype methods and global bindings.
    fn populate<T: ResourceTracker>(&self, heap: &mut Heap<T>, interns: &mut Interns) {
        let alloc = |heap: &mut Heap<T>, data: HeapData| heap.allocate(data).expect("realm allocation");
        let function_prototype = self.intrinsics.function_prototype;
        let mut native = |heap: &mut Heap<T>, interns: &mut Interns, func: NativeFunction, name: &str| {
            let name_id = interns.intern(name);
            let mut object = JsObject::new(
                Some(function_prototype),
                ObjectKind::NativeFunction(NativeFunctionData {
                    func,
                    name: name_id,
                    slots: smallvec::SmallVec::new(),
                }),
            );
            let name_value = alloc(heap, HeapData::Str(crate::types::JsString::new(name)));
            object.set_own_property(
                PropertyKey::Str(WellKnown::Name.into()),
                Property::data(Value::String(name_value), false, false, true),
            );
            alloc(heap, HeapData::Object(object))
        };
        let method = |heap: &mut Heap<T>, target: HeapId, key: PropertyKey, func: HeapId| {
            heap.object_mut(target)
                .set_own_property(key, Property::data(Value::Object(func), true, false, true));
        };

        // Function.prototype
        let bind = native(heap, interns, NativeFunction::FunctionProtoBind, "bind");
        method(heap, function_prototype, interns.string_to_key("bind"), bind);
        let call = native(heap, interns, NativeFunction::FunctionProtoCall, "call");
        method(heap, function_prototype, interns.string_to_key("call"), call);
        let apply = native(heap, interns, NativeFunction::FunctionProtoApply, "apply");
        method(heap, function_prototype, interns.string_to_key("apply"), apply);

        // Array.prototype and its iterator.
        let push = native(heap, interns, NativeFunction::ArrayProtoPush, "push");
        method(heap, self.intrinsics.array_prototype, PropertyKey::Str(WellKnown::Push.into()), push);
        let map = native(heap, interns, NativeFunction::ArrayProtoMap, "map");
        method(heap, self.intrinsics.array_prototype, PropertyKey::Str(WellKnown::Map.into()), map);
        let join = native(heap, interns, NativeFunction::ArrayProtoJoin, "join");
        method(heap, self.intrinsics.array_prototype, interns.string_to_key("join"), join);
        let values = native(heap, interns, NativeFunction::ArrayProtoValues, "values");
        method(heap, self.intrinsics.array_prototype, interns.string_to_key("values"), values);
        method(
            heap,
            self.intrinsics.array_prototype,
            PropertyKey::Symbol(self.intrinsics.symbol_iterator),
            values,
        );

        // Generator.prototype
        for (func, name) in [
            (NativeFunction::GeneratorProtoNext, "next"),
            (NativeFunction::GeneratorProtoReturn, "return"),
            (NativeFunction::GeneratorProtoThrow, "throw"),
        ] {
            let f = native(heap, interns, func, name);
            method(heap, self.intrinsics.generator_prototype, interns.string_to_key(name), f);
        }
        // Generators are iterable: `gen[@@iterator]()` is the generator itself.
        let self_iter = native(heap, interns, NativeFunction::IteratorIdentity, "[Symbol.iterator]");
        method(
            heap,
            self.intrinsics.iterator_prototype,
            PropertyKey::Symbol(self.intrinsics.symbol_iterator),
            self_iter,
        );

        // Promise.prototype.then
        let then = native(heap, interns, NativeFunction::PromiseProtoThen, "then");
        method(heap, self.intrinsics.promise_prototype, PropertyKey::Str(WellKnown::Then.into()), then);

        // Global bindings.
        let global = self.global_object;
        let data = |heap: &mut Heap<T>, key: PropertyKey, value: Value, writable: bool| {
            heap.object_mut(global)
                .set_own_property(key, Property::data(value, writable, false, writable));
        };
        data(heap, PropertyKey::Str(WellKnown::GlobalThis.into()), Value::Object(global), true);
        data(heap, PropertyKey::Str(WellKnown::Undefined.into()), Value::Undefined, false);
        data(heap, PropertyKey::Str(WellKnown::Nan.into()), Value::Number(f64::NAN), false);
        data(heap, PropertyKey::Str(WellKnown::Infinity.into()), Value::Number(f64::INFINITY), false);
        data(heap, PropertyKey::Str(WellKnown::Eval.into()), self.intrinsics.eval, true);

        let object_ctor = native(heap, interns, NativeFunction::ObjectConstructor, "Object");
        for (func, name) in [
            (NativeFunction::ObjectKeys, "keys"),
            (NativeFunction::ObjectDefineProperty, "defineProperty"),
            (NativeFunction::ObjectGetOwnPropertyDescriptor, "getOwnPropertyDescriptor"),
            (NativeFunction::ObjectGetPrototypeOf, "getPrototypeOf"),
            (NativeFunction::ObjectSetPrototypeOf, "setPrototypeOf"),
            (NativeFunction::ObjectPreventExtensions, "preventExtensions"),
        ] {
            let f = native(heap, interns, func, name);
            method(heap, object_ctor, interns.string_to_key(name), f);
        }
        heap.object_mut(object_ctor).set_own_property(
            PropertyKey::Str(WellKnown::Prototype.into()),
            Property::data(Value::Object(self.intrinsics.object_prototype), false, false, false),
        );
        data(heap, PropertyKey::Str(WellKnown::Object.into()), Value::Object(object_ctor), true);

        let array_ctor = native(heap, interns, NativeFunction::ArrayConstructor, "Array");
        heap.object_mut(array_ctor).set_own_property(
            PropertyKey::Str(WellKnown::Prototype.into()),
            Property::data(Value::Object(self.intrinsics.array_prototype), false, false, false),
        );
        method(
            heap,
            self.intrinsics.array_prototype,
            PropertyKey::Str(WellKnown::Constructor.into()),
            array_ctor,
        );
        data(heap, interns.string_to_key("Array"), Value::Object(array_ctor), true);

        for (kind, &constructor) in &self.intrinsics.error_constructors {
            let kind_name: &'static str = (*kind).into();
            data(heap, interns.string_to_key(kind_name), Value::Object(constructor), true);
        }

        let promise_ctor = native(heap, interns, NativeFunction::PromiseConstructor, "Promise");
        let resolve = native(heap, interns, NativeFunction::PromiseResolve, "resolve");
        method(heap, promise_ctor, PropertyKey::Str(WellKnown::Resolve.into()), resolve);
        heap.object_mut(promise_ctor).set_own_property(
            PropertyKey::Str(WellKnown::Prototype.into()),
            Property::data(Value::Object(self.intrinsics.promise_prototype), false, false, false),
        );
        method(
            heap,
            self.intrinsics.promise_prototype,
            PropertyKey::Str(WellKnown::Constructor.into()),
            promise_ctor,
        );
        data(heap, interns.string_to_key("Promise"), Value::Object(promise_ctor), true);

        let bigint_ctor = native(heap, interns, NativeFunction::BigIntConstructor, "BigInt");
        for (func, name) in [
            (NativeFunction::BigIntAsIntN, "asIntN"),
            (NativeFunction::BigIntAsUintN, "asUintN"),
        ] {
            let f = native(heap, interns, func, name);
            method(heap, bigint_ctor, interns.string_to_key(name), f);
        }
        data(heap, interns.string_to_key("BigInt"), Value::Object(bigint_ctor), true);

        let proxy_ctor = native(heap, interns, NativeFunction::ProxyConstructor, "Proxy");
        data(heap, interns.string_to_key("Proxy"), Value::Object(proxy_ctor), true);

        let weak_ref_ctor = native(heap, interns, NativeFunction::WeakRefConstructor, "WeakRef");
        let weak_ref_prototype = alloc(
            heap,
            HeapData::Object(JsObject::ordinary(Some(self.intrinsics.object_prototype))),
        );
        let deref = native(heap, interns, NativeFunction::WeakRefDeref, "deref");
        method(heap, weak_ref_prototype, interns.string_to_key("deref"), deref);
        heap.object_mut(weak_ref_ctor).set_own_property(
            PropertyKey::Str(WellKnown::Prototype.into()),
            Property::data(Value::Object(weak_ref_prototype), false, false, false),
        );
        data(heap, interns.string_to_key("WeakRef"), Value::Object(weak_ref_ctor), true);

        let registry_ctor = native(heap, interns, NativeFunction::FinalizationRegistryConstructor, "FinalizationRegistry");
        let registry_prototype = alloc(
            heap,
            HeapData::Object(JsObject::ordinary(Some(self.intrinsics.object_prototype))),
        );
        for (func, name) in [
            (NativeFunction::FinalizationRegistryRegister, "register"),
            (NativeFunction::FinalizationRegistryUnregister, "unregister"),
        ] {
            let f = native(heap, interns, func, name);
            method(heap, registry_prototype, interns.string_to_key(name), f);
        }
        heap.object_mut(registry_ctor).set_own_property(
            PropertyKey::Str(WellKnown::Prototype.into()),
            Property::data(Value::Object(registry_prototype), false, false, false),
        );
        data(
            heap,
            interns.string_to_key("FinalizationRegistry"),
            Value::Object(registry_ctor),
            true,
        );
    }
}
