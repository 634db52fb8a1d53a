//! Built-in functions the core depends on.
//!
//! The full standard library is a collaborator; this module carries only
//! what the execution core itself touches: error constructors, the promise
//! surface `await` needs, the generator prototype methods, minimal Object
//! and Array entries, Proxy/WeakRef/FinalizationRegistry constructors, and
//! `eval`. Built-ins are a fieldless-ish data enum so function values
//! serialize; per-instance state lives in the function object's slots.

use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

use crate::{
    error::{NativeErrorKind, RunError, RunResult},
    heap::HeapId,
    intern::{PropertyKey, WellKnown},
    object::{
        BoundFunctionData, JsObject, ObjectKind, Property, ProxyData, RegistryCell, RegistryData,
    },
    promise::PromiseData,
    resource::ResourceTracker,
    runtime::Runtime,
    tracer::VmTracer,
    types::JsBigInt,
    value::Value,
    vm::generator::GenRequest,
};

/// Identity of a built-in function. The payload never carries values; bound
/// state travels in the function object's slot vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, Serialize, Deserialize)]
pub(crate) enum NativeFunction {
    /// `Function.prototype` is callable and returns undefined.
    FunctionPrototype,
    ErrorConstructor(NativeErrorKind),
    Eval,
    ObjectConstructor,
    ObjectKeys,
    ObjectDefineProperty,
    ObjectGetOwnPropertyDescriptor,
    ObjectGetPrototypeOf,
    ObjectSetPrototypeOf,
    ObjectPreventExtensions,
    ArrayConstructor,
    ArrayProtoPush,
    ArrayProtoMap,
    ArrayProtoJoin,
    ArrayProtoValues,
    /// `next` of an array iterator; slots: `[target, index]`.
    ArrayIteratorNext,
    /// `[Symbol.iterator]` on %IteratorPrototype%: returns the receiver.
    IteratorIdentity,
    FunctionProtoBind,
    FunctionProtoCall,
    FunctionProtoApply,
    GeneratorProtoNext,
    GeneratorProtoReturn,
    GeneratorProtoThrow,
    PromiseConstructor,
    PromiseResolve,
    PromiseProtoThen,
    /// A capability's resolve function; slots: `[promise]`.
    PromiseCapResolve,
    /// A capability's reject function; slots: `[promise]`.
    PromiseCapReject,
    BigIntConstructor,
    BigIntAsIntN,
    BigIntAsUintN,
    ProxyConstructor,
    WeakRefConstructor,
    WeakRefDeref,
    FinalizationRegistryConstructor,
    FinalizationRegistryRegister,
    FinalizationRegistryUnregister,
}

impl<T: ResourceTracker, Tr: VmTracer> Runtime<T, Tr> {
    /// Dispatches a built-in call. `new_target` is `Some` on construct.
    ///
    /// The receiver and argument values live in Rust locals for the length
    /// of the call, so they are rooted here; the dispatch body can push
    /// additional temporaries and they are released with the same mark.
    pub(crate) fn call_native(
        &mut self,
        func_obj: HeapId,
        func: NativeFunction,
        this: Value,
        args: &[Value],
        new_target: Option<Value>,
    ) -> RunResult<Value> {
        let mark = self.temp_roots.len();
        self.temp_roots.push(Value::Object(func_obj));
        self.temp_roots.push(this);
        self.temp_roots.extend_from_slice(args);
        if let Some(new_target) = new_target {
            self.temp_roots.push(new_target);
        }
        let result = self.dispatch_native(func_obj, func, this, args, new_target);
        self.temp_roots.truncate(mark);
        result
    }

    #[expect(clippy::too_many_lines, reason = "the builtin dispatch is one match by design")]
    fn dispatch_native(
        &mut self,
        func_obj: HeapId,
        func: NativeFunction,
        this: Value,
        args: &[Value],
        new_target: Option<Value>,
    ) -> RunResult<Value> {
        let arg = |index: usize| args.get(index).copied().unwrap_or(Value::Undefined);
        match func {
            NativeFunction::FunctionPrototype => Ok(Value::Undefined),

            NativeFunction::ErrorConstructor(kind) => {
                let proto = match new_target {
                    Some(target) if target != Value::Undefined => {
                        let proto = self.get(target, PropertyKey::Str(WellKnown::Prototype.into()))?;
                        proto.as_object().unwrap_or(self.realm.intrinsics.error_prototype(kind))
                    }
                    _ => self.realm.intrinsics.error_prototype(kind),
                };
                let error = self.alloc_object(JsObject::ordinary(Some(proto)))?;
                let message = arg(0);
                if message != Value::Undefined {
                    let text = self.to_string_value(message)?;
                    self.heap.object_mut(error).set_own_property(
                        PropertyKey::Str(WellKnown::Message.into()),
                        Property::data(text, true, false, true),
                    );
                }
                Ok(Value::Object(error))
            }

            NativeFunction::Eval => {
                // Indirect eval: global scope, never the caller's.
                let source = arg(0);
                if !source.is_string() {
                    return Ok(source);
                }
                let text = self.string_content(source)?;
                let script = self.compile_eval_source(&text, false)?;
                self.eval_evaluation(script, false)
            }

            NativeFunction::ObjectConstructor => {
                let value = arg(0);
                if value.is_nullish() {
                    let proto = self.realm.intrinsics.object_prototype;
                    let obj = self.alloc_object(JsObject::ordinary(Some(proto)))?;
                    Ok(Value::Object(obj))
                } else {
                    Ok(Value::Object(self.to_object(value)?))
                }
            }
            NativeFunction::ObjectKeys => {
                let obj = self.to_object(arg(0))?;
                self.temp_roots.push(Value::Object(obj));
                let mut keys = Vec::new();
                for key in self.own_property_keys(obj)? {
                    if matches!(key, PropertyKey::Symbol(_) | PropertyKey::Private(_)) {
                        continue;
                    }
                    if let Some(desc) = self.get_own_property(obj, key)?
                        && desc.enumerable == Some(true)
                    {
                        let key_value = self.key_to_value(key)?;
                        self.temp_roots.push(key_value);
                        keys.push(key_value);
                    }
                }
                let array = self.new_array_from(&keys)?;
                Ok(Value::Object(array))
            }
            NativeFunction::ObjectDefineProperty => {
                let Some(obj) = arg(0).as_object() else {
                    return Err(RunError::type_error("Object.defineProperty called on non-object"));
                };
                let key = self.to_property_key(arg(1))?;
                let Some(desc_obj) = arg(2).as_object() else {
                    return Err(RunError::type_error("property descriptor must be an object"));
                };
                let desc = self.to_property_descriptor(desc_obj)?;
                if !self.define_own_property(obj, key, &desc)? {
                    return Err(RunError::type_error(format!(
                        "cannot define property '{key}'",
                        key = self.render_key(key)
                    )));
                }
                Ok(arg(0))
            }
            NativeFunction::ObjectGetOwnPropertyDescriptor => {
                let obj = self.to_object(arg(0))?;
                let key = self.to_property_key(arg(1))?;
                match self.get_own_property(obj, key)? {
                    Some(desc) => self.descriptor_to_object(&desc),
                    None => Ok(Value::Undefined),
                }
            }
            NativeFunction::ObjectGetPrototypeOf => {
                let obj = self.to_object(arg(0))?;
                Ok(self.get_prototype_of(obj)?.map_or(Value::Null, Value::Object))
            }
            NativeFunction::ObjectSetPrototypeOf => {
                let target = arg(0);
                let Some(obj) = target.as_object() else {
                    return Ok(target);
                };
                let proto = match arg(1) {
                    Value::Null => None,
                    Value::Object(id) => Some(id),
                    _ => return Err(RunError::type_error("prototype must be an object or null")),
                };
                if !self.set_prototype_of(obj, proto)? {
                    return Err(RunError::type_error("cannot set prototype of this object"));
                }
                Ok(target)
            }
            NativeFunction::ObjectPreventExtensions => {
                let target = arg(0);
                if let Some(obj) = target.as_object() {
                    self.prevent_extensions(obj)?;
                }
                Ok(target)
            }

            NativeFunction::ArrayConstructor => {
                if args.len() == 1
                    && let Value::Number(n) = arg(0)
                {
                    let length = crate::conv::to_array_length(n)
                        .ok_or_else(|| RunError::range_error("invalid array length"))?;
                    let array = self.new_array_from(&[])?;
                    if let ObjectKind::Array { length: slot, .. } = &mut self.heap.object_mut(array).kind {
                        *slot = length;
                    }
                    return Ok(Value::Object(array));
                }
                let array = self.new_array_from(args)?;
                Ok(Value::Object(array))
            }
            NativeFunction::ArrayProtoPush => {
                let obj = self.to_object(this)?;
                let mut length = self.array_like_length(obj)?;
                for &value in args {
                    let index = u32::try_from(length).map_err(|_| RunError::range_error("invalid array length"))?;
                    self.set_checked(obj, PropertyKey::Index(index), value, true)?;
                    length += 1;
                }
                Ok(Value::Number(length as f64))
            }
            NativeFunction::ArrayProtoMap => {
                let obj = self.to_object(this)?;
                let length = self.array_like_length(obj)?;
                let callback = arg(0);
                if !self.is_callable(callback) {
                    return Err(RunError::type_error("Array.prototype.map callback is not a function"));
                }
                let this_arg = arg(1);
                let result = self.new_array_from(&[])?;
                // The result array is otherwise unreachable while the
                // callback runs.
                self.temp_roots.push(Value::Object(result));
                for index in 0..length {
                    let key = PropertyKey::Index(u32::try_from(index).expect("length bounded"));
                    if self.has_property(obj, key)? {
                        let value = self.get(Value::Object(obj), key)?;
                        let mapped = self.call(
                            callback,
                            this_arg,
                            &[value, Value::Number(index as f64), Value::Object(obj)],
                        )?;
                        self.create_data_property(result, key, mapped)?;
                    }
                }
                Ok(Value::Object(result))
            }
            NativeFunction::ArrayProtoJoin => {
                let obj = self.to_object(this)?;
                self.temp_roots.push(Value::Object(obj));
                let length = self.array_like_length(obj)?;
                let separator = match arg(0) {
                    Value::Undefined => ",".to_string(),
                    other => self.string_content(other)?,
                };
                let mut out = String::new();
                for index in 0..length {
                    if index > 0 {
                        out.push_str(&separator);
                    }
                    let value = self.get(
                        Value::Object(obj),
                        PropertyKey::Index(u32::try_from(index).expect("length bounded")),
                    )?;
                    if !value.is_nullish() {
                        out.push_str(&self.string_content(value)?);
                    }
                }
                self.alloc_string(out)
            }
            NativeFunction::ArrayProtoValues => {
                let obj = self.to_object(this)?;
                let next = self.alloc_native_function(
                    NativeFunction::ArrayIteratorNext,
                    WellKnown::Next.into(),
                    smallvec::smallvec![Value::Object(obj), Value::Number(0.0)],
                )?;
                let proto = self.realm.intrinsics.iterator_prototype;
                let iterator = self.alloc_object(JsObject::ordinary(Some(proto)))?;
                self.heap.object_mut(iterator).set_own_property(
                    PropertyKey::Str(WellKnown::Next.into()),
                    Property::data(Value::Object(next), true, false, true),
                );
                Ok(Value::Object(iterator))
            }
            NativeFunction::ArrayIteratorNext => {
                let (target, index) = {
                    let ObjectKind::NativeFunction(data) = &self.heap.object(func_obj).kind else {
                        unreachable!("native call carries its function object")
                    };
                    let target = data.slots[0];
                    let Value::Number(index) = data.slots[1] else {
                        unreachable!("array iterator index is a number")
                    };
                    (target, index as usize)
                };
                let target_obj = target.as_object().expect("array iterator over an object");
                let length = self.array_like_length(target_obj)?;
                if index >= length {
                    return self.create_iter_result(Value::Undefined, true);
                }
                let value = self.get(
                    target,
                    PropertyKey::Index(u32::try_from(index).expect("length bounded")),
                )?;
                if let ObjectKind::NativeFunction(data) = &mut self.heap.object_mut(func_obj).kind {
                    data.slots[1] = Value::Number((index + 1) as f64);
                }
                self.create_iter_result(value, false)
            }
            NativeFunction::IteratorIdentity => Ok(this),

            NativeFunction::FunctionProtoBind => {
                if !self.is_callable(this) {
                    return Err(RunError::type_error("Function.prototype.bind called on non-callable"));
                }
                let bound = JsObject::new(
                    Some(self.realm.intrinsics.function_prototype),
                    ObjectKind::BoundFunction(BoundFunctionData {
                        target: this,
                        bound_this: arg(0),
                        bound_args: args.get(1..).unwrap_or(&[]).to_vec(),
                    }),
                );
                let id = self.alloc_object(bound)?;
                Ok(Value::Object(id))
            }
            NativeFunction::FunctionProtoCall => {
                let call_args = args.get(1..).unwrap_or(&[]).to_vec();
                self.call(this, arg(0), &call_args)
            }
            NativeFunction::FunctionProtoApply => {
                let call_args = match arg(1) {
                    Value::Undefined | Value::Null => Vec::new(),
                    Value::Object(list) => {
                        let length = self.array_like_length(list)?;
                        let mut out = Vec::with_capacity(length);
                        for index in 0..length {
                            out.push(self.get(
                                Value::Object(list),
                                PropertyKey::Index(u32::try_from(index).expect("length bounded")),
                            )?);
                        }
                        out
                    }
                    _ => return Err(RunError::type_error("apply argument list is not an object")),
                };
                self.call(this, arg(0), &call_args)
            }

            NativeFunction::GeneratorProtoNext => {
                let gen_id = self.this_generator(this)?;
                let (value, done) = self.resume_generator(gen_id, GenRequest::Next(arg(0)))?;
                self.create_iter_result(value, done)
            }
            NativeFunction::GeneratorProtoReturn => {
                let gen_id = self.this_generator(this)?;
                let (value, done) = self.resume_generator(gen_id, GenRequest::Return(arg(0)))?;
                self.create_iter_result(value, done)
            }
            NativeFunction::GeneratorProtoThrow => {
                let gen_id = self.this_generator(this)?;
                let (value, done) = self.resume_generator(gen_id, GenRequest::Throw(arg(0)))?;
                self.create_iter_result(value, done)
            }

            NativeFunction::PromiseConstructor => {
                if new_target.is_none() {
                    return Err(RunError::type_error("Promise constructor requires 'new'"));
                }
                let executor = arg(0);
                if !self.is_callable(executor) {
                    return Err(RunError::type_error("Promise executor is not a function"));
                }
                let proto = self.realm.intrinsics.promise_prototype;
                let promise = self.alloc_object(JsObject::new(Some(proto), ObjectKind::Promise(PromiseData::pending())))?;
                let resolve = self.alloc_native_function(
                    NativeFunction::PromiseCapResolve,
                    WellKnown::Resolve.into(),
                    smallvec::smallvec![Value::Object(promise)],
                )?;
                let reject = self.alloc_native_function(
                    NativeFunction::PromiseCapReject,
                    WellKnown::Reject.into(),
                    smallvec::smallvec![Value::Object(promise)],
                )?;
                match self.call(executor, Value::Undefined, &[Value::Object(resolve), Value::Object(reject)]) {
                    Ok(_) => {}
                    Err(err) if err.is_catchable() => {
                        let pending = crate::error::PendingError::try_from(err).expect("checked catchable");
                        let reason = self.materialize_error(pending);
                        self.reject_promise(promise, reason)?;
                    }
                    Err(err) => return Err(err),
                }
                Ok(Value::Object(promise))
            }
            NativeFunction::PromiseResolve => {
                let promise = self.promise_resolve_value(arg(0))?;
                Ok(Value::Object(promise))
            }
            NativeFunction::PromiseProtoThen => {
                let Some(promise) = this.as_object() else {
                    return Err(RunError::type_error("Promise.prototype.then called on non-promise"));
                };
                if !matches!(self.heap.object(promise).kind, ObjectKind::Promise(_)) {
                    return Err(RunError::type_error("Promise.prototype.then called on non-promise"));
                }
                let capability = self.new_promise_capability()?;
                self.perform_then(promise, arg(0), arg(1), Some(capability))?;
                Ok(Value::Object(capability.promise))
            }
            NativeFunction::PromiseCapResolve => {
                let promise = self.slot_promise(func_obj);
                self.resolve_promise(promise, arg(0))?;
                Ok(Value::Undefined)
            }
            NativeFunction::PromiseCapReject => {
                let promise = self.slot_promise(func_obj);
                self.reject_promise(promise, arg(0))?;
                Ok(Value::Undefined)
            }

            NativeFunction::BigIntConstructor => {
                if new_target.is_some() {
                    return Err(RunError::type_error("BigInt is not a constructor"));
                }
                let primitive = self.to_primitive(arg(0), crate::operations::PrimitiveHint::Number)?;
                match primitive {
                    Value::BigInt(_) => Ok(primitive),
                    Value::Number(n) => {
                        let value = JsBigInt::from_f64(n)?;
                        self.alloc_big_int(value)
                    }
                    Value::Boolean(b) => self.alloc_big_int(JsBigInt::from_i64(i64::from(b))),
                    Value::String(_) | Value::IndexString(_) => {
                        let text = self.string_content(primitive)?;
                        let value = JsBigInt::from_str(&text)?;
                        self.alloc_big_int(value)
                    }
                    _ => Err(RunError::type_error("cannot convert value to a BigInt")),
                }
            }
            NativeFunction::BigIntAsIntN | NativeFunction::BigIntAsUintN => {
                let bits = self.to_number(arg(0))?;
                if bits < 0.0 || bits.trunc() != bits {
                    return Err(RunError::range_error("invalid BigInt width"));
                }
                let bits = bits.min(f64::from(u32::MAX)) as u32;
                let Value::BigInt(id) = arg(1) else {
                    return Err(RunError::type_error("argument is not a BigInt"));
                };
                let wrapped = if matches!(func, NativeFunction::BigIntAsIntN) {
                    self.heap.big_int(id).as_int_n(bits)
                } else {
                    self.heap.big_int(id).as_uint_n(bits)
                };
                self.alloc_big_int(wrapped)
            }

            NativeFunction::ProxyConstructor => {
                if new_target.is_none() {
                    return Err(RunError::type_error("Proxy constructor requires 'new'"));
                }
                let (Some(target), Some(handler)) = (arg(0).as_object(), arg(1).as_object()) else {
                    return Err(RunError::type_error("Proxy target and handler must be objects"));
                };
                let target_object = self.heap.object(target);
                let proxy = ProxyData {
                    target: Some(target),
                    handler: Some(handler),
                    callable: target_object.is_callable(),
                    constructable: target_object.is_constructor(),
                };
                let id = self.alloc_object(JsObject::new(None, ObjectKind::Proxy(proxy)))?;
                Ok(Value::Object(id))
            }

            NativeFunction::WeakRefConstructor => {
                let Some(target_value) = new_target else {
                    return Err(RunError::type_error("WeakRef constructor requires 'new'"));
                };
                let Some(referent) = arg(0).as_object() else {
                    return Err(RunError::type_error("WeakRef target must be an object"));
                };
                let proto = self.get(target_value, PropertyKey::Str(WellKnown::Prototype.into()))?;
                let proto = proto.as_object().unwrap_or(self.realm.intrinsics.object_prototype);
                let id = self.alloc_object(JsObject::new(Some(proto), ObjectKind::WeakRef { target: Some(referent) }))?;
                self.heap.register_weak_ref(id);
                Ok(Value::Object(id))
            }
            NativeFunction::WeakRefDeref => {
                let Some(obj) = this.as_object() else {
                    return Err(RunError::type_error("WeakRef.prototype.deref called on non-WeakRef"));
                };
                match self.heap.object(obj).kind {
                    ObjectKind::WeakRef { target: Some(referent) } => Ok(Value::Object(referent)),
                    ObjectKind::WeakRef { target: None } => Ok(Value::Undefined),
                    _ => Err(RunError::type_error("WeakRef.prototype.deref called on non-WeakRef")),
                }
            }

            NativeFunction::FinalizationRegistryConstructor => {
                let Some(target_value) = new_target else {
                    return Err(RunError::type_error("FinalizationRegistry constructor requires 'new'"));
                };
                let cleanup = arg(0);
                if !self.is_callable(cleanup) {
                    return Err(RunError::type_error("FinalizationRegistry cleanup must be callable"));
                }
                let proto = self.get(target_value, PropertyKey::Str(WellKnown::Prototype.into()))?;
                let proto = proto.as_object().unwrap_or(self.realm.intrinsics.object_prototype);
                let id = self.alloc_object(JsObject::new(
                    Some(proto),
                    ObjectKind::FinalizationRegistry(RegistryData {
                        cleanup,
                        cells: Vec::new(),
                    }),
                ))?;
                self.heap.register_registry(id);
                Ok(Value::Object(id))
            }
            NativeFunction::FinalizationRegistryRegister => {
                let Some(registry) = this.as_object() else {
                    return Err(RunError::type_error("register called on non-registry"));
                };
                let Some(target) = arg(0).as_object() else {
                    return Err(RunError::type_error("FinalizationRegistry target must be an object"));
                };
                let held = arg(1);
                let token = match arg(2) {
                    Value::Undefined => None,
                    token => Some(token),
                };
                match &mut self.heap.object_mut(registry).kind {
                    ObjectKind::FinalizationRegistry(data) => {
                        data.cells.push(RegistryCell { target, held, token });
                        Ok(Value::Undefined)
                    }
                    _ => Err(RunError::type_error("register called on non-registry")),
                }
            }
            NativeFunction::FinalizationRegistryUnregister => {
                let Some(registry) = this.as_object() else {
                    return Err(RunError::type_error("unregister called on non-registry"));
                };
                let token = arg(0);
                let mut removed = false;
                let cells = match &mut self.heap.object_mut(registry).kind {
                    ObjectKind::FinalizationRegistry(data) => std::mem::take(&mut data.cells),
                    _ => return Err(RunError::type_error("unregister called on non-registry")),
                };
                let kept: Vec<RegistryCell> = cells
                    .into_iter()
                    .filter(|cell| {
                        let matches = cell.token.is_some_and(|t| t.same_value(token, &self.heap));
                        removed |= matches;
                        !matches
                    })
                    .collect();
                if let ObjectKind::FinalizationRegistry(data) = &mut self.heap.object_mut(registry).kind {
                    data.cells = kept;
                }
                Ok(Value::Boolean(removed))
            }
        }
    }

    /// Renders a descriptor back as an ordinary object (public reflection).
    fn descriptor_to_object(&mut self, desc: &crate::object::PropertyDescriptor) -> RunResult<Value> {
        let proto = self.realm.intrinsics.object_prototype;
        let obj = self.alloc_object(JsObject::ordinary(Some(proto)))?;
        if let Some(value) = desc.value {
            self.create_data_property(obj, PropertyKey::Str(WellKnown::Value.into()), value)?;
            self.create_data_property(
                obj,
                PropertyKey::Str(WellKnown::Writable.into()),
                Value::Boolean(desc.writable.unwrap_or(false)),
            )?;
        } else {
            self.create_data_property(obj, PropertyKey::Str(WellKnown::Get.into()), desc.get.unwrap_or(Value::Undefined))?;
            self.create_data_property(obj, PropertyKey::Str(WellKnown::Set.into()), desc.set.unwrap_or(Value::Undefined))?;
        }
        self.create_data_property(
            obj,
            PropertyKey::Str(WellKnown::Enumerable.into()),
            Value::Boolean(desc.enumerable.unwrap_or(false)),
        )?;
        self.create_data_property(
            obj,
            PropertyKey::Str(WellKnown::Configurable.into()),
            Value::Boolean(desc.configurable.unwrap_or(false)),
        )?;
        Ok(Value::Object(obj))
    }

    fn this_generator(&self, this: Value) -> RunResult<HeapId> {
        let Some(obj) = this.as_object() else {
            return Err(RunError::type_error("generator method called on non-generator"));
        };
        match self.heap.object(obj).kind {
            ObjectKind::Generator { ctx } => Ok(ctx),
            _ => Err(RunError::type_error("generator method called on non-generator")),
        }
    }

    fn slot_promise(&self, func_obj: HeapId) -> HeapId {
        let ObjectKind::NativeFunction(data) = &self.heap.object(func_obj).kind else {
            unreachable!("native call carries its function object")
        };
        match data.slots.first() {
            Some(Value::Object(promise)) => *promise,
            _ => unreachable!("capability function carries its promise"),
        }
    }
}
