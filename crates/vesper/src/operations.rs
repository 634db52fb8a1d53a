//! The object-model operations and the conversions that may call script.
//!
//! These are the thirteen vtable ops of the object contract, dispatched on
//! the object's specialization: ordinary storage, array length handling,
//! string-object code units, integer-indexed views, and proxy traps with
//! their post-trap invariant checks. Call and construct live with the call
//! machinery in the vm module.

use crate::{
    conv::{number_to_string, string_to_number, to_array_length},
    error::{RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{PropertyKey, WellKnown},
    object::{
        ElementType, JsObject, ObjectKind, Property, PropertyDescriptor, PropertySlot, validate_and_apply,
    },
    resource::ResourceTracker,
    runtime::Runtime,
    stack::{IterKind, IteratorRecord},
    tracer::VmTracer,
    types::{JsBigInt, KeyList},
    value::Value,
};

/// The result of `ToNumeric`: the Number/BigInt fork every arithmetic
/// opcode branches on.
#[derive(Debug, Clone)]
pub(crate) enum Numeric {
    Number(f64),
    BigInt(JsBigInt),
}

impl<T: ResourceTracker, Tr: VmTracer> Runtime<T, Tr> {
    // =========================================================================
    // Prototype and extensibility
    // =========================================================================

    /// `[[GetPrototypeOf]]`.
    pub(crate) fn get_prototype_of(&mut self, obj: HeapId) -> RunResult<Option<HeapId>> {
        if let ObjectKind::Proxy(proxy) = &self.heap.object(obj).kind {
            let proxy = *proxy;
            let (target, handler) = self.proxy_parts(proxy)?;
            if let Some(trap) = self.get_method(Value::Object(handler), PropertyKey::Str(WellKnown::GetPrototypeOf.into()))? {
                let result = self.call(trap, Value::Object(handler), &[Value::Object(target)])?;
                let result_proto = match result {
                    Value::Null => None,
                    Value::Object(id) => Some(id),
                    _ => return Err(RunError::type_error("proxy getPrototypeOf trap must return an object or null")),
                };
                // Invariant: a non-extensible target pins its prototype.
                if !self.heap.object(target).extensible {
                    let target_proto = self.get_prototype_of(target)?;
                    if target_proto != result_proto {
                        return Err(RunError::type_error(
                            "proxy getPrototypeOf trap disagrees with non-extensible target",
                        ));
                    }
                }
                return Ok(result_proto);
            }
            return self.get_prototype_of(target);
        }
        Ok(self.heap.object(obj).proto)
    }

    /// `[[SetPrototypeOf]]`: rejects prototype cycles and changes to a
    /// non-extensible object.
    pub(crate) fn set_prototype_of(&mut self, obj: HeapId, proto: Option<HeapId>) -> RunResult<bool> {
        if let ObjectKind::Proxy(proxy) = &self.heap.object(obj).kind {
            let proxy = *proxy;
            let (target, handler) = self.proxy_parts(proxy)?;
            if let Some(trap) = self.get_method(Value::Object(handler), PropertyKey::Str(WellKnown::SetPrototypeOf.into()))? {
                let proto_value = proto.map_or(Value::Null, Value::Object);
                let result = self.call(trap, Value::Object(handler), &[Value::Object(target), proto_value])?;
                let ok = result.to_boolean(&self.heap);
                if ok && !self.heap.object(target).extensible {
                    let target_proto = self.get_prototype_of(target)?;
                    if target_proto != proto {
                        return Err(RunError::type_error(
                            "proxy setPrototypeOf trap disagrees with non-extensible target",
                        ));
                    }
                }
                return Ok(ok);
            }
            return self.set_prototype_of(target, proto);
        }

        let current = self.heap.object(obj).proto;
        if current == proto {
            return Ok(true);
        }
        if !self.heap.object(obj).extensible {
            return Ok(false);
        }
        // Walk the new chain; finding `obj` would close a cycle. The walk
        // stops at a proxy, whose getPrototypeOf may run script.
        let mut cursor = proto;
        while let Some(parent) = cursor {
            if parent == obj {
                return Ok(false);
            }
            if matches!(self.heap.object(parent).kind, ObjectKind::Proxy(_)) {
                break;
            }
            cursor = self.heap.object(parent).proto;
        }
        self.heap.object_mut(obj).proto = proto;
        Ok(true)
    }

    /// `[[IsExtensible]]`.
    pub(crate) fn is_extensible(&mut self, obj: HeapId) -> RunResult<bool> {
        if let ObjectKind::Proxy(proxy) = &self.heap.object(obj).kind {
            let proxy = *proxy;
            let (target, handler) = self.proxy_parts(proxy)?;
            if let Some(trap) = self.get_method(Value::Object(handler), PropertyKey::Str(WellKnown::IsExtensible.into()))? {
                let result = self.call(trap, Value::Object(handler), &[Value::Object(target)])?;
                let ok = result.to_boolean(&self.heap);
                if ok != self.is_extensible(target)? {
                    return Err(RunError::type_error("proxy isExtensible trap disagrees with target"));
                }
                return Ok(ok);
            }
            return self.is_extensible(target);
        }
        Ok(self.heap.object(obj).extensible)
    }

    /// `[[PreventExtensions]]`.
    pub(crate) fn prevent_extensions(&mut self, obj: HeapId) -> RunResult<bool> {
        if let ObjectKind::Proxy(proxy) = &self.heap.object(obj).kind {
            let proxy = *proxy;
            let (target, handler) = self.proxy_parts(proxy)?;
            if let Some(trap) = self.get_method(Value::Object(handler), PropertyKey::Str(WellKnown::PreventExtensions.into()))? {
                let result = self.call(trap, Value::Object(handler), &[Value::Object(target)])?;
                let ok = result.to_boolean(&self.heap);
                if ok && self.is_extensible(target)? {
                    return Err(RunError::type_error("proxy preventExtensions trap left target extensible"));
                }
                return Ok(ok);
            }
            return self.prevent_extensions(target);
        }
        self.heap.object_mut(obj).extensible = false;
        Ok(true)
    }

    // =========================================================================
    // Own properties
    // =========================================================================

    /// `[[GetOwnProperty]]`: a fully-populated descriptor or absent.
    pub(crate) fn get_own_property(&mut self, obj: HeapId, key: PropertyKey) -> RunResult<Option<PropertyDescriptor>> {
        match &self.heap.object(obj).kind {
            ObjectKind::Proxy(proxy) => {
                let proxy = *proxy;
                self.proxy_get_own_property(proxy, key)
            }
            ObjectKind::Array { length, length_writable } => {
                if key == PropertyKey::Str(WellKnown::Length.into()) {
                    return Ok(Some(PropertyDescriptor::data(
                        Value::Number(f64::from(*length)),
                        *length_writable,
                        false,
                        false,
                    )));
                }
                Ok(self.heap.object(obj).own_property(key).map(|p| p.to_descriptor()))
            }
            ObjectKind::StringObject { value } => {
                let string = self.heap.string(*value);
                match key {
                    PropertyKey::Index(index) => {
                        if let Some(ch) = string.char_at(index as usize) {
                            let char_value = self.alloc_string(ch.to_string())?;
                            return Ok(Some(PropertyDescriptor::data(char_value, false, true, false)));
                        }
                        Ok(self.heap.object(obj).own_property(key).map(|p| p.to_descriptor()))
                    }
                    PropertyKey::Str(s) if s == WellKnown::Length.into() => Ok(Some(PropertyDescriptor::data(
                        Value::Number(string.char_len() as f64),
                        false,
                        false,
                        false,
                    ))),
                    _ => Ok(self.heap.object(obj).own_property(key).map(|p| p.to_descriptor())),
                }
            }
            ObjectKind::TypedArray(view) => {
                let view = *view;
                match key {
                    PropertyKey::Index(index) => match self.typed_array_load(&view, index as usize)? {
                        Some(value) => Ok(Some(PropertyDescriptor::data(value, true, true, true))),
                        None => Ok(None),
                    },
                    _ => Ok(self.heap.object(obj).own_property(key).map(|p| p.to_descriptor())),
                }
            }
            _ => Ok(self.heap.object(obj).own_property(key).map(|p| p.to_descriptor())),
        }
    }

    /// `[[DefineOwnProperty]]`: the standard Validate+Apply with the exotic
    /// overrides for index keys.
    pub(crate) fn define_own_property(&mut self, obj: HeapId, key: PropertyKey, desc: &PropertyDescriptor) -> RunResult<bool> {
        match &self.heap.object(obj).kind {
            ObjectKind::Proxy(proxy) => {
                let proxy = *proxy;
                self.proxy_define_own_property(proxy, key, desc)
            }
            ObjectKind::Array { length, length_writable } => {
                let (length, length_writable) = (*length, *length_writable);
                if key == PropertyKey::Str(WellKnown::Length.into()) {
                    return self.array_set_length(obj, desc);
                }
                if let PropertyKey::Index(index) = key {
                    if index >= length && !length_writable {
                        return Ok(false);
                    }
                    return self.ordinary_define(obj, key, desc);
                }
                self.ordinary_define(obj, key, desc)
            }
            ObjectKind::StringObject { value } => {
                let string_id = *value;
                // Synthesized code-unit and length properties refuse changes.
                let len = self.heap.string(string_id).char_len();
                match key {
                    PropertyKey::Index(index) if (index as usize) < len => Ok(false),
                    PropertyKey::Str(s) if s == WellKnown::Length.into() => Ok(false),
                    _ => self.ordinary_define(obj, key, desc),
                }
            }
            ObjectKind::TypedArray(view) => {
                let view = *view;
                if let PropertyKey::Index(index) = key {
                    // Integer-indexed keys never become stored properties:
                    // accessors and attribute changes are refused, a value
                    // writes through.
                    if desc.is_accessor_descriptor()
                        || desc.configurable == Some(false)
                        || desc.enumerable == Some(false)
                        || desc.writable == Some(false)
                    {
                        return Ok(false);
                    }
                    if let Some(value) = desc.value {
                        self.typed_array_store(&view, index as usize, value)?;
                    }
                    return Ok(true);
                }
                self.ordinary_define(obj, key, desc)
            }
            _ => self.ordinary_define(obj, key, desc),
        }
    }

    fn ordinary_define(&mut self, obj: HeapId, key: PropertyKey, desc: &PropertyDescriptor) -> RunResult<bool> {
        let mut data = self.heap.take_data(obj);
        let applied = {
            let HeapData::Object(object) = &mut data else {
                unreachable!("define on non-object heap data")
            };
            let heap = &self.heap;
            validate_and_apply(object, key, desc, |a, b| a.same_value(b, heap))
        };
        self.heap.put_data(obj, data);
        Ok(applied)
    }

    /// The array `length` trap: truncation walks the dense part top-down,
    /// reporting the highest index that refused deletion.
    fn array_set_length(&mut self, obj: HeapId, desc: &PropertyDescriptor) -> RunResult<bool> {
        let (old_length, length_writable) = match self.heap.object(obj).kind {
            ObjectKind::Array { length, length_writable } => (length, length_writable),
            _ => unreachable!("array length define on non-array"),
        };
        let Some(value) = desc.value else {
            // Attribute-only change on the synthesized property.
            if desc.configurable == Some(true) || desc.enumerable == Some(true) || desc.is_accessor_descriptor() {
                return Ok(false);
            }
            if let Some(writable) = desc.writable {
                if writable && !length_writable {
                    return Ok(false);
                }
                if let ObjectKind::Array { length_writable, .. } = &mut self.heap.object_mut(obj).kind {
                    *length_writable = writable;
                }
            }
            return Ok(true);
        };
        if desc.configurable == Some(true) || desc.enumerable == Some(true) || desc.is_accessor_descriptor() {
            return Ok(false);
        }
        let number = self.to_number(value)?;
        let new_length =
            to_array_length(number).ok_or_else(|| RunError::range_error("invalid array length"))?;
        if !length_writable && new_length != old_length {
            return Ok(false);
        }
        let mut succeeded = true;
        let mut final_length = new_length;
        if new_length < old_length {
            // Delete from the top down; a non-configurable element stops the
            // truncation and its index + 1 becomes the length.
            let doomed: Vec<u32> = {
                let object = self.heap.object(obj);
                object
                    .indexed
                    .range(new_length..old_length)
                    .map(|(&index, property)| (index, property.configurable))
                    .rev()
                    .map_while(|(index, configurable)| if configurable { Some(index) } else { None })
                    .collect()
            };
            let stopped_at = {
                let object = self.heap.object(obj);
                object
                    .indexed
                    .range(new_length..old_length)
                    .rev()
                    .find(|(_, property)| !property.configurable)
                    .map(|(&index, _)| index)
            };
            let object = self.heap.object_mut(obj);
            for index in doomed {
                object.indexed.remove(&index);
            }
            if let Some(stopped_at) = stopped_at {
                final_length = stopped_at + 1;
                succeeded = false;
            }
        }
        if let ObjectKind::Array { length, length_writable } = &mut self.heap.object_mut(obj).kind {
            *length = final_length;
            if desc.writable == Some(false) {
                *length_writable = false;
            }
        }
        Ok(succeeded)
    }

    /// `[[HasProperty]]`: own or inherited.
    pub(crate) fn has_property(&mut self, obj: HeapId, key: PropertyKey) -> RunResult<bool> {
        if let ObjectKind::Proxy(proxy) = &self.heap.object(obj).kind {
            let proxy = *proxy;
            let (target, handler) = self.proxy_parts(proxy)?;
            if let Some(trap) = self.get_method(Value::Object(handler), PropertyKey::Str(WellKnown::Has.into()))? {
                let key_value = self.key_to_value(key)?;
                let result = self.call(trap, Value::Object(handler), &[Value::Object(target), key_value])?;
                let found = result.to_boolean(&self.heap);
                if !found
                    && let Some(own) = self.get_own_property(target, key)?
                    && own.configurable == Some(false)
                {
                    return Err(RunError::type_error("proxy has trap hides a non-configurable property"));
                }
                return Ok(found);
            }
            return self.has_property(target, key);
        }
        if self.get_own_property(obj, key)?.is_some() {
            return Ok(true);
        }
        match self.get_prototype_of(obj)? {
            Some(parent) => self.has_property(parent, key),
            None => Ok(false),
        }
    }

    /// `[[Delete]]`.
    pub(crate) fn delete_property(&mut self, obj: HeapId, key: PropertyKey) -> RunResult<bool> {
        match &self.heap.object(obj).kind {
            ObjectKind::Proxy(proxy) => {
                let proxy = *proxy;
                let (target, handler) = self.proxy_parts(proxy)?;
                if let Some(trap) =
                    self.get_method(Value::Object(handler), PropertyKey::Str(WellKnown::DeleteProperty.into()))?
                {
                    let key_value = self.key_to_value(key)?;
                    let result = self.call(trap, Value::Object(handler), &[Value::Object(target), key_value])?;
                    return Ok(result.to_boolean(&self.heap));
                }
                self.delete_property(target, key)
            }
            ObjectKind::Array { .. } if key == PropertyKey::Str(WellKnown::Length.into()) => Ok(false),
            ObjectKind::StringObject { value } => {
                let len = self.heap.string(*value).char_len();
                match key {
                    PropertyKey::Index(index) if (index as usize) < len => Ok(false),
                    PropertyKey::Str(s) if s == WellKnown::Length.into() => Ok(false),
                    _ => Ok(self.ordinary_delete(obj, key)),
                }
            }
            ObjectKind::TypedArray(view) => {
                let length = view.length;
                match key {
                    PropertyKey::Index(index) => Ok((index as usize) >= length),
                    _ => Ok(self.ordinary_delete(obj, key)),
                }
            }
            _ => Ok(self.ordinary_delete(obj, key)),
        }
    }

    fn ordinary_delete(&mut self, obj: HeapId, key: PropertyKey) -> bool {
        let object = self.heap.object_mut(obj);
        match object.own_property(key) {
            Some(property) if !property.configurable => false,
            Some(_) => {
                object.remove_own_property(key);
                true
            }
            None => true,
        }
    }

    /// `[[OwnPropertyKeys]]`: integer indices ascending, then strings in
    /// insertion order, then symbols in insertion order.
    pub(crate) fn own_property_keys(&mut self, obj: HeapId) -> RunResult<Vec<PropertyKey>> {
        match &self.heap.object(obj).kind {
            ObjectKind::Proxy(proxy) => {
                let proxy = *proxy;
                let (target, handler) = self.proxy_parts(proxy)?;
                if let Some(trap) = self.get_method(Value::Object(handler), PropertyKey::Str(WellKnown::OwnKeys.into()))? {
                    let result = self.call(trap, Value::Object(handler), &[Value::Object(target)])?;
                    let Some(array) = result.as_object() else {
                        return Err(RunError::type_error("proxy ownKeys trap must return an object"));
                    };
                    let length = self.array_like_length(array)?;
                    let mut keys = Vec::with_capacity(length);
                    for index in 0..length {
                        let entry = self.get(Value::Object(array), PropertyKey::Index(index as u32))?;
                        // Symbol entries are only reachable through this list
                        // until the caller stores them.
                        self.temp_roots.push(entry);
                        let key = entry.as_property_key(&self.heap, &mut self.interns).ok_or_else(|| {
                            RunError::type_error("proxy ownKeys trap entries must be strings or symbols")
                        })?;
                        keys.push(key);
                    }
                    return Ok(keys);
                }
                self.own_property_keys(target)
            }
            ObjectKind::Array { .. } => {
                let object = self.heap.object(obj);
                let mut keys = Vec::with_capacity(object.indexed.len() + object.named.len() + 1);
                keys.extend(object.indexed.keys().map(|&i| PropertyKey::Index(i)));
                keys.push(PropertyKey::Str(WellKnown::Length.into()));
                push_named_keys(object, &mut keys);
                Ok(keys)
            }
            ObjectKind::StringObject { value } => {
                let len = self.heap.string(*value).char_len() as u32;
                let object = self.heap.object(obj);
                let mut keys: Vec<PropertyKey> = (0..len).map(PropertyKey::Index).collect();
                keys.extend(object.indexed.keys().filter(|&&i| i >= len).map(|&i| PropertyKey::Index(i)));
                keys.push(PropertyKey::Str(WellKnown::Length.into()));
                push_named_keys(object, &mut keys);
                Ok(keys)
            }
            ObjectKind::TypedArray(view) => {
                let len = view.length as u32;
                let object = self.heap.object(obj);
                let mut keys: Vec<PropertyKey> = (0..len).map(PropertyKey::Index).collect();
                push_named_keys(object, &mut keys);
                Ok(keys)
            }
            _ => Ok(self.heap.object(obj).stored_own_keys()),
        }
    }

    // =========================================================================
    // Get / Set
    // =========================================================================

    /// `GetV`: property access on any value; primitives answer through
    /// their wrapper prototypes without allocating a wrapper.
    pub(crate) fn get(&mut self, value: Value, key: PropertyKey) -> RunResult<Value> {
        self.get_with_receiver(value, key, value)
    }

    pub(crate) fn get_with_receiver(&mut self, value: Value, key: PropertyKey, receiver: Value) -> RunResult<Value> {
        match value {
            Value::Object(obj) => self.object_get(obj, key, receiver),
            Value::String(_) | Value::IndexString(_) => {
                if let Some(result) = self.string_primitive_property(value, key)? {
                    return Ok(result);
                }
                let proto = self.realm.intrinsics.string_prototype;
                self.object_get(proto, key, receiver)
            }
            Value::Number(_) => {
                let proto = self.realm.intrinsics.number_prototype;
                self.object_get(proto, key, receiver)
            }
            Value::Boolean(_) => {
                let proto = self.realm.intrinsics.boolean_prototype;
                self.object_get(proto, key, receiver)
            }
            Value::Symbol(_) => {
                let proto = self.realm.intrinsics.symbol_prototype;
                self.object_get(proto, key, receiver)
            }
            Value::BigInt(_) => {
                let proto = self.realm.intrinsics.bigint_prototype;
                self.object_get(proto, key, receiver)
            }
            Value::Undefined | Value::Null => Err(RunError::type_error(format!(
                "cannot read properties of {kind} (reading '{key}')",
                kind = if value == Value::Null { "null" } else { "undefined" },
                key = self.render_key(key),
            ))),
            Value::PrivateName(_) => Err(RunError::type_error("private name is not an object")),
        }
    }

    /// `[[Get]]` with explicit receiver; walks the prototype chain and
    /// invokes accessors against the receiver.
    pub(crate) fn object_get(&mut self, obj: HeapId, key: PropertyKey, receiver: Value) -> RunResult<Value> {
        if let ObjectKind::Proxy(proxy) = &self.heap.object(obj).kind {
            let proxy = *proxy;
            return self.proxy_get(proxy, key, receiver);
        }
        match self.get_own_property(obj, key)? {
            Some(desc) => {
                if let Some(value) = desc.value {
                    return Ok(value);
                }
                match desc.get {
                    Some(Value::Undefined) | None => Ok(Value::Undefined),
                    Some(getter) => self.call(getter, receiver, &[]),
                }
            }
            None => match self.get_prototype_of(obj)? {
                Some(parent) => self.object_get(parent, key, receiver),
                None => Ok(Value::Undefined),
            },
        }
    }

    /// `[[Set]]` with receiver semantics: a data property found on the
    /// prototype chain creates an own property on the receiver; accessors
    /// run against the receiver.
    pub(crate) fn set(&mut self, obj: HeapId, key: PropertyKey, value: Value, receiver: Value) -> RunResult<bool> {
        if let ObjectKind::Proxy(proxy) = &self.heap.object(obj).kind {
            let proxy = *proxy;
            return self.proxy_set(proxy, key, value, receiver);
        }
        match self.get_own_property(obj, key)? {
            Some(own) => {
                if own.is_accessor_descriptor() {
                    return match own.set {
                        Some(Value::Undefined) | None => Ok(false),
                        Some(setter) => {
                            self.call(setter, receiver, &[value])?;
                            Ok(true)
                        }
                    };
                }
                if own.writable == Some(false) {
                    return Ok(false);
                }
                let Some(receiver_obj) = receiver.as_object() else {
                    return Ok(false);
                };
                if receiver_obj == obj {
                    return self.define_own_property(obj, key, &PropertyDescriptor {
                        value: Some(value),
                        ..PropertyDescriptor::default()
                    });
                }
                self.create_data_property_on_receiver(receiver_obj, key, value)
            }
            None => match self.get_prototype_of(obj)? {
                Some(parent) => self.set(parent, key, value, receiver),
                None => {
                    let Some(receiver_obj) = receiver.as_object() else {
                        return Ok(false);
                    };
                    self.create_data_property_on_receiver(receiver_obj, key, value)
                }
            },
        }
    }

    fn create_data_property_on_receiver(&mut self, receiver: HeapId, key: PropertyKey, value: Value) -> RunResult<bool> {
        match self.get_own_property(receiver, key)? {
            Some(existing) => {
                if existing.is_accessor_descriptor() || existing.writable == Some(false) {
                    return Ok(false);
                }
                self.define_own_property(receiver, key, &PropertyDescriptor {
                    value: Some(value),
                    ..PropertyDescriptor::default()
                })
            }
            None => self.define_own_property(receiver, key, &PropertyDescriptor::data(value, true, true, true)),
        }
    }

    /// `Set` with the strict-mode throw on failure.
    pub(crate) fn set_checked(&mut self, obj: HeapId, key: PropertyKey, value: Value, strict: bool) -> RunResult<()> {
        let ok = self.set(obj, key, value, Value::Object(obj))?;
        if !ok && strict {
            return Err(RunError::type_error(format!(
                "cannot assign to read only property '{key}'",
                key = self.render_key(key)
            )));
        }
        Ok(())
    }

    /// CreateDataPropertyOrThrow.
    pub(crate) fn create_data_property(&mut self, obj: HeapId, key: PropertyKey, value: Value) -> RunResult<()> {
        let ok = self.define_own_property(obj, key, &PropertyDescriptor::data(value, true, true, true))?;
        if !ok {
            return Err(RunError::type_error(format!(
                "cannot define property '{key}'",
                key = self.render_key(key)
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Private members
    // =========================================================================

    pub(crate) fn private_get(&mut self, obj: HeapId, name: HeapId) -> RunResult<Value> {
        let Some(property) = self.heap.object(obj).own_property(PropertyKey::Private(name)).copied() else {
            return Err(self.private_error(name, "read"));
        };
        match property.slot {
            PropertySlot::Data { value, .. } => Ok(value),
            PropertySlot::Accessor { get, .. } => match get {
                Value::Undefined => Err(self.private_error(name, "get")),
                getter => self.call(getter, Value::Object(obj), &[]),
            },
        }
    }

    pub(crate) fn private_set(&mut self, obj: HeapId, name: HeapId, value: Value) -> RunResult<()> {
        let Some(property) = self.heap.object(obj).own_property(PropertyKey::Private(name)).copied() else {
            return Err(self.private_error(name, "write"));
        };
        match property.slot {
            PropertySlot::Data { writable, .. } => {
                if !writable {
                    return Err(self.private_error(name, "write"));
                }
                let object = self.heap.object_mut(obj);
                object.set_own_property(
                    PropertyKey::Private(name),
                    Property {
                        slot: PropertySlot::Data { value, writable },
                        ..property
                    },
                );
                Ok(())
            }
            PropertySlot::Accessor { set, .. } => match set {
                Value::Undefined => Err(self.private_error(name, "set")),
                setter => {
                    self.call(setter, Value::Object(obj), &[value])?;
                    Ok(())
                }
            },
        }
    }

    fn private_error(&self, name: HeapId, action: &str) -> RunError {
        let description = match self.heap.get(name) {
            HeapData::PrivateName(private) => self.interns.get(private.description).to_owned(),
            _ => "#<unknown>".to_owned(),
        };
        RunError::type_error(format!("cannot {action} private member {description} on this object"))
    }

    // =========================================================================
    // Proxy plumbing
    // =========================================================================

    /// A revoked proxy (null handler) throws on every operation.
    fn proxy_parts(&self, proxy: crate::object::ProxyData) -> RunResult<(HeapId, HeapId)> {
        match (proxy.target, proxy.handler) {
            (Some(target), Some(handler)) => Ok((target, handler)),
            _ => Err(RunError::type_error("cannot perform operation on a revoked proxy")),
        }
    }

    fn proxy_get(&mut self, proxy: crate::object::ProxyData, key: PropertyKey, receiver: Value) -> RunResult<Value> {
        let (target, handler) = self.proxy_parts(proxy)?;
        let Some(trap) = self.get_method(Value::Object(handler), PropertyKey::Str(WellKnown::Get.into()))? else {
            return self.object_get(target, key, receiver);
        };
        let key_value = self.key_to_value(key)?;
        let result = self.call(trap, Value::Object(handler), &[Value::Object(target), key_value, receiver])?;
        // Invariant: a non-configurable non-writable data property reports
        // its actual value.
        if let Some(own) = self.get_own_property(target, key)?
            && own.configurable == Some(false)
            && own.writable == Some(false)
            && let Some(expected) = own.value
            && !result.same_value(expected, &self.heap)
        {
            return Err(RunError::type_error("proxy get trap disagrees with non-configurable data property"));
        }
        Ok(result)
    }

    fn proxy_set(&mut self, proxy: crate::object::ProxyData, key: PropertyKey, value: Value, receiver: Value) -> RunResult<bool> {
        let (target, handler) = self.proxy_parts(proxy)?;
        let Some(trap) = self.get_method(Value::Object(handler), PropertyKey::Str(WellKnown::Set.into()))? else {
            return self.set(target, key, value, receiver);
        };
        let key_value = self.key_to_value(key)?;
        let result = self.call(
            trap,
            Value::Object(handler),
            &[Value::Object(target), key_value, value, receiver],
        )?;
        let ok = result.to_boolean(&self.heap);
        if ok
            && let Some(own) = self.get_own_property(target, key)?
            && own.configurable == Some(false)
            && own.writable == Some(false)
            && let Some(expected) = own.value
            && !value.same_value(expected, &self.heap)
        {
            return Err(RunError::type_error("proxy set trap disagrees with non-configurable data property"));
        }
        Ok(ok)
    }

    fn proxy_get_own_property(&mut self, proxy: crate::object::ProxyData, key: PropertyKey) -> RunResult<Option<PropertyDescriptor>> {
        let (target, handler) = self.proxy_parts(proxy)?;
        let Some(trap) = self.get_method(
            Value::Object(handler),
            PropertyKey::Str(WellKnown::GetOwnPropertyDescriptor.into()),
        )?
        else {
            return self.get_own_property(target, key);
        };
        let key_value = self.key_to_value(key)?;
        let result = self.call(trap, Value::Object(handler), &[Value::Object(target), key_value])?;
        match result {
            Value::Undefined => {
                if let Some(own) = self.get_own_property(target, key)?
                    && own.configurable == Some(false)
                {
                    return Err(RunError::type_error("proxy trap hides a non-configurable property"));
                }
                Ok(None)
            }
            Value::Object(desc_obj) => Ok(Some(self.to_property_descriptor(desc_obj)?)),
            _ => Err(RunError::type_error("proxy getOwnPropertyDescriptor trap must return an object or undefined")),
        }
    }

    fn proxy_define_own_property(&mut self, proxy: crate::object::ProxyData, key: PropertyKey, desc: &PropertyDescriptor) -> RunResult<bool> {
        let (target, handler) = self.proxy_parts(proxy)?;
        let Some(trap) = self.get_method(Value::Object(handler), PropertyKey::Str(WellKnown::DefineProperty.into()))?
        else {
            return self.define_own_property(target, key, desc);
        };
        let key_value = self.key_to_value(key)?;
        let desc_obj = self.from_property_descriptor(desc)?;
        let result = self.call(trap, Value::Object(handler), &[Value::Object(target), key_value, desc_obj])?;
        Ok(result.to_boolean(&self.heap))
    }

    /// Builds a descriptor object from a descriptor (for the defineProperty trap).
    fn from_property_descriptor(&mut self, desc: &PropertyDescriptor) -> RunResult<Value> {
        let proto = self.realm.intrinsics.object_prototype;
        let obj = self.alloc_object(JsObject::ordinary(Some(proto)))?;
        if let Some(value) = desc.value {
            self.create_data_property(obj, PropertyKey::Str(WellKnown::Value.into()), value)?;
        }
        if let Some(writable) = desc.writable {
            self.create_data_property(obj, PropertyKey::Str(WellKnown::Writable.into()), Value::Boolean(writable))?;
        }
        if let Some(get) = desc.get {
            self.create_data_property(obj, PropertyKey::Str(WellKnown::Get.into()), get)?;
        }
        if let Some(set) = desc.set {
            self.create_data_property(obj, PropertyKey::Str(WellKnown::Set.into()), set)?;
        }
        if let Some(enumerable) = desc.enumerable {
            self.create_data_property(obj, PropertyKey::Str(WellKnown::Enumerable.into()), Value::Boolean(enumerable))?;
        }
        if let Some(configurable) = desc.configurable {
            self.create_data_property(
                obj,
                PropertyKey::Str(WellKnown::Configurable.into()),
                Value::Boolean(configurable),
            )?;
        }
        Ok(Value::Object(obj))
    }

    /// Reads a descriptor object into a descriptor (defineProperty input).
    pub(crate) fn to_property_descriptor(&mut self, obj: HeapId) -> RunResult<PropertyDescriptor> {
        let mut desc = PropertyDescriptor::default();
        let read = |rt: &mut Self, name: WellKnown| -> RunResult<Option<Value>> {
            let key = PropertyKey::Str(name.into());
            if rt.has_property(obj, key)? {
                Ok(Some(rt.get(Value::Object(obj), key)?))
            } else {
                Ok(None)
            }
        };
        if let Some(value) = read(self, WellKnown::Value)? {
            desc.value = Some(value);
        }
        if let Some(writable) = read(self, WellKnown::Writable)? {
            desc.writable = Some(writable.to_boolean(&self.heap));
        }
        if let Some(get) = read(self, WellKnown::Get)? {
            if get != Value::Undefined && !self.is_callable(get) {
                return Err(RunError::type_error("descriptor getter must be callable"));
            }
            desc.get = Some(get);
        }
        if let Some(set) = read(self, WellKnown::Set)? {
            if set != Value::Undefined && !self.is_callable(set) {
                return Err(RunError::type_error("descriptor setter must be callable"));
            }
            desc.set = Some(set);
        }
        if let Some(enumerable) = read(self, WellKnown::Enumerable)? {
            desc.enumerable = Some(enumerable.to_boolean(&self.heap));
        }
        if let Some(configurable) = read(self, WellKnown::Configurable)? {
            desc.configurable = Some(configurable.to_boolean(&self.heap));
        }
        if desc.is_accessor_descriptor() && desc.is_data_descriptor() {
            return Err(RunError::type_error("descriptor cannot be both data and accessor"));
        }
        Ok(desc)
    }

    // =========================================================================
    // Typed array memory
    // =========================================================================

    /// A "valid integer index" load; `None` for out-of-range or detached.
    fn typed_array_load(&mut self, view: &crate::object::TypedArrayView, index: usize) -> RunResult<Option<Value>> {
        if index >= view.length {
            return Ok(None);
        }
        let elem = view.elem;
        let offset = view.byte_offset + index * elem.byte_size();
        let bytes = match &self.heap.object(view.buffer).kind {
            ObjectKind::ArrayBuffer(buffer) => {
                if buffer.detached {
                    return Ok(None);
                }
                &buffer.bytes[offset..offset + elem.byte_size()]
            }
            _ => return Ok(None),
        };
        let value = match elem {
            ElementType::Int8 => Value::Number(f64::from(bytes[0] as i8)),
            ElementType::Uint8 | ElementType::Uint8Clamped => Value::Number(f64::from(bytes[0])),
            ElementType::Int16 => Value::Number(f64::from(i16::from_le_bytes([bytes[0], bytes[1]]))),
            ElementType::Uint16 => Value::Number(f64::from(u16::from_le_bytes([bytes[0], bytes[1]]))),
            ElementType::Int32 => {
                Value::Number(f64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])))
            }
            ElementType::Uint32 => {
                Value::Number(f64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])))
            }
            ElementType::Float32 => {
                Value::Number(f64::from(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])))
            }
            ElementType::Float64 => Value::Number(f64::from_le_bytes(
                bytes.try_into().expect("element size checked"),
            )),
            ElementType::BigInt64 => {
                let raw = i64::from_le_bytes(bytes.try_into().expect("element size checked"));
                return Ok(Some(self.alloc_big_int(JsBigInt::from_i64(raw))?));
            }
            ElementType::BigUint64 => {
                let raw = u64::from_le_bytes(bytes.try_into().expect("element size checked"));
                return Ok(Some(self.alloc_big_int(JsBigInt::from_u64(raw))?));
            }
        };
        Ok(Some(value))
    }

    /// A typed store; invalid indices are silent no-ops, but value coercion
    /// runs (and can throw) first.
    fn typed_array_store(&mut self, view: &crate::object::TypedArrayView, index: usize, value: Value) -> RunResult<()> {
        let elem = view.elem;
        let raw: [u8; 8];
        let len = elem.byte_size();
        if elem.is_big_int() {
            let Value::BigInt(id) = value else {
                return Err(RunError::type_error("cannot convert value to BigInt element"));
            };
            let wrapped = self.heap.big_int(id).as_uint_n(64);
            let bits = wrapped
                .0
                .iter_u64_digits()
                .next()
                .unwrap_or(0);
            raw = bits.to_le_bytes();
        } else {
            let number = self.to_number(value)?;
            raw = match elem {
                ElementType::Int8 => [(crate::conv::to_int32(number) as i8) as u8, 0, 0, 0, 0, 0, 0, 0],
                ElementType::Uint8 => [(crate::conv::to_uint32(number) as u8), 0, 0, 0, 0, 0, 0, 0],
                ElementType::Uint8Clamped => {
                    let clamped = if number.is_nan() { 0.0 } else { number.clamp(0.0, 255.0).round() };
                    [clamped as u8, 0, 0, 0, 0, 0, 0, 0]
                }
                ElementType::Int16 => {
                    let v = (crate::conv::to_int32(number) as i16).to_le_bytes();
                    [v[0], v[1], 0, 0, 0, 0, 0, 0]
                }
                ElementType::Uint16 => {
                    let v = (crate::conv::to_uint32(number) as u16).to_le_bytes();
                    [v[0], v[1], 0, 0, 0, 0, 0, 0]
                }
                ElementType::Int32 => {
                    let v = crate::conv::to_int32(number).to_le_bytes();
                    [v[0], v[1], v[2], v[3], 0, 0, 0, 0]
                }
                ElementType::Uint32 => {
                    let v = crate::conv::to_uint32(number).to_le_bytes();
                    [v[0], v[1], v[2], v[3], 0, 0, 0, 0]
                }
                ElementType::Float32 => {
                    let v = (number as f32).to_le_bytes();
                    [v[0], v[1], v[2], v[3], 0, 0, 0, 0]
                }
                ElementType::Float64 => number.to_le_bytes(),
                ElementType::BigInt64 | ElementType::BigUint64 => unreachable!("handled above"),
            };
        }
        if index >= view.length {
            return Ok(());
        }
        let offset = view.byte_offset + index * len;
        if let ObjectKind::ArrayBuffer(buffer) = &mut self.heap.object_mut(view.buffer).kind
            && !buffer.detached
        {
            buffer.bytes[offset..offset + len].copy_from_slice(&raw[..len]);
        }
        Ok(())
    }

    // =========================================================================
    // Conversions that can call script
    // =========================================================================

    pub(crate) fn is_callable(&self, value: Value) -> bool {
        value
            .as_object()
            .is_some_and(|id| self.heap.object(id).is_callable())
    }

    pub(crate) fn is_constructor(&self, value: Value) -> bool {
        value
            .as_object()
            .is_some_and(|id| self.heap.object(id).is_constructor())
    }

    /// GetMethod: undefined/null is absent, non-callable is a TypeError.
    pub(crate) fn get_method(&mut self, value: Value, key: PropertyKey) -> RunResult<Option<Value>> {
        let method = self.get(value, key)?;
        if method.is_nullish() {
            return Ok(None);
        }
        if !self.is_callable(method) {
            return Err(RunError::type_error(format!(
                "property '{key}' is not a function",
                key = self.render_key(key)
            )));
        }
        Ok(Some(method))
    }

    /// ToPrimitive with the given hint.
    pub(crate) fn to_primitive(&mut self, value: Value, hint: PrimitiveHint) -> RunResult<Value> {
        let Some(obj) = value.as_object() else {
            return Ok(value);
        };
        let exotic = self.get_method(value, PropertyKey::Symbol(self.realm.intrinsics.symbol_to_primitive))?;
        if let Some(exotic) = exotic {
            let hint_value = self.alloc_string(hint.as_str())?;
            let result = self.call(exotic, value, &[hint_value])?;
            if !result.is_object() {
                return Ok(result);
            }
            return Err(RunError::type_error("Symbol.toPrimitive returned an object"));
        }
        let methods: [WellKnown; 2] = match hint {
            PrimitiveHint::String => [WellKnown::ToString, WellKnown::ValueOf],
            PrimitiveHint::Number | PrimitiveHint::Default => [WellKnown::ValueOf, WellKnown::ToString],
        };
        for name in methods {
            let method = self.get(Value::Object(obj), PropertyKey::Str(name.into()))?;
            if self.is_callable(method) {
                let result = self.call(method, value, &[])?;
                if !result.is_object() {
                    return Ok(result);
                }
            }
        }
        Err(RunError::type_error("cannot convert object to primitive value"))
    }

    pub(crate) fn to_number(&mut self, value: Value) -> RunResult<f64> {
        match value {
            Value::Undefined => Ok(f64::NAN),
            Value::Null => Ok(0.0),
            Value::Boolean(b) => Ok(if b { 1.0 } else { 0.0 }),
            Value::Number(n) => Ok(n),
            Value::IndexString(i) => Ok(f64::from(i)),
            Value::String(id) => Ok(string_to_number(self.heap.string(id).as_str())),
            Value::Symbol(_) | Value::PrivateName(_) => Err(RunError::type_error("cannot convert a Symbol to a number")),
            Value::BigInt(_) => Err(RunError::type_error("cannot convert a BigInt to a number")),
            Value::Object(_) => {
                let primitive = self.to_primitive(value, PrimitiveHint::Number)?;
                self.to_number(primitive)
            }
        }
    }

    /// ToNumeric: the Number/BigInt fork.
    pub(crate) fn to_numeric(&mut self, value: Value) -> RunResult<Numeric> {
        let primitive = self.to_primitive(value, PrimitiveHint::Number)?;
        match primitive {
            Value::BigInt(id) => Ok(Numeric::BigInt(self.heap.big_int(id).clone())),
            other => Ok(Numeric::Number(self.to_number(other)?)),
        }
    }

    /// ToString, producing a string value.
    pub(crate) fn to_string_value(&mut self, value: Value) -> RunResult<Value> {
        match value {
            Value::String(_) | Value::IndexString(_) => Ok(value),
            Value::Undefined => self.alloc_string("undefined"),
            Value::Null => self.alloc_string("null"),
            Value::Boolean(b) => self.alloc_string(if b { "true" } else { "false" }),
            Value::Number(n) => self.alloc_string(number_to_string(n)),
            Value::BigInt(id) => {
                let text = self.heap.big_int(id).to_decimal();
                self.alloc_string(text)
            }
            Value::Symbol(_) | Value::PrivateName(_) => Err(RunError::type_error("cannot convert a Symbol to a string")),
            Value::Object(_) => {
                let primitive = self.to_primitive(value, PrimitiveHint::String)?;
                self.to_string_value(primitive)
            }
        }
    }

    /// The Rust-side text of a string value.
    pub(crate) fn string_content(&mut self, value: Value) -> RunResult<String> {
        match value {
            Value::String(id) => Ok(self.heap.string(id).as_str().to_owned()),
            Value::IndexString(i) => Ok(i.to_string()),
            other => {
                let string = self.to_string_value(other)?;
                self.string_content(string)
            }
        }
    }

    /// ToObject: wraps primitives, throws on undefined/null.
    pub(crate) fn to_object(&mut self, value: Value) -> RunResult<HeapId> {
        let (proto, kind) = match value {
            Value::Object(id) => return Ok(id),
            Value::Undefined | Value::Null => {
                return Err(RunError::type_error("cannot convert undefined or null to object"));
            }
            Value::Boolean(_) => (self.realm.intrinsics.boolean_prototype, ObjectKind::PrimitiveWrapper(value)),
            Value::Number(_) => (self.realm.intrinsics.number_prototype, ObjectKind::PrimitiveWrapper(value)),
            Value::Symbol(_) | Value::PrivateName(_) => {
                (self.realm.intrinsics.symbol_prototype, ObjectKind::PrimitiveWrapper(value))
            }
            Value::BigInt(_) => (self.realm.intrinsics.bigint_prototype, ObjectKind::PrimitiveWrapper(value)),
            Value::String(id) => (self.realm.intrinsics.string_prototype, ObjectKind::StringObject { value: id }),
            Value::IndexString(i) => {
                let Value::String(id) = self.alloc_string(i.to_string())? else {
                    unreachable!("alloc_string returns a string")
                };
                (self.realm.intrinsics.string_prototype, ObjectKind::StringObject { value: id })
            }
        };
        self.alloc_object(JsObject::new(Some(proto), kind))
    }

    /// ToPropertyKey: primitive conversion, then string or symbol.
    pub(crate) fn to_property_key(&mut self, value: Value) -> RunResult<PropertyKey> {
        let primitive = self.to_primitive(value, PrimitiveHint::String)?;
        if let Some(key) = primitive.as_property_key(&self.heap, &mut self.interns) {
            return Ok(key);
        }
        let text = self.string_content(primitive)?;
        Ok(self.interns.string_to_key(&text))
    }

    /// Loose equality (`==`).
    pub(crate) fn loose_equals(&mut self, a: Value, b: Value) -> RunResult<bool> {
        if a.is_nullish() && b.is_nullish() {
            return Ok(true);
        }
        if a.is_nullish() || b.is_nullish() {
            return Ok(false);
        }
        match (a, b) {
            (Value::Object(_), Value::Object(_)) => Ok(a.strict_equals(b, &self.heap)),
            (Value::Object(_), _) => {
                self.temp_roots.push(b);
                let primitive = self.to_primitive(a, PrimitiveHint::Default)?;
                self.loose_equals(primitive, b)
            }
            (_, Value::Object(_)) => {
                self.temp_roots.push(a);
                let primitive = self.to_primitive(b, PrimitiveHint::Default)?;
                self.loose_equals(a, primitive)
            }
            (Value::Boolean(x), _) => self.loose_equals(Value::Number(if x { 1.0 } else { 0.0 }), b),
            (_, Value::Boolean(y)) => self.loose_equals(a, Value::Number(if y { 1.0 } else { 0.0 })),
            (Value::Number(n), other) | (other, Value::Number(n)) if other.is_string() => {
                let text = self.string_content(other)?;
                Ok(n == string_to_number(&text))
            }
            (Value::BigInt(id), other) | (other, Value::BigInt(id)) if other.is_string() => {
                let text = self.string_content(other)?;
                match JsBigInt::from_str(&text) {
                    Ok(parsed) => Ok(self.heap.big_int(id) == &parsed),
                    Err(_) => Ok(false),
                }
            }
            (Value::BigInt(id), Value::Number(n)) | (Value::Number(n), Value::BigInt(id)) => {
                Ok(self.heap.big_int(id).compare_f64(n) == Some(std::cmp::Ordering::Equal))
            }
            _ => Ok(a.strict_equals(b, &self.heap)),
        }
    }

    /// `instanceof`, honoring `Symbol.hasInstance`.
    pub(crate) fn instance_of(&mut self, value: Value, target: Value) -> RunResult<bool> {
        let Some(target_obj) = target.as_object() else {
            return Err(RunError::type_error("right-hand side of 'instanceof' is not an object"));
        };
        self.temp_roots.push(value);
        let has_instance = self.get_method(target, PropertyKey::Symbol(self.realm.intrinsics.symbol_has_instance))?;
        if let Some(has_instance) = has_instance {
            let result = self.call(has_instance, target, &[value])?;
            return Ok(result.to_boolean(&self.heap));
        }
        if !self.heap.object(target_obj).is_callable() {
            return Err(RunError::type_error("right-hand side of 'instanceof' is not callable"));
        }
        // OrdinaryHasInstance: walk the value's chain against
        // target.prototype, through bound functions.
        let target = match &self.heap.object(target_obj).kind {
            ObjectKind::BoundFunction(bound) => bound.target,
            _ => target,
        };
        let prototype = self.get(target, PropertyKey::Str(WellKnown::Prototype.into()))?;
        let Some(prototype) = prototype.as_object() else {
            return Err(RunError::type_error("constructor prototype is not an object"));
        };
        let Some(mut cursor) = value.as_object() else {
            return Ok(false);
        };
        loop {
            match self.get_prototype_of(cursor)? {
                Some(parent) if parent == prototype => return Ok(true),
                Some(parent) => cursor = parent,
                None => return Ok(false),
            }
        }
    }

    // =========================================================================
    // Iteration protocol
    // =========================================================================

    /// GetIterator.
    pub(crate) fn get_iterator(&mut self, value: Value, kind: IterKind) -> RunResult<IteratorRecord> {
        let method = match kind {
            IterKind::Async => {
                match self.get_method(value, PropertyKey::Symbol(self.realm.intrinsics.symbol_async_iterator))? {
                    Some(method) => Some(method),
                    // Fall back to the sync iterator; its results are awaited
                    // by the async for-step.
                    None => self.get_method(value, PropertyKey::Symbol(self.realm.intrinsics.symbol_iterator))?,
                }
            }
            IterKind::Sync => self.get_method(value, PropertyKey::Symbol(self.realm.intrinsics.symbol_iterator))?,
        };
        let Some(method) = method else {
            return Err(RunError::type_error(format!(
                "{type_name} is not iterable",
                type_name = value.type_of(&self.heap)
            )));
        };
        let iterator = self.call(method, value, &[])?;
        if !iterator.is_object() {
            return Err(RunError::type_error("iterator result is not an object"));
        }
        let next_method = self.get(iterator, PropertyKey::Str(WellKnown::Next.into()))?;
        Ok(IteratorRecord {
            iterator,
            next_method,
            done: false,
            kind,
        })
    }

    /// IteratorStep: `Some(value)` or `None` when done.
    pub(crate) fn iterator_step(&mut self, record: &mut IteratorRecord) -> RunResult<Option<Value>> {
        let result = self.call(record.next_method, record.iterator, &[])?;
        let Some(result_obj) = result.as_object() else {
            record.done = true;
            return Err(RunError::type_error("iterator result is not an object"));
        };
        let done = self.get(Value::Object(result_obj), PropertyKey::Str(WellKnown::Done.into()))?;
        if done.to_boolean(&self.heap) {
            record.done = true;
            return Ok(None);
        }
        let value = self.get(Value::Object(result_obj), PropertyKey::Str(WellKnown::Value.into()))?;
        Ok(Some(value))
    }

    /// IteratorClose: calls `return` on an abandoned iterator. When the
    /// close runs during an error unwind the original error wins; otherwise
    /// close errors propagate.
    pub(crate) fn iterator_close(&mut self, record: &IteratorRecord, swallow_errors: bool) -> RunResult<()> {
        if record.done {
            return Ok(());
        }
        let method = match self.get_method(record.iterator, PropertyKey::Str(WellKnown::Return.into())) {
            Ok(method) => method,
            Err(err) => return if swallow_errors { Ok(()) } else { Err(err) },
        };
        if let Some(method) = method {
            match self.call(method, record.iterator, &[]) {
                Ok(result) => {
                    if !swallow_errors && !result.is_object() {
                        return Err(RunError::type_error("iterator return result is not an object"));
                    }
                }
                Err(err) => {
                    if !swallow_errors {
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }

    /// CreateIterResultObject.
    pub(crate) fn create_iter_result(&mut self, value: Value, done: bool) -> RunResult<Value> {
        let proto = self.realm.intrinsics.object_prototype;
        let obj = self.alloc_object(JsObject::ordinary(Some(proto)))?;
        self.create_data_property(obj, PropertyKey::Str(WellKnown::Value.into()), value)?;
        self.create_data_property(obj, PropertyKey::Str(WellKnown::Done.into()), Value::Boolean(done))?;
        Ok(Value::Object(obj))
    }

    /// Builds the for-in key list: enumerable string keys, own chain first,
    /// shadowed names once.
    pub(crate) fn enumerate_keys(&mut self, value: Value) -> RunResult<HeapId> {
        let mut list = KeyList::default();
        if !value.is_nullish() {
            let mut cursor = Some(self.to_object(value)?);
            while let Some(obj) = cursor {
                for key in self.own_property_keys(obj)? {
                    if matches!(key, PropertyKey::Symbol(_) | PropertyKey::Private(_)) {
                        continue;
                    }
                    if let Some(desc) = self.get_own_property(obj, key)?
                        && desc.enumerable == Some(true)
                    {
                        list.push_unique(key);
                    }
                }
                cursor = self.get_prototype_of(obj)?;
            }
        }
        self.alloc(HeapData::KeyList(list))
    }

    // =========================================================================
    // Small helpers
    // =========================================================================

    /// Array construction from a value slice.
    pub(crate) fn new_array_from(&mut self, values: &[Value]) -> RunResult<HeapId> {
        let mut array = JsObject::array(Some(self.realm.intrinsics.array_prototype));
        for (index, &value) in values.iter().enumerate() {
            array.set_own_property(
                PropertyKey::Index(u32::try_from(index).expect("array too large")),
                Property::data(value, true, true, true),
            );
        }
        self.alloc_object(array)
    }

    /// `length` of an array-like, clamped to usize.
    pub(crate) fn array_like_length(&mut self, obj: HeapId) -> RunResult<usize> {
        let length = self.get(Value::Object(obj), PropertyKey::Str(WellKnown::Length.into()))?;
        let number = self.to_number(length)?;
        Ok(if number.is_nan() || number <= 0.0 {
            0
        } else {
            number.min(9_007_199_254_740_991.0) as usize
        })
    }

    /// A property key as a value (for trap arguments).
    pub(crate) fn key_to_value(&mut self, key: PropertyKey) -> RunResult<Value> {
        match key {
            PropertyKey::Index(index) => Ok(Value::IndexString(index)),
            PropertyKey::Str(id) => self.alloc_string(self.interns.get(id).to_owned()),
            PropertyKey::Symbol(id) => Ok(Value::Symbol(id)),
            PropertyKey::Private(id) => Ok(Value::PrivateName(id)),
        }
    }

    /// Key rendering for error messages.
    pub(crate) fn render_key(&self, key: PropertyKey) -> String {
        match key {
            PropertyKey::Index(index) => index.to_string(),
            PropertyKey::Str(id) => self.interns.get(id).to_owned(),
            PropertyKey::Symbol(id) => match self.heap.symbol(id).description {
                Some(d) => format!("Symbol({name})", name = self.interns.get(d)),
                None => "Symbol()".to_owned(),
            },
            PropertyKey::Private(id) => match self.heap.get(id) {
                HeapData::PrivateName(p) => self.interns.get(p.description).to_owned(),
                _ => "#<private>".to_owned(),
            },
        }
    }

    /// String primitive fast path: `length` and code-unit indices without a
    /// wrapper allocation.
    fn string_primitive_property(&mut self, value: Value, key: PropertyKey) -> RunResult<Option<Value>> {
        let text: String = match value {
            Value::String(id) => self.heap.string(id).as_str().to_owned(),
            Value::IndexString(i) => i.to_string(),
            _ => unreachable!("string primitive property on non-string"),
        };
        match key {
            PropertyKey::Str(s) if s == WellKnown::Length.into() => {
                Ok(Some(Value::Number(text.chars().count() as f64)))
            }
            PropertyKey::Index(index) => match text.chars().nth(index as usize) {
                Some(ch) => Ok(Some(self.alloc_string(ch.to_string())?)),
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }
}

/// ToPrimitive hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PrimitiveHint {
    Default,
    Number,
    String,
}

impl PrimitiveHint {
    fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Number => "number",
            Self::String => "string",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ArrayBufferData, TypedArrayView};

    fn typed_array_fixture(rt: &mut Runtime) -> HeapId {
        let buffer = rt
            .alloc_object(JsObject::new(
                None,
                ObjectKind::ArrayBuffer(ArrayBufferData {
                    bytes: vec![0; 16],
                    detached: false,
                }),
            ))
            .unwrap();
        rt.alloc_object(JsObject::new(
            Some(rt.realm.intrinsics.object_prototype),
            ObjectKind::TypedArray(TypedArrayView {
                buffer,
                byte_offset: 0,
                length: 4,
                elem: ElementType::Int32,
            }),
        ))
        .unwrap()
    }

    #[test]
    fn integer_indexed_reads_and_writes_go_through_memory() {
        let mut rt = Runtime::new();
        let view = typed_array_fixture(&mut rt);
        let desc = PropertyDescriptor {
            value: Some(Value::Number(-7.0)),
            ..PropertyDescriptor::default()
        };
        assert!(rt.define_own_property(view, PropertyKey::Index(2), &desc).unwrap());
        let loaded = rt.get(Value::Object(view), PropertyKey::Index(2)).unwrap();
        assert_eq!(loaded, Value::Number(-7.0));
        // Integer indices are never stored on the object itself.
        assert!(rt.heap.object(view).indexed.is_empty());
    }

    #[test]
    fn invalid_indices_are_silent() {
        let mut rt = Runtime::new();
        let view = typed_array_fixture(&mut rt);
        // Out of range: get is undefined, set is a no-op that still succeeds.
        let missing = rt.get(Value::Object(view), PropertyKey::Index(9)).unwrap();
        assert_eq!(missing, Value::Undefined);
        let desc = PropertyDescriptor {
            value: Some(Value::Number(1.0)),
            ..PropertyDescriptor::default()
        };
        assert!(rt.define_own_property(view, PropertyKey::Index(9), &desc).unwrap());
        assert_eq!(rt.get(Value::Object(view), PropertyKey::Index(9)).unwrap(), Value::Undefined);
    }

    #[test]
    fn accessor_and_attribute_changes_are_refused() {
        let mut rt = Runtime::new();
        let view = typed_array_fixture(&mut rt);
        let accessor = PropertyDescriptor::accessor(Value::Undefined, Value::Undefined, true, true);
        assert!(!rt.define_own_property(view, PropertyKey::Index(0), &accessor).unwrap());
        let frozen = PropertyDescriptor {
            value: Some(Value::Number(1.0)),
            writable: Some(false),
            ..PropertyDescriptor::default()
        };
        assert!(!rt.define_own_property(view, PropertyKey::Index(0), &frozen).unwrap());
    }

    #[test]
    fn detached_buffers_read_as_absent() {
        let mut rt = Runtime::new();
        let view = typed_array_fixture(&mut rt);
        let buffer = match &rt.heap.object(view).kind {
            ObjectKind::TypedArray(v) => v.buffer,
            _ => unreachable!(),
        };
        if let ObjectKind::ArrayBuffer(data) = &mut rt.heap.object_mut(buffer).kind {
            data.detached = true;
        }
        assert_eq!(rt.get(Value::Object(view), PropertyKey::Index(0)).unwrap(), Value::Undefined);
        assert!(!rt.has_property(view, PropertyKey::Index(0)).unwrap());
    }
}

/// Appends an object's stored string keys then symbol keys.
fn push_named_keys(object: &JsObject, keys: &mut Vec<PropertyKey>) {
    keys.extend(object.named.keys().filter_map(|k| match k {
        crate::object::NamedKey::Str(s) => Some(PropertyKey::Str(*s)),
        crate::object::NamedKey::Symbol(_) => None,
    }));
    keys.extend(object.named.keys().filter_map(|k| match k {
        crate::object::NamedKey::Symbol(s) => Some(PropertyKey::Symbol(*s)),
        crate::object::NamedKey::Str(_) => None,
    }));
}
