//! Call machinery: binding resolution, function instantiation, ordinary and
//! construct calls, super calls, tail calls, and direct eval.

use crate::{
    bytecode::Reg,
    context::{ContextKind, ScriptContext},
    environment::{EnvKind, Environment, ThisStatus},
    error::{RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{PropertyKey, StringId, WellKnown},
    object::{ClassField, JsObject, ObjectKind, Property, PropertyDescriptor, PropertySlot, ScriptFunction},
    resource::ResourceTracker,
    runtime::Runtime,
    script::FuncFlags,
    stack::{CallState, CallStateKind, ClassElement, ClassElementKind, ClassState, State, StateKind},
    tracer::VmTracer,
    types::{PrivateKind, PrivateName},
    value::Value,
};

use super::{FrameExit, StepResult};

impl<T: ResourceTracker, Tr: VmTracer> Runtime<T, Tr> {
    // =========================================================================
    // Binding resolution over the environment chain
    // =========================================================================

    /// Finds the environment a name binds in, walking outward from the
    /// current lexical environment. Object environments (including `with`)
    /// consult the object model and honor `@@unscopables`.
    fn lookup_binding_env(&mut self, name: StringId) -> RunResult<Option<HeapId>> {
        let mut cursor = Some(self.ctx().lex_env);
        while let Some(env_id) = cursor {
            let found = match &self.heap.env(env_id).kind {
                EnvKind::Declarative(store) => store.has(name),
                EnvKind::Function { store, .. } => store.has(name),
                EnvKind::Module { store, indirect } => store.has(name) || indirect.contains_key(&name),
                EnvKind::Object {
                    binding_object,
                    with_base,
                } => {
                    let (binding_object, with_base) = (*binding_object, *with_base);
                    let key = PropertyKey::Str(name);
                    let mut found = self.has_property(binding_object, key)?;
                    if found && with_base {
                        let unscopables = self.get(
                            Value::Object(binding_object),
                            PropertyKey::Symbol(self.realm.intrinsics.symbol_unscopables),
                        )?;
                        if unscopables.is_object() {
                            let hidden = self.get(unscopables, key)?;
                            if hidden.to_boolean(&self.heap) {
                                found = false;
                            }
                        }
                    }
                    found
                }
                EnvKind::Global {
                    global_object, store, ..
                } => {
                    if store.has(name) {
                        true
                    } else {
                        let global_object = *global_object;
                        self.has_property(global_object, PropertyKey::Str(name))?
                    }
                }
            };
            if found {
                return Ok(Some(env_id));
            }
            cursor = self.heap.env(env_id).outer;
        }
        Ok(None)
    }

    /// GetBindingValue through whichever environment holds the name.
    pub(crate) fn resolve_binding(&mut self, name: StringId) -> RunResult<Value> {
        let Some(env_id) = self.lookup_binding_env(name)? else {
            return Err(RunError::reference_error(format!(
                "{name} is not defined",
                name = self.interns.get(name)
            )));
        };
        self.env_get_binding(env_id, name)
    }

    fn env_get_binding(&mut self, env_id: HeapId, name: StringId) -> RunResult<Value> {
        match &self.heap.env(env_id).kind {
            EnvKind::Declarative(store) | EnvKind::Function { store, .. } => store.get(name, &self.interns),
            EnvKind::Object { binding_object, .. } => {
                let binding_object = *binding_object;
                self.get(Value::Object(binding_object), PropertyKey::Str(name))
            }
            EnvKind::Global {
                global_object, store, ..
            } => {
                if store.has(name) {
                    store.get(name, &self.interns)
                } else {
                    let global_object = *global_object;
                    self.get(Value::Object(global_object), PropertyKey::Str(name))
                }
            }
            EnvKind::Module { store, indirect } => {
                if let Some(binding) = indirect.get(&name) {
                    let binding = *binding;
                    let target_env = self
                        .heap
                        .module(binding.module)
                        .env
                        .expect("linked module has an environment");
                    return self.env_get_binding(target_env, binding.target_name);
                }
                store.get(name, &self.interns)
            }
        }
    }

    /// SetMutableBinding; an unresolvable name creates a global property in
    /// sloppy mode and throws in strict mode.
    pub(crate) fn set_binding(&mut self, name: StringId, value: Value) -> RunResult<()> {
        let strict = self.current_strict();
        let Some(env_id) = self.lookup_binding_env(name)? else {
            return self.set_unresolved_binding(name, value, strict);
        };
        // Indirect module bindings (imports) are immutable.
        if let EnvKind::Module { indirect, .. } = &self.heap.env(env_id).kind
            && indirect.contains_key(&name)
        {
            return Err(RunError::type_error(format!(
                "assignment to constant variable '{name}'",
                name = self.interns.get(name)
            )));
        }
        self.set_resolved_binding(env_id, name, value, strict)
    }

    fn set_unresolved_binding(&mut self, name: StringId, value: Value, strict: bool) -> RunResult<()> {
        if strict {
            return Err(RunError::reference_error(format!(
                "{name} is not defined",
                name = self.interns.get(name)
            )));
        }
        let global = self.realm.global_object;
        self.set_checked(global, PropertyKey::Str(name), value, false)
    }

    fn set_resolved_binding(&mut self, env_id: HeapId, name: StringId, value: Value, strict: bool) -> RunResult<()> {
        match &mut self.heap.env_mut(env_id).kind {
            EnvKind::Declarative(store) | EnvKind::Function { store, .. } | EnvKind::Module { store, .. } => {
                // Split borrow: the store needs interns for error text.
                let mut taken = std::mem::take(store);
                let result = taken.set(name, value, strict, &self.interns);
                match &mut self.heap.env_mut(env_id).kind {
                    EnvKind::Declarative(store) | EnvKind::Function { store, .. } | EnvKind::Module { store, .. } => {
                        *store = taken;
                    }
                    _ => unreachable!("environment kind changed mid-set"),
                }
                result
            }
            EnvKind::Object { binding_object, .. } => {
                let binding_object = *binding_object;
                self.set_checked(binding_object, PropertyKey::Str(name), value, strict)
            }
            EnvKind::Global {
                global_object, store, ..
            } => {
                if store.has(name) {
                    let mut taken = std::mem::take(store);
                    let result = taken.set(name, value, strict, &self.interns);
                    if let EnvKind::Global { store, .. } = &mut self.heap.env_mut(env_id).kind {
                        *store = taken;
                    }
                    result
                } else {
                    let global_object = *global_object;
                    self.set_checked(global_object, PropertyKey::Str(name), value, strict)
                }
            }
        }
    }

    /// InitializeBinding in the current lexical environment, creating the
    /// binding on demand (parameters arrive without a declaration group).
    pub(crate) fn initialize_binding(&mut self, name: StringId, value: Value) -> RunResult<()> {
        let env_id = self.ctx().lex_env;
        match self.heap.env_mut(env_id).store_mut() {
            Some(store) => {
                if !store.has(name) {
                    store.create_mutable(name, false);
                }
                store.initialize(name, value);
                Ok(())
            }
            None => {
                // Object environment: initialization is a property write.
                let EnvKind::Object { binding_object, .. } = self.heap.env(env_id).kind else {
                    unreachable!("storeless environment is an object environment")
                };
                self.set_checked(binding_object, PropertyKey::Str(name), value, false)
            }
        }
    }

    /// `delete x`: only object-environment bindings of configurable
    /// properties delete.
    pub(crate) fn delete_binding(&mut self, name: StringId) -> RunResult<bool> {
        let Some(env_id) = self.lookup_binding_env(name)? else {
            return Ok(true);
        };
        match &mut self.heap.env_mut(env_id).kind {
            EnvKind::Declarative(store) | EnvKind::Function { store, .. } | EnvKind::Module { store, .. } => {
                Ok(store.delete(name))
            }
            EnvKind::Object { binding_object, .. } => {
                let binding_object = *binding_object;
                self.delete_property(binding_object, PropertyKey::Str(name))
            }
            EnvKind::Global {
                global_object,
                store,
                var_names,
            } => {
                if store.has(name) {
                    Ok(store.delete(name))
                } else if var_names.contains(&name) {
                    Ok(false)
                } else {
                    let global_object = *global_object;
                    self.delete_property(global_object, PropertyKey::Str(name))
                }
            }
        }
    }

    // =========================================================================
    // Function instantiation
    // =========================================================================

    /// Creates a closure over the current lexical environment.
    pub(crate) fn instantiate_function(&mut self, func: u32, home: Option<HeapId>) -> RunResult<Value> {
        let ctx = self.ctx();
        let (script, env, priv_env) = (ctx.script, ctx.lex_env, ctx.priv_env);
        self.make_function(script, func, env, home, priv_env, None)
    }

    /// Creates a method closure with a home object and a key-derived name.
    pub(crate) fn instantiate_method(&mut self, func: u32, home: HeapId, key: PropertyKey) -> RunResult<Value> {
        let ctx = self.ctx();
        let (script, env, priv_env) = (ctx.script, ctx.lex_env, ctx.priv_env);
        self.make_function(script, func, env, Some(home), priv_env, Some(key))
    }

    /// Creates a method closure inside a class body: home is the class
    /// prototype, the private environment is the class's.
    pub(crate) fn instantiate_class_method(&mut self, func: u32) -> RunResult<Value> {
        let (proto, priv_env) = {
            let class = self.current_class_state();
            (class.proto, class.priv_env)
        };
        let ctx = self.ctx();
        let (script, env) = (ctx.script, ctx.lex_env);
        let home = proto.as_object();
        self.make_function(script, func, env, home, priv_env, None)
    }

    fn make_function(
        &mut self,
        script: HeapId,
        func: u32,
        env: HeapId,
        home: Option<HeapId>,
        priv_env: Option<HeapId>,
        name_key: Option<PropertyKey>,
    ) -> RunResult<Value> {
        let record = *self.heap.script(script).func(func);
        let sf = ScriptFunction {
            script,
            func: Some(func),
            derived: record.flags.derived,
            env,
            home_object: home,
            priv_env,
            fields: Vec::new(),
            instance_priv_methods: Vec::new(),
        };
        let mut object = JsObject::new(Some(self.realm.intrinsics.function_prototype), ObjectKind::Function(sf));
        let name = match name_key {
            Some(key) => self.render_key(key),
            None => {
                let name_id = self.heap.script(script).func_names[func as usize];
                name_id.map_or_else(String::new, |id| self.interns.get(id).to_owned())
            }
        };
        let name_value = self.alloc_string(name)?;
        object.set_own_property(
            PropertyKey::Str(WellKnown::Name.into()),
            Property::data(name_value, false, false, true),
        );
        object.set_own_property(
            PropertyKey::Str(WellKnown::Length.into()),
            Property::data(Value::Number(f64::from(record.param_count)), false, false, true),
        );
        let function_id = self.alloc_object(object)?;

        // Plain functions and generators get a prototype object; arrows,
        // methods with a home object, and async functions do not.
        let flags = record.flags;
        if !flags.arrow && !flags.r#async && (home.is_none() || flags.generator) {
            let proto_proto = if flags.generator {
                self.realm.intrinsics.generator_prototype
            } else {
                self.realm.intrinsics.object_prototype
            };
            let mut proto = JsObject::ordinary(Some(proto_proto));
            if !flags.generator {
                proto.set_own_property(
                    PropertyKey::Str(WellKnown::Constructor.into()),
                    Property::data(Value::Object(function_id), true, false, true),
                );
            }
            let proto_id = self.alloc_object(proto)?;
            self.heap.object_mut(function_id).set_own_property(
                PropertyKey::Str(WellKnown::Prototype.into()),
                Property::data(Value::Object(proto_id), !flags.class_constructor, false, false),
            );
        }
        Ok(Value::Object(function_id))
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Pops the innermost call state and its argument span.
    fn pop_call_state(&mut self) -> (CallState, Vec<Value>) {
        let state = self.ctx_mut().states.pop().expect("call state present");
        let State {
            sp,
            kind: StateKind::Call(call),
        } = state
        else {
            unreachable!("call opcode without a call state")
        };
        let args = self.ctx_mut().stack.split_off(sp);
        debug_assert_eq!(args.len(), call.argc, "argument span mismatch");
        (call, args)
    }

    pub(crate) fn finish_call(&mut self, _tail: bool) -> RunResult<Value> {
        let (call, args) = self.pop_call_state();
        debug_assert_eq!(call.kind, CallStateKind::Call);
        self.call(call.func, call.this, &args)
    }

    /// `[[Call]]` dispatch.
    pub(crate) fn call(&mut self, func: Value, this: Value, args: &[Value]) -> RunResult<Value> {
        let Some(func_obj) = func.as_object() else {
            return Err(RunError::type_error(format!(
                "{type_name} is not a function",
                type_name = func.type_of(&self.heap)
            )));
        };
        match self.heap.object(func_obj).kind.clone() {
            ObjectKind::NativeFunction(data) => self.call_native(func_obj, data.func, this, args, None),
            ObjectKind::BoundFunction(bound) => {
                let mut combined = bound.bound_args.clone();
                combined.extend_from_slice(args);
                self.call(bound.target, bound.bound_this, &combined)
            }
            ObjectKind::Proxy(proxy) => {
                if !proxy.callable {
                    return Err(RunError::type_error("proxy target is not callable"));
                }
                let (target, handler) = self.proxy_call_target(proxy)?;
                match self.get_method(Value::Object(handler), PropertyKey::Str(WellKnown::Apply.into()))? {
                    Some(trap) => {
                        let args_array = self.new_array_from(args)?;
                        self.call(trap, Value::Object(handler), &[Value::Object(target), this, Value::Object(args_array)])
                    }
                    None => self.call(Value::Object(target), this, args),
                }
            }
            ObjectKind::Function(sf) => {
                let flags = self.function_flags(&sf);
                if flags.class_constructor {
                    return Err(RunError::type_error("class constructor cannot be invoked without 'new'"));
                }
                if flags.generator {
                    return self.create_generator_object(func_obj, &sf, this, args);
                }
                if flags.r#async {
                    return self.call_async_function(func_obj, &sf, this, args);
                }
                self.ordinary_call(func_obj, &sf, this, args)
            }
            _ => Err(RunError::type_error("value is not a function")),
        }
    }

    pub(crate) fn function_flags(&self, sf: &ScriptFunction) -> FuncFlags {
        match sf.func {
            Some(func) => self.heap.script(sf.script).func(func).flags,
            None => FuncFlags {
                class_constructor: true,
                derived: sf.derived,
                ..FuncFlags::default()
            },
        }
    }

    fn proxy_call_target(&self, proxy: crate::object::ProxyData) -> RunResult<(HeapId, HeapId)> {
        match (proxy.target, proxy.handler) {
            (Some(target), Some(handler)) => Ok((target, handler)),
            _ => Err(RunError::type_error("cannot perform operation on a revoked proxy")),
        }
    }

    /// Ordinary call of a script function: push a frame, run it.
    fn ordinary_call(&mut self, func_obj: HeapId, sf: &ScriptFunction, this: Value, args: &[Value]) -> RunResult<Value> {
        let frame = self.prepare_frame(func_obj, sf, this, args, Value::Undefined, None, ContextKind::Normal)?;
        self.push_frame(frame)?;
        match self.run_context()? {
            FrameExit::Return(value) => Ok(value),
            FrameExit::Suspend => unreachable!("ordinary calls cannot suspend"),
        }
    }

    /// Builds the frame for a script-function activation: the function
    /// environment with its this cell, the register file, the owned
    /// argument copy.
    pub(crate) fn prepare_frame(
        &mut self,
        func_obj: HeapId,
        sf: &ScriptFunction,
        this: Value,
        args: &[Value],
        new_target: Value,
        this_status_override: Option<ThisStatus>,
        kind: ContextKind,
    ) -> RunResult<ScriptContext> {
        let func = sf.func.expect("body-less constructors never build frames");
        let record = *self.heap.script(sf.script).func(func);
        let flags = record.flags;

        let this_status = match this_status_override {
            Some(status) => status,
            None if flags.arrow => ThisStatus::Lexical,
            None if flags.strict || flags.class_constructor => ThisStatus::Initialized(this),
            None => {
                // Sloppy-mode coercion: nullish becomes globalThis,
                // primitives get wrapped.
                let coerced = if this.is_nullish() {
                    Value::Object(self.realm.global_object)
                } else if this.is_object() {
                    this
                } else {
                    Value::Object(self.to_object(this)?)
                };
                ThisStatus::Initialized(coerced)
            }
        };

        let outer_ancestors = self.heap.env(sf.env).ancestors.clone();
        let env = Environment::function(
            Some(sf.env),
            &outer_ancestors,
            this_status,
            Value::Object(func_obj),
            new_target,
            sf.home_object,
        );
        let env_id = self.alloc(HeapData::Env(env))?;

        Ok(ScriptContext {
            function: Value::Object(func_obj),
            script: sf.script,
            func,
            regs: vec![Value::Undefined; usize::from(record.reg_count)],
            args: args.to_vec(),
            retval: Value::Undefined,
            ip: record.ip_start as usize,
            var_env: env_id,
            lex_env: env_id,
            priv_env: sf.priv_env,
            new_target,
            stack: Vec::new(),
            states: Vec::new(),
            kind,
        })
    }

    pub(crate) fn push_frame(&mut self, frame: ScriptContext) -> RunResult<()> {
        self.heap.tracker().check_call_depth(self.contexts.len())?;
        let name = self
            .heap
            .script(frame.script)
            .func_names
            .get(frame.func as usize)
            .copied()
            .flatten()
            .map(|id| self.interns.get(id).to_owned());
        self.contexts.push(frame);
        self.tracer.on_context_push(name.as_deref(), self.contexts.len());
        Ok(())
    }

    // =========================================================================
    // Construct
    // =========================================================================

    pub(crate) fn finish_construct(&mut self) -> RunResult<Value> {
        let (call, args) = self.pop_call_state();
        debug_assert_eq!(call.kind, CallStateKind::New);
        self.construct(call.func, &args, call.func)
    }

    /// `[[Construct]]` dispatch.
    pub(crate) fn construct(&mut self, func: Value, args: &[Value], new_target: Value) -> RunResult<Value> {
        let Some(func_obj) = func.as_object() else {
            return Err(RunError::type_error(format!(
                "{type_name} is not a constructor",
                type_name = func.type_of(&self.heap)
            )));
        };
        if !self.heap.object(func_obj).is_constructor() {
            return Err(RunError::type_error("value is not a constructor"));
        }
        match self.heap.object(func_obj).kind.clone() {
            ObjectKind::NativeFunction(data) => self.call_native(func_obj, data.func, Value::Undefined, args, Some(new_target)),
            ObjectKind::BoundFunction(bound) => {
                let mut combined = bound.bound_args.clone();
                combined.extend_from_slice(args);
                let inner_target = if new_target == func { bound.target } else { new_target };
                self.construct(bound.target, &combined, inner_target)
            }
            ObjectKind::Proxy(proxy) => {
                if !proxy.constructable {
                    return Err(RunError::type_error("proxy target is not a constructor"));
                }
                let (target, handler) = self.proxy_call_target(proxy)?;
                match self.get_method(Value::Object(handler), PropertyKey::Str(WellKnown::Construct.into()))? {
                    Some(trap) => {
                        let args_array = self.new_array_from(args)?;
                        let result = self.call(
                            trap,
                            Value::Object(handler),
                            &[Value::Object(target), Value::Object(args_array), new_target],
                        )?;
                        if !result.is_object() {
                            return Err(RunError::type_error("proxy construct trap must return an object"));
                        }
                        Ok(result)
                    }
                    None => self.construct(Value::Object(target), args, new_target),
                }
            }
            ObjectKind::Function(sf) => self.construct_script_function(func_obj, &sf, args, new_target),
            _ => Err(RunError::type_error("value is not a constructor")),
        }
    }

    fn construct_script_function(
        &mut self,
        func_obj: HeapId,
        sf: &ScriptFunction,
        args: &[Value],
        new_target: Value,
    ) -> RunResult<Value> {
        let flags = self.function_flags(sf);
        if flags.arrow || flags.generator || flags.r#async {
            return Err(RunError::type_error("value is not a constructor"));
        }

        if sf.func.is_none() {
            // Synthesized default constructor.
            if sf.derived {
                let parent = self
                    .get_prototype_of(func_obj)?
                    .ok_or_else(|| RunError::type_error("super constructor is not a constructor"))?;
                let instance = self.construct(Value::Object(parent), args, new_target)?;
                let instance_obj = instance.as_object().expect("construct returns an object");
                self.initialize_instance_elements(instance_obj, func_obj)?;
                return Ok(instance);
            }
            let instance = self.create_from_constructor(new_target)?;
            self.initialize_instance_elements(instance, func_obj)?;
            return Ok(Value::Object(instance));
        }

        if flags.derived {
            // `this` stays uninitialized until super() binds it.
            let frame = self.prepare_frame(
                func_obj,
                sf,
                Value::Undefined,
                args,
                new_target,
                Some(ThisStatus::Uninitialized),
                ContextKind::Normal,
            )?;
            let env_id = frame.lex_env;
            self.push_frame(frame)?;
            let exit = self.run_context()?;
            let FrameExit::Return(retval) = exit else {
                unreachable!("constructors cannot suspend")
            };
            if retval.is_object() {
                return Ok(retval);
            }
            if retval != Value::Undefined {
                return Err(RunError::type_error("derived constructor returned a non-object"));
            }
            match &self.heap.env(env_id).kind {
                EnvKind::Function {
                    this_status: ThisStatus::Initialized(this),
                    ..
                } => Ok(*this),
                _ => Err(RunError::reference_error(
                    "must call super constructor before returning from derived constructor",
                )),
            }
        } else {
            let instance = self.create_from_constructor(new_target)?;
            self.initialize_instance_elements(instance, func_obj)?;
            let frame = self.prepare_frame(
                func_obj,
                sf,
                Value::Object(instance),
                args,
                new_target,
                Some(ThisStatus::Initialized(Value::Object(instance))),
                ContextKind::Normal,
            )?;
            self.push_frame(frame)?;
            let exit = self.run_context()?;
            let FrameExit::Return(retval) = exit else {
                unreachable!("constructors cannot suspend")
            };
            if retval.is_object() { Ok(retval) } else { Ok(Value::Object(instance)) }
        }
    }

    /// OrdinaryCreateFromConstructor: `new.target.prototype` or the realm
    /// fallback.
    fn create_from_constructor(&mut self, new_target: Value) -> RunResult<HeapId> {
        let proto = self.get(new_target, PropertyKey::Str(WellKnown::Prototype.into()))?;
        let proto = proto.as_object().unwrap_or(self.realm.intrinsics.object_prototype);
        self.alloc_object(JsObject::ordinary(Some(proto)))
    }

    /// Installs instance private methods and runs field initializers on a
    /// freshly-bound `this`.
    pub(crate) fn initialize_instance_elements(&mut self, instance: HeapId, constructor: HeapId) -> RunResult<()> {
        let (fields, priv_methods) = match &self.heap.object(constructor).kind {
            ObjectKind::Function(sf) => (sf.fields.clone(), sf.instance_priv_methods.clone()),
            _ => (Vec::new(), Vec::new()),
        };
        for (name, property) in priv_methods {
            self.heap
                .object_mut(instance)
                .set_own_property(PropertyKey::Private(name), property);
        }
        for field in fields {
            let value = match field.init {
                Some(init) => self.call(init, Value::Object(instance), &[])?,
                None => Value::Undefined,
            };
            if field.names_function
                && let Some(function) = value.as_object()
                && self.heap.object(function).is_callable()
            {
                let name = self.render_key(field.key);
                let name_value = self.alloc_string(name)?;
                self.heap.object_mut(function).set_own_property(
                    PropertyKey::Str(WellKnown::Name.into()),
                    Property::data(name_value, false, false, true),
                );
            }
            match field.key {
                PropertyKey::Private(name) => {
                    self.heap
                        .object_mut(instance)
                        .set_own_property(PropertyKey::Private(name), Property::data(value, true, false, false));
                }
                key => self.create_data_property(instance, key, value)?,
            }
        }
        Ok(())
    }

    // =========================================================================
    // super()
    // =========================================================================

    pub(crate) fn finish_super_call(&mut self) -> RunResult<Value> {
        let (call, args) = self.pop_call_state();
        debug_assert_eq!(call.kind, CallStateKind::SuperCall);

        let env_id = self.get_this_environment(self.ctx().lex_env);
        let (active_function, new_target) = match &self.heap.env(env_id).kind {
            EnvKind::Function {
                function, new_target, ..
            } => (*function, *new_target),
            _ => return Err(RunError::syntax_error("'super' keyword unexpected here")),
        };
        let active_obj = active_function.as_object().expect("function environment holds a function");

        // The super constructor is the active function's [[Prototype]].
        let parent = self
            .get_prototype_of(active_obj)?
            .map(Value::Object)
            .filter(|p| self.is_constructor(*p))
            .ok_or_else(|| RunError::type_error("super constructor is not a constructor"))?;

        let result = self.construct(parent, &args, new_target)?;

        match &mut self.heap.env_mut(env_id).kind {
            EnvKind::Function { this_status, .. } => match this_status {
                ThisStatus::Uninitialized => *this_status = ThisStatus::Initialized(result),
                _ => return Err(RunError::reference_error("super constructor may only be called once")),
            },
            _ => unreachable!("checked function environment"),
        }

        let result_obj = result.as_object().expect("construct returns an object");
        self.initialize_instance_elements(result_obj, active_obj)?;
        Ok(result)
    }

    // =========================================================================
    // Tail call
    // =========================================================================

    /// Tail call: when the callee is the running function itself the
    /// context is reused in place; otherwise this is a call followed by the
    /// return path.
    pub(crate) fn finish_tail_call(&mut self, _dst: Reg) -> RunResult<StepResult> {
        let (call, args) = self.pop_call_state();
        let ctx_function = self.ctx().function;
        let reusable = call.func == ctx_function
            && matches!(self.ctx().kind, ContextKind::Normal)
            && call.func.as_object().is_some_and(|id| {
                matches!(
                    &self.heap.object(id).kind,
                    ObjectKind::Function(sf) if sf.func.is_some()
                )
            });
        if !reusable {
            let result = self.call(call.func, call.this, &args)?;
            self.ctx_mut().retval = result;
            return self.do_return();
        }

        // Drain every open state (closing iterators normally), then rebuild
        // the activation in place.
        while !self.ctx().states.is_empty() {
            self.pop_state_for_reuse()?;
        }
        let func_obj = call.func.as_object().expect("checked above");
        let sf = match &self.heap.object(func_obj).kind {
            ObjectKind::Function(sf) => sf.clone(),
            _ => unreachable!("checked function"),
        };
        let frame = self.prepare_frame(func_obj, &sf, call.this, &args, Value::Undefined, None, ContextKind::Normal)?;
        let ctx = self.ctx_mut();
        ctx.regs = frame.regs;
        ctx.args = frame.args;
        ctx.retval = Value::Undefined;
        ctx.ip = frame.ip;
        ctx.var_env = frame.var_env;
        ctx.lex_env = frame.lex_env;
        ctx.stack.clear();
        Ok(StepResult::Continue)
    }

    fn pop_state_for_reuse(&mut self) -> RunResult<()> {
        let state = self.ctx_mut().states.pop().expect("states non-empty");
        self.ctx_mut().stack.truncate(state.sp);
        match state.kind {
            StateKind::LexEnv { saved_env } => {
                self.ctx_mut().lex_env = saved_env;
                Ok(())
            }
            StateKind::ForOf { iter } | StateKind::ArrayAssi { iter } => self.iterator_close(&iter, false),
            _ => Ok(()),
        }
    }

    // =========================================================================
    // Direct and indirect eval
    // =========================================================================

    /// The `Eval` opcode: a call that checks for the realm's `eval` as the
    /// callee and runs the argument in the caller's environment.
    pub(crate) fn finish_eval_call(&mut self) -> RunResult<Value> {
        let (call, args) = self.pop_call_state();
        if call.func != self.realm.intrinsics.eval {
            return self.call(call.func, call.this, &args);
        }
        let Some(&source) = args.first() else {
            return Ok(Value::Undefined);
        };
        if !source.is_string() {
            return Ok(source);
        }
        let text = self.string_content(source)?;
        let strict = self.current_strict();
        let script = self.compile_eval_source(&text, strict)?;
        self.eval_evaluation(script, true)
    }

    pub(crate) fn compile_eval_source(&mut self, source: &str, strict: bool) -> RunResult<HeapId> {
        let Some(hook) = &self.eval_hook else {
            return Err(RunError::Native(crate::error::NativeError::new(
                crate::error::NativeErrorKind::EvalError,
                "no eval compiler attached to this runtime",
            )));
        };
        let image = hook(source, strict).map_err(RunError::syntax_error)?;
        self.load_script(image)
            .map_err(|err| RunError::syntax_error(err.message))
    }

    /// Runs an eval script: direct eval executes in the caller's variable
    /// environment with a fresh lexical scope; indirect eval runs at global
    /// scope.
    pub(crate) fn eval_evaluation(&mut self, script: HeapId, direct: bool) -> RunResult<Value> {
        let (var_env, lex_outer) = if direct {
            (self.ctx().var_env, self.ctx().lex_env)
        } else {
            (self.realm.global_env, self.realm.global_env)
        };
        // Runtime-introduced bindings invalidate every downstream ancestor
        // cache.
        let mut cursor = Some(lex_outer);
        while let Some(env_id) = cursor {
            let env = self.heap.env_mut(env_id);
            env.cache_enabled = false;
            cursor = env.outer;
        }
        let outer_ancestors = self.heap.env(lex_outer).ancestors.clone();
        let lex_env = self.alloc(HeapData::Env(Environment::declarative(Some(lex_outer), &outer_ancestors)))?;

        let record = *self.heap.script(script).func(0);
        let frame = ScriptContext {
            function: Value::Undefined,
            script,
            func: 0,
            regs: vec![Value::Undefined; usize::from(record.reg_count)],
            args: Vec::new(),
            retval: Value::Undefined,
            ip: record.ip_start as usize,
            var_env,
            lex_env,
            priv_env: if direct { self.ctx().priv_env } else { None },
            new_target: Value::Undefined,
            stack: Vec::new(),
            states: Vec::new(),
            kind: ContextKind::Normal,
        };
        self.push_frame(frame)?;
        match self.run_context()? {
            FrameExit::Return(value) => Ok(value),
            FrameExit::Suspend => unreachable!("eval cannot suspend"),
        }
    }

    // =========================================================================
    // Class evaluation
    // =========================================================================

    fn current_class_state(&self) -> &ClassState {
        for state in self.ctx().states.iter().rev() {
            if let StateKind::Class(class) = &state.kind {
                return class;
            }
        }
        unreachable!("class opcode without a class state")
    }

    fn current_class_state_mut(&mut self) -> &mut ClassState {
        for state in self.ctx_mut().states.iter_mut().rev() {
            if let StateKind::Class(class) = &mut state.kind {
                return class;
            }
        }
        unreachable!("class opcode without a class state")
    }

    pub(crate) fn push_class_state(
        &mut self,
        dst: Reg,
        name: Option<u32>,
        parent: Option<Reg>,
        priv_env: Option<u32>,
    ) -> RunResult<()> {
        let parent_value = match parent {
            Some(reg) => self.reg_value(reg),
            None => Value::Undefined,
        };
        let proto_parent = match parent_value {
            Value::Undefined => Some(self.realm.intrinsics.object_prototype),
            Value::Null => None,
            Value::Object(parent_obj) => {
                if !self.heap.object(parent_obj).is_constructor() {
                    return Err(RunError::type_error("class heritage is not a constructor"));
                }
                let proto = self.get(parent_value, PropertyKey::Str(WellKnown::Prototype.into()))?;
                match proto {
                    Value::Null => None,
                    Value::Object(id) => Some(id),
                    _ => return Err(RunError::type_error("class heritage prototype is not an object or null")),
                }
            }
            _ => return Err(RunError::type_error("class heritage is not a constructor")),
        };
        let proto = self.alloc_object(JsObject::ordinary(proto_parent))?;

        // Materialize the class's private environment.
        let prev_priv_env = self.ctx().priv_env;
        let class_priv_env = match priv_env {
            Some(index) => {
                let names: Vec<StringId> = {
                    let script = self.heap.script(self.ctx().script);
                    let record = &script.priv_envs[index as usize];
                    record.names.iter().map(|&n| script.priv_names[n as usize]).collect()
                };
                let outer = prev_priv_env;
                let mut env = Environment::declarative(outer, &[]);
                for name in names {
                    let private = self.alloc(HeapData::PrivateName(PrivateName::new(name, PrivateKind::Field)))?;
                    if let Some(store) = env.store_mut() {
                        store.create_mutable(name, false);
                        store.initialize(name, Value::PrivateName(private));
                    }
                }
                Some(self.alloc(HeapData::Env(env))?)
            }
            None => None,
        };
        if class_priv_env.is_some() {
            self.ctx_mut().priv_env = class_priv_env;
        }

        let name_value = name.map(|index| self.heap.script(self.ctx().script).values[index as usize]);
        self.push_state(StateKind::Class(ClassState {
            dst,
            name: name_value,
            parent: parent_value,
            proto: Value::Object(proto),
            constructor: Value::Undefined,
            elements: Vec::new(),
            priv_env: class_priv_env,
            prev_priv_env,
            inst_field_count: 0,
            inst_priv_method_count: 0,
        }));
        Ok(())
    }

    fn reg_value(&self, reg: Reg) -> Value {
        self.ctx().regs[reg.index()]
    }

    /// `ConstrCreate` / the default-constructor opcodes.
    pub(crate) fn class_create_constructor(&mut self, func: Option<u32>) -> RunResult<()> {
        let (proto_value, parent, priv_env, name_value) = {
            let class = self.current_class_state();
            (class.proto, class.parent, class.priv_env, class.name)
        };
        let proto = proto_value.as_object().expect("class prototype is an object");

        let constructor = match func {
            Some(func) => {
                let function = self.instantiate_method(func, proto, PropertyKey::Str(WellKnown::Constructor.into()))?;
                // Methods carry no prototype property; constructors do.
                let function_obj = function.as_object().expect("instantiate returns an object");
                self.heap.object_mut(function_obj).set_own_property(
                    PropertyKey::Str(WellKnown::Prototype.into()),
                    Property::data(proto_value, false, false, false),
                );
                function
            }
            None => {
                let ctx = self.ctx();
                let script = ctx.script;
                let derived = !matches!(parent, Value::Undefined);
                let sf = ScriptFunction {
                    script,
                    func: None,
                    derived,
                    env: ctx.lex_env,
                    home_object: Some(proto),
                    priv_env,
                    fields: Vec::new(),
                    instance_priv_methods: Vec::new(),
                };
                let mut object =
                    JsObject::new(Some(self.realm.intrinsics.function_prototype), ObjectKind::Function(sf));
                object.set_own_property(
                    PropertyKey::Str(WellKnown::Prototype.into()),
                    Property::data(proto_value, false, false, false),
                );
                Value::Object(self.alloc_object(object)?)
            }
        };
        let constructor_obj = constructor.as_object().expect("constructor is an object");

        // Static inheritance: the constructor's [[Prototype]] is the parent
        // constructor (or %Function.prototype%).
        let ctor_proto = match parent {
            Value::Object(parent_obj) => parent_obj,
            _ => self.realm.intrinsics.function_prototype,
        };
        self.heap.object_mut(constructor_obj).proto = Some(ctor_proto);

        // proto.constructor
        self.heap.object_mut(proto).set_own_property(
            PropertyKey::Str(WellKnown::Constructor.into()),
            Property::data(constructor, true, false, true),
        );
        if let Some(name_value) = name_value {
            self.heap.object_mut(constructor_obj).set_own_property(
                PropertyKey::Str(WellKnown::Name.into()),
                Property::data(name_value, false, false, true),
            );
        }
        self.current_class_state_mut().constructor = constructor;
        Ok(())
    }

    /// Records a method/accessor/field element on the open class state.
    pub(crate) fn class_add_element(
        &mut self,
        kind: ClassElementKind,
        prop: u32,
        func: Option<u32>,
    ) -> RunResult<()> {
        let raw_key = {
            let script = self.heap.script(self.ctx().script);
            script.prop_refs[prop as usize]
        };
        // Private members spell their key with the leading `#`; resolve it
        // through the class's private environment.
        let key = match raw_key {
            PropertyKey::Str(name) if self.interns.get(name).starts_with('#') => {
                let priv_env = self.current_class_state().priv_env;
                PropertyKey::Private(self.resolve_private_in(priv_env, name)?)
            }
            other => other,
        };
        let is_static = matches!(
            kind,
            ClassElementKind::StaticMethod
                | ClassElementKind::StaticGetter
                | ClassElementKind::StaticSetter
                | ClassElementKind::StaticField
                | ClassElementKind::StaticBlock
        );
        let home = if is_static {
            self.current_class_state().constructor.as_object()
        } else {
            self.current_class_state().proto.as_object()
        };
        let value = match func {
            Some(func) => {
                let home = home.expect("class state carries its objects");
                let priv_env = self.current_class_state().priv_env;
                let ctx = self.ctx();
                let (script, env) = (ctx.script, ctx.lex_env);
                self.make_function(script, func, env, Some(home), priv_env, Some(key))?
            }
            None => Value::Undefined,
        };
        let class = self.current_class_state_mut();
        match kind {
            ClassElementKind::InstanceField => class.inst_field_count += 1,
            ClassElementKind::Method | ClassElementKind::Getter | ClassElementKind::Setter
                if matches!(key, PropertyKey::Private(_)) =>
            {
                class.inst_priv_method_count += 1;
            }
            _ => {}
        }
        class.elements.push(ClassElement {
            kind,
            key: Some(key),
            value,
            names_function: false,
        });
        Ok(())
    }

    fn resolve_private_in(&mut self, priv_env: Option<HeapId>, name: StringId) -> RunResult<HeapId> {
        let mut cursor = priv_env;
        while let Some(env_id) = cursor {
            let env = self.heap.env(env_id);
            if let Some(store) = env.store()
                && let Some(binding) = store.bindings.get(&name)
                && let Some(Value::PrivateName(private)) = binding.value
            {
                return Ok(private);
            }
            cursor = env.outer;
        }
        Err(RunError::syntax_error(format!(
            "private name {name} is not defined",
            name = self.interns.get(name)
        )))
    }

    /// `ClassInit`: applies the collected elements, runs static elements,
    /// restores the private environment, and delivers the constructor.
    pub(crate) fn class_init(&mut self) -> RunResult<()> {
        let state = self.ctx_mut().states.pop().expect("class state present");
        let State {
            sp,
            kind: StateKind::Class(class),
        } = state
        else {
            unreachable!("ClassInit without a class state")
        };
        self.ctx_mut().stack.truncate(sp);

        let constructor = class.constructor;
        let constructor_obj = constructor.as_object().expect("constructor created before ClassInit");
        let proto = class.proto.as_object().expect("class prototype is an object");

        let mut instance_fields: Vec<ClassField> = Vec::with_capacity(class.inst_field_count);
        let mut instance_priv_methods = Vec::with_capacity(class.inst_priv_method_count);
        let mut static_elements = Vec::new();

        for element in class.elements {
            let target = match element.kind {
                ClassElementKind::Method | ClassElementKind::Getter | ClassElementKind::Setter => proto,
                _ => constructor_obj,
            };
            match element.kind {
                ClassElementKind::Method | ClassElementKind::StaticMethod => {
                    let key = element.key.expect("methods have keys");
                    if let PropertyKey::Private(name) = key {
                        let property = Property {
                            slot: PropertySlot::Data {
                                value: element.value,
                                writable: false,
                            },
                            enumerable: false,
                            configurable: false,
                        };
                        if matches!(element.kind, ClassElementKind::Method) {
                            instance_priv_methods.push((name, property));
                        } else {
                            self.heap.object_mut(constructor_obj).set_own_property(key, property);
                        }
                    } else {
                        let desc = PropertyDescriptor::data(element.value, true, false, true);
                        self.define_own_property(target, key, &desc)?;
                    }
                }
                ClassElementKind::Getter
                | ClassElementKind::Setter
                | ClassElementKind::StaticGetter
                | ClassElementKind::StaticSetter => {
                    let key = element.key.expect("accessors have keys");
                    let is_getter = matches!(element.kind, ClassElementKind::Getter | ClassElementKind::StaticGetter);
                    if let PropertyKey::Private(name) = key {
                        let (mut get, mut set) = (Value::Undefined, Value::Undefined);
                        if is_getter {
                            get = element.value;
                        } else {
                            set = element.value;
                        }
                        let property = Property {
                            slot: PropertySlot::Accessor { get, set },
                            enumerable: false,
                            configurable: false,
                        };
                        if matches!(element.kind, ClassElementKind::Getter | ClassElementKind::Setter) {
                            instance_priv_methods.push((name, property));
                        } else {
                            self.heap.object_mut(constructor_obj).set_own_property(key, property);
                        }
                    } else {
                        let existing = self.heap.object(target).own_property(key).copied();
                        let (mut get, mut set) = match existing {
                            Some(Property {
                                slot: PropertySlot::Accessor { get, set },
                                ..
                            }) => (get, set),
                            _ => (Value::Undefined, Value::Undefined),
                        };
                        if is_getter {
                            get = element.value;
                        } else {
                            set = element.value;
                        }
                        let desc = PropertyDescriptor::accessor(get, set, false, true);
                        self.define_own_property(target, key, &desc)?;
                    }
                }
                ClassElementKind::InstanceField => {
                    instance_fields.push(ClassField {
                        key: element.key.expect("fields have keys"),
                        init: if element.value == Value::Undefined { None } else { Some(element.value) },
                        names_function: element.names_function,
                    });
                }
                ClassElementKind::StaticField | ClassElementKind::StaticBlock => {
                    static_elements.push(element);
                }
            }
        }

        if let ObjectKind::Function(sf) = &mut self.heap.object_mut(constructor_obj).kind {
            sf.fields = instance_fields;
            sf.instance_priv_methods = instance_priv_methods;
        }

        // Static fields and blocks run now, with the constructor as `this`.
        // Their initializer functions are only reachable through this list.
        for element in &static_elements {
            self.temp_roots.push(element.value);
        }
        for element in static_elements {
            match element.kind {
                ClassElementKind::StaticField => {
                    let key = element.key.expect("fields have keys");
                    let value = match element.value {
                        Value::Undefined => Value::Undefined,
                        init => self.call(init, constructor, &[])?,
                    };
                    if let PropertyKey::Private(name) = key {
                        self.heap
                            .object_mut(constructor_obj)
                            .set_own_property(PropertyKey::Private(name), Property::data(value, true, false, false));
                    } else {
                        self.create_data_property(constructor_obj, key, value)?;
                    }
                }
                ClassElementKind::StaticBlock => {
                    self.call(element.value, constructor, &[])?;
                }
                _ => unreachable!("only static elements deferred"),
            }
        }

        self.ctx_mut().priv_env = class.prev_priv_env;
        let dst = class.dst;
        self.ctx_mut().regs[dst.index()] = constructor;
        Ok(())
    }
}
