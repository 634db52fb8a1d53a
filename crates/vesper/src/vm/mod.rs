//! The bytecode interpreter: dispatch loop, state machine, and unwind.
//!
//! One `run_context` invocation drives exactly one frame (the innermost
//! entry of the runtime's context stack). Calls push a new frame and recurse
//! into `run_context`; suspension (`yield`/`await`) moves the whole frame
//! into its heap-resident generator context and returns `FrameExit::Suspend`
//! to the resume entry point.

pub(crate) mod call;
pub(crate) mod generator;

use crate::{
    bytecode::{Op, OpKind, Reg},
    conv::{to_int32, to_uint32},
    error::{PendingError, RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{PropertyKey, WellKnown},
    object::{JsObject, ObjectKind, Property, PropertyDescriptor, PropertySlot},
    operations::{Numeric, PrimitiveHint},
    resource::ResourceTracker,
    runtime::Runtime,
    stack::{
        CallState, CallStateKind, ClassElement, ClassElementKind, IterKind, IteratorRecord, State, StateKind,
        TryNextOp, TryPhase, TryState,
    },
    tracer::VmTracer,
    value::Value,
};

/// How a frame left the dispatch loop.
#[derive(Debug)]
pub(crate) enum FrameExit {
    /// The function returned normally.
    Return(Value),
    /// The frame suspended into its generator context and was popped.
    Suspend,
}

/// Result of one instruction.
enum StepResult {
    Continue,
    Return,
    Suspend,
}

/// Result of the unwind walk for one error.
enum Unwound {
    /// A try state took the error; dispatch continues.
    Handled,
    /// The unwind itself suspended (async iterator close).
    Suspended,
    /// No handler in this frame.
    Rethrow(RunError),
}

impl<T: ResourceTracker, Tr: VmTracer> Runtime<T, Tr> {
    #[inline]
    pub(crate) fn ctx(&self) -> &crate::context::ScriptContext {
        self.contexts.last().expect("no running context")
    }

    #[inline]
    pub(crate) fn ctx_mut(&mut self) -> &mut crate::context::ScriptContext {
        self.contexts.last_mut().expect("no running context")
    }

    #[inline]
    fn reg(&self, reg: Reg) -> Value {
        self.ctx().regs[reg.index()]
    }

    #[inline]
    fn set_reg(&mut self, reg: Reg, value: Value) {
        self.ctx_mut().regs[reg.index()] = value;
    }

    fn jump(&mut self, offset: i32) {
        let ctx = self.ctx_mut();
        let ip = ctx.ip as i64 + i64::from(offset);
        ctx.ip = usize::try_from(ip).expect("validated jump target");
    }

    /// Looks up a property-reference operand.
    fn prop_key(&self, index: u32) -> PropertyKey {
        let script = self.heap.script(self.ctx().script);
        script.prop_refs[index as usize]
    }

    fn binding_name(&self, index: u32) -> crate::intern::StringId {
        let script = self.heap.script(self.ctx().script);
        script.binding_refs[index as usize]
    }

    /// Runs the innermost frame to completion or suspension.
    pub(crate) fn run_context(&mut self) -> RunResult<FrameExit> {
        let entry_depth = self.contexts.len();
        loop {
            debug_assert_eq!(self.contexts.len(), entry_depth, "frame discipline broken");
            if let Err(err) = self.heap.tracker_mut().check_time() {
                self.contexts.pop();
                return Err(err.into());
            }
            self.maybe_collect();

            let ctx = self.ctx();
            let ip = ctx.ip;
            let op = self.heap.script(ctx.script).instrs[ip];
            self.tracer.on_instruction(ip, OpKind::from(&op), self.contexts.len());
            self.ctx_mut().ip = ip + 1;

            // Temporary roots an operation pushed are scoped to its step.
            let roots_mark = self.temp_roots.len();
            let stepped = self.step(op);
            self.temp_roots.truncate(roots_mark);

            match stepped {
                Ok(StepResult::Continue) => {}
                Ok(StepResult::Return) => {
                    let frame = self.contexts.pop().expect("frame present");
                    self.tracer.on_context_pop(self.contexts.len());
                    return Ok(FrameExit::Return(frame.retval));
                }
                Ok(StepResult::Suspend) => {
                    self.tracer.on_suspend(self.contexts.len());
                    return Ok(FrameExit::Suspend);
                }
                Err(err) => match self.unwind(err)? {
                    Unwound::Handled => {}
                    Unwound::Suspended => {
                        self.tracer.on_suspend(self.contexts.len());
                        return Ok(FrameExit::Suspend);
                    }
                    Unwound::Rethrow(err) => {
                        self.contexts.pop();
                        self.tracer.on_context_pop(self.contexts.len());
                        return Err(err);
                    }
                },
            }
        }
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    #[expect(clippy::too_many_lines, reason = "the opcode dispatch is one match by design")]
    fn step(&mut self, op: Op) -> RunResult<StepResult> {
        match op {
            // --- loads ---
            Op::LoadUndefined { dst } => self.set_reg(dst, Value::Undefined),
            Op::LoadNull { dst } => self.set_reg(dst, Value::Null),
            Op::LoadTrue { dst } => self.set_reg(dst, Value::Boolean(true)),
            Op::LoadFalse { dst } => self.set_reg(dst, Value::Boolean(false)),
            Op::LoadThis { dst } => {
                let this = self.resolve_this_binding()?;
                self.set_reg(dst, this);
            }
            Op::LoadNewTarget { dst } => {
                let new_target = self.get_new_target();
                self.set_reg(dst, new_target);
            }
            Op::LoadArg { dst, index } => {
                let value = self.ctx().args.get(usize::from(index)).copied().unwrap_or(Value::Undefined);
                self.set_reg(dst, value);
            }
            Op::LoadRestArgs { dst, start } => {
                let rest: Vec<Value> = self.ctx().args.iter().skip(usize::from(start)).copied().collect();
                let array = self.new_array_from(&rest)?;
                self.set_reg(dst, Value::Object(array));
            }
            Op::LoadConst { dst, index } => {
                let value = self.heap.script(self.ctx().script).values[index as usize];
                self.set_reg(dst, value);
            }
            Op::LoadFunc { dst, func } => {
                let function = self.instantiate_function(func, None)?;
                self.set_reg(dst, function);
            }
            Op::Dup { dst, src } => {
                let value = self.reg(src);
                self.set_reg(dst, value);
            }

            // --- unary ---
            Op::Neg { dst, src } => {
                let value = self.reg(src);
                let result = match self.to_numeric(value)? {
                    Numeric::Number(n) => Value::Number(-n),
                    Numeric::BigInt(b) => self.alloc_big_int(b.neg())?,
                };
                self.set_reg(dst, result);
            }
            Op::BitNot { dst, src } => {
                let value = self.reg(src);
                let result = match self.to_numeric(value)? {
                    Numeric::Number(n) => Value::Number(f64::from(!to_int32(n))),
                    Numeric::BigInt(b) => self.alloc_big_int(b.bit_not())?,
                };
                self.set_reg(dst, result);
            }
            Op::Not { dst, src } => {
                let value = self.reg(src);
                let result = !value.to_boolean(&self.heap);
                self.set_reg(dst, Value::Boolean(result));
            }
            Op::Inc { dst, src } => {
                let value = self.reg(src);
                let result = match self.to_numeric(value)? {
                    Numeric::Number(n) => Value::Number(n + 1.0),
                    Numeric::BigInt(b) => self.alloc_big_int(b.add(&crate::types::JsBigInt::from_i64(1)))?,
                };
                self.set_reg(dst, result);
            }
            Op::Dec { dst, src } => {
                let value = self.reg(src);
                let result = match self.to_numeric(value)? {
                    Numeric::Number(n) => Value::Number(n - 1.0),
                    Numeric::BigInt(b) => self.alloc_big_int(b.sub(&crate::types::JsBigInt::from_i64(1)))?,
                };
                self.set_reg(dst, result);
            }
            Op::TypeOf { dst, src } => {
                let value = self.reg(src);
                let name = value.type_of(&self.heap);
                let result = self.alloc_string(name)?;
                self.set_reg(dst, result);
            }
            Op::TypeOfBinding { dst, binding } => {
                let name = self.binding_name(binding);
                let result = match self.resolve_binding(name) {
                    Ok(value) => {
                        let tag = value.type_of(&self.heap);
                        self.alloc_string(tag)?
                    }
                    Err(err) if matches!(&err, RunError::Native(e) if e.kind == crate::error::NativeErrorKind::ReferenceError) => {
                        self.alloc_string("undefined")?
                    }
                    Err(err) => return Err(err),
                };
                self.set_reg(dst, result);
            }

            // --- binary ---
            Op::Add { dst, lhs, rhs } => {
                let (a, b) = (self.reg(lhs), self.reg(rhs));
                let result = self.binary_add(a, b)?;
                self.set_reg(dst, result);
            }
            Op::Sub { dst, lhs, rhs } => {
                let result = self.numeric_binary(lhs, rhs, |a, b| Ok(a - b), |a, b| Ok(a.sub(b)))?;
                self.set_reg(dst, result);
            }
            Op::Mul { dst, lhs, rhs } => {
                let result = self.numeric_binary(lhs, rhs, |a, b| Ok(a * b), |a, b| Ok(a.mul(b)))?;
                self.set_reg(dst, result);
            }
            Op::Div { dst, lhs, rhs } => {
                let result = self.numeric_binary(lhs, rhs, |a, b| Ok(a / b), |a, b| a.div(b))?;
                self.set_reg(dst, result);
            }
            Op::Mod { dst, lhs, rhs } => {
                let result = self.numeric_binary(lhs, rhs, |a, b| Ok(js_fmod(a, b)), |a, b| a.rem(b))?;
                self.set_reg(dst, result);
            }
            Op::Exp { dst, lhs, rhs } => {
                let result = self.numeric_binary(lhs, rhs, |a, b| Ok(a.powf(b)), |a, b| a.pow(b))?;
                self.set_reg(dst, result);
            }
            Op::Shl { dst, lhs, rhs } => {
                let result = self.numeric_binary(
                    lhs,
                    rhs,
                    |a, b| Ok(f64::from(to_int32(a).wrapping_shl(to_uint32(b) & 31))),
                    |a, b| a.shl(b),
                )?;
                self.set_reg(dst, result);
            }
            Op::Shr { dst, lhs, rhs } => {
                let result = self.numeric_binary(
                    lhs,
                    rhs,
                    |a, b| Ok(f64::from(to_int32(a).wrapping_shr(to_uint32(b) & 31))),
                    |a, b| a.shr(b),
                )?;
                self.set_reg(dst, result);
            }
            Op::UShr { dst, lhs, rhs } => {
                let result = self.numeric_binary(
                    lhs,
                    rhs,
                    |a, b| Ok(f64::from(to_uint32(a).wrapping_shr(to_uint32(b) & 31))),
                    |a, b| a.ushr(b),
                )?;
                self.set_reg(dst, result);
            }
            Op::BitAnd { dst, lhs, rhs } => {
                let result = self.numeric_binary(
                    lhs,
                    rhs,
                    |a, b| Ok(f64::from(to_int32(a) & to_int32(b))),
                    |a, b| Ok(a.bit_and(b)),
                )?;
                self.set_reg(dst, result);
            }
            Op::BitOr { dst, lhs, rhs } => {
                let result = self.numeric_binary(
                    lhs,
                    rhs,
                    |a, b| Ok(f64::from(to_int32(a) | to_int32(b))),
                    |a, b| Ok(a.bit_or(b)),
                )?;
                self.set_reg(dst, result);
            }
            Op::BitXor { dst, lhs, rhs } => {
                let result = self.numeric_binary(
                    lhs,
                    rhs,
                    |a, b| Ok(f64::from(to_int32(a) ^ to_int32(b))),
                    |a, b| Ok(a.bit_xor(b)),
                )?;
                self.set_reg(dst, result);
            }
            Op::Lt { dst, lhs, rhs } => {
                let result = self.relational(lhs, rhs, |o| o == std::cmp::Ordering::Less)?;
                self.set_reg(dst, result);
            }
            Op::Le { dst, lhs, rhs } => {
                let result = self.relational(lhs, rhs, |o| o != std::cmp::Ordering::Greater)?;
                self.set_reg(dst, result);
            }
            Op::Gt { dst, lhs, rhs } => {
                let result = self.relational(lhs, rhs, |o| o == std::cmp::Ordering::Greater)?;
                self.set_reg(dst, result);
            }
            Op::Ge { dst, lhs, rhs } => {
                let result = self.relational(lhs, rhs, |o| o != std::cmp::Ordering::Less)?;
                self.set_reg(dst, result);
            }
            Op::Eq { dst, lhs, rhs } => {
                let (a, b) = (self.reg(lhs), self.reg(rhs));
                let result = self.loose_equals(a, b)?;
                self.set_reg(dst, Value::Boolean(result));
            }
            Op::Ne { dst, lhs, rhs } => {
                let (a, b) = (self.reg(lhs), self.reg(rhs));
                let result = self.loose_equals(a, b)?;
                self.set_reg(dst, Value::Boolean(!result));
            }
            Op::StrictEq { dst, lhs, rhs } => {
                let result = self.reg(lhs).strict_equals(self.reg(rhs), &self.heap);
                self.set_reg(dst, Value::Boolean(result));
            }
            Op::StrictNe { dst, lhs, rhs } => {
                let result = !self.reg(lhs).strict_equals(self.reg(rhs), &self.heap);
                self.set_reg(dst, Value::Boolean(result));
            }
            Op::HasProp { dst, lhs, rhs } => {
                let key_value = self.reg(lhs);
                let target = self.reg(rhs);
                let Some(obj) = target.as_object() else {
                    return Err(RunError::type_error("cannot use 'in' operator on a non-object"));
                };
                let key = self.to_property_key(key_value)?;
                let result = self.has_property(obj, key)?;
                self.set_reg(dst, Value::Boolean(result));
            }
            Op::InstanceOf { dst, lhs, rhs } => {
                let (value, target) = (self.reg(lhs), self.reg(rhs));
                let result = self.instance_of(value, target)?;
                self.set_reg(dst, Value::Boolean(result));
            }

            // --- bindings ---
            Op::BindingInit { binding, src } => {
                let name = self.binding_name(binding);
                let value = self.reg(src);
                self.initialize_binding(name, value)?;
            }
            Op::BindingSet { binding, src } => {
                let name = self.binding_name(binding);
                let value = self.reg(src);
                self.set_binding(name, value)?;
            }
            Op::BindingGet { dst, binding } => {
                let name = self.binding_name(binding);
                let value = self.resolve_binding(name)?;
                self.set_reg(dst, value);
            }
            Op::DelBinding { dst, binding } => {
                let name = self.binding_name(binding);
                let deleted = self.delete_binding(name)?;
                self.set_reg(dst, Value::Boolean(deleted));
            }

            // --- properties ---
            Op::PropGet { dst, obj, prop } => {
                let target = self.reg(obj);
                let key = self.prop_key(prop);
                let value = self.get(target, key)?;
                self.set_reg(dst, value);
            }
            Op::PropGetExpr { dst, obj, key } => {
                let target = self.reg(obj);
                let key_value = self.reg(key);
                let key = self.to_property_key(key_value)?;
                let value = self.get(target, key)?;
                self.set_reg(dst, value);
            }
            Op::PropSet { obj, prop, src } => {
                let target = self.reg(obj);
                let key = self.prop_key(prop);
                let value = self.reg(src);
                self.put_value(target, key, value)?;
            }
            Op::PropSetExpr { obj, key, src } => {
                let target = self.reg(obj);
                let key_value = self.reg(key);
                let value = self.reg(src);
                let key = self.to_property_key(key_value)?;
                self.put_value(target, key, value)?;
            }
            Op::SuperPropGet { dst, prop } => {
                let key = self.prop_key(prop);
                let (base, this) = self.super_base()?;
                let value = self.get_with_receiver(base, key, this)?;
                self.set_reg(dst, value);
            }
            Op::SuperPropSet { prop, src } => {
                let key = self.prop_key(prop);
                let value = self.reg(src);
                let (base, this) = self.super_base()?;
                let Some(base_obj) = base.as_object() else {
                    return Err(RunError::type_error("super base is not an object"));
                };
                let ok = self.set(base_obj, key, value, this)?;
                if !ok && self.current_strict() {
                    return Err(RunError::type_error("cannot assign to read only super property"));
                }
            }
            Op::PrivGet { dst, obj, r#priv } => {
                let target = self.reg(obj);
                let name = self.resolve_private_name(r#priv)?;
                let Some(target_obj) = target.as_object() else {
                    return Err(RunError::type_error("cannot read private member of a non-object"));
                };
                let value = self.private_get(target_obj, name)?;
                self.set_reg(dst, value);
            }
            Op::PrivSet { obj, r#priv, src } => {
                let target = self.reg(obj);
                let value = self.reg(src);
                let name = self.resolve_private_name(r#priv)?;
                let Some(target_obj) = target.as_object() else {
                    return Err(RunError::type_error("cannot write private member of a non-object"));
                };
                self.private_set(target_obj, name, value)?;
            }
            Op::DelProp { dst, obj, prop } => {
                let target = self.reg(obj);
                let key = self.prop_key(prop);
                let result = self.delete_on_value(target, key)?;
                self.set_reg(dst, Value::Boolean(result));
            }
            Op::DelPropExpr { dst, obj, key } => {
                let target = self.reg(obj);
                let key_value = self.reg(key);
                let key = self.to_property_key(key_value)?;
                let result = self.delete_on_value(target, key)?;
                self.set_reg(dst, Value::Boolean(result));
            }

            // --- control ---
            Op::Jump { offset } => self.jump(offset),
            Op::JumpTrue { cond, offset } => {
                if self.reg(cond).to_boolean(&self.heap) {
                    self.jump(offset);
                }
            }
            Op::JumpFalse { cond, offset } => {
                if !self.reg(cond).to_boolean(&self.heap) {
                    self.jump(offset);
                }
            }
            Op::ReturnValue { src } => {
                let value = self.reg(src);
                self.ctx_mut().retval = value;
                return self.do_return();
            }
            Op::Throw { src } => {
                let value = self.reg(src);
                if self.throw_dump {
                    self.dump_throw(value);
                }
                return Err(RunError::Thrown(value));
            }
            Op::Debugger => {
                // Reserved for a host debugger hook.
            }

            // --- calls ---
            Op::PushCall { func, this } => {
                let sp = self.ctx().stack.len();
                let state = CallState {
                    func: self.reg(func),
                    this: self.reg(this),
                    base: sp,
                    argc: 0,
                    kind: CallStateKind::Call,
                };
                self.push_state(StateKind::Call(state));
            }
            Op::PushNew { func } => {
                let sp = self.ctx().stack.len();
                let state = CallState {
                    func: self.reg(func),
                    this: Value::Undefined,
                    base: sp,
                    argc: 0,
                    kind: CallStateKind::New,
                };
                self.push_state(StateKind::Call(state));
            }
            Op::PushSuperCall => {
                let sp = self.ctx().stack.len();
                let state = CallState {
                    func: Value::Undefined,
                    this: Value::Undefined,
                    base: sp,
                    argc: 0,
                    kind: CallStateKind::SuperCall,
                };
                self.push_state(StateKind::Call(state));
            }
            Op::ArgAdd { src } => {
                let value = self.reg(src);
                let ctx = self.ctx_mut();
                ctx.stack.push(value);
                match ctx.states.last_mut() {
                    Some(State {
                        kind: StateKind::Call(call),
                        ..
                    }) => call.argc += 1,
                    _ => unreachable!("ArgAdd without a call state"),
                }
            }
            Op::SpreadArgsAdd { src } => {
                let value = self.reg(src);
                let mut record = self.get_iterator(value, IterKind::Sync)?;
                while let Some(item) = self.iterator_step(&mut record)? {
                    let ctx = self.ctx_mut();
                    ctx.stack.push(item);
                    match ctx.states.last_mut() {
                        Some(State {
                            kind: StateKind::Call(call),
                            ..
                        }) => call.argc += 1,
                        _ => unreachable!("SpreadArgsAdd without a call state"),
                    }
                }
            }
            Op::Call { dst } => {
                let result = self.finish_call(false)?;
                self.set_reg(dst, result);
            }
            Op::TailCall { dst } => {
                return self.finish_tail_call(dst);
            }
            Op::Eval { dst } => {
                let result = self.finish_eval_call()?;
                self.set_reg(dst, result);
            }
            Op::New { dst } => {
                let result = self.finish_construct()?;
                self.set_reg(dst, result);
            }
            Op::SuperCall { dst } => {
                let result = self.finish_super_call()?;
                self.set_reg(dst, result);
            }

            // --- concurrency ---
            Op::Yield { dst, src } => {
                let value = self.reg(src);
                return self.do_yield(dst, value);
            }
            Op::Await { dst, src } => {
                let value = self.reg(src);
                return self.do_await(dst, value);
            }

            // --- states ---
            Op::PushLexEnv { decl } => {
                self.push_lex_env_state(decl)?;
            }
            Op::PopState => {
                return self.pop_state_op();
            }
            Op::PushEnum { src } => {
                let value = self.reg(src);
                let keys = self.enumerate_keys(value)?;
                self.push_state(StateKind::ForIn { keys });
            }
            Op::PushIter { src } => {
                let value = self.reg(src);
                let iter = self.get_iterator(value, IterKind::Sync)?;
                self.push_state(StateKind::ForOf { iter });
            }
            Op::PushAsyncIter { src } => {
                let value = self.reg(src);
                let iter = self.get_iterator(value, IterKind::Async)?;
                self.push_state(StateKind::ForOf { iter });
            }
            Op::ForStep { dst, done_offset } => {
                return self.for_step(dst, done_offset);
            }
            Op::AsyncForStep { dst, done_offset } => {
                return self.async_for_step(dst, done_offset);
            }
            Op::PushTry {
                catch_offset,
                finally_offset,
            } => {
                let base = self.ctx().ip;
                let state = TryState {
                    phase: TryPhase::Try,
                    next_op: TryNextOp::Normal,
                    error: None,
                    catch_ip: catch_offset.map(|o| offset_ip(base, o)),
                    finally_ip: finally_offset.map(|o| offset_ip(base, o)),
                };
                self.push_state(StateKind::Try(state));
            }
            Op::CatchError { dst } => {
                let pending = match self.ctx_mut().states.last_mut() {
                    Some(State {
                        kind: StateKind::Try(try_state),
                        ..
                    }) => try_state.error.take(),
                    _ => unreachable!("CatchError without a try state"),
                };
                let value = match pending {
                    Some(pending) => self.materialize_error(pending),
                    None => Value::Undefined,
                };
                self.set_reg(dst, value);
            }
            Op::Finally => {
                // Phase was set by the transfer that targeted the finally
                // block; falling in from normal flow goes through TryEnd.
            }
            Op::TryEnd => {
                return self.try_end();
            }

            // --- literals ---
            Op::PushNewArray { dst } => {
                let array = self.new_array_from(&[])?;
                self.set_reg(dst, Value::Object(array));
                self.push_state(StateKind::Array {
                    array: Value::Object(array),
                    next_index: 0,
                });
            }
            Op::ArrayAdd { src } => {
                let value = self.reg(src);
                let (array, index) = match self.ctx_mut().states.last_mut() {
                    Some(State {
                        kind: StateKind::Array { array, next_index },
                        ..
                    }) => {
                        let index = *next_index;
                        *next_index += 1;
                        (*array, index)
                    }
                    _ => unreachable!("ArrayAdd without an array state"),
                };
                let array = array.as_object().expect("array state holds an array");
                self.create_data_property(array, PropertyKey::Index(index), value)?;
            }
            Op::ArrayElision => {
                let (array, index) = match self.ctx_mut().states.last_mut() {
                    Some(State {
                        kind: StateKind::Array { array, next_index },
                        ..
                    }) => {
                        let index = *next_index;
                        *next_index += 1;
                        (*array, index)
                    }
                    _ => unreachable!("ArrayElision without an array state"),
                };
                // A hole still extends the length.
                let array = array.as_object().expect("array state holds an array");
                if let ObjectKind::Array { length, .. } = &mut self.heap.object_mut(array).kind
                    && index >= *length
                {
                    *length = index + 1;
                }
            }
            Op::ArraySpread { src } => {
                let value = self.reg(src);
                let mut record = self.get_iterator(value, IterKind::Sync)?;
                while let Some(item) = self.iterator_step(&mut record)? {
                    let (array, index) = match self.ctx_mut().states.last_mut() {
                        Some(State {
                            kind: StateKind::Array { array, next_index },
                            ..
                        }) => {
                            let index = *next_index;
                            *next_index += 1;
                            (*array, index)
                        }
                        _ => unreachable!("ArraySpread without an array state"),
                    };
                    let array = array.as_object().expect("array state holds an array");
                    self.create_data_property(array, PropertyKey::Index(index), item)?;
                }
            }
            Op::PushNewObject { dst } => {
                let proto = self.realm.intrinsics.object_prototype;
                let obj = self.alloc_object(JsObject::ordinary(Some(proto)))?;
                self.set_reg(dst, Value::Object(obj));
                self.push_state(StateKind::Object {
                    object: Value::Object(obj),
                });
            }
            Op::ObjectAdd { prop, src } => {
                let key = self.prop_key(prop);
                let value = self.reg(src);
                let object = self.literal_object();
                self.create_data_property(object, key, value)?;
            }
            Op::ObjectAddExpr { key, src } => {
                let key_value = self.reg(key);
                let value = self.reg(src);
                let key = self.to_property_key(key_value)?;
                let object = self.literal_object();
                self.create_data_property(object, key, value)?;
            }
            Op::ObjectSpread { src } => {
                let source = self.reg(src);
                let object = self.literal_object();
                self.copy_data_properties(object, source, &[])?;
            }
            Op::ObjectMethodAdd { prop, func } => {
                self.object_literal_method(prop, func, MethodSlotKind::Method)?;
            }
            Op::ObjectGetterAdd { prop, func } => {
                self.object_literal_method(prop, func, MethodSlotKind::Getter)?;
            }
            Op::ObjectSetterAdd { prop, func } => {
                self.object_literal_method(prop, func, MethodSlotKind::Setter)?;
            }
            Op::SetProto { src } => {
                let proto_value = self.reg(src);
                let object = self.literal_object();
                match proto_value {
                    Value::Object(id) => {
                        self.set_prototype_of(object, Some(id))?;
                    }
                    Value::Null => {
                        self.set_prototype_of(object, None)?;
                    }
                    // Non-object __proto__ values are ignored.
                    _ => {}
                }
            }
            Op::PushConcat => {
                let sp = self.ctx().stack.len();
                // Concat reuses the array state over the value slots.
                self.push_state(StateKind::Array {
                    array: Value::Undefined,
                    next_index: 0,
                });
                debug_assert_eq!(self.ctx().states.last().expect("just pushed").sp, sp);
            }
            Op::ConcatAdd { src } => {
                let value = self.reg(src);
                let string = self.to_string_value(value)?;
                self.ctx_mut().stack.push(string);
            }
            Op::Concat { dst } => {
                let state = self.ctx_mut().states.pop().expect("Concat without a state");
                debug_assert!(matches!(state.kind, StateKind::Array { .. }));
                let parts: Vec<Value> = self.ctx_mut().stack.split_off(state.sp);
                let mut text = String::new();
                for part in parts {
                    text.push_str(&self.string_content(part)?);
                }
                let result = self.alloc_string(text)?;
                self.set_reg(dst, result);
            }

            // --- classes ---
            Op::PushClass {
                dst,
                name,
                parent,
                priv_env,
            } => {
                self.push_class_state(dst, name, parent, priv_env)?;
            }
            Op::ConstrCreate { func } => {
                self.class_create_constructor(Some(func))?;
            }
            Op::DefaultConstr => {
                self.class_create_constructor(None)?;
            }
            Op::DerivedDefaultConstr => {
                self.class_create_constructor(None)?;
            }
            Op::MethodAdd { prop, func } => self.class_add_element(ClassElementKind::Method, prop, Some(func))?,
            Op::GetterAdd { prop, func } => self.class_add_element(ClassElementKind::Getter, prop, Some(func))?,
            Op::SetterAdd { prop, func } => self.class_add_element(ClassElementKind::Setter, prop, Some(func))?,
            Op::StaticMethodAdd { prop, func } => {
                self.class_add_element(ClassElementKind::StaticMethod, prop, Some(func))?;
            }
            Op::StaticGetterAdd { prop, func } => {
                self.class_add_element(ClassElementKind::StaticGetter, prop, Some(func))?;
            }
            Op::StaticSetterAdd { prop, func } => {
                self.class_add_element(ClassElementKind::StaticSetter, prop, Some(func))?;
            }
            Op::FieldAdd { prop, func } => self.class_add_element(ClassElementKind::StaticField, prop, func)?,
            Op::InstFieldAdd { prop, func } => self.class_add_element(ClassElementKind::InstanceField, prop, func)?,
            Op::SetAfField => {
                match self.ctx_mut().states.last_mut() {
                    Some(State {
                        kind: StateKind::Class(class),
                        ..
                    }) => {
                        if let Some(element) = class.elements.last_mut() {
                            element.names_function = true;
                        }
                    }
                    _ => unreachable!("SetAfField without a class state"),
                }
            }
            Op::StaticBlockAdd { func } => {
                let function = self.instantiate_class_method(func)?;
                match self.ctx_mut().states.last_mut() {
                    Some(State {
                        kind: StateKind::Class(class),
                        ..
                    }) => class.elements.push(ClassElement {
                        kind: ClassElementKind::StaticBlock,
                        key: None,
                        value: function,
                        names_function: false,
                    }),
                    _ => unreachable!("StaticBlockAdd without a class state"),
                }
            }
            Op::ClassInit => {
                self.class_init()?;
            }

            // --- destructuring ---
            Op::PushArrayAssi { src } => {
                let value = self.reg(src);
                let iter = self.get_iterator(value, IterKind::Sync)?;
                self.push_state(StateKind::ArrayAssi { iter });
            }
            Op::NextArrayItem { dst } => {
                let item = {
                    let mut iter = match self.ctx().states.last() {
                        Some(State {
                            kind: StateKind::ArrayAssi { iter },
                            ..
                        }) => *iter,
                        _ => unreachable!("NextArrayItem without an array pattern state"),
                    };
                    let item = if iter.done { None } else { self.iterator_step(&mut iter)? };
                    match self.ctx_mut().states.last_mut() {
                        Some(State {
                            kind: StateKind::ArrayAssi { iter: slot },
                            ..
                        }) => *slot = iter,
                        _ => unreachable!("array pattern state vanished"),
                    }
                    item
                };
                self.set_reg(dst, item.unwrap_or(Value::Undefined));
            }
            Op::RestArrayItems { dst } => {
                let mut iter = match self.ctx().states.last() {
                    Some(State {
                        kind: StateKind::ArrayAssi { iter },
                        ..
                    }) => *iter,
                    _ => unreachable!("RestArrayItems without an array pattern state"),
                };
                let mut rest = Vec::new();
                if !iter.done {
                    while let Some(item) = self.iterator_step(&mut iter)? {
                        rest.push(item);
                    }
                }
                match self.ctx_mut().states.last_mut() {
                    Some(State {
                        kind: StateKind::ArrayAssi { iter: slot },
                        ..
                    }) => *slot = iter,
                    _ => unreachable!("array pattern state vanished"),
                }
                let array = self.new_array_from(&rest)?;
                self.set_reg(dst, Value::Object(array));
            }
            Op::PushObjectAssi { src } => {
                let value = self.reg(src);
                if value.is_nullish() {
                    return Err(RunError::type_error("cannot destructure undefined or null"));
                }
                self.push_state(StateKind::ObjectAssi {
                    object: value,
                    seen: Vec::new(),
                });
            }
            Op::GetObjectProp { dst, prop } => {
                let key = self.prop_key(prop);
                let value = self.object_pattern_get(key)?;
                self.set_reg(dst, value);
            }
            Op::GetObjectPropExpr { dst, key } => {
                let key_value = self.reg(key);
                let key = self.to_property_key(key_value)?;
                let value = self.object_pattern_get(key)?;
                self.set_reg(dst, value);
            }
            Op::RestObjectProps { dst } => {
                let (source, seen) = match self.ctx().states.last() {
                    Some(State {
                        kind: StateKind::ObjectAssi { object, seen },
                        ..
                    }) => (*object, seen.clone()),
                    _ => unreachable!("RestObjectProps without an object pattern state"),
                };
                let proto = self.realm.intrinsics.object_prototype;
                let rest = self.alloc_object(JsObject::ordinary(Some(proto)))?;
                self.copy_data_properties(rest, source, &seen)?;
                self.set_reg(dst, Value::Object(rest));
            }

            // --- scope ---
            Op::PushWith { src } => {
                let value = self.reg(src);
                let obj = self.to_object(value)?;
                self.push_with_env(obj)?;
            }
        }
        Ok(StepResult::Continue)
    }

    // =========================================================================
    // Binary helpers
    // =========================================================================

    /// `+`: string concatenation or numeric addition after ToPrimitive.
    fn binary_add(&mut self, a: Value, b: Value) -> RunResult<Value> {
        let pa = self.to_primitive(a, PrimitiveHint::Default)?;
        // The second conversion can run script; pa lives only here.
        self.temp_roots.push(pa);
        let pb = self.to_primitive(b, PrimitiveHint::Default)?;
        self.temp_roots.push(pb);
        if pa.is_string() || pb.is_string() {
            let ca = self.coerce_for_concat(pa)?;
            let mut text = self.string_content(ca)?;
            let cb = self.coerce_for_concat(pb)?;
            text.push_str(&self.string_content(cb)?);
            return self.alloc_string(text);
        }
        let (na, nb) = (self.to_numeric(pa)?, self.to_numeric(pb)?);
        match (na, nb) {
            (Numeric::Number(x), Numeric::Number(y)) => Ok(Value::Number(x + y)),
            (Numeric::BigInt(x), Numeric::BigInt(y)) => self.alloc_big_int(x.add(&y)),
            _ => Err(RunError::type_error("cannot mix BigInt and other types, use explicit conversions")),
        }
    }

    /// Pre-renders non-string primitives before concatenation (symbols throw).
    fn coerce_for_concat(&mut self, value: Value) -> RunResult<Value> {
        if value.is_string() { Ok(value) } else { self.to_string_value(value) }
    }

    /// The Number/BigInt fork shared by every arithmetic opcode. Exactly one
    /// BigInt operand is a TypeError.
    fn numeric_binary(
        &mut self,
        lhs: Reg,
        rhs: Reg,
        number_op: impl FnOnce(f64, f64) -> RunResult<f64>,
        big_op: impl FnOnce(&crate::types::JsBigInt, &crate::types::JsBigInt) -> RunResult<crate::types::JsBigInt>,
    ) -> RunResult<Value> {
        let (a, b) = (self.reg(lhs), self.reg(rhs));
        let (na, nb) = (self.to_numeric(a)?, self.to_numeric(b)?);
        match (na, nb) {
            (Numeric::Number(x), Numeric::Number(y)) => Ok(Value::Number(number_op(x, y)?)),
            (Numeric::BigInt(x), Numeric::BigInt(y)) => {
                let result = big_op(&x, &y)?;
                self.alloc_big_int(result)
            }
            _ => Err(RunError::type_error("cannot mix BigInt and other types, use explicit conversions")),
        }
    }

    /// Abstract relational comparison.
    fn relational(&mut self, lhs: Reg, rhs: Reg, test: impl FnOnce(std::cmp::Ordering) -> bool) -> RunResult<Value> {
        let a = self.reg(lhs);
        let b = self.reg(rhs);
        let pa = self.to_primitive(a, PrimitiveHint::Number)?;
        self.temp_roots.push(pa);
        let pb = self.to_primitive(b, PrimitiveHint::Number)?;
        self.temp_roots.push(pb);
        if pa.is_string() && pb.is_string() {
            let sa = self.string_content(pa)?;
            let sb = self.string_content(pb)?;
            return Ok(Value::Boolean(test(sa.cmp(&sb))));
        }
        let ordering = match (pa, pb) {
            (Value::BigInt(x), Value::BigInt(y)) => Some(self.heap.big_int(x).compare(self.heap.big_int(y))),
            (Value::BigInt(x), y) => {
                let n = self.to_number(y)?;
                self.heap.big_int(x).compare_f64(n)
            }
            (x, Value::BigInt(y)) => {
                let n = self.to_number(x)?;
                self.heap.big_int(y).compare_f64(n).map(std::cmp::Ordering::reverse)
            }
            (x, y) => {
                let nx = self.to_number(x)?;
                let ny = self.to_number(y)?;
                nx.partial_cmp(&ny)
            }
        };
        Ok(Value::Boolean(ordering.is_some_and(test)))
    }

    // =========================================================================
    // Property write paths
    // =========================================================================

    fn put_value(&mut self, target: Value, key: PropertyKey, value: Value) -> RunResult<()> {
        let strict = self.current_strict();
        match target {
            Value::Object(obj) => {
                let ok = self.set(obj, key, value, target)?;
                if !ok && strict {
                    return Err(RunError::type_error(format!(
                        "cannot assign to read only property '{key}'",
                        key = self.render_key(key)
                    )));
                }
                Ok(())
            }
            Value::Undefined | Value::Null => Err(RunError::type_error(format!(
                "cannot set properties of {kind}",
                kind = if target == Value::Null { "null" } else { "undefined" }
            ))),
            // Primitive receivers: the write is lost, but strict mode throws.
            _ => {
                if strict {
                    return Err(RunError::type_error("cannot create property on primitive value"));
                }
                Ok(())
            }
        }
    }

    fn delete_on_value(&mut self, target: Value, key: PropertyKey) -> RunResult<bool> {
        match target {
            Value::Object(obj) => {
                let deleted = self.delete_property(obj, key)?;
                if !deleted && self.current_strict() {
                    return Err(RunError::type_error(format!(
                        "cannot delete property '{key}'",
                        key = self.render_key(key)
                    )));
                }
                Ok(deleted)
            }
            Value::Undefined | Value::Null => Err(RunError::type_error("cannot convert undefined or null to object")),
            _ => Ok(true),
        }
    }

    /// `{a, …rest} = src` single-property read, recording the key.
    fn object_pattern_get(&mut self, key: PropertyKey) -> RunResult<Value> {
        let source = match self.ctx_mut().states.last_mut() {
            Some(State {
                kind: StateKind::ObjectAssi { object, seen },
                ..
            }) => {
                seen.push(key);
                *object
            }
            _ => unreachable!("object pattern read without its state"),
        };
        self.get(source, key)
    }

    /// CopyDataProperties: own enumerable keys minus the excluded set.
    fn copy_data_properties(&mut self, target: HeapId, source: Value, excluded: &[PropertyKey]) -> RunResult<()> {
        if source.is_nullish() {
            return Ok(());
        }
        let from = self.to_object(source)?;
        for key in self.own_property_keys(from)? {
            if excluded.contains(&key) || matches!(key, PropertyKey::Private(_)) {
                continue;
            }
            if let Some(desc) = self.get_own_property(from, key)?
                && desc.enumerable == Some(true)
            {
                let value = self.get_with_receiver(Value::Object(from), key, source)?;
                self.create_data_property(target, key, value)?;
            }
        }
        Ok(())
    }

    /// Destination of the innermost object/array literal state.
    fn literal_object(&self) -> HeapId {
        for state in self.ctx().states.iter().rev() {
            if let StateKind::Object { object } = &state.kind {
                return object.as_object().expect("literal state holds an object");
            }
        }
        unreachable!("object literal op without an object state")
    }

    fn object_literal_method(&mut self, prop: u32, func: u32, slot: MethodSlotKind) -> RunResult<()> {
        let key = self.prop_key(prop);
        let object = self.literal_object();
        let function = self.instantiate_method(func, object, key)?;
        match slot {
            MethodSlotKind::Method => {
                let desc = PropertyDescriptor::data(function, true, true, true);
                self.define_own_property(object, key, &desc)?;
            }
            MethodSlotKind::Getter | MethodSlotKind::Setter => {
                let existing = self.heap.object(object).own_property(key).copied();
                let (mut get, mut set) = match existing {
                    Some(Property {
                        slot: PropertySlot::Accessor { get, set },
                        ..
                    }) => (get, set),
                    _ => (Value::Undefined, Value::Undefined),
                };
                if matches!(slot, MethodSlotKind::Getter) {
                    get = function;
                } else {
                    set = function;
                }
                let desc = PropertyDescriptor::accessor(get, set, true, true);
                self.define_own_property(object, key, &desc)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // State push/pop, for-in/of, try machine
    // =========================================================================

    pub(crate) fn push_state(&mut self, kind: StateKind) {
        let sp = self.ctx().stack.len();
        self.ctx_mut().states.push(State { sp, kind });
    }

    /// Pops the top state and runs its deinit. `during_throw` suppresses
    /// iterator-close errors so the original error wins.
    fn deinit_top_state(&mut self, during_throw: bool) -> RunResult<()> {
        let state = self.ctx_mut().states.pop().expect("state stack underflow");
        self.ctx_mut().stack.truncate(state.sp);
        match state.kind {
            StateKind::LexEnv { saved_env } => {
                self.ctx_mut().lex_env = saved_env;
                Ok(())
            }
            StateKind::ForOf { iter } | StateKind::ArrayAssi { iter } => {
                self.iterator_close(&iter, during_throw)
            }
            StateKind::ForIn { .. }
            | StateKind::Class(_)
            | StateKind::Call(_)
            | StateKind::Array { .. }
            | StateKind::Object { .. }
            | StateKind::ObjectAssi { .. }
            | StateKind::Try(_) => Ok(()),
        }
    }

    /// The `PopState` opcode: try states run their machine, everything else
    /// deinitializes.
    fn pop_state_op(&mut self) -> RunResult<StepResult> {
        let is_try = matches!(
            self.ctx().states.last(),
            Some(State {
                kind: StateKind::Try(_),
                ..
            })
        );
        if is_try {
            return self.finish_try_state();
        }
        // Async for-of close can itself suspend.
        let closes_async_iter = matches!(
            self.ctx().states.last(),
            Some(State {
                kind: StateKind::ForOf {
                    iter: IteratorRecord {
                        kind: IterKind::Async,
                        done: false,
                        ..
                    }
                },
                ..
            })
        );
        if closes_async_iter {
            return self.close_async_iter_state(None, false);
        }
        self.deinit_top_state(false)?;
        Ok(StepResult::Continue)
    }

    /// Normal completion of a try or catch block.
    fn try_end(&mut self) -> RunResult<StepResult> {
        let (finally_ip, phase) = match self.ctx().states.last() {
            Some(State {
                kind: StateKind::Try(try_state),
                ..
            }) => (try_state.finally_ip, try_state.phase),
            _ => unreachable!("TryEnd without a try state"),
        };
        debug_assert!(matches!(phase, TryPhase::Try | TryPhase::Catch));
        match finally_ip {
            Some(finally_ip) => {
                if let Some(State {
                    kind: StateKind::Try(try_state),
                    ..
                }) = self.ctx_mut().states.last_mut()
                {
                    try_state.phase = TryPhase::Finally;
                    try_state.next_op = TryNextOp::Normal;
                    try_state.error = None;
                }
                self.ctx_mut().ip = finally_ip;
            }
            None => {
                self.deinit_top_state(false)?;
            }
        }
        Ok(StepResult::Continue)
    }

    /// `PopState` on a try state: end of the finally block (or of a
    /// catch-only try) dispatches the recorded next operation.
    fn finish_try_state(&mut self) -> RunResult<StepResult> {
        let state = self.ctx_mut().states.pop().expect("try state present");
        let StateKind::Try(try_state) = state.kind else {
            unreachable!("checked try state")
        };
        self.ctx_mut().stack.truncate(state.sp);
        match try_state.next_op {
            TryNextOp::Normal => Ok(StepResult::Continue),
            TryNextOp::Throw => {
                let pending = try_state.error.expect("throw continuation carries its error");
                Err(pending.into())
            }
            TryNextOp::Return => self.do_return(),
        }
    }

    fn for_step(&mut self, dst: Reg, done_offset: i32) -> RunResult<StepResult> {
        // The jump is relative to the instruction after ForStep; ip already
        // advanced, matching Jump semantics.
        enum Kind {
            Enum(HeapId),
            Iter(IteratorRecord),
        }
        let kind = match self.ctx().states.last() {
            Some(State {
                kind: StateKind::ForIn { keys },
                ..
            }) => Kind::Enum(*keys),
            Some(State {
                kind: StateKind::ForOf { iter },
                ..
            }) => Kind::Iter(*iter),
            _ => unreachable!("ForStep without an iteration state"),
        };
        match kind {
            Kind::Enum(keys) => loop {
                let key = self.heap.key_list_mut(keys).step();
                match key {
                    Some(PropertyKey::Symbol(_) | PropertyKey::Private(_)) => {}
                    Some(key) => {
                        let value = self.key_to_value(key)?;
                        self.set_reg(dst, value);
                        return Ok(StepResult::Continue);
                    }
                    None => {
                        self.jump(done_offset);
                        return Ok(StepResult::Continue);
                    }
                }
            },
            Kind::Iter(mut iter) => {
                let stepped = self.iterator_step(&mut iter);
                if let Some(State {
                    kind: StateKind::ForOf { iter: slot },
                    ..
                }) = self.ctx_mut().states.last_mut()
                {
                    *slot = iter;
                }
                match stepped? {
                    Some(value) => self.set_reg(dst, value),
                    None => self.jump(done_offset),
                }
                Ok(StepResult::Continue)
            }
        }
    }

    fn push_lex_env_state(&mut self, decl: Option<u32>) -> RunResult<()> {
        let outer = self.ctx().lex_env;
        let outer_ancestors = self.heap.env(outer).ancestors.clone();
        let env = crate::environment::Environment::declarative(Some(outer), &outer_ancestors);
        let env_id = self.alloc(HeapData::Env(env))?;
        self.push_state(StateKind::LexEnv { saved_env: outer });
        self.ctx_mut().lex_env = env_id;
        if let Some(decl) = decl {
            self.instantiate_decl_group(decl, env_id)?;
        }
        Ok(())
    }

    fn push_with_env(&mut self, obj: HeapId) -> RunResult<()> {
        let outer = self.ctx().lex_env;
        let outer_ancestors = self.heap.env(outer).ancestors.clone();
        let env = crate::environment::Environment::object(Some(outer), &outer_ancestors, obj, true);
        let env_id = self.alloc(HeapData::Env(env))?;
        self.push_state(StateKind::LexEnv { saved_env: outer });
        self.ctx_mut().lex_env = env_id;
        Ok(())
    }

    /// Instantiates a declaration group into an environment.
    pub(crate) fn instantiate_decl_group(&mut self, decl: u32, env_id: HeapId) -> RunResult<()> {
        let items: Vec<crate::script::LoadedDeclItem> =
            self.heap.script(self.ctx().script).decls[decl as usize].clone();
        for item in &items {
            match item.kind {
                crate::script::DeclKind::Let | crate::script::DeclKind::Var => {
                    if let Some(store) = self.heap.env_mut(env_id).store_mut() {
                        store.create_mutable(item.name, false);
                        if matches!(item.kind, crate::script::DeclKind::Var) {
                            store.initialize(item.name, Value::Undefined);
                        }
                    }
                }
                crate::script::DeclKind::Const => {
                    if let Some(store) = self.heap.env_mut(env_id).store_mut() {
                        store.create_immutable(item.name, true);
                    }
                }
                crate::script::DeclKind::Function => {
                    let func = item.func.expect("validated function declaration");
                    let function = self.instantiate_function(func, None)?;
                    if let Some(store) = self.heap.env_mut(env_id).store_mut() {
                        store.create_mutable(item.name, false);
                        store.initialize(item.name, function);
                    }
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Return and unwind
    // =========================================================================

    /// Return path: every open state deinitializes, and an armed finally
    /// intercepts the return.
    pub(crate) fn do_return(&mut self) -> RunResult<StepResult> {
        loop {
            let Some(top) = self.ctx().states.last() else {
                return self.finish_frame_return();
            };
            match &top.kind {
                StateKind::Try(try_state) => {
                    if matches!(try_state.phase, TryPhase::Try | TryPhase::Catch)
                        && let Some(finally_ip) = try_state.finally_ip
                    {
                        if let Some(State {
                            kind: StateKind::Try(try_state),
                            ..
                        }) = self.ctx_mut().states.last_mut()
                        {
                            try_state.phase = TryPhase::Finally;
                            try_state.next_op = TryNextOp::Return;
                            try_state.error = None;
                        }
                        self.ctx_mut().ip = finally_ip;
                        return Ok(StepResult::Continue);
                    }
                    self.deinit_top_state(false)?;
                }
                StateKind::ForOf {
                    iter:
                        IteratorRecord {
                            kind: IterKind::Async,
                            done: false,
                            ..
                        },
                } => {
                    return self.close_async_iter_state(None, true);
                }
                _ => self.deinit_top_state(false)?,
            }
        }
    }

    /// All states drained: the frame itself returns.
    fn finish_frame_return(&mut self) -> RunResult<StepResult> {
        match self.ctx().kind {
            crate::context::ContextKind::Normal => Ok(StepResult::Return),
            crate::context::ContextKind::Generator { ctx } | crate::context::ContextKind::Async { ctx } => {
                self.heap.generator_mut(ctx).state = crate::context::GeneratorState::Completed;
                Ok(StepResult::Return)
            }
        }
    }

    /// Error unwind: walk the state stack from the top down to the frame
    /// base, transferring to catch/finally at try states and
    /// deinitializing the rest.
    fn unwind(&mut self, err: RunError) -> RunResult<Unwound> {
        let pending = match PendingError::try_from(err) {
            Ok(pending) => pending,
            Err(original) => {
                // Uncatchable: tear the states down without running script.
                while !self.ctx().states.is_empty() {
                    let state = self.ctx_mut().states.pop().expect("states non-empty");
                    self.ctx_mut().stack.truncate(state.sp);
                    if let StateKind::LexEnv { saved_env } = state.kind {
                        self.ctx_mut().lex_env = saved_env;
                    }
                }
                return Ok(Unwound::Rethrow(original));
            }
        };
        loop {
            let Some(top) = self.ctx().states.last() else {
                return Ok(Unwound::Rethrow(pending.into()));
            };
            match &top.kind {
                StateKind::Try(try_state) => match try_state.phase {
                    TryPhase::Try if try_state.catch_ip.is_some() => {
                        let catch_ip = try_state.catch_ip.expect("checked");
                        if let Some(State {
                            kind: StateKind::Try(try_state),
                            ..
                        }) = self.ctx_mut().states.last_mut()
                        {
                            try_state.phase = TryPhase::Catch;
                            try_state.error = Some(pending);
                        }
                        let sp = self.ctx().states.last().expect("try state").sp;
                        self.ctx_mut().stack.truncate(sp);
                        self.ctx_mut().ip = catch_ip;
                        return Ok(Unwound::Handled);
                    }
                    TryPhase::Try | TryPhase::Catch => {
                        if let Some(finally_ip) = try_state.finally_ip {
                            if let Some(State {
                                kind: StateKind::Try(try_state),
                                ..
                            }) = self.ctx_mut().states.last_mut()
                            {
                                try_state.phase = TryPhase::Finally;
                                try_state.next_op = TryNextOp::Throw;
                                try_state.error = Some(pending);
                            }
                            let sp = self.ctx().states.last().expect("try state").sp;
                            self.ctx_mut().stack.truncate(sp);
                            self.ctx_mut().ip = finally_ip;
                            return Ok(Unwound::Handled);
                        }
                        self.deinit_top_state(true)?;
                    }
                    TryPhase::Finally | TryPhase::End => {
                        // An error inside finally replaces the pending one.
                        self.deinit_top_state(true)?;
                    }
                },
                StateKind::ForOf {
                    iter:
                        IteratorRecord {
                            kind: IterKind::Async,
                            done: false,
                            ..
                        },
                } => {
                    return match self.close_async_iter_state(Some(pending), false)? {
                        StepResult::Suspend => Ok(Unwound::Suspended),
                        _ => unreachable!("async close during unwind always suspends"),
                    };
                }
                _ => {
                    // Deinit may run script (iterator close); its errors are
                    // swallowed so the original error keeps unwinding.
                    self.deinit_top_state(true)?;
                }
            }
        }
    }

    /// Prints the throw site when throw-dump is enabled.
    fn dump_throw(&mut self, value: Value) {
        let line = self.current_line();
        let rendered = self.render_value(value);
        eprintln!(
            "throw at line {line}: {rendered:?}",
            line = line.map_or_else(|| "?".to_string(), |l| l.to_string())
        );
    }

    // =========================================================================
    // this / super / new.target
    // =========================================================================

    /// Walks the environment chain to the nearest this-binding environment
    /// (arrows bind nothing and are skipped).
    pub(crate) fn get_this_environment(&self, mut env: HeapId) -> HeapId {
        loop {
            let environment = self.heap.env(env);
            if environment.has_this_binding() {
                return env;
            }
            env = environment.outer.expect("global environment binds this");
        }
    }

    pub(crate) fn resolve_this_binding(&mut self) -> RunResult<Value> {
        let env = self.get_this_environment(self.ctx().lex_env);
        match &self.heap.env(env).kind {
            crate::environment::EnvKind::Function { this_status, .. } => match this_status {
                crate::environment::ThisStatus::Initialized(value) => Ok(*value),
                crate::environment::ThisStatus::Uninitialized => Err(RunError::reference_error(
                    "must call super constructor before accessing 'this'",
                )),
                crate::environment::ThisStatus::Lexical => unreachable!("lexical envs have no this binding"),
            },
            crate::environment::EnvKind::Global { global_object, .. } => Ok(Value::Object(*global_object)),
            crate::environment::EnvKind::Module { .. } => Ok(Value::Undefined),
            _ => unreachable!("this environment is function, global, or module"),
        }
    }

    fn get_new_target(&self) -> Value {
        let env = self.get_this_environment(self.ctx().lex_env);
        match &self.heap.env(env).kind {
            crate::environment::EnvKind::Function { new_target, .. } => *new_target,
            _ => Value::Undefined,
        }
    }

    /// The `super` property base: home object's prototype, paired with the
    /// current `this`.
    fn super_base(&mut self) -> RunResult<(Value, Value)> {
        let env = self.get_this_environment(self.ctx().lex_env);
        let home = match &self.heap.env(env).kind {
            crate::environment::EnvKind::Function { home_object, .. } => *home_object,
            _ => None,
        };
        let Some(home) = home else {
            return Err(RunError::syntax_error("'super' keyword is only valid inside methods"));
        };
        let this = self.resolve_this_binding()?;
        match self.get_prototype_of(home)? {
            Some(parent) => Ok((Value::Object(parent), this)),
            None => Ok((Value::Undefined, this)),
        }
    }

    pub(crate) fn current_strict(&self) -> bool {
        let ctx = self.ctx();
        self.heap.script(ctx.script).func(ctx.func).flags.strict
    }

    fn resolve_private_name(&mut self, priv_index: u32) -> RunResult<HeapId> {
        let name_id = self.heap.script(self.ctx().script).priv_names[priv_index as usize];
        let mut env = self.ctx().priv_env;
        while let Some(env_id) = env {
            match self.heap.get(env_id) {
                HeapData::Env(environment) => match &environment.kind {
                    crate::environment::EnvKind::Declarative(store) => {
                        if let Some(binding) = store.bindings.get(&name_id)
                            && let Some(Value::PrivateName(private)) = binding.value
                        {
                            return Ok(private);
                        }
                        env = environment.outer;
                    }
                    _ => unreachable!("private environments are declarative"),
                },
                _ => unreachable!("private environment id points at an environment"),
            }
        }
        Err(RunError::syntax_error(format!(
            "private name {name} is not defined",
            name = self.interns.get(name_id)
        )))
    }
}

/// Where a method lands on an object literal.
enum MethodSlotKind {
    Method,
    Getter,
    Setter,
}

/// Applies a validated relative offset to the instruction after the opcode.
fn offset_ip(base: usize, offset: i32) -> usize {
    usize::try_from(base as i64 + i64::from(offset)).expect("validated try target")
}

/// `%` with JavaScript semantics (sign of the dividend).
fn js_fmod(a: f64, b: f64) -> f64 {
    let r = a % b;
    // Rust's % already keeps the dividend's sign; normalize -0 edge.
    if r == 0.0 && a.is_sign_negative() { -0.0 } else { r }
}
