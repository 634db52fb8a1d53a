//! Generators, async functions, the await protocol, promise internals, and
//! the job pump.
//!
//! Suspension is a context switch: the innermost frame moves wholesale into
//! its heap-resident generator context, and resuming moves it back and
//! re-enters the dispatch loop, first through the parked resume operation,
//! then through normal dispatch.

use crate::{
    bytecode::Reg,
    context::{ContextKind, GeneratorContext, GeneratorState, ResumeOp},
    error::{PendingError, RunError, RunResult},
    heap::{HeapData, HeapId},
    intern::{PropertyKey, WellKnown},
    jobs::Job,
    object::{JsObject, ObjectKind, ScriptFunction},
    promise::{PromiseCapability, PromiseData, PromiseState, Reaction, ReactionHandler, ReactionKind},
    resource::ResourceTracker,
    runtime::Runtime,
    stack::{IterKind, State, StateKind},
    tracer::VmTracer,
    value::Value,
};

use super::{FrameExit, StepResult, Unwound};

/// A resume request delivered to a suspended generator.
#[derive(Debug, Clone, Copy)]
pub(crate) enum GenRequest {
    Next(Value),
    Return(Value),
    Throw(Value),
}

impl<T: ResourceTracker, Tr: VmTracer> Runtime<T, Tr> {
    // =========================================================================
    // Suspension plumbing
    // =========================================================================

    /// The generator context backing the running frame, if any.
    fn current_generator(&self) -> Option<HeapId> {
        match self.ctx().kind {
            ContextKind::Generator { ctx } | ContextKind::Async { ctx } => Some(ctx),
            ContextKind::Normal => None,
        }
    }

    /// Moves the innermost frame into its generator context and pops it.
    fn suspend_frame(&mut self, gen_id: HeapId, resume_op: ResumeOp) {
        let frame = self.contexts.pop().expect("suspending frame present");
        let generator = self.heap.generator_mut(gen_id);
        generator.frame = Some(Box::new(frame));
        generator.state = GeneratorState::SuspendedYield;
        generator.resume_op = Some(resume_op);
    }

    /// Moves a suspended frame back onto the context stack.
    fn reenter_frame(&mut self, gen_id: HeapId) -> RunResult<Option<ResumeOp>> {
        let generator = self.heap.generator_mut(gen_id);
        let frame = generator.frame.take().expect("suspended context has a frame");
        generator.state = GeneratorState::Running;
        let resume_op = generator.resume_op.take();
        self.push_frame(*frame)?;
        Ok(resume_op)
    }

    /// Continues an unwind from inside a resume path, mapping the outcome
    /// onto step results.
    fn continue_unwind(&mut self, pending: PendingError) -> RunResult<StepResult> {
        match self.unwind(pending.into())? {
            Unwound::Handled => Ok(StepResult::Continue),
            Unwound::Suspended => Ok(StepResult::Suspend),
            Unwound::Rethrow(err) => Err(err),
        }
    }

    // =========================================================================
    // Generators
    // =========================================================================

    /// Calling a generator function: allocate the context and the generator
    /// object without executing the body.
    pub(crate) fn create_generator_object(
        &mut self,
        func_obj: HeapId,
        sf: &ScriptFunction,
        this: Value,
        args: &[Value],
    ) -> RunResult<Value> {
        let gen_id = self.alloc(HeapData::Generator(GeneratorContext::new_generator()))?;
        let frame = self.prepare_frame(
            func_obj,
            sf,
            this,
            args,
            Value::Undefined,
            None,
            ContextKind::Generator { ctx: gen_id },
        )?;
        let generator = self.heap.generator_mut(gen_id);
        generator.frame = Some(Box::new(frame));
        generator.state = GeneratorState::SuspendedStart;

        let proto = self.get(Value::Object(func_obj), PropertyKey::Str(WellKnown::Prototype.into()))?;
        let proto = proto.as_object().unwrap_or(self.realm.intrinsics.generator_prototype);
        let object = self.alloc_object(JsObject::new(Some(proto), ObjectKind::Generator { ctx: gen_id }))?;
        Ok(Value::Object(object))
    }

    /// `.next` / `.return` / `.throw`: resume with a tagged request.
    pub(crate) fn resume_generator(&mut self, gen_id: HeapId, request: GenRequest) -> RunResult<(Value, bool)> {
        match self.heap.generator(gen_id).state {
            GeneratorState::Running => Err(RunError::type_error("generator is already running")),
            GeneratorState::Completed => match request {
                GenRequest::Next(_) => Ok((Value::Undefined, true)),
                GenRequest::Return(value) => Ok((value, true)),
                GenRequest::Throw(value) => Err(RunError::Thrown(value)),
            },
            GeneratorState::SuspendedStart => {
                match request {
                    GenRequest::Return(value) => {
                        self.heap.generator_mut(gen_id).state = GeneratorState::Completed;
                        Ok((value, true))
                    }
                    GenRequest::Throw(value) => {
                        self.heap.generator_mut(gen_id).state = GeneratorState::Completed;
                        Err(RunError::Thrown(value))
                    }
                    GenRequest::Next(_) => {
                        self.reenter_frame(gen_id)?;
                        self.finish_generator_resume(gen_id, Ok(StepResult::Continue))
                    }
                }
            }
            GeneratorState::SuspendedYield => {
                let resume_op = self.reenter_frame(gen_id)?;
                let Some(ResumeOp::Yield { dst }) = resume_op else {
                    unreachable!("sync generator parked without a yield continuation")
                };
                let first = match request {
                    GenRequest::Next(value) => {
                        self.ctx_mut().regs[dst.index()] = value;
                        Ok(StepResult::Continue)
                    }
                    GenRequest::Throw(value) => self.continue_unwind(PendingError::Thrown(value)),
                    GenRequest::Return(value) => {
                        self.ctx_mut().retval = value;
                        self.do_return()
                    }
                };
                self.finish_generator_resume(gen_id, first)
            }
        }
    }

    /// Drives the re-entered frame to its next suspension or completion.
    fn finish_generator_resume(&mut self, gen_id: HeapId, first: RunResult<StepResult>) -> RunResult<(Value, bool)> {
        let exit = match first {
            Ok(StepResult::Continue) => self.run_context(),
            Ok(StepResult::Return) => {
                let frame = self.contexts.pop().expect("frame present");
                Ok(FrameExit::Return(frame.retval))
            }
            Ok(StepResult::Suspend) => Ok(FrameExit::Suspend),
            Err(err) => {
                self.contexts.pop();
                Err(err)
            }
        };
        match exit {
            Ok(FrameExit::Return(value)) => {
                self.heap.generator_mut(gen_id).state = GeneratorState::Completed;
                Ok((value, true))
            }
            Ok(FrameExit::Suspend) => {
                let yielded = self.heap.generator(gen_id).yielded;
                Ok((yielded, false))
            }
            Err(err) => {
                self.heap.generator_mut(gen_id).state = GeneratorState::Completed;
                Err(err)
            }
        }
    }

    /// The `yield` opcode.
    pub(crate) fn do_yield(&mut self, dst: Reg, value: Value) -> RunResult<StepResult> {
        let Some(gen_id) = self.current_generator() else {
            return Err(RunError::syntax_error("yield outside of a generator"));
        };
        self.heap.generator_mut(gen_id).yielded = value;
        self.suspend_frame(gen_id, ResumeOp::Yield { dst });
        Ok(StepResult::Suspend)
    }

    // =========================================================================
    // Async functions
    // =========================================================================

    /// Calling an async function: create the capability, run the body until
    /// the first suspension, and hand back the promise.
    pub(crate) fn call_async_function(
        &mut self,
        func_obj: HeapId,
        sf: &ScriptFunction,
        this: Value,
        args: &[Value],
    ) -> RunResult<Value> {
        let flags = self.function_flags(sf);
        if flags.generator {
            return Err(RunError::type_error("async generators are not supported by this runtime"));
        }
        let capability = self.new_promise_capability()?;
        let gen_id = self.alloc(HeapData::Generator(GeneratorContext::new_async(capability)))?;
        let frame = self.prepare_frame(
            func_obj,
            sf,
            this,
            args,
            Value::Undefined,
            None,
            ContextKind::Async { ctx: gen_id },
        )?;
        self.push_frame(frame)?;
        self.heap.generator_mut(gen_id).state = GeneratorState::Running;
        let exit = self.run_context();
        self.settle_async_exit(gen_id, exit)?;
        Ok(Value::Object(capability.promise))
    }

    /// Routes an async body's completion into its capability.
    fn settle_async_exit(&mut self, gen_id: HeapId, exit: RunResult<FrameExit>) -> RunResult<()> {
        let capability = self
            .heap
            .generator(gen_id)
            .capability
            .expect("async context has a capability");
        match exit {
            Ok(FrameExit::Return(value)) => {
                self.heap.generator_mut(gen_id).state = GeneratorState::Completed;
                self.resolve_promise(capability.promise, value)
            }
            Ok(FrameExit::Suspend) => Ok(()),
            Err(err) if err.is_catchable() => {
                self.heap.generator_mut(gen_id).state = GeneratorState::Completed;
                let pending = PendingError::try_from(err).expect("checked catchable");
                let reason = self.materialize_error(pending);
                self.reject_promise(capability.promise, reason)
            }
            Err(err) => Err(err),
        }
    }

    /// The `await` opcode: resolve the operand to a promise, park resume
    /// handlers on it, and return control to the job-queue driver.
    pub(crate) fn do_await(&mut self, dst: Reg, value: Value) -> RunResult<StepResult> {
        let Some(gen_id) = self.current_generator() else {
            return Err(RunError::syntax_error("await outside of an async function"));
        };
        let promise = self.promise_resolve_value(value)?;
        self.register_async_reactions(promise, gen_id)?;
        self.suspend_frame(gen_id, ResumeOp::Await { dst });
        Ok(StepResult::Suspend)
    }

    /// Re-entry from a settled awaited promise: run the parked resume op,
    /// then continue dispatch, settling the capability at completion.
    pub(crate) fn resume_async(&mut self, gen_id: HeapId, kind: ReactionKind, value: Value) -> RunResult<()> {
        if matches!(self.heap.generator(gen_id).state, GeneratorState::Completed) {
            return Ok(());
        }
        let resume_op = self.reenter_frame(gen_id)?;
        let first = match resume_op {
            Some(ResumeOp::Await { dst }) => match kind {
                ReactionKind::Fulfill => {
                    self.ctx_mut().regs[dst.index()] = value;
                    Ok(StepResult::Continue)
                }
                ReactionKind::Reject => self.continue_unwind(PendingError::Thrown(value)),
            },
            Some(ResumeOp::AsyncStep { dst, done_ip }) => self.resume_async_step(dst, done_ip, kind, value),
            Some(ResumeOp::IterClose { pending, returning }) => match (kind, pending) {
                // The original error wins over anything the close produced.
                (_, Some(pending)) => self.continue_unwind(pending),
                (ReactionKind::Reject, None) => self.continue_unwind(PendingError::Thrown(value)),
                (ReactionKind::Fulfill, None) => {
                    if returning {
                        self.do_return()
                    } else {
                        Ok(StepResult::Continue)
                    }
                }
            },
            Some(ResumeOp::Yield { .. }) | None => unreachable!("async context parked without an async continuation"),
        };
        let exit = match first {
            Ok(StepResult::Continue) => self.run_context(),
            Ok(StepResult::Return) => {
                let frame = self.contexts.pop().expect("frame present");
                Ok(FrameExit::Return(frame.retval))
            }
            Ok(StepResult::Suspend) => Ok(FrameExit::Suspend),
            Err(err) => {
                self.contexts.pop();
                Err(err)
            }
        };
        self.settle_async_exit(gen_id, exit)
    }

    /// A `for await` step result arrived: unpack done/value.
    fn resume_async_step(&mut self, dst: Reg, done_ip: usize, kind: ReactionKind, value: Value) -> RunResult<StepResult> {
        if matches!(kind, ReactionKind::Reject) {
            self.mark_top_iter_done();
            return self.continue_unwind(PendingError::Thrown(value));
        }
        let unpack = (|| -> RunResult<(bool, Value)> {
            if !value.is_object() {
                return Err(RunError::type_error("iterator result is not an object"));
            }
            let done = self.get(value, PropertyKey::Str(WellKnown::Done.into()))?;
            let done = done.to_boolean(&self.heap);
            let item = if done {
                Value::Undefined
            } else {
                self.get(value, PropertyKey::Str(WellKnown::Value.into()))?
            };
            Ok((done, item))
        })();
        match unpack {
            Ok((true, _)) => {
                self.mark_top_iter_done();
                self.ctx_mut().ip = done_ip;
                Ok(StepResult::Continue)
            }
            Ok((false, item)) => {
                self.ctx_mut().regs[dst.index()] = item;
                Ok(StepResult::Continue)
            }
            Err(err) => {
                self.mark_top_iter_done();
                let pending = PendingError::try_from(err).expect("unpack errors are catchable");
                self.continue_unwind(pending)
            }
        }
    }

    fn mark_top_iter_done(&mut self) {
        if let Some(State {
            kind: StateKind::ForOf { iter },
            ..
        }) = self.ctx_mut().states.last_mut()
        {
            iter.done = true;
        }
    }

    /// The `AsyncForStep` opcode: call `next`, await its result.
    pub(crate) fn async_for_step(&mut self, dst: Reg, done_offset: i32) -> RunResult<StepResult> {
        let Some(gen_id) = self.current_generator() else {
            return Err(RunError::syntax_error("for await outside of an async function"));
        };
        let iter = match self.ctx().states.last() {
            Some(State {
                kind: StateKind::ForOf { iter },
                ..
            }) => *iter,
            _ => unreachable!("AsyncForStep without an iteration state"),
        };
        let result = self.call(iter.next_method, iter.iterator, &[])?;
        let promise = self.promise_resolve_value(result)?;
        self.register_async_reactions(promise, gen_id)?;
        let done_ip = usize::try_from(self.ctx().ip as i64 + i64::from(done_offset)).expect("validated jump target");
        self.suspend_frame(gen_id, ResumeOp::AsyncStep { dst, done_ip });
        Ok(StepResult::Suspend)
    }

    /// Closes an abandoned async iterator: calls `return`, awaits its
    /// result, then continues the stored pending operation. Itself a
    /// suspension point.
    pub(crate) fn close_async_iter_state(
        &mut self,
        pending: Option<PendingError>,
        returning: bool,
    ) -> RunResult<StepResult> {
        let state = self.ctx_mut().states.pop().expect("async iterator state present");
        let State {
            sp,
            kind: StateKind::ForOf { iter },
        } = state
        else {
            unreachable!("close_async_iter_state on a non-iterator state")
        };
        self.ctx_mut().stack.truncate(sp);
        debug_assert!(matches!(iter.kind, IterKind::Async));

        let continue_without_close = |rt: &mut Self, pending: Option<PendingError>| -> RunResult<StepResult> {
            match pending {
                Some(pending) => rt.continue_unwind(pending),
                None if returning => rt.do_return(),
                None => Ok(StepResult::Continue),
            }
        };

        let method = match self.get_method(iter.iterator, PropertyKey::Str(WellKnown::Return.into())) {
            Ok(method) => method,
            Err(err) => {
                return match pending {
                    // The original error wins over lookup failures.
                    Some(pending) => self.continue_unwind(pending),
                    None => {
                        let pending = PendingError::try_from(err)?;
                        self.continue_unwind(pending)
                    }
                };
            }
        };
        let Some(method) = method else {
            return continue_without_close(self, pending);
        };
        let result = match self.call(method, iter.iterator, &[]) {
            Ok(result) => result,
            Err(err) => {
                return match pending {
                    Some(pending) => self.continue_unwind(pending),
                    None => {
                        let pending = PendingError::try_from(err)?;
                        self.continue_unwind(pending)
                    }
                };
            }
        };

        let Some(gen_id) = self.current_generator() else {
            // A sync context closing an async iterator cannot await; treat
            // the close as complete.
            return continue_without_close(self, pending);
        };
        let promise = self.promise_resolve_value(result)?;
        self.register_async_reactions(promise, gen_id)?;
        self.suspend_frame(gen_id, ResumeOp::IterClose { pending, returning });
        Ok(StepResult::Suspend)
    }

    // =========================================================================
    // Promise internals
    // =========================================================================

    /// NewPromiseCapability against the intrinsic promise constructor.
    pub(crate) fn new_promise_capability(&mut self) -> RunResult<PromiseCapability> {
        let proto = self.realm.intrinsics.promise_prototype;
        let promise = self.alloc_object(JsObject::new(Some(proto), ObjectKind::Promise(PromiseData::pending())))?;
        let resolve = self.alloc_native_function(
            crate::builtins::NativeFunction::PromiseCapResolve,
            WellKnown::Resolve.into(),
            smallvec::smallvec![Value::Object(promise)],
        )?;
        let reject = self.alloc_native_function(
            crate::builtins::NativeFunction::PromiseCapReject,
            WellKnown::Reject.into(),
            smallvec::smallvec![Value::Object(promise)],
        )?;
        Ok(PromiseCapability {
            promise,
            resolve: Value::Object(resolve),
            reject: Value::Object(reject),
        })
    }

    /// PromiseResolve: pass through promises, wrap everything else.
    pub(crate) fn promise_resolve_value(&mut self, value: Value) -> RunResult<HeapId> {
        if let Value::Object(id) = value
            && matches!(self.heap.object(id).kind, ObjectKind::Promise(_))
        {
            return Ok(id);
        }
        let capability = self.new_promise_capability()?;
        self.resolve_promise(capability.promise, value)?;
        Ok(capability.promise)
    }

    /// The resolve function's behavior: latch, thenable detection, fulfill.
    pub(crate) fn resolve_promise(&mut self, promise: HeapId, value: Value) -> RunResult<()> {
        {
            let ObjectKind::Promise(data) = &mut self.heap.object_mut(promise).kind else {
                unreachable!("resolve target is a promise")
            };
            if data.already_resolved {
                return Ok(());
            }
            data.already_resolved = true;
        }
        if value == Value::Object(promise) {
            let reason = self.new_native_error(crate::error::NativeErrorKind::TypeError, "chaining cycle detected");
            return self.settle_promise(promise, PromiseState::Rejected, reason);
        }
        if value.is_object() {
            let then = self.get(value, PropertyKey::Str(WellKnown::Then.into()))?;
            if self.is_callable(then) {
                self.jobs.enqueue(Job::PromiseResolveThenable {
                    promise,
                    thenable: value,
                    then,
                });
                return Ok(());
            }
        }
        self.settle_promise(promise, PromiseState::Fulfilled, value)
    }

    /// The reject function's behavior.
    pub(crate) fn reject_promise(&mut self, promise: HeapId, reason: Value) -> RunResult<()> {
        {
            let ObjectKind::Promise(data) = &mut self.heap.object_mut(promise).kind else {
                unreachable!("reject target is a promise")
            };
            if data.already_resolved {
                return Ok(());
            }
            data.already_resolved = true;
        }
        self.settle_promise(promise, PromiseState::Rejected, reason)
    }

    /// Settles a promise and schedules its reactions in registration order.
    fn settle_promise(&mut self, promise: HeapId, state: PromiseState, result: Value) -> RunResult<()> {
        let reactions = {
            let ObjectKind::Promise(data) = &mut self.heap.object_mut(promise).kind else {
                unreachable!("settle target is a promise")
            };
            data.state = state;
            data.result = result;
            let reactions = match state {
                PromiseState::Fulfilled => std::mem::take(&mut data.fulfill_reactions),
                PromiseState::Rejected => std::mem::take(&mut data.reject_reactions),
                PromiseState::Pending => unreachable!("settle to pending"),
            };
            data.fulfill_reactions.clear();
            data.reject_reactions.clear();
            reactions
        };
        for reaction in reactions {
            self.jobs.enqueue(Job::PromiseReaction {
                reaction,
                argument: result,
            });
        }
        Ok(())
    }

    /// PerformPromiseThen.
    pub(crate) fn perform_then(
        &mut self,
        promise: HeapId,
        on_fulfilled: Value,
        on_rejected: Value,
        capability: Option<PromiseCapability>,
    ) -> RunResult<()> {
        let fulfill = Reaction {
            capability,
            handler: if self.is_callable(on_fulfilled) {
                ReactionHandler::Func(on_fulfilled)
            } else {
                ReactionHandler::Identity
            },
            kind: ReactionKind::Fulfill,
        };
        let reject = Reaction {
            capability,
            handler: if self.is_callable(on_rejected) {
                ReactionHandler::Func(on_rejected)
            } else {
                ReactionHandler::Thrower
            },
            kind: ReactionKind::Reject,
        };
        let (state, result) = {
            let ObjectKind::Promise(data) = &mut self.heap.object_mut(promise).kind else {
                return Err(RunError::type_error("receiver is not a promise"));
            };
            match data.state {
                PromiseState::Pending => {
                    data.fulfill_reactions.push(fulfill);
                    data.reject_reactions.push(reject);
                    return Ok(());
                }
                state => (state, data.result),
            }
        };
        let reaction = match state {
            PromiseState::Fulfilled => fulfill,
            PromiseState::Rejected => reject,
            PromiseState::Pending => unreachable!("handled above"),
        };
        self.jobs.enqueue(Job::PromiseReaction {
            reaction,
            argument: result,
        });
        Ok(())
    }

    /// Attaches the await fulfill/reject handlers for a suspended context.
    pub(crate) fn register_async_reactions(&mut self, promise: HeapId, gen_id: HeapId) -> RunResult<()> {
        let fulfill = Reaction {
            capability: None,
            handler: ReactionHandler::AsyncResume { ctx: gen_id },
            kind: ReactionKind::Fulfill,
        };
        let reject = Reaction {
            capability: None,
            handler: ReactionHandler::AsyncResume { ctx: gen_id },
            kind: ReactionKind::Reject,
        };
        let settled = {
            let ObjectKind::Promise(data) = &mut self.heap.object_mut(promise).kind else {
                unreachable!("await registered on a promise")
            };
            match data.state {
                PromiseState::Pending => {
                    data.fulfill_reactions.push(fulfill);
                    data.reject_reactions.push(reject);
                    None
                }
                PromiseState::Fulfilled => Some((fulfill, data.result)),
                PromiseState::Rejected => Some((reject, data.result)),
            }
        };
        if let Some((reaction, argument)) = settled {
            self.jobs.enqueue(Job::PromiseReaction { reaction, argument });
        }
        Ok(())
    }

    // =========================================================================
    // The job pump
    // =========================================================================

    /// Drains the microtask queue in FIFO order.
    pub(crate) fn drain_jobs(&mut self) -> RunResult<()> {
        while let Some(job) = self.jobs.dequeue() {
            // The dequeued payload leaves the queue's root set; keep it
            // rooted while the job runs.
            let mark = self.temp_roots.len();
            {
                let temp_roots = &mut self.temp_roots;
                job.trace(&mut |id| temp_roots.push(Value::Object(id)));
            }
            let outcome = self.run_job(job);
            self.temp_roots.truncate(mark);
            outcome?;
        }
        Ok(())
    }

    fn run_job(&mut self, job: Job) -> RunResult<()> {
        {
            match job {
                Job::PromiseReaction { reaction, argument } => self.run_reaction(reaction, argument)?,
                Job::PromiseResolveThenable {
                    promise,
                    thenable,
                    then,
                } => {
                    let capability = PromiseCapability {
                        promise,
                        resolve: Value::Undefined,
                        reject: Value::Undefined,
                    };
                    // Undo the latch so the thenable's verdict lands.
                    if let ObjectKind::Promise(data) = &mut self.heap.object_mut(promise).kind {
                        data.already_resolved = false;
                    }
                    let resolve = self.alloc_native_function(
                        crate::builtins::NativeFunction::PromiseCapResolve,
                        WellKnown::Resolve.into(),
                        smallvec::smallvec![Value::Object(capability.promise)],
                    )?;
                    let reject = self.alloc_native_function(
                        crate::builtins::NativeFunction::PromiseCapReject,
                        WellKnown::Reject.into(),
                        smallvec::smallvec![Value::Object(capability.promise)],
                    )?;
                    match self.call(then, thenable, &[Value::Object(resolve), Value::Object(reject)]) {
                        Ok(_) => {}
                        Err(err) if err.is_catchable() => {
                            let pending = PendingError::try_from(err).expect("checked catchable");
                            let reason = self.materialize_error(pending);
                            self.reject_promise(promise, reason)?;
                        }
                        Err(err) => return Err(err),
                    }
                }
                Job::FinalizationCleanup { callback, held } => {
                    match self.call(callback, Value::Undefined, &[held]) {
                        Ok(_) => {}
                        // Cleanup callbacks cannot disrupt the queue.
                        Err(err) if err.is_catchable() => {}
                        Err(err) => return Err(err),
                    }
                }
            }
        }
        Ok(())
    }

    /// Fires one promise reaction.
    fn run_reaction(&mut self, reaction: Reaction, argument: Value) -> RunResult<()> {
        match reaction.handler {
            ReactionHandler::AsyncResume { ctx } => self.resume_async(ctx, reaction.kind, argument),
            ReactionHandler::Identity => {
                if let Some(capability) = reaction.capability {
                    self.resolve_promise(capability.promise, argument)?;
                }
                Ok(())
            }
            ReactionHandler::Thrower => {
                if let Some(capability) = reaction.capability {
                    self.reject_promise(capability.promise, argument)?;
                }
                Ok(())
            }
            ReactionHandler::Func(handler) => {
                let outcome = self.call(handler, Value::Undefined, &[argument]);
                let Some(capability) = reaction.capability else {
                    // No capability: surface catchable errors nowhere, they
                    // belong to a detached handler.
                    return match outcome {
                        Err(err) if !err.is_catchable() => Err(err),
                        _ => Ok(()),
                    };
                };
                match outcome {
                    Ok(value) => self.resolve_promise(capability.promise, value),
                    Err(err) if err.is_catchable() => {
                        let pending = PendingError::try_from(err).expect("checked catchable");
                        let reason = self.materialize_error(pending);
                        self.reject_promise(capability.promise, reason)
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }
}
