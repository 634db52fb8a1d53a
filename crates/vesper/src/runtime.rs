//! The runtime value: heap, interns, realm, context stack, job queue, and
//! host hooks. One runtime per embedding thread; nothing is process-global.

use ahash::AHashMap;

use crate::{
    builtins::NativeFunction,
    context::ScriptContext,
    error::{Exception, NativeErrorKind, PendingError, RunError, RunResult},
    heap::{Heap, HeapData, HeapId, HeapStats},
    intern::{Interns, PropertyKey, StringId, WellKnown},
    jobs::JobQueue,
    object::{JsObject, NativeFunctionData, ObjectKind, Property},
    realm::Realm,
    resource::{ResourceTracker, UnlimitedTracker},
    script::{Script, ScriptImage},
    tracer::{NoopTracer, VmTracer},
    types::{JsBigInt, JsString},
    value::{HostValue, Value},
};

/// Host-attached user data, traced during collection.
pub trait HostData: std::fmt::Debug {
    /// Enumerates heap ids the user data keeps alive.
    fn trace(&self, _mark: &mut dyn FnMut(HeapId)) {}
}

/// Compiles source text into a script image on behalf of `eval`.
pub type EvalHook = Box<dyn Fn(&str, bool) -> Result<ScriptImage, String>>;

/// Resolves a module specifier to its image.
pub type ModuleResolver = Box<dyn FnMut(&str) -> Option<ScriptImage>>;

/// An embeddable ECMAScript runtime.
///
/// Generic over the resource tracker and the tracer; the defaults compile
/// both away. All operations must run on the thread that created the
/// runtime; concurrency is cooperative through generators, async functions,
/// and the job queue.
pub struct Runtime<T: ResourceTracker = UnlimitedTracker, Tr: VmTracer = NoopTracer> {
    pub(crate) heap: Heap<T>,
    pub(crate) interns: Interns,
    pub(crate) realm: Realm,
    /// The running context chain; the last entry is the innermost frame.
    pub(crate) contexts: Vec<ScriptContext>,
    /// Scoped temporary roots: values a native operation holds in Rust
    /// locals across a nested script call. Pushed freely inside an
    /// operation; truncated back to the entry mark by the opcode step, the
    /// native-call wrapper, and the job pump.
    pub(crate) temp_roots: Vec<Value>,
    pub(crate) jobs: JobQueue,
    pub(crate) tracer: Tr,
    pub(crate) eval_hook: Option<EvalHook>,
    pub(crate) module_resolver: Option<ModuleResolver>,
    pub(crate) user_data: Option<Box<dyn HostData>>,
    /// Module registry keyed by resolved specifier.
    pub(crate) modules: AHashMap<String, HeapId>,
    pub(crate) agent_can_block: bool,
    pub(crate) throw_dump: bool,
}

impl Runtime {
    /// Creates a runtime with no limits and no tracing.
    #[must_use]
    pub fn new() -> Self {
        Self::with_parts(Heap::new(UnlimitedTracker), NoopTracer)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ResourceTracker> Runtime<T, NoopTracer> {
    /// Creates a runtime with a custom resource tracker.
    pub fn with_tracker(tracker: T) -> Self {
        Self::with_parts(Heap::new(tracker), NoopTracer)
    }
}

impl<T: ResourceTracker, Tr: VmTracer> Runtime<T, Tr> {
    /// Creates a runtime with a custom tracker and tracer.
    pub fn with_tracker_and_tracer(tracker: T, tracer: Tr) -> Self {
        Self::with_parts(Heap::new(tracker), tracer)
    }

    fn with_parts(mut heap: Heap<T>, tracer: Tr) -> Self {
        let mut interns = Interns::new();
        let realm = Realm::create(&mut heap, &mut interns);
        Self {
            heap,
            interns,
            realm,
            contexts: Vec::new(),
            temp_roots: Vec::new(),
            jobs: JobQueue::default(),
            tracer,
            eval_hook: None,
            module_resolver: None,
            user_data: None,
            modules: AHashMap::new(),
            agent_can_block: false,
            throw_dump: false,
        }
    }

    // --- host interface ---

    /// Allows or forbids blocking waits on this agent (Atomics-style APIs).
    pub fn set_agent_can_block(&mut self, can_block: bool) {
        self.agent_can_block = can_block;
    }

    /// Attaches arbitrary host data with a GC trace hook.
    pub fn set_user_data(&mut self, data: Box<dyn HostData>) {
        self.user_data = Some(data);
    }

    /// Installs the compiler used by direct and indirect `eval`.
    pub fn set_eval_hook(&mut self, hook: EvalHook) {
        self.eval_hook = Some(hook);
    }

    /// Installs the module-specifier resolver.
    pub fn set_module_resolver(&mut self, resolver: ModuleResolver) {
        self.module_resolver = Some(resolver);
    }

    /// Prints a stack dump to stderr at every throw site.
    pub fn enable_throw_dump(&mut self, enabled: bool) {
        self.throw_dump = enabled;
    }

    /// Returns a mutable handle to the tracer.
    pub fn tracer_mut(&mut self) -> &mut Tr {
        &mut self.tracer
    }

    /// Captures heap statistics.
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats(self.interns.dynamic_count())
    }

    // --- allocation helpers ---

    pub(crate) fn alloc(&mut self, data: HeapData) -> RunResult<HeapId> {
        Ok(self.heap.allocate(data)?)
    }

    pub(crate) fn alloc_string(&mut self, text: impl Into<String>) -> RunResult<Value> {
        let id = self.alloc(HeapData::Str(JsString::new(text)))?;
        Ok(Value::String(id))
    }

    pub(crate) fn alloc_big_int(&mut self, value: JsBigInt) -> RunResult<Value> {
        let id = self.alloc(HeapData::BigInt(value))?;
        Ok(Value::BigInt(id))
    }

    pub(crate) fn alloc_object(&mut self, object: JsObject) -> RunResult<HeapId> {
        self.alloc(HeapData::Object(object))
    }

    /// Creates a native function object with bound slots.
    pub(crate) fn alloc_native_function(
        &mut self,
        func: NativeFunction,
        name: StringId,
        slots: impl Into<smallvec::SmallVec<[Value; 2]>>,
    ) -> RunResult<HeapId> {
        let mut object = JsObject::new(
            Some(self.realm.intrinsics.function_prototype),
            ObjectKind::NativeFunction(NativeFunctionData {
                func,
                name,
                slots: slots.into(),
            }),
        );
        let name_value = self.alloc_string(self.interns.get(name).to_owned())?;
        object.set_own_property(
            PropertyKey::Str(WellKnown::Name.into()),
            Property::data(name_value, false, false, true),
        );
        self.alloc_object(object)
    }

    /// Interns a property key directly from a string slice.
    pub(crate) fn key_from_str(&mut self, s: &str) -> PropertyKey {
        self.interns.string_to_key(s)
    }

    // --- garbage collection ---

    /// Gathers every root: the realm, all context frames, job payloads,
    /// module registry, and host data.
    pub(crate) fn gather_roots(&self) -> Vec<HeapId> {
        let mut roots = Vec::with_capacity(64);
        {
            let mut mark = |id: HeapId| roots.push(id);
            self.realm.trace(&mut mark);
            for context in &self.contexts {
                context.trace(&mut mark);
            }
            for value in &self.temp_roots {
                value.trace(&mut mark);
            }
            self.jobs.trace(&mut mark);
            for &module in self.modules.values() {
                mark(module);
            }
        }
        if let Some(user_data) = &self.user_data {
            let mut mark = |id: HeapId| roots.push(id);
            user_data.trace(&mut mark);
        }
        roots
    }

    /// Runs a collection cycle now, regardless of the allocation counter.
    pub fn collect_garbage(&mut self) -> usize {
        let roots = self.gather_roots();
        let outcome = self.heap.collect(&roots, &mut self.tracer);
        for job in outcome.jobs {
            self.jobs.enqueue(job);
        }
        outcome.freed
    }

    /// Collection safepoint: runs a cycle when the allocation high-water
    /// mark has been crossed.
    pub(crate) fn maybe_collect(&mut self) {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
    }

    // --- scripts ---

    /// Validates and loads a script image, materializing its constants.
    pub fn load_script(&mut self, image: ScriptImage) -> Result<HeapId, crate::error::ScriptLoadError> {
        crate::script::validate_image(&image)?;
        // Loading allocates constants one by one; a collection in between
        // would trace a half-built value table.
        self.heap.disable_gc();
        let loaded = self.materialize_image(image);
        self.heap.enable_gc();
        loaded.map_err(|err| match err {
            RunError::Native(native) => crate::error::ScriptLoadError::new(native.message),
            _ => crate::error::ScriptLoadError::new("out of memory while loading"),
        })
    }

    fn materialize_image(&mut self, image: ScriptImage) -> RunResult<HeapId> {
        let mut values = Vec::with_capacity(image.consts.len());
        for entry in &image.consts {
            let value = match entry {
                crate::script::ConstEntry::Undefined => Value::Undefined,
                crate::script::ConstEntry::Null => Value::Null,
                crate::script::ConstEntry::Boolean(b) => Value::Boolean(*b),
                crate::script::ConstEntry::Number(n) => Value::Number(*n),
                crate::script::ConstEntry::String(s) => self.alloc_string(s.clone())?,
                crate::script::ConstEntry::BigInt(text) => {
                    let parsed = JsBigInt::from_str(text)?;
                    self.alloc_big_int(parsed)?
                }
            };
            values.push(value);
        }
        let func_names = image
            .funcs
            .iter()
            .map(|func| {
                func.name.map(|index| match &image.consts[index as usize] {
                    crate::script::ConstEntry::String(s) => self.interns.intern(s),
                    _ => unreachable!("validated name constant"),
                })
            })
            .collect();
        let decls = image
            .decls
            .iter()
            .map(|group| {
                group
                    .items
                    .iter()
                    .map(|item| crate::script::LoadedDeclItem {
                        name: self.interns.intern(&item.name),
                        kind: item.kind,
                        func: item.func,
                    })
                    .collect()
            })
            .collect();
        let binding_refs = image.binding_refs.iter().map(|name| self.interns.intern(name)).collect();
        let prop_refs = image.prop_refs.iter().map(|name| self.interns.string_to_key(name)).collect();
        let priv_names = image.priv_names.iter().map(|name| self.interns.intern(name)).collect();
        let module = image.module.as_ref().map(|module| crate::script::ModuleTables {
            requests: module.requests.iter().map(|r| self.interns.intern(r)).collect(),
            imports: module
                .imports
                .iter()
                .map(|import| {
                    (
                        import.request,
                        import.import_name.as_deref().map(|n| self.interns.intern(n)),
                        self.interns.intern(&import.local_name),
                    )
                })
                .collect(),
            exports: module
                .exports
                .iter()
                .map(|export| crate::script::LoadedExportEntry {
                    export_name: self.interns.intern(&export.export_name),
                    local_name: export.local_name.as_deref().map(|n| self.interns.intern(n)),
                    request: export.request,
                    import_name: export.import_name.as_deref().map(|n| self.interns.intern(n)),
                })
                .collect(),
        });
        let script = Script {
            values,
            instrs: image.instrs,
            line_info: image.line_info,
            funcs: image.funcs,
            decls,
            binding_refs,
            prop_refs,
            priv_names,
            priv_envs: image.priv_envs,
            module,
            func_names,
        };
        self.alloc(HeapData::Script(script))
    }

    // --- errors ---

    /// Materializes a pending error into a throwable value.
    pub(crate) fn materialize_error(&mut self, pending: PendingError) -> Value {
        match pending {
            PendingError::Thrown(value) => value,
            PendingError::Native(native) => self.new_native_error(native.kind, &native.message),
        }
    }

    /// Builds an error object from the realm's intrinsics. Allocation
    /// failure while building an error falls back to a plain string value.
    pub(crate) fn new_native_error(&mut self, kind: NativeErrorKind, message: &str) -> Value {
        let proto = self.realm.intrinsics.error_prototype(kind);
        let mut object = JsObject::ordinary(Some(proto));
        match self.alloc_string(message.to_owned()) {
            Ok(text) => {
                object.set_own_property(
                    PropertyKey::Str(WellKnown::Message.into()),
                    Property::data(text, true, false, true),
                );
            }
            Err(_) => return Value::Undefined,
        }
        match self.alloc_object(object) {
            Ok(id) => Value::Object(id),
            Err(_) => Value::Undefined,
        }
    }

    /// Converts a run error into the embedder-facing exception form.
    pub(crate) fn exception_from_error(&mut self, err: RunError) -> Exception {
        match err {
            RunError::Native(native) => Exception::Native {
                kind: native.kind,
                message: native.message,
                line: self.current_line(),
            },
            RunError::Thrown(value) => Exception::Value {
                rendered: match HostValue::render(value, &self.heap, &self.interns) {
                    HostValue::String(s) => s,
                    other => format!("{other:?}"),
                },
            },
            RunError::Resource(resource) => Exception::Resource(resource),
        }
    }

    /// Source line of the innermost frame, when line info is present.
    pub(crate) fn current_line(&self) -> Option<u32> {
        let context = self.contexts.last()?;
        self.heap.script(context.script).line_for_ip(context.ip.saturating_sub(1))
    }

    /// Renders a value for the embedder.
    #[must_use]
    pub(crate) fn render_value(&self, value: Value) -> HostValue {
        HostValue::render(value, &self.heap, &self.interns)
    }

    // --- execution ---

    /// Loads and runs a script image at global scope, then drains the job
    /// queue. The completion value is the toplevel's return value.
    pub fn run_script_image(&mut self, image: ScriptImage) -> Result<HostValue, Exception> {
        let script = self
            .load_script(image)
            .map_err(|err| Exception::Native {
                kind: NativeErrorKind::SyntaxError,
                message: err.message,
                line: None,
            })?;
        self.evaluate_script(script)
    }

    /// Runs an already-loaded script at global scope and drains jobs.
    pub fn evaluate_script(&mut self, script: HeapId) -> Result<HostValue, Exception> {
        let result = self.evaluate_toplevel(script, self.realm.global_env);
        let completion = match result {
            Ok(value) => value,
            Err(err) => {
                let exception = self.exception_from_error(err);
                self.contexts.clear();
                return Err(exception);
            }
        };
        self.run_jobs()?;
        Ok(self.render_value(completion))
    }

    /// Drains the microtask queue, surfacing uncatchable errors.
    pub fn run_jobs(&mut self) -> Result<(), Exception> {
        match self.drain_jobs() {
            Ok(()) => Ok(()),
            Err(err) => {
                let exception = self.exception_from_error(err);
                self.contexts.clear();
                Err(exception)
            }
        }
    }

    /// Pushes and runs a script's toplevel function in the given variable
    /// and lexical environment.
    pub(crate) fn evaluate_toplevel(&mut self, script: HeapId, env: HeapId) -> RunResult<Value> {
        let record = *self.heap.script(script).func(0);
        let frame = crate::context::ScriptContext {
            function: Value::Undefined,
            script,
            func: 0,
            regs: vec![Value::Undefined; usize::from(record.reg_count)],
            args: Vec::new(),
            retval: Value::Undefined,
            ip: record.ip_start as usize,
            var_env: env,
            lex_env: env,
            priv_env: None,
            new_target: Value::Undefined,
            stack: Vec::new(),
            states: Vec::new(),
            kind: crate::context::ContextKind::Normal,
        };
        self.push_frame(frame)?;
        match self.run_context()? {
            crate::vm::FrameExit::Return(value) => Ok(value),
            crate::vm::FrameExit::Suspend => unreachable!("toplevel scripts cannot suspend"),
        }
    }

    // --- modules ---

    /// Registers a module image under a specifier without linking it.
    pub fn register_module(&mut self, specifier: &str, image: ScriptImage) -> Result<(), crate::error::ScriptLoadError> {
        let script = self.load_script(image)?;
        if self.heap.script(script).module.is_none() {
            return Err(crate::error::ScriptLoadError::new("image has no module tables"));
        }
        let module = self
            .alloc(HeapData::Module(crate::script::ModuleRecord {
                script,
                env: None,
                status: crate::script::ModuleStatus::Unlinked,
                resolved_requests: Vec::new(),
            }))
            .map_err(|_| crate::error::ScriptLoadError::new("out of memory while loading"))?;
        self.modules.insert(specifier.to_string(), module);
        Ok(())
    }

    /// Links and evaluates a registered module, then drains jobs.
    pub fn run_module(&mut self, specifier: &str) -> Result<HostValue, Exception> {
        let result = self.module_completion(specifier);
        let completion = match result {
            Ok(value) => value,
            Err(err) => {
                let exception = self.exception_from_error(err);
                self.contexts.clear();
                return Err(exception);
            }
        };
        self.run_jobs()?;
        Ok(self.render_value(completion))
    }

    fn module_completion(&mut self, specifier: &str) -> RunResult<Value> {
        let module = self.resolve_module(specifier)?;
        self.link_module(module)?;
        self.evaluate_module_record(module)
    }

    /// Resolves a specifier through the registry, falling back to the
    /// host-installed resolver.
    pub(crate) fn resolve_module(&mut self, specifier: &str) -> RunResult<HeapId> {
        if let Some(&module) = self.modules.get(specifier) {
            return Ok(module);
        }
        let image = match &mut self.module_resolver {
            Some(resolver) => resolver(specifier),
            None => None,
        };
        let Some(image) = image else {
            return Err(RunError::Native(crate::error::NativeError::new(
                NativeErrorKind::SyntaxError,
                format!("cannot resolve module '{specifier}'"),
            )));
        };
        self.register_module(specifier, image)
            .map_err(|err| RunError::syntax_error(err.message))?;
        Ok(self.modules[specifier])
    }

    /// Link: resolve requests, create the module environment and its
    /// (possibly indirect) bindings.
    pub(crate) fn link_module(&mut self, module: HeapId) -> RunResult<()> {
        use crate::script::ModuleStatus;
        match self.heap.module(module).status {
            ModuleStatus::Unlinked => {}
            // A linking module in a request cycle links against its
            // environment-to-be.
            _ => return Ok(()),
        }
        self.heap.module_mut(module).status = ModuleStatus::Linking;

        let script = self.heap.module(module).script;
        let tables = self.heap.script(script).module.clone().expect("module script has tables");

        let mut resolved = Vec::with_capacity(tables.requests.len());
        for &request in &tables.requests {
            let specifier = self.interns.get(request).to_owned();
            let requested = self.resolve_module(&specifier)?;
            resolved.push(requested);
        }
        for &requested in &resolved {
            self.link_module(requested)?;
        }
        self.heap.module_mut(module).resolved_requests.clone_from(&resolved);

        let mut env = crate::environment::Environment::module(Some(self.realm.global_env), &[]);
        for &(request, import_name, local_name) in &tables.imports {
            let Some(import_name) = import_name else {
                return Err(RunError::syntax_error("namespace imports are not supported by this runtime"));
            };
            let requested = resolved[request as usize];
            if let crate::environment::EnvKind::Module { indirect, .. } = &mut env.kind {
                indirect.insert(
                    local_name,
                    crate::environment::IndirectBinding {
                        module: requested,
                        target_name: import_name,
                    },
                );
            }
        }
        let env_id = self.alloc(HeapData::Env(env))?;
        self.heap.module_mut(module).env = Some(env_id);
        self.heap.module_mut(module).status = ModuleStatus::Linked;
        Ok(())
    }

    /// Evaluate: dependencies first (post-order), then the module body in
    /// its environment.
    pub(crate) fn evaluate_module_record(&mut self, module: HeapId) -> RunResult<Value> {
        use crate::script::ModuleStatus;
        match self.heap.module(module).status {
            ModuleStatus::Linked => {}
            ModuleStatus::Evaluating | ModuleStatus::Evaluated => return Ok(Value::Undefined),
            _ => return Err(RunError::syntax_error("module is not linked")),
        }
        self.heap.module_mut(module).status = ModuleStatus::Evaluating;
        let requests = self.heap.module(module).resolved_requests.clone();
        for requested in requests {
            self.evaluate_module_record(requested)?;
        }
        let script = self.heap.module(module).script;
        let env = self.heap.module(module).env.expect("linked module has an environment");
        let result = self.evaluate_module_body(script, env);
        self.heap.module_mut(module).status = ModuleStatus::Evaluated;
        result
    }

    fn evaluate_module_body(&mut self, script: HeapId, env: HeapId) -> RunResult<Value> {
        let record = *self.heap.script(script).func(0);
        let frame = crate::context::ScriptContext {
            function: Value::Undefined,
            script,
            func: 0,
            regs: vec![Value::Undefined; usize::from(record.reg_count)],
            args: Vec::new(),
            retval: Value::Undefined,
            ip: record.ip_start as usize,
            var_env: env,
            lex_env: env,
            priv_env: None,
            new_target: Value::Undefined,
            stack: Vec::new(),
            states: Vec::new(),
            kind: crate::context::ContextKind::Normal,
        };
        self.push_frame(frame)?;
        // Module-scope declarations bind in the module environment before
        // the body runs.
        if !self.heap.script(script).decls.is_empty() {
            self.instantiate_decl_group(0, env)?;
        }
        match self.run_context()? {
            crate::vm::FrameExit::Return(value) => Ok(value),
            crate::vm::FrameExit::Suspend => unreachable!("module bodies cannot suspend"),
        }
    }
}

/// Error produced by snapshot save/restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotError {
    pub message: String,
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "snapshot error: {msg}", msg = self.message)
    }
}

impl std::error::Error for SnapshotError {}

/// Owned snapshot payload: everything persistent about a quiescent runtime.
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(bound = "T: ResourceTracker + serde::Serialize + serde::de::DeserializeOwned")]
struct SnapshotPayload<T: ResourceTracker> {
    heap: Heap<T>,
    interns: Interns,
    realm: Realm,
    jobs: JobQueue,
    modules: Vec<(String, HeapId)>,
}

impl<T, Tr> Runtime<T, Tr>
where
    T: ResourceTracker + serde::Serialize + serde::de::DeserializeOwned,
    Tr: VmTracer,
{
    /// Serializes the runtime's persistent state through `postcard`.
    ///
    /// Only a quiescent runtime snapshots (no running contexts); suspended
    /// generator and async contexts live on the heap and are captured.
    /// Host hooks (eval, module resolver, user data) are not serialized and
    /// must be re-registered after [`Self::restore_with`].
    pub fn snapshot(&self) -> Result<Vec<u8>, SnapshotError> {
        if !self.contexts.is_empty() {
            return Err(SnapshotError {
                message: "cannot snapshot while contexts are running".to_string(),
            });
        }
        #[derive(serde::Serialize)]
        #[serde(bound = "T: ResourceTracker + serde::Serialize")]
        struct SnapshotRef<'a, T: ResourceTracker> {
            heap: &'a Heap<T>,
            interns: &'a Interns,
            realm: &'a Realm,
            jobs: &'a JobQueue,
            modules: Vec<(&'a String, &'a HeapId)>,
        }
        let mut modules: Vec<(&String, &HeapId)> = self.modules.iter().collect();
        modules.sort();
        let payload = SnapshotRef {
            heap: &self.heap,
            interns: &self.interns,
            realm: &self.realm,
            jobs: &self.jobs,
            modules,
        };
        postcard::to_allocvec(&payload).map_err(|err| SnapshotError {
            message: err.to_string(),
        })
    }

    /// Restores a runtime from snapshot bytes, with a fresh tracer.
    pub fn restore_with(bytes: &[u8], tracer: Tr) -> Result<Self, SnapshotError> {
        let payload: SnapshotPayload<T> = postcard::from_bytes(bytes).map_err(|err| SnapshotError {
            message: err.to_string(),
        })?;
        Ok(Self {
            heap: payload.heap,
            interns: payload.interns,
            realm: payload.realm,
            contexts: Vec::new(),
            temp_roots: Vec::new(),
            jobs: payload.jobs,
            tracer,
            eval_hook: None,
            module_resolver: None,
            user_data: None,
            modules: payload.modules.into_iter().collect(),
            agent_can_block: false,
            throw_dump: false,
        })
    }
}

impl Runtime {
    /// Restores a runtime with the default tracker and tracer.
    pub fn restore(bytes: &[u8]) -> Result<Self, SnapshotError> {
        Self::restore_with(bytes, NoopTracer)
    }
}
