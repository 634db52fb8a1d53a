//! Execution tracing infrastructure.
//!
//! Provides a trait-based tracing system for the interpreter with zero-cost
//! abstraction: with [`NoopTracer`] every hook compiles away via
//! monomorphization, the same way [`UnlimitedTracker`](crate::resource::UnlimitedTracker)
//! eliminates resource checking overhead.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (production default) |
//! | [`StderrTracer`] | Human-readable execution log to stderr |
//! | [`RecordingTracer`] | Full event recording for post-mortem analysis |

use crate::bytecode::OpKind;

/// Trace event emitted during execution.
///
/// Used by [`RecordingTracer`] to capture a full execution trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// An instruction was dispatched at the given IP.
    Instruction {
        /// Instruction index within the script's instruction array.
        ip: usize,
        /// The kind of operation executed.
        op: OpKind,
        /// Execution-context depth at dispatch time.
        depth: usize,
    },
    /// A call pushed a new execution context.
    ContextPush {
        /// Function name, if the function record carries one.
        name: Option<String>,
        /// Context-stack depth after the push.
        depth: usize,
    },
    /// A return popped an execution context.
    ContextPop {
        /// Context-stack depth after the pop.
        depth: usize,
    },
    /// A generator or async context suspended.
    Suspend {
        /// Context-stack depth after the suspension.
        depth: usize,
    },
    /// A garbage collection cycle started.
    GcStart {
        /// Number of live slots before the cycle.
        live: usize,
    },
    /// A garbage collection cycle finished.
    GcEnd {
        /// Number of slots freed by the cycle.
        freed: usize,
    },
}

/// Trait for interpreter execution tracing.
///
/// All methods have default no-op implementations, so [`NoopTracer`] requires
/// zero lines of code and compiles to zero instructions. Implementations only
/// override the hooks they care about.
pub trait VmTracer: std::fmt::Debug {
    /// Called before each instruction dispatch in the main execution loop.
    ///
    /// This is the hottest hook. Implementations should be as lightweight
    /// as possible.
    #[inline(always)]
    fn on_instruction(&mut self, _ip: usize, _op: OpKind, _depth: usize) {}

    /// Called when a new execution context is pushed.
    #[inline(always)]
    fn on_context_push(&mut self, _name: Option<&str>, _depth: usize) {}

    /// Called when an execution context is popped.
    #[inline(always)]
    fn on_context_pop(&mut self, _depth: usize) {}

    /// Called when a generator or async context suspends.
    #[inline(always)]
    fn on_suspend(&mut self, _depth: usize) {}

    /// Called when a garbage collection cycle starts.
    #[inline(always)]
    fn on_gc_start(&mut self, _live: usize) {}

    /// Called when a garbage collection cycle finishes.
    #[inline(always)]
    fn on_gc_end(&mut self, _freed: usize) {}
}

/// Zero-cost tracer: every hook is the default no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Tracer that writes a human-readable execution log to stderr.
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Instructions logged so far (used to prefix lines).
    count: u64,
}

impl StderrTracer {
    /// Creates a new stderr tracer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl VmTracer for StderrTracer {
    fn on_instruction(&mut self, ip: usize, op: OpKind, depth: usize) {
        self.count += 1;
        eprintln!("[{n:>6}] {pad}{ip:>4}: {op}", n = self.count, pad = "  ".repeat(depth));
    }

    fn on_context_push(&mut self, name: Option<&str>, depth: usize) {
        eprintln!("{pad}-> call {name}", pad = "  ".repeat(depth), name = name.unwrap_or("<anonymous>"));
    }

    fn on_context_pop(&mut self, depth: usize) {
        eprintln!("{pad}<- return", pad = "  ".repeat(depth));
    }

    fn on_suspend(&mut self, depth: usize) {
        eprintln!("{pad}.. suspend", pad = "  ".repeat(depth));
    }

    fn on_gc_start(&mut self, live: usize) {
        eprintln!("gc: start ({live} live)");
    }

    fn on_gc_end(&mut self, freed: usize) {
        eprintln!("gc: end ({freed} freed)");
    }
}

/// Tracer that records every event for later inspection.
///
/// Useful in tests to assert on execution order, suspension points, and GC
/// activity without instrumenting the interpreter itself.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    /// Creates a new recording tracer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded events.
    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Returns the number of instruction events recorded.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, TraceEvent::Instruction { .. }))
            .count()
    }
}

impl VmTracer for RecordingTracer {
    fn on_instruction(&mut self, ip: usize, op: OpKind, depth: usize) {
        self.events.push(TraceEvent::Instruction { ip, op, depth });
    }

    fn on_context_push(&mut self, name: Option<&str>, depth: usize) {
        self.events.push(TraceEvent::ContextPush {
            name: name.map(str::to_owned),
            depth,
        });
    }

    fn on_context_pop(&mut self, depth: usize) {
        self.events.push(TraceEvent::ContextPop { depth });
    }

    fn on_suspend(&mut self, depth: usize) {
        self.events.push(TraceEvent::Suspend { depth });
    }

    fn on_gc_start(&mut self, live: usize) {
        self.events.push(TraceEvent::GcStart { live });
    }

    fn on_gc_end(&mut self, freed: usize) {
        self.events.push(TraceEvent::GcEnd { freed });
    }
}
