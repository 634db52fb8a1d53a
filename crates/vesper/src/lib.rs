#![doc = include_str!("../../../README.md")]
#![expect(dead_code, reason = "embedder-facing shims keep some currently-unused APIs")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors the language")]
#![expect(clippy::struct_excessive_bools, reason = "function flags mirror parser output")]
#![expect(clippy::result_large_err, reason = "the error channel carries pending throw values")]

mod builtins;
pub mod bytecode;
mod context;
mod conv;
mod environment;
mod error;
mod heap;
mod intern;
mod jobs;
mod object;
mod operations;
mod promise;
mod realm;
mod resource;
mod runtime;
mod script;
mod stack;
mod tracer;
mod types;
mod value;
mod vm;

pub use crate::{
    error::{Exception, NativeErrorKind, ScriptLoadError},
    heap::{HeapDiff, HeapId, HeapStats},
    intern::{StringId, WellKnown},
    resource::{
        DEFAULT_GC_INTERVAL, DEFAULT_MAX_CALL_DEPTH, LimitedTracker, NoLimitTracker, ResourceError, ResourceLimits,
        ResourceTracker, UnlimitedTracker,
    },
    runtime::{EvalHook, HostData, ModuleResolver, Runtime, SnapshotError},
    script::{
        ConstEntry, DeclGroup, DeclItem, DeclKind, ExportEntry, FuncFlags, FuncRecord, ImportEntry, LineInfo,
        ModuleImage, PrivEnvRecord, ScriptImage,
    },
    tracer::{NoopTracer, RecordingTracer, StderrTracer, TraceEvent, VmTracer},
    value::HostValue,
};
