//! Garbage collection: reachability, weak references, finalization
//! registry callbacks, and heap statistics.

use pretty_assertions::assert_eq;
use vesper::{
    DeclItem, DeclKind, FuncFlags, HostValue, Runtime, ScriptImage,
    bytecode::{Op, Reg, ScriptBuilder},
};

fn read_global(rt: &mut Runtime, name: &str) -> HostValue {
    let mut b = ScriptBuilder::new();
    let binding = b.binding(name);
    b.emit(Op::BindingGet { dst: Reg(0), binding });
    b.emit(Op::ReturnValue { src: Reg(0) });
    rt.run_script_image(b.build().unwrap()).expect("script completes")
}

// =============================================================================
// Reachability
// =============================================================================

/// Values reachable from the global object survive collection intact.
#[test]
fn reachable_values_survive_collection() {
    let mut rt = Runtime::new();
    let mut b = ScriptBuilder::new();
    let keep_binding = b.binding("keep");
    let hello = b.const_string("hello");
    b.emit(Op::PushNewArray { dst: Reg(0) });
    b.emit(Op::LoadConst { dst: Reg(1), index: hello });
    b.emit(Op::ArrayAdd { src: Reg(1) });
    b.emit(Op::PopState);
    b.emit(Op::BindingSet { binding: keep_binding, src: Reg(0) });
    b.emit(Op::LoadUndefined { dst: Reg(2) });
    b.emit(Op::ReturnValue { src: Reg(2) });
    rt.run_script_image(b.build().unwrap()).expect("script completes");

    rt.collect_garbage();
    rt.collect_garbage();

    let mut read = ScriptBuilder::new();
    let keep_binding = read.binding("keep");
    let zero = read.const_number(0.0);
    read.emit(Op::BindingGet { dst: Reg(0), binding: keep_binding });
    read.emit(Op::LoadConst { dst: Reg(1), index: zero });
    read.emit(Op::PropGetExpr { dst: Reg(2), obj: Reg(0), key: Reg(1) });
    read.emit(Op::ReturnValue { src: Reg(2) });
    let result = rt.run_script_image(read.build().unwrap()).expect("script completes");
    assert_eq!(result, HostValue::String("hello".to_string()));
}

/// Unreachable allocations are freed and their slots recycled.
#[test]
fn garbage_is_swept() {
    let mut rt = Runtime::new();
    let mut b = ScriptBuilder::new();
    // Allocate a pile of throwaway arrays.
    let hundred = b.const_number(100.0);
    let one = b.const_number(1.0);
    let zero = b.const_number(0.0);
    b.emit(Op::LoadConst { dst: Reg(0), index: zero });
    let loop_start = b.next_ip();
    b.emit(Op::LoadConst { dst: Reg(1), index: hundred });
    b.emit(Op::Lt { dst: Reg(2), lhs: Reg(0), rhs: Reg(1) });
    let exit = b.emit(Op::JumpFalse { cond: Reg(2), offset: 0 });
    b.emit(Op::PushNewArray { dst: Reg(3) });
    b.emit(Op::LoadConst { dst: Reg(4), index: one });
    b.emit(Op::ArrayAdd { src: Reg(4) });
    b.emit(Op::PopState);
    b.emit(Op::LoadConst { dst: Reg(4), index: one });
    b.emit(Op::Add { dst: Reg(0), lhs: Reg(0), rhs: Reg(4) });
    let back = b.jump_back_offset(loop_start);
    b.emit(Op::Jump { offset: back });
    b.patch_jump(exit);
    b.emit(Op::LoadUndefined { dst: Reg(5) });
    b.emit(Op::ReturnValue { src: Reg(5) });
    rt.run_script_image(b.build().unwrap()).expect("script completes");

    let before = rt.heap_stats();
    let freed = rt.collect_garbage();
    let after = rt.heap_stats();

    assert!(freed > 0, "collection should free the throwaway arrays, freed {freed}");
    assert!(
        after.free_slots > before.free_slots,
        "sweep should grow the free list: before={b}, after={a}",
        b = before.free_slots,
        a = after.free_slots
    );
    let diff = before.diff(&after);
    assert!(
        diff.live_objects_delta < 0,
        "live objects should drop, delta {delta}",
        delta = diff.live_objects_delta
    );
}

// =============================================================================
// Weak references
// =============================================================================

/// A WeakRef to a dead object clears; one to a live object does not.
#[test]
fn weak_refs_solve_at_sweep() {
    let mut rt = Runtime::new();
    let mut b = ScriptBuilder::new();
    let weak_ref_binding = b.binding("WeakRef");
    let dead_binding = b.binding("deadRef");
    let live_binding = b.binding("liveRef");
    let global_this_binding = b.binding("globalThis");
    // deadRef = new WeakRef({})
    b.emit(Op::PushNewObject { dst: Reg(0) });
    b.emit(Op::PopState);
    b.emit(Op::BindingGet { dst: Reg(1), binding: weak_ref_binding });
    b.emit(Op::PushNew { func: Reg(1) });
    b.emit(Op::ArgAdd { src: Reg(0) });
    b.emit(Op::New { dst: Reg(2) });
    b.emit(Op::BindingSet { binding: dead_binding, src: Reg(2) });
    // liveRef = new WeakRef(globalThis)
    b.emit(Op::BindingGet { dst: Reg(3), binding: global_this_binding });
    b.emit(Op::PushNew { func: Reg(1) });
    b.emit(Op::ArgAdd { src: Reg(3) });
    b.emit(Op::New { dst: Reg(4) });
    b.emit(Op::BindingSet { binding: live_binding, src: Reg(4) });
    b.emit(Op::LoadUndefined { dst: Reg(5) });
    b.emit(Op::ReturnValue { src: Reg(5) });
    rt.run_script_image(b.build().unwrap()).expect("script completes");

    rt.collect_garbage();

    let mut read = ScriptBuilder::new();
    let dead_binding = read.binding("deadRef");
    let live_binding = read.binding("liveRef");
    let deref_prop = read.prop("deref");
    read.emit(Op::PushNewArray { dst: Reg(0) });
    for binding in [dead_binding, live_binding] {
        read.emit(Op::BindingGet { dst: Reg(1), binding });
        read.emit(Op::PropGet { dst: Reg(2), obj: Reg(1), prop: deref_prop });
        read.emit(Op::PushCall { func: Reg(2), this: Reg(1) });
        read.emit(Op::Call { dst: Reg(3) });
        read.emit(Op::TypeOf { dst: Reg(4), src: Reg(3) });
        read.emit(Op::ArrayAdd { src: Reg(4) });
    }
    read.emit(Op::PopState);
    read.emit(Op::ReturnValue { src: Reg(0) });
    let result = rt.run_script_image(read.build().unwrap()).expect("script completes");
    assert_eq!(result, HostValue::Object("[undefined, object]".to_string()));
}

// =============================================================================
// Finalization registry
// =============================================================================

/// A dead registered target enqueues the cleanup callback as a microtask
/// after the cycle.
#[test]
fn finalization_callback_runs_after_collection() {
    let mut rt = Runtime::new();
    let mut b = ScriptBuilder::new();
    // cleanup = h => { seen = h }
    let cleanup = b.begin_function(FuncFlags::default(), 1, None);
    {
        let seen_binding = b.binding("seen");
        b.emit(Op::LoadArg { dst: Reg(0), index: 0 });
        b.emit(Op::BindingSet { binding: seen_binding, src: Reg(0) });
        b.emit(Op::LoadUndefined { dst: Reg(1) });
        b.emit(Op::ReturnValue { src: Reg(1) });
    }
    b.end_function();

    let registry_ctor_binding = b.binding("FinalizationRegistry");
    let registry_binding = b.binding("registry");
    let register_prop = b.prop("register");
    let held = b.const_string("target-died");
    b.emit(Op::BindingGet { dst: Reg(0), binding: registry_ctor_binding });
    b.emit(Op::PushNew { func: Reg(0) });
    b.emit(Op::LoadFunc { dst: Reg(1), func: cleanup });
    b.emit(Op::ArgAdd { src: Reg(1) });
    b.emit(Op::New { dst: Reg(2) });
    b.emit(Op::BindingSet { binding: registry_binding, src: Reg(2) });
    // registry.register({}, "target-died")
    b.emit(Op::PushNewObject { dst: Reg(3) });
    b.emit(Op::PopState);
    b.emit(Op::PropGet { dst: Reg(4), obj: Reg(2), prop: register_prop });
    b.emit(Op::PushCall { func: Reg(4), this: Reg(2) });
    b.emit(Op::ArgAdd { src: Reg(3) });
    b.emit(Op::LoadConst { dst: Reg(5), index: held });
    b.emit(Op::ArgAdd { src: Reg(5) });
    b.emit(Op::Call { dst: Reg(6) });
    b.emit(Op::LoadUndefined { dst: Reg(7) });
    b.emit(Op::ReturnValue { src: Reg(7) });
    rt.run_script_image(b.build().unwrap()).expect("script completes");

    rt.collect_garbage();
    rt.run_jobs().expect("jobs drain");

    assert_eq!(read_global(&mut rt, "seen"), HostValue::String("target-died".to_string()));
}

// =============================================================================
// Statistics
// =============================================================================

/// Heap stats and diffs report allocation growth by type.
#[test]
fn heap_stats_track_growth() {
    let mut rt = Runtime::new();
    let before = rt.heap_stats();

    let mut b = ScriptBuilder::new();
    let keep_binding = b.binding("keepStats");
    b.emit(Op::PushNewArray { dst: Reg(0) });
    b.emit(Op::PushNewObject { dst: Reg(1) });
    b.emit(Op::PopState);
    b.emit(Op::ArrayAdd { src: Reg(1) });
    b.emit(Op::PopState);
    b.emit(Op::BindingSet { binding: keep_binding, src: Reg(0) });
    b.emit(Op::LoadUndefined { dst: Reg(2) });
    b.emit(Op::ReturnValue { src: Reg(2) });
    rt.run_script_image(b.build().unwrap()).expect("script completes");

    let after = rt.heap_stats();
    let diff = before.diff(&after);
    assert!(
        diff.live_objects_delta > 0,
        "allocation should grow the heap, delta {delta}",
        delta = diff.live_objects_delta
    );
    assert!(
        after.objects_by_type.get("Object").copied().unwrap_or(0) > 0,
        "stats should count objects by variant"
    );
    let display = format!("{diff}");
    assert!(display.starts_with("HeapDiff:"), "diff renders with its header: {display}");
}

/// A second runtime is fully isolated from the first.
#[test]
fn runtimes_do_not_share_state() {
    let mut first = Runtime::new();
    let mut b = ScriptBuilder::new();
    let shared = b.binding("island");
    let one = b.const_number(1.0);
    b.emit(Op::LoadConst { dst: Reg(0), index: one });
    b.emit(Op::BindingSet { binding: shared, src: Reg(0) });
    b.emit(Op::LoadUndefined { dst: Reg(1) });
    b.emit(Op::ReturnValue { src: Reg(1) });
    let image: ScriptImage = b.build().unwrap();
    first.run_script_image(image).expect("script completes");

    let mut second = Runtime::new();
    let mut read = ScriptBuilder::new();
    let shared = read.binding("island");
    read.emit(Op::TypeOfBinding { dst: Reg(0), binding: shared });
    read.emit(Op::ReturnValue { src: Reg(0) });
    let result = second.run_script_image(read.build().unwrap()).expect("script completes");
    assert_eq!(result, HostValue::String("undefined".to_string()));
}

/// Declaration groups drive decl instantiation (smoke test for DeclKind).
#[test]
fn decl_groups_instantiate() {
    let mut rt = Runtime::new();
    let mut b = ScriptBuilder::new();
    let group = b.decl_group(vec![DeclItem {
        name: "v".to_string(),
        kind: DeclKind::Var,
        func: None,
    }]);
    let v_binding = b.binding("v");
    b.emit(Op::PushLexEnv { decl: Some(group) });
    b.emit(Op::TypeOfBinding { dst: Reg(0), binding: v_binding });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(0) });
    let result = rt.run_script_image(b.build().unwrap()).expect("script completes");
    assert_eq!(result, HostValue::String("undefined".to_string()));
}
