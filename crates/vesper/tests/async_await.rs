//! Await suspension and the microtask queue.

use pretty_assertions::assert_eq;
use vesper::{
    DeclItem, DeclKind, FuncFlags, HostValue, Runtime, ScriptImage,
    bytecode::{Op, Reg, ScriptBuilder},
};

/// `async function g(){ return await Promise.resolve(42) }`: the handler
/// fires on the next microtask tick, never synchronously.
#[test]
fn await_resolves_on_the_next_tick() {
    let mut rt = Runtime::new();

    // Phase 1: call g(), attach a then-handler writing the global `v`, and
    // return `typeof v`, still "undefined" because no job has run.
    let first = rt.run_script_image(async_image()).expect("script completes");
    assert_eq!(first, HostValue::String("undefined".to_string()));

    // Phase 2: the queue drained at the end of phase 1; v is now 42.
    let second = rt.run_script_image(read_v_image()).expect("script completes");
    assert_eq!(second, HostValue::Number(42.0));
}

fn async_image() -> ScriptImage {
    let mut b = ScriptBuilder::new();
    let g = b.begin_function(
        FuncFlags {
            r#async: true,
            ..FuncFlags::default()
        },
        0,
        Some("g"),
    );
    {
        let forty_two = b.const_number(42.0);
        let promise_binding = b.binding("Promise");
        let resolve_prop = b.prop("resolve");
        b.emit(Op::BindingGet { dst: Reg(0), binding: promise_binding });
        b.emit(Op::PropGet { dst: Reg(1), obj: Reg(0), prop: resolve_prop });
        b.emit(Op::PushCall { func: Reg(1), this: Reg(0) });
        b.emit(Op::LoadConst { dst: Reg(2), index: forty_two });
        b.emit(Op::ArgAdd { src: Reg(2) });
        b.emit(Op::Call { dst: Reg(3) });
        b.emit(Op::Await { dst: Reg(4), src: Reg(3) });
        b.emit(Op::ReturnValue { src: Reg(4) });
    }
    b.end_function();

    // x => { v = x }
    let handler = b.begin_function(FuncFlags::default(), 1, None);
    {
        let v_binding = b.binding("v");
        b.emit(Op::LoadArg { dst: Reg(0), index: 0 });
        b.emit(Op::BindingSet { binding: v_binding, src: Reg(0) });
        b.emit(Op::LoadUndefined { dst: Reg(1) });
        b.emit(Op::ReturnValue { src: Reg(1) });
    }
    b.end_function();

    let group = b.decl_group(vec![DeclItem {
        name: "g".to_string(),
        kind: DeclKind::Function,
        func: Some(g),
    }]);
    let g_binding = b.binding("g");
    let v_binding = b.binding("v");
    let then_prop = b.prop("then");
    b.emit(Op::PushLexEnv { decl: Some(group) });
    b.emit(Op::BindingGet { dst: Reg(0), binding: g_binding });
    b.emit(Op::LoadUndefined { dst: Reg(1) });
    b.emit(Op::PushCall { func: Reg(0), this: Reg(1) });
    b.emit(Op::Call { dst: Reg(2) });
    b.emit(Op::PropGet { dst: Reg(3), obj: Reg(2), prop: then_prop });
    b.emit(Op::LoadFunc { dst: Reg(4), func: handler });
    b.emit(Op::PushCall { func: Reg(3), this: Reg(2) });
    b.emit(Op::ArgAdd { src: Reg(4) });
    b.emit(Op::Call { dst: Reg(5) });
    b.emit(Op::TypeOfBinding { dst: Reg(6), binding: v_binding });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(6) });
    b.build().unwrap()
}

fn read_v_image() -> ScriptImage {
    let mut b = ScriptBuilder::new();
    let v_binding = b.binding("v");
    b.emit(Op::BindingGet { dst: Reg(0), binding: v_binding });
    b.emit(Op::ReturnValue { src: Reg(0) });
    b.build().unwrap()
}

/// A rejected awaited promise raises at the await point and can be caught.
#[test]
fn rejected_await_unwinds_through_try() {
    let mut b = ScriptBuilder::new();
    let g = b.begin_function(
        FuncFlags {
            r#async: true,
            ..FuncFlags::default()
        },
        0,
        Some("g"),
    );
    {
        let caught = b.const_string("caught: ");
        let promise_binding = b.binding("Promise");
        // try { await new Promise((res, rej) => rej("boom")) } catch (e) { return "caught: " + e }
        let executor = b.begin_function(FuncFlags::default(), 2, None);
        {
            let boom = b.const_string("boom");
            b.emit(Op::LoadArg { dst: Reg(0), index: 1 });
            b.emit(Op::LoadUndefined { dst: Reg(1) });
            b.emit(Op::PushCall { func: Reg(0), this: Reg(1) });
            b.emit(Op::LoadConst { dst: Reg(2), index: boom });
            b.emit(Op::ArgAdd { src: Reg(2) });
            b.emit(Op::Call { dst: Reg(3) });
            b.emit(Op::LoadUndefined { dst: Reg(0) });
            b.emit(Op::ReturnValue { src: Reg(0) });
        }
        b.end_function();

        let push_try = b.emit(Op::PushTry {
            catch_offset: None,
            finally_offset: None,
        });
        b.emit(Op::BindingGet { dst: Reg(0), binding: promise_binding });
        b.emit(Op::PushNew { func: Reg(0) });
        b.emit(Op::LoadFunc { dst: Reg(1), func: executor });
        b.emit(Op::ArgAdd { src: Reg(1) });
        b.emit(Op::New { dst: Reg(2) });
        b.emit(Op::Await { dst: Reg(3), src: Reg(2) });
        b.emit(Op::TryEnd);
        let after_catch = b.emit(Op::Jump { offset: 0 });
        b.patch_try_catch(push_try);
        b.emit(Op::CatchError { dst: Reg(4) });
        b.emit(Op::PushConcat);
        b.emit(Op::LoadConst { dst: Reg(5), index: caught });
        b.emit(Op::ConcatAdd { src: Reg(5) });
        b.emit(Op::ConcatAdd { src: Reg(4) });
        b.emit(Op::Concat { dst: Reg(6) });
        b.emit(Op::TryEnd);
        b.patch_jump(after_catch);
        b.emit(Op::ReturnValue { src: Reg(6) });
    }
    b.end_function();

    // g().then(x => { v = x })
    let handler = b.begin_function(FuncFlags::default(), 1, None);
    {
        let v_binding = b.binding("v");
        b.emit(Op::LoadArg { dst: Reg(0), index: 0 });
        b.emit(Op::BindingSet { binding: v_binding, src: Reg(0) });
        b.emit(Op::LoadUndefined { dst: Reg(1) });
        b.emit(Op::ReturnValue { src: Reg(1) });
    }
    b.end_function();

    let group = b.decl_group(vec![DeclItem {
        name: "g".to_string(),
        kind: DeclKind::Function,
        func: Some(g),
    }]);
    let g_binding = b.binding("g");
    let then_prop = b.prop("then");
    b.emit(Op::PushLexEnv { decl: Some(group) });
    b.emit(Op::BindingGet { dst: Reg(0), binding: g_binding });
    b.emit(Op::LoadUndefined { dst: Reg(1) });
    b.emit(Op::PushCall { func: Reg(0), this: Reg(1) });
    b.emit(Op::Call { dst: Reg(2) });
    b.emit(Op::PropGet { dst: Reg(3), obj: Reg(2), prop: then_prop });
    b.emit(Op::LoadFunc { dst: Reg(4), func: handler });
    b.emit(Op::PushCall { func: Reg(3), this: Reg(2) });
    b.emit(Op::ArgAdd { src: Reg(4) });
    b.emit(Op::Call { dst: Reg(5) });
    b.emit(Op::LoadUndefined { dst: Reg(6) });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(6) });

    let mut rt = Runtime::new();
    rt.run_script_image(b.build().unwrap()).expect("script completes");
    let result = rt.run_script_image(read_v_image()).expect("script completes");
    assert_eq!(result, HostValue::String("caught: boom".to_string()));
}

/// Promise reactions for one promise run in registration order.
#[test]
fn reactions_fire_in_registration_order() {
    let mut b = ScriptBuilder::new();
    // order-recording handler factory is overkill; two handlers append to a
    // global string.
    let first = b.begin_function(FuncFlags::default(), 1, None);
    {
        let a = b.const_string("a");
        let log_binding = b.binding("log");
        b.emit(Op::BindingGet { dst: Reg(0), binding: log_binding });
        b.emit(Op::LoadConst { dst: Reg(1), index: a });
        b.emit(Op::Add { dst: Reg(0), lhs: Reg(0), rhs: Reg(1) });
        b.emit(Op::BindingSet { binding: log_binding, src: Reg(0) });
        b.emit(Op::LoadUndefined { dst: Reg(1) });
        b.emit(Op::ReturnValue { src: Reg(1) });
    }
    b.end_function();
    let second = b.begin_function(FuncFlags::default(), 1, None);
    {
        let c = b.const_string("b");
        let log_binding = b.binding("log");
        b.emit(Op::BindingGet { dst: Reg(0), binding: log_binding });
        b.emit(Op::LoadConst { dst: Reg(1), index: c });
        b.emit(Op::Add { dst: Reg(0), lhs: Reg(0), rhs: Reg(1) });
        b.emit(Op::BindingSet { binding: log_binding, src: Reg(0) });
        b.emit(Op::LoadUndefined { dst: Reg(1) });
        b.emit(Op::ReturnValue { src: Reg(1) });
    }
    b.end_function();

    let empty = b.const_string("");
    let zero = b.const_number(0.0);
    let log_binding = b.binding("log");
    let promise_binding = b.binding("Promise");
    let resolve_prop = b.prop("resolve");
    let then_prop = b.prop("then");
    b.emit(Op::LoadConst { dst: Reg(0), index: empty });
    b.emit(Op::BindingSet { binding: log_binding, src: Reg(0) });
    b.emit(Op::BindingGet { dst: Reg(1), binding: promise_binding });
    b.emit(Op::PropGet { dst: Reg(2), obj: Reg(1), prop: resolve_prop });
    b.emit(Op::PushCall { func: Reg(2), this: Reg(1) });
    b.emit(Op::LoadConst { dst: Reg(3), index: zero });
    b.emit(Op::ArgAdd { src: Reg(3) });
    b.emit(Op::Call { dst: Reg(4) });
    for func in [first, second] {
        b.emit(Op::PropGet { dst: Reg(5), obj: Reg(4), prop: then_prop });
        b.emit(Op::LoadFunc { dst: Reg(6), func });
        b.emit(Op::PushCall { func: Reg(5), this: Reg(4) });
        b.emit(Op::ArgAdd { src: Reg(6) });
        b.emit(Op::Call { dst: Reg(7) });
    }
    b.emit(Op::LoadUndefined { dst: Reg(0) });
    b.emit(Op::ReturnValue { src: Reg(0) });

    let mut rt = Runtime::new();
    rt.run_script_image(b.build().unwrap()).expect("script completes");
    let mut read = ScriptBuilder::new();
    let log_binding = read.binding("log");
    read.emit(Op::BindingGet { dst: Reg(0), binding: log_binding });
    read.emit(Op::ReturnValue { src: Reg(0) });
    let result = rt.run_script_image(read.build().unwrap()).expect("script completes");
    assert_eq!(result, HostValue::String("ab".to_string()));
}
