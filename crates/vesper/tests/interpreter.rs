//! End-to-end interpreter scenarios: recursion, closures, try/catch/finally,
//! generators, classes with super, and BigInt arithmetic, each assembled as
//! a script image.

mod common;

use common::{run, run_err};
use pretty_assertions::assert_eq;
use vesper::{
    DeclItem, DeclKind, FuncFlags, HostValue, NativeErrorKind,
    bytecode::{Op, Reg, ScriptBuilder},
};

fn flags() -> FuncFlags {
    FuncFlags::default()
}

// =============================================================================
// 1. Recursion: fib(10) == 55
// =============================================================================

#[test]
fn recursive_fibonacci() {
    let mut b = ScriptBuilder::new();
    let fib = b.begin_function(flags(), 1, Some("fib"));
    {
        let two = b.const_number(2.0);
        let one = b.const_number(1.0);
        let fib_binding = b.binding("fib");
        b.emit(Op::LoadArg { dst: Reg(0), index: 0 });
        b.emit(Op::LoadConst { dst: Reg(1), index: two });
        b.emit(Op::Lt { dst: Reg(2), lhs: Reg(0), rhs: Reg(1) });
        let recurse = b.emit(Op::JumpFalse { cond: Reg(2), offset: 0 });
        b.emit(Op::ReturnValue { src: Reg(0) });
        b.patch_jump(recurse);
        b.emit(Op::BindingGet { dst: Reg(3), binding: fib_binding });
        b.emit(Op::LoadUndefined { dst: Reg(4) });
        b.emit(Op::LoadConst { dst: Reg(1), index: one });
        b.emit(Op::Sub { dst: Reg(2), lhs: Reg(0), rhs: Reg(1) });
        b.emit(Op::PushCall { func: Reg(3), this: Reg(4) });
        b.emit(Op::ArgAdd { src: Reg(2) });
        b.emit(Op::Call { dst: Reg(5) });
        b.emit(Op::LoadConst { dst: Reg(1), index: two });
        b.emit(Op::Sub { dst: Reg(2), lhs: Reg(0), rhs: Reg(1) });
        b.emit(Op::PushCall { func: Reg(3), this: Reg(4) });
        b.emit(Op::ArgAdd { src: Reg(2) });
        b.emit(Op::Call { dst: Reg(6) });
        b.emit(Op::Add { dst: Reg(0), lhs: Reg(5), rhs: Reg(6) });
        b.emit(Op::ReturnValue { src: Reg(0) });
    }
    b.end_function();

    let group = b.decl_group(vec![DeclItem {
        name: "fib".to_string(),
        kind: DeclKind::Function,
        func: Some(fib),
    }]);
    let ten = b.const_number(10.0);
    let fib_binding = b.binding("fib");
    b.emit(Op::PushLexEnv { decl: Some(group) });
    b.emit(Op::BindingGet { dst: Reg(0), binding: fib_binding });
    b.emit(Op::LoadUndefined { dst: Reg(1) });
    b.emit(Op::PushCall { func: Reg(0), this: Reg(1) });
    b.emit(Op::LoadConst { dst: Reg(2), index: ten });
    b.emit(Op::ArgAdd { src: Reg(2) });
    b.emit(Op::Call { dst: Reg(3) });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(3) });

    assert_eq!(run(b.build().unwrap()), HostValue::Number(55.0));
}

// =============================================================================
// 2. Closure capture: var shares one binding, let gets one per iteration
// =============================================================================

/// `var a=[]; for(var i=0;i<5;i++) a.push(()=>i); a.map(g=>g())`
#[test]
fn var_closures_share_one_binding() {
    assert_eq!(closure_capture_image(false), HostValue::Object("[5, 5, 5, 5, 5]".to_string()));
}

/// The `let` variant: each iteration introduces a fresh binding.
#[test]
fn let_closures_capture_per_iteration() {
    assert_eq!(closure_capture_image(true), HostValue::Object("[0, 1, 2, 3, 4]".to_string()));
}

fn closure_capture_image(per_iteration: bool) -> HostValue {
    let mut b = ScriptBuilder::new();

    // The arrow closure reads `j` in the per-iteration variant, `i` otherwise.
    let captured = if per_iteration { "j" } else { "i" };
    let arrow = b.begin_function(
        FuncFlags {
            arrow: true,
            ..flags()
        },
        0,
        None,
    );
    {
        let captured_binding = b.binding(captured);
        b.emit(Op::BindingGet { dst: Reg(0), binding: captured_binding });
        b.emit(Op::ReturnValue { src: Reg(0) });
    }
    b.end_function();

    // g => g()
    let mapper = b.begin_function(flags(), 1, None);
    {
        b.emit(Op::LoadArg { dst: Reg(0), index: 0 });
        b.emit(Op::LoadUndefined { dst: Reg(1) });
        b.emit(Op::PushCall { func: Reg(0), this: Reg(1) });
        b.emit(Op::Call { dst: Reg(2) });
        b.emit(Op::ReturnValue { src: Reg(2) });
    }
    b.end_function();

    let group = b.decl_group(vec![
        DeclItem {
            name: "a".to_string(),
            kind: DeclKind::Var,
            func: None,
        },
        DeclItem {
            name: "i".to_string(),
            kind: DeclKind::Var,
            func: None,
        },
    ]);
    let let_group = b.decl_group(vec![DeclItem {
        name: "j".to_string(),
        kind: DeclKind::Let,
        func: None,
    }]);
    let zero = b.const_number(0.0);
    let one = b.const_number(1.0);
    let five = b.const_number(5.0);
    let a_binding = b.binding("a");
    let i_binding = b.binding("i");
    let j_binding = b.binding("j");
    let push_prop = b.prop("push");
    let map_prop = b.prop("map");

    b.emit(Op::PushLexEnv { decl: Some(group) });
    b.emit(Op::PushNewArray { dst: Reg(0) });
    b.emit(Op::PopState);
    b.emit(Op::BindingSet { binding: a_binding, src: Reg(0) });
    b.emit(Op::LoadConst { dst: Reg(1), index: zero });
    b.emit(Op::BindingSet { binding: i_binding, src: Reg(1) });

    let loop_start = b.next_ip();
    b.emit(Op::BindingGet { dst: Reg(1), binding: i_binding });
    b.emit(Op::LoadConst { dst: Reg(2), index: five });
    b.emit(Op::Lt { dst: Reg(3), lhs: Reg(1), rhs: Reg(2) });
    let exit = b.emit(Op::JumpFalse { cond: Reg(3), offset: 0 });
    if per_iteration {
        // let j = i; closure captures j from the per-iteration scope.
        b.emit(Op::PushLexEnv { decl: Some(let_group) });
        b.emit(Op::BindingGet { dst: Reg(1), binding: i_binding });
        b.emit(Op::BindingInit { binding: j_binding, src: Reg(1) });
    }
    b.emit(Op::LoadFunc { dst: Reg(4), func: arrow });
    if per_iteration {
        b.emit(Op::PopState);
    }
    b.emit(Op::BindingGet { dst: Reg(5), binding: a_binding });
    b.emit(Op::PropGet { dst: Reg(6), obj: Reg(5), prop: push_prop });
    b.emit(Op::PushCall { func: Reg(6), this: Reg(5) });
    b.emit(Op::ArgAdd { src: Reg(4) });
    b.emit(Op::Call { dst: Reg(7) });
    b.emit(Op::BindingGet { dst: Reg(1), binding: i_binding });
    b.emit(Op::LoadConst { dst: Reg(2), index: one });
    b.emit(Op::Add { dst: Reg(1), lhs: Reg(1), rhs: Reg(2) });
    b.emit(Op::BindingSet { binding: i_binding, src: Reg(1) });
    let back = b.jump_back_offset(loop_start);
    b.emit(Op::Jump { offset: back });
    b.patch_jump(exit);

    b.emit(Op::BindingGet { dst: Reg(5), binding: a_binding });
    b.emit(Op::PropGet { dst: Reg(6), obj: Reg(5), prop: map_prop });
    b.emit(Op::LoadFunc { dst: Reg(4), func: mapper });
    b.emit(Op::PushCall { func: Reg(6), this: Reg(5) });
    b.emit(Op::ArgAdd { src: Reg(4) });
    b.emit(Op::Call { dst: Reg(0) });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(0) });

    run(b.build().unwrap())
}

// =============================================================================
// 3. try / catch / finally
// =============================================================================

/// `try { throw 'x' } catch(e) { var r = e } finally { r += '!' } r`
#[test]
fn try_catch_finally_threads_the_value() {
    let mut b = ScriptBuilder::new();
    let group = b.decl_group(vec![DeclItem {
        name: "r".to_string(),
        kind: DeclKind::Var,
        func: None,
    }]);
    let x = b.const_string("x");
    let bang = b.const_string("!");
    let r_binding = b.binding("r");

    b.emit(Op::PushLexEnv { decl: Some(group) });
    let push_try = b.emit(Op::PushTry {
        catch_offset: None,
        finally_offset: None,
    });
    b.emit(Op::LoadConst { dst: Reg(0), index: x });
    b.emit(Op::Throw { src: Reg(0) });
    b.patch_try_catch(push_try);
    b.emit(Op::CatchError { dst: Reg(1) });
    b.emit(Op::BindingSet { binding: r_binding, src: Reg(1) });
    b.emit(Op::TryEnd);
    b.patch_try_finally(push_try);
    b.emit(Op::Finally);
    b.emit(Op::BindingGet { dst: Reg(2), binding: r_binding });
    b.emit(Op::LoadConst { dst: Reg(3), index: bang });
    b.emit(Op::Add { dst: Reg(2), lhs: Reg(2), rhs: Reg(3) });
    b.emit(Op::BindingSet { binding: r_binding, src: Reg(2) });
    b.emit(Op::PopState);
    b.emit(Op::BindingGet { dst: Reg(0), binding: r_binding });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(0) });

    assert_eq!(run(b.build().unwrap()), HostValue::String("x!".to_string()));
}

/// A `return` inside `try` still runs the finally block.
#[test]
fn finally_intercepts_return() {
    let mut b = ScriptBuilder::new();
    let f = b.begin_function(flags(), 0, Some("f"));
    {
        let one = b.const_number(1.0);
        let ran = b.const_string("ran");
        let flag_binding = b.binding("flag");
        let push_try = b.emit(Op::PushTry {
            catch_offset: None,
            finally_offset: None,
        });
        b.emit(Op::LoadConst { dst: Reg(0), index: one });
        b.emit(Op::ReturnValue { src: Reg(0) });
        b.patch_try_finally(push_try);
        b.emit(Op::Finally);
        b.emit(Op::LoadConst { dst: Reg(1), index: ran });
        b.emit(Op::BindingSet { binding: flag_binding, src: Reg(1) });
        b.emit(Op::PopState);
        b.emit(Op::LoadUndefined { dst: Reg(0) });
        b.emit(Op::ReturnValue { src: Reg(0) });
    }
    b.end_function();

    let group = b.decl_group(vec![DeclItem {
        name: "f".to_string(),
        kind: DeclKind::Function,
        func: Some(f),
    }]);
    let f_binding = b.binding("f");
    let flag_binding = b.binding("flag");
    b.emit(Op::PushLexEnv { decl: Some(group) });
    b.emit(Op::BindingGet { dst: Reg(0), binding: f_binding });
    b.emit(Op::LoadUndefined { dst: Reg(1) });
    b.emit(Op::PushCall { func: Reg(0), this: Reg(1) });
    b.emit(Op::Call { dst: Reg(2) });
    // [f(), flag]
    b.emit(Op::PushNewArray { dst: Reg(3) });
    b.emit(Op::ArrayAdd { src: Reg(2) });
    b.emit(Op::BindingGet { dst: Reg(4), binding: flag_binding });
    b.emit(Op::ArrayAdd { src: Reg(4) });
    b.emit(Op::PopState);
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(3) });

    assert_eq!(run(b.build().unwrap()), HostValue::Object("[1, ran]".to_string()));
}

// =============================================================================
// 5. Generators
// =============================================================================

/// `function*g(){ yield 1; yield 2; return 3 }` driven through next().
#[test]
fn generator_yields_then_completes() {
    let mut b = ScriptBuilder::new();
    let g = b.begin_function(
        FuncFlags {
            generator: true,
            ..flags()
        },
        0,
        Some("g"),
    );
    {
        let one = b.const_number(1.0);
        let two = b.const_number(2.0);
        let three = b.const_number(3.0);
        b.emit(Op::LoadConst { dst: Reg(0), index: one });
        b.emit(Op::Yield { dst: Reg(1), src: Reg(0) });
        b.emit(Op::LoadConst { dst: Reg(0), index: two });
        b.emit(Op::Yield { dst: Reg(1), src: Reg(0) });
        b.emit(Op::LoadConst { dst: Reg(0), index: three });
        b.emit(Op::ReturnValue { src: Reg(0) });
    }
    b.end_function();

    let group = b.decl_group(vec![DeclItem {
        name: "g".to_string(),
        kind: DeclKind::Function,
        func: Some(g),
    }]);
    let g_binding = b.binding("g");
    let next_prop = b.prop("next");
    let value_prop = b.prop("value");
    let done_prop = b.prop("done");

    b.emit(Op::PushLexEnv { decl: Some(group) });
    b.emit(Op::BindingGet { dst: Reg(0), binding: g_binding });
    b.emit(Op::LoadUndefined { dst: Reg(1) });
    b.emit(Op::PushCall { func: Reg(0), this: Reg(1) });
    b.emit(Op::Call { dst: Reg(2) });
    b.emit(Op::PushNewArray { dst: Reg(3) });
    for _ in 0..3 {
        b.emit(Op::PropGet { dst: Reg(4), obj: Reg(2), prop: next_prop });
        b.emit(Op::PushCall { func: Reg(4), this: Reg(2) });
        b.emit(Op::Call { dst: Reg(5) });
        b.emit(Op::PropGet { dst: Reg(6), obj: Reg(5), prop: value_prop });
        b.emit(Op::ArrayAdd { src: Reg(6) });
    }
    b.emit(Op::PropGet { dst: Reg(4), obj: Reg(2), prop: next_prop });
    b.emit(Op::PushCall { func: Reg(4), this: Reg(2) });
    b.emit(Op::Call { dst: Reg(5) });
    b.emit(Op::PropGet { dst: Reg(6), obj: Reg(5), prop: done_prop });
    b.emit(Op::ArrayAdd { src: Reg(6) });
    b.emit(Op::PopState);
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(3) });

    assert_eq!(run(b.build().unwrap()), HostValue::Object("[1, 2, 3, true]".to_string()));
}

/// for-of over a generator with an early exit closes the generator.
#[test]
fn for_of_break_closes_the_iterator() {
    let mut b = ScriptBuilder::new();
    let g = b.begin_function(
        FuncFlags {
            generator: true,
            ..flags()
        },
        0,
        Some("g"),
    );
    {
        let one = b.const_number(1.0);
        let two = b.const_number(2.0);
        b.emit(Op::LoadConst { dst: Reg(0), index: one });
        b.emit(Op::Yield { dst: Reg(1), src: Reg(0) });
        b.emit(Op::LoadConst { dst: Reg(0), index: two });
        b.emit(Op::Yield { dst: Reg(1), src: Reg(0) });
        b.emit(Op::LoadUndefined { dst: Reg(0) });
        b.emit(Op::ReturnValue { src: Reg(0) });
    }
    b.end_function();

    let group = b.decl_group(vec![DeclItem {
        name: "g".to_string(),
        kind: DeclKind::Function,
        func: Some(g),
    }]);
    let g_binding = b.binding("g");
    let next_prop = b.prop("next");
    let done_prop = b.prop("done");

    b.emit(Op::PushLexEnv { decl: Some(group) });
    b.emit(Op::BindingGet { dst: Reg(0), binding: g_binding });
    b.emit(Op::LoadUndefined { dst: Reg(1) });
    b.emit(Op::PushCall { func: Reg(0), this: Reg(1) });
    b.emit(Op::Call { dst: Reg(2) });
    // take the first value, then break out of the loop
    b.emit(Op::PushIter { src: Reg(2) });
    let step = b.emit(Op::ForStep { dst: Reg(3), done_offset: 0 });
    b.emit(Op::PopState);
    b.patch_jump(step);
    // the generator must now be finished
    b.emit(Op::PropGet { dst: Reg(4), obj: Reg(2), prop: next_prop });
    b.emit(Op::PushCall { func: Reg(4), this: Reg(2) });
    b.emit(Op::Call { dst: Reg(5) });
    b.emit(Op::PropGet { dst: Reg(6), obj: Reg(5), prop: done_prop });
    b.emit(Op::PushNewArray { dst: Reg(7) });
    b.emit(Op::ArrayAdd { src: Reg(3) });
    b.emit(Op::ArrayAdd { src: Reg(6) });
    b.emit(Op::PopState);
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(7) });

    assert_eq!(run(b.build().unwrap()), HostValue::Object("[1, true]".to_string()));
}

// =============================================================================
// 6. Classes and super()
// =============================================================================

/// `class A { constructor(){this.x=1} } class B extends A { constructor(){ super(); this.y=2 } }`
#[test]
fn derived_class_construction() {
    let mut b = ScriptBuilder::new();
    let ctor_flags = FuncFlags {
        strict: true,
        class_constructor: true,
        ..flags()
    };
    let func_a = b.begin_function(ctor_flags, 0, Some("A"));
    {
        let one = b.const_number(1.0);
        let x_prop = b.prop("x");
        b.emit(Op::LoadThis { dst: Reg(0) });
        b.emit(Op::LoadConst { dst: Reg(1), index: one });
        b.emit(Op::PropSet { obj: Reg(0), prop: x_prop, src: Reg(1) });
        b.emit(Op::LoadUndefined { dst: Reg(0) });
        b.emit(Op::ReturnValue { src: Reg(0) });
    }
    b.end_function();
    let func_b = b.begin_function(
        FuncFlags {
            derived: true,
            ..ctor_flags
        },
        0,
        Some("B"),
    );
    {
        let two = b.const_number(2.0);
        let y_prop = b.prop("y");
        b.emit(Op::PushSuperCall);
        b.emit(Op::SuperCall { dst: Reg(0) });
        b.emit(Op::LoadThis { dst: Reg(1) });
        b.emit(Op::LoadConst { dst: Reg(2), index: two });
        b.emit(Op::PropSet { obj: Reg(1), prop: y_prop, src: Reg(2) });
        b.emit(Op::LoadUndefined { dst: Reg(0) });
        b.emit(Op::ReturnValue { src: Reg(0) });
    }
    b.end_function();

    let name_a = b.const_string("A");
    let name_b = b.const_string("B");
    let x_prop = b.prop("x");
    let y_prop = b.prop("y");
    b.emit(Op::PushClass {
        dst: Reg(0),
        name: Some(name_a),
        parent: None,
        priv_env: None,
    });
    b.emit(Op::ConstrCreate { func: func_a });
    b.emit(Op::ClassInit);
    b.emit(Op::PushClass {
        dst: Reg(1),
        name: Some(name_b),
        parent: Some(Reg(0)),
        priv_env: None,
    });
    b.emit(Op::ConstrCreate { func: func_b });
    b.emit(Op::ClassInit);
    b.emit(Op::PushNew { func: Reg(1) });
    b.emit(Op::New { dst: Reg(2) });
    b.emit(Op::PushNewArray { dst: Reg(3) });
    b.emit(Op::PropGet { dst: Reg(4), obj: Reg(2), prop: x_prop });
    b.emit(Op::ArrayAdd { src: Reg(4) });
    b.emit(Op::PropGet { dst: Reg(4), obj: Reg(2), prop: y_prop });
    b.emit(Op::ArrayAdd { src: Reg(4) });
    b.emit(Op::InstanceOf { dst: Reg(4), lhs: Reg(2), rhs: Reg(0) });
    b.emit(Op::ArrayAdd { src: Reg(4) });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(3) });

    assert_eq!(run(b.build().unwrap()), HostValue::Object("[1, 2, true]".to_string()));
}

/// Reading `this` before `super()` in a derived constructor throws.
#[test]
fn this_before_super_is_a_reference_error() {
    let mut b = ScriptBuilder::new();
    let ctor_flags = FuncFlags {
        strict: true,
        class_constructor: true,
        ..flags()
    };
    let func_a = b.begin_function(ctor_flags, 0, Some("A"));
    {
        b.emit(Op::LoadUndefined { dst: Reg(0) });
        b.emit(Op::ReturnValue { src: Reg(0) });
    }
    b.end_function();
    let func_b = b.begin_function(
        FuncFlags {
            derived: true,
            ..ctor_flags
        },
        0,
        Some("B"),
    );
    {
        b.emit(Op::LoadThis { dst: Reg(0) });
        b.emit(Op::ReturnValue { src: Reg(0) });
    }
    b.end_function();

    b.emit(Op::PushClass {
        dst: Reg(0),
        name: None,
        parent: None,
        priv_env: None,
    });
    b.emit(Op::ConstrCreate { func: func_a });
    b.emit(Op::ClassInit);
    b.emit(Op::PushClass {
        dst: Reg(1),
        name: None,
        parent: Some(Reg(0)),
        priv_env: None,
    });
    b.emit(Op::ConstrCreate { func: func_b });
    b.emit(Op::ClassInit);
    b.emit(Op::PushNew { func: Reg(1) });
    b.emit(Op::New { dst: Reg(2) });
    b.emit(Op::ReturnValue { src: Reg(2) });

    match run_err(b.build().unwrap()) {
        vesper::Exception::Native { kind, .. } => assert_eq!(kind, NativeErrorKind::ReferenceError),
        other => panic!("expected ReferenceError, got {other:?}"),
    }
}

// =============================================================================
// 7. BigInt: (2n ** 64n) - 1n
// =============================================================================

#[test]
fn big_int_exponentiation() {
    let mut b = ScriptBuilder::new();
    let two = b.const_big_int("2");
    let sixty_four = b.const_big_int("64");
    let one = b.const_big_int("1");
    b.emit(Op::LoadConst { dst: Reg(0), index: two });
    b.emit(Op::LoadConst { dst: Reg(1), index: sixty_four });
    b.emit(Op::Exp { dst: Reg(2), lhs: Reg(0), rhs: Reg(1) });
    b.emit(Op::LoadConst { dst: Reg(3), index: one });
    b.emit(Op::Sub { dst: Reg(4), lhs: Reg(2), rhs: Reg(3) });
    b.emit(Op::ReturnValue { src: Reg(4) });

    assert_eq!(
        run(b.build().unwrap()),
        HostValue::BigInt("18446744073709551615".to_string())
    );
}

/// Mixing a BigInt and a Number in arithmetic is a TypeError.
#[test]
fn mixed_big_int_arithmetic_throws() {
    let mut b = ScriptBuilder::new();
    let two = b.const_big_int("2");
    let three = b.const_number(3.0);
    b.emit(Op::LoadConst { dst: Reg(0), index: two });
    b.emit(Op::LoadConst { dst: Reg(1), index: three });
    b.emit(Op::Mul { dst: Reg(2), lhs: Reg(0), rhs: Reg(1) });
    b.emit(Op::ReturnValue { src: Reg(2) });

    match run_err(b.build().unwrap()) {
        vesper::Exception::Native { kind, .. } => assert_eq!(kind, NativeErrorKind::TypeError),
        other => panic!("expected TypeError, got {other:?}"),
    }
}

// =============================================================================
// Tail calls
// =============================================================================

/// Self-recursive tail calls reuse the context: far deeper than any call
/// stack would allow.
#[test]
fn tail_call_reuses_the_frame() {
    let mut b = ScriptBuilder::new();
    let f = b.begin_function(flags(), 1, Some("f"));
    {
        let zero = b.const_number(0.0);
        let one = b.const_number(1.0);
        let done = b.const_string("done");
        let f_binding = b.binding("f");
        b.emit(Op::LoadArg { dst: Reg(0), index: 0 });
        b.emit(Op::LoadConst { dst: Reg(1), index: zero });
        b.emit(Op::StrictEq { dst: Reg(2), lhs: Reg(0), rhs: Reg(1) });
        let keep_going = b.emit(Op::JumpFalse { cond: Reg(2), offset: 0 });
        b.emit(Op::LoadConst { dst: Reg(3), index: done });
        b.emit(Op::ReturnValue { src: Reg(3) });
        b.patch_jump(keep_going);
        b.emit(Op::BindingGet { dst: Reg(4), binding: f_binding });
        b.emit(Op::LoadConst { dst: Reg(1), index: one });
        b.emit(Op::Sub { dst: Reg(5), lhs: Reg(0), rhs: Reg(1) });
        b.emit(Op::LoadUndefined { dst: Reg(6) });
        b.emit(Op::PushCall { func: Reg(4), this: Reg(6) });
        b.emit(Op::ArgAdd { src: Reg(5) });
        b.emit(Op::TailCall { dst: Reg(7) });
    }
    b.end_function();

    let group = b.decl_group(vec![DeclItem {
        name: "f".to_string(),
        kind: DeclKind::Function,
        func: Some(f),
    }]);
    let count = b.const_number(100_000.0);
    let f_binding = b.binding("f");
    b.emit(Op::PushLexEnv { decl: Some(group) });
    b.emit(Op::BindingGet { dst: Reg(0), binding: f_binding });
    b.emit(Op::LoadUndefined { dst: Reg(1) });
    b.emit(Op::PushCall { func: Reg(0), this: Reg(1) });
    b.emit(Op::LoadConst { dst: Reg(2), index: count });
    b.emit(Op::ArgAdd { src: Reg(2) });
    b.emit(Op::Call { dst: Reg(3) });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(3) });

    assert_eq!(run(b.build().unwrap()), HostValue::String("done".to_string()));
}

// =============================================================================
// String building
// =============================================================================

#[test]
fn concat_state_builds_strings() {
    let mut b = ScriptBuilder::new();
    let hello = b.const_string("answer: ");
    let forty_two = b.const_number(42.0);
    b.emit(Op::PushConcat);
    b.emit(Op::LoadConst { dst: Reg(0), index: hello });
    b.emit(Op::ConcatAdd { src: Reg(0) });
    b.emit(Op::LoadConst { dst: Reg(0), index: forty_two });
    b.emit(Op::ConcatAdd { src: Reg(0) });
    b.emit(Op::Concat { dst: Reg(1) });
    b.emit(Op::ReturnValue { src: Reg(1) });

    assert_eq!(run(b.build().unwrap()), HostValue::String("answer: 42".to_string()));
}
