//! Environment semantics: TDZ, immutable bindings, `typeof` on
//! unresolvable names, `with`, and sloppy global creation.

mod common;

use common::{run, run_err};
use pretty_assertions::assert_eq;
use vesper::{
    DeclItem, DeclKind, HostValue, NativeErrorKind,
    bytecode::{Op, Reg, ScriptBuilder},
};

/// Reading a `let` binding before initialization throws ReferenceError.
#[test]
fn tdz_read_throws_reference_error() {
    let mut b = ScriptBuilder::new();
    let group = b.decl_group(vec![DeclItem {
        name: "x".to_string(),
        kind: DeclKind::Let,
        func: None,
    }]);
    let x_binding = b.binding("x");
    b.emit(Op::PushLexEnv { decl: Some(group) });
    b.emit(Op::BindingGet { dst: Reg(0), binding: x_binding });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(0) });
    match run_err(b.build().unwrap()) {
        vesper::Exception::Native { kind, .. } => assert_eq!(kind, NativeErrorKind::ReferenceError),
        other => panic!("expected ReferenceError, got {other:?}"),
    }
}

/// Assigning to a `const` binding throws TypeError; reads keep the value.
#[test]
fn const_bindings_are_immutable() {
    let mut b = ScriptBuilder::new();
    let group = b.decl_group(vec![DeclItem {
        name: "c".to_string(),
        kind: DeclKind::Const,
        func: None,
    }]);
    let c_binding = b.binding("c");
    let one = b.const_number(1.0);
    let two = b.const_number(2.0);
    b.emit(Op::PushLexEnv { decl: Some(group) });
    b.emit(Op::LoadConst { dst: Reg(0), index: one });
    b.emit(Op::BindingInit { binding: c_binding, src: Reg(0) });
    b.emit(Op::LoadConst { dst: Reg(1), index: two });
    b.emit(Op::BindingSet { binding: c_binding, src: Reg(1) });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(0) });
    match run_err(b.build().unwrap()) {
        vesper::Exception::Native { kind, .. } => assert_eq!(kind, NativeErrorKind::TypeError),
        other => panic!("expected TypeError, got {other:?}"),
    }
}

/// `typeof nope` yields "undefined" instead of throwing.
#[test]
fn typeof_unresolvable_binding() {
    let mut b = ScriptBuilder::new();
    let nope = b.binding("nope");
    b.emit(Op::TypeOfBinding { dst: Reg(0), binding: nope });
    b.emit(Op::ReturnValue { src: Reg(0) });
    assert_eq!(run(b.build().unwrap()), HostValue::String("undefined".to_string()));
}

/// A plain unresolvable read still throws.
#[test]
fn unresolvable_read_throws() {
    let mut b = ScriptBuilder::new();
    let nope = b.binding("nope");
    b.emit(Op::BindingGet { dst: Reg(0), binding: nope });
    b.emit(Op::ReturnValue { src: Reg(0) });
    match run_err(b.build().unwrap()) {
        vesper::Exception::Native { kind, .. } => assert_eq!(kind, NativeErrorKind::ReferenceError),
        other => panic!("expected ReferenceError, got {other:?}"),
    }
}

/// `with (obj)` resolves bindings through the object's properties.
#[test]
fn with_environment_resolves_properties() {
    let mut b = ScriptBuilder::new();
    let x_prop = b.prop("x");
    let x_binding = b.binding("x");
    let seven = b.const_number(7.0);
    b.emit(Op::PushNewObject { dst: Reg(0) });
    b.emit(Op::LoadConst { dst: Reg(1), index: seven });
    b.emit(Op::ObjectAdd { prop: x_prop, src: Reg(1) });
    b.emit(Op::PopState);
    b.emit(Op::PushWith { src: Reg(0) });
    b.emit(Op::BindingGet { dst: Reg(2), binding: x_binding });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(2) });
    assert_eq!(run(b.build().unwrap()), HostValue::Number(7.0));
}

/// Writes inside `with` land on the base object, not the globals.
#[test]
fn with_environment_receives_writes() {
    let mut b = ScriptBuilder::new();
    let x_prop = b.prop("x");
    let x_binding = b.binding("x");
    let one = b.const_number(1.0);
    let nine = b.const_number(9.0);
    b.emit(Op::PushNewObject { dst: Reg(0) });
    b.emit(Op::LoadConst { dst: Reg(1), index: one });
    b.emit(Op::ObjectAdd { prop: x_prop, src: Reg(1) });
    b.emit(Op::PopState);
    b.emit(Op::PushWith { src: Reg(0) });
    b.emit(Op::LoadConst { dst: Reg(2), index: nine });
    b.emit(Op::BindingSet { binding: x_binding, src: Reg(2) });
    b.emit(Op::PopState);
    b.emit(Op::PropGet { dst: Reg(3), obj: Reg(0), prop: x_prop });
    b.emit(Op::ReturnValue { src: Reg(3) });
    assert_eq!(run(b.build().unwrap()), HostValue::Number(9.0));
}

/// A sloppy write to an unresolvable name creates a global property that a
/// later script observes.
#[test]
fn sloppy_write_creates_a_global() {
    let mut rt = vesper::Runtime::new();
    let mut b = ScriptBuilder::new();
    let v_binding = b.binding("shared");
    let five = b.const_number(5.0);
    b.emit(Op::LoadConst { dst: Reg(0), index: five });
    b.emit(Op::BindingSet { binding: v_binding, src: Reg(0) });
    b.emit(Op::LoadUndefined { dst: Reg(1) });
    b.emit(Op::ReturnValue { src: Reg(1) });
    rt.run_script_image(b.build().unwrap()).expect("script completes");

    let mut read = ScriptBuilder::new();
    let v_binding = read.binding("shared");
    read.emit(Op::BindingGet { dst: Reg(0), binding: v_binding });
    read.emit(Op::ReturnValue { src: Reg(0) });
    let result = rt.run_script_image(read.build().unwrap()).expect("script completes");
    assert_eq!(result, HostValue::Number(5.0));
}

/// `delete` on a configurable global binding removes it.
#[test]
fn delete_binding_on_globals() {
    let mut rt = vesper::Runtime::new();
    let mut b = ScriptBuilder::new();
    let v_binding = b.binding("temp");
    let five = b.const_number(5.0);
    b.emit(Op::LoadConst { dst: Reg(0), index: five });
    b.emit(Op::BindingSet { binding: v_binding, src: Reg(0) });
    b.emit(Op::DelBinding { dst: Reg(1), binding: v_binding });
    b.emit(Op::PushNewArray { dst: Reg(2) });
    b.emit(Op::ArrayAdd { src: Reg(1) });
    b.emit(Op::TypeOfBinding { dst: Reg(3), binding: v_binding });
    b.emit(Op::ArrayAdd { src: Reg(3) });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(2) });
    let result = rt.run_script_image(b.build().unwrap()).expect("script completes");
    assert_eq!(result, HostValue::Object("[true, undefined]".to_string()));
}
