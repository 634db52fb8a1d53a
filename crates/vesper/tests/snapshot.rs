//! Snapshot round-trips: a quiescent runtime, including suspended
//! generators and globals, restores on a fresh runtime value.

use pretty_assertions::assert_eq;
use vesper::{
    DeclItem, DeclKind, FuncFlags, HostValue, Runtime,
    bytecode::{Op, Reg, ScriptBuilder},
};

#[test]
fn snapshot_restores_globals() {
    let mut rt = Runtime::new();
    let mut b = ScriptBuilder::new();
    let x_binding = b.binding("x");
    let forty_two = b.const_number(42.0);
    b.emit(Op::LoadConst { dst: Reg(0), index: forty_two });
    b.emit(Op::BindingSet { binding: x_binding, src: Reg(0) });
    b.emit(Op::LoadUndefined { dst: Reg(1) });
    b.emit(Op::ReturnValue { src: Reg(1) });
    rt.run_script_image(b.build().unwrap()).expect("script completes");

    let bytes = rt.snapshot().expect("snapshot serializes");
    let mut restored = Runtime::restore(&bytes).expect("snapshot restores");

    let mut read = ScriptBuilder::new();
    let x_binding = read.binding("x");
    read.emit(Op::BindingGet { dst: Reg(0), binding: x_binding });
    read.emit(Op::ReturnValue { src: Reg(0) });
    let result = restored.run_script_image(read.build().unwrap()).expect("script completes");
    assert_eq!(result, HostValue::Number(42.0));
}

/// A generator suspended mid-body resumes on the restored runtime.
#[test]
fn snapshot_preserves_suspended_generators() {
    let mut rt = Runtime::new();
    let mut b = ScriptBuilder::new();
    let counter = b.begin_function(
        FuncFlags {
            generator: true,
            ..FuncFlags::default()
        },
        0,
        Some("counter"),
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
        name: "counter".to_string(),
        kind: DeclKind::Function,
        func: Some(counter),
    }]);
    let counter_binding = b.binding("counter");
    let it_binding = b.binding("it");
    let next_prop = b.prop("next");
    let value_prop = b.prop("value");
    b.emit(Op::PushLexEnv { decl: Some(group) });
    b.emit(Op::BindingGet { dst: Reg(0), binding: counter_binding });
    b.emit(Op::LoadUndefined { dst: Reg(1) });
    b.emit(Op::PushCall { func: Reg(0), this: Reg(1) });
    b.emit(Op::Call { dst: Reg(2) });
    b.emit(Op::BindingSet { binding: it_binding, src: Reg(2) });
    b.emit(Op::PropGet { dst: Reg(3), obj: Reg(2), prop: next_prop });
    b.emit(Op::PushCall { func: Reg(3), this: Reg(2) });
    b.emit(Op::Call { dst: Reg(4) });
    b.emit(Op::PropGet { dst: Reg(5), obj: Reg(4), prop: value_prop });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(5) });
    let first = rt.run_script_image(b.build().unwrap()).expect("script completes");
    assert_eq!(first, HostValue::Number(1.0));

    let bytes = rt.snapshot().expect("snapshot serializes");
    let mut restored = Runtime::restore(&bytes).expect("snapshot restores");

    let mut read = ScriptBuilder::new();
    let it_binding = read.binding("it");
    let next_prop = read.prop("next");
    let value_prop = read.prop("value");
    read.emit(Op::BindingGet { dst: Reg(0), binding: it_binding });
    read.emit(Op::PropGet { dst: Reg(1), obj: Reg(0), prop: next_prop });
    read.emit(Op::PushCall { func: Reg(1), this: Reg(0) });
    read.emit(Op::Call { dst: Reg(2) });
    read.emit(Op::PropGet { dst: Reg(3), obj: Reg(2), prop: value_prop });
    read.emit(Op::ReturnValue { src: Reg(3) });
    let second = restored.run_script_image(read.build().unwrap()).expect("script completes");
    assert_eq!(second, HostValue::Number(2.0));
}
