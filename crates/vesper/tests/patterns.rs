//! Destructuring patterns, spread, and for-in enumeration.

mod common;

use common::run;
use pretty_assertions::assert_eq;
use vesper::{
    HostValue,
    bytecode::{Op, Reg, ScriptBuilder},
};

/// `[a, b, ...rest] = [1, 2, 3, 4]`
#[test]
fn array_pattern_with_rest() {
    let mut b = ScriptBuilder::new();
    b.emit(Op::PushNewArray { dst: Reg(0) });
    for value in [1.0, 2.0, 3.0, 4.0] {
        let c = b.const_number(value);
        b.emit(Op::LoadConst { dst: Reg(1), index: c });
        b.emit(Op::ArrayAdd { src: Reg(1) });
    }
    b.emit(Op::PopState);
    b.emit(Op::PushArrayAssi { src: Reg(0) });
    b.emit(Op::NextArrayItem { dst: Reg(2) });
    b.emit(Op::NextArrayItem { dst: Reg(3) });
    b.emit(Op::RestArrayItems { dst: Reg(4) });
    b.emit(Op::PopState);
    // [a, b, rest.length]
    let length_prop = b.prop("length");
    b.emit(Op::PushNewArray { dst: Reg(5) });
    b.emit(Op::ArrayAdd { src: Reg(2) });
    b.emit(Op::ArrayAdd { src: Reg(3) });
    b.emit(Op::PropGet { dst: Reg(6), obj: Reg(4), prop: length_prop });
    b.emit(Op::ArrayAdd { src: Reg(6) });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(5) });
    assert_eq!(run(b.build().unwrap()), HostValue::Object("[1, 2, 2]".to_string()));
}

/// Destructuring past the end yields undefined, not an error.
#[test]
fn array_pattern_exhaustion_yields_undefined() {
    let mut b = ScriptBuilder::new();
    let one = b.const_number(1.0);
    b.emit(Op::PushNewArray { dst: Reg(0) });
    b.emit(Op::LoadConst { dst: Reg(1), index: one });
    b.emit(Op::ArrayAdd { src: Reg(1) });
    b.emit(Op::PopState);
    b.emit(Op::PushArrayAssi { src: Reg(0) });
    b.emit(Op::NextArrayItem { dst: Reg(2) });
    b.emit(Op::NextArrayItem { dst: Reg(3) });
    b.emit(Op::PopState);
    b.emit(Op::TypeOf { dst: Reg(3), src: Reg(3) });
    b.emit(Op::ReturnValue { src: Reg(3) });
    assert_eq!(run(b.build().unwrap()), HostValue::String("undefined".to_string()));
}

/// `{a, ...rest} = {a: 1, b: 2, c: 3}`: consumed keys stay out of rest.
#[test]
fn object_pattern_with_rest() {
    let mut b = ScriptBuilder::new();
    let a_prop = b.prop("a");
    let b_prop = b.prop("b");
    let c_prop = b.prop("c");
    let one = b.const_number(1.0);
    let two = b.const_number(2.0);
    let three = b.const_number(3.0);
    b.emit(Op::PushNewObject { dst: Reg(0) });
    b.emit(Op::LoadConst { dst: Reg(1), index: one });
    b.emit(Op::ObjectAdd { prop: a_prop, src: Reg(1) });
    b.emit(Op::LoadConst { dst: Reg(1), index: two });
    b.emit(Op::ObjectAdd { prop: b_prop, src: Reg(1) });
    b.emit(Op::LoadConst { dst: Reg(1), index: three });
    b.emit(Op::ObjectAdd { prop: c_prop, src: Reg(1) });
    b.emit(Op::PopState);
    b.emit(Op::PushObjectAssi { src: Reg(0) });
    b.emit(Op::GetObjectProp { dst: Reg(2), prop: a_prop });
    b.emit(Op::RestObjectProps { dst: Reg(3) });
    b.emit(Op::PopState);
    // rest keys joined
    let object_binding = b.binding("Object");
    let keys_prop = b.prop("keys");
    let join_prop = b.prop("join");
    b.emit(Op::BindingGet { dst: Reg(4), binding: object_binding });
    b.emit(Op::PropGet { dst: Reg(5), obj: Reg(4), prop: keys_prop });
    b.emit(Op::PushCall { func: Reg(5), this: Reg(4) });
    b.emit(Op::ArgAdd { src: Reg(3) });
    b.emit(Op::Call { dst: Reg(6) });
    b.emit(Op::PropGet { dst: Reg(7), obj: Reg(6), prop: join_prop });
    b.emit(Op::PushCall { func: Reg(7), this: Reg(6) });
    b.emit(Op::Call { dst: Reg(8) });
    b.emit(Op::ReturnValue { src: Reg(8) });
    assert_eq!(run(b.build().unwrap()), HostValue::String("b,c".to_string()));
}

/// Spread into an array literal expands the iterable.
#[test]
fn array_spread_expands() {
    let mut b = ScriptBuilder::new();
    b.emit(Op::PushNewArray { dst: Reg(0) });
    for value in [2.0, 3.0] {
        let c = b.const_number(value);
        b.emit(Op::LoadConst { dst: Reg(1), index: c });
        b.emit(Op::ArrayAdd { src: Reg(1) });
    }
    b.emit(Op::PopState);
    let one = b.const_number(1.0);
    b.emit(Op::PushNewArray { dst: Reg(2) });
    b.emit(Op::LoadConst { dst: Reg(1), index: one });
    b.emit(Op::ArrayAdd { src: Reg(1) });
    b.emit(Op::ArraySpread { src: Reg(0) });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(2) });
    assert_eq!(run(b.build().unwrap()), HostValue::Object("[1, 2, 3]".to_string()));
}

/// Spread arguments expand through the iterator protocol.
#[test]
fn spread_call_arguments() {
    let mut b = ScriptBuilder::new();
    // (x, y) => x - y
    let sub = b.begin_function(vesper::FuncFlags::default(), 2, None);
    {
        b.emit(Op::LoadArg { dst: Reg(0), index: 0 });
        b.emit(Op::LoadArg { dst: Reg(1), index: 1 });
        b.emit(Op::Sub { dst: Reg(2), lhs: Reg(0), rhs: Reg(1) });
        b.emit(Op::ReturnValue { src: Reg(2) });
    }
    b.end_function();
    b.emit(Op::PushNewArray { dst: Reg(0) });
    for value in [10.0, 4.0] {
        let c = b.const_number(value);
        b.emit(Op::LoadConst { dst: Reg(1), index: c });
        b.emit(Op::ArrayAdd { src: Reg(1) });
    }
    b.emit(Op::PopState);
    b.emit(Op::LoadFunc { dst: Reg(2), func: sub });
    b.emit(Op::LoadUndefined { dst: Reg(3) });
    b.emit(Op::PushCall { func: Reg(2), this: Reg(3) });
    b.emit(Op::SpreadArgsAdd { src: Reg(0) });
    b.emit(Op::Call { dst: Reg(4) });
    b.emit(Op::ReturnValue { src: Reg(4) });
    assert_eq!(run(b.build().unwrap()), HostValue::Number(6.0));
}

/// for-in yields enumerable string keys, inherited ones included, each once.
#[test]
fn for_in_walks_the_chain_once_per_key() {
    let mut b = ScriptBuilder::new();
    let object_binding = b.binding("Object");
    let set_proto_prop = b.prop("setPrototypeOf");
    let a_prop = b.prop("a");
    let b_prop = b.prop("b");
    let one = b.const_number(1.0);
    // proto = {a: 1, b: 1}; child = {a: 1} with child.[[Prototype]] = proto
    b.emit(Op::PushNewObject { dst: Reg(0) });
    b.emit(Op::LoadConst { dst: Reg(1), index: one });
    b.emit(Op::ObjectAdd { prop: a_prop, src: Reg(1) });
    b.emit(Op::ObjectAdd { prop: b_prop, src: Reg(1) });
    b.emit(Op::PopState);
    b.emit(Op::PushNewObject { dst: Reg(2) });
    b.emit(Op::LoadConst { dst: Reg(1), index: one });
    b.emit(Op::ObjectAdd { prop: a_prop, src: Reg(1) });
    b.emit(Op::PopState);
    b.emit(Op::BindingGet { dst: Reg(3), binding: object_binding });
    b.emit(Op::PropGet { dst: Reg(4), obj: Reg(3), prop: set_proto_prop });
    b.emit(Op::PushCall { func: Reg(4), this: Reg(3) });
    b.emit(Op::ArgAdd { src: Reg(2) });
    b.emit(Op::ArgAdd { src: Reg(0) });
    b.emit(Op::Call { dst: Reg(5) });
    // collect keys with for-in into an array (via push), then join
    let push_prop = b.prop("push");
    b.emit(Op::PushNewArray { dst: Reg(7) });
    b.emit(Op::PopState);
    b.emit(Op::PushEnum { src: Reg(2) });
    let step_ip = b.next_ip();
    let step = b.emit(Op::ForStep { dst: Reg(6), done_offset: 0 });
    b.emit(Op::PropGet { dst: Reg(8), obj: Reg(7), prop: push_prop });
    b.emit(Op::PushCall { func: Reg(8), this: Reg(7) });
    b.emit(Op::ArgAdd { src: Reg(6) });
    b.emit(Op::Call { dst: Reg(9) });
    let back = b.jump_back_offset(step_ip);
    b.emit(Op::Jump { offset: back });
    b.patch_jump(step);
    b.emit(Op::PopState);
    let join_prop = b.prop("join");
    b.emit(Op::PropGet { dst: Reg(8), obj: Reg(7), prop: join_prop });
    b.emit(Op::PushCall { func: Reg(8), this: Reg(7) });
    b.emit(Op::Call { dst: Reg(9) });
    b.emit(Op::ReturnValue { src: Reg(9) });
    assert_eq!(run(b.build().unwrap()), HostValue::String("a,b".to_string()));
}
