//! Object-model contracts: property order, array length, descriptors,
//! prototype mutation, proxies, and string exotics.

mod common;

use common::{run, run_err};
use pretty_assertions::assert_eq;
use vesper::{
    FuncFlags, HostValue, NativeErrorKind,
    bytecode::{Op, Reg, ScriptBuilder},
};

/// Helper: `Object.keys(o).join(",")` for the object left in `Reg(0)`,
/// returned from the script.
fn return_keys_joined(b: &mut ScriptBuilder) {
    let object_binding = b.binding("Object");
    let keys_prop = b.prop("keys");
    let join_prop = b.prop("join");
    b.emit(Op::BindingGet { dst: Reg(10), binding: object_binding });
    b.emit(Op::PropGet { dst: Reg(11), obj: Reg(10), prop: keys_prop });
    b.emit(Op::PushCall { func: Reg(11), this: Reg(10) });
    b.emit(Op::ArgAdd { src: Reg(0) });
    b.emit(Op::Call { dst: Reg(12) });
    b.emit(Op::PropGet { dst: Reg(13), obj: Reg(12), prop: join_prop });
    b.emit(Op::PushCall { func: Reg(13), this: Reg(12) });
    b.emit(Op::Call { dst: Reg(14) });
    b.emit(Op::ReturnValue { src: Reg(14) });
}

// =============================================================================
// Property order
// =============================================================================

/// Integer indices ascending, then strings in insertion order.
#[test]
fn own_keys_order_indices_then_strings() {
    let mut b = ScriptBuilder::new();
    let b_prop = b.prop("b");
    let a_prop = b.prop("a");
    let two = b.const_number(2.0);
    let zero = b.const_number(0.0);
    let one = b.const_number(1.0);
    b.emit(Op::PushNewObject { dst: Reg(0) });
    b.emit(Op::LoadConst { dst: Reg(1), index: one });
    b.emit(Op::ObjectAdd { prop: b_prop, src: Reg(1) });
    b.emit(Op::LoadConst { dst: Reg(2), index: two });
    b.emit(Op::ObjectAddExpr { key: Reg(2), src: Reg(1) });
    b.emit(Op::LoadConst { dst: Reg(2), index: zero });
    b.emit(Op::ObjectAddExpr { key: Reg(2), src: Reg(1) });
    b.emit(Op::ObjectAdd { prop: a_prop, src: Reg(1) });
    b.emit(Op::PopState);
    return_keys_joined(&mut b);
    assert_eq!(run(b.build().unwrap()), HostValue::String("0,2,b,a".to_string()));
}

/// Re-assigning an existing key keeps its position.
#[test]
fn reinsertion_keeps_position() {
    let mut b = ScriptBuilder::new();
    let a_prop = b.prop("a");
    let b_prop = b.prop("b");
    let one = b.const_number(1.0);
    b.emit(Op::PushNewObject { dst: Reg(0) });
    b.emit(Op::LoadConst { dst: Reg(1), index: one });
    b.emit(Op::ObjectAdd { prop: a_prop, src: Reg(1) });
    b.emit(Op::ObjectAdd { prop: b_prop, src: Reg(1) });
    b.emit(Op::PopState);
    // o.a = 1 again, then keys
    b.emit(Op::PropSet { obj: Reg(0), prop: a_prop, src: Reg(1) });
    return_keys_joined(&mut b);
    assert_eq!(run(b.build().unwrap()), HostValue::String("a,b".to_string()));
}

// =============================================================================
// Array length
// =============================================================================

/// Setting `length` truncates the dense part.
#[test]
fn shrinking_length_deletes_elements() {
    let mut b = ScriptBuilder::new();
    let length_prop = b.prop("length");
    let two = b.const_number(2.0);
    b.emit(Op::PushNewArray { dst: Reg(0) });
    for value in [10.0, 20.0, 30.0, 40.0] {
        let c = b.const_number(value);
        b.emit(Op::LoadConst { dst: Reg(1), index: c });
        b.emit(Op::ArrayAdd { src: Reg(1) });
    }
    b.emit(Op::PopState);
    b.emit(Op::LoadConst { dst: Reg(1), index: two });
    b.emit(Op::PropSet { obj: Reg(0), prop: length_prop, src: Reg(1) });
    // [a.length, a[1], typeof a[2]]
    b.emit(Op::PushNewArray { dst: Reg(2) });
    b.emit(Op::PropGet { dst: Reg(3), obj: Reg(0), prop: length_prop });
    b.emit(Op::ArrayAdd { src: Reg(3) });
    let one_key = b.const_number(1.0);
    b.emit(Op::LoadConst { dst: Reg(4), index: one_key });
    b.emit(Op::PropGetExpr { dst: Reg(3), obj: Reg(0), key: Reg(4) });
    b.emit(Op::ArrayAdd { src: Reg(3) });
    let two_key = b.const_number(2.0);
    b.emit(Op::LoadConst { dst: Reg(4), index: two_key });
    b.emit(Op::PropGetExpr { dst: Reg(3), obj: Reg(0), key: Reg(4) });
    b.emit(Op::TypeOf { dst: Reg(3), src: Reg(3) });
    b.emit(Op::ArrayAdd { src: Reg(3) });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(2) });
    assert_eq!(run(b.build().unwrap()), HostValue::Object("[2, 20, undefined]".to_string()));
}

/// Writing an index key keeps `length == highest index + 1`.
#[test]
fn index_write_extends_length() {
    let mut b = ScriptBuilder::new();
    let length_prop = b.prop("length");
    let seven = b.const_number(7.0);
    let nine = b.const_number(9.0);
    b.emit(Op::PushNewArray { dst: Reg(0) });
    b.emit(Op::PopState);
    b.emit(Op::LoadConst { dst: Reg(1), index: nine });
    b.emit(Op::LoadConst { dst: Reg(2), index: seven });
    b.emit(Op::PropSetExpr { obj: Reg(0), key: Reg(1), src: Reg(2) });
    b.emit(Op::PropGet { dst: Reg(3), obj: Reg(0), prop: length_prop });
    b.emit(Op::ReturnValue { src: Reg(3) });
    assert_eq!(run(b.build().unwrap()), HostValue::Number(10.0));
}

/// A non-configurable element stops truncation at its index.
#[test]
fn non_configurable_element_limits_truncation() {
    let mut b = ScriptBuilder::new();
    let object_binding = b.binding("Object");
    let define_prop = b.prop("defineProperty");
    let value_prop = b.prop("value");
    let configurable_prop = b.prop("configurable");
    let length_prop = b.prop("length");
    let three_key = b.const_string("3");
    let zero = b.const_number(0.0);
    let ninety_nine = b.const_number(99.0);

    b.emit(Op::PushNewArray { dst: Reg(0) });
    for value in [10.0, 20.0, 30.0, 40.0, 50.0] {
        let c = b.const_number(value);
        b.emit(Op::LoadConst { dst: Reg(1), index: c });
        b.emit(Op::ArrayAdd { src: Reg(1) });
    }
    b.emit(Op::PopState);
    // Object.defineProperty(a, "3", {value: 99, configurable: false})
    b.emit(Op::PushNewObject { dst: Reg(2) });
    b.emit(Op::LoadConst { dst: Reg(3), index: ninety_nine });
    b.emit(Op::ObjectAdd { prop: value_prop, src: Reg(3) });
    b.emit(Op::LoadFalse { dst: Reg(3) });
    b.emit(Op::ObjectAdd { prop: configurable_prop, src: Reg(3) });
    b.emit(Op::PopState);
    b.emit(Op::BindingGet { dst: Reg(4), binding: object_binding });
    b.emit(Op::PropGet { dst: Reg(5), obj: Reg(4), prop: define_prop });
    b.emit(Op::PushCall { func: Reg(5), this: Reg(4) });
    b.emit(Op::ArgAdd { src: Reg(0) });
    b.emit(Op::LoadConst { dst: Reg(6), index: three_key });
    b.emit(Op::ArgAdd { src: Reg(6) });
    b.emit(Op::ArgAdd { src: Reg(2) });
    b.emit(Op::Call { dst: Reg(7) });
    // a.length = 0 (sloppy write, quietly stops at the stuck element)
    b.emit(Op::LoadConst { dst: Reg(1), index: zero });
    b.emit(Op::PropSet { obj: Reg(0), prop: length_prop, src: Reg(1) });
    b.emit(Op::PropGet { dst: Reg(3), obj: Reg(0), prop: length_prop });
    b.emit(Op::ReturnValue { src: Reg(3) });
    assert_eq!(run(b.build().unwrap()), HostValue::Number(4.0));
}

// =============================================================================
// Delete and descriptors
// =============================================================================

/// Delete of a configurable property succeeds; the stuck one reports false.
#[test]
fn delete_respects_configurability() {
    let mut b = ScriptBuilder::new();
    let a_prop = b.prop("a");
    let length_prop = b.prop("length");
    let one = b.const_number(1.0);
    b.emit(Op::PushNewObject { dst: Reg(0) });
    b.emit(Op::LoadConst { dst: Reg(1), index: one });
    b.emit(Op::ObjectAdd { prop: a_prop, src: Reg(1) });
    b.emit(Op::PopState);
    b.emit(Op::PushNewArray { dst: Reg(2) });
    b.emit(Op::PopState);
    b.emit(Op::PushNewArray { dst: Reg(3) });
    b.emit(Op::DelProp { dst: Reg(4), obj: Reg(0), prop: a_prop });
    b.emit(Op::ArrayAdd { src: Reg(4) });
    b.emit(Op::DelProp { dst: Reg(4), obj: Reg(2), prop: length_prop });
    b.emit(Op::ArrayAdd { src: Reg(4) });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(3) });
    assert_eq!(run(b.build().unwrap()), HostValue::Object("[true, false]".to_string()));
}

// =============================================================================
// Prototype mutation
// =============================================================================

/// `Object.setPrototypeOf` refuses to create a cycle.
#[test]
fn prototype_cycles_are_rejected() {
    let mut b = ScriptBuilder::new();
    let object_binding = b.binding("Object");
    let set_proto_prop = b.prop("setPrototypeOf");
    b.emit(Op::PushNewObject { dst: Reg(0) });
    b.emit(Op::PopState);
    b.emit(Op::PushNewObject { dst: Reg(1) });
    b.emit(Op::PopState);
    b.emit(Op::BindingGet { dst: Reg(2), binding: object_binding });
    b.emit(Op::PropGet { dst: Reg(3), obj: Reg(2), prop: set_proto_prop });
    // a -> b, then b -> a must throw
    b.emit(Op::PushCall { func: Reg(3), this: Reg(2) });
    b.emit(Op::ArgAdd { src: Reg(0) });
    b.emit(Op::ArgAdd { src: Reg(1) });
    b.emit(Op::Call { dst: Reg(4) });
    b.emit(Op::PushCall { func: Reg(3), this: Reg(2) });
    b.emit(Op::ArgAdd { src: Reg(1) });
    b.emit(Op::ArgAdd { src: Reg(0) });
    b.emit(Op::Call { dst: Reg(4) });
    b.emit(Op::ReturnValue { src: Reg(4) });
    match run_err(b.build().unwrap()) {
        vesper::Exception::Native { kind, .. } => assert_eq!(kind, NativeErrorKind::TypeError),
        other => panic!("expected TypeError, got {other:?}"),
    }
}

// =============================================================================
// Proxies
// =============================================================================

/// A `get` trap intercepts; a missing `has` trap forwards to the target.
#[test]
fn proxy_get_trap_and_has_fallback() {
    let mut b = ScriptBuilder::new();
    // (target, key) => 42
    let get_trap = b.begin_function(FuncFlags::default(), 3, None);
    {
        let forty_two = b.const_number(42.0);
        b.emit(Op::LoadConst { dst: Reg(0), index: forty_two });
        b.emit(Op::ReturnValue { src: Reg(0) });
    }
    b.end_function();

    let proxy_binding = b.binding("Proxy");
    let get_prop = b.prop("get");
    let real_prop = b.prop("real");
    let anything_prop = b.prop("anything");
    let one = b.const_number(1.0);

    // target = {real: 1}
    b.emit(Op::PushNewObject { dst: Reg(0) });
    b.emit(Op::LoadConst { dst: Reg(1), index: one });
    b.emit(Op::ObjectAdd { prop: real_prop, src: Reg(1) });
    b.emit(Op::PopState);
    // handler = {get: trap}
    b.emit(Op::PushNewObject { dst: Reg(2) });
    b.emit(Op::LoadFunc { dst: Reg(3), func: get_trap });
    b.emit(Op::ObjectAdd { prop: get_prop, src: Reg(3) });
    b.emit(Op::PopState);
    // p = new Proxy(target, handler)
    b.emit(Op::BindingGet { dst: Reg(4), binding: proxy_binding });
    b.emit(Op::PushNew { func: Reg(4) });
    b.emit(Op::ArgAdd { src: Reg(0) });
    b.emit(Op::ArgAdd { src: Reg(2) });
    b.emit(Op::New { dst: Reg(5) });
    // [p.anything, "real" in p, "missing" in p]
    b.emit(Op::PushNewArray { dst: Reg(6) });
    b.emit(Op::PropGet { dst: Reg(7), obj: Reg(5), prop: anything_prop });
    b.emit(Op::ArrayAdd { src: Reg(7) });
    let real_key = b.const_string("real");
    let missing_key = b.const_string("missing");
    b.emit(Op::LoadConst { dst: Reg(8), index: real_key });
    b.emit(Op::HasProp { dst: Reg(7), lhs: Reg(8), rhs: Reg(5) });
    b.emit(Op::ArrayAdd { src: Reg(7) });
    b.emit(Op::LoadConst { dst: Reg(8), index: missing_key });
    b.emit(Op::HasProp { dst: Reg(7), lhs: Reg(8), rhs: Reg(5) });
    b.emit(Op::ArrayAdd { src: Reg(7) });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(6) });

    assert_eq!(run(b.build().unwrap()), HostValue::Object("[42, true, false]".to_string()));
}

// =============================================================================
// String exotics
// =============================================================================

/// Primitive strings answer `length` and index reads without a wrapper.
#[test]
fn string_primitive_properties() {
    let mut b = ScriptBuilder::new();
    let abc = b.const_string("abc");
    let length_prop = b.prop("length");
    let one = b.const_number(1.0);
    b.emit(Op::LoadConst { dst: Reg(0), index: abc });
    b.emit(Op::PushNewArray { dst: Reg(1) });
    b.emit(Op::PropGet { dst: Reg(2), obj: Reg(0), prop: length_prop });
    b.emit(Op::ArrayAdd { src: Reg(2) });
    b.emit(Op::LoadConst { dst: Reg(3), index: one });
    b.emit(Op::PropGetExpr { dst: Reg(2), obj: Reg(0), key: Reg(3) });
    b.emit(Op::ArrayAdd { src: Reg(2) });
    b.emit(Op::PopState);
    b.emit(Op::ReturnValue { src: Reg(1) });
    assert_eq!(run(b.build().unwrap()), HostValue::Object("[3, b]".to_string()));
}
