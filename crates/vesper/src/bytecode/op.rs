//! The instruction set.
//!
//! A stack-and-register hybrid: each function record declares a register
//! count and operands address those registers; structured operations
//! (calls, literals, destructuring, try) run through states pushed on the
//! native stack. Jumps are PC-relative in instruction indices. Every table
//! operand is validated at load, so the dispatch loop can index without
//! bounds anxiety.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumDiscriminants, IntoStaticStr};

/// A register operand, bounded by the containing function's `reg_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reg(pub u16);

impl Reg {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

/// One instruction.
///
/// `OpKind` (derived) is the unit discriminant used by tracers and the
/// disassembler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, EnumDiscriminants)]
#[strum_discriminants(name(OpKind), derive(Display, IntoStaticStr, Hash))]
pub enum Op {
    // --- loads ---
    LoadUndefined { dst: Reg },
    LoadNull { dst: Reg },
    LoadTrue { dst: Reg },
    LoadFalse { dst: Reg },
    LoadThis { dst: Reg },
    LoadNewTarget { dst: Reg },
    LoadArg { dst: Reg, index: u16 },
    /// Collects arguments from `start` onward into a fresh array.
    LoadRestArgs { dst: Reg, start: u16 },
    /// Loads a constant-table value.
    LoadConst { dst: Reg, index: u32 },
    /// Creates a closure over the current lexical environment.
    LoadFunc { dst: Reg, func: u32 },
    /// Register copy.
    Dup { dst: Reg, src: Reg },

    // --- unary ---
    Neg { dst: Reg, src: Reg },
    BitNot { dst: Reg, src: Reg },
    Not { dst: Reg, src: Reg },
    Inc { dst: Reg, src: Reg },
    Dec { dst: Reg, src: Reg },
    TypeOf { dst: Reg, src: Reg },
    /// `typeof ident`: yields "undefined" for unresolvable bindings instead
    /// of throwing.
    TypeOfBinding { dst: Reg, binding: u32 },

    // --- binary ---
    Add { dst: Reg, lhs: Reg, rhs: Reg },
    Sub { dst: Reg, lhs: Reg, rhs: Reg },
    Mul { dst: Reg, lhs: Reg, rhs: Reg },
    Div { dst: Reg, lhs: Reg, rhs: Reg },
    Mod { dst: Reg, lhs: Reg, rhs: Reg },
    Exp { dst: Reg, lhs: Reg, rhs: Reg },
    Shl { dst: Reg, lhs: Reg, rhs: Reg },
    Shr { dst: Reg, lhs: Reg, rhs: Reg },
    UShr { dst: Reg, lhs: Reg, rhs: Reg },
    BitAnd { dst: Reg, lhs: Reg, rhs: Reg },
    BitOr { dst: Reg, lhs: Reg, rhs: Reg },
    BitXor { dst: Reg, lhs: Reg, rhs: Reg },
    Lt { dst: Reg, lhs: Reg, rhs: Reg },
    Le { dst: Reg, lhs: Reg, rhs: Reg },
    Gt { dst: Reg, lhs: Reg, rhs: Reg },
    Ge { dst: Reg, lhs: Reg, rhs: Reg },
    Eq { dst: Reg, lhs: Reg, rhs: Reg },
    Ne { dst: Reg, lhs: Reg, rhs: Reg },
    StrictEq { dst: Reg, lhs: Reg, rhs: Reg },
    StrictNe { dst: Reg, lhs: Reg, rhs: Reg },
    /// `key in object`.
    HasProp { dst: Reg, lhs: Reg, rhs: Reg },
    InstanceOf { dst: Reg, lhs: Reg, rhs: Reg },

    // --- bindings ---
    BindingInit { binding: u32, src: Reg },
    BindingSet { binding: u32, src: Reg },
    BindingGet { dst: Reg, binding: u32 },
    DelBinding { dst: Reg, binding: u32 },

    // --- properties ---
    PropGet { dst: Reg, obj: Reg, prop: u32 },
    PropGetExpr { dst: Reg, obj: Reg, key: Reg },
    PropSet { obj: Reg, prop: u32, src: Reg },
    PropSetExpr { obj: Reg, key: Reg, src: Reg },
    SuperPropGet { dst: Reg, prop: u32 },
    SuperPropSet { prop: u32, src: Reg },
    PrivGet { dst: Reg, obj: Reg, r#priv: u32 },
    PrivSet { obj: Reg, r#priv: u32, src: Reg },
    DelProp { dst: Reg, obj: Reg, prop: u32 },
    DelPropExpr { dst: Reg, obj: Reg, key: Reg },

    // --- control ---
    Jump { offset: i32 },
    JumpTrue { cond: Reg, offset: i32 },
    JumpFalse { cond: Reg, offset: i32 },
    ReturnValue { src: Reg },
    Throw { src: Reg },
    Debugger,

    // --- calls ---
    PushCall { func: Reg, this: Reg },
    PushNew { func: Reg },
    PushSuperCall,
    ArgAdd { src: Reg },
    /// Expands an iterable into the pending argument list.
    SpreadArgsAdd { src: Reg },
    Call { dst: Reg },
    /// Reuses the running context when the callee is the running function.
    TailCall { dst: Reg },
    /// Call that performs direct-eval when the callee is the realm's `eval`.
    Eval { dst: Reg },
    New { dst: Reg },
    SuperCall { dst: Reg },

    // --- concurrency ---
    Yield { dst: Reg, src: Reg },
    Await { dst: Reg, src: Reg },

    // --- states ---
    /// Pushes a fresh declarative environment, optionally instantiating a
    /// declaration group in it.
    PushLexEnv { decl: Option<u32> },
    /// Pops the top state (running the try machine when it is a try state).
    PopState,
    /// For-in: pushes an enumeration state over inherited enumerable string keys.
    PushEnum { src: Reg },
    PushIter { src: Reg },
    PushAsyncIter { src: Reg },
    /// Steps the innermost iteration state; jumps when done.
    ForStep { dst: Reg, done_offset: i32 },
    AsyncForStep { dst: Reg, done_offset: i32 },
    PushTry { catch_offset: Option<i32>, finally_offset: Option<i32> },
    /// Loads the pending error at the start of a catch block.
    CatchError { dst: Reg },
    /// Marks entry into the finally block.
    Finally,
    TryEnd,

    // --- literals ---
    PushNewArray { dst: Reg },
    ArrayAdd { src: Reg },
    ArrayElision,
    ArraySpread { src: Reg },
    PushNewObject { dst: Reg },
    ObjectAdd { prop: u32, src: Reg },
    ObjectAddExpr { key: Reg, src: Reg },
    ObjectSpread { src: Reg },
    ObjectMethodAdd { prop: u32, func: u32 },
    ObjectGetterAdd { prop: u32, func: u32 },
    ObjectSetterAdd { prop: u32, func: u32 },
    /// `__proto__:` in an object literal.
    SetProto { src: Reg },
    PushConcat,
    ConcatAdd { src: Reg },
    Concat { dst: Reg },

    // --- classes ---
    PushClass { dst: Reg, name: Option<u32>, parent: Option<Reg>, priv_env: Option<u32> },
    ConstrCreate { func: u32 },
    DefaultConstr,
    DerivedDefaultConstr,
    MethodAdd { prop: u32, func: u32 },
    GetterAdd { prop: u32, func: u32 },
    SetterAdd { prop: u32, func: u32 },
    StaticMethodAdd { prop: u32, func: u32 },
    StaticGetterAdd { prop: u32, func: u32 },
    StaticSetterAdd { prop: u32, func: u32 },
    /// Static class field.
    FieldAdd { prop: u32, func: Option<u32> },
    /// Instance class field, installed when `this` is bound.
    InstFieldAdd { prop: u32, func: Option<u32> },
    /// Names the most recently added field's anonymous-function initializer
    /// after its key.
    SetAfField,
    StaticBlockAdd { func: u32 },
    ClassInit,

    // --- destructuring patterns ---
    PushArrayAssi { src: Reg },
    NextArrayItem { dst: Reg },
    RestArrayItems { dst: Reg },
    PushObjectAssi { src: Reg },
    GetObjectProp { dst: Reg, prop: u32 },
    GetObjectPropExpr { dst: Reg, key: Reg },
    RestObjectProps { dst: Reg },

    // --- scope ---
    /// Pushes an object environment with the with-base flag set.
    PushWith { src: Reg },
}
