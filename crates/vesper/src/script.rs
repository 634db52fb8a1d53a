//! Script images and their loaded, heap-resident form.
//!
//! A [`ScriptImage`] is what a compiler (or the [`crate::bytecode::ScriptBuilder`])
//! produces: ten parallel tables, self-contained and serializable. Loading an
//! image validates every operand against its table bounds and materializes
//! constants into heap values; the result is a [`Script`] gc-thing the
//! interpreter reads but never writes.

use serde::{Deserialize, Serialize};

use crate::{
    bytecode::{Op, Reg},
    error::ScriptLoadError,
    heap::HeapId,
    intern::{PropertyKey, StringId},
    value::Value,
};

/// A constant-table entry in an image: self-contained, no interner ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstEntry {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    /// Decimal rendering of a BigInt literal.
    BigInt(String),
}

/// Function flags from the parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuncFlags {
    pub strict: bool,
    pub arrow: bool,
    pub r#async: bool,
    pub generator: bool,
    pub class_constructor: bool,
    /// Derived class constructor (`extends` present): `this` is bound by
    /// `super()`, not on entry.
    pub derived: bool,
}

/// One function-table entry. Instruction indices are into the script's
/// shared instruction array; `[ip_start, ip_end)` ranges of distinct
/// functions never overlap and the first entry is the toplevel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuncRecord {
    /// Constant-table index of the function name (must be a String entry).
    pub name: Option<u32>,
    pub flags: FuncFlags,
    pub reg_count: u16,
    pub param_count: u16,
    pub ip_start: u32,
    pub ip_end: u32,
}

/// Line-table entry; entries are sorted by `ip` and the line for an IP is
/// the last entry at or before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInfo {
    pub ip: u32,
    pub line: u32,
}

/// How a declared name binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeclKind {
    Var,
    Let,
    Const,
    /// Hoisted function declaration; `func` names the function-table entry.
    Function,
}

/// One declared binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclItem {
    pub name: String,
    pub kind: DeclKind,
    pub func: Option<u32>,
}

/// A binding group instantiated together (one scope's declarations).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclGroup {
    pub items: Vec<DeclItem>,
}

/// Private-environment record: the names a class body introduces, chained
/// through `parent`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrivEnvRecord {
    pub parent: Option<u32>,
    /// Indices into the private-name table.
    pub names: Vec<u32>,
}

/// One import entry of a module image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportEntry {
    /// Index into `ModuleImage::requests`.
    pub request: u32,
    /// Name exported by the requested module; `None` imports the namespace.
    pub import_name: Option<String>,
    pub local_name: String,
}

/// One export entry of a module image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportEntry {
    pub export_name: String,
    /// Local binding exported directly, or `None` for a re-export.
    pub local_name: Option<String>,
    /// For re-exports: which request and which of its exports.
    pub request: Option<u32>,
    pub import_name: Option<String>,
}

/// The module extension of a script image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleImage {
    pub requests: Vec<String>,
    pub imports: Vec<ImportEntry>,
    pub exports: Vec<ExportEntry>,
}

/// A complete, serializable script image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptImage {
    pub consts: Vec<ConstEntry>,
    pub instrs: Vec<Op>,
    pub line_info: Vec<LineInfo>,
    pub funcs: Vec<FuncRecord>,
    pub decls: Vec<DeclGroup>,
    pub binding_refs: Vec<String>,
    pub prop_refs: Vec<String>,
    pub priv_names: Vec<String>,
    pub priv_envs: Vec<PrivEnvRecord>,
    pub module: Option<ModuleImage>,
}

impl Default for ConstEntry {
    fn default() -> Self {
        Self::Undefined
    }
}

/// A loaded declaration item with interned name.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct LoadedDeclItem {
    pub name: StringId,
    pub kind: DeclKind,
    pub func: Option<u32>,
}

/// Loaded module tables with interned names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ModuleTables {
    pub requests: Vec<StringId>,
    pub imports: Vec<(u32, Option<StringId>, StringId)>,
    pub exports: Vec<LoadedExportEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub(crate) struct LoadedExportEntry {
    pub export_name: StringId,
    pub local_name: Option<StringId>,
    pub request: Option<u32>,
    pub import_name: Option<StringId>,
}

/// A loaded script: validated tables plus materialized constant values.
///
/// Lives on the heap so suspended contexts keep their code alive; the GC
/// scan covers the constant values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Script {
    pub values: Vec<Value>,
    pub instrs: Vec<Op>,
    pub line_info: Vec<LineInfo>,
    pub funcs: Vec<FuncRecord>,
    pub decls: Vec<Vec<LoadedDeclItem>>,
    pub binding_refs: Vec<StringId>,
    pub prop_refs: Vec<PropertyKey>,
    pub priv_names: Vec<StringId>,
    pub priv_envs: Vec<PrivEnvRecord>,
    pub module: Option<ModuleTables>,
    /// Function names resolved to interned ids (parallel to `funcs`).
    pub func_names: Vec<Option<StringId>>,
}

impl Script {
    /// The source line for an instruction pointer: the largest entry ≤ `ip`.
    pub fn line_for_ip(&self, ip: usize) -> Option<u32> {
        let ip = u32::try_from(ip).ok()?;
        match self.line_info.binary_search_by_key(&ip, |entry| entry.ip) {
            Ok(index) => Some(self.line_info[index].line),
            Err(0) => None,
            Err(index) => Some(self.line_info[index - 1].line),
        }
    }

    pub fn func(&self, index: u32) -> &FuncRecord {
        &self.funcs[index as usize]
    }

    pub fn estimate_size(&self) -> usize {
        size_of::<Self>() + self.instrs.len() * size_of::<Op>() + self.values.len() * size_of::<Value>()
    }

    /// Enumerates contained heap references for the GC scan.
    pub(crate) fn trace(&self, mark: &mut impl FnMut(HeapId)) {
        for value in &self.values {
            value.trace(mark);
        }
    }
}

/// Module linking/evaluation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ModuleStatus {
    Unlinked,
    Linking,
    Linked,
    Evaluating,
    Evaluated,
}

/// A module: a script plus its environment and resolved requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ModuleRecord {
    pub script: HeapId,
    pub env: Option<HeapId>,
    pub status: ModuleStatus,
    /// Requested modules, resolved positionally, populated during linking.
    pub resolved_requests: Vec<HeapId>,
}

impl ModuleRecord {
    pub(crate) fn trace(&self, mark: &mut impl FnMut(HeapId)) {
        mark(self.script);
        if let Some(env) = self.env {
            mark(env);
        }
        for &request in &self.resolved_requests {
            mark(request);
        }
    }
}

/// Validates every instruction operand of an image against the table sizes
/// and the containing function's register count and range.
pub(crate) fn validate_image(image: &ScriptImage) -> Result<(), ScriptLoadError> {
    if image.funcs.is_empty() {
        return Err(ScriptLoadError::new("function table is empty"));
    }
    let instr_len = u32::try_from(image.instrs.len()).map_err(|_| ScriptLoadError::new("instruction array too large"))?;
    for (index, func) in image.funcs.iter().enumerate() {
        if func.ip_start > func.ip_end || func.ip_end > instr_len {
            return Err(ScriptLoadError::new(format!("function {index} range out of bounds")));
        }
        if let Some(name) = func.name {
            match image.consts.get(name as usize) {
                Some(ConstEntry::String(_)) => {}
                _ => return Err(ScriptLoadError::new(format!("function {index} name is not a string constant"))),
            }
        }
        validate_function_body(image, func, index)?;
    }
    for group in &image.decls {
        for item in &group.items {
            if let Some(func) = item.func
                && func as usize >= image.funcs.len()
            {
                return Err(ScriptLoadError::new("declaration references missing function"));
            }
            if matches!(item.kind, DeclKind::Function) && item.func.is_none() {
                return Err(ScriptLoadError::new("function declaration without function index"));
            }
        }
    }
    for env in &image.priv_envs {
        if let Some(parent) = env.parent
            && parent as usize >= image.priv_envs.len()
        {
            return Err(ScriptLoadError::new("private environment parent out of bounds"));
        }
        for &name in &env.names {
            if name as usize >= image.priv_names.len() {
                return Err(ScriptLoadError::new("private environment name out of bounds"));
            }
        }
    }
    let mut last_ip = 0u32;
    for entry in &image.line_info {
        if entry.ip < last_ip {
            return Err(ScriptLoadError::new("line table not sorted by instruction"));
        }
        last_ip = entry.ip;
    }
    if let Some(module) = &image.module {
        let requests = u32::try_from(module.requests.len()).map_err(|_| ScriptLoadError::new("too many requests"))?;
        for import in &module.imports {
            if import.request >= requests {
                return Err(ScriptLoadError::new("import request out of bounds"));
            }
        }
        for export in &module.exports {
            if let Some(request) = export.request {
                if request >= requests {
                    return Err(ScriptLoadError::new("export request out of bounds"));
                }
            } else if export.local_name.is_none() {
                return Err(ScriptLoadError::new("export names neither a local nor a re-export"));
            }
        }
    }
    Ok(())
}

/// Per-function operand validation.
fn validate_function_body(image: &ScriptImage, func: &FuncRecord, index: usize) -> Result<(), ScriptLoadError> {
    let fail = |what: &str, ip: usize| {
        Err(ScriptLoadError::new(format!(
            "function {index}, instruction {ip}: {what} out of bounds"
        )))
    };
    let reg_ok = |r: Reg| r.index() < usize::from(func.reg_count);
    let jump_ok = |ip: usize, offset: i32| {
        let target = ip as i64 + 1 + i64::from(offset);
        target >= i64::from(func.ip_start) && target <= i64::from(func.ip_end)
    };

    for ip in func.ip_start as usize..func.ip_end as usize {
        let op = &image.instrs[ip];
        let mut regs: smallvec::SmallVec<[Reg; 3]> = smallvec::SmallVec::new();
        let mut jumps: smallvec::SmallVec<[i32; 2]> = smallvec::SmallVec::new();
        let mut consts: Option<u32> = None;
        let mut funcs: smallvec::SmallVec<[u32; 1]> = smallvec::SmallVec::new();
        let mut bindings: Option<u32> = None;
        let mut props: Option<u32> = None;
        let mut privs: Option<u32> = None;
        let mut decls: Option<u32> = None;
        let mut priv_envs: Option<u32> = None;
        collect_operands(
            op,
            &mut regs,
            &mut jumps,
            &mut consts,
            &mut funcs,
            &mut bindings,
            &mut props,
            &mut privs,
            &mut decls,
            &mut priv_envs,
        );
        for reg in regs {
            if !reg_ok(reg) {
                return fail("register", ip);
            }
        }
        for offset in jumps {
            if !jump_ok(ip, offset) {
                return fail("jump target", ip);
            }
        }
        if let Some(c) = consts
            && c as usize >= image.consts.len()
        {
            return fail("constant index", ip);
        }
        for f in funcs {
            if f as usize >= image.funcs.len() {
                return fail("function index", ip);
            }
        }
        if let Some(b) = bindings
            && b as usize >= image.binding_refs.len()
        {
            return fail("binding reference", ip);
        }
        if let Some(p) = props
            && p as usize >= image.prop_refs.len()
        {
            return fail("property reference", ip);
        }
        if let Some(p) = privs
            && p as usize >= image.priv_names.len()
        {
            return fail("private name", ip);
        }
        if let Some(d) = decls
            && d as usize >= image.decls.len()
        {
            return fail("declaration group", ip);
        }
        if let Some(e) = priv_envs
            && e as usize >= image.priv_envs.len()
        {
            return fail("private environment", ip);
        }
    }
    Ok(())
}

/// Pulls every operand out of an instruction for bounds checking.
#[expect(clippy::too_many_arguments, reason = "single fan-out point for operand classes")]
pub(crate) fn collect_operands(
    op: &Op,
    regs: &mut smallvec::SmallVec<[Reg; 3]>,
    jumps: &mut smallvec::SmallVec<[i32; 2]>,
    consts: &mut Option<u32>,
    funcs: &mut smallvec::SmallVec<[u32; 1]>,
    bindings: &mut Option<u32>,
    props: &mut Option<u32>,
    privs: &mut Option<u32>,
    decls: &mut Option<u32>,
    priv_envs: &mut Option<u32>,
) {
    match *op {
        Op::LoadUndefined { dst }
        | Op::LoadNull { dst }
        | Op::LoadTrue { dst }
        | Op::LoadFalse { dst }
        | Op::LoadThis { dst }
        | Op::LoadNewTarget { dst }
        | Op::LoadArg { dst, .. }
        | Op::LoadRestArgs { dst, .. }
        | Op::PushNewArray { dst }
        | Op::PushNewObject { dst }
        | Op::Concat { dst }
        | Op::Call { dst }
        | Op::TailCall { dst }
        | Op::Eval { dst }
        | Op::New { dst }
        | Op::SuperCall { dst }
        | Op::CatchError { dst }
        | Op::NextArrayItem { dst }
        | Op::RestArrayItems { dst }
        | Op::RestObjectProps { dst } => regs.push(dst),

        Op::LoadConst { dst, index } => {
            regs.push(dst);
            *consts = Some(index);
        }
        Op::LoadFunc { dst, func } => {
            regs.push(dst);
            funcs.push(func);
        }

        Op::Dup { dst, src }
        | Op::Neg { dst, src }
        | Op::BitNot { dst, src }
        | Op::Not { dst, src }
        | Op::Inc { dst, src }
        | Op::Dec { dst, src }
        | Op::TypeOf { dst, src }
        | Op::Yield { dst, src }
        | Op::Await { dst, src } => {
            regs.push(dst);
            regs.push(src);
        }

        Op::TypeOfBinding { dst, binding } => {
            regs.push(dst);
            *bindings = Some(binding);
        }

        Op::Add { dst, lhs, rhs }
        | Op::Sub { dst, lhs, rhs }
        | Op::Mul { dst, lhs, rhs }
        | Op::Div { dst, lhs, rhs }
        | Op::Mod { dst, lhs, rhs }
        | Op::Exp { dst, lhs, rhs }
        | Op::Shl { dst, lhs, rhs }
        | Op::Shr { dst, lhs, rhs }
        | Op::UShr { dst, lhs, rhs }
        | Op::BitAnd { dst, lhs, rhs }
        | Op::BitOr { dst, lhs, rhs }
        | Op::BitXor { dst, lhs, rhs }
        | Op::Lt { dst, lhs, rhs }
        | Op::Le { dst, lhs, rhs }
        | Op::Gt { dst, lhs, rhs }
        | Op::Ge { dst, lhs, rhs }
        | Op::Eq { dst, lhs, rhs }
        | Op::Ne { dst, lhs, rhs }
        | Op::StrictEq { dst, lhs, rhs }
        | Op::StrictNe { dst, lhs, rhs }
        | Op::HasProp { dst, lhs, rhs }
        | Op::InstanceOf { dst, lhs, rhs } => {
            regs.push(dst);
            regs.push(lhs);
            regs.push(rhs);
        }

        Op::BindingInit { binding, src } | Op::BindingSet { binding, src } => {
            regs.push(src);
            *bindings = Some(binding);
        }
        Op::BindingGet { dst, binding } | Op::DelBinding { dst, binding } => {
            regs.push(dst);
            *bindings = Some(binding);
        }

        Op::PropGet { dst, obj, prop } | Op::DelProp { dst, obj, prop } => {
            regs.push(dst);
            regs.push(obj);
            *props = Some(prop);
        }
        Op::PropGetExpr { dst, obj, key } | Op::DelPropExpr { dst, obj, key } => {
            regs.push(dst);
            regs.push(obj);
            regs.push(key);
        }
        Op::PropSet { obj, prop, src } => {
            regs.push(obj);
            regs.push(src);
            *props = Some(prop);
        }
        Op::PropSetExpr { obj, key, src } => {
            regs.push(obj);
            regs.push(key);
            regs.push(src);
        }
        Op::SuperPropGet { dst, prop } => {
            regs.push(dst);
            *props = Some(prop);
        }
        Op::SuperPropSet { prop, src } => {
            regs.push(src);
            *props = Some(prop);
        }
        Op::PrivGet { dst, obj, r#priv } => {
            regs.push(dst);
            regs.push(obj);
            *privs = Some(r#priv);
        }
        Op::PrivSet { obj, r#priv, src } => {
            regs.push(obj);
            regs.push(src);
            *privs = Some(r#priv);
        }

        Op::Jump { offset } => jumps.push(offset),
        Op::JumpTrue { cond, offset } | Op::JumpFalse { cond, offset } => {
            regs.push(cond);
            jumps.push(offset);
        }
        Op::ReturnValue { src } | Op::Throw { src } => regs.push(src),
        Op::Debugger | Op::PopState | Op::Finally | Op::TryEnd | Op::PushSuperCall | Op::ArrayElision
        | Op::PushConcat | Op::DefaultConstr | Op::DerivedDefaultConstr | Op::SetAfField | Op::ClassInit => {}

        Op::PushCall { func, this } => {
            regs.push(func);
            regs.push(this);
        }
        Op::PushNew { func } => regs.push(func),
        Op::ArgAdd { src }
        | Op::SpreadArgsAdd { src }
        | Op::ArrayAdd { src }
        | Op::ArraySpread { src }
        | Op::ObjectSpread { src }
        | Op::SetProto { src }
        | Op::ConcatAdd { src }
        | Op::PushEnum { src }
        | Op::PushIter { src }
        | Op::PushAsyncIter { src }
        | Op::PushArrayAssi { src }
        | Op::PushObjectAssi { src }
        | Op::PushWith { src } => regs.push(src),

        Op::PushLexEnv { decl } => *decls = decl,

        Op::ForStep { dst, done_offset } | Op::AsyncForStep { dst, done_offset } => {
            regs.push(dst);
            jumps.push(done_offset);
        }
        Op::PushTry {
            catch_offset,
            finally_offset,
        } => {
            if let Some(offset) = catch_offset {
                jumps.push(offset);
            }
            if let Some(offset) = finally_offset {
                jumps.push(offset);
            }
        }

        Op::ObjectAdd { prop, src } => {
            regs.push(src);
            *props = Some(prop);
        }
        Op::ObjectAddExpr { key, src } => {
            regs.push(key);
            regs.push(src);
        }
        Op::ObjectMethodAdd { prop, func }
        | Op::ObjectGetterAdd { prop, func }
        | Op::ObjectSetterAdd { prop, func }
        | Op::MethodAdd { prop, func }
        | Op::GetterAdd { prop, func }
        | Op::SetterAdd { prop, func }
        | Op::StaticMethodAdd { prop, func }
        | Op::StaticGetterAdd { prop, func }
        | Op::StaticSetterAdd { prop, func } => {
            funcs.push(func);
            *props = Some(prop);
        }
        Op::FieldAdd { prop, func } | Op::InstFieldAdd { prop, func } => {
            *props = Some(prop);
            if let Some(func) = func {
                funcs.push(func);
            }
        }
        Op::StaticBlockAdd { func } => funcs.push(func),
        Op::PushClass {
            dst,
            name,
            parent,
            priv_env,
        } => {
            regs.push(dst);
            *consts = name;
            if let Some(parent) = parent {
                regs.push(parent);
            }
            *priv_envs = priv_env;
        }
        Op::ConstrCreate { func } => funcs.push(func),

        Op::GetObjectProp { dst, prop } => {
            regs.push(dst);
            *props = Some(prop);
        }
        Op::GetObjectPropExpr { dst, key } => {
            regs.push(dst);
            regs.push(key);
        }
    }
}
