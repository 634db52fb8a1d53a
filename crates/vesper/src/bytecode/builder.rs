//! Builder for emitting script images.
//!
//! `ScriptBuilder` manages one instruction buffer per function, handles
//! forward jumps with patching, deduplicates constants, and assigns table
//! indices for bindings, property references, and private names. `build()`
//! flattens the per-function buffers into the single instruction array a
//! [`ScriptImage`] carries and runs the same validation as image load.

use ahash::AHashMap;

use super::op::{Op, Reg};
use crate::{
    error::ScriptLoadError,
    script::{
        ConstEntry, DeclGroup, DeclItem, FuncFlags, FuncRecord, LineInfo, ModuleImage, PrivEnvRecord, ScriptImage,
    },
};

/// Constant-dedup key; floats are keyed by bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Undefined,
    Null,
    Boolean(bool),
    Number(u64),
    String(String),
    BigInt(String),
}

/// A function body under construction.
#[derive(Debug, Default)]
struct PendingFunc {
    name: Option<u32>,
    flags: FuncFlags,
    param_count: u16,
    instrs: Vec<Op>,
    line_info: Vec<LineInfo>,
}

/// Builder for emitting script images.
///
/// # Usage
///
/// ```
/// use vesper::bytecode::{Op, Reg, ScriptBuilder};
///
/// let mut b = ScriptBuilder::new();
/// let forty_one = b.const_number(41.0);
/// let one = b.const_number(1.0);
/// b.emit(Op::LoadConst { dst: Reg(0), index: forty_one });
/// b.emit(Op::LoadConst { dst: Reg(1), index: one });
/// b.emit(Op::Add { dst: Reg(0), lhs: Reg(0), rhs: Reg(1) });
/// b.emit(Op::ReturnValue { src: Reg(0) });
/// let image = b.build().unwrap();
/// ```
#[derive(Debug)]
pub struct ScriptBuilder {
    consts: Vec<ConstEntry>,
    const_lookup: AHashMap<ConstKey, u32>,
    binding_refs: Vec<String>,
    binding_lookup: AHashMap<String, u32>,
    prop_refs: Vec<String>,
    prop_lookup: AHashMap<String, u32>,
    priv_names: Vec<String>,
    priv_lookup: AHashMap<String, u32>,
    priv_envs: Vec<PrivEnvRecord>,
    decls: Vec<DeclGroup>,
    funcs: Vec<PendingFunc>,
    /// Indices into `funcs` of the functions currently being emitted; the
    /// top is the emission target.
    func_stack: Vec<usize>,
    current_line: Option<u32>,
    module: Option<ModuleImage>,
}

impl Default for ScriptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptBuilder {
    /// Creates a builder with an open toplevel function.
    #[must_use]
    pub fn new() -> Self {
        Self {
            consts: Vec::new(),
            const_lookup: AHashMap::new(),
            binding_refs: Vec::new(),
            binding_lookup: AHashMap::new(),
            prop_refs: Vec::new(),
            prop_lookup: AHashMap::new(),
            priv_names: Vec::new(),
            priv_lookup: AHashMap::new(),
            priv_envs: Vec::new(),
            decls: Vec::new(),
            funcs: vec![PendingFunc::default()],
            func_stack: vec![0],
            current_line: None,
            module: None,
        }
    }

    /// Marks the toplevel as strict.
    pub fn strict_toplevel(&mut self) {
        self.funcs[0].flags.strict = true;
    }

    /// Marks this image as a module, attaching its import/export tables.
    pub fn set_module(&mut self, module: ModuleImage) {
        self.module = Some(module);
    }

    fn current(&mut self) -> &mut PendingFunc {
        let index = *self.func_stack.last().expect("builder has no open function");
        &mut self.funcs[index]
    }

    /// Opens a new function; emits go to it until [`Self::end_function`].
    pub fn begin_function(&mut self, flags: FuncFlags, param_count: u16, name: Option<&str>) -> u32 {
        let name = name.map(|n| self.const_string(n));
        let index = self.funcs.len();
        self.funcs.push(PendingFunc {
            name,
            flags,
            param_count,
            instrs: Vec::new(),
            line_info: Vec::new(),
        });
        self.func_stack.push(index);
        u32::try_from(index).expect("function table overflow")
    }

    /// Closes the innermost open function.
    pub fn end_function(&mut self) {
        assert!(self.func_stack.len() > 1, "end_function without begin_function");
        self.func_stack.pop();
    }

    /// Emits an instruction and returns its index within the current function.
    pub fn emit(&mut self, op: Op) -> usize {
        let line = self.current_line.take();
        let func = self.current();
        let ip = func.instrs.len();
        if let Some(line) = line {
            func.line_info.push(LineInfo {
                ip: u32::try_from(ip).expect("function too large"),
                line,
            });
        }
        func.instrs.push(op);
        ip
    }

    /// Records the source line for the next emitted instruction.
    pub fn set_line(&mut self, line: u32) {
        self.current_line = Some(line);
    }

    /// The index the next emitted instruction will get; pair with
    /// [`Self::jump_back_offset`] for loop back-edges.
    #[must_use]
    pub fn next_ip(&mut self) -> usize {
        self.current().instrs.len()
    }

    /// Relative offset from the instruction about to be emitted to `target`.
    #[must_use]
    pub fn jump_back_offset(&mut self, target: usize) -> i32 {
        let here = self.current().instrs.len();
        i32::try_from(target as i64 - here as i64 - 1).expect("jump distance overflow")
    }

    /// Patches a forward jump emitted earlier to land on the next instruction.
    ///
    /// Works for `Jump`/`JumpTrue`/`JumpFalse` and the done-edges of
    /// `ForStep`/`AsyncForStep`.
    pub fn patch_jump(&mut self, at: usize) {
        let here = self.current().instrs.len();
        let offset = i32::try_from(here as i64 - at as i64 - 1).expect("jump distance overflow");
        match &mut self.current().instrs[at] {
            Op::Jump { offset: slot }
            | Op::JumpTrue { offset: slot, .. }
            | Op::JumpFalse { offset: slot, .. }
            | Op::ForStep {
                done_offset: slot, ..
            }
            | Op::AsyncForStep {
                done_offset: slot, ..
            } => *slot = offset,
            other => panic!("patch_jump on non-jump instruction {other:?}"),
        }
    }

    /// Patches a `PushTry`'s catch target to the next instruction.
    pub fn patch_try_catch(&mut self, at: usize) {
        let here = self.current().instrs.len();
        let offset = i32::try_from(here as i64 - at as i64 - 1).expect("jump distance overflow");
        match &mut self.current().instrs[at] {
            Op::PushTry { catch_offset, .. } => *catch_offset = Some(offset),
            other => panic!("patch_try_catch on non-try instruction {other:?}"),
        }
    }

    /// Patches a `PushTry`'s finally target to the next instruction.
    pub fn patch_try_finally(&mut self, at: usize) {
        let here = self.current().instrs.len();
        let offset = i32::try_from(here as i64 - at as i64 - 1).expect("jump distance overflow");
        match &mut self.current().instrs[at] {
            Op::PushTry { finally_offset, .. } => *finally_offset = Some(offset),
            other => panic!("patch_try_finally on non-try instruction {other:?}"),
        }
    }

    fn intern_const(&mut self, key: ConstKey, entry: ConstEntry) -> u32 {
        if let Some(&index) = self.const_lookup.get(&key) {
            return index;
        }
        let index = u32::try_from(self.consts.len()).expect("constant table overflow");
        self.consts.push(entry);
        self.const_lookup.insert(key, index);
        index
    }

    /// Interns a number constant.
    pub fn const_number(&mut self, value: f64) -> u32 {
        self.intern_const(ConstKey::Number(value.to_bits()), ConstEntry::Number(value))
    }

    /// Interns a string constant.
    pub fn const_string(&mut self, value: &str) -> u32 {
        self.intern_const(ConstKey::String(value.to_string()), ConstEntry::String(value.to_string()))
    }

    /// Interns a BigInt constant from integer text (decimal or prefixed).
    pub fn const_big_int(&mut self, value: &str) -> u32 {
        self.intern_const(ConstKey::BigInt(value.to_string()), ConstEntry::BigInt(value.to_string()))
    }

    /// Assigns a binding-reference slot for a name.
    pub fn binding(&mut self, name: &str) -> u32 {
        if let Some(&index) = self.binding_lookup.get(name) {
            return index;
        }
        let index = u32::try_from(self.binding_refs.len()).expect("binding table overflow");
        self.binding_refs.push(name.to_string());
        self.binding_lookup.insert(name.to_string(), index);
        index
    }

    /// Assigns a property-reference slot for a key.
    pub fn prop(&mut self, name: &str) -> u32 {
        if let Some(&index) = self.prop_lookup.get(name) {
            return index;
        }
        let index = u32::try_from(self.prop_refs.len()).expect("property table overflow");
        self.prop_refs.push(name.to_string());
        self.prop_lookup.insert(name.to_string(), index);
        index
    }

    /// Assigns a private-name slot (spell it with the leading `#`).
    pub fn priv_name(&mut self, name: &str) -> u32 {
        if let Some(&index) = self.priv_lookup.get(name) {
            return index;
        }
        let index = u32::try_from(self.priv_names.len()).expect("private name table overflow");
        self.priv_names.push(name.to_string());
        self.priv_lookup.insert(name.to_string(), index);
        index
    }

    /// Adds a private-environment record over the given private-name slots.
    pub fn priv_env(&mut self, parent: Option<u32>, names: Vec<u32>) -> u32 {
        let index = u32::try_from(self.priv_envs.len()).expect("private environment table overflow");
        self.priv_envs.push(PrivEnvRecord { parent, names });
        index
    }

    /// Adds a declaration group and returns its index for `PushLexEnv`.
    pub fn decl_group(&mut self, items: Vec<DeclItem>) -> u32 {
        let index = u32::try_from(self.decls.len()).expect("declaration table overflow");
        self.decls.push(DeclGroup { items });
        index
    }

    /// Flattens the function buffers into a validated image.
    pub fn build(mut self) -> Result<ScriptImage, ScriptLoadError> {
        assert_eq!(self.func_stack.len(), 1, "unclosed function at build time");
        let mut instrs = Vec::new();
        let mut line_info = Vec::new();
        let mut funcs = Vec::with_capacity(self.funcs.len());
        for pending in &mut self.funcs {
            let ip_start = u32::try_from(instrs.len()).map_err(|_| ScriptLoadError::new("image too large"))?;
            instrs.append(&mut pending.instrs);
            let ip_end = u32::try_from(instrs.len()).map_err(|_| ScriptLoadError::new("image too large"))?;
            for entry in &pending.line_info {
                line_info.push(LineInfo {
                    ip: ip_start + entry.ip,
                    line: entry.line,
                });
            }
            funcs.push(FuncRecord {
                name: pending.name,
                flags: pending.flags,
                reg_count: 0,
                param_count: pending.param_count,
                ip_start,
                ip_end,
            });
        }
        // Register counts are derived from the widest register each body touches.
        for func in &mut funcs {
            let mut max_reg: i32 = -1;
            for op in &instrs[func.ip_start as usize..func.ip_end as usize] {
                scan_registers(op, &mut |reg| max_reg = max_reg.max(i32::from(reg.0)));
            }
            func.reg_count = u16::try_from(max_reg + 1).map_err(|_| ScriptLoadError::new("register count overflow"))?;
        }
        line_info.sort_by_key(|entry| entry.ip);
        let image = ScriptImage {
            consts: self.consts,
            instrs,
            line_info,
            funcs,
            decls: self.decls,
            binding_refs: self.binding_refs,
            prop_refs: self.prop_refs,
            priv_names: self.priv_names,
            priv_envs: self.priv_envs,
            module: self.module,
        };
        crate::script::validate_image(&image)?;
        Ok(image)
    }
}

/// Visits every register operand of an instruction.
fn scan_registers(op: &Op, visit: &mut impl FnMut(Reg)) {
    // Reuse the operand fan-out from validation.
    let mut regs: smallvec::SmallVec<[Reg; 3]> = smallvec::SmallVec::new();
    let mut jumps: smallvec::SmallVec<[i32; 2]> = smallvec::SmallVec::new();
    let (mut a, mut d, mut e, mut f, mut g) = (None, None, None, None, None);
    let mut funcs: smallvec::SmallVec<[u32; 1]> = smallvec::SmallVec::new();
    crate::script::collect_operands(op, &mut regs, &mut jumps, &mut a, &mut funcs, &mut d, &mut e, &mut f, &mut g, &mut None);
    for reg in regs {
        visit(reg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::DeclKind;

    #[test]
    fn builds_and_validates_a_minimal_image() {
        let mut b = ScriptBuilder::new();
        let forty_one = b.const_number(41.0);
        let one = b.const_number(1.0);
        b.emit(Op::LoadConst { dst: Reg(0), index: forty_one });
        b.emit(Op::LoadConst { dst: Reg(1), index: one });
        b.emit(Op::Add {
            dst: Reg(0),
            lhs: Reg(0),
            rhs: Reg(1),
        });
        b.emit(Op::ReturnValue { src: Reg(0) });
        let image = b.build().unwrap();
        assert_eq!(image.funcs.len(), 1);
        assert_eq!(image.funcs[0].reg_count, 2);
        assert_eq!(image.instrs.len(), 4);
    }

    #[test]
    fn forward_jump_patching() {
        let mut b = ScriptBuilder::new();
        b.emit(Op::LoadTrue { dst: Reg(0) });
        let jump = b.emit(Op::JumpFalse {
            cond: Reg(0),
            offset: 0,
        });
        b.emit(Op::LoadConst {
            dst: Reg(0),
            index: 0,
        });
        b.const_number(1.0);
        b.patch_jump(jump);
        b.emit(Op::ReturnValue { src: Reg(0) });
        let image = b.build().unwrap();
        match image.instrs[jump] {
            Op::JumpFalse { offset, .. } => assert_eq!(offset, 1),
            ref other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn nested_functions_get_disjoint_ranges() {
        let mut b = ScriptBuilder::new();
        let func = b.begin_function(FuncFlags::default(), 1, Some("inner"));
        b.emit(Op::LoadArg { dst: Reg(0), index: 0 });
        b.emit(Op::ReturnValue { src: Reg(0) });
        b.end_function();
        b.emit(Op::LoadFunc { dst: Reg(0), func });
        b.emit(Op::ReturnValue { src: Reg(0) });
        let image = b.build().unwrap();
        let top = image.funcs[0];
        let inner = image.funcs[1];
        assert!(top.ip_end <= inner.ip_start || inner.ip_end <= top.ip_start);
        assert_eq!(inner.param_count, 1);
    }

    #[test]
    fn out_of_range_decl_reference_is_rejected() {
        let mut b = ScriptBuilder::new();
        b.emit(Op::PushLexEnv { decl: Some(7) });
        b.emit(Op::PopState);
        b.emit(Op::LoadUndefined { dst: Reg(0) });
        b.emit(Op::ReturnValue { src: Reg(0) });
        assert!(b.build().is_err());
    }

    #[test]
    fn decl_groups_round_trip() {
        let mut b = ScriptBuilder::new();
        let group = b.decl_group(vec![DeclItem {
            name: "x".to_string(),
            kind: DeclKind::Let,
            func: None,
        }]);
        b.emit(Op::PushLexEnv { decl: Some(group) });
        b.emit(Op::PopState);
        b.emit(Op::LoadUndefined { dst: Reg(0) });
        b.emit(Op::ReturnValue { src: Reg(0) });
        let image = b.build().unwrap();
        assert_eq!(image.decls[group as usize].items[0].name, "x");
    }
}
