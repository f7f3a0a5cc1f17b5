use super::{FP_CLASS, Opcode};
use crate::ir::{BlockId, DebugInfo, MachineInst, Reg};
use crate::x87::{StReg, X87Attr};

/// A `[base + offset]` memory operand of a given access width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemOperand {
    pub base: Reg,
    pub offset: i32,
    pub bits: u32,
}

impl MemOperand {
    #[must_use]
    pub const fn new(base: Reg, offset: i32, bits: u32) -> Self {
        Self { base, offset, bits }
    }
}

/// Branch condition of a `jcc`, as read from the flags `fucomi` sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CondCode {
    Below,
    BelowOrEqual,
    Above,
    AboveOrEqual,
    Equal,
    NotEqual,
    Parity,
}

impl CondCode {
    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Below => "b",
            Self::BelowOrEqual => "be",
            Self::Above => "a",
            Self::AboveOrEqual => "ae",
            Self::Equal => "e",
            Self::NotEqual => "ne",
            Self::Parity => "p",
        }
    }
}

/// An ia32 machine instruction.
///
/// Register operands are listed in `ins`/`outs`; x87 operands are registers
/// of [`FP_CLASS`] until the simulator rewrites the instruction, after which
/// `x87` holds the stack positions it works on.
#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub op: Opcode,
    pub ins: Vec<Reg>,
    pub outs: Vec<Reg>,
    pub mem: Option<MemOperand>,
    pub x87: X87Attr,
    /// Branch targets: `[target]` for `jmp`, `[taken, fallthrough]` for `jcc`.
    pub targets: Vec<BlockId>,
    pub callee: Option<String>,
    pub cc: Option<CondCode>,
    pub dbg: DebugInfo,
}

impl Inst {
    #[must_use]
    pub fn new(op: Opcode) -> Self {
        Self {
            op,
            ins: Vec::new(),
            outs: Vec::new(),
            mem: None,
            x87: X87Attr::default(),
            targets: Vec::new(),
            callee: None,
            cc: None,
            dbg: DebugInfo::default(),
        }
    }

    #[must_use]
    pub fn with_dbg(mut self, dbg: DebugInfo) -> Self {
        self.dbg = dbg;
        self
    }

    fn with_ins(mut self, ins: impl IntoIterator<Item = Reg>) -> Self {
        self.ins.extend(ins);
        self
    }

    fn with_outs(mut self, outs: impl IntoIterator<Item = Reg>) -> Self {
        self.outs.extend(outs);
        self
    }

    fn with_mem(mut self, mem: MemOperand) -> Self {
        self.ins.push(mem.base);
        self.mem = Some(mem);
        self
    }

    fn with_reg(mut self, reg: StReg) -> Self {
        self.x87.reg = Some(reg);
        self
    }

    /// `out = [mem]` (`fld`).
    #[must_use]
    pub fn fld(mem: MemOperand, out: Reg) -> Self {
        Self::new(Opcode::VFld).with_outs([out]).with_mem(mem)
    }

    /// `out = (float) [mem]` (`fild`).
    #[must_use]
    pub fn fild(mem: MemOperand, out: Reg) -> Self {
        Self::new(Opcode::VFild).with_outs([out]).with_mem(mem)
    }

    #[must_use]
    pub fn fldz(out: Reg) -> Self {
        Self::new(Opcode::VFldz).with_outs([out])
    }

    #[must_use]
    pub fn fld1(out: Reg) -> Self {
        Self::new(Opcode::VFld1).with_outs([out])
    }

    /// `[mem] = value`, rounded to the width of `mem`.
    #[must_use]
    pub fn fst(value: Reg, mem: MemOperand) -> Self {
        Self::new(Opcode::VFst).with_ins([value]).with_mem(mem)
    }

    /// `[mem] = (int) value`, rounding with the current rounding mode.
    #[must_use]
    pub fn fist(value: Reg, mem: MemOperand) -> Self {
        Self::new(Opcode::VFist).with_ins([value]).with_mem(mem)
    }

    /// `[mem] = (int) value`, truncating.
    #[must_use]
    pub fn fisttp(value: Reg, mem: MemOperand) -> Self {
        Self::new(Opcode::VFisttp).with_ins([value]).with_mem(mem)
    }

    /// `out = a op b` for one of the virtual arithmetic opcodes.
    #[must_use]
    pub fn binop(op: Opcode, a: Reg, b: Reg, out: Reg) -> Self {
        debug_assert!(matches!(
            op,
            Opcode::VFadd | Opcode::VFsub | Opcode::VFmul | Opcode::VFdiv
        ));
        Self::new(op).with_ins([a, b]).with_outs([out])
    }

    /// `out = a op [mem]`.
    #[must_use]
    pub fn binop_mem(op: Opcode, a: Reg, mem: MemOperand, out: Reg) -> Self {
        debug_assert!(matches!(
            op,
            Opcode::VFadd | Opcode::VFsub | Opcode::VFmul | Opcode::VFdiv
        ));
        Self::new(op).with_ins([a]).with_outs([out]).with_mem(mem)
    }

    #[must_use]
    pub fn unop(op: Opcode, a: Reg, out: Reg) -> Self {
        debug_assert!(matches!(
            op,
            Opcode::VFchs | Opcode::VFabs | Opcode::VFsqrt
        ));
        Self::new(op).with_ins([a]).with_outs([out])
    }

    /// Compare `a` with `b` into the flags.
    #[must_use]
    pub fn fucomi(a: Reg, b: Reg) -> Self {
        Self::new(Opcode::VFucomi).with_ins([a, b])
    }

    #[must_use]
    pub fn copy(src: Reg, dst: Reg) -> Self {
        Self::new(Opcode::VCopy).with_ins([src]).with_outs([dst])
    }

    #[must_use]
    pub fn keep(regs: impl IntoIterator<Item = Reg>) -> Self {
        Self::new(Opcode::VKeep).with_ins(regs)
    }

    #[must_use]
    pub fn call(callee: impl Into<String>, results: impl IntoIterator<Item = Reg>) -> Self {
        let mut inst = Self::new(Opcode::VCall).with_outs(results);
        inst.callee = Some(callee.into());
        inst
    }

    /// Return `values`; the n-th one is expected in `st(n)`.
    #[must_use]
    pub fn ret(values: impl IntoIterator<Item = Reg>) -> Self {
        Self::new(Opcode::VRet).with_ins(values)
    }

    #[must_use]
    pub fn jmp(target: BlockId) -> Self {
        let mut inst = Self::new(Opcode::Jmp);
        inst.targets.push(target);
        inst
    }

    #[must_use]
    pub fn jcc(cc: CondCode, taken: BlockId, fallthrough: BlockId) -> Self {
        let mut inst = Self::new(Opcode::Jcc);
        inst.targets = vec![taken, fallthrough];
        inst.cc = Some(cc);
        inst
    }

    /// `fld st(reg)`, pushing a copy of `value` named `result`.
    #[must_use]
    pub fn fdup(value: Reg, result: Reg, reg: StReg) -> Self {
        Self::new(Opcode::Fdup)
            .with_ins([value])
            .with_outs([result])
            .with_reg(reg)
    }

    #[must_use]
    pub fn fxch(reg: StReg) -> Self {
        Self::new(Opcode::Fxch).with_reg(reg)
    }

    /// `fstp st(reg)`.
    #[must_use]
    pub fn fpop(reg: StReg) -> Self {
        let mut inst = Self::new(Opcode::Fpop).with_reg(reg);
        inst.x87.pop = true;
        inst
    }

    #[must_use]
    pub fn ffreep(reg: StReg) -> Self {
        let mut inst = Self::new(Opcode::Ffreep).with_reg(reg);
        inst.x87.pop = true;
        inst
    }

    /// Floating-point register operands, in operand order.
    pub fn fp_ins(&self) -> impl Iterator<Item = Reg> + '_ {
        self.ins.iter().copied().filter(|r| r.class == FP_CLASS)
    }
}

impl MachineInst for Inst {
    type Opcode = Opcode;

    fn opcode(&self) -> Opcode {
        self.op
    }

    fn dbg_info(&self) -> DebugInfo {
        self.dbg
    }

    fn inputs(&self) -> &[Reg] {
        &self.ins
    }

    fn outputs(&self) -> &[Reg] {
        &self.outs
    }

    fn is_terminator(&self) -> bool {
        self.op.is_terminating()
    }

    fn mem_bits(&self) -> Option<u32> {
        self.mem.map(|m| m.bits)
    }
}
