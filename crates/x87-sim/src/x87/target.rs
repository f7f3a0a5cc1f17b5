use super::liveness::LiveSet;
use super::stack::StReg;
use crate::ir::{BlockId, DebugInfo, MachineInst, RegClass, VReg};

/// Stack operands of a rewritten x87 instruction.
///
/// `res_in_reg` and `pop` are independent; the emitter handles all four
/// combinations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct X87Attr {
    /// The explicit register operand; `st(0)` is the other, implicit one.
    pub reg: Option<StReg>,
    /// The result goes to `reg` instead of `st(0)`.
    pub res_in_reg: bool,
    /// Pop the stack after the operation.
    pub pop: bool,
    /// Operands are swapped relative to `dst = dst op src`, i.e. the
    /// instruction computes `dst = src op dst`.
    pub reverse: bool,
}

/// Everything the simulator needs from one concrete instruction set.
///
/// Implemented once per backend and shared read-only by every function being
/// simulated.
pub trait X87Target {
    type Inst: MachineInst;

    /// Register class whose registers live on the x87 stack.
    fn fp_class(&self) -> RegClass;

    /// `fld st(reg)`: push a copy of `value` (at `reg`), naming the copy
    /// `result`.
    fn new_fdup(
        &self,
        dbg: DebugInfo,
        block: BlockId,
        value: VReg,
        result: VReg,
        reg: StReg,
    ) -> Self::Inst;

    /// `fxch st(reg)`.
    fn new_fxch(&self, dbg: DebugInfo, block: BlockId, reg: StReg) -> Self::Inst;

    /// `fstp st(reg)`: store the top into `reg` and pop.
    fn new_fpop(&self, dbg: DebugInfo, block: BlockId, reg: StReg) -> Self::Inst;

    /// `ffreep st(reg)`: free `reg` and pop.
    fn new_ffreep(&self, dbg: DebugInfo, block: BlockId, reg: StReg) -> Self::Inst;

    /// Reload `value` from the memory `store` just wrote, for a store that
    /// had to pop a value still live because the stack had no room for a
    /// copy. `None` when the stored form cannot be read back unchanged.
    fn new_reload(
        &self,
        _dbg: DebugInfo,
        _block: BlockId,
        _store: &Self::Inst,
        _value: VReg,
    ) -> Option<Self::Inst> {
        None
    }

    /// Stack attributes of an x87 instruction, `None` for anything else.
    fn x87_attr<'i>(&self, inst: &'i mut Self::Inst) -> Option<&'i mut X87Attr>;

    /// The x87-class register read at operand `pos`, if that operand is one.
    fn fp_input(&self, inst: &Self::Inst, pos: usize) -> Option<VReg> {
        inst.inputs()
            .get(pos)
            .filter(|r| r.class == self.fp_class())
            .map(|r| VReg(r.index))
    }

    fn fp_inputs(&self, inst: &Self::Inst) -> Vec<VReg> {
        inst.inputs()
            .iter()
            .filter(|r| r.class == self.fp_class())
            .map(|r| VReg(r.index))
            .collect()
    }

    fn fp_outputs(&self, inst: &Self::Inst) -> Vec<VReg> {
        inst.outputs()
            .iter()
            .filter(|r| r.class == self.fp_class())
            .map(|r| VReg(r.index))
            .collect()
    }

    fn fp_uses(&self, inst: &Self::Inst) -> LiveSet {
        self.fp_inputs(inst).into_iter().collect()
    }

    fn fp_defs(&self, inst: &Self::Inst) -> LiveSet {
        self.fp_outputs(inst).into_iter().collect()
    }
}
