// x87 simulation for ia32: the `X87Target` capability set, per-opcode
// handlers and the process-wide handler registry.

use std::sync::OnceLock;

use super::{FP_CLASS, Inst, Opcode, vf};
use crate::ir::{BlockId, DebugInfo, Function, RegClass, VReg};
use crate::mode::init_x87_type;
use crate::x87::{
    SimOutcome, SimRegistry, StReg, X87Attr, X87State, X87Target, handlers, simulate_graph,
};
use crate::{Error, Result};

/// Widest `fst` without pop; 80-bit stores only exist as `fstp`.
const FST_MAX_BITS: u32 = 64;
/// Widest `fist` without pop; 64-bit integer stores only exist as `fistp`.
const FIST_MAX_BITS: u32 = 32;

#[derive(Debug, Clone, Copy, Default)]
pub struct Ia32Target;

impl X87Target for Ia32Target {
    type Inst = Inst;

    fn fp_class(&self) -> RegClass {
        FP_CLASS
    }

    fn new_fdup(
        &self,
        dbg: DebugInfo,
        _block: BlockId,
        value: VReg,
        result: VReg,
        reg: StReg,
    ) -> Inst {
        Inst::fdup(vf(value.0), vf(result.0), reg).with_dbg(dbg)
    }

    fn new_fxch(&self, dbg: DebugInfo, _block: BlockId, reg: StReg) -> Inst {
        Inst::fxch(reg).with_dbg(dbg)
    }

    fn new_fpop(&self, dbg: DebugInfo, _block: BlockId, reg: StReg) -> Inst {
        Inst::fpop(reg).with_dbg(dbg)
    }

    fn new_ffreep(&self, dbg: DebugInfo, _block: BlockId, reg: StReg) -> Inst {
        Inst::ffreep(reg).with_dbg(dbg)
    }

    /// `fld` from the slot an `fstp` wrote. Integer stores round, so `fistp`
    /// cannot be undone this way.
    fn new_reload(
        &self,
        dbg: DebugInfo,
        _block: BlockId,
        store: &Inst,
        value: VReg,
    ) -> Option<Inst> {
        if !matches!(store.op, Opcode::VFst | Opcode::Fst) {
            return None;
        }
        let mut reload = Inst::fld(store.mem?, vf(value.0)).with_dbg(dbg);
        reload.op = Opcode::Fld;
        Some(reload)
    }

    fn x87_attr<'i>(&self, inst: &'i mut Inst) -> Option<&'i mut X87Attr> {
        inst.op.is_x87().then_some(&mut inst.x87)
    }
}

type State<'a> = X87State<'a, Ia32Target>;

/// Switch a simulated instruction to its stack form.
fn rewrite(inst: &mut Inst) -> Result<SimOutcome> {
    let real = inst
        .op
        .real()
        .ok_or_else(|| Error::Internal(format!("`{inst}` has no stack form")))?;
    inst.op = real;
    Ok(SimOutcome::Rewritten)
}

fn sim_fld(state: &mut State<'_>, inst: &mut Inst) -> Result<SimOutcome> {
    let value = Ia32Target
        .fp_outputs(inst)
        .first()
        .copied()
        .ok_or_else(|| Error::Internal(format!("`{inst}` loads into no x87 register")))?;
    handlers::sim_load(state, inst, value)?;
    rewrite(inst)
}

fn sim_fst(state: &mut State<'_>, inst: &mut Inst) -> Result<SimOutcome> {
    handlers::sim_store(state, inst, 0, FST_MAX_BITS)?;
    rewrite(inst)
}

fn sim_fist(state: &mut State<'_>, inst: &mut Inst) -> Result<SimOutcome> {
    handlers::sim_store(state, inst, 0, FIST_MAX_BITS)?;
    rewrite(inst)
}

fn sim_fisttp(state: &mut State<'_>, inst: &mut Inst) -> Result<SimOutcome> {
    handlers::sim_store_pop(state, inst, 0)?;
    rewrite(inst)
}

fn sim_unop(state: &mut State<'_>, inst: &mut Inst) -> Result<SimOutcome> {
    handlers::sim_unop(state, inst)?;
    rewrite(inst)
}

fn sim_fucomi(state: &mut State<'_>, inst: &mut Inst) -> Result<SimOutcome> {
    handlers::sim_fucom(state, inst)?;
    rewrite(inst)
}

fn sim_copy(state: &mut State<'_>, inst: &mut Inst) -> Result<SimOutcome> {
    handlers::sim_copy(state, inst)
}

fn sim_keep(state: &mut State<'_>, inst: &mut Inst) -> Result<SimOutcome> {
    handlers::sim_keep(state, inst)
}

fn sim_call(state: &mut State<'_>, inst: &mut Inst) -> Result<SimOutcome> {
    handlers::sim_call(state, inst)?;
    rewrite(inst)
}

fn sim_ret(state: &mut State<'_>, inst: &mut Inst) -> Result<SimOutcome> {
    handlers::sim_ret(state, inst)?;
    rewrite(inst)
}

fn sim_fadd(state: &mut State<'_>, inst: &mut Inst) -> Result<SimOutcome> {
    handlers::sim_binop(state, inst, true)?;
    rewrite(inst)
}

fn sim_fmul(state: &mut State<'_>, inst: &mut Inst) -> Result<SimOutcome> {
    handlers::sim_binop(state, inst, true)?;
    rewrite(inst)
}

fn sim_fsub(state: &mut State<'_>, inst: &mut Inst) -> Result<SimOutcome> {
    handlers::sim_binop(state, inst, false)?;
    rewrite(inst)
}

fn sim_fdiv(state: &mut State<'_>, inst: &mut Inst) -> Result<SimOutcome> {
    handlers::sim_binop(state, inst, false)?;
    rewrite(inst)
}

/// Register the handlers shared by every x86 flavour: loads, stores,
/// unary operations, compares, copies, calls and returns.
pub fn prepare_x87_callbacks(registry: &mut SimRegistry<Ia32Target>) -> Result<()> {
    for op in [Opcode::VFld, Opcode::VFild, Opcode::VFldz, Opcode::VFld1] {
        registry.register(op, sim_fld)?;
    }
    registry.register(Opcode::VFst, sim_fst)?;
    registry.register(Opcode::VFist, sim_fist)?;
    registry.register(Opcode::VFisttp, sim_fisttp)?;
    for op in [Opcode::VFchs, Opcode::VFabs, Opcode::VFsqrt] {
        registry.register(op, sim_unop)?;
    }
    registry.register(Opcode::VFucomi, sim_fucomi)?;
    registry.register(Opcode::VCopy, sim_copy)?;
    registry.register(Opcode::VKeep, sim_keep)?;
    registry.register(Opcode::VCall, sim_call)?;
    registry.register(Opcode::VRet, sim_ret)?;
    Ok(())
}

/// Register the ia32 arithmetic handlers. Runs after
/// [`prepare_x87_callbacks`] and may override its registrations.
pub fn prepare_x87_callbacks_ia32(registry: &mut SimRegistry<Ia32Target>) -> Result<()> {
    registry.register(Opcode::VFadd, sim_fadd)?;
    registry.register(Opcode::VFmul, sim_fmul)?;
    registry.register(Opcode::VFsub, sim_fsub)?;
    registry.register(Opcode::VFdiv, sim_fdiv)?;
    Ok(())
}

static REGISTRY: OnceLock<SimRegistry<Ia32Target>> = OnceLock::new();

/// One-time x87 setup for ia32: fixes the extended float type (12 bytes,
/// 4-byte aligned) and builds the handler registry. Later calls return the
/// registry built by the first.
pub fn init_x87() -> Result<&'static SimRegistry<Ia32Target>> {
    if let Some(registry) = REGISTRY.get() {
        return Ok(registry);
    }

    init_x87_type(12, 4);
    let mut registry = SimRegistry::new(&Ia32Target)?;
    prepare_x87_callbacks(&mut registry)?;
    prepare_x87_callbacks_ia32(&mut registry)?;
    tracing::debug!(handlers = registry.len(), "ia32 x87 simulator initialised");

    // A concurrent initialiser may have won; both registries are identical.
    Ok(REGISTRY.get_or_init(|| registry))
}

/// Simulate one ia32 function with the process-wide registry.
pub fn simulate(func: &mut Function<Inst>) -> Result<()> {
    let registry = init_x87()?;
    simulate_graph(func, &Ia32Target, registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_every_virtual_opcode() {
        let registry = init_x87().unwrap();
        let virtual_ops = [
            Opcode::VFld,
            Opcode::VFild,
            Opcode::VFldz,
            Opcode::VFld1,
            Opcode::VFst,
            Opcode::VFist,
            Opcode::VFisttp,
            Opcode::VFadd,
            Opcode::VFsub,
            Opcode::VFmul,
            Opcode::VFdiv,
            Opcode::VFchs,
            Opcode::VFabs,
            Opcode::VFsqrt,
            Opcode::VFucomi,
            Opcode::VCopy,
            Opcode::VKeep,
            Opcode::VCall,
            Opcode::VRet,
        ];
        for op in virtual_ops {
            assert!(op.is_virtual());
            assert!(registry.is_registered(op), "{op:?} has no handler");
            if let Some(real) = op.real() {
                assert!(!registry.is_registered(real), "{real:?} must not be simulated");
            }
        }
        assert_eq!(registry.len(), virtual_ops.len());
    }

    #[test]
    fn fixup_opcodes_cannot_be_registered() {
        let mut registry = SimRegistry::new(&Ia32Target).unwrap();
        let err = registry.register(Opcode::Fxch, sim_fld).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn init_fixes_extended_type() {
        init_x87().unwrap();
        let ty = crate::mode::x86_type_e().unwrap();
        assert_eq!(ty.mode.size_bits(), 80);
    }
}
