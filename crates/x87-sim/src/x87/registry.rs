// Opcode -> simulation handler table.
//
// Built once per backend during initialisation (base handlers first, then
// backend overrides, last registration wins) and read-only afterwards, so a
// `&'static SimRegistry` can be shared by functions simulated in parallel.

use std::fmt;

use super::stack::StReg;
use super::state::X87State;
use super::target::X87Target;
use crate::ir::{BlockId, DebugInfo, DenseOpcode, MachineInst, VReg};
use crate::{Error, Result};

/// How a handler disposed of the instruction it simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimOutcome {
    /// The instruction was rewritten in place and stays in the block.
    Rewritten,
    /// The instruction has no stack-machine counterpart and is dropped; any
    /// fixups the handler emitted take its place.
    Removed,
}

/// A per-opcode simulation handler.
pub type SimFn<T> =
    for<'a> fn(&mut X87State<'a, T>, &mut <T as X87Target>::Inst) -> Result<SimOutcome>;

type OpcodeOf<T> = <<T as X87Target>::Inst as MachineInst>::Opcode;

pub struct SimRegistry<T: X87Target> {
    handlers: Vec<Option<SimFn<T>>>,
    /// Opcodes of the fixups the target constructs; never simulated.
    fixups: [OpcodeOf<T>; 4],
}

impl<T: X87Target> SimRegistry<T> {
    /// Create an empty registry for `target`, validating its configuration.
    pub fn new(target: &T) -> Result<Self> {
        let class = target.fp_class();
        if class.n_regs as usize != super::N_FLOAT_REGS {
            return Err(Error::InvalidConfig(format!(
                "register class {} has {} registers, the x87 stack has {}",
                class.name,
                class.n_regs,
                super::N_FLOAT_REGS
            )));
        }

        let dbg = DebugInfo::default();
        let block = BlockId(0);
        let probes = [
            ("fdup", target.new_fdup(dbg, block, VReg(0), VReg(1), StReg(1))),
            ("fxch", target.new_fxch(dbg, block, StReg(1))),
            ("fpop", target.new_fpop(dbg, block, StReg(1))),
            ("ffreep", target.new_ffreep(dbg, block, StReg(0))),
        ];

        let mut fixups = Vec::with_capacity(probes.len());
        for (name, mut inst) in probes {
            if target.x87_attr(&mut inst).is_none() {
                return Err(Error::InvalidConfig(format!(
                    "{name} constructor built `{inst}`, which has no x87 attributes"
                )));
            }
            let op = inst.opcode();
            if op.index() >= OpcodeOf::<T>::COUNT {
                return Err(Error::InvalidConfig(format!(
                    "{name} opcode {op:?} is outside the dense opcode range"
                )));
            }
            if fixups.contains(&op) {
                return Err(Error::InvalidConfig(format!(
                    "{name} constructor reuses opcode {op:?}"
                )));
            }
            fixups.push(op);
        }
        let fixups = [fixups[0], fixups[1], fixups[2], fixups[3]];

        Ok(Self {
            handlers: vec![None; OpcodeOf::<T>::COUNT],
            fixups,
        })
    }

    /// Associate `handler` with `op`, replacing any earlier registration.
    pub fn register(&mut self, op: OpcodeOf<T>, handler: SimFn<T>) -> Result<()> {
        if self.fixups.contains(&op) {
            return Err(Error::InvalidConfig(format!(
                "{op:?} is a fixup opcode and must not be simulated"
            )));
        }
        let slot = self.handlers.get_mut(op.index()).ok_or_else(|| {
            Error::InvalidConfig(format!("{op:?} is outside the dense opcode range"))
        })?;
        if slot.replace(handler).is_some() {
            tracing::debug!(?op, "overriding x87 simulation handler");
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, op: OpcodeOf<T>) -> Option<SimFn<T>> {
        self.handlers.get(op.index()).copied().flatten()
    }

    #[must_use]
    pub fn is_registered(&self, op: OpcodeOf<T>) -> bool {
        self.get(op).is_some()
    }

    /// Number of opcodes with a handler.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.iter().filter(|h| h.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the handler registered for `inst`'s opcode.
    ///
    /// Returns `None`, leaving the instruction untouched, when the opcode
    /// does not take part in stack simulation.
    pub fn dispatch(
        &self,
        state: &mut X87State<'_, T>,
        inst: &mut T::Inst,
    ) -> Result<Option<SimOutcome>> {
        match self.get(inst.opcode()) {
            Some(handler) => handler(state, inst).map(Some),
            None => Ok(None),
        }
    }
}

impl<T: X87Target> fmt::Debug for SimRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ops: Vec<usize> = self
            .handlers
            .iter()
            .enumerate()
            .filter_map(|(idx, h)| h.is_some().then_some(idx))
            .collect();
        f.debug_struct("SimRegistry")
            .field("registered", &ops)
            .field("fixups", &self.fixups)
            .finish()
    }
}
