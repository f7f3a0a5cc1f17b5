// Simulation state while walking one block: the abstract stack plus the
// fixup instructions generated around the instruction being simulated.

use super::liveness::LiveSet;
use super::stack::{N_FLOAT_REGS, StReg, X87Stack};
use super::target::X87Target;
use crate::ir::{BlockId, DebugInfo, VReg};
use crate::{Error, Result};

/// Where a generated fixup goes relative to the simulated instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Before,
    After,
}

/// The x87 state handed to simulation handlers.
pub struct X87State<'a, T: X87Target> {
    target: &'a T,
    stack: X87Stack,
    block: BlockId,
    dbg: DebugInfo,
    live_after: LiveSet,
    before: Vec<T::Inst>,
    after: Vec<T::Inst>,
}

impl<'a, T: X87Target> X87State<'a, T> {
    pub fn new(target: &'a T, block: BlockId, stack: X87Stack) -> Self {
        Self {
            target,
            stack,
            block,
            dbg: DebugInfo::default(),
            live_after: LiveSet::EMPTY,
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    #[must_use]
    pub fn target(&self) -> &'a T {
        self.target
    }

    #[must_use]
    pub fn block(&self) -> BlockId {
        self.block
    }

    #[must_use]
    pub fn stack(&self) -> &X87Stack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut X87Stack {
        &mut self.stack
    }

    /// x87 registers live after the instruction being simulated.
    #[must_use]
    pub fn live_after(&self) -> LiveSet {
        self.live_after
    }

    #[must_use]
    pub fn is_live_after(&self, reg: VReg) -> bool {
        self.live_after.contains(reg)
    }

    pub fn position_of(&self, reg: VReg) -> Result<usize> {
        self.stack.position_of(reg)
    }

    /// Model a value materialising at the top of stack.
    pub fn push(&mut self, reg: VReg) -> Result<()> {
        self.stack.push(reg)
    }

    /// Model the instruction popping the top of stack.
    pub fn pop(&mut self) -> Result<VReg> {
        self.stack.pop()
    }

    /// Emit `fxch st(pos)` before the current instruction.
    pub fn fxch(&mut self, pos: usize) -> Result<()> {
        self.stack.exchange(pos)?;
        let fxch = self
            .target
            .new_fxch(self.dbg, self.block, StReg(pos as u8));
        self.emit(fxch, Placement::Before);
        Ok(())
    }

    /// Make `reg` the top of stack, exchanging only when it is not there yet.
    pub fn bring_to_top(&mut self, reg: VReg) -> Result<()> {
        let pos = self.stack.position_of(reg)?;
        if pos != 0 {
            self.fxch(pos)?;
        }
        Ok(())
    }

    /// Push a copy of `value` named `copy` with `fld st(i)`.
    pub fn duplicate(&mut self, value: VReg, copy: VReg) -> Result<()> {
        let pos = self.stack.position_of(value)?;
        if self.stack.is_full() {
            return Err(Error::StackOverflow { vreg: copy });
        }
        self.stack.duplicate(pos, copy)?;
        let fdup = self
            .target
            .new_fdup(self.dbg, self.block, value, copy, StReg(pos as u8));
        self.emit(fdup, Placement::Before);
        Ok(())
    }

    /// Duplicate the top of stack for an instruction that pops it right away
    /// (a store that only exists in popping form). The model is unchanged:
    /// the copy lives only for the duration of the instruction.
    pub fn duplicate_top_transient(&mut self) -> Result<()> {
        let top = self.stack.top().ok_or(Error::StackUnderflow)?;
        if self.stack.is_full() {
            return Err(Error::StackOverflow { vreg: top });
        }
        let fdup = self
            .target
            .new_fdup(self.dbg, self.block, top, top, StReg::TOP);
        self.emit(fdup, Placement::Before);
        Ok(())
    }

    /// Push `value` back after `store` popped it, reading it from memory.
    pub fn reload_after(&mut self, store: &T::Inst, value: VReg) -> Result<()> {
        let reload = self
            .target
            .new_reload(self.dbg, self.block, store, value)
            .ok_or(Error::StackOverflow { vreg: value })?;
        self.stack.push(value)?;
        self.emit(reload, Placement::After);
        Ok(())
    }

    /// Remove `reg` from the stack: `ffreep st(0)` at the top, `fstp st(i)`
    /// below it.
    pub fn kill(&mut self, reg: VReg, placement: Placement) -> Result<()> {
        let pos = self.stack.position_of(reg)?;
        let inst = if pos == 0 {
            self.stack.pop()?;
            self.target.new_ffreep(self.dbg, self.block, StReg::TOP)
        } else {
            self.stack.pop_into(pos)?;
            self.target
                .new_fpop(self.dbg, self.block, StReg(pos as u8))
        };
        self.emit(inst, placement);
        Ok(())
    }

    /// Kill every stack entry not in `live`. Returns how many were killed.
    pub fn kill_dead(&mut self, live: LiveSet, placement: Placement) -> Result<usize> {
        let mut killed = 0;
        loop {
            let dead = self.stack.iter().find(|&r| !live.contains(r));
            let Some(dead) = dead else { break };
            self.kill(dead, placement)?;
            killed += 1;
        }
        Ok(killed)
    }

    /// Exchange entries until the stack equals `wanted`. Both must hold the
    /// same registers.
    pub fn permute_to(&mut self, wanted: &X87Stack) -> Result<()> {
        // Every exchange either settles the current top for good or starts a
        // new cycle, so a permutation of 8 entries needs at most 12.
        let mut budget = 2 * N_FLOAT_REGS;
        while self.stack != *wanted {
            if budget == 0 {
                return Err(Error::Internal(format!(
                    "x87 permutation from {} to {wanted} did not converge",
                    self.stack
                )));
            }
            budget -= 1;

            let top = self.stack.top().ok_or(Error::StackUnderflow)?;
            let dest = wanted.position_of(top)?;
            if dest != 0 {
                self.fxch(dest)?;
            } else {
                let misplaced = (1..self.stack.depth())
                    .find(|&p| self.stack.get(p) != wanted.get(p))
                    .ok_or_else(|| Error::Internal("x87 stacks differ but no slot does".into()))?;
                self.fxch(misplaced)?;
            }
        }
        Ok(())
    }

    /// Transform the stack into `wanted`, the entry state of `succ`: free
    /// entries `succ` does not expect, then permute.
    pub(crate) fn shuffle_to(&mut self, wanted: &X87Stack, succ: BlockId) -> Result<()> {
        self.kill_dead(wanted.occupied(), Placement::Before)?;
        if self.stack.occupied() != wanted.occupied() {
            return Err(Error::UnreconcilableJoin {
                pred: self.block,
                succ,
                detail: format!("{} cannot become {wanted}", self.stack),
            });
        }
        self.permute_to(wanted)
    }

    pub(crate) fn begin_instruction(&mut self, dbg: DebugInfo, live_after: LiveSet) {
        self.dbg = dbg;
        self.live_after = live_after;
    }

    /// Drain the fixups generated so far as `(before, after)`.
    pub(crate) fn take_fixups(&mut self) -> (Vec<T::Inst>, Vec<T::Inst>) {
        (
            std::mem::take(&mut self.before),
            std::mem::take(&mut self.after),
        )
    }

    pub(crate) fn into_stack(self) -> X87Stack {
        self.stack
    }

    fn emit(&mut self, inst: T::Inst, placement: Placement) {
        match placement {
            Placement::Before => self.before.push(inst),
            Placement::After => self.after.push(inst),
        }
    }
}
