// Liveness of x87-class registers.
//
// Backward dataflow over the block graph, iterated to a fixed point. The
// simulator needs three views of it:
//   - live-in per block, to free stale entries when a block is entered;
//   - live-out per block, for join reconciliation bookkeeping;
//   - live-after per instruction, to decide whether an operand dies.
//
// Register sets fit in a byte because the x87 class has 8 registers.

use std::fmt;

use super::stack::N_FLOAT_REGS;
use super::target::X87Target;
use crate::ir::{BlockId, Function, VReg, reverse_postorder};

/// A set of x87-class virtual registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LiveSet(u8);

impl LiveSet {
    pub const EMPTY: LiveSet = LiveSet(0);

    /// Registers outside the x87 class have no bit; the walker rejects
    /// them before computing liveness.
    fn bit(reg: VReg) -> u8 {
        1u8.checked_shl(u32::from(reg.0)).unwrap_or(0)
    }

    #[must_use]
    pub fn contains(self, reg: VReg) -> bool {
        self.0 & Self::bit(reg) != 0
    }

    pub fn insert(&mut self, reg: VReg) {
        self.0 |= Self::bit(reg);
    }

    pub fn remove(&mut self, reg: VReg) {
        self.0 &= !Self::bit(reg);
    }

    #[must_use]
    pub fn with(mut self, reg: VReg) -> Self {
        self.insert(reg);
        self
    }

    #[must_use]
    pub fn without(mut self, reg: VReg) -> Self {
        self.remove(reg);
        self
    }

    #[must_use]
    pub const fn union(self, other: LiveSet) -> Self {
        LiveSet(self.0 | other.0)
    }

    #[must_use]
    pub const fn difference(self, other: LiveSet) -> Self {
        LiveSet(self.0 & !other.0)
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = VReg> {
        (0..N_FLOAT_REGS as u8)
            .map(VReg)
            .filter(move |&r| self.contains(r))
    }
}

impl FromIterator<VReg> for LiveSet {
    fn from_iter<T: IntoIterator<Item = VReg>>(iter: T) -> Self {
        let mut set = LiveSet::EMPTY;
        for reg in iter {
            set.insert(reg);
        }
        set
    }
}

impl fmt::Display for LiveSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let regs: Vec<String> = self.iter().map(|r| r.to_string()).collect();
        write!(f, "{{{}}}", regs.join(", "))
    }
}

/// Per-block live-in/live-out sets of one function.
#[derive(Debug, Clone)]
pub struct Liveness {
    live_in: Vec<LiveSet>,
    live_out: Vec<LiveSet>,
}

impl Liveness {
    pub fn compute<T: X87Target>(func: &Function<T::Inst>, target: &T) -> Self {
        let n = func.blocks.len();
        let mut live_in = vec![LiveSet::EMPTY; n];
        let mut live_out = vec![LiveSet::EMPTY; n];

        // Per-block summary: registers read before being written, and
        // registers written.
        let summaries: Vec<(LiveSet, LiveSet)> = func
            .blocks
            .iter()
            .map(|block| {
                let mut upward = LiveSet::EMPTY;
                for inst in block.insts.iter().rev() {
                    upward = upward
                        .difference(target.fp_defs(inst))
                        .union(target.fp_uses(inst));
                }
                let defs = block
                    .insts
                    .iter()
                    .fold(LiveSet::EMPTY, |acc, inst| acc.union(target.fp_defs(inst)));
                (upward, defs)
            })
            .collect();

        // Postorder converges fastest for a backward problem; unreachable
        // blocks are appended so they still get sets.
        let mut order = reverse_postorder(func);
        order.reverse();
        let mut seen = vec![false; n];
        for b in &order {
            seen[b.index()] = true;
        }
        order.extend(func.block_ids().filter(|b| !seen[b.index()]));

        let mut changed = true;
        while changed {
            changed = false;
            for &b in &order {
                let out = func
                    .block(b)
                    .succs
                    .iter()
                    .fold(LiveSet::EMPTY, |acc, s| acc.union(live_in[s.index()]));
                let (upward, defs) = summaries[b.index()];
                let inn = upward.union(out.difference(defs));
                if out != live_out[b.index()] || inn != live_in[b.index()] {
                    live_out[b.index()] = out;
                    live_in[b.index()] = inn;
                    changed = true;
                }
            }
        }

        Self { live_in, live_out }
    }

    #[must_use]
    pub fn live_in(&self, block: BlockId) -> LiveSet {
        self.live_in[block.index()]
    }

    #[must_use]
    pub fn live_out(&self, block: BlockId) -> LiveSet {
        self.live_out[block.index()]
    }

    /// Live set after each instruction of `block`, indexed like its
    /// instruction vector.
    pub fn live_after_each<T: X87Target>(
        &self,
        func: &Function<T::Inst>,
        target: &T,
        block: BlockId,
    ) -> Vec<LiveSet> {
        let insts = &func.block(block).insts;
        let mut live = self.live_out(block);
        let mut after = vec![LiveSet::EMPTY; insts.len()];
        for (idx, inst) in insts.iter().enumerate().rev() {
            after[idx] = live;
            live = live
                .difference(target.fp_defs(inst))
                .union(target.fp_uses(inst));
        }
        after
    }
}
