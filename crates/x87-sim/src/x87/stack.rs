use std::fmt;

use super::liveness::LiveSet;
use crate::ir::VReg;
use crate::{Error, Result};

/// Depth of the x87 register stack.
pub const N_FLOAT_REGS: usize = 8;

/// A stack-relative x87 register: `st(0)` is the top of stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StReg(pub u8);

impl StReg {
    pub const TOP: StReg = StReg(0);

    #[must_use]
    pub const fn position(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "st({})", self.0)
    }
}

/// Abstract x87 stack at one program point.
///
/// Slots are stored bottom-up; position `p` (as used by `st(p)`) is counted
/// from the top. Occupied slots are contiguous and every virtual register
/// appears at most once.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct X87Stack {
    slots: [Option<VReg>; N_FLOAT_REGS],
    depth: u8,
}

impl X87Stack {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [None; N_FLOAT_REGS],
            depth: 0,
        }
    }

    /// Build a stack from registers listed top first.
    pub fn from_top(regs: &[VReg]) -> Result<Self> {
        let mut stack = Self::new();
        for &reg in regs.iter().rev() {
            stack.push(reg)?;
        }
        Ok(stack)
    }

    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth as usize
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.depth == 0
    }

    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.depth as usize == N_FLOAT_REGS
    }

    fn slot(&self, pos: usize) -> usize {
        self.depth() - 1 - pos
    }

    /// Register at `st(pos)`, if that position is occupied.
    #[must_use]
    pub fn get(&self, pos: usize) -> Option<VReg> {
        if pos < self.depth() {
            self.slots[self.slot(pos)]
        } else {
            None
        }
    }

    #[must_use]
    pub fn top(&self) -> Option<VReg> {
        self.get(0)
    }

    #[must_use]
    pub fn find(&self, reg: VReg) -> Option<usize> {
        self.iter().position(|r| r == reg)
    }

    #[must_use]
    pub fn contains(&self, reg: VReg) -> bool {
        self.find(reg).is_some()
    }

    pub fn position_of(&self, reg: VReg) -> Result<usize> {
        self.find(reg).ok_or(Error::NotOnStack(reg))
    }

    /// Registers from the top of stack downwards.
    pub fn iter(&self) -> impl Iterator<Item = VReg> + '_ {
        self.slots[..self.depth()].iter().rev().flatten().copied()
    }

    /// The set of registers currently on the stack.
    #[must_use]
    pub fn occupied(&self) -> LiveSet {
        self.iter().collect()
    }

    pub fn push(&mut self, reg: VReg) -> Result<()> {
        if self.contains(reg) {
            return Err(Error::AlreadyOnStack(reg));
        }
        if self.is_full() {
            return Err(Error::StackOverflow { vreg: reg });
        }
        self.slots[self.depth()] = Some(reg);
        self.depth += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<VReg> {
        if self.is_empty() {
            return Err(Error::StackUnderflow);
        }
        self.depth -= 1;
        self.slots[self.depth()]
            .take()
            .ok_or_else(|| Error::Internal("hole in the x87 stack".into()))
    }

    /// Replace the register at `st(pos)`.
    pub fn set(&mut self, pos: usize, reg: VReg) -> Result<()> {
        if pos >= self.depth() {
            return Err(Error::Internal(format!(
                "st({pos}) is beyond the stack depth {}",
                self.depth
            )));
        }
        if let Some(other) = self.find(reg)
            && other != pos
        {
            return Err(Error::AlreadyOnStack(reg));
        }
        let slot = self.slot(pos);
        self.slots[slot] = Some(reg);
        Ok(())
    }

    /// `fxch st(pos)`: swap the top of stack with `st(pos)`.
    pub fn exchange(&mut self, pos: usize) -> Result<()> {
        if pos >= self.depth() {
            return Err(Error::StackUnderflow);
        }
        let (top, other) = (self.slot(0), self.slot(pos));
        self.slots.swap(top, other);
        Ok(())
    }

    /// `fld st(pos)`: push a copy of `st(pos)`, named `copy`.
    pub fn duplicate(&mut self, pos: usize, copy: VReg) -> Result<()> {
        if pos >= self.depth() {
            return Err(Error::StackUnderflow);
        }
        self.push(copy)
    }

    /// `fstp st(pos)`: move the top into `st(pos)` and pop, discarding the
    /// register previously at `st(pos)`.
    pub fn pop_into(&mut self, pos: usize) -> Result<VReg> {
        if pos >= self.depth() {
            return Err(Error::StackUnderflow);
        }
        let killed = self.get(pos).ok_or(Error::StackUnderflow)?;
        if pos != 0 {
            let top = self.get(0).ok_or(Error::StackUnderflow)?;
            let slot = self.slot(pos);
            self.slots[slot] = Some(top);
        }
        self.pop()?;
        Ok(killed)
    }
}

impl fmt::Debug for X87Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for X87Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (pos, reg) in self.iter().enumerate() {
            if pos > 0 {
                f.write_str(" ")?;
            }
            write!(f, "st{pos}={reg}")?;
        }
        f.write_str("]")
    }
}
