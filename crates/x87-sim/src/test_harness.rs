//! Test harness for x87-sim unit and integration tests
//!
//! This module provides builders for ia32 functions, listing helpers and a
//! symbolic replay machine. It is only available when running tests or when
//! the `test-harness` feature is enabled.
//!
//! The replay machine executes rewritten stack code on an 8-slot symbolic
//! stack and records every observable effect (stores, compares, returns).
//! [`evaluate`] computes the same effects from the virtual-register program,
//! so comparing the two checks that simulation preserved the program's
//! meaning.
//!
//! # Example
//!
//! ```rust
//! use x87_sim::ia32::{Inst, Opcode, vf};
//! use x87_sim::test_harness::*;
//!
//! let mut func = straight_line(vec![
//!     Inst::fld(mem(0), vf(0)),
//!     Inst::fld(mem(8), vf(1)),
//!     Inst::binop(Opcode::VFadd, vf(0), vf(1), vf(2)),
//!     Inst::ret([vf(2)]),
//! ]);
//! let expected = evaluate(&func, &[func.entry]).unwrap();
//!
//! simulate(&mut func).unwrap();
//! assert_no_virtual(&func);
//! let replay = Replay::run(&func, &[func.entry]).unwrap();
//! assert_eq!(replay.effects, expected);
//! ```

#![allow(
    clippy::must_use_candidate,
    clippy::manual_assert,
    clippy::missing_panics_doc,
    clippy::uninlined_format_args
)]

use std::collections::HashMap;

use crate::ia32::{self, FP_CLASS, Inst, MemOperand, Opcode, gp};
use crate::ir::{BlockId, Function, MachineInst};
use crate::x87::{N_FLOAT_REGS, StReg};
use crate::{Error, Result};

/// A 64-bit memory slot at `[%gp0 + offset]`.
pub fn mem(offset: i32) -> MemOperand {
    MemOperand::new(gp(0), offset, 64)
}

/// A memory slot of the given width at `[%gp0 + offset]`.
pub fn mem_bits(offset: i32, bits: u32) -> MemOperand {
    MemOperand::new(gp(0), offset, bits)
}

/// A single-block function.
pub fn straight_line(insts: Vec<Inst>) -> Function<Inst> {
    let mut func = Function::new("test");
    for inst in insts {
        func.push(func.entry, inst);
    }
    func
}

/// Simulate `func` with the process-wide ia32 registry.
pub fn simulate(func: &mut Function<Inst>) -> Result<()> {
    ia32::simulate(func)
}

/// Intel-syntax listing of one block.
pub fn block_listing(func: &Function<Inst>, block: BlockId) -> Vec<String> {
    func.block(block)
        .insts
        .iter()
        .map(ToString::to_string)
        .collect()
}

/// Intel-syntax listing of the whole function, block by block.
pub fn listing(func: &Function<Inst>) -> Vec<String> {
    func.instructions().map(ToString::to_string).collect()
}

/// Count instructions with a specific opcode
pub fn count_opcode(func: &Function<Inst>, opcode: Opcode) -> usize {
    func.instructions().filter(|i| i.op == opcode).count()
}

/// Count instructions with a specific opcode in one block
pub fn count_opcode_in(func: &Function<Inst>, block: BlockId, opcode: Opcode) -> usize {
    func.block(block)
        .insts
        .iter()
        .filter(|i| i.op == opcode)
        .count()
}

/// Check if the function contains a specific opcode
pub fn has_opcode(func: &Function<Inst>, opcode: Opcode) -> bool {
    count_opcode(func, opcode) > 0
}

/// Assert that no virtual instruction survived simulation
pub fn assert_no_virtual(func: &Function<Inst>) {
    if let Some(inst) = func.instructions().find(|i| i.op.is_virtual()) {
        panic!("virtual instruction `{}` survived simulation:\n{}", inst, func);
    }
}

/// Assert that a block's listing equals `expected` exactly
pub fn assert_block_listing(func: &Function<Inst>, block: BlockId, expected: &[&str]) {
    let actual = block_listing(func, block);
    if actual != expected {
        panic!(
            "Listing of {} does not match\nExpected:\n  {}\nActual:\n  {}",
            block,
            expected.join("\n  "),
            actual.join("\n  ")
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    pub fn from_opcode(op: Opcode) -> Option<Self> {
        match op {
            Opcode::VFadd | Opcode::Fadd => Some(Self::Add),
            Opcode::VFsub | Opcode::Fsub => Some(Self::Sub),
            Opcode::VFmul | Opcode::Fmul => Some(Self::Mul),
            Opcode::VFdiv | Opcode::Fdiv => Some(Self::Div),
            _ => None,
        }
    }

    pub const fn is_commutative(self) -> bool {
        matches!(self, Self::Add | Self::Mul)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UnOp {
    Chs,
    Abs,
    Sqrt,
}

impl UnOp {
    pub fn from_opcode(op: Opcode) -> Option<Self> {
        match op {
            Opcode::VFchs | Opcode::Fchs => Some(Self::Chs),
            Opcode::VFabs | Opcode::Fabs => Some(Self::Abs),
            Opcode::VFsqrt | Opcode::Fsqrt => Some(Self::Sqrt),
            _ => None,
        }
    }
}

/// A symbolic floating-point value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Expr {
    Load { offset: i32, int: bool },
    Zero,
    One,
    CallResult { callee: String, index: usize },
    Bin(BinOp, Box<Expr>, Box<Expr>),
    Un(UnOp, Box<Expr>),
    ToInt(Box<Expr>),
}

impl Expr {
    /// `a op b`, with the operands of commutative operations in a canonical
    /// order so `a + b` and `b + a` compare equal.
    pub fn bin(op: BinOp, a: Expr, b: Expr) -> Self {
        if op.is_commutative() && b < a {
            Expr::Bin(op, Box::new(b), Box::new(a))
        } else {
            Expr::Bin(op, Box::new(a), Box::new(b))
        }
    }

    pub fn un(op: UnOp, a: Expr) -> Self {
        Expr::Un(op, Box::new(a))
    }
}

/// An observable effect of running a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Store { offset: i32, bits: u32, value: Expr },
    Compare(Expr, Expr),
    Return(Vec<Expr>),
}

/// Values written by earlier stores, keyed by offset from `%gp0`. A load
/// from a written slot reads the stored value back.
#[derive(Debug, Clone, Default)]
struct Memory(HashMap<i32, Expr>);

impl Memory {
    fn read(&self, value: Expr) -> Expr {
        if let Expr::Load { offset, .. } = value
            && let Some(stored) = self.0.get(&offset)
        {
            return stored.clone();
        }
        value
    }

    fn record(&mut self, effect: &Effect) {
        if let Effect::Store { offset, value, .. } = effect {
            self.0.insert(*offset, value.clone());
        }
    }
}

fn replay_error(msg: impl Into<String>) -> Error {
    Error::Internal(msg.into())
}

fn load_expr(inst: &Inst) -> Result<Expr> {
    match inst.op {
        Opcode::VFld | Opcode::Fld | Opcode::VFild | Opcode::Fild => {
            let mem = inst
                .mem
                .ok_or_else(|| replay_error(format!("`{inst}` has no memory operand")))?;
            Ok(Expr::Load {
                offset: mem.offset,
                int: matches!(inst.op, Opcode::VFild | Opcode::Fild),
            })
        }
        Opcode::VFldz | Opcode::Fldz => Ok(Expr::Zero),
        Opcode::VFld1 | Opcode::Fld1 => Ok(Expr::One),
        _ => Err(replay_error(format!("`{inst}` is not a load"))),
    }
}

fn store_effect(inst: &Inst, value: Expr) -> Result<Effect> {
    let mem = inst
        .mem
        .ok_or_else(|| replay_error(format!("`{inst}` has no memory operand")))?;
    let value = match inst.op {
        Opcode::VFist | Opcode::Fist | Opcode::VFisttp | Opcode::Fisttp => {
            Expr::ToInt(Box::new(value))
        }
        _ => value,
    };
    Ok(Effect::Store {
        offset: mem.offset,
        bits: mem.bits,
        value,
    })
}

fn mem_operand(inst: &Inst) -> Result<Expr> {
    let mem = inst
        .mem
        .ok_or_else(|| replay_error(format!("`{inst}` has no memory operand")))?;
    Ok(Expr::Load {
        offset: mem.offset,
        int: false,
    })
}

/// Evaluate the virtual-register program along `path`, before simulation.
pub fn evaluate(func: &Function<Inst>, path: &[BlockId]) -> Result<Vec<Effect>> {
    interpret(func, path).map(|(_, effects)| effects)
}

/// Value of every x87 register after running the virtual program along
/// `path`, indexed by register number.
pub fn evaluate_registers(func: &Function<Inst>, path: &[BlockId]) -> Result<Vec<Option<Expr>>> {
    interpret(func, path).map(|(regs, _)| regs.into())
}

type Registers = [Option<Expr>; N_FLOAT_REGS];

fn interpret(func: &Function<Inst>, path: &[BlockId]) -> Result<(Registers, Vec<Effect>)> {
    let mut regs: Registers = std::array::from_fn(|_| None);
    let mut effects = Vec::new();
    let mut memory = Memory::default();

    let read = |regs: &[Option<Expr>; N_FLOAT_REGS], idx: usize| -> Result<Expr> {
        regs[idx]
            .clone()
            .ok_or_else(|| replay_error(format!("%vf{idx} read before it is written")))
    };

    for &block in path {
        for inst in &func.block(block).insts {
            let ins: Vec<usize> = inst.fp_ins().map(|r| r.index as usize).collect();
            let outs: Vec<usize> = inst
                .outs
                .iter()
                .filter(|r| r.class == FP_CLASS)
                .map(|r| r.index as usize)
                .collect();

            match inst.op {
                Opcode::VFld | Opcode::VFild | Opcode::VFldz | Opcode::VFld1 => {
                    regs[outs[0]] = Some(memory.read(load_expr(inst)?));
                }
                Opcode::VFst | Opcode::VFist | Opcode::VFisttp => {
                    let effect = store_effect(inst, read(&regs, ins[0])?)?;
                    memory.record(&effect);
                    effects.push(effect);
                }
                Opcode::VFadd | Opcode::VFsub | Opcode::VFmul | Opcode::VFdiv => {
                    let op = BinOp::from_opcode(inst.op)
                        .ok_or_else(|| replay_error("not arithmetic"))?;
                    let a = read(&regs, ins[0])?;
                    let b = match ins.get(1) {
                        Some(&idx) => read(&regs, idx)?,
                        None => memory.read(mem_operand(inst)?),
                    };
                    regs[outs[0]] = Some(Expr::bin(op, a, b));
                }
                Opcode::VFchs | Opcode::VFabs | Opcode::VFsqrt => {
                    let op = UnOp::from_opcode(inst.op)
                        .ok_or_else(|| replay_error("not a unary operation"))?;
                    regs[outs[0]] = Some(Expr::un(op, read(&regs, ins[0])?));
                }
                Opcode::VFucomi => {
                    effects.push(Effect::Compare(read(&regs, ins[0])?, read(&regs, ins[1])?));
                }
                Opcode::VCopy => regs[outs[0]] = Some(read(&regs, ins[0])?),
                Opcode::VKeep | Opcode::Jmp | Opcode::Jcc => {}
                Opcode::VCall => {
                    let callee = inst.callee.clone().unwrap_or_default();
                    for (index, &out) in outs.iter().enumerate() {
                        regs[out] = Some(Expr::CallResult {
                            callee: callee.clone(),
                            index,
                        });
                    }
                }
                Opcode::VRet => {
                    let values = ins
                        .iter()
                        .map(|&idx| read(&regs, idx))
                        .collect::<Result<Vec<_>>>()?;
                    effects.push(Effect::Return(values));
                }
                _ => {
                    return Err(replay_error(format!(
                        "`{inst}` is not a virtual instruction"
                    )));
                }
            }
        }
    }
    Ok((regs, effects))
}

/// Symbolic x87 machine executing rewritten code.
#[derive(Debug, Clone, Default)]
pub struct Replay {
    /// Bottom first; `st(0)` is the last element.
    stack: Vec<Expr>,
    pub effects: Vec<Effect>,
    /// Deepest stack seen.
    pub max_depth: usize,
    memory: Memory,
}

impl Replay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute the blocks of `path` in order, starting from an empty stack.
    pub fn run(func: &Function<Inst>, path: &[BlockId]) -> Result<Self> {
        let mut replay = Self::new();
        for &block in path {
            for (idx, inst) in func.block(block).insts.iter().enumerate() {
                replay
                    .step(inst)
                    .map_err(|e| replay_error(format!("{block}, instruction {idx} `{inst}`: {e}")))?;
            }
        }
        Ok(replay)
    }

    /// Current stack, top first.
    pub fn stack(&self) -> Vec<Expr> {
        self.stack.iter().rev().cloned().collect()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn slot(&self, reg: StReg) -> Result<usize> {
        let pos = reg.position();
        if pos >= self.stack.len() {
            return Err(replay_error(format!(
                "{reg} is empty at depth {}",
                self.stack.len()
            )));
        }
        Ok(self.stack.len() - 1 - pos)
    }

    fn get(&self, reg: StReg) -> Result<Expr> {
        Ok(self.stack[self.slot(reg)?].clone())
    }

    fn set(&mut self, reg: StReg, value: Expr) -> Result<()> {
        let slot = self.slot(reg)?;
        self.stack[slot] = value;
        Ok(())
    }

    fn push(&mut self, value: Expr) -> Result<()> {
        if self.stack.len() == N_FLOAT_REGS {
            return Err(replay_error("x87 stack overflow"));
        }
        self.stack.push(value);
        self.max_depth = self.max_depth.max(self.stack.len());
        Ok(())
    }

    fn pop(&mut self) -> Result<Expr> {
        self.stack
            .pop()
            .ok_or_else(|| replay_error("x87 stack underflow"))
    }

    /// Execute one real instruction.
    pub fn step(&mut self, inst: &Inst) -> Result<()> {
        let attr = inst.x87;
        let reg = attr.reg.unwrap_or(StReg::TOP);
        match inst.op {
            Opcode::Fld | Opcode::Fild | Opcode::Fldz | Opcode::Fld1 => {
                let value = self.memory.read(load_expr(inst)?);
                self.push(value)?;
            }
            Opcode::Fst | Opcode::Fist | Opcode::Fisttp => {
                let effect = store_effect(inst, self.get(StReg::TOP)?)?;
                self.memory.record(&effect);
                self.effects.push(effect);
                if attr.pop || inst.op == Opcode::Fisttp {
                    self.pop()?;
                }
            }
            Opcode::Fadd | Opcode::Fsub | Opcode::Fmul | Opcode::Fdiv => {
                let op = BinOp::from_opcode(inst.op)
                    .ok_or_else(|| replay_error("not arithmetic"))?;
                let (dst, src) = match attr.reg {
                    None => (StReg::TOP, None),
                    Some(reg) if attr.res_in_reg => (reg, Some(StReg::TOP)),
                    Some(reg) => (StReg::TOP, Some(reg)),
                };
                let dst_value = self.get(dst)?;
                let src_value = match src {
                    Some(src) => self.get(src)?,
                    None => self.memory.read(mem_operand(inst)?),
                };
                let value = if attr.reverse {
                    Expr::bin(op, src_value, dst_value)
                } else {
                    Expr::bin(op, dst_value, src_value)
                };
                self.set(dst, value)?;
                if attr.pop {
                    self.pop()?;
                }
            }
            Opcode::Fchs | Opcode::Fabs | Opcode::Fsqrt => {
                let op = UnOp::from_opcode(inst.op)
                    .ok_or_else(|| replay_error("not a unary operation"))?;
                let value = Expr::un(op, self.get(StReg::TOP)?);
                self.set(StReg::TOP, value)?;
            }
            Opcode::Fucomi => {
                let top = self.get(StReg::TOP)?;
                let other = self.get(reg)?;
                self.effects.push(if attr.reverse {
                    Effect::Compare(other, top)
                } else {
                    Effect::Compare(top, other)
                });
                if attr.pop {
                    self.pop()?;
                }
            }
            Opcode::Fdup => {
                let value = self.get(reg)?;
                self.push(value)?;
            }
            Opcode::Fxch => {
                let (a, b) = (self.slot(StReg::TOP)?, self.slot(reg)?);
                self.stack.swap(a, b);
            }
            Opcode::Fpop => {
                let top = self.get(StReg::TOP)?;
                self.set(reg, top)?;
                self.pop()?;
            }
            Opcode::Ffreep => {
                if reg != StReg::TOP {
                    return Err(replay_error("ffreep below the top leaves a hole"));
                }
                self.pop()?;
            }
            Opcode::Call => {
                if !self.stack.is_empty() {
                    return Err(replay_error(format!(
                        "{} value(s) on the x87 stack at a call",
                        self.stack.len()
                    )));
                }
                let callee = inst.callee.clone().unwrap_or_default();
                let n = inst.outs.iter().filter(|r| r.class == FP_CLASS).count();
                for index in (0..n).rev() {
                    self.push(Expr::CallResult {
                        callee: callee.clone(),
                        index,
                    })?;
                }
            }
            Opcode::Ret => {
                let n = inst.fp_ins().count();
                if self.stack.len() != n {
                    return Err(replay_error(format!(
                        "{} value(s) on the x87 stack at a return of {n}",
                        self.stack.len()
                    )));
                }
                self.effects.push(Effect::Return(self.stack()));
                self.stack.clear();
            }
            Opcode::Jmp | Opcode::Jcc => {}
            _ => {
                return Err(replay_error(format!(
                    "virtual instruction `{inst}` survived simulation"
                )));
            }
        }
        Ok(())
    }
}

/// Whether any instruction of `func` is still in virtual form.
pub fn has_virtual(func: &Function<Inst>) -> bool {
    func.instructions().any(|i| i.opcode().is_virtual())
}
