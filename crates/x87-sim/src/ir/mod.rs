//! Register-allocated machine graph consumed by the x87 simulator.
//!
//! The graph is deliberately small: blocks hold instruction vectors in program
//! order, predecessor lists keep their input order (the join canonicalisation
//! depends on it) and instructions are any type implementing [`MachineInst`].

mod display;
mod order;

use std::fmt;

pub use order::reverse_postorder;

/// Identifies a basic block inside a [`Function`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A register class of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegClass {
    pub id: u8,
    /// Prefix used when printing registers of this class.
    pub name: &'static str,
    pub n_regs: u8,
}

/// An allocated register: a class plus an index inside that class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg {
    pub class: RegClass,
    pub index: u8,
}

impl Reg {
    #[must_use]
    pub const fn new(class: RegClass, index: u8) -> Self {
        Self { class, index }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}{}", self.class.name, self.index)
    }
}

/// A virtual floating-point register, i.e. the index the flat allocator
/// assigned inside the x87 register class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(pub u8);

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vf{}", self.0)
    }
}

/// Source location carried from the front end into every instruction,
/// including the fixups the simulator inserts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DebugInfo {
    pub line: Option<u32>,
}

impl DebugInfo {
    #[must_use]
    pub const fn line(line: u32) -> Self {
        Self { line: Some(line) }
    }
}

/// An opcode enumeration that maps densely onto `0..COUNT`.
///
/// The simulator keeps its handler table as a plain vector indexed by
/// [`DenseOpcode::index`].
pub trait DenseOpcode: Copy + Eq + fmt::Debug {
    const COUNT: usize;

    fn index(self) -> usize;
}

/// What the simulator needs to know about a machine instruction.
pub trait MachineInst: Clone + fmt::Debug + fmt::Display {
    type Opcode: DenseOpcode;

    fn opcode(&self) -> Self::Opcode;

    fn dbg_info(&self) -> DebugInfo;

    /// Register operands read by the instruction, in operand order.
    fn inputs(&self) -> &[Reg];

    /// Registers written by the instruction, in result order.
    fn outputs(&self) -> &[Reg];

    /// Branches and returns. Fixups appended to a block go before these.
    fn is_terminator(&self) -> bool;

    /// Width in bits of the memory access, if the instruction has one.
    fn mem_bits(&self) -> Option<u32> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct Block<I> {
    pub insts: Vec<I>,
    /// Predecessors in input order.
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
}

impl<I> Default for Block<I> {
    fn default() -> Self {
        Self {
            insts: Vec::new(),
            preds: Vec::new(),
            succs: Vec::new(),
        }
    }
}

impl<I: MachineInst> Block<I> {
    /// Index at which instructions appended to the end of the block must be
    /// inserted so they run before the trailing terminators.
    #[must_use]
    pub fn terminator_start(&self) -> usize {
        self.insts
            .iter()
            .rposition(|inst| !inst.is_terminator())
            .map_or(0, |idx| idx + 1)
    }
}

/// A function's control-flow graph.
#[derive(Debug, Clone)]
pub struct Function<I> {
    pub name: String,
    pub blocks: Vec<Block<I>>,
    pub entry: BlockId,
}

impl<I> Function<I> {
    /// Create a function containing only its (empty) entry block.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: vec![Block::default()],
            entry: BlockId(0),
        }
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::default());
        id
    }

    /// Add a control-flow edge. Predecessor order follows call order.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from.index()].succs.push(to);
        self.blocks[to.index()].preds.push(from);
    }

    pub fn push(&mut self, block: BlockId, inst: I) {
        self.blocks[block.index()].insts.push(inst);
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block<I> {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block<I> {
        &mut self.blocks[id.index()]
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + use<I> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    /// All instructions, block by block.
    pub fn instructions(&self) -> impl Iterator<Item = &I> {
        self.blocks.iter().flat_map(|b| b.insts.iter())
    }

    #[must_use]
    pub fn num_instructions(&self) -> usize {
        self.blocks.iter().map(|b| b.insts.len()).sum()
    }
}
