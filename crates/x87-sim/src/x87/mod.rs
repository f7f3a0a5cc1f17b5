// x87 stack simulator: rewrites virtual floating-point registers into
// stack-relative instructions.
//
// This module is organized into submodules:
// - `stack`: the abstract 8-slot register stack
// - `liveness`: x87 register liveness over the block graph
// - `target`: the instruction-set capability trait and stack attributes
// - `registry`: opcode -> handler table
// - `state`: per-block simulation state and fixup emission
// - `handlers`: simulation primitives shared by backends
// - `simulator`: the graph walker and join reconciliation

mod liveness;
mod registry;
mod simulator;
mod stack;
mod state;
mod target;

pub mod handlers;

pub use liveness::{LiveSet, Liveness};
pub use registry::{SimFn, SimOutcome, SimRegistry};
pub use simulator::simulate_graph;
pub use stack::{N_FLOAT_REGS, StReg, X87Stack};
pub use state::{Placement, X87State};
pub use target::{X87Attr, X87Target};
