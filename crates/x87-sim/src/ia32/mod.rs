// ia32 backend: register classes, the instruction set and its x87
// simulation handlers.
//
// - `opcode`: virtual and real opcodes
// - `inst`: the instruction type and its builders
// - `display`: Intel-syntax listing
// - `sim`: `X87Target` implementation, handlers and the process-wide registry

mod display;
mod inst;
mod opcode;
mod sim;

pub use inst::{CondCode, Inst, MemOperand};
pub use opcode::Opcode;
pub use sim::{
    Ia32Target, init_x87, prepare_x87_callbacks, prepare_x87_callbacks_ia32, simulate,
};

use crate::ir::{Reg, RegClass};

pub const GP_CLASS: RegClass = RegClass {
    id: 0,
    name: "gp",
    n_regs: 8,
};

/// The flat floating-point class the allocator assigns; simulated onto the
/// x87 stack.
pub const FP_CLASS: RegClass = RegClass {
    id: 1,
    name: "vf",
    n_regs: 8,
};

#[must_use]
pub const fn gp(index: u8) -> Reg {
    Reg::new(GP_CLASS, index)
}

#[must_use]
pub const fn vf(index: u8) -> Reg {
    Reg::new(FP_CLASS, index)
}
