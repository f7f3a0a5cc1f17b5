// Simulation primitives shared by every backend.
//
// Backend handlers call these with the operand positions of their own
// instruction layout and then switch the instruction to its real opcode.
// Liveness decides what an instruction may destroy: an operand still live
// after the instruction is preserved (duplicated first when needed), a dead
// one is consumed by overwriting or popping it.

use super::liveness::LiveSet;
use super::registry::SimOutcome;
use super::stack::{StReg, X87Stack};
use super::state::{Placement, X87State};
use super::target::{X87Attr, X87Target};
use crate::ir::{MachineInst, VReg};
use crate::{Error, Result};

fn fp_operand<T: X87Target>(target: &T, inst: &T::Inst, pos: usize) -> Result<VReg> {
    target.fp_input(inst, pos).ok_or_else(|| {
        Error::Internal(format!("operand {pos} of `{inst}` is not an x87 register"))
    })
}

fn fp_result<T: X87Target>(target: &T, inst: &T::Inst, pos: usize) -> Result<VReg> {
    target
        .fp_outputs(inst)
        .get(pos)
        .copied()
        .ok_or_else(|| Error::Internal(format!("result {pos} of `{inst}` is not an x87 register")))
}

fn set_attr<T: X87Target>(target: &T, inst: &mut T::Inst, attr: X87Attr) -> Result<()> {
    match target.x87_attr(inst) {
        Some(slot) => {
            *slot = attr;
            Ok(())
        }
        None => Err(Error::Internal(format!("`{inst}` has no x87 attributes"))),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn st(pos: usize) -> StReg {
    StReg(pos as u8)
}

/// Push a value on the x87 stack.
pub fn x87_push<T: X87Target>(state: &mut X87State<'_, T>, value: VReg) -> Result<()> {
    state.push(value)
}

/// A load: `value` materialises at the top of stack.
pub fn sim_load<T: X87Target>(
    state: &mut X87State<'_, T>,
    inst: &mut T::Inst,
    value: VReg,
) -> Result<()> {
    x87_push(state, value)?;
    set_attr(state.target(), inst, X87Attr::default())
}

/// A store of operand `val_pos`. Stores only read the top of stack.
///
/// `store_bits` is the widest access the non-popping form supports; wider
/// stores (80-bit `fst`, 64-bit `fist`) only exist as `...p`, so a value that
/// stays live is duplicated first. With all eight slots taken the value is
/// stored with pop and reloaded from memory, when the target can do so.
pub fn sim_store<T: X87Target>(
    state: &mut X87State<'_, T>,
    inst: &mut T::Inst,
    val_pos: usize,
    store_bits: u32,
) -> Result<()> {
    let target = state.target();
    let value = fp_operand(target, inst, val_pos)?;
    state.bring_to_top(value)?;

    let width = inst.mem_bits().unwrap_or(store_bits);
    let pop = if !state.is_live_after(value) {
        state.pop()?;
        true
    } else if width > store_bits {
        if state.stack().is_full() {
            state.pop()?;
            state.reload_after(inst, value)?;
        } else {
            state.duplicate_top_transient()?;
        }
        true
    } else {
        false
    };

    set_attr(
        target,
        inst,
        X87Attr {
            pop,
            ..X87Attr::default()
        },
    )
}

/// A store that always pops (e.g. `fisttp`). A value that stays live is
/// duplicated so the pop only removes the copy.
pub fn sim_store_pop<T: X87Target>(
    state: &mut X87State<'_, T>,
    inst: &mut T::Inst,
    val_pos: usize,
) -> Result<()> {
    let target = state.target();
    let value = fp_operand(target, inst, val_pos)?;
    state.bring_to_top(value)?;

    if state.is_live_after(value) {
        state.duplicate_top_transient()?;
    } else {
        state.pop()?;
    }

    set_attr(
        target,
        inst,
        X87Attr {
            pop: true,
            ..X87Attr::default()
        },
    )
}

/// A return. The n-th floating-point operand must be in `st(n)`; every other
/// entry is freed first. Returned values leave the stack with the function.
pub fn sim_ret<T: X87Target>(state: &mut X87State<'_, T>, inst: &mut T::Inst) -> Result<()> {
    let results = state.target().fp_inputs(inst);
    for &reg in &results {
        state.position_of(reg)?;
    }
    let returned: LiveSet = results.iter().copied().collect();
    if returned.len() != results.len() {
        return Err(Error::Internal(format!(
            "`{inst}` returns the same x87 register twice"
        )));
    }

    state.kill_dead(returned, Placement::Before)?;
    let wanted = X87Stack::from_top(&results)?;
    state.permute_to(&wanted)?;

    for _ in &results {
        state.pop()?;
    }
    Ok(())
}

/// A binary operation `out = op1 op op2`, with `op2` either an x87 register
/// or a memory operand.
///
/// One operand must be at the top of stack and the result replaces one of
/// the operand slots. When both operands stay live, op1 is duplicated and the
/// copy becomes the result. When neither is at the top, op1 is exchanged up.
pub fn sim_binop<T: X87Target>(
    state: &mut X87State<'_, T>,
    inst: &mut T::Inst,
    commutative: bool,
) -> Result<()> {
    let target = state.target();
    let op1 = fp_operand(target, inst, 0)?;
    let out = fp_result(target, inst, 0)?;
    // A register reused for the result is dead as an operand.
    let live = state.live_after().without(out);
    let op1_live = live.contains(op1);

    let Some(op2) = target.fp_input(inst, 1) else {
        if op1_live {
            state.duplicate(op1, out)?;
        } else {
            state.bring_to_top(op1)?;
            state.stack_mut().set(0, out)?;
        }
        return set_attr(target, inst, X87Attr::default());
    };
    let op2_live = live.contains(op2);

    if op1_live && op2_live {
        state.duplicate(op1, out)?;
        let src = state.position_of(op2)?;
        return set_attr(
            target,
            inst,
            X87Attr {
                reg: Some(st(src)),
                ..X87Attr::default()
            },
        );
    }

    if op1 == op2 {
        state.bring_to_top(op1)?;
        state.stack_mut().set(0, out)?;
        return set_attr(
            target,
            inst,
            X87Attr {
                reg: Some(StReg::TOP),
                ..X87Attr::default()
            },
        );
    }

    if state.position_of(op1)? != 0 && state.position_of(op2)? != 0 {
        state.bring_to_top(op1)?;
    }
    let p1 = state.position_of(op1)?;
    let p2 = state.position_of(op2)?;

    // (slot receiving the result, whether that slot held op2, pop)
    let (dst, dst_holds_op2, pop) = match (op1_live, op2_live) {
        (true, _) => (p2, true, false),
        (false, true) => (p1, false, false),
        // Both die: write into the lower slot and pop the top.
        (false, false) if p1 == 0 => (p2, true, true),
        (false, false) => (p1, false, true),
    };

    if pop {
        state.pop()?;
        state.stack_mut().set(dst - 1, out)?;
    } else {
        state.stack_mut().set(dst, out)?;
    }

    set_attr(
        target,
        inst,
        X87Attr {
            reg: Some(st(p1.max(p2))),
            res_in_reg: dst != 0,
            pop,
            reverse: !commutative && dst_holds_op2,
        },
    )
}

/// A unary operation on the top of stack (`fchs`, `fabs`, `fsqrt`).
pub fn sim_unop<T: X87Target>(state: &mut X87State<'_, T>, inst: &mut T::Inst) -> Result<()> {
    let target = state.target();
    let op = fp_operand(target, inst, 0)?;
    let out = fp_result(target, inst, 0)?;

    if state.live_after().without(out).contains(op) {
        state.duplicate(op, out)?;
    } else {
        state.bring_to_top(op)?;
        state.stack_mut().set(0, out)?;
    }
    set_attr(target, inst, X87Attr::default())
}

/// A compare of two x87 registers into the flags (`fucomi`).
///
/// The compare reads `st(0)` and `st(i)`; `reverse` records that `st(0)` is
/// the second operand, so flag consumers must swap their condition. A dead
/// top operand is popped by the compare itself; a dead lower operand is
/// freed afterwards by the walker.
pub fn sim_fucom<T: X87Target>(state: &mut X87State<'_, T>, inst: &mut T::Inst) -> Result<()> {
    let target = state.target();
    let op1 = fp_operand(target, inst, 0)?;
    let op2 = fp_operand(target, inst, 1)?;
    let live = state.live_after();
    let op1_live = live.contains(op1);
    let op2_live = live.contains(op2);

    if op1 == op2 {
        state.bring_to_top(op1)?;
        if !op1_live {
            state.pop()?;
        }
        return set_attr(
            target,
            inst,
            X87Attr {
                reg: Some(StReg::TOP),
                pop: !op1_live,
                ..X87Attr::default()
            },
        );
    }

    if state.position_of(op1)? != 0 && state.position_of(op2)? != 0 {
        // Prefer a dying operand on top so the compare pops it.
        let up = if !op1_live || op2_live { op1 } else { op2 };
        state.bring_to_top(up)?;
    }
    let p1 = state.position_of(op1)?;
    let p2 = state.position_of(op2)?;
    let top_is_op1 = p1 == 0;
    let pop = if top_is_op1 { !op1_live } else { !op2_live };
    if pop {
        state.pop()?;
    }

    set_attr(
        target,
        inst,
        X87Attr {
            reg: Some(st(p1.max(p2))),
            res_in_reg: false,
            pop,
            reverse: !top_is_op1,
        },
    )
}

/// A register-to-register copy. A dying source is simply renamed, a live one
/// is duplicated; either way the copy itself disappears.
pub fn sim_copy<T: X87Target>(
    state: &mut X87State<'_, T>,
    inst: &mut T::Inst,
) -> Result<SimOutcome> {
    let target = state.target();
    let src = fp_operand(target, inst, 0)?;
    let dst = fp_result(target, inst, 0)?;

    if src != dst {
        if state.live_after().without(dst).contains(src) {
            state.duplicate(src, dst)?;
        } else {
            let pos = state.position_of(src)?;
            state.stack_mut().set(pos, dst)?;
        }
    }
    Ok(SimOutcome::Removed)
}

/// A keep-alive. Emits no code; operands that die here are freed by the
/// walker's dead-entry sweep.
pub fn sim_keep<T: X87Target>(
    state: &mut X87State<'_, T>,
    inst: &mut T::Inst,
) -> Result<SimOutcome> {
    for reg in state.target().fp_inputs(inst) {
        state.position_of(reg)?;
    }
    Ok(SimOutcome::Removed)
}

/// A call. x87 registers are caller-saved, so the stack must be empty;
/// floating-point results come back with the first one at the top.
pub fn sim_call<T: X87Target>(state: &mut X87State<'_, T>, inst: &mut T::Inst) -> Result<()> {
    if !state.stack().is_empty() {
        return Err(Error::LiveAcrossCall {
            depth: state.stack().depth(),
        });
    }
    for reg in state.target().fp_outputs(inst).into_iter().rev() {
        state.push(reg)?;
    }
    Ok(())
}
