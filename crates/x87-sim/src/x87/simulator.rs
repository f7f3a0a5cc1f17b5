// Graph walker: simulates every reachable block once, in reverse postorder,
// and inserts stack shuffles where control-flow edges disagree.
//
// A block's entry state is the end state of its first already-simulated
// predecessor (input order). Any other simulated predecessor is shuffled at
// its end to match. Back edges are handled when the loop latch finishes: its
// successor has been simulated already, so the latch adapts to it.

use super::liveness::Liveness;
use super::registry::{SimOutcome, SimRegistry};
use super::stack::{N_FLOAT_REGS, X87Stack};
use super::state::{Placement, X87State};
use super::target::X87Target;
use crate::ir::{BlockId, Function, MachineInst, reverse_postorder};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
enum BlockState {
    Unvisited,
    /// A predecessor has been simulated, so the entry state is known.
    StatePending,
    Simulated {
        begin: X87Stack,
        end: X87Stack,
    },
}

/// Rewrite every x87 instruction of `func` from virtual-register form into
/// stack form.
///
/// On success no opcode with a registered handler remains in the function,
/// every edge carries matching stack layouts and the stack never holds more
/// than eight values. On error the function is left partially rewritten and
/// must be discarded.
pub fn simulate_graph<T: X87Target>(
    func: &mut Function<T::Inst>,
    target: &T,
    registry: &SimRegistry<T>,
) -> Result<()> {
    check_registers(func, target)?;
    let liveness = Liveness::compute(func, target);
    let order = reverse_postorder(func);
    let mut states = vec![BlockState::Unvisited; func.blocks.len()];
    let before = func.num_instructions();

    for &block in &order {
        let begin = entry_state(func, target, &liveness, &mut states, block)?;
        let end = simulate_block(func, target, registry, &liveness, block, begin)?;
        states[block.index()] = BlockState::Simulated { begin, end };

        let succs = func.block(block).succs.clone();
        for succ in succs {
            match states[succ.index()] {
                BlockState::Unvisited => states[succ.index()] = BlockState::StatePending,
                BlockState::StatePending => {}
                BlockState::Simulated { begin: wanted, .. } => {
                    // Back edge: the successor's layout is fixed already.
                    let end = current_end(&states, block)?;
                    let end = reconcile(func, target, block, succ, end, &wanted)?;
                    set_end(&mut states, block, end);
                }
            }
        }
    }

    if order.len() != func.blocks.len() {
        tracing::warn!(
            function = %func.name,
            unreachable = func.blocks.len() - order.len(),
            "skipping unreachable blocks"
        );
    }
    tracing::debug!(
        function = %func.name,
        blocks = order.len(),
        before,
        after = func.num_instructions(),
        "x87 simulation done"
    );
    Ok(())
}

/// Pick the entry state of `block` and shuffle every other simulated
/// predecessor to it.
fn entry_state<T: X87Target>(
    func: &mut Function<T::Inst>,
    target: &T,
    liveness: &Liveness,
    states: &mut [BlockState],
    block: BlockId,
) -> Result<X87Stack> {
    if block == func.entry {
        // Loops back to the entry are reconciled as back edges.
        return Ok(X87Stack::new());
    }
    if !matches!(states[block.index()], BlockState::StatePending) {
        return Err(Error::Internal(format!(
            "{block} reached in reverse postorder before any predecessor"
        )));
    }

    let preds = func.block(block).preds.clone();
    let mut canonical: Option<(BlockId, X87Stack)> = None;
    for pred in preds {
        let BlockState::Simulated { end, .. } = states[pred.index()] else {
            continue;
        };
        match canonical {
            None => canonical = Some((pred, end)),
            Some((first, wanted)) => {
                let end = reconcile(func, target, pred, block, end, &wanted)
                    .map_err(|e| blame_critical_source(func, liveness, first, block, &wanted, e))?;
                set_end(states, pred, end);
            }
        }
    }
    canonical
        .map(|(_, state)| state)
        .ok_or_else(|| Error::Internal(format!("{block} has no simulated predecessor")))
}

/// The canonical predecessor may still hold values that only its other
/// successors read. When that is what breaks the join, report its edge.
fn blame_critical_source<I: MachineInst>(
    func: &Function<I>,
    liveness: &Liveness,
    first: BlockId,
    block: BlockId,
    wanted: &X87Stack,
    err: Error,
) -> Error {
    let extra = wanted.occupied().difference(liveness.live_in(block));
    let shared = func.block(first).succs.iter().any(|&s| s != block);
    match err {
        Error::UnreconcilableJoin { .. } if shared && !extra.is_empty() => Error::CriticalEdge {
            from: first,
            to: block,
        },
        other => other,
    }
}

/// Every x87-class operand must name one of the eight stack registers.
fn check_registers<T: X87Target>(func: &Function<T::Inst>, target: &T) -> Result<()> {
    let class = target.fp_class();
    for block in func.block_ids() {
        for (idx, inst) in func.block(block).insts.iter().enumerate() {
            let stray = inst
                .inputs()
                .iter()
                .chain(inst.outputs())
                .find(|r| r.class == class && usize::from(r.index) >= N_FLOAT_REGS);
            if let Some(reg) = stray {
                return Err(Error::Internal(format!(
                    "{reg} is outside the {} register class",
                    class.name
                ))
                .at(block, idx, inst));
            }
        }
    }
    Ok(())
}

fn current_end(states: &[BlockState], block: BlockId) -> Result<X87Stack> {
    match states[block.index()] {
        BlockState::Simulated { end, .. } => Ok(end),
        _ => Err(Error::Internal(format!("{block} has not been simulated"))),
    }
}

fn set_end(states: &mut [BlockState], block: BlockId, new_end: X87Stack) {
    if let BlockState::Simulated { end, .. } = &mut states[block.index()] {
        *end = new_end;
    }
}

/// Make the end of `pred` match `wanted`, the entry layout of `succ`, by
/// inserting exchanges and pops before `pred`'s terminators.
fn reconcile<T: X87Target>(
    func: &mut Function<T::Inst>,
    target: &T,
    pred: BlockId,
    succ: BlockId,
    end: X87Stack,
    wanted: &X87Stack,
) -> Result<X87Stack> {
    if end == *wanted {
        return Ok(end);
    }
    // Code added here would also run on the other outgoing edges.
    if func.block(pred).succs.iter().any(|&s| s != succ) {
        return Err(Error::CriticalEdge {
            from: pred,
            to: succ,
        });
    }

    let block = func.block_mut(pred);
    let at = block.terminator_start();
    let dbg = block
        .insts
        .get(at)
        .or_else(|| block.insts.last())
        .map(MachineInst::dbg_info)
        .unwrap_or_default();

    let mut state = X87State::new(target, pred, end);
    state.begin_instruction(dbg, wanted.occupied());
    state.shuffle_to(wanted, succ)?;
    let (fixups, _) = state.take_fixups();
    tracing::trace!(%pred, %succ, from = %end, to = %wanted, fixups = fixups.len(), "x87 shuffle");
    block.insts.splice(at..at, fixups);
    Ok(state.into_stack())
}

fn simulate_block<T: X87Target>(
    func: &mut Function<T::Inst>,
    target: &T,
    registry: &SimRegistry<T>,
    liveness: &Liveness,
    block: BlockId,
    begin: X87Stack,
) -> Result<X87Stack> {
    let live_after = liveness.live_after_each(func, target, block);
    let live_in = liveness.live_in(block);
    let insts = std::mem::take(&mut func.block_mut(block).insts);
    let mut out = Vec::with_capacity(insts.len());
    let mut state = X87State::new(target, block, begin);

    tracing::trace!(%block, entry = %begin, %live_in, "simulating block");

    // Values the first predecessor still carried but this block never reads.
    let dbg = insts.first().map(MachineInst::dbg_info).unwrap_or_default();
    state.begin_instruction(dbg, live_in);
    state
        .kill_dead(live_in, Placement::Before)
        .map_err(|e| e.at(block, 0, "block entry"))?;
    out.extend(state.take_fixups().0);

    for (idx, mut inst) in insts.into_iter().enumerate() {
        state.begin_instruction(inst.dbg_info(), live_after[idx]);
        let outcome = match registry.dispatch(&mut state, &mut inst) {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                out.push(inst);
                continue;
            }
            Err(e) => return Err(e.at(block, idx, &inst)),
        };
        // Operands that died here, and results nobody reads.
        state
            .kill_dead(live_after[idx], Placement::After)
            .map_err(|e| e.at(block, idx, &inst))?;

        let (before, after) = state.take_fixups();
        out.extend(before);
        if outcome == SimOutcome::Rewritten {
            out.push(inst);
        }
        out.extend(after);
    }

    func.block_mut(block).insts = out;
    Ok(state.into_stack())
}
