//! Property-based tests for the x87 stack simulator.
//!
//! Uses `proptest` to generate random float programs (straight-line code,
//! diamonds and simple loops) and verify invariants:
//! - Simulation never fails when at most eight values are live
//! - The rewritten stack code has the same effects as the virtual program
//! - No virtual opcode survives and the stack never exceeds eight entries
//! - Simulating already rewritten code changes nothing
//! - Every path into a join or loop header arrives with the same layout

use proptest::prelude::*;
use x87_sim::ia32::{CondCode, Inst, Opcode, vf};
use x87_sim::ir::{BlockId, Function};
use x87_sim::test_harness::*;

const BINOPS: [Opcode; 4] = [Opcode::VFadd, Opcode::VFsub, Opcode::VFmul, Opcode::VFdiv];
const UNOPS: [Opcode; 3] = [Opcode::VFchs, Opcode::VFabs, Opcode::VFsqrt];
const STORE_BITS: [u32; 3] = [32, 64, 80];

/// One program step. Register operands select a member of the live pool;
/// `kill` marks the last read of that operand.
#[derive(Debug, Clone)]
enum RawOp {
    Load { offset: u8, int: bool },
    Constant { one: bool },
    Bin { kind: u8, a: u8, b: u8, kill_a: bool, kill_b: bool },
    BinMem { kind: u8, a: u8, offset: u8, kill: bool },
    Un { kind: u8, a: u8, kill: bool },
    Store { a: u8, width: u8, kill: bool },
    StoreInt { a: u8, kill: bool },
    Compare { a: u8, b: u8, kill_a: bool, kill_b: bool },
    Copy { a: u8, kill: bool },
}

fn raw_op_strategy() -> impl Strategy<Value = RawOp> {
    prop_oneof![
        3 => (0u8..16, any::<bool>()).prop_map(|(offset, int)| RawOp::Load { offset, int }),
        1 => any::<bool>().prop_map(|one| RawOp::Constant { one }),
        3 => (0u8..4, any::<u8>(), any::<u8>(), any::<bool>(), any::<bool>()).prop_map(
            |(kind, a, b, kill_a, kill_b)| RawOp::Bin {
                kind,
                a,
                b,
                kill_a,
                kill_b,
            }
        ),
        1 => (0u8..4, any::<u8>(), 0u8..16, any::<bool>())
            .prop_map(|(kind, a, offset, kill)| RawOp::BinMem { kind, a, offset, kill }),
        1 => (0u8..3, any::<u8>(), any::<bool>()).prop_map(|(kind, a, kill)| RawOp::Un { kind, a, kill }),
        2 => (any::<u8>(), 0u8..3, any::<bool>())
            .prop_map(|(a, width, kill)| RawOp::Store { a, width, kill }),
        1 => (any::<u8>(), any::<bool>()).prop_map(|(a, kill)| RawOp::StoreInt { a, kill }),
        1 => (any::<u8>(), any::<u8>(), any::<bool>(), any::<bool>()).prop_map(
            |(a, b, kill_a, kill_b)| RawOp::Compare { a, b, kill_a, kill_b }
        ),
        1 => (any::<u8>(), any::<bool>()).prop_map(|(a, kill)| RawOp::Copy { a, kill }),
    ]
}

/// Turns raw steps into a valid virtual-register program, allocating every
/// result to the lowest free register like a register allocator would.
#[derive(Default)]
struct Builder {
    live: Vec<u8>,
    insts: Vec<Inst>,
    next_store: i32,
    /// Ignore kill flags. Inside a loop a value read on the next iteration
    /// stays live past its last read in program order.
    keep_all: bool,
}

impl Builder {
    /// A builder for a successor block, starting from this block's pool.
    fn fork(&self, keep_all: bool) -> Self {
        Self {
            live: self.live.clone(),
            insts: Vec::new(),
            next_store: self.next_store,
            keep_all,
        }
    }

    /// A builder for the join of `a` and `b`: only registers defined on
    /// both paths may be read.
    fn join(a: &Self, b: &Self) -> Self {
        Self {
            live: a.live.iter().copied().filter(|r| b.live.contains(r)).collect(),
            insts: Vec::new(),
            next_store: a.next_store.max(b.next_store),
            keep_all: false,
        }
    }

    fn run(&mut self, ops: &[RawOp]) {
        for op in ops {
            self.step(op);
        }
    }

    fn end_with(mut self, terminator: Inst) -> Vec<Inst> {
        self.insts.push(terminator);
        self.insts
    }

    fn pick(&self, sel: u8) -> Option<u8> {
        if self.live.is_empty() {
            return None;
        }
        Some(self.live[sel as usize % self.live.len()])
    }

    /// Lowest register free once `freed` have been released.
    fn free_reg(&self, freed: &[u8]) -> Option<u8> {
        (0..8u8).find(|r| !self.live.contains(r) || freed.contains(r))
    }

    fn release(&mut self, freed: &[u8]) {
        self.live.retain(|r| !freed.contains(r));
    }

    fn define(&mut self, freed: &[u8]) -> Option<u8> {
        let out = self.free_reg(freed)?;
        self.release(freed);
        self.live.push(out);
        Some(out)
    }

    fn store_slot(&mut self, bits: u32) -> x87_sim::ia32::MemOperand {
        let offset = 256 + self.next_store * 8;
        self.next_store += 1;
        mem_bits(offset, bits)
    }

    fn kills(&self, reg: u8, kill: bool) -> Vec<u8> {
        if kill && !self.keep_all {
            vec![reg]
        } else {
            vec![]
        }
    }

    fn step(&mut self, op: &RawOp) {
        match *op {
            RawOp::Load { offset, int } => {
                if let Some(out) = self.define(&[]) {
                    let slot = mem(i32::from(offset) * 8);
                    self.insts.push(if int {
                        Inst::fild(slot, vf(out))
                    } else {
                        Inst::fld(slot, vf(out))
                    });
                }
            }
            RawOp::Constant { one } => {
                if let Some(out) = self.define(&[]) {
                    self.insts.push(if one {
                        Inst::fld1(vf(out))
                    } else {
                        Inst::fldz(vf(out))
                    });
                }
            }
            RawOp::Bin {
                kind,
                a,
                b,
                kill_a,
                kill_b,
            } => {
                let (Some(a), Some(b)) = (self.pick(a), self.pick(b)) else {
                    return;
                };
                let mut freed = self.kills(a, kill_a);
                freed.extend(self.kills(b, kill_b));
                if let Some(out) = self.define(&freed) {
                    let op = BINOPS[kind as usize % BINOPS.len()];
                    self.insts.push(Inst::binop(op, vf(a), vf(b), vf(out)));
                }
            }
            RawOp::BinMem {
                kind,
                a,
                offset,
                kill,
            } => {
                let Some(a) = self.pick(a) else { return };
                let freed = self.kills(a, kill);
                if let Some(out) = self.define(&freed) {
                    let op = BINOPS[kind as usize % BINOPS.len()];
                    let slot = mem(i32::from(offset) * 8);
                    self.insts.push(Inst::binop_mem(op, vf(a), slot, vf(out)));
                }
            }
            RawOp::Un { kind, a, kill } => {
                let Some(a) = self.pick(a) else { return };
                let freed = self.kills(a, kill);
                if let Some(out) = self.define(&freed) {
                    let op = UNOPS[kind as usize % UNOPS.len()];
                    self.insts.push(Inst::unop(op, vf(a), vf(out)));
                }
            }
            RawOp::Store { a, width, kill } => {
                let Some(a) = self.pick(a) else { return };
                let slot = self.store_slot(STORE_BITS[width as usize % STORE_BITS.len()]);
                self.insts.push(Inst::fst(vf(a), slot));
                let freed = self.kills(a, kill);
                self.release(&freed);
            }
            RawOp::StoreInt { a, kill } => {
                let Some(a) = self.pick(a) else { return };
                let slot = self.store_slot(32);
                self.insts.push(Inst::fist(vf(a), slot));
                let freed = self.kills(a, kill);
                self.release(&freed);
            }
            RawOp::Compare {
                a,
                b,
                kill_a,
                kill_b,
            } => {
                let (Some(a), Some(b)) = (self.pick(a), self.pick(b)) else {
                    return;
                };
                self.insts.push(Inst::fucomi(vf(a), vf(b)));
                let mut freed = self.kills(a, kill_a);
                freed.extend(self.kills(b, kill_b));
                self.release(&freed);
            }
            RawOp::Copy { a, kill } => {
                let Some(a) = self.pick(a) else { return };
                let freed = self.kills(a, kill);
                if let Some(out) = self.define(&freed) {
                    self.insts.push(Inst::copy(vf(a), vf(out)));
                }
            }
        }
    }

    fn finish(mut self, ret: Option<u8>) -> Vec<Inst> {
        let value = ret.and_then(|sel| self.pick(sel));
        self.insts.push(Inst::ret(value.map(vf)));
        self.insts
    }
}

fn build(ops: &[RawOp], ret: Option<u8>) -> Vec<Inst> {
    let mut builder = Builder::default();
    builder.run(ops);
    builder.finish(ret)
}

fn ops(max: usize) -> impl Strategy<Value = Vec<RawOp>> {
    prop::collection::vec(raw_op_strategy(), 0..max)
}

fn fill(func: &mut Function<Inst>, block: BlockId, insts: Vec<Inst>) {
    for inst in insts {
        func.push(block, inst);
    }
}

/// `bb0` branches to `bb1` and `bb2`, both fall into `bb3`, which returns.
fn diamond(
    head: &[RawOp],
    then: &[RawOp],
    other: &[RawOp],
    tail: &[RawOp],
    ret: Option<u8>,
) -> Function<Inst> {
    let mut func = Function::new("diamond");
    let b0 = func.entry;
    let b1 = func.add_block();
    let b2 = func.add_block();
    let b3 = func.add_block();
    func.add_edge(b0, b1);
    func.add_edge(b0, b2);
    func.add_edge(b1, b3);
    func.add_edge(b2, b3);

    let mut entry = Builder::default();
    entry.run(head);
    let mut left = entry.fork(false);
    left.run(then);
    let mut right = entry.fork(false);
    right.run(other);
    let mut join = Builder::join(&left, &right);
    join.run(tail);

    fill(&mut func, b0, entry.end_with(Inst::jcc(CondCode::Equal, b1, b2)));
    fill(&mut func, b1, left.end_with(Inst::jmp(b3)));
    fill(&mut func, b2, right.end_with(Inst::jmp(b3)));
    fill(&mut func, b3, join.finish(ret));
    func
}

/// `bb0` enters the header `bb1`, which either runs the body `bb2` and
/// loops back or leaves for `bb3`.
fn simple_loop(
    head: &[RawOp],
    header: &[RawOp],
    body: &[RawOp],
    tail: &[RawOp],
    ret: Option<u8>,
) -> Function<Inst> {
    let mut func = Function::new("loop");
    let b0 = func.entry;
    let b1 = func.add_block();
    let b2 = func.add_block();
    let b3 = func.add_block();
    func.add_edge(b0, b1);
    func.add_edge(b1, b2);
    func.add_edge(b1, b3);
    func.add_edge(b2, b1);

    let mut entry = Builder::default();
    entry.run(head);
    let mut check = entry.fork(true);
    check.run(header);
    let mut looped = check.fork(true);
    looped.run(body);
    let mut exit = check.fork(false);
    exit.run(tail);

    fill(&mut func, b0, entry.end_with(Inst::jmp(b1)));
    fill(&mut func, b1, check.end_with(Inst::jcc(CondCode::Below, b2, b3)));
    fill(&mut func, b2, looped.end_with(Inst::jmp(b1)));
    fill(&mut func, b3, exit.finish(ret));
    func
}

/// Registers whose value equals `value`, as a bit set.
fn holders(regs: &[Option<Expr>], value: &Expr) -> u8 {
    regs.iter()
        .enumerate()
        .filter(|(_, reg)| reg.as_ref() == Some(value))
        .fold(0u8, |set, (idx, _)| set | 1u8 << idx)
}

/// Every path must reach the join with the same depth, and each slot must
/// hold the value of one register that is the same on every path.
fn assert_same_layout(
    func: &Function<Inst>,
    paths: &[Vec<BlockId>],
) -> Result<(), TestCaseError> {
    let mut slots: Option<Vec<u8>> = None;
    for path in paths {
        let stack = Replay::run(func, path).unwrap().stack();
        let regs = evaluate_registers(func, path).unwrap();
        let here: Vec<u8> = stack.iter().map(|value| holders(&regs, value)).collect();
        slots = Some(match slots {
            None => here,
            Some(prev) => {
                prop_assert_eq!(prev.len(), here.len(), "depth differs on {:?}", path);
                prev.iter().zip(&here).map(|(a, b)| a & b).collect()
            }
        });
    }
    let slots = slots.unwrap_or_default();
    prop_assert!(slots.iter().all(|&set| set != 0), "slots disagree: {:?}", slots);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// The rewritten stack code stores, compares and returns exactly what
    /// the virtual program does.
    #[test]
    fn simulation_preserves_effects(
        ops in prop::collection::vec(raw_op_strategy(), 0..48),
        ret in prop::option::of(any::<u8>()),
    ) {
        let mut func = straight_line(build(&ops, ret));
        let expected = evaluate(&func, &[func.entry]).unwrap();

        simulate(&mut func).unwrap();
        prop_assert!(!has_virtual(&func), "{:#?}", listing(&func));

        let replay = Replay::run(&func, &[func.entry]).unwrap();
        prop_assert_eq!(&replay.effects, &expected);
        prop_assert!(replay.max_depth <= 8);
        prop_assert_eq!(replay.depth(), 0);
    }

    #[test]
    fn simulation_is_idempotent(
        ops in prop::collection::vec(raw_op_strategy(), 0..32),
        ret in prop::option::of(any::<u8>()),
    ) {
        let mut func = straight_line(build(&ops, ret));
        simulate(&mut func).unwrap();
        let once = listing(&func);

        simulate(&mut func).unwrap();
        prop_assert_eq!(listing(&func), once);
    }

    /// Loads alone never need exchanges: every value is already where the
    /// next instruction wants it or is freed from the top.
    #[test]
    fn loads_and_stores_need_no_exchange(
        offsets in prop::collection::vec(0u8..16, 1..8),
    ) {
        let mut insts: Vec<Inst> = offsets
            .iter()
            .enumerate()
            .map(|(i, &offset)| Inst::fld(mem(i32::from(offset) * 8), vf(i as u8)))
            .collect();
        for i in (0..offsets.len()).rev() {
            insts.push(Inst::fst(vf(i as u8), mem(256 + i as i32 * 8)));
        }
        insts.push(Inst::ret([]));
        let mut func = straight_line(insts);

        simulate(&mut func).unwrap();
        prop_assert_eq!(count_opcode(&func, Opcode::Fxch), 0);
        prop_assert_eq!(count_opcode(&func, Opcode::Fst), offsets.len());
    }

    /// Both arms of a diamond meet the join with one layout and every path
    /// through it matches the virtual program.
    #[test]
    fn diamond_joins_agree(
        (head, then, other, tail) in (ops(12), ops(10), ops(10), ops(10)),
        ret in prop::option::of(any::<u8>()),
    ) {
        let mut func = diamond(&head, &then, &other, &tail, ret);
        let [b0, b1, b2, b3] = [0, 1, 2, 3].map(BlockId);
        let original = func.clone();

        simulate(&mut func).unwrap();
        prop_assert!(!has_virtual(&func), "{}", func);

        assert_same_layout(&func, &[vec![b0, b1], vec![b0, b2]])?;
        for path in [vec![b0, b1, b3], vec![b0, b2, b3]] {
            let expected = evaluate(&original, &path).unwrap();
            let replay = Replay::run(&func, &path).unwrap();
            prop_assert_eq!(&replay.effects, &expected, "path {:?}", path);
            prop_assert!(replay.max_depth <= 8);
        }
    }

    /// The loop header is entered with the same layout from the preheader
    /// and from the back edge, over several iterations.
    #[test]
    fn loop_back_edges_agree(
        (head, header, body, tail) in (ops(12), ops(8), ops(8), ops(8)),
        ret in prop::option::of(any::<u8>()),
    ) {
        let mut func = simple_loop(&head, &header, &body, &tail, ret);
        let [b0, b1, b2, b3] = [0, 1, 2, 3].map(BlockId);
        let original = func.clone();

        simulate(&mut func).unwrap();
        prop_assert!(!has_virtual(&func), "{}", func);

        assert_same_layout(
            &func,
            &[vec![b0], vec![b0, b1, b2], vec![b0, b1, b2, b1, b2]],
        )?;
        for iterations in 0..3 {
            let mut path = vec![b0, b1];
            for _ in 0..iterations {
                path.extend([b2, b1]);
            }
            path.push(b3);
            let expected = evaluate(&original, &path).unwrap();
            let replay = Replay::run(&func, &path).unwrap();
            prop_assert_eq!(&replay.effects, &expected, "path {:?}", path);
            prop_assert!(replay.max_depth <= 8);
        }
    }
}
