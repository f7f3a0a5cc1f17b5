// Block ordering for the x87 walker.
//
// Reverse postorder visits every reachable block after at least one of its
// predecessors; only loop headers see a predecessor (the back-edge source)
// after themselves.

use super::{BlockId, Function};

/// Reverse postorder of the blocks reachable from the entry block.
///
/// Successors are explored in their stored order, so the result is
/// deterministic for a given graph.
pub fn reverse_postorder<I>(func: &Function<I>) -> Vec<BlockId> {
    let n = func.blocks.len();
    if n == 0 {
        return Vec::new();
    }

    let mut visited = vec![false; n];
    let mut postorder = Vec::with_capacity(n);
    // (block, index of the next successor to explore)
    let mut stack: Vec<(BlockId, usize)> = vec![(func.entry, 0)];
    visited[func.entry.index()] = true;

    while let Some(top) = stack.last_mut() {
        let (block, next) = *top;
        top.1 += 1;
        if let Some(&succ) = func.block(block).succs.get(next) {
            if !visited[succ.index()] {
                visited[succ.index()] = true;
                stack.push((succ, 0));
            }
        } else {
            postorder.push(block);
            stack.pop();
        }
    }

    postorder.reverse();
    postorder
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(n: usize, edges: &[(u32, u32)]) -> Function<()> {
        let mut f = Function::new("g");
        for _ in 1..n {
            f.add_block();
        }
        for &(a, b) in edges {
            f.add_edge(BlockId(a), BlockId(b));
        }
        f
    }

    #[test]
    fn diamond_visits_join_last() {
        let f = graph(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let order = reverse_postorder(&f);
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], BlockId(0));
        assert_eq!(order[3], BlockId(3));
    }

    #[test]
    fn loop_header_precedes_body() {
        // 0 -> 1 (header) -> 2 (body) -> 1, 1 -> 3 (exit)
        let f = graph(4, &[(0, 1), (1, 2), (2, 1), (1, 3)]);
        let order = reverse_postorder(&f);
        let pos = |b: u32| order.iter().position(|&x| x == BlockId(b)).unwrap();
        assert!(pos(0) < pos(1));
        assert!(pos(1) < pos(2));
        assert!(pos(1) < pos(3));
    }

    #[test]
    fn unreachable_blocks_are_skipped() {
        let f = graph(3, &[(0, 1)]);
        let order = reverse_postorder(&f);
        assert_eq!(order, vec![BlockId(0), BlockId(1)]);
    }
}
