//! Iterative dominator computation (Cooper–Harvey–Kennedy) over CSR
//! adjacency, plus the bottom-up retained-size accumulation.
//!
//! Node 0 is always the start node. All nodes are reachable from it by
//! construction of the dense graph, so the reverse post-order covers the
//! whole id range.

use crate::cancel::CancelToken;
use crate::error::Result;

pub(crate) const UNDEF: u32 = u32::MAX;

/// Reverse post-order of a DFS from node 0 over the forward CSR.
pub(crate) fn reverse_post_order(n: usize, succ_off: &[usize], succ: &[u32]) -> Vec<u32> {
    let mut visited = vec![false; n];
    let mut post: Vec<u32> = Vec::with_capacity(n);
    // (node, next successor index) — explicit stack, graphs can be deep.
    let mut stack: Vec<(u32, usize)> = vec![(0, 0)];
    visited[0] = true;

    while let Some(&(node, idx)) = stack.last() {
        let succs = &succ[succ_off[node as usize]..succ_off[node as usize + 1]];
        if idx < succs.len() {
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            let next = succs[idx];
            if !visited[next as usize] {
                visited[next as usize] = true;
                stack.push((next, 0));
            }
        } else {
            post.push(node);
            stack.pop();
        }
    }

    post.reverse();
    post
}

/// Immediate dominators with node 0 as the start node. `idom[0] == 0`.
///
/// Fixed-point iteration in reverse post-order; the first pass already
/// settles most heap graphs, cycles need a couple more. Cancellation is
/// polled once per outer iteration.
pub(crate) fn immediate_dominators(
    n: usize,
    rpo: &[u32],
    pred_off: &[usize],
    preds: &[u32],
    cancel: &CancelToken,
) -> Result<Vec<u32>> {
    let mut rpo_num = vec![UNDEF; n];
    for (i, &v) in rpo.iter().enumerate() {
        rpo_num[v as usize] = i as u32;
    }

    let mut idom = vec![UNDEF; n];
    idom[0] = 0;

    let mut rounds = 0u32;
    let mut changed = true;
    while changed {
        cancel.check()?;
        changed = false;
        rounds += 1;

        for &b in &rpo[1..] {
            let b = b as usize;
            let mut new_idom = UNDEF;
            for &p in &preds[pred_off[b]..pred_off[b + 1]] {
                if idom[p as usize] == UNDEF {
                    continue; // predecessor not processed yet
                }
                new_idom = if new_idom == UNDEF {
                    p
                } else {
                    intersect(&idom, &rpo_num, p, new_idom, n)
                };
            }
            if new_idom != UNDEF && idom[b] != new_idom {
                idom[b] = new_idom;
                changed = true;
            }
        }
    }

    tracing::debug!(nodes = n, rounds, "dominator fixed point reached");
    Ok(idom)
}

/// Two-finger walk up the idom chains until the fingers meet. A walk that
/// does not terminate within 2n steps means the idom vector contains a
/// cycle, which the construction must never produce.
fn intersect(idom: &[u32], rpo_num: &[u32], mut a: u32, mut b: u32, n: usize) -> u32 {
    let mut steps = 0usize;
    while a != b {
        while rpo_num[a as usize] > rpo_num[b as usize] {
            a = idom[a as usize];
            steps += 1;
            assert!(steps <= 2 * n, "cycle in dominator construction");
        }
        while rpo_num[b as usize] > rpo_num[a as usize] {
            b = idom[b as usize];
            steps += 1;
            assert!(steps <= 2 * n, "cycle in dominator construction");
        }
    }
    a
}

/// Bottom-up accumulation over the dominator tree:
/// `R[v] = s(v) + Σ R[child]`. A node's dominator precedes it in reverse
/// post-order, so one reverse sweep sums children before parents.
pub(crate) fn retained_sizes(sizes: &[u64], idom: &[u32], rpo: &[u32]) -> Vec<u64> {
    let mut retained = sizes.to_vec();
    for &v in rpo.iter().rev() {
        let v = v as usize;
        let dom = idom[v] as usize;
        if dom != v {
            retained[dom] += retained[v];
        }
    }
    retained
}
