//! Dense reachability graph for the dominator computation.
//!
//! Reachable objects get consecutive integer ids; addresses survive only in
//! the side table (`addrs`). Node 0 is the synthetic global root, nodes
//! `1..=thread_count` the per-thread synthetic roots, real objects follow.
//! Synthetic nodes have shallow size 0.

use crate::cancel::CancelToken;
use crate::error::{HeapError, Result};
use crate::heap::model::{Address, Snapshot};
use crate::heap::InboundIndex;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

const CANCEL_POLL_INTERVAL: usize = 1 << 16;

pub(crate) struct ReachableGraph {
    pub thread_count: usize,
    /// Real node index i ↔ address; node id = first_real() + i.
    pub addrs: Vec<Address>,
    id_of: FxHashMap<Address, u32>,
    /// Shallow size per node id.
    pub sizes: Vec<u64>,
    /// Forward CSR, deduplicated per node.
    pub succ_off: Vec<usize>,
    pub succ: Vec<u32>,
}

impl ReachableGraph {
    pub fn first_real(&self) -> u32 {
        self.thread_count as u32 + 1
    }

    pub fn node_count(&self) -> usize {
        self.sizes.len()
    }

    /// BFS from the synthetic roots over forward referent edges. Edges to
    /// unknown addresses are skipped; `thread_roots` must already be
    /// filtered to dumped objects.
    pub fn build(
        snapshot: &Snapshot,
        thread_roots: &[Vec<Address>],
        node_cap: usize,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let thread_count = thread_roots.len();
        let first_real = thread_count as u32 + 1;

        let mut id_of: FxHashMap<Address, u32> = FxHashMap::default();
        let mut addrs: Vec<Address> = Vec::new();
        let mut queue: VecDeque<Address> = VecDeque::new();

        let mut discover = |addr: Address,
                            id_of: &mut FxHashMap<Address, u32>,
                            addrs: &mut Vec<Address>,
                            queue: &mut VecDeque<Address>| {
            if let std::collections::hash_map::Entry::Vacant(slot) = id_of.entry(addr) {
                let id = first_real + addrs.len() as u32;
                slot.insert(id);
                addrs.push(addr);
                queue.push_back(addr);
            }
        };

        for roots in thread_roots {
            for &addr in roots {
                discover(addr, &mut id_of, &mut addrs, &mut queue);
            }
        }

        let mut visited = 0usize;
        while let Some(addr) = queue.pop_front() {
            visited += 1;
            if visited % CANCEL_POLL_INTERVAL == 0 {
                cancel.check()?;
            }
            for &target in snapshot.referents(addr) {
                if snapshot.contains_object(target) {
                    discover(target, &mut id_of, &mut addrs, &mut queue);
                }
            }
        }

        let node_count = first_real as usize + addrs.len();
        if node_count > node_cap {
            return Err(HeapError::GraphTooLarge { nodes: addrs.len(), cap: node_cap });
        }

        // Successor lists: root → thread roots, thread root → its locals,
        // real node → reachable referents. Deduplicated per node; order is
        // irrelevant to dominance.
        let mut succs: Vec<Vec<u32>> = Vec::with_capacity(node_count);
        succs.push((1..=thread_count as u32).collect());
        for roots in thread_roots {
            succs.push(roots.iter().map(|a| id_of[a]).collect());
        }
        for &addr in &addrs {
            let targets = snapshot
                .referents(addr)
                .iter()
                .filter_map(|t| id_of.get(t).copied())
                .collect();
            succs.push(targets);
        }
        succs.par_iter_mut().for_each(|list| {
            list.sort_unstable();
            list.dedup();
        });

        let mut succ_off = Vec::with_capacity(node_count + 1);
        succ_off.push(0);
        let mut total = 0usize;
        for list in &succs {
            total += list.len();
            succ_off.push(total);
        }
        let mut succ = Vec::with_capacity(total);
        for list in &succs {
            succ.extend_from_slice(list);
        }

        let mut sizes = vec![0u64; first_real as usize];
        sizes.extend(addrs.iter().map(|&a| snapshot.shallow_size(a)));

        Ok(Self { thread_count, addrs, id_of, sizes, succ_off, succ })
    }

    /// Predecessor CSR assembled from the inbound index plus the synthetic
    /// root and thread-root edges. Inbound sources outside the reachable
    /// set carry no path from the root and are dropped.
    pub fn predecessors(
        &self,
        inbound: &InboundIndex,
        thread_roots: &[Vec<Address>],
    ) -> (Vec<usize>, Vec<u32>) {
        let n = self.node_count();
        let first_real = self.first_real() as usize;

        let mut degree = vec![0usize; n];
        for t in 1..first_real {
            degree[t] = 1; // global root
        }
        for (i, &addr) in self.addrs.iter().enumerate() {
            degree[first_real + i] = inbound
                .inbound(addr)
                .iter()
                .filter(|&src| self.id_of.contains_key(src))
                .count();
        }
        for roots in thread_roots {
            for addr in roots {
                degree[self.id_of[addr] as usize] += 1;
            }
        }

        let mut off = Vec::with_capacity(n + 1);
        off.push(0);
        let mut total = 0usize;
        for &d in &degree {
            total += d;
            off.push(total);
        }

        let mut preds = vec![0u32; total];
        let mut cursor = off[..n].to_vec();
        fn push(node: usize, pred: u32, preds: &mut [u32], cursor: &mut [usize]) {
            preds[cursor[node]] = pred;
            cursor[node] += 1;
        }

        for t in 1..first_real {
            push(t, 0, &mut preds, &mut cursor);
        }
        for (t, roots) in thread_roots.iter().enumerate() {
            let root_id = t as u32 + 1;
            for addr in roots {
                push(self.id_of[addr] as usize, root_id, &mut preds, &mut cursor);
            }
        }
        for (i, &addr) in self.addrs.iter().enumerate() {
            for src in inbound.inbound(addr) {
                if let Some(&src_id) = self.id_of.get(src) {
                    push(first_real + i, src_id, &mut preds, &mut cursor);
                }
            }
        }

        (off, preds)
    }
}
