//! Retained-heap computation over one frozen snapshot.
//!
//! The reference graph is augmented with one synthetic global root and one
//! synthetic root per thread (children: that thread's frame locals). A
//! single dominator pass then yields both tables: per-object retained sizes
//! and, from the thread-root nodes, per-thread retained heap. An object
//! held by the locals of two threads is dominated by neither thread root
//! and credited to no thread.

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::heap::model::{Address, Snapshot};
use crate::heap::InboundIndex;
use crate::progress::ProgressSink;
use crate::retained::dominators::{immediate_dominators, retained_sizes, reverse_post_order};
use crate::retained::graph::ReachableGraph;
use crate::retained::RetainedHeap;
use rustc_hash::FxHashMap;
use std::time::Instant;

/// Hard limit on reachable nodes, configurable down for constrained runs.
pub const DEFAULT_NODE_CAP: usize = i32::MAX as usize;

pub struct RetainedHeapCalculator<'a> {
    snapshot: &'a Snapshot,
    inbound: &'a InboundIndex,
    node_cap: usize,
}

impl<'a> RetainedHeapCalculator<'a> {
    pub fn new(snapshot: &'a Snapshot, inbound: &'a InboundIndex) -> Self {
        Self { snapshot, inbound, node_cap: DEFAULT_NODE_CAP }
    }

    pub fn with_node_cap(mut self, node_cap: usize) -> Self {
        self.node_cap = node_cap;
        self
    }

    pub fn calculate(
        &self,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<RetainedHeap> {
        let start = Instant::now();
        tracing::info!("calculating retained heap");
        progress.begin("Computing retained heap", None);

        // Root set: per-thread frame locals that resolve to dumped objects.
        let thread_roots: Vec<Vec<Address>> = self
            .snapshot
            .threads()
            .iter()
            .map(|t| {
                t.local_addresses()
                    .into_iter()
                    .filter(|&a| self.snapshot.contains_object(a))
                    .collect()
            })
            .collect();

        let graph = ReachableGraph::build(self.snapshot, &thread_roots, self.node_cap, cancel)?;
        let (pred_off, preds) = graph.predecessors(self.inbound, &thread_roots);
        let rpo = reverse_post_order(graph.node_count(), &graph.succ_off, &graph.succ);
        let idom = immediate_dominators(graph.node_count(), &rpo, &pred_off, &preds, cancel)?;
        let retained = retained_sizes(&graph.sizes, &idom, &rpo);

        // The dominator tree spans every reachable node, so the root
        // accumulates the whole reachable heap.
        debug_assert_eq!(retained[0], graph.sizes.iter().sum::<u64>());

        let first_real = graph.first_real() as usize;
        let mut objects =
            FxHashMap::with_capacity_and_hasher(graph.addrs.len(), Default::default());
        for (i, &addr) in graph.addrs.iter().enumerate() {
            objects.insert(addr, retained[first_real + i]);
        }
        let mut threads =
            FxHashMap::with_capacity_and_hasher(self.snapshot.threads().len(), Default::default());
        for (t, thread) in self.snapshot.threads().iter().enumerate() {
            threads.insert(thread.name.clone(), retained[t + 1]);
        }

        progress.finish();
        tracing::info!(
            reachable = graph.addrs.len(),
            elapsed = ?start.elapsed(),
            "retained heap calculated"
        );
        Ok(RetainedHeap::from_parts(objects, threads))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::model::{FrameRecord, ObjectRecord, ObjectShape, ThreadRecord};
    use crate::heap::SnapshotBuilder;
    use crate::progress::NoProgress;

    fn obj(size: u64, referents: Vec<Address>) -> ObjectRecord {
        ObjectRecord {
            type_addr: 100,
            size,
            str_repr: None,
            referents,
            shape: ObjectShape::Plain,
        }
    }

    fn thread(name: &str, locals: &[(&str, Address)]) -> ThreadRecord {
        ThreadRecord {
            name: name.to_string(),
            is_alive: true,
            is_daemon: false,
            frames: vec![FrameRecord {
                filename: "app.py".to_string(),
                line: 1,
                function: "main".to_string(),
                locals: locals.iter().map(|(n, a)| (n.to_string(), *a)).collect(),
            }],
        }
    }

    fn compute(snapshot: &Snapshot) -> RetainedHeap {
        let inbound = InboundIndex::build(snapshot);
        RetainedHeapCalculator::new(snapshot, &inbound)
            .calculate(&NoProgress, &CancelToken::new())
            .unwrap()
    }

    #[test]
    fn test_chain() {
        // a@1(10) → b@2(20) → c@3(30), root local x:1.
        let mut b = SnapshotBuilder::new();
        b.add_type(100, "object");
        b.add_object(1, obj(10, vec![2]));
        b.add_object(2, obj(20, vec![3]));
        b.add_object(3, obj(30, vec![]));
        b.add_thread(thread("MainThread", &[("x", 1)]));
        let snapshot = b.finish();

        let retained = compute(&snapshot);
        assert_eq!(retained.retained_of_object(1), 60);
        assert_eq!(retained.retained_of_object(2), 50);
        assert_eq!(retained.retained_of_object(3), 30);
        assert_eq!(retained.retained_of_thread("MainThread"), 60);
    }

    #[test]
    fn test_diamond_co_domination() {
        // a@1 → {b@2, c@3} → d@4: d is retained by a alone.
        let mut b = SnapshotBuilder::new();
        b.add_type(100, "object");
        b.add_object(1, obj(10, vec![2, 3]));
        b.add_object(2, obj(20, vec![4]));
        b.add_object(3, obj(30, vec![4]));
        b.add_object(4, obj(40, vec![]));
        b.add_thread(thread("MainThread", &[("x", 1)]));
        let snapshot = b.finish();

        let retained = compute(&snapshot);
        assert_eq!(retained.retained_of_object(4), 40);
        assert_eq!(retained.retained_of_object(2), 20);
        assert_eq!(retained.retained_of_object(3), 30);
        assert_eq!(retained.retained_of_object(1), 100);
    }

    #[test]
    fn test_two_node_cycle() {
        // a@1(5) ⇄ b@2(7), root local x:1: 1 dominates 2.
        let mut b = SnapshotBuilder::new();
        b.add_type(100, "object");
        b.add_object(1, obj(5, vec![2]));
        b.add_object(2, obj(7, vec![1]));
        b.add_thread(thread("MainThread", &[("x", 1)]));
        let snapshot = b.finish();

        let retained = compute(&snapshot);
        assert_eq!(retained.retained_of_object(1), 12);
        assert_eq!(retained.retained_of_object(2), 7);
    }

    #[test]
    fn test_shared_local_credited_to_no_thread() {
        // a@1 held by locals of two threads: co-dominated.
        let mut b = SnapshotBuilder::new();
        b.add_type(100, "object");
        b.add_object(1, obj(100, vec![]));
        b.add_thread(thread("T1", &[("x", 1)]));
        b.add_thread(thread("T2", &[("y", 1)]));
        let snapshot = b.finish();

        let retained = compute(&snapshot);
        assert_eq!(retained.retained_of_object(1), 100);
        assert_eq!(retained.retained_of_thread("T1"), 0);
        assert_eq!(retained.retained_of_thread("T2"), 0);
    }

    #[test]
    fn test_dangling_referent_ignored() {
        let mut b = SnapshotBuilder::new();
        b.add_type(100, "object");
        b.add_object(1, obj(10, vec![999]));
        b.add_thread(thread("MainThread", &[("x", 1)]));
        let snapshot = b.finish();
        assert_eq!(snapshot.diagnostics().dangling_references, 1);

        let retained = compute(&snapshot);
        assert_eq!(retained.retained_of_object(1), 10);
    }

    #[test]
    fn test_unreachable_objects_report_zero() {
        let mut b = SnapshotBuilder::new();
        b.add_type(100, "object");
        b.add_object(1, obj(10, vec![]));
        b.add_object(2, obj(20, vec![]));
        b.add_thread(thread("MainThread", &[("x", 1)]));
        let snapshot = b.finish();

        let retained = compute(&snapshot);
        assert_eq!(retained.retained_of_object(1), 10);
        // Object 2 is not reachable from any thread local.
        assert_eq!(retained.retained_of_object(2), 0);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = SnapshotBuilder::new().finish();
        let retained = compute(&snapshot);
        assert_eq!(retained.object_count(), 0);
        assert_eq!(retained.thread_count(), 0);
    }

    #[test]
    fn test_retained_at_least_shallow_for_reachable() {
        let mut b = SnapshotBuilder::new();
        b.add_type(100, "object");
        b.add_object(1, obj(10, vec![2, 3]));
        b.add_object(2, obj(20, vec![3, 4]));
        b.add_object(3, obj(30, vec![1]));
        b.add_object(4, obj(40, vec![]));
        b.add_thread(thread("MainThread", &[("x", 1)]));
        let snapshot = b.finish();

        let retained = compute(&snapshot);
        for (addr, obj) in snapshot.objects() {
            assert!(retained.retained_of_object(addr) >= obj.size);
        }
        // Single thread retains the whole reachable heap.
        assert_eq!(retained.retained_of_thread("MainThread"), 100);
    }

    #[test]
    fn test_node_cap_exceeded() {
        use crate::error::HeapError;
        let mut b = SnapshotBuilder::new();
        b.add_type(100, "object");
        for addr in 1..=10u64 {
            b.add_object(addr, obj(1, if addr < 10 { vec![addr + 1] } else { vec![] }));
        }
        b.add_thread(thread("MainThread", &[("x", 1)]));
        let snapshot = b.finish();

        let inbound = InboundIndex::build(&snapshot);
        let err = RetainedHeapCalculator::new(&snapshot, &inbound)
            .with_node_cap(5)
            .calculate(&NoProgress, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, HeapError::GraphTooLarge { .. }));
    }
}
