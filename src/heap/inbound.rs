//! Inbound-reference index: for every address, who points at it.
//!
//! Built once per snapshot by a linear pass over the object table.
//! Duplicate forward edges collapse to one inbound entry; targets that were
//! never dumped still get entries so the UI can show who references a
//! filtered-out object.

use crate::heap::model::{Address, Snapshot};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::time::Instant;

pub struct InboundIndex {
    map: FxHashMap<Address, Vec<Address>>,
}

impl InboundIndex {
    /// One pass accumulating reverse adjacency, then a parallel
    /// sort-and-dedup of each per-target vector.
    pub fn build(snapshot: &Snapshot) -> Self {
        let start = Instant::now();

        let mut map: FxHashMap<Address, Vec<Address>> = FxHashMap::default();
        for (source, obj) in snapshot.objects() {
            for &target in &obj.referents {
                map.entry(target).or_default().push(source);
            }
        }

        map.par_iter_mut().for_each(|(_, sources)| {
            sources.sort_unstable();
            sources.dedup();
            sources.shrink_to_fit();
        });

        tracing::info!(
            targets = map.len(),
            elapsed = ?start.elapsed(),
            "inbound references indexed"
        );
        Self { map }
    }

    /// Sources referencing `addr`, ascending and deduplicated. Empty when
    /// nothing points at it.
    pub fn inbound(&self, addr: Address) -> &[Address] {
        self.map.get(&addr).map_or(&[], Vec::as_slice)
    }

    /// Number of addresses with at least one inbound reference.
    pub fn referenced_count(&self) -> usize {
        self.map.len()
    }
}
