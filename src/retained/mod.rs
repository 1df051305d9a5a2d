//! Retained-heap engine: per-object and per-thread retained sizes, with a
//! fingerprint-keyed on-disk cache so repeated sessions skip the compute.

pub mod cache;
pub mod calculator;
mod dominators;
mod graph;

pub use cache::RetainedHeapCache;
pub use calculator::{RetainedHeapCalculator, DEFAULT_NODE_CAP};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::heap::model::{Address, Snapshot, ThreadName};
use crate::heap::InboundIndex;
use crate::progress::ProgressSink;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

/// Frozen result of the retained-heap computation.
///
/// Addresses outside the reachable set are absent from the table; the
/// accessors report 0 for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedHeap {
    objects: FxHashMap<Address, u64>,
    threads: FxHashMap<ThreadName, u64>,
}

impl RetainedHeap {
    pub(crate) fn from_parts(
        objects: FxHashMap<Address, u64>,
        threads: FxHashMap<ThreadName, u64>,
    ) -> Self {
        Self { objects, threads }
    }

    /// Retained bytes of one object; 0 for unreachable or absent addresses.
    pub fn retained_of_object(&self, addr: Address) -> u64 {
        self.objects.get(&addr).copied().unwrap_or(0)
    }

    /// Retained bytes of one thread; 0 for threads without retained heap.
    pub fn retained_of_thread(&self, name: &str) -> u64 {
        self.threads.get(name).copied().unwrap_or(0)
    }

    pub fn objects(&self) -> impl Iterator<Item = (Address, u64)> + '_ {
        self.objects.iter().map(|(&a, &r)| (a, r))
    }

    pub fn threads(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.threads.iter().map(|(n, &r)| (n.as_str(), r))
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }
}

/// Knobs for [`provide_retained_heap_with_caching`].
#[derive(Debug, Clone)]
pub struct RetainedOptions {
    /// Reachable-node limit; exceeding it aborts with `GraphTooLarge`.
    pub node_cap: usize,
    /// When false, skip reading an existing cache (it is still rewritten).
    pub use_cache: bool,
    /// Place the cache file here instead of next to the snapshot.
    pub cache_dir: Option<PathBuf>,
}

impl Default for RetainedOptions {
    fn default() -> Self {
        Self { node_cap: DEFAULT_NODE_CAP, use_cache: true, cache_dir: None }
    }
}

/// Cache-or-compute entry point: adopt a cache with the matching
/// fingerprint if one decodes cleanly, otherwise run the calculator and
/// persist the result. Cache write failures are logged and swallowed — the
/// computed table is still returned.
pub fn provide_retained_heap_with_caching(
    snapshot_path: &Path,
    snapshot: &Snapshot,
    inbound: &InboundIndex,
    options: &RetainedOptions,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<RetainedHeap> {
    let mut cache = RetainedHeapCache::new(snapshot_path, options.cache_dir.as_deref());

    if options.use_cache {
        if let Some(hit) = cache.load_if_exists()? {
            return Ok(hit);
        }
    }

    let retained = RetainedHeapCalculator::new(snapshot, inbound)
        .with_node_cap(options.node_cap)
        .calculate(progress, cancel)?;

    if let Err(err) = cache.store(&retained) {
        tracing::warn!(%err, "failed to write retained-heap cache");
    }

    Ok(retained)
}
