//! Heapscope — heap-snapshot model, retained-heap analysis, and cache.
//!
//! The core loads a captured heap snapshot (gzip-compressed typed binary
//! container), builds an immutable in-memory model of its object, type, and
//! thread tables, derives an inbound-reference index, and computes for
//! every reachable object the number of bytes that would be freed if it
//! were collected (dominator-tree retained size). Results persist to a
//! fingerprint-keyed cache next to the snapshot so repeated sessions are
//! instantaneous.

pub mod cancel;
pub mod cli;
pub mod codec;
pub mod error;
pub mod heap;
pub mod progress;
pub mod projection;
pub mod retained;

pub use cancel::CancelToken;
pub use error::HeapError;
pub use heap::{InboundIndex, Snapshot, SnapshotBuilder};
pub use progress::{NoProgress, ProgressSink};
pub use projection::HeapView;
pub use retained::{
    provide_retained_heap_with_caching, RetainedHeap, RetainedHeapCalculator, RetainedOptions,
};
