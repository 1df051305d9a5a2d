//! End-to-end scenarios through the public API: encode a snapshot to a real
//! file, load it back, compute retained heap, exercise the cache.

use heapscope::cancel::CancelToken;
use heapscope::codec::encode_snapshot;
use heapscope::heap::model::{
    Address, FrameRecord, ObjectRecord, ObjectShape, ThreadRecord,
};
use heapscope::heap::{InboundIndex, Snapshot, SnapshotBuilder};
use heapscope::progress::NoProgress;
use heapscope::retained::{
    provide_retained_heap_with_caching, RetainedHeapCache, RetainedHeapCalculator,
    RetainedOptions,
};
use heapscope::HeapView;
use std::path::{Path, PathBuf};

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

/// Write a snapshot to disk and load it back through the codec.
fn persist_and_load(builder: SnapshotBuilder, dir: &Path) -> (PathBuf, Snapshot) {
    let path = dir.join("heap.hpsn");
    let file = std::fs::File::create(&path).unwrap();
    encode_snapshot(&builder.finish(), file).unwrap();
    let snapshot = Snapshot::load(&path, &NoProgress, &CancelToken::new()).unwrap();
    (path, snapshot)
}

fn compute(snapshot: &Snapshot) -> (InboundIndex, heapscope::RetainedHeap) {
    let inbound = InboundIndex::build(snapshot);
    let retained = RetainedHeapCalculator::new(snapshot, &inbound)
        .calculate(&NoProgress, &CancelToken::new())
        .unwrap();
    (inbound, retained)
}

fn s2_builder() -> SnapshotBuilder {
    // a@1 → {b@2, c@3} → d@4
    let mut b = SnapshotBuilder::new();
    b.add_type(100, "object");
    b.add_object(1, obj(10, vec![2, 3]));
    b.add_object(2, obj(20, vec![4]));
    b.add_object(3, obj(30, vec![4]));
    b.add_object(4, obj(40, vec![]));
    b.add_thread(thread("MainThread", &[("x", 1)]));
    b
}

#[test]
fn chain_retained_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut b = SnapshotBuilder::new();
    b.add_type(100, "object");
    b.add_object(1, obj(10, vec![2]));
    b.add_object(2, obj(20, vec![3]));
    b.add_object(3, obj(30, vec![]));
    b.add_thread(thread("MainThread", &[("x", 1)]));

    let (_, snapshot) = persist_and_load(b, dir.path());
    let (_, retained) = compute(&snapshot);

    assert_eq!(retained.retained_of_object(1), 60);
    assert_eq!(retained.retained_of_object(2), 50);
    assert_eq!(retained.retained_of_object(3), 30);
    assert_eq!(retained.retained_of_thread("MainThread"), 60);
}

#[test]
fn diamond_co_domination_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let (_, snapshot) = persist_and_load(s2_builder(), dir.path());
    let (_, retained) = compute(&snapshot);

    assert_eq!(retained.retained_of_object(4), 40);
    assert_eq!(retained.retained_of_object(2), 20);
    assert_eq!(retained.retained_of_object(3), 30);
    assert_eq!(retained.retained_of_object(1), 100);
}

#[test]
fn cycle_rooted_at_local() {
    let dir = tempfile::tempdir().unwrap();
    let mut b = SnapshotBuilder::new();
    b.add_type(100, "object");
    b.add_object(1, obj(5, vec![2]));
    b.add_object(2, obj(7, vec![1]));
    b.add_thread(thread("MainThread", &[("x", 1)]));

    let (_, snapshot) = persist_and_load(b, dir.path());
    let (_, retained) = compute(&snapshot);

    assert_eq!(retained.retained_of_object(1), 12);
    assert_eq!(retained.retained_of_object(2), 7);
}

#[test]
fn object_shared_by_two_threads() {
    let dir = tempfile::tempdir().unwrap();
    let mut b = SnapshotBuilder::new();
    b.add_type(100, "object");
    b.add_object(1, obj(100, vec![]));
    b.add_thread(thread("T1", &[("x", 1)]));
    b.add_thread(thread("T2", &[("y", 1)]));

    let (_, snapshot) = persist_and_load(b, dir.path());
    let (_, retained) = compute(&snapshot);

    assert_eq!(retained.retained_of_object(1), 100);
    assert_eq!(retained.retained_of_thread("T1"), 0);
    assert_eq!(retained.retained_of_thread("T2"), 0);
}

#[test]
fn dangling_reference_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let mut b = SnapshotBuilder::new();
    b.add_type(100, "object");
    b.add_object(1, obj(10, vec![999]));
    b.add_thread(thread("MainThread", &[("x", 1)]));

    let (_, snapshot) = persist_and_load(b, dir.path());
    assert_eq!(snapshot.diagnostics().dangling_references, 1);

    let (_, retained) = compute(&snapshot);
    assert_eq!(retained.retained_of_object(1), 10);
}

#[test]
fn cache_roundtrip_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let (path, snapshot) = persist_and_load(s2_builder(), dir.path());
    let (_, computed) = compute(&snapshot);

    let mut cache = RetainedHeapCache::new(&path, None);
    cache.store(&computed).unwrap();
    let cache_path = cache.cache_path().unwrap();
    let first_bytes = std::fs::read(&cache_path).unwrap();

    // Reload from cache; the adopted table must equal the computed one.
    let reloaded = cache.load_if_exists().unwrap().expect("cache must load");
    assert_eq!(reloaded, computed);

    // Re-storing the reloaded table reproduces the file byte for byte.
    cache.store(&reloaded).unwrap();
    let second_bytes = std::fs::read(&cache_path).unwrap();
    assert_eq!(first_bytes, second_bytes);
}

#[test]
fn provide_with_caching_adopts_existing_cache() {
    let dir = tempfile::tempdir().unwrap();
    let (path, snapshot) = persist_and_load(s2_builder(), dir.path());
    let inbound = InboundIndex::build(&snapshot);
    let options = RetainedOptions::default();

    let first = provide_retained_heap_with_caching(
        &path, &snapshot, &inbound, &options, &NoProgress, &CancelToken::new(),
    )
    .unwrap();
    let second = provide_retained_heap_with_caching(
        &path, &snapshot, &inbound, &options, &NoProgress, &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(first, second);

    // A snapshot with different bytes must not adopt the old cache.
    let other_path = dir.path().join("other.hpsn");
    let mut b = SnapshotBuilder::new();
    b.add_type(100, "object");
    b.add_object(1, obj(1, vec![]));
    b.add_thread(thread("MainThread", &[("x", 1)]));
    let file = std::fs::File::create(&other_path).unwrap();
    encode_snapshot(&b.finish(), file).unwrap();
    let other = Snapshot::load(&other_path, &NoProgress, &CancelToken::new()).unwrap();
    let other_inbound = InboundIndex::build(&other);
    let other_retained = provide_retained_heap_with_caching(
        &other_path, &other, &other_inbound, &options, &NoProgress, &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(other_retained.retained_of_object(1), 1);
}

#[test]
fn empty_snapshot_yields_empty_tables() {
    let dir = tempfile::tempdir().unwrap();
    let (_, snapshot) = persist_and_load(SnapshotBuilder::new(), dir.path());
    let (_, retained) = compute(&snapshot);

    assert_eq!(snapshot.object_count(), 0);
    assert_eq!(retained.object_count(), 0);
    assert_eq!(retained.thread_count(), 0);
}

#[test]
fn self_loop_retains_only_itself() {
    let dir = tempfile::tempdir().unwrap();
    let mut b = SnapshotBuilder::new();
    b.add_type(100, "object");
    b.add_object(1, obj(10, vec![1]));
    b.add_thread(thread("MainThread", &[("x", 1)]));

    let (_, snapshot) = persist_and_load(b, dir.path());
    let (_, retained) = compute(&snapshot);
    assert_eq!(retained.retained_of_object(1), 10);
}

#[test]
fn all_edges_unknown_gives_singleton_subtrees() {
    let dir = tempfile::tempdir().unwrap();
    let mut b = SnapshotBuilder::new();
    b.add_type(100, "object");
    b.add_object(1, obj(10, vec![901, 902]));
    b.add_object(2, obj(20, vec![903]));
    b.add_thread(thread("MainThread", &[("x", 1), ("y", 2)]));

    let (_, snapshot) = persist_and_load(b, dir.path());
    assert_eq!(snapshot.diagnostics().dangling_references, 3);

    let (_, retained) = compute(&snapshot);
    assert_eq!(retained.retained_of_object(1), 10);
    assert_eq!(retained.retained_of_object(2), 20);
    assert_eq!(retained.retained_of_thread("MainThread"), 30);
}

#[test]
fn retained_never_below_shallow_and_total_matches_thread() {
    let dir = tempfile::tempdir().unwrap();
    let mut b = SnapshotBuilder::new();
    b.add_type(100, "object");
    b.add_object(1, obj(10, vec![2, 3, 4]));
    b.add_object(2, obj(20, vec![4, 1]));
    b.add_object(3, obj(30, vec![4]));
    b.add_object(4, obj(40, vec![]));
    b.add_thread(thread("MainThread", &[("x", 1)]));

    let (_, snapshot) = persist_and_load(b, dir.path());
    let (_, retained) = compute(&snapshot);

    for (addr, record) in snapshot.objects() {
        assert!(
            retained.retained_of_object(addr) >= record.size,
            "retained({addr}) below shallow size"
        );
    }
    // One thread reaching everything retains the whole heap.
    assert_eq!(
        retained.retained_of_thread("MainThread"),
        snapshot.total_heap_size()
    );
}

#[test]
fn projections_agree_with_tables() {
    let dir = tempfile::tempdir().unwrap();
    let (_, snapshot) = persist_and_load(s2_builder(), dir.path());
    let (inbound, retained) = compute(&snapshot);
    let view = HeapView::new(&snapshot, &inbound, &retained);

    let rows = view.page_by_retained(0, 10);
    assert_eq!(rows[0].address, 1);
    assert_eq!(rows[0].retained_size, 100);

    let d = view.object_view(4).unwrap();
    assert_eq!(d.inbound, vec![2, 3]);
    assert_eq!(d.retained_size, 40);

    let threads = view.thread_view();
    assert_eq!(threads[0].name, "MainThread");
    assert_eq!(threads[0].retained_size, 100);
}
