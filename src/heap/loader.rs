//! Snapshot loading: codec → builder → frozen `Snapshot`.
//!
//! The builder doubles as the public construction API: the decoder feeds it
//! record-by-record, and producers (or tests) can populate one directly.
//! All integrity checks are non-fatal; they land in `LoadDiagnostics`.

use crate::cancel::CancelToken;
use crate::codec::{decode_snapshot, SnapshotSink, Value};
use crate::error::Result;
use crate::heap::model::{
    Address, LoadDiagnostics, ObjectRecord, Snapshot, SnapshotHeader, ThreadRecord, TypeRecord,
    UNKNOWN_TYPE_NAME,
};
use crate::progress::{NoProgress, ProgressSink};
use rustc_hash::{FxHashMap, FxHashSet};
use std::io::Read;
use std::path::Path;
use std::time::Instant;

/// Accumulates decoded records and freezes them into a `Snapshot`.
pub struct SnapshotBuilder {
    version: u8,
    header: SnapshotHeader,
    types: FxHashMap<Address, TypeRecord>,
    objects: FxHashMap<Address, ObjectRecord>,
    threads: Vec<ThreadRecord>,
    diagnostics: LoadDiagnostics,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self {
            version: crate::codec::MAX_VERSION,
            header: SnapshotHeader::default(),
            types: FxHashMap::default(),
            objects: FxHashMap::default(),
            threads: Vec::new(),
            diagnostics: LoadDiagnostics::default(),
        }
    }

    pub fn set_header(&mut self, entries: Vec<(String, Value)>) -> &mut Self {
        self.header = SnapshotHeader { entries };
        self
    }

    pub fn add_type(&mut self, addr: Address, name: impl Into<String>) -> &mut Self {
        if self.types.insert(addr, TypeRecord { name: name.into() }).is_some() {
            self.diagnostics.duplicate_addresses += 1;
        }
        self
    }

    pub fn add_object(&mut self, addr: Address, record: ObjectRecord) -> &mut Self {
        if self.objects.insert(addr, record).is_some() {
            self.diagnostics.duplicate_addresses += 1;
        }
        self
    }

    pub fn add_thread(&mut self, thread: ThreadRecord) -> &mut Self {
        self.threads.push(thread);
        self
    }

    /// Run the integrity pass and freeze. Edge targets outside the object
    /// table become unknown addresses; missing type records are substituted.
    pub fn finish(self) -> Snapshot {
        let SnapshotBuilder { version, header, mut types, objects, threads, mut diagnostics } =
            self;

        let mut unknown = FxHashSet::default();
        let mut record_edge = |target: Address, unknown: &mut FxHashSet<Address>| {
            if !objects.contains_key(&target) {
                unknown.insert(target);
                diagnostics.dangling_references += 1;
            }
        };

        for obj in objects.values() {
            for &t in &obj.referents {
                record_edge(t, &mut unknown);
            }
            for &(_, t) in obj.attributes() {
                record_edge(t, &mut unknown);
            }
            for &t in obj.elements() {
                record_edge(t, &mut unknown);
            }
        }
        for thread in &threads {
            for frame in &thread.frames {
                for &(_, t) in &frame.locals {
                    record_edge(t, &mut unknown);
                }
            }
        }

        let missing_type_addrs: FxHashSet<Address> = objects
            .values()
            .filter(|o| !types.contains_key(&o.type_addr))
            .map(|o| o.type_addr)
            .collect();
        diagnostics.missing_types = missing_type_addrs.len() as u64;
        for addr in missing_type_addrs {
            types.insert(addr, TypeRecord { name: UNKNOWN_TYPE_NAME.to_string() });
        }

        if diagnostics != LoadDiagnostics::default() {
            tracing::warn!(
                dangling = diagnostics.dangling_references,
                duplicates = diagnostics.duplicate_addresses,
                missing_types = diagnostics.missing_types,
                unknown_sections = diagnostics.unknown_sections,
                conflicting_shapes = diagnostics.conflicting_shapes,
                "snapshot loaded with integrity warnings"
            );
        }

        Snapshot { version, header, types, objects, threads, unknown, diagnostics }
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapter wiring the builder to the decoder, forwarding object-section
/// progress to the caller's sink.
struct DecodeSink<'a> {
    builder: SnapshotBuilder,
    progress: &'a dyn ProgressSink,
    objects_phase_started: bool,
}

impl SnapshotSink for DecodeSink<'_> {
    fn begin(&mut self, version: u8) {
        self.builder.version = version;
    }

    fn header(&mut self, entries: Vec<(String, Value)>) {
        self.builder.set_header(entries);
    }

    fn type_record(&mut self, addr: Address, name: String) {
        self.builder.add_type(addr, name);
    }

    fn object_record(&mut self, addr: Address, record: ObjectRecord, conflicting_shape: bool) {
        if conflicting_shape {
            self.builder.diagnostics.conflicting_shapes += 1;
        }
        self.builder.add_object(addr, record);
    }

    fn thread_record(&mut self, thread: ThreadRecord) {
        self.builder.add_thread(thread);
    }

    fn unknown_section(&mut self, tag: u8) {
        self.builder.diagnostics.unknown_sections += 1;
        tracing::warn!(tag, "skipping unknown snapshot section");
    }

    fn progress(&mut self, done: u64, total: u64) {
        if !self.objects_phase_started {
            self.progress.begin("Reading objects", Some(total));
            self.objects_phase_started = true;
        }
        self.progress.advance(done);
    }
}

impl Snapshot {
    /// Load a snapshot file. Cancellation is polled per section.
    pub fn load(path: &Path, progress: &dyn ProgressSink, cancel: &CancelToken) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let snapshot = Self::load_from(file, progress, cancel)?;
        tracing::info!(
            path = %path.display(),
            objects = snapshot.object_count(),
            types = snapshot.type_count(),
            threads = snapshot.threads().len(),
            "snapshot loaded"
        );
        Ok(snapshot)
    }

    /// Load from any byte source (the file-level gzip framing included).
    pub fn load_from<R: Read>(
        reader: R,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<Self> {
        let start = Instant::now();
        let mut sink = DecodeSink {
            builder: SnapshotBuilder::new(),
            progress,
            objects_phase_started: false,
        };
        decode_snapshot(reader, &mut sink, cancel)?;
        progress.finish();
        let snapshot = sink.builder.finish();
        tracing::debug!(elapsed = ?start.elapsed(), "snapshot decode finished");
        Ok(snapshot)
    }

    /// Convenience for callers that need no progress or cancellation.
    pub fn load_simple(path: &Path) -> Result<Self> {
        Self::load(path, &NoProgress, &CancelToken::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_snapshot;
    use crate::heap::model::{Entry, FrameRecord, ObjectShape};

    fn obj(type_addr: Address, size: u64, referents: Vec<Address>) -> ObjectRecord {
        ObjectRecord {
            type_addr,
            size,
            str_repr: None,
            referents,
            shape: ObjectShape::Plain,
        }
    }

    #[test]
    fn test_empty_snapshot_roundtrip() {
        let snapshot = SnapshotBuilder::new().finish();
        let mut bytes = Vec::new();
        encode_snapshot(&snapshot, &mut bytes).unwrap();

        let loaded =
            Snapshot::load_from(&bytes[..], &NoProgress, &CancelToken::new()).unwrap();
        assert_eq!(loaded.object_count(), 0);
        assert!(loaded.threads().is_empty());
        assert_eq!(loaded.total_heap_size(), 0);
    }

    #[test]
    fn test_roundtrip_preserves_tables() {
        let mut b = SnapshotBuilder::new();
        b.set_header(vec![
            ("producer".to_string(), Value::ShortStr("dumper 1.2".to_string())),
            ("pid".to_string(), Value::Uint(31337)),
        ]);
        b.add_type(100, "dict");
        b.add_type(101, "list");
        b.add_object(
            1,
            ObjectRecord {
                type_addr: 100,
                size: 48,
                str_repr: Some("{'k': 1}".to_string()),
                referents: vec![2, 2, 3],
                shape: ObjectShape::Instance {
                    attributes: vec![("k".to_string(), 2)],
                },
            },
        );
        b.add_object(
            2,
            ObjectRecord {
                type_addr: 101,
                size: 56,
                str_repr: None,
                referents: vec![3],
                shape: ObjectShape::Container { elements: vec![3] },
            },
        );
        b.add_object(3, obj(100, 16, vec![]));
        b.add_thread(ThreadRecord {
            name: "MainThread".to_string(),
            is_alive: true,
            is_daemon: false,
            frames: vec![FrameRecord {
                filename: "app.py".to_string(),
                line: 42,
                function: "main".to_string(),
                locals: vec![("root".to_string(), 1)],
            }],
        });
        let original = b.finish();

        let mut bytes = Vec::new();
        encode_snapshot(&original, &mut bytes).unwrap();
        let loaded =
            Snapshot::load_from(&bytes[..], &NoProgress, &CancelToken::new()).unwrap();

        assert_eq!(loaded.header(), original.header());
        assert_eq!(loaded.threads(), original.threads());
        assert_eq!(loaded.object_count(), original.object_count());
        for (addr, obj) in original.objects() {
            match loaded.get(addr) {
                Some(Entry::Object(o)) => assert_eq!(o, obj, "object {addr} differs"),
                other => panic!("object {addr} missing after roundtrip: {other:?}"),
            }
        }
        assert_eq!(loaded.type_count(), original.type_count());
        assert_eq!(loaded.diagnostics(), original.diagnostics());
    }

    #[test]
    fn test_dangling_reference_is_diagnostic_not_error() {
        let mut b = SnapshotBuilder::new();
        b.add_type(100, "dict");
        b.add_object(1, obj(100, 10, vec![999]));
        let snapshot = b.finish();

        assert_eq!(snapshot.diagnostics().dangling_references, 1);
        assert!(matches!(snapshot.get(999), Some(Entry::Unknown)));
        assert_eq!(snapshot.shallow_size(999), 0);
        assert_eq!(snapshot.referents(1), &[999]);
    }

    #[test]
    fn test_missing_type_substituted() {
        let mut b = SnapshotBuilder::new();
        b.add_object(1, obj(500, 10, vec![]));
        let snapshot = b.finish();

        assert_eq!(snapshot.diagnostics().missing_types, 1);
        assert_eq!(snapshot.type_name_of(1), UNKNOWN_TYPE_NAME);
    }

    #[test]
    fn test_duplicate_address_second_wins() {
        let mut b = SnapshotBuilder::new();
        b.add_type(100, "dict");
        b.add_object(1, obj(100, 10, vec![]));
        b.add_object(1, obj(100, 20, vec![]));
        let snapshot = b.finish();

        assert_eq!(snapshot.diagnostics().duplicate_addresses, 1);
        assert_eq!(snapshot.shallow_size(1), 20);
    }

    #[test]
    fn test_unknown_section_skipped_with_count() {
        let snapshot = SnapshotBuilder::new().finish();
        let mut bytes = Vec::new();
        encode_snapshot(&snapshot, &mut bytes).unwrap();

        // Append an unrecognized section (tag + one null value) before
        // re-compressing: decode the gz payload, splice, re-encode.
        use flate2::read::GzDecoder;
        use flate2::write::GzEncoder;
        use std::io::{Read, Write};
        let mut raw = Vec::new();
        GzDecoder::new(&bytes[..]).read_to_end(&mut raw).unwrap();
        raw.push(0x7f); // unknown section tag
        raw.push(0x00); // null body
        let mut gz = GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(&raw).unwrap();
        let spliced = gz.finish().unwrap();

        let loaded =
            Snapshot::load_from(&spliced[..], &NoProgress, &CancelToken::new()).unwrap();
        assert_eq!(loaded.diagnostics().unknown_sections, 1);
    }

    #[test]
    fn test_bad_magic_is_malformed() {
        use crate::error::HeapError;
        use flate2::write::GzEncoder;
        use std::io::Write;
        let mut gz = GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(b"NOPE\x01").unwrap();
        let bytes = gz.finish().unwrap();

        let err = Snapshot::load_from(&bytes[..], &NoProgress, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, HeapError::Malformed(_)));
    }

    #[test]
    fn test_future_version_rejected() {
        use crate::error::HeapError;
        use flate2::write::GzEncoder;
        use std::io::Write;
        let mut gz = GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(b"HPSN\x63").unwrap();
        let bytes = gz.finish().unwrap();

        let err = Snapshot::load_from(&bytes[..], &NoProgress, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, HeapError::UnsupportedVersion { found: 0x63, .. }));
    }

    #[test]
    fn test_cancelled_load() {
        use crate::error::HeapError;
        let snapshot = SnapshotBuilder::new().finish();
        let mut bytes = Vec::new();
        encode_snapshot(&snapshot, &mut bytes).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = Snapshot::load_from(&bytes[..], &NoProgress, &cancel).unwrap_err();
        assert!(matches!(err, HeapError::Cancelled));
    }
}
