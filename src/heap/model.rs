//! In-memory representation of one loaded snapshot.
//!
//! A `Snapshot` owns the type, object, and thread tables and is frozen once
//! the loader returns it. Edge targets that were never dumped (filtered out
//! by the producer) are tracked as *unknown* addresses: they contribute no
//! shallow size and have no outgoing edges, but lookups distinguish them
//! from addresses that never appear at all.

use crate::codec::Value;
use rustc_hash::{FxHashMap, FxHashSet};

/// Opaque identifier of one object within one snapshot.
pub type Address = u64;

/// Thread names key the per-thread retained table.
pub type ThreadName = String;

/// Shape-specific payload of an object record. Only the populated optional
/// wire fields are carried; plain objects carry nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectShape {
    Plain,
    /// Instance-like object with named attributes.
    Instance { attributes: Vec<(String, Address)> },
    /// Container-like object with an ordered element sequence.
    Container { elements: Vec<Address> },
}

/// One dumped object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Address of the object's type object.
    pub type_addr: Address,
    /// Shallow size in bytes, excluding anything reachable from the object.
    pub size: u64,
    /// Producer-side truncated string representation, if captured.
    pub str_repr: Option<String>,
    /// Outbound edges in producer order; duplicates preserved.
    pub referents: Vec<Address>,
    pub shape: ObjectShape,
}

impl ObjectRecord {
    pub fn attributes(&self) -> &[(String, Address)] {
        match &self.shape {
            ObjectShape::Instance { attributes } => attributes,
            _ => &[],
        }
    }

    pub fn elements(&self) -> &[Address] {
        match &self.shape {
            ObjectShape::Container { elements } => elements,
            _ => &[],
        }
    }
}

/// One entry of the type table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRecord {
    pub name: String,
}

/// Name substituted when an object's type address is missing from the
/// type table.
pub const UNKNOWN_TYPE_NAME: &str = "<unknown type>";

/// One frame of a thread's stack, outermost caller first in the stack vec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
    pub filename: String,
    pub line: u32,
    pub function: String,
    /// Local variables in producer order.
    pub locals: Vec<(String, Address)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRecord {
    pub name: ThreadName,
    pub is_alive: bool,
    pub is_daemon: bool,
    pub frames: Vec<FrameRecord>,
}

impl ThreadRecord {
    /// Deduplicated union of local addresses over all frames.
    pub fn local_addresses(&self) -> Vec<Address> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for frame in &self.frames {
            for &(_, addr) in &frame.locals {
                if seen.insert(addr) {
                    out.push(addr);
                }
            }
        }
        out
    }
}

/// Result of an address lookup: a dumped object, or a target the producer
/// referenced but did not dump.
#[derive(Debug, Clone, Copy)]
pub enum Entry<'a> {
    Object(&'a ObjectRecord),
    Unknown,
}

/// Non-fatal integrity counters recorded during load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadDiagnostics {
    /// Edge targets (referents, attributes, elements, locals) absent from
    /// the object table.
    pub dangling_references: u64,
    /// Duplicate keys inside one wire map; the second occurrence won.
    pub duplicate_addresses: u64,
    /// Object type addresses missing from the type table.
    pub missing_types: u64,
    /// Top-level sections with unrecognized tags, skipped.
    pub unknown_sections: u64,
    /// Records carrying both attributes and elements; attributes kept.
    pub conflicting_shapes: u64,
}

/// Header metadata as produced by the capture pipeline, key order preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotHeader {
    pub entries: Vec<(String, Value)>,
}

impl SnapshotHeader {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// An immutable loaded snapshot.
#[derive(Debug)]
pub struct Snapshot {
    pub(crate) version: u8,
    pub(crate) header: SnapshotHeader,
    pub(crate) types: FxHashMap<Address, TypeRecord>,
    pub(crate) objects: FxHashMap<Address, ObjectRecord>,
    pub(crate) threads: Vec<ThreadRecord>,
    /// Addresses that appear only as edge targets.
    pub(crate) unknown: FxHashSet<Address>,
    pub(crate) diagnostics: LoadDiagnostics,
}

impl Snapshot {
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn header(&self) -> &SnapshotHeader {
        &self.header
    }

    pub fn diagnostics(&self) -> LoadDiagnostics {
        self.diagnostics
    }

    pub fn objects(&self) -> impl Iterator<Item = (Address, &ObjectRecord)> {
        self.objects.iter().map(|(&a, o)| (a, o))
    }

    pub fn types(&self) -> impl Iterator<Item = (Address, &TypeRecord)> {
        self.types.iter().map(|(&a, t)| (a, t))
    }

    pub fn threads(&self) -> &[ThreadRecord] {
        &self.threads
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// O(1) lookup. `Unknown` for addresses that appear only as edge
    /// targets, `None` for addresses the snapshot never mentions.
    pub fn get(&self, addr: Address) -> Option<Entry<'_>> {
        if let Some(obj) = self.objects.get(&addr) {
            Some(Entry::Object(obj))
        } else if self.unknown.contains(&addr) {
            Some(Entry::Unknown)
        } else {
            None
        }
    }

    /// Whether `addr` is a dumped object (not unknown, not absent).
    pub fn contains_object(&self, addr: Address) -> bool {
        self.objects.contains_key(&addr)
    }

    /// Type-table lookup.
    pub fn type_record(&self, addr: Address) -> Option<&TypeRecord> {
        self.types.get(&addr)
    }

    /// Stored shallow size; 0 for unknown or absent addresses.
    pub fn shallow_size(&self, addr: Address) -> u64 {
        self.objects.get(&addr).map_or(0, |o| o.size)
    }

    /// Outbound edges in producer order; empty for unknown or absent.
    pub fn referents(&self, addr: Address) -> &[Address] {
        self.objects.get(&addr).map_or(&[], |o| o.referents.as_slice())
    }

    /// Resolved type name of an object, with the synthetic substitute for
    /// missing type records.
    pub fn type_name_of(&self, addr: Address) -> &str {
        self.objects
            .get(&addr)
            .and_then(|o| self.types.get(&o.type_addr))
            .map_or(UNKNOWN_TYPE_NAME, |t| t.name.as_str())
    }

    /// Sum of shallow sizes over the whole object table.
    pub fn total_heap_size(&self) -> u64 {
        self.objects.values().map(|o| o.size).sum()
    }
}
