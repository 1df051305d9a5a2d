//! Read-only projections over (snapshot, inbound index, retained table).
//!
//! Everything here is a pure function of the three frozen inputs; the view
//! can be shared across request handlers without locking. Pagination
//! offsets are 0-based; ties in retained size break toward the lower
//! address so pages are stable.

use crate::heap::model::{Address, Entry, ObjectShape, Snapshot};
use crate::heap::InboundIndex;
use crate::retained::RetainedHeap;
use rustc_hash::FxHashMap;
use serde::Serialize;

/// Bundles the three analysis artifacts for the UI layer.
pub struct HeapView<'a> {
    snapshot: &'a Snapshot,
    inbound: &'a InboundIndex,
    retained: &'a RetainedHeap,
}

/// Full per-object projection.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectView {
    pub address: Address,
    pub type_name: String,
    pub shallow_size: u64,
    pub retained_size: u64,
    pub str_repr: Option<String>,
    pub inbound: Vec<Address>,
    pub referents: Vec<Address>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<(String, Address)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<Address>,
}

/// One row of the objects-by-retained page.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectRow {
    pub address: Address,
    pub type_name: String,
    pub retained_size: u64,
    pub str_repr: Option<String>,
}

/// One row of the types-by-retained page.
#[derive(Debug, Clone, Serialize)]
pub struct TypeRow {
    pub type_address: Address,
    pub type_name: String,
    pub retained_total: u64,
    pub instance_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocalView {
    pub name: String,
    pub address: Address,
    pub retained_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameView {
    pub filename: String,
    pub line: u32,
    pub function: String,
    pub locals: Vec<LocalView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadView {
    pub name: String,
    pub is_alive: bool,
    pub is_daemon: bool,
    pub retained_size: u64,
    pub frames: Vec<FrameView>,
}

impl<'a> HeapView<'a> {
    pub fn new(
        snapshot: &'a Snapshot,
        inbound: &'a InboundIndex,
        retained: &'a RetainedHeap,
    ) -> Self {
        Self { snapshot, inbound, retained }
    }

    pub fn snapshot(&self) -> &Snapshot {
        self.snapshot
    }

    /// Shallow record + type name + retained size + inbound + referents.
    /// `None` for unknown and absent addresses alike — there is nothing to
    /// show for either.
    pub fn object_view(&self, addr: Address) -> Option<ObjectView> {
        let obj = match self.snapshot.get(addr)? {
            Entry::Object(obj) => obj,
            Entry::Unknown => return None,
        };
        let (attributes, elements) = match &obj.shape {
            ObjectShape::Plain => (Vec::new(), Vec::new()),
            ObjectShape::Instance { attributes } => (attributes.clone(), Vec::new()),
            ObjectShape::Container { elements } => (Vec::new(), elements.clone()),
        };
        Some(ObjectView {
            address: addr,
            type_name: self.snapshot.type_name_of(addr).to_string(),
            shallow_size: obj.size,
            retained_size: self.retained.retained_of_object(addr),
            str_repr: obj.str_repr.clone(),
            inbound: self.inbound.inbound(addr).to_vec(),
            referents: obj.referents.clone(),
            attributes,
            elements,
        })
    }

    /// Objects sorted descending by retained size, ascending address on
    /// ties. 0-based offset.
    pub fn page_by_retained(&self, offset: usize, limit: usize) -> Vec<ObjectRow> {
        let mut all: Vec<(Address, u64)> = self
            .snapshot
            .objects()
            .map(|(addr, _)| (addr, self.retained.retained_of_object(addr)))
            .collect();
        all.sort_unstable_by_key(|&(addr, retained)| (std::cmp::Reverse(retained), addr));

        all.into_iter()
            .skip(offset)
            .take(limit)
            .map(|(addr, retained_size)| ObjectRow {
                address: addr,
                type_name: self.snapshot.type_name_of(addr).to_string(),
                retained_size,
                str_repr: self
                    .snapshot
                    .get(addr)
                    .and_then(|e| match e {
                        Entry::Object(o) => o.str_repr.clone(),
                        Entry::Unknown => None,
                    }),
            })
            .collect()
    }

    /// Types sorted descending by the sum of their instances' retained
    /// sizes. `type_filter` keeps only type names containing the needle.
    pub fn page_by_type(
        &self,
        offset: usize,
        limit: usize,
        type_filter: Option<&str>,
    ) -> Vec<TypeRow> {
        let mut by_type: FxHashMap<Address, (u64, u64)> = FxHashMap::default();
        for (addr, obj) in self.snapshot.objects() {
            let slot = by_type.entry(obj.type_addr).or_default();
            slot.0 += self.retained.retained_of_object(addr);
            slot.1 += 1;
        }

        let mut rows: Vec<TypeRow> = by_type
            .into_iter()
            .map(|(type_address, (retained_total, instance_count))| TypeRow {
                type_address,
                type_name: self
                    .snapshot
                    .type_record(type_address)
                    .map_or_else(
                        || crate::heap::model::UNKNOWN_TYPE_NAME.to_string(),
                        |t| t.name.clone(),
                    ),
                retained_total,
                instance_count,
            })
            .filter(|row| type_filter.map_or(true, |needle| row.type_name.contains(needle)))
            .collect();
        rows.sort_unstable_by(|a, b| {
            b.retained_total
                .cmp(&a.retained_total)
                .then(a.type_address.cmp(&b.type_address))
        });

        rows.into_iter().skip(offset).take(limit).collect()
    }

    /// Threads descending by retained size, with per-local retained sizes.
    pub fn thread_view(&self) -> Vec<ThreadView> {
        let mut views: Vec<ThreadView> = self
            .snapshot
            .threads()
            .iter()
            .map(|thread| ThreadView {
                name: thread.name.clone(),
                is_alive: thread.is_alive,
                is_daemon: thread.is_daemon,
                retained_size: self.retained.retained_of_thread(&thread.name),
                frames: thread
                    .frames
                    .iter()
                    .map(|frame| FrameView {
                        filename: frame.filename.clone(),
                        line: frame.line,
                        function: frame.function.clone(),
                        locals: frame
                            .locals
                            .iter()
                            .map(|(name, addr)| LocalView {
                                name: name.clone(),
                                address: *addr,
                                retained_size: self.retained.retained_of_object(*addr),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();
        views.sort_by(|a, b| {
            b.retained_size
                .cmp(&a.retained_size)
                .then_with(|| a.name.cmp(&b.name))
        });
        views
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::heap::model::{FrameRecord, ObjectRecord, ThreadRecord};
    use crate::heap::SnapshotBuilder;
    use crate::progress::NoProgress;
    use crate::retained::RetainedHeapCalculator;

    fn obj(type_addr: Address, size: u64, referents: Vec<Address>) -> ObjectRecord {
        ObjectRecord {
            type_addr,
            size,
            str_repr: None,
            referents,
            shape: ObjectShape::Plain,
        }
    }

    fn build() -> (Snapshot, InboundIndex, RetainedHeap) {
        let mut b = SnapshotBuilder::new();
        b.add_type(100, "dict");
        b.add_type(101, "list");
        b.add_object(1, obj(100, 10, vec![2, 3]));
        b.add_object(2, obj(101, 20, vec![]));
        b.add_object(3, obj(101, 30, vec![]));
        b.add_thread(ThreadRecord {
            name: "MainThread".to_string(),
            is_alive: true,
            is_daemon: false,
            frames: vec![FrameRecord {
                filename: "app.py".to_string(),
                line: 7,
                function: "main".to_string(),
                locals: vec![("root".to_string(), 1)],
            }],
        });
        let snapshot = b.finish();
        let inbound = InboundIndex::build(&snapshot);
        let retained = RetainedHeapCalculator::new(&snapshot, &inbound)
            .calculate(&NoProgress, &CancelToken::new())
            .unwrap();
        (snapshot, inbound, retained)
    }

    #[test]
    fn test_object_view_combines_sources() {
        let (snapshot, inbound, retained) = build();
        let view = HeapView::new(&snapshot, &inbound, &retained);

        let v = view.object_view(2).unwrap();
        assert_eq!(v.type_name, "list");
        assert_eq!(v.shallow_size, 20);
        assert_eq!(v.retained_size, 20);
        assert_eq!(v.inbound, vec![1]);
        assert!(view.object_view(999).is_none());
    }

    #[test]
    fn test_page_by_retained_orders_and_paginates() {
        let (snapshot, inbound, retained) = build();
        let view = HeapView::new(&snapshot, &inbound, &retained);

        let rows = view.page_by_retained(0, 10);
        let addrs: Vec<Address> = rows.iter().map(|r| r.address).collect();
        // retained: 1 → 60, 3 → 30, 2 → 20
        assert_eq!(addrs, vec![1, 3, 2]);

        let page = view.page_by_retained(1, 1);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].address, 3);
    }

    #[test]
    fn test_page_by_retained_breaks_ties_by_address() {
        let mut b = SnapshotBuilder::new();
        b.add_type(100, "object");
        b.add_object(9, obj(100, 5, vec![]));
        b.add_object(4, obj(100, 5, vec![]));
        let snapshot = b.finish();
        let inbound = InboundIndex::build(&snapshot);
        let retained = RetainedHeapCalculator::new(&snapshot, &inbound)
            .calculate(&NoProgress, &CancelToken::new())
            .unwrap();
        let view = HeapView::new(&snapshot, &inbound, &retained);

        let rows = view.page_by_retained(0, 10);
        let addrs: Vec<Address> = rows.iter().map(|r| r.address).collect();
        assert_eq!(addrs, vec![4, 9]);
    }

    #[test]
    fn test_page_by_type_aggregates() {
        let (snapshot, inbound, retained) = build();
        let view = HeapView::new(&snapshot, &inbound, &retained);

        let rows = view.page_by_type(0, 10, None);
        assert_eq!(rows[0].type_name, "dict");
        assert_eq!(rows[0].retained_total, 60);
        assert_eq!(rows[0].instance_count, 1);
        assert_eq!(rows[1].type_name, "list");
        assert_eq!(rows[1].retained_total, 50);
        assert_eq!(rows[1].instance_count, 2);

        let filtered = view.page_by_type(0, 10, Some("dic"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].type_name, "dict");
    }

    #[test]
    fn test_thread_view_includes_local_retained() {
        let (snapshot, inbound, retained) = build();
        let view = HeapView::new(&snapshot, &inbound, &retained);

        let threads = view.thread_view();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].retained_size, 60);
        assert_eq!(threads[0].frames[0].locals[0].retained_size, 60);
    }
}
