//! The heap model: one loaded snapshot and the indexes derived from it.

pub mod inbound;
pub mod loader;
pub mod model;

pub use inbound::InboundIndex;
pub use loader::SnapshotBuilder;
pub use model::{
    Address, Entry, FrameRecord, LoadDiagnostics, ObjectRecord, ObjectShape, Snapshot,
    SnapshotHeader, ThreadName, ThreadRecord, TypeRecord,
};
